//! Serialization of events, as packed records and as `.tsv`

use crate::record::{Event, Interval};
use anyhow::Result;
use std::io::Write;

/// Encode events back to back in their record layout
pub fn records<'a>(events: impl IntoIterator<Item = &'a Event>) -> Vec<u8> {
    let mut bytes = Vec::new();
    for e in events {
        let start = bytes.len();
        bytes.resize(start + e.element_size(), 0);
        e.write_to(&mut bytes[start..]);
    }
    bytes
}

/// Serialize events to tab-separated values.
///
/// Columns are channel, time, charge; extended records add the baseline and
/// waveform records further add the trigger, the gate, hold-off and
/// over-threshold intervals, and the samples joined by commas.
pub fn tsv<'a>(wtr: &mut csv::Writer<impl Write>, events: impl IntoIterator<Item = &'a Event>) -> Result<()> {
    for e in events {
        let mut record = vec![e.channel().to_string(), e.time().to_string(), e.charge().to_string()];
        match e {
            Event::Compact(_) => {}
            Event::Extended(x) => record.push(x.baseline.to_string()),
            Event::Waveform(w) => {
                record.push(w.baseline.to_string());
                record.push(w.trigger.to_string());
                for iv in [w.gate, w.holdoff, w.overthreshold] {
                    record.push(interval(iv));
                }
                let samples: Vec<String> = w.samples.iter().map(|s| s.to_string()).collect();
                record.push(samples.join(","));
            }
        }
        wtr.write_record(&record)?;
    }
    Ok(())
}

fn interval(iv: Interval) -> String {
    if iv.is_set() {
        format!("{}-{}", iv.start, iv.end)
    } else {
        String::from("-")
    }
}
