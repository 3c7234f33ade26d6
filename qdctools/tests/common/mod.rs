#![allow(dead_code)]

use qdctools::decode::Sample;
use qdctools::gen::{BoardAggregate, SyntheticEvent};
use qdctools::GroupFormat;

/// Event `i` of group `g`: every field depends on both so that
/// reordering shows up as a field mismatch
pub fn event(g: u8, i: u32) -> SyntheticEvent {
    SyntheticEvent {
        time: 1_000 * i + g as u32,
        extension: (0x100 + i) as u16,
        baseline: 0x200 + g as u16,
        channel: ((g as u32 + i) % 8) as u8,
        charge: (0x3000 + 16 * i + g as u32) as u16,
        samples: Vec::new(),
    }
}

/// Samples with each marker active on a fixed run of indices
pub fn marked_samples(n: usize) -> Vec<Sample> {
    (0..n)
        .map(|k| Sample {
            value: (k * 37 % 4096) as u16,
            gate: (2..6).contains(&k),
            trigger: k == 3 || k == 4,
            holdoff: k == 7,
            overthreshold: false,
        })
        .collect()
}

/// Board aggregate with `m` events in each of `groups`
pub fn board(groups: &[u8], m: u32, format: GroupFormat) -> BoardAggregate {
    let mut agg = BoardAggregate::new();
    for &g in groups {
        let events = (0..m)
            .map(|i| {
                let mut e = event(g, i);
                e.samples = marked_samples(format.samples());
                e
            })
            .collect();
        agg = agg.group(g, format, events);
    }
    agg
}
