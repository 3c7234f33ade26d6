use qdctools::{de, ser, Event, Interval, ListElement422, ListElement8222, RecordKind, WaveformElement};

fn tsv_lines(events: &[Event]) -> Vec<String> {
    let mut wtr = csv::WriterBuilder::new()
        .has_headers(false)
        .delimiter(b'\t')
        .flexible(true)
        .from_writer(Vec::new());
    ser::tsv(&mut wtr, events).unwrap();
    let bytes = wtr.into_inner().unwrap();
    String::from_utf8(bytes).unwrap().lines().map(String::from).collect()
}

#[test]
fn compact_tsv() {
    let events = vec![
        Event::from(ListElement422 { time: 10, channel: 3, charge: 400 }),
        Event::from(ListElement422 { time: 12, channel: 9, charge: 401 }),
    ];
    assert_eq!(vec!["3\t10\t400", "9\t12\t401"], tsv_lines(&events));
}

#[test]
fn waveform_tsv() {
    let w = WaveformElement {
        time: 1,
        channel: 2,
        charge: 3,
        baseline: 4,
        trigger: 1,
        gate: Interval { start: 0, end: 2 },
        samples: vec![100, 200, 300],
        ..Default::default()
    };
    assert_eq!(vec!["2\t1\t3\t4\t1\t0-2\t-\t-\t100,200,300"], tsv_lines(&[Event::from(w)]));
}

/// Records written back to back read back as the same events
#[test]
fn packed_records_read_back() {
    let events = vec![
        Event::from(ListElement8222 { time: 0xFFFF_0000_0001, channel: 63, charge: 1, baseline: 2 }),
        Event::from(ListElement8222 { time: 7, channel: 0, charge: u16::MAX, baseline: 0 }),
    ];
    let bytes = ser::records(&events);
    assert_eq!(2 * ListElement8222::SIZE, bytes.len());
    assert_eq!(events, de::unit(&bytes, RecordKind::Extended, ListElement8222::SIZE).unwrap());
}
