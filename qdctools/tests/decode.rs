use qdctools::gen::{words_to_bytes, BoardAggregate, SyntheticEvent};
use qdctools::{
    fill, AggregateDecoder, AppendBuffer, BufferError, DecodeError, Element, Event, FillError,
    GroupFormat, Interval, ListElement422, ListElement8222, RecordKind, WaveformElement, UNSET,
};

mod common;

fn decode_all<E: Element>(bytes: &[u8]) -> Vec<E> {
    AggregateDecoder::new(bytes)
        .map(|r| E::decode(&r.unwrap()))
        .collect()
}

fn first_error(bytes: &[u8]) -> DecodeError {
    AggregateDecoder::new(bytes)
        .find_map(|r| r.err())
        .expect("buffer should not decode")
}

#[test]
fn compact_round_trip() {
    let groups = [0, 2, 5];
    let m = 4;
    let bytes = common::board(&groups, m, GroupFormat::new(false, false, 0)).to_bytes();

    let mut out = AppendBuffer::with_elements(64, ListElement422::SIZE).unwrap();
    assert_eq!(12, fill::<ListElement422>(&bytes, &mut out).unwrap());

    let mut expected = Vec::new();
    for &g in &groups {
        for i in 0..m {
            let e = common::event(g, i);
            expected.push(ListElement422 {
                time: e.time,
                channel: g as u16 * 8 + e.channel as u16,
                charge: e.charge,
            });
        }
    }
    assert_eq!(expected, out.iter_as::<ListElement422>().collect::<Vec<_>>());
}

#[test]
fn extended_round_trip() {
    let groups = [1, 7];
    let bytes = common::board(&groups, 3, GroupFormat::new(true, false, 0)).to_bytes();
    let events = decode_all::<ListElement8222>(&bytes);
    assert_eq!(6, events.len());
    for (n, e) in events.iter().enumerate() {
        let g = groups[n / 3];
        let s = common::event(g, (n % 3) as u32);
        assert_eq!((s.extension as u64) << 32 | s.time as u64, e.time);
        assert_eq!(s.baseline, e.baseline);
        assert_eq!(s.charge, e.charge);
        assert_eq!(g as u16 * 8 + s.channel as u16, e.channel);
    }
}

#[test]
fn waveform_round_trip() {
    let format = GroupFormat::with_samples(true, 16);
    assert_eq!(16, format.samples());
    let bytes = common::board(&[3], 2, format).to_bytes();
    let events = decode_all::<WaveformElement>(&bytes);
    assert_eq!(2, events.len());

    let expected: Vec<u16> = common::marked_samples(16).iter().map(|s| s.value).collect();
    for (i, w) in events.iter().enumerate() {
        let s = common::event(3, i as u32);
        assert_eq!((s.extension as u64) << 32 | s.time as u64, w.time);
        assert_eq!(expected, w.samples);
        // last index with the trigger bit
        assert_eq!(4, w.trigger);
        assert_eq!(Interval { start: 2, end: 5 }, w.gate);
        assert_eq!(Interval { start: 7, end: 7 }, w.holdoff);
        assert_eq!(Interval::UNSET, w.overthreshold);
        assert_eq!(UNSET, w.overthreshold.start);
        assert_eq!(RecordKind::Waveform.element_size(16), w.element_size());
    }
}

#[test]
fn waveform_without_markers() {
    let format = GroupFormat::with_samples(false, 8);
    let mut e = SyntheticEvent::new(5, 1, 2);
    e.samples = vec![Default::default(); 8];
    let bytes = BoardAggregate::new().group(0, format, vec![e]).to_bytes();
    let w = decode_all::<WaveformElement>(&bytes).remove(0);
    assert_eq!(UNSET, w.trigger);
    assert_eq!(Interval::UNSET, w.gate);
    assert_eq!(Interval::UNSET, w.holdoff);
    assert_eq!(8, w.samples.len());
    // no extras word: zero extension and baseline
    assert_eq!(5, w.time);
    assert_eq!(0, w.baseline);
}

#[test]
fn groups_ascend_regardless_of_insertion() {
    let f = GroupFormat::new(false, false, 0);
    let bytes = BoardAggregate::new()
        .group(6, f, vec![SyntheticEvent::new(1, 0, 0)])
        .group(1, f, vec![SyntheticEvent::new(2, 0, 0)])
        .to_bytes();
    let events = AggregateDecoder::new(&bytes)
        .map(|r| r.unwrap().group())
        .collect::<Vec<_>>();
    assert_eq!(vec![1, 6], events);
}

#[test]
fn consecutive_boards() {
    let f = GroupFormat::new(true, false, 0);
    let mut bytes = common::board(&[0], 2, f).to_bytes();
    bytes.extend(common::board(&[4], 3, f).to_bytes());
    bytes.extend(BoardAggregate::new().to_bytes());
    let groups = AggregateDecoder::new(&bytes)
        .map(|r| r.unwrap().group())
        .collect::<Vec<_>>();
    assert_eq!(vec![0, 0, 4, 4, 4], groups);
}

#[test]
fn dispatch_matches_monomorphic_decode() {
    let f = GroupFormat::with_samples(true, 8);
    let bytes = common::board(&[2], 2, f).to_bytes();
    for raw in AggregateDecoder::new(&bytes) {
        let raw = raw.unwrap();
        assert_eq!(
            Event::Waveform(WaveformElement::decode(&raw)),
            Event::decode(RecordKind::Waveform, &raw)
        );
        assert_eq!(
            Event::Compact(ListElement422::decode(&raw)),
            Event::decode(RecordKind::Compact, &raw)
        );
    }
}

#[test]
fn stride_mismatch_is_rejected() {
    for extras in [false, true] {
        for waveform in [false, true] {
            for field in 0..4 {
                let format = GroupFormat::new(extras, waveform, field);
                let mut words = common::board(&[0], 2, format).words();
                // one stray word inside both the group and the board
                words[0] += 1;
                words[2] += 1;
                words.push(0);
                match first_error(&words_to_bytes(&words)) {
                    DecodeError::Stride { stride, words, .. } => {
                        assert_eq!(format.stride(), stride);
                        assert_eq!(2 * format.stride() + 1, words);
                    }
                    e => panic!("{:?} should be a stride error, got {}", format, e),
                }
            }
        }
    }
}

#[test]
fn bad_board_magic() {
    let mut words = common::board(&[0], 1, GroupFormat::default()).words();
    words[0] &= 0x0FFF_FFFF;
    assert!(matches!(first_error(&words_to_bytes(&words)), DecodeError::BoardMagic { offset: 0, .. }));
}

#[test]
fn board_longer_than_buffer() {
    let words = common::board(&[0], 2, GroupFormat::default()).words();
    let bytes = words_to_bytes(&words[..words.len() - 1]);
    assert!(matches!(first_error(&bytes), DecodeError::BoardLength { .. }));
}

#[test]
fn group_header_bit() {
    let mut words = common::board(&[0], 1, GroupFormat::default()).words();
    words[2] &= 0x7FFF_FFFF;
    assert!(matches!(first_error(&words_to_bytes(&words)), DecodeError::GroupHeader { offset: 8, .. }));
}

#[test]
fn group_longer_than_board() {
    let mut words = common::board(&[0], 1, GroupFormat::default()).words();
    words[2] += 2;
    words.extend([0, 0]);
    assert!(matches!(first_error(&words_to_bytes(&words)), DecodeError::GroupLength { .. }));
}

#[test]
fn bad_format_word() {
    let mut words = common::board(&[0], 1, GroupFormat::default()).words();
    words[3] = 0;
    assert!(matches!(first_error(&words_to_bytes(&words)), DecodeError::Format { offset: 12, .. }));
}

#[test]
fn words_after_last_group() {
    let mut words = common::board(&[0], 1, GroupFormat::default()).words();
    words[0] += 1;
    words.push(0);
    assert!(matches!(first_error(&words_to_bytes(&words)), DecodeError::Trailing { .. }));
}

#[test]
fn masked_group_missing() {
    let mut words = common::board(&[0], 1, GroupFormat::default()).words();
    words[1] |= 0b10;
    assert!(matches!(
        first_error(&words_to_bytes(&words)),
        DecodeError::MissingGroup { group: 1, .. }
    ));
}

#[test]
fn decoder_is_fused_after_error() {
    let mut words = common::board(&[0], 3, GroupFormat::default()).words();
    words[0] += 1;
    words[2] += 1;
    words.push(0);
    let mut good = common::board(&[1], 3, GroupFormat::default()).words();
    words.append(&mut good);
    let bytes = words_to_bytes(&words);
    let mut d = AggregateDecoder::new(&bytes);
    assert!(matches!(d.next(), Some(Err(DecodeError::Stride { .. }))));
    assert!(d.next().is_none());
    assert!(d.next().is_none());
}

#[test]
fn fill_stops_at_capacity() {
    let bytes = common::board(&[0], 4, GroupFormat::default()).to_bytes();
    let mut out = AppendBuffer::with_elements(3, ListElement422::SIZE).unwrap();
    match fill::<ListElement422>(&bytes, &mut out) {
        Err(FillError::Buffer(BufferError::CapacityExceeded { capacity: 3 })) => {}
        r => panic!("expected a capacity error, got {:?}", r),
    }
    assert_eq!(3, out.len());
}
