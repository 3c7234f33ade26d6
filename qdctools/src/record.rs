//! Fixed-layout event records
//!
//! Every record has a packed little-endian binary representation that is
//! used both in memory (inside an [`AppendBuffer`](crate::AppendBuffer))
//! and on disk, so there is no transformation between decode and persist:
//!
//! ```text
//! Compact   (8 B):       time u32 | channel u16 | charge u16
//! Extended  (14 B):      time u64 | channel u16 | charge u16 | baseline u16
//! Waveform  (30 + 2n B): <Extended> | num_samples u16 | trigger u16
//!                        | gate u16 u16 | holdoff u16 u16 | overthreshold u16 u16
//!                        | samples u16 * n
//! ```

use crate::decode::RawEvent;
use crate::UNSET;
use serde::{Deserialize, Serialize};

/// Which of the three record variants a session produces. Fixed for the
/// lifetime of an acquisition session by the firmware capability flags.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Ord, PartialOrd, Hash, Serialize, Deserialize)]
pub enum RecordKind {
    Compact,
    Extended,
    Waveform,
}

impl RecordKind {
    pub fn from_flags(extras: bool, waveform: bool) -> Self {
        match (extras, waveform) {
            (_, true) => RecordKind::Waveform,
            (true, false) => RecordKind::Extended,
            (false, false) => RecordKind::Compact,
        }
    }

    /// Data type code stored once per digitizer as metadata
    pub fn code(self) -> u16 {
        match self {
            RecordKind::Compact => 1,
            RecordKind::Extended => 2,
            RecordKind::Waveform => 3,
        }
    }

    pub fn from_code(code: u16) -> Option<Self> {
        match code {
            1 => Some(RecordKind::Compact),
            2 => Some(RecordKind::Extended),
            3 => Some(RecordKind::Waveform),
            _ => None,
        }
    }

    /// Size in bytes of one record. `samples` only matters for waveforms.
    pub fn element_size(self, samples: usize) -> usize {
        match self {
            RecordKind::Compact => ListElement422::SIZE,
            RecordKind::Extended => ListElement8222::SIZE,
            RecordKind::Waveform => WaveformElement::HEADER_SIZE + 2 * samples,
        }
    }

    /// Number of samples carried by a record of `element_size` bytes
    pub fn samples(self, element_size: usize) -> usize {
        match self {
            RecordKind::Waveform => element_size.saturating_sub(WaveformElement::HEADER_SIZE) / 2,
            _ => 0,
        }
    }

    /// Declared per-event binary layout, persisted alongside the data
    pub fn layout(self, samples: usize) -> Vec<Field> {
        let mut fields = Vec::new();
        match self {
            RecordKind::Compact => {
                fields.push(Field::new("time", 0, Scalar::U32, 1));
                fields.push(Field::new("channel", 4, Scalar::U16, 1));
                fields.push(Field::new("charge", 6, Scalar::U16, 1));
            }
            RecordKind::Extended | RecordKind::Waveform => {
                fields.push(Field::new("time", 0, Scalar::U64, 1));
                fields.push(Field::new("channel", 8, Scalar::U16, 1));
                fields.push(Field::new("charge", 10, Scalar::U16, 1));
                fields.push(Field::new("baseline", 12, Scalar::U16, 1));
            }
        }
        if self == RecordKind::Waveform {
            fields.push(Field::new("num_samples", 14, Scalar::U16, 1));
            fields.push(Field::new("trigger", 16, Scalar::U16, 1));
            fields.push(Field::new("gate", 18, Scalar::U16, 2));
            fields.push(Field::new("holdoff", 22, Scalar::U16, 2));
            fields.push(Field::new("overthreshold", 26, Scalar::U16, 2));
            fields.push(Field::new("samples", 30, Scalar::U16, samples));
        }
        fields
    }
}

#[derive(Clone, Copy, Debug, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Scalar {
    U16,
    U32,
    U64,
}

/// One member of a record layout
#[derive(Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub struct Field {
    pub name: String,
    pub offset: usize,
    #[serde(rename = "type")]
    pub ty: Scalar,
    pub count: usize,
}

impl Field {
    fn new(name: &str, offset: usize, ty: Scalar, count: usize) -> Self {
        Field { name: name.to_string(), offset, ty, count }
    }
}

/// A record type with a fixed binary layout that can be decoded straight
/// from a raw event window.
pub trait Element: Sized {
    const KIND: RecordKind;

    /// Encoded size of this particular record
    fn element_size(&self) -> usize;

    fn decode(raw: &RawEvent<'_>) -> Self;

    /// Encode into `out`, which is exactly `element_size()` bytes long
    fn write_to(&self, out: &mut [u8]);

    /// Decode from its binary layout; `None` if `bytes` is too short
    fn read_from(bytes: &[u8]) -> Option<Self>;
}

/// Compact list event: 32-bit time, channel, charge
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub struct ListElement422 {
    pub time: u32,
    pub channel: u16,
    pub charge: u16,
}

impl ListElement422 {
    pub const SIZE: usize = 8;
}

impl Element for ListElement422 {
    const KIND: RecordKind = RecordKind::Compact;

    fn element_size(&self) -> usize {
        Self::SIZE
    }

    fn decode(raw: &RawEvent<'_>) -> Self {
        ListElement422 {
            time: raw.time_tag(),
            channel: raw.channel(),
            charge: raw.charge(),
        }
    }

    fn write_to(&self, out: &mut [u8]) {
        out[0..4].copy_from_slice(&self.time.to_le_bytes());
        put_u16(out, 4, self.channel);
        put_u16(out, 6, self.charge);
    }

    fn read_from(bytes: &[u8]) -> Option<Self> {
        Some(ListElement422 {
            time: u32::from_le_bytes(bytes.get(0..4)?.try_into().ok()?),
            channel: get_u16(bytes, 4)?,
            charge: get_u16(bytes, 6)?,
        })
    }
}

/// Extended list event: 48-bit time, channel, charge, baseline
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub struct ListElement8222 {
    pub time: u64,
    pub channel: u16,
    pub charge: u16,
    pub baseline: u16,
}

impl ListElement8222 {
    pub const SIZE: usize = 14;
}

impl Element for ListElement8222 {
    const KIND: RecordKind = RecordKind::Extended;

    fn element_size(&self) -> usize {
        Self::SIZE
    }

    fn decode(raw: &RawEvent<'_>) -> Self {
        ListElement8222 {
            time: raw.time(),
            channel: raw.channel(),
            charge: raw.charge(),
            baseline: raw.baseline(),
        }
    }

    fn write_to(&self, out: &mut [u8]) {
        out[0..8].copy_from_slice(&self.time.to_le_bytes());
        put_u16(out, 8, self.channel);
        put_u16(out, 10, self.charge);
        put_u16(out, 12, self.baseline);
    }

    fn read_from(bytes: &[u8]) -> Option<Self> {
        Some(ListElement8222 {
            time: u64::from_le_bytes(bytes.get(0..8)?.try_into().ok()?),
            channel: get_u16(bytes, 8)?,
            charge: get_u16(bytes, 10)?,
            baseline: get_u16(bytes, 12)?,
        })
    }
}

/// First and last sample index at which a marker was active.
/// Both ends are [`UNSET`] when the marker was never seen.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub struct Interval {
    pub start: u16,
    pub end: u16,
}

impl Interval {
    pub const UNSET: Interval = Interval { start: UNSET, end: UNSET };

    pub fn is_set(&self) -> bool {
        self.start != UNSET
    }

    /// Extend the interval to include sample `index`
    pub fn observe(&mut self, index: u16) {
        if self.start == UNSET {
            self.start = index;
        }
        self.end = index;
    }
}

impl Default for Interval {
    fn default() -> Self {
        Interval::UNSET
    }
}

/// Extended event plus its samples and the marker positions derived from them
#[derive(Clone, Debug, Default, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub struct WaveformElement {
    pub time: u64,
    pub channel: u16,
    pub charge: u16,
    pub baseline: u16,
    pub trigger: u16,
    pub gate: Interval,
    pub holdoff: Interval,
    pub overthreshold: Interval,
    pub samples: Vec<u16>,
}

impl WaveformElement {
    /// Bytes before the sample array
    pub const HEADER_SIZE: usize = 30;
}

impl Element for WaveformElement {
    const KIND: RecordKind = RecordKind::Waveform;

    fn element_size(&self) -> usize {
        Self::HEADER_SIZE + 2 * self.samples.len()
    }

    fn decode(raw: &RawEvent<'_>) -> Self {
        let mut w = WaveformElement {
            time: raw.time(),
            channel: raw.channel(),
            charge: raw.charge(),
            baseline: raw.baseline(),
            trigger: UNSET,
            samples: Vec::with_capacity(raw.format().samples()),
            ..Default::default()
        };
        for (i, s) in raw.samples().enumerate() {
            let i = i as u16;
            if s.trigger {
                w.trigger = i;
            }
            if s.gate {
                w.gate.observe(i);
            }
            if s.holdoff {
                w.holdoff.observe(i);
            }
            if s.overthreshold {
                w.overthreshold.observe(i);
            }
            w.samples.push(s.value);
        }
        w
    }

    fn write_to(&self, out: &mut [u8]) {
        out[0..8].copy_from_slice(&self.time.to_le_bytes());
        put_u16(out, 8, self.channel);
        put_u16(out, 10, self.charge);
        put_u16(out, 12, self.baseline);
        put_u16(out, 14, self.samples.len() as u16);
        put_u16(out, 16, self.trigger);
        for (offset, iv) in [(18, self.gate), (22, self.holdoff), (26, self.overthreshold)] {
            put_u16(out, offset, iv.start);
            put_u16(out, offset + 2, iv.end);
        }
        for (i, &s) in self.samples.iter().enumerate() {
            put_u16(out, Self::HEADER_SIZE + 2 * i, s);
        }
    }

    fn read_from(bytes: &[u8]) -> Option<Self> {
        let n = get_u16(bytes, 14)? as usize;
        let interval = |offset| -> Option<Interval> {
            Some(Interval { start: get_u16(bytes, offset)?, end: get_u16(bytes, offset + 2)? })
        };
        let samples = (0..n)
            .map(|i| get_u16(bytes, Self::HEADER_SIZE + 2 * i))
            .collect::<Option<Vec<u16>>>()?;
        Some(WaveformElement {
            time: u64::from_le_bytes(bytes.get(0..8)?.try_into().ok()?),
            channel: get_u16(bytes, 8)?,
            charge: get_u16(bytes, 10)?,
            baseline: get_u16(bytes, 12)?,
            trigger: get_u16(bytes, 16)?,
            gate: interval(18)?,
            holdoff: interval(22)?,
            overthreshold: interval(26)?,
            samples,
        })
    }
}

/// A decoded event of any variant
#[derive(Clone, Debug, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub enum Event {
    Compact(ListElement422),
    Extended(ListElement8222),
    Waveform(WaveformElement),
}

impl Event {
    pub fn decode(kind: RecordKind, raw: &RawEvent<'_>) -> Self {
        match kind {
            RecordKind::Compact => Event::Compact(ListElement422::decode(raw)),
            RecordKind::Extended => Event::Extended(ListElement8222::decode(raw)),
            RecordKind::Waveform => Event::Waveform(WaveformElement::decode(raw)),
        }
    }

    pub fn read_from(kind: RecordKind, bytes: &[u8]) -> Option<Self> {
        match kind {
            RecordKind::Compact => ListElement422::read_from(bytes).map(Event::Compact),
            RecordKind::Extended => ListElement8222::read_from(bytes).map(Event::Extended),
            RecordKind::Waveform => WaveformElement::read_from(bytes).map(Event::Waveform),
        }
    }

    pub fn kind(&self) -> RecordKind {
        match self {
            Event::Compact(_) => RecordKind::Compact,
            Event::Extended(_) => RecordKind::Extended,
            Event::Waveform(_) => RecordKind::Waveform,
        }
    }

    pub fn element_size(&self) -> usize {
        match self {
            Event::Compact(e) => e.element_size(),
            Event::Extended(e) => e.element_size(),
            Event::Waveform(e) => e.element_size(),
        }
    }

    pub fn write_to(&self, out: &mut [u8]) {
        match self {
            Event::Compact(e) => e.write_to(out),
            Event::Extended(e) => e.write_to(out),
            Event::Waveform(e) => e.write_to(out),
        }
    }

    pub fn time(&self) -> u64 {
        match self {
            Event::Compact(e) => e.time as u64,
            Event::Extended(e) => e.time,
            Event::Waveform(e) => e.time,
        }
    }

    pub fn channel(&self) -> u16 {
        match self {
            Event::Compact(e) => e.channel,
            Event::Extended(e) => e.channel,
            Event::Waveform(e) => e.channel,
        }
    }

    pub fn charge(&self) -> u16 {
        match self {
            Event::Compact(e) => e.charge,
            Event::Extended(e) => e.charge,
            Event::Waveform(e) => e.charge,
        }
    }
}

impl From<ListElement422> for Event {
    fn from(e: ListElement422) -> Self {
        Event::Compact(e)
    }
}

impl From<ListElement8222> for Event {
    fn from(e: ListElement8222) -> Self {
        Event::Extended(e)
    }
}

impl From<WaveformElement> for Event {
    fn from(e: WaveformElement) -> Self {
        Event::Waveform(e)
    }
}

#[inline]
fn put_u16(out: &mut [u8], offset: usize, v: u16) {
    out[offset..offset + 2].copy_from_slice(&v.to_le_bytes());
}

#[inline]
fn get_u16(bytes: &[u8], offset: usize) -> Option<u16> {
    Some(u16::from_le_bytes(bytes.get(offset..offset + 2)?.try_into().ok()?))
}
