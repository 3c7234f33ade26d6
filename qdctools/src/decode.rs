//! Decoder for the DPP-QDC board aggregate readout format
//!
//! A readout buffer is a sequence of board aggregates, each holding one
//! group aggregate per group set in its mask, each holding a run of events
//! of a fixed stride:
//!
//! ```text
//! Board aggregate                 Group aggregate
//! +---------------------------+   +---------------------------------+
//! | 1010 | size (28 bits)     |   | 1 | size (31 bits)              |
//! | ...        | group mask   |   | 0 1 1 X W ...  | sample field   |
//! | group aggregate (mask b0) |   | event 0 (stride words)          |
//! | group aggregate (mask b1) |   | event 1                         |
//! | ...                       |   | ...                             |
//! +---------------------------+   +---------------------------------+
//!
//! Event: time tag | sample words (W) | extras (X) | channel/charge
//! ```
//!
//! All sizes are in 32-bit words and include their own headers. Every
//! advance of the cursor is checked against the enclosing aggregate and
//! the buffer, so inconsistent length fields surface as a [`DecodeError`]
//! rather than a misaligned read.

use bit_iter::BitIter;
use thiserror::Error;

use crate::bit::BitOps;
use crate::buffer::{AppendBuffer, BufferError};
use crate::record::Element;
use crate::CHANNELS_PER_GROUP;

/// Top nibble of the first board aggregate header word
pub const BOARD_MAGIC: u32 = 0xA;
pub const BOARD_HEADER_WORDS: usize = 2;
pub const GROUP_HEADER_WORDS: usize = 2;

const FORMAT_RESERVED: usize = 31;
const FORMAT_MARKER_HI: usize = 30;
const FORMAT_MARKER_LO: usize = 29;
const FORMAT_EXTRAS: usize = 28;
const FORMAT_WAVEFORM: usize = 27;
const FORMAT_SAMPLES: u32 = 0xFFF;

/// Marker bits within one 16-bit half of a packed sample word
pub const GATE_BIT: usize = 12;
pub const TRIGGER_BIT: usize = 13;
pub const HOLDOFF_BIT: usize = 14;
pub const OVERTHRESHOLD_BIT: usize = 15;
pub const SAMPLE_MASK: u32 = 0xFFF;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum DecodeError {
    #[error("buffer of {len} bytes is not a whole number of words")]
    Misaligned { len: usize },
    #[error("bad board aggregate magic in word {word:#010x} at byte {offset}")]
    BoardMagic { offset: usize, word: u32 },
    #[error("board aggregate at byte {offset} claims {words} words, {available} available")]
    BoardLength { offset: usize, words: usize, available: usize },
    #[error("group {group} expected at byte {offset} but its board aggregate has ended")]
    MissingGroup { offset: usize, group: u8 },
    #[error("bad group aggregate header {word:#010x} at byte {offset}")]
    GroupHeader { offset: usize, word: u32 },
    #[error("group aggregate at byte {offset} claims {words} words, {available} available")]
    GroupLength { offset: usize, words: usize, available: usize },
    #[error("bad group format word {word:#010x} at byte {offset}")]
    Format { offset: usize, word: u32 },
    #[error("group aggregate at byte {offset} holds {words} event words, not a multiple of the {stride} word stride")]
    Stride { offset: usize, words: usize, stride: usize },
    #[error("board aggregate ends at byte {end} but its groups end at byte {offset}")]
    Trailing { offset: usize, end: usize },
}

/// Per-group event format, from the second group aggregate header word
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq, Hash)]
pub struct GroupFormat {
    pub extras: bool,
    pub waveform: bool,
    /// Sample count field; each unit is four sample words, i.e. eight samples
    pub sample_field: u16,
}

impl GroupFormat {
    pub fn new(extras: bool, waveform: bool, sample_field: u16) -> Self {
        GroupFormat { extras, waveform, sample_field: sample_field & FORMAT_SAMPLES as u16 }
    }

    /// Most samples per event the 12-bit sample field can describe
    pub const MAX_SAMPLES: usize = FORMAT_SAMPLES as usize * 8;

    /// Format carrying at least `samples` samples per event. Callers must
    /// keep `samples` within [`MAX_SAMPLES`](Self::MAX_SAMPLES).
    pub fn with_samples(extras: bool, samples: usize) -> Self {
        GroupFormat::new(extras, samples > 0, ((samples + 7) / 8) as u16)
    }

    fn from_word(word: u32, offset: usize) -> Result<Self, DecodeError> {
        if word.check(FORMAT_RESERVED) || !word.check(FORMAT_MARKER_HI) || !word.check(FORMAT_MARKER_LO) {
            return Err(DecodeError::Format { offset, word });
        }
        Ok(GroupFormat {
            extras: word.check(FORMAT_EXTRAS),
            waveform: word.check(FORMAT_WAVEFORM),
            sample_field: (word & FORMAT_SAMPLES) as u16,
        })
    }

    pub fn to_word(&self) -> u32 {
        let mut w = self.sample_field as u32 & FORMAT_SAMPLES;
        w.set(FORMAT_MARKER_HI);
        w.set(FORMAT_MARKER_LO);
        w.change(FORMAT_EXTRAS, self.extras);
        w.change(FORMAT_WAVEFORM, self.waveform);
        w
    }

    /// Number of packed sample words per event
    pub fn sample_words(&self) -> usize {
        if self.waveform {
            (self.sample_field as usize) << 2
        } else {
            0
        }
    }

    pub fn samples(&self) -> usize {
        self.sample_words() * 2
    }

    /// Event size in words
    pub fn stride(&self) -> usize {
        2 + self.extras as usize + self.sample_words()
    }
}

/// The stride-sized window of one event inside a group aggregate
#[derive(Clone, Copy, Debug)]
pub struct RawEvent<'a> {
    group: u8,
    format: GroupFormat,
    bytes: &'a [u8],
}

impl<'a> RawEvent<'a> {
    pub fn group(&self) -> u8 {
        self.group
    }

    pub fn format(&self) -> GroupFormat {
        self.format
    }

    /// The event's words as they appear in the readout buffer
    pub fn bytes(&self) -> &'a [u8] {
        self.bytes
    }

    #[inline]
    fn word(&self, i: usize) -> u32 {
        read_word(self.bytes, i).unwrap_or(0)
    }

    #[inline]
    fn last(&self) -> u32 {
        self.word(self.format.stride() - 1)
    }

    #[inline]
    fn extra(&self) -> u32 {
        if self.format.extras {
            self.word(self.format.stride() - 2)
        } else {
            0
        }
    }

    /// 32-bit trigger time tag
    pub fn time_tag(&self) -> u32 {
        self.word(0)
    }

    /// Trigger time tag extended by the high-order bits from the extras word
    pub fn time(&self) -> u64 {
        ((self.extra() & 0xFFFF) as u64) << 32 | self.time_tag() as u64
    }

    pub fn baseline(&self) -> u16 {
        (self.extra() >> 16) as u16
    }

    pub fn channel(&self) -> u16 {
        (self.group as u16 * CHANNELS_PER_GROUP) | (self.last() >> 28) as u16
    }

    pub fn charge(&self) -> u16 {
        (self.last() & 0xFFFF) as u16
    }

    /// Samples in order, two per packed word, low half first
    pub fn samples(&self) -> Samples<'a> {
        let n = self.format.sample_words();
        Samples { bytes: &self.bytes[4..4 + 4 * n], index: 0 }
    }
}

/// One 12-bit sample with the marker bits packed next to it
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub struct Sample {
    pub value: u16,
    pub gate: bool,
    pub trigger: bool,
    pub holdoff: bool,
    pub overthreshold: bool,
}

impl Sample {
    fn from_half(half: u16) -> Self {
        Sample {
            value: half & SAMPLE_MASK as u16,
            gate: half.check(GATE_BIT),
            trigger: half.check(TRIGGER_BIT),
            holdoff: half.check(HOLDOFF_BIT),
            overthreshold: half.check(OVERTHRESHOLD_BIT),
        }
    }

    pub fn to_half(&self) -> u16 {
        let mut h = self.value & SAMPLE_MASK as u16;
        h.change(GATE_BIT, self.gate);
        h.change(TRIGGER_BIT, self.trigger);
        h.change(HOLDOFF_BIT, self.holdoff);
        h.change(OVERTHRESHOLD_BIT, self.overthreshold);
        h
    }
}

pub struct Samples<'a> {
    bytes: &'a [u8],
    index: usize,
}

impl<'a> Iterator for Samples<'a> {
    type Item = Sample;

    fn next(&mut self) -> Option<Sample> {
        let word = read_word(self.bytes, self.index / 2)?;
        let half = if self.index % 2 == 0 { word as u16 } else { (word >> 16) as u16 };
        self.index += 1;
        Some(Sample::from_half(half))
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        let n = (self.bytes.len() / 2).saturating_sub(self.index);
        (n, Some(n))
    }
}

#[derive(Clone, Copy, Debug)]
struct GroupCursor {
    index: u8,
    format: GroupFormat,
    end: usize,
}

/// Lazy single-pass iterator over every event in a readout buffer, in
/// board order, then ascending group order, then arrival order.
///
/// The iterator is fused: after yielding an error it yields nothing more.
pub struct AggregateDecoder<'a> {
    buf: &'a [u8],
    /// Buffer length in words
    len: usize,
    /// Word cursor
    pos: usize,
    board_end: usize,
    groups: BitIter<u8>,
    group: Option<GroupCursor>,
    pending: Option<DecodeError>,
    failed: bool,
}

impl<'a> AggregateDecoder<'a> {
    pub fn new(buf: &'a [u8]) -> Self {
        let pending = match buf.len() % 4 {
            0 => None,
            _ => Some(DecodeError::Misaligned { len: buf.len() }),
        };
        AggregateDecoder {
            buf,
            len: buf.len() / 4,
            pos: 0,
            board_end: 0,
            groups: BitIter::from(0u8),
            group: None,
            pending,
            failed: false,
        }
    }

    /// Byte offset of the cursor
    pub fn offset(&self) -> usize {
        self.pos * 4
    }

    fn word(&self, i: usize) -> u32 {
        // Callers have checked i against an aggregate end within the buffer
        read_word(self.buf, i).unwrap_or(0)
    }

    fn open_board(&mut self) -> Result<(), DecodeError> {
        let offset = self.offset();
        let available = self.len - self.pos;
        if available < BOARD_HEADER_WORDS {
            return Err(DecodeError::BoardLength { offset, words: available, available });
        }
        let header = self.word(self.pos);
        if header >> 28 != BOARD_MAGIC {
            return Err(DecodeError::BoardMagic { offset, word: header });
        }
        let words = (header & 0x0FFF_FFFF) as usize;
        if words < BOARD_HEADER_WORDS || words > available {
            return Err(DecodeError::BoardLength { offset, words, available });
        }
        let mask = (self.word(self.pos + 1) & 0xFF) as u8;
        self.board_end = self.pos + words;
        self.groups = BitIter::from(mask);
        self.pos += BOARD_HEADER_WORDS;
        Ok(())
    }

    fn open_group(&mut self, index: u8) -> Result<(), DecodeError> {
        let offset = self.offset();
        let available = self.board_end - self.pos;
        if available < GROUP_HEADER_WORDS {
            return Err(DecodeError::GroupLength { offset, words: available, available });
        }
        let header = self.word(self.pos);
        if !header.check(31) {
            return Err(DecodeError::GroupHeader { offset, word: header });
        }
        let words = (header & 0x7FFF_FFFF) as usize;
        if words < GROUP_HEADER_WORDS || words > available {
            return Err(DecodeError::GroupLength { offset, words, available });
        }
        let format = GroupFormat::from_word(self.word(self.pos + 1), offset + 4)?;
        let stride = format.stride();
        let events = words - GROUP_HEADER_WORDS;
        if events % stride != 0 {
            return Err(DecodeError::Stride { offset, words: events, stride });
        }
        self.group = Some(GroupCursor { index, format, end: self.pos + words });
        self.pos += GROUP_HEADER_WORDS;
        Ok(())
    }

    fn advance(&mut self) -> Result<Option<RawEvent<'a>>, DecodeError> {
        loop {
            if let Some(g) = self.group {
                if self.pos < g.end {
                    let start = self.pos;
                    self.pos += g.format.stride();
                    let bytes = &self.buf[start * 4..self.pos * 4];
                    return Ok(Some(RawEvent { group: g.index, format: g.format, bytes }));
                }
                self.group = None;
            }
            if self.pos < self.board_end {
                match self.groups.next() {
                    Some(index) => self.open_group(index as u8)?,
                    None => {
                        return Err(DecodeError::Trailing {
                            offset: self.offset(),
                            end: self.board_end * 4,
                        })
                    }
                }
                continue;
            }
            if let Some(index) = self.groups.next() {
                return Err(DecodeError::MissingGroup { offset: self.offset(), group: index as u8 });
            }
            if self.pos == self.len {
                return Ok(None);
            }
            self.open_board()?;
        }
    }
}

impl<'a> Iterator for AggregateDecoder<'a> {
    type Item = Result<RawEvent<'a>, DecodeError>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.failed {
            return None;
        }
        if let Some(e) = self.pending.take() {
            self.failed = true;
            return Some(Err(e));
        }
        match self.advance() {
            Ok(Some(ev)) => Some(Ok(ev)),
            Ok(None) => {
                self.failed = true;
                None
            }
            Err(e) => {
                self.failed = true;
                Some(Err(e))
            }
        }
    }
}

impl<'a> std::iter::FusedIterator for AggregateDecoder<'a> {}

#[derive(Debug, Error)]
pub enum FillError {
    #[error(transparent)]
    Decode(#[from] DecodeError),
    #[error(transparent)]
    Buffer(#[from] BufferError),
}

/// Decode every event in `buf` as `E` and append it to `out`.
/// Returns the number of events appended.
pub fn fill<E: Element>(buf: &[u8], out: &mut AppendBuffer) -> Result<usize, FillError> {
    let mut n = 0;
    for raw in AggregateDecoder::new(buf) {
        out.push(&E::decode(&raw?))?;
        n += 1;
    }
    Ok(n)
}

#[inline]
pub(crate) fn read_word(bytes: &[u8], i: usize) -> Option<u32> {
    let b = bytes.get(i * 4..i * 4 + 4)?;
    Some(u32::from_le_bytes([b[0], b[1], b[2], b[3]]))
}
