//! Synthetic board aggregates, for tests, benches and simulated boards

use crate::decode::{GroupFormat, Sample, BOARD_MAGIC, GROUP_HEADER_WORDS, BOARD_HEADER_WORDS};

/// Field values of one event before packing
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct SyntheticEvent {
    pub time: u32,
    /// High-order time bits, only packed when the group has extras
    pub extension: u16,
    pub baseline: u16,
    /// Channel within the group, 4 bits
    pub channel: u8,
    pub charge: u16,
    /// Only packed when the group has waveforms; padded or cut to fit
    pub samples: Vec<Sample>,
}

impl SyntheticEvent {
    pub fn new(time: u32, channel: u8, charge: u16) -> Self {
        SyntheticEvent { time, channel, charge, ..Default::default() }
    }

    /// Pack into exactly `format.stride()` words
    pub fn words(&self, format: &GroupFormat) -> Vec<u32> {
        let mut w = Vec::with_capacity(format.stride());
        w.push(self.time);
        w.extend(pack_samples(&self.samples, format.sample_words()));
        if format.extras {
            w.push((self.baseline as u32) << 16 | self.extension as u32);
        }
        w.push(((self.channel & 0xF) as u32) << 28 | self.charge as u32);
        w
    }
}

/// Pack samples two per word, low half first, into exactly `words` words
pub fn pack_samples(samples: &[Sample], words: usize) -> Vec<u32> {
    let mut halves = samples.iter().map(Sample::to_half);
    (0..words)
        .map(|_| {
            let lo = halves.next().unwrap_or(0) as u32;
            let hi = halves.next().unwrap_or(0) as u32;
            hi << 16 | lo
        })
        .collect()
}

#[derive(Clone, Debug)]
struct SyntheticGroup {
    index: u8,
    format: GroupFormat,
    events: Vec<SyntheticEvent>,
}

/// Builder for one board aggregate
///
/// Groups are laid out in ascending index order regardless of the order
/// they were added in, as the hardware does.
#[derive(Clone, Debug, Default)]
pub struct BoardAggregate {
    groups: Vec<SyntheticGroup>,
}

impl BoardAggregate {
    pub fn new() -> Self {
        BoardAggregate::default()
    }

    /// Add group `index` (0-7). Adding the same group twice replaces it.
    pub fn group(mut self, index: u8, format: GroupFormat, events: Vec<SyntheticEvent>) -> Self {
        self.groups.retain(|g| g.index != index);
        self.groups.push(SyntheticGroup { index: index & 0x7, format, events });
        self.groups.sort_by_key(|g| g.index);
        self
    }

    pub fn mask(&self) -> u8 {
        self.groups.iter().fold(0, |m, g| m | 1 << g.index)
    }

    pub fn event_count(&self) -> usize {
        self.groups.iter().map(|g| g.events.len()).sum()
    }

    pub fn words(&self) -> Vec<u32> {
        let mut body = Vec::new();
        for g in &self.groups {
            let size = GROUP_HEADER_WORDS + g.events.len() * g.format.stride();
            body.push(0x8000_0000 | size as u32);
            body.push(g.format.to_word());
            for e in &g.events {
                body.extend(e.words(&g.format));
            }
        }
        let size = BOARD_HEADER_WORDS + body.len();
        let mut w = Vec::with_capacity(size);
        w.push(BOARD_MAGIC << 28 | size as u32);
        w.push(self.mask() as u32);
        w.extend(body);
        w
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        words_to_bytes(&self.words())
    }
}

pub fn words_to_bytes(words: &[u32]) -> Vec<u8> {
    words.iter().flat_map(|w| w.to_le_bytes()).collect()
}
