//! A writer that stores nothing, for measuring acquisition throughput

use qdctools::{AppendBuffer, Event, RecordKind};
use std::collections::BTreeSet;
use std::sync::atomic::{AtomicU64, Ordering};

use super::{DataWriter, WriterError};

/// Accepts every write and only counts it
#[derive(Debug, Default)]
pub struct NullWriter {
    units: AtomicU64,
    elements: AtomicU64,
    bytes: AtomicU64,
}

impl NullWriter {
    pub fn new() -> Self {
        NullWriter::default()
    }

    /// Units, records and bytes accepted so far
    pub fn totals(&self) -> (u64, u64, u64) {
        (
            self.units.load(Ordering::Relaxed),
            self.elements.load(Ordering::Relaxed),
            self.bytes.load(Ordering::Relaxed),
        )
    }

    fn count(&self, elements: usize, bytes: usize) {
        if elements > 0 {
            self.units.fetch_add(1, Ordering::Relaxed);
            self.elements.fetch_add(elements as u64, Ordering::Relaxed);
            self.bytes.fetch_add(bytes as u64, Ordering::Relaxed);
        }
    }
}

impl DataWriter for NullWriter {
    fn add_digitizer(&self, _id: u64) -> Result<(), WriterError> {
        Ok(())
    }

    fn write_buffer(&self, _kind: RecordKind, buffer: &AppendBuffer, _id: u64, _timestamp: u64) -> Result<(), WriterError> {
        self.count(buffer.len(), buffer.raw_bytes().len());
        Ok(())
    }

    fn write_set(&self, events: &BTreeSet<Event>, _id: u64, _timestamp: u64) -> Result<(), WriterError> {
        self.count(events.len(), events.iter().map(Event::element_size).sum());
        Ok(())
    }

    fn write_vec(&self, events: &[Event], _id: u64, _timestamp: u64) -> Result<(), WriterError> {
        self.count(events.len(), events.iter().map(Event::element_size).sum());
        Ok(())
    }
}
