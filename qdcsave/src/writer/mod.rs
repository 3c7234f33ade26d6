//! Persistence of decoded records
//!
//! Every acquisition thread holds the same [`DataWriter`]. A storage
//! [`Backend`] only ever sees one call at a time: [`Synchronized`] holds a
//! single lock for the whole of each write, across all digitizers, and keeps
//! the per-digitizer bookkeeping (created on first write, record kind stored
//! once). Closing takes the same lock, so it waits for a write in flight.

use parking_lot::Mutex;
use qdctools::{ser, AppendBuffer, DigitizerAttributes, Event, RecordKind};
use std::collections::{BTreeSet, HashMap};
use std::io;
use std::path::PathBuf;
use thiserror::Error;
use tracing::{debug, error};

pub mod files;
pub mod null;

pub use files::DirectoryBackend;
pub use null::NullWriter;

#[derive(Debug, Error)]
pub enum WriterError {
    #[error("cannot write {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error(transparent)]
    Json(#[from] serde_json::Error),
    #[error("unit {timestamp} of digitizer {id} already exists")]
    Exists { id: u64, timestamp: u64 },
    #[error("digitizer {id} stores {expected:?} records of {expected_size} bytes, not {found:?} records of {found_size} bytes")]
    Layout {
        id: u64,
        expected: RecordKind,
        expected_size: usize,
        found: RecordKind,
        found_size: usize,
    },
    #[error("records to be written together must share one layout")]
    Mixed,
    #[error("writer is closed")]
    Closed,
}

/// One batch of records from one digitizer, stored as a unit
#[derive(Clone, Copy, Debug)]
pub struct Unit<'a> {
    pub id: u64,
    pub timestamp: u64,
    pub kind: RecordKind,
    pub element_size: usize,
    pub elements: usize,
    /// The records, back to back in their binary layout
    pub bytes: &'a [u8],
}

/// Where acquisition threads hand over their records. Shared by all of
/// them, so every method takes `&self`.
pub trait DataWriter: Send + Sync {
    /// Announce a digitizer; storage for it may be created lazily
    fn add_digitizer(&self, id: u64) -> Result<(), WriterError>;

    fn write_buffer(&self, kind: RecordKind, buffer: &AppendBuffer, id: u64, timestamp: u64) -> Result<(), WriterError>;

    fn write_set(&self, events: &BTreeSet<Event>, id: u64, timestamp: u64) -> Result<(), WriterError>;

    fn write_vec(&self, events: &[Event], id: u64, timestamp: u64) -> Result<(), WriterError>;

    /// Release the storage, after any write in flight
    fn close(&self) -> Result<(), WriterError> {
        Ok(())
    }
}

/// A storage technology. Calls are never concurrent.
pub trait Backend: Send {
    fn create_digitizer(&mut self, id: u64, attributes: &DigitizerAttributes) -> Result<(), WriterError>;

    fn write_unit(&mut self, unit: &Unit<'_>) -> Result<(), WriterError>;

    fn close(&mut self) -> Result<(), WriterError>;
}

struct State<B> {
    backend: B,
    digitizers: HashMap<u64, DigitizerAttributes>,
    closed: bool,
}

/// A [`DataWriter`] serializing every call into one [`Backend`]
pub struct Synchronized<B: Backend> {
    state: Mutex<State<B>>,
}

impl<B: Backend> Synchronized<B> {
    pub fn new(backend: B) -> Self {
        Synchronized {
            state: Mutex::new(State { backend, digitizers: HashMap::new(), closed: false }),
        }
    }

    /// Digitizers that have storage so far
    pub fn digitizers(&self) -> Vec<u64> {
        let mut ids: Vec<u64> = self.state.lock().digitizers.keys().copied().collect();
        ids.sort_unstable();
        ids
    }

    /// Run `f` on the backend, under the writer lock
    pub fn with_backend<T>(&self, f: impl FnOnce(&mut B) -> T) -> T {
        f(&mut self.state.lock().backend)
    }

    fn write(&self, unit: Unit<'_>) -> Result<(), WriterError> {
        if unit.elements == 0 {
            return Ok(());
        }
        let mut state = self.state.lock();
        let state = &mut *state;
        if state.closed {
            return Err(WriterError::Closed);
        }
        match state.digitizers.get(&unit.id) {
            Some(attrs) => {
                if attrs.kind != unit.kind || attrs.element_size != unit.element_size {
                    return Err(WriterError::Layout {
                        id: unit.id,
                        expected: attrs.kind,
                        expected_size: attrs.element_size,
                        found: unit.kind,
                        found_size: unit.element_size,
                    });
                }
            }
            None => {
                let attrs = DigitizerAttributes::new(unit.kind, unit.element_size);
                state.backend.create_digitizer(unit.id, &attrs)?;
                debug!("created storage for digitizer {}", unit.id);
                state.digitizers.insert(unit.id, attrs);
            }
        }
        state.backend.write_unit(&unit)
    }

    fn write_events<'a>(
        &self,
        events: impl IntoIterator<Item = &'a Event> + Clone,
        id: u64,
        timestamp: u64,
    ) -> Result<(), WriterError> {
        let mut layout = None;
        let mut elements = 0;
        for e in events.clone() {
            let this = (e.kind(), e.element_size());
            match layout {
                None => layout = Some(this),
                Some(l) if l != this => return Err(WriterError::Mixed),
                Some(_) => {}
            }
            elements += 1;
        }
        let (kind, element_size) = match layout {
            Some(l) => l,
            None => return Ok(()),
        };
        let bytes = ser::records(events);
        self.write(Unit { id, timestamp, kind, element_size, elements, bytes: &bytes })
    }
}

impl<B: Backend> DataWriter for Synchronized<B> {
    fn add_digitizer(&self, id: u64) -> Result<(), WriterError> {
        debug!("digitizer {} announced", id);
        Ok(())
    }

    fn write_buffer(&self, kind: RecordKind, buffer: &AppendBuffer, id: u64, timestamp: u64) -> Result<(), WriterError> {
        self.write(Unit {
            id,
            timestamp,
            kind,
            element_size: buffer.element_size(),
            elements: buffer.len(),
            bytes: buffer.raw_bytes(),
        })
    }

    fn write_set(&self, events: &BTreeSet<Event>, id: u64, timestamp: u64) -> Result<(), WriterError> {
        self.write_events(events, id, timestamp)
    }

    fn write_vec(&self, events: &[Event], id: u64, timestamp: u64) -> Result<(), WriterError> {
        self.write_events(events, id, timestamp)
    }

    fn close(&self) -> Result<(), WriterError> {
        let mut state = self.state.lock();
        if state.closed {
            return Ok(());
        }
        state.closed = true;
        state.backend.close()
    }
}

impl<B: Backend> Drop for Synchronized<B> {
    fn drop(&mut self) {
        let mut state = self.state.lock();
        if !state.closed {
            state.closed = true;
            if let Err(e) = state.backend.close() {
                error!("closing writer: {}", e);
            }
        }
    }
}
