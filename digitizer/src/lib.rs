//! The hardware side of a DPP-QDC digitizer, as seen by the acquisition
//! application.
//!
//! The vendor library that actually talks to a board is an external
//! collaborator. This crate only describes what the application needs from
//! it, as the [`Board`] trait, together with the pieces of board state the
//! application interprets itself:
//!
//! ```text
//! Board (vendor link or SimulatedBoard)      Application
//! +---------------------------------+        +---------------------------+
//! | get / set by FunctionId         | <----- | RetryPolicy               |
//! | malloc_readout_buffer           |        |  (transient errors only)  |
//! | read_data -> ReadoutBuffer      | =====> | qdctools decoder          |
//! | start / stop / close            |        |                           |
//! +---------------------------------+        +---------------------------+
//! ```
//!
//! Errors carry a distinguishable transient communication kind, which is
//! the only kind [`RetryPolicy`] retries.

use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

pub mod function;
pub mod retry;
pub mod sim;
pub mod status;

pub use function::FunctionId;
pub use retry::RetryPolicy;
pub use sim::{SimulatedBoard, Simulation};
pub use status::{AcquisitionStatus, BoardConfiguration};

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum Error {
    /// Link hiccup; the only kind worth retrying
    #[error("communication error: {0}")]
    Communication(String),
    #[error("gave up after {retries} retries: {source}")]
    Exhausted {
        retries: u32,
        #[source]
        source: Box<Error>,
    },
    #[error("unknown function {0:?}")]
    UnknownFunction(String),
    #[error("{0} is read-only")]
    ReadOnly(FunctionId),
    #[error("{function} does not take index {index:?}")]
    Index { function: FunctionId, index: Option<u32> },
    #[error("{0} firmware is not supported")]
    UnsupportedFirmware(Firmware),
    #[error("readout buffer of {capacity} bytes cannot hold {needed} bytes")]
    ReadoutOverflow { capacity: usize, needed: usize },
    #[error("board error {code}: {message}")]
    Board { code: i32, message: String },
}

impl Error {
    pub fn is_transient(&self) -> bool {
        matches!(self, Error::Communication(_))
    }
}

/// DPP firmware family reported by a board
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash, Serialize, Deserialize)]
pub enum Firmware {
    Pha,
    Psd,
    Ci,
    Zle,
    Qdc,
    NotDpp,
    Unknown(i32),
}

impl Firmware {
    /// Only the QDC event format can be decoded
    pub fn is_supported(self) -> bool {
        self == Firmware::Qdc
    }
}

impl fmt::Display for Firmware {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Firmware::Pha => write!(f, "PHA"),
            Firmware::Psd => write!(f, "PSD"),
            Firmware::Ci => write!(f, "CI"),
            Firmware::Zle => write!(f, "ZLE"),
            Firmware::Qdc => write!(f, "QDC"),
            Firmware::NotDpp => write!(f, "non-DPP"),
            Firmware::Unknown(code) => write!(f, "unknown ({})", code),
        }
    }
}

/// Memory the board fills on every `read_data`
#[derive(Debug)]
pub struct ReadoutBuffer {
    data: Box<[u8]>,
    size: usize,
}

impl ReadoutBuffer {
    pub fn new(capacity: usize) -> Self {
        ReadoutBuffer { data: vec![0u8; capacity].into_boxed_slice(), size: 0 }
    }

    pub fn capacity(&self) -> usize {
        self.data.len()
    }

    /// Bytes written by the last read
    pub fn size(&self) -> usize {
        self.size
    }

    pub fn bytes(&self) -> &[u8] {
        &self.data[..self.size]
    }

    /// Copy a readout into the buffer, replacing what was there
    pub fn fill_from(&mut self, bytes: &[u8]) -> Result<(), Error> {
        if bytes.len() > self.data.len() {
            return Err(Error::ReadoutOverflow { capacity: self.data.len(), needed: bytes.len() });
        }
        self.data[..bytes.len()].copy_from_slice(bytes);
        self.size = bytes.len();
        Ok(())
    }

    pub fn clear(&mut self) {
        self.size = 0;
    }
}

/// One digitizer board behind some link.
///
/// Register-like values are exchanged as `u32`; `index` selects a group,
/// channel or register address for the functions that take one.
pub trait Board: Send {
    fn serial(&self) -> u64;

    fn firmware(&self) -> Firmware;

    fn get(&mut self, function: FunctionId, index: Option<u32>) -> Result<u32, Error>;

    fn set(&mut self, function: FunctionId, index: Option<u32>, value: u32) -> Result<(), Error>;

    fn malloc_readout_buffer(&mut self) -> Result<ReadoutBuffer, Error>;

    /// Fill `buffer` with whatever the board has acquired since the last
    /// read; zero bytes is a valid answer
    fn read_data(&mut self, buffer: &mut ReadoutBuffer) -> Result<(), Error>;

    fn free_readout_buffer(&mut self, buffer: ReadoutBuffer) -> Result<(), Error>;

    fn start_acquisition(&mut self) -> Result<(), Error>;

    fn stop_acquisition(&mut self) -> Result<(), Error>;

    fn close(&mut self) -> Result<(), Error>;

    fn board_configuration(&mut self) -> Result<BoardConfiguration, Error> {
        Ok(BoardConfiguration(self.get(FunctionId::BoardConfiguration, None)?))
    }

    fn acquisition_status(&mut self) -> Result<AcquisitionStatus, Error> {
        Ok(AcquisitionStatus(self.get(FunctionId::AcquisitionStatus, None)?))
    }

    fn group_enable_mask(&mut self) -> Result<u8, Error> {
        Ok((self.get(FunctionId::GroupEnableMask, None)? & 0xFF) as u8)
    }

    /// Name used in logs and file names, e.g. `V1740D_137`
    fn name(&self) -> String {
        format!("V1740D_{}", self.serial())
    }
}

impl<B: Board + ?Sized> Board for Box<B> {
    fn serial(&self) -> u64 {
        (**self).serial()
    }

    fn firmware(&self) -> Firmware {
        (**self).firmware()
    }

    fn get(&mut self, function: FunctionId, index: Option<u32>) -> Result<u32, Error> {
        (**self).get(function, index)
    }

    fn set(&mut self, function: FunctionId, index: Option<u32>, value: u32) -> Result<(), Error> {
        (**self).set(function, index, value)
    }

    fn malloc_readout_buffer(&mut self) -> Result<ReadoutBuffer, Error> {
        (**self).malloc_readout_buffer()
    }

    fn read_data(&mut self, buffer: &mut ReadoutBuffer) -> Result<(), Error> {
        (**self).read_data(buffer)
    }

    fn free_readout_buffer(&mut self, buffer: ReadoutBuffer) -> Result<(), Error> {
        (**self).free_readout_buffer(buffer)
    }

    fn start_acquisition(&mut self) -> Result<(), Error> {
        (**self).start_acquisition()
    }

    fn stop_acquisition(&mut self) -> Result<(), Error> {
        (**self).stop_acquisition()
    }

    fn close(&mut self) -> Result<(), Error> {
        (**self).close()
    }

    fn name(&self) -> String {
        (**self).name()
    }
}
