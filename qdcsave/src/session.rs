//! One digitizer's acquisition session
//!
//! ```text
//!           initialize          prepare           start_acquisition
//! Closed ---------------> Initialized ----> Ready -----------------> Acquiring
//!   ^                                         ^                          |
//!   |                                         +---- stop_acquisition ----+
//!   +---------------------------- close (from any state) ---------------+
//! ```
//!
//! The record kind is decided once, at `initialize`, from the firmware
//! capability flags; every cycle after that runs the decode path for that
//! kind only.

use digitizer::{Board, Error as BoardError, FunctionId, ReadoutBuffer, RetryPolicy};
use qdctools::bit::mask_to_groups;
use qdctools::decode::{BOARD_HEADER_WORDS, GROUP_HEADER_WORDS};
use qdctools::{
    fill, AppendBuffer, BufferError, FillError, GroupFormat, ListElement422, ListElement8222,
    RecordKind, WaveformElement,
};
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, error, info, warn};

use crate::cfg::Setting;
use crate::writer::{DataWriter, WriterError};

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum State {
    Closed,
    Initialized,
    Ready,
    Acquiring,
}

#[derive(Debug, Error)]
pub enum SessionError {
    #[error("cannot {operation} while {state:?}")]
    State { operation: &'static str, state: State },
    #[error(transparent)]
    Board(#[from] BoardError),
    #[error(transparent)]
    Buffer(#[from] BufferError),
    #[error(transparent)]
    Writer(#[from] WriterError),
    #[error("no groups enabled")]
    NoGroups,
    #[error("record length {samples} exceeds the {max} samples an event can carry")]
    RecordLength { samples: u32, max: usize },
}

/// Running totals of one session
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq, Serialize, Deserialize)]
pub struct Stats {
    pub bytes_read: u64,
    pub events_found: u64,
    pub cycles: u64,
    pub idle_cycles: u64,
    pub lost_cycles: u64,
    pub failed_writes: u64,
}

/// What became of one acquisition cycle
#[derive(Debug)]
pub enum Cycle {
    /// The board had nothing
    Idle,
    Written { bytes: usize, events: usize },
    /// The readout could not be decoded into the record buffer; its data is dropped
    Lost(FillError),
    /// Decoded but not stored; its data is dropped
    WriteFailed(WriterError),
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct SessionOptions {
    pub retry: RetryPolicy,
    pub ready_poll: Duration,
    /// Record buffer size in events; sized from the readout buffer if unset
    pub buffer_events: Option<usize>,
}

impl Default for SessionOptions {
    fn default() -> Self {
        SessionOptions {
            retry: RetryPolicy::default(),
            ready_poll: Duration::from_millis(10),
            buffer_events: None,
        }
    }
}

/// Event geometry decided at initialization
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Layout {
    pub kind: RecordKind,
    pub groups: Vec<u8>,
    pub format: GroupFormat,
    pub element_size: usize,
    /// Acquisition window per enabled group, in samples
    pub windows: Vec<u32>,
}

impl Layout {
    /// Readout bytes of one board aggregate holding an event spanning the
    /// full acquisition window in every enabled group, two samples a word
    pub fn window_bytes(&self) -> usize {
        let fixed = self.format.stride() - self.format.sample_words();
        let words: usize = self
            .windows
            .iter()
            .map(|&w| GROUP_HEADER_WORDS + fixed + (w as usize + 1) / 2)
            .sum();
        4 * (BOARD_HEADER_WORDS + words)
    }
}

pub struct Session<B: Board> {
    board: B,
    id: u64,
    name: String,
    state: State,
    options: SessionOptions,
    layout: Option<Layout>,
    readout: Option<ReadoutBuffer>,
    buffer: Option<AppendBuffer>,
    stats: Stats,
}

impl<B: Board> Session<B> {
    pub fn new(board: B, options: SessionOptions) -> Self {
        Session {
            id: board.serial(),
            name: board.name(),
            board,
            state: State::Closed,
            options,
            layout: None,
            readout: None,
            buffer: None,
            stats: Stats::default(),
        }
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn state(&self) -> State {
        self.state
    }

    pub fn stats(&self) -> Stats {
        self.stats
    }

    pub fn layout(&self) -> Option<&Layout> {
        self.layout.as_ref()
    }

    pub fn board(&self) -> &B {
        &self.board
    }

    fn require(&self, operation: &'static str, state: State) -> Result<(), SessionError> {
        match self.state == state {
            true => Ok(()),
            false => Err(SessionError::State { operation, state: self.state }),
        }
    }

    fn get(&mut self, function: FunctionId, index: Option<u32>) -> Result<u32, BoardError> {
        let board = &mut self.board;
        self.options.retry.back_off_repeat(|| board.get(function, index))
    }

    /// Write configuration values to the board; only before initialization
    pub fn configure(&mut self, settings: &[Setting]) -> Result<(), SessionError> {
        self.require("configure", State::Closed)?;
        for s in settings {
            debug!("{}[{:?}] = {}", s.function, s.index, s.value);
            let board = &mut self.board;
            self.options.retry.back_off_repeat(|| board.set(s.function, s.index, s.value))?;
        }
        Ok(())
    }

    /// Decide the record kind and geometry from the board configuration and
    /// announce the digitizer to the writer.
    /// Anything but QDC firmware is refused here, before any acquisition.
    pub fn initialize(&mut self, writer: &dyn DataWriter) -> Result<(), SessionError> {
        self.require("initialize", State::Closed)?;
        let firmware = self.board.firmware();
        if !firmware.is_supported() {
            return Err(BoardError::UnsupportedFirmware(firmware).into());
        }
        let board = &mut self.board;
        let config = self.options.retry.back_off_repeat(|| board.board_configuration())?;
        let mask = self.options.retry.back_off_repeat(|| board.group_enable_mask())?;
        let groups = mask_to_groups(mask);
        if groups.is_empty() {
            return Err(SessionError::NoGroups);
        }

        let record_length = match config.waveform() {
            true => self.get(FunctionId::RecordLength, Some(0))?,
            false => 0,
        };
        if record_length as usize > GroupFormat::MAX_SAMPLES {
            return Err(SessionError::RecordLength { samples: record_length, max: GroupFormat::MAX_SAMPLES });
        }
        let format = GroupFormat::with_samples(config.extras(), record_length as usize);
        let kind = RecordKind::from_flags(config.extras(), config.waveform());
        let element_size = kind.element_size(format.samples());

        let mut windows = Vec::with_capacity(groups.len());
        for &g in &groups {
            let g = Some(g as u32);
            let pre_trigger = self.get(FunctionId::DPPPreTriggerSize, g)?;
            let holdoff = self.get(FunctionId::DPPTriggerHoldOffWidth, g)?;
            let gate_width = self.get(FunctionId::DPPGateWidth, g)?;
            let gate_offset = self.get(FunctionId::DPPGateOffset, g)?;
            let window = record_length
                .max(pre_trigger.saturating_add(holdoff))
                .max(gate_width.saturating_sub(gate_offset).saturating_add(pre_trigger));
            windows.push(window.saturating_mul(2));
        }

        info!(
            "{} firmware, {:?} records of {} bytes, groups {:?}",
            firmware, kind, element_size, groups
        );
        debug!("acquisition windows {:?}", windows);
        writer.add_digitizer(self.id)?;
        self.layout = Some(Layout { kind, groups, format, element_size, windows });
        self.state = State::Initialized;
        Ok(())
    }

    /// Allocate the readout buffer and the record buffer it decodes into.
    /// The readout has to hold one full acquisition window of every group.
    pub fn prepare(&mut self) -> Result<(), SessionError> {
        self.require("prepare", State::Initialized)?;
        let layout = match &self.layout {
            Some(l) => l,
            None => return Err(SessionError::State { operation: "prepare", state: self.state }),
        };
        let readout = self.board.malloc_readout_buffer()?;
        let needed = layout.window_bytes();
        if readout.capacity() < needed {
            let capacity = readout.capacity();
            self.board.free_readout_buffer(readout)?;
            return Err(BoardError::ReadoutOverflow { capacity, needed }.into());
        }
        // Every event takes at least one stride of the readout
        let events = match self.options.buffer_events {
            Some(n) => n,
            None => (readout.capacity() / (4 * layout.format.stride())).max(layout.groups.len()),
        };
        let buffer = AppendBuffer::with_elements(events, layout.element_size)?;
        debug!(
            "readout buffer {} bytes, record buffer {} events",
            readout.capacity(),
            buffer.capacity()
        );
        self.readout = Some(readout);
        self.buffer = Some(buffer);
        self.state = State::Ready;
        Ok(())
    }

    /// Wait for the board to report ready, then start it. Gives up, with
    /// `Ok(false)`, when `keep_running` is cleared while waiting.
    pub fn start_acquisition(&mut self, keep_running: &AtomicBool) -> Result<bool, SessionError> {
        self.require("start acquisition", State::Ready)?;
        loop {
            let board = &mut self.board;
            let status = self.options.retry.back_off_repeat(|| board.acquisition_status())?;
            if status.ready() {
                break;
            }
            if !keep_running.load(Ordering::SeqCst) {
                info!("stopped while waiting for the board");
                return Ok(false);
            }
            thread::sleep(self.options.ready_poll);
        }
        self.board.start_acquisition()?;
        self.state = State::Acquiring;
        info!("acquisition started");
        Ok(true)
    }

    /// One read, decode and write cycle, stamped with `timestamp`.
    ///
    /// Only board errors that survive the retry policy are returned as
    /// errors; losing a cycle to bad data or a failed write is an outcome.
    pub fn acquisition(&mut self, writer: &dyn DataWriter, timestamp: u64) -> Result<Cycle, SessionError> {
        self.require("acquire", State::Acquiring)?;
        let Session { board, id, options, layout, readout, buffer, stats, .. } = self;
        let (layout, readout, buffer) = match (layout.as_ref(), readout.as_mut(), buffer.as_mut()) {
            (Some(l), Some(r), Some(b)) => (l, r, b),
            _ => return Err(SessionError::State { operation: "acquire", state: State::Acquiring }),
        };

        options.retry.back_off_repeat(|| board.read_data(readout))?;
        stats.cycles += 1;
        let bytes = readout.bytes();
        if bytes.is_empty() {
            stats.idle_cycles += 1;
            debug!("no data");
            return Ok(Cycle::Idle);
        }
        stats.bytes_read += bytes.len() as u64;

        buffer.clear();
        let filled = match layout.kind {
            RecordKind::Compact => fill::<ListElement422>(bytes, buffer),
            RecordKind::Extended => fill::<ListElement8222>(bytes, buffer),
            RecordKind::Waveform => fill::<WaveformElement>(bytes, buffer),
        };
        let events = match filled {
            Ok(n) => n,
            Err(e) => {
                stats.lost_cycles += 1;
                warn!("cycle {} lost, {} bytes dropped: {}", timestamp, bytes.len(), e);
                buffer.clear();
                return Ok(Cycle::Lost(e));
            }
        };
        stats.events_found += events as u64;
        debug!("{} bytes, {} events", bytes.len(), events);

        match writer.write_buffer(layout.kind, buffer, *id, timestamp) {
            Ok(()) => Ok(Cycle::Written { bytes: bytes.len(), events }),
            Err(e) => {
                stats.failed_writes += 1;
                error!(
                    "writing {} bytes of digitizer {} at {} failed: {}",
                    buffer.raw_bytes().len(),
                    id,
                    timestamp,
                    e
                );
                Ok(Cycle::WriteFailed(e))
            }
        }
    }

    pub fn stop_acquisition(&mut self) -> Result<(), SessionError> {
        self.require("stop acquisition", State::Acquiring)?;
        let board = &mut self.board;
        self.options.retry.back_off_repeat(|| board.stop_acquisition())?;
        self.state = State::Ready;
        info!("acquisition stopped");
        Ok(())
    }

    /// Stop if needed and release the board. Closing a closed session does
    /// nothing.
    pub fn close(&mut self) -> Result<(), SessionError> {
        if self.state == State::Closed {
            return Ok(());
        }
        if self.state == State::Acquiring {
            self.stop_acquisition()?;
        }
        if let Some(readout) = self.readout.take() {
            self.board.free_readout_buffer(readout)?;
        }
        self.buffer = None;
        self.board.close()?;
        self.state = State::Closed;
        info!("closed");
        Ok(())
    }
}
