//! Acquisition threads, one per digitizer
//!
//! Every thread owns its session and shares the writer, the run clock and
//! the stop flag. Progress goes back to the main thread over a channel.

use digitizer::Board;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Instant;
use tracing::{error, span, Level};

use crate::session::{Session, SessionError, Stats};
use crate::writer::DataWriter;

/// Milliseconds since the start of the run, common to all digitizers
#[derive(Clone, Copy, Debug)]
pub struct GlobalClock {
    start: Instant,
}

impl GlobalClock {
    pub fn new() -> Self {
        GlobalClock { start: Instant::now() }
    }

    pub fn now(&self) -> u64 {
        self.start.elapsed().as_millis() as u64
    }

    /// The current time, or one past `last` if the clock has not moved on
    /// since, so the stamps of one digitizer never repeat
    pub fn stamp(&self, last: Option<u64>) -> u64 {
        let now = self.now();
        match last {
            Some(l) if now <= l => l + 1,
            _ => now,
        }
    }
}

impl Default for GlobalClock {
    fn default() -> Self {
        GlobalClock::new()
    }
}

#[derive(Clone, Debug, PartialEq)]
pub enum Report {
    Cycle { id: u64, timestamp: u64, stats: Stats },
    /// The session is closed; `error` is set if the acquisition failed
    Finished { id: u64, stats: Stats, error: Option<String> },
}

pub struct AcquisitionHandle {
    pub id: u64,
    pub join_handle: JoinHandle<Result<Stats, SessionError>>,
}

fn acquire<B: Board>(
    session: &mut Session<B>,
    writer: &dyn DataWriter,
    clock: GlobalClock,
    keep_running: &AtomicBool,
    reports: &flume::Sender<Report>,
) -> Result<(), SessionError> {
    if !session.start_acquisition(keep_running)? {
        return Ok(());
    }
    let mut last = None;
    while keep_running.load(Ordering::SeqCst) {
        let timestamp = clock.stamp(last);
        last = Some(timestamp);
        session.acquisition(writer, timestamp)?;
        let _ = reports.send(Report::Cycle { id: session.id(), timestamp, stats: session.stats() });
    }
    Ok(())
}

/// Acquire until `keep_running` is cleared or the board fails for good.
/// The session is closed on the way out either way.
pub fn run<B: Board>(
    session: &mut Session<B>,
    writer: &dyn DataWriter,
    clock: GlobalClock,
    keep_running: &AtomicBool,
    reports: &flume::Sender<Report>,
) -> Result<Stats, SessionError> {
    let acquired = acquire(session, writer, clock, keep_running, reports);
    if let Err(e) = &acquired {
        error!("acquisition failed: {}", e);
    }
    let closed = session.close();
    if let Err(e) = &closed {
        error!("closing failed: {}", e);
    }
    let stats = session.stats();
    let failure = acquired.as_ref().err().or(closed.as_ref().err()).map(|e| e.to_string());
    let _ = reports.send(Report::Finished { id: session.id(), stats, error: failure });
    acquired?;
    closed?;
    Ok(stats)
}

/// Run a prepared session on its own thread
pub fn spawn<B: Board + 'static>(
    mut session: Session<B>,
    writer: Arc<dyn DataWriter>,
    clock: GlobalClock,
    keep_running: Arc<AtomicBool>,
    reports: flume::Sender<Report>,
) -> AcquisitionHandle {
    let id = session.id();
    let join_handle = thread::spawn(move || {
        let span = span!(Level::INFO, "digitizer", name = %session.name());
        let _enter = span.enter();
        run(&mut session, writer.as_ref(), clock, &keep_running, &reports)
    });
    AcquisitionHandle { id, join_handle }
}
