//! A board that makes up its own data
//!
//! Produces well-formed QDC board aggregates from random events, so the
//! whole acquisition chain can run without hardware. It can also misbehave
//! on request: report a foreign firmware, fail transiently, take a while to
//! become ready, return empty readouts or corrupt aggregates.

use qdctools::decode::Sample;
use qdctools::gen::{BoardAggregate, SyntheticEvent};
use qdctools::GroupFormat;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;
use tracing::debug;

use crate::{AcquisitionStatus, Board, BoardConfiguration, Error, Firmware, FunctionId, ReadoutBuffer};

/// What a simulated board looks like and how it behaves
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Simulation {
    pub serial: u64,
    pub firmware: Firmware,
    pub extras: bool,
    pub waveform: bool,
    /// Samples per event when `waveform` is set
    pub record_length: u32,
    pub group_mask: u8,
    pub events_per_group: u32,
    pub readout_bytes: usize,
    /// Fail this many calls with a communication error before behaving
    pub transient_failures: u32,
    /// Status reads answering "not ready" before the board is ready
    pub polls_until_ready: u32,
    /// Every n-th read returns no data; 0 never
    pub idle_every: u32,
    /// Every n-th read returns an aggregate with a broken stride; 0 never
    pub corrupt_every: u32,
    /// Time a read blocks, as a board waiting for data would
    #[serde(with = "humantime_serde")]
    pub read_delay: Duration,
    pub seed: Option<u64>,
}

impl Default for Simulation {
    fn default() -> Self {
        Simulation {
            serial: 137,
            firmware: Firmware::Qdc,
            extras: true,
            waveform: false,
            record_length: 0,
            group_mask: 0b11,
            events_per_group: 16,
            readout_bytes: 1 << 20,
            transient_failures: 0,
            polls_until_ready: 0,
            idle_every: 0,
            corrupt_every: 0,
            read_delay: Duration::ZERO,
            seed: None,
        }
    }
}

/// Counters shared with whoever created the board
#[derive(Debug, Default)]
pub struct Monitor {
    pub reads: AtomicU32,
    pub status_polls: AtomicU32,
    pub transient_failures: AtomicU32,
    pub started: AtomicBool,
    pub stopped: AtomicBool,
    pub closed: AtomicBool,
    pub freed: AtomicBool,
}

pub struct SimulatedBoard {
    sim: Simulation,
    registers: HashMap<(FunctionId, Option<u32>), u32>,
    rng: StdRng,
    failures_left: u32,
    time: u32,
    acquiring: bool,
    monitor: Arc<Monitor>,
}

impl SimulatedBoard {
    pub fn new(sim: Simulation) -> Self {
        let rng = match sim.seed {
            Some(s) => StdRng::seed_from_u64(s),
            None => StdRng::from_entropy(),
        };
        let mut registers = HashMap::new();
        let config = BoardConfiguration::default()
            .with_extras(sim.extras)
            .with_waveform(sim.waveform);
        registers.insert((FunctionId::BoardConfiguration, None), config.0);
        registers.insert((FunctionId::GroupEnableMask, None), sim.group_mask as u32);
        registers.insert((FunctionId::RecordLength, None), sim.record_length);
        SimulatedBoard {
            failures_left: sim.transient_failures,
            sim,
            registers,
            rng,
            time: 0,
            acquiring: false,
            monitor: Arc::new(Monitor::default()),
        }
    }

    pub fn monitor(&self) -> Arc<Monitor> {
        self.monitor.clone()
    }

    fn link(&mut self) -> Result<(), Error> {
        if self.failures_left > 0 {
            self.failures_left -= 1;
            self.monitor.transient_failures.fetch_add(1, Ordering::SeqCst);
            return Err(Error::Communication(String::from("simulated link timeout")));
        }
        Ok(())
    }

    fn format(&self) -> GroupFormat {
        let config = BoardConfiguration(self.register(FunctionId::BoardConfiguration, None));
        let samples = match config.waveform() {
            true => self.register(FunctionId::RecordLength, None) as usize,
            false => 0,
        };
        GroupFormat::with_samples(config.extras(), samples)
    }

    fn register(&self, function: FunctionId, index: Option<u32>) -> u32 {
        // An indexed value falls back to its global form
        self.registers
            .get(&(function, index))
            .or_else(|| self.registers.get(&(function, None)))
            .copied()
            .unwrap_or(0)
    }

    fn event(&mut self, format: &GroupFormat) -> SyntheticEvent {
        self.time = self.time.wrapping_add(self.rng.gen_range(1..1000));
        let samples = (0..format.samples())
            .map(|k| Sample {
                value: self.rng.gen_range(0..4096),
                gate: (4..12).contains(&k),
                trigger: k == 4,
                holdoff: (4..8).contains(&k),
                overthreshold: false,
            })
            .collect();
        SyntheticEvent {
            time: self.time,
            extension: 0,
            baseline: self.rng.gen_range(0..4096),
            channel: self.rng.gen_range(0..8),
            charge: self.rng.gen(),
            samples,
        }
    }

    fn aggregate(&mut self) -> Vec<u8> {
        let format = self.format();
        let mask = self.register(FunctionId::GroupEnableMask, None) as u8;
        let mut agg = BoardAggregate::new();
        for g in qdctools::bit::mask_to_groups(mask) {
            let events = (0..self.sim.events_per_group).map(|_| self.event(&format)).collect();
            agg = agg.group(g, format, events);
        }
        agg.to_bytes()
    }
}

impl Board for SimulatedBoard {
    fn serial(&self) -> u64 {
        self.sim.serial
    }

    fn firmware(&self) -> Firmware {
        self.sim.firmware
    }

    fn get(&mut self, function: FunctionId, index: Option<u32>) -> Result<u32, Error> {
        function.check(index, false)?;
        self.link()?;
        if function == FunctionId::AcquisitionStatus {
            let polls = self.monitor.status_polls.fetch_add(1, Ordering::SeqCst) + 1;
            let ready = polls > self.sim.polls_until_ready;
            let status = AcquisitionStatus::default()
                .with_ready(ready, ready)
                .with_running(self.acquiring);
            return Ok(status.0);
        }
        Ok(self.register(function, index))
    }

    fn set(&mut self, function: FunctionId, index: Option<u32>, value: u32) -> Result<(), Error> {
        function.check(index, true)?;
        self.link()?;
        self.registers.insert((function, index), value);
        Ok(())
    }

    fn malloc_readout_buffer(&mut self) -> Result<ReadoutBuffer, Error> {
        Ok(ReadoutBuffer::new(self.sim.readout_bytes))
    }

    fn read_data(&mut self, buffer: &mut ReadoutBuffer) -> Result<(), Error> {
        self.link()?;
        if !self.sim.read_delay.is_zero() {
            thread::sleep(self.sim.read_delay);
        }
        let n = self.monitor.reads.fetch_add(1, Ordering::SeqCst) + 1;
        buffer.clear();
        if !self.acquiring {
            return Ok(());
        }
        if self.sim.idle_every > 0 && n % self.sim.idle_every == 0 {
            debug!("read {}: no data", n);
            return Ok(());
        }
        let mut bytes = self.aggregate();
        if self.sim.corrupt_every > 0 && n % self.sim.corrupt_every == 0 {
            debug!("read {}: corrupt aggregate", n);
            // Grow the first group by one word the events do not fill
            let grow = |b: &mut [u8], at: usize| {
                let w = u32::from_le_bytes([b[at], b[at + 1], b[at + 2], b[at + 3]]) + 1;
                b[at..at + 4].copy_from_slice(&w.to_le_bytes());
            };
            if bytes.len() > 8 {
                grow(&mut bytes, 0);
                grow(&mut bytes, 8);
                bytes.extend([0u8; 4]);
            } else {
                bytes.truncate(4);
            }
        }
        buffer.fill_from(&bytes)
    }

    fn free_readout_buffer(&mut self, buffer: ReadoutBuffer) -> Result<(), Error> {
        drop(buffer);
        self.monitor.freed.store(true, Ordering::SeqCst);
        Ok(())
    }

    fn start_acquisition(&mut self) -> Result<(), Error> {
        self.acquiring = true;
        self.monitor.started.store(true, Ordering::SeqCst);
        Ok(())
    }

    fn stop_acquisition(&mut self) -> Result<(), Error> {
        self.acquiring = false;
        self.monitor.stopped.store(true, Ordering::SeqCst);
        Ok(())
    }

    fn close(&mut self) -> Result<(), Error> {
        self.monitor.closed.store(true, Ordering::SeqCst);
        Ok(())
    }
}
