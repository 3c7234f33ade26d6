//! Run files: declaring an acquisition and recording what happened
//!
//! ## Declaring a run
//!
//! A `.json` file lists the digitizers to read and how to configure them,
//! where to store the data, and optionally when to stop. Only `digitizers`
//! is required; everything else has a default.
//!
//! ```json
//! {
//!   "name": "beam test",
//!   "limit": { "Duration": "10min" },
//!   "output": "data",
//!   "digitizers": [
//!     {
//!       "link": { "Simulated": { "serial": 137, "read_delay": "100ms" } },
//!       "settings": [ { "function": "DPPGateWidth", "index": 0, "value": 40 } ]
//!     }
//!   ]
//! }
//! ```
//!
//! ## Recording a run
//!
//! After the run, the declaration is written back next to the run file with
//! the start timestamp, the duration in milliseconds and the statistics of
//! every digitizer filled in.

use chrono::{DateTime, offset::Local};
use digitizer::{FunctionId, RetryPolicy, Simulation};
use serde::{Serialize, Deserialize};
use std::collections::HashSet;
use std::path::PathBuf;
use std::time::Duration;

use crate::session::Stats;

#[derive(Serialize, Deserialize, Debug, PartialEq, Clone)]
pub struct Run {
    #[serde(default)]
    pub name:               String,
    pub timestamp:          Option<DateTime<Local>>,
    pub limit:              Option<RunLimit>,
    #[serde(default)]
    pub writer:             WriterKind,
    /// Directory the run directory is created in; defaults to the current one
    pub output:             Option<PathBuf>,
    /// Interval at which board readiness is polled before starting
    #[serde(default = "default_ready_poll", with = "humantime_serde")]
    pub ready_poll:         Duration,
    #[serde(default)]
    pub retry:              RetryPolicy,
    /// Milliseconds the acquisition ran for
    pub duration:           Option<u64>,
    pub digitizers:         Vec<DigitizerSettings>,
}

/// Either a fixed time duration or a number of acquisition cycles that
/// every digitizer has to complete.
/// Duration is parsed as in [humantime](https://docs.rs/humantime/), e.g.
/// `15days 2min 2s` or `2years 2min 12us`.
#[derive(Serialize, Deserialize, Debug, PartialEq, Clone, Copy)]
pub enum RunLimit {
    #[serde(with = "humantime_serde")]
    Duration(Duration),
    Cycles(u64),
}

#[derive(Serialize, Deserialize, Debug, PartialEq, Clone, Copy)]
pub enum WriterKind {
    /// One file per unit below the output directory
    Directory,
    /// Discard everything, for throughput tests
    Null,
}

impl Default for WriterKind {
    fn default() -> Self {
        WriterKind::Directory
    }
}

/// How to reach a board
#[derive(Serialize, Deserialize, Debug, PartialEq, Clone)]
pub enum Link {
    Simulated(Simulation),
}

impl Link {
    /// Serial number of the board behind this link
    pub fn serial(&self) -> u64 {
        match self {
            Link::Simulated(sim) => sim.serial,
        }
    }
}

/// One configuration value written before initialization
#[derive(Serialize, Deserialize, Debug, PartialEq, Clone, Copy)]
pub struct Setting {
    pub function:   FunctionId,
    pub index:      Option<u32>,
    pub value:      u32,
}

#[derive(Serialize, Deserialize, Debug, PartialEq, Clone)]
pub struct DigitizerSettings {
    pub link:           Link,
    #[serde(default = "emptyvec", skip_serializing_if = "Vec::is_empty")]
    pub settings:       Vec<Setting>,
    /// Record buffer size in events, instead of sizing it from the readout
    pub buffer_events:  Option<usize>,
    /// Filled in when recording
    pub stats:          Option<Stats>,
}

impl Run {
    /// First serial declared by more than one digitizer. Digitizers are
    /// stored under their serial, so each may appear only once.
    pub fn duplicate_serial(&self) -> Option<u64> {
        let mut seen = HashSet::new();
        self.digitizers
            .iter()
            .map(|d| d.link.serial())
            .find(|&serial| !seen.insert(serial))
    }
}

fn emptyvec<T>() -> Vec<T> {
    Vec::new()
}

fn default_ready_poll() -> Duration {
    Duration::from_millis(10)
}

/// Creates an empty Run with no digitizers
impl Default for Run {
    fn default() -> Self {
        Run {
            name:           String::new(),
            timestamp:      None,
            limit:          None,
            writer:         WriterKind::default(),
            output:         None,
            ready_poll:     default_ready_poll(),
            retry:          RetryPolicy::default(),
            duration:       None,
            digitizers:     Vec::new(),
        }
    }
}
