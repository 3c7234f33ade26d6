//! Views onto the board registers the acquisition interprets itself

use qdctools::bit::BitOps;
use serde::{Deserialize, Serialize};

const WAVEFORM_BIT: usize = 16;
const EXTRAS_BIT: usize = 17;

const RUNNING_BIT: usize = 2;
const PLL_READY_BIT: usize = 7;
const BOARD_READY_BIT: usize = 8;

/// DPP-QDC board configuration register
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq, Serialize, Deserialize)]
pub struct BoardConfiguration(pub u32);

impl BoardConfiguration {
    /// Events carry samples
    pub fn waveform(&self) -> bool {
        self.0.check(WAVEFORM_BIT)
    }

    /// Events carry the extras word
    pub fn extras(&self) -> bool {
        self.0.check(EXTRAS_BIT)
    }

    pub fn with_waveform(mut self, on: bool) -> Self {
        self.0.change(WAVEFORM_BIT, on);
        self
    }

    pub fn with_extras(mut self, on: bool) -> Self {
        self.0.change(EXTRAS_BIT, on);
        self
    }
}

/// Acquisition status register
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq, Serialize, Deserialize)]
pub struct AcquisitionStatus(pub u32);

impl AcquisitionStatus {
    pub fn running(&self) -> bool {
        self.0.check(RUNNING_BIT)
    }

    pub fn pll_ready(&self) -> bool {
        self.0.check(PLL_READY_BIT)
    }

    pub fn board_ready(&self) -> bool {
        self.0.check(BOARD_READY_BIT)
    }

    /// Acquisition may only start when both the board and its PLL are ready
    pub fn ready(&self) -> bool {
        self.board_ready() && self.pll_ready()
    }

    pub fn with_ready(mut self, board: bool, pll: bool) -> Self {
        self.0.change(BOARD_READY_BIT, board);
        self.0.change(PLL_READY_BIT, pll);
        self
    }

    pub fn with_running(mut self, on: bool) -> Self {
        self.0.change(RUNNING_BIT, on);
        self
    }
}
