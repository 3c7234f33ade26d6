//! Names of the board configuration functions
//!
//! Every function is a named value on the board. Some are global, some
//! need a group, channel or register index, and some take both forms (the
//! global form addresses every group at once). A few are read-only.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::Error;

#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash)]
pub enum Access {
    ReadWrite,
    ReadOnly,
}

#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash)]
pub enum Indexing {
    Global,
    Indexed,
    Either,
}

macro_rules! function_ids {
    ($($name:ident => $access:ident, $indexing:ident;)*) => {
        /// Configuration function identifier, parsed from its name
        #[derive(Clone, Copy, Debug, Eq, PartialEq, Ord, PartialOrd, Hash, Serialize, Deserialize)]
        #[serde(try_from = "String", into = "String")]
        pub enum FunctionId {
            $($name,)*
        }

        impl FunctionId {
            pub const ALL: &'static [FunctionId] = &[$(FunctionId::$name,)*];

            pub fn name(self) -> &'static str {
                match self {
                    $(FunctionId::$name => stringify!($name),)*
                }
            }

            pub fn access(self) -> Access {
                match self {
                    $(FunctionId::$name => Access::$access,)*
                }
            }

            pub fn indexing(self) -> Indexing {
                match self {
                    $(FunctionId::$name => Indexing::$indexing,)*
                }
            }
        }

        impl FromStr for FunctionId {
            type Err = Error;

            fn from_str(s: &str) -> Result<Self, Error> {
                match s {
                    $(stringify!($name) => Ok(FunctionId::$name),)*
                    _ => Err(Error::UnknownFunction(s.to_string())),
                }
            }
        }
    };
}

function_ids! {
    MaxNumEventsBLT => ReadWrite, Global;
    ChannelEnableMask => ReadWrite, Global;
    GroupEnableMask => ReadWrite, Global;
    DecimationFactor => ReadWrite, Global;
    PostTriggerSize => ReadWrite, Global;
    AcquisitionMode => ReadWrite, Global;
    ExternalTriggerMode => ReadWrite, Global;
    SWTriggerMode => ReadWrite, Global;
    RunSynchronizationMode => ReadWrite, Global;
    DPPAcquisitionMode => ReadWrite, Global;
    DPPTriggerMode => ReadWrite, Global;
    MaxNumAggregatesBLT => ReadWrite, Global;
    BoardConfiguration => ReadWrite, Global;
    DPPAggregateOrganization => ReadWrite, Global;
    AcquisitionControl => ReadWrite, Global;
    AcquisitionStatus => ReadOnly, Global;
    GlobalTriggerMask => ReadWrite, Global;
    FrontPanelIOControl => ReadWrite, Global;
    ROCFPGAFirmwareRevision => ReadOnly, Global;
    EventSize => ReadOnly, Global;
    RunStartStopDelay => ReadWrite, Global;
    ReadoutControl => ReadWrite, Global;
    ReadoutStatus => ReadOnly, Global;
    Scratch => ReadWrite, Global;
    DPPAggregateNumberPerBLT => ReadWrite, Global;
    Register => ReadWrite, Indexed;
    AMCFirmwareRevision => ReadOnly, Indexed;
    GroupDCOffset => ReadWrite, Indexed;
    GroupSelfTrigger => ReadWrite, Indexed;
    GroupTriggerThreshold => ReadWrite, Indexed;
    ChannelTriggerThreshold => ReadWrite, Indexed;
    ChannelPulsePolarity => ReadWrite, Indexed;
    DPPPreTriggerSize => ReadWrite, Indexed;
    RecordLength => ReadWrite, Either;
    NumEventsPerAggregate => ReadWrite, Either;
    DPPGateWidth => ReadWrite, Indexed;
    DPPGateOffset => ReadWrite, Indexed;
    DPPFixedBaseline => ReadWrite, Indexed;
    DPPAlgorithmControl => ReadWrite, Indexed;
    DPPTriggerHoldOffWidth => ReadWrite, Either;
    DPPShapedTriggerWidth => ReadWrite, Either;
}

impl FunctionId {
    /// Check that a get (or set, when `write`) with `index` is meaningful
    pub fn check(self, index: Option<u32>, write: bool) -> Result<(), Error> {
        if write && self.access() == Access::ReadOnly {
            return Err(Error::ReadOnly(self));
        }
        match (self.indexing(), index) {
            (Indexing::Global, Some(_)) | (Indexing::Indexed, None) => {
                Err(Error::Index { function: self, index })
            }
            _ => Ok(()),
        }
    }
}

impl fmt::Display for FunctionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl TryFrom<String> for FunctionId {
    type Error = Error;

    fn try_from(s: String) -> Result<Self, Error> {
        s.parse()
    }
}

impl From<FunctionId> for String {
    fn from(f: FunctionId) -> Self {
        f.name().to_string()
    }
}
