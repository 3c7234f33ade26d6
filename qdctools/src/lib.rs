//! Tools for working with DPP-QDC digitizer event data: the fixed-layout
//! record types, the append-only buffer they are collected in, and the
//! decoder for the board aggregate readout format.

pub mod bit;
pub mod buffer;
pub mod de;
pub mod decode;
pub mod gen;
pub mod meta;
pub mod record;
pub mod ser;

pub use buffer::{AppendBuffer, BufferError};
pub use meta::{DigitizerAttributes, UnitAttributes};
pub use decode::{fill, AggregateDecoder, DecodeError, FillError, GroupFormat, RawEvent};
pub use record::{
    Element, Event, Interval, ListElement422, ListElement8222, RecordKind, WaveformElement,
};

/// Number of channels sharing one group aggregate
pub const CHANNELS_PER_GROUP: u16 = 8;

/// Maximum number of groups on one board
pub const MAX_GROUPS: usize = 8;

/// Marks an interval boundary or trigger position that was never observed
pub const UNSET: u16 = 0xFFFF;
