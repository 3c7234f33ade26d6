//! Deserialization of stored units of records

use crate::meta::{DigitizerAttributes, UnitAttributes};
use crate::record::{Event, RecordKind};
use anyhow::{bail, Context, Result};
use std::fs;
use std::io::Read;
use std::path::Path;

/// Split a unit's bytes into `element_size` records of `kind`
pub fn unit(bytes: &[u8], kind: RecordKind, element_size: usize) -> Result<Vec<Event>> {
    if element_size == 0 || bytes.len() % element_size != 0 {
        bail!("{} bytes is not a whole number of {} byte records", bytes.len(), element_size);
    }
    let mut events = Vec::with_capacity(bytes.len() / element_size);
    for (i, chunk) in bytes.chunks_exact(element_size).enumerate() {
        match Event::read_from(kind, chunk) {
            Some(e) if e.element_size() == element_size => events.push(e),
            _ => bail!("record {} is not a valid {:?} record of {} bytes", i, kind, element_size),
        }
    }
    Ok(events)
}

pub fn digitizer_attributes(rdr: impl Read) -> Result<DigitizerAttributes> {
    Ok(serde_json::from_reader(rdr)?)
}

pub fn unit_attributes(rdr: impl Read) -> Result<UnitAttributes> {
    Ok(serde_json::from_reader(rdr)?)
}

/// Read a `<timestamp>.bin` unit, taking the record layout from the
/// `digitizer.json` stored in the same directory
pub fn unit_file(path: impl AsRef<Path>) -> Result<Vec<Event>> {
    let path = path.as_ref();
    let dir = path.parent().context("unit file has no parent directory")?;
    let attrs_path = dir.join("digitizer.json");
    let attrs = fs::File::open(&attrs_path)
        .with_context(|| format!("cannot open {}", attrs_path.display()))?;
    let attrs = digitizer_attributes(attrs)?;
    let bytes = fs::read(path).with_context(|| format!("cannot read {}", path.display()))?;
    unit(&bytes, attrs.kind, attrs.element_size)
}
