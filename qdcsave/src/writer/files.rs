//! Units stored as plain files in a directory tree
//!
//! ```text
//! <out>/qdcsave-run-<run id>/
//!     index.json                      written on close
//!     <id >> 32>_<id & 0xffffffff>/
//!         digitizer.json              record kind and layout, once
//!         <global timestamp>.bin      records, verbatim
//!         <global timestamp>.json     unit attributes
//! ```

use qdctools::{DigitizerAttributes, UnitAttributes};
use serde::Serialize;
use std::collections::BTreeMap;
use std::fs::{self, File, OpenOptions};
use std::io::{self, BufWriter, Write};
use std::path::{Path, PathBuf};
use tracing::{debug, info};

use super::{Backend, Unit, WriterError};

pub struct DirectoryBackend {
    root: PathBuf,
    units: BTreeMap<String, u64>,
}

#[derive(Serialize)]
struct Index<'a> {
    /// Units written per digitizer directory
    units: &'a BTreeMap<String, u64>,
}

impl DirectoryBackend {
    /// Create the run directory below `out`
    pub fn create(out: impl AsRef<Path>, run_id: &str) -> Result<Self, WriterError> {
        let root = out.as_ref().join(format!("qdcsave-run-{}", run_id));
        fs::create_dir_all(&root).map_err(|source| WriterError::Io { path: root.clone(), source })?;
        info!("writing to {}", root.display());
        Ok(DirectoryBackend { root, units: BTreeMap::new() })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// The 64-bit identity split in two 32-bit halves
    pub fn digitizer_name(id: u64) -> String {
        format!("{}_{}", id >> 32, id & 0xFFFF_FFFF)
    }

    pub fn digitizer_dir(&self, id: u64) -> PathBuf {
        self.root.join(DirectoryBackend::digitizer_name(id))
    }
}

fn create_new(path: &Path) -> Result<BufWriter<File>, io::Error> {
    let f = OpenOptions::new().write(true).create_new(true).open(path)?;
    Ok(BufWriter::new(f))
}

fn write_json<T: Serialize>(path: &Path, value: &T) -> Result<(), WriterError> {
    let io_err = |source| WriterError::Io { path: path.to_path_buf(), source };
    let mut wtr = create_new(path).map_err(io_err)?;
    serde_json::to_writer_pretty(&mut wtr, value)?;
    wtr.flush().map_err(io_err)
}

impl Backend for DirectoryBackend {
    fn create_digitizer(&mut self, id: u64, attributes: &DigitizerAttributes) -> Result<(), WriterError> {
        let dir = self.digitizer_dir(id);
        fs::create_dir_all(&dir).map_err(|source| WriterError::Io { path: dir.clone(), source })?;
        write_json(&dir.join("digitizer.json"), attributes)?;
        self.units.insert(DirectoryBackend::digitizer_name(id), 0);
        Ok(())
    }

    fn write_unit(&mut self, unit: &Unit<'_>) -> Result<(), WriterError> {
        let dir = self.digitizer_dir(unit.id);
        let bin = dir.join(format!("{}.bin", unit.timestamp));
        let mut wtr = create_new(&bin).map_err(|source| match source.kind() {
            io::ErrorKind::AlreadyExists => WriterError::Exists { id: unit.id, timestamp: unit.timestamp },
            _ => WriterError::Io { path: bin.clone(), source },
        })?;
        wtr.write_all(unit.bytes)
            .and_then(|_| wtr.flush())
            .map_err(|source| WriterError::Io { path: bin.clone(), source })?;

        let attributes = UnitAttributes {
            global_timestamp: unit.timestamp,
            elements: unit.elements,
            element_size: unit.element_size,
        };
        write_json(&dir.join(format!("{}.json", unit.timestamp)), &attributes)?;
        *self.units.entry(DirectoryBackend::digitizer_name(unit.id)).or_insert(0) += 1;
        debug!("{} records in {}", unit.elements, bin.display());
        Ok(())
    }

    fn close(&mut self) -> Result<(), WriterError> {
        write_json(&self.root.join("index.json"), &Index { units: &self.units })?;
        info!("closed {}", self.root.display());
        Ok(())
    }
}
