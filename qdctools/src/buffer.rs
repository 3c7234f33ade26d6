//! Pre-allocated append-only storage for fixed-size records
//!
//! One contiguous region, allocated once and zeroed, split into an optional
//! header and a data region of `capacity` slots:
//!
//! ```text
//! | header | slot 0 | slot 1 | ... | slot len-1 | free ... |
//!          ^-- raw_bytes() ------------------------^
//! ```
//!
//! The buffer never grows. Running out of slots is an error the caller
//! has to deal with, and `clear()` only rewinds, so the same allocation is
//! reused for every acquisition cycle.

use std::slice::ChunksExact;
use thiserror::Error;

use crate::record::{Element, Event};

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum BufferError {
    #[error("out of storage space: all {capacity} slots are in use")]
    CapacityExceeded { capacity: usize },
    #[error("element of {found} bytes does not match the {expected} byte slot size")]
    ElementSize { expected: usize, found: usize },
    #[error("header of {found} bytes does not match the {expected} byte header")]
    HeaderSize { expected: usize, found: usize },
    #[error("cannot split {capacity_bytes} bytes into a {header_bytes} byte header and {element_size} byte slots")]
    Geometry { capacity_bytes: usize, element_size: usize, header_bytes: usize },
}

#[derive(Debug)]
pub struct AppendBuffer {
    data: Box<[u8]>,
    header: usize,
    element_size: usize,
    capacity: usize,
    len: usize,
}

impl AppendBuffer {
    /// Allocate `capacity_bytes` zeroed bytes; the first `header_bytes` are
    /// the header, the rest holds as many `element_size` slots as fit.
    pub fn new(capacity_bytes: usize, element_size: usize, header_bytes: usize) -> Result<Self, BufferError> {
        if element_size == 0 || header_bytes > capacity_bytes {
            return Err(BufferError::Geometry { capacity_bytes, element_size, header_bytes });
        }
        Ok(AppendBuffer {
            data: vec![0u8; capacity_bytes].into_boxed_slice(),
            header: header_bytes,
            element_size,
            capacity: (capacity_bytes - header_bytes) / element_size,
            len: 0,
        })
    }

    /// Buffer holding exactly `elements` slots and no header
    pub fn with_elements(elements: usize, element_size: usize) -> Result<Self, BufferError> {
        AppendBuffer::new(elements * element_size, element_size, 0)
    }

    /// A new empty buffer with the same geometry as `other`
    pub fn empty_like(other: &AppendBuffer) -> Self {
        AppendBuffer {
            data: vec![0u8; other.data.len()].into_boxed_slice(),
            header: other.header,
            element_size: other.element_size,
            capacity: other.capacity,
            len: 0,
        }
    }

    /// Replace header and contents with those of `other`
    pub fn copy_from(&mut self, other: &AppendBuffer) -> Result<(), BufferError> {
        if other.element_size != self.element_size {
            return Err(BufferError::ElementSize { expected: self.element_size, found: other.element_size });
        }
        if other.header != self.header {
            return Err(BufferError::HeaderSize { expected: self.header, found: other.header });
        }
        if other.len > self.capacity {
            return Err(BufferError::CapacityExceeded { capacity: self.capacity });
        }
        let n = other.data_size();
        self.data[..n].copy_from_slice(&other.data[..n]);
        self.len = other.len;
        Ok(())
    }

    fn next_slot(&mut self, size: usize) -> Result<&mut [u8], BufferError> {
        if size != self.element_size {
            return Err(BufferError::ElementSize { expected: self.element_size, found: size });
        }
        if self.len == self.capacity {
            return Err(BufferError::CapacityExceeded { capacity: self.capacity });
        }
        let start = self.header + self.len * self.element_size;
        self.len += 1;
        Ok(&mut self.data[start..start + size])
    }

    /// Encode `e` into the next free slot
    pub fn push<E: Element>(&mut self, e: &E) -> Result<(), BufferError> {
        let slot = self.next_slot(e.element_size())?;
        e.write_to(slot);
        Ok(())
    }

    pub fn push_event(&mut self, e: &Event) -> Result<(), BufferError> {
        let slot = self.next_slot(e.element_size())?;
        e.write_to(slot);
        Ok(())
    }

    /// Copy an already encoded record into the next free slot
    pub fn push_bytes(&mut self, bytes: &[u8]) -> Result<(), BufferError> {
        self.next_slot(bytes.len())?.copy_from_slice(bytes);
        Ok(())
    }

    /// Forget all records; keeps the allocation and the header
    pub fn clear(&mut self) {
        self.len = 0;
    }

    /// Number of records stored
    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Number of slots
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn element_size(&self) -> usize {
        self.element_size
    }

    pub fn header_size(&self) -> usize {
        self.header
    }

    /// Bytes in use, header included
    pub fn data_size(&self) -> usize {
        self.header + self.len * self.element_size
    }

    /// Size of the whole allocation
    pub fn data_capacity(&self) -> usize {
        self.data.len()
    }

    pub fn header(&self) -> &[u8] {
        &self.data[..self.header]
    }

    pub fn header_mut(&mut self) -> &mut [u8] {
        &mut self.data[..self.header]
    }

    /// The stored records, back to back, exactly as they are persisted
    pub fn raw_bytes(&self) -> &[u8] {
        &self.data[self.header..self.data_size()]
    }

    /// Encoded records in insertion order
    pub fn iter(&self) -> ChunksExact<'_, u8> {
        self.raw_bytes().chunks_exact(self.element_size)
    }

    /// Records in insertion order, decoded as `E`
    pub fn iter_as<'a, E: Element + 'a>(&'a self) -> impl Iterator<Item = E> + 'a {
        self.iter().filter_map(E::read_from)
    }
}

impl<'a> IntoIterator for &'a AppendBuffer {
    type Item = &'a [u8];
    type IntoIter = ChunksExact<'a, u8>;

    fn into_iter(self) -> Self::IntoIter {
        self.iter()
    }
}
