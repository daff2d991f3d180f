//! Binary snapshot protocol.
//!
//! Every stateful component serialises itself into a flat little-endian
//! byte stream through [`SnapshotWriter`] and restores through
//! [`SnapshotReader`]. The container format (version header, section
//! ordering) lives with the machine, not here.
//!
//! Restore implementations must parse every field into locals before
//! assigning any of them, so a malformed stream leaves the component
//! untouched.

use std::fmt;

/// Errors produced while reading a snapshot stream.
#[derive(Debug)]
pub enum SnapshotError {
    /// The stream ended before the expected data.
    UnexpectedEnd,
    /// The snapshot was written by an unsupported version of the format.
    UnsupportedVersion {
        found: u32,
    },
    InvalidData(String),
}

impl fmt::Display for SnapshotError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::UnexpectedEnd => write!(f, "snapshot data ended unexpectedly"),
            Self::UnsupportedVersion { found } => {
                write!(f, "unsupported snapshot version {found}")
            }
            Self::InvalidData(msg) => write!(f, "invalid snapshot data: {msg}"),
        }
    }
}

impl std::error::Error for SnapshotError {}

/// A component that participates in machine snapshots.
pub trait Snapshot {
    /// Append this component's state to the stream.
    fn save(&self, writer: &mut SnapshotWriter);

    /// Replace this component's state with the stream's contents.
    fn restore(&mut self, reader: &mut SnapshotReader<'_>) -> Result<(), SnapshotError>;
}

/// Append-only little-endian snapshot stream builder.
#[derive(Debug, Default)]
pub struct SnapshotWriter {
    buf: Vec<u8>,
}

impl SnapshotWriter {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn write_bool(&mut self, value: bool) {
        self.buf.push(u8::from(value));
    }

    pub fn write_u8(&mut self, value: u8) {
        self.buf.push(value);
    }

    pub fn write_u16(&mut self, value: u16) {
        self.buf.extend_from_slice(&value.to_le_bytes());
    }

    pub fn write_u32(&mut self, value: u32) {
        self.buf.extend_from_slice(&value.to_le_bytes());
    }

    pub fn write_u64(&mut self, value: u64) {
        self.buf.extend_from_slice(&value.to_le_bytes());
    }

    /// Write raw bytes with no length prefix.
    pub fn write_bytes(&mut self, bytes: &[u8]) {
        self.buf.extend_from_slice(bytes);
    }

    /// Write a `u32` length prefix followed by the bytes.
    pub fn write_block(&mut self, bytes: &[u8]) {
        self.write_u32(bytes.len() as u32);
        self.buf.extend_from_slice(bytes);
    }

    /// Write a length-prefixed UTF-8 string.
    pub fn write_str(&mut self, value: &str) {
        self.write_block(value.as_bytes());
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.buf.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }

    #[must_use]
    pub fn into_bytes(self) -> Vec<u8> {
        self.buf
    }
}

/// Checked cursor over a snapshot byte stream.
#[derive(Debug)]
pub struct SnapshotReader<'a> {
    data: &'a [u8],
    pos: usize,
}

impl<'a> SnapshotReader<'a> {
    #[must_use]
    pub fn new(data: &'a [u8]) -> Self {
        Self { data, pos: 0 }
    }

    pub fn read_bool(&mut self) -> Result<bool, SnapshotError> {
        Ok(self.read_u8()? != 0)
    }

    pub fn read_u8(&mut self) -> Result<u8, SnapshotError> {
        let b = *self.data.get(self.pos).ok_or(SnapshotError::UnexpectedEnd)?;
        self.pos += 1;
        Ok(b)
    }

    pub fn read_u16(&mut self) -> Result<u16, SnapshotError> {
        let b = self.take(2)?;
        Ok(u16::from_le_bytes([b[0], b[1]]))
    }

    pub fn read_u32(&mut self) -> Result<u32, SnapshotError> {
        let b = self.take(4)?;
        Ok(u32::from_le_bytes([b[0], b[1], b[2], b[3]]))
    }

    pub fn read_u64(&mut self) -> Result<u64, SnapshotError> {
        let b = self.take(8)?;
        Ok(u64::from_le_bytes([
            b[0], b[1], b[2], b[3], b[4], b[5], b[6], b[7],
        ]))
    }

    /// Read exactly `len` raw bytes.
    pub fn read_bytes(&mut self, len: usize) -> Result<&'a [u8], SnapshotError> {
        self.take(len)
    }

    /// Read a `u32`-length-prefixed byte block.
    pub fn read_block(&mut self) -> Result<&'a [u8], SnapshotError> {
        let len = self.read_u32()? as usize;
        self.take(len)
    }

    /// Read a length-prefixed UTF-8 string.
    pub fn read_str(&mut self) -> Result<String, SnapshotError> {
        let bytes = self.read_block()?;
        String::from_utf8(bytes.to_vec())
            .map_err(|_| SnapshotError::InvalidData("string is not UTF-8".into()))
    }

    #[must_use]
    pub fn remaining(&self) -> usize {
        self.data.len() - self.pos
    }

    fn take(&mut self, len: usize) -> Result<&'a [u8], SnapshotError> {
        let end = self
            .pos
            .checked_add(len)
            .filter(|&end| end <= self.data.len())
            .ok_or(SnapshotError::UnexpectedEnd)?;
        let slice = &self.data[self.pos..end];
        self.pos = end;
        Ok(slice)
    }
}
