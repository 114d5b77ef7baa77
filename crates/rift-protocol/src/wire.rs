//! Fixed-layout little-endian value codec for property blobs.
//!
//! Registered properties are written in index order with a fixed encoding
//! per kind and **no** per-field prefixes: both ends know the order and the
//! types statically from the entity's `EntityKindId`, so the blob is just
//! the concatenated values.

use crate::ids::Vec2;

/// Errors produced while decoding a property blob.
#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum WireError {
    /// The blob ended before the expected value was complete.
    #[error("unexpected end of blob: needed {needed} bytes, {remaining} left")]
    UnexpectedEnd {
        /// Bytes the current value required.
        needed: usize,
        /// Bytes actually remaining.
        remaining: usize,
    },

    /// A boolean byte was neither 0 nor 1.
    #[error("invalid bool byte {0:#04x}")]
    InvalidBool(u8),
}

/// Append-only writer over a growable byte buffer.
#[derive(Debug, Default)]
pub struct WireWriter {
    buf: Vec<u8>,
}

impl WireWriter {
    /// Creates an empty writer.
    pub fn new() -> Self {
        Self::default()
    }

    /// Consumes the writer and returns the accumulated bytes.
    pub fn into_bytes(self) -> Vec<u8> {
        self.buf
    }

    /// Number of bytes written so far.
    pub fn len(&self) -> usize {
        self.buf.len()
    }

    /// Returns `true` if nothing has been written.
    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }

    /// Writes a single byte.
    pub fn put_u8(&mut self, v: u8) {
        self.buf.push(v);
    }

    /// Writes a bool as one byte (0 or 1).
    pub fn put_bool(&mut self, v: bool) {
        self.buf.push(v as u8);
    }

    /// Writes an `i32` little-endian.
    pub fn put_i32(&mut self, v: i32) {
        self.buf.extend_from_slice(&v.to_le_bytes());
    }

    /// Writes an `f32` as its little-endian bit pattern.
    pub fn put_f32(&mut self, v: f32) {
        self.buf.extend_from_slice(&v.to_le_bytes());
    }

    /// Writes a [`Vec2`] as two consecutive `f32`s.
    pub fn put_vec2(&mut self, v: Vec2) {
        self.put_f32(v.x);
        self.put_f32(v.y);
    }
}

/// Cursor-based reader over a property blob.
#[derive(Debug)]
pub struct WireReader<'a> {
    data: &'a [u8],
    pos: usize,
}

impl<'a> WireReader<'a> {
    /// Creates a reader over `data`, positioned at the start.
    pub fn new(data: &'a [u8]) -> Self {
        Self { data, pos: 0 }
    }

    /// Bytes not yet consumed.
    pub fn remaining(&self) -> usize {
        self.data.len() - self.pos
    }

    fn take(&mut self, n: usize) -> Result<&'a [u8], WireError> {
        if self.remaining() < n {
            return Err(WireError::UnexpectedEnd {
                needed: n,
                remaining: self.remaining(),
            });
        }
        let slice = &self.data[self.pos..self.pos + n];
        self.pos += n;
        Ok(slice)
    }

    /// Reads a single byte.
    pub fn get_u8(&mut self) -> Result<u8, WireError> {
        Ok(self.take(1)?[0])
    }

    /// Reads a bool, rejecting any byte other than 0 or 1.
    pub fn get_bool(&mut self) -> Result<bool, WireError> {
        match self.get_u8()? {
            0 => Ok(false),
            1 => Ok(true),
            other => Err(WireError::InvalidBool(other)),
        }
    }

    /// Reads a little-endian `i32`.
    pub fn get_i32(&mut self) -> Result<i32, WireError> {
        let bytes = self.take(4)?;
        Ok(i32::from_le_bytes(bytes.try_into().expect("4-byte slice")))
    }

    /// Reads a little-endian `f32` bit pattern.
    pub fn get_f32(&mut self) -> Result<f32, WireError> {
        let bytes = self.take(4)?;
        Ok(f32::from_le_bytes(bytes.try_into().expect("4-byte slice")))
    }

    /// Reads a [`Vec2`] (two consecutive `f32`s).
    pub fn get_vec2(&mut self) -> Result<Vec2, WireError> {
        Ok(Vec2 {
            x: self.get_f32()?,
            y: self.get_f32()?,
        })
    }
}
