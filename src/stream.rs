//! Byte cursor and compact-size helpers used by the witness wire codec.
//!
//! Reads are fallible and return a [`DecodeError`] instead of leaving the caller to poll a
//! stream flag. The reader still carries a sticky validity bit: once a read fails or the codec
//! calls [`ByteReader::invalidate`], every later read fails with [`DecodeError::Invalidated`] and
//! the reader reports itself as exhausted.

#[cfg(not(feature = "std"))]
use alloc::vec::Vec;

use core::fmt;

/// Failure reading from a [`ByteReader`].
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum DecodeError {
    /// The input ended before the requested number of bytes.
    UnexpectedEnd {
        /// Bytes the read needed.
        requested: usize,
        /// Bytes left in the input.
        available: usize,
    },
    /// A decoded size exceeded the protocol bound.
    Oversized {
        /// Decoded size.
        requested: u64,
        /// Largest accepted size.
        max: u64,
    },
    /// The reader was invalidated by an earlier failure.
    Invalidated,
}

impl fmt::Display for DecodeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match *self {
            DecodeError::UnexpectedEnd {
                requested,
                available,
            } => write!(f, "unexpected end of input: need {requested} bytes, have {available}"),
            DecodeError::Oversized { requested, max } => {
                write!(f, "size {requested} exceeds maximum {max}")
            }
            DecodeError::Invalidated => f.write_str("reader was invalidated by an earlier failure"),
        }
    }
}

#[cfg(feature = "std")]
impl std::error::Error for DecodeError {}

/// Forward-only cursor over a borrowed byte slice.
#[derive(Debug, Clone)]
pub struct ByteReader<'a> {
    data: &'a [u8],
    position: usize,
    valid: bool,
}

impl<'a> ByteReader<'a> {
    pub fn new(data: &'a [u8]) -> Self {
        Self {
            data,
            position: 0,
            valid: true,
        }
    }

    /// Offset of the next unread byte.
    pub fn position(&self) -> usize {
        self.position
    }

    /// Bytes not yet consumed.
    pub fn remaining(&self) -> &'a [u8] {
        &self.data[self.position..]
    }

    pub fn is_valid(&self) -> bool {
        self.valid
    }

    /// True once the input is fully consumed or the reader has been invalidated.
    pub fn is_exhausted(&self) -> bool {
        !self.valid || self.position >= self.data.len()
    }

    /// Marks the reader invalid. Subsequent reads fail.
    pub fn invalidate(&mut self) {
        self.valid = false;
    }

    /// Reads `len` bytes and advances the cursor.
    pub fn read_bytes(&mut self, len: usize) -> Result<&'a [u8], DecodeError> {
        self.ensure_valid()?;
        let available = self.data.len() - self.position;
        if len > available {
            self.valid = false;
            return Err(DecodeError::UnexpectedEnd {
                requested: len,
                available,
            });
        }
        let start = self.position;
        self.position += len;
        Ok(&self.data[start..self.position])
    }

    pub fn read_u8(&mut self) -> Result<u8, DecodeError> {
        Ok(self.read_bytes(1)?[0])
    }

    /// Reads a Bitcoin compact-size integer.
    ///
    /// Non-minimal encodings are accepted; the width is chosen by the marker byte alone.
    pub fn read_compact_size(&mut self) -> Result<u64, DecodeError> {
        let value = match self.read_u8()? {
            0xfd => u64::from(u16::from_le_bytes(self.read_array()?)),
            0xfe => u64::from(u32::from_le_bytes(self.read_array()?)),
            0xff => u64::from_le_bytes(self.read_array()?),
            small => u64::from(small),
        };
        Ok(value)
    }

    fn read_array<const N: usize>(&mut self) -> Result<[u8; N], DecodeError> {
        let mut out = [0u8; N];
        out.copy_from_slice(self.read_bytes(N)?);
        Ok(out)
    }

    fn ensure_valid(&self) -> Result<(), DecodeError> {
        if self.valid {
            Ok(())
        } else {
            Err(DecodeError::Invalidated)
        }
    }
}

/// Number of bytes used by the compact-size encoding of `value`.
pub fn compact_size_len(value: u64) -> usize {
    match value {
        0..=0xfc => 1,
        0xfd..=0xffff => 3,
        0x1_0000..=0xffff_ffff => 5,
        _ => 9,
    }
}

/// Appends the compact-size encoding of `value` to `sink`.
pub fn write_compact_size(sink: &mut Vec<u8>, value: u64) {
    match value {
        0..=0xfc => sink.push(value as u8),
        0xfd..=0xffff => {
            sink.push(0xfd);
            sink.extend_from_slice(&(value as u16).to_le_bytes());
        }
        0x1_0000..=0xffff_ffff => {
            sink.push(0xfe);
            sink.extend_from_slice(&(value as u32).to_le_bytes());
        }
        _ => {
            sink.push(0xff);
            sink.extend_from_slice(&value.to_le_bytes());
        }
    }
}
