//! Witness stack model and its BIP144 wire codec.

#[cfg(not(feature = "std"))]
use alloc::vec::Vec;

use core::{fmt, ops::Index, slice};

use bitcoin::{consensus::Encodable, hex::DisplayHex, io};
use log::debug;

use crate::{
    stream::{compact_size_len, write_compact_size, ByteReader, DecodeError},
    MAX_BLOCK_WEIGHT, MAX_SCRIPT_ELEMENT_SIZE,
};

/// Ordered witness stack of a single transaction input.
///
/// A witness is valid once built from explicit elements or parsed successfully. A default
/// witness, a failed parse, and [`Witness::clear`] all leave it invalid and empty.
#[derive(Debug, Clone, Default)]
pub struct Witness {
    stack: Vec<Vec<u8>>,
    valid: bool,
}

impl Witness {
    /// Empty, invalid witness.
    pub fn new() -> Self {
        Self::default()
    }

    /// Valid witness holding `stack` in order.
    pub fn from_stack(stack: Vec<Vec<u8>>) -> Self {
        Self { stack, valid: true }
    }

    /// Parses a witness from raw bytes; the result is invalid when parsing fails.
    pub fn from_data(data: &[u8], prefix: bool) -> Self {
        let mut reader = ByteReader::new(data);
        Self::from_reader(&mut reader, prefix)
    }

    /// Parses a witness from `reader`, leaving the cursor after the last element read.
    pub fn from_reader(reader: &mut ByteReader<'_>, prefix: bool) -> Self {
        let mut witness = Self::new();
        witness.decode(reader, prefix);
        witness
    }

    /// Replaces the contents with a witness parsed from `reader`.
    ///
    /// With `prefix` the element count is read first; otherwise elements are read until the
    /// reader is exhausted. Returns the final validity of the reader.
    pub fn decode(&mut self, reader: &mut ByteReader<'_>, prefix: bool) -> bool {
        self.stack.clear();
        if let Err(err) = read_stack(reader, prefix, &mut self.stack) {
            debug!("witness decode failed at offset {}: {err}", reader.position());
        }

        if reader.is_valid() {
            self.valid = true;
        } else {
            self.clear();
        }
        self.valid
    }

    /// Serializes the stack, optionally preceded by the element count.
    pub fn to_data(&self, prefix: bool) -> Vec<u8> {
        let mut data = Vec::with_capacity(self.serialized_size(prefix));
        self.write_to(&mut data, prefix);
        data
    }

    /// Appends the serialized stack to `sink`.
    pub fn write_to(&self, sink: &mut Vec<u8>, prefix: bool) {
        let start = sink.len();
        if prefix {
            write_compact_size(sink, self.stack.len() as u64);
        }
        for element in &self.stack {
            write_compact_size(sink, element.len() as u64);
            sink.extend_from_slice(element);
        }
        debug_assert_eq!(sink.len() - start, self.serialized_size(prefix));
    }

    /// Length of [`Witness::to_data`] for the same `prefix`.
    pub fn serialized_size(&self, prefix: bool) -> usize {
        let elements: usize = self
            .stack
            .iter()
            .map(|element| compact_size_len(element.len() as u64) + element.len())
            .sum();
        if prefix {
            compact_size_len(self.stack.len() as u64) + elements
        } else {
            elements
        }
    }

    pub fn is_valid(&self) -> bool {
        self.valid
    }

    /// Drops every element and its backing storage, then marks the witness invalid.
    pub fn clear(&mut self) {
        self.stack.clear();
        self.stack.shrink_to_fit();
        self.valid = false;
    }

    pub fn len(&self) -> usize {
        self.stack.len()
    }

    pub fn is_empty(&self) -> bool {
        self.stack.is_empty()
    }

    /// First (bottom) element. Panics on an empty stack.
    pub fn front(&self) -> &[u8] {
        &self.stack[0]
    }

    /// Last (top) element. Panics on an empty stack.
    pub fn back(&self) -> &[u8] {
        &self.stack[self.stack.len() - 1]
    }

    pub fn iter(&self) -> slice::Iter<'_, Vec<u8>> {
        self.stack.iter()
    }

    pub fn stack(&self) -> &[Vec<u8>] {
        &self.stack
    }

    pub fn into_stack(self) -> Vec<Vec<u8>> {
        self.stack
    }

    /// True when every element fits in a single script push.
    pub fn is_push_size(stack: &[Vec<u8>]) -> bool {
        stack
            .iter()
            .all(|element| element.len() <= MAX_SCRIPT_ELEMENT_SIZE)
    }

    /// True for the coinbase witness reserved value: one 32-byte element.
    pub fn is_reserved_pattern(stack: &[Vec<u8>]) -> bool {
        stack.len() == 1 && stack[0].len() == 32
    }
}

fn read_stack(
    reader: &mut ByteReader<'_>,
    prefix: bool,
    stack: &mut Vec<Vec<u8>>,
) -> Result<(), DecodeError> {
    if prefix {
        let count = reader.read_compact_size()?;
        if count > MAX_BLOCK_WEIGHT as u64 {
            reader.invalidate();
            return Err(DecodeError::Oversized {
                requested: count,
                max: MAX_BLOCK_WEIGHT as u64,
            });
        }

        // Every element takes at least one byte, so the remaining input bounds the allocation.
        let count = count as usize;
        stack.reserve(count.min(reader.remaining().len()));
        for _ in 0..count {
            stack.push(read_element(reader)?);
        }
    } else {
        while !reader.is_exhausted() {
            stack.push(read_element(reader)?);
        }
    }
    Ok(())
}

/// Reads one length-prefixed element.
///
/// An oversized length invalidates the reader but still yields an empty element; the
/// failure surfaces on the next read or in the caller's final validity check.
fn read_element(reader: &mut ByteReader<'_>) -> Result<Vec<u8>, DecodeError> {
    let len = reader.read_compact_size()?;
    if len > MAX_BLOCK_WEIGHT as u64 {
        debug!("witness element length {len} exceeds {MAX_BLOCK_WEIGHT}");
        reader.invalidate();
        return Ok(Vec::new());
    }
    Ok(reader.read_bytes(len as usize)?.to_vec())
}

impl PartialEq for Witness {
    fn eq(&self, other: &Self) -> bool {
        self.stack == other.stack
    }
}

impl Eq for Witness {}

impl From<Vec<Vec<u8>>> for Witness {
    fn from(stack: Vec<Vec<u8>>) -> Self {
        Self::from_stack(stack)
    }
}

impl From<&bitcoin::Witness> for Witness {
    fn from(witness: &bitcoin::Witness) -> Self {
        Self::from_stack(witness.iter().map(<[u8]>::to_vec).collect())
    }
}

impl Index<usize> for Witness {
    type Output = [u8];

    fn index(&self, index: usize) -> &[u8] {
        &self.stack[index]
    }
}

impl<'a> IntoIterator for &'a Witness {
    type Item = &'a Vec<u8>;
    type IntoIter = slice::Iter<'a, Vec<u8>>;

    fn into_iter(self) -> Self::IntoIter {
        self.stack.iter()
    }
}

impl fmt::Display for Witness {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if !self.valid {
            return f.write_str("<invalid>");
        }
        for (i, element) in self.stack.iter().enumerate() {
            if i > 0 {
                f.write_str(" ")?;
            }
            write!(f, "[{}]", element.as_hex())?;
        }
        Ok(())
    }
}

impl Encodable for Witness {
    fn consensus_encode<W: io::Write + ?Sized>(&self, writer: &mut W) -> Result<usize, io::Error> {
        let data = self.to_data(true);
        writer.write_all(&data)?;
        Ok(data.len())
    }
}
