//! Growable serialization buffer shared by the send and receive paths.

use std::io::Read;

use super::error::CodecError;

/// Initial capacity of a fresh buffer. Most protocol messages fit without a
/// single expansion.
pub const INITIAL_CAPACITY: usize = 10_000;

/// Byte arena with independent write and read cursors.
///
/// Writes append at the end; reads consume from the front. On overflow the
/// storage grows to at least double the required size, preserving everything
/// already written. Reading past the write cursor is a protocol violation,
/// never a retryable condition.
pub struct MessageBuffer {
    storage: Vec<u8>,
    read: usize,
}

impl MessageBuffer {
    pub fn new() -> Self {
        Self::with_capacity(INITIAL_CAPACITY)
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            storage: Vec::with_capacity(capacity),
            read: 0,
        }
    }

    /// Grow so that `additional` more bytes fit. The doubling keeps repeated
    /// appends amortized even when callers skip pre-sizing.
    pub fn ensure(&mut self, additional: usize) {
        let required = self.storage.len() + additional;
        if required > self.storage.capacity() {
            self.storage
                .reserve_exact(required * 2 - self.storage.len());
        }
    }

    pub fn write_u8(&mut self, value: u8) {
        self.ensure(1);
        self.storage.push(value);
    }

    pub fn write_u16(&mut self, value: u16) {
        self.write_bytes(&value.to_le_bytes());
    }

    pub fn write_u32(&mut self, value: u32) {
        self.write_bytes(&value.to_le_bytes());
    }

    pub fn write_u64(&mut self, value: u64) {
        self.write_bytes(&value.to_le_bytes());
    }

    pub fn write_bytes(&mut self, bytes: &[u8]) {
        self.ensure(bytes.len());
        self.storage.extend_from_slice(bytes);
    }

    /// Write a 4-byte hole and return its offset for a later `patch_u32`.
    pub fn reserve_u32(&mut self) -> usize {
        let offset = self.storage.len();
        self.write_u32(0);
        offset
    }

    pub fn patch_u32(&mut self, offset: usize, value: u32) {
        debug_assert!(offset + 4 <= self.storage.len(), "patch outside buffer");
        self.storage[offset..offset + 4].copy_from_slice(&value.to_le_bytes());
    }

    fn take(&mut self, len: usize) -> Result<&[u8], CodecError> {
        let available = self.storage.len() - self.read;
        if len > available {
            return Err(CodecError::Truncated {
                needed: len,
                available,
            });
        }
        let slice = &self.storage[self.read..self.read + len];
        self.read += len;
        Ok(slice)
    }

    pub fn read_u8(&mut self) -> Result<u8, CodecError> {
        Ok(self.take(1)?[0])
    }

    pub fn read_u16(&mut self) -> Result<u16, CodecError> {
        let mut raw = [0u8; 2];
        raw.copy_from_slice(self.take(2)?);
        Ok(u16::from_le_bytes(raw))
    }

    pub fn read_u32(&mut self) -> Result<u32, CodecError> {
        let mut raw = [0u8; 4];
        raw.copy_from_slice(self.take(4)?);
        Ok(u32::from_le_bytes(raw))
    }

    pub fn read_u64(&mut self) -> Result<u64, CodecError> {
        let mut raw = [0u8; 8];
        raw.copy_from_slice(self.take(8)?);
        Ok(u64::from_le_bytes(raw))
    }

    pub fn read_bytes(&mut self, len: usize) -> Result<&[u8], CodecError> {
        self.take(len)
    }

    /// Append exactly `len` bytes from `reader`, looping over partial reads.
    pub fn fill_from<R: Read>(&mut self, reader: &mut R, len: usize) -> std::io::Result<()> {
        self.ensure(len);
        let start = self.storage.len();
        self.storage.resize(start + len, 0);
        let mut filled = 0usize;
        while filled < len {
            let n = reader.read(&mut self.storage[start + filled..])?;
            if n == 0 {
                return Err(std::io::Error::new(
                    std::io::ErrorKind::UnexpectedEof,
                    "frame body truncated",
                ));
            }
            filled += n;
        }
        Ok(())
    }

    /// Bytes written so far, regardless of the read cursor.
    pub fn written(&self) -> &[u8] {
        &self.storage
    }

    /// Bytes consumed by reads so far.
    pub fn consumed(&self) -> usize {
        self.read
    }

    /// Bytes still readable.
    pub fn remaining(&self) -> usize {
        self.storage.len() - self.read
    }

    pub fn len(&self) -> usize {
        self.storage.len()
    }

    pub fn is_empty(&self) -> bool {
        self.storage.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.storage.capacity()
    }

    /// Reset both cursors, retaining capacity.
    pub fn clear(&mut self) {
        self.storage.clear();
        self.read = 0;
    }
}

impl Default for MessageBuffer {
    fn default() -> Self {
        Self::new()
    }
}
