//! Bounds-checked decoding helpers for node and header blocks.

use arbor_common::{ArborError, DiskOff, Result};
use bytes::{Buf, BufMut, Bytes, BytesMut};

/// Writes a length-prefixed byte string.
pub(crate) fn put_bytes(buf: &mut BytesMut, bytes: &[u8]) {
    buf.put_u32_le(bytes.len() as u32);
    buf.put_slice(bytes);
}

/// Encoded size of a length-prefixed byte string.
#[inline]
pub(crate) fn bytes_size(bytes: &[u8]) -> usize {
    4 + bytes.len()
}

/// Reader that turns short input into `PageCorrupted` instead of panicking.
pub(crate) struct BlockReader<'a> {
    location: DiskOff,
    data: &'a [u8],
}

impl<'a> BlockReader<'a> {
    pub(crate) fn new(location: DiskOff, data: &'a [u8]) -> Self {
        Self { location, data }
    }

    pub(crate) fn corrupted(&self, reason: impl Into<String>) -> ArborError {
        ArborError::PageCorrupted {
            location: self.location.0,
            reason: reason.into(),
        }
    }

    fn need(&self, n: usize) -> Result<()> {
        if self.data.remaining() < n {
            return Err(self.corrupted(format!(
                "block truncated: need {} bytes, have {}",
                n,
                self.data.remaining()
            )));
        }
        Ok(())
    }

    pub(crate) fn u8(&mut self) -> Result<u8> {
        self.need(1)?;
        Ok(self.data.get_u8())
    }

    pub(crate) fn u32(&mut self) -> Result<u32> {
        self.need(4)?;
        Ok(self.data.get_u32_le())
    }

    pub(crate) fn i32(&mut self) -> Result<i32> {
        self.need(4)?;
        Ok(self.data.get_i32_le())
    }

    pub(crate) fn u64(&mut self) -> Result<u64> {
        self.need(8)?;
        Ok(self.data.get_u64_le())
    }

    pub(crate) fn off(&mut self) -> Result<DiskOff> {
        self.u64().map(DiskOff)
    }

    pub(crate) fn bytes(&mut self) -> Result<Bytes> {
        let len = self.u32()? as usize;
        self.need(len)?;
        let bytes = Bytes::copy_from_slice(&self.data[..len]);
        self.data.advance(len);
        Ok(bytes)
    }

    /// Reads an element count, rejecting counts the remaining input cannot
    /// hold at `min_size` bytes per element.
    pub(crate) fn count(&mut self, min_size: usize) -> Result<usize> {
        let count = self.u32()? as usize;
        if count.saturating_mul(min_size) > self.data.remaining() {
            return Err(self.corrupted(format!("element count {} exceeds block", count)));
        }
        Ok(count)
    }

    pub(crate) fn finish(&self) -> Result<()> {
        if !self.data.is_empty() {
            return Err(self.corrupted(format!("{} trailing bytes", self.data.len())));
        }
        Ok(())
    }
}
