//! Length-checked big-endian reads and the matching writers.
//!
//! Every read checks the remaining length first, so a truncated buffer
//! surfaces as [`WireError::Truncated`] instead of a panic inside `bytes`.

use bytes::{Buf, BufMut};

use crate::error::WireError;

/// Cursor over a borrowed byte slice.
#[derive(Debug, Clone)]
pub struct WireReader<'a> {
    buf: &'a [u8],
    start_len: usize,
}

impl<'a> WireReader<'a> {
    pub fn new(buf: &'a [u8]) -> Self {
        Self {
            buf,
            start_len: buf.len(),
        }
    }

    /// Bytes consumed so far.
    pub fn position(&self) -> usize {
        self.start_len - self.buf.len()
    }

    pub fn remaining(&self) -> usize {
        self.buf.remaining()
    }

    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }

    fn ensure(&self, needed: usize) -> Result<(), WireError> {
        if self.buf.remaining() < needed {
            return Err(WireError::Truncated {
                offset: self.position(),
                needed,
                remaining: self.buf.remaining(),
            });
        }
        Ok(())
    }

    pub fn read_u8(&mut self) -> Result<u8, WireError> {
        self.ensure(1)?;
        Ok(self.buf.get_u8())
    }

    pub fn read_u16(&mut self) -> Result<u16, WireError> {
        self.ensure(2)?;
        Ok(self.buf.get_u16())
    }

    pub fn read_u32(&mut self) -> Result<u32, WireError> {
        self.ensure(4)?;
        Ok(self.buf.get_u32())
    }

    pub fn read_u64(&mut self) -> Result<u64, WireError> {
        self.ensure(8)?;
        Ok(self.buf.get_u64())
    }

    /// A 0/1 flag. Anything else is rejected.
    pub fn read_bool(&mut self) -> Result<bool, WireError> {
        let offset = self.position();
        match self.read_u8()? {
            0 => Ok(false),
            1 => Ok(true),
            value => Err(WireError::InvalidTag {
                offset,
                what: "bool",
                value: value as u32,
            }),
        }
    }

    pub fn read_bytes(&mut self, len: usize) -> Result<&'a [u8], WireError> {
        self.ensure(len)?;
        let (head, tail) = self.buf.split_at(len);
        self.buf = tail;
        Ok(head)
    }

    /// `u32` length followed by that many bytes.
    pub fn read_blob(&mut self) -> Result<&'a [u8], WireError> {
        let len = self.read_u32()? as usize;
        self.read_bytes(len)
    }

    /// `u16` length followed by UTF-8 bytes.
    pub fn read_str(&mut self) -> Result<&'a str, WireError> {
        let len = self.read_u16()? as usize;
        let offset = self.position();
        let raw = self.read_bytes(len)?;
        std::str::from_utf8(raw).map_err(|_| WireError::InvalidUtf8 { offset })
    }

    /// Fails when anything is left unread.
    pub fn finish(&self) -> Result<(), WireError> {
        if !self.buf.is_empty() {
            return Err(WireError::TrailingBytes {
                offset: self.position(),
                remaining: self.buf.len(),
            });
        }
        Ok(())
    }
}

/// Writers for the same primitives, implemented for any [`BufMut`].
///
/// Length-prefixed writes fail instead of truncating the prefix.
pub trait WireWrite: BufMut {
    fn put_bool(&mut self, value: bool) {
        self.put_u8(value as u8);
    }

    fn put_blob(&mut self, data: &[u8]) -> Result<(), WireError> {
        let len = u32::try_from(data.len()).map_err(|_| WireError::TooLong {
            what: "blob",
            len: data.len(),
            max: u32::MAX as usize,
        })?;
        self.put_u32(len);
        self.put_slice(data);
        Ok(())
    }

    fn put_str(&mut self, value: &str) -> Result<(), WireError> {
        let len = u16::try_from(value.len()).map_err(|_| WireError::TooLong {
            what: "string",
            len: value.len(),
            max: u16::MAX as usize,
        })?;
        self.put_u16(len);
        self.put_slice(value.as_bytes());
        Ok(())
    }
}

impl<B: BufMut + ?Sized> WireWrite for B {}
