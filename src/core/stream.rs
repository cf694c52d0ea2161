//! # Data Stream Primitives
//!
//! Big-endian scalar encoding shared by every packet payload.
//!
//! ## Encoding
//! - Integers: fixed width, network byte order
//! - `bool`: one byte, `0` or `1`
//! - Strings: `u32` byte length followed by UTF-8
//! - Byte arrays: `u32` length followed by raw bytes (empty array has length 0)
//! - String lists: `u32` count followed by strings
//!
//! Every read is bounds-checked; a short buffer yields
//! [`ProtocolError::DecodeTruncated`] and leaves the reader where it was.

use bytes::{Buf, BufMut, Bytes, BytesMut};

use crate::error::{constants, ProtocolError, Result};

/// Growable write buffer for payload construction
#[derive(Debug, Default, Clone)]
pub struct DataStream {
    buf: BytesMut,
}

impl DataStream {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            buf: BytesMut::with_capacity(capacity),
        }
    }

    pub fn len(&self) -> usize {
        self.buf.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }

    pub fn clear(&mut self) {
        self.buf.clear();
    }

    pub fn as_slice(&self) -> &[u8] {
        &self.buf
    }

    pub fn into_bytes(self) -> Bytes {
        self.buf.freeze()
    }

    pub fn into_vec(self) -> Vec<u8> {
        self.buf.to_vec()
    }

    pub(crate) fn buf_mut(&mut self) -> &mut BytesMut {
        &mut self.buf
    }

    pub fn write_u8(&mut self, value: u8) {
        self.buf.put_u8(value);
    }

    pub fn write_bool(&mut self, value: bool) {
        self.buf.put_u8(u8::from(value));
    }

    pub fn write_u32(&mut self, value: u32) {
        self.buf.put_u32(value);
    }

    pub fn write_i32(&mut self, value: i32) {
        self.buf.put_i32(value);
    }

    pub fn write_i64(&mut self, value: i64) {
        self.buf.put_i64(value);
    }

    pub fn write_f64(&mut self, value: f64) {
        self.buf.put_f64(value);
    }

    /// Write a collection length as `u32`
    pub fn write_count(&mut self, count: usize) {
        self.buf.put_u32(count as u32);
    }

    pub fn write_string(&mut self, value: &str) {
        self.write_blob(value.as_bytes());
    }

    pub fn write_blob(&mut self, value: &[u8]) {
        self.write_count(value.len());
        self.buf.put_slice(value);
    }

    pub fn write_string_list<S: AsRef<str>>(&mut self, values: &[S]) {
        self.write_count(values.len());
        for value in values {
            self.write_string(value.as_ref());
        }
    }

    /// Append bytes without a length prefix
    pub fn write_raw(&mut self, value: &[u8]) {
        self.buf.put_slice(value);
    }
}

/// Bounds-checked reader over a borrowed payload
#[derive(Debug, Clone)]
pub struct DataReader<'a> {
    buf: &'a [u8],
}

impl<'a> DataReader<'a> {
    pub fn new(buf: &'a [u8]) -> Self {
        Self { buf }
    }

    pub fn remaining(&self) -> usize {
        self.buf.len()
    }

    pub fn at_end(&self) -> bool {
        self.buf.is_empty()
    }

    /// Bytes not yet consumed
    pub fn rest(&self) -> &'a [u8] {
        self.buf
    }

    fn ensure(&self, needed: usize, context: &'static str) -> Result<()> {
        if self.buf.len() < needed {
            return Err(ProtocolError::DecodeTruncated(context));
        }
        Ok(())
    }

    pub fn peek_u8(&self) -> Result<u8> {
        self.buf
            .first()
            .copied()
            .ok_or(ProtocolError::DecodeTruncated(constants::CTX_U8))
    }

    pub fn read_u8(&mut self) -> Result<u8> {
        self.ensure(1, constants::CTX_U8)?;
        Ok(self.buf.get_u8())
    }

    pub fn read_bool(&mut self) -> Result<bool> {
        Ok(self.read_u8()? != 0)
    }

    pub fn read_u32(&mut self) -> Result<u32> {
        self.ensure(4, constants::CTX_U32)?;
        Ok(self.buf.get_u32())
    }

    pub fn read_i32(&mut self) -> Result<i32> {
        self.ensure(4, constants::CTX_I32)?;
        Ok(self.buf.get_i32())
    }

    pub fn read_i64(&mut self) -> Result<i64> {
        self.ensure(8, constants::CTX_I64)?;
        Ok(self.buf.get_i64())
    }

    pub fn read_f64(&mut self) -> Result<f64> {
        self.ensure(8, constants::CTX_F64)?;
        Ok(self.buf.get_f64())
    }

    pub fn read_blob(&mut self) -> Result<&'a [u8]> {
        let len = self.read_u32()? as usize;
        if self.buf.len() < len {
            return Err(ProtocolError::DecodeTruncated(constants::CTX_BLOB));
        }
        let (head, tail) = self.buf.split_at(len);
        self.buf = tail;
        Ok(head)
    }

    pub fn read_string(&mut self) -> Result<String> {
        let len = self.read_u32()? as usize;
        if self.buf.len() < len {
            return Err(ProtocolError::DecodeTruncated(constants::CTX_STRING));
        }
        let (head, tail) = self.buf.split_at(len);
        self.buf = tail;
        std::str::from_utf8(head)
            .map(str::to_owned)
            .map_err(|_| ProtocolError::InvalidUtf8)
    }

    pub fn read_string_list(&mut self) -> Result<Vec<String>> {
        let count = self.read_u32()? as usize;
        // Each string needs at least its length prefix
        self.ensure(count.saturating_mul(4), constants::CTX_LIST)?;
        (0..count).map(|_| self.read_string()).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_scalars_are_big_endian() {
        let mut ds = DataStream::new();
        ds.write_u32(1);
        ds.write_i32(-2);
        assert_eq!(ds.as_slice(), &[0, 0, 0, 1, 0xFF, 0xFF, 0xFF, 0xFE]);
    }

    #[test]
    fn test_string_layout() {
        let mut ds = DataStream::new();
        ds.write_string("ro");
        assert_eq!(ds.as_slice(), &[0, 0, 0, 2, b'r', b'o']);
    }

    #[test]
    fn test_short_string_is_truncated() {
        // Claims 10 bytes, carries 2
        let bytes = [0, 0, 0, 10, b'r', b'o'];
        let mut reader = DataReader::new(&bytes);
        assert!(matches!(
            reader.read_string(),
            Err(ProtocolError::DecodeTruncated(_))
        ));
    }

    #[test]
    fn test_empty_reader_reports_truncation() {
        let mut reader = DataReader::new(&[]);
        assert!(reader.at_end());
        assert!(matches!(
            reader.read_u8(),
            Err(ProtocolError::DecodeTruncated(_))
        ));
        assert!(reader.peek_u8().is_err());
    }

    #[test]
    fn test_invalid_utf8_rejected() {
        let bytes = [0, 0, 0, 2, 0xC3, 0x28];
        let mut reader = DataReader::new(&bytes);
        assert!(matches!(reader.read_string(), Err(ProtocolError::InvalidUtf8)));
    }

    #[test]
    fn test_string_list_with_huge_count_fails_cleanly() {
        let bytes = [0xFF, 0xFF, 0xFF, 0xFF];
        let mut reader = DataReader::new(&bytes);
        assert!(matches!(
            reader.read_string_list(),
            Err(ProtocolError::DecodeTruncated(_))
        ));
    }
}
