//! Minimal msgpack cursor used to walk public domains without decoding
//! table payloads.
//!
//! Keys and values are kept as raw encoded elements; only the structural
//! fields (version, table names, counts) are decoded.

use crate::error::{FormatError, Result};
use byteorder::{BigEndian, ByteOrder};
use rmp::Marker;

/// Borrowing reader over a msgpack byte stream.
///
/// `base` is the absolute offset of `buf[0]` in the enclosing ledger, so
/// errors point at file positions rather than slice positions.
#[derive(Debug, Clone)]
pub struct MsgReader<'a> {
    buf: &'a [u8],
    pos: usize,
    base: usize,
}

impl<'a> MsgReader<'a> {
    pub fn new(buf: &'a [u8], base: usize) -> Self {
        Self { buf, pos: 0, base }
    }

    pub fn position(&self) -> usize {
        self.pos
    }

    /// Absolute offset of the next unread byte.
    pub fn absolute_position(&self) -> usize {
        self.base + self.pos
    }

    pub fn remaining(&self) -> usize {
        self.buf.len() - self.pos
    }

    pub fn is_empty(&self) -> bool {
        self.pos >= self.buf.len()
    }

    fn take(&mut self, n: usize) -> Result<&'a [u8]> {
        if self.remaining() < n {
            return Err(FormatError::Truncated {
                offset: self.absolute_position(),
                needed: n,
                available: self.remaining(),
            });
        }
        let out = &self.buf[self.pos..self.pos + n];
        self.pos += n;
        Ok(out)
    }

    fn take_be(&mut self, n: usize) -> Result<u64> {
        let bytes = self.take(n)?;
        Ok(BigEndian::read_uint(bytes, n))
    }

    fn read_marker(&mut self) -> Result<Marker> {
        let byte = self.take(1)?;
        Ok(Marker::from_u8(byte[0]))
    }

    fn unexpected(&self, at: usize, wanted: &str, found: Marker) -> FormatError {
        FormatError::malformed(
            self.base + at,
            format!("expected {}, found {:?}", wanted, found),
        )
    }

    /// Reads a non-negative integer in any width.
    pub fn read_u64(&mut self) -> Result<u64> {
        let at = self.pos;
        let marker = self.read_marker()?;
        let value: i128 = match marker {
            Marker::FixPos(v) => v as i128,
            Marker::U8 => self.take_be(1)? as i128,
            Marker::U16 => self.take_be(2)? as i128,
            Marker::U32 => self.take_be(4)? as i128,
            Marker::U64 => self.take_be(8)? as i128,
            Marker::FixNeg(v) => v as i128,
            Marker::I8 => self.take_be(1)? as u8 as i8 as i128,
            Marker::I16 => self.take_be(2)? as u16 as i16 as i128,
            Marker::I32 => self.take_be(4)? as u32 as i32 as i128,
            Marker::I64 => self.take_be(8)? as i64 as i128,
            other => return Err(self.unexpected(at, "unsigned integer", other)),
        };
        u64::try_from(value)
            .map_err(|_| FormatError::malformed(self.base + at, format!("negative integer {}", value)))
    }

    pub fn read_u32(&mut self) -> Result<u32> {
        let at = self.pos;
        let v = self.read_u64()?;
        u32::try_from(v).map_err(|_| FormatError::malformed(self.base + at, format!("{} does not fit in u32", v)))
    }

    /// Reads a UTF-8 string. Binary payloads holding UTF-8 are accepted too.
    pub fn read_str(&mut self) -> Result<&'a str> {
        let at = self.pos;
        let bytes = self.read_bytes_like(true)?;
        std::str::from_utf8(bytes)
            .map_err(|e| FormatError::malformed(self.base + at, format!("invalid utf-8 in string: {}", e)))
    }

    /// Reads a bin (or str) payload.
    pub fn read_bin(&mut self) -> Result<&'a [u8]> {
        self.read_bytes_like(false)
    }

    fn read_bytes_like(&mut self, want_str: bool) -> Result<&'a [u8]> {
        let at = self.pos;
        let marker = self.read_marker()?;
        let len = match marker {
            Marker::FixStr(n) => n as usize,
            Marker::Str8 | Marker::Bin8 => self.take_be(1)? as usize,
            Marker::Str16 | Marker::Bin16 => self.take_be(2)? as usize,
            Marker::Str32 | Marker::Bin32 => self.take_be(4)? as usize,
            other => {
                let wanted = if want_str { "string" } else { "binary" };
                return Err(self.unexpected(at, wanted, other));
            }
        };
        self.take(len)
    }

    pub fn read_array_len(&mut self) -> Result<u32> {
        let at = self.pos;
        match self.read_marker()? {
            Marker::FixArray(n) => Ok(n as u32),
            Marker::Array16 => Ok(self.take_be(2)? as u32),
            Marker::Array32 => Ok(self.take_be(4)? as u32),
            other => Err(self.unexpected(at, "array", other)),
        }
    }

    /// Returns the raw bytes of the next complete element.
    pub fn read_element(&mut self) -> Result<&'a [u8]> {
        let start = self.pos;
        self.skip_element()?;
        Ok(&self.buf[start..self.pos])
    }

    /// Peeks whether the next element is an array, without consuming it.
    pub fn next_is_array(&self) -> bool {
        matches!(
            self.buf.get(self.pos).map(|b| Marker::from_u8(*b)),
            Some(Marker::FixArray(_) | Marker::Array16 | Marker::Array32)
        )
    }

    /// Skips one complete element, nested containers included.
    pub fn skip_element(&mut self) -> Result<()> {
        // Containers are flattened: each one adds its children to `pending`.
        let mut pending: u64 = 1;
        while pending > 0 {
            pending -= 1;
            let at = self.pos;
            let marker = self.read_marker()?;
            let (payload, children) = match marker {
                Marker::FixPos(_)
                | Marker::FixNeg(_)
                | Marker::Null
                | Marker::True
                | Marker::False => (0, 0),
                Marker::U8 | Marker::I8 => (1, 0),
                Marker::U16 | Marker::I16 => (2, 0),
                Marker::U32 | Marker::I32 | Marker::F32 => (4, 0),
                Marker::U64 | Marker::I64 | Marker::F64 => (8, 0),
                Marker::FixStr(n) => (n as usize, 0),
                Marker::Str8 | Marker::Bin8 => (self.take_be(1)? as usize, 0),
                Marker::Str16 | Marker::Bin16 => (self.take_be(2)? as usize, 0),
                Marker::Str32 | Marker::Bin32 => (self.take_be(4)? as usize, 0),
                Marker::FixArray(n) => (0, n as u64),
                Marker::Array16 => (0, self.take_be(2)?),
                Marker::Array32 => (0, self.take_be(4)?),
                Marker::FixMap(n) => (0, 2 * n as u64),
                Marker::Map16 => (0, 2 * self.take_be(2)?),
                Marker::Map32 => (0, 2 * self.take_be(4)?),
                Marker::FixExt1 => (2, 0),
                Marker::FixExt2 => (3, 0),
                Marker::FixExt4 => (5, 0),
                Marker::FixExt8 => (9, 0),
                Marker::FixExt16 => (17, 0),
                Marker::Ext8 => (self.take_be(1)? as usize + 1, 0),
                Marker::Ext16 => (self.take_be(2)? as usize + 1, 0),
                Marker::Ext32 => (self.take_be(4)? as usize + 1, 0),
                Marker::Reserved => {
                    return Err(FormatError::malformed(self.base + at, "reserved msgpack marker 0xc1"));
                }
            };
            self.take(payload)?;
            pending += children;
        }
        Ok(())
    }
}

/// Append-only msgpack encoder over a byte vector.
#[derive(Debug, Default, Clone)]
pub struct MsgWriter {
    buf: Vec<u8>,
}

fn encode_err(e: impl std::fmt::Display) -> FormatError {
    FormatError::Encode(e.to_string())
}

impl MsgWriter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn write_u64(&mut self, v: u64) -> Result<&mut Self> {
        rmp::encode::write_uint(&mut self.buf, v).map_err(encode_err)?;
        Ok(self)
    }

    pub fn write_str(&mut self, s: &str) -> Result<&mut Self> {
        rmp::encode::write_str(&mut self.buf, s).map_err(encode_err)?;
        Ok(self)
    }

    pub fn write_bin(&mut self, b: &[u8]) -> Result<&mut Self> {
        rmp::encode::write_bin(&mut self.buf, b).map_err(encode_err)?;
        Ok(self)
    }

    pub fn write_array_len(&mut self, len: u32) -> Result<&mut Self> {
        rmp::encode::write_array_len(&mut self.buf, len).map_err(encode_err)?;
        Ok(self)
    }

    /// Copies an already encoded element verbatim.
    pub fn write_raw(&mut self, element: &[u8]) -> &mut Self {
        self.buf.extend_from_slice(element);
        self
    }

    pub fn len(&self) -> usize {
        self.buf.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }

    pub fn into_bytes(self) -> Vec<u8> {
        self.buf
    }
}

/// Encodes a single unsigned integer as a standalone element.
pub fn encode_u64(v: u64) -> Result<Vec<u8>> {
    let mut w = MsgWriter::new();
    w.write_u64(v)?;
    Ok(w.into_bytes())
}

/// Encodes a single string as a standalone element.
pub fn encode_str(s: &str) -> Result<Vec<u8>> {
    let mut w = MsgWriter::new();
    w.write_str(s)?;
    Ok(w.into_bytes())
}
