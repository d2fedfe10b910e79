//! Snapshot file framing.
//!
//! A snapshot is a sequence of table blocks:
//! ```text
//! [header_len: u32 LE][msgpack table name][msgpack data_len][data]
//! ```
//! `header_len` covers the two msgpack fields. `data` is a concatenation of
//! raw msgpack key and value elements.

use crate::error::{FormatError, Result};
use crate::msgpack::{MsgReader, MsgWriter};
use byteorder::{ByteOrder, LittleEndian, WriteBytesExt};
use std::fs::File;
use std::io::{Read, Write};
use std::path::Path;

pub const HEADER_LEN_FIELD: usize = 4;

/// File name used for the snapshot taken at `version`.
pub fn file_name(version: u64) -> String {
    format!("snapshot_v{}", version)
}

/// One framed table block borrowed from a snapshot buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SnapshotBlock<'a> {
    pub table: &'a str,
    pub data: &'a [u8],
    /// Absolute offset of `data[0]`.
    pub data_offset: usize,
    /// Offset of the next block.
    pub end: usize,
}

impl<'a> SnapshotBlock<'a> {
    /// Splits the block data into raw (key, value) element pairs.
    pub fn entries(&self) -> Result<Vec<(&'a [u8], &'a [u8])>> {
        let mut r = MsgReader::new(self.data, self.data_offset);
        let mut out = Vec::new();
        while !r.is_empty() {
            let key = r.read_element()?;
            if r.is_empty() {
                return Err(FormatError::malformed(
                    r.absolute_position(),
                    format!("key without value in table {}", self.table),
                ));
            }
            let value = r.read_element()?;
            out.push((key, value));
        }
        Ok(out)
    }
}

pub fn encode_block(table: &str, data: &[u8]) -> Result<Vec<u8>> {
    let mut header = MsgWriter::new();
    header.write_str(table)?;
    header.write_u64(data.len() as u64)?;
    let header = header.into_bytes();

    let mut buf = Vec::with_capacity(HEADER_LEN_FIELD + header.len() + data.len());
    buf.write_u32::<LittleEndian>(header.len() as u32)?;
    buf.extend_from_slice(&header);
    buf.extend_from_slice(data);
    Ok(buf)
}

pub fn read_block(buf: &[u8], offset: usize) -> Result<SnapshotBlock<'_>> {
    let available = buf.len().saturating_sub(offset);
    if available < HEADER_LEN_FIELD {
        return Err(FormatError::Truncated {
            offset,
            needed: HEADER_LEN_FIELD,
            available,
        });
    }
    let header_len = LittleEndian::read_u32(&buf[offset..offset + HEADER_LEN_FIELD]) as usize;

    let header_start = offset + HEADER_LEN_FIELD;
    if available - HEADER_LEN_FIELD < header_len {
        return Err(FormatError::Truncated {
            offset: header_start,
            needed: header_len,
            available: available - HEADER_LEN_FIELD,
        });
    }

    let mut r = MsgReader::new(&buf[header_start..header_start + header_len], header_start);
    let table = r.read_str()?;
    let data_len = r.read_u64()? as usize;
    if !r.is_empty() {
        return Err(FormatError::malformed(
            r.absolute_position(),
            format!("{} trailing bytes in block header", r.remaining()),
        ));
    }

    let data_offset = header_start + header_len;
    let left = buf.len() - data_offset;
    if left < data_len {
        return Err(FormatError::Truncated {
            offset: data_offset,
            needed: data_len,
            available: left,
        });
    }

    Ok(SnapshotBlock {
        table,
        data: &buf[data_offset..data_offset + data_len],
        data_offset,
        end: data_offset + data_len,
    })
}

pub struct BlockIter<'a> {
    buf: &'a [u8],
    offset: usize,
    failed: bool,
}

impl<'a> Iterator for BlockIter<'a> {
    type Item = Result<SnapshotBlock<'a>>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.failed || self.offset >= self.buf.len() {
            return None;
        }
        match read_block(self.buf, self.offset) {
            Ok(block) => {
                self.offset = block.end;
                Some(Ok(block))
            }
            Err(e) => {
                self.failed = true;
                Some(Err(e))
            }
        }
    }
}

pub fn blocks(buf: &[u8]) -> BlockIter<'_> {
    BlockIter {
        buf,
        offset: 0,
        failed: false,
    }
}

pub fn write_to(path: impl AsRef<Path>, body: &[u8]) -> Result<()> {
    let mut file = File::create(path)?;
    file.write_all(body)?;
    file.sync_data()?;
    Ok(())
}

pub fn read_snapshot(path: impl AsRef<Path>) -> Result<Vec<u8>> {
    let mut file = File::open(path)?;
    let mut body = Vec::new();
    file.read_to_end(&mut body)?;
    Ok(body)
}
