//! Encoder for the public domain of a transaction record.
//!
//! ```text
//! version
//! repeated per table:
//!   MAP_START_INDICATOR, name,
//!   read_version, read_count, read_count x (key, version),
//!   write_count, write_count x (key, value),
//!   remove_count, remove_count x key
//! ```
//! Keys and values are raw msgpack elements copied verbatim.

use crate::error::Result;
use crate::msgpack::MsgWriter;

/// Marker written before every table block.
pub const MAP_START_INDICATOR: u64 = 1 << 1;

/// Name of the table holding node signatures.
pub const SIGNATURES_TABLE: &str = "ccf.signatures";

pub struct DomainWriter {
    w: MsgWriter,
    tables: usize,
}

impl DomainWriter {
    pub fn new(version: u64) -> Result<Self> {
        let mut w = MsgWriter::new();
        w.write_u64(version)?;
        Ok(Self { w, tables: 0 })
    }

    /// Appends a table block with no read set.
    pub fn table(
        &mut self,
        name: &str,
        writes: &[(Vec<u8>, Vec<u8>)],
        removes: &[Vec<u8>],
    ) -> Result<&mut Self> {
        self.table_with_reads(name, 0, &[], writes, removes)
    }

    pub fn table_with_reads(
        &mut self,
        name: &str,
        read_version: u64,
        reads: &[(Vec<u8>, u64)],
        writes: &[(Vec<u8>, Vec<u8>)],
        removes: &[Vec<u8>],
    ) -> Result<&mut Self> {
        self.w.write_u64(MAP_START_INDICATOR)?;
        self.w.write_str(name)?;

        self.w.write_u64(read_version)?;
        self.w.write_u64(reads.len() as u64)?;
        for (key, version) in reads {
            self.w.write_raw(key);
            self.w.write_u64(*version)?;
        }

        self.w.write_u64(writes.len() as u64)?;
        for (key, value) in writes {
            self.w.write_raw(key);
            self.w.write_raw(value);
        }

        self.w.write_u64(removes.len() as u64)?;
        for key in removes {
            self.w.write_raw(key);
        }

        self.tables += 1;
        Ok(self)
    }

    pub fn table_count(&self) -> usize {
        self.tables
    }

    pub fn finish(self) -> Vec<u8> {
        self.w.into_bytes()
    }
}
