//! Builders for ledger bytes, used by tests here and in dependent crates.

use crate::domain::DomainWriter;
use crate::error::Result;
use crate::msgpack::{encode_str, encode_u64};
use crate::record::{encode_record, GcmHeader, LedgerFileWriter};
use std::path::Path;

/// In-memory ledger assembled record by record.
#[derive(Debug, Default, Clone)]
pub struct LedgerBytes {
    buf: Vec<u8>,
    offsets: Vec<usize>,
}

impl LedgerBytes {
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends a record with a zeroed GCM header and returns its offset.
    pub fn push(&mut self, public_domain: &[u8]) -> Result<usize> {
        self.push_with_private(public_domain, &[])
    }

    pub fn push_with_private(&mut self, public_domain: &[u8], private_domain: &[u8]) -> Result<usize> {
        let offset = self.buf.len();
        // A recognisable, non-zero header so tests notice if it is ever interpreted.
        let gcm = GcmHeader {
            tag: [0x5A; 16],
            iv: [(self.offsets.len() & 0xFF) as u8; 12],
        };
        let record = encode_record(&gcm, public_domain, private_domain)?;
        self.buf.extend_from_slice(&record);
        self.offsets.push(offset);
        Ok(offset)
    }

    pub fn offsets(&self) -> &[usize] {
        &self.offsets
    }

    pub fn bytes(&self) -> &[u8] {
        &self.buf
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

    pub fn write_to(&self, path: impl AsRef<Path>) -> Result<()> {
        let mut writer = LedgerFileWriter::open(path, true)?;
        writer.append(&self.buf)?;
        Ok(())
    }
}

/// Domain with one table of `u64 -> string` writes and `u64` removes.
pub fn kv_domain(version: u64, table: &str, writes: &[(u64, &str)], removes: &[u64]) -> Result<Vec<u8>> {
    let writes = writes
        .iter()
        .map(|(k, v)| Ok((encode_u64(*k)?, encode_str(v)?)))
        .collect::<Result<Vec<_>>>()?;
    let removes = removes
        .iter()
        .map(|k| encode_u64(*k))
        .collect::<Result<Vec<_>>>()?;

    let mut d = DomainWriter::new(version)?;
    d.table(table, &writes, &removes)?;
    Ok(d.finish())
}
