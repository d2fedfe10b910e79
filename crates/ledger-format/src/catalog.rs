//! Append-only snapshot catalog.
//!
//! Each entry is framed as
//! `[payload_len: u32][payload_crc64: u64][header_crc64: u64][payload]` where
//! the payload is a bincode (serde) encoding of [`CatalogEntry`] and
//! `header_crc64` covers the twelve bytes before it. A torn trailing entry
//! (crash mid-append) ends the scan. Any checksum mismatch is an error, so a
//! damaged length field is never mistaken for a torn tail.

use crate::error::{FormatError, Result};
use byteorder::{ByteOrder, LittleEndian, WriteBytesExt};
use crc64fast::Digest;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::fs::OpenOptions;
use std::io::{self, Write};
use std::path::{Path, PathBuf};

pub const ENTRY_HEADER_SIZE: usize = 4 + 8 + 8;

/// Bytes of the header covered by the header checksum.
const HEADER_BODY_SIZE: usize = 4 + 8;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CatalogEntry<K> {
    pub version: u64,
    pub ledger_offset: u64,
    pub index_key: K,
    pub content_hash: [u8; 32],
    pub path: PathBuf,
}

fn checksum(payload: &[u8]) -> u64 {
    let mut digest = Digest::new();
    digest.write(payload);
    digest.sum64()
}

pub fn append_entry<K: Serialize>(path: impl AsRef<Path>, entry: &CatalogEntry<K>) -> Result<()> {
    let payload = bincode::serde::encode_to_vec(entry, bincode::config::standard())
        .map_err(|e| FormatError::Encode(e.to_string()))?;

    let mut file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)?;

    let mut buf = Vec::with_capacity(ENTRY_HEADER_SIZE + payload.len());
    buf.write_u32::<LittleEndian>(payload.len() as u32)?;
    buf.write_u64::<LittleEndian>(checksum(&payload))?;
    let header_crc = checksum(&buf[..HEADER_BODY_SIZE]);
    buf.write_u64::<LittleEndian>(header_crc)?;
    buf.extend_from_slice(&payload);

    file.write_all(&buf)?;
    file.sync_data()?;
    Ok(())
}

/// Reads every complete entry. A missing file is an empty catalog.
pub fn read_all<K: DeserializeOwned>(path: impl AsRef<Path>) -> Result<Vec<CatalogEntry<K>>> {
    let bytes = match std::fs::read(path) {
        Ok(b) => b,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(e) => return Err(e.into()),
    };
    let mut entries = Vec::new();
    let mut offset = 0;

    while offset < bytes.len() {
        let Some(header) = bytes.get(offset..offset + ENTRY_HEADER_SIZE) else {
            break;
        };
        let expected_header = LittleEndian::read_u64(&header[HEADER_BODY_SIZE..]);
        let found_header = checksum(&header[..HEADER_BODY_SIZE]);
        if found_header != expected_header {
            return Err(FormatError::ChecksumMismatch {
                expected: expected_header,
                found: found_header,
            });
        }
        let len = LittleEndian::read_u32(&header[..4]) as usize;
        let expected = LittleEndian::read_u64(&header[4..HEADER_BODY_SIZE]);

        let start = offset + ENTRY_HEADER_SIZE;
        // The header is intact, so an overrun can only be a torn append.
        if len > bytes.len() - start {
            break;
        }
        let payload = &bytes[start..start + len];

        let found = checksum(payload);
        if found != expected {
            return Err(FormatError::ChecksumMismatch { expected, found });
        }

        let (entry, _) = bincode::serde::decode_from_slice(payload, bincode::config::standard())
            .map_err(|e| FormatError::Encode(e.to_string()))?;
        entries.push(entry);
        offset = start + len;
    }

    Ok(entries)
}
