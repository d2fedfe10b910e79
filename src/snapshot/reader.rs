// Copyright (c) 2025 Varshith Gudur. Licensed under AGPLv3.
use super::ExpectedHashes;
use crate::domain::decode_value;
use crate::error::{ReplayError, Result, VerificationFailure};
use crate::merkle::Hash;
use crate::telemetry::short_hex;
use ledger_format::snapshot::{blocks, read_snapshot, SnapshotBlock};
use serde::de::DeserializeOwned;
use std::collections::{BTreeMap, HashMap};
use std::ops::Range;
use std::path::{Path, PathBuf};

/// Key/value contents of one table in a snapshot, as raw msgpack elements.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct TableSnapshot {
    pub name: String,
    pub entries: BTreeMap<Vec<u8>, Vec<u8>>,
}

impl TableSnapshot {
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn get(&self, key: &[u8]) -> Option<&[u8]> {
        self.entries.get(key).map(Vec::as_slice)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&[u8], &[u8])> {
        self.entries.iter().map(|(k, v)| (k.as_slice(), v.as_slice()))
    }

    /// Decodes every entry into typed keys and values.
    pub fn get_as<K, V>(&self) -> Result<BTreeMap<K, V>>
    where
        K: DeserializeOwned + Ord,
        V: DeserializeOwned,
    {
        self.entries
            .iter()
            .map(|(k, v)| Ok((decode_value(k)?, decode_value(v)?)))
            .collect()
    }
}

struct Verified {
    body: Vec<u8>,
    digest: Hash,
    ranges: HashMap<String, Range<usize>>,
}

/// Reads and verifies one snapshot file.
///
/// Nothing is exposed until [`read`](Self::read) succeeds. Tables are only
/// turned into maps when first asked for.
pub struct SnapshotReader {
    version: u64,
    path: PathBuf,
    verified: Option<Verified>,
    tables: HashMap<String, TableSnapshot>,
}

impl SnapshotReader {
    pub fn open(path: impl AsRef<Path>, version: u64) -> Self {
        Self {
            version,
            path: path.as_ref().to_path_buf(),
            verified: None,
            tables: HashMap::new(),
        }
    }

    pub fn version(&self) -> u64 {
        self.version
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn is_read(&self) -> bool {
        self.verified.is_some()
    }

    /// Digest of the verified file.
    pub fn digest(&self) -> Option<Hash> {
        self.verified.as_ref().map(|v| v.digest)
    }

    /// Loads the file and checks its digest against `expected`. A no-op
    /// once it has succeeded.
    pub fn read<E: ExpectedHashes + ?Sized>(&mut self, expected: &E) -> Result<()> {
        if self.verified.is_some() {
            return Ok(());
        }

        let body = read_snapshot(&self.path)?;
        let digest: Hash = blake3::hash(&body).into();

        let Some(want) = expected.expected_hash(self.version) else {
            tracing::warn!("No expected hash for snapshot v{}", self.version);
            return Err(VerificationFailure::MissingExpectedHash { version: self.version }.into());
        };
        if digest != want {
            tracing::warn!(
                "Snapshot v{} digest {} does not match expected {}",
                self.version,
                short_hex(&digest),
                short_hex(&want)
            );
            return Err(VerificationFailure::SnapshotHash { version: self.version }.into());
        }

        let mut ranges = HashMap::new();
        for block in blocks(&body) {
            let block = block?;
            let range = block.data_offset..block.end;
            if ranges.insert(block.table.to_string(), range).is_some() {
                return Err(ReplayError::malformed(
                    block.data_offset,
                    format!("table {} appears twice in snapshot", block.table),
                ));
            }
        }

        tracing::debug!(
            "Snapshot v{} verified ({} tables, {} bytes)",
            self.version,
            ranges.len(),
            body.len()
        );
        self.verified = Some(Verified { body, digest, ranges });
        Ok(())
    }

    pub fn table_names(&self) -> Result<Vec<&str>> {
        let verified = self.verified.as_ref().ok_or(ReplayError::SnapshotNotRead {
            version: self.version,
        })?;
        let mut names: Vec<&str> = verified.ranges.keys().map(String::as_str).collect();
        names.sort_unstable();
        Ok(names)
    }

    pub fn get_table_snapshot(&mut self, table: &str) -> Result<&TableSnapshot> {
        let verified = self.verified.as_ref().ok_or(ReplayError::SnapshotNotRead {
            version: self.version,
        })?;

        if !self.tables.contains_key(table) {
            let range = verified
                .ranges
                .get(table)
                .cloned()
                .ok_or_else(|| ReplayError::TableNotInSnapshot {
                    table: table.to_string(),
                })?;
            let block = SnapshotBlock {
                table,
                data: &verified.body[range.clone()],
                data_offset: range.start,
                end: range.end,
            };
            let entries = block
                .entries()?
                .into_iter()
                .map(|(k, v)| (k.to_vec(), v.to_vec()))
                .collect();
            self.tables.insert(
                table.to_string(),
                TableSnapshot {
                    name: table.to_string(),
                    entries,
                },
            );
        }

        self.tables.get(table).ok_or_else(|| ReplayError::TableNotInSnapshot {
            table: table.to_string(),
        })
    }
}
