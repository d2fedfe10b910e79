// Copyright (c) 2025 Varshith Gudur. Licensed under AGPLv3.
use crate::domain::{Domain, TableFilter};
use crate::error::{ReplayError, Result};
use crate::merkle::Hash;
use crate::telemetry::short_hex;
use ledger_format::record::{parse_body_header, MIN_TXN_SIZE};
use ledger_format::snapshot::encode_block;
use rustc_hash::FxHashSet;
use std::collections::BTreeMap;
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Action {
    Write,
    Remove,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SnapshotSummary {
    pub version: u64,
    pub path: PathBuf,
    pub digest: Hash,
    pub bytes: u64,
    pub tables: usize,
    pub entries: usize,
}

type Entry = (Vec<u8>, Vec<u8>, Action);

/// Accumulates table updates in replay order.
#[derive(Debug, Default, Clone)]
pub struct SnapshotBuilder {
    tables: BTreeMap<String, Vec<Entry>>,
    last_version: u64,
    transactions: u64,
}

/// Latest write per key, newest first. Keys whose latest action is a
/// remove are dropped.
fn surviving(entries: &[Entry]) -> Vec<(&[u8], &[u8])> {
    let mut seen = FxHashSet::default();
    let mut out = Vec::new();
    for (key, value, action) in entries.iter().rev() {
        if !seen.insert(key.as_slice()) {
            continue;
        }
        if *action == Action::Write {
            out.push((key.as_slice(), value.as_slice()));
        }
    }
    out
}

impl SnapshotBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn append_domain(&mut self, domain: &Domain) {
        for table in &domain.tables {
            let entries = self.tables.entry(table.name.clone()).or_default();
            for (key, value) in &table.writes {
                entries.push((key.clone(), value.clone(), Action::Write));
            }
            for key in &table.removes {
                entries.push((key.clone(), Vec::new(), Action::Remove));
            }
        }
        self.last_version = domain.version;
        self.transactions += 1;
    }

    /// Appends a record body (the bytes after `txn_size`) without going
    /// through a ledger cursor.
    pub fn append_transaction(&mut self, body: &[u8]) -> Result<()> {
        let (_, domain_size) = parse_body_header(body, 0)?;
        let range = MIN_TXN_SIZE..MIN_TXN_SIZE + domain_size as usize;
        let domain = Domain::decode(&body[range], MIN_TXN_SIZE, &TableFilter::All)?;
        self.append_domain(&domain);
        Ok(())
    }

    /// Version of the most recent domain appended.
    pub fn last_version(&self) -> u64 {
        self.last_version
    }

    pub fn transactions(&self) -> u64 {
        self.transactions
    }

    pub fn table_names(&self) -> impl Iterator<Item = &str> {
        self.tables.keys().map(String::as_str)
    }

    /// Current last-write-wins state of one table.
    pub fn state(&self, table: &str) -> Vec<(&[u8], &[u8])> {
        self.tables.get(table).map(|e| surviving(e)).unwrap_or_default()
    }

    /// Largest value `extract` yields over the surviving rows of `table`.
    pub fn latest<K, F>(&self, table: &str, mut extract: F) -> Option<K>
    where
        K: Ord,
        F: FnMut(&[u8], &[u8]) -> Option<K>,
    {
        self.state(table)
            .into_iter()
            .filter_map(|(k, v)| extract(k, v))
            .max()
    }

    fn compact(&mut self) {
        for entries in self.tables.values_mut() {
            let mut kept: Vec<Entry> = surviving(entries)
                .into_iter()
                .map(|(k, v)| (k.to_vec(), v.to_vec(), Action::Write))
                .collect();
            kept.reverse();
            *entries = kept;
        }
    }

    /// Writes the snapshot file for `version` and returns its digest.
    ///
    /// The builder is compacted first, so later appends continue from the
    /// snapshotted state.
    pub fn create(&mut self, version: u64, path: impl AsRef<Path>) -> Result<SnapshotSummary> {
        let path = path.as_ref();
        self.compact();

        let file = File::create(path).map_err(|e| ReplayError::io(0, e))?;
        let mut writer = BufWriter::new(file);
        let mut hasher = blake3::Hasher::new();
        let mut written = 0u64;
        let mut entries = 0usize;

        for (name, rows) in &self.tables {
            let mut data = Vec::new();
            for (key, value, _) in rows {
                data.extend_from_slice(key);
                data.extend_from_slice(value);
            }
            let block = encode_block(name, &data)?;
            hasher.update(&block);
            writer
                .write_all(&block)
                .map_err(|e| ReplayError::io(written as usize, e))?;
            written += block.len() as u64;
            entries += rows.len();
        }

        writer.flush().map_err(|e| ReplayError::io(written as usize, e))?;
        writer
            .get_ref()
            .sync_data()
            .map_err(|e| ReplayError::io(written as usize, e))?;

        let digest: Hash = hasher.finalize().into();
        tracing::info!(
            "Snapshot v{} written to {} ({} tables, {} entries, {} bytes, digest {})",
            version,
            path.display(),
            self.tables.len(),
            entries,
            written,
            short_hex(&digest)
        );

        Ok(SnapshotSummary {
            version,
            path: path.to_path_buf(),
            digest,
            bytes: written,
            tables: self.tables.len(),
            entries,
        })
    }
}
