// Copyright (c) 2025 Varshith Gudur. Licensed under AGPLv3.
//! Deterministic signed ledgers and a history-table schema for tests.

use crate::config::{MAX_HISTORY_LEN, SIGNATURES_TABLE};
use crate::domain::{decode_value, SignatureRecord};
use crate::error::{ReplayError, Result};
use crate::ledger::Ledger;
use crate::merkle::{hash_leaf, Hash, MerkleHistory};
use crate::query::{parse_datetime, RangeExtractor};
use crate::signature::NodeCertificate;
use ed25519_dalek::{Signer, SigningKey};
use ledger_format::domain::DomainWriter;
use ledger_format::fixtures::LedgerBytes;
use ledger_format::msgpack::encode_u64;
use ledger_format::record::RecordFrame;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::Path;

pub const PRIMARY_NODE: u64 = 1;
pub const BACKUP_NODE: u64 = 2;

/// Fixed signing key per node id.
pub fn node_key(node_id: u64) -> SigningKey {
    let mut seed = [0u8; 32];
    seed[..8].copy_from_slice(&node_id.to_le_bytes());
    seed[31] = 0xC5;
    SigningKey::from_bytes(&seed)
}

pub fn registry(node_ids: &[u64]) -> HashMap<u64, NodeCertificate> {
    node_ids
        .iter()
        .map(|&id| (id, NodeCertificate::new(id, node_key(id).verifying_key())))
        .collect()
}

/// Builds a ledger while running the same Merkle history a verifier will,
/// so signature records sign the roots a reader recomputes.
pub struct SignedLedgerBuilder {
    bytes: LedgerBytes,
    history: MerkleHistory,
    max_history_len: u64,
    next_version: u64,
}

impl Default for SignedLedgerBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl SignedLedgerBuilder {
    pub fn new() -> Self {
        Self {
            bytes: LedgerBytes::new(),
            history: MerkleHistory::new(),
            max_history_len: MAX_HISTORY_LEN as u64,
            next_version: 1,
        }
    }

    pub fn with_max_history_len(mut self, max_history_len: usize) -> Self {
        self.max_history_len = max_history_len.max(1) as u64;
        self
    }

    fn take_version(&mut self) -> u64 {
        let v = self.next_version;
        self.next_version += 1;
        v
    }

    fn push_record(&mut self, public_domain: &[u8], private_domain: &[u8]) -> Result<(usize, Hash)> {
        let offset = self.bytes.push_with_private(public_domain, private_domain)?;
        let frame = RecordFrame::parse(self.bytes.bytes(), offset)?;
        let leaf = hash_leaf(&self.bytes.bytes()[frame.body_range()]);
        Ok((offset, leaf))
    }

    /// Appends a transaction writing raw msgpack elements to one table.
    pub fn write(&mut self, table: &str, writes: &[(Vec<u8>, Vec<u8>)], removes: &[Vec<u8>]) -> Result<usize> {
        let version = self.take_version();
        let mut d = DomainWriter::new(version)?;
        d.table(table, writes, removes)?;
        self.push_domain(&d.finish(), &[])
    }

    /// Appends an already encoded public domain.
    pub fn push_domain(&mut self, public_domain: &[u8], private_domain: &[u8]) -> Result<usize> {
        let (offset, leaf) = self.push_record(public_domain, private_domain)?;
        self.history.append(leaf);
        Ok(offset)
    }

    /// Appends a typed row, encoded with rmp-serde.
    pub fn write_row<K: Serialize, V: Serialize>(&mut self, table: &str, key: &K, value: &V) -> Result<usize> {
        let k = rmp_serde::to_vec(key).map_err(|e| ReplayError::Codec(e.to_string()))?;
        let v = rmp_serde::to_vec(value).map_err(|e| ReplayError::Codec(e.to_string()))?;
        self.write(table, &[(k, v)], &[])
    }

    /// Root a verifier will check the next signature against.
    pub fn pending_root(&mut self) -> Hash {
        if self.history.retained_len() > self.max_history_len {
            self.history.flush(self.max_history_len);
        }
        self.history.root()
    }

    /// Closes the current batch with a valid signature by `node_id`.
    pub fn sign(&mut self, node_id: u64) -> Result<usize> {
        let root = self.pending_root();
        let signature = node_key(node_id).sign(&root).to_bytes().to_vec();
        let mut record = SignatureRecord::new(node_id, signature);
        record.index = Some(self.history.len());
        record.root = Some(root);
        self.push_signature(&record)
    }

    /// Closes the current batch with an arbitrary signature record.
    pub fn push_signature(&mut self, record: &SignatureRecord) -> Result<usize> {
        self.pending_root();
        let version = self.take_version();
        let mut d = DomainWriter::new(version)?;
        d.table(SIGNATURES_TABLE, &[(encode_u64(0)?, record.encode()?)], &[])?;
        self.push_domain(&d.finish(), &[])
    }

    pub fn history(&self) -> &MerkleHistory {
        &self.history
    }

    pub fn offsets(&self) -> &[usize] {
        self.bytes.offsets()
    }

    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    pub fn bytes(&self) -> &[u8] {
        self.bytes.bytes()
    }

    pub fn into_ledger(self) -> Ledger {
        Ledger::from_bytes(self.bytes.into_bytes())
    }

    pub fn write_to(&self, path: impl AsRef<Path>) -> Result<()> {
        self.bytes.write_to(path)?;
        Ok(())
    }
}

/// Row of the TPC-C history table, encoded as a msgpack array.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HistoryRow {
    pub c_id: u64,
    pub c_d_id: u64,
    pub c_w_id: u64,
    pub d_id: u64,
    pub w_id: u64,
    pub date: String,
    pub amount: f64,
    pub data: String,
}

impl HistoryRow {
    pub fn new(c_id: u64, date: &str, amount: f64) -> Self {
        Self {
            c_id,
            c_d_id: 1,
            c_w_id: 1,
            d_id: 1,
            w_id: 1,
            date: date.to_string(),
            amount,
            data: format!("payment {}", c_id),
        }
    }
}

/// Indexes history rows by their date; the row key is the identifier.
pub struct HistoryExtractor {
    pub table: String,
}

impl HistoryExtractor {
    pub fn new(table: impl Into<String>) -> Self {
        Self { table: table.into() }
    }
}

impl RangeExtractor for HistoryExtractor {
    type Key = i64;
    type Id = u64;

    fn table(&self) -> &str {
        &self.table
    }

    fn extract(&self, key: &[u8], value: &[u8]) -> Result<Option<(i64, u64)>> {
        let id: u64 = decode_value(key)?;
        let row: HistoryRow = decode_value(value)?;
        Ok(Some((parse_datetime(&row.date)?, id)))
    }
}
