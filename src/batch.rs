// Copyright (c) 2025 Varshith Gudur. Licensed under AGPLv3.
//! Verified batch reader.
//!
//! A batch is every record up to and including the next signature
//! transaction. Leaf order per batch:
//! 1. append the leaves of all records before the signature,
//! 2. flush down to `max_history_len` retained leaves if over,
//! 3. compute the root and check the signature over it,
//! 4. append the signature record's own leaf.

use crate::config::{ReplayConfig, MAX_HISTORY_LEN};
use crate::domain::{Domain, SignatureRecord};
use crate::error::{ReplayError, Result, VerificationFailure};
use crate::ledger::{Ledger, LedgerCursor, LedgerPosition};
use crate::merkle::{hash_leaf, Hash, MerkleCheckpoint, MerkleHistory};
use crate::signature::{verify_root, NodeRegistry, Verdict};
use crate::telemetry::short_hex;
use tracing::{debug, info, warn};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Batch {
    /// Offset of the first record.
    pub start: usize,
    /// Offset just past the last record.
    pub end: usize,
    pub domains: Vec<Domain>,
    /// `None` only for an unverified, unsigned tail.
    pub signature: Option<SignatureRecord>,
    /// Root the signature was checked against.
    pub root: Option<Hash>,
}

impl Batch {
    pub fn len(&self) -> usize {
        self.domains.len()
    }

    pub fn is_empty(&self) -> bool {
        self.domains.is_empty()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BatchRejection {
    NodeNotFound { node_id: u64, offset: usize },
    Verification(VerificationFailure),
}

impl BatchRejection {
    pub fn into_error(self) -> ReplayError {
        match self {
            BatchRejection::NodeNotFound { node_id, .. } => ReplayError::NodeNotFound { node_id },
            BatchRejection::Verification(f) => ReplayError::VerificationFailed(f),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BatchOutcome {
    Complete(Batch),
    Rejected(BatchRejection),
}

impl BatchOutcome {
    pub fn into_result(self) -> Result<Batch> {
        match self {
            BatchOutcome::Complete(batch) => Ok(batch),
            BatchOutcome::Rejected(rejection) => Err(rejection.into_error()),
        }
    }

    pub fn is_complete(&self) -> bool {
        matches!(self, BatchOutcome::Complete(_))
    }
}

pub struct VerifiedBatchReader<'a, R> {
    cursor: LedgerCursor<'a>,
    history: MerkleHistory,
    registry: R,
    max_history_len: u64,
    halted: bool,
}

impl<'a, R: NodeRegistry> VerifiedBatchReader<'a, R> {
    pub fn new(ledger: &'a Ledger, registry: R) -> Self {
        Self {
            cursor: ledger.cursor(),
            history: MerkleHistory::new(),
            registry,
            max_history_len: MAX_HISTORY_LEN as u64,
            halted: false,
        }
    }

    /// Resumes at `offset` with the Merkle frontier saved when the reader
    /// last stood there.
    pub fn resume(ledger: &'a Ledger, offset: usize, checkpoint: MerkleCheckpoint, registry: R) -> Result<Self> {
        let history = MerkleHistory::from_checkpoint(checkpoint)?;
        Self::at(ledger, offset, history, registry)
    }

    /// Resumes at `offset` from a previously computed root.
    pub fn seeded(ledger: &'a Ledger, offset: usize, root: Hash, registry: R) -> Result<Self> {
        Self::at(ledger, offset, MerkleHistory::seeded(root), registry)
    }

    fn at(ledger: &'a Ledger, offset: usize, history: MerkleHistory, registry: R) -> Result<Self> {
        Ok(Self {
            cursor: ledger.cursor_at(offset)?,
            history,
            registry,
            max_history_len: MAX_HISTORY_LEN as u64,
            halted: false,
        })
    }

    pub fn with_max_history_len(mut self, max_history_len: usize) -> Self {
        self.max_history_len = max_history_len.max(1) as u64;
        self
    }

    /// False at the end of the ledger and after a rejected batch.
    pub fn has_next(&self) -> bool {
        !self.halted && self.cursor.has_next()
    }

    pub fn position(&self) -> LedgerPosition {
        self.cursor.position()
    }

    pub fn history(&self) -> &MerkleHistory {
        &self.history
    }

    /// Reads the next batch. At the end of the ledger this returns an empty
    /// complete batch. An error halts the reader like a rejection does: the
    /// history already holds leaves of the unfinished batch.
    pub fn read_batch(&mut self, verify: bool) -> Result<BatchOutcome> {
        let outcome = self.next_batch(verify);
        if outcome.is_err() {
            self.halted = true;
        }
        outcome
    }

    fn next_batch(&mut self, verify: bool) -> Result<BatchOutcome> {
        let start = self.cursor.offset();
        let mut domains = Vec::new();

        while self.cursor.has_next() {
            let offset = self.cursor.offset();
            let raw = self.cursor.raw_bytes()?;
            let domain = self.cursor.take_domain()?;
            self.cursor.advance()?;

            if !domain.is_signature() {
                self.history.append(hash_leaf(raw));
                domains.push(domain);
                continue;
            }

            let signature = match domain.signature() {
                Ok(Some(sig)) => sig,
                Ok(None) => return Err(ReplayError::malformed(offset, "signature transaction without a signature")),
                Err(e) => return Err(ReplayError::malformed(offset, e.to_string())),
            };

            if self.history.retained_len() > self.max_history_len {
                self.history.flush(self.max_history_len);
            }
            let root = self.history.root();

            if verify {
                if let Some(rejection) = self.check(&signature, &root, offset) {
                    self.halted = true;
                    return Ok(BatchOutcome::Rejected(rejection));
                }
            }

            self.history.append(hash_leaf(raw));
            domains.push(domain);
            debug!(
                "Batch [{}, {}): {} records, node {}, root {}",
                start,
                self.cursor.offset(),
                domains.len(),
                signature.node_id,
                short_hex(&root)
            );
            return Ok(BatchOutcome::Complete(Batch {
                start,
                end: self.cursor.offset(),
                domains,
                signature: Some(signature),
                root: Some(root),
            }));
        }

        if verify && !domains.is_empty() {
            warn!("{} trailing records from offset {} have no signature", domains.len(), start);
            self.halted = true;
            return Ok(BatchOutcome::Rejected(BatchRejection::Verification(
                VerificationFailure::UnsignedBatch {
                    offset: start,
                    records: domains.len(),
                },
            )));
        }

        Ok(BatchOutcome::Complete(Batch {
            start,
            end: self.cursor.offset(),
            domains,
            signature: None,
            root: None,
        }))
    }

    fn check(&self, signature: &SignatureRecord, root: &Hash, offset: usize) -> Option<BatchRejection> {
        let Some(cert) = self.registry.certificate(signature.node_id) else {
            warn!("Signature at {} names unknown node {}", offset, signature.node_id);
            return Some(BatchRejection::NodeNotFound {
                node_id: signature.node_id,
                offset,
            });
        };
        match verify_root(&cert, root, &signature.signature) {
            Verdict::Valid => None,
            Verdict::Invalid => {
                warn!(
                    "Signature at {} by node {} does not match root {}",
                    offset,
                    signature.node_id,
                    short_hex(root)
                );
                Some(BatchRejection::Verification(VerificationFailure::BatchSignature {
                    node_id: signature.node_id,
                    offset,
                }))
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VerificationReport {
    pub batches: usize,
    pub records: usize,
    /// Root after the last complete batch, signature leaf included.
    pub last_root: Hash,
    /// Offset just past the last complete batch.
    pub verified_to: usize,
    pub rejection: Option<BatchRejection>,
}

impl VerificationReport {
    pub fn is_valid(&self) -> bool {
        self.rejection.is_none()
    }
}

/// Verifies every batch of `ledger`, stopping at the first rejection.
pub fn verify_ledger<R: NodeRegistry>(ledger: &Ledger, registry: R, config: &ReplayConfig) -> Result<VerificationReport> {
    let mut reader = VerifiedBatchReader::new(ledger, registry).with_max_history_len(config.max_history_len);
    let mut report = VerificationReport {
        batches: 0,
        records: 0,
        last_root: reader.history().root(),
        verified_to: 0,
        rejection: None,
    };

    info!("Verifying ledger ({} bytes)", ledger.len());
    while reader.has_next() {
        match reader.read_batch(true)? {
            BatchOutcome::Complete(batch) => {
                report.batches += 1;
                report.records += batch.len();
                report.verified_to = batch.end;
                report.last_root = reader.history().root();
            }
            BatchOutcome::Rejected(rejection) => {
                report.rejection = Some(rejection);
                break;
            }
        }
    }

    info!(
        "Verified {} batches ({} records) up to offset {}, root {}",
        report.batches,
        report.records,
        report.verified_to,
        short_hex(&report.last_root)
    );
    Ok(report)
}
