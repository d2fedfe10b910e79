// Copyright (c) 2025 Varshith Gudur. Licensed under AGPLv3.
//! Error types.

use ledger_format::FormatError;
use std::io;
use thiserror::Error;

/// A verification check that did not pass. Returned as a value at batch and
/// snapshot level; only wrapped in [`ReplayError`] when a caller asks for it.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum VerificationFailure {
    #[error("signature by node {node_id} at offset {offset} does not cover the batch root")]
    BatchSignature { node_id: u64, offset: usize },
    #[error("{records} records from offset {offset} are not closed by a signature")]
    UnsignedBatch { offset: usize, records: usize },
    #[error("snapshot v{version} content hash mismatch")]
    SnapshotHash { version: u64 },
    #[error("no expected hash registered for snapshot v{version}")]
    MissingExpectedHash { version: u64 },
}

#[derive(Error, Debug)]
pub enum ReplayError {
    #[error("Malformed record at offset {offset}: {reason}")]
    MalformedRecord { offset: usize, reason: String },

    #[error("Offset {offset} is not a record boundary")]
    InvalidOffset { offset: usize },

    #[error("Node {node_id} not found in registry")]
    NodeNotFound { node_id: u64 },

    #[error("Verification failed: {0}")]
    VerificationFailed(VerificationFailure),

    #[error("IO error at offset {offset}: {source}")]
    IoFailure {
        offset: usize,
        #[source]
        source: io::Error,
    },

    #[error("Range starting at {from} precedes the earliest snapshot")]
    RangePrecedesSnapshots { from: String },

    #[error("Inverted range: {to} is before {from}")]
    InvertedRange { from: String, to: String },

    #[error("Snapshot v{version} has not been read")]
    SnapshotNotRead { version: u64 },

    #[error("Table {table} not in snapshot")]
    TableNotInSnapshot { table: String },

    #[error("Codec error: {0}")]
    Codec(String),

    #[error("Config error: {0}")]
    Config(String),
}

impl ReplayError {
    pub fn io(offset: usize, source: io::Error) -> Self {
        ReplayError::IoFailure { offset, source }
    }

    pub(crate) fn malformed(offset: usize, reason: impl Into<String>) -> Self {
        ReplayError::MalformedRecord {
            offset,
            reason: reason.into(),
        }
    }

    /// True for the verification outcomes (as opposed to decode or I/O faults).
    pub fn is_verification(&self) -> bool {
        matches!(
            self,
            ReplayError::VerificationFailed(_) | ReplayError::NodeNotFound { .. }
        )
    }
}

impl From<FormatError> for ReplayError {
    fn from(e: FormatError) -> Self {
        match e {
            FormatError::Truncated {
                offset,
                needed,
                available,
            } => ReplayError::malformed(
                offset,
                format!("input ends mid-record: needed {} bytes, {} available", needed, available),
            ),
            FormatError::Malformed { offset, reason } => ReplayError::MalformedRecord { offset, reason },
            FormatError::ChecksumMismatch { expected, found } => ReplayError::Codec(format!(
                "catalog checksum mismatch: expected {:016x}, found {:016x}",
                expected, found
            )),
            FormatError::IoError(source) => ReplayError::IoFailure { offset: 0, source },
            FormatError::Encode(msg) => ReplayError::Codec(msg),
        }
    }
}

impl From<VerificationFailure> for ReplayError {
    fn from(f: VerificationFailure) -> Self {
        ReplayError::VerificationFailed(f)
    }
}

pub type Result<T> = std::result::Result<T, ReplayError>;
