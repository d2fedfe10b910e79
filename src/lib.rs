// Copyright (c) 2025 Varshith Gudur. Licensed under AGPLv3.

//! ledger-replay: decode, verify and snapshot an append-only signed ledger,
//! and answer history range queries over it.
//!
//! Records are decoded by [`ledger`], bound to node signatures by [`batch`]
//! through the [`merkle`] history, and folded into hash-verified table dumps
//! by [`snapshot`]. [`query`] combines the three.

pub mod config;
pub mod error;
pub mod telemetry;
pub mod domain;
pub mod ledger;
pub mod merkle;
pub mod signature;
pub mod batch;
pub mod snapshot;
pub mod query;
pub mod fixtures;

pub use batch::{verify_ledger, Batch, BatchOutcome, BatchRejection, VerificationReport, VerifiedBatchReader};
pub use config::ReplayConfig;
pub use domain::{Domain, SignatureRecord, TableFilter, TableUpdate};
pub use error::{ReplayError, Result, VerificationFailure};
pub use ledger::{Ledger, LedgerCursor, LedgerPosition};
pub use merkle::{Hash, MerkleCheckpoint, MerkleHistory, Receipt};
pub use query::{HistoryQuery, QueryMode};
pub use signature::{NodeCertificate, NodeRegistry, Verdict};

#[cfg(test)]
pub mod tests;
