// Copyright (c) 2025 Varshith Gudur. Licensed under AGPLv3.
//! Point-in-time table snapshots.
//!
//! A snapshot holds the last-write-wins state of every table seen by a
//! [`SnapshotBuilder`]. Its blake3 digest is published to an
//! [`ExpectedHashes`] registry and checked again by [`SnapshotReader`].

pub mod builder;
pub mod index;
pub mod manager;
pub mod reader;

use crate::merkle::Hash;
use std::collections::HashMap;

pub use builder::{Action, SnapshotBuilder, SnapshotSummary};
pub use index::{SnapshotIndex, SnapshotMeta};
pub use manager::SnapshotManager;
pub use reader::{SnapshotReader, TableSnapshot};

/// Expected snapshot digests, keyed by snapshot version.
pub trait ExpectedHashes {
    fn expected_hash(&self, version: u64) -> Option<Hash>;
    fn publish(&mut self, version: u64, hash: Hash);
}

impl ExpectedHashes for HashMap<u64, Hash> {
    fn expected_hash(&self, version: u64) -> Option<Hash> {
        self.get(&version).copied()
    }

    fn publish(&mut self, version: u64, hash: Hash) {
        self.insert(version, hash);
    }
}
