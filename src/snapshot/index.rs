// Copyright (c) 2025 Varshith Gudur. Licensed under AGPLv3.
//! Time index over snapshots.

use crate::error::{ReplayError, Result};
use std::fmt::Debug;

/// Snapshot metadata, identical to what the catalog persists.
pub type SnapshotMeta<K> = ledger_format::CatalogEntry<K>;

/// Snapshots ordered by `index_key`, then by version. Equal keys are kept.
#[derive(Debug, Clone)]
pub struct SnapshotIndex<K> {
    entries: Vec<SnapshotMeta<K>>,
}

impl<K> Default for SnapshotIndex<K> {
    fn default() -> Self {
        Self { entries: Vec::new() }
    }
}

impl<K: Ord + Debug> SnapshotIndex<K> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Inserts in key order regardless of arrival order.
    pub fn insert(&mut self, meta: SnapshotMeta<K>) {
        let at = self
            .entries
            .partition_point(|e| (&e.index_key, e.version) <= (&meta.index_key, meta.version));
        self.entries.insert(at, meta);
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &SnapshotMeta<K>> {
        self.entries.iter()
    }

    pub fn get(&self, position: usize) -> Option<&SnapshotMeta<K>> {
        self.entries.get(position)
    }

    pub fn by_version(&self, version: u64) -> Option<&SnapshotMeta<K>> {
        self.entries.iter().find(|e| e.version == version)
    }

    /// Position of the first snapshot with `index_key >= key`.
    pub fn lower_bound_position(&self, key: &K) -> usize {
        self.entries.partition_point(|e| &e.index_key < key)
    }

    /// First snapshot with `index_key >= key`.
    pub fn lower_bound(&self, key: &K) -> Option<&SnapshotMeta<K>> {
        self.entries.get(self.lower_bound_position(key))
    }

    /// Greatest snapshot with `index_key <= key`.
    pub fn floor(&self, key: &K) -> Option<&SnapshotMeta<K>> {
        let after = self.entries.partition_point(|e| &e.index_key <= key);
        after.checked_sub(1).and_then(|i| self.entries.get(i))
    }

    /// Snapshot a range query starting at `from` replays from: the one just
    /// before `lower_bound(from)`, or the first snapshot when its key is
    /// exactly `from`.
    pub fn start_for(&self, from: &K) -> Result<&SnapshotMeta<K>> {
        let lb = self.lower_bound_position(from);
        match lb.checked_sub(1) {
            Some(i) => Ok(&self.entries[i]),
            None => match self.entries.first() {
                Some(first) if &first.index_key == from => Ok(first),
                _ => Err(ReplayError::RangePrecedesSnapshots {
                    from: format!("{:?}", from),
                }),
            },
        }
    }
}
