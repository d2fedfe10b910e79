// Copyright (c) 2025 Varshith Gudur. Licensed under AGPLv3.
use super::builder::SnapshotBuilder;
use super::index::{SnapshotIndex, SnapshotMeta};
use super::reader::SnapshotReader;
use super::ExpectedHashes;
use crate::config::ReplayConfig;
use crate::error::{ReplayError, Result};
use crate::merkle::Hash;
use crate::query::RangeExtractor;
use ledger_format::catalog;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::fmt::Debug;
use std::path::{Path, PathBuf};
use tracing::{info, warn};

/// Owns the snapshot directory, its catalog and the in-memory time index.
///
/// Single writer: `create_snapshot` and `register` append to the catalog
/// and the index without locking. Callers producing snapshots from more
/// than one thread must serialise those calls themselves.
pub struct SnapshotManager<K> {
    dir: PathBuf,
    catalog_path: PathBuf,
    index: SnapshotIndex<K>,
}

impl<K> SnapshotManager<K>
where
    K: Ord + Clone + Debug + Serialize + DeserializeOwned,
{
    /// Opens the snapshot directory and rebuilds the index from its catalog.
    pub fn open(config: &ReplayConfig) -> Result<Self> {
        std::fs::create_dir_all(&config.snapshot_dir).map_err(|e| ReplayError::io(0, e))?;
        let catalog_path = config.catalog_path();

        let mut index = SnapshotIndex::new();
        for entry in catalog::read_all::<K>(&catalog_path)? {
            index.insert(entry);
        }
        info!(
            "Snapshot catalog {} loaded ({} snapshots)",
            catalog_path.display(),
            index.len()
        );

        Ok(Self {
            dir: config.snapshot_dir.clone(),
            catalog_path,
            index,
        })
    }

    pub fn index(&self) -> &SnapshotIndex<K> {
        &self.index
    }

    pub fn snapshot_path(&self, version: u64) -> PathBuf {
        self.dir.join(ledger_format::snapshot::file_name(version))
    }

    /// Writes the builder's state as snapshot `version`, anchored at
    /// `ledger_offset`, and publishes its digest to `hashes`.
    ///
    /// A snapshot without an index key cannot serve range queries: it is
    /// logged and dropped, nothing is written, and `None` is returned.
    pub fn create_snapshot<E: ExpectedHashes + ?Sized>(
        &mut self,
        builder: &mut SnapshotBuilder,
        version: u64,
        ledger_offset: u64,
        index_key: Option<K>,
        hashes: &mut E,
    ) -> Result<Option<SnapshotMeta<K>>> {
        let Some(index_key) = index_key else {
            warn!("Snapshot v{} has no index key; dropped", version);
            return Ok(None);
        };

        let summary = builder.create(version, self.snapshot_path(version))?;
        hashes.publish(version, summary.digest);

        let meta = SnapshotMeta {
            version,
            ledger_offset,
            index_key,
            content_hash: summary.digest,
            path: summary.path,
        };
        self.record(meta.clone())?;
        Ok(Some(meta))
    }

    /// Like [`create_snapshot`](Self::create_snapshot), taking the index key
    /// as the largest key `extractor` finds in the builder's current state.
    pub fn create_anchored<X, E>(
        &mut self,
        builder: &mut SnapshotBuilder,
        version: u64,
        ledger_offset: u64,
        extractor: &X,
        hashes: &mut E,
    ) -> Result<Option<SnapshotMeta<K>>>
    where
        X: RangeExtractor<Key = K>,
        E: ExpectedHashes + ?Sized,
    {
        let mut failure = None;
        let index_key = builder.latest(extractor.table(), |key, value| match extractor.extract(key, value) {
            Ok(found) => found.map(|(k, _)| k),
            Err(e) => {
                failure.get_or_insert(e);
                None
            }
        });
        if let Some(e) = failure {
            return Err(e);
        }
        self.create_snapshot(builder, version, ledger_offset, index_key, hashes)
    }

    /// Indexes a snapshot produced elsewhere. Returns `false` if it was
    /// dropped for lack of an index key.
    pub fn register(
        &mut self,
        version: u64,
        ledger_offset: u64,
        path: impl AsRef<Path>,
        content_hash: Hash,
        index_key: Option<K>,
    ) -> Result<bool> {
        let Some(index_key) = index_key else {
            warn!("Snapshot v{} has no index key; dropped", version);
            return Ok(false);
        };
        self.record(SnapshotMeta {
            version,
            ledger_offset,
            index_key,
            content_hash,
            path: path.as_ref().to_path_buf(),
        })?;
        Ok(true)
    }

    fn record(&mut self, meta: SnapshotMeta<K>) -> Result<()> {
        catalog::append_entry(&self.catalog_path, &meta)?;
        info!(
            "Indexed snapshot v{} at key {:?}, ledger offset {}",
            meta.version, meta.index_key, meta.ledger_offset
        );
        self.index.insert(meta);
        Ok(())
    }

    /// Snapshot a range query starting at `from` should begin with.
    pub fn start_for(&self, from: &K) -> Result<&SnapshotMeta<K>> {
        self.index.start_for(from)
    }

    pub fn reader_for(&self, meta: &SnapshotMeta<K>) -> SnapshotReader {
        SnapshotReader::open(&meta.path, meta.version)
    }
}
