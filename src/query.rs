// Copyright (c) 2025 Varshith Gudur. Licensed under AGPLv3.
//! History range queries.
//!
//! Every mode answers the same question: which rows of one table have an
//! index key within `[from, to]`. They differ in where the rows come from.

use crate::batch::VerifiedBatchReader;
use crate::config::MAX_HISTORY_LEN;
use crate::domain::Domain;
use crate::error::{ReplayError, Result};
use crate::ledger::{Ledger, LedgerCursor};
use crate::signature::NodeRegistry;
use crate::snapshot::{ExpectedHashes, SnapshotManager};
use chrono::NaiveDateTime;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::collections::{BTreeMap, HashMap};
use std::fmt::Debug;
use tracing::info;

pub const DATETIME_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// Parses `YYYY-MM-DD HH:MM:SS` (UTC) into a unix timestamp.
pub fn parse_datetime(text: &str) -> Result<i64> {
    NaiveDateTime::parse_from_str(text, DATETIME_FORMAT)
        .map(|dt| dt.and_utc().timestamp())
        .map_err(|e| ReplayError::Codec(format!("invalid datetime {:?}: {}", text, e)))
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueryMode {
    LiveStore,
    LedgerReplay,
    VerifiedLedgerReplay,
    SnapshotPlusReplay,
}

/// Iteration interface of the live key-value store.
pub trait LiveStore {
    fn entries(&self, table: &str) -> Result<Vec<(Vec<u8>, Vec<u8>)>>;
}

impl LiveStore for HashMap<String, BTreeMap<Vec<u8>, Vec<u8>>> {
    fn entries(&self, table: &str) -> Result<Vec<(Vec<u8>, Vec<u8>)>> {
        Ok(self
            .get(table)
            .map(|t| t.iter().map(|(k, v)| (k.clone(), v.clone())).collect())
            .unwrap_or_default())
    }
}

/// Pulls the index key and the record identifier out of one table row.
pub trait RangeExtractor {
    type Key: Ord + Clone + Debug + Serialize + DeserializeOwned;
    type Id: Clone;

    fn table(&self) -> &str;

    /// `None` for rows that carry no index key.
    fn extract(&self, key: &[u8], value: &[u8]) -> Result<Option<(Self::Key, Self::Id)>>;
}

pub struct HistoryQuery<'a, E: RangeExtractor> {
    extractor: E,
    ledger: Option<&'a Ledger>,
    live: Option<&'a dyn LiveStore>,
    registry: Option<&'a dyn NodeRegistry>,
    snapshots: Option<(&'a SnapshotManager<E::Key>, &'a dyn ExpectedHashes)>,
    max_history_len: usize,
}

impl<'a, E: RangeExtractor> HistoryQuery<'a, E> {
    pub fn new(extractor: E) -> Self {
        Self {
            extractor,
            ledger: None,
            live: None,
            registry: None,
            snapshots: None,
            max_history_len: MAX_HISTORY_LEN,
        }
    }

    pub fn with_ledger(mut self, ledger: &'a Ledger) -> Self {
        self.ledger = Some(ledger);
        self
    }

    pub fn with_live_store(mut self, live: &'a dyn LiveStore) -> Self {
        self.live = Some(live);
        self
    }

    pub fn with_registry(mut self, registry: &'a dyn NodeRegistry) -> Self {
        self.registry = Some(registry);
        self
    }

    pub fn with_snapshots(mut self, manager: &'a SnapshotManager<E::Key>, hashes: &'a dyn ExpectedHashes) -> Self {
        self.snapshots = Some((manager, hashes));
        self
    }

    pub fn with_max_history_len(mut self, max_history_len: usize) -> Self {
        self.max_history_len = max_history_len;
        self
    }

    fn ledger(&self, mode: QueryMode) -> Result<&'a Ledger> {
        self.ledger
            .ok_or_else(|| ReplayError::Config(format!("{:?} query needs a ledger", mode)))
    }

    pub fn query_by_time_range(&self, from: &E::Key, to: &E::Key, mode: QueryMode) -> Result<Vec<E::Id>> {
        if to < from {
            return Err(ReplayError::InvertedRange {
                from: format!("{:?}", from),
                to: format!("{:?}", to),
            });
        }
        info!("{:?} query on {} for [{:?}, {:?}]", mode, self.extractor.table(), from, to);

        let mut out = Vec::new();
        match mode {
            QueryMode::LiveStore => {
                let live = self
                    .live
                    .ok_or_else(|| ReplayError::Config("LiveStore query needs a live store".into()))?;
                let rows = live.entries(self.extractor.table())?;
                self.collect_sorted(rows.iter().map(|(k, v)| (k.as_slice(), v.as_slice())), from, to, &mut out)?;
            }
            QueryMode::LedgerReplay => {
                let ledger = self.ledger(mode)?;
                self.replay(ledger.cursor(), from, to, &mut out)?;
            }
            QueryMode::VerifiedLedgerReplay => {
                let ledger = self.ledger(mode)?;
                let registry = self
                    .registry
                    .ok_or_else(|| ReplayError::Config("verified query needs a node registry".into()))?;
                let mut reader =
                    VerifiedBatchReader::new(ledger, registry).with_max_history_len(self.max_history_len);
                'batches: while reader.has_next() {
                    let batch = reader.read_batch(true)?.into_result()?;
                    for domain in &batch.domains {
                        if !self.scan(domain, from, to, &mut out)? {
                            break 'batches;
                        }
                    }
                }
            }
            QueryMode::SnapshotPlusReplay => {
                let ledger = self.ledger(mode)?;
                let (manager, hashes) = self
                    .snapshots
                    .ok_or_else(|| ReplayError::Config("snapshot query needs a snapshot manager".into()))?;
                let meta = manager.start_for(from)?;
                let mut reader = manager.reader_for(meta);
                reader.read(hashes)?;

                match reader.get_table_snapshot(self.extractor.table()) {
                    Ok(table) => self.collect_sorted(table.iter(), from, to, &mut out)?,
                    Err(ReplayError::TableNotInSnapshot { .. }) => {}
                    Err(e) => return Err(e),
                }

                let cursor = ledger.cursor_at(meta.ledger_offset as usize)?;
                self.replay(cursor, from, to, &mut out)?;
            }
        }

        info!("{:?} query matched {} records", mode, out.len());
        Ok(out)
    }

    /// Collects in-range rows ordered by key.
    fn collect_sorted<'r, I>(&self, rows: I, from: &E::Key, to: &E::Key, out: &mut Vec<E::Id>) -> Result<()>
    where
        I: Iterator<Item = (&'r [u8], &'r [u8])>,
    {
        let mut hits = Vec::new();
        for (key, value) in rows {
            if let Some((k, id)) = self.extractor.extract(key, value)? {
                if &k >= from && &k <= to {
                    hits.push((k, id));
                }
            }
        }
        hits.sort_by(|a, b| a.0.cmp(&b.0));
        out.extend(hits.into_iter().map(|(_, id)| id));
        Ok(())
    }

    fn replay(&self, mut cursor: LedgerCursor<'_>, from: &E::Key, to: &E::Key, out: &mut Vec<E::Id>) -> Result<()> {
        while cursor.has_next() {
            if !self.scan(cursor.domain()?, from, to, out)? {
                break;
            }
            cursor.advance()?;
        }
        Ok(())
    }

    /// Returns `false` once a row past `to` is seen.
    fn scan(&self, domain: &Domain, from: &E::Key, to: &E::Key, out: &mut Vec<E::Id>) -> Result<bool> {
        let Some(table) = domain.table(self.extractor.table()) else {
            return Ok(true);
        };
        for (key, value) in &table.writes {
            if let Some((k, id)) = self.extractor.extract(key, value)? {
                if &k > to {
                    return Ok(false);
                }
                if &k >= from {
                    out.push(id);
                }
            }
        }
        Ok(true)
    }
}
