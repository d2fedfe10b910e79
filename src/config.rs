// Copyright (c) 2025 Varshith Gudur. Licensed under AGPLv3.
//! Configuration constants and the replay configuration file.

use crate::error::{ReplayError, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

pub use ledger_format::domain::{MAP_START_INDICATOR, SIGNATURES_TABLE};
pub use ledger_format::record::{DOMAIN_SIZE_FIELD, GCM_SIZE_IV, GCM_SIZE_TAG, TXN_SIZE_FIELD};

/// Leaves retained by the Merkle history before a flush.
pub const MAX_HISTORY_LEN: usize = 1000;

/// Table holding node identities.
pub const NODES_TABLE: &str = "ccf.nodes";

pub const DEFAULT_CATALOG_FILE: &str = "snapshots.catalog";
pub const DEFAULT_HISTORY_TABLE: &str = "tpcc.history";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReplayConfig {
    pub max_history_len: usize,
    pub snapshot_dir: PathBuf,
    pub catalog_file: String,
    /// Table whose rows carry the index key of each snapshot.
    pub history_table: String,
}

impl Default for ReplayConfig {
    fn default() -> Self {
        Self {
            max_history_len: MAX_HISTORY_LEN,
            snapshot_dir: PathBuf::from("snapshots"),
            catalog_file: DEFAULT_CATALOG_FILE.to_string(),
            history_table: DEFAULT_HISTORY_TABLE.to_string(),
        }
    }
}

impl ReplayConfig {
    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self> {
        let text = std::fs::read_to_string(path.as_ref()).map_err(|e| ReplayError::io(0, e))?;
        let config: Self = serde_json::from_str(&text)
            .map_err(|e| ReplayError::Config(format!("{}: {}", path.as_ref().display(), e)))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.max_history_len == 0 {
            return Err(ReplayError::Config("max_history_len must be at least 1".into()));
        }
        if self.catalog_file.is_empty() {
            return Err(ReplayError::Config("catalog_file must not be empty".into()));
        }
        Ok(())
    }

    pub fn catalog_path(&self) -> PathBuf {
        self.snapshot_dir.join(&self.catalog_file)
    }

    pub fn snapshot_path(&self, version: u64) -> PathBuf {
        self.snapshot_dir.join(ledger_format::snapshot::file_name(version))
    }
}
