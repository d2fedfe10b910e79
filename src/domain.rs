// Copyright (c) 2025 Varshith Gudur. Licensed under AGPLv3.
//! Decoded public domain of one transaction.

use crate::config::{MAP_START_INDICATOR, SIGNATURES_TABLE};
use crate::error::{ReplayError, Result};
use ledger_format::msgpack::{MsgReader, MsgWriter};
use serde::de::DeserializeOwned;
use std::collections::BTreeSet;

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct TableUpdate {
    pub name: String,
    /// Raw msgpack (key, value) elements, in write order.
    pub writes: Vec<(Vec<u8>, Vec<u8>)>,
    pub removes: Vec<Vec<u8>>,
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Domain {
    pub version: u64,
    pub tables: Vec<TableUpdate>,
}

/// Which table bodies get materialised while decoding.
///
/// Filtering never changes what is consumed, only what is kept. The
/// signatures table is always kept so batch boundaries stay visible.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum TableFilter {
    #[default]
    All,
    Only(BTreeSet<String>),
}

impl TableFilter {
    pub fn only<I, S>(tables: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        TableFilter::Only(tables.into_iter().map(Into::into).collect())
    }

    pub fn admits(&self, table: &str) -> bool {
        match self {
            TableFilter::All => true,
            TableFilter::Only(set) => table == SIGNATURES_TABLE || set.contains(table),
        }
    }
}

/// Typed view over one table's updates.
#[derive(Debug, Clone, PartialEq)]
pub struct TypedUpdates<K, V> {
    pub writes: Vec<(K, V)>,
    pub removes: Vec<K>,
}

impl<K, V> Default for TypedUpdates<K, V> {
    fn default() -> Self {
        Self {
            writes: Vec::new(),
            removes: Vec::new(),
        }
    }
}

pub(crate) fn decode_value<T: DeserializeOwned>(bytes: &[u8]) -> Result<T> {
    rmp_serde::from_slice(bytes).map_err(|e| ReplayError::Codec(e.to_string()))
}

impl Domain {
    /// Decodes a public domain. `base` is the absolute offset of `bytes[0]`
    /// and is only used to position errors.
    pub fn decode(bytes: &[u8], base: usize, filter: &TableFilter) -> Result<Self> {
        let mut r = MsgReader::new(bytes, base);
        let version = r.read_u64()?;
        let mut tables = Vec::new();

        while !r.is_empty() {
            let at = r.absolute_position();
            let marker = r.read_u64()?;
            if marker != MAP_START_INDICATOR {
                return Err(ReplayError::malformed(
                    at,
                    format!("expected table start marker {}, found {}", MAP_START_INDICATOR, marker),
                ));
            }
            let name = r.read_str()?;
            let keep = filter.admits(name);

            // Read set: version, then (key, version) pairs. Never materialised.
            let _read_version = r.read_u64()?;
            let read_count = r.read_u64()?;
            for _ in 0..read_count {
                r.skip_element()?;
                r.read_u64()?;
            }

            let write_count = r.read_u64()?;
            let mut writes = Vec::new();
            if keep {
                writes.reserve((write_count as usize).min(r.remaining() / 2));
            }
            for _ in 0..write_count {
                let key = r.read_element()?;
                let value = r.read_element()?;
                if keep {
                    writes.push((key.to_vec(), value.to_vec()));
                }
            }

            let remove_count = r.read_u64()?;
            let mut removes = Vec::new();
            for _ in 0..remove_count {
                let key = r.read_element()?;
                if keep {
                    removes.push(key.to_vec());
                }
            }

            if keep {
                tables.push(TableUpdate {
                    name: name.to_string(),
                    writes,
                    removes,
                });
            }
        }

        Ok(Self { version, tables })
    }

    pub fn table(&self, name: &str) -> Option<&TableUpdate> {
        self.tables.iter().find(|t| t.name == name)
    }

    pub fn is_signature(&self) -> bool {
        self.table(SIGNATURES_TABLE)
            .map_or(false, |t| !t.writes.is_empty())
    }

    /// The signature carried by this domain, if it is a signature transaction.
    pub fn signature(&self) -> Result<Option<SignatureRecord>> {
        match self.table(SIGNATURES_TABLE).and_then(|t| t.writes.last()) {
            Some((_, value)) => SignatureRecord::decode(value).map(Some),
            None => Ok(None),
        }
    }

    /// Decodes one table's keys and values. A table absent from the domain
    /// yields no updates.
    pub fn updates_as<K, V>(&self, table: &str) -> Result<TypedUpdates<K, V>>
    where
        K: DeserializeOwned,
        V: DeserializeOwned,
    {
        let Some(t) = self.table(table) else {
            return Ok(TypedUpdates::default());
        };
        let writes = t
            .writes
            .iter()
            .map(|(k, v)| Ok((decode_value(k)?, decode_value(v)?)))
            .collect::<Result<Vec<_>>>()?;
        let removes = t
            .removes
            .iter()
            .map(|k| decode_value(k))
            .collect::<Result<Vec<_>>>()?;
        Ok(TypedUpdates { writes, removes })
    }
}

/// Value stored in the signatures table:
/// `[raw_sig, node, index, term, commit, root, tree]`.
///
/// `raw_sig` may be a bin or a one-element array wrapping a bin. Everything
/// after `node` is optional.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct SignatureRecord {
    pub signature: Vec<u8>,
    pub node_id: u64,
    pub index: Option<u64>,
    pub term: Option<u64>,
    pub commit: Option<u64>,
    pub root: Option<[u8; 32]>,
    pub tree: Option<Vec<u8>>,
}

impl SignatureRecord {
    pub fn new(node_id: u64, signature: Vec<u8>) -> Self {
        Self {
            signature,
            node_id,
            ..Default::default()
        }
    }

    pub fn decode(bytes: &[u8]) -> Result<Self> {
        let shape = |e: ledger_format::FormatError| ReplayError::Codec(format!("signature record: {}", e));
        let mut r = MsgReader::new(bytes, 0);
        let fields = r.read_array_len().map_err(shape)?;
        if fields < 2 {
            return Err(ReplayError::Codec(format!(
                "signature record has {} fields, need at least 2",
                fields
            )));
        }

        let signature = if r.next_is_array() {
            let n = r.read_array_len().map_err(shape)?;
            if n != 1 {
                return Err(ReplayError::Codec(format!("wrapped signature has {} elements", n)));
            }
            r.read_bin().map_err(shape)?.to_vec()
        } else {
            r.read_bin().map_err(shape)?.to_vec()
        };
        let node_id = r.read_u64().map_err(shape)?;

        let mut rec = SignatureRecord::new(node_id, signature);
        let mut left = fields - 2;
        let next_u64 = |r: &mut MsgReader<'_>, left: &mut u32| -> Result<Option<u64>> {
            if *left == 0 {
                return Ok(None);
            }
            *left -= 1;
            r.read_u64().map(Some).map_err(shape)
        };
        rec.index = next_u64(&mut r, &mut left)?;
        rec.term = next_u64(&mut r, &mut left)?;
        rec.commit = next_u64(&mut r, &mut left)?;

        if left > 0 {
            left -= 1;
            let root = r.read_bin().map_err(shape)?;
            let root: [u8; 32] = root
                .try_into()
                .map_err(|_| ReplayError::Codec(format!("signed root is {} bytes, expected 32", root.len())))?;
            rec.root = Some(root);
        }
        if left > 0 {
            left -= 1;
            rec.tree = Some(r.read_bin().map_err(shape)?.to_vec());
        }
        for _ in 0..left {
            r.skip_element().map_err(shape)?;
        }
        Ok(rec)
    }

    /// Encodes the record with as many trailing fields as are set, in order.
    pub fn encode(&self) -> Result<Vec<u8>> {
        let mut tail = 0u32;
        if self.tree.is_some() {
            tail = 5;
        } else if self.root.is_some() {
            tail = 4;
        } else if self.commit.is_some() {
            tail = 3;
        } else if self.term.is_some() {
            tail = 2;
        } else if self.index.is_some() {
            tail = 1;
        }

        let mut w = MsgWriter::new();
        w.write_array_len(2 + tail)?;
        w.write_bin(&self.signature)?;
        w.write_u64(self.node_id)?;
        let numbers = [self.index, self.term, self.commit];
        for n in numbers.iter().take(tail.min(3) as usize) {
            w.write_u64(n.unwrap_or(0))?;
        }
        if tail >= 4 {
            w.write_bin(&self.root.unwrap_or([0u8; 32]))?;
        }
        if tail >= 5 {
            w.write_bin(self.tree.as_deref().unwrap_or(&[]))?;
        }
        Ok(w.into_bytes())
    }
}
