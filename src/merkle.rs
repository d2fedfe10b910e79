// Copyright (c) 2025 Varshith Gudur. Licensed under AGPLv3.
//! Incremental Merkle history over ledger records.
//!
//! One leaf per transaction, `leaf = blake3(record body)`. Interior nodes are
//! `blake3(0x01 || left || right)`. The root has the RFC 6962 shape: the tree
//! over `n` leaves splits at the largest power of two below `n`.
//!
//! Nodes are kept per level. Flushing drops old nodes but never the peaks or
//! the pending left siblings, so the root and all future roots are unchanged.

use crate::error::{ReplayError, Result};
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::path::Path;

pub type Hash = [u8; 32];

const DOMAIN_INTERNAL: u8 = 0x01;

/// Root of a tree with no leaves.
pub const EMPTY_ROOT: Hash = [0u8; 32];

pub fn hash_leaf(raw: &[u8]) -> Hash {
    blake3::hash(raw).into()
}

pub fn hash_internal(left: &Hash, right: &Hash) -> Hash {
    let mut data = [0u8; 1 + 32 + 32];
    data[0] = DOMAIN_INTERNAL;
    data[1..33].copy_from_slice(left);
    data[33..].copy_from_slice(right);
    blake3::hash(&data).into()
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
struct Level {
    /// Index (within the level) of `nodes[0]`.
    first: u64,
    nodes: VecDeque<Hash>,
}

impl Level {
    fn get(&self, index: u64) -> Option<&Hash> {
        index
            .checked_sub(self.first)
            .and_then(|i| self.nodes.get(i as usize))
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MerkleHistory {
    levels: Vec<Level>,
    size: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Side {
    Left,
    Right,
}

/// Inclusion proof for one leaf.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Receipt {
    pub index: u64,
    pub leaf: Hash,
    pub path: Vec<(Side, Hash)>,
}

impl Receipt {
    pub fn compute_root(&self) -> Hash {
        self.path.iter().fold(self.leaf, |acc, (side, h)| match side {
            Side::Left => hash_internal(h, &acc),
            Side::Right => hash_internal(&acc, h),
        })
    }

    pub fn verify(&self, root: &Hash) -> bool {
        &self.compute_root() == root
    }
}

/// Serializable frontier of a [`MerkleHistory`]: enough to keep appending
/// and computing roots, nothing more.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MerkleCheckpoint {
    size: u64,
    levels: Vec<Level>,
}

impl MerkleCheckpoint {
    pub fn size(&self) -> u64 {
        self.size
    }

    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        let bytes = bincode::serde::encode_to_vec(self, bincode::config::standard())
            .map_err(|e| ReplayError::Codec(e.to_string()))?;
        std::fs::write(path, bytes).map_err(|e| ReplayError::io(0, e))
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let bytes = std::fs::read(path).map_err(|e| ReplayError::io(0, e))?;
        let (checkpoint, _) = bincode::serde::decode_from_slice(&bytes, bincode::config::standard())
            .map_err(|e| ReplayError::Codec(e.to_string()))?;
        Ok(checkpoint)
    }
}

impl MerkleHistory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Partial tree continuing from a previously computed root, which
    /// becomes leaf 0.
    pub fn seeded(root: Hash) -> Self {
        let mut tree = Self::new();
        tree.append(root);
        tree
    }

    pub fn from_checkpoint(checkpoint: MerkleCheckpoint) -> Result<Self> {
        let MerkleCheckpoint { size, levels } = checkpoint;
        for (h, level) in levels.iter().enumerate() {
            let count = size.checked_shr(h as u32).unwrap_or(0);
            if level.first + level.nodes.len() as u64 != count {
                return Err(ReplayError::Codec(format!(
                    "inconsistent merkle checkpoint at level {}: {} + {} != {}",
                    h,
                    level.first,
                    level.nodes.len(),
                    count
                )));
            }
            // The peak and any pending left sibling must still be held.
            if level.first > (count & !1) {
                return Err(ReplayError::Codec(format!(
                    "merkle checkpoint at level {} dropped its frontier: first {} of {}",
                    h, level.first, count
                )));
            }
        }
        let tree = Self { levels, size };
        if size > 0 && tree.levels.len() <= (63 - size.leading_zeros()) as usize {
            return Err(ReplayError::Codec("merkle checkpoint is missing levels".into()));
        }
        Ok(tree)
    }

    pub fn checkpoint(&self) -> MerkleCheckpoint {
        let mut frontier = self.clone();
        frontier.flush_to(self.size);
        MerkleCheckpoint {
            size: frontier.size,
            levels: frontier.levels,
        }
    }

    /// Total leaves appended, flushed ones included.
    pub fn len(&self) -> u64 {
        self.size
    }

    pub fn is_empty(&self) -> bool {
        self.size == 0
    }

    /// Index of the oldest leaf still held.
    pub fn retained_from(&self) -> u64 {
        self.levels.first().map_or(0, |l| l.first)
    }

    pub fn retained_len(&self) -> u64 {
        self.size - self.retained_from()
    }

    fn count_at(&self, h: usize) -> u64 {
        self.size.checked_shr(h as u32).unwrap_or(0)
    }

    fn push_node(&mut self, h: usize, node: Hash) {
        if self.levels.len() == h {
            self.levels.push(Level::default());
        }
        self.levels[h].nodes.push_back(node);
    }

    pub fn append(&mut self, leaf: Hash) {
        self.push_node(0, leaf);
        self.size += 1;

        let mut h = 0;
        while self.count_at(h) % 2 == 0 {
            let nodes = &self.levels[h].nodes;
            let n = nodes.len();
            let parent = hash_internal(&nodes[n - 2], &nodes[n - 1]);
            self.push_node(h + 1, parent);
            h += 1;
        }
    }

    /// Peaks from the lowest level up, as `(level, hash)`.
    fn peaks(&self) -> impl Iterator<Item = (usize, &Hash)> + '_ {
        self.levels.iter().enumerate().filter_map(move |(h, level)| {
            if self.count_at(h) % 2 == 1 {
                level.nodes.back().map(|n| (h, n))
            } else {
                None
            }
        })
    }

    pub fn root(&self) -> Hash {
        let mut acc: Option<Hash> = None;
        for (_, peak) in self.peaks() {
            acc = Some(match acc {
                None => *peak,
                Some(lower) => hash_internal(peak, &lower),
            });
        }
        acc.unwrap_or(EMPTY_ROOT)
    }

    /// Keeps only the most recent `retain_count` leaves.
    pub fn flush(&mut self, retain_count: u64) {
        let offset = self.size.saturating_sub(retain_count);
        self.flush_to(offset);
    }

    /// Drops leaves before `offset`. Roots are unaffected.
    pub fn flush_to(&mut self, offset: u64) {
        let offset = offset.min(self.size);
        for (h, level) in self.levels.iter_mut().enumerate() {
            let keep_from = (offset >> h) & !1;
            while level.first < keep_from && !level.nodes.is_empty() {
                level.nodes.pop_front();
                level.first += 1;
            }
        }
    }

    /// Inclusion proof for a retained leaf against the current root.
    pub fn receipt(&self, index: u64) -> Option<Receipt> {
        if index >= self.size || index < self.retained_from() {
            return None;
        }
        let leaf = *self.levels[0].get(index)?;

        let mut path = Vec::new();
        let mut h = 0;
        let mut i = index;
        // Climb while the node has a sibling; stop at the peak holding it.
        while i ^ 1 < self.count_at(h) {
            let sibling = *self.levels[h].get(i ^ 1)?;
            let side = if i & 1 == 1 { Side::Left } else { Side::Right };
            path.push((side, sibling));
            i >>= 1;
            h += 1;
        }

        let mut lower: Option<Hash> = None;
        for (ph, peak) in self.peaks() {
            if ph >= h {
                break;
            }
            lower = Some(match lower {
                None => *peak,
                Some(acc) => hash_internal(peak, &acc),
            });
        }
        if let Some(lower) = lower {
            path.push((Side::Right, lower));
        }
        for (ph, peak) in self.peaks() {
            if ph > h {
                path.push((Side::Left, *peak));
            }
        }

        Some(Receipt { index, leaf, path })
    }
}
