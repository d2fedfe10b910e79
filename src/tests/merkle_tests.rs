// Copyright (c) 2025 Varshith Gudur. Licensed under AGPLv3.
use crate::merkle::{hash_internal, hash_leaf, Hash, MerkleHistory, EMPTY_ROOT};
use crate::error::ReplayError;
use serde::Serialize;
use tempfile::tempdir;

fn leaves(n: u64) -> Vec<Hash> {
    (0..n).map(|i| hash_leaf(&i.to_le_bytes())).collect()
}

/// Straightforward recursive definition, for comparison.
fn reference_root(leaves: &[Hash]) -> Hash {
    match leaves.len() {
        0 => EMPTY_ROOT,
        1 => leaves[0],
        n => {
            let mut split = 1;
            while split * 2 < n {
                split *= 2;
            }
            hash_internal(&reference_root(&leaves[..split]), &reference_root(&leaves[split..]))
        }
    }
}

#[test]
fn test_small_roots() {
    let l = leaves(3);
    let mut tree = MerkleHistory::new();
    assert_eq!(tree.root(), EMPTY_ROOT);

    tree.append(l[0]);
    assert_eq!(tree.root(), l[0]);
    tree.append(l[1]);
    assert_eq!(tree.root(), hash_internal(&l[0], &l[1]));
    tree.append(l[2]);
    assert_eq!(tree.root(), hash_internal(&hash_internal(&l[0], &l[1]), &l[2]));
}

#[test]
fn test_root_matches_reference() {
    let l = leaves(37);
    let mut tree = MerkleHistory::new();
    for (i, leaf) in l.iter().enumerate() {
        tree.append(*leaf);
        assert_eq!(tree.root(), reference_root(&l[..=i]), "after {} leaves", i + 1);
    }
}

#[test]
fn test_flush_does_not_change_roots() {
    let l = leaves(100);
    let mut full = MerkleHistory::new();
    let mut flushed = MerkleHistory::new();

    for (i, leaf) in l.iter().enumerate() {
        full.append(*leaf);
        flushed.append(*leaf);
        if i % 7 == 6 {
            let before = flushed.root();
            flushed.flush(3);
            assert_eq!(flushed.root(), before);
            assert!(flushed.retained_len() <= 4);
        }
        assert_eq!(flushed.root(), full.root());
    }
    assert_eq!(flushed.len(), 100);
}

#[test]
fn test_flush_everything() {
    let mut tree = MerkleHistory::new();
    for leaf in leaves(13) {
        tree.append(leaf);
    }
    let root = tree.root();
    tree.flush(0);
    assert_eq!(tree.root(), root);

    let mut reference = MerkleHistory::new();
    for leaf in leaves(14) {
        reference.append(leaf);
    }
    tree.append(leaves(14)[13]);
    assert_eq!(tree.root(), reference.root());
}

#[test]
fn test_receipts() {
    let mut tree = MerkleHistory::new();
    for leaf in leaves(21) {
        tree.append(leaf);
    }
    let root = tree.root();
    for i in 0..21 {
        let receipt = tree.receipt(i).unwrap();
        assert!(receipt.verify(&root), "receipt for leaf {}", i);
    }
    assert!(tree.receipt(21).is_none());

    tree.flush_to(10);
    assert!(tree.receipt(7).is_none());
    for i in 10..21 {
        assert!(tree.receipt(i).unwrap().verify(&root));
    }

    let mut forged = tree.receipt(15).unwrap();
    forged.leaf = [0xFF; 32];
    assert!(!forged.verify(&root));
}

#[test]
fn test_checkpoint_resume() {
    let l = leaves(50);
    let mut full = MerkleHistory::new();
    for leaf in &l[..29] {
        full.append(*leaf);
    }

    let dir = tempdir().unwrap();
    let path = dir.path().join("merkle.bin");
    full.checkpoint().save(&path).unwrap();

    let checkpoint = crate::merkle::MerkleCheckpoint::load(&path).unwrap();
    assert_eq!(checkpoint.size(), 29);
    let mut resumed = MerkleHistory::from_checkpoint(checkpoint).unwrap();
    assert_eq!(resumed.root(), full.root());

    for leaf in &l[29..] {
        full.append(*leaf);
        resumed.append(*leaf);
    }
    assert_eq!(resumed.root(), full.root());
    assert_eq!(resumed.retained_from(), 28);
}

#[test]
fn test_seeded_tree() {
    let prior = [0x42u8; 32];
    let l = leaves(2);
    let mut tree = MerkleHistory::seeded(prior);
    tree.append(l[0]);
    tree.append(l[1]);
    assert_eq!(tree.len(), 3);
    assert_eq!(tree.root(), hash_internal(&hash_internal(&prior, &l[0]), &l[1]));
}

/// Same encoding as a saved checkpoint, with every field settable.
#[derive(Serialize)]
struct RawLevel {
    first: u64,
    nodes: Vec<Hash>,
}

#[derive(Serialize)]
struct RawCheckpoint {
    size: u64,
    levels: Vec<RawLevel>,
}

fn load_raw(raw: &RawCheckpoint) -> crate::error::Result<MerkleHistory> {
    let dir = tempdir().unwrap();
    let path = dir.path().join("merkle.bin");
    let bytes = bincode::serde::encode_to_vec(raw, bincode::config::standard()).unwrap();
    std::fs::write(&path, bytes).unwrap();
    MerkleHistory::from_checkpoint(crate::merkle::MerkleCheckpoint::load(&path).unwrap())
}

#[test]
fn test_checkpoint_missing_frontier_is_rejected() {
    let l = leaves(3);
    let intact = RawCheckpoint {
        size: 1,
        levels: vec![RawLevel { first: 0, nodes: vec![l[0]] }],
    };
    let mut tree = load_raw(&intact).unwrap();
    assert_eq!(tree.root(), l[0]);
    tree.append(l[1]);
    assert_eq!(tree.root(), hash_internal(&l[0], &l[1]));

    // Lost peak: the counts still add up.
    let no_peak = RawCheckpoint {
        size: 1,
        levels: vec![RawLevel { first: 1, nodes: vec![] }],
    };
    assert!(matches!(load_raw(&no_peak), Err(ReplayError::Codec(_))));

    // Three leaves with the level 0 peak dropped.
    let no_low_peak = RawCheckpoint {
        size: 3,
        levels: vec![
            RawLevel { first: 3, nodes: vec![] },
            RawLevel {
                first: 0,
                nodes: vec![hash_internal(&l[0], &l[1])],
            },
        ],
    };
    assert!(matches!(load_raw(&no_low_peak), Err(ReplayError::Codec(_))));
}
