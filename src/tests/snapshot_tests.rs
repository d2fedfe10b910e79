// Copyright (c) 2025 Varshith Gudur. Licensed under AGPLv3.
use crate::config::ReplayConfig;
use crate::domain::{Domain, TableFilter};
use crate::error::{ReplayError, VerificationFailure};
use crate::merkle::Hash;
use crate::snapshot::{SnapshotBuilder, SnapshotIndex, SnapshotManager, SnapshotMeta, SnapshotReader};
use ledger_format::fixtures::{kv_domain, LedgerBytes};
use ledger_format::msgpack::encode_u64;
use ledger_format::record::RecordFrame;
use std::collections::{BTreeMap, HashMap};
use std::path::PathBuf;
use tempfile::tempdir;

fn domain(version: u64, table: &str, writes: &[(u64, &str)], removes: &[u64]) -> Domain {
    Domain::decode(&kv_domain(version, table, writes, removes).unwrap(), 0, &TableFilter::All).unwrap()
}

fn populated_builder() -> SnapshotBuilder {
    let mut builder = SnapshotBuilder::new();
    builder.append_domain(&domain(1, "t", &[(1, "a"), (2, "b"), (3, "c")], &[]));
    builder.append_domain(&domain(2, "t", &[(1, "a2")], &[2]));
    builder.append_domain(&domain(3, "u", &[(5, "x")], &[]));
    builder.append_domain(&domain(4, "t", &[(2, "back")], &[3]));
    builder.append_domain(&domain(5, "v", &[(7, "gone")], &[]));
    builder.append_domain(&domain(6, "v", &[], &[7]));
    builder
}

fn meta(version: u64, key: i64) -> SnapshotMeta<i64> {
    SnapshotMeta {
        version,
        ledger_offset: version * 100,
        index_key: key,
        content_hash: [0u8; 32],
        path: PathBuf::from(format!("snapshot_v{}", version)),
    }
}

#[test]
fn test_last_write_wins_round_trip() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("snapshot_v6");
    let mut builder = populated_builder();
    assert_eq!(builder.last_version(), 6);
    assert_eq!(builder.transactions(), 6);

    let summary = builder.create(6, &path).unwrap();
    assert_eq!(summary.tables, 3);
    assert_eq!(summary.entries, 3);
    assert_eq!(summary.digest, Hash::from(blake3::hash(&std::fs::read(&path).unwrap())));

    let mut hashes: HashMap<u64, Hash> = HashMap::new();
    hashes.insert(6, summary.digest);
    let mut reader = SnapshotReader::open(&path, 6);
    reader.read(&hashes).unwrap();
    assert_eq!(reader.table_names().unwrap(), vec!["t", "u", "v"]);

    let t: BTreeMap<u64, String> = reader.get_table_snapshot("t").unwrap().get_as().unwrap();
    assert_eq!(t, BTreeMap::from([(1, "a2".to_string()), (2, "back".to_string())]));

    let u = reader.get_table_snapshot("u").unwrap();
    assert_eq!(u.len(), 1);
    assert!(u.get(&encode_u64(5).unwrap()).is_some());

    // Every key of `v` was removed: the table is present but empty.
    assert!(reader.get_table_snapshot("v").unwrap().is_empty());
    assert!(matches!(
        reader.get_table_snapshot("w"),
        Err(ReplayError::TableNotInSnapshot { .. })
    ));
}

#[test]
fn test_state_and_latest() {
    let builder = populated_builder();
    assert_eq!(builder.state("t").len(), 2);
    assert!(builder.state("missing").is_empty());
    assert_eq!(builder.table_names().collect::<Vec<_>>(), vec!["t", "u", "v"]);

    let latest = builder.latest("t", |k, _| crate::domain::decode_value::<u64>(k).ok());
    assert_eq!(latest, Some(2));
}

#[test]
fn test_builder_continues_after_create() {
    let dir = tempdir().unwrap();
    let mut builder = populated_builder();
    builder.create(6, dir.path().join("a")).unwrap();
    builder.append_domain(&domain(7, "t", &[(9, "new")], &[1]));

    let mut keys: Vec<u64> = builder
        .state("t")
        .iter()
        .map(|(k, _)| crate::domain::decode_value(k).unwrap())
        .collect();
    keys.sort_unstable();
    assert_eq!(keys, vec![2, 9]);
}

#[test]
fn test_read_is_idempotent() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("snap");
    let summary = populated_builder().create(6, &path).unwrap();

    let hashes = HashMap::from([(6u64, summary.digest)]);
    let mut reader = SnapshotReader::open(&path, 6);
    reader.read(&hashes).unwrap();
    let before = reader.get_table_snapshot("t").unwrap().clone();

    // Already verified: the registry is not consulted again.
    reader.read(&HashMap::<u64, Hash>::new()).unwrap();
    assert!(reader.is_read());
    assert_eq!(reader.digest(), Some(summary.digest));
    assert_eq!(reader.get_table_snapshot("t").unwrap(), &before);
}

#[test]
fn test_hash_mismatch_exposes_nothing() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("snap");
    populated_builder().create(6, &path).unwrap();

    let hashes = HashMap::from([(6u64, [0xAAu8; 32])]);
    let mut reader = SnapshotReader::open(&path, 6);
    assert!(matches!(
        reader.read(&hashes),
        Err(ReplayError::VerificationFailed(VerificationFailure::SnapshotHash { version: 6 }))
    ));
    assert!(!reader.is_read());
    assert!(matches!(
        reader.get_table_snapshot("t"),
        Err(ReplayError::SnapshotNotRead { version: 6 })
    ));
    assert!(reader.table_names().is_err());
}

#[test]
fn test_missing_expected_hash() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("snap");
    populated_builder().create(6, &path).unwrap();

    let mut reader = SnapshotReader::open(&path, 6);
    let err = reader.read(&HashMap::<u64, Hash>::new()).unwrap_err();
    assert!(err.is_verification());
    assert!(matches!(
        err,
        ReplayError::VerificationFailed(VerificationFailure::MissingExpectedHash { version: 6 })
    ));
}

#[test]
fn test_append_transaction_from_record_body() {
    let mut ledger = LedgerBytes::new();
    ledger.push(&kv_domain(1, "t", &[(1, "a")], &[]).unwrap()).unwrap();
    ledger
        .push_with_private(&kv_domain(2, "t", &[(1, "b"), (2, "c")], &[]).unwrap(), &[0x11; 20])
        .unwrap();

    let mut builder = SnapshotBuilder::new();
    for &offset in ledger.offsets() {
        let frame = RecordFrame::parse(ledger.bytes(), offset).unwrap();
        builder
            .append_transaction(&ledger.bytes()[frame.body_range()])
            .unwrap();
    }
    assert_eq!(builder.last_version(), 2);
    assert_eq!(builder.state("t").len(), 2);

    assert!(matches!(
        builder.append_transaction(&[0u8; 10]),
        Err(ReplayError::MalformedRecord { .. })
    ));
}

#[test]
fn test_index_out_of_order_inserts() {
    let mut index = SnapshotIndex::new();
    for (version, key) in [(1, 10), (2, 30), (3, 20)] {
        index.insert(meta(version, key));
    }

    let keys: Vec<i64> = index.iter().map(|m| m.index_key).collect();
    assert_eq!(keys, vec![10, 20, 30]);
    assert_eq!(index.lower_bound(&25).map(|m| m.index_key), Some(30));
    assert_eq!(index.lower_bound(&30).map(|m| m.version), Some(2));
    assert!(index.lower_bound(&31).is_none());
    assert_eq!(index.floor(&25).map(|m| m.index_key), Some(20));
    assert!(index.floor(&9).is_none());
    assert_eq!(index.by_version(3).map(|m| m.index_key), Some(20));
}

#[test]
fn test_index_keeps_duplicate_keys() {
    let mut index = SnapshotIndex::new();
    index.insert(meta(5, 10));
    index.insert(meta(4, 10));
    assert_eq!(index.len(), 2);
    let versions: Vec<u64> = index.iter().map(|m| m.version).collect();
    assert_eq!(versions, vec![4, 5]);
}

#[test]
fn test_start_for() {
    let mut index = SnapshotIndex::new();
    for (version, key) in [(1, 10), (2, 20), (3, 30)] {
        index.insert(meta(version, key));
    }

    assert_eq!(index.start_for(&15).unwrap().index_key, 10);
    assert_eq!(index.start_for(&20).unwrap().index_key, 10);
    assert_eq!(index.start_for(&29).unwrap().index_key, 20);
    assert_eq!(index.start_for(&99).unwrap().index_key, 30);
    assert_eq!(index.start_for(&10).unwrap().index_key, 10);
    assert!(matches!(
        index.start_for(&9),
        Err(ReplayError::RangePrecedesSnapshots { .. })
    ));
    assert!(SnapshotIndex::<i64>::new().start_for(&0).is_err());
}

fn config_in(dir: &std::path::Path) -> ReplayConfig {
    ReplayConfig {
        snapshot_dir: dir.join("snapshots"),
        ..ReplayConfig::default()
    }
}

#[test]
fn test_manager_drops_unanchored_snapshot() {
    let dir = tempdir().unwrap();
    let config = config_in(dir.path());
    let mut manager = SnapshotManager::<i64>::open(&config).unwrap();
    let mut hashes: HashMap<u64, Hash> = HashMap::new();

    let created = manager
        .create_snapshot(&mut populated_builder(), 6, 600, None, &mut hashes)
        .unwrap();
    assert!(created.is_none());
    assert!(manager.index().is_empty());
    assert!(hashes.is_empty());
    assert!(!config.snapshot_path(6).exists());

    assert!(!manager
        .register(7, 700, dir.path().join("elsewhere"), [1; 32], None)
        .unwrap());
    assert!(manager.index().is_empty());
}

#[test]
fn test_manager_reloads_catalog() {
    let dir = tempdir().unwrap();
    let config = config_in(dir.path());
    let mut hashes: HashMap<u64, Hash> = HashMap::new();

    {
        let mut manager = SnapshotManager::<i64>::open(&config).unwrap();
        let mut builder = populated_builder();
        let first = manager
            .create_snapshot(&mut builder, 6, 600, Some(100), &mut hashes)
            .unwrap()
            .unwrap();
        assert_eq!(first.path, config.snapshot_path(6));
        assert_eq!(hashes.get(&6), Some(&first.content_hash));

        builder.append_domain(&domain(7, "t", &[(4, "d")], &[]));
        manager
            .create_snapshot(&mut builder, 7, 700, Some(50), &mut hashes)
            .unwrap();
    }

    let reopened = SnapshotManager::<i64>::open(&config).unwrap();
    let keys: Vec<i64> = reopened.index().iter().map(|m| m.index_key).collect();
    assert_eq!(keys, vec![50, 100]);

    let meta = reopened.start_for(&120).unwrap().clone();
    assert_eq!((meta.version, meta.ledger_offset), (6, 600));
    let mut reader = reopened.reader_for(&meta);
    reader.read(&hashes).unwrap();
    assert_eq!(reader.get_table_snapshot("t").unwrap().len(), 2);
}
