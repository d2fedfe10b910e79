use ledger_replay::fixtures::{registry, SignedLedgerBuilder, PRIMARY_NODE};
use ledger_replay::snapshot::{SnapshotBuilder, SnapshotManager};
use ledger_replay::{verify_ledger, Hash, Ledger, ReplayConfig, ReplayError, VerificationFailure};
use std::collections::HashMap;
use std::fs::OpenOptions;
use std::io::Write;
use tempfile::tempdir;

fn signed_ledger() -> SignedLedgerBuilder {
    let mut b = SignedLedgerBuilder::new();
    for k in 0..6u64 {
        b.write_row("t", &k, &format!("value {}", k)).unwrap();
        if k % 3 == 2 {
            b.sign(PRIMARY_NODE).unwrap();
        }
    }
    b
}

fn manager_with_two_snapshots(config: &ReplayConfig) -> HashMap<u64, Hash> {
    let mut manager = SnapshotManager::<u64>::open(config).unwrap();
    let mut hashes = HashMap::new();
    let mut builder = SnapshotBuilder::new();
    for (version, key) in [(10u64, 100u64), (20, 200)] {
        manager
            .create_snapshot(&mut builder, version, version * 7, Some(key), &mut hashes)
            .unwrap();
    }
    hashes
}

#[test]
fn test_torn_catalog_tail_is_ignored() {
    let dir = tempdir().unwrap();
    let config = ReplayConfig {
        snapshot_dir: dir.path().to_path_buf(),
        ..ReplayConfig::default()
    };
    manager_with_two_snapshots(&config);

    // Crash mid-append: a length prefix promising more than was written.
    let mut file = OpenOptions::new().append(true).open(config.catalog_path()).unwrap();
    file.write_all(&[0xFF, 0x00, 0x00, 0x00, 1, 2, 3, 4, 5, 6, 7, 8, 9]).unwrap();
    drop(file);

    let manager = SnapshotManager::<u64>::open(&config).unwrap();
    assert_eq!(manager.index().len(), 2);
    assert_eq!(manager.start_for(&150).unwrap().version, 10);
}

#[test]
fn test_corrupt_catalog_entry_is_an_error() {
    let dir = tempdir().unwrap();
    let config = ReplayConfig {
        snapshot_dir: dir.path().to_path_buf(),
        ..ReplayConfig::default()
    };
    manager_with_two_snapshots(&config);

    let mut bytes = std::fs::read(config.catalog_path()).unwrap();
    let last = bytes.len() - 1;
    bytes[last] ^= 0xFF;
    std::fs::write(config.catalog_path(), &bytes).unwrap();

    assert!(matches!(
        SnapshotManager::<u64>::open(&config),
        Err(ReplayError::Codec(_))
    ));
}

#[test]
fn test_truncated_ledger_aborts_verification() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("ledger");
    let builder = signed_ledger();
    let last_record = *builder.offsets().last().unwrap();
    builder.write_to(&path).unwrap();

    let file = OpenOptions::new().write(true).open(&path).unwrap();
    file.set_len(builder.len() as u64 - 3).unwrap();
    drop(file);

    let ledger = Ledger::open(&path).unwrap();
    match verify_ledger(&ledger, registry(&[PRIMARY_NODE]), &ReplayConfig::default()) {
        Err(ReplayError::MalformedRecord { offset, .. }) => assert_eq!(offset, last_record),
        other => panic!("expected a malformed record, got {:?}", other.map(|r| r.batches)),
    }
}

#[test]
fn test_edited_snapshot_file_is_rejected() {
    let dir = tempdir().unwrap();
    let config = ReplayConfig {
        snapshot_dir: dir.path().to_path_buf(),
        ..ReplayConfig::default()
    };
    let mut manager = SnapshotManager::<u64>::open(&config).unwrap();
    let mut hashes: HashMap<u64, Hash> = HashMap::new();

    let ledger = signed_ledger().into_ledger();
    let mut builder = SnapshotBuilder::new();
    for domain in ledger.iter() {
        builder.append_domain(&domain.unwrap());
    }
    let meta = manager
        .create_snapshot(&mut builder, 8, ledger.len() as u64, Some(1), &mut hashes)
        .unwrap()
        .unwrap();

    let mut bytes = std::fs::read(&meta.path).unwrap();
    let last = bytes.len() - 1;
    bytes[last] ^= 0x01;
    std::fs::write(&meta.path, &bytes).unwrap();

    let mut reader = manager.reader_for(&meta);
    assert!(matches!(
        reader.read(&hashes),
        Err(ReplayError::VerificationFailed(VerificationFailure::SnapshotHash { version: 8 }))
    ));
    assert!(reader.get_table_snapshot("t").is_err());
}
