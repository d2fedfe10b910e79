// Copyright (c) 2025 Varshith Gudur. Licensed under AGPLv3.
use crate::domain::TableFilter;
use crate::error::ReplayError;
use crate::ledger::{Ledger, LedgerPosition};
use ledger_format::fixtures::{kv_domain, LedgerBytes};
use ledger_format::record::TXN_SIZE_FIELD;
use tempfile::tempdir;

fn three_records() -> LedgerBytes {
    let mut bytes = LedgerBytes::new();
    for v in 1..=3u64 {
        bytes.push(&kv_domain(v, "t", &[(v, "x")], &[]).unwrap()).unwrap();
    }
    bytes
}

#[test]
fn test_cursor_walks_every_record() {
    let bytes = three_records();
    let ledger = Ledger::from_bytes(bytes.bytes().to_vec());

    let mut cursor = ledger.cursor();
    let mut versions = Vec::new();
    let mut consumed = 0;
    while cursor.has_next() {
        versions.push(cursor.domain().unwrap().version);
        consumed += TXN_SIZE_FIELD + cursor.raw_bytes().unwrap().len();
        assert!(cursor.advance().unwrap());
    }

    assert_eq!(versions, vec![1, 2, 3]);
    assert_eq!(consumed, ledger.len());
    assert_eq!(cursor.position(), ledger.end());
}

#[test]
fn test_end_of_ledger() {
    let bytes = three_records();
    let ledger = Ledger::from_bytes(bytes.bytes().to_vec());
    let mut cursor = ledger.cursor_at(ledger.len()).unwrap();

    assert!(!cursor.has_next());
    assert!(!cursor.advance().unwrap());
    assert_eq!(cursor.offset(), ledger.len());
    assert!(matches!(cursor.domain(), Err(ReplayError::InvalidOffset { .. })));
}

#[test]
fn test_seek_to_record_boundary() {
    let bytes = three_records();
    let second = bytes.offsets()[1];
    let ledger = Ledger::from_bytes(bytes.bytes().to_vec());

    let mut cursor = ledger.cursor_at(second).unwrap();
    assert_eq!(cursor.domain().unwrap().version, 2);

    assert!(matches!(
        ledger.cursor_at(second + 1),
        Err(ReplayError::InvalidOffset { offset }) if offset == second + 1
    ));
    assert!(matches!(
        ledger.cursor_at(ledger.len() + 10),
        Err(ReplayError::InvalidOffset { .. })
    ));
}

#[test]
fn test_positions_are_ordered() {
    let bytes = three_records();
    let ledger = Ledger::from_bytes(bytes.bytes().to_vec());
    let mut cursor = ledger.cursor();

    let mut seen = vec![cursor.position()];
    while cursor.advance().unwrap() {
        seen.push(cursor.position());
    }
    assert_eq!(seen.len(), 4);
    assert!(seen.windows(2).all(|w| w[0] < w[1]));
    assert_eq!(seen[0], ledger.begin());
    assert_eq!(*seen.last().unwrap(), LedgerPosition(ledger.len()));
}

#[test]
fn test_domain_is_memoised() {
    let bytes = three_records();
    let ledger = Ledger::from_bytes(bytes.bytes().to_vec());
    let mut cursor = ledger.cursor();

    let first = cursor.domain().unwrap().clone();
    let again = cursor.domain().unwrap().clone();
    assert_eq!(first, again);
    assert_eq!(cursor.take_domain().unwrap(), first);
    // Taking moves it out; the next access decodes again.
    assert_eq!(cursor.domain().unwrap(), &first);
}

#[test]
fn test_truncated_file_is_malformed() {
    let bytes = three_records();
    let cut = bytes.bytes()[..bytes.len() - 5].to_vec();
    let ledger = Ledger::from_bytes(cut);

    let results: Vec<_> = ledger.iter().collect();
    assert_eq!(results.len(), 3);
    assert!(results[0].is_ok() && results[1].is_ok());
    assert!(matches!(
        results[2],
        Err(ReplayError::MalformedRecord { offset, .. }) if offset == bytes.offsets()[2]
    ));
}

#[test]
fn test_private_domain_is_skipped() {
    let mut bytes = LedgerBytes::new();
    bytes
        .push_with_private(&kv_domain(1, "t", &[(1, "x")], &[]).unwrap(), &[0xFE; 48])
        .unwrap();
    bytes.push(&kv_domain(2, "t", &[(2, "y")], &[]).unwrap()).unwrap();
    let ledger = Ledger::from_bytes(bytes.bytes().to_vec());

    let domains: Vec<_> = ledger.iter().collect::<Result<_, _>>().unwrap();
    assert_eq!(domains.len(), 2);
    assert_eq!(domains[1].version, 2);

    let mut cursor = ledger.cursor();
    assert_eq!(cursor.raw_bytes().unwrap().len() + TXN_SIZE_FIELD, bytes.offsets()[1]);
}

#[test]
fn test_open_file_and_filter() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("ledger_1");
    let mut bytes = LedgerBytes::new();
    bytes.push(&kv_domain(1, "a", &[(1, "x")], &[]).unwrap()).unwrap();
    bytes.push(&kv_domain(2, "b", &[(2, "y")], &[]).unwrap()).unwrap();
    bytes.write_to(&path).unwrap();

    let ledger = Ledger::open(&path).unwrap().with_filter(TableFilter::only(["b"]));
    assert_eq!(ledger.len(), bytes.len());
    assert_eq!(ledger.record_offsets().unwrap(), bytes.offsets());

    let domains: Vec<_> = ledger.iter().collect::<Result<_, _>>().unwrap();
    assert!(domains[0].tables.is_empty());
    assert!(domains[1].table("b").is_some());
}

#[test]
fn test_empty_file() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("empty");
    std::fs::write(&path, b"").unwrap();

    let ledger = Ledger::open(&path).unwrap();
    assert!(ledger.is_empty());
    assert!(!ledger.cursor().has_next());
    assert_eq!(ledger.iter().count(), 0);
}
