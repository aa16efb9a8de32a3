//! Storage engine contract tests, run against both backends.

mod common;

use common::{get_one, mem_store, put_keys, put_record, temp_test_dir};
use dkv::durable::DurableStore;
use dkv::error::DkvError;
use dkv::proto::{ChangeRecord, TrxnRecord, TrxnType};
use dkv::storage::{ChangeApplier, ChangePropagator, KvStore, StorageEngine, WriteBatch};
use std::sync::Arc;

fn durable_store(dir: &tempfile::TempDir) -> Arc<DurableStore> {
    Arc::new(DurableStore::open(dir.path(), 1024, true).expect("open failed"))
}

fn both_backends() -> Vec<(Arc<dyn StorageEngine>, tempfile::TempDir)> {
    let dir = temp_test_dir();
    let durable: Arc<dyn StorageEngine> = durable_store(&dir);
    let mem: Arc<dyn StorageEngine> = mem_store();
    // The TempDir rides along to keep the durable store's folder alive.
    vec![(mem, temp_test_dir()), (durable, dir)]
}

// ============================================================================
// Keyed reads and writes
// ============================================================================

#[test]
fn put_then_get_returns_last_value() {
    for (store, _guard) in both_backends() {
        put_keys(store.as_ref(), 10, "K", "V");
        for i in 1..=10 {
            let key = format!("K_{}", i);
            assert_eq!(
                get_one(store.as_ref(), key.as_bytes()),
                format!("V_{}", i).as_bytes()
            );
        }

        store.put(b"K_3", b"V_3_new", 0).unwrap();
        assert_eq!(get_one(store.as_ref(), b"K_3"), b"V_3_new");
    }
}

#[test]
fn multi_get_preserves_input_order() {
    for (store, _guard) in both_backends() {
        let mut keys = Vec::new();
        let mut expected = Vec::new();
        for i in 1..=10 {
            let key = format!("MK{}", i).into_bytes();
            let value = format!("MV{}", i).into_bytes();
            store.put(&key, &value, 0).unwrap();
            keys.push(key);
            expected.push(value);
        }

        let key_refs: Vec<&[u8]> = keys.iter().map(|k| k.as_slice()).collect();
        let values = store.get(&key_refs).unwrap();
        assert_eq!(values, expected);
    }
}

#[test]
fn missing_key_yields_empty_value_without_error() {
    for (store, _guard) in both_backends() {
        assert!(get_one(store.as_ref(), b"MissingKey").is_empty());

        // One result per key even when some are missing.
        store.put(b"present", b"here", 0).unwrap();
        let values = store
            .get(&[b"gone".as_ref(), b"present".as_ref(), b"gone2".as_ref()])
            .unwrap();
        assert_eq!(values.len(), 3);
        assert!(values[0].is_empty());
        assert_eq!(values[1], b"here");
        assert!(values[2].is_empty());
    }
}

#[test]
fn empty_key_is_rejected() {
    for (store, _guard) in both_backends() {
        assert!(matches!(
            store.put(b"", b"v", 0).unwrap_err(),
            DkvError::InvalidRequest { .. }
        ));
        assert!(matches!(
            store.get(&[b"".as_ref()]).unwrap_err(),
            DkvError::InvalidRequest { .. }
        ));
    }
}

#[test]
fn iteration_with_start_key_and_prefix() {
    for (store, _guard) in both_backends() {
        put_keys(store.as_ref(), 5, "aa_t", "av");
        put_keys(store.as_ref(), 5, "bb_t", "bv");
        put_keys(store.as_ref(), 5, "cc_t", "cv");

        // Start at an existing key: that key is included; the prefix stops
        // iteration at the first non-matching key.
        let entries: Vec<(Vec<u8>, Vec<u8>)> = store
            .iterate(b"bb_t_2", Some(b"bb_t"))
            .unwrap()
            .collect();
        let keys: Vec<&[u8]> = entries.iter().map(|(k, _)| k.as_slice()).collect();
        assert_eq!(keys, vec![b"bb_t_2".as_ref(), b"bb_t_3", b"bb_t_4", b"bb_t_5"]);

        // Without a prefix, iteration continues into the next key family.
        let all: Vec<(Vec<u8>, Vec<u8>)> = store.iterate(b"bb_t_2", None).unwrap().collect();
        assert_eq!(all.len(), 4 + 5);
    }
}

#[test]
fn iterators_are_snapshot_consistent() {
    for (store, _guard) in both_backends() {
        put_keys(store.as_ref(), 3, "snap", "v");
        let iter = store.iterate(b"snap", Some(b"snap")).unwrap();

        store.put(b"snap_9", b"late", 0).unwrap();
        let seen: Vec<(Vec<u8>, Vec<u8>)> = iter.collect();
        assert_eq!(seen.len(), 3, "iterator must not observe later writes");
    }
}

#[test]
fn expired_entries_read_as_missing() {
    for (store, _guard) in both_backends() {
        // An already-expired entry arrives through the replication path.
        let record = ChangeRecord::new(
            1,
            vec![
                TrxnRecord::put(b"expired".to_vec(), b"x".to_vec(), 1),
                TrxnRecord::put(b"forever".to_vec(), b"y".to_vec(), 0),
            ],
        );
        store.save_changes(&[record]).unwrap();

        assert!(get_one(store.as_ref(), b"expired").is_empty());
        assert_eq!(get_one(store.as_ref(), b"forever"), b"y");

        let keys: Vec<Vec<u8>> = store
            .iterate(b"", None)
            .unwrap()
            .map(|(k, _)| k)
            .collect();
        assert_eq!(keys, vec![b"forever".to_vec()]);
    }
}

// ============================================================================
// Change numbers
// ============================================================================

#[test]
fn each_committed_batch_advances_the_change_number_once() {
    for (store, _guard) in both_backends() {
        let before = store.latest_committed_change_number();
        put_keys(store.as_ref(), 5, "aaKey", "aaVal");
        let after = store.latest_committed_change_number();
        assert_eq!(after - before, 5);

        // A multi-transaction batch is one change.
        let mut batch = WriteBatch::new();
        batch.put(b"b1", b"v").delete(b"aaKey_1");
        let change = store.write_batch(batch).unwrap();
        assert_eq!(change, after + 1);
    }
}

#[test]
fn read_only_operations_do_not_advance_the_change_number() {
    for (store, _guard) in both_backends() {
        put_keys(store.as_ref(), 5, "r", "v");
        let before = store.latest_committed_change_number();

        let _ = store.get(&[b"r_1".as_ref(), b"nope".as_ref()]).unwrap();
        let _: Vec<_> = store.iterate(b"r", Some(b"r")).unwrap().collect();
        let _ = store.load_changes(1, 100).unwrap();

        assert_eq!(store.latest_committed_change_number(), before);
    }
}

#[test]
fn load_changes_returns_a_dense_ascending_range() {
    for (store, _guard) in both_backends() {
        let from = store.latest_committed_change_number() + 1;
        put_keys(store.as_ref(), 3, "bb", "bv");

        let changes = store.load_changes(from, 8).unwrap();
        assert_eq!(changes.len(), 3);
        assert_eq!(changes[0].change_number, from);
        for (i, change) in changes.iter().enumerate() {
            assert_eq!(change.change_number, from + i as u64);
            assert_eq!(change.number_of_trxns, 1);
            let trxn = &change.trxns[0];
            assert_eq!(trxn.trxn_type(), Some(TrxnType::Put));
            assert_eq!(trxn.key, format!("bb_{}", i + 1).into_bytes());
            assert_eq!(trxn.value, format!("bv_{}", i + 1).into_bytes());
        }
    }
}

#[test]
fn load_changes_boundaries() {
    for (store, _guard) in both_backends() {
        put_keys(store.as_ref(), 4, "k", "v");

        // from == 0 starts at the earliest retained change.
        let from_zero = store.load_changes(0, 100).unwrap();
        assert_eq!(from_zero.len(), 4);
        assert_eq!(from_zero[0].change_number, 1);

        // max bounds the result.
        assert_eq!(store.load_changes(0, 2).unwrap().len(), 2);

        // A fully caught-up reader gets an empty range, not an error.
        let latest = store.latest_committed_change_number();
        assert!(store.load_changes(latest + 1, 10).unwrap().is_empty());
    }
}

#[test]
fn load_changes_below_retention_floor_fails() {
    // Small window: early history is evicted.
    let store = dkv::memory::MemStore::new(2);
    put_keys(&store, 5, "k", "v");

    let err = store.load_changes(1, 10).unwrap_err();
    assert!(matches!(err, DkvError::ChangesUnavailable { floor: 4, .. }));

    let tail = store.load_changes(4, 10).unwrap();
    assert_eq!(tail.len(), 2);
}

// ============================================================================
// SaveChanges
// ============================================================================

#[test]
fn save_changes_applies_in_order_and_returns_high_water_mark() {
    for (store, _guard) in both_backends() {
        let records = vec![
            put_record(1, b"a", b"1"),
            put_record(2, b"b", b"2"),
            ChangeRecord::new(3, vec![TrxnRecord::delete(b"a".to_vec())]),
        ];
        let applied = store.save_changes(&records).unwrap();
        assert_eq!(applied, 3);
        assert_eq!(store.latest_committed_change_number(), 3);
        assert!(get_one(store.as_ref(), b"a").is_empty());
        assert_eq!(get_one(store.as_ref(), b"b"), b"2");
    }
}

#[test]
fn save_changes_rejects_non_contiguous_ranges() {
    for (store, _guard) in both_backends() {
        store.save_changes(&[put_record(1, b"a", b"1")]).unwrap();

        // A gap.
        let err = store.save_changes(&[put_record(3, b"c", b"3")]).unwrap_err();
        assert!(matches!(
            err,
            DkvError::NonContiguousChanges {
                expected: 2,
                got: 3
            }
        ));

        // Replaying an already-applied record is rejected the same way.
        let err = store.save_changes(&[put_record(1, b"a", b"1")]).unwrap_err();
        assert!(matches!(err, DkvError::NonContiguousChanges { .. }));

        // Nothing from the rejected ranges leaked in.
        assert_eq!(store.latest_committed_change_number(), 1);
        assert!(get_one(store.as_ref(), b"c").is_empty());
    }
}

#[test]
fn save_changes_replays_the_canonical_serialised_form() {
    for (store, _guard) in both_backends() {
        // A record whose explicit trxn list disagrees with its serialised
        // form: the canonical bytes win.
        let canonical = ChangeRecord::new(
            1,
            vec![TrxnRecord::put(b"canon".to_vec(), b"yes".to_vec(), 0)],
        );
        let mut tampered = canonical.clone();
        tampered.trxns = vec![TrxnRecord::put(b"other".to_vec(), b"no".to_vec(), 0)];

        store.save_changes(&[tampered]).unwrap();
        assert_eq!(get_one(store.as_ref(), b"canon"), b"yes");
        assert!(get_one(store.as_ref(), b"other").is_empty());
    }
}

// ============================================================================
// Backup / restore
// ============================================================================

#[test]
fn restore_of_backup_reproduces_the_keyspace() {
    for (store, _guard) in both_backends() {
        put_keys(store.as_ref(), 8, "bk", "bv");
        store.delete(b"bk_8").unwrap();
        let latest = store.latest_committed_change_number();

        let backup_dir = temp_test_dir();
        let snap = backup_dir.path().join("keyspace.snap");
        store.backup(&snap).unwrap();

        let target = mem_store();
        target.put(b"preexisting", b"gone-after-restore", 0).unwrap();
        target.restore(&snap).unwrap();

        // Byte-equivalent logical keyspace, and the snapshot source's
        // change number.
        assert_eq!(target.latest_committed_change_number(), latest);
        assert!(get_one(target.as_ref(), b"preexisting").is_empty());
        assert!(get_one(target.as_ref(), b"bk_8").is_empty());
        for i in 1..=7 {
            let key = format!("bk_{}", i);
            assert_eq!(
                get_one(target.as_ref(), key.as_bytes()),
                format!("bv_{}", i).as_bytes()
            );
        }

        let source_entries: Vec<_> = store.iterate(b"", None).unwrap().collect();
        let target_entries: Vec<_> = target.iterate(b"", None).unwrap().collect();
        assert_eq!(source_entries, target_entries);
    }
}

#[test]
fn replaying_loaded_changes_reproduces_the_source_mapping() {
    for (store, _guard) in both_backends() {
        put_keys(store.as_ref(), 6, "rep", "rv");
        store.delete(b"rep_2").unwrap();

        let changes = store.load_changes(0, 100).unwrap();
        let replica = mem_store();
        replica.save_changes(&changes).unwrap();

        assert_eq!(
            replica.latest_committed_change_number(),
            store.latest_committed_change_number()
        );
        let source_entries: Vec<_> = store.iterate(b"", None).unwrap().collect();
        let replica_entries: Vec<_> = replica.iterate(b"", None).unwrap().collect();
        assert_eq!(source_entries, replica_entries);
    }
}
