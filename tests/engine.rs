//! Engine-level behavior across the four concurrency-control strategies.

use kvtgraph::{BatchOp, CcMode, Kvt, KvtError, Partition, Result, TableId, ONE_SHOT};

fn engine(mode: CcMode) -> (Kvt, TableId) {
    let kvt = Kvt::new(mode);
    let table = kvt.create_table("data", Partition::Range).unwrap();
    (kvt, table)
}

#[test]
fn table_management_round_trip() -> Result<()> {
    let kvt = Kvt::new(CcMode::Optimistic);
    let users = kvt.create_table("users", Partition::Hash)?;
    let posts = kvt.create_table("posts", Partition::Range)?;
    assert!(users >= 1 && posts > users);

    assert_eq!(kvt.table_id("users")?, users);
    assert_eq!(kvt.table_name(posts)?, "posts");
    assert_eq!(
        kvt.list_tables(),
        vec![("users".to_string(), users), ("posts".to_string(), posts)]
    );

    assert!(matches!(
        kvt.create_table("users", Partition::Hash),
        Err(KvtError::TableAlreadyExists(_))
    ));

    kvt.set(ONE_SHOT, users, b"k", b"v")?;
    kvt.drop_table(users)?;
    assert!(matches!(
        kvt.get(ONE_SHOT, users, b"k"),
        Err(KvtError::TableNotFound(_))
    ));
    // Ids are never reused after a drop.
    let fresh = kvt.create_table("users", Partition::Hash)?;
    assert!(fresh > posts);
    assert!(kvt.get(ONE_SHOT, fresh, b"k").is_err());
    Ok(())
}

#[test]
fn snapshot_isolation_under_occ() -> Result<()> {
    let (kvt, table) = engine(CcMode::Optimistic);
    kvt.set(ONE_SHOT, table, b"iso", b"initial")?;

    let t1 = kvt.begin()?;
    let t2 = kvt.begin()?;

    kvt.set(t1, table, b"iso", b"t1")?;
    assert_eq!(kvt.get(t2, table, b"iso")?, b"initial");

    kvt.commit(t1)?;
    // T2 keeps its snapshot even after T1 committed.
    assert_eq!(kvt.get(t2, table, b"iso")?, b"initial");

    // T2's read is now provably stale, so strict validation refuses the
    // commit even though T2 wrote nothing.
    assert!(matches!(kvt.commit(t2), Err(KvtError::StaleData(_))));

    let t3 = kvt.begin()?;
    assert_eq!(kvt.get(t3, table, b"iso")?, b"t1");
    kvt.commit(t3)?;
    Ok(())
}

#[test]
fn occ_write_write_conflict() -> Result<()> {
    let (kvt, table) = engine(CcMode::Optimistic);
    kvt.set(ONE_SHOT, table, b"c", b"orig")?;

    let t1 = kvt.begin()?;
    let t2 = kvt.begin()?;
    assert_eq!(kvt.get(t1, table, b"c")?, b"orig");
    assert_eq!(kvt.get(t2, table, b"c")?, b"orig");
    kvt.set(t1, table, b"c", b"v1")?;
    kvt.set(t2, table, b"c", b"v2")?;

    kvt.commit(t1)?;
    assert!(matches!(kvt.commit(t2), Err(KvtError::StaleData(_))));
    assert_eq!(kvt.get(ONE_SHOT, table, b"c")?, b"v1");
    Ok(())
}

#[test]
fn occ_delete_validation() -> Result<()> {
    let (kvt, table) = engine(CcMode::Optimistic);
    kvt.set(ONE_SHOT, table, b"d", b"v")?;

    // T1 deletes; T2 overwrites first. T1's observed version is stale.
    let t1 = kvt.begin()?;
    kvt.del(t1, table, b"d")?;
    assert!(matches!(
        kvt.get(t1, table, b"d"),
        Err(KvtError::KeyDeleted { .. })
    ));
    kvt.set(ONE_SHOT, table, b"d", b"newer")?;
    assert!(matches!(kvt.commit(t1), Err(KvtError::StaleData(_))));
    assert_eq!(kvt.get(ONE_SHOT, table, b"d")?, b"newer");
    Ok(())
}

#[test]
fn occ_scan_registers_reads_for_validation() -> Result<()> {
    let (kvt, table) = engine(CcMode::Optimistic);
    kvt.set(ONE_SHOT, table, b"s1", b"a")?;
    kvt.set(ONE_SHOT, table, b"s2", b"b")?;

    let tx = kvt.begin()?;
    let rows = kvt.scan(tx, table, b"s", b"t", 10)?;
    assert_eq!(rows.len(), 2);
    // Concurrent modification of a scanned key invalidates the snapshot.
    kvt.set(ONE_SHOT, table, b"s2", b"changed")?;
    assert!(matches!(kvt.commit(tx), Err(KvtError::StaleData(_))));
    Ok(())
}

#[test]
fn twopl_lock_then_refuse() -> Result<()> {
    let (kvt, table) = engine(CcMode::TwoPhaseLocking);
    kvt.set(ONE_SHOT, table, b"x", b"a")?;

    let t1 = kvt.begin()?;
    assert_eq!(kvt.get(t1, table, b"x")?, b"a");

    let t2 = kvt.begin()?;
    assert!(matches!(
        kvt.get(t2, table, b"x"),
        Err(KvtError::KeyLocked { .. })
    ));

    kvt.commit(t1)?;
    assert_eq!(kvt.get(t2, table, b"x")?, b"a");
    kvt.commit(t2)?;
    Ok(())
}

#[test]
fn twopl_write_conflicts_fail_immediately() -> Result<()> {
    let (kvt, table) = engine(CcMode::TwoPhaseLocking);
    kvt.set(ONE_SHOT, table, b"k", b"v0")?;

    let t1 = kvt.begin()?;
    kvt.set(t1, table, b"k", b"v1")?;

    let t2 = kvt.begin()?;
    assert!(matches!(
        kvt.set(t2, table, b"k", b"v2"),
        Err(KvtError::KeyLocked { holder, .. }) if holder == t1
    ));
    assert!(matches!(
        kvt.del(t2, table, b"k"),
        Err(KvtError::KeyLocked { .. })
    ));
    // One-shot access refuses locked rows too.
    assert!(matches!(
        kvt.get(ONE_SHOT, table, b"k"),
        Err(KvtError::KeyLocked { .. })
    ));
    assert!(matches!(
        kvt.set(ONE_SHOT, table, b"k", b"v"),
        Err(KvtError::KeyLocked { .. })
    ));

    kvt.rollback(t1)?;
    // Rollback released the lock and restored the original value.
    assert_eq!(kvt.get(ONE_SHOT, table, b"k")?, b"v0");
    kvt.rollback(t2)?;
    Ok(())
}

#[test]
fn twopl_new_key_placeholder_lifecycle() -> Result<()> {
    let (kvt, table) = engine(CcMode::TwoPhaseLocking);

    let tx = kvt.begin()?;
    kvt.set(tx, table, b"fresh", b"v")?;
    // The placeholder holds the slot: other transactions are refused, and a
    // one-shot scan does not surface uncommitted data.
    let other = kvt.begin()?;
    assert!(matches!(
        kvt.set(other, table, b"fresh", b"stolen"),
        Err(KvtError::KeyLocked { .. })
    ));
    assert!(kvt.scan(ONE_SHOT, table, b"a", b"z", 10)?.is_empty());

    // Deleting our own staged insert drops the placeholder entirely.
    kvt.del(tx, table, b"fresh")?;
    assert!(kvt.set(other, table, b"fresh", b"now-free").is_ok());
    kvt.rollback(other)?;
    kvt.commit(tx)?;
    assert!(kvt.get(ONE_SHOT, table, b"fresh").is_err());
    Ok(())
}

#[test]
fn twopl_delete_then_write_keeps_lock() -> Result<()> {
    let (kvt, table) = engine(CcMode::TwoPhaseLocking);
    kvt.set(ONE_SHOT, table, b"k", b"v0")?;

    let tx = kvt.begin()?;
    kvt.del(tx, table, b"k")?;
    // A write after a staged delete revives the key in place.
    kvt.set(tx, table, b"k", b"v1")?;
    kvt.commit(tx)?;
    assert_eq!(kvt.get(ONE_SHOT, table, b"k")?, b"v1");
    Ok(())
}

#[test]
fn simple_is_single_writer() -> Result<()> {
    let (kvt, table) = engine(CcMode::Simple);

    let tx = kvt.begin()?;
    assert!(matches!(
        kvt.begin(),
        Err(KvtError::TransactionAlreadyRunning)
    ));

    kvt.set(tx, table, b"k", b"staged")?;
    // One-shot reads coexist but see only committed state.
    assert!(matches!(
        kvt.get(ONE_SHOT, table, b"k"),
        Err(KvtError::KeyNotFound { .. })
    ));
    // One-shot mutations are refused while the writer is open.
    assert!(matches!(
        kvt.set(ONE_SHOT, table, b"other", b"v"),
        Err(KvtError::OneShotWriteNotAllowed)
    ));
    assert!(matches!(
        kvt.del(ONE_SHOT, table, b"k"),
        Err(KvtError::OneShotDeleteNotAllowed)
    ));

    kvt.commit(tx)?;
    assert_eq!(kvt.get(ONE_SHOT, table, b"k")?, b"staged");

    // With no open transaction, one-shot mutations auto-commit.
    kvt.set(ONE_SHOT, table, b"solo", b"v")?;
    assert_eq!(kvt.get(ONE_SHOT, table, b"solo")?, b"v");
    kvt.del(ONE_SHOT, table, b"solo")?;
    assert!(kvt.get(ONE_SHOT, table, b"solo").is_err());
    Ok(())
}

#[test]
fn simple_staged_state_visible_to_its_transaction() -> Result<()> {
    let (kvt, table) = engine(CcMode::Simple);
    kvt.set(ONE_SHOT, table, b"a", b"committed")?;

    let tx = kvt.begin()?;
    kvt.set(tx, table, b"a", b"staged")?;
    assert_eq!(kvt.get(tx, table, b"a")?, b"staged");

    kvt.del(tx, table, b"a")?;
    assert!(matches!(
        kvt.get(tx, table, b"a"),
        Err(KvtError::KeyDeleted { .. })
    ));
    // Deleting a never-committed staged write just forgets it.
    kvt.set(tx, table, b"b", b"staged")?;
    kvt.del(tx, table, b"b")?;
    assert!(matches!(
        kvt.get(tx, table, b"b"),
        Err(KvtError::KeyNotFound { .. })
    ));

    kvt.commit(tx)?;
    assert!(kvt.get(ONE_SHOT, table, b"a").is_err());
    Ok(())
}

#[test]
fn rollback_restores_pre_transaction_state() -> Result<()> {
    for mode in [CcMode::Simple, CcMode::TwoPhaseLocking, CcMode::Optimistic] {
        let (kvt, table) = engine(mode);
        kvt.set(ONE_SHOT, table, b"keep", b"original")?;

        let tx = kvt.begin()?;
        kvt.set(tx, table, b"keep", b"dirty")?;
        kvt.set(tx, table, b"new", b"dirty")?;
        kvt.del(tx, table, b"keep")?;
        kvt.rollback(tx)?;

        assert_eq!(kvt.get(ONE_SHOT, table, b"keep")?, b"original", "{mode:?}");
        assert!(kvt.get(ONE_SHOT, table, b"new").is_err(), "{mode:?}");
        // The id is dead after rollback.
        assert!(
            matches!(kvt.commit(tx), Err(KvtError::TransactionNotFound(_))),
            "{mode:?}"
        );
    }
    Ok(())
}

#[test]
fn range_scan_bounds_and_limit() -> Result<()> {
    let (kvt, table) = engine(CcMode::Optimistic);
    for i in 1..=5 {
        let key = format!("scan_{i:03}");
        kvt.set(ONE_SHOT, table, key.as_bytes(), b"row")?;
    }

    let rows = kvt.scan(ONE_SHOT, table, b"scan_001", b"scan_004", 10)?;
    let keys: Vec<String> = rows
        .iter()
        .map(|(k, _)| String::from_utf8(k.clone()).unwrap())
        .collect();
    assert_eq!(keys, vec!["scan_001", "scan_002", "scan_003"]);

    let rows = kvt.scan(ONE_SHOT, table, b"scan_001", b"scan_999", 2)?;
    assert_eq!(rows.len(), 2);

    assert!(matches!(
        kvt.scan(ONE_SHOT, table, b"a", b"z", 0),
        Err(KvtError::InvalidArgument(_))
    ));
    assert!(kvt.scan(ONE_SHOT, table, b"z", b"a", 5)?.is_empty());
    Ok(())
}

#[test]
fn scan_overlays_transaction_state() -> Result<()> {
    for mode in [CcMode::Simple, CcMode::TwoPhaseLocking, CcMode::Optimistic] {
        let (kvt, table) = engine(mode);
        kvt.set(ONE_SHOT, table, b"k1", b"committed")?;
        kvt.set(ONE_SHOT, table, b"k2", b"committed")?;

        let tx = kvt.begin()?;
        kvt.set(tx, table, b"k2", b"staged")?;
        kvt.set(tx, table, b"k3", b"staged")?;
        kvt.del(tx, table, b"k1")?;

        let rows = kvt.scan(tx, table, b"k", b"l", 10)?;
        let rows: Vec<(String, String)> = rows
            .into_iter()
            .map(|(k, v)| {
                (
                    String::from_utf8(k).unwrap(),
                    String::from_utf8(v).unwrap(),
                )
            })
            .collect();
        assert_eq!(
            rows,
            vec![
                ("k2".to_string(), "staged".to_string()),
                ("k3".to_string(), "staged".to_string()),
            ],
            "{mode:?}"
        );
        kvt.rollback(tx)?;
    }
    Ok(())
}

#[test]
fn one_shot_reads_ignore_staged_writes() -> Result<()> {
    for mode in [CcMode::Simple, CcMode::Optimistic] {
        let (kvt, table) = engine(mode);
        kvt.set(ONE_SHOT, table, b"k", b"before")?;
        let tx = kvt.begin()?;
        kvt.set(tx, table, b"k", b"staged")?;
        assert_eq!(kvt.get(ONE_SHOT, table, b"k")?, b"before", "{mode:?}");
        kvt.rollback(tx)?;
    }
    Ok(())
}

#[test]
fn nocc_is_a_direct_map() -> Result<()> {
    let (kvt, table) = engine(CcMode::NoCc);
    let tx = kvt.begin()?;
    kvt.set(tx, table, b"k", b"v")?;
    // No staging: visible immediately, commit is a no-op.
    assert_eq!(kvt.get(ONE_SHOT, table, b"k")?, b"v");
    kvt.commit(tx)?;
    kvt.del(ONE_SHOT, table, b"k")?;
    assert!(kvt.get(ONE_SHOT, table, b"k").is_err());
    // Ids never handed out are rejected.
    assert!(matches!(
        kvt.get(999, table, b"k"),
        Err(KvtError::TransactionNotFound(999))
    ));
    Ok(())
}

#[test]
fn batch_atomicity_on_auto_commit() {
    let (kvt, table) = engine(CcMode::Optimistic);
    let ops = vec![
        BatchOp::set(table, "k1", "v1"),
        BatchOp::set(table, "k2", "v2"),
        BatchOp::del(table, "k3"),
    ];
    match kvt.batch_execute(ONE_SHOT, &ops) {
        Err(KvtError::BatchNotFullySuccess { failed, results }) => {
            assert_eq!(failed, 1);
            assert!(results[0].is_ok() && results[1].is_ok());
            assert!(matches!(results[2], Err(KvtError::KeyNotFound { .. })));
        }
        other => panic!("expected partial batch, got {other:?}"),
    }
    assert!(kvt.get(ONE_SHOT, table, b"k1").is_err());
    assert!(kvt.get(ONE_SHOT, table, b"k2").is_err());
}

#[test]
fn errors_name_the_offending_key_and_table() {
    let (kvt, table) = engine(CcMode::Optimistic);
    let err = kvt.get(ONE_SHOT, table, b"missing_key").unwrap_err();
    assert!(err.to_string().contains("missing_key"));
    let err = kvt.get(ONE_SHOT, 424242, b"k").unwrap_err();
    assert!(err.to_string().contains("424242"));
}
