//! End-to-end tests through the `Database` facade.
//!
//! These cover persistence across sessions, crash recovery, isolation levels
//! and deadlock handling.

use std::mem;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Barrier};
use std::thread;
use std::time::Duration;

use tempfile::{tempdir, TempDir};
use tidedb::{Database, DbOptions, Error, IsolationLevel, Uid};

const RC: IsolationLevel = IsolationLevel::ReadCommitted;
const RR: IsolationLevel = IsolationLevel::RepeatableRead;

fn test_options() -> DbOptions {
    DbOptions::default().memory(1 << 21)
}

fn create_db() -> (TempDir, PathBuf, Database) {
    let dir = tempdir().unwrap();
    let base = dir.path().join("test");
    let db = Database::create(&base, &test_options()).unwrap();
    (dir, base, db)
}

fn reopen(base: &Path) -> Database {
    Database::open(base, &test_options()).unwrap()
}

/// Leave the database without closing it, as a crashed process would.
fn crash(db: Database) {
    mem::forget(db);
}

fn read_as_new(db: &Database, uid: Uid) -> Option<Vec<u8>> {
    let xid = db.begin(RC).unwrap();
    let data = db.read(xid, uid).unwrap();
    db.commit(xid).unwrap();
    data
}

// ============================================================================
// Persistence
// ============================================================================

#[test]
fn test_committed_row_survives_clean_reopen() {
    let (_dir, base, db) = create_db();
    let xid = db.begin(RC).unwrap();
    let uid = db.insert(xid, b"hello").unwrap();
    db.commit(xid).unwrap();
    db.close().unwrap();
    drop(db);

    let db = reopen(&base);
    assert_eq!(read_as_new(&db, uid).as_deref(), Some(&b"hello"[..]));
}

#[test]
fn test_many_rows_across_pages() {
    let (_dir, base, db) = create_db();
    let xid = db.begin(RC).unwrap();
    let uids: Vec<Uid> = (0..500u32)
        .map(|i| db.insert(xid, format!("row-{i:04}-{}", "x".repeat(100)).as_bytes()).unwrap())
        .collect();
    db.commit(xid).unwrap();
    drop(db);

    let db = reopen(&base);
    for (i, uid) in uids.iter().enumerate() {
        let data = read_as_new(&db, *uid).unwrap();
        assert!(data.starts_with(format!("row-{i:04}").as_bytes()));
    }
}

// ============================================================================
// Crash recovery
// ============================================================================

#[test]
fn test_crash_keeps_committed_and_drops_uncommitted() {
    let (_dir, base, db) = create_db();

    let committed = db.begin(RC).unwrap();
    let kept = db.insert(committed, b"committed").unwrap();
    db.commit(committed).unwrap();

    let pending = db.begin(RC).unwrap();
    let lost = db.insert(pending, b"in flight").unwrap();
    crash(db);

    let db = reopen(&base);
    assert_eq!(read_as_new(&db, kept).as_deref(), Some(&b"committed"[..]));
    assert_eq!(read_as_new(&db, lost), None);
    assert!(db.transaction_manager().is_aborted(pending).unwrap());
}

#[test]
fn test_crash_undoes_uncommitted_delete() {
    let (_dir, base, db) = create_db();

    let setup = db.begin(RC).unwrap();
    let uid = db.insert(setup, b"survivor").unwrap();
    db.commit(setup).unwrap();

    let deleter = db.begin(RC).unwrap();
    assert!(db.delete(deleter, uid).unwrap());
    crash(db);

    let db = reopen(&base);
    assert_eq!(read_as_new(&db, uid).as_deref(), Some(&b"survivor"[..]));
}

#[test]
fn test_crash_keeps_committed_delete() {
    let (_dir, base, db) = create_db();

    let setup = db.begin(RC).unwrap();
    let uid = db.insert(setup, b"doomed").unwrap();
    db.commit(setup).unwrap();

    let deleter = db.begin(RC).unwrap();
    assert!(db.delete(deleter, uid).unwrap());
    db.commit(deleter).unwrap();
    crash(db);

    let db = reopen(&base);
    assert_eq!(read_as_new(&db, uid), None);
}

#[test]
fn test_recovery_is_repeatable() {
    let (_dir, base, db) = create_db();
    let xid = db.begin(RC).unwrap();
    let uid = db.insert(xid, b"twice").unwrap();
    db.commit(xid).unwrap();
    crash(db);

    // Crash again right after recovering
    crash(reopen(&base));

    let db = reopen(&base);
    assert_eq!(read_as_new(&db, uid).as_deref(), Some(&b"twice"[..]));
}

// ============================================================================
// Isolation
// ============================================================================

#[test]
fn test_read_committed_sees_later_commits() {
    let (_dir, _base, db) = create_db();
    let reader = db.begin(RC).unwrap();

    let writer = db.begin(RC).unwrap();
    let uid = db.insert(writer, b"v1").unwrap();
    assert_eq!(db.read(reader, uid).unwrap(), None);

    db.commit(writer).unwrap();
    assert_eq!(db.read(reader, uid).unwrap().as_deref(), Some(&b"v1"[..]));
}

#[test]
fn test_repeatable_read_keeps_snapshot() {
    let (_dir, _base, db) = create_db();
    let setup = db.begin(RC).unwrap();
    let uid = db.insert(setup, b"stable").unwrap();
    db.commit(setup).unwrap();

    let reader = db.begin(RR).unwrap();
    let deleter = db.begin(RC).unwrap();
    assert!(db.delete(deleter, uid).unwrap());
    db.commit(deleter).unwrap();

    // Deleted by a transaction that started after the reader
    assert_eq!(db.read(reader, uid).unwrap().as_deref(), Some(&b"stable"[..]));

    let fresh = db.begin(RR).unwrap();
    assert_eq!(db.read(fresh, uid).unwrap(), None);
}

#[test]
fn test_repeatable_read_delete_conflict() {
    let (_dir, _base, db) = create_db();
    let setup = db.begin(RC).unwrap();
    let uid = db.insert(setup, b"contested").unwrap();
    db.commit(setup).unwrap();

    let reader = db.begin(RR).unwrap();
    let deleter = db.begin(RC).unwrap();
    assert!(db.delete(deleter, uid).unwrap());
    db.commit(deleter).unwrap();

    assert!(matches!(db.delete(reader, uid), Err(Error::ConcurrentUpdate)));
    assert!(matches!(db.insert(reader, b"late"), Err(Error::DeadTransaction(_))));
    db.abort(reader).unwrap();
}

// ============================================================================
// Deadlock
// ============================================================================

#[test]
fn test_exactly_one_side_of_deadlock_fails() {
    let (_dir, _base, db) = create_db();
    let db = Arc::new(db);

    let setup = db.begin(RC).unwrap();
    let a = db.insert(setup, b"a").unwrap();
    let b = db.insert(setup, b"b").unwrap();
    db.commit(setup).unwrap();

    let barrier = Arc::new(Barrier::new(2));
    let handles: Vec<_> = [(a, b), (b, a)]
        .into_iter()
        .map(|(first, second)| {
            let db = Arc::clone(&db);
            let barrier = Arc::clone(&barrier);
            thread::spawn(move || {
                let xid = db.begin(RC).unwrap();
                assert!(db.delete(xid, first).unwrap());
                barrier.wait();
                match db.delete(xid, second) {
                    Ok(deleted) => {
                        assert!(deleted);
                        db.commit(xid).unwrap();
                        true
                    }
                    Err(Error::Deadlock) => {
                        db.abort(xid).unwrap();
                        false
                    }
                    Err(err) => panic!("unexpected error: {err}"),
                }
            })
        })
        .collect();

    let outcomes: Vec<bool> = handles.into_iter().map(|h| h.join().unwrap()).collect();
    assert_eq!(outcomes.iter().filter(|&&won| won).count(), 1);

    // The winner deleted both rows
    assert_eq!(read_as_new(&db, a), None);
    assert_eq!(read_as_new(&db, b), None);
}

#[test]
fn test_abort_releases_blocked_delete() {
    let (_dir, _base, db) = create_db();
    let db = Arc::new(db);

    let setup = db.begin(RC).unwrap();
    let uid = db.insert(setup, b"row").unwrap();
    db.commit(setup).unwrap();

    let holder = db.begin(RC).unwrap();
    let blocked = db.begin(RC).unwrap();
    assert!(db.delete(holder, uid).unwrap());

    let handle = {
        let db = Arc::clone(&db);
        thread::spawn(move || db.delete(blocked, uid))
    };
    thread::sleep(Duration::from_millis(50));
    db.abort(blocked).unwrap();

    // An abort that beats the thread to the lock table finds nothing to wake
    let outcome = handle.join().unwrap();
    assert!(
        matches!(outcome, Err(Error::DeadTransaction(x) | Error::UnknownTransaction(x)) if x == blocked),
        "unexpected outcome: {outcome:?}"
    );

    db.commit(holder).unwrap();
    assert_eq!(read_as_new(&db, uid), None);
}
