// SPDX-License-Identifier: Apache-2.0

use std::sync::mpsc;
use std::sync::Arc;
use std::thread;

use segtx::{AllocOutcome, Region};

#[cfg(feature = "verbose")]
fn init_logging() {
    let _ = env_logger::builder().is_test(true).filter_level(log::LevelFilter::Trace).try_init();
}

#[cfg(not(feature = "verbose"))]
fn init_logging() {}

/// Scenario 1: a fresh region reads back as zero.
#[test]
fn fresh_region_reads_zero() {
    init_logging();
    let region = Region::create(1024, 8).expect("create");

    let tx = region.begin(true);
    let mut buf = [0xffu8; 8];
    let (ok, tx) = region.read(tx, region.start(), &mut buf);
    assert!(ok);
    assert_eq!(buf, [0u8; 8]);
    assert!(region.end(tx.expect("still live")));
}

/// Scenario 2: a committed write is visible to a later transaction.
#[test]
fn committed_write_is_visible_to_later_transaction() {
    let region = Region::create(1024, 8).expect("create");

    let tx = region.begin(false);
    let (ok, tx) = region.write(tx, &[1, 2, 3, 4, 5, 6, 7, 8], region.start());
    assert!(ok);
    assert!(region.end(tx.expect("still live")));

    let tx = region.begin(true);
    let mut buf = [0u8; 8];
    let (ok, tx) = region.read(tx, region.start(), &mut buf);
    assert!(ok);
    assert_eq!(buf, [1, 2, 3, 4, 5, 6, 7, 8]);
    assert!(region.end(tx.expect("still live")));
}

/// Scenario 3: two writers contending for the same segment — one commits,
/// the other aborts, and the committed value is the one that survives.
#[test]
fn contending_writers_one_aborts_one_commits() {
    let region = Arc::new(Region::create(1024, 8).expect("create"));

    let (holder_ready_tx, holder_ready_rx) = mpsc::channel::<()>();
    let (release_holder_tx, release_holder_rx) = mpsc::channel::<()>();

    let holder_region = region.clone();
    let holder = thread::spawn(move || {
        let tx = holder_region.begin(false);
        let (ok, tx) = holder_region.write(tx, &[9u8; 8], holder_region.start());
        assert!(ok, "holder should acquire the uncontended root lock");
        holder_ready_tx.send(()).expect("signal ready");

        release_holder_rx.recv().expect("wait for release signal");
        assert!(holder_region.end(tx.expect("still live")));
    });

    holder_ready_rx.recv().expect("wait for holder to take the lock");

    let tx = region.begin(false);
    let (ok, tx) = region.write(tx, &[1u8; 8], region.start());
    assert!(!ok, "contending writer must abort");
    assert!(tx.is_none(), "aborted transaction handle is consumed");

    release_holder_tx.send(()).expect("release holder");
    holder.join().expect("holder thread panicked");

    let tx = region.begin(true);
    let mut buf = [0u8; 8];
    let (ok, tx) = region.read(tx, region.start(), &mut buf);
    assert!(ok);
    assert_eq!(buf, [9u8; 8]);
    assert!(region.end(tx.expect("still live")));
}

/// Scenario 4: a segment allocated by an aborted transaction never becomes
/// visible — `locate` cannot find it afterward.
#[test]
fn aborted_alloc_leaves_no_trace() {
    let region = Arc::new(Region::create(1024, 8).expect("create"));

    let (holder_ready_tx, holder_ready_rx) = mpsc::channel::<()>();
    let (release_holder_tx, release_holder_rx) = mpsc::channel::<()>();

    let holder_region = region.clone();
    let holder = thread::spawn(move || {
        let tx = holder_region.begin(false);
        let (ok, tx) = holder_region.write(tx, &[0xFFu8; 8], holder_region.start());
        assert!(ok);
        holder_ready_tx.send(()).expect("signal ready");

        release_holder_rx.recv().expect("wait for release signal");
        assert!(holder_region.end(tx.expect("still live")));
    });

    holder_ready_rx.recv().expect("wait for holder to take the lock");

    let tx = region.begin(false);
    let (address, tx) = match region.alloc(tx, 16) {
        AllocOutcome::Success(address, tx) => (address, tx),
        _ => panic!("uncontended alloc should succeed"),
    };

    // Forcing an abort: the root is held exclusively by the other thread.
    let (ok, tx) = region.write(tx, &[1u8; 8], region.start());
    assert!(!ok, "write against the contended root must abort");
    assert!(tx.is_none());

    release_holder_tx.send(()).expect("release holder");
    holder.join().expect("holder thread panicked");

    let tx = region.begin(true);
    let mut buf = [0u8; 16];
    let (ok, tx) = region.read(tx, address, &mut buf);
    assert!(!ok, "rolled-back allocation must not be locatable");
    assert!(tx.is_none());
}

/// Scenario 5: allocate, commit, write, commit, read back, free, commit,
/// then confirm the freed address is no longer locatable.
#[test]
fn alloc_write_free_lifecycle() {
    let region = Region::create(1024, 8).expect("create");

    let tx = region.begin(false);
    let (address, tx) = match region.alloc(tx, 32) {
        AllocOutcome::Success(address, tx) => (address, tx),
        _ => panic!("uncontended alloc should succeed"),
    };
    let (ok, tx) = region.write(tx, &[0xABu8; 32], address);
    assert!(ok);
    assert!(region.end(tx.expect("still live")));

    let tx = region.begin(false);
    let mut buf = [0u8; 32];
    let (ok, tx) = region.read(tx, address, &mut buf);
    assert!(ok);
    assert_eq!(buf, [0xABu8; 32]);
    let tx = tx.expect("still live");

    let (ok, tx) = region.free(tx, address);
    assert!(ok);
    assert!(region.end(tx.expect("still live")));

    let tx = region.begin(false);
    let mut buf = [0u8; 32];
    let (ok, tx) = region.read(tx, address, &mut buf);
    assert!(!ok, "freed segment must no longer be locatable");
    assert!(tx.is_none());
}

/// Scenario 6: rollback of two overlapping writes to the same address
/// restores the byte value from *before* either write, not the
/// intermediate value between them — exercising the prepend-and-replay-
/// front-to-back undo ordering.
#[test]
fn rollback_restores_overlapping_writes() {
    let region = Region::create(1024, 8).expect("create");

    let tx = region.begin(false);
    let (ok, tx) = region.write(tx, &[7u8; 8], region.start());
    assert!(ok);
    assert!(region.end(tx.expect("still live")));

    let tx = region.begin(false);
    let (ok, tx) = region.write(tx, &[1u8; 8], region.start());
    assert!(ok);
    let tx = tx.expect("still live");

    let (ok, tx) = region.write(tx, &[2u8; 8], region.start());
    assert!(ok);
    let tx = tx.expect("still live");

    // Force an abort via a constraint violation rather than contention:
    // an out-of-range address is guaranteed to abort deterministically.
    let mut scratch = [0u8; 8];
    let (ok, tx) = region.read(tx, region.start() + 4096, &mut scratch);
    assert!(!ok, "out-of-range address must abort");
    assert!(tx.is_none());

    let tx = region.begin(true);
    let mut buf = [0u8; 8];
    let (ok, tx) = region.read(tx, region.start(), &mut buf);
    assert!(ok);
    assert_eq!(buf, [7u8; 8], "rollback must restore the pre-transaction value");
    assert!(region.end(tx.expect("still live")));
}

/// Read-after-write within a single transaction observes its own write.
#[test]
fn read_after_write_within_one_transaction() {
    let region = Region::create(64, 8).expect("create");

    let tx = region.begin(false);
    let (ok, tx) = region.write(tx, &[5u8; 8], region.start());
    assert!(ok);
    let tx = tx.expect("still live");

    let mut buf = [0u8; 8];
    let (ok, tx) = region.read(tx, region.start(), &mut buf);
    assert!(ok);
    assert_eq!(buf, [5u8; 8]);
    assert!(region.end(tx.expect("still live")));
}

/// A transaction may re-touch a segment it already holds without
/// deadlocking against itself.
#[test]
fn revisiting_a_held_segment_does_not_self_deadlock() {
    let region = Region::create(64, 8).expect("create");

    let tx = region.begin(false);
    let (ok, tx) = region.write(tx, &[1u8; 8], region.start());
    assert!(ok);
    let tx = tx.expect("still live");

    let (ok, tx) = region.write(tx, &[2u8; 8], region.start());
    assert!(ok);
    let tx = tx.expect("still live");

    let mut buf = [0u8; 8];
    let (ok, tx) = region.read(tx, region.start(), &mut buf);
    assert!(ok);
    assert_eq!(buf, [2u8; 8]);
    assert!(region.end(tx.expect("still live")));
}

/// Read-only transactions reject writes outright.
#[test]
fn read_only_transaction_rejects_writes() {
    let region = Region::create(64, 8).expect("create");

    let tx = region.begin(true);
    let (ok, tx) = region.write(tx, &[1u8; 8], region.start());
    assert!(!ok);
    assert!(tx.is_none());
}

/// The root segment can never be freed.
#[test]
fn root_segment_cannot_be_freed() {
    let region = Region::create(64, 8).expect("create");

    let tx = region.begin(false);
    let (ok, tx) = region.free(tx, region.start());
    assert!(!ok);
    assert!(tx.is_none());
}

/// An address outside every segment aborts both reads and writes.
#[test]
fn out_of_range_address_aborts() {
    let region = Region::create(64, 8).expect("create");

    let tx = region.begin(true);
    let mut buf = [0u8; 8];
    let (ok, tx) = region.read(tx, region.start() + 4096, &mut buf);
    assert!(!ok);
    assert!(tx.is_none());

    let tx = region.begin(false);
    let (ok, tx) = region.write(tx, &[1u8; 8], region.start() + 4096);
    assert!(!ok);
    assert!(tx.is_none());
}

/// `alloc` reports `NoMem` rather than aborting when the requested size
/// cannot be satisfied; the transaction stays live.
#[test]
fn alloc_nomem_keeps_transaction_alive() {
    let region = Region::create(64, 8).expect("create");

    let tx = region.begin(false);
    match region.alloc(tx, usize::MAX) {
        AllocOutcome::NoMem(tx) => {
            let (ok, tx) = region.write(tx, &[1u8; 8], region.start());
            assert!(ok, "transaction must still be usable after NoMem");
            assert!(region.end(tx.expect("still live")));
        }
        AllocOutcome::Success(_, tx) => {
            region.end(tx);
            panic!("an oversized allocation should not succeed");
        }
        AllocOutcome::Abort => panic!("NoMem must not abort the transaction"),
    }
}
