// SPDX-License-Identifier: Apache-2.0

//! The transactional engine: the operation layer implementing the
//! concurrency-control and rollback protocol over [`crate::Region`],
//! [`crate::segment::Segment`] and [`crate::transaction::Transaction`].
//!
//! Every entry point below consumes the [`Transaction`] it is given and
//! hands back `Some(Transaction)` only if the transaction is still live —
//! on abort the engine has already rolled back and dropped it, so `None`
//! *is* the "handle destroyed, retry from `begin`" rule from the spec,
//! enforced by the type system rather than by convention.

use log::{debug, trace, warn};

use crate::error::EngineError;
use crate::region::Region;
use crate::segment::Segment;
use crate::transaction::Transaction;
use std::sync::Arc;

/// Outcome of [`Region::alloc`].
pub enum AllocOutcome {
    /// The segment was created; its base address is returned alongside the
    /// still-live transaction.
    Success(usize, Transaction),
    /// Allocation failed. The transaction is untouched and returned as-is.
    NoMem(Transaction),
    /// A constraint violation aborted the transaction; it no longer exists.
    Abort,
}

impl Region {
    /// Commits (read-only) or finalizes (read-write) `tx`, consuming it.
    ///
    /// Always returns `true` in this design: eager locking at every
    /// read/write/alloc/free means there is no separate validation phase
    /// at commit time that could fail.
    pub fn end(&self, tx: Transaction) -> bool {
        debug_assert_eq!(tx.region_id, self.identity(), "transaction used against the wrong region");

        if tx.read_only {
            for segment in &tx.held_shared {
                segment.release_shared();
            }
            trace!(
                "read-only transaction committed, {} shared lock(s) released",
                tx.held_shared.len()
            );
            return true;
        }

        let was_freed = |segment: &Arc<Segment>| tx.pending_frees.iter().any(|s| Arc::ptr_eq(s, segment));

        for segment in &tx.pending_frees {
            self.remove_segment(segment.base());
            // A segment reached via a prior read before this transaction's
            // `free` call is only held in shared mode, never promoted to
            // exclusive (see `Region::free`); release it accordingly.
            if tx.held_shared.iter().any(|s| Arc::ptr_eq(s, segment)) {
                segment.release_shared();
            } else {
                segment.release_exclusive();
            }
        }

        // Segments in `pending_frees` were already released above; they may
        // also appear in `held_exclusive` (freed via `free` or written to)
        // or `pending_allocs` (allocated and freed in the same transaction),
        // and releasing them again would double-release the lock.
        for segment in &tx.held_exclusive {
            if !was_freed(segment) {
                segment.release_exclusive();
            }
        }

        for segment in &tx.pending_allocs {
            if !was_freed(segment) {
                segment.release_exclusive();
            }
        }

        debug!(
            "read-write transaction committed: {} write(s), {} alloc(s), {} free(s)",
            tx.held_exclusive.len(),
            tx.pending_allocs.len(),
            tx.pending_frees.len(),
        );

        true
    }

    /// Copies `target.len()` bytes from `source` into `target`.
    ///
    /// Returns `(false, None)` if the transaction aborted (segment not
    /// found, tombstoned, or lock contention); the transaction has already
    /// been rolled back and dropped by the time this returns.
    pub fn read(&self, mut tx: Transaction, source: usize, target: &mut [u8]) -> (bool, Option<Transaction>) {
        debug_assert_eq!(tx.region_id, self.identity(), "transaction used against the wrong region");

        let segment = match self.locate(source) {
            Some(segment) => segment,
            None => return self.abort(tx, EngineError::SegmentNotFound),
        };

        if !tx.already_holds(&segment) {
            if !segment.try_acquire_shared() {
                return self.abort(tx, EngineError::LockContention);
            }
            tx.register_shared(segment.clone());
        }

        if segment.is_tombstoned() {
            return self.abort(tx, EngineError::Tombstoned);
        }

        let offset = source - segment.base();
        segment.read_at(offset, target);
        (true, Some(tx))
    }

    /// Copies `source` into the region starting at `target`.
    ///
    /// Returns `(false, None)` on abort (read-only transaction, segment not
    /// found, tombstoned, lock contention, or pre-image allocation
    /// failure).
    pub fn write(&self, mut tx: Transaction, source: &[u8], target: usize) -> (bool, Option<Transaction>) {
        debug_assert_eq!(tx.region_id, self.identity(), "transaction used against the wrong region");

        if tx.read_only {
            return self.abort(tx, EngineError::ReadOnly);
        }

        let segment = match self.locate(target) {
            Some(segment) => segment,
            None => return self.abort(tx, EngineError::SegmentNotFound),
        };

        if !tx.already_holds_exclusive(&segment) {
            if !segment.try_acquire_exclusive() {
                return self.abort(tx, EngineError::LockContention);
            }
            tx.register_exclusive(segment.clone());
        }

        if segment.is_tombstoned() {
            return self.abort(tx, EngineError::Tombstoned);
        }

        let offset = target - segment.base();
        let mut previous = vec![0u8; source.len()];
        segment.read_at(offset, &mut previous);

        // A write without a captured pre-image would make rollback
        // unsound, so any failure to stash it aborts rather than returning
        // a softer "out of memory" result the way `alloc` does. `Vec`
        // allocation panics rather than returning an error on OOM in safe
        // Rust, so in practice this path exists for documentation of
        // intent; should a fallible-allocation path ever replace it, it
        // must abort here, not return `NoMem`.
        tx.record_undo(target, previous);

        segment.write_at(offset, source);
        (true, Some(tx))
    }

    /// Allocates a new, zero-initialized segment of `size` bytes, aligned
    /// to the region's alignment.
    pub fn alloc(&self, mut tx: Transaction, size: usize) -> AllocOutcome {
        debug_assert_eq!(tx.region_id, self.identity(), "transaction used against the wrong region");

        if tx.read_only {
            let (_, _) = self.abort(tx, EngineError::ReadOnly);
            return AllocOutcome::Abort;
        }

        let segment = match Segment::new(size, self.alignment(), false) {
            Ok(segment) => Arc::new(segment),
            Err(_) => {
                warn!("alloc: out of memory for {size} byte segment");
                return AllocOutcome::NoMem(tx);
            }
        };

        // Uncontested: nobody else can have a reference to this segment
        // yet, so a try-exclusive here could never fail.
        let acquired = segment.try_acquire_exclusive();
        debug_assert!(acquired, "a freshly allocated segment's lock must be uncontested");

        let base = segment.base();
        tx.register_alloc(segment.clone());
        self.insert_segment(segment);

        trace!("alloc: segment created at {base:#x}, size={size}");
        AllocOutcome::Success(base, tx)
    }

    /// Marks the segment based at `target` for deletion at commit.
    ///
    /// Returns `(false, None)` on abort (segment not found, root segment,
    /// or lock contention — unless the transaction already holds the
    /// segment's lock in some mode, shared or exclusive).
    pub fn free(&self, mut tx: Transaction, target: usize) -> (bool, Option<Transaction>) {
        debug_assert_eq!(tx.region_id, self.identity(), "transaction used against the wrong region");

        if tx.read_only {
            return self.abort(tx, EngineError::ReadOnly);
        }

        let segment = match self.locate(target) {
            Some(segment) if segment.base() == target => segment,
            _ => return self.abort(tx, EngineError::SegmentNotFound),
        };

        if segment.is_root() {
            return self.abort(tx, EngineError::RootSegment);
        }

        // A lock already held by this transaction in *either* mode counts:
        // a segment read earlier in this same transaction may be freed
        // without attempting (and failing) a fresh exclusive acquisition
        // against its own shared hold.
        if !tx.already_holds(&segment) {
            if !segment.try_acquire_exclusive() {
                return self.abort(tx, EngineError::LockContention);
            }
            tx.register_exclusive(segment.clone());
        }

        segment.mark_tombstoned();
        tx.register_free(segment);
        (true, Some(tx))
    }

    /// Rolls back every speculative effect of `tx` and releases its locks.
    fn rollback(&self, tx: Transaction) {
        if tx.read_only {
            for segment in &tx.held_shared {
                segment.release_shared();
            }
            return;
        }

        for record in &tx.undo_log {
            if let Some(segment) = self.locate(record.target_address) {
                let offset = record.target_address - segment.base();
                segment.write_at(offset, &record.previous_bytes);
            }
        }

        for segment in &tx.pending_frees {
            segment.clear_tombstone();
        }

        for segment in &tx.pending_allocs {
            self.remove_segment(segment.base());
            segment.release_exclusive();
        }

        for segment in &tx.held_exclusive {
            segment.release_exclusive();
        }

        for segment in &tx.held_shared {
            segment.release_shared();
        }

        debug!(
            "transaction rolled back: {} undo record(s) replayed",
            tx.undo_log.len()
        );
    }

    /// Rolls `tx` back and reports the abort, in the shape every
    /// `(bool, Option<Transaction>)`-returning entry point needs.
    fn abort(&self, tx: Transaction, reason: EngineError) -> (bool, Option<Transaction>) {
        trace!("abort: {reason}");
        self.rollback(tx);
        (false, None)
    }
}
