// SPDX-License-Identifier: Apache-2.0

//! Per-transaction bookkeeping: held locks, the undo log, and the sets of
//! segments whose existence is contingent on how the transaction ends.

use std::collections::VecDeque;
use std::sync::Arc;

use crate::segment::Segment;

/// A pre-image record: the exact bytes at `target_address` immediately
/// before one successful write, so they can be restored on rollback.
pub(crate) struct UndoRecord {
    pub(crate) target_address: usize,
    pub(crate) previous_bytes: Vec<u8>,
}

/// Bookkeeping for one in-flight transaction.
///
/// A `Transaction` is created by [`crate::Region::begin`] and consumed
/// exactly once, either by [`crate::Region::end`] on commit or internally
/// by the engine's rollback path on abort — so the type itself models the
/// spec's "active -> {committed, aborted}, terminal in both directions"
/// state machine: there is no way to call another operation on a
/// transaction value that has already been moved into `end`.
pub struct Transaction {
    pub(crate) read_only: bool,

    /// Tags which [`crate::Region`] this transaction was begun against, so
    /// engine entry points can cheaply catch a transaction being replayed
    /// against the wrong region (a client misuse the base spec otherwise
    /// leaves unspecified).
    pub(crate) region_id: usize,

    /// Newest-first: see the write operation for why prepend rather than
    /// append is required for rollback to be correct under overlapping
    /// writes.
    pub(crate) undo_log: VecDeque<UndoRecord>,

    pub(crate) held_exclusive: Vec<Arc<Segment>>,
    pub(crate) held_shared: Vec<Arc<Segment>>,
    pub(crate) pending_allocs: Vec<Arc<Segment>>,
    pub(crate) pending_frees: Vec<Arc<Segment>>,
}

impl Transaction {
    pub(crate) fn new(read_only: bool, region_id: usize) -> Self {
        Self {
            read_only,
            region_id,
            undo_log: VecDeque::new(),
            held_exclusive: Vec::new(),
            held_shared: Vec::new(),
            pending_allocs: Vec::new(),
            pending_frees: Vec::new(),
        }
    }

    pub fn is_read_only(&self) -> bool {
        self.read_only
    }

    /// True iff `segment` is already locked (in either mode) or owned
    /// (pending allocation) by this transaction. Consulted before every
    /// try-acquire in read/write/free to avoid a transaction deadlocking
    /// against itself by re-requesting a lock it already holds.
    pub(crate) fn already_holds(&self, segment: &Arc<Segment>) -> bool {
        Arc::ptr_eq_any(&self.held_exclusive, segment)
            || Arc::ptr_eq_any(&self.held_shared, segment)
            || Arc::ptr_eq_any(&self.pending_allocs, segment)
    }

    /// True iff `segment` is held exclusively (covers the write-after-read
    /// case, and pending allocations which are always held exclusively).
    pub(crate) fn already_holds_exclusive(&self, segment: &Arc<Segment>) -> bool {
        Arc::ptr_eq_any(&self.held_exclusive, segment) || Arc::ptr_eq_any(&self.pending_allocs, segment)
    }

    pub(crate) fn record_undo(&mut self, target_address: usize, previous_bytes: Vec<u8>) {
        self.undo_log.push_front(UndoRecord {
            target_address,
            previous_bytes,
        });
    }

    pub(crate) fn register_shared(&mut self, segment: Arc<Segment>) {
        self.held_shared.push(segment);
    }

    pub(crate) fn register_exclusive(&mut self, segment: Arc<Segment>) {
        self.held_exclusive.push(segment);
    }

    pub(crate) fn register_alloc(&mut self, segment: Arc<Segment>) {
        self.pending_allocs.push(segment);
    }

    pub(crate) fn register_free(&mut self, segment: Arc<Segment>) {
        self.pending_frees.push(segment);
    }
}

/// Small helper trait so `already_holds` reads as one expression per set
/// instead of three manual loops.
trait PtrEqAny<T> {
    fn ptr_eq_any(items: &[Arc<T>], needle: &Arc<T>) -> bool;
}

impl<T> PtrEqAny<T> for Arc<T> {
    fn ptr_eq_any(items: &[Arc<T>], needle: &Arc<T>) -> bool {
        items.iter().any(|item| Arc::ptr_eq(item, needle))
    }
}
