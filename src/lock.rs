// SPDX-License-Identifier: Apache-2.0

//! A non-blocking reader-writer lock.
//!
//! Every acquisition is a single (possibly internally retried) atomic
//! operation: a thread that cannot get the lock is told so immediately, it
//! never parks. The retries inside [`SegLock::try_acquire_shared`] only ride
//! out a benign compare-and-swap race between readers that are all about to
//! succeed; they are not a substitute for blocking on a writer.
//!
//! State encoding of the inner counter:
//! - `0`: unlocked
//! - `-1`: held exclusively
//! - `n > 0`: held by `n` concurrent readers

use std::sync::atomic::{AtomicIsize, Ordering};

const UNLOCKED: isize = 0;
const EXCLUSIVE: isize = -1;

#[derive(Debug, Default)]
pub struct SegLock {
    state: AtomicIsize,
}

impl SegLock {
    pub fn new() -> Self {
        Self {
            state: AtomicIsize::new(UNLOCKED),
        }
    }

    /// Attempts to acquire the lock in shared mode. Never blocks.
    pub fn try_acquire_shared(&self) -> bool {
        loop {
            let current = self.state.load(Ordering::Acquire);
            if current == EXCLUSIVE {
                return false;
            }
            match self.state.compare_exchange_weak(
                current,
                current + 1,
                Ordering::AcqRel,
                Ordering::Relaxed,
            ) {
                Ok(_) => return true,
                Err(_) => continue,
            }
        }
    }

    /// Attempts to acquire the lock in exclusive mode. Never blocks.
    pub fn try_acquire_exclusive(&self) -> bool {
        self.state
            .compare_exchange(UNLOCKED, EXCLUSIVE, Ordering::AcqRel, Ordering::Relaxed)
            .is_ok()
    }

    pub fn release_shared(&self) {
        let previous = self.state.fetch_sub(1, Ordering::AcqRel);
        debug_assert!(previous > 0, "release_shared called without a shared hold");
    }

    pub fn release_exclusive(&self) {
        let previous = self.state.swap(UNLOCKED, Ordering::AcqRel);
        debug_assert_eq!(previous, EXCLUSIVE, "release_exclusive called without an exclusive hold");
    }
}
