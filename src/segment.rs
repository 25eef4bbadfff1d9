// SPDX-License-Identifier: Apache-2.0

//! A single aligned, address-stable byte buffer and its lock.

use std::alloc::{alloc_zeroed, dealloc, Layout};
use std::cell::UnsafeCell;
use std::ptr::NonNull;
use std::sync::atomic::{AtomicBool, Ordering};

use crate::error::RegionError;
use crate::lock::SegLock;

/// Owning, zero-initialized, custom-aligned heap buffer.
///
/// `Vec<u8>` only guarantees byte alignment, which is not enough once the
/// region's alignment exceeds one byte, so the buffer is allocated directly
/// through [`std::alloc`] the way the rest of the ecosystem does for this
/// kind of raw memory region.
struct AlignedBuffer {
    ptr: NonNull<u8>,
    layout: Layout,
}

// SAFETY: the buffer is only ever reached through the owning `Segment`,
// whose own lock mediates concurrent access to the bytes.
unsafe impl Send for AlignedBuffer {}
unsafe impl Sync for AlignedBuffer {}

impl AlignedBuffer {
    fn alloc(size: usize, alignment: usize) -> Result<Self, RegionError> {
        let layout = Layout::from_size_align(size, alignment).map_err(|_| RegionError::AllocationFailed {
            size,
            alignment,
        })?;

        // SAFETY: `layout` has non-zero size (callers only ever request
        // positive multiples of alignment); the returned pointer is either
        // valid for `layout` or null, and we check for null immediately.
        let raw = unsafe { alloc_zeroed(layout) };
        let ptr = NonNull::new(raw).ok_or(RegionError::AllocationFailed { size, alignment })?;

        Ok(Self { ptr, layout })
    }

    fn as_slice(&self) -> &[u8] {
        // SAFETY: `ptr` is valid for `layout.size()` bytes for the lifetime
        // of this buffer, and access is serialized by the segment's lock.
        unsafe { std::slice::from_raw_parts(self.ptr.as_ptr(), self.layout.size()) }
    }

    fn as_mut_slice(&mut self) -> &mut [u8] {
        // SAFETY: see `as_slice`; `&mut self` gives us exclusive access.
        unsafe { std::slice::from_raw_parts_mut(self.ptr.as_ptr(), self.layout.size()) }
    }

    fn base(&self) -> usize {
        self.ptr.as_ptr() as usize
    }
}

impl Drop for AlignedBuffer {
    fn drop(&mut self) {
        // SAFETY: `ptr`/`layout` are exactly the pair returned by `alloc_zeroed`
        // in `alloc`, and this runs at most once since `Segment` owns the buffer.
        unsafe { dealloc(self.ptr.as_ptr(), self.layout) }
    }
}

/// A contiguous, aligned byte buffer and the concurrency-control state that
/// guards it: the unit of locking for the whole engine.
///
/// The buffer sits behind a bare [`UnsafeCell`] rather than a `Mutex` or
/// `RwLock`: the engine's locking protocol is the one described in the
/// spec (non-blocking `try_acquire_*`, held across a whole transaction
/// rather than lexically scoped), tracked explicitly in
/// [`crate::transaction::Transaction`]'s held-lock sets, not by the
/// borrow checker. `read_at`/`write_at` trust that protocol and only
/// require `&self`.
pub struct Segment {
    memory: UnsafeCell<AlignedBuffer>,
    size: usize,
    lock: SegLock,
    tombstoned: AtomicBool,
    root: bool,
}

// SAFETY: all access to `memory` is mediated by `lock`, acquired and held
// by the caller through `try_acquire_shared`/`try_acquire_exclusive` for
// the duration of any `read_at`/`write_at` call.
unsafe impl Sync for Segment {}

impl Segment {
    pub(crate) fn new(size: usize, alignment: usize, root: bool) -> Result<Self, RegionError> {
        Ok(Self {
            memory: UnsafeCell::new(AlignedBuffer::alloc(size, alignment)?),
            size,
            lock: SegLock::new(),
            tombstoned: AtomicBool::new(false),
            root,
        })
    }

    pub fn base(&self) -> usize {
        // SAFETY: `base()` only reads the buffer's pointer value, which is
        // immutable for the buffer's whole lifetime; no lock is needed.
        unsafe { (*self.memory.get()).base() }
    }

    pub fn size(&self) -> usize {
        self.size
    }

    pub fn is_root(&self) -> bool {
        self.root
    }

    /// Whether `address` falls within `[base, base + size)`.
    pub fn contains(&self, address: usize) -> bool {
        let base = self.base();
        address >= base && address - base < self.size
    }

    pub fn try_acquire_shared(&self) -> bool {
        self.lock.try_acquire_shared()
    }

    pub fn try_acquire_exclusive(&self) -> bool {
        self.lock.try_acquire_exclusive()
    }

    pub fn release_shared(&self) {
        self.lock.release_shared()
    }

    pub fn release_exclusive(&self) {
        self.lock.release_exclusive()
    }

    pub fn mark_tombstoned(&self) {
        self.tombstoned.store(true, Ordering::Release);
    }

    pub fn clear_tombstone(&self) {
        self.tombstoned.store(false, Ordering::Release);
    }

    pub fn is_tombstoned(&self) -> bool {
        self.tombstoned.load(Ordering::Acquire)
    }

    /// Reads `len` bytes starting at byte offset `offset` from the segment's
    /// base into `dst`.
    ///
    /// # Safety (protocol, not a compiler-checked invariant)
    /// The caller must hold this segment's lock, in shared or exclusive
    /// mode, for the duration of this call.
    pub fn read_at(&self, offset: usize, dst: &mut [u8]) {
        let len = dst.len();
        // SAFETY: caller holds at least a shared lock (protocol above), so
        // no concurrent writer can be touching this range.
        let buffer = unsafe { &*self.memory.get() };
        dst.copy_from_slice(&buffer.as_slice()[offset..offset + len]);
    }

    /// Writes `src` into the segment starting at byte offset `offset`.
    ///
    /// # Safety (protocol, not a compiler-checked invariant)
    /// The caller must hold this segment's lock in exclusive mode for the
    /// duration of this call.
    pub fn write_at(&self, offset: usize, src: &[u8]) {
        let len = src.len();
        // SAFETY: caller holds the exclusive lock (protocol above), so no
        // other reader or writer can observe this buffer concurrently.
        let buffer = unsafe { &mut *self.memory.get() };
        buffer.as_mut_slice()[offset..offset + len].copy_from_slice(src);
    }
}
