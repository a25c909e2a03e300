//! Buffer descriptor & state word (C1, Section 3, Section 4.1). The packed
//! `AtomicU32` is the single concurrency primitive everything else in this
//! crate is built on: a spinlock bit gates multi-field updates, and a
//! handful of single-bit reads are safe without the spinlock as long as
//! the reader holds a pin (Section 4.1, last paragraph).

use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};

use crossbeam_utils::Backoff;
use parking_lot::{Condvar, Mutex};

use crate::latch::ContentLock;
use crate::tag::Tag;

// Bit layout, low to high. Matches the original's `BM_*` flags 1:1; see
// `original_source/bufmgr.c` for the reference layout this packs.
const SPIN_LOCK: u32 = 1 << 0;
const IO_IN_PROGRESS: u32 = 1 << 1;
const IO_ERROR: u32 = 1 << 2;
const VALID: u32 = 1 << 3;
const TAG_VALID: u32 = 1 << 4;
const DIRTY: u32 = 1 << 5;
const JUST_DIRTIED: u32 = 1 << 6;
const CHECKPOINT_NEEDED: u32 = 1 << 7;
const PERMANENT: u32 = 1 << 8;
const PIN_COUNT_WAITER: u32 = 1 << 9;

const USAGE_COUNT_SHIFT: u32 = 10;
const USAGE_COUNT_BITS: u32 = 4;
const USAGE_COUNT_MASK: u32 = ((1 << USAGE_COUNT_BITS) - 1) << USAGE_COUNT_SHIFT;
pub const MAX_USAGE_COUNT: u32 = (1 << USAGE_COUNT_BITS) - 1; // 15, spec caps usage at 5 by convention

const REFCOUNT_SHIFT: u32 = USAGE_COUNT_SHIFT + USAGE_COUNT_BITS;
const REFCOUNT_BITS: u32 = 18;
const REFCOUNT_MASK: u32 = ((1u32 << REFCOUNT_BITS) - 1) << REFCOUNT_SHIFT;
pub const MAX_REFCOUNT: u32 = (1 << REFCOUNT_BITS) - 1;

/// Decoded view of the state word, returned by operations that need to
/// inspect multiple fields at once without re-deriving bit masks at every
/// call site.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BufState(pub u32);

impl BufState {
    #[inline]
    pub fn spin_locked(self) -> bool {
        self.0 & SPIN_LOCK != 0
    }
    #[inline]
    pub fn io_in_progress(self) -> bool {
        self.0 & IO_IN_PROGRESS != 0
    }
    #[inline]
    pub fn io_error(self) -> bool {
        self.0 & IO_ERROR != 0
    }
    #[inline]
    pub fn valid(self) -> bool {
        self.0 & VALID != 0
    }
    #[inline]
    pub fn tag_valid(self) -> bool {
        self.0 & TAG_VALID != 0
    }
    #[inline]
    pub fn dirty(self) -> bool {
        self.0 & DIRTY != 0
    }
    #[inline]
    pub fn just_dirtied(self) -> bool {
        self.0 & JUST_DIRTIED != 0
    }
    #[inline]
    pub fn checkpoint_needed(self) -> bool {
        self.0 & CHECKPOINT_NEEDED != 0
    }
    #[inline]
    pub fn permanent(self) -> bool {
        self.0 & PERMANENT != 0
    }
    #[inline]
    pub fn pin_count_waiter(self) -> bool {
        self.0 & PIN_COUNT_WAITER != 0
    }
    #[inline]
    pub fn usage_count(self) -> u32 {
        (self.0 & USAGE_COUNT_MASK) >> USAGE_COUNT_SHIFT
    }
    #[inline]
    pub fn refcount(self) -> u32 {
        (self.0 & REFCOUNT_MASK) >> REFCOUNT_SHIFT
    }
}

/// A held spinlock, yielded by [`BufferDesc::lock`]. Dropping it without
/// calling [`SpinGuard::unlock`] or [`SpinGuard::unlock_with`] is a bug
/// (it would wedge every other locker); debug builds assert this.
pub struct SpinGuard<'a> {
    state: &'a AtomicU32,
    value: u32,
    #[cfg(debug_assertions)]
    released: bool,
}

impl<'a> SpinGuard<'a> {
    #[inline]
    pub fn get(&self) -> BufState {
        BufState(self.value)
    }

    /// Release the spinlock, writing back `new_bits` as the new word
    /// (with `SPIN_LOCK` cleared regardless of whether `new_bits` set it).
    #[inline]
    pub fn unlock_with(mut self, new_bits: u32) {
        self.state.store(new_bits & !SPIN_LOCK, Ordering::Release);
        #[cfg(debug_assertions)]
        {
            self.released = true;
        }
    }

    /// Release the spinlock without changing any other field.
    #[inline]
    pub fn unlock(self) {
        let value = self.value;
        self.unlock_with(value);
    }
}

#[cfg(debug_assertions)]
impl<'a> Drop for SpinGuard<'a> {
    fn drop(&mut self) {
        if !self.released {
            panic!("SpinGuard dropped without unlock_with/unlock");
        }
    }
}

/// One per-frame descriptor: atomic state word, tag, content lock, I/O
/// condition variable, and cleanup-lock waiter identity (Section 3).
pub struct BufferDesc {
    state: AtomicU32,
    /// Guarded by the header spinlock; only meaningful while `TAG_VALID`.
    tag: parking_lot::Mutex<Tag>,
    pub content_lock: ContentLock,
    pub io_cv: Condvar,
    io_cv_mutex: Mutex<()>,
    /// Identity of the single cleanup-lock waiter; valid iff
    /// `PIN_COUNT_WAITER` is set. 0 means "no waiter".
    waiter_id: AtomicU64,
}

impl BufferDesc {
    pub fn new() -> Self {
        Self {
            state: AtomicU32::new(0),
            tag: parking_lot::Mutex::new(Tag::INVALID),
            content_lock: ContentLock::new(),
            io_cv: Condvar::new(),
            io_cv_mutex: Mutex::new(()),
            waiter_id: AtomicU64::new(0),
        }
    }

    #[inline]
    pub fn state(&self) -> BufState {
        BufState(self.state.load(Ordering::Acquire))
    }

    pub fn tag(&self) -> Tag {
        *self.tag.lock()
    }

    /// Spinlock-scoped update (Section 4.1): spin until `SPIN_LOCK` is
    /// clear, then set it and return a guard owning the exclusive right
    /// to read-modify-write the word.
    pub fn lock(&self) -> SpinGuard<'_> {
        let backoff = Backoff::new();
        loop {
            let prev = self.state.fetch_or(SPIN_LOCK, Ordering::Acquire);
            if prev & SPIN_LOCK == 0 {
                return SpinGuard {
                    state: &self.state,
                    value: prev | SPIN_LOCK,
                    #[cfg(debug_assertions)]
                    released: false,
                };
            }
            backoff.snooze();
        }
    }

    /// Set the tag under the spinlock. Caller must already hold `guard`
    /// for this frame (mapping-table partition lock must also be held by
    /// the caller per the lock order in Section 5, but that's enforced by
    /// callers, not representable here).
    pub fn set_tag(&self, _guard: &SpinGuard<'_>, tag: Tag) {
        *self.tag.lock() = tag;
    }

    pub fn waiter_id(&self) -> u64 {
        self.waiter_id.load(Ordering::Acquire)
    }

    pub fn set_waiter_id(&self, id: u64) {
        self.waiter_id.store(id, Ordering::Release);
    }

    /// Lock-free update (Section 4.1): CAS loop that waits for the
    /// spinlock to be clear before every attempt, then applies `f` to the
    /// non-spinlock bits. Used by the hot pin/unpin paths that only touch
    /// `REFCOUNT`/`USAGE_COUNT` and don't need a full spinlock hold.
    pub fn update<F>(&self, mut f: F) -> u32
    where
        F: FnMut(u32) -> u32,
    {
        let backoff = Backoff::new();
        loop {
            let current = self.state.load(Ordering::Acquire);
            if current & SPIN_LOCK != 0 {
                backoff.snooze();
                continue;
            }
            let next = f(current) & !SPIN_LOCK;
            if self
                .state
                .compare_exchange_weak(current, next, Ordering::AcqRel, Ordering::Relaxed)
                .is_ok()
            {
                return next;
            }
            backoff.snooze();
        }
    }

    pub fn notify_io_complete(&self) {
        let _guard = self.io_cv_mutex.lock();
        self.io_cv.notify_all();
    }

    /// Block until `keep_waiting` returns `false`, re-checking it under
    /// `io_cv_mutex` before every wait so a [`BufferDesc::notify_io_complete`]
    /// that lands between the caller's own unlocked check and this call
    /// can never be lost (Section 4.6): the predicate is the last word,
    /// not the caller's own stale read.
    pub fn wait_for_io<F: FnMut() -> bool>(&self, mut keep_waiting: F) {
        let mut guard = self.io_cv_mutex.lock();
        self.io_cv.wait_while(&mut guard, |_| keep_waiting());
    }
}

impl Default for BufferDesc {
    fn default() -> Self {
        Self::new()
    }
}

// Bit constants re-exported for sibling modules that build up state words
// to pass to `SpinGuard::unlock_with` / `BufferDesc::update`.
pub mod bits {
    pub use super::{
        CHECKPOINT_NEEDED, DIRTY, IO_ERROR, IO_IN_PROGRESS, JUST_DIRTIED, MAX_REFCOUNT,
        MAX_USAGE_COUNT, PERMANENT, PIN_COUNT_WAITER, REFCOUNT_MASK, REFCOUNT_SHIFT, SPIN_LOCK,
        TAG_VALID, USAGE_COUNT_MASK, USAGE_COUNT_SHIFT, VALID,
    };
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fresh_descriptor_is_all_clear() {
        let d = BufferDesc::new();
        let s = d.state();
        assert!(!s.tag_valid());
        assert!(!s.valid());
        assert_eq!(s.refcount(), 0);
        assert_eq!(s.usage_count(), 0);
    }

    #[test]
    fn lock_unlock_with_sets_bits() {
        let d = BufferDesc::new();
        let guard = d.lock();
        assert!(guard.get().spin_locked());
        guard.unlock_with(bits::TAG_VALID | bits::VALID);
        let s = d.state();
        assert!(s.tag_valid());
        assert!(s.valid());
        assert!(!s.spin_locked());
    }

    #[test]
    fn update_increments_refcount_without_spinlock() {
        let d = BufferDesc::new();
        d.update(|s| s + (1 << REFCOUNT_SHIFT));
        assert_eq!(d.state().refcount(), 1);
        d.update(|s| s + (1 << REFCOUNT_SHIFT));
        assert_eq!(d.state().refcount(), 2);
    }

    #[test]
    fn update_waits_for_spinlock_holder() {
        let d = BufferDesc::new();
        let guard = d.lock();
        // update() must not proceed while the spinlock is held; verify by
        // releasing from another "thread" conceptually via early unlock.
        guard.unlock_with(0);
        d.update(|s| s | bits::DIRTY);
        assert!(d.state().dirty());
    }

    #[test]
    #[cfg_attr(debug_assertions, should_panic)]
    fn dropping_guard_without_unlock_panics_in_debug() {
        let d = BufferDesc::new();
        let _guard = d.lock();
        // intentionally dropped without unlock
    }
}
