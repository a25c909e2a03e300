//! Pin/refcount layer (C5, Section 4.5). Every "process" in the spec is a
//! worker thread here (see SPEC_FULL.md Section 1 "Process model"); each
//! thread owns a private [`PinCache`] so repeated pins of the same frame
//! never touch shared state, matching the "O(1) typical pin/unpin with no
//! shared-memory write when repeating pins" requirement in Section 9.
//!
//! A thread may hold handles to more than one [`crate::manager::BufferPool`]
//! at once, so the cache is keyed by `(pool_id, frame)`, not frame index
//! alone — otherwise two pools that happen to pick the same frame index
//! would conflate each other's local pin counts.

use std::cell::RefCell;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};

use arrayvec::ArrayVec;

use crate::descriptor::{bits, BufferDesc, SpinGuard};
use crate::resource_owner::ResourceOwner;

static NEXT_POOL_ID: AtomicU64 = AtomicU64::new(1);

/// Mint a fresh identity for a new `BufferPool` instance (Section 3
/// "per-process pin cache"), so its frames' local pin counts never get
/// confused with those of another pool in the same thread.
pub fn next_pool_id() -> u64 {
    NEXT_POOL_ID.fetch_add(1, Ordering::Relaxed)
}

/// A small fixed-size array of hot entries plus an overflow map for
/// anything that gets clock-rotated out (Section 3 "Per-process pin
/// cache"). Capacity is fixed at compile time to keep the hot path a
/// plain array scan; `Config::pin_cache_size` only bounds how many of the
/// `N` slots a given pool actually uses (see `PinCache::new`).
const PIN_CACHE_CAPACITY: usize = 8;

#[derive(Default)]
struct PinCacheInner {
    // (frame_index, local_refcount); clock-rotated on overflow.
    slots: ArrayVec<(usize, u32), PIN_CACHE_CAPACITY>,
    next_victim: usize,
    overflow: HashMap<usize, u32>,
}

impl PinCacheInner {
    fn get(&self, frame: usize) -> Option<u32> {
        if let Some((_, count)) = self.slots.iter().find(|(f, _)| *f == frame) {
            return Some(*count);
        }
        self.overflow.get(&frame).copied()
    }

    fn increment(&mut self, frame: usize) -> u32 {
        if let Some((_, count)) = self.slots.iter_mut().find(|(f, _)| *f == frame) {
            *count += 1;
            return *count;
        }
        if let Some(count) = self.overflow.get_mut(&frame) {
            *count += 1;
            return *count;
        }
        self.insert_new(frame)
    }

    fn insert_new(&mut self, frame: usize) -> u32 {
        if self.slots.len() < self.slots.capacity() {
            self.slots.push((frame, 1));
            return 1;
        }
        // Demote the clock-rotated slot into overflow to make room.
        let victim = self.next_victim % self.slots.len();
        self.next_victim = (self.next_victim + 1) % self.slots.len();
        let (old_frame, old_count) = self.slots[victim];
        self.overflow.insert(old_frame, old_count);
        self.slots[victim] = (frame, 1);
        1
    }

    /// Decrement, returning the new local count. Removes the entry on
    /// reaching zero. Panics (programmer error, Section 7) if the frame
    /// wasn't pinned locally at all.
    fn decrement(&mut self, frame: usize) -> u32 {
        if let Some(pos) = self.slots.iter().position(|(f, _)| *f == frame) {
            let count = {
                let slot = &mut self.slots[pos];
                slot.1 -= 1;
                slot.1
            };
            if count == 0 {
                self.slots.remove(pos);
            }
            return count;
        }
        if let Some(count) = self.overflow.get_mut(&frame) {
            *count -= 1;
            let new_count = *count;
            if new_count == 0 {
                self.overflow.remove(&frame);
            }
            return new_count;
        }
        panic!("unpin of frame {frame} with no local pin recorded");
    }
}

/// Per-thread pin cache handle, scoped to one `BufferPool` identity. One
/// instance is created per client thread per pool via [`PinCache::current`].
pub struct PinCache {
    pool_id: u64,
}

thread_local! {
    static LOCAL: RefCell<HashMap<u64, PinCacheInner>> = RefCell::new(HashMap::new());
}

impl PinCache {
    pub fn current(pool_id: u64) -> Self {
        PinCache { pool_id }
    }

    pub fn local_count(&self, frame: usize) -> u32 {
        LOCAL.with(|c| {
            c.borrow()
                .get(&self.pool_id)
                .and_then(|inner| inner.get(frame))
                .unwrap_or(0)
        })
    }
}

/// How much to bump `USAGE_COUNT` on a pin (Section 4.5: default strategy
/// bumps up to `MAX_USAGE_COUNT`; strategy rings only bump 0 -> 1).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UsageBump {
    Default,
    StrategyRing,
}

pub const SPEC_MAX_USAGE_COUNT: u32 = 5;

/// Pin a frame that is not already locally cached. Returns whether
/// `VALID` was observed at the moment of pinning (Section 4.5: "caller
/// may need to wait for I/O" if not).
pub fn pin(pool_id: u64, desc: &BufferDesc, frame: usize, bump: UsageBump, owner: &ResourceOwner) -> bool {
    let already_local =
        LOCAL.with(|c| c.borrow().get(&pool_id).is_some_and(|inner| inner.get(frame).is_some()));
    if already_local {
        LOCAL.with(|c| c.borrow_mut().entry(pool_id).or_default().increment(frame));
        owner.record_pin(frame);
        return desc.state().valid();
    }

    LOCAL.with(|c| c.borrow_mut().entry(pool_id).or_default().insert_new(frame));

    let new_state = desc.update(|s| {
        let mut next = s + (1 << bits::REFCOUNT_SHIFT);
        let usage = (next & bits::USAGE_COUNT_MASK) >> bits::USAGE_COUNT_SHIFT;
        match bump {
            UsageBump::Default => {
                if usage < SPEC_MAX_USAGE_COUNT {
                    next += 1 << bits::USAGE_COUNT_SHIFT;
                }
            }
            UsageBump::StrategyRing => {
                if usage == 0 {
                    next += 1 << bits::USAGE_COUNT_SHIFT;
                }
            }
        }
        next
    });

    owner.record_pin(frame);
    crate::descriptor::BufState(new_state).valid()
}

/// Pin a frame whose header spinlock the caller already holds, known not
/// to be locally pinned yet (Section 4.5 `pin_locked`): bump `REFCOUNT`
/// and release the spinlock in a single write-back, so no other thread can
/// observe `REFCOUNT == 0` between selection and pinning.
pub fn pin_locked(pool_id: u64, guard: SpinGuard<'_>, frame: usize, owner: &ResourceOwner) {
    let next = guard.get().0 + (1 << bits::REFCOUNT_SHIFT);
    guard.unlock_with(next);
    LOCAL.with(|c| c.borrow_mut().entry(pool_id).or_default().insert_new(frame));
    owner.record_pin(frame);
}

/// Unpin a frame. On the local count reaching zero, decrements the shared
/// `REFCOUNT`; if that also reaches exactly 1 with a waiter registered,
/// clears `PIN_COUNT_WAITER` and wakes the cleanup-lock waiter (Section
/// 4.5 `unpin`, Section 4.11).
pub fn unpin(pool_id: u64, desc: &BufferDesc, frame: usize, owner: &ResourceOwner) {
    let local_remaining =
        LOCAL.with(|c| c.borrow_mut().entry(pool_id).or_default().decrement(frame));
    owner.record_unpin(frame);
    if local_remaining > 0 {
        return;
    }

    let mut waiter_signalled = false;
    desc.update(|s| {
        let refcount = (s & bits::REFCOUNT_MASK) >> bits::REFCOUNT_SHIFT;
        debug_assert!(refcount > 0, "unpin would underflow REFCOUNT");
        let next = s - (1 << bits::REFCOUNT_SHIFT);
        let next_refcount = refcount - 1;
        if next & bits::PIN_COUNT_WAITER != 0 && next_refcount == 1 {
            waiter_signalled = true;
            next & !bits::PIN_COUNT_WAITER
        } else {
            next
        }
    });

    if waiter_signalled {
        desc.notify_io_complete();
    }
}
