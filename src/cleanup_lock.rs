//! Cleanup-lock protocol (C9, Section 4.11): exclusive content lock plus
//! observation that this caller is the sole pinner (`REFCOUNT == 1`).
//! Grounded on `original_source/bufmgr.c`'s `LockBufferForCleanup` /
//! `ConditionalLockBufferForCleanup` / `HoldingBufferPinThatDoesntBelongToMe`
//! single-waiter design: only one thread may register as the waiter for a
//! given frame at a time.

use crate::descriptor::{bits, BufferDesc};
use crate::error::{Error, Result};

/// Take the cleanup lock on a frame the caller already has pinned
/// exactly once. Blocks until every other pin on the frame is released.
pub fn lock_for_cleanup(desc: &BufferDesc, waiter_id: u64) -> Result<()> {
    loop {
        unsafe { desc.content_lock.force_lock_write() };

        let guard = desc.lock();
        let state = guard.get();
        if state.refcount() == 1 {
            guard.unlock_with(state.0);
            return Ok(());
        }

        if state.pin_count_waiter() {
            guard.unlock_with(state.0);
            unsafe { desc.content_lock.force_unlock_write() };
            return Err(Error::MultipleCleanupWaiters { tag: desc.tag() });
        }

        desc.set_waiter_id(waiter_id);
        guard.unlock_with(state.0 | bits::PIN_COUNT_WAITER);
        unsafe { desc.content_lock.force_unlock_write() };

        desc.wait_for_io(|| desc.state().refcount() != 1);
    }
}

/// Non-blocking variant (Section 6 `conditional_lock_for_cleanup`): returns
/// `false` immediately instead of registering as a waiter if the refcount
/// isn't already 1.
pub fn conditional_lock_for_cleanup(desc: &BufferDesc) -> bool {
    if !unsafe { desc.content_lock.try_force_lock_write() } {
        return false;
    }
    let guard = desc.lock();
    let state = guard.get();
    if state.refcount() == 1 {
        guard.unlock_with(state.0);
        true
    } else {
        guard.unlock_with(state.0);
        unsafe { desc.content_lock.force_unlock_write() };
        false
    }
}

pub fn is_cleanup_ok(desc: &BufferDesc) -> bool {
    desc.state().refcount() == 1 && !desc.content_lock.is_locked()
}

/// Clear `PIN_COUNT_WAITER` if it still names `waiter_id` (process
/// shutdown cancellation, Section 4.11).
pub fn cancel_wait(desc: &BufferDesc, waiter_id: u64) {
    if desc.waiter_id() != waiter_id {
        return;
    }
    desc.update(|s| s & !bits::PIN_COUNT_WAITER);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lock_succeeds_immediately_at_refcount_one() {
        let desc = BufferDesc::new();
        desc.update(|s| s + (1 << bits::REFCOUNT_SHIFT));
        assert!(lock_for_cleanup(&desc, 1).is_ok());
        assert!(desc.content_lock.is_locked_exclusive());
    }

    #[test]
    fn conditional_fails_when_refcount_above_one() {
        let desc = BufferDesc::new();
        desc.update(|s| s + (2 << bits::REFCOUNT_SHIFT));
        assert!(!conditional_lock_for_cleanup(&desc));
        assert!(!desc.content_lock.is_locked());
    }

    #[test]
    fn second_waiter_is_rejected() {
        let desc = BufferDesc::new();
        desc.update(|s| s + (2 << bits::REFCOUNT_SHIFT) | bits::PIN_COUNT_WAITER);
        desc.set_waiter_id(7);
        let err = lock_for_cleanup(&desc, 9);
        assert!(err.is_err());
    }

    #[test]
    fn cancel_wait_clears_only_matching_waiter() {
        let desc = BufferDesc::new();
        desc.update(|s| s | bits::PIN_COUNT_WAITER);
        desc.set_waiter_id(5);
        cancel_wait(&desc, 99);
        assert!(desc.state().pin_count_waiter(), "mismatched id must not clear");
        cancel_wait(&desc, 5);
        assert!(!desc.state().pin_count_waiter());
    }
}
