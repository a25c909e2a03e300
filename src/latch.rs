//! Content lock: the reader/writer latch protecting a frame's page bytes
//! (Section 3 `content_lock`). Kept separate from the header spinlock in
//! `descriptor` — the two are never held across each other except in the
//! single ordering partition → header spinlock → content lock (Section 5).

use parking_lot::{
    lock_api::RawRwLock, RwLock, RwLockReadGuard, RwLockUpgradableReadGuard, RwLockWriteGuard,
};

#[derive(Debug, Default)]
pub struct ContentLock {
    lock: RwLock<()>,
}

impl ContentLock {
    pub fn new() -> Self {
        Self {
            lock: RwLock::new(()),
        }
    }

    pub fn rlock(&self) -> RwLockReadGuard<'_, ()> {
        self.lock.read()
    }

    pub fn try_rlock(&self) -> Option<RwLockReadGuard<'_, ()>> {
        self.lock.try_read()
    }

    pub fn wlock(&self) -> RwLockWriteGuard<'_, ()> {
        self.lock.write()
    }

    pub fn try_wlock(&self) -> Option<RwLockWriteGuard<'_, ()>> {
        self.lock.try_write()
    }

    pub fn upgradable_rlock(&self) -> RwLockUpgradableReadGuard<'_, ()> {
        self.lock.upgradable_read()
    }

    /// Raw exclusive-unlock used by the cleanup-lock protocol, which needs
    /// to release the write lock from a different call frame than the one
    /// that acquired it (the guard doesn't outlive the retry loop).
    ///
    /// # Safety
    /// Caller must hold the exclusive lock via a path that doesn't keep a
    /// live `RwLockWriteGuard` around (see `cleanup_lock`).
    pub unsafe fn force_unlock_write(&self) {
        self.lock.raw().unlock_exclusive();
    }

    /// Raw exclusive-lock counterpart to [`Self::force_unlock_write`]: used
    /// where the caller releases via `force_unlock_write` rather than a
    /// `RwLockWriteGuard`, so no guard needs to live across the retry loop.
    ///
    /// # Safety
    /// Caller must release with exactly one matching `force_unlock_write`.
    pub unsafe fn force_lock_write(&self) {
        self.lock.raw().lock_exclusive();
    }

    /// # Safety
    /// Same as [`Self::force_lock_write`]; only call `force_unlock_write`
    /// if this returns `true`.
    pub unsafe fn try_force_lock_write(&self) -> bool {
        self.lock.raw().try_lock_exclusive()
    }

    pub fn is_locked(&self) -> bool {
        self.lock.is_locked()
    }

    pub fn is_locked_exclusive(&self) -> bool {
        self.lock.is_locked_exclusive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn exclusive_excludes_shared() {
        let latch = ContentLock::new();
        let _w = latch.wlock();
        assert!(latch.try_rlock().is_none());
    }

    #[test]
    fn shared_allows_shared() {
        let latch = ContentLock::new();
        let _r1 = latch.rlock();
        assert!(latch.try_rlock().is_some());
    }
}
