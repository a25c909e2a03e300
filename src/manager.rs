//! The central buffer pool (C7/C8, Section 4.7-4.9). Owns the frame
//! array, the page bytes, the mapping table, the clock sweep, and the
//! writeback queue, and wires them together into the public API in
//! Section 6. Grounded on the teacher's `BufferPoolManager` for overall
//! shape (one struct owning frames + a page table + a free/victim path),
//! generalized from its single global `FairMutex` to the spec's
//! fine-grained partition/header/content locking.

use std::cell::UnsafeCell;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::{Mutex, RwLockReadGuard, RwLockWriteGuard};
use tracing::{debug, warn};

use crate::cleanup_lock;
use crate::clock_sweep::ClockSweep;
use crate::config::Config;
use crate::descriptor::{bits, BufferDesc};
use crate::error::{Error, Result};
use crate::io_coordinator::{self, IoKind};
use crate::mapping::MappingTable;
use crate::page::PageBuf;
use crate::pin::{self, UsageBump};
use crate::resource_owner::ResourceOwner;
use crate::strategy::{AccessStrategy, StrategyPick};
use crate::smgr::StorageManager;
use crate::tag::{ForkNumber, Tag, P_NEW};
use crate::wal::Wal;
use crate::writeback::WritebackQueue;

/// Page bytes for one frame. Protected by convention, not by Rust's
/// aliasing rules: callers must hold the frame's `content_lock` in the
/// matching mode, or hold the header spinlock with `REFCOUNT == 0`
/// (exclusive ownership during victim reuse), before calling
/// [`FrameSlot::get`] / [`FrameSlot::get_mut`]. This mirrors true shared
/// memory, where the page bytes carry no language-level protection at
/// all and the latch is the only thing enforcing exclusivity.
struct FrameSlot(UnsafeCell<PageBuf>);

unsafe impl Sync for FrameSlot {}

impl FrameSlot {
    fn new() -> Self {
        Self(UnsafeCell::new(PageBuf::zeroed()))
    }

    /// # Safety
    /// Caller holds the frame's content lock (any mode) or is the
    /// exclusive owner of a freshly-evicted, unpinned-by-others frame.
    #[allow(clippy::mut_from_ref)]
    unsafe fn get(&self) -> &mut PageBuf {
        &mut *self.0.get()
    }
}

/// Read/write mode requested for a page fetch (Section 6 `read`).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReadMode {
    Normal,
    ZeroOnError,
    ZeroAndLock,
    ZeroAndCleanupLock,
}

/// Lock mode for [`BufferPool::lock`] (Section 6).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LockMode {
    Unlock,
    Share,
    Exclusive,
}

/// A live content-lock hold on a frame, returned by [`BufferPool::lock`].
/// Dropping it releases the lock without unpinning — callers that also
/// want to unpin should use [`BufferPool::unlock_release`].
pub enum FrameLockGuard<'a> {
    Share(RwLockReadGuard<'a, ()>),
    Exclusive(RwLockWriteGuard<'a, ()>),
}

/// Flags controlling a relation-extend call (Section 6 `extend_by`).
#[derive(Debug, Clone, Copy, Default)]
pub struct ExtendFlags {
    pub skip_extension_lock: bool,
    pub create_fork_if_needed: bool,
    pub lock_first: bool,
    pub lock_target: bool,
    pub clear_size_cache: bool,
    pub performing_recovery: bool,
}

/// Outcome of [`BufferPool::prefetch`] (Section 1B).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PrefetchOutcome {
    CachedFrame,
    IoStarted,
    Nothing,
}

/// A pin the caller holds on a frame. Not `Drop`-releasing by design —
/// Section 6's API is the explicit pin/unpin protocol the original uses,
/// not RAII; [`ResourceOwner`] is the safety net against leaks.
#[derive(Debug, Clone, Copy)]
pub struct PinnedFrame {
    pub frame: usize,
    pub tag: Tag,
    pub freshly_valid: bool,
}

type RelKey = (u32, u32, u32, ForkNumber);

pub struct BufferPool {
    pub(crate) config: Config,
    pub(crate) frames: Vec<BufferDesc>,
    slots: Vec<FrameSlot>,
    pub(crate) mapping: MappingTable,
    sweep: ClockSweep,
    pub(crate) writeback: WritebackQueue,
    pub(crate) smgr: Arc<dyn StorageManager>,
    pub(crate) wal: Arc<dyn Wal>,
    extension_locks: Mutex<HashMap<RelKey, Arc<Mutex<()>>>>,
    size_cache: Mutex<HashMap<RelKey, u32>>,
    next_waiter_id: AtomicU64,
    /// Identity used to scope the per-thread pin cache in [`crate::pin`] to
    /// this pool instance, so a thread holding more than one `BufferPool`
    /// never conflates their local pin counts.
    pub(crate) pool_id: u64,
}

impl BufferPool {
    pub fn new(config: Config, smgr: Arc<dyn StorageManager>, wal: Arc<dyn Wal>) -> Result<Self> {
        config.validate()?;
        let frames = (0..config.buffer_count).map(|_| BufferDesc::new()).collect();
        let slots = (0..config.buffer_count).map(|_| FrameSlot::new()).collect();
        Ok(Self {
            mapping: MappingTable::new(config.partition_count),
            sweep: ClockSweep::new(config.buffer_count),
            writeback: WritebackQueue::new(),
            extension_locks: Mutex::new(HashMap::new()),
            size_cache: Mutex::new(HashMap::new()),
            next_waiter_id: AtomicU64::new(1),
            pool_id: pin::next_pool_id(),
            frames,
            slots,
            smgr,
            wal,
            config,
        })
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    fn extension_lock(&self, key: RelKey) -> Arc<Mutex<()>> {
        self.extension_locks
            .lock()
            .entry(key)
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }

    pub(crate) fn next_waiter_id(&self) -> u64 {
        self.next_waiter_id.fetch_add(1, Ordering::Relaxed)
    }

    /// Page read/allocate path (C7, Section 4.7).
    pub fn read(
        &self,
        owner: &ResourceOwner,
        tablespace_id: u32,
        database_id: u32,
        relation_id: u32,
        fork: ForkNumber,
        block: u32,
        mode: ReadMode,
        mut strategy: Option<&mut AccessStrategy>,
    ) -> Result<PinnedFrame> {
        let tag = Tag::new(tablespace_id, database_id, relation_id, fork, block);
        let hash = tag.hash();

        {
            // Hold the partition lock across the pin (Section 4.7 step 1):
            // otherwise a concurrent `acquire_victim` could select this
            // exact frame and reassign its tag in the window between the
            // lookup and the pin.
            let part = self.mapping.read_partition(hash);
            if let Some(&idx) = part.get(&tag) {
                let desc = &self.frames[idx];
                pin::pin(self.pool_id, desc, idx, UsageBump::Default, owner);
                drop(part);
                return self.finish_pinned_hit(owner, &tag, idx, mode);
            }
        }

        let idx = loop {
            let victim = self.acquire_victim(owner, strategy.as_deref_mut())?;
            let mut part = self.mapping.write_partition(hash);
            if let Some(existing) = part.get(&tag).copied() {
                // Pin while still holding the partition lock (same
                // reasoning as the hit path above) before releasing it and
                // handing the now-unneeded victim back.
                pin::pin(self.pool_id, &self.frames[existing], existing, UsageBump::Default, owner);
                drop(part);
                self.release_unused_victim(owner, victim);
                return self.finish_pinned_hit(owner, &tag, existing, mode);
            }
            part.insert(tag, victim);
            drop(part);

            let guard = self.frames[victim].lock();
            let permanent = fork == ForkNumber::Init || relation_id != 0;
            let mut next = guard.get().0 | bits::TAG_VALID;
            next = (next & !bits::USAGE_COUNT_MASK) | (1 << bits::USAGE_COUNT_SHIFT);
            if permanent {
                next |= bits::PERMANENT;
            }
            self.frames[victim].set_tag(&guard, tag);
            guard.unlock_with(next);
            break victim;
        };

        // `idx` was pinned by `acquire_victim`'s own `pin_locked` call above;
        // no second pin needed here.
        self.finish_pinned_hit(owner, &tag, idx, mode)
    }

    /// Shared tail of the hit and miss paths (Section 4.7 steps 1/3-5): join
    /// or start I/O, apply the read mode, terminate I/O. Assumes the caller
    /// has already pinned `idx` while still holding whatever lock made the
    /// pin race-free (mapping partition lock on a hit, frame spinlock via
    /// `acquire_victim` on a miss) — this function never pins on its own.
    fn finish_pinned_hit(
        &self,
        owner: &ResourceOwner,
        tag: &Tag,
        idx: usize,
        mode: ReadMode,
    ) -> Result<PinnedFrame> {
        let desc = &self.frames[idx];

        if io_coordinator::start_io(desc, IoKind::Read) {
            match self.do_read_io(idx, tag, mode) {
                Ok(()) => {}
                Err(e) => {
                    io_coordinator::abort(desc);
                    pin::unpin(self.pool_id, desc, idx, owner);
                    return Err(e);
                }
            }
        } else {
            io_coordinator::wait_io(desc);
        }

        Ok(PinnedFrame {
            frame: idx,
            tag: *tag,
            freshly_valid: desc.state().valid(),
        })
    }

    fn do_read_io(&self, idx: usize, tag: &Tag, mode: ReadMode) -> Result<()> {
        let page = unsafe { self.slots[idx].get() };
        let read_result = self.smgr.read(tag, page.bytes_mut());

        let mut corrupt = false;
        match read_result {
            Ok(()) => {
                if !page.verify_checksum() {
                    if mode == ReadMode::ZeroOnError || self.config.zero_damaged_pages {
                        warn!(%tag, "checksum mismatch, zeroing page per policy");
                        page.zero_payload();
                    } else {
                        corrupt = true;
                    }
                }
            }
            Err(source) => return Err(Error::Io { tag: *tag, source }),
        }

        if corrupt {
            return Err(Error::Corruption { tag: *tag });
        }

        if matches!(mode, ReadMode::ZeroAndLock | ReadMode::ZeroAndCleanupLock) {
            page.zero_payload();
        }

        let desc = &self.frames[idx];
        let _content_guard = match mode {
            ReadMode::ZeroAndLock => Some(FrameLockGuard::Exclusive(desc.content_lock.wlock())),
            ReadMode::ZeroAndCleanupLock => {
                cleanup_lock::lock_for_cleanup(desc, self.next_waiter_id())?;
                None
            }
            _ => None,
        };

        io_coordinator::terminate(desc, bits::VALID, false);
        Ok(())
    }

    /// Fast path for a hint about which frame a tag was last seen in
    /// (Section 1B `read_recent`): check the hinted frame's tag under its
    /// own header spinlock; on a match, pin directly with no mapping
    /// lookup.
    pub fn read_recent(
        &self,
        owner: &ResourceOwner,
        tag: &Tag,
        recent_frame_hint: Option<usize>,
    ) -> Option<PinnedFrame> {
        let idx = recent_frame_hint?;
        let desc = self.frames.get(idx)?;
        let guard = desc.lock();
        let state = guard.get();
        if state.tag_valid() && desc.tag() == *tag {
            guard.unlock_with(state.0);
            let was_valid = pin::pin(self.pool_id, desc, idx, UsageBump::Default, owner);
            return Some(PinnedFrame {
                frame: idx,
                tag: *tag,
                freshly_valid: was_valid,
            });
        }
        guard.unlock_with(state.0);
        None
    }

    /// Section 1B `prefetch`: no-op on a cache hit, starts async I/O on a
    /// miss, or reports `Nothing` if the storage manager declines.
    pub fn prefetch(
        &self,
        owner: &ResourceOwner,
        tablespace_id: u32,
        database_id: u32,
        relation_id: u32,
        fork: ForkNumber,
        block: u32,
    ) -> Result<PrefetchOutcome> {
        let tag = Tag::new(tablespace_id, database_id, relation_id, fork, block);
        let hash = tag.hash();
        if self.mapping.lookup(&tag, hash).is_some() {
            return Ok(PrefetchOutcome::CachedFrame);
        }
        if self.smgr.nblocks_cached(tablespace_id, database_id, relation_id, fork).is_some() {
            return Ok(PrefetchOutcome::Nothing);
        }
        let victim = self.acquire_victim(owner, None)?;
        {
            let mut part = self.mapping.write_partition(hash);
            if let Some(existing) = part.get(&tag).copied() {
                drop(part);
                self.release_unused_victim(owner, victim);
                pin::unpin(self.pool_id, &self.frames[existing], existing, owner);
                return Ok(PrefetchOutcome::CachedFrame);
            }
            part.insert(tag, victim);
        }
        let guard = self.frames[victim].lock();
        self.frames[victim].set_tag(&guard, tag);
        guard.unlock_with(guard.get().0 | bits::TAG_VALID);

        let issued = self.smgr.prefetch(&tag);
        pin::unpin(self.pool_id, &self.frames[victim], victim, owner);
        Ok(if issued {
            PrefetchOutcome::IoStarted
        } else {
            PrefetchOutcome::Nothing
        })
    }

    /// Release a victim we inserted into the mapping but that turned out
    /// to be unneeded (another thread won the race). Returns it to
    /// `TAG_VALID == false` state and undoes `acquire_victim`'s pin.
    fn release_unused_victim(&self, owner: &ResourceOwner, idx: usize) {
        let desc = &self.frames[idx];
        let guard = desc.lock();
        let next = guard.get().0 & !(bits::TAG_VALID | bits::VALID) & !bits::USAGE_COUNT_MASK;
        desc.set_tag(&guard, Tag::INVALID);
        guard.unlock_with(next);
        pin::unpin(self.pool_id, desc, idx, owner);
    }

    /// Victim acquisition (C7/C8, Section 4.8): clock-sweep or strategy
    /// ring selection, pin, flush if dirty, invalidate old tag if any.
    fn acquire_victim(
        &self,
        owner: &ResourceOwner,
        mut strategy: Option<&mut AccessStrategy>,
    ) -> Result<usize> {
        'retry: loop {
            let (idx, guard) = match strategy.as_deref_mut() {
                Some(s) => match s.get_buffer(&self.frames, |f| self.frames[f].state().dirty()) {
                    Some(StrategyPick::Reuse(idx, guard)) => (idx, guard),
                    Some(StrategyPick::Rejected) | None => s.add_from_sweep(&self.sweep, &self.frames)?,
                },
                None => self.sweep.get_victim(&self.frames)?,
            };

            pin::pin_locked(self.pool_id, guard, idx, owner);
            debug_assert_eq!(self.frames[idx].state().refcount(), 1);

            let desc = &self.frames[idx];
            let old_tag = desc.tag();
            let state = desc.state();

            if state.dirty() {
                match desc.content_lock.try_rlock() {
                    None => {
                        pin::unpin(self.pool_id, desc, idx, owner);
                        continue 'retry;
                    }
                    Some(content_guard) => {
                        if let Err(e) = self.flush_frame(idx, old_tag, &content_guard) {
                            warn!(tag = %old_tag, error = %e, "eviction flush failed, leaving IO_ERROR set");
                        } else {
                            self.writeback.schedule(old_tag);
                        }
                    }
                }
            }

            if desc.state().tag_valid() {
                let old_hash = old_tag.hash();
                let mut part = self.mapping.write_partition(old_hash);
                let g2 = desc.lock();
                let s2 = g2.get();
                if s2.refcount() != 1 || s2.dirty() {
                    g2.unlock_with(s2.0);
                    drop(part);
                    pin::unpin(self.pool_id, desc, idx, owner);
                    continue 'retry;
                }
                desc.set_tag(&g2, Tag::INVALID);
                let next = (s2.0 & !(bits::TAG_VALID | bits::VALID | bits::CHECKPOINT_NEEDED))
                    & !bits::USAGE_COUNT_MASK;
                g2.unlock_with(next);
                part.remove(&old_tag);
            }

            return Ok(idx);
        }
    }

    /// Flush (C6/C7, Section 4.10). `_content_guard` proves the caller
    /// already holds the frame's content lock in shared mode.
    fn flush_frame(
        &self,
        idx: usize,
        tag: Tag,
        _content_guard: &RwLockReadGuard<'_, ()>,
    ) -> Result<()> {
        let desc = &self.frames[idx];
        if !io_coordinator::start_io(desc, IoKind::Write) {
            return Ok(());
        }

        let lsn = {
            let guard = desc.lock();
            let state = guard.get();
            let lsn = unsafe { self.slots[idx].get() }.lsn();
            guard.unlock_with(state.0 & !bits::JUST_DIRTIED);
            lsn
        };

        if desc.state().permanent() && self.wal.is_needed() && self.wal.needs_flush(lsn) {
            if let Err(source) = self.wal.flush(lsn) {
                io_coordinator::abort(desc);
                return Err(Error::Io { tag, source });
            }
        }

        let page = unsafe { self.slots[idx].get() };
        let mut out = page.clone();
        out.stamp_checksum();
        if let Err(source) = self.smgr.write(&tag, out.bytes(), false) {
            io_coordinator::abort(desc);
            return Err(Error::Io { tag, source });
        }

        io_coordinator::terminate(desc, 0, true);
        Ok(())
    }

    pub fn flush_one(&self, tag: Tag, idx: usize) -> Result<()> {
        let desc = &self.frames[idx];
        let guard = desc.content_lock.rlock();
        self.flush_frame(idx, tag, &guard)
    }

    /// Relation-extend path (C8, Section 4.9).
    #[allow(clippy::too_many_arguments)]
    pub fn extend_by(
        &self,
        owner: &ResourceOwner,
        tablespace_id: u32,
        database_id: u32,
        relation_id: u32,
        fork: ForkNumber,
        mut strategy: Option<&mut AccessStrategy>,
        flags: ExtendFlags,
        n: u32,
    ) -> Result<(u32, Vec<PinnedFrame>)> {
        let max_batch = self.config.max_extend_batch();
        let n = n.min(max_batch).max(1);

        let mut victims = Vec::with_capacity(n as usize);
        for _ in 0..n {
            victims.push(self.acquire_victim(owner, strategy.as_deref_mut())?);
        }
        for &idx in &victims {
            unsafe { self.slots[idx].get() }.zero_payload();
        }

        let key = (tablespace_id, database_id, relation_id, fork);
        let ext_lock = self.extension_lock(key);
        let _ext_guard = if flags.skip_extension_lock {
            None
        } else {
            Some(ext_lock.lock())
        };

        let first_block = self
            .smgr
            .nblocks(tablespace_id, database_id, relation_id, fork)
            .map_err(|source| Error::Io {
                tag: Tag::new(tablespace_id, database_id, relation_id, fork, 0),
                source,
            })?;

        if flags.clear_size_cache {
            self.size_cache.lock().remove(&key);
        }

        let mut pinned = Vec::with_capacity(victims.len());
        for (i, idx) in victims.into_iter().enumerate() {
            let block = first_block + i as u32;
            if block == P_NEW {
                return Err(Error::RelationTooLarge { max_blocks: P_NEW });
            }
            let tag = Tag::new(tablespace_id, database_id, relation_id, fork, block);
            let hash = tag.hash();

            loop {
                let mut part = self.mapping.write_partition(hash);
                match part.get(&tag).copied() {
                    // An old ghost buffer from a failed prior extend, or a
                    // misleading `lseek` past the reported EOF (Section
                    // 1B). A frame already holding valid page content at
                    // a block we believe doesn't exist yet is corruption;
                    // anything else is safe to reclaim and restart I/O on.
                    Some(existing_idx) if existing_idx != idx => {
                        drop(part);
                        self.release_unused_victim(owner, idx);
                        let desc = &self.frames[existing_idx];
                        pin::pin(self.pool_id, desc, existing_idx, UsageBump::Default, owner);
                        if desc.state().valid() {
                            pin::unpin(self.pool_id, desc, existing_idx, owner);
                            return Err(Error::Corruption { tag });
                        }
                        let guard = desc.lock();
                        guard.unlock_with(guard.get().0 & !bits::VALID);
                        io_coordinator::start_io(desc, IoKind::Read);
                        pinned.push(PinnedFrame {
                            frame: existing_idx,
                            tag,
                            freshly_valid: false,
                        });
                        break;
                    }
                    _ => {
                        part.insert(tag, idx);
                        drop(part);
                        let desc = &self.frames[idx];
                        let guard = desc.lock();
                        let mut next = guard.get().0 & !bits::VALID;
                        let permanent = fork == ForkNumber::Init || relation_id != 0;
                        if permanent {
                            next |= bits::PERMANENT;
                        }
                        next = (next & !bits::USAGE_COUNT_MASK) | (1 << bits::USAGE_COUNT_SHIFT) | bits::TAG_VALID;
                        desc.set_tag(&guard, tag);
                        guard.unlock_with(next);
                        io_coordinator::start_io(desc, IoKind::Read);
                        pinned.push(PinnedFrame {
                            frame: idx,
                            tag,
                            freshly_valid: false,
                        });
                        break;
                    }
                }
            }
        }

        self.smgr
            .zero_extend(tablespace_id, database_id, relation_id, fork, first_block, pinned.len() as u32)
            .map_err(|source| Error::Io {
                tag: Tag::new(tablespace_id, database_id, relation_id, fork, first_block),
                source,
            })?;

        drop(_ext_guard);

        for (i, frame) in pinned.iter().enumerate() {
            let desc = &self.frames[frame.frame];
            let want_lock = (i == 0 && flags.lock_first) || flags.lock_target;
            let _content_guard = if want_lock {
                Some(desc.content_lock.wlock())
            } else {
                None
            };
            io_coordinator::terminate(desc, bits::VALID, false);
        }

        debug!(relation_id, fork = ?fork, first_block, count = pinned.len(), "extended relation");
        Ok((first_block, pinned))
    }

    pub fn extend_to(
        &self,
        owner: &ResourceOwner,
        tablespace_id: u32,
        database_id: u32,
        relation_id: u32,
        fork: ForkNumber,
        mut strategy: Option<&mut AccessStrategy>,
        mode: ReadMode,
        target_block: u32,
    ) -> Result<PinnedFrame> {
        loop {
            let current = self
                .smgr
                .nblocks(tablespace_id, database_id, relation_id, fork)
                .map_err(|source| Error::Io {
                    tag: Tag::new(tablespace_id, database_id, relation_id, fork, 0),
                    source,
                })?;
            if target_block < current {
                return self.read(
                    owner,
                    tablespace_id,
                    database_id,
                    relation_id,
                    fork,
                    target_block,
                    mode,
                    strategy,
                );
            }

            let needed = target_block - current + 1;
            let (first_block, mut frames) = self.extend_by(
                owner,
                tablespace_id,
                database_id,
                relation_id,
                fork,
                strategy.as_deref_mut(),
                ExtendFlags::default(),
                needed,
            )?;
            let last_block = first_block + frames.len() as u32 - 1;

            if target_block > last_block {
                // max_extend_batch clamped us short of the target; release
                // what we got (it's still valid, unpinned pool content)
                // and extend again from the new true size.
                for f in &frames {
                    self.release(owner, f.frame);
                }
                continue;
            }

            let offset = (target_block - first_block) as usize;
            let wanted = frames.remove(offset);
            for f in frames {
                self.release(owner, f.frame);
            }
            return Ok(wanted);
        }
    }

    pub fn mark_dirty(&self, frame: usize) {
        self.frames[frame].update(|s| s | bits::DIRTY | bits::JUST_DIRTIED);
    }

    /// A "hint" dirty (Section 1B `mark_dirty_hint`): sets `DIRTY` and
    /// `JUST_DIRTIED` exactly like `mark_dirty`, but records that the
    /// next flush doesn't need to force a WAL flush for it (the page's
    /// LSN is not advanced for pure hint-bit writes).
    pub fn mark_dirty_hint(&self, frame: usize, lsn: crate::page::Lsn) {
        let page = unsafe { self.slots[frame].get() };
        page.set_lsn(lsn);
        self.mark_dirty(frame);
    }

    pub fn release(&self, owner: &ResourceOwner, frame: usize) {
        pin::unpin(self.pool_id, &self.frames[frame], frame, owner);
    }

    pub fn unlock_release(&self, owner: &ResourceOwner, frame: usize, guard: FrameLockGuard<'_>) {
        drop(guard);
        self.release(owner, frame);
    }

    pub fn incr_pin(&self, owner: &ResourceOwner, frame: usize) {
        pin::pin(self.pool_id, &self.frames[frame], frame, UsageBump::Default, owner);
    }

    pub fn lock(&self, frame: usize, mode: LockMode) -> Option<FrameLockGuard<'_>> {
        match mode {
            LockMode::Unlock => None,
            LockMode::Share => Some(FrameLockGuard::Share(self.frames[frame].content_lock.rlock())),
            LockMode::Exclusive => Some(FrameLockGuard::Exclusive(self.frames[frame].content_lock.wlock())),
        }
    }

    pub fn conditional_lock(&self, frame: usize) -> Option<FrameLockGuard<'_>> {
        self.frames[frame]
            .content_lock
            .try_wlock()
            .map(FrameLockGuard::Exclusive)
    }

    pub fn lock_for_cleanup(&self, frame: usize) -> Result<()> {
        cleanup_lock::lock_for_cleanup(&self.frames[frame], self.next_waiter_id())
    }

    pub fn conditional_lock_for_cleanup(&self, frame: usize) -> bool {
        cleanup_lock::conditional_lock_for_cleanup(&self.frames[frame])
    }

    pub fn is_cleanup_ok(&self, frame: usize) -> bool {
        cleanup_lock::is_cleanup_ok(&self.frames[frame])
    }

    pub(crate) fn frame_count(&self) -> usize {
        self.frames.len()
    }

    pub(crate) fn page_bytes(&self, idx: usize) -> &PageBuf {
        unsafe { self.slots[idx].get() }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use crate::wal::NullWal;
    use std::sync::Arc;

    fn pool(n: usize) -> (BufferPool, tempfile::TempDir) {
        let dir = tempfile::tempdir().unwrap();
        let smgr = Arc::new(crate::smgr::FileStorageManager::new(dir.path()).unwrap());
        let mut cfg = Config::default();
        cfg.buffer_count = n;
        cfg.partition_count = 4;
        let pool = BufferPool::new(cfg, smgr, Arc::new(NullWal)).unwrap();
        (pool, dir)
    }

    #[test]
    fn extend_then_read_round_trips() {
        let (pool, _dir) = pool(16);
        let owner = ResourceOwner::new(1);
        let (first, frames) = pool
            .extend_by(&owner, 1, 1, 100, ForkNumber::Main, None, ExtendFlags::default(), 2)
            .unwrap();
        assert_eq!(first, 0);
        assert_eq!(frames.len(), 2);
        for f in &frames {
            pool.release(&owner, f.frame);
        }

        let got = pool
            .read(&owner, 1, 1, 100, ForkNumber::Main, 0, ReadMode::Normal, None)
            .unwrap();
        assert!(got.freshly_valid || pool.frames[got.frame].state().valid());
        pool.release(&owner, got.frame);
    }

    #[test]
    fn mark_dirty_then_flush_clears_dirty() {
        let (pool, _dir) = pool(4);
        let owner = ResourceOwner::new(2);
        let (_, frames) = pool
            .extend_by(&owner, 1, 1, 200, ForkNumber::Main, None, ExtendFlags::default(), 1)
            .unwrap();
        let f = frames[0];
        pool.mark_dirty(f.frame);
        assert!(pool.frames[f.frame].state().dirty());
        pool.flush_one(f.tag, f.frame).unwrap();
        assert!(!pool.frames[f.frame].state().dirty());
        pool.release(&owner, f.frame);
    }

    #[test]
    fn repeated_reads_of_same_block_share_one_frame() {
        let (pool, _dir) = pool(8);
        let owner = ResourceOwner::new(3);
        let (_, frames) = pool
            .extend_by(&owner, 1, 1, 300, ForkNumber::Main, None, ExtendFlags::default(), 1)
            .unwrap();
        pool.release(&owner, frames[0].frame);

        let a = pool
            .read(&owner, 1, 1, 300, ForkNumber::Main, 0, ReadMode::Normal, None)
            .unwrap();
        let b = pool
            .read(&owner, 1, 1, 300, ForkNumber::Main, 0, ReadMode::Normal, None)
            .unwrap();
        assert_eq!(a.frame, b.frame);
        pool.release(&owner, a.frame);
        pool.release(&owner, b.frame);
    }

    #[test]
    fn extend_detects_ghost_buffer_collision_as_corruption() {
        let (pool, _dir) = pool(4);
        let owner = ResourceOwner::new(5);
        let (_, frames) = pool
            .extend_by(&owner, 1, 1, 600, ForkNumber::Main, None, ExtendFlags::default(), 1)
            .unwrap();
        let ghost_frame = frames[0].frame;
        pool.release(&owner, ghost_frame);

        // Force a ghost-buffer collision: the mapping table already names
        // `ghost_frame` (still VALID from the prior extend) for the next
        // block this extend is about to allocate.
        let collision_tag = Tag::new(1, 1, 600, ForkNumber::Main, 1);
        pool.mapping.insert(collision_tag, collision_tag.hash(), ghost_frame);

        let err = pool
            .extend_by(&owner, 1, 1, 600, ForkNumber::Main, None, ExtendFlags::default(), 1)
            .unwrap_err();
        assert!(matches!(err, Error::Corruption { .. }));
    }

    #[test]
    fn eviction_reclaims_frames_when_pool_is_full() {
        let (pool, _dir) = pool(2);
        let owner = ResourceOwner::new(4);
        for block in 0..5u32 {
            let (first, frames) = pool
                .extend_by(&owner, 1, 1, 400, ForkNumber::Main, None, ExtendFlags::default(), 1)
                .unwrap();
            assert_eq!(first, block);
            pool.release(&owner, frames[0].frame);
        }
    }
}
