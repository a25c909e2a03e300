//! Checkpoint writer (C10, Section 4.12). Grounded on
//! `original_source/bufmgr.c`'s `BufferSync` / `CheckPointBuffers`: mark
//! every dirty (and eligible) frame, sort for sequential-write-friendly
//! order, then balance the flush across tablespaces with a min-heap keyed
//! by write progress so one huge tablespace doesn't starve the others.

use std::cmp::Reverse;
use std::collections::BinaryHeap;

use tracing::debug;

use crate::descriptor::bits;
use crate::error::Result;
use crate::manager::BufferPool;
use crate::pin::{self, UsageBump};
use crate::resource_owner::ResourceOwner;
use crate::tag::Tag;

/// What triggered this checkpoint (Section 4.12 step 1's "shutdown /
/// recovery-end / flush-all" vs the default "permanent relations only").
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CheckpointFlags {
    pub flush_all: bool,
}

#[derive(Debug, Clone, Copy)]
struct Entry {
    frame: usize,
    tag: Tag,
}

struct TablespaceProgress {
    tablespace_id: u32,
    next: usize,
    end: usize,
    progress: u64,
    progress_slice: u64,
}

impl PartialEq for TablespaceProgress {
    fn eq(&self, other: &Self) -> bool {
        self.progress == other.progress
    }
}
impl Eq for TablespaceProgress {}
impl PartialOrd for TablespaceProgress {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}
impl Ord for TablespaceProgress {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        self.progress.cmp(&other.progress)
    }
}

impl BufferPool {
    /// Run a full checkpoint: mark, sort, balanced flush, writeback
    /// (Section 4.12). Returns the number of frames actually flushed.
    pub fn checkpoint(&self, flags: CheckpointFlags) -> Result<usize> {
        let entries = self.mark_phase(flags);
        if entries.is_empty() {
            return Ok(0);
        }

        let mut entries = entries;
        entries.sort_by_key(|e| {
            (
                e.tag.tablespace_id,
                e.tag.relation_id,
                e.tag.fork as u8,
                e.tag.block_number,
            )
        });

        let mut heap = BinaryHeap::new();
        let mut start = 0;
        while start < entries.len() {
            let tablespace_id = entries[start].tag.tablespace_id;
            let mut end = start;
            while end < entries.len() && entries[end].tag.tablespace_id == tablespace_id {
                end += 1;
            }
            let count = end - start;
            heap.push(Reverse(TablespaceProgress {
                tablespace_id,
                next: start,
                end,
                progress: 0,
                progress_slice: (u64::MAX / count as u64).max(1),
            }));
            start = end;
        }

        let owner = ResourceOwner::new(self.next_waiter_id());
        let mut flushed = 0usize;
        while let Some(Reverse(mut ts)) = heap.pop() {
            if ts.next >= ts.end {
                continue;
            }
            let entry = entries[ts.next];
            ts.next += 1;

            let desc = &self.frames[entry.frame];
            if desc.state().checkpoint_needed() {
                pin::pin(self.pool_id, desc, entry.frame, UsageBump::Default, &owner);
                if desc.tag() == entry.tag {
                    let result = self.flush_one(entry.tag, entry.frame);
                    desc.update(|s| s & !bits::CHECKPOINT_NEEDED);
                    if result.is_ok() {
                        self.writeback.schedule(entry.tag);
                        flushed += 1;
                    }
                }
                pin::unpin(self.pool_id, desc, entry.frame, &owner);
            }

            ts.progress = ts.progress.saturating_add(ts.progress_slice);
            if ts.next < ts.end {
                heap.push(Reverse(ts));
            }
        }

        self.writeback.flush(&*self.smgr);
        debug!(flushed, tablespaces = "balanced", "checkpoint complete");
        Ok(flushed)
    }

    fn mark_phase(&self, flags: CheckpointFlags) -> Vec<Entry> {
        let mut entries = Vec::new();
        for (idx, desc) in self.frames.iter().enumerate() {
            let guard = desc.lock();
            let state = guard.get();
            let eligible = state.dirty() && (flags.flush_all || state.permanent());
            if eligible {
                let tag = desc.tag();
                guard.unlock_with(state.0 | bits::CHECKPOINT_NEEDED);
                entries.push(Entry { frame: idx, tag });
            } else {
                guard.unlock_with(state.0);
            }
        }
        entries
    }

    /// Background-writer sweep (Section 6 `bg_sync`): scan a bounded
    /// number of frames starting from the clock-sweep cursor's
    /// neighborhood for dirty, unpinned candidates and flush them, same
    /// as a miniature non-blocking checkpoint. Returns whether the pool
    /// had nothing left to do (the caller can hibernate).
    pub fn bg_sync(&self) -> Result<bool> {
        let max_pages = self.config.bgwriter_lru_max_pages as usize;
        let mut touched = 0usize;
        let mut any_dirty = false;

        for (idx, desc) in self.frames.iter().enumerate().take(max_pages.max(1)) {
            let state = desc.state();
            if !state.dirty() {
                continue;
            }
            any_dirty = true;
            if state.refcount() != 0 {
                continue;
            }
            let tag = desc.tag();
            let _ = self.flush_one(tag, idx);
            touched += 1;
        }

        debug!(touched, "bg_sync pass complete");
        Ok(!any_dirty)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use crate::manager::ExtendFlags;
    use crate::resource_owner::ResourceOwner;
    use crate::tag::ForkNumber;
    use crate::wal::NullWal;
    use std::sync::Arc;

    fn pool() -> (BufferPool, tempfile::TempDir) {
        let dir = tempfile::tempdir().unwrap();
        let smgr = Arc::new(crate::smgr::FileStorageManager::new(dir.path()).unwrap());
        let mut cfg = Config::default();
        cfg.buffer_count = 8;
        cfg.partition_count = 4;
        (BufferPool::new(cfg, smgr, Arc::new(NullWal)).unwrap(), dir)
    }

    #[test]
    fn checkpoint_flushes_dirty_permanent_frames() {
        let (pool, _dir) = pool();
        let owner = ResourceOwner::new(1);
        let (_, frames) = pool
            .extend_by(&owner, 1, 1, 500, ForkNumber::Main, None, ExtendFlags::default(), 1)
            .unwrap();
        pool.mark_dirty(frames[0].frame);

        let flushed = pool.checkpoint(CheckpointFlags { flush_all: true }).unwrap();
        assert_eq!(flushed, 1);
        assert!(!pool.frames[frames[0].frame].state().dirty());
        pool.release(&owner, frames[0].frame);
    }

    #[test]
    fn checkpoint_on_clean_pool_flushes_nothing() {
        let (pool, _dir) = pool();
        let flushed = pool.checkpoint(CheckpointFlags { flush_all: true }).unwrap();
        assert_eq!(flushed, 0);
    }
}
