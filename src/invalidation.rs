//! Invalidation (C11, Section 4.13). Grounded on `original_source/bufmgr.c`'s
//! `DropRelationBuffers` / `InvalidateBuffer` / `DropDatabaseBuffers`: throw
//! away (or flush) every buffered page belonging to a relation or database,
//! used when a relation is truncated/dropped or a database is dropped.
//!
//! There's no separate free list: clearing `TAG_VALID` and deleting the
//! mapping entry is enough, since [`crate::clock_sweep::ClockSweep`] already
//! treats any `REFCOUNT == 0, USAGE_COUNT == 0` frame as fair game
//! regardless of whether it still carries stale tag bytes.

use crate::descriptor::bits;
use crate::manager::BufferPool;
use crate::resource_owner::ResourceOwner;
use crate::tag::{ForkNumber, Tag};

/// Threshold (Section 4.13) below which a per-block mapping lookup beats a
/// full scan of every frame.
fn small_strategy_threshold(buffer_count: usize) -> u32 {
    (buffer_count as u32 / 32).max(1)
}

/// One relation fork's drop request within a batched
/// [`BufferPool::drop_relations_all_buffers`] call.
#[derive(Debug, Clone, Copy)]
pub struct RelationDrop {
    pub tablespace_id: u32,
    pub database_id: u32,
    pub relation_id: u32,
    pub fork: ForkNumber,
    pub first_block: u32,
}

/// A `(tablespace, database, relation)` triple, used by
/// [`BufferPool::flush_relations_all_buffers`] to match every fork at once.
#[derive(Debug, Clone, Copy)]
pub struct RelationKey {
    pub tablespace_id: u32,
    pub database_id: u32,
    pub relation_id: u32,
}

impl BufferPool {
    /// Drop every buffered page of `relation_id` at or past
    /// `first_block_per_fork[i]` for each fork in `forks[i]` (Section 4.13).
    pub fn drop_relation_buffers(
        &self,
        tablespace_id: u32,
        database_id: u32,
        relation_id: u32,
        forks: &[ForkNumber],
        first_block_per_fork: &[u32],
        nblocks_per_fork: &[u32],
    ) {
        for (i, &fork) in forks.iter().enumerate() {
            let first = first_block_per_fork[i];
            let nblocks = nblocks_per_fork[i];
            let span = nblocks.saturating_sub(first);

            if span <= small_strategy_threshold(self.frames.len()) {
                for block in first..nblocks {
                    let tag = Tag::new(tablespace_id, database_id, relation_id, fork, block);
                    if let Some(idx) = self.mapping.lookup(&tag, tag.hash()) {
                        self.invalidate(idx, tag);
                    }
                }
            } else {
                for idx in 0..self.frames.len() {
                    let desc = &self.frames[idx];
                    let candidate = desc.tag();
                    if candidate.tablespace_id == tablespace_id
                        && candidate.database_id == database_id
                        && candidate.relation_id == relation_id
                        && candidate.fork == fork
                        && candidate.block_number >= first
                    {
                        self.invalidate(idx, candidate);
                    }
                }
            }
        }
    }

    /// Drop buffers for several relation forks in one pass over the frame
    /// array, instead of calling [`Self::drop_relation_buffers`] once per
    /// relation (each of which would rescan every frame on its own). Used
    /// when a single transaction drops or truncates more than one relation
    /// at a time (Section 6 `drop_relations_all_buffers`).
    pub fn drop_relations_all_buffers(&self, drops: &[RelationDrop]) {
        for idx in 0..self.frames.len() {
            let desc = &self.frames[idx];
            if !desc.state().tag_valid() {
                continue;
            }
            let tag = desc.tag();
            let matches = drops.iter().any(|d| {
                tag.tablespace_id == d.tablespace_id
                    && tag.database_id == d.database_id
                    && tag.relation_id == d.relation_id
                    && tag.fork == d.fork
                    && tag.block_number >= d.first_block
            });
            if matches {
                self.invalidate(idx, tag);
            }
        }
    }

    /// Same shape as [`Self::drop_relation_buffers`] but across every
    /// relation in a database (Section 4.13 `drop_database_buffers`).
    pub fn drop_database_buffers(&self, database_id: u32) {
        for idx in 0..self.frames.len() {
            let desc = &self.frames[idx];
            let tag = desc.tag();
            if desc.state().tag_valid() && tag.database_id == database_id {
                self.invalidate(idx, tag);
            }
        }
    }

    /// Pin, share-lock, and flush every buffered page of a relation
    /// (Section 4.13 `flush_relation_buffers`).
    pub fn flush_relation_buffers(
        &self,
        owner: &ResourceOwner,
        tablespace_id: u32,
        database_id: u32,
        relation_id: u32,
    ) {
        for idx in 0..self.frames.len() {
            let desc = &self.frames[idx];
            let tag = desc.tag();
            if desc.state().tag_valid()
                && tag.tablespace_id == tablespace_id
                && tag.database_id == database_id
                && tag.relation_id == relation_id
                && desc.state().dirty()
            {
                crate::pin::pin(self.pool_id, desc, idx, crate::pin::UsageBump::Default, owner);
                let _ = self.flush_one(tag, idx);
                crate::pin::unpin(self.pool_id, desc, idx, owner);
            }
        }
    }

    /// Flush every dirty buffered page of several relations in one pass
    /// over the frame array (Section 6 `flush_relations_all_buffers`),
    /// mirroring [`Self::drop_relations_all_buffers`]'s single-scan batching.
    pub fn flush_relations_all_buffers(&self, owner: &ResourceOwner, relations: &[RelationKey]) {
        for idx in 0..self.frames.len() {
            let desc = &self.frames[idx];
            let tag = desc.tag();
            if !desc.state().tag_valid() || !desc.state().dirty() {
                continue;
            }
            let matches = relations.iter().any(|r| {
                tag.tablespace_id == r.tablespace_id && tag.database_id == r.database_id && tag.relation_id == r.relation_id
            });
            if matches {
                crate::pin::pin(self.pool_id, desc, idx, crate::pin::UsageBump::Default, owner);
                let _ = self.flush_one(tag, idx);
                crate::pin::unpin(self.pool_id, desc, idx, owner);
            }
        }
    }

    /// Flush every dirty buffered page belonging to any relation in a
    /// database (Section 4.13 `flush_database_buffers`).
    pub fn flush_database_buffers(&self, owner: &ResourceOwner, database_id: u32) {
        for idx in 0..self.frames.len() {
            let desc = &self.frames[idx];
            let tag = desc.tag();
            if desc.state().tag_valid() && tag.database_id == database_id && desc.state().dirty() {
                crate::pin::pin(self.pool_id, desc, idx, crate::pin::UsageBump::Default, owner);
                let _ = self.flush_one(tag, idx);
                crate::pin::unpin(self.pool_id, desc, idx, owner);
            }
        }
    }

    /// Throw away a single frame's contents (Section 4.13 `invalidate`):
    /// take the partition exclusively, confirm the tag hasn't changed under
    /// us, wait out any in-flight flush, then clear it for reuse.
    fn invalidate(&self, idx: usize, expected_tag: Tag) {
        loop {
            let hash = expected_tag.hash();
            let mut part = self.mapping.write_partition(hash);

            let guard = self.frames[idx].lock();
            let state = guard.get();
            let current_tag = self.frames[idx].tag();
            if current_tag != expected_tag || !state.tag_valid() {
                guard.unlock_with(state.0);
                return;
            }

            if state.refcount() != 0 {
                guard.unlock_with(state.0);
                drop(part);
                self.frames[idx].wait_for_io(|| self.frames[idx].state().refcount() != 0);
                continue;
            }

            part.remove(&expected_tag);
            drop(part);
            guard.unlock_with(
                state.0
                    & !(bits::TAG_VALID
                        | bits::DIRTY
                        | bits::JUST_DIRTIED
                        | bits::VALID
                        | bits::CHECKPOINT_NEEDED)
                    & !bits::USAGE_COUNT_MASK,
            );
            return;
        }
    }
}
