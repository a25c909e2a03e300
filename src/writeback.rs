//! Shared writeback coalescing queue (Section 1B supplemented feature).
//! Both eviction-driven flushes (C7 `get_victim`) and the checkpointer
//! (C10) schedule tags here instead of issuing one `smgr.write` per page;
//! periodically the queue is drained, sorted, and coalesced into ranges
//! before being handed to the storage manager as writeback hints.

use parking_lot::Mutex;

use crate::smgr::StorageManager;
use crate::tag::{ForkNumber, Tag};

#[derive(Default)]
pub struct WritebackQueue {
    pending: Mutex<Vec<Tag>>,
}

impl WritebackQueue {
    pub fn new() -> Self {
        Self {
            pending: Mutex::new(Vec::new()),
        }
    }

    pub fn schedule(&self, tag: Tag) {
        self.pending.lock().push(tag);
    }

    pub fn len(&self) -> usize {
        self.pending.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Drain everything queued, sort by `(tablespace, database, relation,
    /// fork, block)`, coalesce consecutive blocks of the same relation/fork
    /// into single ranges, and issue `smgr.writeback` for each (Section
    /// 4.12 step 5). Writeback is a hint: failures are swallowed, never
    /// surfaced as errors.
    pub fn flush(&self, smgr: &dyn StorageManager) {
        let mut tags: Vec<Tag> = std::mem::take(&mut *self.pending.lock());
        if tags.is_empty() {
            return;
        }
        tags.sort_by_key(|t| {
            (
                t.tablespace_id,
                t.database_id,
                t.relation_id,
                t.fork as u8,
                t.block_number,
            )
        });

        let mut iter = tags.into_iter().peekable();
        while let Some(start) = iter.next() {
            let mut count: u32 = 1;
            while let Some(next) = iter.peek() {
                if next.tablespace_id == start.tablespace_id
                    && next.database_id == start.database_id
                    && next.relation_id == start.relation_id
                    && next.fork == start.fork
                    && next.block_number == start.block_number + count
                {
                    count += 1;
                    iter.next();
                } else {
                    break;
                }
            }
            smgr.writeback(
                start.tablespace_id,
                start.database_id,
                start.relation_id,
                start.fork,
                start.block_number,
                count,
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::smgr::FileStorageManager;

    fn t(block: u32) -> Tag {
        Tag::new(1, 1, 1, ForkNumber::Main, block)
    }

    #[test]
    fn coalesces_consecutive_blocks() {
        let dir = tempfile::tempdir().unwrap();
        let smgr = FileStorageManager::new(dir.path()).unwrap();
        let queue = WritebackQueue::new();
        queue.schedule(t(0));
        queue.schedule(t(1));
        queue.schedule(t(2));
        queue.schedule(t(10));
        queue.flush(&smgr);
        assert!(queue.is_empty());
    }

    #[test]
    fn empty_flush_is_a_no_op() {
        let dir = tempfile::tempdir().unwrap();
        let smgr = FileStorageManager::new(dir.path()).unwrap();
        let queue = WritebackQueue::new();
        queue.flush(&smgr);
    }
}
