//! Pin-leak tracking (ambient, Section 1A). Grounded on the teacher's
//! `txn_manager::TransactionManager`, which keeps a `HashMap<TxnId,
//! Vec<PageId>>` of what each transaction currently holds so it can
//! release everything at commit time. Here the same bookkeeping shape
//! tracks outstanding pins per owner so a caller can assert "I released
//! everything I pinned" instead of leaking a frame forever.

use std::collections::HashMap;

use parking_lot::Mutex;

/// Tracks the frames a single logical owner (one request, one worker
/// iteration) currently holds pinned. Not involved in the actual
/// pin/unpin accounting in [`crate::pin`] — purely a leak detector, the
/// way the teacher's transaction manager tracks locked pages separately
/// from the buffer pool's own refcounts.
pub struct ResourceOwner {
    id: u64,
    held: Mutex<HashMap<usize, u32>>,
}

impl ResourceOwner {
    pub fn new(id: u64) -> Self {
        Self {
            id,
            held: Mutex::new(HashMap::new()),
        }
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn record_pin(&self, frame: usize) {
        *self.held.lock().entry(frame).or_insert(0) += 1;
    }

    pub fn record_unpin(&self, frame: usize) {
        let mut held = self.held.lock();
        if let Some(count) = held.get_mut(&frame) {
            *count -= 1;
            if *count == 0 {
                held.remove(&frame);
            }
        }
    }

    /// Frames still pinned by this owner, most useful at end-of-scope to
    /// assert nothing leaked.
    pub fn outstanding(&self) -> Vec<usize> {
        self.held.lock().keys().copied().collect()
    }

    pub fn has_leaks(&self) -> bool {
        !self.held.lock().is_empty()
    }
}
