//! Clock-sweep victim selection (C3, Section 4.3). Replaces the teacher's
//! `priority-queue`-backed LRU `Replacer` — the spec calls for the cheaper
//! second-chance algorithm: advance a shared cursor, decrement usage
//! counts, return the first unpinned frame with a zero usage count.

use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};

use crate::descriptor::{BufferDesc, SpinGuard};
use crate::error::{Error, Result};

pub struct ClockSweep {
    cursor: AtomicU64,
    pass: AtomicU32,
    num_frames: usize,
}

/// After this many full passes with no replaceable frame found, give up
/// and report contention (Section 4.3, Section 8 "Clock sweep with all
/// frames pinned returns an error after 2N steps").
const MAX_PASSES: u32 = 2;

impl ClockSweep {
    pub fn new(num_frames: usize) -> Self {
        Self {
            cursor: AtomicU64::new(0),
            pass: AtomicU32::new(0),
            num_frames,
        }
    }

    /// Advance the cursor by one frame, wrapping mod N and bumping the
    /// pass counter on wraparound.
    fn advance(&self) -> usize {
        let prev = self.cursor.fetch_add(1, Ordering::Relaxed);
        let idx = (prev % self.num_frames as u64) as usize;
        if idx == 0 && prev != 0 {
            self.pass.fetch_add(1, Ordering::Relaxed);
        }
        idx
    }

    /// Find a frame with `REFCOUNT == 0` and return its index together
    /// with the header spinlock still held (Section 4.3 step 3: "return
    /// this frame still holding the spinlock"), so the caller can pin it
    /// via `pin_locked` in the same atomic handoff with no window for a
    /// racing pin to sneak in between selection and pinning (Invariant I7).
    pub fn get_victim<'a>(&self, frames: &'a [BufferDesc]) -> Result<(usize, SpinGuard<'a>)> {
        let mut steps: u64 = 0;
        let max_steps = self.num_frames as u64 * MAX_PASSES as u64;

        loop {
            let idx = self.advance();
            steps += 1;

            let guard = frames[idx].lock();
            let state = guard.get();

            if state.refcount() == 0 {
                if state.usage_count() > 0 {
                    let next = state.0 - (1 << crate::descriptor::bits::USAGE_COUNT_SHIFT);
                    guard.unlock_with(next);
                } else {
                    return Ok((idx, guard));
                }
            } else {
                guard.unlock_with(state.0);
            }

            if steps >= max_steps {
                return Err(Error::NoUnpinnedBuffers {
                    passes: self.pass.load(Ordering::Relaxed),
                });
            }
        }
    }
}
