//! Access-strategy rings (C4, Section 4.4). Small circular victim sets
//! for bulk scans (sequential scan, bulk write, vacuum) so a large scan
//! doesn't evict the whole pool's worth of frames under `USAGE_COUNT`
//! pressure. Grounded on `original_source/bufmgr.c`'s `freelist.c`
//! `GetBufferFromRing` / `AddBufferToRing` / `StrategyRejectBuffer`.

use crate::clock_sweep::ClockSweep;
use crate::descriptor::{bits, BufferDesc, SpinGuard};
use crate::error::Result;

/// Ring sizing presets named the way `original_source/bufmgr.c` names its
/// strategy callers (Section 4.4 "sizes chosen per use case").
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StrategyKind {
    BulkRead,
    BulkWrite,
    Vacuum,
}

impl StrategyKind {
    pub fn ring_size(self) -> usize {
        match self {
            StrategyKind::BulkRead => 32,
            StrategyKind::BulkWrite => 16,
            StrategyKind::Vacuum => 256,
        }
    }
}

/// A single caller's private ring of candidate frame indices. Not shared
/// across threads — each scan owns one, matching the teacher's
/// per-cursor ownership style (Section 3 "Access strategy").
pub struct AccessStrategy {
    kind: StrategyKind,
    ring: Vec<Option<usize>>,
    cursor: usize,
}

/// What the caller of [`AccessStrategy::get_buffer`] must do with the
/// returned frame.
pub enum StrategyPick<'a> {
    /// Ring slot was empty or its frame was reusable: caller gets the
    /// frame still spinlock-held with `REFCOUNT == 0`, exactly like a
    /// plain [`ClockSweep::get_victim`] result.
    Reuse(usize, SpinGuard<'a>),
    /// The ring's current slot holds a dirty frame that would force a WAL
    /// flush to reuse (Section 4.4 "may reject it"): caller must fall
    /// back to a plain clock-sweep victim outside the ring.
    Rejected,
}

impl AccessStrategy {
    pub fn new(kind: StrategyKind) -> Self {
        Self {
            kind,
            ring: vec![None; kind.ring_size()],
            cursor: 0,
        }
    }

    pub fn kind(&self) -> StrategyKind {
        self.kind
    }

    /// Return the ring's current slot if present and not dirty; else
    /// `Rejected` so the caller falls back to a plain victim (Section 4.4).
    /// `is_dirty` lets the caller decide "would reusing this frame force a
    /// WAL flush" without this module depending on the WAL trait.
    pub fn get_buffer<'a>(
        &mut self,
        frames: &'a [BufferDesc],
        is_dirty: impl Fn(usize) -> bool,
    ) -> Option<StrategyPick<'a>> {
        let slot = self.ring[self.cursor];
        match slot {
            None => None,
            Some(frame) => {
                let guard = frames[frame].lock();
                let state = guard.get();
                if state.refcount() != 0 {
                    // Someone else pinned our ring frame; it's no longer
                    // ours to reuse. Drop it from the ring.
                    guard.unlock_with(state.0);
                    self.ring[self.cursor] = None;
                    None
                } else if is_dirty(frame) {
                    guard.unlock_with(state.0);
                    Some(StrategyPick::Rejected)
                } else {
                    Some(StrategyPick::Reuse(frame, guard))
                }
            }
        }
    }

    /// Acquire a fresh victim via the shared clock sweep and place it in
    /// the ring at the current cursor, advancing the cursor (Section 4.4
    /// `AddBufferToRing`).
    pub fn add_from_sweep<'a>(
        &mut self,
        sweep: &ClockSweep,
        frames: &'a [BufferDesc],
    ) -> Result<(usize, SpinGuard<'a>)> {
        let (idx, guard) = sweep.get_victim(frames)?;
        self.ring[self.cursor] = Some(idx);
        self.cursor = (self.cursor + 1) % self.ring.len();
        Ok((idx, guard))
    }

    /// Bump a freshly-placed frame's `USAGE_COUNT` from 0 to 1 only
    /// (Section 4.4 "strategies never drive usage count above 1"), in the
    /// same write-back the caller uses to hand the frame to `pin_locked`.
    pub fn capped_usage_bump(state: u32) -> u32 {
        let usage = (state & bits::USAGE_COUNT_MASK) >> bits::USAGE_COUNT_SHIFT;
        if usage == 0 {
            state + (1 << bits::USAGE_COUNT_SHIFT)
        } else {
            state
        }
    }
}
