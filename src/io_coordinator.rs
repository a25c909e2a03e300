//! Single-writer-per-frame I/O gating (C6, Section 4.6). Grounded on
//! `original_source/bufmgr.c`'s `StartBufferIO` / `TerminateBufferIO` /
//! `AbortBufferIO` / `WaitIO`: one thread at a time may have
//! `IO_IN_PROGRESS` set on a frame, everyone else blocks on the frame's
//! condition variable until it clears.

use crate::descriptor::{bits, BufferDesc};

/// Whether the I/O this coordinator is gating is a read or a write
/// (Section 4.6 `for_input`); decides what "already done" means in
/// [`start_io`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IoKind {
    Read,
    Write,
}

/// Block until no other thread has I/O in progress on this frame.
pub fn wait_io(desc: &BufferDesc) {
    if !desc.state().io_in_progress() {
        return;
    }
    desc.wait_for_io(|| desc.state().io_in_progress());
}

/// Try to become the single I/O operator for this frame (`StartBufferIO`,
/// Section 4.6 steps 1-3). Returns `true` if the caller must perform the
/// I/O and call [`terminate`] or [`abort`] when done; `false` if the work
/// this call would have done is already done (reading: already `VALID`;
/// writing: not `DIRTY`).
pub fn start_io(desc: &BufferDesc, kind: IoKind) -> bool {
    loop {
        let guard = desc.lock();
        let state = guard.get();

        if state.io_in_progress() {
            guard.unlock_with(state.0);
            wait_io(desc);
            continue;
        }

        let already_done = match kind {
            IoKind::Read => state.valid(),
            IoKind::Write => !state.dirty(),
        };
        if already_done {
            guard.unlock_with(state.0);
            return false;
        }

        guard.unlock_with(state.0 | bits::IO_IN_PROGRESS);
        return true;
    }
}

/// Successfully finish an I/O started with [`start_io`] (`TerminateBufferIO`,
/// Section 4.6). `set_bits` lets the caller also flip e.g. `VALID` in the
/// same write-back. `clear_dirty` clears `DIRTY` unless `JUST_DIRTIED` is
/// set, meaning the frame was re-dirtied mid-flush and must be rewritten.
pub fn terminate(desc: &BufferDesc, set_bits: u32, clear_dirty: bool) {
    let guard = desc.lock();
    let state = guard.get();
    let mut next = (state.0 | set_bits) & !bits::IO_IN_PROGRESS & !bits::IO_ERROR;
    if clear_dirty && !state.just_dirtied() {
        next &= !bits::DIRTY;
    }
    guard.unlock_with(next);
    desc.notify_io_complete();
}

/// Abort an I/O started with [`start_io`] after a failure (`AbortBufferIO`):
/// sets `IO_ERROR`, clears `IO_IN_PROGRESS`, and wakes waiters so they see
/// the error on their next check rather than blocking forever.
pub fn abort(desc: &BufferDesc) {
    let guard = desc.lock();
    let state = guard.get();
    let next = (state.0 | bits::IO_ERROR) & !bits::IO_IN_PROGRESS;
    guard.unlock_with(next);
    desc.notify_io_complete();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn start_then_terminate_sets_valid() {
        let desc = BufferDesc::new();
        assert!(start_io(&desc, IoKind::Read));
        assert!(desc.state().io_in_progress());
        terminate(&desc, bits::VALID | bits::TAG_VALID, false);
        assert!(desc.state().valid());
        assert!(!desc.state().io_in_progress());
    }

    #[test]
    fn read_start_is_noop_when_already_valid() {
        let desc = BufferDesc::new();
        desc.update(|s| s | bits::VALID);
        assert!(!start_io(&desc, IoKind::Read));
    }

    #[test]
    fn write_start_is_noop_when_not_dirty() {
        let desc = BufferDesc::new();
        assert!(!start_io(&desc, IoKind::Write));
    }

    #[test]
    fn abort_sets_io_error_and_clears_in_progress() {
        let desc = BufferDesc::new();
        desc.update(|s| s | bits::DIRTY);
        assert!(start_io(&desc, IoKind::Write));
        abort(&desc);
        assert!(desc.state().io_error());
        assert!(!desc.state().io_in_progress());
    }

    #[test]
    fn terminate_preserves_dirty_when_just_dirtied() {
        let desc = BufferDesc::new();
        desc.update(|s| s | bits::DIRTY);
        assert!(start_io(&desc, IoKind::Write));
        desc.update(|s| s | bits::JUST_DIRTIED);
        terminate(&desc, 0, true);
        assert!(desc.state().dirty(), "JUST_DIRTIED must preserve DIRTY");
    }

    #[test]
    fn terminate_clears_dirty_without_just_dirtied() {
        let desc = BufferDesc::new();
        desc.update(|s| s | bits::DIRTY);
        assert!(start_io(&desc, IoKind::Write));
        terminate(&desc, 0, true);
        assert!(!desc.state().dirty());
    }
}
