//! Shared-memory-style buffer pool manager for a page-oriented storage
//! engine, modeled on PostgreSQL's `bufmgr.c`. See `BufferPool` in
//! [`manager`] for the entry point.

mod checkpoint;
mod cleanup_lock;
mod clock_sweep;
mod config;
mod descriptor;
mod error;
mod io_coordinator;
mod invalidation;
mod latch;
mod manager;
mod mapping;
mod page;
mod pin;
mod resource_owner;
mod smgr;
mod strategy;
mod tag;
mod wal;
mod writeback;

pub use checkpoint::CheckpointFlags;
pub use config::Config;
pub use error::{Error, Result};
pub use invalidation::{RelationDrop, RelationKey};
pub use manager::{BufferPool, ExtendFlags, FrameLockGuard, LockMode, PinnedFrame, PrefetchOutcome, ReadMode};
pub use page::{PageBuf, PAGE_SIZE};
pub use pin::PinCache;
pub use resource_owner::ResourceOwner;
pub use smgr::{FileStorageManager, StorageManager};
pub use strategy::{AccessStrategy, StrategyKind};
pub use tag::{ForkNumber, Tag, P_NEW};
pub use wal::{NullWal, TestWal, Wal};
