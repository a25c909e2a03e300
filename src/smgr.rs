//! Storage manager: external collaborator (Section 1, Section 6). The core
//! only ever calls these capabilities; it never touches a filesystem path
//! directly. Generalizes the teacher's concrete file-per-page
//! `DiskManager` into a trait plus one file-backed implementation keyed by
//! tablespace/relation/fork instead of a flat page id.

use std::fs::OpenOptions;
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::PathBuf;

use crate::page::PAGE_SIZE;
use crate::tag::{ForkNumber, Tag};

/// Capability set consumed by the core (Section 6 "Storage manager
/// (consumed)").
pub trait StorageManager: Send + Sync {
    fn exists(&self, tag: &Tag) -> bool;
    fn nblocks(&self, tablespace_id: u32, database_id: u32, relation_id: u32, fork: ForkNumber) -> std::io::Result<u32>;
    /// Cached block count, if the caller has reason to believe it's still
    /// accurate without a fresh `stat`; `None` means "ask `nblocks`".
    fn nblocks_cached(&self, _tablespace_id: u32, _database_id: u32, _relation_id: u32, _fork: ForkNumber) -> Option<u32> {
        None
    }
    fn read(&self, tag: &Tag, out: &mut [u8; PAGE_SIZE]) -> std::io::Result<()>;
    fn write(&self, tag: &Tag, bytes: &[u8; PAGE_SIZE], fsync: bool) -> std::io::Result<()>;
    fn zero_extend(
        &self,
        tablespace_id: u32,
        database_id: u32,
        relation_id: u32,
        fork: ForkNumber,
        first_block: u32,
        count: u32,
    ) -> std::io::Result<()>;
    /// Best-effort readahead; returns whether it actually issued I/O
    /// (`false` if e.g. already resident, per Section 6).
    fn prefetch(&self, _tag: &Tag) -> bool {
        false
    }
    /// Non-authoritative hint that these blocks should be scheduled for
    /// writeback soon (Section 4.12 step 5, Section 4.13 "Writeback").
    fn writeback(&self, _tablespace_id: u32, _database_id: u32, _relation_id: u32, _fork: ForkNumber, _first_block: u32, _count: u32) {}
}

/// File-per-relation-fork storage manager: each `(tablespace, database,
/// relation, fork)` maps to one flat file under `root`, blocks addressed
/// by byte offset `block_number * PAGE_SIZE` — the natural generalization
/// of the teacher's file-per-page `DiskManager` to fork-addressed files.
pub struct FileStorageManager {
    root: PathBuf,
}

impl FileStorageManager {
    pub fn new(root: impl Into<PathBuf>) -> std::io::Result<Self> {
        let root = root.into();
        std::fs::create_dir_all(&root)?;
        Ok(Self { root })
    }

    fn path(&self, tablespace_id: u32, database_id: u32, relation_id: u32, fork: ForkNumber) -> PathBuf {
        self.root.join(format!(
            "{}_{}_{}_{:?}",
            tablespace_id, database_id, relation_id, fork
        ))
    }

    fn open_rw(&self, path: &PathBuf) -> std::io::Result<std::fs::File> {
        OpenOptions::new().read(true).write(true).create(true).open(path)
    }
}

impl StorageManager for FileStorageManager {
    fn exists(&self, tag: &Tag) -> bool {
        self.path(tag.tablespace_id, tag.database_id, tag.relation_id, tag.fork)
            .exists()
    }

    fn nblocks(&self, tablespace_id: u32, database_id: u32, relation_id: u32, fork: ForkNumber) -> std::io::Result<u32> {
        let path = self.path(tablespace_id, database_id, relation_id, fork);
        match std::fs::metadata(&path) {
            Ok(meta) => Ok((meta.len() / PAGE_SIZE as u64) as u32),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(0),
            Err(e) => Err(e),
        }
    }

    fn read(&self, tag: &Tag, out: &mut [u8; PAGE_SIZE]) -> std::io::Result<()> {
        let path = self.path(tag.tablespace_id, tag.database_id, tag.relation_id, tag.fork);
        let mut file = OpenOptions::new().read(true).open(path)?;
        file.seek(SeekFrom::Start(tag.block_number as u64 * PAGE_SIZE as u64))?;
        file.read_exact(out)
    }

    fn write(&self, tag: &Tag, bytes: &[u8; PAGE_SIZE], fsync: bool) -> std::io::Result<()> {
        let path = self.path(tag.tablespace_id, tag.database_id, tag.relation_id, tag.fork);
        let mut file = self.open_rw(&path)?;
        file.seek(SeekFrom::Start(tag.block_number as u64 * PAGE_SIZE as u64))?;
        file.write_all(bytes)?;
        if fsync {
            file.sync_data()?;
        }
        Ok(())
    }

    fn zero_extend(
        &self,
        tablespace_id: u32,
        database_id: u32,
        relation_id: u32,
        fork: ForkNumber,
        first_block: u32,
        count: u32,
    ) -> std::io::Result<()> {
        let path = self.path(tablespace_id, database_id, relation_id, fork);
        let mut file = self.open_rw(&path)?;
        let zero = [0u8; PAGE_SIZE];
        file.seek(SeekFrom::Start(first_block as u64 * PAGE_SIZE as u64))?;
        for _ in 0..count {
            file.write_all(&zero)?;
        }
        Ok(())
    }

    fn prefetch(&self, _tag: &Tag) -> bool {
        // Plain files with no `posix_fadvise` binding available here; a
        // real deployment would call into `nix` for readahead.
        false
    }
}
