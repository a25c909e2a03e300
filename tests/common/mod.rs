//! Fake in-memory storage manager for integration scenarios (Section 8's
//! "Concrete scenarios"), so tests don't pay for real file I/O and can
//! pre-seed relation contents directly.

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;

use bufmgr::{ForkNumber, StorageManager, Tag, PAGE_SIZE};

type RelKey = (u32, u32, u32, ForkNumber);

#[derive(Default)]
pub struct MemStorageManager {
    files: Mutex<HashMap<RelKey, Vec<[u8; PAGE_SIZE]>>>,
    pub reads: AtomicUsize,
    pub writes: AtomicUsize,
    /// Tablespace id of every `write` call, in order, for checkpoint
    /// balancing assertions.
    pub write_order: Mutex<Vec<u32>>,
}

impl MemStorageManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// Pre-seed a relation's contents directly, bypassing the pool.
    pub fn seed(&self, tablespace_id: u32, database_id: u32, relation_id: u32, fork: ForkNumber, blocks: Vec<[u8; PAGE_SIZE]>) {
        self.files
            .lock()
            .unwrap()
            .insert((tablespace_id, database_id, relation_id, fork), blocks);
    }
}

impl StorageManager for MemStorageManager {
    fn exists(&self, tag: &Tag) -> bool {
        self.files
            .lock()
            .unwrap()
            .get(&(tag.tablespace_id, tag.database_id, tag.relation_id, tag.fork))
            .map(|blocks| (tag.block_number as usize) < blocks.len())
            .unwrap_or(false)
    }

    fn nblocks(&self, tablespace_id: u32, database_id: u32, relation_id: u32, fork: ForkNumber) -> std::io::Result<u32> {
        Ok(self
            .files
            .lock()
            .unwrap()
            .get(&(tablespace_id, database_id, relation_id, fork))
            .map(|blocks| blocks.len() as u32)
            .unwrap_or(0))
    }

    fn read(&self, tag: &Tag, out: &mut [u8; PAGE_SIZE]) -> std::io::Result<()> {
        self.reads.fetch_add(1, Ordering::Relaxed);
        let files = self.files.lock().unwrap();
        let key = (tag.tablespace_id, tag.database_id, tag.relation_id, tag.fork);
        match files.get(&key).and_then(|blocks| blocks.get(tag.block_number as usize)) {
            Some(block) => {
                out.copy_from_slice(block);
                Ok(())
            }
            None => Err(std::io::Error::new(std::io::ErrorKind::NotFound, "block not seeded")),
        }
    }

    fn write(&self, tag: &Tag, bytes: &[u8; PAGE_SIZE], _fsync: bool) -> std::io::Result<()> {
        self.writes.fetch_add(1, Ordering::Relaxed);
        self.write_order.lock().unwrap().push(tag.tablespace_id);
        let mut files = self.files.lock().unwrap();
        let key = (tag.tablespace_id, tag.database_id, tag.relation_id, tag.fork);
        let blocks = files.entry(key).or_default();
        let idx = tag.block_number as usize;
        if blocks.len() <= idx {
            blocks.resize(idx + 1, [0u8; PAGE_SIZE]);
        }
        blocks[idx] = *bytes;
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
        let mut files = self.files.lock().unwrap();
        let blocks = files.entry((tablespace_id, database_id, relation_id, fork)).or_default();
        let end = (first_block + count) as usize;
        if blocks.len() < end {
            blocks.resize(end, [0u8; PAGE_SIZE]);
        }
        Ok(())
    }
}
