//! Buffer mapping table (C2, Section 4.2): `P` independently-locked
//! partitions, each a plain `HashMap<Tag, usize>`. Deliberately not a
//! single concurrent map (e.g. `dashmap`) — the spec calls for explicit
//! partition-lock acquisition that callers hold across the tag-validity
//! transitions in C7/C8/C9/C11 (Section 5 lock order), which a black-box
//! concurrent map can't expose.

use std::collections::HashMap;

use parking_lot::{RwLock, RwLockReadGuard, RwLockWriteGuard};

use crate::tag::Tag;

pub struct MappingTable {
    partitions: Vec<RwLock<HashMap<Tag, usize>>>,
    mask: u64,
}

impl MappingTable {
    /// `partition_count` must be a power of two (validated by `Config`).
    pub fn new(partition_count: usize) -> Self {
        let partitions = (0..partition_count)
            .map(|_| RwLock::new(HashMap::new()))
            .collect();
        Self {
            partitions,
            mask: partition_count as u64 - 1,
        }
    }

    #[inline]
    pub fn partition_of(&self, hash: u64) -> usize {
        (hash & self.mask) as usize
    }

    pub fn read_partition(&self, hash: u64) -> RwLockReadGuard<'_, HashMap<Tag, usize>> {
        self.partitions[self.partition_of(hash)].read()
    }

    pub fn write_partition(&self, hash: u64) -> RwLockWriteGuard<'_, HashMap<Tag, usize>> {
        self.partitions[self.partition_of(hash)].write()
    }

    pub fn lookup(&self, tag: &Tag, hash: u64) -> Option<usize> {
        self.read_partition(hash).get(tag).copied()
    }

    /// Idempotent on collision: if `tag` is already present, returns the
    /// existing index and leaves the map untouched (Section 4.2 "insert is
    /// idempotent on collision").
    pub fn insert(&self, tag: Tag, hash: u64, index: usize) -> Option<usize> {
        let mut part = self.write_partition(hash);
        if let Some(&existing) = part.get(&tag) {
            return Some(existing);
        }
        part.insert(tag, index);
        None
    }

    pub fn delete(&self, tag: &Tag, hash: u64) {
        self.write_partition(hash).remove(tag);
    }

    pub fn len(&self) -> usize {
        self.partitions.iter().map(|p| p.read().len()).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tag::ForkNumber;

    fn t(block: u32) -> Tag {
        Tag::new(1, 1, 1, ForkNumber::Main, block)
    }

    #[test]
    fn insert_then_lookup() {
        let table = MappingTable::new(4);
        let tag = t(1);
        assert_eq!(table.insert(tag, tag.hash(), 7), None);
        assert_eq!(table.lookup(&tag, tag.hash()), Some(7));
    }

    #[test]
    fn insert_is_idempotent_on_collision() {
        let table = MappingTable::new(4);
        let tag = t(1);
        assert_eq!(table.insert(tag, tag.hash(), 7), None);
        assert_eq!(table.insert(tag, tag.hash(), 9), Some(7));
        assert_eq!(table.lookup(&tag, tag.hash()), Some(7));
    }

    #[test]
    fn delete_removes_entry() {
        let table = MappingTable::new(4);
        let tag = t(1);
        table.insert(tag, tag.hash(), 7);
        table.delete(&tag, tag.hash());
        assert_eq!(table.lookup(&tag, tag.hash()), None);
    }

    #[test]
    fn distinct_tags_partition_independently() {
        let table = MappingTable::new(8);
        for b in 0..50 {
            let tag = t(b);
            table.insert(tag, tag.hash(), b as usize);
        }
        assert_eq!(table.len(), 50);
    }
}
