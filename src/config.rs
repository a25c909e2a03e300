//! Tunables (Section 6). Deserialized from TOML with `serde`; everything
//! has a default matching the original system so a caller can start from
//! `Config::default()` and override only what they need.

use anyhow::Context;
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Number of frames in the pool (N in the spec's invariants).
    pub buffer_count: usize,
    /// Number of mapping-table partitions. Must be a power of two.
    pub partition_count: usize,
    /// Cap on how many victims the background writer scans per round.
    pub bgwriter_lru_max_pages: u32,
    /// Multiplier applied to recent allocation rate to size the next
    /// background-writer round.
    pub bgwriter_lru_multiplier: f64,
    /// After this many buffers written during a checkpoint, request an
    /// fsync of what's been written so far (0 disables).
    pub checkpoint_flush_after: u32,
    /// Same idea for the background writer.
    pub bgwriter_flush_after: u32,
    /// Same idea for a backend doing its own eviction writes.
    pub backend_flush_after: u32,
    /// Hint to the storage manager for how many concurrent prefetches to
    /// issue for regular queries.
    pub effective_io_concurrency: u32,
    /// Same, for maintenance operations (checkpoint, bulk load).
    pub maintenance_io_concurrency: u32,
    /// On a checksum failure, zero the page and warn instead of erroring.
    pub zero_damaged_pages: bool,
    /// Time each `smgr` call and log it at `track_io_timing` spans.
    pub track_io_timing: bool,
    /// Ask the storage manager to bypass the OS page cache for data files.
    pub io_direct_data: bool,
    /// Size of the per-process pin cache before overflowing to a hash map.
    pub pin_cache_size: usize,
    /// Logical "number of processes" sharing this pool, used to derive the
    /// per-call cap on relation-extend batch size. Defaults to the number
    /// of available CPUs, which is the closest analogue in a threaded
    /// embedding of what was originally a `max_connections`-derived value.
    pub process_count: usize,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            buffer_count: 16384,
            partition_count: 128,
            bgwriter_lru_max_pages: 100,
            bgwriter_lru_multiplier: 2.0,
            checkpoint_flush_after: 32,
            bgwriter_flush_after: 64,
            backend_flush_after: 0,
            effective_io_concurrency: 1,
            maintenance_io_concurrency: 10,
            zero_damaged_pages: false,
            track_io_timing: false,
            io_direct_data: false,
            pin_cache_size: 8,
            process_count: num_cpus::get().max(1),
        }
    }
}

impl Config {
    pub fn from_toml_str(s: &str) -> Result<Self> {
        let cfg: Config = toml::from_str(s).map_err(|e| Error::programmer(e.to_string()))?;
        cfg.validate()?;
        Ok(cfg)
    }

    pub fn from_file(path: impl AsRef<std::path::Path>) -> Result<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("reading buffer pool config from {}", path.display()))
            .map_err(|e| Error::programmer(format!("{e:#}")))?;
        Self::from_toml_str(&text)
    }

    pub fn validate(&self) -> Result<()> {
        if self.buffer_count == 0 {
            return Err(Error::programmer("buffer_count must be nonzero"));
        }
        if self.partition_count == 0 || !self.partition_count.is_power_of_two() {
            return Err(Error::programmer(
                "partition_count must be a nonzero power of two",
            ));
        }
        if self.partition_count > self.buffer_count {
            return Err(Error::programmer(
                "partition_count must not exceed buffer_count",
            ));
        }
        if self.pin_cache_size < 4 {
            return Err(Error::programmer("pin_cache_size must be at least 4"));
        }
        if self.process_count == 0 {
            return Err(Error::programmer("process_count must be nonzero"));
        }
        Ok(())
    }

    /// Per-process maximum for a single `extend_by` call (Section 4.9):
    /// derived from pool size and configured process count, always >= 1,
    /// so a single caller can never starve every other process of frames.
    pub fn max_extend_batch(&self) -> u32 {
        ((self.buffer_count / self.process_count.max(1)) / 4).max(1) as u32
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_validates() {
        Config::default().validate().unwrap();
    }

    #[test]
    fn rejects_non_power_of_two_partitions() {
        let mut cfg = Config::default();
        cfg.partition_count = 100;
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn parses_partial_toml_with_defaults() {
        let cfg = Config::from_toml_str("buffer_count = 256\npartition_count = 16\n").unwrap();
        assert_eq!(cfg.buffer_count, 256);
        assert_eq!(cfg.partition_count, 16);
        assert_eq!(cfg.pin_cache_size, 8);
    }

    #[test]
    fn max_extend_batch_is_at_least_one() {
        let mut cfg = Config::default();
        cfg.buffer_count = 2;
        cfg.process_count = 64;
        assert_eq!(cfg.max_extend_batch(), 1);
    }
}
