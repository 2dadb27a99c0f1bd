//! Configuration for catlog
//!
//! Centralized configuration with sensible defaults.

use std::path::PathBuf;

use crate::error::{CatlogError, Result};
use crate::record::{RECORD_HEADER_SIZE, RECORD_TAIL_SIZE};

/// Main configuration for a catalog and its backing store
#[derive(Debug, Clone)]
pub struct Config {
    // -------------------------------------------------------------------------
    // Storage Configuration
    // -------------------------------------------------------------------------
    /// Root directory for the file-backed store
    /// Internal structure:
    ///   {data_dir}/
    ///     └── objects/
    ///           ├── {oid}.{gen}.hdr   (log header)
    ///           └── {oid}.{gen}.rec   (record frames)
    pub data_dir: PathBuf,

    /// Sync strategy: when committed transactions are fsynced
    pub sync_strategy: SyncStrategy,

    // -------------------------------------------------------------------------
    // Log Geometry
    // -------------------------------------------------------------------------
    /// Number of slots in a newly created catalog bitmap.
    /// Slot 0 is reserved and one slot is kept as a guard, so at most
    /// `catalog_capacity - 2` segments are live at once.
    pub catalog_capacity: u32,

    /// Number of slots in each segment bitmap (records per segment + 1)
    pub segment_capacity: u32,

    /// Largest encoded record accepted by an append (bytes)
    pub chunk_size: usize,
}

/// When the file store forces committed writes to disk
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncStrategy {
    /// fsync every object touched by a transaction when it commits
    EveryCommit,

    /// fsync dirty objects after N committed transactions
    EveryNCommits { count: usize },

    /// Only fsync on explicit `sync()` / `close()`
    Manual,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from("./catlog_data"),
            sync_strategy: SyncStrategy::EveryCommit,
            catalog_capacity: 8192,
            segment_capacity: 8192,
            chunk_size: 8192,
        }
    }
}

impl Config {
    /// Create a new config builder
    pub fn builder() -> ConfigBuilder {
        ConfigBuilder::default()
    }

    /// Reject geometries the allocator cannot work with
    pub fn validate(&self) -> Result<()> {
        if self.catalog_capacity < 3 {
            return Err(CatlogError::Config(format!(
                "catalog_capacity must be at least 3, got {}",
                self.catalog_capacity
            )));
        }
        if self.segment_capacity < 2 {
            return Err(CatlogError::Config(format!(
                "segment_capacity must be at least 2, got {}",
                self.segment_capacity
            )));
        }
        if self.chunk_size < RECORD_HEADER_SIZE + RECORD_TAIL_SIZE {
            return Err(CatlogError::Config(format!(
                "chunk_size {} is smaller than an empty record",
                self.chunk_size
            )));
        }
        if let SyncStrategy::EveryNCommits { count: 0 } = self.sync_strategy {
            return Err(CatlogError::Config(
                "EveryNCommits needs a count above zero".to_string(),
            ));
        }
        Ok(())
    }
}

/// Builder for Config
#[derive(Default)]
pub struct ConfigBuilder {
    config: Config,
}

impl ConfigBuilder {
    /// Set the data directory (root for the file store)
    pub fn data_dir(mut self, path: impl Into<PathBuf>) -> Self {
        self.config.data_dir = path.into();
        self
    }

    /// Set the sync strategy
    pub fn sync_strategy(mut self, strategy: SyncStrategy) -> Self {
        self.config.sync_strategy = strategy;
        self
    }

    /// Set the catalog bitmap size (in slots)
    pub fn catalog_capacity(mut self, slots: u32) -> Self {
        self.config.catalog_capacity = slots;
        self
    }

    /// Set the segment bitmap size (in slots)
    pub fn segment_capacity(mut self, slots: u32) -> Self {
        self.config.segment_capacity = slots;
        self
    }

    /// Set the maximum encoded record size (in bytes)
    pub fn chunk_size(mut self, bytes: usize) -> Self {
        self.config.chunk_size = bytes;
        self
    }

    pub fn build(self) -> Config {
        self.config
    }
}
