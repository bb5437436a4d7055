//! NebulaStore Block Repository
//!
//! Storage abstractions and implementations:
//! - `BlockStore` / `BlockStoreSync` traits for pluggable block storage
//! - `RocksStore` for durable block storage
//! - `MemoryStore` for testing
//! - `ExpiryStore` for block TTL metadata

pub mod backend;
pub mod expiry;
pub mod memory;
pub mod rocks;

pub use backend::{AsyncAdapter, BlockStore, BlockStoreSync, ListKind, SpaceReport};
pub use expiry::ExpiryStore;
pub use memory::MemoryStore;
pub use rocks::RocksStore;

/// Block repository configuration
#[derive(Debug, Clone)]
pub struct StoreConfig {
    /// Path to the repository directory
    pub path: std::path::PathBuf,

    /// Maximum storage quota in bytes (0 = unlimited)
    pub quota_max_bytes: u64,

    /// Enable compression for stored blocks
    pub compression: bool,

    /// RocksDB block cache size in bytes
    pub cache_size: usize,

    /// Number of background compaction threads
    pub compaction_threads: usize,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            path: std::path::PathBuf::from("./nebula_data"),
            quota_max_bytes: 0, // Unlimited
            compression: true,
            cache_size: 256 * 1024 * 1024, // 256 MB
            compaction_threads: 4,
        }
    }
}

impl StoreConfig {
    /// Create a new store config with the given path
    pub fn new(path: impl Into<std::path::PathBuf>) -> Self {
        Self {
            path: path.into(),
            ..Default::default()
        }
    }

    /// Set the storage quota
    pub fn with_quota(mut self, bytes: u64) -> Self {
        self.quota_max_bytes = bytes;
        self
    }

    /// Set cache size
    pub fn with_cache_size(mut self, bytes: usize) -> Self {
        self.cache_size = bytes;
        self
    }

    /// Enable/disable compression
    pub fn with_compression(mut self, enabled: bool) -> Self {
        self.compression = enabled;
        self
    }
}
