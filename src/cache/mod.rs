//! Cache Module
//!
//! Provides a disk cache for images and JSON documents with lazy TTL
//! expiry and size-bounded eviction.

mod entry;
mod eviction;
mod stats;
mod store;

#[cfg(test)]
mod property_tests;

use std::time::Duration;

// Re-export public types
pub use entry::{cache_key, now_millis, CacheCategory, CacheMetadata, EntryKind};
pub use eviction::{CacheFile, EvictionQueue};
pub use stats::{CacheStats, CategoryStats, CleanupReport};
pub use store::FileCache;

// == Public Constants ==
/// Default maximum age of an entry before it is considered expired
pub const DEFAULT_MAX_AGE: Duration = Duration::from_secs(7 * 24 * 60 * 60);

/// Default size bound enforced by cleanup, in bytes
pub const DEFAULT_MAX_SIZE_BYTES: u64 = 100 * 1024 * 1024; // 100 MB

/// Extension of sidecar metadata files
pub const METADATA_EXTENSION: &str = "meta";

// == File Cache Config ==
/// Lifetime and size bounds of a [`FileCache`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileCacheConfig {
    pub max_age: Duration,
    pub max_size_bytes: u64,
}

impl Default for FileCacheConfig {
    fn default() -> Self {
        Self {
            max_age: DEFAULT_MAX_AGE,
            max_size_bytes: DEFAULT_MAX_SIZE_BYTES,
        }
    }
}
