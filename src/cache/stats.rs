//! Cache Statistics Module
//!
//! Aggregates computed on demand by walking the cache directories.

use serde::Serialize;

use crate::cache::CacheCategory;

// == Category Stats ==
/// File count and payload bytes for one area.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct CategoryStats {
    /// Number of files, sidecars included
    pub files: u64,
    /// Payload bytes, sidecars excluded
    pub size: u64,
}

impl CategoryStats {
    fn record(&mut self, size: u64, is_metadata: bool) {
        self.files += 1;
        if !is_metadata {
            self.size += size;
        }
    }
}

// == Cache Stats ==
/// Per-category totals plus a grand total.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct CacheStats {
    pub images: CategoryStats,
    pub data: CategoryStats,
    pub temp: CategoryStats,
    pub total: CategoryStats,
}

impl CacheStats {
    // == Constructor ==
    /// Creates a new CacheStats with all counters at zero.
    pub fn new() -> Self {
        Self::default()
    }

    // == Record File ==
    /// Accounts one file found in `category`.
    pub fn record_file(&mut self, category: CacheCategory, size: u64, is_metadata: bool) {
        self.category_mut(category).record(size, is_metadata);
        self.total.record(size, is_metadata);
    }

    pub fn category(&self, category: CacheCategory) -> &CategoryStats {
        match category {
            CacheCategory::Images => &self.images,
            CacheCategory::Data => &self.data,
            CacheCategory::Temp => &self.temp,
        }
    }

    fn category_mut(&mut self, category: CacheCategory) -> &mut CategoryStats {
        match category {
            CacheCategory::Images => &mut self.images,
            CacheCategory::Data => &mut self.data,
            CacheCategory::Temp => &mut self.temp,
        }
    }

    /// True when no files exist in any category.
    pub fn is_empty(&self) -> bool {
        self.total.files == 0
    }
}

// == Cleanup Report ==
/// Outcome of a size-bounded cleanup pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct CleanupReport {
    /// Size bound the pass enforced
    pub limit_bytes: u64,
    pub size_before: u64,
    pub size_after: u64,
    /// Entries removed by the expiry phase
    pub expired_removed: usize,
    /// Entries removed by the oldest-first phase
    pub evicted: usize,
}

impl CleanupReport {
    pub fn bytes_freed(&self) -> u64 {
        self.size_before.saturating_sub(self.size_after)
    }
}
