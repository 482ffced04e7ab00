//! Eviction Queue Module
//!
//! Orders cache files for capacity-driven eviction. Recency is approximated
//! by filesystem modification time, so a file that is read but never
//! rewritten keeps its original position.

use std::collections::VecDeque;
use std::path::PathBuf;
use std::time::{Duration, SystemTime};

use crate::cache::CacheCategory;

// == Cache File ==
/// A file found while walking a cache area.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheFile {
    pub path: PathBuf,
    pub category: CacheCategory,
    pub size: u64,
    pub modified: SystemTime,
    /// Whether this is a `.meta` sidecar rather than a payload
    pub is_metadata: bool,
}

impl CacheFile {
    /// Age relative to `now` by modification time; zero for future mtimes.
    pub fn age_at(&self, now: SystemTime) -> Duration {
        now.duration_since(self.modified).unwrap_or_default()
    }
}

// == Eviction Queue ==
/// Payload files ordered for eviction.
///
/// - Front = oldest modification time
/// - Back = newest modification time
///
/// Ties are broken by path so the order is deterministic.
#[derive(Debug, Default)]
pub struct EvictionQueue {
    order: VecDeque<CacheFile>,
}

impl EvictionQueue {
    // == Constructor ==
    /// Creates a new empty queue.
    pub fn new() -> Self {
        Self {
            order: VecDeque::new(),
        }
    }

    /// Builds a queue from walked files, skipping sidecars.
    pub fn from_files(files: impl IntoIterator<Item = CacheFile>) -> Self {
        let mut payloads: Vec<CacheFile> = files.into_iter().filter(|f| !f.is_metadata).collect();
        payloads.sort_by(|a, b| a.modified.cmp(&b.modified).then_with(|| a.path.cmp(&b.path)));
        Self {
            order: payloads.into(),
        }
    }

    // == Evict Oldest ==
    /// Returns and removes the oldest file.
    ///
    /// Returns None if the queue is empty.
    pub fn evict_oldest(&mut self) -> Option<CacheFile> {
        self.order.pop_front()
    }

    // == Peek Oldest ==
    /// Returns the oldest file without removing it.
    pub fn peek_oldest(&self) -> Option<&CacheFile> {
        self.order.front()
    }

    /// Total payload bytes still queued.
    pub fn total_bytes(&self) -> u64 {
        self.order.iter().map(|f| f.size).sum()
    }

    pub fn len(&self) -> usize {
        self.order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }
}
