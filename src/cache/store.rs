//! File Cache Module
//!
//! Disk-backed cache for images and JSON documents. Entries are addressed by
//! the SHA-256 of a logical identifier and carry a `.meta` sidecar; expiry is
//! checked lazily on lookup and in explicit sweeps.
//!
//! Reads, writes and deletes are fail-open: a failing filesystem call is
//! logged and reported as a miss. Only creating the cache directories
//! returns an error.

use std::io;
use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};

use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use tokio::fs;
use tracing::{debug, info, warn};

use crate::cache::{
    cache_key, now_millis, CacheCategory, CacheFile, CacheMetadata, CacheStats, CleanupReport,
    EntryKind, EvictionQueue, FileCacheConfig, METADATA_EXTENSION,
};
use crate::error::{FailLoud, FailOpen, Result};
use crate::fsutil::{remove_dir_if_exists, remove_if_exists, write_atomic};

// == File Cache ==
/// Disk cache rooted at one directory with `images/`, `data/` and `temp/` areas.
#[derive(Debug)]
pub struct FileCache {
    root: PathBuf,
    config: FileCacheConfig,
}

impl FileCache {
    // == Constructor ==
    /// Opens the cache at `root`, creating the category directories.
    ///
    /// This is the only fail-loud cache operation: nothing can proceed
    /// without the directories.
    pub async fn init(root: impl Into<PathBuf>, config: FileCacheConfig) -> Result<Self> {
        let cache = Self {
            root: root.into(),
            config,
        };
        cache.ensure_directories().await?;
        info!(
            root = %cache.root.display(),
            max_age_secs = cache.config.max_age.as_secs(),
            max_size_bytes = cache.config.max_size_bytes,
            "File cache initialized"
        );
        Ok(cache)
    }

    async fn ensure_directories(&self) -> Result<()> {
        for category in CacheCategory::ALL {
            self.ensure_directory(category).await?;
        }
        Ok(())
    }

    async fn ensure_directory(&self, category: CacheCategory) -> Result<()> {
        fs::create_dir_all(self.category_dir(category))
            .await
            .storage_context(&format!("create cache directory '{}'", category))
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn config(&self) -> &FileCacheConfig {
        &self.config
    }

    /// Directory holding one category's files.
    pub fn category_dir(&self, category: CacheCategory) -> PathBuf {
        self.root.join(category.dir_name())
    }

    fn payload_path(&self, kind: EntryKind, identifier: &str) -> PathBuf {
        let hash = cache_key(identifier);
        let dir = self.category_dir(kind.category());
        match kind {
            EntryKind::Image => dir.join(hash),
            EntryKind::Data => dir.join(format!("{}.json", hash)),
        }
    }

    // == Images ==
    /// Stores image bytes under `url`. Returns the payload path, or None on failure.
    pub async fn cache_image(&self, url: &str, bytes: &[u8]) -> Option<PathBuf> {
        self.store_entry(EntryKind::Image, url, bytes).await
    }

    /// Returns the cached image bytes for `url` if present and fresh.
    pub async fn get_cached_image(&self, url: &str) -> Option<Vec<u8>> {
        let path = self.lookup(EntryKind::Image, url).await?;
        fs::read(&path).await.or_miss("read cached image")
    }

    pub async fn is_image_cached(&self, url: &str) -> bool {
        self.lookup(EntryKind::Image, url).await.is_some()
    }

    /// Deletes the image cached under `url` together with its sidecar.
    pub async fn remove_image(&self, url: &str) -> bool {
        remove_entry_files(&self.payload_path(EntryKind::Image, url)).await
    }

    // == Data ==
    /// Stores a JSON document under `key`. Returns the payload path, or None on failure.
    pub async fn cache_data(&self, key: &str, document: &Value) -> Option<PathBuf> {
        let bytes = serde_json::to_vec(document).or_miss("encode cached data")?;
        self.store_entry(EntryKind::Data, key, &bytes).await
    }

    /// Returns the cached JSON document for `key` if present and fresh.
    pub async fn get_cached_data(&self, key: &str) -> Option<Value> {
        let path = self.lookup(EntryKind::Data, key).await?;
        let bytes = fs::read(&path).await.or_miss("read cached data")?;
        serde_json::from_slice(&bytes).or_miss("decode cached data")
    }

    pub async fn is_data_cached(&self, key: &str) -> bool {
        self.lookup(EntryKind::Data, key).await.is_some()
    }

    /// Typed variant of [`FileCache::cache_data`].
    pub async fn cache_json<T: Serialize>(&self, key: &str, value: &T) -> Option<PathBuf> {
        let document = serde_json::to_value(value).or_miss("encode cached data")?;
        self.cache_data(key, &document).await
    }

    /// Typed variant of [`FileCache::get_cached_data`].
    pub async fn get_cached_json<T: DeserializeOwned>(&self, key: &str) -> Option<T> {
        let document = self.get_cached_data(key).await?;
        serde_json::from_value(document).or_miss("decode cached data")
    }

    /// Deletes the document cached under `key` together with its sidecar.
    pub async fn remove_data(&self, key: &str) -> bool {
        remove_entry_files(&self.payload_path(EntryKind::Data, key)).await
    }

    // == Temp ==
    /// Creates (or truncates) an empty temp file named `name`.
    ///
    /// Names containing path separators or `..` are rejected.
    pub async fn create_temp_file(&self, name: &str) -> Option<PathBuf> {
        let path = self.temp_path(name)?;
        fs::create_dir_all(self.category_dir(CacheCategory::Temp))
            .await
            .or_miss("create temp directory")?;
        fs::File::create(&path).await.or_miss("create temp file")?;
        Some(path)
    }

    /// Returns the path of an existing temp file.
    pub async fn get_temp_file(&self, name: &str) -> Option<PathBuf> {
        let path = self.temp_path(name)?;
        let exists = fs::try_exists(&path).await.or_miss("stat temp file")?;
        exists.then_some(path)
    }

    fn temp_path(&self, name: &str) -> Option<PathBuf> {
        let valid = !name.is_empty()
            && name != "."
            && name != ".."
            && !name.contains('/')
            && !name.contains('\\');
        if !valid {
            warn!(name, "Rejected temp file name");
            return None;
        }
        Some(self.category_dir(CacheCategory::Temp).join(name))
    }

    // == Entry Internals ==
    async fn store_entry(&self, kind: EntryKind, identifier: &str, bytes: &[u8]) -> Option<PathBuf> {
        let path = self.payload_path(kind, identifier);
        write_atomic(&path, bytes).await.or_miss("write cache payload")?;

        // Payload and sidecar are two separate writes; a crash in between
        // leaves a payload that lookups treat as not cached.
        let metadata = CacheMetadata::new(identifier, bytes.len() as u64, kind);
        if let Err(err) = write_metadata(&path, &metadata).await {
            debug!(identifier, error = %err, "Failed to write cache metadata");
        }

        debug!(identifier, kind = ?kind, size = bytes.len(), "Cached entry");
        Some(path)
    }

    /// Resolves a live entry, deleting it if it has expired.
    async fn lookup(&self, kind: EntryKind, identifier: &str) -> Option<PathBuf> {
        let path = self.payload_path(kind, identifier);
        if !fs::try_exists(&path).await.or_miss("stat cache payload")? {
            return None;
        }

        let metadata = read_metadata(&path).await?;
        if metadata.is_expired(self.config.max_age) {
            debug!(identifier, "Cache entry expired");
            remove_entry_files(&path).await;
            return None;
        }
        Some(path)
    }

    // == Size & Stats ==
    /// Total payload bytes across all areas; sidecars are not counted.
    pub async fn get_cache_size(&self) -> u64 {
        let mut total = 0;
        for category in CacheCategory::ALL {
            total += self
                .scan(category)
                .await
                .iter()
                .filter(|f| !f.is_metadata)
                .map(|f| f.size)
                .sum::<u64>();
        }
        total
    }

    /// Per-category file counts and payload sizes.
    pub async fn get_cache_stats(&self) -> CacheStats {
        let mut stats = CacheStats::new();
        for category in CacheCategory::ALL {
            for file in self.scan(category).await {
                stats.record_file(category, file.size, file.is_metadata);
            }
        }
        stats
    }

    async fn scan(&self, category: CacheCategory) -> Vec<CacheFile> {
        collect_files(&self.category_dir(category), category).await
    }

    // == Cleanup Expired ==
    /// Removes every image and data entry older than the configured max age.
    ///
    /// Entries without a readable sidecar are aged by modification time.
    /// Returns the number of entries removed.
    pub async fn clear_expired_cache(&self) -> usize {
        let now_ms = now_millis();
        let now = SystemTime::now();
        let max_age = self.config.max_age;
        let mut removed = 0;

        for category in [CacheCategory::Images, CacheCategory::Data] {
            for file in self.scan(category).await.into_iter().filter(|f| !f.is_metadata) {
                let expired = match read_metadata(&file.path).await {
                    Some(metadata) => metadata.is_expired_at(now_ms, max_age),
                    None => file.age_at(now) > max_age,
                };
                if expired && remove_entry_files(&file.path).await {
                    removed += 1;
                }
            }
        }

        if removed > 0 {
            info!("Expired cache cleanup: removed {} entries", removed);
        } else {
            debug!("Expired cache cleanup: no expired entries found");
        }
        removed
    }

    // == Clear ==
    /// Deletes every area and re-creates the empty directories.
    ///
    /// Safe to call repeatedly; only failing to re-create a directory is an error.
    pub async fn clear_all_cache(&self) -> Result<()> {
        for category in CacheCategory::ALL {
            self.remove_category_dir(category).await;
        }
        self.ensure_directories().await?;
        info!("Cleared all cache");
        Ok(())
    }

    /// Deletes one area and re-creates its empty directory.
    pub async fn clear_cache_by_type(&self, category: CacheCategory) -> Result<()> {
        self.remove_category_dir(category).await;
        self.ensure_directory(category).await?;
        info!(category = %category, "Cleared cache category");
        Ok(())
    }

    async fn remove_category_dir(&self, category: CacheCategory) {
        if let Err(err) = remove_dir_if_exists(&self.category_dir(category)).await {
            warn!(category = %category, error = %err, "Failed to remove cache directory");
        }
    }

    // == Size-Bounded Cleanup ==
    /// Brings the cache under `max_size_bytes` (or the configured bound).
    ///
    /// Phase one removes expired entries. If the cache is still too large,
    /// phase two deletes payloads oldest modification time first, with
    /// their sidecars, until the total fits.
    pub async fn cleanup_cache_if_needed(&self, max_size_bytes: Option<u64>) -> CleanupReport {
        let limit = max_size_bytes.unwrap_or(self.config.max_size_bytes);
        let size_before = self.get_cache_size().await;
        let mut report = CleanupReport {
            limit_bytes: limit,
            size_before,
            size_after: size_before,
            ..CleanupReport::default()
        };

        if size_before <= limit {
            debug!(size_before, limit, "Cache within size limit");
            return report;
        }

        info!(size_before, limit, "Cache over size limit, cleaning up");
        report.expired_removed = self.clear_expired_cache().await;

        let mut current = self.get_cache_size().await;
        if current > limit {
            let mut files = Vec::new();
            for category in CacheCategory::ALL {
                files.extend(self.scan(category).await);
            }

            let mut queue = EvictionQueue::from_files(files);
            while current > limit {
                let Some(file) = queue.evict_oldest() else {
                    break;
                };
                if remove_file_entry(&file).await {
                    current = current.saturating_sub(file.size);
                    report.evicted += 1;
                }
            }
        }

        report.size_after = self.get_cache_size().await;
        info!(
            expired = report.expired_removed,
            evicted = report.evicted,
            size_after = report.size_after,
            "Cache cleanup complete"
        );
        report
    }
}

// == File Helpers ==
fn metadata_path(payload: &Path) -> PathBuf {
    payload.with_extension(METADATA_EXTENSION)
}

fn is_metadata_file(path: &Path) -> bool {
    path.extension().is_some_and(|ext| ext == METADATA_EXTENSION)
}

async fn write_metadata(payload: &Path, metadata: &CacheMetadata) -> Result<()> {
    let json = serde_json::to_vec(metadata)?;
    write_atomic(&metadata_path(payload), &json).await?;
    Ok(())
}

async fn read_metadata(payload: &Path) -> Option<CacheMetadata> {
    let raw = fs::read(metadata_path(payload)).await.or_miss("read cache metadata")?;
    serde_json::from_slice(&raw).or_miss("decode cache metadata")
}

/// Deletes a hashed entry's payload and sidecar, tolerating either being gone.
///
/// Returns whether this call removed the payload.
async fn remove_entry_files(payload: &Path) -> bool {
    let removed = remove_if_exists(payload).await.or_miss("delete cache payload").unwrap_or(false);
    remove_if_exists(&metadata_path(payload))
        .await
        .or_miss("delete cache metadata");
    removed
}

async fn remove_file_entry(file: &CacheFile) -> bool {
    if file.category.has_metadata() {
        remove_entry_files(&file.path).await
    } else {
        remove_if_exists(&file.path).await.or_miss("delete temp file").unwrap_or(false)
    }
}

/// Recursively lists files under `dir`. Unreadable parts are skipped.
async fn collect_files(dir: &Path, category: CacheCategory) -> Vec<CacheFile> {
    let mut files = Vec::new();
    let mut pending = vec![dir.to_path_buf()];

    while let Some(current) = pending.pop() {
        let mut reader = match fs::read_dir(&current).await {
            Ok(reader) => reader,
            Err(err) => {
                if err.kind() != io::ErrorKind::NotFound {
                    debug!(dir = %current.display(), error = %err, "Skipping unreadable cache directory");
                }
                continue;
            }
        };

        loop {
            let entry = match reader.next_entry().await {
                Ok(Some(entry)) => entry,
                Ok(None) => break,
                Err(err) => {
                    debug!(dir = %current.display(), error = %err, "Stopped reading cache directory");
                    break;
                }
            };
            // Entries may vanish mid-walk when another task deletes them.
            let Ok(metadata) = entry.metadata().await else {
                continue;
            };
            let path = entry.path();
            if metadata.is_dir() {
                pending.push(path);
                continue;
            }
            files.push(CacheFile {
                is_metadata: category.has_metadata() && is_metadata_file(&path),
                category,
                size: metadata.len(),
                modified: metadata.modified().unwrap_or(UNIX_EPOCH),
                path,
            });
        }
    }
    files
}
