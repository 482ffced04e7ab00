//! Storage context
//!
//! Owns the cache, preference store, secure store and error tracker. Services
//! are cheap views built from it; nothing is global.

use std::path::PathBuf;
use std::sync::Arc;

use tracing::{info, warn};

use crate::cache::{FileCache, FileCacheConfig};
use crate::config::Config;
use crate::error::Result;
use crate::prefs::{JsonFilePreferenceBackend, SharedPrefs};
use crate::secure::{EncryptedFileSecretBackend, SecureStorage};
use crate::services::{AppStorageService, AuthStorageService, UserStorageService};
use crate::tracking::{ErrorTracker, TracingCrashReporter};

#[derive(Clone)]
pub struct StorageContext {
    pub cache: Arc<FileCache>,
    pub prefs: Arc<SharedPrefs>,
    pub secure: Arc<SecureStorage>,
    pub tracker: Arc<ErrorTracker>,
}

impl std::fmt::Debug for StorageContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StorageContext")
            .field("cache", &self.cache)
            .field("tracker", &self.tracker)
            .finish_non_exhaustive()
    }
}

impl StorageContext {
    pub fn new(
        cache: FileCache,
        prefs: SharedPrefs,
        secure: SecureStorage,
        tracker: ErrorTracker,
    ) -> Self {
        Self {
            cache: Arc::new(cache),
            prefs: Arc::new(prefs),
            secure: Arc::new(secure),
            tracker: Arc::new(tracker),
        }
    }

    /// Opens every store at the configured locations.
    ///
    /// Without a passphrase the secure store is in-memory only.
    pub async fn from_config(config: &Config) -> Result<Self> {
        let cache = FileCache::init(&config.cache_dir, config.cache_config()).await?;
        let prefs = SharedPrefs::new(Arc::new(
            JsonFilePreferenceBackend::open(&config.prefs_path).await?,
        ));
        let secure = match &config.secure_store_passphrase {
            Some(passphrase) => SecureStorage::new(Arc::new(
                EncryptedFileSecretBackend::open(&config.secure_store_path, passphrase).await?,
            )),
            None => {
                warn!("SECURE_STORE_PASSPHRASE not set, secrets will not persist");
                SecureStorage::in_memory()
            }
        };
        let tracker = ErrorTracker::new(config.tracker_config(), Arc::new(TracingCrashReporter));

        info!(cache_dir = %config.cache_dir.display(), "Storage context ready");
        Ok(Self::new(cache, prefs, secure, tracker))
    }

    /// File cache at `cache_root`, everything else in memory.
    pub async fn in_memory(cache_root: impl Into<PathBuf>) -> Result<Self> {
        let cache = FileCache::init(cache_root, FileCacheConfig::default()).await?;
        Ok(Self::new(
            cache,
            SharedPrefs::in_memory(),
            SecureStorage::in_memory(),
            ErrorTracker::default(),
        ))
    }

    pub fn auth(&self) -> AuthStorageService {
        AuthStorageService::new(self.clone())
    }

    pub fn user(&self) -> UserStorageService {
        UserStorageService::new(self.clone())
    }

    pub fn app(&self) -> AppStorageService {
        AppStorageService::new(self.clone())
    }
}
