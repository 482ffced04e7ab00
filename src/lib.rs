//! App Storage - local caching and storage layer for a client application
//!
//! Provides a file cache with TTL expiry and size-bounded eviction, typed
//! preferences, an encrypted secret store, and auth/user/app storage services.

pub mod cache;
pub mod config;
pub mod context;
pub mod error;
pub mod fsutil;
pub mod logging;
pub mod prefs;
pub mod secure;
pub mod services;
pub mod tracking;

pub use cache::{CacheCategory, CacheStats, FileCache, FileCacheConfig};
pub use config::Config;
pub use context::StorageContext;
pub use error::{AppError, ErrorKind, Result};
pub use prefs::SharedPrefs;
pub use secure::SecureStorage;
pub use services::{AppStorageService, AuthStorageService, UserStorageService};
pub use tracking::{ErrorTracker, Severity};
