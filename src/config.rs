//! Configuration Module
//!
//! Handles loading storage and logging configuration from environment variables.

use std::env;
use std::path::PathBuf;
use std::time::Duration;

use crate::cache::{FileCacheConfig, DEFAULT_MAX_AGE, DEFAULT_MAX_SIZE_BYTES};
use crate::tracking::TrackerConfig;

pub const DEFAULT_CACHE_DIR: &str = "./storage/cache";
pub const DEFAULT_PREFS_PATH: &str = "./storage/prefs.json";
pub const DEFAULT_SECURE_STORE_PATH: &str = "./storage/secure.bin";
pub const DEFAULT_LOG_MAX_BYTES: u64 = 1024 * 1024; // 1 MB
pub const DEFAULT_LOG_MAX_FILES: usize = 5;
pub const DEFAULT_ENVIRONMENT: &str = "development";

/// Storage configuration parameters.
///
/// All values can be configured via environment variables with sensible defaults.
#[derive(Clone)]
pub struct Config {
    /// Root directory of the file cache
    pub cache_dir: PathBuf,
    /// Entries older than this many seconds are expired
    pub cache_max_age_secs: u64,
    /// Size bound enforced by cleanup
    pub cache_max_size_bytes: u64,
    /// JSON file backing the preference store
    pub prefs_path: PathBuf,
    /// Encrypted file backing the secure store
    pub secure_store_path: PathBuf,
    /// Without a passphrase secrets are kept in memory only
    pub secure_store_passphrase: Option<String>,
    /// Directory for rotated log files; stdout only when unset
    pub log_dir: Option<PathBuf>,
    pub log_max_bytes: u64,
    pub log_max_files: usize,
    pub app_version: String,
    pub environment: String,
}

impl Config {
    /// Creates a new Config by loading values from environment variables.
    ///
    /// # Environment Variables
    /// - `CACHE_DIR` - Cache root (default: ./storage/cache)
    /// - `CACHE_MAX_AGE_SECS` - Entry lifetime in seconds (default: 604800)
    /// - `CACHE_MAX_SIZE_BYTES` - Cache size bound (default: 104857600)
    /// - `PREFS_PATH` - Preferences file (default: ./storage/prefs.json)
    /// - `SECURE_STORE_PATH` - Secrets file (default: ./storage/secure.bin)
    /// - `SECURE_STORE_PASSPHRASE` - Secrets passphrase (default: unset)
    /// - `LOG_DIR` - Log directory (default: unset)
    /// - `LOG_MAX_BYTES` - Size of one log file before rotation (default: 1048576)
    /// - `LOG_MAX_FILES` - Rotated files kept (default: 5)
    /// - `APP_VERSION` - Version stamped on tracked errors (default: crate version)
    /// - `APP_ENV` - Environment name (default: development)
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            cache_dir: env::var("CACHE_DIR")
                .ok()
                .map(PathBuf::from)
                .unwrap_or(defaults.cache_dir),
            cache_max_age_secs: env::var("CACHE_MAX_AGE_SECS")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(defaults.cache_max_age_secs),
            cache_max_size_bytes: env::var("CACHE_MAX_SIZE_BYTES")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(defaults.cache_max_size_bytes),
            prefs_path: env::var("PREFS_PATH")
                .ok()
                .map(PathBuf::from)
                .unwrap_or(defaults.prefs_path),
            secure_store_path: env::var("SECURE_STORE_PATH")
                .ok()
                .map(PathBuf::from)
                .unwrap_or(defaults.secure_store_path),
            secure_store_passphrase: env::var("SECURE_STORE_PASSPHRASE")
                .ok()
                .filter(|v| !v.is_empty()),
            log_dir: env::var("LOG_DIR")
                .ok()
                .filter(|v| !v.is_empty())
                .map(PathBuf::from),
            log_max_bytes: env::var("LOG_MAX_BYTES")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(defaults.log_max_bytes),
            log_max_files: env::var("LOG_MAX_FILES")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(defaults.log_max_files),
            app_version: env::var("APP_VERSION").unwrap_or(defaults.app_version),
            environment: env::var("APP_ENV").unwrap_or(defaults.environment),
        }
    }

    pub fn cache_config(&self) -> FileCacheConfig {
        FileCacheConfig {
            max_age: Duration::from_secs(self.cache_max_age_secs),
            max_size_bytes: self.cache_max_size_bytes,
        }
    }

    pub fn tracker_config(&self) -> TrackerConfig {
        TrackerConfig {
            app_version: self.app_version.clone(),
            environment: self.environment.clone(),
            ..TrackerConfig::default()
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            cache_dir: PathBuf::from(DEFAULT_CACHE_DIR),
            cache_max_age_secs: DEFAULT_MAX_AGE.as_secs(),
            cache_max_size_bytes: DEFAULT_MAX_SIZE_BYTES,
            prefs_path: PathBuf::from(DEFAULT_PREFS_PATH),
            secure_store_path: PathBuf::from(DEFAULT_SECURE_STORE_PATH),
            secure_store_passphrase: None,
            log_dir: None,
            log_max_bytes: DEFAULT_LOG_MAX_BYTES,
            log_max_files: DEFAULT_LOG_MAX_FILES,
            app_version: env!("CARGO_PKG_VERSION").to_string(),
            environment: DEFAULT_ENVIRONMENT.to_string(),
        }
    }
}

impl std::fmt::Debug for Config {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Config")
            .field("cache_dir", &self.cache_dir)
            .field("cache_max_age_secs", &self.cache_max_age_secs)
            .field("cache_max_size_bytes", &self.cache_max_size_bytes)
            .field("prefs_path", &self.prefs_path)
            .field("secure_store_path", &self.secure_store_path)
            .field(
                "secure_store_passphrase",
                &self.secure_store_passphrase.as_ref().map(|_| "<redacted>"),
            )
            .field("log_dir", &self.log_dir)
            .field("log_max_bytes", &self.log_max_bytes)
            .field("log_max_files", &self.log_max_files)
            .field("app_version", &self.app_version)
            .field("environment", &self.environment)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_default() {
        let config = Config::default();
        assert_eq!(config.cache_dir, PathBuf::from("./storage/cache"));
        assert_eq!(config.cache_max_age_secs, 604_800);
        assert_eq!(config.cache_max_size_bytes, 104_857_600);
        assert_eq!(config.log_max_bytes, 1_048_576);
        assert_eq!(config.log_max_files, 5);
        assert_eq!(config.secure_store_passphrase, None);
        assert_eq!(config.environment, "development");
    }

    #[test]
    fn test_config_from_env_defaults() {
        // Clear any existing env vars to test defaults
        for var in [
            "CACHE_DIR",
            "CACHE_MAX_AGE_SECS",
            "CACHE_MAX_SIZE_BYTES",
            "PREFS_PATH",
            "SECURE_STORE_PATH",
            "SECURE_STORE_PASSPHRASE",
            "LOG_DIR",
            "LOG_MAX_BYTES",
            "LOG_MAX_FILES",
            "APP_VERSION",
            "APP_ENV",
        ] {
            env::remove_var(var);
        }

        let config = Config::from_env();
        assert_eq!(config.cache_max_age_secs, 604_800);
        assert_eq!(config.prefs_path, PathBuf::from("./storage/prefs.json"));
        assert_eq!(config.log_dir, None);
        assert_eq!(config.app_version, env!("CARGO_PKG_VERSION"));
    }

    #[test]
    fn test_derived_configs() {
        let config = Config {
            cache_max_age_secs: 60,
            cache_max_size_bytes: 4096,
            environment: "staging".into(),
            ..Config::default()
        };

        let cache = config.cache_config();
        assert_eq!(cache.max_age, Duration::from_secs(60));
        assert_eq!(cache.max_size_bytes, 4096);
        assert_eq!(config.tracker_config().environment, "staging");
        assert_eq!(config.tracker_config().capacity, 100);
    }

    #[test]
    fn test_debug_redacts_passphrase() {
        let config = Config {
            secure_store_passphrase: Some("hunter2".into()),
            ..Config::default()
        };
        let debug = format!("{:?}", config);
        assert!(!debug.contains("hunter2"));
        assert!(debug.contains("<redacted>"));
    }
}
