//! Domain Storage Services
//!
//! Auth, user and app facades over a [`StorageContext`](crate::context::StorageContext).
//! Writes are fail-loud, reads are fail-open; both report failures to the
//! error tracker. Summaries and migrations never fail.

mod app;
mod auth;
mod user;

pub use app::{AppMetrics, AppStateRecord, AppStorageService, CrashLogEntry, FeatureFlags, MAX_CRASH_LOGS};
pub use auth::{AuthCredentials, AuthEvent, AuthState, AuthStorageService, LoginHistoryEntry, MAX_LOGIN_HISTORY};
pub use user::{UserProfile, UserStorageService, THEME_MODES};

use serde::Serialize;

use crate::error::{ErrorKind, FailOpen, Result};
use crate::prefs::SharedPrefs;
use crate::tracking::{ErrorTracker, Severity};

/// Version every service migrates its stored documents to.
pub const SCHEMA_VERSION: i64 = 1;

/// Wraps a write failure as a storage error and tracks it.
///
/// Validation errors describe bad caller input rather than a storage
/// fault: they come back unchanged and untracked, the same as the
/// up-front checks in setters and imports.
pub(crate) fn write_loud<T>(tracker: &ErrorTracker, operation: &str, result: Result<T>) -> Result<T> {
    result.map_err(|err| {
        if err.kind == ErrorKind::Validation {
            return err;
        }
        let err = err.into_storage(operation);
        tracker.track_error(&err, operation, Severity::Medium);
        err
    })
}

/// Writes `default` under `key` unless a value is already stored.
pub(crate) async fn init_missing<T: Serialize + ?Sized>(prefs: &SharedPrefs, key: &str, default: &T) -> Result<()> {
    if !prefs.contains_key(key).await? {
        prefs.set_json(key, default).await?;
    }
    Ok(())
}

/// Tracks a read failure and turns it into a miss.
pub(crate) fn read_soft<T>(tracker: &ErrorTracker, operation: &str, result: Result<T>) -> Option<T> {
    if let Err(err) = &result {
        tracker.track_error(err, operation, Severity::Low);
    }
    result.or_miss(operation)
}

/// Runs `step` once when the stored schema version under `version_key` is
/// behind. Returns whether a migration ran.
pub(crate) async fn run_migration<F, Fut>(
    prefs: &SharedPrefs,
    tracker: &ErrorTracker,
    version_key: &str,
    step: F,
) -> bool
where
    F: FnOnce() -> Fut,
    Fut: std::future::Future<Output = Result<()>>,
{
    let operation = format!("migrate {}", version_key);
    let current = read_soft(tracker, &operation, prefs.get_int(version_key).await)
        .flatten()
        .unwrap_or(0);
    if current >= SCHEMA_VERSION {
        return false;
    }

    let outcome = match step().await {
        Ok(()) => prefs.set_int(version_key, SCHEMA_VERSION).await,
        Err(err) => Err(err),
    };
    match outcome {
        Ok(()) => {
            tracing::info!(key = version_key, from = current, to = SCHEMA_VERSION, "Migrated stored data");
            true
        }
        Err(err) => {
            tracker.track_error(&err, &operation, Severity::High);
            false
        }
    }
}
