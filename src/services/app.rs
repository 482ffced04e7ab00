//! Application state storage
//!
//! Launch markers, feature flags, counters and crash logs. Everything lives
//! in the preference store except the file cache, which
//! [`reset_app_to_initial_state`](AppStorageService::reset_app_to_initial_state) empties.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use tracing::{info, warn};

use crate::context::StorageContext;
use crate::error::{AppError, Result};
use crate::services::{init_missing, read_soft, run_migration, write_loud};
use crate::tracking::Severity;

const APP_STATE_KEY: &str = "app_state";
const FIRST_LAUNCH_COMPLETED_KEY: &str = "first_launch_completed";
const FIRST_LAUNCH_DATE_KEY: &str = "first_launch_date";
const FEATURE_FLAGS_KEY: &str = "feature_flags";
const APP_METRICS_KEY: &str = "app_metrics";
const CRASH_LOGS_KEY: &str = "crash_logs";
const SCHEMA_VERSION_KEY: &str = "app_schema_version";

pub const MAX_CRASH_LOGS: usize = 10;

pub type FeatureFlags = BTreeMap<String, bool>;
pub type AppMetrics = BTreeMap<String, f64>;

// == Documents ==
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AppStateRecord {
    pub last_route: Option<String>,
    pub last_active: Option<DateTime<Utc>>,
    /// Free-form state keyed by field name
    pub data: Map<String, Value>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CrashLogEntry {
    pub error: String,
    #[serde(default)]
    pub stack_trace: Option<String>,
    #[serde(default)]
    pub context: Option<String>,
    pub timestamp: DateTime<Utc>,
}

impl CrashLogEntry {
    pub fn new(error: impl Into<String>) -> Self {
        Self {
            error: error.into(),
            stack_trace: None,
            context: None,
            timestamp: Utc::now(),
        }
    }

    pub fn context(mut self, context: impl Into<String>) -> Self {
        self.context = Some(context.into());
        self
    }

    pub fn stack_trace(mut self, trace: impl Into<String>) -> Self {
        self.stack_trace = Some(trace.into());
        self
    }
}

#[derive(Debug, Default, Serialize, Deserialize)]
#[serde(default)]
struct AppExport {
    app_state: Option<AppStateRecord>,
    feature_flags: FeatureFlags,
    metrics: AppMetrics,
    crash_logs: Vec<CrashLogEntry>,
    onboarding_completed: bool,
    first_launch_date: Option<DateTime<Utc>>,
}

// == App Storage Service ==
#[derive(Clone, Debug)]
pub struct AppStorageService {
    ctx: StorageContext,
}

impl AppStorageService {
    pub fn new(ctx: StorageContext) -> Self {
        Self { ctx }
    }

    // == App State ==
    pub async fn store_app_state(&self, state: &AppStateRecord) -> Result<()> {
        let result = self.ctx.prefs.set_json(APP_STATE_KEY, state).await;
        write_loud(&self.ctx.tracker, "store app state", result)
    }

    pub async fn get_app_state(&self) -> Option<AppStateRecord> {
        let result = self.ctx.prefs.get_json(APP_STATE_KEY).await;
        read_soft(&self.ctx.tracker, "get app state", result).flatten()
    }

    /// Sets one entry of the state's data map and stamps `last_active`.
    pub async fn update_app_state_field(&self, field: &str, value: Value) -> Result<()> {
        let result = async {
            let mut state: AppStateRecord =
                self.ctx.prefs.get_json(APP_STATE_KEY).await?.unwrap_or_default();
            state.data.insert(field.to_string(), value);
            state.last_active = Some(Utc::now());
            self.ctx.prefs.set_json(APP_STATE_KEY, &state).await
        }
        .await;
        write_loud(&self.ctx.tracker, "update app state field", result)
    }

    pub async fn get_app_state_field(&self, field: &str) -> Option<Value> {
        self.get_app_state().await?.data.remove(field)
    }

    // == Launch Markers ==
    /// True until the first call has recorded the launch.
    pub async fn is_first_launch(&self) -> bool {
        let completed = self.ctx.prefs.get_bool(FIRST_LAUNCH_COMPLETED_KEY).await;
        let completed = read_soft(&self.ctx.tracker, "get first launch flag", completed)
            .flatten()
            .unwrap_or(false);
        if completed {
            return false;
        }

        let result = async {
            self.ctx
                .prefs
                .set_int(FIRST_LAUNCH_DATE_KEY, Utc::now().timestamp_millis())
                .await?;
            self.ctx.prefs.set_bool(FIRST_LAUNCH_COMPLETED_KEY, true).await
        }
        .await;
        if let Err(err) = result {
            self.ctx
                .tracker
                .track_error(&err, "record first launch", Severity::Medium);
        }
        info!("First launch recorded");
        true
    }

    pub async fn get_first_launch_date(&self) -> Option<DateTime<Utc>> {
        let result = self.ctx.prefs.get_int(FIRST_LAUNCH_DATE_KEY).await;
        read_soft(&self.ctx.tracker, "get first launch date", result)
            .flatten()
            .and_then(DateTime::<Utc>::from_timestamp_millis)
    }

    /// Compares with the stored version and build, then stores the new ones.
    /// Nothing stored yet counts as not updated.
    pub async fn was_app_updated(&self, version: &str, build: &str) -> bool {
        let prefs = &self.ctx.prefs;
        let stored_version = read_soft(&self.ctx.tracker, "get app version", prefs.get_app_version().await).flatten();
        let stored_build = read_soft(&self.ctx.tracker, "get build number", prefs.get_build_number().await).flatten();

        let updated = match (&stored_version, &stored_build) {
            (None, None) => false,
            _ => stored_version.as_deref() != Some(version) || stored_build.as_deref() != Some(build),
        };

        let result = async {
            prefs.set_app_version(version).await?;
            prefs.set_build_number(build).await
        }
        .await;
        if let Err(err) = result {
            self.ctx
                .tracker
                .track_error(&err, "record app version", Severity::Medium);
        }
        if updated {
            info!(
                from = stored_version.as_deref().unwrap_or("-"),
                to = version,
                build,
                "App updated"
            );
        }
        updated
    }

    pub async fn set_onboarding_completed(&self, completed: bool) -> Result<()> {
        let result = self.ctx.prefs.set_onboarding_completed(completed).await;
        write_loud(&self.ctx.tracker, "set onboarding completed", result)
    }

    pub async fn is_onboarding_completed(&self) -> bool {
        let result = self.ctx.prefs.is_onboarding_completed().await;
        read_soft(&self.ctx.tracker, "get onboarding completed", result).unwrap_or(false)
    }

    // == Feature Flags ==
    pub async fn set_feature_flags(&self, flags: &FeatureFlags) -> Result<()> {
        let result = self.ctx.prefs.set_json(FEATURE_FLAGS_KEY, flags).await;
        write_loud(&self.ctx.tracker, "set feature flags", result)
    }

    pub async fn get_feature_flags(&self) -> FeatureFlags {
        let result = self.ctx.prefs.get_json(FEATURE_FLAGS_KEY).await;
        read_soft(&self.ctx.tracker, "get feature flags", result)
            .flatten()
            .unwrap_or_default()
    }

    /// Unknown flags are disabled.
    pub async fn is_feature_enabled(&self, name: &str) -> bool {
        self.get_feature_flags().await.get(name).copied().unwrap_or(false)
    }

    pub async fn enable_feature(&self, name: &str) -> Result<()> {
        self.set_feature(name, true).await
    }

    pub async fn disable_feature(&self, name: &str) -> Result<()> {
        self.set_feature(name, false).await
    }

    async fn set_feature(&self, name: &str, enabled: bool) -> Result<()> {
        let result = async {
            let mut flags: FeatureFlags =
                self.ctx.prefs.get_json(FEATURE_FLAGS_KEY).await?.unwrap_or_default();
            flags.insert(name.to_string(), enabled);
            self.ctx.prefs.set_json(FEATURE_FLAGS_KEY, &flags).await
        }
        .await;
        write_loud(&self.ctx.tracker, "set feature flag", result)
    }

    // == Metrics ==
    /// Adds one to a counter and returns the new value.
    pub async fn increment_metric(&self, name: &str) -> Result<f64> {
        let result = async {
            let mut metrics: AppMetrics =
                self.ctx.prefs.get_json(APP_METRICS_KEY).await?.unwrap_or_default();
            let value = metrics.entry(name.to_string()).or_insert(0.0);
            *value += 1.0;
            let value = *value;
            self.ctx.prefs.set_json(APP_METRICS_KEY, &metrics).await?;
            Ok::<f64, AppError>(value)
        }
        .await;
        write_loud(&self.ctx.tracker, "increment metric", result)
    }

    pub async fn update_metric(&self, name: &str, value: f64) -> Result<()> {
        if !value.is_finite() {
            return Err(AppError::validation(format!("metric '{}' must be finite", name)));
        }
        let result = async {
            let mut metrics: AppMetrics =
                self.ctx.prefs.get_json(APP_METRICS_KEY).await?.unwrap_or_default();
            metrics.insert(name.to_string(), value);
            self.ctx.prefs.set_json(APP_METRICS_KEY, &metrics).await
        }
        .await;
        write_loud(&self.ctx.tracker, "update metric", result)
    }

    pub async fn get_metrics(&self) -> AppMetrics {
        let result = self.ctx.prefs.get_json(APP_METRICS_KEY).await;
        read_soft(&self.ctx.tracker, "get metrics", result)
            .flatten()
            .unwrap_or_default()
    }

    pub async fn get_metric(&self, name: &str) -> Option<f64> {
        self.get_metrics().await.get(name).copied()
    }

    // == Crash Logs ==
    /// Newest first, at most [`MAX_CRASH_LOGS`] entries.
    pub async fn store_crash_log(&self, entry: CrashLogEntry) -> Result<()> {
        let result = async {
            let mut logs: Vec<CrashLogEntry> =
                self.ctx.prefs.get_json(CRASH_LOGS_KEY).await?.unwrap_or_default();
            logs.insert(0, entry);
            logs.truncate(MAX_CRASH_LOGS);
            self.ctx.prefs.set_json(CRASH_LOGS_KEY, &logs).await
        }
        .await;
        write_loud(&self.ctx.tracker, "store crash log", result)
    }

    pub async fn get_crash_logs(&self) -> Vec<CrashLogEntry> {
        let result = self.ctx.prefs.get_json(CRASH_LOGS_KEY).await;
        read_soft(&self.ctx.tracker, "get crash logs", result)
            .flatten()
            .unwrap_or_default()
    }

    pub async fn clear_crash_logs(&self) -> Result<()> {
        let result = self.ctx.prefs.remove(CRASH_LOGS_KEY).await.map(|_| ());
        write_loud(&self.ctx.tracker, "clear crash logs", result)
    }

    // == Backup ==
    pub async fn export_app_data(&self) -> Value {
        let export = AppExport {
            app_state: self.get_app_state().await,
            feature_flags: self.get_feature_flags().await,
            metrics: self.get_metrics().await,
            crash_logs: self.get_crash_logs().await,
            onboarding_completed: self.is_onboarding_completed().await,
            first_launch_date: self.get_first_launch_date().await,
        };
        serde_json::to_value(export).unwrap_or(Value::Null)
    }

    /// Restores an [`export_app_data`](Self::export_app_data) document.
    /// Launch markers are device-local and are not restored.
    pub async fn import_app_data(&self, data: &Value) -> Result<()> {
        let mut export: AppExport = serde_json::from_value(data.clone())
            .map_err(|e| AppError::validation(format!("invalid app backup: {}", e)))?;
        export.crash_logs.truncate(MAX_CRASH_LOGS);

        let result = async {
            let prefs = &self.ctx.prefs;
            if let Some(state) = &export.app_state {
                prefs.set_json(APP_STATE_KEY, state).await?;
            }
            prefs.set_json(FEATURE_FLAGS_KEY, &export.feature_flags).await?;
            prefs.set_json(APP_METRICS_KEY, &export.metrics).await?;
            prefs.set_json(CRASH_LOGS_KEY, &export.crash_logs).await?;
            prefs.set_onboarding_completed(export.onboarding_completed).await
        }
        .await;
        write_loud(&self.ctx.tracker, "import app data", result)
    }

    pub async fn get_app_summary(&self) -> Value {
        let prefs = &self.ctx.prefs;
        let version = read_soft(&self.ctx.tracker, "get app version", prefs.get_app_version().await).flatten();
        let build = read_soft(&self.ctx.tracker, "get build number", prefs.get_build_number().await).flatten();
        let flags = self.get_feature_flags().await;
        json!({
            "app_version": version,
            "build_number": build,
            "first_launch_date": self.get_first_launch_date().await,
            "onboarding_completed": self.is_onboarding_completed().await,
            "enabled_features": flags.iter().filter(|(_, on)| **on).map(|(name, _)| name).collect::<Vec<_>>(),
            "metrics": self.get_metrics().await,
            "crash_log_count": self.get_crash_logs().await.len(),
            "has_app_state": self.get_app_state().await.is_some(),
            "cache": self.ctx.cache.get_cache_stats().await,
        })
    }

    /// Removes app documents and flags and empties the file cache.
    /// First-launch markers and the stored version stay.
    pub async fn reset_app_to_initial_state(&self) -> Result<()> {
        let result = async {
            let prefs = &self.ctx.prefs;
            for key in [APP_STATE_KEY, FEATURE_FLAGS_KEY, APP_METRICS_KEY, CRASH_LOGS_KEY] {
                prefs.remove(key).await?;
            }
            prefs.remove(crate::prefs::keys::ONBOARDING_COMPLETED).await?;
            self.ctx.cache.clear_all_cache().await
        }
        .await;
        write_loud(&self.ctx.tracker, "reset app", result)?;
        warn!("App storage reset to initial state");
        Ok(())
    }

    /// Creates missing app documents and trims oversized crash logs written
    /// by older versions.
    pub async fn migrate(&self) -> bool {
        run_migration(&self.ctx.prefs, &self.ctx.tracker, SCHEMA_VERSION_KEY, || async {
            let prefs = &self.ctx.prefs;
            init_missing(prefs, APP_STATE_KEY, &AppStateRecord::default()).await?;
            init_missing(prefs, FEATURE_FLAGS_KEY, &FeatureFlags::new()).await?;
            init_missing(prefs, APP_METRICS_KEY, &AppMetrics::new()).await?;

            let mut logs: Vec<CrashLogEntry> = prefs.get_json(CRASH_LOGS_KEY).await?.unwrap_or_default();
            logs.truncate(MAX_CRASH_LOGS);
            prefs.set_json(CRASH_LOGS_KEY, &logs).await?;
            Ok::<(), AppError>(())
        })
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    async fn service() -> (AppStorageService, StorageContext, TempDir) {
        let dir = tempfile::tempdir().unwrap();
        let ctx = StorageContext::in_memory(dir.path()).await.unwrap();
        (ctx.app(), ctx, dir)
    }

    #[tokio::test]
    async fn test_first_launch_only_once() {
        let (app, _ctx, _dir) = service().await;
        assert_eq!(app.get_first_launch_date().await, None);

        assert!(app.is_first_launch().await);
        assert!(!app.is_first_launch().await);
        assert!(app.get_first_launch_date().await.is_some());
    }

    #[tokio::test]
    async fn test_was_app_updated() {
        let (app, _ctx, _dir) = service().await;
        assert!(!app.was_app_updated("1.0.0", "10").await);
        assert!(!app.was_app_updated("1.0.0", "10").await);
        assert!(app.was_app_updated("1.1.0", "10").await);
        assert!(app.was_app_updated("1.1.0", "11").await);
        assert!(!app.was_app_updated("1.1.0", "11").await);
    }

    #[tokio::test]
    async fn test_app_state_fields() {
        let (app, _ctx, _dir) = service().await;
        assert_eq!(app.get_app_state().await, None);

        app.update_app_state_field("tab", json!("feed")).await.unwrap();
        let state = app.get_app_state().await.unwrap();
        assert!(state.last_active.is_some());
        assert_eq!(app.get_app_state_field("tab").await, Some(json!("feed")));

        let record = AppStateRecord {
            last_route: Some("/settings".into()),
            ..AppStateRecord::default()
        };
        app.store_app_state(&record).await.unwrap();
        assert_eq!(app.get_app_state().await, Some(record));
        assert_eq!(app.get_app_state_field("tab").await, None);
    }

    #[tokio::test]
    async fn test_feature_flags() {
        let (app, _ctx, _dir) = service().await;
        assert!(!app.is_feature_enabled("beta").await);

        app.enable_feature("beta").await.unwrap();
        app.enable_feature("search").await.unwrap();
        app.disable_feature("search").await.unwrap();
        assert!(app.is_feature_enabled("beta").await);
        assert!(!app.is_feature_enabled("search").await);

        let flags: FeatureFlags = [("only".to_string(), true)].into_iter().collect();
        app.set_feature_flags(&flags).await.unwrap();
        assert_eq!(app.get_feature_flags().await, flags);
        assert!(!app.is_feature_enabled("beta").await);
    }

    #[tokio::test]
    async fn test_metrics() {
        let (app, _ctx, _dir) = service().await;
        assert_eq!(app.increment_metric("launches").await.unwrap(), 1.0);
        assert_eq!(app.increment_metric("launches").await.unwrap(), 2.0);
        app.update_metric("load_ms", 12.5).await.unwrap();

        assert_eq!(app.get_metric("launches").await, Some(2.0));
        assert_eq!(app.get_metrics().await.len(), 2);
        assert!(app.update_metric("bad", f64::NAN).await.is_err());
    }

    #[tokio::test]
    async fn test_crash_logs_bounded() {
        let (app, _ctx, _dir) = service().await;
        for i in 0..12 {
            app.store_crash_log(CrashLogEntry::new(format!("crash {}", i)).context("boot"))
                .await
                .unwrap();
        }

        let logs = app.get_crash_logs().await;
        assert_eq!(logs.len(), MAX_CRASH_LOGS);
        assert_eq!(logs[0].error, "crash 11");
        assert_eq!(logs[9].error, "crash 2");

        app.clear_crash_logs().await.unwrap();
        assert!(app.get_crash_logs().await.is_empty());
    }

    #[tokio::test]
    async fn test_reset_keeps_first_launch() {
        let (app, ctx, _dir) = service().await;
        assert!(app.is_first_launch().await);
        app.set_onboarding_completed(true).await.unwrap();
        app.enable_feature("beta").await.unwrap();
        app.increment_metric("launches").await.unwrap();
        ctx.cache.cache_data("feed", &json!({"items": []})).await.unwrap();

        app.reset_app_to_initial_state().await.unwrap();

        assert!(!app.is_first_launch().await);
        assert!(!app.is_onboarding_completed().await);
        assert!(app.get_feature_flags().await.is_empty());
        assert!(app.get_metrics().await.is_empty());
        assert!(!ctx.cache.is_data_cached("feed").await);
    }

    #[tokio::test]
    async fn test_export_import_and_summary() {
        let (app, _ctx, _dir) = service().await;
        app.enable_feature("beta").await.unwrap();
        app.update_metric("score", 3.0).await.unwrap();
        app.store_crash_log(CrashLogEntry::new("oops")).await.unwrap();
        app.set_onboarding_completed(true).await.unwrap();
        let export = app.export_app_data().await;

        let (other, _other_ctx, _other_dir) = service().await;
        other.import_app_data(&export).await.unwrap();
        assert!(other.is_feature_enabled("beta").await);
        assert_eq!(other.get_metric("score").await, Some(3.0));
        assert_eq!(other.get_crash_logs().await.len(), 1);
        assert!(other.is_onboarding_completed().await);

        let summary = other.get_app_summary().await;
        assert_eq!(summary["enabled_features"], json!(["beta"]));
        assert_eq!(summary["crash_log_count"], json!(1));
        assert_eq!(summary["cache"]["total"]["files"], json!(0));

        assert!(other.import_app_data(&json!({"metrics": "x"})).await.is_err());
    }

    #[tokio::test]
    async fn test_migrate_trims_crash_logs() {
        let (app, ctx, _dir) = service().await;
        let logs: Vec<CrashLogEntry> = (0..14).map(|i| CrashLogEntry::new(format!("c{}", i))).collect();
        ctx.prefs.set_json(CRASH_LOGS_KEY, &logs).await.unwrap();

        assert!(app.migrate().await);
        assert_eq!(app.get_crash_logs().await.len(), MAX_CRASH_LOGS);
        assert!(!app.migrate().await);
    }

    #[tokio::test]
    async fn test_migrate_creates_missing_documents() {
        let (app, ctx, _dir) = service().await;
        app.enable_feature("beta").await.unwrap();

        assert!(app.migrate().await);
        for key in [APP_STATE_KEY, APP_METRICS_KEY, CRASH_LOGS_KEY] {
            assert!(ctx.prefs.contains_key(key).await.unwrap(), "{} missing", key);
        }
        assert_eq!(app.get_app_state().await, Some(AppStateRecord::default()));
        assert!(app.get_metrics().await.is_empty());
        assert!(app.get_crash_logs().await.is_empty());
        assert!(app.is_feature_enabled("beta").await);
    }
}
