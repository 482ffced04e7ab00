//! Typed preference accessors
//!
//! Every operation is fail-loud: backend failures and type mismatches
//! surface as storage errors instead of silently falling back to defaults.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::error::{AppError, FailLoud, Result};
use crate::prefs::{MemoryPreferenceBackend, PrefValue, PreferenceBackend};

/// Well-known preference keys.
pub mod keys {
    pub const THEME_MODE: &str = "theme_mode";
    pub const LANGUAGE_CODE: &str = "language_code";
    pub const ONBOARDING_COMPLETED: &str = "onboarding_completed";
    pub const NOTIFICATIONS_ENABLED: &str = "notifications_enabled";
    pub const ANALYTICS_ENABLED: &str = "analytics_enabled";
    pub const CRASH_REPORTING_ENABLED: &str = "crash_reporting_enabled";
    pub const AUTO_BACKUP_ENABLED: &str = "auto_backup_enabled";
    pub const LAST_SYNC: &str = "last_sync";
    pub const APP_VERSION: &str = "app_version";
    pub const BUILD_NUMBER: &str = "build_number";
}

pub const DEFAULT_THEME_MODE: &str = "system";
pub const DEFAULT_LANGUAGE_CODE: &str = "en";

// == User Preferences ==
/// The user-facing settings read and written as one batch.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct UserPreferences {
    pub theme_mode: String,
    pub language_code: String,
    pub notifications_enabled: bool,
    pub analytics_enabled: bool,
    pub crash_reporting_enabled: bool,
    pub auto_backup_enabled: bool,
}

impl Default for UserPreferences {
    fn default() -> Self {
        Self {
            theme_mode: DEFAULT_THEME_MODE.to_string(),
            language_code: DEFAULT_LANGUAGE_CODE.to_string(),
            notifications_enabled: true,
            analytics_enabled: true,
            crash_reporting_enabled: true,
            auto_backup_enabled: false,
        }
    }
}

// == Shared Prefs ==
/// Typed accessor over a [`PreferenceBackend`].
#[derive(Clone)]
pub struct SharedPrefs {
    backend: Arc<dyn PreferenceBackend>,
}

impl SharedPrefs {
    pub fn new(backend: Arc<dyn PreferenceBackend>) -> Self {
        Self { backend }
    }

    /// Preferences held only in memory.
    pub fn in_memory() -> Self {
        Self::new(Arc::new(MemoryPreferenceBackend::new()))
    }

    async fn read(&self, key: &str) -> Result<Option<PrefValue>> {
        self.backend
            .get(key)
            .await
            .storage_context(&format!("read preference '{}'", key))
    }

    async fn write(&self, key: &str, value: PrefValue) -> Result<()> {
        self.backend
            .set(key, value)
            .await
            .storage_context(&format!("write preference '{}'", key))
    }

    async fn read_as<T>(
        &self,
        key: &str,
        expected: &str,
        convert: fn(PrefValue) -> std::result::Result<T, PrefValue>,
    ) -> Result<Option<T>> {
        match self.read(key).await? {
            None => Ok(None),
            Some(value) => convert(value).map(Some).map_err(|found| {
                AppError::storage(format!(
                    "preference '{}' holds a {}, expected {}",
                    key,
                    found.type_name(),
                    expected
                ))
            }),
        }
    }

    // == Generic Accessors ==
    pub async fn get_string(&self, key: &str) -> Result<Option<String>> {
        self.read_as(key, "string", PrefValue::into_string).await
    }

    pub async fn set_string(&self, key: &str, value: &str) -> Result<()> {
        self.write(key, PrefValue::String(value.to_string())).await
    }

    pub async fn get_int(&self, key: &str) -> Result<Option<i64>> {
        self.read_as(key, "int", PrefValue::into_int).await
    }

    pub async fn set_int(&self, key: &str, value: i64) -> Result<()> {
        self.write(key, PrefValue::Int(value)).await
    }

    pub async fn get_double(&self, key: &str) -> Result<Option<f64>> {
        self.read_as(key, "double", PrefValue::into_double).await
    }

    pub async fn set_double(&self, key: &str, value: f64) -> Result<()> {
        self.write(key, PrefValue::Double(value)).await
    }

    pub async fn get_bool(&self, key: &str) -> Result<Option<bool>> {
        self.read_as(key, "bool", PrefValue::into_bool).await
    }

    pub async fn set_bool(&self, key: &str, value: bool) -> Result<()> {
        self.write(key, PrefValue::Bool(value)).await
    }

    pub async fn get_string_list(&self, key: &str) -> Result<Option<Vec<String>>> {
        self.read_as(key, "string_list", PrefValue::into_string_list).await
    }

    pub async fn set_string_list(&self, key: &str, value: Vec<String>) -> Result<()> {
        self.write(key, PrefValue::StringList(value)).await
    }

    /// Reads a JSON document stored as a string.
    pub async fn get_json<T: DeserializeOwned>(&self, key: &str) -> Result<Option<T>> {
        match self.get_string(key).await? {
            None => Ok(None),
            Some(raw) => serde_json::from_str(&raw)
                .map(Some)
                .storage_context(&format!("decode preference '{}'", key)),
        }
    }

    /// Stores a JSON document as a string.
    pub async fn set_json<T: Serialize + ?Sized>(&self, key: &str, value: &T) -> Result<()> {
        let raw = serde_json::to_string(value)
            .storage_context(&format!("encode preference '{}'", key))?;
        self.set_string(key, &raw).await
    }

    pub async fn remove(&self, key: &str) -> Result<bool> {
        self.backend
            .remove(key)
            .await
            .storage_context(&format!("remove preference '{}'", key))
    }

    pub async fn contains_key(&self, key: &str) -> Result<bool> {
        Ok(self.read(key).await?.is_some())
    }

    pub async fn keys(&self) -> Result<Vec<String>> {
        self.backend.keys().await.storage_context("list preferences")
    }

    pub async fn clear(&self) -> Result<()> {
        self.backend.clear().await.storage_context("clear preferences")
    }

    // == Named Settings ==
    pub async fn get_theme_mode(&self) -> Result<String> {
        Ok(self
            .get_string(keys::THEME_MODE)
            .await?
            .unwrap_or_else(|| DEFAULT_THEME_MODE.to_string()))
    }

    pub async fn set_theme_mode(&self, mode: &str) -> Result<()> {
        self.set_string(keys::THEME_MODE, mode).await
    }

    pub async fn get_language_code(&self) -> Result<String> {
        Ok(self
            .get_string(keys::LANGUAGE_CODE)
            .await?
            .unwrap_or_else(|| DEFAULT_LANGUAGE_CODE.to_string()))
    }

    pub async fn set_language_code(&self, code: &str) -> Result<()> {
        self.set_string(keys::LANGUAGE_CODE, code).await
    }

    pub async fn is_onboarding_completed(&self) -> Result<bool> {
        Ok(self.get_bool(keys::ONBOARDING_COMPLETED).await?.unwrap_or(false))
    }

    pub async fn set_onboarding_completed(&self, completed: bool) -> Result<()> {
        self.set_bool(keys::ONBOARDING_COMPLETED, completed).await
    }

    pub async fn are_notifications_enabled(&self) -> Result<bool> {
        Ok(self.get_bool(keys::NOTIFICATIONS_ENABLED).await?.unwrap_or(true))
    }

    pub async fn set_notifications_enabled(&self, enabled: bool) -> Result<()> {
        self.set_bool(keys::NOTIFICATIONS_ENABLED, enabled).await
    }

    pub async fn is_analytics_enabled(&self) -> Result<bool> {
        Ok(self.get_bool(keys::ANALYTICS_ENABLED).await?.unwrap_or(true))
    }

    pub async fn set_analytics_enabled(&self, enabled: bool) -> Result<()> {
        self.set_bool(keys::ANALYTICS_ENABLED, enabled).await
    }

    pub async fn is_crash_reporting_enabled(&self) -> Result<bool> {
        Ok(self
            .get_bool(keys::CRASH_REPORTING_ENABLED)
            .await?
            .unwrap_or(true))
    }

    pub async fn set_crash_reporting_enabled(&self, enabled: bool) -> Result<()> {
        self.set_bool(keys::CRASH_REPORTING_ENABLED, enabled).await
    }

    pub async fn is_auto_backup_enabled(&self) -> Result<bool> {
        Ok(self.get_bool(keys::AUTO_BACKUP_ENABLED).await?.unwrap_or(false))
    }

    pub async fn set_auto_backup_enabled(&self, enabled: bool) -> Result<()> {
        self.set_bool(keys::AUTO_BACKUP_ENABLED, enabled).await
    }

    /// Last successful sync, stored as Unix milliseconds.
    pub async fn get_last_sync(&self) -> Result<Option<DateTime<Utc>>> {
        Ok(self
            .get_int(keys::LAST_SYNC)
            .await?
            .and_then(DateTime::<Utc>::from_timestamp_millis))
    }

    pub async fn set_last_sync(&self, at: DateTime<Utc>) -> Result<()> {
        self.set_int(keys::LAST_SYNC, at.timestamp_millis()).await
    }

    pub async fn get_app_version(&self) -> Result<Option<String>> {
        self.get_string(keys::APP_VERSION).await
    }

    pub async fn set_app_version(&self, version: &str) -> Result<()> {
        self.set_string(keys::APP_VERSION, version).await
    }

    pub async fn get_build_number(&self) -> Result<Option<String>> {
        self.get_string(keys::BUILD_NUMBER).await
    }

    pub async fn set_build_number(&self, build: &str) -> Result<()> {
        self.set_string(keys::BUILD_NUMBER, build).await
    }

    // == Batch ==
    pub async fn get_user_preferences(&self) -> Result<UserPreferences> {
        Ok(UserPreferences {
            theme_mode: self.get_theme_mode().await?,
            language_code: self.get_language_code().await?,
            notifications_enabled: self.are_notifications_enabled().await?,
            analytics_enabled: self.is_analytics_enabled().await?,
            crash_reporting_enabled: self.is_crash_reporting_enabled().await?,
            auto_backup_enabled: self.is_auto_backup_enabled().await?,
        })
    }

    pub async fn set_user_preferences(&self, preferences: &UserPreferences) -> Result<()> {
        self.set_theme_mode(&preferences.theme_mode).await?;
        self.set_language_code(&preferences.language_code).await?;
        self.set_notifications_enabled(preferences.notifications_enabled)
            .await?;
        self.set_analytics_enabled(preferences.analytics_enabled).await?;
        self.set_crash_reporting_enabled(preferences.crash_reporting_enabled)
            .await?;
        self.set_auto_backup_enabled(preferences.auto_backup_enabled)
            .await
    }
}
