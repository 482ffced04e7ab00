//! User profile and settings storage

use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use tracing::info;

use crate::context::StorageContext;
use crate::error::{AppError, Result};
use crate::prefs::{UserPreferences, DEFAULT_LANGUAGE_CODE, DEFAULT_THEME_MODE};
use crate::services::{init_missing, read_soft, run_migration, write_loud};

const PROFILE_KEY: &str = "user_profile";
const SETTINGS_KEY: &str = "user_settings";
const SCHEMA_VERSION_KEY: &str = "user_schema_version";

pub const THEME_MODES: [&str; 3] = ["light", "dark", "system"];

// == User Profile ==
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct UserProfile {
    pub id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub display_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub avatar_url: Option<String>,
    /// Fields without a typed slot
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl UserProfile {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            ..Self::default()
        }
    }
}

#[derive(Debug, Default, Serialize, Deserialize)]
#[serde(default)]
struct UserExport {
    profile: Option<UserProfile>,
    settings: Map<String, Value>,
    preferences: Option<UserPreferences>,
}

// == User Storage Service ==
#[derive(Clone, Debug)]
pub struct UserStorageService {
    ctx: StorageContext,
}

impl UserStorageService {
    pub fn new(ctx: StorageContext) -> Self {
        Self { ctx }
    }

    // == Profile ==
    pub async fn store_user_profile(&self, profile: &UserProfile) -> Result<()> {
        let result = self.ctx.prefs.set_json(PROFILE_KEY, profile).await;
        write_loud(&self.ctx.tracker, "store user profile", result)
    }

    pub async fn get_user_profile(&self) -> Option<UserProfile> {
        let result = self.ctx.prefs.get_json(PROFILE_KEY).await;
        read_soft(&self.ctx.tracker, "get user profile", result).flatten()
    }

    /// Sets one profile field. Typed fields are validated by re-decoding the profile.
    pub async fn update_profile_field(&self, field: &str, value: Value) -> Result<()> {
        let result = async {
            let profile: UserProfile = self
                .ctx
                .prefs
                .get_json(PROFILE_KEY)
                .await?
                .ok_or_else(|| AppError::validation("no user profile stored"))?;

            let mut document = match serde_json::to_value(&profile)? {
                Value::Object(map) => map,
                _ => Map::new(),
            };
            document.insert(field.to_string(), value);
            let updated: UserProfile = serde_json::from_value(Value::Object(document))
                .map_err(|e| AppError::validation(format!("invalid profile field '{}': {}", field, e)))?;
            self.ctx.prefs.set_json(PROFILE_KEY, &updated).await
        }
        .await;
        write_loud(&self.ctx.tracker, "update profile field", result)
    }

    pub async fn get_profile_field(&self, field: &str) -> Option<Value> {
        let profile = self.get_user_profile().await?;
        let document = serde_json::to_value(profile).ok()?;
        document.get(field).filter(|v| !v.is_null()).cloned()
    }

    // == Free-Form Settings ==
    pub async fn update_preference(&self, key: &str, value: Value) -> Result<()> {
        let result = async {
            let mut settings: Map<String, Value> =
                self.ctx.prefs.get_json(SETTINGS_KEY).await?.unwrap_or_default();
            settings.insert(key.to_string(), value);
            self.ctx.prefs.set_json(SETTINGS_KEY, &settings).await
        }
        .await;
        write_loud(&self.ctx.tracker, "update preference", result)
    }

    pub async fn get_setting(&self, key: &str) -> Option<Value> {
        self.get_settings().await.remove(key)
    }

    async fn get_settings(&self) -> Map<String, Value> {
        let result = self.ctx.prefs.get_json(SETTINGS_KEY).await;
        read_soft(&self.ctx.tracker, "get settings", result)
            .flatten()
            .unwrap_or_default()
    }

    // == Display Settings ==
    /// Accepts `light`, `dark` or `system`.
    pub async fn set_theme_mode(&self, mode: &str) -> Result<()> {
        if !THEME_MODES.contains(&mode) {
            return Err(AppError::validation(format!("unknown theme mode '{}'", mode)));
        }
        let result = self.ctx.prefs.set_theme_mode(mode).await;
        write_loud(&self.ctx.tracker, "set theme mode", result)
    }

    pub async fn get_theme_mode(&self) -> String {
        let result = self.ctx.prefs.get_theme_mode().await;
        read_soft(&self.ctx.tracker, "get theme mode", result)
            .unwrap_or_else(|| DEFAULT_THEME_MODE.to_string())
    }

    pub async fn set_language(&self, code: &str) -> Result<()> {
        if code.trim().is_empty() {
            return Err(AppError::validation("language code must not be empty"));
        }
        let result = self.ctx.prefs.set_language_code(code).await;
        write_loud(&self.ctx.tracker, "set language", result)
    }

    pub async fn get_language(&self) -> String {
        let result = self.ctx.prefs.get_language_code().await;
        read_soft(&self.ctx.tracker, "get language", result)
            .unwrap_or_else(|| DEFAULT_LANGUAGE_CODE.to_string())
    }

    pub async fn set_notifications_enabled(&self, enabled: bool) -> Result<()> {
        let result = self.ctx.prefs.set_notifications_enabled(enabled).await;
        write_loud(&self.ctx.tracker, "set notifications enabled", result)
    }

    pub async fn are_notifications_enabled(&self) -> bool {
        let result = self.ctx.prefs.are_notifications_enabled().await;
        read_soft(&self.ctx.tracker, "get notifications enabled", result).unwrap_or(true)
    }

    // == Avatar ==
    pub async fn cache_avatar(&self, url: &str, bytes: &[u8]) -> Option<PathBuf> {
        self.ctx.cache.cache_image(url, bytes).await
    }

    pub async fn get_cached_avatar(&self, url: &str) -> Option<Vec<u8>> {
        self.ctx.cache.get_cached_image(url).await
    }

    // == Lifecycle ==
    /// Removes the profile, the settings document and the cached avatar.
    pub async fn clear_user_data(&self) -> Result<()> {
        if let Some(url) = self.get_user_profile().await.and_then(|p| p.avatar_url) {
            self.ctx.cache.remove_image(&url).await;
        }
        let result = async {
            self.ctx.prefs.remove(PROFILE_KEY).await?;
            self.ctx.prefs.remove(SETTINGS_KEY).await
        }
        .await;
        write_loud(&self.ctx.tracker, "clear user data", result)?;
        info!("Cleared user data");
        Ok(())
    }

    pub async fn export_user_data(&self) -> Value {
        let preferences = self.ctx.prefs.get_user_preferences().await;
        let export = UserExport {
            profile: self.get_user_profile().await,
            settings: self.get_settings().await,
            preferences: read_soft(&self.ctx.tracker, "export preferences", preferences),
        };
        serde_json::to_value(export).unwrap_or(Value::Null)
    }

    pub async fn import_user_data(&self, data: &Value) -> Result<()> {
        let export: UserExport = serde_json::from_value(data.clone())
            .map_err(|e| AppError::validation(format!("invalid user backup: {}", e)))?;
        if let Some(preferences) = &export.preferences {
            if !THEME_MODES.contains(&preferences.theme_mode.as_str()) {
                return Err(AppError::validation(format!(
                    "unknown theme mode '{}'",
                    preferences.theme_mode
                )));
            }
        }

        let result = async {
            if let Some(profile) = &export.profile {
                self.ctx.prefs.set_json(PROFILE_KEY, profile).await?;
            }
            self.ctx.prefs.set_json(SETTINGS_KEY, &export.settings).await?;
            match &export.preferences {
                Some(preferences) => self.ctx.prefs.set_user_preferences(preferences).await,
                None => Ok(()),
            }
        }
        .await;
        write_loud(&self.ctx.tracker, "import user data", result)
    }

    pub async fn get_user_summary(&self) -> Value {
        let profile = self.get_user_profile().await;
        let avatar_cached = match profile.as_ref().and_then(|p| p.avatar_url.as_deref()) {
            Some(url) => self.ctx.cache.is_image_cached(url).await,
            None => false,
        };
        json!({
            "has_profile": profile.is_some(),
            "user_id": profile.as_ref().map(|p| p.id.clone()),
            "display_name": profile.as_ref().and_then(|p| p.display_name.clone()),
            "avatar_cached": avatar_cached,
            "settings_count": self.get_settings().await.len(),
            "theme_mode": self.get_theme_mode().await,
            "language": self.get_language().await,
            "notifications_enabled": self.are_notifications_enabled().await,
        })
    }

    /// Replaces a settings document that is not a JSON object and creates
    /// an empty one when none exists.
    pub async fn migrate(&self) -> bool {
        run_migration(&self.ctx.prefs, &self.ctx.tracker, SCHEMA_VERSION_KEY, || async {
            let prefs = &self.ctx.prefs;
            let settings: Option<Value> = prefs.get_json(SETTINGS_KEY).await?;
            if settings.is_some_and(|s| !s.is_object()) {
                prefs.remove(SETTINGS_KEY).await?;
            }
            init_missing(prefs, SETTINGS_KEY, &Map::new()).await?;
            Ok::<(), AppError>(())
        })
        .await
    }
}
