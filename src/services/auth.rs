//! Authentication storage
//!
//! Tokens and the user id live in the secure store; the user document and
//! token expiry are secure custom data; the login history is a preference.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use tracing::{debug, info};

use crate::context::StorageContext;
use crate::error::{AppError, Result};
use crate::services::{read_soft, run_migration, write_loud};
use crate::tracking::Severity;

const USER_DATA_KEY: &str = "auth_user_data";
const TOKEN_EXPIRY_KEY: &str = "auth_token_expiry";
const LOGIN_HISTORY_KEY: &str = "auth_login_history";
const SCHEMA_VERSION_KEY: &str = "auth_schema_version";

pub const MAX_LOGIN_HISTORY: usize = 10;

// == Documents ==
/// Everything written by a successful login.
#[derive(Debug, Clone, PartialEq)]
pub struct AuthCredentials {
    pub access_token: String,
    pub user_id: String,
    pub refresh_token: Option<String>,
    pub expires_at: Option<DateTime<Utc>>,
    pub user_data: Option<Value>,
}

impl AuthCredentials {
    pub fn new(access_token: impl Into<String>, user_id: impl Into<String>) -> Self {
        Self {
            access_token: access_token.into(),
            user_id: user_id.into(),
            refresh_token: None,
            expires_at: None,
            user_data: None,
        }
    }

    pub fn refresh_token(mut self, token: impl Into<String>) -> Self {
        self.refresh_token = Some(token.into());
        self
    }

    pub fn expires_at(mut self, at: DateTime<Utc>) -> Self {
        self.expires_at = Some(at);
        self
    }

    pub fn user_data(mut self, data: Value) -> Self {
        self.user_data = Some(data);
        self
    }
}

/// Stored authentication state.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuthState {
    pub access_token: String,
    pub refresh_token: Option<String>,
    pub user_id: Option<String>,
    pub expires_at: Option<DateTime<Utc>>,
    pub user_data: Option<Value>,
    pub last_login: Option<DateTime<Utc>>,
}

impl AuthState {
    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        self.expires_at.is_some_and(|at| at <= now)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AuthEvent {
    Login,
    Logout,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LoginHistoryEntry {
    pub event: AuthEvent,
    pub user_id: Option<String>,
    pub timestamp: DateTime<Utc>,
}

/// Portable backup; never carries tokens.
#[derive(Debug, Default, Serialize, Deserialize)]
#[serde(default)]
struct AuthExport {
    user_data: Option<Value>,
    login_history: Vec<LoginHistoryEntry>,
    biometric_enabled: bool,
    has_session: bool,
    exported_at: Option<DateTime<Utc>>,
}

// == Auth Storage Service ==
#[derive(Clone, Debug)]
pub struct AuthStorageService {
    ctx: StorageContext,
}

impl AuthStorageService {
    pub fn new(ctx: StorageContext) -> Self {
        Self { ctx }
    }

    // == Session ==
    pub async fn store_auth_data(&self, credentials: AuthCredentials) -> Result<()> {
        let result = self.write_credentials(&credentials).await;
        write_loud(&self.ctx.tracker, "store auth data", result)?;

        self.ctx.tracker.set_user_id(Some(credentials.user_id.clone()));
        self.record_history(AuthEvent::Login, Some(credentials.user_id.clone()))
            .await;
        info!(user_id = %credentials.user_id, "Stored auth data");
        Ok(())
    }

    async fn write_credentials(&self, credentials: &AuthCredentials) -> Result<()> {
        let secure = &self.ctx.secure;
        secure.set_access_token(&credentials.access_token).await?;
        match &credentials.refresh_token {
            Some(token) => secure.set_refresh_token(token).await?,
            None => {
                secure.delete(crate::secure::keys::REFRESH_TOKEN).await?;
            }
        }
        secure.set_user_id(&credentials.user_id).await?;
        secure.set_last_login(Utc::now()).await?;
        match &credentials.expires_at {
            Some(at) => secure.set_custom_data(TOKEN_EXPIRY_KEY, at).await?,
            None => {
                secure.remove_custom_data(TOKEN_EXPIRY_KEY).await?;
            }
        }
        if let Some(data) = &credentials.user_data {
            secure.set_custom_data(USER_DATA_KEY, data).await?;
        }
        Ok(())
    }

    /// Current state, or None when no access token is stored.
    pub async fn get_auth_data(&self) -> Option<AuthState> {
        let result = self.read_state().await;
        read_soft(&self.ctx.tracker, "get auth data", result).flatten()
    }

    async fn read_state(&self) -> Result<Option<AuthState>> {
        let secure = &self.ctx.secure;
        let Some(access_token) = secure.get_access_token().await? else {
            return Ok(None);
        };
        Ok(Some(AuthState {
            access_token,
            refresh_token: secure.get_refresh_token().await?,
            user_id: secure.get_user_id().await?,
            expires_at: secure.get_custom_data(TOKEN_EXPIRY_KEY).await?,
            user_data: secure.get_custom_data(USER_DATA_KEY).await?,
            last_login: secure.get_last_login().await?,
        }))
    }

    /// A token is stored and has not passed its expiry.
    pub async fn is_authenticated(&self) -> bool {
        self.get_auth_data()
            .await
            .is_some_and(|state| !state.is_expired_at(Utc::now()))
    }

    pub async fn get_current_token(&self) -> Option<String> {
        let result = self.ctx.secure.get_access_token().await;
        read_soft(&self.ctx.tracker, "get current token", result).flatten()
    }

    pub async fn get_current_user_id(&self) -> Option<String> {
        let result = self.ctx.secure.get_user_id().await;
        read_soft(&self.ctx.tracker, "get current user id", result).flatten()
    }

    /// Replaces the access token after a refresh. Omitted values keep their stored state.
    pub async fn update_token(
        &self,
        token: &str,
        refresh_token: Option<&str>,
        expires_at: Option<DateTime<Utc>>,
    ) -> Result<()> {
        let result = async {
            let secure = &self.ctx.secure;
            secure.set_access_token(token).await?;
            if let Some(refresh) = refresh_token {
                secure.set_refresh_token(refresh).await?;
            }
            if let Some(at) = expires_at {
                secure.set_custom_data(TOKEN_EXPIRY_KEY, &at).await?;
            }
            Ok::<(), AppError>(())
        }
        .await;
        write_loud(&self.ctx.tracker, "update token", result)?;
        debug!("Updated access token");
        Ok(())
    }

    // == User Document ==
    pub async fn update_user_data(&self, data: Value) -> Result<()> {
        let result = self.ctx.secure.set_custom_data(USER_DATA_KEY, &data).await;
        write_loud(&self.ctx.tracker, "update user data", result)
    }

    /// Sets one field of the user document, creating the document if needed.
    pub async fn update_user_field(&self, field: &str, value: Value) -> Result<()> {
        let result = async {
            let mut document = match self.ctx.secure.get_custom_data::<Value>(USER_DATA_KEY).await? {
                Some(Value::Object(map)) => map,
                None => Map::new(),
                Some(_) => return Err(AppError::validation("stored user data is not an object")),
            };
            document.insert(field.to_string(), value);
            self.ctx
                .secure
                .set_custom_data(USER_DATA_KEY, &Value::Object(document))
                .await
        }
        .await;
        write_loud(&self.ctx.tracker, "update user field", result)
    }

    pub async fn get_user_field(&self, field: &str) -> Option<Value> {
        let result = self.ctx.secure.get_custom_data::<Value>(USER_DATA_KEY).await;
        read_soft(&self.ctx.tracker, "get user field", result)
            .flatten()?
            .get(field)
            .cloned()
    }

    /// Clears the session and custom auth keys. Biometric and device settings stay.
    pub async fn logout(&self) -> Result<()> {
        let user_id = self.get_current_user_id().await;
        let result = async {
            let secure = &self.ctx.secure;
            secure.clear_auth_data().await?;
            secure.remove_custom_data(USER_DATA_KEY).await?;
            secure.remove_custom_data(TOKEN_EXPIRY_KEY).await?;
            Ok::<(), AppError>(())
        }
        .await;
        write_loud(&self.ctx.tracker, "logout", result)?;

        self.ctx.tracker.set_user_id(None);
        self.record_history(AuthEvent::Logout, user_id).await;
        info!("Logged out");
        Ok(())
    }

    // == Login History ==
    /// Newest first, at most [`MAX_LOGIN_HISTORY`] entries.
    pub async fn get_login_history(&self) -> Vec<LoginHistoryEntry> {
        let result = self.ctx.prefs.get_json(LOGIN_HISTORY_KEY).await;
        read_soft(&self.ctx.tracker, "get login history", result)
            .flatten()
            .unwrap_or_default()
    }

    /// Best effort; a failed history write does not fail the login or logout.
    async fn record_history(&self, event: AuthEvent, user_id: Option<String>) {
        let mut history = self.get_login_history().await;
        history.insert(
            0,
            LoginHistoryEntry {
                event,
                user_id,
                timestamp: Utc::now(),
            },
        );
        history.truncate(MAX_LOGIN_HISTORY);
        let result = self.ctx.prefs.set_json(LOGIN_HISTORY_KEY, &history).await;
        if let Err(err) = result {
            self.ctx
                .tracker
                .track_error(&err, "record login history", Severity::Low);
        }
    }

    // == Backup ==
    /// User document, login history and biometric flag. Tokens are never exported.
    pub async fn export_auth_data(&self) -> Value {
        let user_data = self.get_user_data().await;
        let biometric_enabled = self.biometric_enabled().await;
        let export = AuthExport {
            user_data,
            login_history: self.get_login_history().await,
            biometric_enabled,
            has_session: self.get_current_token().await.is_some(),
            exported_at: Some(Utc::now()),
        };
        serde_json::to_value(export).unwrap_or(Value::Null)
    }

    /// Restores an [`export_auth_data`](Self::export_auth_data) document.
    /// The session itself is not restored; the user has to log in again.
    pub async fn import_auth_data(&self, data: &Value) -> Result<()> {
        let export: AuthExport = serde_json::from_value(data.clone())
            .map_err(|e| AppError::validation(format!("invalid auth backup: {}", e)))?;

        let result = async {
            if let Some(user_data) = &export.user_data {
                self.ctx.secure.set_custom_data(USER_DATA_KEY, user_data).await?;
            }
            let mut history = export.login_history;
            history.truncate(MAX_LOGIN_HISTORY);
            self.ctx.prefs.set_json(LOGIN_HISTORY_KEY, &history).await?;
            self.ctx
                .secure
                .set_biometric_enabled(export.biometric_enabled)
                .await
        }
        .await;
        write_loud(&self.ctx.tracker, "import auth data", result)
    }

    pub async fn get_auth_summary(&self) -> Value {
        let state = self.get_auth_data().await;
        let now = Utc::now();
        json!({
            "is_authenticated": state.as_ref().is_some_and(|s| !s.is_expired_at(now)),
            "user_id": state.as_ref().and_then(|s| s.user_id.clone()),
            "has_refresh_token": state.as_ref().is_some_and(|s| s.refresh_token.is_some()),
            "token_expires_at": state.as_ref().and_then(|s| s.expires_at),
            "last_login": state.as_ref().and_then(|s| s.last_login),
            "biometric_enabled": self.biometric_enabled().await,
            "login_history_count": self.get_login_history().await.len(),
        })
    }

    /// Creates the login history when missing and trims oversized ones
    /// written by older versions.
    pub async fn migrate(&self) -> bool {
        run_migration(&self.ctx.prefs, &self.ctx.tracker, SCHEMA_VERSION_KEY, || async {
            let mut history: Vec<LoginHistoryEntry> = self
                .ctx
                .prefs
                .get_json(LOGIN_HISTORY_KEY)
                .await?
                .unwrap_or_default();
            history.truncate(MAX_LOGIN_HISTORY);
            self.ctx.prefs.set_json(LOGIN_HISTORY_KEY, &history).await?;
            Ok::<(), AppError>(())
        })
        .await
    }

    async fn get_user_data(&self) -> Option<Value> {
        let result = self.ctx.secure.get_custom_data(USER_DATA_KEY).await;
        read_soft(&self.ctx.tracker, "get user data", result).flatten()
    }

    async fn biometric_enabled(&self) -> bool {
        let result = self.ctx.secure.is_biometric_enabled().await;
        read_soft(&self.ctx.tracker, "get biometric flag", result).unwrap_or(false)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;
    use tempfile::TempDir;

    async fn service() -> (AuthStorageService, StorageContext, TempDir) {
        let dir = tempfile::tempdir().unwrap();
        let ctx = StorageContext::in_memory(dir.path()).await.unwrap();
        (ctx.auth(), ctx, dir)
    }

    #[tokio::test]
    async fn test_store_and_read_auth_data() {
        let (auth, _ctx, _dir) = service().await;
        let expires = Utc::now() + Duration::hours(1);
        auth.store_auth_data(
            AuthCredentials::new("T", "U")
                .refresh_token("R")
                .expires_at(expires)
                .user_data(json!({"name": "Ada"})),
        )
        .await
        .unwrap();

        let state = auth.get_auth_data().await.unwrap();
        assert_eq!(state.access_token, "T");
        assert_eq!(state.refresh_token.as_deref(), Some("R"));
        assert_eq!(state.user_id.as_deref(), Some("U"));
        assert_eq!(state.expires_at, Some(expires));
        assert_eq!(state.user_data, Some(json!({"name": "Ada"})));
        assert!(state.last_login.is_some());
        assert!(auth.is_authenticated().await);
        assert_eq!(auth.get_current_token().await.as_deref(), Some("T"));
        assert_eq!(auth.get_current_user_id().await.as_deref(), Some("U"));
    }

    #[tokio::test]
    async fn test_expired_token_not_authenticated() {
        let (auth, _ctx, _dir) = service().await;
        auth.store_auth_data(
            AuthCredentials::new("T", "U").expires_at(Utc::now() - Duration::minutes(1)),
        )
        .await
        .unwrap();

        assert!(auth.get_auth_data().await.is_some());
        assert!(!auth.is_authenticated().await);
    }

    #[tokio::test]
    async fn test_logout_keeps_device_settings() {
        let (auth, ctx, _dir) = service().await;
        ctx.secure.set_biometric_enabled(true).await.unwrap();
        ctx.secure.set_device_id("device-1").await.unwrap();
        auth.store_auth_data(AuthCredentials::new("T", "U").user_data(json!({"a": 1})))
            .await
            .unwrap();

        auth.logout().await.unwrap();

        assert!(auth.get_auth_data().await.is_none());
        assert!(!auth.is_authenticated().await);
        assert_eq!(auth.get_current_token().await, None);
        assert_eq!(auth.get_current_user_id().await, None);
        assert_eq!(auth.get_user_field("a").await, None);
        assert!(ctx.secure.is_biometric_enabled().await.unwrap());
        assert_eq!(ctx.secure.get_device_id().await.unwrap().as_deref(), Some("device-1"));
    }

    #[tokio::test]
    async fn test_login_history_newest_first_and_bounded() {
        let (auth, _ctx, _dir) = service().await;
        for i in 0..6 {
            auth.store_auth_data(AuthCredentials::new("T", format!("user-{}", i)))
                .await
                .unwrap();
            auth.logout().await.unwrap();
        }

        let history = auth.get_login_history().await;
        assert_eq!(history.len(), MAX_LOGIN_HISTORY);
        assert_eq!(history[0].event, AuthEvent::Logout);
        assert_eq!(history[0].user_id.as_deref(), Some("user-5"));
        assert_eq!(history[1].event, AuthEvent::Login);
        assert_eq!(history[1].user_id.as_deref(), Some("user-5"));
    }

    #[tokio::test]
    async fn test_update_token_keeps_refresh() {
        let (auth, _ctx, _dir) = service().await;
        auth.store_auth_data(AuthCredentials::new("T1", "U").refresh_token("R1"))
            .await
            .unwrap();

        auth.update_token("T2", None, None).await.unwrap();
        let state = auth.get_auth_data().await.unwrap();
        assert_eq!(state.access_token, "T2");
        assert_eq!(state.refresh_token.as_deref(), Some("R1"));
    }

    #[tokio::test]
    async fn test_user_fields() {
        let (auth, _ctx, _dir) = service().await;
        auth.update_user_field("email", json!("a@b.c")).await.unwrap();
        auth.update_user_field("age", json!(36)).await.unwrap();

        assert_eq!(auth.get_user_field("email").await, Some(json!("a@b.c")));
        assert_eq!(auth.get_user_field("age").await, Some(json!(36)));
        assert_eq!(auth.get_user_field("missing").await, None);

        auth.update_user_data(json!(["not", "an", "object"])).await.unwrap();
        assert!(auth.update_user_field("x", json!(1)).await.is_err());
    }

    #[tokio::test]
    async fn test_export_import_without_tokens() {
        let (auth, ctx, _dir) = service().await;
        ctx.secure.set_biometric_enabled(true).await.unwrap();
        auth.store_auth_data(AuthCredentials::new("SECRET", "U").user_data(json!({"n": 1})))
            .await
            .unwrap();

        let export = auth.export_auth_data().await;
        assert!(!export.to_string().contains("SECRET"));
        assert_eq!(export["has_session"], json!(true));

        let (other, other_ctx, _other_dir) = service().await;
        other.import_auth_data(&export).await.unwrap();
        assert_eq!(other.get_user_field("n").await, Some(json!(1)));
        assert_eq!(other.get_login_history().await.len(), 1);
        assert!(other_ctx.secure.is_biometric_enabled().await.unwrap());
        assert!(!other.is_authenticated().await);
    }

    #[tokio::test]
    async fn test_import_rejects_malformed_backup() {
        let (auth, _ctx, _dir) = service().await;
        let err = auth
            .import_auth_data(&json!({"login_history": "nope"}))
            .await
            .unwrap_err();
        assert_eq!(err.kind, crate::error::ErrorKind::Validation);
    }

    #[tokio::test]
    async fn test_summary_and_migrate() {
        let (auth, ctx, _dir) = service().await;
        let summary = auth.get_auth_summary().await;
        assert_eq!(summary["is_authenticated"], json!(false));
        assert_eq!(summary["login_history_count"], json!(0));

        let long: Vec<LoginHistoryEntry> = (0..15)
            .map(|_| LoginHistoryEntry {
                event: AuthEvent::Login,
                user_id: None,
                timestamp: Utc::now(),
            })
            .collect();
        ctx.prefs.set_json(LOGIN_HISTORY_KEY, &long).await.unwrap();

        assert!(auth.migrate().await);
        assert_eq!(auth.get_login_history().await.len(), MAX_LOGIN_HISTORY);
        assert!(!auth.migrate().await);
    }

    #[tokio::test]
    async fn test_migrate_creates_login_history() {
        let (auth, ctx, _dir) = service().await;
        assert!(!ctx.prefs.contains_key(LOGIN_HISTORY_KEY).await.unwrap());

        assert!(auth.migrate().await);
        let stored: Option<Vec<LoginHistoryEntry>> = ctx.prefs.get_json(LOGIN_HISTORY_KEY).await.unwrap();
        assert_eq!(stored.map(|h| h.len()), Some(0));
    }
}
