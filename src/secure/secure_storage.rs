//! Named accessors over the secret backend
//!
//! All operations are fail-loud. Structured values go through the string
//! primitive as JSON.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::error::{AppError, FailLoud, Result};
use crate::secure::{MemorySecretBackend, SecretBackend};

/// Well-known secret keys.
pub mod keys {
    pub const ACCESS_TOKEN: &str = "access_token";
    pub const REFRESH_TOKEN: &str = "refresh_token";
    pub const USER_ID: &str = "user_id";
    pub const BIOMETRIC_ENABLED: &str = "biometric_enabled";
    pub const LAST_LOGIN: &str = "last_login";
    pub const DEVICE_ID: &str = "device_id";
}

/// Keys removed by [`SecureStorage::clear_auth_data`].
const AUTH_KEYS: [&str; 3] = [keys::ACCESS_TOKEN, keys::REFRESH_TOKEN, keys::USER_ID];

// == Secure Storage ==
#[derive(Clone)]
pub struct SecureStorage {
    backend: Arc<dyn SecretBackend>,
}

impl SecureStorage {
    pub fn new(backend: Arc<dyn SecretBackend>) -> Self {
        Self { backend }
    }

    /// Secrets held only in memory.
    pub fn in_memory() -> Self {
        Self::new(Arc::new(MemorySecretBackend::new()))
    }

    // == Primitives ==
    pub async fn read(&self, key: &str) -> Result<Option<String>> {
        self.backend
            .read(key)
            .await
            .storage_context(&format!("read secret '{}'", key))
    }

    pub async fn write(&self, key: &str, value: &str) -> Result<()> {
        self.backend
            .write(key, value)
            .await
            .storage_context(&format!("write secret '{}'", key))
    }

    pub async fn delete(&self, key: &str) -> Result<bool> {
        self.backend
            .delete(key)
            .await
            .storage_context(&format!("delete secret '{}'", key))
    }

    pub async fn keys(&self) -> Result<Vec<String>> {
        self.backend.keys().await.storage_context("list secrets")
    }

    pub async fn contains_key(&self, key: &str) -> Result<bool> {
        Ok(self.read(key).await?.is_some())
    }

    // == Tokens ==
    pub async fn get_access_token(&self) -> Result<Option<String>> {
        self.read(keys::ACCESS_TOKEN).await
    }

    pub async fn set_access_token(&self, token: &str) -> Result<()> {
        self.write(keys::ACCESS_TOKEN, token).await
    }

    pub async fn get_refresh_token(&self) -> Result<Option<String>> {
        self.read(keys::REFRESH_TOKEN).await
    }

    pub async fn set_refresh_token(&self, token: &str) -> Result<()> {
        self.write(keys::REFRESH_TOKEN, token).await
    }

    // == Identity ==
    pub async fn get_user_id(&self) -> Result<Option<String>> {
        self.read(keys::USER_ID).await
    }

    pub async fn set_user_id(&self, user_id: &str) -> Result<()> {
        self.write(keys::USER_ID, user_id).await
    }

    pub async fn get_device_id(&self) -> Result<Option<String>> {
        self.read(keys::DEVICE_ID).await
    }

    pub async fn set_device_id(&self, device_id: &str) -> Result<()> {
        self.write(keys::DEVICE_ID, device_id).await
    }

    /// Absent means disabled.
    pub async fn is_biometric_enabled(&self) -> Result<bool> {
        Ok(self.read(keys::BIOMETRIC_ENABLED).await?.as_deref() == Some("true"))
    }

    pub async fn set_biometric_enabled(&self, enabled: bool) -> Result<()> {
        self.write(keys::BIOMETRIC_ENABLED, if enabled { "true" } else { "false" })
            .await
    }

    /// Stored as RFC 3339.
    pub async fn get_last_login(&self) -> Result<Option<DateTime<Utc>>> {
        let Some(raw) = self.read(keys::LAST_LOGIN).await? else {
            return Ok(None);
        };
        DateTime::parse_from_rfc3339(&raw)
            .map(|at| Some(at.with_timezone(&Utc)))
            .map_err(|err| AppError::storage(format!("decode secret 'last_login': {}", err)))
    }

    pub async fn set_last_login(&self, at: DateTime<Utc>) -> Result<()> {
        self.write(keys::LAST_LOGIN, &at.to_rfc3339()).await
    }

    // == Custom Data ==
    pub async fn set_custom_data<T: Serialize + ?Sized>(&self, key: &str, value: &T) -> Result<()> {
        let json = serde_json::to_string(value)
            .storage_context(&format!("encode secret '{}'", key))?;
        self.write(key, &json).await
    }

    pub async fn get_custom_data<T: DeserializeOwned>(&self, key: &str) -> Result<Option<T>> {
        match self.read(key).await? {
            Some(json) => serde_json::from_str(&json)
                .map(Some)
                .storage_context(&format!("decode secret '{}'", key)),
            None => Ok(None),
        }
    }

    pub async fn remove_custom_data(&self, key: &str) -> Result<bool> {
        self.delete(key).await
    }

    // == Bulk Removal ==
    /// Removes the access token, refresh token and user id. Everything else stays.
    pub async fn clear_auth_data(&self) -> Result<()> {
        for key in AUTH_KEYS {
            self.delete(key).await?;
        }
        Ok(())
    }

    pub async fn clear_all(&self) -> Result<()> {
        self.backend
            .delete_all()
            .await
            .storage_context("clear secrets")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use serde::Deserialize;

    use crate::error::ErrorKind;

    struct BrokenBackend;

    #[async_trait]
    impl SecretBackend for BrokenBackend {
        async fn read(&self, _key: &str) -> Result<Option<String>> {
            Err(AppError::unknown("keychain locked"))
        }
        async fn write(&self, _key: &str, _value: &str) -> Result<()> {
            Err(AppError::unknown("keychain locked"))
        }
        async fn delete(&self, _key: &str) -> Result<bool> {
            Err(AppError::unknown("keychain locked"))
        }
        async fn delete_all(&self) -> Result<()> {
            Err(AppError::unknown("keychain locked"))
        }
        async fn keys(&self) -> Result<Vec<String>> {
            Err(AppError::unknown("keychain locked"))
        }
    }

    #[derive(Debug, PartialEq, Serialize, Deserialize)]
    struct Session {
        scopes: Vec<String>,
        expires_in: u32,
    }

    #[tokio::test]
    async fn test_tokens_roundtrip() {
        let secure = SecureStorage::in_memory();
        secure.set_access_token("a1").await.unwrap();
        secure.set_refresh_token("r1").await.unwrap();
        secure.set_user_id("u1").await.unwrap();

        assert_eq!(secure.get_access_token().await.unwrap().as_deref(), Some("a1"));
        assert_eq!(secure.get_refresh_token().await.unwrap().as_deref(), Some("r1"));
        assert_eq!(secure.get_user_id().await.unwrap().as_deref(), Some("u1"));
    }

    #[tokio::test]
    async fn test_clear_auth_data_keeps_other_keys() {
        let secure = SecureStorage::in_memory();
        secure.set_access_token("a1").await.unwrap();
        secure.set_refresh_token("r1").await.unwrap();
        secure.set_user_id("u1").await.unwrap();
        secure.set_biometric_enabled(true).await.unwrap();
        secure.set_device_id("device-7").await.unwrap();
        secure.set_custom_data("pin_hint", "birthday").await.unwrap();

        secure.clear_auth_data().await.unwrap();

        assert_eq!(secure.get_access_token().await.unwrap(), None);
        assert_eq!(secure.get_refresh_token().await.unwrap(), None);
        assert_eq!(secure.get_user_id().await.unwrap(), None);
        assert!(secure.is_biometric_enabled().await.unwrap());
        assert_eq!(secure.get_device_id().await.unwrap().as_deref(), Some("device-7"));
        assert_eq!(
            secure.get_custom_data::<String>("pin_hint").await.unwrap().as_deref(),
            Some("birthday")
        );
    }

    #[tokio::test]
    async fn test_clear_auth_data_on_empty_store() {
        let secure = SecureStorage::in_memory();
        secure.clear_auth_data().await.unwrap();
        assert!(secure.keys().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_clear_all() {
        let secure = SecureStorage::in_memory();
        secure.set_device_id("d").await.unwrap();
        secure.set_access_token("t").await.unwrap();

        secure.clear_all().await.unwrap();
        assert!(secure.keys().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_custom_data_roundtrip() {
        let secure = SecureStorage::in_memory();
        let session = Session {
            scopes: vec!["read".into(), "write".into()],
            expires_in: 3600,
        };
        secure.set_custom_data("session", &session).await.unwrap();

        let loaded: Option<Session> = secure.get_custom_data("session").await.unwrap();
        assert_eq!(loaded, Some(session));
        assert!(secure.remove_custom_data("session").await.unwrap());
        assert_eq!(secure.get_custom_data::<Session>("session").await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_custom_data_decode_failure_is_storage_error() {
        let secure = SecureStorage::in_memory();
        secure.write("session", "not json").await.unwrap();

        let err = secure.get_custom_data::<Session>("session").await.unwrap_err();
        assert_eq!(err.kind, ErrorKind::Storage);
    }

    #[tokio::test]
    async fn test_biometric_default_and_last_login() {
        let secure = SecureStorage::in_memory();
        assert!(!secure.is_biometric_enabled().await.unwrap());
        assert_eq!(secure.get_last_login().await.unwrap(), None);

        let at = DateTime::parse_from_rfc3339("2024-05-01T12:30:00Z")
            .unwrap()
            .with_timezone(&Utc);
        secure.set_last_login(at).await.unwrap();
        assert_eq!(secure.get_last_login().await.unwrap(), Some(at));
    }

    #[tokio::test]
    async fn test_backend_failures_are_loud() {
        let secure = SecureStorage::new(Arc::new(BrokenBackend));

        let err = secure.get_access_token().await.unwrap_err();
        assert_eq!(err.kind, ErrorKind::Storage);
        assert!(err.message.contains("access_token"));
        assert!(secure.set_user_id("u").await.is_err());
        assert!(secure.clear_auth_data().await.is_err());
        assert!(secure.clear_all().await.is_err());
    }
}
