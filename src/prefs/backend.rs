//! Preference backends
//!
//! A [`PreferenceBackend`] is the persistent flat map behind
//! [`SharedPrefs`](super::SharedPrefs). Two implementations are provided: an
//! in-memory map for tests and embedding, and a JSON file rewritten
//! atomically on every change.

use std::collections::BTreeMap;
use std::io;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;
use tracing::debug;

use crate::error::{FailLoud, Result};
use crate::fsutil::write_atomic;

// == Pref Value ==
/// A single stored preference value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "value", rename_all = "snake_case")]
pub enum PrefValue {
    String(String),
    Int(i64),
    Double(f64),
    Bool(bool),
    StringList(Vec<String>),
}

impl PrefValue {
    pub fn type_name(&self) -> &'static str {
        match self {
            PrefValue::String(_) => "string",
            PrefValue::Int(_) => "int",
            PrefValue::Double(_) => "double",
            PrefValue::Bool(_) => "bool",
            PrefValue::StringList(_) => "string_list",
        }
    }

    pub fn into_string(self) -> std::result::Result<String, PrefValue> {
        match self {
            PrefValue::String(value) => Ok(value),
            other => Err(other),
        }
    }

    pub fn into_int(self) -> std::result::Result<i64, PrefValue> {
        match self {
            PrefValue::Int(value) => Ok(value),
            other => Err(other),
        }
    }

    /// Ints widen to doubles; nothing else converts.
    pub fn into_double(self) -> std::result::Result<f64, PrefValue> {
        match self {
            PrefValue::Double(value) => Ok(value),
            PrefValue::Int(value) => Ok(value as f64),
            other => Err(other),
        }
    }

    pub fn into_bool(self) -> std::result::Result<bool, PrefValue> {
        match self {
            PrefValue::Bool(value) => Ok(value),
            other => Err(other),
        }
    }

    pub fn into_string_list(self) -> std::result::Result<Vec<String>, PrefValue> {
        match self {
            PrefValue::StringList(value) => Ok(value),
            other => Err(other),
        }
    }
}

// == Backend Trait ==
/// Persistent flat key-value map.
#[async_trait]
pub trait PreferenceBackend: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<PrefValue>>;

    async fn set(&self, key: &str, value: PrefValue) -> Result<()>;

    /// Removes a key; returns whether it was present.
    async fn remove(&self, key: &str) -> Result<bool>;

    async fn keys(&self) -> Result<Vec<String>>;

    async fn clear(&self) -> Result<()>;
}

// == Memory Backend ==
/// Non-persistent backend.
#[derive(Debug, Default)]
pub struct MemoryPreferenceBackend {
    values: RwLock<BTreeMap<String, PrefValue>>,
}

impl MemoryPreferenceBackend {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl PreferenceBackend for MemoryPreferenceBackend {
    async fn get(&self, key: &str) -> Result<Option<PrefValue>> {
        Ok(self.values.read().await.get(key).cloned())
    }

    async fn set(&self, key: &str, value: PrefValue) -> Result<()> {
        self.values.write().await.insert(key.to_string(), value);
        Ok(())
    }

    async fn remove(&self, key: &str) -> Result<bool> {
        Ok(self.values.write().await.remove(key).is_some())
    }

    async fn keys(&self) -> Result<Vec<String>> {
        Ok(self.values.read().await.keys().cloned().collect())
    }

    async fn clear(&self) -> Result<()> {
        self.values.write().await.clear();
        Ok(())
    }
}

// == JSON File Backend ==
/// Backend persisted as one JSON document.
///
/// The map is loaded once on open and the whole file is rewritten through
/// a temp file and rename after each change. The in-memory map is only
/// updated once the write succeeded.
#[derive(Debug)]
pub struct JsonFilePreferenceBackend {
    path: PathBuf,
    values: RwLock<BTreeMap<String, PrefValue>>,
}

impl JsonFilePreferenceBackend {
    /// Opens the store at `path`; a missing file is an empty store.
    pub async fn open(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        let values = match tokio::fs::read(&path).await {
            Ok(bytes) => serde_json::from_slice(&bytes).storage_context("decode preferences file")?,
            Err(err) if err.kind() == io::ErrorKind::NotFound => BTreeMap::new(),
            Err(err) => return Err(err).storage_context("read preferences file"),
        };
        debug!(path = %path.display(), entries = values.len(), "Opened preferences file");
        Ok(Self {
            path,
            values: RwLock::new(values),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    async fn persist(&self, values: &BTreeMap<String, PrefValue>) -> Result<()> {
        let json = serde_json::to_vec_pretty(values).storage_context("encode preferences file")?;
        write_atomic(&self.path, &json)
            .await
            .storage_context("write preferences file")
    }
}

#[async_trait]
impl PreferenceBackend for JsonFilePreferenceBackend {
    async fn get(&self, key: &str) -> Result<Option<PrefValue>> {
        Ok(self.values.read().await.get(key).cloned())
    }

    async fn set(&self, key: &str, value: PrefValue) -> Result<()> {
        let mut values = self.values.write().await;
        let mut updated = values.clone();
        updated.insert(key.to_string(), value);
        self.persist(&updated).await?;
        *values = updated;
        Ok(())
    }

    async fn remove(&self, key: &str) -> Result<bool> {
        let mut values = self.values.write().await;
        if !values.contains_key(key) {
            return Ok(false);
        }
        let mut updated = values.clone();
        updated.remove(key);
        self.persist(&updated).await?;
        *values = updated;
        Ok(true)
    }

    async fn keys(&self) -> Result<Vec<String>> {
        Ok(self.values.read().await.keys().cloned().collect())
    }

    async fn clear(&self) -> Result<()> {
        let mut values = self.values.write().await;
        self.persist(&BTreeMap::new()).await?;
        values.clear();
        Ok(())
    }
}
