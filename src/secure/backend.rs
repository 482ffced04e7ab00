//! Secret backends
//!
//! A [`SecretBackend`] holds string secrets. The file backend seals the
//! whole map with XChaCha20-Poly1305 under a key derived by HKDF-SHA256
//! from the passphrase and a per-file random salt.
//!
//! On-disk layout: 16-byte salt, 24-byte nonce, then ciphertext and tag.
//! The salt is fixed for the life of the file; a fresh nonce is drawn on
//! every write.

use std::collections::BTreeMap;
use std::fmt;
use std::io;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use chacha20poly1305::aead::rand_core::RngCore;
use chacha20poly1305::aead::{Aead, AeadCore, KeyInit, OsRng};
use chacha20poly1305::{XChaCha20Poly1305, XNonce};
use hkdf::Hkdf;
use sha2::Sha256;
use tokio::sync::RwLock;
use tracing::debug;

use crate::error::{AppError, FailLoud, Result};
use crate::fsutil::write_atomic;

/// XChaCha20 nonce length in bytes
pub const NONCE_SIZE: usize = 24;

/// Key derivation salt length in bytes
pub const SALT_SIZE: usize = 16;

const HEADER_SIZE: usize = SALT_SIZE + NONCE_SIZE;

/// HKDF info label binding derived keys to this file format
const KEY_INFO: &[u8] = b"app-storage-secure-store-v1";

// == Backend Trait ==
/// Encrypted string store.
#[async_trait]
pub trait SecretBackend: Send + Sync {
    async fn read(&self, key: &str) -> Result<Option<String>>;

    async fn write(&self, key: &str, value: &str) -> Result<()>;

    /// Deletes a key; returns whether it was present.
    async fn delete(&self, key: &str) -> Result<bool>;

    async fn delete_all(&self) -> Result<()>;

    async fn keys(&self) -> Result<Vec<String>>;
}

// == Memory Backend ==
/// Non-persistent backend; secrets live only for the process lifetime.
#[derive(Default)]
pub struct MemorySecretBackend {
    values: RwLock<BTreeMap<String, String>>,
}

impl MemorySecretBackend {
    pub fn new() -> Self {
        Self::default()
    }
}

impl fmt::Debug for MemorySecretBackend {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MemorySecretBackend").finish_non_exhaustive()
    }
}

#[async_trait]
impl SecretBackend for MemorySecretBackend {
    async fn read(&self, key: &str) -> Result<Option<String>> {
        Ok(self.values.read().await.get(key).cloned())
    }

    async fn write(&self, key: &str, value: &str) -> Result<()> {
        self.values
            .write()
            .await
            .insert(key.to_string(), value.to_string());
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<bool> {
        Ok(self.values.write().await.remove(key).is_some())
    }

    async fn delete_all(&self) -> Result<()> {
        self.values.write().await.clear();
        Ok(())
    }

    async fn keys(&self) -> Result<Vec<String>> {
        Ok(self.values.read().await.keys().cloned().collect())
    }
}

// == Encrypted File Backend ==
/// Secrets sealed in one file under a passphrase-derived key.
pub struct EncryptedFileSecretBackend {
    path: PathBuf,
    salt: [u8; SALT_SIZE],
    cipher: XChaCha20Poly1305,
    values: RwLock<BTreeMap<String, String>>,
}

impl fmt::Debug for EncryptedFileSecretBackend {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EncryptedFileSecretBackend")
            .field("path", &self.path)
            .finish_non_exhaustive()
    }
}

impl EncryptedFileSecretBackend {
    /// Opens the sealed store at `path`; a missing file is an empty store.
    ///
    /// Fails if the file exists but cannot be opened with `passphrase`.
    pub async fn open(path: impl Into<PathBuf>, passphrase: &str) -> Result<Self> {
        if passphrase.is_empty() {
            return Err(AppError::validation("secure store passphrase must not be empty"));
        }
        let path = path.into();

        let (salt, cipher, values) = match tokio::fs::read(&path).await {
            Ok(sealed) => {
                let salt = read_salt(&sealed)?;
                let cipher = derive_cipher(passphrase, &salt)?;
                let values = unseal(&cipher, &sealed)?;
                (salt, cipher, values)
            }
            Err(err) if err.kind() == io::ErrorKind::NotFound => {
                let mut salt = [0u8; SALT_SIZE];
                OsRng.fill_bytes(&mut salt);
                let cipher = derive_cipher(passphrase, &salt)?;
                (salt, cipher, BTreeMap::new())
            }
            Err(err) => return Err(err).storage_context("read secure store"),
        };
        debug!(path = %path.display(), entries = values.len(), "Opened secure store");

        Ok(Self {
            path,
            salt,
            cipher,
            values: RwLock::new(values),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    async fn persist(&self, values: &BTreeMap<String, String>) -> Result<()> {
        let sealed = seal(&self.cipher, &self.salt, values)?;
        write_atomic(&self.path, &sealed)
            .await
            .storage_context("write secure store")
    }

    async fn update<F>(&self, change: F) -> Result<bool>
    where
        F: FnOnce(&mut BTreeMap<String, String>) -> bool,
    {
        let mut values = self.values.write().await;
        let mut updated = values.clone();
        if !change(&mut updated) {
            return Ok(false);
        }
        self.persist(&updated).await?;
        *values = updated;
        Ok(true)
    }
}

#[async_trait]
impl SecretBackend for EncryptedFileSecretBackend {
    async fn read(&self, key: &str) -> Result<Option<String>> {
        Ok(self.values.read().await.get(key).cloned())
    }

    async fn write(&self, key: &str, value: &str) -> Result<()> {
        self.update(|values| {
            values.insert(key.to_string(), value.to_string());
            true
        })
        .await
        .map(|_| ())
    }

    async fn delete(&self, key: &str) -> Result<bool> {
        self.update(|values| values.remove(key).is_some()).await
    }

    async fn delete_all(&self) -> Result<()> {
        self.update(|values| {
            values.clear();
            true
        })
        .await
        .map(|_| ())
    }

    async fn keys(&self) -> Result<Vec<String>> {
        Ok(self.values.read().await.keys().cloned().collect())
    }
}

/// HKDF-SHA256 over the passphrase, salted per file.
fn derive_cipher(passphrase: &str, salt: &[u8; SALT_SIZE]) -> Result<XChaCha20Poly1305> {
    let mut key = [0u8; 32];
    Hkdf::<Sha256>::new(Some(&salt[..]), passphrase.as_bytes())
        .expand(KEY_INFO, &mut key)
        .map_err(|_| AppError::storage("derive secure store key"))?;
    XChaCha20Poly1305::new_from_slice(&key).map_err(|_| AppError::storage("derive secure store key"))
}

fn read_salt(sealed: &[u8]) -> Result<[u8; SALT_SIZE]> {
    if sealed.len() < HEADER_SIZE {
        return Err(AppError::storage(format!(
            "secure store truncated: {} bytes",
            sealed.len()
        )));
    }
    let mut salt = [0u8; SALT_SIZE];
    salt.copy_from_slice(&sealed[..SALT_SIZE]);
    Ok(salt)
}

fn seal(
    cipher: &XChaCha20Poly1305,
    salt: &[u8; SALT_SIZE],
    values: &BTreeMap<String, String>,
) -> Result<Vec<u8>> {
    let plaintext = serde_json::to_vec(values).storage_context("encode secure store")?;
    let nonce = XChaCha20Poly1305::generate_nonce(&mut OsRng);
    let ciphertext = cipher
        .encrypt(&nonce, plaintext.as_slice())
        .map_err(|_| AppError::storage("encrypt secure store"))?;

    let mut sealed = Vec::with_capacity(HEADER_SIZE + ciphertext.len());
    sealed.extend_from_slice(salt);
    sealed.extend_from_slice(&nonce);
    sealed.extend_from_slice(&ciphertext);
    Ok(sealed)
}

fn unseal(cipher: &XChaCha20Poly1305, sealed: &[u8]) -> Result<BTreeMap<String, String>> {
    if sealed.len() < HEADER_SIZE {
        return Err(AppError::storage(format!(
            "secure store truncated: {} bytes",
            sealed.len()
        )));
    }
    let (nonce, ciphertext) = sealed[SALT_SIZE..].split_at(NONCE_SIZE);
    let plaintext = cipher
        .decrypt(XNonce::from_slice(nonce), ciphertext)
        .map_err(|_| AppError::storage("decrypt secure store: wrong passphrase or corrupted file"))?;
    serde_json::from_slice(&plaintext).storage_context("decode secure store")
}
