//! Secure Store Module
//!
//! Encrypted storage for tokens, identifiers and other secrets.

mod backend;
mod secure_storage;

pub use backend::{EncryptedFileSecretBackend, MemorySecretBackend, SecretBackend, NONCE_SIZE};
pub use secure_storage::{keys, SecureStorage};
