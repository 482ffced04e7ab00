//! Error types for the storage layer
//!
//! Provides the failure taxonomy shared by every layer, plus the two
//! combinators that encode the read/write failure policy:
//! [`FailLoud`] wraps errors as storage failures, [`FailOpen`] turns them
//! into misses.

use std::fmt;

use serde_json::Value;
use thiserror::Error;
use tracing::debug;

// == Error Kind ==
/// Classification of a failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// Connectivity failure before a response was received
    Network,
    /// Server answered with an HTTP error status
    Server { status: u16 },
    /// Payload could not be decoded
    Parse,
    /// Authentication or authorization failure
    Auth,
    /// Business rule or input validation failure
    Validation,
    /// Local storage failure (cache, preferences, secrets)
    Storage,
    /// Anything else
    Unknown,
}

impl ErrorKind {
    /// Short lowercase name, used as the error type in tracking keys.
    pub fn name(&self) -> &'static str {
        match self {
            ErrorKind::Network => "network",
            ErrorKind::Server { .. } => "server",
            ErrorKind::Parse => "parse",
            ErrorKind::Auth => "auth",
            ErrorKind::Validation => "validation",
            ErrorKind::Storage => "storage",
            ErrorKind::Unknown => "unknown",
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ErrorKind::Server { status } => write!(f, "server ({})", status),
            other => f.write_str(other.name()),
        }
    }
}

// == App Error ==
/// Unified error type for the storage layer.
#[derive(Error, Debug, Clone, PartialEq)]
#[error("{kind} error: {message}")]
pub struct AppError {
    pub kind: ErrorKind,
    pub message: String,
    pub code: Option<String>,
    pub details: Option<Value>,
}

impl AppError {
    // == Constructors ==
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            code: None,
            details: None,
        }
    }

    pub fn network(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Network, message)
    }

    /// Creates an HTTP error from a response status code.
    pub fn server(status: u16, message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Server { status }, message)
    }

    pub fn parse(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Parse, message)
    }

    pub fn auth(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Auth, message)
    }

    pub fn validation(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Validation, message)
    }

    pub fn storage(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Storage, message)
    }

    pub fn unknown(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Unknown, message)
    }

    pub fn with_code(mut self, code: impl Into<String>) -> Self {
        self.code = Some(code.into());
        self
    }

    pub fn with_details(mut self, details: Value) -> Self {
        self.details = Some(details);
        self
    }

    // == Classification ==
    /// Machine-readable code: the explicit one if set, otherwise a per-kind default.
    pub fn code(&self) -> String {
        if let Some(code) = &self.code {
            return code.clone();
        }
        match self.kind {
            ErrorKind::Network => "NETWORK_ERROR".to_string(),
            ErrorKind::Server { status } => format!("HTTP_{}", status),
            ErrorKind::Parse => "PARSE_ERROR".to_string(),
            ErrorKind::Auth => "AUTH_ERROR".to_string(),
            ErrorKind::Validation => "VALIDATION_ERROR".to_string(),
            ErrorKind::Storage => "STORAGE_ERROR".to_string(),
            ErrorKind::Unknown => "UNKNOWN_ERROR".to_string(),
        }
    }

    /// HTTP status code for server errors.
    pub fn status_code(&self) -> Option<u16> {
        match self.kind {
            ErrorKind::Server { status } => Some(status),
            _ => None,
        }
    }

    /// Whether repeating the failed operation may succeed.
    ///
    /// Network errors are always retryable. Server errors are retryable
    /// for 5xx, 408 (request timeout) and 429 (too many requests).
    pub fn is_retryable(&self) -> bool {
        match self.kind {
            ErrorKind::Network => true,
            ErrorKind::Server { status } => {
                (500..=599).contains(&status) || status == 408 || status == 429
            }
            _ => false,
        }
    }

    /// Human-readable message suitable for showing to an end user.
    pub fn user_message(&self) -> String {
        match self.kind {
            ErrorKind::Network => {
                "Unable to connect. Please check your internet connection.".to_string()
            }
            ErrorKind::Server { status } => match status {
                400 => "The request was invalid.".to_string(),
                401 => "Your session has expired. Please sign in again.".to_string(),
                403 => "You don't have permission to perform this action.".to_string(),
                404 => "The requested resource was not found.".to_string(),
                408 => "The request timed out. Please try again.".to_string(),
                429 => "Too many requests. Please wait a moment and try again.".to_string(),
                500..=599 => "The server encountered an error. Please try again later.".to_string(),
                other => format!("Something went wrong (HTTP {}).", other),
            },
            ErrorKind::Parse => "We received an unexpected response.".to_string(),
            ErrorKind::Auth => "Authentication failed. Please sign in again.".to_string(),
            ErrorKind::Validation => self.message.clone(),
            ErrorKind::Storage => "Unable to access local storage.".to_string(),
            ErrorKind::Unknown => "An unexpected error occurred.".to_string(),
        }
    }

    /// Rewraps this error as a storage failure of the named operation.
    pub fn into_storage(self, operation: &str) -> Self {
        Self {
            kind: ErrorKind::Storage,
            message: format!("{}: {}", operation, self.message),
            code: self.code,
            details: self.details,
        }
    }
}

impl From<std::io::Error> for AppError {
    fn from(err: std::io::Error) -> Self {
        AppError::storage(err.to_string())
    }
}

impl From<serde_json::Error> for AppError {
    fn from(err: serde_json::Error) -> Self {
        AppError::parse(err.to_string())
    }
}

// == Result Type Alias ==
/// Convenience Result type for the storage layer.
pub type Result<T> = std::result::Result<T, AppError>;

// == Failure Policy Combinators ==
/// Fail-loud policy: any error becomes a storage failure carrying the operation name.
pub trait FailLoud<T> {
    fn storage_context(self, operation: &str) -> Result<T>;
}

impl<T, E> FailLoud<T> for std::result::Result<T, E>
where
    E: Into<AppError>,
{
    fn storage_context(self, operation: &str) -> Result<T> {
        self.map_err(|err| err.into().into_storage(operation))
    }
}

/// Fail-open policy: any error is logged and treated as absent.
pub trait FailOpen<T> {
    fn or_miss(self, operation: &str) -> Option<T>;
}

impl<T, E> FailOpen<T> for std::result::Result<T, E>
where
    E: fmt::Display,
{
    fn or_miss(self, operation: &str) -> Option<T> {
        match self {
            Ok(value) => Some(value),
            Err(err) => {
                debug!(operation, error = %err, "treating failure as miss");
                None
            }
        }
    }
}
