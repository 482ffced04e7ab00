//! Tracked error events

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::AppError;

// == Severity ==
/// Ordered from least to most severe.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Low,
    Medium,
    High,
    Critical,
}

impl Severity {
    pub const ALL: [Severity; 4] = [
        Severity::Low,
        Severity::Medium,
        Severity::High,
        Severity::Critical,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Severity::Low => "low",
            Severity::Medium => "medium",
            Severity::High => "high",
            Severity::Critical => "critical",
        }
    }
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Severity {
    type Err = AppError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "low" => Ok(Severity::Low),
            "medium" => Ok(Severity::Medium),
            "high" => Ok(Severity::High),
            "critical" => Ok(Severity::Critical),
            other => Err(AppError::validation(format!("unknown severity '{}'", other))),
        }
    }
}

// == Error Event ==
/// One recorded failure.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorEvent {
    pub error: String,
    pub error_type: String,
    pub stack_trace: Option<String>,
    pub context: String,
    pub user_id: Option<String>,
    pub metadata: BTreeMap<String, Value>,
    pub severity: Severity,
    pub timestamp: DateTime<Utc>,
    pub app_version: String,
    pub environment: String,
}

impl ErrorEvent {
    /// Frequency key, `error_type:context`.
    pub fn key(&self) -> String {
        format!("{}:{}", self.error_type, self.context)
    }
}

// == Error Report ==
/// Builder for events that do not originate from an [`AppError`].
#[derive(Debug, Clone)]
pub struct ErrorReport {
    pub(crate) error: String,
    pub(crate) error_type: String,
    pub(crate) context: String,
    pub(crate) severity: Severity,
    pub(crate) stack_trace: Option<String>,
    pub(crate) metadata: BTreeMap<String, Value>,
}

impl ErrorReport {
    pub fn new(error_type: impl Into<String>, error: impl Into<String>) -> Self {
        Self {
            error: error.into(),
            error_type: error_type.into(),
            context: "unknown".to_string(),
            severity: Severity::Medium,
            stack_trace: None,
            metadata: BTreeMap::new(),
        }
    }

    /// Starts a report from a classified error, copying its code into metadata.
    pub fn from_error(error: &AppError) -> Self {
        Self::new(error.kind.name(), error.message.clone()).with_metadata("code", error.code())
    }

    pub fn context(mut self, context: impl Into<String>) -> Self {
        self.context = context.into();
        self
    }

    pub fn severity(mut self, severity: Severity) -> Self {
        self.severity = severity;
        self
    }

    pub fn stack_trace(mut self, trace: impl Into<String>) -> Self {
        self.stack_trace = Some(trace.into());
        self
    }

    pub fn with_metadata(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }
}
