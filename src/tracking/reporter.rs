//! Crash reporting sink

use std::sync::Arc;

use parking_lot::Mutex;
use tracing::{error, warn};

/// External crash-reporting service.
pub trait CrashReporter: Send + Sync {
    fn record_error(
        &self,
        error: &str,
        stack_trace: Option<&str>,
        reason: &str,
        context: &str,
        fatal: bool,
    );
}

/// Reporter that only writes to the log.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingCrashReporter;

impl CrashReporter for TracingCrashReporter {
    fn record_error(
        &self,
        error: &str,
        stack_trace: Option<&str>,
        reason: &str,
        context: &str,
        fatal: bool,
    ) {
        if fatal {
            error!(reason, context, stack_trace, "Crash report (fatal): {}", error);
        } else {
            warn!(reason, context, stack_trace, "Crash report: {}", error);
        }
    }
}

/// One call received by a [`RecordingCrashReporter`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CrashRecord {
    pub error: String,
    pub reason: String,
    pub context: String,
    pub fatal: bool,
}

/// Reporter that keeps every call in memory, for embedding and tests.
#[derive(Debug, Default, Clone)]
pub struct RecordingCrashReporter {
    records: Arc<Mutex<Vec<CrashRecord>>>,
}

impl RecordingCrashReporter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn records(&self) -> Vec<CrashRecord> {
        self.records.lock().clone()
    }
}

impl CrashReporter for RecordingCrashReporter {
    fn record_error(
        &self,
        error: &str,
        _stack_trace: Option<&str>,
        reason: &str,
        context: &str,
        fatal: bool,
    ) {
        self.records.lock().push(CrashRecord {
            error: error.to_string(),
            reason: reason.to_string(),
            context: context.to_string(),
            fatal,
        });
    }
}
