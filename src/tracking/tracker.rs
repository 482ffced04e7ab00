//! In-memory error tracker
//!
//! Keeps the most recent events in a bounded ring buffer and counts how
//! often each `error_type:context` key occurs. Events at or above
//! [`Severity::High`] are forwarded to the crash reporter.

use std::collections::{BTreeMap, HashMap, VecDeque};
use std::sync::Arc;

use chrono::{Duration, Utc};
use parking_lot::Mutex;
use serde::Serialize;
use tracing::{debug, error, info, warn};

use crate::error::AppError;
use crate::tracking::{CrashReporter, ErrorEvent, ErrorReport, Severity, TracingCrashReporter};

pub const DEFAULT_CAPACITY: usize = 100;
pub const DEFAULT_FREQUENCY_THRESHOLD: u64 = 5;
const TOP_ERRORS: usize = 5;

// == Tracker Config ==
#[derive(Debug, Clone)]
pub struct TrackerConfig {
    /// Ring buffer capacity
    pub capacity: usize,
    /// A key counted more often than this logs a warning
    pub frequency_threshold: u64,
    pub app_version: String,
    pub environment: String,
}

impl Default for TrackerConfig {
    fn default() -> Self {
        Self {
            capacity: DEFAULT_CAPACITY,
            frequency_threshold: DEFAULT_FREQUENCY_THRESHOLD,
            app_version: env!("CARGO_PKG_VERSION").to_string(),
            environment: "development".to_string(),
        }
    }
}

// == Stats ==
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ErrorFrequency {
    pub key: String,
    pub count: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ErrorStats {
    pub total: usize,
    pub last_hour: usize,
    pub last_24h: usize,
    pub by_severity: BTreeMap<Severity, usize>,
    pub top_errors: Vec<ErrorFrequency>,
}

#[derive(Debug, Default)]
struct TrackerState {
    events: VecDeque<ErrorEvent>,
    frequency: HashMap<String, u64>,
    user_id: Option<String>,
}

// == Error Tracker ==
pub struct ErrorTracker {
    config: TrackerConfig,
    reporter: Arc<dyn CrashReporter>,
    state: Mutex<TrackerState>,
}

impl std::fmt::Debug for ErrorTracker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ErrorTracker")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl Default for ErrorTracker {
    fn default() -> Self {
        Self::new(TrackerConfig::default(), Arc::new(TracingCrashReporter))
    }
}

impl ErrorTracker {
    pub fn new(config: TrackerConfig, reporter: Arc<dyn CrashReporter>) -> Self {
        let capacity = config.capacity.max(1);
        Self {
            config: TrackerConfig { capacity, ..config },
            reporter,
            state: Mutex::new(TrackerState {
                events: VecDeque::with_capacity(capacity),
                ..TrackerState::default()
            }),
        }
    }

    pub fn config(&self) -> &TrackerConfig {
        &self.config
    }

    /// Attaches a user id to subsequent events.
    pub fn set_user_id(&self, user_id: Option<String>) {
        self.state.lock().user_id = user_id;
    }

    /// Records a classified error.
    pub fn track_error(&self, err: &AppError, context: &str, severity: Severity) -> ErrorEvent {
        self.record(ErrorReport::from_error(err).context(context).severity(severity))
    }

    /// Records an event and returns it as stored.
    pub fn record(&self, report: ErrorReport) -> ErrorEvent {
        let (event, count) = {
            let mut state = self.state.lock();
            let event = ErrorEvent {
                error: report.error,
                error_type: report.error_type,
                stack_trace: report.stack_trace,
                context: report.context,
                user_id: state.user_id.clone(),
                metadata: report.metadata,
                severity: report.severity,
                timestamp: Utc::now(),
                app_version: self.config.app_version.clone(),
                environment: self.config.environment.clone(),
            };

            if state.events.len() == self.config.capacity {
                state.events.pop_front();
            }
            state.events.push_back(event.clone());

            let count = state.frequency.entry(event.key()).or_insert(0);
            *count += 1;
            (event, *count)
        };

        log_event(&event);

        if count > self.config.frequency_threshold {
            warn!(key = %event.key(), count, "Frequent error");
        }

        if event.severity >= Severity::High {
            let reason = format!("{} error", event.error_type);
            self.reporter.record_error(
                &event.error,
                event.stack_trace.as_deref(),
                &reason,
                &event.context,
                event.severity == Severity::Critical,
            );
        }

        event
    }

    /// Aggregates the buffered events.
    pub fn stats(&self) -> ErrorStats {
        let state = self.state.lock();
        let now = Utc::now();
        let hour_ago = now - Duration::hours(1);
        let day_ago = now - Duration::hours(24);

        let mut by_severity: BTreeMap<Severity, usize> =
            Severity::ALL.iter().map(|s| (*s, 0)).collect();
        let mut last_hour = 0;
        let mut last_24h = 0;
        for event in &state.events {
            *by_severity.entry(event.severity).or_insert(0) += 1;
            if event.timestamp > hour_ago {
                last_hour += 1;
            }
            if event.timestamp > day_ago {
                last_24h += 1;
            }
        }

        let mut top_errors: Vec<ErrorFrequency> = state
            .frequency
            .iter()
            .map(|(key, count)| ErrorFrequency {
                key: key.clone(),
                count: *count,
            })
            .collect();
        top_errors.sort_by(|a, b| b.count.cmp(&a.count).then_with(|| a.key.cmp(&b.key)));
        top_errors.truncate(TOP_ERRORS);

        ErrorStats {
            total: state.events.len(),
            last_hour,
            last_24h,
            by_severity,
            top_errors,
        }
    }

    /// Buffered events, oldest first.
    pub fn recent_events(&self) -> Vec<ErrorEvent> {
        self.state.lock().events.iter().cloned().collect()
    }

    pub fn frequency(&self, key: &str) -> u64 {
        self.state.lock().frequency.get(key).copied().unwrap_or(0)
    }

    /// Drops buffered events and counters.
    pub fn clear(&self) {
        let mut state = self.state.lock();
        state.events.clear();
        state.frequency.clear();
    }
}

fn log_event(event: &ErrorEvent) {
    let key = event.key();
    match event.severity {
        Severity::Low => debug!(key = %key, "{}", event.error),
        Severity::Medium => info!(key = %key, "{}", event.error),
        Severity::High => warn!(key = %key, "{}", event.error),
        Severity::Critical => error!(key = %key, "{}", event.error),
    }
}
