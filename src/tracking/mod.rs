//! Error Tracking Module
//!
//! Records classified failures, aggregates their frequency and forwards
//! severe ones to a crash reporter.

mod event;
mod reporter;
mod tracker;

pub use event::{ErrorEvent, ErrorReport, Severity};
pub use reporter::{CrashRecord, CrashReporter, RecordingCrashReporter, TracingCrashReporter};
pub use tracker::{
    ErrorFrequency, ErrorStats, ErrorTracker, TrackerConfig, DEFAULT_CAPACITY,
    DEFAULT_FREQUENCY_THRESHOLD,
};
