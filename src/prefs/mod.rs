//! Preferences Module
//!
//! Typed, fail-loud key-value storage for small application settings.

mod backend;
mod shared_prefs;

pub use backend::{JsonFilePreferenceBackend, MemoryPreferenceBackend, PrefValue, PreferenceBackend};
pub use shared_prefs::{keys, SharedPrefs, UserPreferences, DEFAULT_LANGUAGE_CODE, DEFAULT_THEME_MODE};
