//! Cache Entry Module
//!
//! Defines cache categories, the sidecar metadata record and key hashing.

use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use chrono::Utc;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::error::AppError;

// == Cache Category ==
/// Physical namespace of a cache file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CacheCategory {
    Images,
    Data,
    Temp,
}

impl CacheCategory {
    pub const ALL: [CacheCategory; 3] = [CacheCategory::Images, CacheCategory::Data, CacheCategory::Temp];

    /// Directory name under the cache root.
    pub fn dir_name(&self) -> &'static str {
        match self {
            CacheCategory::Images => "images",
            CacheCategory::Data => "data",
            CacheCategory::Temp => "temp",
        }
    }

    /// Whether entries in this category carry sidecar metadata.
    pub fn has_metadata(&self) -> bool {
        !matches!(self, CacheCategory::Temp)
    }
}

impl fmt::Display for CacheCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.dir_name())
    }
}

impl FromStr for CacheCategory {
    type Err = AppError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "images" | "image" => Ok(CacheCategory::Images),
            "data" => Ok(CacheCategory::Data),
            "temp" => Ok(CacheCategory::Temp),
            other => Err(AppError::validation(format!(
                "unknown cache category '{}' (expected images, data or temp)",
                other
            ))),
        }
    }
}

// == Entry Kind ==
/// Kind of a hashed cache entry, recorded as `type` in the sidecar.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EntryKind {
    Image,
    Data,
}

impl EntryKind {
    pub fn category(&self) -> CacheCategory {
        match self {
            EntryKind::Image => CacheCategory::Images,
            EntryKind::Data => CacheCategory::Data,
        }
    }
}

// == Cache Metadata ==
/// Sidecar record stored next to every image and data payload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheMetadata {
    /// Logical identifier the entry was cached under (URL or data key)
    #[serde(alias = "url", alias = "key")]
    pub identifier: String,
    /// Payload size in bytes
    pub size: u64,
    /// Write time (Unix milliseconds)
    pub cached_at: i64,
    #[serde(rename = "type")]
    pub kind: EntryKind,
}

impl CacheMetadata {
    // == Constructor ==
    /// Creates metadata stamped with the current time.
    pub fn new(identifier: &str, size: u64, kind: EntryKind) -> Self {
        Self {
            identifier: identifier.to_string(),
            size,
            cached_at: now_millis(),
            kind,
        }
    }

    // == Is Expired ==
    /// Checks whether the entry is older than `max_age`.
    pub fn is_expired(&self, max_age: Duration) -> bool {
        self.is_expired_at(now_millis(), max_age)
    }

    /// Checks expiry against an explicit clock reading (Unix milliseconds).
    ///
    /// An entry is expired once its age strictly exceeds `max_age`.
    pub fn is_expired_at(&self, now_ms: i64, max_age: Duration) -> bool {
        let limit = i64::try_from(max_age.as_millis()).unwrap_or(i64::MAX);
        self.age_ms(now_ms) > limit
    }

    /// Age in milliseconds; never negative, even if the clock went backwards.
    pub fn age_ms(&self, now_ms: i64) -> i64 {
        (now_ms - self.cached_at).max(0)
    }
}

// == Utility Functions ==
/// Derives the cache key for a logical identifier: lowercase hex SHA-256.
pub fn cache_key(identifier: &str) -> String {
    format!("{:x}", Sha256::digest(identifier.as_bytes()))
}

/// Returns current Unix timestamp in milliseconds.
pub fn now_millis() -> i64 {
    Utc::now().timestamp_millis()
}

// == Unit Tests ==
#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cache_key_deterministic() {
        let a = cache_key("https://example.com/a.png");
        let b = cache_key("https://example.com/a.png");
        assert_eq!(a, b);
        assert_eq!(a.len(), 64);
        assert!(a.chars().all(|c| c.is_ascii_hexdigit() && !c.is_ascii_uppercase()));
    }

    #[test]
    fn test_cache_key_different_identifiers() {
        assert_ne!(cache_key("user_profile"), cache_key("user_settings"));
    }

    #[test]
    fn test_cache_key_known_vector() {
        assert_eq!(
            cache_key("abc"),
            "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
        );
    }

    #[test]
    fn test_metadata_json_layout() {
        let meta = CacheMetadata {
            identifier: "feed".to_string(),
            size: 12,
            cached_at: 1_700_000_000_000,
            kind: EntryKind::Data,
        };
        let json = serde_json::to_value(&meta).unwrap();
        assert_eq!(json["identifier"], "feed");
        assert_eq!(json["size"], 12);
        assert_eq!(json["cached_at"], 1_700_000_000_000i64);
        assert_eq!(json["type"], "data");
    }

    #[test]
    fn test_metadata_accepts_legacy_identifier_names() {
        let from_url: CacheMetadata = serde_json::from_str(
            r#"{"url":"https://x/y.png","size":3,"cached_at":1,"type":"image"}"#,
        )
        .unwrap();
        assert_eq!(from_url.identifier, "https://x/y.png");
        assert_eq!(from_url.kind, EntryKind::Image);

        let from_key: CacheMetadata =
            serde_json::from_str(r#"{"key":"k","size":3,"cached_at":1,"type":"data"}"#).unwrap();
        assert_eq!(from_key.identifier, "k");
    }

    #[test]
    fn test_fresh_entry_not_expired() {
        let meta = CacheMetadata::new("k", 1, EntryKind::Data);
        assert!(!meta.is_expired(Duration::from_secs(60)));
    }

    #[test]
    fn test_expiration_boundary_condition() {
        let meta = CacheMetadata {
            identifier: "k".to_string(),
            size: 1,
            cached_at: 1_000,
            kind: EntryKind::Data,
        };
        let max_age = Duration::from_millis(500);

        assert!(!meta.is_expired_at(1_500, max_age), "age == max_age is still fresh");
        assert!(meta.is_expired_at(1_501, max_age));
    }

    #[test]
    fn test_age_never_negative() {
        let meta = CacheMetadata {
            identifier: "k".to_string(),
            size: 1,
            cached_at: 10_000,
            kind: EntryKind::Image,
        };
        assert_eq!(meta.age_ms(5_000), 0);
    }

    #[test]
    fn test_huge_max_age_never_expires() {
        let meta = CacheMetadata {
            identifier: "k".to_string(),
            size: 1,
            cached_at: 0,
            kind: EntryKind::Data,
        };
        assert!(!meta.is_expired_at(i64::MAX, Duration::from_secs(u64::MAX)));
        assert!(!CacheMetadata::new("k", 1, EntryKind::Data).is_expired(Duration::MAX));
    }

    #[test]
    fn test_category_parse() {
        assert_eq!("images".parse::<CacheCategory>().unwrap(), CacheCategory::Images);
        assert_eq!("IMAGE".parse::<CacheCategory>().unwrap(), CacheCategory::Images);
        assert_eq!("temp".parse::<CacheCategory>().unwrap(), CacheCategory::Temp);
        assert!("videos".parse::<CacheCategory>().is_err());
    }

    #[test]
    fn test_temp_has_no_metadata() {
        assert!(CacheCategory::Images.has_metadata());
        assert!(CacheCategory::Data.has_metadata());
        assert!(!CacheCategory::Temp.has_metadata());
    }
}
