//! Property-Based Tests for Cache Module
//!
//! Uses proptest to check round-trip, key derivation and the eviction bound
//! against a real temporary directory.

use proptest::prelude::*;
use serde_json::{Map, Value};
use std::path::Path;
use std::time::{Duration, UNIX_EPOCH};

use crate::cache::{cache_key, FileCache, FileCacheConfig};

// == Test Helpers ==
fn runtime() -> tokio::runtime::Runtime {
    tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .unwrap()
}

fn set_mtime(path: &Path, secs_after_epoch: u64) {
    let file = std::fs::File::options().write(true).open(path).unwrap();
    file.set_modified(UNIX_EPOCH + Duration::from_secs(secs_after_epoch))
        .unwrap();
}

// == Strategies ==
/// Generates logical identifiers (URLs, keys, anything printable)
fn identifier_strategy() -> impl Strategy<Value = String> {
    "[ -~]{1,80}"
}

/// Generates JSON objects without floats so equality is exact
fn document_strategy() -> impl Strategy<Value = Value> {
    let leaf = prop_oneof![
        any::<i64>().prop_map(Value::from),
        any::<bool>().prop_map(Value::from),
        "[a-zA-Z0-9 ]{0,32}".prop_map(Value::from),
        Just(Value::Null),
    ];
    prop::collection::btree_map("[a-z_]{1,12}", leaf, 0..8)
        .prop_map(|fields| Value::Object(fields.into_iter().collect::<Map<_, _>>()))
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(32))]

    // Caching a document and reading it back returns an equal document.
    #[test]
    fn prop_data_roundtrip(identifier in identifier_strategy(), document in document_strategy()) {
        let dir = tempfile::tempdir().unwrap();
        runtime().block_on(async {
            let cache = FileCache::init(dir.path(), FileCacheConfig::default()).await.unwrap();

            prop_assert!(cache.cache_data(&identifier, &document).await.is_some());
            prop_assert!(cache.is_data_cached(&identifier).await);
            prop_assert_eq!(cache.get_cached_data(&identifier).await, Some(document.clone()));
            Ok(())
        })?;
    }

    // Keys are stable 64-character lowercase hex digests.
    #[test]
    fn prop_cache_key_stable(identifier in identifier_strategy()) {
        let key = cache_key(&identifier);
        prop_assert_eq!(key.len(), 64);
        prop_assert!(key.chars().all(|c| matches!(c, '0'..='9' | 'a'..='f')));
        prop_assert_eq!(key, cache_key(&identifier));
    }

    // After cleanup the cache fits the bound, and only the newest entries survive.
    #[test]
    fn prop_eviction_bound(
        sizes in prop::collection::vec(1usize..2048, 1..12),
        limit_fraction in 0.0f64..1.0,
    ) {
        let dir = tempfile::tempdir().unwrap();
        let total: usize = sizes.iter().sum();
        let limit = (total as f64 * limit_fraction) as u64;

        runtime().block_on(async {
            let cache = FileCache::init(dir.path(), FileCacheConfig::default()).await.unwrap();

            let mut paths = Vec::new();
            for (i, size) in sizes.iter().enumerate() {
                let path = cache.cache_image(&format!("img-{}", i), &vec![7u8; *size]).await.unwrap();
                set_mtime(&path, 1_000 + i as u64);
                paths.push(path);
            }

            cache.cleanup_cache_if_needed(Some(limit)).await;
            prop_assert!(cache.get_cache_size().await <= limit);

            // Survivors form a suffix of the insertion (mtime) order.
            let survivors: Vec<bool> = paths.iter().map(|p| p.exists()).collect();
            if let Some(first_kept) = survivors.iter().position(|kept| *kept) {
                prop_assert!(survivors[first_kept..].iter().all(|kept| *kept));
            }
            Ok(())
        })?;
    }
}
