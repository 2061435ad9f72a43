//! Property-Based Tests for Cache Module
//!
//! Uses proptest to check fetch counting, hit correctness and error
//! handling over arbitrary sequences of cache operations.

use proptest::prelude::*;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use parking_lot::Mutex;

use crate::cache::Cache;
use crate::error::CacheError;

// == Strategies ==
/// Generates keys from a small alphabet so sequences revisit keys often
fn key_strategy() -> impl Strategy<Value = String> {
    "[a-f]{1,2}".prop_map(|s| s)
}

/// Generates a sequence of cache operations for testing
#[derive(Debug, Clone)]
enum CacheOp {
    Get { key: String },
    Update { key: String },
    Clear,
}

fn cache_op_strategy() -> impl Strategy<Value = CacheOp> {
    prop_oneof![
        6 => key_strategy().prop_map(|key| CacheOp::Get { key }),
        2 => key_strategy().prop_map(|key| CacheOp::Update { key }),
        1 => Just(CacheOp::Clear),
    ]
}

// == Helpers ==
fn runtime() -> tokio::runtime::Runtime {
    tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .unwrap()
}

/// Keys starting with `f` always fail to fetch.
fn fails(key: &str) -> bool {
    key.starts_with('f')
}

/// Cache that records every fetched key.
fn recording_cache() -> (Cache<String>, Arc<Mutex<Vec<String>>>) {
    let fetched = Arc::new(Mutex::new(Vec::new()));
    let log = fetched.clone();
    let cache = Cache::new(move |key: String| {
        log.lock().push(key.clone());
        async move {
            if fails(&key) {
                Err(anyhow::anyhow!("no value for {key}"))
            } else {
                Ok(key.to_uppercase())
            }
        }
    });
    (cache, fetched)
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(100))]

    // A key is fetched on its first get and never again until cleared or
    // updated; every successful get returns the fetched value.
    #[test]
    fn prop_hits_never_refetch(ops in prop::collection::vec(cache_op_strategy(), 1..60)) {
        let (cache, fetched) = recording_cache();
        let mut cached: HashSet<String> = HashSet::new();
        let mut expected_fetches = 0usize;

        runtime().block_on(async {
            for op in ops {
                match op {
                    CacheOp::Get { key } => {
                        let was_cached = cached.contains(&key);
                        let result = cache.get(&key).await;
                        if !was_cached {
                            expected_fetches += 1;
                        }
                        match result {
                            Ok(value) => {
                                prop_assert!(!fails(&key));
                                prop_assert_eq!(value, key.to_uppercase());
                                cached.insert(key);
                            }
                            Err(err) => {
                                prop_assert!(fails(&key));
                                prop_assert!(matches!(err, CacheError::Fetch(_)));
                            }
                        }
                    }
                    CacheOp::Update { key } => {
                        expected_fetches += 1;
                        if cache.update(&key).await.is_ok() {
                            cached.insert(key);
                        }
                    }
                    CacheOp::Clear => {
                        cache.clear().unwrap();
                        cached.clear();
                    }
                }
            }
            Ok(())
        })?;

        prop_assert_eq!(fetched.lock().len(), expected_fetches);
        let stored: HashSet<String> = cache.get_all().into_keys().collect();
        prop_assert_eq!(stored, cached);
    }

    // Failed fetches never leave an entry behind.
    #[test]
    fn prop_errors_never_stored(keys in prop::collection::vec(key_strategy(), 1..40)) {
        let (cache, _) = recording_cache();

        runtime().block_on(async {
            for key in &keys {
                let _ = cache.get(key).await;
            }
        });

        let all = cache.get_all();
        prop_assert!(all.keys().all(|key| !fails(key)));
        for (key, value) in &all {
            prop_assert_eq!(value, &key.to_uppercase());
        }
    }

    // Hits and misses add up to the number of gets.
    #[test]
    fn prop_statistics_accuracy(keys in prop::collection::vec(key_strategy(), 1..50)) {
        let (cache, fetched) = recording_cache();

        runtime().block_on(async {
            for key in &keys {
                let _ = cache.get(key).await;
            }
        });

        let stats = cache.stats();
        prop_assert_eq!(stats.hits + stats.misses, keys.len() as u64);
        prop_assert_eq!(stats.misses, fetched.lock().len() as u64);
        prop_assert_eq!(stats.total_entries, cache.len());
        prop_assert_eq!(stats.coalesced, 0);
    }

    // Prewarmed entries are served without fetching.
    #[test]
    fn prop_prewarm_served_without_fetch(
        seed in prop::collection::hash_map("[a-e]{1,2}", "[a-z]{1,8}", 0..10)
    ) {
        let fetched = Arc::new(Mutex::new(Vec::<String>::new()));
        let log = fetched.clone();
        let initial: HashMap<String, String> = seed.clone();

        runtime().block_on(async {
            let cache = Cache::with_prewarm(
                move |key: String| {
                    log.lock().push(key.clone());
                    async move { Ok::<_, anyhow::Error>(key) }
                },
                move || {
                    let initial = initial.clone();
                    async move { Ok::<_, anyhow::Error>(initial) }
                },
            )
            .await
            .unwrap();

            for (key, value) in &seed {
                prop_assert_eq!(&cache.get(key).await.unwrap(), value);
            }
            prop_assert_eq!(cache.get_all(), seed.clone());
            Ok(())
        })?;

        prop_assert!(fetched.lock().is_empty());
    }
}
