//! Stampede Storm Task
//!
//! Hammers a cache with many concurrent readers on a few hot keys while a
//! single reader walks a wide range of cold keys, checking every value
//! against the hash of its key.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;

use rand::Rng;
use serde::Serialize;
use sha2::{Digest, Sha256};
use tokio::task::JoinHandle;
use tracing::{info, warn};

use crate::cache::Cache;
use crate::config::Config;
use crate::error::Result;

/// Hex encoded SHA-256 of `key`, the value every storm key maps to.
pub fn hash_key(key: &str) -> String {
    hex::encode(Sha256::digest(key.as_bytes()))
}

/// Entries for keys `1..=count`, used to prewarm a storm cache.
pub fn prewarm_items(count: u32) -> HashMap<String, String> {
    (1..=count)
        .map(|i| {
            let key = i.to_string();
            let value = hash_key(&key);
            (key, value)
        })
        .collect()
}

// == Storm Report ==
/// Outcome of a storm run.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct StormReport {
    /// Total `get` calls issued
    pub gets: u64,
    /// Gets that returned a value other than the key's hash
    pub mismatches: u64,
    /// Gets that returned an error
    pub errors: u64,
    /// Wall time of the whole run in milliseconds
    pub elapsed_ms: u64,
}

impl StormReport {
    fn record(&mut self, key: &str, result: Result<String>) {
        self.gets += 1;
        match result {
            Ok(value) if value == hash_key(key) => {}
            Ok(_) => {
                self.mismatches += 1;
                warn!(key, "Value does not match key hash");
            }
            Err(err) => {
                self.errors += 1;
                warn!(key, error = %err, "Storm get failed");
            }
        }
    }

    fn merge(&mut self, other: StormReport) {
        self.gets += other.gets;
        self.mismatches += other.mismatches;
        self.errors += other.errors;
    }

    /// True when every get returned the expected value.
    pub fn is_clean(&self) -> bool {
        self.mismatches == 0 && self.errors == 0
    }
}

/// Spawns `tasks` readers, each issuing `gets_per_task` gets on random keys
/// in `1..=hot_keys`. An empty range is logged and treated as `1..=1`.
///
/// # Returns
/// One JoinHandle per reader, resolving to that reader's tally.
pub fn spawn_hot_key_storm(
    cache: Arc<Cache<String>>,
    tasks: usize,
    gets_per_task: usize,
    hot_keys: u32,
) -> Vec<JoinHandle<StormReport>> {
    if hot_keys == 0 {
        warn!("Hot key range is empty, storm readers will use key 1");
    }
    let hot_keys = hot_keys.max(1);

    (0..tasks)
        .map(|_| {
            let cache = cache.clone();
            tokio::spawn(async move {
                let mut tally = StormReport::default();
                for _ in 0..gets_per_task {
                    let key = rand::thread_rng().gen_range(1..=hot_keys).to_string();
                    let result = cache.get(&key).await;
                    tally.record(&key, result);
                }
                tally
            })
        })
        .collect()
}

/// Runs the hot key storm and, concurrently, one pass over the cold keys.
///
/// Returns once every reader has finished.
pub async fn run_storm(cache: Arc<Cache<String>>, config: &Config) -> anyhow::Result<StormReport> {
    let started = Instant::now();
    info!(
        "Starting storm: tasks={}, gets_per_task={}, hot_keys={}, cold_keys={}",
        config.storm_tasks, config.gets_per_task, config.hot_keys, config.cold_keys
    );

    let handles = spawn_hot_key_storm(
        cache.clone(),
        config.storm_tasks,
        config.gets_per_task,
        config.hot_keys,
    );

    let mut report = StormReport::default();
    for i in 1..=config.cold_keys {
        let key = i.to_string();
        let result = cache.get(&key).await;
        report.record(&key, result);
    }

    for handle in handles {
        report.merge(handle.await?);
    }
    report.elapsed_ms = started.elapsed().as_millis() as u64;

    info!(
        "Storm finished: gets={}, mismatches={}, errors={}, elapsed={}ms",
        report.gets, report.mismatches, report.errors, report.elapsed_ms
    );
    Ok(report)
}
