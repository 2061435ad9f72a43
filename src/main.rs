//! Stampede Cache - storm demonstration
//!
//! Builds a prewarmed cache whose fetcher hashes the key, runs a stampede
//! storm against it and reports whether every reader saw the right value.

use std::sync::Arc;
use std::time::Duration;

use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use stampede_cache::tasks::{hash_key, prewarm_items};
use stampede_cache::{run_storm, Cache, Config};

/// Main entry point for the storm demonstration.
///
/// # Startup Sequence
/// 1. Initialize tracing subscriber for logging
/// 2. Load configuration from environment variables
/// 3. Create the cache, prewarmed with the configured key range
/// 4. Run the storm and log the report and cache statistics
#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing subscriber with env filter
    // Defaults to "info" level, can be overridden with RUST_LOG env var
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "stampede_cache=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    info!("Starting Stampede Cache storm");

    // Load configuration from environment variables
    let config = Config::from_env();
    info!(
        "Configuration loaded: storm_tasks={}, gets_per_task={}, hot_keys={}, cold_keys={}, prewarm_keys={}, fetch_delay={}ms",
        config.storm_tasks,
        config.gets_per_task,
        config.hot_keys,
        config.cold_keys,
        config.prewarm_keys,
        config.fetch_delay_ms
    );

    let delay = Duration::from_millis(config.fetch_delay_ms);
    let prewarm_keys = config.prewarm_keys;
    let cache = Cache::with_prewarm(
        move |key: String| async move {
            if !delay.is_zero() {
                tokio::time::sleep(delay).await;
            }
            Ok::<_, anyhow::Error>(hash_key(&key))
        },
        move || async move { Ok::<_, anyhow::Error>(prewarm_items(prewarm_keys)) },
    )
    .await?;
    let cache = Arc::new(cache);

    let report = run_storm(cache.clone(), &config).await?;
    info!("Storm report: {}", serde_json::to_string(&report)?);
    let stats = cache.stats();
    info!(
        "Cache stats: {} (hit rate {:.4})",
        serde_json::to_string(&stats)?,
        stats.hit_rate()
    );

    if !report.is_clean() {
        anyhow::bail!(
            "storm saw {} mismatched values and {} errors",
            report.mismatches,
            report.errors
        );
    }

    info!("Storm complete");
    Ok(())
}
