//! Cache Store Module
//!
//! Main cache engine: a locked value store in front of a user supplied
//! fetcher, with concurrent misses for one key coalesced into a single fetch.

use std::collections::HashMap;
use std::fmt;
use std::future::Future;
use std::sync::Arc;

use futures::future::BoxFuture;
use futures::FutureExt;
use parking_lot::RwLock;
use tracing::{debug, info, warn};

use crate::cache::flight::{Claim, FlightGuard, FlightTracker};
use crate::cache::stats::{CacheStats, StatsRecorder};
use crate::error::{CacheError, Result};

type FetchFn<V> = Arc<dyn Fn(String) -> BoxFuture<'static, anyhow::Result<V>> + Send + Sync>;
type PrewarmFn<V> =
    Arc<dyn Fn() -> BoxFuture<'static, anyhow::Result<HashMap<String, V>>> + Send + Sync>;

// == Cache ==
/// In-memory cache that fetches missing keys on demand.
///
/// At most one fetch per key runs at any time. Callers that miss while a
/// fetch for the same key is running wait for it and then read its result
/// from the store instead of fetching again.
///
/// Values are cloned out of the store; wrap large values in an `Arc`.
///
/// `Cache::default()` yields an unusable instance: every operation on it
/// fails with [`CacheError::NotInitialized`] (or, for [`Cache::get_all`],
/// returns an empty map).
pub struct Cache<V> {
    /// Key-value storage, `None` until built by a constructor
    items: RwLock<Option<HashMap<String, V>>>,
    /// Produces values on a miss
    fetcher: Option<FetchFn<V>>,
    /// Seeds the store, kept for `purge_and_prewarm`
    prewarm: Option<PrewarmFn<V>>,
    /// Keys with a running fetch and their completion signals
    flights: FlightTracker,
    /// Performance statistics
    stats: StatsRecorder,
}

impl<V> Default for Cache<V> {
    fn default() -> Self {
        Self {
            items: RwLock::new(None),
            fetcher: None,
            prewarm: None,
            flights: FlightTracker::default(),
            stats: StatsRecorder::default(),
        }
    }
}

impl<V> fmt::Debug for Cache<V> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Cache")
            .field("initialized", &self.fetcher.is_some())
            .field("entries", &self.items.read().as_ref().map_or(0, HashMap::len))
            .field("prewarm", &self.prewarm.is_some())
            .finish_non_exhaustive()
    }
}

fn box_fetcher<V, F, Fut, E>(fetcher: F) -> FetchFn<V>
where
    V: Send + 'static,
    F: Fn(String) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = std::result::Result<V, E>> + Send + 'static,
    E: Into<anyhow::Error> + Send + 'static,
{
    Arc::new(move |key: String| {
        let fetch = fetcher(key);
        async move { fetch.await.map_err(Into::<anyhow::Error>::into) }.boxed()
    })
}

impl<V> Cache<V>
where
    V: Clone + Send + Sync + 'static,
{
    // == Constructors ==
    /// Creates an empty cache around `fetcher`.
    ///
    /// # Arguments
    /// * `fetcher` - Called with the key on a miss; its error is returned
    ///   unchanged to the caller that triggered the fetch
    pub fn new<F, Fut, E>(fetcher: F) -> Self
    where
        F: Fn(String) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = std::result::Result<V, E>> + Send + 'static,
        E: Into<anyhow::Error> + Send + 'static,
    {
        Self {
            items: RwLock::new(Some(HashMap::new())),
            fetcher: Some(box_fetcher(fetcher)),
            ..Self::default()
        }
    }

    /// Creates a cache seeded by `prewarm`.
    ///
    /// `prewarm` runs before this returns. If it fails, no cache is built and
    /// the failure comes back as [`CacheError::Prewarm`]. The routine is kept
    /// so [`Cache::purge_and_prewarm`] can run it again later.
    ///
    /// # Arguments
    /// * `fetcher` - Called with the key on a miss
    /// * `prewarm` - Produces the initial contents of the store
    pub async fn with_prewarm<F, Fut, E, P, PFut, PE>(fetcher: F, prewarm: P) -> Result<Self>
    where
        F: Fn(String) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = std::result::Result<V, E>> + Send + 'static,
        E: Into<anyhow::Error> + Send + 'static,
        P: Fn() -> PFut + Send + Sync + 'static,
        PFut: Future<Output = std::result::Result<HashMap<String, V>, PE>> + Send + 'static,
        PE: Into<anyhow::Error> + Send + 'static,
    {
        let prewarm: PrewarmFn<V> = Arc::new(move || {
            let load = prewarm();
            async move { load.await.map_err(Into::<anyhow::Error>::into) }.boxed()
        });

        let items = prewarm().await.map_err(CacheError::Prewarm)?;
        info!(entries = items.len(), "Cache prewarmed");

        Ok(Self {
            items: RwLock::new(Some(items)),
            fetcher: Some(box_fetcher(fetcher)),
            prewarm: Some(prewarm),
            ..Self::default()
        })
    }

    // == Get ==
    /// Returns the value for `key`, fetching it on a miss.
    ///
    /// A hit never waits on a fetch. On a miss the first caller fetches and
    /// stores the value while later callers for the same key wait and then
    /// read it from the store. A waiting caller whose fetch left nothing
    /// behind gets [`CacheError::FetchAbandoned`].
    pub async fn get(&self, key: &str) -> Result<V> {
        if let Some(value) = self.lookup(key)? {
            self.stats.record_hit();
            return Ok(value);
        }
        self.stats.record_miss();

        match self.flights.claim(key) {
            Claim::Leader(guard) => {
                // A fetch may have finished between the miss above and the claim.
                if let Some(value) = self.lookup(key)? {
                    return Ok(value);
                }
                self.fetch_and_store(key, guard).await
            }
            Claim::Follower(completion) => {
                self.stats.record_coalesced();
                debug!(key, "Waiting for in-flight fetch");
                completion.wait().await;
                self.lookup(key)?
                    .ok_or_else(|| CacheError::FetchAbandoned(key.to_string()))
            }
        }
    }

    // == Get All ==
    /// Returns a copy of every cached entry, taken under a single read lock.
    ///
    /// Fetches still in flight are not waited for. An uninitialized cache
    /// returns an empty map.
    pub fn get_all(&self) -> HashMap<String, V> {
        self.items.read().as_ref().cloned().unwrap_or_default()
    }

    // == Clear ==
    /// Removes every entry.
    ///
    /// Fetches already running are left alone and still store their result
    /// when they finish.
    pub fn clear(&self) -> Result<()> {
        let mut items = self.items.write();
        let items = items.as_mut().ok_or(CacheError::NotInitialized)?;
        let removed = items.len();
        *items = HashMap::new();

        info!(removed, "Cache cleared");
        Ok(())
    }

    // == Update ==
    /// Fetches `key` again and stores the fresh value.
    ///
    /// If a fetch for `key` is already running, waits for it and then fetches
    /// once more, since that fetch may have started before the refresh was
    /// asked for. Never runs alongside another fetch of the same key. On
    /// failure the previously cached value stays in place.
    pub async fn update(&self, key: &str) -> Result<()> {
        self.fetcher()?;
        self.stats.record_update();

        loop {
            match self.flights.claim(key) {
                Claim::Leader(guard) => {
                    self.fetch_and_store(key, guard).await?;
                    debug!(key, "Entry refreshed");
                    return Ok(());
                }
                Claim::Follower(completion) => {
                    self.stats.record_coalesced();
                    debug!(key, "Refresh waiting for in-flight fetch");
                    completion.wait().await;
                }
            }
        }
    }

    // == Purge And Prewarm ==
    /// Replaces the whole store with a fresh run of the prewarm routine.
    ///
    /// Without a prewarm routine the store is emptied. A failing prewarm is
    /// logged and leaves the store empty.
    pub async fn purge_and_prewarm(&self) -> Result<()> {
        self.fetcher()?;

        let items = match &self.prewarm {
            Some(prewarm) => match prewarm().await {
                Ok(items) => {
                    info!(entries = items.len(), "Cache purged and prewarmed");
                    items
                }
                Err(err) => {
                    warn!(error = %err, "Prewarm failed, cache starts cold");
                    HashMap::new()
                }
            },
            None => {
                info!("Cache purged");
                HashMap::new()
            }
        };

        *self.items.write() = Some(items);
        Ok(())
    }

    // == Stats ==
    /// Returns current cache statistics.
    pub fn stats(&self) -> CacheStats {
        self.stats.snapshot(self.len())
    }

    // == Length ==
    /// Returns the current number of entries in the cache.
    pub fn len(&self) -> usize {
        self.items.read().as_ref().map_or(0, HashMap::len)
    }

    /// Returns true if the cache holds no entries.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn fetcher(&self) -> Result<&FetchFn<V>> {
        self.fetcher.as_ref().ok_or(CacheError::NotInitialized)
    }

    fn lookup(&self, key: &str) -> Result<Option<V>> {
        let items = self.items.read();
        let items = items.as_ref().ok_or(CacheError::NotInitialized)?;
        Ok(items.get(key).cloned())
    }

    /// Runs the fetcher as leader. The guard is dropped only after the
    /// value is stored, so released followers find it.
    async fn fetch_and_store(&self, key: &str, guard: FlightGuard<'_>) -> Result<V> {
        let fetcher = self.fetcher()?;
        self.stats.record_fetch();
        debug!(key, "Fetching");

        let outcome = match fetcher(key.to_string()).await {
            Ok(value) => {
                let mut items = self.items.write();
                let items = items.as_mut().ok_or(CacheError::NotInitialized)?;
                items.insert(key.to_string(), value.clone());
                Ok(value)
            }
            Err(err) => {
                self.stats.record_fetch_error();
                warn!(key, error = %err, "Fetch failed");
                Err(CacheError::Fetch(err))
            }
        };

        drop(guard);
        outcome
    }
}
