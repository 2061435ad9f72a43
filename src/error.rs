//! Error types for the cache
//!
//! Provides unified error handling using thiserror.

use thiserror::Error;

// == Cache Error Enum ==
/// Unified error type for cache operations.
#[derive(Error, Debug)]
pub enum CacheError {
    /// The cache was not built through one of its constructors
    #[error("Cache not initialized: build it with Cache::new or Cache::with_prewarm")]
    NotInitialized,

    /// The fetcher failed; its error is passed through unchanged
    #[error(transparent)]
    Fetch(anyhow::Error),

    /// The prewarm routine failed during construction
    #[error("Prewarm failed: {0}")]
    Prewarm(#[source] anyhow::Error),

    /// Waited on another caller's fetch, but the key was still absent afterwards
    #[error("Fetch abandoned for key: {0}")]
    FetchAbandoned(String),
}

impl CacheError {
    /// Returns the fetcher's own error when this is a fetch failure.
    pub fn fetch_source(&self) -> Option<&anyhow::Error> {
        match self {
            CacheError::Fetch(source) => Some(source),
            _ => None,
        }
    }
}

// == Result Type Alias ==
/// Convenience Result type for cache operations.
pub type Result<T> = std::result::Result<T, CacheError>;
