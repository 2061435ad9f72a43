//! Stampede Cache - an in-memory cache without thundering herds
//!
//! Concurrent misses for the same key are coalesced: one caller fetches,
//! the rest wait for that fetch and read its result.

pub mod cache;
pub mod config;
pub mod error;
pub mod tasks;

pub use cache::{Cache, CacheStats};
pub use config::Config;
pub use error::{CacheError, Result};
pub use tasks::{run_storm, StormReport};
