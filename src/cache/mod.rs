//! Cache Module
//!
//! Provides an in-memory cache that coalesces concurrent misses for the same
//! key into a single fetch.

mod flight;
mod stats;
mod store;

#[cfg(test)]
mod property_tests;

// Re-export public types
pub use stats::CacheStats;
pub use store::Cache;
