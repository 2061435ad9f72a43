//! Background Tasks Module
//!
//! Workloads that run against a shared cache.
//!
//! # Tasks
//! - Storm: many concurrent readers on a few hot keys plus a cold key sweep

mod storm;

pub use storm::{hash_key, prewarm_items, run_storm, spawn_hot_key_storm, StormReport};
