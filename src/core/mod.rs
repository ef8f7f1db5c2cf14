//! # Core Infrastructure Module
//!
//! Fixed-size building blocks owned by the scheduler context: the job slot
//! pool, the coefficient cache, the error record ring and execution-time
//! statistics.

pub mod coef_cache;
pub mod error_record;
pub mod perf_stats;
pub mod slot_pool;
