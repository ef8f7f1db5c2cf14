//! # Configuration Module
//!
//! Scheduler tunables and their JSON loading.

pub mod config;

pub use config::SchedulerConfig;
