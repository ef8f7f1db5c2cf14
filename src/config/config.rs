//! # Scheduler Configuration
//!
//! Tunables for the scheduler context. Values are fixed for the lifetime of a
//! [`crate::session::Gspn`] instance.
//!
//! ## Configuration Parameters
//!
//! | Parameter | Type | Range | Default | Description |
//! |-----------|------|-------|---------|-------------|
//! | `core_count` | `usize` | 1-2 | 1 | Hardware execution units |
//! | `max_commands` | `usize` | 1-64 | 8 | Job slots in the admission pool |
//! | `exec_budget_ms` | `u64` | 1-60000 | 500 | Per-core execution budget |
//! | `dispatch_retry_ms` | `u64` | 1-1000 | 2 | Idle wait while a free core has queued work |
//! | `acquire_timeout_ms` | `u64` | 0-60000 | 1000 | Admission wait for free slots |
//! | `sync_wait_ms` | `u64` | 1-60000 | 3000 | Synchronous batch wait |
//! | `suspend_timeout_ms` | `u64` | 1-60000 | 2000 | Drain bound for suspend |
//! | `benign_config_codes` | `Vec<i32>` | any | `[]` | Register-programmer codes tolerated at dispatch |
//!
//! ## Examples
//!
//! ```rust
//! use gspn::config::SchedulerConfig;
//!
//! let config = SchedulerConfig::from_json_str(r#"{ "core_count": 2, "max_commands": 4 }"#).unwrap();
//! assert_eq!(config.core_count, 2);
//! assert_eq!(config.exec_budget_ms, 500);
//! assert!(config.validate().is_ok());
//! ```

use std::{path::Path, time::Duration};

use serde::{Deserialize, Serialize};

use crate::error::{GspnError, GspnResult};

/// Largest number of execution units the hardware exposes.
pub const MAX_CORES: usize = 2;
/// Upper bound for `max_commands`.
pub const MAX_COMMAND_SLOTS: usize = 64;

const MAX_MS: u64 = 60_000;

/// Configuration for the scheduler context.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SchedulerConfig {
    pub core_count: usize,
    /// Size of the fixed job-slot array.
    pub max_commands: usize,
    /// Elapsed time after trigger before a core is declared stalled.
    pub exec_budget_ms: u64,
    pub dispatch_retry_ms: u64,
    pub acquire_timeout_ms: u64,
    pub sync_wait_ms: u64,
    pub suspend_timeout_ms: u64,
    /// Non-zero register programmer codes that still allow the trigger.
    pub benign_config_codes: Vec<i32>,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            core_count: 1,
            max_commands: 8,
            exec_budget_ms: 500,
            dispatch_retry_ms: 2,
            acquire_timeout_ms: 1000,
            sync_wait_ms: 3000,
            suspend_timeout_ms: 2000,
            benign_config_codes: Vec::new(),
        }
    }
}

impl SchedulerConfig {
    /// Load from a JSON file. Missing fields take their defaults.
    pub fn from_json_file(path: impl AsRef<Path>) -> GspnResult<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path)
            .map_err(|e| GspnError::io("read_config", e).with_path(path.display().to_string()))?;
        Self::from_json_str(&text)
    }

    pub fn from_json_str(text: &str) -> GspnResult<Self> {
        let config: Self = serde_json::from_str(text)?;
        Ok(config)
    }

    /// Validates the configuration parameters.
    ///
    /// Time complexity: O(n) in the number of benign codes.
    pub fn validate(&self) -> GspnResult<()> {
        if !(1..=MAX_CORES).contains(&self.core_count) {
            return Err(GspnError::config(
                "core_count",
                self.core_count.to_string(),
                format!("must be between 1 and {}", MAX_CORES),
            ));
        }
        if !(1..=MAX_COMMAND_SLOTS).contains(&self.max_commands) {
            return Err(GspnError::config(
                "max_commands",
                self.max_commands.to_string(),
                format!("must be between 1 and {}", MAX_COMMAND_SLOTS),
            ));
        }
        for (field, value, min) in [
            ("exec_budget_ms", self.exec_budget_ms, 1),
            ("dispatch_retry_ms", self.dispatch_retry_ms, 1),
            ("acquire_timeout_ms", self.acquire_timeout_ms, 0),
            ("sync_wait_ms", self.sync_wait_ms, 1),
            ("suspend_timeout_ms", self.suspend_timeout_ms, 1),
        ] {
            if value < min || value > MAX_MS {
                return Err(GspnError::config(
                    field,
                    value.to_string(),
                    format!("must be between {} and {}", min, MAX_MS),
                ));
            }
        }
        if self.dispatch_retry_ms > 1000 {
            return Err(GspnError::config(
                "dispatch_retry_ms",
                self.dispatch_retry_ms.to_string(),
                "must not exceed 1000",
            ));
        }
        if self.benign_config_codes.contains(&0) {
            return Err(GspnError::config(
                "benign_config_codes",
                "0",
                "zero is success and must not be listed",
            ));
        }
        Ok(())
    }

    pub fn exec_budget(&self) -> Duration {
        Duration::from_millis(self.exec_budget_ms)
    }

    pub fn dispatch_retry(&self) -> Duration {
        Duration::from_millis(self.dispatch_retry_ms)
    }

    pub fn acquire_timeout(&self) -> Duration {
        Duration::from_millis(self.acquire_timeout_ms)
    }

    pub fn sync_wait(&self) -> Duration {
        Duration::from_millis(self.sync_wait_ms)
    }

    pub fn suspend_timeout(&self) -> Duration {
        Duration::from_millis(self.suspend_timeout_ms)
    }

    pub fn is_benign(&self, code: i32) -> bool {
        code == 0 || self.benign_config_codes.contains(&code)
    }
}
