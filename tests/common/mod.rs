//! Common test utilities and helpers for the gspn scheduler tests
//!
//! This module provides shared builders for jobs and simulated systems, plus
//! assertions used across the integration tests.

#![allow(dead_code)]

/// Job parameter builders
pub mod test_jobs {
    use gspn::{BufferHandle, JobParams, Rect, Taps};

    /// Source and destination sizes used by the cache scenarios
    pub const HALF_SRC: (u32, u32) = (100, 100);
    pub const HALF_DST: (u32, u32) = (50, 50);

    /// A synchronous single-layer scaling job with distinct buffer handles
    pub fn scale_job(id: u64, src: (u32, u32), dst: (u32, u32)) -> JobParams {
        JobParams::scale(
            BufferHandle(id * 2 + 1),
            Rect::new(0, 0, src.0, src.1),
            BufferHandle(id * 2 + 2),
            Rect::new(0, 0, dst.0, dst.1),
        )
    }

    /// The (100,100) -> (50,50) job with 8 horizontal and 4 vertical taps
    pub fn half_job(id: u64) -> JobParams {
        scale_job(id, HALF_SRC, HALF_DST).with_taps(Taps::Eight, Taps::Four)
    }

    pub fn half_jobs(n: usize) -> Vec<JobParams> {
        (0..n as u64).map(half_job).collect()
    }

    /// A copy job: source and destination have the same size, no scaling
    pub fn copy_job(id: u64) -> JobParams {
        scale_job(id, (64, 64), (64, 64))
    }
}

/// Simulated system builders
pub mod test_systems {
    use gspn::{Gspn, SchedulerConfig, SimDevice};
    use std::sync::Arc;
    use std::time::Duration;

    /// Configuration with short timeouts so failure paths finish quickly
    pub fn fast_config(cores: usize, slots: usize) -> SchedulerConfig {
        SchedulerConfig {
            core_count: cores,
            max_commands: slots,
            exec_budget_ms: 200,
            acquire_timeout_ms: 300,
            sync_wait_ms: 2000,
            suspend_timeout_ms: 1000,
            ..SchedulerConfig::default()
        }
    }

    /// A running system over a simulated device with the given latency
    pub fn system_with(config: SchedulerConfig, latency: Duration) -> (Gspn, Arc<SimDevice>) {
        let device = Arc::new(SimDevice::new(config.core_count).with_latency(latency));
        let gspn = Gspn::builder()
            .config(config)
            .device(Arc::clone(&device))
            .build()
            .expect("Failed to build scheduler");
        (gspn, device)
    }

    pub fn system(cores: usize, slots: usize) -> (Gspn, Arc<SimDevice>) {
        system_with(fast_config(cores, slots), Duration::from_millis(2))
    }
}

/// Custom assertions for testing
pub mod assertions {
    use gspn::{FailReason, Gspn, JobOutcome};
    use std::time::{Duration, Instant};

    /// Poll `condition` until it holds or `timeout` elapses
    pub fn wait_until(timeout: Duration, mut condition: impl FnMut() -> bool) -> bool {
        let deadline = Instant::now() + timeout;
        while Instant::now() < deadline {
            if condition() {
                return true;
            }
            std::thread::sleep(Duration::from_millis(2));
        }
        condition()
    }

    /// Assert the slot and core invariants hold right now
    pub fn assert_invariants(gspn: &Gspn) {
        if let Err(e) = gspn.check_invariants() {
            panic!("Invariant violated: {}", e);
        }
        let status = gspn.status();
        assert_eq!(
            status.slots.total(),
            gspn.config().max_commands,
            "Slot census doesn't add up: {:?}",
            status.slots
        );
    }

    /// Assert every slot is back in the free pool and every core is Free
    pub fn assert_idle(gspn: &Gspn) {
        let reached = wait_until(Duration::from_secs(2), || {
            let status = gspn.status();
            status.slots.free == gspn.config().max_commands
                && status.cores.iter().all(|c| c.bound.is_none() && c.queued == 0)
        });
        assert!(reached, "System did not return to idle: {:?}", gspn.status());
        assert_invariants(gspn);
    }

    pub fn assert_failed_with(outcome: &JobOutcome, expected: FailReason) {
        match outcome {
            JobOutcome::Failed { reason, .. } => {
                assert_eq!(*reason, expected, "Unexpected failure reason")
            }
            other => panic!("Expected failure {:?}, got {:?}", expected, other),
        }
    }
}
