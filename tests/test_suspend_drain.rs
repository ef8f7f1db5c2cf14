//! Integration tests for suspend, resume and shutdown
//!
//! Suspension drains every admitted and in-flight job, refuses new work
//! until resume, and never blocks past its configured bound.

mod common;

use std::time::{Duration, Instant};

use common::assertions::{assert_failed_with, assert_idle, assert_invariants, wait_until};
use common::test_jobs::{half_job, half_jobs};
use common::test_systems::{fast_config, system, system_with};
use gspn::FailReason;
use gspn::sched::CoreState;

#[test]
fn test_suspend_drains_queued_and_running_jobs() {
    let (gspn, device) = system_with(fast_config(1, 4), Duration::from_millis(150));

    let batch = gspn.submit_async(&half_jobs(4)).expect("Submit failed");
    assert!(wait_until(Duration::from_secs(1), || {
        gspn.status().cores[0].state == CoreState::Busy
    }));

    gspn.suspend().expect("Suspend failed");
    assert!(gspn.is_suspended());
    assert!(batch.is_complete(), "Drain must complete every admitted job");
    assert!(batch.wait(Duration::from_millis(10)), "Drained jobs must signal their fences");
    for outcome in batch.outcomes() {
        assert_failed_with(&outcome.expect("Missing outcome"), FailReason::Suspended);
    }
    assert!(device.counters().recovered >= 1);
    assert_eq!(device.outstanding_buffers(), 0);

    let status = gspn.status();
    assert!(status.suspended);
    assert_eq!(status.slots.free, 4);
    assert!(status.cores.iter().all(|c| c.state == CoreState::Free));
    assert_invariants(&gspn);
}

#[test]
fn test_admission_refused_while_suspended() {
    let (gspn, device) = system(1, 4);
    gspn.submit_sync(&[half_job(0)]).expect("Batch failed");
    assert_eq!(gspn.status().cache.len, 1);

    gspn.suspend().expect("Suspend failed");
    assert_eq!(gspn.acquire(1).unwrap_err().category(), "suspended");
    assert_eq!(gspn.submit_sync(&[half_job(1)]).unwrap_err().category(), "suspended");
    // second suspend is a no-op
    gspn.suspend().expect("Repeated suspend failed");

    gspn.resume().expect("Resume failed");
    assert!(!gspn.is_suspended());
    assert_eq!(device.counters().resumed, 1);

    let cache = gspn.status().cache;
    assert_eq!(cache.len, 0, "Resume must start with an empty cache");
    assert_eq!(cache.invalidations, 1);

    let report = gspn.submit_sync(&[half_job(2)]).expect("Batch after resume failed");
    assert!(report.all_ok());
    assert_eq!(gspn.status().cache.generated, 2);
    assert_idle(&gspn);
}

#[test]
fn test_suspend_is_bounded() {
    let config = gspn::SchedulerConfig {
        suspend_timeout_ms: 100,
        ..fast_config(1, 4)
    };
    let (gspn, device) = system_with(config, Duration::from_millis(2));
    device.set_hang(0, true);
    device.set_recover_delay(Duration::from_millis(400));

    let stuck = gspn.submit_async(&[half_job(0)]).expect("Submit failed");
    assert!(wait_until(Duration::from_secs(1), || device.counters().triggered == 1));

    let started = Instant::now();
    let err = gspn.suspend().unwrap_err();
    assert_eq!(err.category(), "timeout");
    assert!(started.elapsed() < Duration::from_secs(3));

    // resources were forced back regardless
    assert!(stuck.is_complete());
    assert_failed_with(&stuck.outcomes()[0].expect("Missing outcome"), FailReason::Suspended);
    let status = gspn.status();
    assert_eq!(status.slots.free, 4);
    assert!(status.cores.iter().all(|c| c.bound.is_none()));
    assert_invariants(&gspn);
}

#[test]
fn test_shutdown_signals_outstanding_fences() {
    let (gspn, device) = system(1, 4);
    device.set_hang(0, true);

    let batch = gspn.submit_async(&half_jobs(2)).expect("Submit failed");
    assert!(wait_until(Duration::from_secs(1), || device.counters().triggered == 1));

    drop(gspn);
    assert!(batch.is_complete());
    assert!(batch.fences.iter().all(|f| f.is_signaled()));
}
