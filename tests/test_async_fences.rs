//! Integration tests for asynchronous submission and timeline fences
//!
//! Fences created at submission must each be reached exactly once, in
//! submission order, whatever the job's outcome.

mod common;

use std::sync::Arc;
use std::time::Duration;

use common::assertions::{assert_idle, wait_until};
use common::test_jobs::{half_job, half_jobs};
use common::test_systems::{fast_config, system, system_with};

#[test]
fn test_fence_targets_follow_submission_order() {
    let (gspn, _device) = system_with(fast_config(1, 4), Duration::from_millis(20));

    let slots = gspn.acquire(3).expect("Acquire failed");
    let mut fences = Vec::new();
    for (i, &slot) in slots.iter().enumerate() {
        gspn.fill(slot, half_job(i as u64).asynchronous()).expect("Fill failed");
        fences.push(gspn.submit(slot, 0).expect("Submit failed").expect("Missing fence"));
    }
    let targets: Vec<u64> = fences.iter().map(|f| f.target()).collect();
    assert_eq!(targets, vec![1, 2, 3]);
    assert!(fences.iter().all(|f| f.core() == 0));

    assert!(fences[2].wait(Duration::from_secs(2)));
    // a later fence implies every earlier one
    assert!(fences.iter().all(|f| f.is_signaled()));

    let core = &gspn.status().cores[0];
    assert_eq!(core.timeline, 3);
    assert_eq!(core.pending_fences, 0);
    assert_idle(&gspn);
}

#[test]
fn test_sync_jobs_do_not_advance_timeline() {
    let (gspn, _device) = system(1, 4);

    gspn.submit_sync(&half_jobs(2)).expect("Sync batch failed");
    assert_eq!(gspn.status().cores[0].timeline, 0);

    let batch = gspn.submit_async(&half_jobs(2)).expect("Async batch failed");
    assert_eq!(batch.fences.len(), 2);
    assert!(batch.wait(Duration::from_secs(2)));
    assert_eq!(gspn.status().cores[0].timeline, 2);
}

#[test]
fn test_fence_created_after_progress_is_reachable() {
    let (gspn, _device) = system(1, 4);

    let first = gspn.submit_async(&half_jobs(2)).expect("First batch failed");
    assert!(first.wait(Duration::from_secs(2)));

    let second = gspn.submit_async(&[half_job(5)]).expect("Second batch failed");
    assert_eq!(second.fences[0].target(), 3);
    assert!(second.wait(Duration::from_secs(2)));
}

#[test]
fn test_concurrent_submitters_share_the_pool() {
    let (gspn, _device) = system_with(fast_config(2, 8), Duration::from_millis(1));
    let gspn = Arc::new(gspn);

    let handles: Vec<_> = (0..4)
        .map(|t| {
            let gspn = Arc::clone(&gspn);
            std::thread::spawn(move || {
                for round in 0..5u64 {
                    let jobs = vec![half_job(t * 100 + round); 2];
                    let batch = gspn.submit_async(&jobs).expect("Submit failed");
                    assert!(batch.wait(Duration::from_secs(3)), "Batch did not finish");
                }
            })
        })
        .collect();
    for handle in handles {
        handle.join().expect("Submitter panicked");
    }

    assert!(wait_until(Duration::from_secs(1), || gspn.status().slots.free == 8));
    let completed: u64 = gspn.status().cores.iter().map(|c| c.perf.completed).sum();
    assert_eq!(completed, 40);
    assert_idle(&gspn);
}

#[test]
fn test_signaled_fence_means_own_job_finished() {
    let (gspn, _device) = system_with(fast_config(1, 16), Duration::from_millis(1));
    let gspn = Arc::new(gspn);

    for round in 0..10u64 {
        let handles: Vec<_> = (0..12u64)
            .map(|t| {
                let gspn = Arc::clone(&gspn);
                std::thread::spawn(move || {
                    let batch = gspn.submit_async(&[half_job(round * 100 + t)]).expect("Submit failed");
                    let fence = &batch.fences[0];
                    assert!(wait_until(Duration::from_secs(3), || fence.is_signaled()));
                    assert!(
                        batch.is_complete(),
                        "Fence {} signaled before its own job completed",
                        fence.target()
                    );
                })
            })
            .collect();
        for handle in handles {
            handle.join().expect("Submitter panicked");
        }
    }

    let core = &gspn.status().cores[0];
    assert_eq!(core.timeline, 120);
    assert_eq!(core.pending_fences, 0);
    assert_idle(&gspn);
}
