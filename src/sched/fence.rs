//! # Completion Signaling
//!
//! Per-core timelines and fences for asynchronous jobs, plus the batch
//! tracker synchronous callers wait on.
//!
//! A [`Timeline`] is a monotonically increasing counter. Creating a fence and
//! incrementing the counter take the same lock, and a fence's target is
//! `value + pending` at creation, so every target is reachable by the
//! increments still owed. A [`Fence`] is an immutable target plus a shared
//! handle to the timeline; "signaled" is a pure read.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::time::Duration;

use log::warn;
use parking_lot::{Condvar, Mutex};

use crate::job::JobOutcome;

#[derive(Debug)]
pub struct Timeline {
    core: usize,
    value: AtomicU64,
    /// Fences created but not yet reached.
    pending: Mutex<u64>,
    advanced: Condvar,
}

impl Timeline {
    pub fn new(core: usize) -> Self {
        Self {
            core,
            value: AtomicU64::new(0),
            pending: Mutex::new(0),
            advanced: Condvar::new(),
        }
    }

    pub fn value(&self) -> u64 {
        self.value.load(Ordering::Acquire)
    }

    pub fn pending(&self) -> u64 {
        *self.pending.lock()
    }

    /// Create a fence for the next outstanding job on this timeline.
    pub fn create_fence(self: &Arc<Self>) -> Fence {
        let mut pending = self.pending.lock();
        *pending += 1;
        let target = self.value() + *pending;
        Fence {
            target,
            timeline: Arc::clone(self),
        }
    }

    /// Advance by one completed asynchronous job.
    pub fn increment(&self) {
        let mut pending = self.pending.lock();
        if *pending == 0 {
            warn!("timeline {} advanced with no outstanding fence", self.core);
        }
        *pending = pending.saturating_sub(1);
        self.value.fetch_add(1, Ordering::AcqRel);
        self.advanced.notify_all();
    }
}

/// A point on a core's timeline.
#[derive(Debug, Clone)]
pub struct Fence {
    target: u64,
    timeline: Arc<Timeline>,
}

impl Fence {
    pub fn target(&self) -> u64 {
        self.target
    }

    pub fn core(&self) -> usize {
        self.timeline.core
    }

    pub fn is_signaled(&self) -> bool {
        self.timeline.value() >= self.target
    }

    /// Block until signaled or `timeout` elapses. Returns `is_signaled()`.
    pub fn wait(&self, timeout: Duration) -> bool {
        let mut pending = self.timeline.pending.lock();
        self.timeline.advanced.wait_while_for(
            &mut pending,
            |_| self.timeline.value() < self.target,
            timeout,
        );
        self.is_signaled()
    }
}

/// Outcomes of one submitted batch, filled in by the scheduler.
#[derive(Debug)]
pub struct BatchTracker {
    outcomes: Mutex<Vec<Option<JobOutcome>>>,
    completed: AtomicUsize,
}

impl BatchTracker {
    pub fn new(len: usize) -> Self {
        Self {
            outcomes: Mutex::new(vec![None; len]),
            completed: AtomicUsize::new(0),
        }
    }

    pub fn len(&self) -> usize {
        self.outcomes.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Record a job's outcome. Only the first record per job counts.
    pub fn record(&self, index: usize, outcome: JobOutcome) -> bool {
        let mut outcomes = self.outcomes.lock();
        match outcomes.get_mut(index) {
            Some(entry) if entry.is_none() => {
                *entry = Some(outcome);
                self.completed.fetch_add(1, Ordering::AcqRel);
                true
            }
            _ => false,
        }
    }

    pub fn completed(&self) -> usize {
        self.completed.load(Ordering::Acquire)
    }

    pub fn is_complete(&self) -> bool {
        self.completed() == self.len()
    }

    pub fn outcomes(&self) -> Vec<Option<JobOutcome>> {
        self.outcomes.lock().clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    #[test]
    fn test_fence_targets_follow_pending() {
        let timeline = Arc::new(Timeline::new(0));
        let a = timeline.create_fence();
        let b = timeline.create_fence();
        assert_eq!((a.target(), b.target()), (1, 2));
        assert_eq!(timeline.pending(), 2);

        timeline.increment();
        assert!(a.is_signaled());
        assert!(!b.is_signaled());

        // created after one increment: value 1 + pending 2
        let c = timeline.create_fence();
        assert_eq!(c.target(), 3);
        timeline.increment();
        timeline.increment();
        assert!(b.is_signaled() && c.is_signaled());
        assert_eq!(timeline.pending(), 0);
    }

    #[test]
    fn test_fence_wait_wakes() {
        let timeline = Arc::new(Timeline::new(1));
        let fence = timeline.create_fence();
        assert!(!fence.wait(Duration::from_millis(10)));

        let signaller = {
            let timeline = Arc::clone(&timeline);
            thread::spawn(move || {
                thread::sleep(Duration::from_millis(20));
                timeline.increment();
            })
        };
        assert!(fence.wait(Duration::from_secs(2)));
        assert_eq!(fence.core(), 1);
        signaller.join().unwrap();
    }

    #[test]
    fn test_tracker_records_once() {
        let tracker = BatchTracker::new(2);
        let ok = JobOutcome::Completed { core: 0, exec_us: 5 };
        assert!(tracker.record(1, ok));
        assert!(!tracker.record(1, ok));
        assert!(!tracker.record(5, ok));
        assert_eq!(tracker.completed(), 1);
        assert!(!tracker.is_complete());
        assert_eq!(tracker.outcomes(), vec![None, Some(ok)]);
    }
}
