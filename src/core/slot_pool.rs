//! # Job Slot Pool
//!
//! Fixed array of reusable job descriptors plus the free pool callers acquire
//! from. Slots are allocated once when the scheduler starts and recycled
//! forever; nothing here allocates per job.
//!
//! ## Locking
//!
//! Every slot has its own mutex. The free pool has a separate mutex and a
//! condition variable for admission waiters. Lock order is free pool, then
//! slot: a slot's location changes to or from `Free` only while the free-pool
//! lock is held, so the list and the locations never disagree to an observer
//! that takes the same lock. No lock is held across a blocking wait other
//! than the one the condition variable releases.
//!
//! ## Free-pool accounting
//!
//! The free pool keeps an explicit count next to the physical list. They
//! always agree on every normal path; [`SlotPool::resync`] repairs them if
//! they ever diverge and reports that it did.

use std::collections::VecDeque;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::{Duration, Instant};

use log::{debug, warn};
use parking_lot::{Condvar, Mutex, MutexGuard};
use serde::Serialize;

use crate::error::{GspnError, GspnResult};
use crate::job::{DEST_LAYER, HwAddr, JobParams, JobStatus, SlotLocation};
use crate::sched::fence::BatchTracker;

/// Index into the slot array.
pub type SlotId = usize;

/// Where a finished job reports its outcome.
#[derive(Debug, Clone)]
pub struct Completion {
    pub tracker: Arc<BatchTracker>,
    /// Position of the job within its batch.
    pub index: usize,
}

/// One job descriptor.
#[derive(Debug)]
pub struct JobSlot {
    pub id: SlotId,
    /// Identity tag, unique per acquisition.
    pub tag: u64,
    pub status: JobStatus,
    pub location: SlotLocation,
    pub params: JobParams,
    /// Core the job is bound to.
    pub core: Option<usize>,
    /// Fence signals still owed for this job (0 or 1).
    pub fences_owed: u32,
    pub triggered_at: Option<Instant>,
    pub completion: Option<Completion>,
    /// Resolved addresses per layer-table entry.
    pub resolved: [Option<HwAddr>; DEST_LAYER + 1],
}

impl JobSlot {
    fn new(id: SlotId) -> Self {
        Self {
            id,
            tag: 0,
            status: JobStatus::Idle,
            location: SlotLocation::Free,
            params: JobParams::default(),
            core: None,
            fences_owed: 0,
            triggered_at: None,
            completion: None,
            resolved: [None; DEST_LAYER + 1],
        }
    }

    fn reset(&mut self) {
        self.status = JobStatus::Idle;
        self.location = SlotLocation::Free;
        self.core = None;
        self.fences_owed = 0;
        self.triggered_at = None;
        self.completion = None;
        self.resolved = [None; DEST_LAYER + 1];
    }
}

#[derive(Debug)]
struct FreeList {
    list: VecDeque<SlotId>,
    count: usize,
}

/// Slot counts by location.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct SlotCensus {
    pub free: usize,
    /// Reserved by a caller or waiting in a core queue.
    pub admitted: usize,
    pub in_flight: usize,
}

impl SlotCensus {
    pub fn total(&self) -> usize {
        self.free + self.admitted + self.in_flight
    }
}

/// Fixed pool of job slots.
#[derive(Debug)]
pub struct SlotPool {
    slots: Box<[Mutex<JobSlot>]>,
    free: Mutex<FreeList>,
    available: Condvar,
    admission_open: AtomicBool,
    next_tag: AtomicU64,
}

impl SlotPool {
    pub fn new(capacity: usize) -> Self {
        Self {
            slots: (0..capacity).map(|id| Mutex::new(JobSlot::new(id))).collect(),
            free: Mutex::new(FreeList {
                list: (0..capacity).collect(),
                count: capacity,
            }),
            available: Condvar::new(),
            admission_open: AtomicBool::new(true),
            next_tag: AtomicU64::new(1),
        }
    }

    pub fn capacity(&self) -> usize {
        self.slots.len()
    }

    /// Lock one slot.
    pub fn slot(&self, id: SlotId) -> GspnResult<MutexGuard<'_, JobSlot>> {
        self.slots
            .get(id)
            .map(|slot| slot.lock())
            .ok_or_else(|| GspnError::invalid_state("unknown", "slot_lookup", format!("no slot {}", id)))
    }

    /// Open or close admission. Closing wakes every admission waiter.
    pub fn set_admission(&self, open: bool) {
        self.admission_open.store(open, Ordering::SeqCst);
        let _free = self.free.lock();
        self.available.notify_all();
    }

    pub fn admission_open(&self) -> bool {
        self.admission_open.load(Ordering::SeqCst)
    }

    /// Reserve `n` free slots, waiting up to `timeout` for them.
    ///
    /// Fails with `ResourceExhausted` on timeout (or when `n` can never be
    /// satisfied) and with `Suspended` when admission closes while waiting.
    pub fn acquire(&self, n: usize, timeout: Duration) -> GspnResult<Vec<SlotId>> {
        if n == 0 || n > self.capacity() {
            return Err(GspnError::resource_exhausted("job_slots", n, self.capacity())
                .with_context("batch size outside slot pool capacity"));
        }
        let deadline = Instant::now() + timeout;
        let mut free = self.free.lock();
        let ids: Vec<SlotId> = loop {
            if !self.admission_open() {
                return Err(GspnError::suspended("acquire"));
            }
            if free.count >= n && free.list.len() >= n {
                free.count -= n;
                let ids: Vec<SlotId> = free.list.drain(..n).collect();
                for &id in &ids {
                    let mut slot = self.slots[id].lock();
                    slot.reset();
                    slot.tag = self.next_tag.fetch_add(1, Ordering::Relaxed);
                    slot.location = SlotLocation::Reserved;
                }
                break ids;
            }
            if self.available.wait_until(&mut free, deadline).timed_out() {
                let available = free.count;
                return Err(GspnError::resource_exhausted("job_slots", n, available)
                    .with_operation("acquire")
                    .with_recovery_suggestion("Wait for in-flight jobs to complete"));
            }
        };
        drop(free);
        debug!("acquired slots {:?}", ids);
        Ok(ids)
    }

    /// Copy caller parameters into a reserved slot.
    pub fn fill(&self, id: SlotId, params: JobParams, completion: Option<Completion>) -> GspnResult<()> {
        let mut slot = self.slot(id)?;
        if slot.location != SlotLocation::Reserved || slot.status != JobStatus::Idle {
            return Err(GspnError::invalid_state(
                format!("{:?}/{:?}", slot.location, slot.status),
                "fill",
                "slot must be reserved and idle",
            ));
        }
        slot.params = params;
        slot.completion = completion;
        slot.status = JobStatus::Filled;
        Ok(())
    }

    /// Move a filled slot into a core's admitted queue state.
    ///
    /// Returns whether the job is synchronous. The caller pushes the id onto
    /// the core queue.
    pub fn mark_queued(&self, id: SlotId, core: usize) -> GspnResult<bool> {
        let mut slot = self.slot(id)?;
        if slot.location != SlotLocation::Reserved || slot.status != JobStatus::Filled {
            return Err(GspnError::invalid_state(
                format!("{:?}/{:?}", slot.location, slot.status),
                "submit",
                "slot must be reserved and filled",
            ));
        }
        slot.location = SlotLocation::Queued(core);
        if !slot.params.sync {
            slot.fences_owed = 1;
        }
        Ok(slot.params.sync)
    }

    /// Return caller-held slots that were never submitted.
    pub fn release(&self, ids: &[SlotId]) -> GspnResult<()> {
        for &id in ids {
            let slot = self.slot(id)?;
            if slot.location != SlotLocation::Reserved {
                return Err(GspnError::invalid_state(
                    format!("{:?}", slot.location),
                    "release",
                    "only reserved slots can be released by callers",
                ));
            }
        }
        for &id in ids {
            self.recycle(id);
        }
        Ok(())
    }

    /// Return a slot to the free pool whatever its state. Used by the
    /// scheduler once a job is fully completed, and by forced reclaim.
    pub(crate) fn recycle(&self, id: SlotId) {
        let mut free = self.free.lock();
        {
            let mut slot = self.slots[id].lock();
            if slot.location == SlotLocation::Free {
                return;
            }
            slot.reset();
        }
        free.list.push_back(id);
        free.count += 1;
        self.available.notify_all();
    }

    pub fn free_count(&self) -> usize {
        self.free.lock().count
    }

    /// Re-synchronise the free count with the physical list.
    ///
    /// Returns `true` when they had diverged.
    pub fn resync(&self) -> bool {
        let mut free = self.free.lock();
        if free.count == free.list.len() {
            return false;
        }
        warn!(
            "free slot count {} disagrees with free list length {}, re-syncing",
            free.count,
            free.list.len()
        );
        free.count = free.list.len();
        self.available.notify_all();
        true
    }

    /// Count slots by location.
    pub fn census(&self) -> SlotCensus {
        let mut census = SlotCensus::default();
        for slot in self.slots.iter() {
            match slot.lock().location {
                SlotLocation::Free => census.free += 1,
                SlotLocation::Reserved | SlotLocation::Queued(_) => census.admitted += 1,
                SlotLocation::InFlight(_) => census.in_flight += 1,
            }
        }
        census
    }

    /// Census and free count taken together under the free-pool lock.
    pub fn census_with_free_count(&self) -> (SlotCensus, usize) {
        let free = self.free.lock();
        (self.census(), free.count)
    }

    /// Ids of slots currently reserved by callers.
    pub(crate) fn reserved(&self) -> Vec<SlotId> {
        self.slots
            .iter()
            .filter_map(|slot| {
                let slot = slot.lock();
                (slot.location == SlotLocation::Reserved).then_some(slot.id)
            })
            .collect()
    }

    #[cfg(test)]
    fn corrupt_free_count(&self, delta: isize) {
        let mut free = self.free.lock();
        free.count = free.count.saturating_add_signed(delta);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    const SHORT: Duration = Duration::from_millis(20);

    #[test]
    fn test_acquire_and_release() {
        let pool = SlotPool::new(4);
        let ids = pool.acquire(3, SHORT).unwrap();
        assert_eq!(ids, vec![0, 1, 2]);
        assert_eq!(pool.free_count(), 1);
        assert_eq!(
            pool.census(),
            SlotCensus {
                free: 1,
                admitted: 3,
                in_flight: 0
            }
        );

        pool.release(&ids).unwrap();
        assert_eq!(pool.free_count(), 4);
        assert_eq!(pool.census().free, 4);
    }

    #[test]
    fn test_acquire_times_out() {
        let pool = SlotPool::new(2);
        let _held = pool.acquire(2, SHORT).unwrap();
        let err = pool.acquire(1, SHORT).unwrap_err();
        assert_eq!(err.category(), "resource_exhausted");
        assert!(pool.acquire(3, SHORT).is_err());
    }

    #[test]
    fn test_acquire_waits_for_release() {
        let pool = Arc::new(SlotPool::new(1));
        let held = pool.acquire(1, SHORT).unwrap();
        let waiter = {
            let pool = Arc::clone(&pool);
            thread::spawn(move || pool.acquire(1, Duration::from_secs(2)))
        };
        thread::sleep(Duration::from_millis(30));
        pool.release(&held).unwrap();
        assert_eq!(waiter.join().unwrap().unwrap(), vec![0]);
    }

    #[test]
    fn test_closed_admission_wakes_waiters() {
        let pool = Arc::new(SlotPool::new(1));
        let _held = pool.acquire(1, SHORT).unwrap();
        let waiter = {
            let pool = Arc::clone(&pool);
            thread::spawn(move || pool.acquire(1, Duration::from_secs(5)))
        };
        thread::sleep(Duration::from_millis(30));
        pool.set_admission(false);
        let err = waiter.join().unwrap().unwrap_err();
        assert_eq!(err.category(), "suspended");
    }

    #[test]
    fn test_lifecycle_checks() {
        let pool = SlotPool::new(2);
        let ids = pool.acquire(1, SHORT).unwrap();
        assert!(pool.mark_queued(ids[0], 0).is_err());
        pool.fill(ids[0], JobParams::default().asynchronous(), None).unwrap();
        assert!(pool.fill(ids[0], JobParams::default(), None).is_err());
        assert!(!pool.mark_queued(ids[0], 0).unwrap());
        assert_eq!(pool.slot(ids[0]).unwrap().fences_owed, 1);
        assert!(pool.release(&ids).is_err());
        assert!(pool.fill(1, JobParams::default(), None).is_err());
        assert!(pool.slot(7).is_err());
    }

    #[test]
    fn test_tags_are_unique() {
        let pool = SlotPool::new(1);
        let a = pool.acquire(1, SHORT).unwrap();
        let tag_a = pool.slot(a[0]).unwrap().tag;
        pool.release(&a).unwrap();
        let b = pool.acquire(1, SHORT).unwrap();
        assert_ne!(pool.slot(b[0]).unwrap().tag, tag_a);
    }

    #[test]
    fn test_census_agrees_with_free_count_under_churn() {
        let pool = Arc::new(SlotPool::new(4));
        let churners: Vec<_> = (0..2)
            .map(|_| {
                let pool = Arc::clone(&pool);
                thread::spawn(move || {
                    for _ in 0..2000 {
                        let ids = pool.acquire(1, Duration::from_secs(1)).unwrap();
                        pool.release(&ids).unwrap();
                    }
                })
            })
            .collect();
        for _ in 0..5000 {
            let (census, free) = pool.census_with_free_count();
            assert_eq!(census.total(), 4);
            assert_eq!(census.free, free, "census {:?} against free count {}", census, free);
        }
        for churner in churners {
            churner.join().unwrap();
        }
        assert_eq!(pool.census_with_free_count(), (pool.census(), 4));
    }

    #[test]
    fn test_resync_repairs_count() {
        let pool = SlotPool::new(3);
        assert!(!pool.resync());
        pool.corrupt_free_count(-2);
        assert_eq!(pool.free_count(), 1);
        assert!(pool.resync());
        assert_eq!(pool.free_count(), 3);
    }
}
