//! # Core Pool
//!
//! State of the hardware execution units and the job-to-core binding rules.
//!
//! ```text
//!          bind              program ok          trigger
//!   Free ────────▶ Occupied ───────────▶ Configured ──────▶ Busy
//!    ▲  ▲              │                     │               │  │
//!    │  └── unwind ────┴─────────────────────┘               │  │ budget exceeded
//!    │                                                       │  ▼
//!    └──────────────────────── unbind (reap) ────────────────┴ Exception
//! ```
//!
//! Only [`CorePool::bind`] enters Occupied, and only [`CorePool::unbind`]
//! leaves Busy or Exception. Dispatch failures between bind and trigger use
//! [`CorePool::unwind`], so a core is never left marked Busy by a job that was
//! not triggered.
//!
//! Each core owns its admitted queue (own lock), the condition variable
//! synchronous callers wait on, its completion timeline and its
//! execution-time statistics. Lock order: core state, then slot.

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Instant;

use log::debug;
use parking_lot::{Condvar, Mutex};
use serde::Serialize;

use crate::core::perf_stats::{PerfStats, PerfSummary};
use crate::core::slot_pool::{SlotId, SlotPool};
use crate::error::{GspnError, GspnResult};
use crate::job::{JobStatus, SlotLocation};
use crate::sched::fence::{BatchTracker, Fence, Timeline};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum CoreState {
    Free,
    Occupied,
    Configured,
    Busy,
    Exception,
}

#[derive(Debug)]
struct CoreInner {
    state: CoreState,
    bound: Option<SlotId>,
    triggered_at: Option<Instant>,
}

/// One execution unit.
#[derive(Debug)]
pub struct CoreRecord {
    pub id: usize,
    inner: Mutex<CoreInner>,
    queue: Mutex<VecDeque<SlotId>>,
    /// Synchronous completions signalled on this core.
    sync_done: Mutex<u64>,
    sync_cv: Condvar,
    pub timeline: Arc<Timeline>,
    perf: Mutex<PerfStats>,
}

impl CoreRecord {
    fn new(id: usize) -> Self {
        Self {
            id,
            inner: Mutex::new(CoreInner {
                state: CoreState::Free,
                bound: None,
                triggered_at: None,
            }),
            queue: Mutex::new(VecDeque::new()),
            sync_done: Mutex::new(0),
            sync_cv: Condvar::new(),
            timeline: Arc::new(Timeline::new(id)),
            perf: Mutex::new(PerfStats::new()),
        }
    }

    pub fn state(&self) -> CoreState {
        self.inner.lock().state
    }

    pub fn bound(&self) -> Option<SlotId> {
        self.inner.lock().bound
    }

    pub fn triggered_at(&self) -> Option<Instant> {
        self.inner.lock().triggered_at
    }

    /// Queue a job and, when `fenced`, create its fence while the queue lock
    /// is held, so fence targets follow queue order.
    pub fn enqueue_fenced(&self, slot: SlotId, fenced: bool) -> Option<Fence> {
        let mut queue = self.queue.lock();
        let fence = fenced.then(|| self.timeline.create_fence());
        queue.push_back(slot);
        fence
    }

    /// State and binding read under one lock.
    pub fn snapshot(&self) -> (CoreState, Option<SlotId>) {
        let inner = self.inner.lock();
        (inner.state, inner.bound)
    }

    pub fn pop_queued(&self) -> Option<SlotId> {
        self.queue.lock().pop_front()
    }

    pub fn drain_queue(&self) -> Vec<SlotId> {
        self.queue.lock().drain(..).collect()
    }

    pub fn queue_len(&self) -> usize {
        self.queue.lock().len()
    }

    pub fn queued(&self) -> Vec<SlotId> {
        self.queue.lock().iter().copied().collect()
    }

    /// Jobs waiting or running on this core.
    pub fn load(&self) -> usize {
        let bound = usize::from(self.bound().is_some());
        self.queue_len() + bound
    }

    /// Wake synchronous waiters after a job of theirs completed.
    pub fn notify_sync(&self) {
        let mut done = self.sync_done.lock();
        *done += 1;
        self.sync_cv.notify_all();
    }

    /// Wait until `tracker` has `n` outcomes or `timeout` elapses.
    pub fn wait_sync(&self, tracker: &BatchTracker, n: usize, timeout: std::time::Duration) -> bool {
        let mut done = self.sync_done.lock();
        self.sync_cv
            .wait_while_for(&mut done, |_| tracker.completed() < n, timeout);
        tracker.completed() >= n
    }

    pub fn sync_completions(&self) -> u64 {
        *self.sync_done.lock()
    }

    /// Check that the binding agrees with the core state and that every
    /// bound or queued slot points back at this core.
    ///
    /// Slot locks are taken while the core's own locks are held, so the
    /// check sees one consistent view of each side.
    pub fn check_binding(&self, slots: &SlotPool) -> GspnResult<()> {
        {
            let inner = self.inner.lock();
            let consistent = match inner.state {
                CoreState::Free => inner.bound.is_none(),
                _ => inner.bound.is_some(),
            };
            if !consistent {
                return Err(GspnError::invalid_state(
                    format!("{:?} bound={:?}", inner.state, inner.bound),
                    "check_invariants",
                    format!("core {} binding does not match its state", self.id),
                ));
            }
            if let Some(slot_id) = inner.bound {
                let location = slots.slot(slot_id)?.location;
                if location != SlotLocation::InFlight(self.id) {
                    return Err(GspnError::invalid_state(
                        format!("{:?}", location),
                        "check_invariants",
                        format!("slot {} bound to core {} is not in flight there", slot_id, self.id),
                    ));
                }
            }
        }
        let queue = self.queue.lock();
        for &slot_id in queue.iter() {
            let location = slots.slot(slot_id)?.location;
            if location != SlotLocation::Queued(self.id) {
                return Err(GspnError::invalid_state(
                    format!("{:?}", location),
                    "check_invariants",
                    format!("slot {} in core {} queue is not queued there", slot_id, self.id),
                ));
            }
        }
        Ok(())
    }

    pub fn record_exec(&self, elapsed: std::time::Duration) {
        self.perf.lock().record(elapsed);
    }

    pub fn perf(&self) -> PerfSummary {
        self.perf.lock().summary()
    }
}

#[derive(Debug)]
pub struct CorePool {
    cores: Box<[CoreRecord]>,
}

impl CorePool {
    pub fn new(count: usize) -> Self {
        Self {
            cores: (0..count).map(CoreRecord::new).collect(),
        }
    }

    pub fn len(&self) -> usize {
        self.cores.len()
    }

    pub fn is_empty(&self) -> bool {
        self.cores.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &CoreRecord> {
        self.cores.iter()
    }

    pub fn get(&self, core: usize) -> GspnResult<&CoreRecord> {
        self.cores.get(core).ok_or_else(|| {
            GspnError::validation("core", format!("below {}", self.cores.len()), core.to_string())
        })
    }

    /// Lowest-index core in the Free state.
    pub fn select_free_core(&self) -> GspnResult<usize> {
        self.cores
            .iter()
            .position(|c| c.state() == CoreState::Free)
            .ok_or_else(GspnError::no_free_core)
    }

    /// Core with the fewest queued plus running jobs, lowest index on ties.
    pub fn least_loaded(&self) -> usize {
        self.cores
            .iter()
            .min_by_key(|c| (c.load(), c.id))
            .map(|c| c.id)
            .unwrap_or(0)
    }

    /// Free → Occupied, recording the back-references on both sides.
    pub fn bind(&self, core: usize, slot_id: SlotId, slots: &SlotPool) -> GspnResult<()> {
        let record = self.get(core)?;
        let mut inner = record.inner.lock();
        if inner.state != CoreState::Free {
            return Err(GspnError::invalid_state(
                format!("{:?}", inner.state),
                "bind",
                format!("core {} is not free", core),
            ));
        }
        let mut slot = slots.slot(slot_id)?;
        if slot.location != SlotLocation::Queued(core) || slot.status != JobStatus::Filled {
            return Err(GspnError::invalid_state(
                format!("{:?}/{:?}", slot.location, slot.status),
                "bind",
                format!("slot {} is not queued on core {}", slot_id, core),
            ));
        }
        slot.location = SlotLocation::InFlight(core);
        slot.core = Some(core);
        slot.status = JobStatus::Dispatched;
        inner.state = CoreState::Occupied;
        inner.bound = Some(slot_id);
        debug!("bound slot {} to core {}", slot_id, core);
        Ok(())
    }

    /// Occupied → Configured.
    pub fn mark_configured(&self, core: usize) -> GspnResult<()> {
        self.transition(core, &[CoreState::Occupied], CoreState::Configured, "configure")
    }

    /// Configured → Busy. The trigger time is stamped on core and slot.
    pub fn mark_busy(&self, core: usize, slots: &SlotPool) -> GspnResult<()> {
        let record = self.get(core)?;
        let mut inner = record.inner.lock();
        if inner.state != CoreState::Configured {
            return Err(GspnError::invalid_state(format!("{:?}", inner.state), "trigger", "core not configured"));
        }
        let now = Instant::now();
        if let Some(slot_id) = inner.bound {
            slots.slot(slot_id)?.triggered_at = Some(now);
        }
        inner.state = CoreState::Busy;
        inner.triggered_at = Some(now);
        Ok(())
    }

    /// Busy → Exception, after recovery of a stalled core.
    pub fn mark_exception(&self, core: usize) -> GspnResult<()> {
        self.transition(core, &[CoreState::Busy], CoreState::Exception, "mark_exception")
    }

    /// Busy or Exception → Free. Reap path only.
    pub fn unbind(&self, core: usize, slots: &SlotPool) -> GspnResult<SlotId> {
        self.release_binding(core, slots, &[CoreState::Busy, CoreState::Exception], "unbind")
    }

    /// Occupied or Configured → Free, for dispatch failures before trigger.
    pub fn unwind(&self, core: usize, slots: &SlotPool) -> GspnResult<SlotId> {
        self.release_binding(core, slots, &[CoreState::Occupied, CoreState::Configured], "unwind")
    }

    /// Any state → Free. Suspend drain and forced reclaim only.
    pub fn force_free(&self, core: usize, slots: &SlotPool) -> Option<SlotId> {
        let record = self.cores.get(core)?;
        let mut inner = record.inner.lock();
        let bound = inner.bound.take();
        if let Some(slot_id) = bound {
            if let Ok(mut slot) = slots.slot(slot_id) {
                slot.core = None;
            }
        }
        inner.state = CoreState::Free;
        inner.triggered_at = None;
        bound
    }

    /// Hardware acknowledgement of the job bound to a Busy core.
    ///
    /// Returns `false` for spurious acknowledgements.
    pub fn acknowledge(&self, core: usize, slots: &SlotPool) -> bool {
        let Some(record) = self.cores.get(core) else {
            return false;
        };
        let inner = record.inner.lock();
        let (CoreState::Busy, Some(slot_id)) = (inner.state, inner.bound) else {
            debug!("spurious completion on core {} in {:?}", core, inner.state);
            return false;
        };
        match slots.slot(slot_id) {
            Ok(mut slot) if slot.status == JobStatus::Dispatched => {
                slot.status = JobStatus::HwAcknowledged;
                true
            }
            _ => false,
        }
    }

    /// True when the job bound to `core` has been acknowledged by hardware.
    pub fn is_acknowledged(&self, core: usize, slots: &SlotPool) -> bool {
        let Some(record) = self.cores.get(core) else {
            return false;
        };
        let inner = record.inner.lock();
        inner
            .bound
            .and_then(|id| slots.slot(id).ok().map(|s| s.status == JobStatus::HwAcknowledged))
            .unwrap_or(false)
    }

    fn transition(&self, core: usize, from: &[CoreState], to: CoreState, op: &str) -> GspnResult<()> {
        let record = self.get(core)?;
        let mut inner = record.inner.lock();
        if !from.contains(&inner.state) {
            return Err(GspnError::invalid_state(format!("{:?}", inner.state), op, format!("core {}", core)));
        }
        inner.state = to;
        Ok(())
    }

    fn release_binding(
        &self,
        core: usize,
        slots: &SlotPool,
        from: &[CoreState],
        op: &str,
    ) -> GspnResult<SlotId> {
        let record = self.get(core)?;
        let mut inner = record.inner.lock();
        if !from.contains(&inner.state) {
            return Err(GspnError::invalid_state(format!("{:?}", inner.state), op, format!("core {}", core)));
        }
        let slot_id = inner.bound.take().ok_or_else(|| {
            GspnError::invalid_state(format!("{:?}", inner.state), op, "no job bound")
        })?;
        slots.slot(slot_id)?.core = None;
        inner.state = CoreState::Free;
        inner.triggered_at = None;
        debug!("{} core {} from slot {}", op, core, slot_id);
        Ok(slot_id)
    }
}
