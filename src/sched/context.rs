//! # Scheduler Context
//!
//! The single explicit value holding all scheduler state: slot pool, core
//! pool, coefficient cache, error records, device handles and the suspend
//! handshake. It is created once by [`crate::session::GspnBuilder::build`],
//! shared between the front-end and the scheduler thread through an `Arc`,
//! and dropped at shutdown. There is no global state.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, SystemTime};

use crossbeam_channel::Sender;
use log::{debug, warn};
use parking_lot::{Condvar, Mutex};

use crate::config::SchedulerConfig;
use crate::core::coef_cache::CoefCache;
use crate::core::error_record::{ErrorKind, ErrorRecord, ErrorRecordRing};
use crate::core::slot_pool::{SlotId, SlotPool};
use crate::device::{BufferResolver, IrqLine, RegisterProgrammer};
use crate::error::{GspnError, GspnResult};
use crate::job::{FailReason, JobOutcome, SlotLocation};
use crate::sched::core_pool::CorePool;
use crate::sched::scheduler::Wake;
use crate::session::Capability;

#[derive(Debug, Default)]
struct DrainState {
    complete: bool,
}

pub struct GspnContext {
    pub config: SchedulerConfig,
    pub capability: Capability,
    pub slots: Arc<SlotPool>,
    pub cores: Arc<CorePool>,
    pub cache: Mutex<CoefCache>,
    pub errors: Mutex<ErrorRecordRing>,
    pub resolver: Arc<dyn BufferResolver>,
    pub programmer: Arc<dyn RegisterProgrammer>,
    wake: Sender<Wake>,
    suspending: AtomicBool,
    drain: Mutex<DrainState>,
    drained: Condvar,
}

impl GspnContext {
    pub(crate) fn new(
        config: SchedulerConfig,
        resolver: Arc<dyn BufferResolver>,
        programmer: Arc<dyn RegisterProgrammer>,
        wake: Sender<Wake>,
    ) -> Self {
        let capability = Capability::for_cores(config.core_count, config.max_commands);
        Self {
            slots: Arc::new(SlotPool::new(config.max_commands)),
            cores: Arc::new(CorePool::new(config.core_count)),
            cache: Mutex::new(CoefCache::new()),
            errors: Mutex::new(ErrorRecordRing::new()),
            capability,
            config,
            resolver,
            programmer,
            wake,
            suspending: AtomicBool::new(false),
            drain: Mutex::new(DrainState { complete: true }),
            drained: Condvar::new(),
        }
    }

    pub fn wake(&self, reason: Wake) {
        if self.wake.send(reason).is_err() {
            debug!("scheduler gone, dropping {:?}", reason);
        }
    }

    pub fn irq_line(&self) -> IrqLine {
        IrqLine::new(Arc::clone(&self.cores), Arc::clone(&self.slots), self.wake.clone())
    }

    pub fn is_suspending(&self) -> bool {
        self.suspending.load(Ordering::SeqCst)
    }

    /// Close admission and ask the scheduler to drain.
    pub(crate) fn begin_suspend(&self) {
        self.drain.lock().complete = false;
        self.suspending.store(true, Ordering::SeqCst);
        self.slots.set_admission(false);
        self.wake(Wake::Suspend);
    }

    pub(crate) fn end_suspend(&self) {
        self.suspending.store(false, Ordering::SeqCst);
        self.slots.set_admission(true);
        self.wake(Wake::Resume);
    }

    pub(crate) fn drain_pending(&self) -> bool {
        !self.drain.lock().complete
    }

    pub(crate) fn signal_drained(&self) {
        let mut drain = self.drain.lock();
        drain.complete = true;
        self.drained.notify_all();
    }

    /// Wait for the scheduler's drain-complete signal.
    pub(crate) fn wait_drained(&self, timeout: Duration) -> bool {
        let mut drain = self.drain.lock();
        self.drained
            .wait_while_for(&mut drain, |d| !d.complete, timeout);
        drain.complete
    }

    pub(crate) fn push_error(&self, core: usize, kind: ErrorKind, code: i32, dump: String) {
        self.errors.lock().push(ErrorRecord {
            core,
            kind,
            code,
            dump,
            when: SystemTime::now(),
        });
    }

    /// Release every resolved buffer of a slot.
    pub(crate) fn release_buffers(&self, slot_id: SlotId) {
        let Ok(mut slot) = self.slots.slot(slot_id) else {
            return;
        };
        let params = slot.params;
        for (layer, entry) in params.enabled_layers() {
            if let Some(addr) = slot.resolved[layer].take() {
                self.resolver.release(layer, entry.buffer, addr);
            }
        }
    }

    /// Report a job's outcome, signal whoever waits for it and return its
    /// slot to the free pool.
    ///
    /// Safe to call twice for the same slot; only the first call signals.
    pub(crate) fn complete_job(&self, slot_id: SlotId, outcome: JobOutcome) {
        let (completion, sync, fence_owed, core) = {
            let Ok(mut slot) = self.slots.slot(slot_id) else {
                return;
            };
            let core = match slot.location {
                SlotLocation::Queued(c) | SlotLocation::InFlight(c) => c,
                SlotLocation::Free | SlotLocation::Reserved => return,
            };
            let fence_owed = std::mem::take(&mut slot.fences_owed) > 0;
            (slot.completion.take(), slot.params.sync, fence_owed, core)
        };

        match outcome {
            JobOutcome::Completed { exec_us, .. } => {
                debug!("slot {} done on core {} in {}us", slot_id, core, exec_us)
            }
            JobOutcome::Failed { reason, .. } => {
                debug!("slot {} failed on core {}: {:?}", slot_id, core, reason)
            }
        }

        let signalled = match &completion {
            Some(c) => c.tracker.record(c.index, outcome),
            None => fence_owed,
        };
        if let Ok(record) = self.cores.get(core) {
            if sync {
                if signalled {
                    record.notify_sync();
                }
            } else if fence_owed {
                record.timeline.increment();
            }
        }
        self.slots.recycle(slot_id);
    }

    /// Fail every queued job and free every core from the calling thread.
    ///
    /// Used when a suspend drain does not finish in time.
    pub(crate) fn force_reclaim(&self) {
        warn!("forcing all scheduler resources back to the free pool");
        for record in self.cores.iter() {
            for slot_id in record.drain_queue() {
                self.complete_job(slot_id, suspended(Some(record.id)));
            }
            if let Some(slot_id) = self.cores.force_free(record.id, &self.slots) {
                self.programmer.recover(record.id);
                self.release_buffers(slot_id);
                self.complete_job(slot_id, suspended(Some(record.id)));
            }
        }
        let reserved = self.slots.reserved();
        if !reserved.is_empty() {
            debug!("slots {:?} stay with the callers that reserved them", reserved);
        }
        self.slots.resync();
    }

    /// Verify slot membership and core binding invariants.
    pub fn check_invariants(&self) -> GspnResult<()> {
        let (census, free) = self.slots.census_with_free_count();
        if census.total() != self.slots.capacity() {
            return Err(GspnError::invalid_state(
                format!("{:?}", census),
                "check_invariants",
                format!("slot census does not add up to {}", self.slots.capacity()),
            ));
        }
        if free != census.free {
            return Err(GspnError::invalid_state(
                format!("free_count={} census.free={}", free, census.free),
                "check_invariants",
                "free pool count disagrees with slot locations",
            ));
        }
        for record in self.cores.iter() {
            record.check_binding(&self.slots)?;
        }
        Ok(())
    }
}

pub(crate) fn suspended(core: Option<usize>) -> JobOutcome {
    JobOutcome::Failed {
        core,
        reason: FailReason::Suspended,
    }
}
