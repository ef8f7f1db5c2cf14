//! # Scheduling Loop
//!
//! The one thread that mutates core state and talks to the hardware.
//!
//! ## States
//!
//! - **Idle-wait**: block on the wake channel with a computed deadline:
//!   forever when every core is free and every queue empty, the short
//!   dispatch-retry interval when a free core has queued work, otherwise the
//!   smallest remaining execution budget of the busy cores.
//! - **Reap**: a Busy core whose job was acknowledged by hardware and whose
//!   busy signal is clear is unbound and its job completed. An Exception core
//!   is unbound and its job completed as a timeout failure.
//! - **Dispatch**: every Free core with queued work pops its oldest job,
//!   binds it, resolves buffers, resolves coefficients, programs and
//!   triggers. Any failure before the trigger unwinds the binding and fails
//!   that job alone.
//! - **Suspend-drain**: queued jobs and jobs not yet acknowledged are
//!   completed as suspended, cores are recovered and freed, and the drain
//!   complete signal is raised once every core is Free.
//!
//! Timeout detection runs before Reap on every pass: a Busy core past its
//! budget is recovered and marked Exception for the following Reap.

use std::sync::Arc;
use std::time::{Duration, Instant};

use crossbeam_channel::{Receiver, RecvTimeoutError};
use log::{debug, error, info, warn};

use crate::core::error_record::ErrorKind;
use crate::core::slot_pool::SlotId;
use crate::device::ProgramRequest;
use crate::error::GspnError;
use crate::job::{DEST_LAYER, FailReason, JobOutcome, JobStatus};
use crate::sched::context::{GspnContext, suspended};
use crate::sched::core_pool::CoreState;

/// Reasons the scheduler is woken.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Wake {
    NewWork,
    Irq,
    Suspend,
    Resume,
    Shutdown,
}

pub struct Scheduler {
    ctx: Arc<GspnContext>,
    rx: Receiver<Wake>,
}

impl Scheduler {
    pub fn new(ctx: Arc<GspnContext>, rx: Receiver<Wake>) -> Self {
        Self { ctx, rx }
    }

    /// Run until a shutdown wake arrives or every sender is gone.
    pub fn run(self) {
        info!(
            "scheduler started: {} core(s), {} slots",
            self.ctx.cores.len(),
            self.ctx.slots.capacity()
        );
        loop {
            if self.ctx.is_suspending() && self.ctx.drain_pending() {
                self.drain();
                self.ctx.signal_drained();
            }

            let wake = match self.idle_deadline() {
                None => match self.rx.recv() {
                    Ok(wake) => Some(wake),
                    Err(_) => break,
                },
                Some(timeout) => match self.rx.recv_timeout(timeout) {
                    Ok(wake) => Some(wake),
                    Err(RecvTimeoutError::Timeout) => None,
                    Err(RecvTimeoutError::Disconnected) => break,
                },
            };

            match wake {
                Some(Wake::Shutdown) => {
                    self.drain();
                    self.ctx.signal_drained();
                    break;
                }
                Some(Wake::Suspend) | Some(Wake::Resume) => continue,
                Some(Wake::NewWork) | Some(Wake::Irq) => {}
                None => debug!("idle wait expired"),
            }
            if self.ctx.is_suspending() {
                continue;
            }

            self.detect_timeouts();
            self.reap();
            self.dispatch();
            self.ctx.slots.resync();
        }
        info!("scheduler stopped");
    }

    fn idle_deadline(&self) -> Option<Duration> {
        let ctx = &self.ctx;
        let budget = ctx.config.exec_budget();
        let mut deadline: Option<Duration> = None;
        let mut consider = |d: Duration| {
            deadline = Some(deadline.map_or(d, |cur| cur.min(d)));
        };
        for record in ctx.cores.iter() {
            match record.state() {
                CoreState::Free => {
                    if record.queue_len() > 0 && !ctx.is_suspending() {
                        consider(ctx.config.dispatch_retry());
                    }
                }
                CoreState::Busy => {
                    let elapsed = record.triggered_at().map(|t| t.elapsed()).unwrap_or_default();
                    let remaining = budget.saturating_sub(elapsed);
                    if self.is_reapable(record.id) {
                        consider(ctx.config.dispatch_retry());
                    } else if ctx.cores.is_acknowledged(record.id, &ctx.slots) {
                        // completion seen, busy signal still up: poll, but keep the budget
                        consider(ctx.config.dispatch_retry().min(remaining));
                    } else {
                        consider(remaining);
                    }
                }
                CoreState::Occupied | CoreState::Configured | CoreState::Exception => {
                    consider(Duration::ZERO)
                }
            }
        }
        deadline
    }

    /// Acknowledged by the completion line and no longer driving busy.
    fn is_reapable(&self, core: usize) -> bool {
        self.ctx.cores.is_acknowledged(core, &self.ctx.slots) && !self.ctx.programmer.is_busy(core)
    }

    /// Recover Busy cores that have run past their execution budget.
    ///
    /// A core that raised completion but still reports busy is not reapable
    /// and stays subject to the budget.
    fn detect_timeouts(&self) {
        let ctx = &self.ctx;
        let budget = ctx.config.exec_budget();
        for record in ctx.cores.iter() {
            if record.state() != CoreState::Busy || self.is_reapable(record.id) {
                continue;
            }
            let Some(elapsed) = record.triggered_at().map(|t| t.elapsed()) else {
                continue;
            };
            if elapsed <= budget {
                continue;
            }
            warn!(
                "core {} exceeded its {}ms budget ({}ms), recovering",
                record.id,
                budget.as_millis(),
                elapsed.as_millis()
            );
            let dump = ctx.programmer.dump(record.id);
            ctx.programmer.recover(record.id);
            ctx.push_error(record.id, ErrorKind::Timeout, 0, dump);
            if let Err(e) = ctx.cores.mark_exception(record.id) {
                warn!("core {}: {}", record.id, e);
            }
        }
    }

    fn reap(&self) {
        let ctx = &self.ctx;
        for record in ctx.cores.iter() {
            let core = record.id;
            match record.state() {
                CoreState::Busy if self.is_reapable(core) => {
                    match ctx.cores.unbind(core, &ctx.slots) {
                        Ok(slot_id) => {
                            let exec = self.post_process(slot_id, core);
                            record.record_exec(exec);
                            ctx.complete_job(
                                slot_id,
                                JobOutcome::Completed {
                                    core,
                                    exec_us: exec.as_micros() as u64,
                                },
                            );
                        }
                        Err(e) => warn!("reap core {}: {}", core, e),
                    }
                }
                CoreState::Exception => match ctx.cores.unbind(core, &ctx.slots) {
                    Ok(slot_id) => {
                        ctx.release_buffers(slot_id);
                        ctx.complete_job(
                            slot_id,
                            JobOutcome::Failed {
                                core: Some(core),
                                reason: FailReason::Timeout,
                            },
                        );
                    }
                    Err(e) => warn!("reap core {}: {}", core, e),
                },
                _ => {}
            }
        }
    }

    /// Release buffers of a finished job and return its execution time.
    fn post_process(&self, slot_id: SlotId, core: usize) -> Duration {
        self.ctx.release_buffers(slot_id);
        match self.ctx.slots.slot(slot_id) {
            Ok(mut slot) => {
                slot.status = JobStatus::PostProcessed;
                slot.triggered_at.map(|t| t.elapsed()).unwrap_or_default()
            }
            Err(e) => {
                warn!("post-process slot {} on core {}: {}", slot_id, core, e);
                Duration::ZERO
            }
        }
    }

    fn dispatch(&self) {
        let ctx = &self.ctx;
        for record in ctx.cores.iter() {
            let core = record.id;
            if record.state() != CoreState::Free {
                continue;
            }
            let Some(slot_id) = record.pop_queued() else {
                continue;
            };
            if let Err(e) = ctx.cores.bind(core, slot_id, &ctx.slots) {
                warn!("bind slot {} to core {}: {}", slot_id, core, e);
                ctx.complete_job(
                    slot_id,
                    JobOutcome::Failed {
                        core: Some(core),
                        reason: FailReason::Suspended,
                    },
                );
                continue;
            }
            match self.program_and_trigger(core, slot_id) {
                Ok(()) => debug!("dispatched slot {} on core {}", slot_id, core),
                Err((reason, e)) => {
                    warn!("dispatch of slot {} on core {} failed: {}", slot_id, core, e);
                    if let Err(e) = ctx.cores.unwind(core, &ctx.slots) {
                        warn!("unwind core {}: {}", core, e);
                    }
                    ctx.release_buffers(slot_id);
                    ctx.complete_job(
                        slot_id,
                        JobOutcome::Failed {
                            core: Some(core),
                            reason,
                        },
                    );
                }
            }
        }
    }

    fn program_and_trigger(&self, core: usize, slot_id: SlotId) -> Result<(), (FailReason, GspnError)> {
        let ctx = &self.ctx;
        let (params, tag) = {
            let slot = ctx.slots.slot(slot_id).map_err(|e| (FailReason::Suspended, e))?;
            (slot.params, slot.tag)
        };

        let mut addresses = [None; DEST_LAYER + 1];
        for (layer, entry) in params.enabled_layers() {
            match ctx.resolver.resolve(layer, entry.buffer) {
                Ok(addr) => addresses[layer] = Some(addr),
                Err(e) => {
                    for (done, entry) in params.enabled_layers() {
                        if let Some(addr) = addresses[done].take() {
                            ctx.resolver.release(done, entry.buffer, addr);
                        }
                    }
                    return Err((FailReason::Resolve { layer }, e));
                }
            }
        }
        if let Ok(mut slot) = ctx.slots.slot(slot_id) {
            slot.resolved = addresses;
        }

        let plan = params
            .scale_plan()
            .map_err(|e| (FailReason::Coefficient, GspnError::coefficient(e)))?;
        let coefficients = match plan.and_then(|p| p.key) {
            Some(key) => {
                let mut cache = ctx.cache.lock();
                let matrix = cache
                    .get_or_generate(&key)
                    .map_err(|e| (FailReason::Coefficient, GspnError::coefficient(e)))?;
                Some(*matrix)
            }
            None => None,
        };

        let request = ProgramRequest {
            tag,
            params: &params,
            addresses: &addresses,
            plan: plan.as_ref(),
            coefficients: coefficients.as_ref(),
        };
        let code = ctx.programmer.program(core, &request);
        if !ctx.config.is_benign(code) {
            let dump = ctx.programmer.dump(core);
            error!("core {} configuration failed with code {:#x}\n{}", core, code, dump);
            ctx.push_error(core, ErrorKind::Config, code, dump);
            return Err((
                FailReason::HwConfig { code },
                GspnError::hw_config(core, code).with_context(format!("slot {}", slot_id)),
            ));
        }
        if code != 0 {
            debug!("core {} tolerated configuration code {:#x}", core, code);
        }

        let state_err = |e| (FailReason::Suspended, e);
        ctx.cores.mark_configured(core).map_err(state_err)?;
        ctx.cores.mark_busy(core, &ctx.slots).map_err(state_err)?;
        ctx.programmer.trigger(core, ctx.irq_line());
        Ok(())
    }

    /// Complete everything admitted or in flight and free every core.
    fn drain(&self) {
        let ctx = &self.ctx;
        info!("draining scheduler");
        let started = Instant::now();
        for record in ctx.cores.iter() {
            for slot_id in record.drain_queue() {
                ctx.complete_job(slot_id, suspended(Some(record.id)));
            }
        }
        for record in ctx.cores.iter() {
            let core = record.id;
            if record.bound().is_none() {
                continue;
            }
            let finished = record.state() == CoreState::Busy && self.is_reapable(core);
            if finished {
                if let Ok(slot_id) = ctx.cores.unbind(core, &ctx.slots) {
                    let exec = self.post_process(slot_id, core);
                    record.record_exec(exec);
                    ctx.complete_job(
                        slot_id,
                        JobOutcome::Completed {
                            core,
                            exec_us: exec.as_micros() as u64,
                        },
                    );
                }
                continue;
            }
            ctx.programmer.recover(core);
            if let Some(slot_id) = ctx.cores.force_free(core, &ctx.slots) {
                ctx.release_buffers(slot_id);
                ctx.complete_job(slot_id, suspended(Some(core)));
            }
        }
        // late submissions that raced the suspend flag
        for record in ctx.cores.iter() {
            for slot_id in record.drain_queue() {
                ctx.complete_job(slot_id, suspended(Some(record.id)));
            }
        }
        let busy: Vec<usize> = ctx
            .cores
            .iter()
            .filter(|r| r.state() != CoreState::Free)
            .map(|r| r.id)
            .collect();
        if busy.is_empty() {
            info!("drain complete in {}ms", started.elapsed().as_millis());
        } else {
            warn!("cores {:?} still bound after drain", busy);
        }
    }
}
