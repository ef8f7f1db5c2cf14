//! # Submission Front-End
//!
//! The entry point callers use. A [`Gspn`] owns the scheduler context and the
//! scheduler thread; it is built from a [`SchedulerConfig`] and a device
//! implementing the buffer-resolver and register-programmer seams.
//!
//! ## Submission Paths
//!
//! - **Raw**: [`Gspn::acquire`], [`Gspn::fill`], [`Gspn::submit`] and
//!   [`Gspn::release`] expose the admission queue directly.
//! - **Batch**: [`Gspn::submit_batch`] validates N parameter blocks, reserves
//!   N slots, picks a core and submits every job to it. A synchronous batch
//!   blocks on that core's completion condition for the configured wait; an
//!   asynchronous batch returns one [`Fence`] per job.
//!
//! ## Lifecycle
//!
//! [`Gspn::suspend`] closes admission and waits, bounded, for the scheduler
//! to drain. If the drain does not finish in time every resource is forced
//! back to the free pool and the timeout is reported. [`Gspn::resume`]
//! reopens admission with an empty coefficient cache.

use std::sync::Arc;
use std::thread::{self, JoinHandle};

use crossbeam_channel::unbounded;
use log::{error, info, warn};
use parking_lot::Mutex;
use serde::Serialize;

use crate::config::SchedulerConfig;
use crate::core::coef_cache::CacheStats;
use crate::core::error_record::ErrorRecord;
use crate::core::perf_stats::PerfSummary;
use crate::core::slot_pool::{Completion, SlotCensus, SlotId};
use crate::device::{BufferResolver, RegisterProgrammer};
use crate::error::{ErrorBuilder, GspnError, GspnResult};
use crate::job::{JobOutcome, JobParams, LAYER_COUNT};
use crate::sched::context::GspnContext;
use crate::sched::core_pool::CoreState;
use crate::sched::fence::{BatchTracker, Fence};
use crate::sched::scheduler::{Scheduler, Wake};

/// Read-only hardware capability descriptor.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Capability {
    pub version: u32,
    pub core_count: usize,
    pub max_layer_count: usize,
    pub max_layers_with_video: usize,
    pub blend_video_with_osd: bool,
    /// Up-scale limit in sixteenths.
    pub scale_range_up: u32,
    /// Down-scale limit in sixteenths.
    pub scale_range_down: u32,
    pub crop_min: u32,
    pub crop_max: u32,
    pub out_min: u32,
    pub out_max: u32,
    pub yuv_xywh_even: bool,
    pub supported_taps: Vec<u8>,
    pub max_commands: usize,
}

impl Capability {
    pub fn for_cores(core_count: usize, max_commands: usize) -> Self {
        Self {
            version: 0x06,
            core_count,
            max_layer_count: LAYER_COUNT,
            max_layers_with_video: 3,
            blend_video_with_osd: true,
            scale_range_up: 256,
            scale_range_down: 16,
            crop_min: 4,
            crop_max: 4095,
            out_min: 4,
            out_max: 4095,
            yuv_xywh_even: true,
            supported_taps: gspn_coef::coef::SUPPORTED_TAPS.to_vec(),
            max_commands,
        }
    }
}

/// How a batch is waited on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SubmitMode {
    #[default]
    Sync,
    Async,
}

/// Outcomes of a finished synchronous batch, in submission order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BatchReport {
    pub core: usize,
    pub outcomes: Vec<JobOutcome>,
}

impl BatchReport {
    pub fn all_ok(&self) -> bool {
        self.outcomes.iter().all(JobOutcome::is_ok)
    }
}

/// An asynchronous batch still in progress.
#[derive(Debug)]
pub struct AsyncBatch {
    pub core: usize,
    pub fences: Vec<Fence>,
    tracker: Arc<BatchTracker>,
}

impl AsyncBatch {
    /// Wait for every fence of the batch. Returns `false` on timeout.
    pub fn wait(&self, timeout: std::time::Duration) -> bool {
        let deadline = std::time::Instant::now() + timeout;
        self.fences.iter().all(|fence| {
            let left = deadline.saturating_duration_since(std::time::Instant::now());
            fence.wait(left)
        })
    }

    pub fn is_complete(&self) -> bool {
        self.tracker.is_complete()
    }

    /// Outcomes recorded so far, `None` for jobs still running.
    pub fn outcomes(&self) -> Vec<Option<JobOutcome>> {
        self.tracker.outcomes()
    }
}

#[derive(Debug)]
pub enum BatchResult {
    Completed(BatchReport),
    Pending(AsyncBatch),
}

/// Serializable view of one core.
#[derive(Debug, Clone, Serialize)]
pub struct CoreStatus {
    pub id: usize,
    pub state: CoreState,
    pub bound: Option<SlotId>,
    pub queued: usize,
    pub timeline: u64,
    pub pending_fences: u64,
    pub sync_completions: u64,
    pub perf: PerfSummary,
}

/// Point-in-time dump of the whole scheduler.
#[derive(Debug, Clone, Serialize)]
pub struct StatusSnapshot {
    pub suspended: bool,
    pub slots: SlotCensus,
    pub free_count: usize,
    pub cores: Vec<CoreStatus>,
    pub cache: CacheStats,
    pub errors: Vec<ErrorRecord>,
    pub errors_total: u64,
}

pub struct Gspn {
    ctx: Arc<GspnContext>,
    scheduler: Mutex<Option<JoinHandle<()>>>,
}

impl Gspn {
    pub fn builder() -> GspnBuilder {
        GspnBuilder::new()
    }

    pub fn capability(&self) -> &Capability {
        &self.ctx.capability
    }

    pub fn config(&self) -> &SchedulerConfig {
        &self.ctx.config
    }

    /// Shared scheduler context, for inspection.
    pub fn context(&self) -> &Arc<GspnContext> {
        &self.ctx
    }

    /// Reserve `n` job slots, blocking up to the configured acquire timeout.
    pub fn acquire(&self, n: usize) -> GspnResult<Vec<SlotId>> {
        self.ctx.slots.acquire(n, self.ctx.config.acquire_timeout())
    }

    /// Validate `params` and copy them into a reserved slot.
    pub fn fill(&self, slot: SlotId, params: JobParams) -> GspnResult<()> {
        params.validate(&self.ctx.capability)?;
        self.ctx.slots.fill(slot, params, None)
    }

    /// Queue a filled slot on `core` and wake the scheduler.
    ///
    /// Asynchronous jobs get a fence on the core's timeline.
    pub fn submit(&self, slot: SlotId, core: usize) -> GspnResult<Option<Fence>> {
        if self.ctx.is_suspending() {
            return Err(GspnError::suspended("submit"));
        }
        let record = self.ctx.cores.get(core)?;
        let sync = self.ctx.slots.mark_queued(slot, core)?;
        let fence = record.enqueue_fenced(slot, !sync);
        self.ctx.wake(Wake::NewWork);
        Ok(fence)
    }

    /// Return slots that were acquired but never submitted.
    pub fn release(&self, slots: &[SlotId]) -> GspnResult<()> {
        self.ctx.slots.release(slots)
    }

    pub fn submit_sync(&self, jobs: &[JobParams]) -> GspnResult<BatchReport> {
        match self.submit_batch(jobs, SubmitMode::Sync)? {
            BatchResult::Completed(report) => Ok(report),
            BatchResult::Pending(_) => Err(GspnError::invalid_state(
                "pending",
                "submit_sync",
                "synchronous batch returned without completing",
            )),
        }
    }

    pub fn submit_async(&self, jobs: &[JobParams]) -> GspnResult<AsyncBatch> {
        match self.submit_batch(jobs, SubmitMode::Async)? {
            BatchResult::Pending(batch) => Ok(batch),
            BatchResult::Completed(_) => Err(GspnError::invalid_state(
                "completed",
                "submit_async",
                "asynchronous batch was waited on",
            )),
        }
    }

    /// Submit a batch of jobs to a single core.
    pub fn submit_batch(&self, jobs: &[JobParams], mode: SubmitMode) -> GspnResult<BatchResult> {
        if jobs.is_empty() {
            return Err(GspnError::validation("jobs", "at least one job", "0"));
        }
        for (i, job) in jobs.iter().enumerate() {
            job.validate(&self.ctx.capability)
                .map_err(|e| e.with_context(format!("job {} of {}", i, jobs.len())))?;
        }

        let slots = self.acquire(jobs.len())?;
        let core = self.pick_core();
        let tracker = Arc::new(BatchTracker::new(jobs.len()));
        let sync = mode == SubmitMode::Sync;

        let mut fences = Vec::with_capacity(jobs.len());
        for (i, (&slot, job)) in slots.iter().zip(jobs).enumerate() {
            let mut params = *job;
            params.sync = sync;
            let completion = Completion {
                tracker: Arc::clone(&tracker),
                index: i,
            };
            let submitted = self
                .ctx
                .slots
                .fill(slot, params, Some(completion))
                .and_then(|()| self.submit(slot, core));
            match submitted {
                Ok(fence) => fences.extend(fence),
                Err(e) => {
                    if let Err(release) = self.release(&slots[i..]) {
                        warn!("releasing unsubmitted slots: {}", release);
                    }
                    return Err(e);
                }
            }
        }

        if !sync {
            return Ok(BatchResult::Pending(AsyncBatch {
                core,
                fences,
                tracker,
            }));
        }

        let wait = self.ctx.config.sync_wait();
        let record = self.ctx.cores.get(core)?;
        if !record.wait_sync(&tracker, jobs.len(), wait) {
            warn!(
                "synchronous batch of {} on core {} timed out ({} done)",
                jobs.len(),
                core,
                tracker.completed()
            );
            return Err(ErrorBuilder::new(GspnError::timeout("submit_batch", wait.as_millis() as u64))
                .context(format!("core {}", core))
                .metadata("completed", tracker.completed().to_string())
                .metadata("submitted", jobs.len().to_string())
                .recovery_suggestion("The core is recovered once its execution budget expires")
                .build());
        }
        Ok(BatchResult::Completed(BatchReport {
            core,
            outcomes: tracker.outcomes().into_iter().flatten().collect(),
        }))
    }

    /// An idle core with nothing queued, otherwise the least loaded one.
    fn pick_core(&self) -> usize {
        let cores = &self.ctx.cores;
        match cores.select_free_core() {
            Ok(core) if cores.get(core).map(|r| r.queue_len() == 0).unwrap_or(false) => core,
            _ => cores.least_loaded(),
        }
    }

    /// Drain the scheduler and refuse new work until [`Gspn::resume`].
    pub fn suspend(&self) -> GspnResult<()> {
        if self.ctx.is_suspending() {
            return Ok(());
        }
        info!("suspending");
        self.ctx.begin_suspend();
        let timeout = self.ctx.config.suspend_timeout();
        if self.ctx.wait_drained(timeout) {
            info!("suspended");
            return Ok(());
        }
        error!("suspend drain did not finish in {}ms", timeout.as_millis());
        self.ctx.force_reclaim();
        Err(GspnError::timeout("suspend", timeout.as_millis() as u64)
            .with_context("resources were forced back to the free pool"))
    }

    pub fn resume(&self) -> GspnResult<()> {
        if !self.ctx.is_suspending() {
            return Ok(());
        }
        self.ctx.cache.lock().invalidate();
        self.ctx.programmer.resume();
        self.ctx.end_suspend();
        info!("resumed");
        Ok(())
    }

    pub fn is_suspended(&self) -> bool {
        self.ctx.is_suspending()
    }

    /// Stop the scheduler thread. Queued jobs fail as suspended.
    pub fn shutdown(&self) {
        let Some(handle) = self.scheduler.lock().take() else {
            return;
        };
        self.ctx.slots.set_admission(false);
        self.ctx.wake(Wake::Shutdown);
        if handle.join().is_err() {
            error!("scheduler thread panicked");
        }
    }

    pub fn status(&self) -> StatusSnapshot {
        let ctx = &self.ctx;
        let cores = ctx
            .cores
            .iter()
            .map(|record| {
                let (state, bound) = record.snapshot();
                CoreStatus {
                    id: record.id,
                    state,
                    bound,
                    queued: record.queue_len(),
                    timeline: record.timeline.value(),
                    pending_fences: record.timeline.pending(),
                    sync_completions: record.sync_completions(),
                    perf: record.perf(),
                }
            })
            .collect();
        let (slots, free_count) = ctx.slots.census_with_free_count();
        let (errors, errors_total) = {
            let ring = ctx.errors.lock();
            (ring.iter().cloned().collect(), ring.total())
        };
        StatusSnapshot {
            suspended: ctx.is_suspending(),
            slots,
            free_count,
            cores,
            cache: ctx.cache.lock().stats(),
            errors,
            errors_total,
        }
    }

    pub fn check_invariants(&self) -> GspnResult<()> {
        self.ctx.check_invariants()
    }
}

impl Drop for Gspn {
    fn drop(&mut self) {
        self.shutdown();
    }
}

pub struct GspnBuilder {
    config: SchedulerConfig,
    resolver: Option<Arc<dyn BufferResolver>>,
    programmer: Option<Arc<dyn RegisterProgrammer>>,
}

impl GspnBuilder {
    pub fn new() -> Self {
        Self {
            config: SchedulerConfig::default(),
            resolver: None,
            programmer: None,
        }
    }

    pub fn config(mut self, config: SchedulerConfig) -> Self {
        self.config = config;
        self
    }

    pub fn resolver(mut self, resolver: Arc<dyn BufferResolver>) -> Self {
        self.resolver = Some(resolver);
        self
    }

    pub fn programmer(mut self, programmer: Arc<dyn RegisterProgrammer>) -> Self {
        self.programmer = Some(programmer);
        self
    }

    /// Use one object for both device seams.
    pub fn device<D>(self, device: Arc<D>) -> Self
    where
        D: BufferResolver + RegisterProgrammer + 'static,
    {
        let resolver: Arc<dyn BufferResolver> = device.clone();
        let programmer: Arc<dyn RegisterProgrammer> = device;
        self.resolver(resolver).programmer(programmer)
    }

    /// Validate the configuration and start the scheduler thread.
    pub fn build(self) -> GspnResult<Gspn> {
        self.config.validate()?;
        let resolver = self
            .resolver
            .ok_or_else(|| GspnError::config("resolver", "none", "a buffer resolver is required"))?;
        let programmer = self
            .programmer
            .ok_or_else(|| GspnError::config("programmer", "none", "a register programmer is required"))?;

        let (tx, rx) = unbounded();
        let ctx = Arc::new(GspnContext::new(self.config, resolver, programmer, tx));
        let scheduler = Scheduler::new(Arc::clone(&ctx), rx);
        let handle = thread::Builder::new()
            .name("gspn-sched".to_string())
            .spawn(move || scheduler.run())
            .map_err(|e| GspnError::io("spawn scheduler thread", e))?;
        info!(
            "gspn up: {} core(s), {} job slots",
            ctx.config.core_count, ctx.config.max_commands
        );
        Ok(Gspn {
            ctx,
            scheduler: Mutex::new(Some(handle)),
        })
    }
}

impl Default for GspnBuilder {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::SimDevice;
    use crate::job::{BufferHandle, Rect};
    use std::time::Duration;

    fn system(cores: usize, slots: usize) -> (Gspn, Arc<SimDevice>) {
        let device = Arc::new(SimDevice::new(cores).with_latency(Duration::from_millis(2)));
        let config = SchedulerConfig {
            core_count: cores,
            max_commands: slots,
            ..SchedulerConfig::default()
        };
        let gspn = Gspn::builder().config(config).device(Arc::clone(&device)).build().unwrap();
        (gspn, device)
    }

    fn job() -> JobParams {
        JobParams::scale(
            BufferHandle(1),
            Rect::new(0, 0, 100, 100),
            BufferHandle(2),
            Rect::new(0, 0, 50, 50),
        )
    }

    #[test]
    fn test_capability_descriptor() {
        let cap = Capability::for_cores(2, 16);
        assert_eq!(cap.core_count, 2);
        assert_eq!(cap.max_commands, 16);
        assert_eq!(cap.supported_taps, vec![2, 4, 6, 8]);
        let json = serde_json::to_value(&cap).unwrap();
        assert_eq!(json["crop_max"], 4095);
    }

    #[test]
    fn test_builder_requires_device() {
        let err = Gspn::builder().build().err().unwrap();
        assert_eq!(err.category(), "config");
    }

    #[test]
    fn test_sync_batch_completes() {
        let (gspn, device) = system(1, 4);
        let report = gspn.submit_sync(&[job(), job()]).unwrap();
        assert_eq!(report.outcomes.len(), 2);
        assert!(report.all_ok());
        assert_eq!(device.outstanding_buffers(), 0);
        gspn.check_invariants().unwrap();
    }

    #[test]
    fn test_raw_submit_with_fence() {
        let (gspn, _device) = system(1, 2);
        let slots = gspn.acquire(1).unwrap();
        gspn.fill(slots[0], job().asynchronous()).unwrap();
        let fence = gspn.submit(slots[0], 0).unwrap().unwrap();
        assert!(fence.wait(Duration::from_secs(2)));
        assert!(gspn.submit(slots[0], 0).is_err());
    }

    #[test]
    fn test_release_unsubmitted() {
        let (gspn, _device) = system(1, 2);
        let slots = gspn.acquire(2).unwrap();
        assert_eq!(gspn.status().slots.admitted, 2);
        gspn.release(&slots).unwrap();
        assert_eq!(gspn.status().free_count, 2);
    }

    #[test]
    fn test_status_serializes() {
        let (gspn, _device) = system(2, 4);
        let json = serde_json::to_string(&gspn.status()).unwrap();
        assert!(json.contains("\"cores\""));
        assert!(json.contains("\"Free\""));
    }
}
