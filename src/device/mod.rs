//! # Device Seams
//!
//! The narrow interfaces between the scheduler and the collaborators it does
//! not implement: buffer translation and register programming. The scheduler
//! thread is the only caller of both traits.
//!
//! Hardware reports completion through an [`IrqLine`], which is handed to
//! [`RegisterProgrammer::trigger`] for each job.

pub mod sim;

use std::sync::Arc;

use crossbeam_channel::Sender;
use gspn_coef::{CoefMatrix, ScalePlan};
use log::{debug, trace};

use crate::core::slot_pool::SlotPool;
use crate::error::GspnResult;
use crate::job::{BufferHandle, DEST_LAYER, HwAddr, JobParams};
use crate::sched::core_pool::CorePool;
use crate::sched::scheduler::Wake;

pub use sim::{SimCounters, SimDevice};

/// Translates caller buffer handles to hardware-addressable memory.
pub trait BufferResolver: Send + Sync {
    /// Called once per enabled layer before dispatch.
    fn resolve(&self, layer: usize, handle: BufferHandle) -> GspnResult<HwAddr>;

    /// Inverse of `resolve`, called once per resolved layer after reap or on
    /// a failed dispatch.
    fn release(&self, layer: usize, handle: BufferHandle, addr: HwAddr);
}

/// Everything the register programmer needs for one job.
#[derive(Debug, Clone, Copy)]
pub struct ProgramRequest<'a> {
    /// Identity tag of the job slot.
    pub tag: u64,
    pub params: &'a JobParams,
    /// Resolved address per layer-table entry.
    pub addresses: &'a [Option<HwAddr>; DEST_LAYER + 1],
    pub plan: Option<&'a ScalePlan>,
    pub coefficients: Option<&'a CoefMatrix>,
}

/// Writes configuration registers and drives one core.
pub trait RegisterProgrammer: Send + Sync {
    /// Program the core. Returns the post-configuration error code,
    /// 0 on success.
    fn program(&self, core: usize, request: &ProgramRequest<'_>) -> i32;

    /// Start execution. Completion is reported through `irq`.
    fn trigger(&self, core: usize, irq: IrqLine);

    /// Hardware busy signal.
    fn is_busy(&self, core: usize) -> bool;

    /// Re-assert clock/enable configuration and reset the module.
    fn recover(&self, core: usize);

    /// Human-readable register dump for error reports.
    fn dump(&self, core: usize) -> String;

    /// Called when the system resumes after a suspend.
    fn resume(&self) {}
}

/// Completion line from the hardware to the scheduler.
#[derive(Clone)]
pub struct IrqLine {
    cores: Arc<CorePool>,
    slots: Arc<SlotPool>,
    wake: Sender<Wake>,
}

impl IrqLine {
    pub(crate) fn new(cores: Arc<CorePool>, slots: Arc<SlotPool>, wake: Sender<Wake>) -> Self {
        Self { cores, slots, wake }
    }

    /// Acknowledge the job bound to `core` and wake the scheduler.
    pub fn raise(&self, core: usize) {
        if self.cores.acknowledge(core, &self.slots) {
            trace!("irq on core {}", core);
            if self.wake.send(Wake::Irq).is_err() {
                debug!("scheduler gone, dropping irq from core {}", core);
            }
        }
    }
}

impl std::fmt::Debug for IrqLine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IrqLine").field("cores", &self.cores.len()).finish()
    }
}
