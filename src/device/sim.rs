//! # Simulated Device
//!
//! Software stand-in for the accelerator, used by the integration tests and
//! the `gspn-sim` binary. Implements both device traits.
//!
//! Each triggered job runs on a short-lived thread that sleeps for the core's
//! latency, clears the busy signal and raises the completion line. Faults can
//! be injected per core (hang, stuck busy signal, slow recovery) or per call
//! (forced configuration codes, unresolvable buffer handles).

use std::collections::{HashSet, VecDeque};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::thread;
use std::time::Duration;

use log::{debug, info};
use parking_lot::Mutex;
use serde::Serialize;

use super::{BufferResolver, IrqLine, ProgramRequest, RegisterProgrammer};
use crate::error::{GspnError, GspnResult};
use crate::job::{BufferHandle, HwAddr};

#[derive(Debug)]
struct SimCore {
    latency: Mutex<Duration>,
    hang: AtomicBool,
    line: Arc<CoreLine>,
    last_program: Mutex<String>,
}

/// State shared with the completion thread.
#[derive(Debug, Default)]
struct CoreLine {
    busy: AtomicBool,
    /// Completion leaves `busy` raised until the next recovery.
    sticky_busy: AtomicBool,
    /// Bumped on every trigger and recovery; stale completions are dropped.
    generation: AtomicU64,
}

/// Operation counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct SimCounters {
    pub resolved: u64,
    pub released: u64,
    pub programmed: u64,
    pub triggered: u64,
    pub completed: u64,
    pub recovered: u64,
    pub resumed: u64,
}

#[derive(Debug, Default)]
struct AtomicCounters {
    resolved: AtomicU64,
    released: AtomicU64,
    programmed: AtomicU64,
    triggered: AtomicU64,
    completed: AtomicU64,
    recovered: AtomicU64,
    resumed: AtomicU64,
}

#[derive(Debug)]
pub struct SimDevice {
    cores: Box<[SimCore]>,
    bad_handles: Mutex<HashSet<u64>>,
    forced_codes: Mutex<VecDeque<i32>>,
    recover_delay: Mutex<Duration>,
    counters: Arc<AtomicCounters>,
}

impl SimDevice {
    pub fn new(core_count: usize) -> Self {
        Self {
            cores: (0..core_count)
                .map(|_| SimCore {
                    latency: Mutex::new(Duration::from_millis(1)),
                    hang: AtomicBool::new(false),
                    line: Arc::new(CoreLine::default()),
                    last_program: Mutex::new(String::new()),
                })
                .collect(),
            bad_handles: Mutex::new(HashSet::new()),
            forced_codes: Mutex::new(VecDeque::new()),
            recover_delay: Mutex::new(Duration::ZERO),
            counters: Arc::new(AtomicCounters::default()),
        }
    }

    /// Same execution latency on every core.
    pub fn with_latency(self, latency: Duration) -> Self {
        for core in 0..self.cores.len() {
            self.set_latency(core, latency);
        }
        self
    }

    pub fn set_latency(&self, core: usize, latency: Duration) {
        if let Some(c) = self.cores.get(core) {
            *c.latency.lock() = latency;
        }
    }

    /// A hung core never completes until recovered.
    pub fn set_hang(&self, core: usize, hang: bool) {
        if let Some(c) = self.cores.get(core) {
            c.hang.store(hang, Ordering::SeqCst);
        }
    }

    /// Completions still raise the line but leave the busy signal up until
    /// the core is recovered.
    pub fn set_sticky_busy(&self, core: usize, sticky: bool) {
        if let Some(c) = self.cores.get(core) {
            c.line.sticky_busy.store(sticky, Ordering::SeqCst);
        }
    }

    /// Time `recover` blocks for.
    pub fn set_recover_delay(&self, delay: Duration) {
        *self.recover_delay.lock() = delay;
    }

    /// Queue a code returned by the next `program` call.
    pub fn force_config_code(&self, code: i32) {
        self.forced_codes.lock().push_back(code);
    }

    /// Make `resolve` fail for this handle.
    pub fn mark_bad_handle(&self, handle: BufferHandle) {
        self.bad_handles.lock().insert(handle.0);
    }

    pub fn counters(&self) -> SimCounters {
        let c = &self.counters;
        SimCounters {
            resolved: c.resolved.load(Ordering::SeqCst),
            released: c.released.load(Ordering::SeqCst),
            programmed: c.programmed.load(Ordering::SeqCst),
            triggered: c.triggered.load(Ordering::SeqCst),
            completed: c.completed.load(Ordering::SeqCst),
            recovered: c.recovered.load(Ordering::SeqCst),
            resumed: c.resumed.load(Ordering::SeqCst),
        }
    }

    /// Buffers resolved and not yet released.
    pub fn outstanding_buffers(&self) -> u64 {
        let c = self.counters();
        c.resolved - c.released
    }
}

impl BufferResolver for SimDevice {
    fn resolve(&self, layer: usize, handle: BufferHandle) -> GspnResult<HwAddr> {
        if self.bad_handles.lock().contains(&handle.0) {
            return Err(GspnError::resolve(layer, handle.0, "handle not mapped"));
        }
        self.counters.resolved.fetch_add(1, Ordering::SeqCst);
        Ok(HwAddr(0x8000_0000 | (handle.0 << 12)))
    }

    fn release(&self, _layer: usize, _handle: BufferHandle, _addr: HwAddr) {
        self.counters.released.fetch_add(1, Ordering::SeqCst);
    }
}

impl RegisterProgrammer for SimDevice {
    fn program(&self, core: usize, request: &ProgramRequest<'_>) -> i32 {
        self.counters.programmed.fetch_add(1, Ordering::SeqCst);
        let code = self.forced_codes.lock().pop_front().unwrap_or(0);
        if let Some(c) = self.cores.get(core) {
            let layers: Vec<String> = request
                .params
                .enabled_layers()
                .map(|(i, l)| {
                    let addr = request.addresses[i].map(|a| a.0).unwrap_or(0);
                    format!("L{}@{:#x} {}x{}", i, addr, l.clip.w, l.clip.h)
                })
                .collect();
            let scale = match request.plan.and_then(|p| p.key) {
                Some(key) => format!(
                    "scale {}x{}->{}x{} taps {}/{}",
                    key.src_w, key.src_h, key.dst_w, key.dst_h, key.h_taps, key.v_taps
                ),
                None => "scale off".to_string(),
            };
            *c.last_program.lock() = format!(
                "tag={} {} {} code={:#x}",
                request.tag,
                layers.join(" "),
                scale,
                code
            );
        }
        code
    }

    fn trigger(&self, core: usize, irq: IrqLine) {
        let Some(c) = self.cores.get(core) else {
            return;
        };
        let hang = c.hang.load(Ordering::SeqCst);
        c.line.busy.store(true, Ordering::SeqCst);
        let generation = c.line.generation.fetch_add(1, Ordering::SeqCst) + 1;
        self.counters.triggered.fetch_add(1, Ordering::SeqCst);
        if hang {
            debug!("sim core {} hangs", core);
            return;
        }
        let latency = *c.latency.lock();
        let line = Arc::clone(&c.line);
        let counters = Arc::clone(&self.counters);
        thread::spawn(move || {
            thread::sleep(latency);
            if line.generation.load(Ordering::SeqCst) == generation {
                if !line.sticky_busy.load(Ordering::SeqCst) {
                    line.busy.store(false, Ordering::SeqCst);
                }
                counters.completed.fetch_add(1, Ordering::SeqCst);
                irq.raise(core);
            }
        });
    }

    fn is_busy(&self, core: usize) -> bool {
        self.cores
            .get(core)
            .map(|c| c.line.busy.load(Ordering::SeqCst))
            .unwrap_or(false)
    }

    fn recover(&self, core: usize) {
        let delay = *self.recover_delay.lock();
        if !delay.is_zero() {
            thread::sleep(delay);
        }
        if let Some(c) = self.cores.get(core) {
            c.line.generation.fetch_add(1, Ordering::SeqCst);
            c.line.busy.store(false, Ordering::SeqCst);
        }
        self.counters.recovered.fetch_add(1, Ordering::SeqCst);
        info!("sim core {} reset", core);
    }

    fn dump(&self, core: usize) -> String {
        match self.cores.get(core) {
            Some(c) => format!(
                "core{} busy={} gen={} last: {}",
                core,
                c.line.busy.load(Ordering::SeqCst),
                c.line.generation.load(Ordering::SeqCst),
                c.last_program.lock()
            ),
            None => format!("core{} absent", core),
        }
    }

    fn resume(&self) {
        self.counters.resumed.fetch_add(1, Ordering::SeqCst);
    }
}
