use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use gspn::{BatchResult, BufferHandle, Gspn, JobParams, Rect, SchedulerConfig, SimDevice, SubmitMode, Taps};
use log::{info, warn};

/// Drive the GSPN scheduler against the simulated device.
#[derive(Parser, Debug)]
#[command(name = "gspn-sim")]
#[command(about = "Run composition jobs through the GSPN scheduler on a simulated accelerator")]
#[command(long_about = "Run composition jobs through the GSPN scheduler on a simulated accelerator.
Prints the capability descriptor, the outcome of every batch and a final status snapshot as JSON.")]
struct Args {
    /// Number of execution cores
    #[arg(long, help = "Execution cores (1 or 2)")]
    cores: Option<usize>,

    /// Job slot count
    #[arg(long, help = "Job slots in the admission pool")]
    slots: Option<usize>,

    /// Total jobs to run
    #[arg(short, long, default_value_t = 16, help = "Total number of jobs to submit")]
    jobs: usize,

    /// Jobs per batch
    #[arg(short, long, default_value_t = 4, help = "Jobs per submitted batch")]
    batch: usize,

    /// Submit asynchronously and wait on fences
    #[arg(long = "async", help = "Submit batches asynchronously and wait on their fences")]
    asynchronous: bool,

    /// Simulated execution latency
    #[arg(long, default_value_t = 2, help = "Simulated per-job execution time in milliseconds")]
    latency_ms: u64,

    /// Core that never completes
    #[arg(long, help = "Inject a hang on this core to exercise timeout recovery")]
    hang_core: Option<usize>,

    /// Horizontal tap count
    #[arg(long, value_enum, default_value_t = Taps::Eight)]
    h_taps: Taps,

    /// Vertical tap count
    #[arg(long, value_enum, default_value_t = Taps::Four)]
    v_taps: Taps,

    /// JSON scheduler configuration
    #[arg(short, long, help = "Path to a JSON scheduler configuration")]
    config: Option<String>,

    /// Verbose logging
    #[arg(short, long, help = "Log at debug level unless RUST_LOG is set")]
    verbose: bool,
}

fn main() -> Result<()> {
    let args = Args::parse();

    let default_filter = if args.verbose { "debug" } else { "info" };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(default_filter)).init();

    let mut config = match &args.config {
        Some(path) => SchedulerConfig::from_json_file(path)
            .with_context(|| format!("loading configuration from {}", path))?,
        None => SchedulerConfig::default(),
    };
    if let Some(cores) = args.cores {
        config.core_count = cores;
    }
    if let Some(slots) = args.slots {
        config.max_commands = slots;
    }

    let device = Arc::new(
        SimDevice::new(config.core_count).with_latency(Duration::from_millis(args.latency_ms)),
    );
    if let Some(core) = args.hang_core {
        device.set_hang(core, true);
    }
    let gspn = Gspn::builder()
        .config(config)
        .device(Arc::clone(&device))
        .build()
        .context("starting scheduler")?;

    println!("{}", serde_json::to_string_pretty(gspn.capability())?);

    let batch = args.batch.clamp(1, gspn.config().max_commands);
    let mode = if args.asynchronous { SubmitMode::Async } else { SubmitMode::Sync };
    let wait = gspn.config().sync_wait();

    let mut submitted = 0;
    let mut handle = 1u64;
    while submitted < args.jobs {
        let n = batch.min(args.jobs - submitted);
        let jobs: Vec<JobParams> = (0..n)
            .map(|i| {
                let src = 64 + 16 * (i as u32 % 8);
                let job = JobParams::scale(
                    BufferHandle(handle),
                    Rect::new(0, 0, src, src),
                    BufferHandle(handle + 1),
                    Rect::new(0, 0, 48, 48),
                )
                .with_taps(args.h_taps, args.v_taps);
                handle += 2;
                job
            })
            .collect();

        match gspn.submit_batch(&jobs, mode) {
            Ok(BatchResult::Completed(report)) => {
                println!("{}", serde_json::to_string(&report)?);
            }
            Ok(BatchResult::Pending(pending)) => {
                if !pending.wait(wait) {
                    warn!("async batch on core {} did not finish in {}ms", pending.core, wait.as_millis());
                }
                println!("{}", serde_json::to_string(&pending.outcomes())?);
            }
            Err(e) => warn!("batch failed: {}", e),
        }
        submitted += n;
    }

    gspn.check_invariants().context("invariant check")?;
    info!("device counters: {:?}", device.counters());
    println!("{}", serde_json::to_string_pretty(&gspn.status())?);
    gspn.shutdown();
    Ok(())
}
