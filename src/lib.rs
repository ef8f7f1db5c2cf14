//! # GSPN Scheduler Library
//!
//! Control plane for a 2-D composition and scaling accelerator with one or
//! two execution cores. Callers submit batches of composition jobs; a single
//! scheduler thread binds them to cores, resolves buffers and scaling
//! coefficients, programs the hardware and reports completion.
//!
//! ## Architecture
//!
//! The library is organized into several key modules:
//! - `config`: Scheduler tunables loaded from JSON
//! - `core`: Fixed-size building blocks (slot pool, coefficient cache,
//!   error ring, execution statistics)
//! - `device`: Buffer-resolver and register-programmer seams, plus a
//!   simulated device
//! - `job`: Job parameters and lifecycle types
//! - `sched`: Scheduler context, core pool, fences and the scheduling loop
//! - `session`: Submission front-end and capability query
//!
//! Coefficient generation and scaling plans live in the `gspn-coef` crate.
//!
//! ## Example
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use gspn::{BufferHandle, Gspn, JobParams, Rect, SimDevice};
//!
//! # fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let device = Arc::new(SimDevice::new(1));
//! let gspn = Gspn::builder().device(device).build()?;
//!
//! let job = JobParams::scale(
//!     BufferHandle(1),
//!     Rect::new(0, 0, 100, 100),
//!     BufferHandle(2),
//!     Rect::new(0, 0, 50, 50),
//! );
//! let report = gspn.submit_sync(&[job])?;
//! assert!(report.all_ok());
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod core;
pub mod device;
pub mod error;
pub mod job;
pub mod sched;
pub mod session;

/// Re-export error types for convenience
pub use error::{
    GspnError, GspnResult, HasRecoverySuggestion, HasSeverity, Recoverable, Retryable,
};

pub use config::SchedulerConfig;
pub use device::{BufferResolver, IrqLine, ProgramRequest, RegisterProgrammer, SimDevice};
pub use job::{BufferHandle, FailReason, JobOutcome, JobParams, LayerParams, PixelFormat, Rect};
pub use sched::{Fence, Wake};
pub use session::{
    AsyncBatch, BatchReport, BatchResult, Capability, Gspn, GspnBuilder, StatusSnapshot, SubmitMode,
};

/// Re-export commonly used types from the coefficient crate
pub use gspn_coef::{CoefKey, CoefMatrix, Rotation, Taps};
