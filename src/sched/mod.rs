//! # Scheduler
//!
//! The shared context, core pool, completion signalling and the scheduling
//! loop that ties them together.

pub mod context;
pub mod core_pool;
pub mod fence;
pub mod scheduler;

pub use context::GspnContext;
pub use core_pool::{CorePool, CoreState};
pub use fence::{BatchTracker, Fence, Timeline};
pub use scheduler::Wake;
