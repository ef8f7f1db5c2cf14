// SPDX-License-Identifier: MIT
//! # gspn-coef: Scaling Coefficients for the GSPN Accelerator
//!
//! This crate holds the pure arithmetic side of the scaler control plane: the
//! fixed-point trigonometric engine, the polyphase filter generator that turns a
//! scale ratio into register-ready taps, and the scaling plan that decides which
//! ratio the hardware actually sees.
//!
//! ## Key Components
//!
//! - [`trig`]: table-driven sine/cosine at 30-bit fixed point
//! - [`coef`]: per-phase tap generation, normalisation and register clamping
//! - [`plan`]: rotation handling, pre-decimation and tap-mode encoding
//!
//! Nothing in here allocates on the heap, touches I/O or keeps state between
//! calls. A [`coef::CoefMatrix`] is a plain `Copy` value so callers can keep
//! preallocated storage and overwrite it in place.
//!
//! ## Usage Example
//!
//! ```rust
//! use gspn_coef::coef::{generate, CoefKey};
//!
//! let key = CoefKey::new(100, 100, 50, 50, 8, 4);
//! let matrix = generate(&key).unwrap();
//! for phase in 0..gspn_coef::coef::PHASES {
//!     assert_eq!(matrix.horizontal_phase(phase).iter().map(|&t| t as i32).sum::<i32>(), 256);
//! }
//! ```

pub mod coef;
pub mod plan;
pub mod trig;

pub use coef::{generate, CoefError, CoefKey, CoefMatrix};
pub use plan::{build_plan, Rotation, ScalePlan, Taps};
