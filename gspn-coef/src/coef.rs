// SPDX-License-Identifier: MIT
//! # Polyphase Coefficient Generation
//!
//! Turns a `(source, destination, taps)` description of one scaling operation
//! into the 8-phase tap table the scaler loads into its coefficient registers.
//!
//! ## Per-phase pipeline
//!
//! 1. **Kernel**: every tap is a windowed sinc, `c · sinc(c·x) · hann(x)`, where
//!    `x` is the tap position relative to the output sample and `c` is the
//!    cutoff (`dst/src` when shrinking, 1.0 otherwise). Both the sinc and the
//!    Hann window come from [`crate::trig`]; there are no floats on this path.
//! 2. **Normalise**: taps are scaled so that each phase sums to exactly 256.
//!    The rounding remainder goes to the two centre taps; an odd unit goes to
//!    the centre tap named by [`ODD_REMAINDER_TAP`] for that phase.
//! 3. **Clamp**: registers are 9-bit signed. A tap outside `[-256, 255]` is
//!    clamped and the excess is moved to its immediate neighbours so the phase
//!    sum is preserved.
//!
//! A unity ratio uses a zero phase offset for every phase, so all eight phases
//! come out identical (pass-through).

use std::fmt;

use crate::trig::{cos_q30, mul_q30, sin_q30, FIX_ONE, PI_Q30};

/// Number of polyphase phases per axis.
pub const PHASES: usize = 8;
/// Largest supported tap count.
pub const MAX_TAPS: usize = 8;
/// Every phase sums to this value.
pub const TAP_SUM: i32 = 256;
/// Largest value a 9-bit signed coefficient register holds.
pub const TAP_MAX: i32 = 255;
/// Smallest value a 9-bit signed coefficient register holds.
pub const TAP_MIN: i32 = -256;
/// Largest accepted shrink ratio (`src / dst`).
pub const MAX_DOWNSCALE: u32 = 16;

/// Which centre tap receives an odd rounding unit, per phase
/// (0 = left centre tap, 1 = right centre tap).
///
/// Phases up to the half-sample point lean on the left tap, later phases on the
/// right one.
pub const ODD_REMAINDER_TAP: [usize; PHASES] = [0, 0, 0, 0, 1, 1, 1, 1];

/// Tap counts the scaler supports.
pub const SUPPORTED_TAPS: [u8; 4] = [2, 4, 6, 8];

/// Errors produced while generating coefficients.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CoefError {
    /// Tap count not in [`SUPPORTED_TAPS`].
    UnsupportedTaps(u8),
    /// A source or destination dimension was zero.
    ZeroDimension,
    /// Shrink ratio beyond [`MAX_DOWNSCALE`].
    RatioOutOfRange { src: u32, dst: u32 },
    /// Scaled output smaller than the hardware minimum.
    OutputTooSmall { w: u32, h: u32 },
    /// The kernel for a phase summed to zero or less.
    DegenerateKernel { phase: usize },
}

impl fmt::Display for CoefError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CoefError::UnsupportedTaps(t) => write!(f, "unsupported tap count {}", t),
            CoefError::ZeroDimension => write!(f, "zero source or destination dimension"),
            CoefError::RatioOutOfRange { src, dst } => {
                write!(f, "scale ratio {}:{} exceeds 1/{}", src, dst, MAX_DOWNSCALE)
            }
            CoefError::OutputTooSmall { w, h } => {
                write!(f, "scaled output {}x{} below hardware minimum", w, h)
            }
            CoefError::DegenerateKernel { phase } => {
                write!(f, "kernel for phase {} has no positive weight", phase)
            }
        }
    }
}

impl std::error::Error for CoefError {}

/// Cache key: one scaling operation in both axes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct CoefKey {
    pub src_w: u32,
    pub src_h: u32,
    pub dst_w: u32,
    pub dst_h: u32,
    pub h_taps: u8,
    pub v_taps: u8,
}

impl CoefKey {
    pub const fn new(src_w: u32, src_h: u32, dst_w: u32, dst_h: u32, h_taps: u8, v_taps: u8) -> Self {
        Self {
            src_w,
            src_h,
            dst_w,
            dst_h,
            h_taps,
            v_taps,
        }
    }

    /// Check the key against generator limits without generating anything.
    pub fn validate(&self) -> Result<(), CoefError> {
        for taps in [self.h_taps, self.v_taps] {
            if !SUPPORTED_TAPS.contains(&taps) {
                return Err(CoefError::UnsupportedTaps(taps));
            }
        }
        if self.src_w == 0 || self.src_h == 0 || self.dst_w == 0 || self.dst_h == 0 {
            return Err(CoefError::ZeroDimension);
        }
        for (src, dst) in [(self.src_w, self.dst_w), (self.src_h, self.dst_h)] {
            if src > dst.saturating_mul(MAX_DOWNSCALE) {
                return Err(CoefError::RatioOutOfRange { src, dst });
            }
        }
        Ok(())
    }
}

/// Generated tap table for both axes. Unused taps are zero.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CoefMatrix {
    h_taps: u8,
    v_taps: u8,
    horizontal: [[i16; MAX_TAPS]; PHASES],
    vertical: [[i16; MAX_TAPS]; PHASES],
}

impl Default for CoefMatrix {
    fn default() -> Self {
        Self::empty()
    }
}

impl CoefMatrix {
    /// An all-zero matrix, used as preallocated storage.
    pub const fn empty() -> Self {
        Self {
            h_taps: 0,
            v_taps: 0,
            horizontal: [[0; MAX_TAPS]; PHASES],
            vertical: [[0; MAX_TAPS]; PHASES],
        }
    }

    pub fn h_taps(&self) -> u8 {
        self.h_taps
    }

    pub fn v_taps(&self) -> u8 {
        self.v_taps
    }

    /// Horizontal taps of one phase (length = `h_taps`).
    pub fn horizontal_phase(&self, phase: usize) -> &[i16] {
        &self.horizontal[phase][..self.h_taps as usize]
    }

    /// Vertical taps of one phase (length = `v_taps`).
    pub fn vertical_phase(&self, phase: usize) -> &[i16] {
        &self.vertical[phase][..self.v_taps as usize]
    }

    /// True when every phase of both axes holds the same taps.
    pub fn is_phase_invariant(&self) -> bool {
        self.horizontal.iter().all(|p| *p == self.horizontal[0])
            && self.vertical.iter().all(|p| *p == self.vertical[0])
    }
}

/// Generate the coefficient matrix for `key`.
pub fn generate(key: &CoefKey) -> Result<CoefMatrix, CoefError> {
    let mut matrix = CoefMatrix::empty();
    generate_into(key, &mut matrix)?;
    Ok(matrix)
}

/// Generate into existing storage. On error `out` is left unchanged.
pub fn generate_into(key: &CoefKey, out: &mut CoefMatrix) -> Result<(), CoefError> {
    key.validate()?;
    let mut horizontal = [[0i16; MAX_TAPS]; PHASES];
    let mut vertical = [[0i16; MAX_TAPS]; PHASES];
    generate_axis(key.src_w, key.dst_w, key.h_taps as usize, &mut horizontal)?;
    generate_axis(key.src_h, key.dst_h, key.v_taps as usize, &mut vertical)?;
    out.h_taps = key.h_taps;
    out.v_taps = key.v_taps;
    out.horizontal = horizontal;
    out.vertical = vertical;
    Ok(())
}

fn generate_axis(
    src: u32,
    dst: u32,
    taps: usize,
    out: &mut [[i16; MAX_TAPS]; PHASES],
) -> Result<(), CoefError> {
    let cutoff = if dst >= src {
        FIX_ONE
    } else {
        dst as i64 * FIX_ONE / src as i64
    };
    let half = (taps / 2) as i64;
    let centre = taps / 2 - 1;

    for (phase, row) in out.iter_mut().enumerate() {
        let offset = if src == dst {
            0
        } else {
            phase as i64 * FIX_ONE / PHASES as i64
        };

        let mut raw = [0i64; MAX_TAPS];
        for (i, weight) in raw.iter_mut().take(taps).enumerate() {
            let x = (i as i64 - (half - 1)) * FIX_ONE - offset;
            let sinc = sinc_q30(mul_q30(cutoff, x));
            *weight = mul_q30(mul_q30(cutoff, sinc), hann_q30(x, half));
        }

        let total: i64 = raw[..taps].iter().sum();
        if total <= 0 {
            return Err(CoefError::DegenerateKernel { phase });
        }

        let mut tap = [0i32; MAX_TAPS];
        for (t, w) in tap.iter_mut().zip(raw.iter()).take(taps) {
            *t = div_round(w * TAP_SUM as i64, total) as i32;
        }
        distribute_remainder(&mut tap[..taps], centre, phase);
        clamp_to_register(&mut tap[..taps]);

        *row = [0; MAX_TAPS];
        for (dst, src) in row.iter_mut().zip(tap.iter()).take(taps) {
            *dst = *src as i16;
        }
    }
    Ok(())
}

/// `sin(πy) / (πy)` in Q30.
fn sinc_q30(y: i64) -> i64 {
    if y == 0 {
        return FIX_ONE;
    }
    let arg = mul_q30(PI_Q30, y);
    sin_q30(arg) as i64 * FIX_ONE / arg
}

/// Hann window spanning `[-half, half]` taps, in Q30.
fn hann_q30(x: i64, half: i64) -> i64 {
    let scaled = x / half;
    (FIX_ONE + cos_q30(mul_q30(PI_Q30, scaled)) as i64) / 2
}

/// Integer division rounding half away from zero (`d > 0`).
fn div_round(n: i64, d: i64) -> i64 {
    if n >= 0 {
        (n + d / 2) / d
    } else {
        -((-n + d / 2) / d)
    }
}

fn distribute_remainder(taps: &mut [i32], centre: usize, phase: usize) {
    let remainder = TAP_SUM - taps.iter().sum::<i32>();
    let half = remainder / 2;
    let odd = remainder - 2 * half;
    taps[centre] += half;
    taps[centre + 1] += half;
    if odd != 0 {
        taps[centre + ODD_REMAINDER_TAP[phase]] += odd;
    }
}

fn clamp_to_register(taps: &mut [i32]) {
    let n = taps.len();
    for i in 0..n {
        let t = taps[i];
        let limit = if t > TAP_MAX {
            TAP_MAX
        } else if t < TAP_MIN {
            TAP_MIN
        } else {
            continue;
        };
        let excess = t - limit;
        taps[i] = limit;
        if i == 0 {
            taps[1] += excess;
        } else if i == n - 1 {
            taps[i - 1] += excess;
        } else {
            let right = excess / 2;
            taps[i + 1] += right;
            taps[i - 1] += excess - right;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn phase_sum(taps: &[i16]) -> i32 {
        taps.iter().map(|&t| t as i32).sum()
    }

    fn assert_well_formed(m: &CoefMatrix) {
        for p in 0..PHASES {
            assert_eq!(phase_sum(m.horizontal_phase(p)), TAP_SUM, "h phase {}", p);
            assert_eq!(phase_sum(m.vertical_phase(p)), TAP_SUM, "v phase {}", p);
            for &t in m.horizontal_phase(p).iter().chain(m.vertical_phase(p)) {
                assert!((TAP_MIN..=TAP_MAX).contains(&(t as i32)));
            }
        }
    }

    #[test]
    fn test_unity_ratio_is_phase_invariant() {
        let m = generate(&CoefKey::new(640, 480, 640, 480, 8, 8)).unwrap();
        assert!(m.is_phase_invariant());
        assert_well_formed(&m);
        // the 256 centre tap overflows the register and spills one unit left
        assert_eq!(m.horizontal_phase(0), &[0, 0, 1, 255, 0, 0, 0, 0]);
    }

    #[test]
    fn test_two_tap_unity_spills_right() {
        let m = generate(&CoefKey::new(100, 100, 100, 100, 2, 2)).unwrap();
        assert_eq!(m.horizontal_phase(3), &[255, 1]);
    }

    #[test]
    fn test_downscale_half_four_taps() {
        let m = generate(&CoefKey::new(100, 100, 50, 50, 4, 4)).unwrap();
        assert_well_formed(&m);
        assert_eq!(m.horizontal_phase(0), &[50, 156, 50, 0]);
        // half-sample phase is symmetric
        assert_eq!(m.horizontal_phase(4), &[7, 121, 121, 7]);
    }

    #[test]
    fn test_mixed_taps_and_ratios() {
        for key in [
            CoefKey::new(100, 100, 50, 50, 8, 4),
            CoefKey::new(1920, 1080, 1080, 1920, 8, 8),
            CoefKey::new(64, 64, 16, 16, 8, 2),
            CoefKey::new(10, 50, 40, 100, 4, 6),
        ] {
            let m = generate(&key).unwrap();
            assert_eq!(m.h_taps(), key.h_taps);
            assert_eq!(m.v_taps(), key.v_taps);
            assert_well_formed(&m);
        }
    }

    #[test]
    fn test_upscale_has_negative_lobes() {
        let m = generate(&CoefKey::new(720, 720, 1280, 1280, 8, 8)).unwrap();
        assert!(m.horizontal_phase(4).iter().any(|&t| t < 0));
        assert!(!m.is_phase_invariant());
    }

    #[test]
    fn test_rejects_bad_keys() {
        assert_eq!(
            generate(&CoefKey::new(100, 100, 50, 50, 3, 4)),
            Err(CoefError::UnsupportedTaps(3))
        );
        assert_eq!(
            generate(&CoefKey::new(0, 100, 50, 50, 4, 4)),
            Err(CoefError::ZeroDimension)
        );
        assert_eq!(
            generate(&CoefKey::new(1700, 100, 100, 100, 4, 4)),
            Err(CoefError::RatioOutOfRange { src: 1700, dst: 100 })
        );
    }

    #[test]
    fn test_generate_into_keeps_storage_on_error() {
        let mut m = generate(&CoefKey::new(100, 100, 50, 50, 4, 4)).unwrap();
        let before = m;
        assert!(generate_into(&CoefKey::new(100, 100, 50, 50, 5, 4), &mut m).is_err());
        assert_eq!(m, before);
    }

    #[test]
    fn test_remainder_tie_break() {
        let mut taps = [10, 100, 100, 45];
        distribute_remainder(&mut taps, 1, 2);
        assert_eq!(taps, [10, 101, 100, 45]);
        let mut taps = [10, 100, 100, 45];
        distribute_remainder(&mut taps, 1, 6);
        assert_eq!(taps, [10, 100, 101, 45]);
        let mut taps = [10, 100, 100, 49];
        distribute_remainder(&mut taps, 1, 0);
        assert_eq!(taps, [10, 98, 99, 49]);
    }

    #[test]
    fn test_clamp_redistributes_to_neighbours() {
        let mut taps = [0, 0, -4, 263, -3, 0];
        clamp_to_register(&mut taps);
        assert_eq!(taps, [0, 0, 0, 255, 1, 0]);
        assert_eq!(taps.iter().sum::<i32>(), 256);
    }
}
