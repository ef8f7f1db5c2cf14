// SPDX-License-Identifier: MIT
//! # Fixed-Point Trigonometry
//!
//! Sine and cosine evaluated entirely in integer arithmetic at 30-bit fractional
//! precision (`Q30`, where `1 << 30` represents 1.0).
//!
//! ## Method
//!
//! 1. The angle (radians, Q30) is converted to full turns with a 60-bit
//!    reciprocal of 2π so large angles keep their precision.
//! 2. It is folded onto the nearest of 64 table entries, which leaves a residual
//!    of at most ±1/128 of a turn (|d| ≤ π/64).
//! 3. The residual is corrected with short Taylor expansions:
//!    `sin d ≈ d - d³/6` and `cos d ≈ 1 - d²/2 + d⁴/24`, then combined with the
//!    table entry through the angle-addition identities.
//!
//! The truncation error of the expansions is below `d⁵/120 ≈ 2.4e-9`, a few Q30
//! LSBs, which is far below what the 9-bit coefficient registers can resolve.

/// Number of fractional bits.
pub const FIX_BITS: u32 = 30;
/// 1.0 in Q30.
pub const FIX_ONE: i64 = 1 << FIX_BITS;
/// π in Q30.
pub const PI_Q30: i64 = 3_373_259_426;
/// 2π in Q30.
pub const TWO_PI_Q30: i64 = 6_746_518_852;
/// π/2 in Q30.
pub const HALF_PI_Q30: i64 = 1_686_629_713;
/// 1/(2π) in Q60, used for argument reduction.
const INV_TWO_PI_Q60: i128 = 183_493_156_455_125_088;

/// Table entries per full turn.
pub const TABLE_LEN: usize = 64;

/// `sin(2πk/64)` in Q30; cosine is read a quarter turn ahead.
static SIN_TABLE: [i32; TABLE_LEN] = [
    0, 105245103, 209476638, 311690799,
    410903207, 506158392, 596538995, 681174602,
    759250125, 830013654, 892783698, 946955747,
    992008094, 1027506862, 1053110176, 1068571464,
    1073741824, 1068571464, 1053110176, 1027506862,
    992008094, 946955747, 892783698, 830013654,
    759250125, 681174602, 596538995, 506158392,
    410903207, 311690799, 209476638, 105245103,
    0, -105245103, -209476638, -311690799,
    -410903207, -506158392, -596538995, -681174602,
    -759250125, -830013654, -892783698, -946955747,
    -992008094, -1027506862, -1053110176, -1068571464,
    -1073741824, -1068571464, -1053110176, -1027506862,
    -992008094, -946955747, -892783698, -830013654,
    -759250125, -681174602, -596538995, -506158392,
    -410903207, -311690799, -209476638, -105245103,
];

/// Q30 multiply with round-to-nearest.
#[inline]
pub fn mul_q30(a: i64, b: i64) -> i64 {
    ((a as i128 * b as i128 + (1i128 << (FIX_BITS - 1))) >> FIX_BITS) as i64
}

/// Convert a float to Q30. Only used by callers that build angles from
/// configuration values; the engine itself never touches floats.
#[inline]
pub fn to_q30(value: f64) -> i64 {
    (value * FIX_ONE as f64).round() as i64
}

/// Evaluate `(sin(angle), cos(angle))` for an angle in radians (Q30).
///
/// Both results are Q30 and clamped to `[-1.0, 1.0]`.
pub fn sin_cos_q30(angle: i64) -> (i32, i32) {
    // turns in Q60
    let turns = (angle as i128 * INV_TWO_PI_Q60) >> FIX_BITS;
    // nearest 1/64 turn: one table step is 2^54 in Q60
    let index = (turns + (1i128 << 53)) >> 54;
    let residual = turns - (index << 54);
    let d = ((residual * TWO_PI_Q30 as i128) >> 60) as i64;

    let k = index.rem_euclid(TABLE_LEN as i128) as usize;
    let s0 = SIN_TABLE[k] as i64;
    let c0 = SIN_TABLE[(k + TABLE_LEN / 4) % TABLE_LEN] as i64;

    let d2 = mul_q30(d, d);
    let d3 = mul_q30(d2, d);
    let d4 = mul_q30(d2, d2);
    let sin_d = d - d3 / 6;
    let cos_d = FIX_ONE - d2 / 2 + d4 / 24;

    let sin = mul_q30(s0, cos_d) + mul_q30(c0, sin_d);
    let cos = mul_q30(c0, cos_d) - mul_q30(s0, sin_d);
    (
        sin.clamp(-FIX_ONE, FIX_ONE) as i32,
        cos.clamp(-FIX_ONE, FIX_ONE) as i32,
    )
}

/// `sin(angle)` in Q30.
#[inline]
pub fn sin_q30(angle: i64) -> i32 {
    sin_cos_q30(angle).0
}

/// `cos(angle)` in Q30.
#[inline]
pub fn cos_q30(angle: i64) -> i32 {
    sin_cos_q30(angle).1
}
