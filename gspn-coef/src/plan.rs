// SPDX-License-Identifier: MIT
//! Scaling plan: everything the register programmer needs to know about the
//! scaler for one job, derived from the clip rectangle, the destination
//! rectangle and the rotation.
//!
//! Large shrink ratios are handled in two stages. The fetch unit first
//! decimates the source by 2 or 4, and the polyphase filter covers the rest.
//! The coefficient key therefore uses the decimated source size.

use crate::coef::{CoefError, CoefKey, MAX_DOWNSCALE};

/// Smallest destination edge the scaler can produce.
pub const MIN_SCALED_OUTPUT: u32 = 4;

/// Layer rotation as encoded in the layer parameters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum Rotation {
    #[default]
    Deg0,
    Deg90,
    Deg180,
    Deg270,
    Deg0Mirror,
    Deg90Mirror,
    Deg180Mirror,
    Deg270Mirror,
}

impl Rotation {
    /// True for rotations that exchange width and height.
    pub fn swaps_axes(self) -> bool {
        matches!(
            self,
            Rotation::Deg90 | Rotation::Deg270 | Rotation::Deg90Mirror | Rotation::Deg270Mirror
        )
    }
}

/// Filter tap counts selectable per axis.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, clap::ValueEnum)]
pub enum Taps {
    #[value(name = "2")]
    Two,
    #[value(name = "4")]
    Four,
    #[value(name = "6")]
    Six,
    #[default]
    #[value(name = "8")]
    Eight,
}

impl Taps {
    pub fn count(self) -> u8 {
        match self {
            Taps::Two => 2,
            Taps::Four => 4,
            Taps::Six => 6,
            Taps::Eight => 8,
        }
    }

    pub fn from_count(count: u8) -> Option<Self> {
        match count {
            2 => Some(Taps::Two),
            4 => Some(Taps::Four),
            6 => Some(Taps::Six),
            8 => Some(Taps::Eight),
            _ => None,
        }
    }

    /// Value of the tap-mode register field.
    pub fn register_mode(self) -> u8 {
        match self {
            Taps::Eight => 0,
            Taps::Six => 1,
            Taps::Four => 2,
            Taps::Two => 3,
        }
    }
}

/// Width and height in pixels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct Size {
    pub w: u32,
    pub h: u32,
}

impl Size {
    pub const fn new(w: u32, h: u32) -> Self {
        Self { w, h }
    }
}

/// Result of [`build_plan`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ScalePlan {
    /// Clip size after rotation.
    pub rotated: Size,
    pub output: Size,
    /// Source decimation per axis (1, 2 or 4).
    pub decimation: (u32, u32),
    /// Tap-mode register values per axis.
    pub tap_modes: (u8, u8),
    /// Coefficients to load; `None` when the scaler is bypassed.
    pub key: Option<CoefKey>,
}

impl ScalePlan {
    pub fn scaling(&self) -> bool {
        self.key.is_some()
    }
}

fn decimation_for(factor: u32) -> u32 {
    if factor > 8 {
        4
    } else if factor > 4 {
        2
    } else {
        1
    }
}

/// Build the scaling plan for one layer.
///
/// Fails when the destination is below [`MIN_SCALED_OUTPUT`] or the shrink
/// factor exceeds [`MAX_DOWNSCALE`]. When the rotated clip already matches the
/// destination no coefficients are needed.
pub fn build_plan(
    clip: Size,
    dest: Size,
    rotation: Rotation,
    h_taps: Taps,
    v_taps: Taps,
) -> Result<ScalePlan, CoefError> {
    let rotated = if rotation.swaps_axes() {
        Size::new(clip.h, clip.w)
    } else {
        clip
    };
    let tap_modes = (h_taps.register_mode(), v_taps.register_mode());

    if rotated == dest {
        return Ok(ScalePlan {
            rotated,
            output: dest,
            decimation: (1, 1),
            tap_modes,
            key: None,
        });
    }

    if dest.w < MIN_SCALED_OUTPUT || dest.h < MIN_SCALED_OUTPUT {
        return Err(CoefError::OutputTooSmall {
            w: dest.w,
            h: dest.h,
        });
    }
    if rotated.w == 0 || rotated.h == 0 {
        return Err(CoefError::ZeroDimension);
    }

    let factor_w = rotated.w.div_ceil(dest.w);
    let factor_h = rotated.h.div_ceil(dest.h);
    if factor_w > MAX_DOWNSCALE {
        return Err(CoefError::RatioOutOfRange {
            src: rotated.w,
            dst: dest.w,
        });
    }
    if factor_h > MAX_DOWNSCALE {
        return Err(CoefError::RatioOutOfRange {
            src: rotated.h,
            dst: dest.h,
        });
    }

    let decimation = (decimation_for(factor_w), decimation_for(factor_h));
    let key = CoefKey::new(
        rotated.w.div_ceil(decimation.0),
        rotated.h.div_ceil(decimation.1),
        dest.w,
        dest.h,
        h_taps.count(),
        v_taps.count(),
    );

    Ok(ScalePlan {
        rotated,
        output: dest,
        decimation,
        tap_modes,
        key: Some(key),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_no_scaling_when_sizes_match() {
        let plan = build_plan(
            Size::new(1080, 1920),
            Size::new(1920, 1080),
            Rotation::Deg90,
            Taps::Eight,
            Taps::Eight,
        )
        .unwrap();
        assert!(!plan.scaling());
        assert_eq!(plan.rotated, Size::new(1920, 1080));
    }

    #[test]
    fn test_decimation_steps() {
        let plan = build_plan(
            Size::new(1000, 600),
            Size::new(100, 100),
            Rotation::Deg0,
            Taps::Eight,
            Taps::Four,
        )
        .unwrap();
        assert_eq!(plan.decimation, (4, 2));
        let key = plan.key.unwrap();
        assert_eq!((key.src_w, key.src_h), (250, 300));
        assert_eq!((key.h_taps, key.v_taps), (8, 4));
        assert_eq!(plan.tap_modes, (0, 2));
    }

    #[test]
    fn test_plain_downscale_keeps_source() {
        let plan = build_plan(
            Size::new(100, 100),
            Size::new(50, 50),
            Rotation::Deg180,
            Taps::Eight,
            Taps::Four,
        )
        .unwrap();
        assert_eq!(plan.key, Some(CoefKey::new(100, 100, 50, 50, 8, 4)));
    }

    #[test]
    fn test_limits() {
        assert_eq!(
            build_plan(
                Size::new(100, 100),
                Size::new(3, 50),
                Rotation::Deg0,
                Taps::Four,
                Taps::Four
            ),
            Err(CoefError::OutputTooSmall { w: 3, h: 50 })
        );
        assert!(matches!(
            build_plan(
                Size::new(1700, 100),
                Size::new(100, 100),
                Rotation::Deg0,
                Taps::Four,
                Taps::Four
            ),
            Err(CoefError::RatioOutOfRange { .. })
        ));
    }

    #[test]
    fn test_tap_mode_round_trip() {
        for taps in [Taps::Two, Taps::Four, Taps::Six, Taps::Eight] {
            assert_eq!(Taps::from_count(taps.count()), Some(taps));
        }
        assert_eq!(Taps::from_count(5), None);
        assert_eq!(Taps::Two.register_mode(), 3);
    }
}
