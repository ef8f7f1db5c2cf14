//! # Job Model
//!
//! Caller-visible job parameters and the lifecycle types the scheduler tracks
//! for every job slot.
//!
//! A job composes up to [`LAYER_COUNT`] input layers into one destination
//! layer. Layer 0 is the image layer and the only one the scaler touches; the
//! OSD layers 1-3 are blended at their native size. All per-layer work walks
//! the same table through [`JobParams::enabled_layers`].
//!
//! ## Lifecycle
//!
//! ```text
//! Idle ──fill──▶ Filled ──bind──▶ Dispatched ──irq──▶ HwAcknowledged ──reap──▶ PostProcessed
//!  ▲                                                                              │
//!  └─────────────────────────────── release ─────────────────────────────────────┘
//! ```

use serde::Serialize;

use gspn_coef::{CoefError, Rotation, ScalePlan, Taps, build_plan, plan::Size};

use crate::error::{GspnError, GspnResult};
use crate::session::Capability;

/// Number of input layers per job.
pub const LAYER_COUNT: usize = 4;
/// Table index of the destination layer in [`JobParams::enabled_layers`].
pub const DEST_LAYER: usize = LAYER_COUNT;

/// Caller-supplied buffer handle, resolved by the buffer resolver.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize)]
pub struct BufferHandle(pub u64);

/// Hardware-addressable location returned by the buffer resolver.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize)]
pub struct HwAddr(pub u64);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize)]
pub enum PixelFormat {
    #[default]
    Argb8888,
    Rgb888,
    Rgb565,
    Yuv420TwoPlane,
    Yuv422TwoPlane,
    Yuv420ThreePlane,
}

impl PixelFormat {
    pub fn is_yuv(self) -> bool {
        matches!(
            self,
            PixelFormat::Yuv420TwoPlane | PixelFormat::Yuv422TwoPlane | PixelFormat::Yuv420ThreePlane
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize)]
pub struct Rect {
    pub x: u32,
    pub y: u32,
    pub w: u32,
    pub h: u32,
}

impl Rect {
    pub const fn new(x: u32, y: u32, w: u32, h: u32) -> Self {
        Self { x, y, w, h }
    }

    pub fn size(&self) -> Size {
        Size::new(self.w, self.h)
    }
}

/// One entry of the layer table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct LayerParams {
    pub enabled: bool,
    pub buffer: BufferHandle,
    pub format: PixelFormat,
    /// Source region read from the buffer.
    pub clip: Rect,
    /// Region written in the destination.
    pub dest: Rect,
    pub rotation: Rotation,
}

impl LayerParams {
    pub fn new(buffer: BufferHandle, clip: Rect, dest: Rect) -> Self {
        Self {
            enabled: true,
            buffer,
            format: PixelFormat::default(),
            clip,
            dest,
            rotation: Rotation::Deg0,
        }
    }

    pub fn with_format(mut self, format: PixelFormat) -> Self {
        self.format = format;
        self
    }

    pub fn with_rotation(mut self, rotation: Rotation) -> Self {
        self.rotation = rotation;
        self
    }
}

/// Parameters of one job as supplied by the caller.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct JobParams {
    pub layers: [LayerParams; LAYER_COUNT],
    /// Destination layer; only `buffer`, `format` and `clip` (the output
    /// surface) are used.
    pub dest: LayerParams,
    pub h_taps: Taps,
    pub v_taps: Taps,
    /// Synchronous jobs are waited on; asynchronous jobs get a fence.
    pub sync: bool,
}

impl JobParams {
    /// A single-layer scaling job from `src` in `input` to `dst` in `output`.
    pub fn scale(input: BufferHandle, src: Rect, output: BufferHandle, dst: Rect) -> Self {
        let mut params = Self::default();
        params.layers[0] = LayerParams::new(input, src, dst);
        params.dest = LayerParams::new(output, dst, dst);
        params.sync = true;
        params
    }

    pub fn with_taps(mut self, h_taps: Taps, v_taps: Taps) -> Self {
        self.h_taps = h_taps;
        self.v_taps = v_taps;
        self
    }

    pub fn asynchronous(mut self) -> Self {
        self.sync = false;
        self
    }

    /// Enabled entries of the layer table, destination last at [`DEST_LAYER`].
    pub fn enabled_layers(&self) -> impl Iterator<Item = (usize, &LayerParams)> + '_ {
        self.layers
            .iter()
            .chain(std::iter::once(&self.dest))
            .enumerate()
            .filter(|(_, layer)| layer.enabled)
    }

    /// Scaling plan of the image layer, `None` when layer 0 is disabled.
    pub fn scale_plan(&self) -> Result<Option<ScalePlan>, CoefError> {
        let image = &self.layers[0];
        if !image.enabled {
            return Ok(None);
        }
        build_plan(
            image.clip.size(),
            image.dest.size(),
            image.rotation,
            self.h_taps,
            self.v_taps,
        )
        .map(Some)
    }

    /// Check the parameters against the hardware capability.
    pub fn validate(&self, cap: &Capability) -> GspnResult<()> {
        if !self.layers.iter().any(|l| l.enabled) {
            return Err(GspnError::validation("layers", "at least one enabled input layer", "none"));
        }
        if !self.dest.enabled {
            return Err(GspnError::validation("dest", "must be enabled", "disabled"));
        }
        let in_range = |v: u32, min: u32, max: u32| (min..=max).contains(&v);

        for (index, layer) in self.enabled_layers() {
            let (min, max) = if index == DEST_LAYER {
                (cap.out_min, cap.out_max)
            } else {
                (cap.crop_min, cap.crop_max)
            };
            for (name, value) in [("clip.w", layer.clip.w), ("clip.h", layer.clip.h)] {
                if !in_range(value, min, max) {
                    return Err(GspnError::validation(
                        format!("layer{}.{}", index, name),
                        format!("between {} and {}", min, max),
                        value.to_string(),
                    ));
                }
            }
            if index != DEST_LAYER {
                for (name, value) in [("dest.w", layer.dest.w), ("dest.h", layer.dest.h)] {
                    if !in_range(value, cap.out_min, cap.out_max) {
                        return Err(GspnError::validation(
                            format!("layer{}.{}", index, name),
                            format!("between {} and {}", cap.out_min, cap.out_max),
                            value.to_string(),
                        ));
                    }
                }
            }
            if cap.yuv_xywh_even && layer.format.is_yuv() {
                let r = layer.clip;
                if (r.x | r.y | r.w | r.h) & 1 != 0 {
                    return Err(GspnError::validation(
                        format!("layer{}.clip", index),
                        "even x/y/w/h for YUV formats",
                        format!("{:?}", r),
                    ));
                }
            }
        }

        for (index, layer) in self.layers.iter().enumerate().skip(1) {
            if layer.enabled && layer.clip.size() != layer.dest.size() {
                return Err(GspnError::validation(
                    format!("layer{}", index),
                    "OSD layers cannot be scaled",
                    format!("{}x{} -> {}x{}", layer.clip.w, layer.clip.h, layer.dest.w, layer.dest.h),
                ));
            }
        }

        let image = &self.layers[0];
        if image.enabled {
            let plan = self.scale_plan()?;
            if let Some(plan) = plan {
                let up = cap.scale_range_up / 16;
                if image.dest.w > plan.rotated.w.saturating_mul(up)
                    || image.dest.h > plan.rotated.h.saturating_mul(up)
                {
                    return Err(GspnError::validation(
                        "layer0.dest",
                        format!("at most {}x up-scale", up),
                        format!("{}x{}", image.dest.w, image.dest.h),
                    ));
                }
            }
        }
        Ok(())
    }
}

/// Lifecycle status of a job slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub enum JobStatus {
    #[default]
    Idle,
    Filled,
    Dispatched,
    HwAcknowledged,
    PostProcessed,
}

/// Which collection a slot currently belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub enum SlotLocation {
    #[default]
    Free,
    /// Acquired by a caller, not yet submitted.
    Reserved,
    /// In a core's admitted queue.
    Queued(usize),
    /// Bound to a core.
    InFlight(usize),
}

impl SlotLocation {
    /// Reserved and queued slots both count as admitted.
    pub fn is_admitted(self) -> bool {
        matches!(self, SlotLocation::Reserved | SlotLocation::Queued(_))
    }
}

/// Why a job did not complete.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum FailReason {
    Resolve { layer: usize },
    Coefficient,
    HwConfig { code: i32 },
    Timeout,
    Suspended,
}

/// Final result of one job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum JobOutcome {
    Completed { core: usize, exec_us: u64 },
    Failed { core: Option<usize>, reason: FailReason },
}

impl JobOutcome {
    pub fn is_ok(&self) -> bool {
        matches!(self, JobOutcome::Completed { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cap() -> Capability {
        Capability::for_cores(1, 8)
    }

    fn scale_job(src: (u32, u32), dst: (u32, u32)) -> JobParams {
        JobParams::scale(
            BufferHandle(1),
            Rect::new(0, 0, src.0, src.1),
            BufferHandle(2),
            Rect::new(0, 0, dst.0, dst.1),
        )
    }

    #[test]
    fn test_layer_table_iteration() {
        let mut job = scale_job((100, 100), (50, 50));
        job.layers[2] = LayerParams::new(BufferHandle(9), Rect::new(0, 0, 8, 8), Rect::new(4, 4, 8, 8));
        let indices: Vec<usize> = job.enabled_layers().map(|(i, _)| i).collect();
        assert_eq!(indices, vec![0, 2, DEST_LAYER]);
    }

    #[test]
    fn test_validate_accepts_plain_scale() {
        assert!(scale_job((100, 100), (50, 50)).validate(&cap()).is_ok());
        assert!(scale_job((64, 64), (64, 64)).validate(&cap()).is_ok());
    }

    #[test]
    fn test_validate_limits() {
        assert!(scale_job((2, 100), (50, 50)).validate(&cap()).is_err());
        assert!(scale_job((100, 100), (50, 4096)).validate(&cap()).is_err());
        assert!(scale_job((2000, 100), (100, 100)).validate(&cap()).is_err());
        assert!(scale_job((10, 10), (200, 10)).validate(&cap()).is_err());

        let mut yuv = scale_job((100, 100), (50, 50));
        yuv.layers[0] = yuv.layers[0].with_format(PixelFormat::Yuv420TwoPlane);
        yuv.layers[0].clip.x = 1;
        assert!(yuv.validate(&cap()).is_err());
    }

    #[test]
    fn test_validate_rejects_scaled_osd() {
        let mut job = scale_job((100, 100), (50, 50));
        job.layers[1] = LayerParams::new(BufferHandle(3), Rect::new(0, 0, 16, 16), Rect::new(0, 0, 32, 32));
        let err = job.validate(&cap()).unwrap_err();
        assert_eq!(err.category(), "validation");
    }

    #[test]
    fn test_validate_requires_layers() {
        let mut job = scale_job((100, 100), (50, 50));
        job.layers[0].enabled = false;
        assert!(job.validate(&cap()).is_err());
        let mut job = scale_job((100, 100), (50, 50));
        job.dest.enabled = false;
        assert!(job.validate(&cap()).is_err());
    }

    #[test]
    fn test_scale_plan_uses_rotation() {
        let mut job = scale_job((100, 200), (200, 100));
        job.layers[0] = job.layers[0].with_rotation(Rotation::Deg270);
        let plan = job.scale_plan().unwrap().unwrap();
        assert!(!plan.scaling());
    }

    #[test]
    fn test_admitted_locations() {
        assert!(SlotLocation::Reserved.is_admitted());
        assert!(SlotLocation::Queued(0).is_admitted());
        assert!(!SlotLocation::InFlight(0).is_admitted());
        assert!(!SlotLocation::Free.is_admitted());
    }
}
