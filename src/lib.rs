//! Calibration-input preparation for a two-stage pose pipeline.
//!
//! A body *detector* network proposes a bounding region plus a handful of
//! reference keypoints; a downstream *landmark* network consumes an aligned,
//! square crop of the detected subject. This crate implements everything
//! between the detector's raw output tensors and that crop:
//!
//! * [`anchors`]: deterministic generation of the SSD anchor grid the
//!   detector's output rows are laid out against, plus on-disk export.
//! * [`detection`]: decoding raw regression offsets into absolute boxes and
//!   keypoints, score calibration, thresholding, and non-maximum suppression.
//! * [`align`]: computing the rotation-normalizing square crop region from
//!   the mid-hip and full-body keypoints, and extracting the crop.
//! * [`nn`]: a thin wrapper around [tract] for invoking the ONNX detector.
//! * [`pipeline`]: the per-image driver and the parallel batch runner.
//!
//! All box and keypoint coordinates handed around between these modules are
//! normalized to `[0, 1]` relative to the (square) padded input frame; only
//! [`align`] converts into pixel space.
//!
//! [tract]: https://github.com/sonos/tract

use log::LevelFilter;

pub mod align;
pub mod anchors;
pub mod detection;
pub mod nn;
pub mod num;
pub mod pipeline;
pub mod rect;

/// macro-use only, not part of public API.
#[doc(hidden)]
pub fn init_logger(calling_crate: &'static str) {
    let log_level = if cfg!(debug_assertions) {
        LevelFilter::Trace
    } else {
        LevelFilter::Debug
    };
    env_logger::Builder::new()
        .filter(Some(calling_crate), log_level)
        .filter(Some(env!("CARGO_PKG_NAME")), log_level)
        .parse_default_env()
        .try_init()
        .ok();
}

/// Initializes logging to *stderr*.
///
/// If `cfg!(debug_assertions)` is enabled, the calling crate and this library
/// will log at *trace* level. Otherwise, they will log at *debug* level.
///
/// If a global logger is already registered, this macro will do nothing.
#[macro_export]
macro_rules! init_logger {
    () => {
        $crate::init_logger(env!("CARGO_CRATE_NAME"))
    };
}
