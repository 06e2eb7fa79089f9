//! Rotation-normalizing crop extraction.
//!
//! The downstream landmark network expects the subject upright and centered.
//! Two of the detector's keypoints define the normalization: the vector from
//! the full-body size/rotation reference to the mid-hip center gives the
//! body axis, and its length gives the body's radius. The crop is the
//! axis-aligned square of twice that radius around the hip center, taken
//! from the image *after* it has been rotated so that the body axis points
//! up. The crop rectangle itself is never rotated.

use image::{imageops, Rgb, RgbImage};
use imageproc::geometric_transformations::{rotate, Interpolation};

use crate::detection::{Detection, KeypointId};

/// Margin in pixels added to every side of the rotated frame before
/// cropping, so that the crop rectangle can never reach outside the frame.
const PAD_MARGIN: u32 = 200;

/// The square region and rotation that normalize a detected subject's
/// orientation, in pixel coordinates of the source frame.
#[derive(Debug, Clone, Copy)]
pub struct AlignmentRegion {
    center_x: f32,
    center_y: f32,
    angle_degrees: f32,
    half_extent: f32,
}

impl AlignmentRegion {
    /// Computes the alignment region from the mid-hip center and full-body
    /// size/rotation keypoints, both in pixel coordinates.
    pub fn from_keypoints(hip: (f32, f32), scale_ref: (f32, f32)) -> Self {
        let dx = hip.0 - scale_ref.0;
        let dy = hip.1 - scale_ref.1;

        Self {
            center_x: hip.0,
            center_y: hip.1,
            angle_degrees: dy.atan2(dx).to_degrees(),
            half_extent: (dx * dx + dy * dy).sqrt(),
        }
    }

    /// Computes the alignment region of a detection within a frame of the
    /// given pixel size.
    ///
    /// The detection's normalized keypoints are scaled by the frame width
    /// and height independently per axis. Returns [`None`] for a detection
    /// that does not carry the two reference keypoints.
    pub fn from_detection(
        detection: &Detection,
        frame_width: u32,
        frame_height: u32,
    ) -> Option<Self> {
        let (w, h) = (frame_width as f32, frame_height as f32);
        let hip = detection.keypoint(KeypointId::MidHipCenter)?;
        let scale_ref = detection.keypoint(KeypointId::FullBodySizeRotation)?;
        Some(Self::from_keypoints(
            (hip.x() * w, hip.y() * h),
            (scale_ref.x() * w, scale_ref.y() * h),
        ))
    }

    /// The hip center the crop is built around.
    pub fn center(&self) -> (f32, f32) {
        (self.center_x, self.center_y)
    }

    /// Angle of the scale-reference → hip-center vector, in degrees.
    pub fn angle_degrees(&self) -> f32 {
        self.angle_degrees
    }

    /// The rotation applied to the image so the body axis points up.
    pub fn rotation_degrees(&self) -> f32 {
        self.angle_degrees - 90.0
    }

    /// Half the side length of the square crop, equal to the pixel distance
    /// between the two keypoints.
    pub fn half_extent(&self) -> f32 {
        self.half_extent
    }

    /// Rotates `frame` around the hip center and extracts the square crop.
    ///
    /// Returns [`None`] when the region is degenerate (both keypoints
    /// coincide, leaving a zero-sized crop).
    pub fn crop(&self, frame: &RgbImage) -> Option<RgbImage> {
        // Counter-clockwise rotation by `rotation_degrees`; imageproc's
        // theta is clockwise, hence the sign flip.
        let rotated = rotate(
            frame,
            (self.center_x, self.center_y),
            -self.rotation_degrees().to_radians(),
            Interpolation::Bilinear,
            Rgb([0, 0, 0]),
        );

        // Pad after rotating, then offset the (un-rotated) crop corners by
        // the same margin. The margin guarantees in-bounds access for any
        // region whose extent stays within it.
        let mut padded = RgbImage::new(
            rotated.width() + 2 * PAD_MARGIN,
            rotated.height() + 2 * PAD_MARGIN,
        );
        imageops::replace(&mut padded, &rotated, PAD_MARGIN as i64, PAD_MARGIN as i64);

        let x_min = (self.center_x - self.half_extent).round() as i64 + PAD_MARGIN as i64;
        let y_min = (self.center_y - self.half_extent).round() as i64 + PAD_MARGIN as i64;
        let x_max = (self.center_x + self.half_extent).round() as i64 + PAD_MARGIN as i64;
        let y_max = (self.center_y + self.half_extent).round() as i64 + PAD_MARGIN as i64;

        let x_min = x_min.clamp(0, padded.width() as i64);
        let y_min = y_min.clamp(0, padded.height() as i64);
        let x_max = x_max.clamp(x_min, padded.width() as i64);
        let y_max = y_max.clamp(y_min, padded.height() as i64);

        let (width, height) = ((x_max - x_min) as u32, (y_max - y_min) as u32);
        if width == 0 || height == 0 {
            return None;
        }

        Some(imageops::crop_imm(&padded, x_min as u32, y_min as u32, width, height).to_image())
    }
}
