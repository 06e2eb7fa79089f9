//! Decoding of raw detector outputs into absolute detections.
//!
//! The detector emits two tensors per image: one raw score (logit) per
//! anchor, and one regression row of [`BOX_PARAMS`] values per anchor. This
//! module turns those rows into [`Detection`]s with normalized box corners
//! and keypoints, calibrates the scores, and drops everything below the
//! score threshold. Duplicate removal lives in [`nms`].

pub mod nms;

use crate::anchors::{Anchor, Anchors};
use crate::num::calibrate_score;
use crate::rect::Rect;

/// Number of 2-D points in each anchor's regression payload.
///
/// Point 0 is the box center, point 1 the box size; the remaining points are
/// the auxiliary keypoints listed in [`KeypointId`].
pub const NUM_POINTS: usize = 6;

/// Number of regression values per anchor row.
pub const BOX_PARAMS: usize = NUM_POINTS * 2;

/// Auxiliary keypoints regressed by the pose detection network.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeypointId {
    MidHipCenter = 0,
    /// Encodes full-body size and rotation together with
    /// [`KeypointId::MidHipCenter`].
    FullBodySizeRotation = 1,
    MidShoulderCenter = 2,
    /// Like [`KeypointId::FullBodySizeRotation`], for the upper body only.
    UpperBodySizeRotation = 3,
}

/// A 2D keypoint produced as part of a [`Detection`], in normalized
/// coordinates.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Keypoint {
    x: f32,
    y: f32,
}

impl Keypoint {
    pub fn new(x: f32, y: f32) -> Self {
        Self { x, y }
    }

    pub fn x(&self) -> f32 {
        self.x
    }

    pub fn y(&self) -> f32 {
        self.y
    }
}

/// A detected body.
///
/// The bounding box and all keypoints are normalized to `[0, 1]` relative to
/// the square frame the network saw. The score has been calibrated and lies
/// in `(0, 1)`.
#[derive(Debug, Clone)]
pub struct Detection {
    score: f32,
    rect: Rect,
    keypoints: Vec<Keypoint>,
}

impl Detection {
    pub fn new(score: f32, rect: Rect) -> Self {
        Self {
            score,
            rect,
            keypoints: Vec::new(),
        }
    }

    pub fn with_keypoints(score: f32, rect: Rect, keypoints: Vec<Keypoint>) -> Self {
        Self {
            score,
            rect,
            keypoints,
        }
    }

    pub fn score(&self) -> f32 {
        self.score
    }

    /// Returns the axis-aligned bounding rectangle containing the detected
    /// body.
    pub fn bounding_rect(&self) -> Rect {
        self.rect
    }

    pub fn keypoints(&self) -> &[Keypoint] {
        &self.keypoints
    }

    /// Returns the keypoint with the given identifier, or [`None`] if the
    /// detection does not carry it (detections built via [`Detection::new`]
    /// have no keypoints at all).
    pub fn keypoint(&self, id: KeypointId) -> Option<Keypoint> {
        self.keypoints.get(id as usize).copied()
    }
}

/// Decodes the raw output tensors of one image into threshold-filtered
/// detections.
///
/// `raw_boxes` is the flattened `[num_anchors, BOX_PARAMS]` regression
/// tensor, `raw_scores` the `[num_anchors]` logit tensor, and `input_size`
/// the side length of the network's square input. Survivors keep their
/// anchor order; they are *not* sorted by score here.
///
/// A tensor whose row count disagrees with the anchor table is a
/// configuration error and is surfaced as such.
pub fn decode_outputs(
    anchors: &Anchors,
    input_size: u32,
    raw_boxes: &[f32],
    raw_scores: &[f32],
    threshold: f32,
) -> anyhow::Result<Vec<Detection>> {
    let num_anchors = anchors.count();
    if raw_scores.len() != num_anchors || raw_boxes.len() != num_anchors * BOX_PARAMS {
        anyhow::bail!(
            "output tensor shape mismatch: {} anchors, but {} scores and {} box values",
            num_anchors,
            raw_scores.len(),
            raw_boxes.len(),
        );
    }

    let mut detections = Vec::new();
    for (index, &raw_score) in raw_scores.iter().enumerate() {
        let score = calibrate_score(raw_score);
        if score <= threshold {
            continue;
        }

        let row = &raw_boxes[index * BOX_PARAMS..(index + 1) * BOX_PARAMS];
        detections.push(decode_row(&anchors[index], input_size, row, score));
    }
    Ok(detections)
}

fn decode_row(anchor: &Anchor, input_size: u32, row: &[f32], score: f32) -> Detection {
    debug_assert_eq!(row.len(), BOX_PARAMS);

    // Raw values are in input pixels; dividing by the (square) input side
    // normalizes them. The anchor contributes only a translation: the box
    // center and every keypoint are offsets from the anchor center, while
    // the size slot stands on its own.
    let scale = input_size as f32;
    let x_center = row[0] / scale + anchor.x_center();
    let y_center = row[1] / scale + anchor.y_center();
    let width = row[2] / scale;
    let height = row[3] / scale;

    let keypoints = (2..NUM_POINTS)
        .map(|point| {
            Keypoint::new(
                row[point * 2] / scale + anchor.x_center(),
                row[point * 2 + 1] / scale + anchor.y_center(),
            )
        })
        .collect();

    Detection::with_keypoints(
        score,
        Rect::from_center(x_center, y_center, width, height),
        keypoints,
    )
}
