//! Non-Maximum Suppression.
//!
//! Single-Shot MultiBox Detectors produce a cluster of overlapping
//! detections for each object. This module implements the classic greedy
//! suppression: candidates are visited in order of descending confidence,
//! and a candidate is discarded as soon as it overlaps any already-kept
//! detection more than the configured IoU threshold. Suppressed detections
//! are dropped entirely, not averaged into the survivor.

use std::cmp::Reverse;

use crate::num::TotalF32;

use super::Detection;

/// A greedy non-maximum suppression pass.
pub struct NonMaxSuppression {
    iou_thresh: f32,
}

impl NonMaxSuppression {
    /// The default intersection-over-union threshold used to determine if
    /// two detections overlap.
    pub const DEFAULT_IOU_THRESH: f32 = 0.3;

    pub fn new() -> Self {
        Self {
            iou_thresh: Self::DEFAULT_IOU_THRESH,
        }
    }

    /// Sets the intersection-over-union threshold to consider two detections
    /// as overlapping.
    ///
    /// By default, [`Self::DEFAULT_IOU_THRESH`] is used.
    pub fn set_iou_thresh(&mut self, iou_thresh: f32) {
        self.iou_thresh = iou_thresh;
    }

    /// Performs non-maximum suppression on `detections`.
    ///
    /// Candidates are processed highest confidence first. Score ties are
    /// broken by original candidate index, ascending, so the result never
    /// depends on sort internals. No two returned detections overlap more
    /// than the IoU threshold.
    pub fn process(&self, detections: Vec<Detection>) -> Vec<Detection> {
        let mut candidates: Vec<(usize, Detection)> = detections.into_iter().enumerate().collect();
        candidates.sort_unstable_by_key(|(index, det)| (Reverse(TotalF32(det.score())), *index));

        let mut kept: Vec<Detection> = Vec::new();
        for (_, candidate) in candidates {
            let suppressed = kept.iter().any(|keep| {
                keep.bounding_rect().iou(&candidate.bounding_rect()) > self.iou_thresh
            });
            if !suppressed {
                kept.push(candidate);
            }
        }
        kept
    }
}

impl Default for NonMaxSuppression {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rect::Rect;

    fn det(score: f32, rect: Rect) -> Detection {
        Detection::new(score, rect)
    }

    #[test]
    fn single_candidate_is_kept() {
        let nms = NonMaxSuppression::new();
        let result = nms.process(vec![det(0.9, Rect::from_center(0.5, 0.5, 0.2, 0.2))]);
        assert_eq!(result.len(), 1);
        assert_eq!(result[0].score(), 0.9);
    }

    #[test]
    fn duplicate_boxes_keep_the_higher_score() {
        let nms = NonMaxSuppression::new();
        let rect = Rect::from_center(0.5, 0.5, 0.2, 0.2);
        let result = nms.process(vec![det(0.6, rect), det(0.8, rect)]);
        assert_eq!(result.len(), 1);
        assert_eq!(result[0].score(), 0.8);
    }

    #[test]
    fn score_ties_break_by_original_index() {
        let nms = NonMaxSuppression::new();
        let a = det(0.7, Rect::from_center(0.5, 0.5, 0.2, 0.2));
        let b = det(0.7, Rect::from_center(0.51, 0.5, 0.2, 0.2));
        let result = nms.process(vec![a, b]);
        assert_eq!(result.len(), 1);
        let (xc, _) = result[0].bounding_rect().center();
        assert_eq!(xc, 0.5);
    }

    #[test]
    fn non_overlapping_boxes_survive() {
        let nms = NonMaxSuppression::new();
        let a = det(0.9, Rect::from_center(0.2, 0.2, 0.1, 0.1));
        let b = det(0.8, Rect::from_center(0.8, 0.8, 0.1, 0.1));
        let result = nms.process(vec![a, b]);
        assert_eq!(result.len(), 2);
    }

    #[test]
    fn kept_pairs_respect_the_threshold() {
        let nms = NonMaxSuppression::new();
        let candidates: Vec<Detection> = (0..10)
            .map(|i| {
                det(
                    0.5 + i as f32 * 0.01,
                    Rect::from_center(0.3 + i as f32 * 0.02, 0.5, 0.2, 0.2),
                )
            })
            .collect();
        let result = nms.process(candidates);
        for (i, a) in result.iter().enumerate() {
            for b in &result[i + 1..] {
                assert!(a.bounding_rect().iou(&b.bounding_rect()) <= 0.3);
            }
        }
    }

    #[test]
    fn degenerate_boxes_are_never_suppressed() {
        let nms = NonMaxSuppression::new();
        let a = det(0.9, Rect::from_center(0.5, 0.5, 0.0, 0.0));
        let b = det(0.8, Rect::from_center(0.5, 0.5, 0.0, 0.0));
        // Zero union area means similarity 0, so both survive.
        let result = nms.process(vec![a, b]);
        assert_eq!(result.len(), 2);
    }
}
