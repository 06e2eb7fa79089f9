//! The full preprocessing pipeline, from image files to aligned crops.
//!
//! A [`Pipeline`] ties the stages together for a single frame: pad the image
//! to a square, run the detection network, decode and calibrate the raw
//! outputs, suppress duplicates, and cut one rotation-normalized crop per
//! surviving detection. [`run_batch`] drives a pipeline over a directory of
//! images in parallel.

use std::{
    fs,
    path::{Path, PathBuf},
};

use anyhow::Context;
use image::{imageops, RgbImage};
use log::{debug, trace, warn};
use rayon::prelude::*;

use crate::align::AlignmentRegion;
use crate::anchors::Anchors;
use crate::detection::{self, nms::NonMaxSuppression, Detection};
use crate::nn::PoseDetector;

/// Default minimum calibrated score for a detection to be kept.
pub const DEFAULT_SCORE_THRESH: f32 = 0.5;

/// Detects bodies in a frame and extracts one aligned crop per body.
pub struct Pipeline {
    detector: PoseDetector,
    anchors: Anchors,
    score_thresh: f32,
    nms: NonMaxSuppression,
}

impl Pipeline {
    pub fn new(detector: PoseDetector, anchors: Anchors) -> Self {
        Self {
            detector,
            anchors,
            score_thresh: DEFAULT_SCORE_THRESH,
            nms: NonMaxSuppression::new(),
        }
    }

    /// Sets the minimum calibrated score for a detection to be kept.
    ///
    /// By default, [`DEFAULT_SCORE_THRESH`] is used.
    pub fn set_score_thresh(&mut self, thresh: f32) {
        self.score_thresh = thresh;
    }

    /// Returns a mutable reference to the suppression pass, for threshold
    /// configuration.
    pub fn nms_mut(&mut self) -> &mut NonMaxSuppression {
        &mut self.nms
    }

    /// Runs detection on `frame` and returns the surviving detections along
    /// with the square frame they are normalized to.
    ///
    /// The frame is zero-padded to a centered square before inference, so
    /// detection coordinates (and the crops cut from them) refer to the
    /// padded frame, not the original.
    pub fn detect(&self, frame: &RgbImage) -> anyhow::Result<(Vec<Detection>, RgbImage)> {
        let padded = pad_to_square(frame);
        let raw = self.detector.estimate(&padded)?;
        let detections = detection::decode_outputs(
            &self.anchors,
            self.detector.input_size(),
            &raw.boxes,
            &raw.scores,
            self.score_thresh,
        )?;
        trace!("{} candidate(s) above threshold", detections.len());
        let detections = self.nms.process(detections);
        Ok((detections, padded))
    }

    /// Produces one aligned crop per body detected in `frame`.
    ///
    /// Detections without the two reference keypoints or with a degenerate
    /// alignment region yield no crop.
    pub fn process(&self, frame: &RgbImage) -> anyhow::Result<Vec<RgbImage>> {
        let (detections, padded) = self.detect(frame)?;
        debug!("{} detection(s) after suppression", detections.len());

        let crops = detections
            .iter()
            .filter_map(|det| {
                AlignmentRegion::from_detection(det, padded.width(), padded.height())
                    .and_then(|region| region.crop(&padded))
            })
            .collect();
        Ok(crops)
    }
}

/// Zero-pads `image` to a square with the original content centered.
pub fn pad_to_square(image: &RgbImage) -> RgbImage {
    let side = image.width().max(image.height());
    if image.width() == image.height() {
        return image.clone();
    }

    let mut padded = RgbImage::new(side, side);
    imageops::replace(
        &mut padded,
        image,
        ((side - image.width()) / 2) as i64,
        ((side - image.height()) / 2) as i64,
    );
    padded
}

/// Totals of one [`run_batch`] invocation.
#[derive(Debug, Default, Clone, Copy)]
pub struct BatchSummary {
    /// Number of input images processed successfully.
    pub images: usize,
    /// Number of input images skipped due to an error.
    pub failures: usize,
    /// Total number of crops written.
    pub crops: usize,
}

/// Runs `pipeline` over every file in `input_dir` and writes the resulting
/// crops to `output_dir`.
///
/// Images are indexed in lexicographic file name order, so output names are
/// stable across runs. The crop of body `k` in image `idx` is written to
/// `img{idx}_{k}.jpg`. A file that cannot be read or processed is logged and
/// skipped without aborting the batch.
pub fn run_batch(
    pipeline: &Pipeline,
    input_dir: &Path,
    output_dir: &Path,
) -> anyhow::Result<BatchSummary> {
    fs::create_dir_all(output_dir)
        .with_context(|| format!("failed to create `{}`", output_dir.display()))?;

    let mut files: Vec<PathBuf> = fs::read_dir(input_dir)
        .with_context(|| format!("failed to read `{}`", input_dir.display()))?
        .filter_map(|entry| {
            let path = entry.ok()?.path();
            path.is_file().then_some(path)
        })
        .collect();
    files.sort();

    let summary = files
        .par_iter()
        .enumerate()
        .map(|(index, path)| match process_file(pipeline, index, path, output_dir) {
            Ok(crops) => BatchSummary {
                images: 1,
                failures: 0,
                crops,
            },
            Err(err) => {
                warn!("skipping `{}`: {:#}", path.display(), err);
                BatchSummary {
                    images: 0,
                    failures: 1,
                    crops: 0,
                }
            }
        })
        .reduce(BatchSummary::default, |a, b| BatchSummary {
            images: a.images + b.images,
            failures: a.failures + b.failures,
            crops: a.crops + b.crops,
        });
    Ok(summary)
}

fn process_file(
    pipeline: &Pipeline,
    index: usize,
    path: &Path,
    output_dir: &Path,
) -> anyhow::Result<usize> {
    let frame = image::open(path)
        .with_context(|| format!("failed to open `{}`", path.display()))?
        .to_rgb8();

    let crops = pipeline.process(&frame)?;
    for (k, crop) in crops.iter().enumerate() {
        let out = output_dir.join(crop_file_name(index, k));
        crop.save(&out)
            .with_context(|| format!("failed to write `{}`", out.display()))?;
    }
    Ok(crops.len())
}

/// File name for crop `crop_index` of the image at batch position
/// `image_index`.
///
/// The crop index disambiguates multiple bodies in the same image.
fn crop_file_name(image_index: usize, crop_index: usize) -> String {
    format!("img{image_index}_{crop_index}.jpg")
}

#[cfg(test)]
mod tests {
    use image::Rgb;

    use super::*;

    #[test]
    fn padding_centers_a_wide_image() {
        let mut image = RgbImage::new(4, 2);
        image.put_pixel(0, 0, Rgb([255, 0, 0]));

        let padded = pad_to_square(&image);
        assert_eq!((padded.width(), padded.height()), (4, 4));
        // The content moves down by (4 - 2) / 2 rows.
        assert_eq!(*padded.get_pixel(0, 1), Rgb([255, 0, 0]));
        assert_eq!(*padded.get_pixel(0, 0), Rgb([0, 0, 0]));
    }

    #[test]
    fn padding_centers_a_tall_image() {
        let mut image = RgbImage::new(1, 3);
        image.put_pixel(0, 0, Rgb([0, 255, 0]));

        let padded = pad_to_square(&image);
        assert_eq!((padded.width(), padded.height()), (3, 3));
        assert_eq!(*padded.get_pixel(1, 0), Rgb([0, 255, 0]));
    }

    #[test]
    fn square_images_pass_through() {
        let image = RgbImage::new(5, 5);
        let padded = pad_to_square(&image);
        assert_eq!((padded.width(), padded.height()), (5, 5));
    }

    #[test]
    fn crop_names_disambiguate_multiple_bodies() {
        assert_eq!(crop_file_name(0, 0), "img0_0.jpg");
        assert_eq!(crop_file_name(12, 3), "img12_3.jpg");
    }

    #[test]
    fn one_confident_anchor_yields_one_kept_detection() {
        use crate::anchors::AnchorConfig;
        use crate::detection::BOX_PARAMS;

        let anchors = Anchors::generate(&AnchorConfig::pose_detection_224()).unwrap();
        let n = anchors.count();

        let mut raw_scores = vec![-20.0f32; n];
        raw_scores[42] = 20.0;
        let mut raw_boxes = vec![0.0f32; n * BOX_PARAMS];
        raw_boxes[42 * BOX_PARAMS + 2] = 44.8;
        raw_boxes[42 * BOX_PARAMS + 3] = 44.8;

        let detections =
            detection::decode_outputs(&anchors, 224, &raw_boxes, &raw_scores, 0.5).unwrap();
        let kept = NonMaxSuppression::new().process(detections);
        assert_eq!(kept.len(), 1);
        assert!(kept[0].score() > 0.99);
        let (xc, _) = kept[0].bounding_rect().center();
        assert_eq!(xc, anchors[42].x_center());
    }
}
