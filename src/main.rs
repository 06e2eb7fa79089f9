use std::path::PathBuf;

use clap::Parser;
use log::info;

use posecrop::anchors::{AnchorConfig, Anchors};
use posecrop::detection::nms::NonMaxSuppression;
use posecrop::nn::PoseDetector;
use posecrop::pipeline::{self, Pipeline, DEFAULT_SCORE_THRESH};

/// Detects bodies in a directory of images and writes one aligned square
/// crop per body, ready for a pose landmark network.
#[derive(Debug, Parser)]
#[command(version)]
struct Args {
    /// Path to the pose detection model (`.onnx`).
    #[arg(short, long)]
    model: PathBuf,

    /// Directory containing the input images.
    #[arg(short, long)]
    input: PathBuf,

    /// Directory the crops are written to (created if missing).
    #[arg(short, long)]
    output: PathBuf,

    /// Anchor table to load (`.npy` or whitespace-separated text) instead of
    /// computing the built-in one.
    #[arg(long)]
    anchors: Option<PathBuf>,

    /// Minimum calibrated score for a detection to be kept.
    #[arg(long, default_value_t = DEFAULT_SCORE_THRESH)]
    score_thresh: f32,

    /// IoU above which of two overlapping detections only the more confident
    /// one is kept.
    #[arg(long, default_value_t = NonMaxSuppression::DEFAULT_IOU_THRESH)]
    iou_thresh: f32,
}

fn main() -> anyhow::Result<()> {
    posecrop::init_logger!();
    let args = Args::parse();

    let anchors = match &args.anchors {
        Some(path) => Anchors::load(path)?,
        None => Anchors::generate(&AnchorConfig::pose_detection_224())?,
    };
    info!("using {} anchors", anchors.count());

    let detector = PoseDetector::from_path(&args.model)?;
    let mut pipeline = Pipeline::new(detector, anchors);
    pipeline.set_score_thresh(args.score_thresh);
    pipeline.nms_mut().set_iou_thresh(args.iou_thresh);

    let summary = pipeline::run_batch(&pipeline, &args.input, &args.output)?;
    info!(
        "wrote {} crop(s) from {} image(s) ({} skipped)",
        summary.crops, summary.images, summary.failures,
    );
    Ok(())
}
