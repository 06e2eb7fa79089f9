//! Neural Network inference.
//!
//! Thin wrapper around [`tract`](tract_onnx) that loads the pose detection
//! network from an ONNX file and runs it on [`RgbImage`]s. The wrapper owns
//! the conversion from image to input tensor (including the value range the
//! network expects) and hands the raw output tensors back as flat `f32`
//! slices.

use std::{path::Path, sync::Arc};

use anyhow::Context;
use image::{imageops, RgbImage};
use tract_onnx::prelude::{
    tract_ndarray, tvec, Framework, Graph, InferenceModelExt, IntoTensor, SimplePlan, TValue,
    TypedFact, TypedOp,
};

use crate::detection::BOX_PARAMS;

type Model = SimplePlan<TypedFact, Box<dyn TypedOp>, Graph<TypedFact, Box<dyn TypedOp>>>;

/// Describes in what order the network expects its input image data.
///
/// - `N` is the number of images, fixed at 1.
/// - `C` is the number of color channels, 3 for RGB inputs.
/// - `H` and `W` are the height and width of the input, respectively.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum InputLayout {
    /// Shape is `[N, C, H, W]`.
    Nchw,
    /// Shape is `[N, H, W, C]`.
    Nhwc,
}

/// The pose detection network, loaded and optimized for inference.
///
/// This is a cheaply [`Clone`]able handle to the underlying model.
#[derive(Clone)]
pub struct PoseDetector {
    model: Arc<Model>,
    layout: InputLayout,
    input_size: u32,
}

/// The two raw output tensors of one inference pass, flattened.
pub struct RawDetections {
    /// One logit per anchor.
    pub scores: Vec<f32>,
    /// [`BOX_PARAMS`] regression values per anchor.
    pub boxes: Vec<f32>,
}

impl PoseDetector {
    /// Loads and optimizes a pre-trained model from an ONNX file path.
    ///
    /// The path must have a `.onnx` extension. The model must take exactly
    /// one square RGB image input, in either NCHW or NHWC layout, and
    /// produce exactly two outputs (scores and box regressions, in either
    /// order).
    pub fn from_path<P: AsRef<Path>>(path: P) -> anyhow::Result<Self> {
        Self::from_path_impl(path.as_ref())
    }

    fn from_path_impl(path: &Path) -> anyhow::Result<Self> {
        match path.extension() {
            Some(ext) if ext == "onnx" => {}
            _ => anyhow::bail!("neural network file must have `.onnx` extension"),
        }

        let graph = tract_onnx::onnx()
            .model_for_path(path)
            .with_context(|| format!("failed to load model from `{}`", path.display()))?
            .into_optimized()?;
        let model = graph.into_runnable()?;

        if model.model().inputs.len() != 1 {
            anyhow::bail!(
                "model has to take exactly 1 input, this one takes {}",
                model.model().inputs.len(),
            );
        }
        if model.model().outputs.len() != 2 {
            anyhow::bail!(
                "model has to produce exactly 2 outputs, this one produces {}",
                model.model().outputs.len(),
            );
        }

        let fact = model.model().input_fact(0)?;
        let shape = fact
            .shape
            .as_concrete()
            .context("symbolic model input shape")?;
        let (layout, w, h) = match *shape {
            [1, 3, h, w] => (InputLayout::Nchw, w, h),
            [1, h, w, 3] => (InputLayout::Nhwc, w, h),
            ref shape => anyhow::bail!("invalid model input shape: {:?}", shape),
        };
        if w != h {
            anyhow::bail!("model input must be square, got {}x{}", w, h);
        }

        Ok(Self {
            model: Arc::new(model),
            layout,
            input_size: u32::try_from(w)?,
        })
    }

    /// Returns the side length of the network's square input, in pixels.
    #[inline]
    pub fn input_size(&self) -> u32 {
        self.input_size
    }

    /// Runs the network on an input image, returning the raw outputs.
    ///
    /// The image is resampled to the input size; a non-square image gets
    /// stretched, so callers should pad to square first. sRGB values are
    /// mapped linearly to `-1.0..=1.0`, the range the detection network was
    /// trained with.
    #[doc(alias = "infer")]
    pub fn estimate(&self, image: &RgbImage) -> anyhow::Result<RawDetections> {
        let s = self.input_size;
        let resized;
        let image = if (image.width(), image.height()) == (s, s) {
            image
        } else {
            resized = imageops::resize(image, s, s, imageops::FilterType::Triangle);
            &resized
        };

        let map = |x: usize, y: usize, c: usize| {
            image.get_pixel(x as u32, y as u32)[c] as f32 / 255.0 * 2.0 - 1.0
        };
        let s = s as usize;
        let tensor = match self.layout {
            InputLayout::Nchw => {
                tract_ndarray::Array4::from_shape_fn((1, 3, s, s), |(_, c, y, x)| map(x, y, c))
                    .into_tensor()
            }
            InputLayout::Nhwc => {
                tract_ndarray::Array4::from_shape_fn((1, s, s, 3), |(_, y, x, c)| map(x, y, c))
                    .into_tensor()
            }
        };

        let outputs = self
            .model
            .run(tvec!(TValue::from_const(Arc::new(tensor))))?;

        let mut flat = Vec::with_capacity(2);
        for output in &outputs {
            let view = output.to_array_view::<f32>()?;
            flat.push(view.iter().copied().collect::<Vec<f32>>());
        }
        let second = flat.pop().unwrap();
        let first = flat.pop().unwrap();

        // The score tensor has one value per anchor, the box tensor has
        // `BOX_PARAMS`; their relative size identifies them regardless of
        // output order.
        let (scores, boxes) = if first.len() < second.len() {
            (first, second)
        } else {
            (second, first)
        };
        if boxes.len() != scores.len() * BOX_PARAMS {
            anyhow::bail!(
                "cannot identify model outputs: {} and {} values",
                scores.len(),
                boxes.len(),
            );
        }

        Ok(RawDetections { scores, boxes })
    }
}
