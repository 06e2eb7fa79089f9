//! Anchor/Prior generation for Single Shot MultiBox Detectors (SSDs).
//!
//! The detector regresses boxes and keypoints *relative* to a fixed grid of
//! anchor boxes. The grid is a pure function of the network architecture, so
//! it is computed once at startup and shared read-only for the lifetime of
//! the process. The emission order of the anchors is part of the network
//! contract: row `i` of the raw output tensors refers to anchor `i`.
//!
//! The computed table can be persisted as a flat `[N, 4]` array of
//! `(x_center, y_center, width, height)` rows, either as NumPy `.npy` or as
//! whitespace-delimited plain text. Both encodings hold the same row-major
//! sequence and are accepted interchangeably when loading.

use std::fmt;
use std::fs::File;
use std::io::{self, BufReader, BufWriter, Cursor, Read, Write};
use std::ops::Index;
use std::path::Path;

use ndarray::Array2;
use ndarray_npy::{ReadNpyExt, WriteNpyExt};

/// An anchor of an SSD network.
///
/// All values are normalized to `[0, 1]` relative to the network's input
/// resolution.
#[derive(Clone, Copy, PartialEq)]
pub struct Anchor {
    x_center: f32,
    y_center: f32,
    width: f32,
    height: f32,
}

impl Anchor {
    pub fn x_center(&self) -> f32 {
        self.x_center
    }

    pub fn y_center(&self) -> f32 {
        self.y_center
    }

    pub fn width(&self) -> f32 {
        self.width
    }

    pub fn height(&self) -> f32 {
        self.height
    }
}

impl fmt::Debug for Anchor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Anchor @ ({},{})/{}x{}",
            self.x_center, self.y_center, self.width, self.height
        )
    }
}

/// Describes the anchor layout of an SSD detection network.
///
/// All fields have to be supplied; no defaults are implied. The values must
/// match the training configuration of the network exactly, otherwise the
/// decoded detections are garbage.
#[derive(Debug, Clone)]
pub struct AnchorConfig {
    /// Number of output layers of the network.
    pub num_layers: usize,
    /// Anchor scale of the first layer.
    pub min_scale: f32,
    /// Anchor scale of the last layer.
    pub max_scale: f32,
    pub input_size_height: u32,
    pub input_size_width: u32,
    /// Sub-cell offset of each anchor center, in units of one grid cell.
    pub anchor_offset_x: f32,
    pub anchor_offset_y: f32,
    /// Per-layer stride. Layers with equal consecutive strides share one
    /// feature map and have their anchors merged.
    pub strides: Vec<u32>,
    pub aspect_ratios: Vec<f32>,
    /// Replaces the aspect-ratio set of layer 0 with three predefined
    /// anchors.
    pub reduce_boxes_in_lowest_layer: bool,
    /// If positive, appends one extra anchor per layer whose scale is the
    /// geometric mean of the current and next layer's scale.
    pub interpolated_scale_aspect_ratio: f32,
    /// Forces every anchor to width and height 1.0. Networks trained this
    /// way carry the box size entirely in the regression output, the anchor
    /// only supplies a translation reference.
    pub fixed_anchor_size: bool,
}

impl AnchorConfig {
    /// The anchor layout of the 224×224 single-class pose detector.
    ///
    /// Yields 2254 anchors: 28×28×2 + 14×14×2 + 7×7×6.
    pub fn pose_detection_224() -> Self {
        Self {
            num_layers: 5,
            min_scale: 0.1484375,
            max_scale: 0.75,
            input_size_height: 224,
            input_size_width: 224,
            anchor_offset_x: 0.5,
            anchor_offset_y: 0.5,
            strides: vec![8, 16, 32, 32, 32],
            aspect_ratios: vec![1.0],
            reduce_boxes_in_lowest_layer: false,
            interpolated_scale_aspect_ratio: 1.0,
            fixed_anchor_size: true,
        }
    }
}

fn calculate_scale(min_scale: f32, max_scale: f32, stride_index: usize, num_strides: usize) -> f32 {
    min_scale + (max_scale - min_scale) * stride_index as f32 / (num_strides - 1) as f32
}

/// The ordered anchor table of an SSD network.
pub struct Anchors {
    anchors: Vec<Anchor>,
}

impl Anchors {
    /// Computes the anchor table for the given configuration.
    ///
    /// Returns an error if the declared layer count disagrees with the
    /// stride list; this is a configuration mistake, not a runtime
    /// condition.
    pub fn generate(config: &AnchorConfig) -> anyhow::Result<Self> {
        if config.num_layers != config.strides.len() {
            anyhow::bail!(
                "anchor configuration declares {} layers but lists {} strides",
                config.num_layers,
                config.strides.len(),
            );
        }
        if config.num_layers < 2 {
            anyhow::bail!("anchor configuration needs at least 2 layers");
        }

        let num_strides = config.strides.len();
        let mut anchors = Vec::new();

        // Layers sharing a stride share a feature map; they are merged into
        // one group and contribute their (aspect ratio, scale) pairs in
        // layer order before the grid is expanded.
        let mut layer_id = 0;
        while layer_id < num_strides {
            let mut aspect_ratios = Vec::new();
            let mut scales = Vec::new();

            let mut last_same_stride_layer = layer_id;
            while last_same_stride_layer < num_strides
                && config.strides[last_same_stride_layer] == config.strides[layer_id]
            {
                let scale = calculate_scale(
                    config.min_scale,
                    config.max_scale,
                    last_same_stride_layer,
                    num_strides,
                );

                if last_same_stride_layer == 0 && config.reduce_boxes_in_lowest_layer {
                    // The first layer can be set up to use predefined anchors.
                    aspect_ratios.extend([1.0, 2.0, 0.5]);
                    scales.extend([0.1, scale, scale]);
                } else {
                    for &aspect_ratio in &config.aspect_ratios {
                        aspect_ratios.push(aspect_ratio);
                        scales.push(scale);
                    }

                    if config.interpolated_scale_aspect_ratio > 0.0 {
                        let scale_next = if last_same_stride_layer == num_strides - 1 {
                            1.0
                        } else {
                            calculate_scale(
                                config.min_scale,
                                config.max_scale,
                                last_same_stride_layer + 1,
                                num_strides,
                            )
                        };
                        scales.push((scale * scale_next).sqrt());
                        aspect_ratios.push(config.interpolated_scale_aspect_ratio);
                    }
                }

                last_same_stride_layer += 1;
            }

            let sizes: Vec<(f32, f32)> = aspect_ratios
                .iter()
                .zip(&scales)
                .map(|(&aspect_ratio, &scale)| {
                    let ratio_sqrt = aspect_ratio.sqrt();
                    (scale * ratio_sqrt, scale / ratio_sqrt)
                })
                .collect();

            let stride = config.strides[layer_id];
            let grid_height = (config.input_size_height as f32 / stride as f32).ceil() as u32;
            let grid_width = (config.input_size_width as f32 / stride as f32).ceil() as u32;

            // Emission order is the network contract: y outer, x inner,
            // anchor index innermost.
            for y in 0..grid_height {
                for x in 0..grid_width {
                    for &(width, height) in &sizes {
                        let x_center = (x as f32 + config.anchor_offset_x) / grid_width as f32;
                        let y_center = (y as f32 + config.anchor_offset_y) / grid_height as f32;
                        let (width, height) = if config.fixed_anchor_size {
                            (1.0, 1.0)
                        } else {
                            (width, height)
                        };
                        anchors.push(Anchor {
                            x_center,
                            y_center,
                            width,
                            height,
                        });
                    }
                }
            }

            layer_id = last_same_stride_layer;
        }

        Ok(Self { anchors })
    }

    /// Returns the total number of SSD anchors/priors.
    pub fn count(&self) -> usize {
        self.anchors.len()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Anchor> {
        self.anchors.iter()
    }

    fn from_flat(values: Vec<f32>) -> anyhow::Result<Self> {
        if values.is_empty() || values.len() % 4 != 0 {
            anyhow::bail!(
                "anchor table must be a non-empty multiple of 4 values, got {}",
                values.len(),
            );
        }
        let anchors = values
            .chunks_exact(4)
            .map(|row| Anchor {
                x_center: row[0],
                y_center: row[1],
                width: row[2],
                height: row[3],
            })
            .collect();
        Ok(Self { anchors })
    }

    fn to_array(&self) -> Array2<f32> {
        let mut arr = Array2::zeros((self.anchors.len(), 4));
        for (mut row, anchor) in arr.rows_mut().into_iter().zip(&self.anchors) {
            row[0] = anchor.x_center;
            row[1] = anchor.y_center;
            row[2] = anchor.width;
            row[3] = anchor.height;
        }
        arr
    }

    /// Writes the table in NumPy `.npy` encoding.
    pub fn write_npy<W: Write>(&self, writer: W) -> anyhow::Result<()> {
        self.to_array().write_npy(writer)?;
        Ok(())
    }

    /// Writes the table as whitespace-delimited plain text, one anchor per
    /// line.
    pub fn write_text<W: Write>(&self, mut writer: W) -> io::Result<()> {
        for anchor in &self.anchors {
            writeln!(
                writer,
                "{:e} {:e} {:e} {:e}",
                anchor.x_center, anchor.y_center, anchor.width, anchor.height,
            )?;
        }
        Ok(())
    }

    /// Reads a table in `.npy` encoding.
    ///
    /// Accepts both `f32` and `f64` element types (NumPy defaults to the
    /// latter).
    pub fn read_npy<R: Read>(mut reader: R) -> anyhow::Result<Self> {
        let mut data = Vec::new();
        reader.read_to_end(&mut data)?;

        let values = match Array2::<f32>::read_npy(Cursor::new(&data)) {
            Ok(arr) => arr.iter().copied().collect(),
            Err(_) => Array2::<f64>::read_npy(Cursor::new(&data))?
                .iter()
                .map(|&v| v as f32)
                .collect(),
        };
        Self::from_flat(values)
    }

    /// Reads a table in plain-text encoding.
    pub fn read_text<R: Read>(mut reader: R) -> anyhow::Result<Self> {
        let mut text = String::new();
        reader.read_to_string(&mut text)?;

        let values = text
            .split_whitespace()
            .map(|tok| tok.parse::<f32>())
            .collect::<Result<Vec<_>, _>>()?;
        Self::from_flat(values)
    }

    /// Loads a persisted anchor table, choosing the decoder based on the
    /// file extension (`.npy` is binary, everything else is plain text).
    pub fn load<P: AsRef<Path>>(path: P) -> anyhow::Result<Self> {
        let path = path.as_ref();
        let reader = BufReader::new(File::open(path)?);
        match path.extension() {
            Some(ext) if ext == "npy" => Self::read_npy(reader),
            _ => Self::read_text(reader),
        }
    }

    /// Persists the anchor table, choosing the encoder based on the file
    /// extension.
    pub fn store<P: AsRef<Path>>(&self, path: P) -> anyhow::Result<()> {
        let path = path.as_ref();
        let writer = BufWriter::new(File::create(path)?);
        match path.extension() {
            Some(ext) if ext == "npy" => self.write_npy(writer),
            _ => Ok(self.write_text(writer)?),
        }
    }
}

impl Index<usize> for Anchors {
    type Output = Anchor;

    fn index(&self, index: usize) -> &Anchor {
        &self.anchors[index]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pose_anchors() -> Anchors {
        Anchors::generate(&AnchorConfig::pose_detection_224()).unwrap()
    }

    #[test]
    fn pose_config_anchor_count() {
        // 28x28 and 14x14 maps carry 2 anchors per cell, the merged
        // stride-32 group carries 6.
        assert_eq!(pose_anchors().count(), 28 * 28 * 2 + 14 * 14 * 2 + 7 * 7 * 6);
    }

    #[test]
    fn generation_is_deterministic() {
        let a = pose_anchors();
        let b = pose_anchors();
        assert_eq!(a.count(), b.count());
        for (x, y) in a.iter().zip(b.iter()) {
            assert_eq!(x, y);
        }
    }

    #[test]
    fn emission_order_is_y_x_anchor() {
        let anchors = pose_anchors();

        // The first feature map is 28x28 with 2 anchors per cell. Both
        // anchors of a cell share the cell center.
        assert_eq!(anchors[0].x_center(), 0.5 / 28.0);
        assert_eq!(anchors[0].y_center(), 0.5 / 28.0);
        assert_eq!(anchors[1].x_center(), anchors[0].x_center());
        assert_eq!(anchors[1].y_center(), anchors[0].y_center());

        // x advances before y.
        assert_eq!(anchors[2].x_center(), 1.5 / 28.0);
        assert_eq!(anchors[2].y_center(), 0.5 / 28.0);
        assert_eq!(anchors[28 * 2].x_center(), 0.5 / 28.0);
        assert_eq!(anchors[28 * 2].y_center(), 1.5 / 28.0);
    }

    #[test]
    fn fixed_anchor_size_forces_unit_boxes() {
        for anchor in pose_anchors().iter() {
            assert_eq!(anchor.width(), 1.0);
            assert_eq!(anchor.height(), 1.0);
        }
    }

    #[test]
    fn reduced_lowest_layer_uses_predefined_anchors() {
        let config = AnchorConfig {
            num_layers: 2,
            min_scale: 0.2,
            max_scale: 0.8,
            input_size_height: 64,
            input_size_width: 64,
            anchor_offset_x: 0.5,
            anchor_offset_y: 0.5,
            strides: vec![32, 64],
            aspect_ratios: vec![1.0, 2.0],
            reduce_boxes_in_lowest_layer: true,
            interpolated_scale_aspect_ratio: 1.0,
            fixed_anchor_size: false,
        };
        let anchors = Anchors::generate(&config).unwrap();

        // Layer 0: 2x2 grid with the 3 predefined anchors. Layer 1: 1x1
        // grid with 2 configured ratios plus the interpolated one.
        assert_eq!(anchors.count(), 2 * 2 * 3 + 1 * 1 * 3);

        // Predefined set: (ratio 1.0, scale 0.1), (2.0, scale), (0.5, scale)
        // with scale = min_scale at layer 0.
        assert_eq!(anchors[0].width(), 0.1);
        assert_eq!(anchors[0].height(), 0.1);
        let sqrt2 = 2.0f32.sqrt();
        assert!((anchors[1].width() - 0.2 * sqrt2).abs() < 1e-6);
        assert!((anchors[1].height() - 0.2 / sqrt2).abs() < 1e-6);
        assert!((anchors[2].width() - 0.2 / sqrt2).abs() < 1e-6);
        assert!((anchors[2].height() - 0.2 * sqrt2).abs() < 1e-6);
    }

    #[test]
    fn last_layer_interpolates_against_one() {
        let config = AnchorConfig {
            num_layers: 2,
            min_scale: 0.25,
            max_scale: 0.75,
            input_size_height: 64,
            input_size_width: 64,
            anchor_offset_x: 0.5,
            anchor_offset_y: 0.5,
            strides: vec![32, 64],
            aspect_ratios: vec![1.0],
            reduce_boxes_in_lowest_layer: false,
            interpolated_scale_aspect_ratio: 1.0,
            fixed_anchor_size: false,
        };
        let anchors = Anchors::generate(&config).unwrap();

        // Layer 1 (1x1 grid) starts at index 2*2*2: configured anchor at
        // max_scale, then the interpolated anchor at sqrt(0.75 * 1.0).
        let base = 2 * 2 * 2;
        assert_eq!(anchors[base].width(), 0.75);
        assert!((anchors[base + 1].width() - 0.75f32.sqrt()).abs() < 1e-6);
    }

    #[test]
    fn stride_count_mismatch_is_rejected() {
        let mut config = AnchorConfig::pose_detection_224();
        config.strides.pop();
        assert!(Anchors::generate(&config).is_err());
    }

    #[test]
    fn text_roundtrip() {
        let anchors = pose_anchors();
        let mut buf = Vec::new();
        anchors.write_text(&mut buf).unwrap();

        let restored = Anchors::read_text(&buf[..]).unwrap();
        assert_eq!(restored.count(), anchors.count());
        for (a, b) in anchors.iter().zip(restored.iter()) {
            assert_eq!(a, b);
        }
    }

    #[test]
    fn npy_roundtrip() {
        let anchors = pose_anchors();
        let mut buf = Vec::new();
        anchors.write_npy(&mut buf).unwrap();

        let restored = Anchors::read_npy(&buf[..]).unwrap();
        assert_eq!(restored.count(), anchors.count());
        for (a, b) in anchors.iter().zip(restored.iter()) {
            assert_eq!(a, b);
        }
    }
}
