//! Axis-aligned rectangles and overlap math.
//!
//! Detection boxes are stored in corner form. Coordinates are dimensionless;
//! the same type is used for normalized and pixel-space rectangles.

use std::fmt;

/// An axis-aligned rectangle in corner form.
///
/// Rectangles are allowed to have zero width and/or height. Rectangles with
/// *negative* extents can fall out of decoding degenerate regression values;
/// overlap math treats them as having zero area.
#[derive(Clone, Copy, PartialEq)]
pub struct Rect {
    x_min: f32,
    y_min: f32,
    x_max: f32,
    y_max: f32,
}

impl Rect {
    /// Creates a rectangle from its top-left and bottom-right corners.
    #[inline]
    pub fn from_corners(x_min: f32, y_min: f32, x_max: f32, y_max: f32) -> Self {
        Self {
            x_min,
            y_min,
            x_max,
            y_max,
        }
    }

    /// Creates a rectangle extending outwards from a center point.
    #[inline]
    pub fn from_center(x_center: f32, y_center: f32, width: f32, height: f32) -> Self {
        Self::from_corners(
            x_center - width * 0.5,
            y_center - height * 0.5,
            x_center + width * 0.5,
            y_center + height * 0.5,
        )
    }

    #[inline]
    pub fn x_min(&self) -> f32 {
        self.x_min
    }

    #[inline]
    pub fn y_min(&self) -> f32 {
        self.y_min
    }

    #[inline]
    pub fn x_max(&self) -> f32 {
        self.x_max
    }

    #[inline]
    pub fn y_max(&self) -> f32 {
        self.y_max
    }

    #[inline]
    pub fn width(&self) -> f32 {
        self.x_max - self.x_min
    }

    #[inline]
    pub fn height(&self) -> f32 {
        self.y_max - self.y_min
    }

    #[inline]
    pub fn center(&self) -> (f32, f32) {
        (
            (self.x_min + self.x_max) * 0.5,
            (self.y_min + self.y_max) * 0.5,
        )
    }

    /// Returns the area covered by `self`, or 0 for degenerate rectangles.
    pub fn area(&self) -> f32 {
        if self.x_max <= self.x_min || self.y_max <= self.y_min {
            return 0.0;
        }
        self.width() * self.height()
    }

    /// Scales both axes of `self` by the given factors.
    #[must_use]
    pub fn scale(&self, x: f32, y: f32) -> Self {
        Self::from_corners(self.x_min * x, self.y_min * y, self.x_max * x, self.y_max * y)
    }

    fn intersection_area(&self, other: &Self) -> f32 {
        let x_min = self.x_min.max(other.x_min);
        let y_min = self.y_min.max(other.y_min);
        let x_max = self.x_max.min(other.x_max);
        let y_max = self.y_max.min(other.y_max);
        if x_max <= x_min || y_max <= y_min {
            return 0.0;
        }
        (x_max - x_min) * (y_max - y_min)
    }

    /// Computes the Intersection over Union (IoU) of `self` and `other`.
    ///
    /// When the union area is not positive (both rectangles degenerate), the
    /// similarity is defined as 0 so that empty boxes never suppress, or get
    /// suppressed by, anything.
    pub fn iou(&self, other: &Self) -> f32 {
        let intersection = self.intersection_area(other);
        let union = self.area() + other.area() - intersection;
        if union <= 0.0 {
            return 0.0;
        }
        intersection / union
    }
}

impl fmt::Debug for Rect {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Rect [{},{}]..[{},{}]",
            self.x_min, self.y_min, self.x_max, self.y_max
        )
    }
}
