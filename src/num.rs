//! Utilities for numerics.

use std::cmp::Ordering;

/// The raw score magnitude beyond which inputs are clamped before applying
/// the logistic function.
///
/// MediaPipe uses a limit of 100, which overflows `exp` for IEEE 754
/// single-precision floats; 80 is safe for `f32`.
pub const RAW_SCORE_LIMIT: f32 = 80.0;

/// An `f32` that implements [`Ord`] according to the IEEE 754 totalOrder predicate.
#[derive(Clone, Copy)]
pub struct TotalF32(pub f32);

impl PartialEq for TotalF32 {
    fn eq(&self, other: &Self) -> bool {
        f32::total_cmp(&self.0, &other.0) == Ordering::Equal
    }
}

impl Eq for TotalF32 {}

impl PartialOrd for TotalF32 {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for TotalF32 {
    fn cmp(&self, other: &Self) -> Ordering {
        f32::total_cmp(&self.0, &other.0)
    }
}

/// Applies the standard sigmoid/logistic function to the input.
pub fn sigmoid(v: f32) -> f32 {
    1.0 / (1.0 + (-v).exp())
}

/// Maps a raw detector logit to a probability in `(0, 1)`.
///
/// The input is clamped to `±`[`RAW_SCORE_LIMIT`] first, so that the
/// exponential inside the logistic function cannot overflow.
pub fn calibrate_score(raw: f32) -> f32 {
    sigmoid(raw.clamp(-RAW_SCORE_LIMIT, RAW_SCORE_LIMIT))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sigmoid_midpoint() {
        assert_eq!(sigmoid(0.0), 0.5);
    }

    #[test]
    fn calibration_is_monotonic_and_bounded() {
        let inputs = [-1e6, -100.0, -80.0, -5.0, 0.0, 5.0, 80.0, 100.0, 1e6];
        let mut last = 0.0;
        for raw in inputs {
            let p = calibrate_score(raw);
            assert!(p > 0.0 && p < 1.0, "calibrate_score({raw}) = {p}");
            assert!(p >= last);
            last = p;
        }
    }

    #[test]
    fn calibration_saturates_at_clamp_boundary() {
        assert_eq!(calibrate_score(1e10), calibrate_score(RAW_SCORE_LIMIT));
        assert_eq!(calibrate_score(-1e10), calibrate_score(-RAW_SCORE_LIMIT));
        assert_eq!(calibrate_score(f32::INFINITY), sigmoid(RAW_SCORE_LIMIT));
    }
}
