//! Shared types for the smilegraft pipeline.

use std::ops::Range;

use serde::{Deserialize, Serialize};

use crate::align::SimilarityTransform;
use crate::mask::Mask;

/// Re-export `GrayImage` so detector implementations can name the
/// detection input without depending on `image` directly.
pub use image::GrayImage;

/// Re-export `RgbImage` so callers can pass and receive color images
/// without depending on `image` directly.
pub use image::RgbImage;

/// Landmark indices of the mouth in the 68-point iBUG/dlib layout:
/// 12 outer-lip points followed by 8 inner-lip points.
pub const MOUTH_LANDMARK_RANGE: Range<usize> = 48..68;

/// A 2D point in image coordinates.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Point {
    /// Horizontal position (pixels from left edge).
    pub x: f64,
    /// Vertical position (pixels from top edge).
    pub y: f64,
}

impl Point {
    /// Create a new point.
    #[must_use]
    pub const fn new(x: f64, y: f64) -> Self {
        Self { x, y }
    }

    /// Squared Euclidean distance to another point.
    ///
    /// Avoids the square root for comparison purposes.
    #[must_use]
    pub fn distance_squared(self, other: Self) -> f64 {
        let dx = self.x - other.x;
        let dy = self.y - other.y;
        dx.mul_add(dx, dy * dy)
    }

    /// Euclidean distance to another point.
    #[must_use]
    pub fn distance(self, other: Self) -> f64 {
        self.distance_squared(other).sqrt()
    }

    /// Returns `true` if both coordinates are finite.
    #[must_use]
    pub const fn is_finite(self) -> bool {
        self.x.is_finite() && self.y.is_finite()
    }
}

/// An ordered set of landmark points.
///
/// Order is significant: point `i` of one set corresponds to the same
/// anatomical location as point `i` of another set extracted with the
/// same landmark range.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PointSet(Vec<Point>);

impl PointSet {
    /// Create a new point set from a vector of points.
    #[must_use]
    pub const fn new(points: Vec<Point>) -> Self {
        Self(points)
    }

    /// Returns `true` if the set has no points.
    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Returns the number of points in the set.
    #[must_use]
    pub const fn len(&self) -> usize {
        self.0.len()
    }

    /// Returns a slice of all points.
    #[must_use]
    pub fn points(&self) -> &[Point] {
        &self.0
    }

    /// Consumes the set and returns the underlying vector of points.
    #[must_use]
    pub fn into_points(self) -> Vec<Point> {
        self.0
    }

    /// Mean position of the points, or `None` for an empty set.
    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub fn centroid(&self) -> Option<Point> {
        if self.0.is_empty() {
            return None;
        }
        let n = self.0.len() as f64;
        let (sx, sy) = self
            .0
            .iter()
            .fold((0.0, 0.0), |(sx, sy), p| (sx + p.x, sy + p.y));
        Some(Point::new(sx / n, sy / n))
    }

    /// Scalar standard deviation of the centered coordinates.
    ///
    /// Both axes are pooled: `sqrt(sum((x - cx)^2 + (y - cy)^2) / 2n)`.
    /// Returns `0.0` for an empty set.
    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub fn spread(&self) -> f64 {
        let Some(c) = self.centroid() else {
            return 0.0;
        };
        let sum: f64 = self.0.iter().map(|p| p.distance_squared(c)).sum();
        (sum / (2.0 * self.0.len() as f64)).sqrt()
    }

    /// Returns `true` if every coordinate is finite.
    #[must_use]
    pub fn is_finite(&self) -> bool {
        self.0.iter().all(|p| p.is_finite())
    }

    /// Returns `true` if every point sits at the origin.
    ///
    /// Detectors that pre-allocate their output report a missing face
    /// this way.
    #[must_use]
    pub fn is_zero_filled(&self) -> bool {
        self.0.iter().all(|p| p.x == 0.0 && p.y == 0.0)
    }
}

impl FromIterator<Point> for PointSet {
    fn from_iter<I: IntoIterator<Item = Point>>(iter: I) -> Self {
        Self(iter.into_iter().collect())
    }
}

/// Proxy for face size in the image, derived from landmark spread.
///
/// Kernel sizes for feathering and color correction scale with it, so
/// a face close to the camera gets a proportionally wider blend band.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct FaceScale(f64);

impl FaceScale {
    /// Wrap a raw scale value.
    #[must_use]
    pub const fn new(value: f64) -> Self {
        Self(value)
    }

    /// Face scale of a landmark set (its [`PointSet::spread`]).
    #[must_use]
    pub fn of(points: &PointSet) -> Self {
        Self(points.spread())
    }

    /// The raw scale value in pixels.
    #[must_use]
    pub const fn value(self) -> f64 {
        self.0
    }

    /// Odd feather kernel size: `floor(fraction * scale * 0.5) * 2 + 1`.
    ///
    /// Always at least 1. Non-finite products collapse to 1.
    #[must_use]
    pub fn feather_size(self, fraction: f64) -> u32 {
        odd_kernel_size(fraction * self.0 * 0.5)
    }

    /// Odd color-correction kernel size: `floor(fraction * scale) * 2 + 1`.
    #[must_use]
    pub fn color_blur_size(self, fraction: f64) -> u32 {
        odd_kernel_size(fraction * self.0)
    }
}

/// `floor(half) * 2 + 1`, saturating, with negative or NaN input
/// treated as zero.
#[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
fn odd_kernel_size(half: f64) -> u32 {
    let half = if half.is_finite() { half.max(0.0) } else { 0.0 };
    let half = (half.floor() as u32).min((u32::MAX - 1) / 2);
    half * 2 + 1
}

/// Image dimensions in pixels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Dimensions {
    /// Width in pixels.
    pub width: u32,
    /// Height in pixels.
    pub height: u32,
}

impl Dimensions {
    /// Create new dimensions.
    #[must_use]
    pub const fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }

    /// Dimensions of any `image` buffer.
    #[must_use]
    pub fn of<I: image::GenericImageView>(image: &I) -> Self {
        let (width, height) = image.dimensions();
        Self { width, height }
    }

    /// Returns `true` if either side is zero.
    #[must_use]
    pub const fn is_empty(self) -> bool {
        self.width == 0 || self.height == 0
    }
}

impl std::fmt::Display for Dimensions {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}x{}", self.width, self.height)
    }
}

/// Which face to use when the detector reports more than one.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum FaceSelection {
    /// The first face in the detector's output.
    #[default]
    First,
    /// The face whose full landmark set has the greatest spread
    /// (the closest face). Ties go to the earlier face.
    Largest,
}

/// Configuration for the expression-transplant pipeline.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GraftConfig {
    /// Indices of the mouth landmarks within a detected face.
    ///
    /// Decouples the pipeline from one detector's numbering; the
    /// default matches the 68-point layout.
    pub mouth_landmarks: Range<usize>,

    /// Which face to use when the detector reports several.
    pub face_selection: FaceSelection,

    /// Feather band width as a fraction of the face scale.
    pub feather_fraction: f64,

    /// Match local brightness of the warped mouth to the neutral face
    /// before compositing.
    ///
    /// When enabled, a blurred copy of the warped image is subtracted
    /// and a blurred copy of the neutral image added, so the transplanted
    /// region takes on the neutral photograph's local illumination.
    pub color_correction: bool,

    /// Color-correction blur kernel as a multiple of the face scale.
    /// Only used when `color_correction` is `true`.
    pub color_blur_fraction: f64,
}

impl GraftConfig {
    /// Default mouth landmark range.
    pub const DEFAULT_MOUTH_LANDMARKS: Range<usize> = MOUTH_LANDMARK_RANGE;
    /// Default face selection.
    pub const DEFAULT_FACE_SELECTION: FaceSelection = FaceSelection::First;
    /// Default feather fraction.
    pub const DEFAULT_FEATHER_FRACTION: f64 = 0.2;
    /// Default for color correction.
    pub const DEFAULT_COLOR_CORRECTION: bool = false;
    /// Default color-correction blur fraction.
    pub const DEFAULT_COLOR_BLUR_FRACTION: f64 = 3.0;

    /// Check the configuration for values the pipeline cannot work with.
    ///
    /// # Errors
    ///
    /// Returns [`GraftError::InvalidConfig`] if the mouth range holds
    /// fewer than three landmarks or a fraction is not a positive
    /// finite number.
    pub fn validate(&self) -> Result<(), GraftError> {
        if self.mouth_landmarks.len() < 3 {
            return Err(GraftError::InvalidConfig(format!(
                "mouth landmark range {:?} must span at least 3 points",
                self.mouth_landmarks,
            )));
        }
        if !(self.feather_fraction.is_finite() && self.feather_fraction > 0.0) {
            return Err(GraftError::InvalidConfig(format!(
                "feather_fraction must be positive, got {}",
                self.feather_fraction,
            )));
        }
        if !(self.color_blur_fraction.is_finite() && self.color_blur_fraction > 0.0) {
            return Err(GraftError::InvalidConfig(format!(
                "color_blur_fraction must be positive, got {}",
                self.color_blur_fraction,
            )));
        }
        Ok(())
    }
}

impl Default for GraftConfig {
    fn default() -> Self {
        Self {
            mouth_landmarks: Self::DEFAULT_MOUTH_LANDMARKS,
            face_selection: Self::DEFAULT_FACE_SELECTION,
            feather_fraction: Self::DEFAULT_FEATHER_FRACTION,
            color_correction: Self::DEFAULT_COLOR_CORRECTION,
            color_blur_fraction: Self::DEFAULT_COLOR_BLUR_FRACTION,
        }
    }
}

/// Result of a pipeline run with every intermediate preserved.
#[derive(Debug, Clone)]
pub struct StagedGraft {
    /// Mouth landmarks of the neutral (target) image.
    pub neutral_mouth: PointSet,
    /// Mouth landmarks of the smiling (source) image.
    pub smiling_mouth: PointSet,
    /// Transform mapping smiling-image coordinates onto the neutral image.
    pub transform: SimilarityTransform,
    /// Face scale of the neutral mouth, used to size kernels.
    pub face_scale: FaceScale,
    /// Smiling image resampled into the neutral image's geometry.
    pub warped: RgbImage,
    /// Color-corrected warp (`Some` only when `color_correction=true`).
    pub corrected: Option<RgbImage>,
    /// Feathered blend mask built from the neutral mouth.
    pub mask: Mask,
    /// Final composite.
    pub output: RgbImage,
}

/// Errors that can occur during a pipeline run.
#[derive(Debug, thiserror::Error)]
pub enum GraftError {
    /// Failed to decode an input image.
    #[error("failed to decode image: {0}")]
    ImageDecode(#[from] image::ImageError),

    /// The input image bytes were empty.
    #[error("input image data is empty")]
    EmptyInput,

    /// Pipeline configuration is invalid.
    #[error("invalid pipeline configuration: {0}")]
    InvalidConfig(String),

    /// The landmark detector found no usable face.
    #[error("no face detected")]
    NoFaceDetected,

    /// The selected face has fewer landmarks than the mouth range needs.
    #[error("face has {found} landmarks, mouth range needs {needed}")]
    IncompleteLandmarks {
        /// Landmarks required by the configured range.
        needed: usize,
        /// Landmarks the detector reported.
        found: usize,
    },

    /// Geometry the pipeline cannot work with (coincident points,
    /// non-finite coordinates, singular transform).
    #[error("degenerate input: {0}")]
    DegenerateInput(String),

    /// Two point sets that must correspond have different lengths.
    #[error("point sets differ in length: source has {source_len}, target has {target_len}")]
    PointSetMismatch {
        /// Length of the source set.
        source_len: usize,
        /// Length of the target set.
        target_len: usize,
    },

    /// Images or mask that must share dimensions do not.
    #[error("dimension mismatch: expected {expected}, got {actual}")]
    DimensionMismatch {
        /// Dimensions of the reference (target) image.
        expected: Dimensions,
        /// Offending dimensions.
        actual: Dimensions,
    },

    /// An output canvas with zero width or height was requested.
    #[error("invalid output dimensions {0}")]
    InvalidDimensions(Dimensions),

    /// The external landmark detector failed.
    #[error("landmark detector failed: {0}")]
    Detector(String),
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    // --- Point tests ---

    #[test]
    fn point_distance() {
        let a = Point::new(0.0, 0.0);
        let b = Point::new(3.0, 4.0);
        assert!((a.distance(b) - 5.0).abs() < f64::EPSILON);
        assert!((a.distance_squared(b) - 25.0).abs() < f64::EPSILON);
    }

    #[test]
    fn point_finiteness() {
        assert!(Point::new(1.0, 2.0).is_finite());
        assert!(!Point::new(f64::NAN, 2.0).is_finite());
        assert!(!Point::new(1.0, f64::INFINITY).is_finite());
    }

    // --- PointSet tests ---

    #[test]
    fn centroid_of_square() {
        let set = PointSet::new(vec![
            Point::new(0.0, 0.0),
            Point::new(2.0, 0.0),
            Point::new(2.0, 2.0),
            Point::new(0.0, 2.0),
        ]);
        assert_eq!(set.centroid(), Some(Point::new(1.0, 1.0)));
    }

    #[test]
    fn centroid_of_empty_set_is_none() {
        assert!(PointSet::new(vec![]).centroid().is_none());
    }

    #[test]
    fn spread_pools_both_axes() {
        // Centered coordinates are all +-1, so the pooled std is 1.
        let set = PointSet::new(vec![
            Point::new(0.0, 0.0),
            Point::new(2.0, 0.0),
            Point::new(2.0, 2.0),
            Point::new(0.0, 2.0),
        ]);
        assert!((set.spread() - 1.0).abs() < 1e-12);
    }

    #[test]
    fn spread_is_translation_invariant() {
        let a = PointSet::new(vec![Point::new(0.0, 0.0), Point::new(4.0, 3.0)]);
        let b = PointSet::new(vec![Point::new(100.0, -50.0), Point::new(104.0, -47.0)]);
        assert!((a.spread() - b.spread()).abs() < 1e-12);
    }

    #[test]
    fn spread_of_coincident_points_is_zero() {
        let set = PointSet::new(vec![Point::new(5.0, 5.0); 20]);
        assert!(set.spread().abs() < f64::EPSILON);
    }

    #[test]
    fn zero_filled_detection() {
        assert!(PointSet::new(vec![Point::new(0.0, 0.0); 20]).is_zero_filled());
        assert!(!PointSet::new(vec![Point::new(0.0, 0.0), Point::new(0.0, 1.0)]).is_zero_filled());
    }

    #[test]
    fn point_set_from_iterator() {
        let set: PointSet = (0..3).map(|i| Point::new(f64::from(i), 0.0)).collect();
        assert_eq!(set.len(), 3);
        assert_eq!(set.points()[2], Point::new(2.0, 0.0));
    }

    // --- FaceScale tests ---

    #[test]
    fn feather_size_is_odd_and_follows_formula() {
        // floor(0.2 * 30 * 0.5) * 2 + 1 = 3 * 2 + 1 = 7
        assert_eq!(FaceScale::new(30.0).feather_size(0.2), 7);
        // floor(0.2 * 24 * 0.5) = floor(2.4) = 2 -> 5
        assert_eq!(FaceScale::new(24.0).feather_size(0.2), 5);
        for scale in [0.0, 1.0, 7.5, 19.9, 123.4] {
            assert_eq!(FaceScale::new(scale).feather_size(0.2) % 2, 1);
        }
    }

    #[test]
    fn feather_size_is_at_least_one() {
        assert_eq!(FaceScale::new(0.0).feather_size(0.2), 1);
        assert_eq!(FaceScale::new(-10.0).feather_size(0.2), 1);
        assert_eq!(FaceScale::new(f64::NAN).feather_size(0.2), 1);
    }

    #[test]
    fn color_blur_size_follows_formula() {
        // floor(3.0 * 10.5) * 2 + 1 = 31 * 2 + 1 = 63
        assert_eq!(FaceScale::new(10.5).color_blur_size(3.0), 63);
    }

    #[test]
    fn face_scale_of_point_set_is_spread() {
        let set = PointSet::new(vec![Point::new(-3.0, 0.0), Point::new(3.0, 0.0)]);
        assert!((FaceScale::of(&set).value() - set.spread()).abs() < f64::EPSILON);
    }

    // --- Dimensions tests ---

    #[test]
    fn dimensions_of_image() {
        let img = RgbImage::new(17, 31);
        assert_eq!(Dimensions::of(&img), Dimensions::new(17, 31));
        assert_eq!(Dimensions::new(17, 31).to_string(), "17x31");
        assert!(Dimensions::new(0, 5).is_empty());
    }

    // --- GraftConfig tests ---

    #[test]
    fn graft_config_defaults() {
        let config = GraftConfig::default();
        assert_eq!(config.mouth_landmarks, 48..68);
        assert_eq!(config.mouth_landmarks.len(), 20);
        assert_eq!(config.face_selection, FaceSelection::First);
        assert!((config.feather_fraction - 0.2).abs() < f64::EPSILON);
        assert!(!config.color_correction);
        assert!((config.color_blur_fraction - 3.0).abs() < f64::EPSILON);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn validate_rejects_short_mouth_range() {
        let config = GraftConfig {
            mouth_landmarks: 48..50,
            ..GraftConfig::default()
        };
        assert!(matches!(config.validate(), Err(GraftError::InvalidConfig(_))));
    }

    #[test]
    fn validate_rejects_bad_fractions() {
        for bad in [0.0, -1.0, f64::NAN, f64::INFINITY] {
            let feather = GraftConfig {
                feather_fraction: bad,
                ..GraftConfig::default()
            };
            assert!(feather.validate().is_err(), "feather_fraction={bad}");
            let color = GraftConfig {
                color_blur_fraction: bad,
                ..GraftConfig::default()
            };
            assert!(color.validate().is_err(), "color_blur_fraction={bad}");
        }
    }

    #[test]
    fn graft_config_serde_round_trip() {
        let config = GraftConfig {
            mouth_landmarks: 0..20,
            face_selection: FaceSelection::Largest,
            feather_fraction: 0.35,
            color_correction: true,
            color_blur_fraction: 1.5,
        };
        let json = serde_json::to_string(&config).unwrap();
        let deserialized: GraftConfig = serde_json::from_str(&json).unwrap();
        assert_eq!(config, deserialized);
    }

    #[test]
    fn graft_config_partial_json_fills_defaults() {
        let config: GraftConfig = serde_json::from_str(r#"{"color_correction": true}"#).unwrap();
        assert!(config.color_correction);
        assert_eq!(config.mouth_landmarks, MOUTH_LANDMARK_RANGE);
    }

    // --- GraftError tests ---

    #[test]
    fn error_display() {
        assert_eq!(GraftError::NoFaceDetected.to_string(), "no face detected");
        assert_eq!(
            GraftError::PointSetMismatch {
                source_len: 20,
                target_len: 19
            }
            .to_string(),
            "point sets differ in length: source has 20, target has 19",
        );
        assert_eq!(
            GraftError::DimensionMismatch {
                expected: Dimensions::new(4, 4),
                actual: Dimensions::new(4, 5),
            }
            .to_string(),
            "dimension mismatch: expected 4x4, got 4x5",
        );
    }
}
