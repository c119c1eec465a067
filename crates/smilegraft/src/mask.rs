//! Feathered blend mask from the convex hull of the mouth landmarks.
//!
//! The hull is filled with 1.0 on a zero canvas, then blurred,
//! re-thresholded to a hard edge and blurred again. The first
//! blur-and-threshold grows the hull by one kernel radius; the second
//! blur grades the edge. The result is exactly 1 deep inside the hull,
//! exactly 0 beyond two kernel radii outside it, and smooth in between.
//! The kernel size scales with the face (see [`FaceScale::feather_size`]).

use geo::{ConvexHull, MultiPoint};
use image::{GrayImage, ImageBuffer, Luma};
use imageproc::drawing::draw_polygon_mut;

use crate::blur::gaussian_blur;
use crate::types::{Dimensions, FaceScale, GraftError, PointSet};

/// Single-channel `f32` raster backing a [`Mask`].
pub type MaskBuffer = ImageBuffer<Luma<f32>, Vec<f32>>;

/// Per-pixel blend weight in `[0, 1]`: 1 takes the warped image, 0
/// keeps the target.
#[derive(Debug, Clone, PartialEq)]
pub struct Mask(MaskBuffer);

impl Mask {
    /// Wrap a raster, clamping every value into `[0, 1]`.
    ///
    /// NaN becomes 0.
    #[must_use]
    pub fn from_buffer(mut buffer: MaskBuffer) -> Self {
        for p in buffer.pixels_mut() {
            let v = p.0[0];
            p.0[0] = if v.is_nan() { 0.0 } else { v.clamp(0.0, 1.0) };
        }
        Self(buffer)
    }

    /// A mask of the given size with every weight set to `value`
    /// (clamped into `[0, 1]`).
    #[must_use]
    pub fn filled(dimensions: Dimensions, value: f32) -> Self {
        Self::from_buffer(MaskBuffer::from_pixel(
            dimensions.width,
            dimensions.height,
            Luma([value]),
        ))
    }

    /// Mask dimensions.
    #[must_use]
    pub fn dimensions(&self) -> Dimensions {
        Dimensions::of(&self.0)
    }

    /// Weight at `(x, y)`.
    ///
    /// # Panics
    ///
    /// Panics if the coordinates are out of bounds.
    #[must_use]
    pub fn get(&self, x: u32, y: u32) -> f32 {
        self.0.get_pixel(x, y).0[0]
    }

    /// The underlying raster.
    #[must_use]
    pub const fn as_buffer(&self) -> &MaskBuffer {
        &self.0
    }

    /// Mean weight over the whole mask, in `[0, 1]`.
    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub fn coverage(&self) -> f64 {
        let n = self.0.pixels().len();
        if n == 0 {
            return 0.0;
        }
        self.0.pixels().map(|p| f64::from(p.0[0])).sum::<f64>() / n as f64
    }

    /// 8-bit rendering (0 to 255) for inspection.
    #[must_use]
    #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
    pub fn to_gray_image(&self) -> GrayImage {
        GrayImage::from_fn(self.0.width(), self.0.height(), |x, y| {
            Luma([(self.get(x, y) * 255.0).round() as u8])
        })
    }
}

/// Build the feathered mouth mask.
///
/// `dimensions` is the canvas (target image) size. The feather kernel
/// is `floor(feather_fraction * face_scale * 0.5) * 2 + 1` pixels wide.
///
/// A hull with fewer than three distinct vertices (collinear or
/// coincident points) covers no area and yields an all-zero mask.
///
/// # Errors
///
/// Returns [`GraftError::InvalidDimensions`] for a zero-sized canvas.
/// Returns [`GraftError::DegenerateInput`] if a point is non-finite.
pub fn build_mask(
    points: &PointSet,
    dimensions: Dimensions,
    face_scale: FaceScale,
    feather_fraction: f64,
) -> Result<Mask, GraftError> {
    if dimensions.is_empty() {
        return Err(GraftError::InvalidDimensions(dimensions));
    }
    if !points.is_finite() {
        return Err(GraftError::DegenerateInput(
            "mask points have non-finite coordinates".to_string(),
        ));
    }

    let mut canvas = MaskBuffer::new(dimensions.width, dimensions.height);
    let hull = hull_polygon(points);
    if hull.len() >= 3 {
        draw_polygon_mut(&mut canvas, &hull, Luma([1.0]));
    } else {
        tracing::warn!(
            vertices = hull.len(),
            "mouth hull has no area; mask will be empty"
        );
    }

    let feather = face_scale.feather_size(feather_fraction);
    let mut grown = gaussian_blur(&canvas, feather);
    for p in grown.pixels_mut() {
        p.0[0] = if p.0[0] > 0.0 { 1.0 } else { 0.0 };
    }
    let mask = Mask::from_buffer(gaussian_blur(&grown, feather));

    tracing::debug!(
        hull_vertices = hull.len(),
        feather,
        coverage = mask.coverage(),
        "built feathered mask"
    );
    Ok(mask)
}

/// Convex hull of `points` as a closed-implicitly integer polygon:
/// rounded, consecutive duplicates removed, no repeated closing vertex.
#[allow(clippy::cast_possible_truncation)]
fn hull_polygon(points: &PointSet) -> Vec<imageproc::point::Point<i32>> {
    let multi: MultiPoint<f64> = points
        .points()
        .iter()
        .map(|p| geo::Point::new(p.x, p.y))
        .collect();
    let hull = multi.convex_hull();

    let mut vertices: Vec<imageproc::point::Point<i32>> = Vec::new();
    for c in hull.exterior().coords() {
        let v = imageproc::point::Point::new(c.x.round() as i32, c.y.round() as i32);
        if vertices.last() != Some(&v) {
            vertices.push(v);
        }
    }
    while vertices.len() > 1 && vertices.first() == vertices.last() {
        vertices.pop();
    }
    vertices
}
