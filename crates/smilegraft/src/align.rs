//! Procrustes alignment of corresponding landmark sets.
//!
//! [`align`] finds the similarity transform (rotation, uniform scale,
//! translation) that carries one ordered point set onto another. Both
//! sets are centered on their centroids and normalized by their pooled
//! standard deviation; the rotation comes from the SVD of the 2x2
//! cross-covariance of the normalized sets, and the scale is the ratio
//! of the two spreads.
//!
//! The SVD solution can be a reflection rather than a rotation when the
//! target is a mirror image of the source. A reflected linear part would
//! flip the warped image, so the singular vector belonging to the
//! smallest singular value is negated whenever the determinant comes out
//! negative.

use nalgebra::{Matrix2, Vector2};

use crate::types::{GraftError, Point, PointSet};

/// Spreads below this are treated as coincident points.
pub const MIN_SPREAD: f64 = 1e-9;

/// A 2x3 affine transform restricted to rotation, uniform scale and
/// translation.
///
/// Maps a point `p` to `linear * p + translation`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SimilarityTransform {
    linear: Matrix2<f64>,
    translation: Vector2<f64>,
}

impl SimilarityTransform {
    /// The identity transform.
    #[must_use]
    pub fn identity() -> Self {
        Self {
            linear: Matrix2::identity(),
            translation: Vector2::zeros(),
        }
    }

    /// Build a transform from a rotation angle (radians, counter-clockwise
    /// in a y-up frame), a uniform scale and a translation.
    #[must_use]
    pub fn from_parts(rotation: f64, scale: f64, translation: Point) -> Self {
        let (sin, cos) = rotation.sin_cos();
        Self {
            linear: Matrix2::new(cos, -sin, sin, cos) * scale,
            translation: Vector2::new(translation.x, translation.y),
        }
    }

    /// Row-major 2x3 matrix `[[a, b, tx], [c, d, ty]]`.
    #[must_use]
    pub fn rows(&self) -> [[f64; 3]; 2] {
        [
            [self.linear.m11, self.linear.m12, self.translation.x],
            [self.linear.m21, self.linear.m22, self.translation.y],
        ]
    }

    /// Apply the transform to a point.
    #[must_use]
    pub fn apply(&self, p: Point) -> Point {
        let v = self.linear * Vector2::new(p.x, p.y) + self.translation;
        Point::new(v.x, v.y)
    }

    /// Apply the transform to every point of a set.
    #[must_use]
    pub fn apply_all(&self, points: &PointSet) -> PointSet {
        points.points().iter().map(|&p| self.apply(p)).collect()
    }

    /// Determinant of the linear part. Positive for proper rotations.
    #[must_use]
    pub fn determinant(&self) -> f64 {
        self.linear.determinant()
    }

    /// Uniform scale factor.
    #[must_use]
    pub fn scale(&self) -> f64 {
        self.determinant().abs().sqrt()
    }

    /// Rotation angle in radians, in `(-pi, pi]`.
    #[must_use]
    pub fn rotation(&self) -> f64 {
        self.linear.m21.atan2(self.linear.m11)
    }

    /// The inverse transform, or `None` if the linear part is singular.
    #[must_use]
    pub fn inverse(&self) -> Option<Self> {
        let linear = self.linear.try_inverse()?;
        let translation = -(linear * self.translation);
        Some(Self {
            linear,
            translation,
        })
    }
}

/// Compute the similarity transform that maps `source` onto `target`.
///
/// Point `i` of `source` is matched to point `i` of `target`. The
/// returned transform minimizes the summed squared distance between the
/// transformed source and the target when both sets have equal spread,
/// and never contains a reflection.
///
/// # Errors
///
/// Returns [`GraftError::PointSetMismatch`] if the sets differ in length.
/// Returns [`GraftError::DegenerateInput`] if a set is empty, has
/// non-finite coordinates, or its points are (nearly) coincident.
pub fn align(source: &PointSet, target: &PointSet) -> Result<SimilarityTransform, GraftError> {
    if source.len() != target.len() {
        return Err(GraftError::PointSetMismatch {
            source_len: source.len(),
            target_len: target.len(),
        });
    }
    let (c_src, s_src) = normalization(source, "source")?;
    let (c_dst, s_dst) = normalization(target, "target")?;

    // Cross-covariance of the normalized sets.
    let covariance = source
        .points()
        .iter()
        .zip(target.points())
        .fold(Matrix2::zeros(), |acc: Matrix2<f64>, (a, b)| {
            let a = Vector2::new(a.x - c_src.x, a.y - c_src.y) / s_src;
            let b = Vector2::new(b.x - c_dst.x, b.y - c_dst.y) / s_dst;
            acc + a * b.transpose()
        });

    let svd = covariance.svd(true, true);
    let (Some(mut u), Some(v_t)) = (svd.u, svd.v_t) else {
        return Err(GraftError::DegenerateInput(
            "singular value decomposition did not converge".to_string(),
        ));
    };

    let mut rotation = (u * v_t).transpose();
    if rotation.determinant() < 0.0 {
        let weakest = if svd.singular_values[0] < svd.singular_values[1] {
            0
        } else {
            1
        };
        let flipped = -u.column(weakest);
        u.set_column(weakest, &flipped);
        rotation = (u * v_t).transpose();
    }

    let scale = s_dst / s_src;
    let linear = rotation * scale;
    let translation = Vector2::new(c_dst.x, c_dst.y) - linear * Vector2::new(c_src.x, c_src.y);

    let transform = SimilarityTransform {
        linear,
        translation,
    };
    tracing::debug!(
        scale,
        rotation_deg = transform.rotation().to_degrees(),
        tx = translation.x,
        ty = translation.y,
        "aligned point sets"
    );
    Ok(transform)
}

/// Centroid and spread of a set, rejecting sets that cannot be
/// normalized.
fn normalization(points: &PointSet, role: &str) -> Result<(Point, f64), GraftError> {
    if !points.is_finite() {
        return Err(GraftError::DegenerateInput(format!(
            "{role} point set has non-finite coordinates"
        )));
    }
    let Some(centroid) = points.centroid() else {
        return Err(GraftError::DegenerateInput(format!(
            "{role} point set is empty"
        )));
    };
    let spread = points.spread();
    if spread < MIN_SPREAD {
        return Err(GraftError::DegenerateInput(format!(
            "{role} point set has zero spread (all points coincide)"
        )));
    }
    Ok((centroid, spread))
}
