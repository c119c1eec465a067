//! Resample an image through a similarity transform.
//!
//! The transform maps source coordinates to output coordinates, so each
//! output pixel is fetched from the source at the inverse-mapped
//! position with bilinear interpolation
//! ([`imageproc::geometric_transformations::warp_into_with`]).
//!
//! The source covers `[-0.5, width - 0.5) x [-0.5, height - 0.5)`, one
//! unit square per pixel center. Positions inside it are sampled with
//! the edge pixels repeated, so the last row and column come through
//! intact. Output pixels whose source position falls outside it are set
//! to [`BORDER_COLOR`] (black). Near the image edge this black band can
//! enter the composite wherever the mask is non-zero.

use image::Rgb;
use imageproc::geometric_transformations::{Interpolation, warp_into_with};

use crate::align::SimilarityTransform;
use crate::types::{Dimensions, GraftError, Point, RgbImage};

/// Fill value for output pixels that map outside the source image.
pub const BORDER_COLOR: Rgb<u8> = Rgb([0, 0, 0]);

/// Warp `image` by `transform` onto a new canvas of `width` x `height`.
///
/// # Errors
///
/// Returns [`GraftError::InvalidDimensions`] if either output side is
/// zero. Returns [`GraftError::DegenerateInput`] if the transform has no
/// inverse.
#[allow(clippy::cast_possible_truncation)]
pub fn warp(
    image: &RgbImage,
    transform: &SimilarityTransform,
    width: u32,
    height: u32,
) -> Result<RgbImage, GraftError> {
    let dimensions = Dimensions::new(width, height);
    if dimensions.is_empty() {
        return Err(GraftError::InvalidDimensions(dimensions));
    }
    let inverse = transform.inverse().ok_or_else(|| {
        GraftError::DegenerateInput("similarity transform is not invertible".to_string())
    })?;

    let mut out = RgbImage::from_pixel(width, height, BORDER_COLOR);
    let (w, h) = image.dimensions();
    if w > 0 && h > 0 {
        // Bilinear sampling reads one pixel right of and below the
        // sample, so the source gets a repeated last column and row.
        let padded = RgbImage::from_fn(w + 1, h + 1, |x, y| {
            *image.get_pixel(x.min(w - 1), y.min(h - 1))
        });
        let (x_end, y_end) = (f64::from(w) - 0.5, f64::from(h) - 0.5);
        let (x_last, y_last) = (f64::from(w - 1), f64::from(h - 1));
        warp_into_with(
            &padded,
            move |x, y| {
                let p = inverse.apply(Point::new(f64::from(x), f64::from(y)));
                if (-0.5..x_end).contains(&p.x) && (-0.5..y_end).contains(&p.y) {
                    (p.x.clamp(0.0, x_last) as f32, p.y.clamp(0.0, y_last) as f32)
                } else {
                    (-1.0, -1.0)
                }
            },
            Interpolation::Bilinear,
            BORDER_COLOR,
            &mut out,
        );
    }

    tracing::debug!(
        source = %Dimensions::of(image),
        output = %dimensions,
        "warped image"
    );
    Ok(out)
}
