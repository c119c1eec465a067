//! Mask-weighted blending and local color correction.

use image::{Rgb, Rgb32FImage};

use crate::blur::gaussian_blur;
use crate::mask::Mask;
use crate::types::{Dimensions, FaceScale, GraftError, RgbImage};

/// Blend `warped` over `target` using `mask` as the per-pixel weight.
///
/// Each channel becomes `warped * m + target * (1 - m)`, rounded to the
/// nearest byte. Where both inputs agree the output equals them, for
/// any mask.
///
/// # Errors
///
/// Returns [`GraftError::DimensionMismatch`] unless `warped`, `target`
/// and `mask` all have the same dimensions.
#[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
pub fn composite(warped: &RgbImage, target: &RgbImage, mask: &Mask) -> Result<RgbImage, GraftError> {
    let expected = Dimensions::of(target);
    ensure_dimensions(expected, Dimensions::of(warped))?;
    ensure_dimensions(expected, mask.dimensions())?;

    let out = RgbImage::from_fn(expected.width, expected.height, |x, y| {
        let m = mask.get(x, y);
        let w = warped.get_pixel(x, y).0;
        let t = target.get_pixel(x, y).0;
        Rgb(std::array::from_fn(|c| {
            let v = f32::from(w[c]).mul_add(m, f32::from(t[c]) * (1.0 - m));
            v.round().clamp(0.0, 255.0) as u8
        }))
    });

    tracing::debug!(dimensions = %expected, coverage = mask.coverage(), "composited");
    Ok(out)
}

/// Shift the local color of `warped` toward that of `target`.
///
/// Computes `blur(target) + warped - blur(warped)` per channel, clipped
/// to `0..=255`. The blur kernel is `floor(blur_fraction * face_scale) * 2 + 1`
/// pixels wide, so low frequencies come from `target` and detail from
/// `warped`.
///
/// # Errors
///
/// Returns [`GraftError::DimensionMismatch`] if the images differ in size.
#[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
pub fn correct_colors(
    warped: &RgbImage,
    target: &RgbImage,
    face_scale: FaceScale,
    blur_fraction: f64,
) -> Result<RgbImage, GraftError> {
    let expected = Dimensions::of(target);
    ensure_dimensions(expected, Dimensions::of(warped))?;

    let size = face_scale.color_blur_size(blur_fraction);
    let warped_f = to_f32(warped);
    let blurred_target = gaussian_blur(&to_f32(target), size);
    let blurred_warped = gaussian_blur(&warped_f, size);

    let out = RgbImage::from_fn(expected.width, expected.height, |x, y| {
        let bt = blurred_target.get_pixel(x, y).0;
        let bw = blurred_warped.get_pixel(x, y).0;
        let w = warped_f.get_pixel(x, y).0;
        Rgb(std::array::from_fn(|c| {
            (bt[c] + w[c] - bw[c]).round().clamp(0.0, 255.0) as u8
        }))
    });

    tracing::debug!(kernel = size, "color corrected warped image");
    Ok(out)
}

/// Widen to `f32` while keeping the 0 to 255 scale.
fn to_f32(image: &RgbImage) -> Rgb32FImage {
    Rgb32FImage::from_fn(image.width(), image.height(), |x, y| {
        let p = image.get_pixel(x, y).0;
        Rgb(p.map(f32::from))
    })
}

fn ensure_dimensions(expected: Dimensions, actual: Dimensions) -> Result<(), GraftError> {
    if expected == actual {
        Ok(())
    } else {
        Err(GraftError::DimensionMismatch { expected, actual })
    }
}
