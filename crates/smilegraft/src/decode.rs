//! Image decoding.
//!
//! Raw bytes (PNG, JPEG, BMP, WebP) in, 8-bit RGB out. Landmark
//! detection works on the luminance of the same image, see
//! [`to_detection_gray`].

use image::GrayImage;

use crate::types::{GraftError, RgbImage};

/// Decode raw image bytes to 8-bit RGB, dropping any alpha channel.
///
/// # Errors
///
/// Returns [`GraftError::EmptyInput`] if `bytes` is empty.
/// Returns [`GraftError::ImageDecode`] if the image format is
/// unrecognized or the data is corrupt.
pub fn decode_rgb(bytes: &[u8]) -> Result<RgbImage, GraftError> {
    if bytes.is_empty() {
        return Err(GraftError::EmptyInput);
    }

    let img = image::load_from_memory(bytes)?;
    tracing::debug!(width = img.width(), height = img.height(), "decoded image");
    Ok(img.to_rgb8())
}

/// Grayscale copy of an RGB image for landmark detection, using the
/// `image` crate's luminance weights. Neutral grays map to themselves.
#[must_use]
pub fn to_detection_gray(image: &RgbImage) -> GrayImage {
    image::DynamicImage::ImageRgb8(image.clone()).to_luma8()
}
