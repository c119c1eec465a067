//! Gaussian blur with an explicit kernel size.
//!
//! Mask feathering and color correction size their kernels in pixels
//! from the face scale, so the blur here is parameterized by an odd
//! kernel size rather than by sigma. Sigma follows the usual convention
//! for size-only kernels, `0.3 * ((size - 1) * 0.5 - 1) + 0.8`, and the
//! small sizes 3, 5 and 7 use the exact binomial weights. Borders
//! repeat the edge pixel (`aa|abcd|dd`).
//!
//! Blurs run on `f32` buffers ([`image::Rgb32FImage`], single-channel
//! `Luma<f32>` masks) so repeated passes do not accumulate rounding.

use image::{ImageBuffer, Pixel};
use imageproc::filter::separable_filter_equal;

/// Binomial weights for the smallest odd kernels.
const SMALL_KERNELS: [&[f32]; 4] = [
    &[1.0],
    &[0.25, 0.5, 0.25],
    &[0.0625, 0.25, 0.375, 0.25, 0.0625],
    &[
        0.031_25, 0.109_375, 0.218_75, 0.281_25, 0.218_75, 0.109_375, 0.031_25,
    ],
];

/// Sigma implied by a kernel size.
#[must_use]
pub fn sigma_for_size(size: u32) -> f64 {
    0.3f64.mul_add((f64::from(size) - 1.0).mul_add(0.5, -1.0), 0.8)
}

/// Normalized 1-D Gaussian kernel of `size` taps.
///
/// Even sizes are rounded up to the next odd size; zero is treated as 1.
#[must_use]
#[allow(clippy::cast_possible_truncation)]
pub fn gaussian_kernel(size: u32) -> Vec<f32> {
    let size = size.max(1) | 1;
    if let Some(small) = SMALL_KERNELS.get((size / 2) as usize) {
        return small.to_vec();
    }

    let sigma = sigma_for_size(size);
    let radius = f64::from(size / 2);
    let scale = -0.5 / (sigma * sigma);
    let weights: Vec<f64> = (0..size)
        .map(|i| {
            let x = f64::from(i) - radius;
            (scale * x * x).exp()
        })
        .collect();
    let total: f64 = weights.iter().sum();
    weights.iter().map(|w| (w / total) as f32).collect()
}

/// Blur an `f32` image with a separable Gaussian of `size` taps.
///
/// Every channel is filtered independently by
/// [`imageproc::filter::separable_filter_equal`]. Sizes of 1 or less
/// return the image unchanged.
#[must_use = "returns the blurred image"]
pub fn gaussian_blur<P>(image: &ImageBuffer<P, Vec<f32>>, size: u32) -> ImageBuffer<P, Vec<f32>>
where
    P: Pixel<Subpixel = f32>,
{
    if size <= 1 {
        return image.clone();
    }
    separable_filter_equal(image, &gaussian_kernel(size))
}
