//! Edge map used by the contour backend.

use image::{DynamicImage, GrayImage};
use imageproc::edges::canny;
use imageproc::filter::gaussian_blur_f32;

/// Luma, optionally smoothed, then Canny with the given hysteresis thresholds.
/// Edge pixels are 255, everything else 0. `blur_sigma <= 0` skips smoothing.
pub fn edge_map(image: &DynamicImage, blur_sigma: f32, low: f32, high: f32) -> GrayImage {
    let gray = image.to_luma8();
    if blur_sigma > 0.0 {
        canny(&gaussian_blur_f32(&gray, blur_sigma), low, high)
    } else {
        canny(&gray, low, high)
    }
}
