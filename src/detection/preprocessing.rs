use image::{DynamicImage, GrayImage};
use imageproc::edges::canny;
use imageproc::filter::separable_filter_equal;

use crate::config::{check_blur_kernel, Configuration};
use crate::detection::clahe;
use crate::error::{Error, Result};
use crate::models::{BoundingBox, EdgeMap};

/// Convert image to grayscale, rejecting empty images
///
/// Color input is expected in RGB(A) channel order, as decoded by the `image` crate.
pub fn to_grayscale(img: &DynamicImage) -> Result<GrayImage> {
    ensure_non_empty(img.width(), img.height())?;
    Ok(img.to_luma8())
}

pub fn ensure_non_empty(width: u32, height: u32) -> Result<()> {
    if width == 0 || height == 0 {
        return Err(Error::EmptyImage { width, height });
    }
    Ok(())
}

/// Crop to `roi`, which must lie inside the image
pub fn crop_to_roi(gray: &GrayImage, roi: &BoundingBox) -> Result<GrayImage> {
    let (width, height) = gray.dimensions();
    if !roi.fits_within(width, height) {
        return Err(Error::RoiOutOfBounds {
            roi: *roi,
            width,
            height,
        });
    }
    Ok(image::imageops::crop_imm(gray, roi.x, roi.y, roi.width, roi.height).to_image())
}

/// Grayscale, optional ROI crop, then CLAHE with the configured clip limit and grid
pub fn preprocess(
    img: &DynamicImage,
    roi: Option<&BoundingBox>,
    config: &Configuration,
) -> Result<GrayImage> {
    if config.histogram_tile_size == 0 {
        return Err(Error::invalid_config(
            "histogram_tile_size",
            config.histogram_tile_size,
            "must be greater than zero",
        ));
    }

    let gray = to_grayscale(img)?;
    let gray = match roi {
        Some(roi) => crop_to_roi(&gray, roi)?,
        None => gray,
    };

    Ok(clahe::equalize(
        &gray,
        config.histogram_clip_limit,
        config.histogram_tile_size,
    ))
}

/// Normalized 1-D Gaussian kernel of odd length `ksize`.
///
/// Sigma is derived from the size the same way common vision libraries do
/// when no explicit sigma is given: `0.3 * ((ksize - 1) / 2 - 1) + 0.8`.
pub fn gaussian_kernel(ksize: u32) -> Vec<f32> {
    if ksize <= 1 {
        return vec![1.0];
    }
    let sigma = 0.3 * ((ksize as f64 - 1.0) * 0.5 - 1.0) + 0.8;
    let center = (ksize / 2) as f64;
    let weights: Vec<f64> = (0..ksize)
        .map(|i| {
            let d = i as f64 - center;
            (-(d * d) / (2.0 * sigma * sigma)).exp()
        })
        .collect();
    let sum: f64 = weights.iter().sum();
    weights.iter().map(|w| (w / sum) as f32).collect()
}

/// Separable Gaussian blur with an odd kernel size
pub fn apply_blur(img: &GrayImage, ksize: u32) -> GrayImage {
    if ksize <= 1 {
        return img.clone();
    }
    separable_filter_equal(img, &gaussian_kernel(ksize))
}

/// Blur with the configured kernel, then Canny with the configured hysteresis thresholds
pub fn detect_edges(img: &GrayImage, config: &Configuration) -> Result<EdgeMap> {
    ensure_non_empty(img.width(), img.height())?;
    check_blur_kernel(config.gaussian_blur)?;

    let blurred = apply_blur(img, config.gaussian_blur);

    // Hysteresis needs low <= high; swapped thresholds are accepted
    let low = config.canny_threshold1.min(config.canny_threshold2);
    let high = config.canny_threshold1.max(config.canny_threshold2);
    Ok(canny(&blurred, low, high))
}
