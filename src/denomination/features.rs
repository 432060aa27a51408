//! Fixed-length feature vectors for the learned classifier.

use image::imageops::FilterType;
use image::DynamicImage;
use imageproc::hog::{hog, HogOptions};
use serde::{Deserialize, Serialize};

use crate::detection::{clahe, preprocessing, roi};
use crate::error::{Error, Result};

/// HOG window, width x height
pub const HOG_WINDOW: (u32, u32) = (128, 64);
const HOG_ORIENTATIONS: usize = 9;
const HOG_CELL_SIDE: usize = 8;
const HOG_BLOCK_SIDE: usize = 2;
const HOG_BLOCK_STRIDE: usize = 1;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum FeatureKind {
    /// CLAHE-equalized intensity histogram with `bins` bins, normalized to unit sum
    IntensityHistogram {
        bins: usize,
        clip_limit: f32,
        tile_size: u32,
    },
    /// Histogram of oriented gradients over a fixed-size window
    Hog,
}

impl FeatureKind {
    pub fn histogram() -> Self {
        FeatureKind::IntensityHistogram {
            bins: 32,
            clip_limit: 2.0,
            tile_size: 8,
        }
    }
}

/// Turns an image into the feature vector a model was trained on.
///
/// Stored inside the model so inference always uses the training extractor.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct FeatureExtractor {
    pub kind: FeatureKind,
    /// Crop to the located watermark region before extracting
    pub crop_to_roi: bool,
}

impl FeatureExtractor {
    pub fn new(kind: FeatureKind) -> Self {
        Self {
            kind,
            crop_to_roi: false,
        }
    }

    pub fn with_roi_crop(mut self, crop_to_roi: bool) -> Self {
        self.crop_to_roi = crop_to_roi;
        self
    }

    /// Length of every vector this extractor produces
    pub fn feature_len(&self) -> usize {
        match self.kind {
            FeatureKind::IntensityHistogram { bins, .. } => bins,
            FeatureKind::Hog => {
                let cells_x = HOG_WINDOW.0 as usize / HOG_CELL_SIDE;
                let cells_y = HOG_WINDOW.1 as usize / HOG_CELL_SIDE;
                let blocks_x = (cells_x - HOG_BLOCK_SIDE) / HOG_BLOCK_STRIDE + 1;
                let blocks_y = (cells_y - HOG_BLOCK_SIDE) / HOG_BLOCK_STRIDE + 1;
                blocks_x * blocks_y * HOG_BLOCK_SIDE * HOG_BLOCK_SIDE * HOG_ORIENTATIONS
            }
        }
    }

    /// Reject parameter sets that cannot produce features
    pub fn validate(&self) -> Result<()> {
        match self.kind {
            FeatureKind::IntensityHistogram {
                bins,
                clip_limit,
                tile_size,
            } => {
                if bins == 0 || bins > 256 || tile_size == 0 || !clip_limit.is_finite() {
                    return Err(Error::FeatureExtraction(format!(
                        "invalid histogram parameters: bins={bins}, tile_size={tile_size}, clip_limit={clip_limit}"
                    )));
                }
                Ok(())
            }
            FeatureKind::Hog => Ok(()),
        }
    }

    pub fn extract(&self, image: &DynamicImage) -> Result<Vec<f32>> {
        self.validate()?;
        let mut gray = preprocessing::to_grayscale(image)?;
        if self.crop_to_roi {
            if let Some(bbox) = roi::locate_roi(image) {
                gray = preprocessing::crop_to_roi(&gray, &bbox)?;
            }
        }

        match self.kind {
            FeatureKind::IntensityHistogram {
                bins,
                clip_limit,
                tile_size,
            } => {
                let equalized = clahe::equalize(&gray, clip_limit, tile_size);
                Ok(coarse_histogram(&equalized, bins))
            }
            FeatureKind::Hog => {
                let resized =
                    image::imageops::resize(&gray, HOG_WINDOW.0, HOG_WINDOW.1, FilterType::Triangle);
                let options = HogOptions::new(
                    HOG_ORIENTATIONS,
                    false,
                    HOG_CELL_SIDE,
                    HOG_BLOCK_SIDE,
                    HOG_BLOCK_STRIDE,
                );
                hog(&resized, options).map_err(Error::FeatureExtraction)
            }
        }
    }
}

/// `bins`-bin intensity histogram normalized to unit sum
fn coarse_histogram(gray: &image::GrayImage, bins: usize) -> Vec<f32> {
    let mut hist = vec![0f32; bins];
    for p in gray.pixels() {
        let bin = p[0] as usize * bins / 256;
        hist[bin] += 1.0;
    }
    let total: f32 = hist.iter().sum();
    if total > 0.0 {
        for h in hist.iter_mut() {
            *h /= total;
        }
    }
    hist
}
