//! Denomination by template matching against a reference gallery.
//!
//! Each reference is slid over the grayscale query and scored with zero-mean
//! normalized cross-correlation (ZNCC), which lies in `[-1, 1]` and reaches 1
//! exactly where the window equals the template up to brightness and
//! contrast. The denomination with the highest positive score wins.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use image::imageops::FilterType;
use image::{DynamicImage, GrayImage, ImageReader};

use crate::denomination::Classify;
use crate::detection::preprocessing;
use crate::error::{Error, Result};
use crate::models::{Denomination, DenominationEstimate};

/// Queries whose longest side exceeds this are scaled down, together with
/// the templates, before matching
pub const MATCH_WORKING_SIZE: u32 = 480;

const TEMPLATE_EXTENSIONS: [&str; 3] = ["jpg", "jpeg", "png"];

/// Per-pixel variance below which a window or template counts as flat
const FLAT_VARIANCE: f64 = 1e-6;

#[derive(Debug, Clone)]
pub struct ReferenceTemplate {
    pub denomination: Denomination,
    pub image: GrayImage,
}

/// Read-only set of reference templates, one per known denomination
#[derive(Debug, Clone, Default)]
pub struct TemplateGallery {
    templates: Vec<ReferenceTemplate>,
}

impl TemplateGallery {
    pub fn from_templates(templates: Vec<ReferenceTemplate>) -> Self {
        Self { templates }
    }

    /// Load `<dir>/<label>.<jpg|jpeg|png>` for every denomination.
    ///
    /// A missing or unreadable file is logged and leaves that denomination
    /// out of the gallery.
    pub fn load(dir: &Path) -> Self {
        let mut templates = Vec::new();
        for denomination in Denomination::ALL {
            match load_template(dir, denomination) {
                Ok(template) => templates.push(template),
                Err(e) => log::warn!("{e}; {denomination} will not be matched"),
            }
        }
        log::info!(
            "Loaded {} of {} reference templates from {}",
            templates.len(),
            Denomination::ALL.len(),
            dir.display()
        );
        Self { templates }
    }

    pub fn templates(&self) -> &[ReferenceTemplate] {
        &self.templates
    }

    pub fn len(&self) -> usize {
        self.templates.len()
    }

    pub fn is_empty(&self) -> bool {
        self.templates.is_empty()
    }
}

/// Candidate paths for a denomination's template, in lookup order
pub fn template_paths(dir: &Path, denomination: Denomination) -> Vec<PathBuf> {
    TEMPLATE_EXTENSIONS
        .iter()
        .map(|ext| dir.join(format!("{}.{}", denomination.label(), ext)))
        .collect()
}

pub fn load_template(dir: &Path, denomination: Denomination) -> Result<ReferenceTemplate> {
    let unavailable = || Error::TemplateUnavailable {
        label: denomination.label().to_string(),
        path: dir.join(denomination.label()),
    };

    let path = template_paths(dir, denomination)
        .into_iter()
        .find(|p| p.is_file())
        .ok_or_else(unavailable)?;

    let image = ImageReader::open(&path)?
        .with_guessed_format()?
        .decode()
        .map_err(|source| Error::ImageLoad {
            path: path.clone(),
            source,
        })?;
    if image.width() == 0 || image.height() == 0 {
        return Err(unavailable());
    }

    Ok(ReferenceTemplate {
        denomination,
        image: image.to_luma8(),
    })
}

/// Highest ZNCC score of `template` over every position in `image`.
///
/// Returns None when the template does not fit inside the image.
pub fn best_correlation(image: &GrayImage, template: &GrayImage) -> Option<f32> {
    let (iw, ih) = image.dimensions();
    let (tw, th) = template.dimensions();
    if tw == 0 || th == 0 || tw > iw || th > ih {
        return None;
    }

    let n = (tw * th) as f64;
    let t_mean = template.pixels().map(|p| p[0] as f64).sum::<f64>() / n;
    let t_centered: Vec<f64> = template.pixels().map(|p| p[0] as f64 - t_mean).collect();
    let t_energy: f64 = t_centered.iter().map(|v| v * v).sum();
    if t_energy <= FLAT_VARIANCE * n {
        return Some(0.0);
    }

    let table = SumTable::new(image);
    let pixels = image.as_raw();
    let stride = iw as usize;
    let mut best = f64::NEG_INFINITY;

    for y in 0..=(ih - th) {
        for x in 0..=(iw - tw) {
            let (sum, sum_sq) = table.window(x, y, tw, th);
            let variance = sum_sq - sum * sum / n;
            let score = if variance <= FLAT_VARIANCE * n {
                0.0
            } else {
                // Template is zero-mean, so the window mean drops out
                let mut cross = 0.0;
                for ty in 0..th as usize {
                    let row = (y as usize + ty) * stride + x as usize;
                    let window_row = &pixels[row..row + tw as usize];
                    let template_row = &t_centered[ty * tw as usize..(ty + 1) * tw as usize];
                    cross += window_row
                        .iter()
                        .zip(template_row)
                        .map(|(&p, &t)| p as f64 * t)
                        .sum::<f64>();
                }
                cross / (t_energy * variance).sqrt()
            };
            if score > best {
                best = score;
            }
        }
    }

    Some(best.clamp(-1.0, 1.0) as f32)
}

/// Integral tables of pixel values and squared pixel values
struct SumTable {
    width: usize,
    sums: Vec<f64>,
    squares: Vec<f64>,
}

impl SumTable {
    fn new(image: &GrayImage) -> Self {
        let (w, h) = (image.width() as usize, image.height() as usize);
        let width = w + 1;
        let mut sums = vec![0.0; width * (h + 1)];
        let mut squares = vec![0.0; width * (h + 1)];
        for y in 0..h {
            let mut row_sum = 0.0;
            let mut row_sq = 0.0;
            for x in 0..w {
                let v = image.get_pixel(x as u32, y as u32)[0] as f64;
                row_sum += v;
                row_sq += v * v;
                let idx = (y + 1) * width + x + 1;
                sums[idx] = sums[idx - width] + row_sum;
                squares[idx] = squares[idx - width] + row_sq;
            }
        }
        Self {
            width,
            sums,
            squares,
        }
    }

    /// Sum and sum of squares over the `w` x `h` window at (x, y)
    fn window(&self, x: u32, y: u32, w: u32, h: u32) -> (f64, f64) {
        let (x0, y0) = (x as usize, y as usize);
        let (x1, y1) = (x0 + w as usize, y0 + h as usize);
        let at = |table: &[f64], xx: usize, yy: usize| table[yy * self.width + xx];
        let rect = |table: &[f64]| {
            at(table, x1, y1) - at(table, x0, y1) - at(table, x1, y0) + at(table, x0, y0)
        };
        (rect(&self.sums), rect(&self.squares))
    }
}

/// Scale factor that brings the longest side of a `width` x `height` image
/// down to `MATCH_WORKING_SIZE`, or 1 when it already fits
fn working_scale(width: u32, height: u32) -> f64 {
    let longest = width.max(height);
    if longest <= MATCH_WORKING_SIZE {
        1.0
    } else {
        MATCH_WORKING_SIZE as f64 / longest as f64
    }
}

fn rescale(img: &GrayImage, scale: f64) -> GrayImage {
    if scale >= 1.0 {
        return img.clone();
    }
    let w = ((img.width() as f64 * scale).round() as u32).max(1);
    let h = ((img.height() as f64 * scale).round() as u32).max(1);
    image::imageops::resize(img, w, h, FilterType::Triangle)
}

/// Template-matching classifier over a shared gallery
#[derive(Debug, Clone)]
pub struct TemplateMatcher {
    gallery: Arc<TemplateGallery>,
}

impl TemplateMatcher {
    pub fn new(gallery: Arc<TemplateGallery>) -> Self {
        Self { gallery }
    }
}

impl Classify for TemplateMatcher {
    fn classify(&self, image: &DynamicImage) -> Result<DenominationEstimate> {
        let gray = preprocessing::to_grayscale(image)?;
        let scale = working_scale(gray.width(), gray.height());
        let query = rescale(&gray, scale);

        let mut best: Option<(Denomination, f32)> = None;
        for template in self.gallery.templates() {
            let reference = rescale(&template.image, scale);
            let Some(score) = best_correlation(&query, &reference) else {
                log::warn!(
                    "Image {}x{} is smaller than the {} template {}x{}",
                    query.width(),
                    query.height(),
                    template.denomination,
                    reference.width(),
                    reference.height()
                );
                continue;
            };

            log::debug!("Template {}: score = {:.3}", template.denomination, score);

            let current = best.map(|(_, s)| s).unwrap_or(0.0);
            if score > current {
                best = Some((template.denomination, score));
            }
        }

        Ok(match best {
            Some((denomination, score)) => DenominationEstimate::known(denomination, score),
            None => DenominationEstimate::unrecognized(),
        })
    }

    fn name(&self) -> &str {
        "template matching"
    }
}
