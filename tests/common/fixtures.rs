use std::path::Path;

use banknote_inspect::Denomination;
use image::{DynamicImage, GrayImage, Luma, Rgb, RgbImage};
use tempfile::TempDir;

/// A 160x100 "note": bright paper with a textured print area at (40, 25)
/// measuring 80x50. `seed` varies the texture.
pub fn make_note(seed: u32) -> DynamicImage {
    let img = RgbImage::from_fn(160, 100, |x, y| {
        if (40..120).contains(&x) && (25..75).contains(&y) {
            let v = ((x * (3 + seed) + y * (7 + 2 * seed) + (x * y) % (11 + seed)) % 180) as u8;
            Rgb([v, v.saturating_add(20), v / 2])
        } else {
            Rgb([245, 245, 240])
        }
    });
    DynamicImage::ImageRgb8(img)
}

/// 128x64 stripes; horizontal stripes have vertical gradients and vice versa
pub fn make_stripes(horizontal: bool, phase: u32) -> DynamicImage {
    DynamicImage::ImageLuma8(GrayImage::from_fn(128, 64, |x, y| {
        let t = if horizontal { y } else { x } + phase;
        Luma([if (t / 4) % 2 == 0 { 40 } else { 210 }])
    }))
}

/// Writes one PNG template per denomination into a fresh directory
pub fn create_template_dir() -> TempDir {
    let dir = TempDir::new().expect("Failed to create temp directory");
    for (i, denomination) in Denomination::ALL.iter().enumerate() {
        save_png(&make_note(i as u32 + 1), &dir.path().join(format!("{}.png", denomination.label())));
    }
    dir
}

pub fn save_png(image: &DynamicImage, path: &Path) {
    image
        .save_with_format(path, image::ImageFormat::Png)
        .expect("Failed to save test image");
}
