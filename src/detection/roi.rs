use image::{DynamicImage, GrayImage, Luma};
use imageproc::contours::{find_contours, BorderType, Contour};

use crate::models::{BoundingBox, Region};

/// Pixels brighter than this are treated as paper background
pub const BACKGROUND_CUTOFF: u8 = 220;

/// Inverted binary threshold: 255 where the pixel is at or below `cutoff`, 0 elsewhere
pub fn foreground_mask(gray: &GrayImage, cutoff: u8) -> GrayImage {
    let mut mask = GrayImage::new(gray.width(), gray.height());
    for (x, y, pixel) in gray.enumerate_pixels() {
        if pixel[0] <= cutoff {
            mask.put_pixel(x, y, Luma([255]));
        }
    }
    mask
}

/// Outermost contours of the foreground mask, in discovery order
pub fn find_regions(mask: &GrayImage) -> Vec<Region> {
    find_contours::<u32>(mask)
        .into_iter()
        .filter(|c| c.border_type == BorderType::Outer && c.parent.is_none())
        .filter_map(|c| region_from_contour(&c))
        .collect()
}

fn region_from_contour(contour: &Contour<u32>) -> Option<Region> {
    let first = contour.points.first()?;
    let mut region = Region {
        min_x: first.x,
        min_y: first.y,
        max_x: first.x,
        max_y: first.y,
        area: polygon_area(contour),
    };
    for p in &contour.points {
        region.min_x = region.min_x.min(p.x);
        region.min_y = region.min_y.min(p.y);
        region.max_x = region.max_x.max(p.x);
        region.max_y = region.max_y.max(p.y);
    }
    Some(region)
}

/// Shoelace area of the closed polygon through the contour points
fn polygon_area(contour: &Contour<u32>) -> f64 {
    let points = &contour.points;
    if points.len() < 3 {
        return 0.0;
    }
    let twice_area: f64 = points
        .iter()
        .zip(points.iter().cycle().skip(1))
        .map(|(a, b)| a.x as f64 * b.y as f64 - b.x as f64 * a.y as f64)
        .sum();
    twice_area.abs() / 2.0
}

/// The region with the largest enclosed area; the first one wins on ties
pub fn largest_region(regions: &[Region]) -> Option<&Region> {
    regions.iter().fold(None, |best: Option<&Region>, r| match best {
        Some(b) if b.area >= r.area => Some(b),
        _ => Some(r),
    })
}

/// Bounding box of the most likely watermark region, or None when the image
/// has no foreground below the background cutoff
pub fn locate_roi(img: &DynamicImage) -> Option<BoundingBox> {
    if img.width() == 0 || img.height() == 0 {
        return None;
    }
    let gray = img.to_luma8();
    let mask = foreground_mask(&gray, BACKGROUND_CUTOFF);
    let regions = find_regions(&mask);
    let roi = largest_region(&regions).map(Region::bounding_box);

    log::debug!(
        "ROI search: {} outer regions, selected {:?}",
        regions.len(),
        roi
    );
    roi
}
