//! Contrast-limited adaptive histogram equalization.
//!
//! The image is split into a `grid x grid` array of tiles. Each tile gets its
//! own equalization lookup table built from a clipped histogram, and every
//! output pixel is a bilinear blend of the tables of the four tiles whose
//! centers surround it, so tile borders do not show.

use image::{GrayImage, Luma};

const BINS: usize = 256;

/// Equalize `img` with tiles of a `grid x grid` layout.
///
/// `clip_limit` is relative to a flat histogram: a bin may hold at most
/// `clip_limit * tile_area / 256` samples before the excess is spread over
/// all bins. A limit of 0 disables clipping (plain per-tile equalization).
pub fn equalize(img: &GrayImage, clip_limit: f32, grid: u32) -> GrayImage {
    let (width, height) = img.dimensions();
    if width == 0 || height == 0 {
        return img.clone();
    }

    // Never more tiles than pixels along an axis
    let tiles_x = grid.clamp(1, width);
    let tiles_y = grid.clamp(1, height);

    let mut luts = Vec::with_capacity((tiles_x * tiles_y) as usize);
    for ty in 0..tiles_y {
        let (y0, y1) = tile_span(ty, tiles_y, height);
        for tx in 0..tiles_x {
            let (x0, x1) = tile_span(tx, tiles_x, width);
            luts.push(tile_lut(img, x0, x1, y0, y1, clip_limit));
        }
    }

    let tile_w = width as f32 / tiles_x as f32;
    let tile_h = height as f32 / tiles_y as f32;

    GrayImage::from_fn(width, height, |x, y| {
        let (tx0, tx1, ax) = neighbours(x, tile_w, tiles_x);
        let (ty0, ty1, ay) = neighbours(y, tile_h, tiles_y);
        let v = img.get_pixel(x, y)[0] as usize;

        let lut = |tx: usize, ty: usize| luts[ty * tiles_x as usize + tx][v] as f32;
        let top = lut(tx0, ty0) * (1.0 - ax) + lut(tx1, ty0) * ax;
        let bottom = lut(tx0, ty1) * (1.0 - ax) + lut(tx1, ty1) * ax;
        let value = top * (1.0 - ay) + bottom * ay;

        Luma([value.round().clamp(0.0, 255.0) as u8])
    })
}

/// Half-open pixel range covered by tile `index` of `count` along an axis of `len` pixels
fn tile_span(index: u32, count: u32, len: u32) -> (u32, u32) {
    let start = (index as u64 * len as u64 / count as u64) as u32;
    let end = ((index as u64 + 1) * len as u64 / count as u64) as u32;
    (start, end)
}

/// The two tiles whose centers bracket `pos`, and the weight of the second one
fn neighbours(pos: u32, tile_len: f32, count: u32) -> (usize, usize, f32) {
    let f = (pos as f32 + 0.5) / tile_len - 0.5;
    let lower = f.floor();
    let weight = f - lower;
    let last = count as i64 - 1;
    let t0 = (lower as i64).clamp(0, last) as usize;
    let t1 = (lower as i64 + 1).clamp(0, last) as usize;
    (t0, t1, weight)
}

fn tile_lut(img: &GrayImage, x0: u32, x1: u32, y0: u32, y1: u32, clip_limit: f32) -> [u8; BINS] {
    let mut hist = [0u32; BINS];
    for y in y0..y1 {
        for x in x0..x1 {
            hist[img.get_pixel(x, y)[0] as usize] += 1;
        }
    }

    let area = (x1 - x0) * (y1 - y0);
    if clip_limit > 0.0 {
        let limit = ((clip_limit * area as f32 / BINS as f32) as u32).max(1);
        clip_histogram(&mut hist, limit);
    }

    let mut lut = [0u8; BINS];
    let scale = 255.0 / area.max(1) as f32;
    let mut cumulative = 0u32;
    for (bin, out) in hist.iter().zip(lut.iter_mut()) {
        cumulative += bin;
        *out = (cumulative as f32 * scale).round().min(255.0) as u8;
    }
    lut
}

/// Cap every bin at `limit` and spread the excess evenly over all bins
fn clip_histogram(hist: &mut [u32; BINS], limit: u32) {
    let mut excess = 0u32;
    for bin in hist.iter_mut() {
        if *bin > limit {
            excess += *bin - limit;
            *bin = limit;
        }
    }

    let batch = excess / BINS as u32;
    let mut residual = excess % BINS as u32;
    for bin in hist.iter_mut() {
        *bin += batch;
    }

    if residual > 0 {
        let step = (BINS as u32 / residual).max(1) as usize;
        for bin in hist.iter_mut().step_by(step) {
            if residual == 0 {
                break;
            }
            *bin += 1;
            residual -= 1;
        }
    }
}
