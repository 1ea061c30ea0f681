//! Grayscale operations behind the candidate detector and the OCR crop.
//!
//! Edge and threshold primitives come from `imageproc`; the tiled CLAHE
//! lookup is local. Everything is deterministic for identical input.

use image::{GrayImage, Luma};
use imageproc::{contrast::otsu_level, edges::canny, map::map_colors};

/// Contrast-limited adaptive histogram equalisation over a `grid` x `grid`
/// tiling, with bilinear interpolation between neighbouring tile mappings.
pub fn clahe(src: &GrayImage, clip_limit: f32, grid: u32) -> GrayImage {
    let (width, height) = src.dimensions();
    if width == 0 || height == 0 {
        return src.clone();
    }

    let tile_w = width.div_ceil(grid.clamp(1, width));
    let tile_h = height.div_ceil(grid.clamp(1, height));
    let tiles_x = width.div_ceil(tile_w);
    let tiles_y = height.div_ceil(tile_h);

    let mut luts = Vec::with_capacity((tiles_x * tiles_y) as usize);
    for ty in 0..tiles_y {
        for tx in 0..tiles_x {
            let x0 = tx * tile_w;
            let y0 = ty * tile_h;
            let x1 = (x0 + tile_w).min(width);
            let y1 = (y0 + tile_h).min(height);

            let mut hist = [0u32; 256];
            for y in y0..y1 {
                for x in x0..x1 {
                    hist[src.get_pixel(x, y)[0] as usize] += 1;
                }
            }
            luts.push(tile_lut(&mut hist, (x1 - x0) * (y1 - y0), clip_limit));
        }
    }

    let lut_at = |tx: u32, ty: u32| &luts[(ty * tiles_x + tx) as usize];
    let neighbours = |pos: u32, tile: u32, tiles: u32| -> (u32, u32, f32) {
        let centre = (pos as f32 + 0.5) / tile as f32 - 0.5;
        let lower = (centre.floor().max(0.0) as u32).min(tiles - 1);
        let upper = (lower + 1).min(tiles - 1);
        let weight = (centre - lower as f32).clamp(0.0, 1.0);
        (lower, upper, weight)
    };

    let mut out = GrayImage::new(width, height);
    for y in 0..height {
        let (ty0, ty1, wy) = neighbours(y, tile_h, tiles_y);
        for x in 0..width {
            let (tx0, tx1, wx) = neighbours(x, tile_w, tiles_x);
            let v = src.get_pixel(x, y)[0] as usize;

            let top = lut_at(tx0, ty0)[v] as f32 * (1.0 - wx) + lut_at(tx1, ty0)[v] as f32 * wx;
            let bottom = lut_at(tx0, ty1)[v] as f32 * (1.0 - wx) + lut_at(tx1, ty1)[v] as f32 * wx;
            let value = top * (1.0 - wy) + bottom * wy;
            out.put_pixel(x, y, Luma([value.round().clamp(0.0, 255.0) as u8]));
        }
    }
    out
}

fn tile_lut(hist: &mut [u32; 256], pixels: u32, clip_limit: f32) -> [u8; 256] {
    let limit = ((clip_limit * pixels as f32 / 256.0).ceil() as u32).max(1);

    let mut excess = 0u32;
    for bin in hist.iter_mut() {
        if *bin > limit {
            excess += *bin - limit;
            *bin = limit;
        }
    }

    let bonus = excess / 256;
    let mut remainder = excess % 256;
    for bin in hist.iter_mut() {
        *bin += bonus;
        if remainder > 0 {
            *bin += 1;
            remainder -= 1;
        }
    }

    let mut lut = [0u8; 256];
    let mut cdf = 0u32;
    for (value, bin) in hist.iter().enumerate() {
        cdf += bin;
        lut[value] = (cdf as f32 * 255.0 / pixels as f32).round().min(255.0) as u8;
    }
    lut
}

/// Canny edges for every `(low, high)` pair, OR-combined into one map
/// (255 on an edge, 0 elsewhere).
pub fn multi_canny(src: &GrayImage, thresholds: &[(f32, f32)]) -> GrayImage {
    let mut combined = GrayImage::new(src.width(), src.height());
    for &(low, high) in thresholds {
        let edges = canny(src, low, high);
        for (dst, edge) in combined.pixels_mut().zip(edges.pixels()) {
            dst[0] = dst[0].max(edge[0]);
        }
    }
    combined
}

/// Otsu-thresholded copy: bright pixels become 255, the rest 0.
pub fn binarize(src: &GrayImage) -> GrayImage {
    let level = otsu_level(src);
    map_colors(src, |p: Luma<u8>| Luma([if p[0] > level { 255 } else { 0 }]))
}
