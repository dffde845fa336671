//! Page preparation: ink normalization and region decomposition.
//!
//! Everything in this module is a pure function over pixel buffers. The same
//! normalization runs on indexed pages and on user sketches so the two live in
//! the same embedding space; determinism here is what makes search results
//! reproducible for fixed sketch bytes.

use image::imageops::FilterType;
use image::{DynamicImage, GrayImage, Luma, RgbImage};

use crate::core::types::Region;

/// Canvas edge for the single-vector embedding input.
pub const NORMALIZED_SIZE: u32 = 384;

/// Padding value for the short side of the canvas (white).
const PAD_VALUE: u8 = 255;

// ---------------------------------------------------------------------------
// Ink normalization
// ---------------------------------------------------------------------------

/// Normalize a rendered page for embedding.
///
/// Luminance → CLAHE → polarity fix (light-on-dark scans are inverted) →
/// aspect-preserving resize into a white-padded 384×384 canvas → replicated to
/// 3 channels.
pub fn normalize_ink(img: &RgbImage, clip_limit: f32, grid_size: u32) -> RgbImage {
    let gray = luminance(img);
    let mut enhanced = clahe(&gray, clip_limit, grid_size);

    // Dark-on-light check: handwriting is expected dark on a light page. A
    // mean below the midpoint means the scan is inverted.
    if mean_intensity(&enhanced) < 127.0 {
        for p in enhanced.pixels_mut() {
            p.0[0] = 255 - p.0[0];
        }
    }

    let padded = resize_with_padding(&enhanced, NORMALIZED_SIZE, NORMALIZED_SIZE);
    replicate_channels(&padded)
}

/// Normalize a user sketch for querying. Any alpha channel is composited onto
/// white first, then the page normalization applies unchanged.
pub fn normalize_sketch(img: &DynamicImage, clip_limit: f32, grid_size: u32) -> RgbImage {
    let rgb = flatten_onto_white(img);
    normalize_ink(&rgb, clip_limit, grid_size)
}

/// Composite transparency onto a white background.
pub fn flatten_onto_white(img: &DynamicImage) -> RgbImage {
    match img {
        DynamicImage::ImageRgb8(rgb) => rgb.clone(),
        other => {
            let rgba = other.to_rgba8();
            let mut out = RgbImage::new(rgba.width(), rgba.height());
            for (src, dst) in rgba.pixels().zip(out.pixels_mut()) {
                let [r, g, b, a] = src.0;
                let alpha = a as u16;
                let blend = |c: u8| -> u8 { ((c as u16 * alpha + 255 * (255 - alpha)) / 255) as u8 };
                dst.0 = [blend(r), blend(g), blend(b)];
            }
            out
        }
    }
}

/// ITU-R 601 luminance, matching the classic RGB→gray conversion.
pub fn luminance(img: &RgbImage) -> GrayImage {
    let mut out = GrayImage::new(img.width(), img.height());
    for (src, dst) in img.pixels().zip(out.pixels_mut()) {
        let [r, g, b] = src.0;
        let y = 0.299 * r as f32 + 0.587 * g as f32 + 0.114 * b as f32;
        dst.0 = [y.round().min(255.0) as u8];
    }
    out
}

pub fn mean_intensity(img: &GrayImage) -> f64 {
    let n = (img.width() as u64 * img.height() as u64).max(1);
    let sum: u64 = img.pixels().map(|p| p.0[0] as u64).sum();
    sum as f64 / n as f64
}

/// Contrast-limited adaptive histogram equalization over a `grid × grid` tile
/// layout with bilinear interpolation between tile lookup tables.
pub fn clahe(img: &GrayImage, clip_limit: f32, grid_size: u32) -> GrayImage {
    let (w, h) = img.dimensions();
    if w == 0 || h == 0 {
        return img.clone();
    }
    let grid = grid_size.max(1);
    let tile_w = w.div_ceil(grid).max(1);
    let tile_h = h.div_ceil(grid).max(1);
    let tiles_x = w.div_ceil(tile_w);
    let tiles_y = h.div_ceil(tile_h);

    // One clipped-histogram LUT per tile.
    let mut luts: Vec<[u8; 256]> = Vec::with_capacity((tiles_x * tiles_y) as usize);
    for ty in 0..tiles_y {
        for tx in 0..tiles_x {
            let x0 = tx * tile_w;
            let y0 = ty * tile_h;
            let x1 = (x0 + tile_w).min(w);
            let y1 = (y0 + tile_h).min(h);
            luts.push(tile_lut(img, x0, y0, x1, y1, clip_limit));
        }
    }

    let lut_at = |tx: u32, ty: u32| -> &[u8; 256] { &luts[(ty * tiles_x + tx) as usize] };

    let mut out = GrayImage::new(w, h);
    for y in 0..h {
        // Position relative to tile centers along y.
        let fy = (y as f32 + 0.5) / tile_h as f32 - 0.5;
        let ty0 = fy.floor().max(0.0) as u32;
        let ty0 = ty0.min(tiles_y - 1);
        let ty1 = (ty0 + 1).min(tiles_y - 1);
        let wy = (fy - fy.floor()).clamp(0.0, 1.0);
        let wy = if fy < 0.0 { 0.0 } else { wy };

        for x in 0..w {
            let fx = (x as f32 + 0.5) / tile_w as f32 - 0.5;
            let tx0 = fx.floor().max(0.0) as u32;
            let tx0 = tx0.min(tiles_x - 1);
            let tx1 = (tx0 + 1).min(tiles_x - 1);
            let wx = (fx - fx.floor()).clamp(0.0, 1.0);
            let wx = if fx < 0.0 { 0.0 } else { wx };

            let v = img.get_pixel(x, y).0[0] as usize;
            let tl = lut_at(tx0, ty0)[v] as f32;
            let tr = lut_at(tx1, ty0)[v] as f32;
            let bl = lut_at(tx0, ty1)[v] as f32;
            let br = lut_at(tx1, ty1)[v] as f32;

            let top = tl + (tr - tl) * wx;
            let bottom = bl + (br - bl) * wx;
            let value = top + (bottom - top) * wy;
            out.put_pixel(x, y, Luma([value.round().clamp(0.0, 255.0) as u8]));
        }
    }
    out
}

fn tile_lut(img: &GrayImage, x0: u32, y0: u32, x1: u32, y1: u32, clip_limit: f32) -> [u8; 256] {
    let mut hist = [0u32; 256];
    for y in y0..y1 {
        for x in x0..x1 {
            hist[img.get_pixel(x, y).0[0] as usize] += 1;
        }
    }
    let area = ((x1 - x0) * (y1 - y0)).max(1);

    // Clip the histogram and redistribute the excess uniformly.
    let clip = ((clip_limit * area as f32 / 256.0).max(1.0)) as u32;
    let mut excess = 0u32;
    for bin in hist.iter_mut() {
        if *bin > clip {
            excess += *bin - clip;
            *bin = clip;
        }
    }
    let bump = excess / 256;
    let mut residual = (excess % 256) as usize;
    for bin in hist.iter_mut() {
        *bin += bump;
    }
    // Spread the remainder over the lowest bins so the total is preserved.
    let mut i = 0;
    while residual > 0 {
        hist[i] += 1;
        residual -= 1;
        i = (i + 1) % 256;
    }

    let mut lut = [0u8; 256];
    let mut cdf = 0u64;
    for (v, bin) in hist.iter().enumerate() {
        cdf += *bin as u64;
        lut[v] = ((cdf * 255) / area as u64).min(255) as u8;
    }
    lut
}

/// Resize preserving aspect ratio into a `target_w × target_h` canvas, padding
/// the short side with white, centered.
pub fn resize_with_padding(img: &GrayImage, target_w: u32, target_h: u32) -> GrayImage {
    let (w, h) = img.dimensions();
    if w == 0 || h == 0 {
        return GrayImage::from_pixel(target_w, target_h, Luma([PAD_VALUE]));
    }

    let scale = (target_w as f32 / w as f32).min(target_h as f32 / h as f32);
    let new_w = ((w as f32 * scale) as u32).max(1);
    let new_h = ((h as f32 * scale) as u32).max(1);
    let resized = image::imageops::resize(img, new_w, new_h, FilterType::Triangle);

    let mut canvas = GrayImage::from_pixel(target_w, target_h, Luma([PAD_VALUE]));
    let x_off = (target_w - new_w) / 2;
    let y_off = (target_h - new_h) / 2;
    image::imageops::replace(&mut canvas, &resized, x_off as i64, y_off as i64);
    canvas
}

fn replicate_channels(gray: &GrayImage) -> RgbImage {
    let mut out = RgbImage::new(gray.width(), gray.height());
    for (src, dst) in gray.pixels().zip(out.pixels_mut()) {
        let v = src.0[0];
        dst.0 = [v, v, v];
    }
    out
}

// ---------------------------------------------------------------------------
// Region decomposition
// ---------------------------------------------------------------------------

/// Extract the full page plus four overlapping quadrants, in indexing order.
///
/// Quadrant layout:
/// ```text
/// +-----+-----+
/// | q1  | q2  |
/// +-----+-----+
/// | q3  | q4  |
/// +-----+-----+
/// ```
///
/// With overlap `o`, each quadrant extends `o·H` rows / `o·W` cols past the
/// midline so strokes on the boundary land in two regions.
pub fn extract_regions(img: &RgbImage, overlap_pct: f32) -> Vec<(Region, RgbImage)> {
    let (w, h) = img.dimensions();
    let ox = (w as f32 * overlap_pct) as u32;
    let oy = (h as f32 * overlap_pct) as u32;
    let mid_x = w / 2;
    let mid_y = h / 2;

    let top = (mid_y + oy).min(h);
    let left = (mid_x + ox).min(w);
    let bottom_start = mid_y.saturating_sub(oy);
    let right_start = mid_x.saturating_sub(ox);

    let crop = |x0: u32, y0: u32, x1: u32, y1: u32| -> RgbImage {
        image::imageops::crop_imm(img, x0, y0, x1 - x0, y1 - y0).to_image()
    };

    vec![
        (Region::Full, img.clone()),
        (Region::Q1, crop(0, 0, left, top)),
        (Region::Q2, crop(right_start, 0, w, top)),
        (Region::Q3, crop(0, bottom_start, left, h)),
        (Region::Q4, crop(right_start, bottom_start, w, h)),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::Rgb;

    fn uniform_page(w: u32, h: u32, value: u8) -> RgbImage {
        RgbImage::from_pixel(w, h, Rgb([value, value, value]))
    }

    #[test]
    fn normalized_output_is_384_rgb() {
        let page = uniform_page(640, 480, 250);
        let out = normalize_ink(&page, 2.0, 8);
        assert_eq!(out.dimensions(), (NORMALIZED_SIZE, NORMALIZED_SIZE));
    }

    #[test]
    fn white_input_keeps_bright_corners() {
        let page = uniform_page(300, 500, 255);
        let out = normalize_ink(&page, 2.0, 8);
        for (x, y) in [(0, 0), (383, 0), (0, 383), (383, 383)] {
            assert!(
                out.get_pixel(x, y).0[0] >= 200,
                "corner ({x},{y}) darker than expected"
            );
        }
    }

    #[test]
    fn light_on_dark_scans_are_inverted() {
        // Dark page, light strokes: after normalization the background must be
        // bright again.
        let mut page = uniform_page(200, 200, 20);
        for x in 50..150 {
            page.put_pixel(x, 100, Rgb([240, 240, 240]));
        }
        let out = normalize_ink(&page, 2.0, 8);
        let gray = luminance(&out);
        assert!(mean_intensity(&gray) > 127.0);
    }

    #[test]
    fn sketch_alpha_composites_to_white() {
        let mut rgba = image::RgbaImage::from_pixel(64, 64, image::Rgba([0, 0, 0, 0]));
        rgba.put_pixel(32, 32, image::Rgba([0, 0, 0, 255]));
        let out = normalize_sketch(&DynamicImage::ImageRgba8(rgba), 2.0, 8);
        // Transparent background became white, so corners stay bright.
        assert!(out.get_pixel(0, 0).0[0] >= 200);
    }

    #[test]
    fn quadrants_exceed_half_dimensions_with_overlap() {
        let page = uniform_page(400, 300, 255);
        let regions = extract_regions(&page, 0.1);
        assert_eq!(regions.len(), 5);
        assert_eq!(regions[0].0, Region::Full);
        for (region, img) in &regions[1..] {
            assert!(
                img.width() > 200 && img.height() > 150,
                "{region} is {}x{}, not strictly larger than half",
                img.width(),
                img.height()
            );
        }
    }

    #[test]
    fn zero_overlap_splits_at_midline() {
        let page = uniform_page(100, 100, 255);
        let regions = extract_regions(&page, 0.0);
        let (_, q1) = &regions[1];
        assert_eq!(q1.dimensions(), (50, 50));
    }

    #[test]
    fn normalization_is_deterministic() {
        let mut page = uniform_page(320, 240, 255);
        for x in 10..300 {
            page.put_pixel(x, 120, Rgb([30, 30, 30]));
        }
        let a = normalize_ink(&page, 2.0, 8);
        let b = normalize_ink(&page, 2.0, 8);
        assert_eq!(a.as_raw(), b.as_raw());
    }
}
