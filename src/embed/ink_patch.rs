use image::RgbImage;

use crate::core::error::Result;
use crate::embed::{MultiVectorEmbedder, PatchMatrix};
use crate::prepare::luminance;

/// Tile side in pixels at the source resolution.
const TILE_PX: u32 = 64;

/// Downsampled grid per tile; `GRID * GRID` is the per-patch dimension.
const GRID: u32 = 8;

/// Deterministic multi-vector embedder: one vector per `64 × 64` px tile.
///
/// Each tile is block-averaged down to an 8×8 intensity grid and mean-centered,
/// so a patch vector describes the *shape* of the ink inside its tile rather
/// than overall brightness. Blank tiles center to the zero vector and drop out
/// of MaxSim scoring entirely, which is exactly the behavior late interaction
/// wants: empty paper should not vote.
///
/// The patch count P varies with page size — a letter page at 150 DPI yields
/// roughly 20×26 tiles.
pub struct InkPatchEmbedder;

impl InkPatchEmbedder {
    pub fn new() -> Self {
        Self
    }
}

impl Default for InkPatchEmbedder {
    fn default() -> Self {
        Self::new()
    }
}

impl MultiVectorEmbedder for InkPatchEmbedder {
    fn dim(&self) -> usize {
        (GRID * GRID) as usize
    }

    fn id(&self) -> &str {
        "ink-patch-v1"
    }

    fn embed_one(&self, img: &RgbImage) -> Result<PatchMatrix> {
        let gray = luminance(img);
        let (w, h) = gray.dimensions();
        if w == 0 || h == 0 {
            return Ok(PatchMatrix::new(0, self.dim(), Vec::new()));
        }

        let tiles_x = w.div_ceil(TILE_PX);
        let tiles_y = h.div_ceil(TILE_PX);
        let rows = (tiles_x * tiles_y) as usize;
        let dim = self.dim();
        let mut data = Vec::with_capacity(rows * dim);

        for ty in 0..tiles_y {
            for tx in 0..tiles_x {
                let x0 = tx * TILE_PX;
                let y0 = ty * TILE_PX;
                let x1 = (x0 + TILE_PX).min(w);
                let y1 = (y0 + TILE_PX).min(h);

                let mut cell_sum = vec![0.0f32; dim];
                let mut cell_cnt = vec![0u32; dim];
                let tw = x1 - x0;
                let th = y1 - y0;
                for y in y0..y1 {
                    let gy = ((y - y0) * GRID / th).min(GRID - 1);
                    for x in x0..x1 {
                        let gx = ((x - x0) * GRID / tw).min(GRID - 1);
                        let cell = (gy * GRID + gx) as usize;
                        // Darkness in [0, 1]: ink is signal, paper is zero.
                        cell_sum[cell] += 1.0 - gray.get_pixel(x, y).0[0] as f32 / 255.0;
                        cell_cnt[cell] += 1;
                    }
                }

                let mut patch: Vec<f32> = cell_sum
                    .iter()
                    .zip(&cell_cnt)
                    .map(|(s, c)| s / (*c).max(1) as f32)
                    .collect();

                // Mean-center so uniform tiles vanish.
                let mean: f32 = patch.iter().sum::<f32>() / dim as f32;
                for v in patch.iter_mut() {
                    *v -= mean;
                }

                data.extend_from_slice(&patch);
            }
        }

        Ok(PatchMatrix::new(rows, dim, data))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::Rgb;

    #[test]
    fn patch_count_follows_tiling() {
        let e = InkPatchEmbedder::new();
        let img = RgbImage::from_pixel(130, 70, Rgb([255, 255, 255]));
        // ceil(130/64) * ceil(70/64) = 3 * 2
        let m = e.embed_one(&img).unwrap();
        assert_eq!(m.rows, 6);
        assert_eq!(m.dim, 64);
    }

    #[test]
    fn blank_tiles_center_to_zero() {
        let e = InkPatchEmbedder::new();
        let img = RgbImage::from_pixel(64, 64, Rgb([255, 255, 255]));
        let m = e.embed_one(&img).unwrap();
        assert!(m.row(0).iter().all(|v| v.abs() < 1e-6));
    }

    #[test]
    fn inked_tiles_carry_signal() {
        let e = InkPatchEmbedder::new();
        let mut img = RgbImage::from_pixel(64, 64, Rgb([255, 255, 255]));
        for x in 0..64 {
            img.put_pixel(x, 32, Rgb([0, 0, 0]));
        }
        let m = e.embed_one(&img).unwrap();
        let norm: f32 = m.row(0).iter().map(|v| v * v).sum::<f32>().sqrt();
        assert!(norm > 1e-3);
    }
}
