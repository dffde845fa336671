use image::RgbImage;

use crate::core::error::Result;
use crate::embed::{l2_normalize, SingleVectorEmbedder};
use crate::prepare::luminance;

/// Deterministic single-vector embedder over ink statistics.
///
/// The image is divided into a `g × g` cell grid (g chosen from the requested
/// dimension); each cell contributes a mean-intensity feature and an
/// edge-energy feature. The layout is all densities first, then all edge
/// energies, zero-padded up to the requested dimension, L2-normalized.
///
/// Cosine similarity between two such vectors is high when ink mass and
/// stroke activity land in the same cells — crude next to a neural encoder,
/// but stable, fast, and fully reproducible, which is what the index and eval
/// plumbing need to be exercised end to end.
pub struct InkGridEmbedder {
    dim: usize,
    grid: u32,
}

impl InkGridEmbedder {
    pub fn new(dim: usize) -> Self {
        // Two features per cell; the largest square grid that fits.
        let grid = ((dim as f64 / 2.0).sqrt().floor() as u32).max(1);
        Self { dim, grid }
    }
}

impl SingleVectorEmbedder for InkGridEmbedder {
    fn dim(&self) -> usize {
        self.dim
    }

    fn id(&self) -> &str {
        "ink-grid-v1"
    }

    fn embed_one(&self, img: &RgbImage) -> Result<Vec<f32>> {
        let gray = luminance(img);
        let (w, h) = gray.dimensions();
        let g = self.grid;
        let cells = (g * g) as usize;

        let mut density = vec![0.0f32; cells];
        let mut edges = vec![0.0f32; cells];
        let mut counts = vec![0u32; cells];

        if w > 0 && h > 0 {
            for y in 0..h {
                let cy = (y * g / h).min(g - 1);
                for x in 0..w {
                    let cx = (x * g / w).min(g - 1);
                    let cell = (cy * g + cx) as usize;
                    let v = gray.get_pixel(x, y).0[0] as f32;

                    // Darkness as ink density: white contributes 0, ink 1.
                    density[cell] += 1.0 - v / 255.0;

                    // Forward differences as a cheap stroke-activity measure.
                    let dx = if x + 1 < w {
                        (gray.get_pixel(x + 1, y).0[0] as f32 - v).abs()
                    } else {
                        0.0
                    };
                    let dy = if y + 1 < h {
                        (gray.get_pixel(x, y + 1).0[0] as f32 - v).abs()
                    } else {
                        0.0
                    };
                    edges[cell] += (dx + dy) / 510.0;

                    counts[cell] += 1;
                }
            }
        }

        let mut out = Vec::with_capacity(self.dim);
        for i in 0..cells {
            let n = counts[i].max(1) as f32;
            out.push(density[i] / n);
        }
        for i in 0..cells {
            let n = counts[i].max(1) as f32;
            out.push(edges[i] / n);
        }
        out.resize(self.dim, 0.0);

        l2_normalize(&mut out);
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::Rgb;

    fn stroke_page(w: u32, h: u32, row: u32) -> RgbImage {
        let mut img = RgbImage::from_pixel(w, h, Rgb([255, 255, 255]));
        for x in 0..w {
            img.put_pixel(x, row, Rgb([0, 0, 0]));
        }
        img
    }

    #[test]
    fn output_has_requested_dim_and_unit_norm() {
        let e = InkGridEmbedder::new(1152);
        let v = e.embed_one(&stroke_page(384, 384, 100)).unwrap();
        assert_eq!(v.len(), 1152);
        let norm: f32 = v.iter().map(|x| x * x).sum::<f32>().sqrt();
        assert!((norm - 1.0).abs() < 1e-4);
    }

    #[test]
    fn identical_images_embed_identically() {
        let e = InkGridEmbedder::new(256);
        let img = stroke_page(200, 200, 50);
        assert_eq!(e.embed_one(&img).unwrap(), e.embed_one(&img).unwrap());
    }

    #[test]
    fn different_ink_layouts_are_distinguishable() {
        let e = InkGridEmbedder::new(1152);
        let a = e.embed_one(&stroke_page(384, 384, 20)).unwrap();
        let b = e.embed_one(&stroke_page(384, 384, 350)).unwrap();
        let cos: f32 = a.iter().zip(&b).map(|(x, y)| x * y).sum();
        assert!(cos < 0.99, "top stroke and bottom stroke embed too alike");
    }

    #[test]
    fn blank_page_still_yields_unit_vector() {
        let e = InkGridEmbedder::new(64);
        let blank = RgbImage::from_pixel(100, 100, Rgb([255, 255, 255]));
        let v = e.embed_one(&blank).unwrap();
        let norm: f32 = v.iter().map(|x| x * x).sum::<f32>().sqrt();
        assert!((norm - 1.0).abs() < 1e-4);
    }
}
