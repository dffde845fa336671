//! Embedder capability contracts and the built-in implementations.
//!
//! The pipeline depends on two capabilities, not on any concrete model: a
//! single-vector embedder (one L2-normalized vector per image, dimension D1)
//! feeding the dense region index, and a multi-vector embedder (one vector
//! per patch, dimension D2) feeding the late-interaction store. Neural
//! embedders plug in behind the same traits; the built-in ink-statistics
//! embedders keep the engine fully self-contained and deterministic.

use image::RgbImage;

use crate::core::error::Result;

mod ink_grid;
mod ink_patch;

pub use ink_grid::InkGridEmbedder;
pub use ink_patch::InkPatchEmbedder;

/// Produces one L2-normalized vector per image.
pub trait SingleVectorEmbedder: Send + Sync {
    /// Output dimensionality (D1).
    fn dim(&self) -> usize;

    /// Stable identifier recorded in manifests and health reports.
    fn id(&self) -> &str;

    fn embed_one(&self, img: &RgbImage) -> Result<Vec<f32>>;

    /// Batch embedding. The default loops; model-backed implementations
    /// override this with real batched inference.
    fn embed_batch(&self, imgs: &[RgbImage]) -> Result<Vec<Vec<f32>>> {
        imgs.iter().map(|img| self.embed_one(img)).collect()
    }
}

/// Produces one vector per image patch, for MaxSim late-interaction scoring.
pub trait MultiVectorEmbedder: Send + Sync {
    /// Per-patch dimensionality (D2).
    fn dim(&self) -> usize;

    fn id(&self) -> &str;

    fn embed_one(&self, img: &RgbImage) -> Result<PatchMatrix>;
}

/// A (P, D2) row-major matrix of patch embeddings. P depends on image tiling
/// and is not fixed across pages.
#[derive(Debug, Clone, PartialEq)]
pub struct PatchMatrix {
    pub rows: usize,
    pub dim: usize,
    pub data: Vec<f32>,
}

impl PatchMatrix {
    pub fn new(rows: usize, dim: usize, data: Vec<f32>) -> Self {
        debug_assert_eq!(rows * dim, data.len());
        Self { rows, dim, data }
    }

    pub fn row(&self, i: usize) -> &[f32] {
        &self.data[i * self.dim..(i + 1) * self.dim]
    }

    pub fn iter_rows(&self) -> impl Iterator<Item = &[f32]> {
        self.data.chunks_exact(self.dim)
    }

    pub fn is_empty(&self) -> bool {
        self.rows == 0
    }
}

/// L2-normalize in place. All-zero vectors get a deterministic unit fallback
/// so every stored vector satisfies the unit-norm contract.
pub(crate) fn l2_normalize(v: &mut [f32]) {
    let norm: f32 = v.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm > 1e-12 {
        for x in v.iter_mut() {
            *x /= norm;
        }
    } else if let Some(first) = v.first_mut() {
        *first = 1.0;
    }
}
