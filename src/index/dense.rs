use std::path::Path;

use tracing::info;
use uuid::Uuid;

use crate::core::error::{Result, ScoutError};
use crate::core::types::VectorMeta;

const VECTORS_FILE: &str = "vectors.bin";
const METADATA_FILE: &str = "metadata.json";

/// Append-only flat inner-product index over region vectors.
///
/// Storage is a dense row-major `f32` matrix plus an index-parallel metadata
/// array. Vectors are L2-normalized by the embedder, so inner product equals
/// cosine similarity. Search is an exhaustive scan: the corpus ceiling is on
/// the order of 10⁶ region vectors, where a flat scan stays well under 100 ms
/// and sidesteps the recall cliff approximate indexes hit on highly similar
/// pages.
///
/// Removal compacts immediately — surviving rows keep their relative order
/// but not their absolute positions.
pub struct DenseIndex {
    dim: usize,
    data: Vec<f32>,
    meta: Vec<VectorMeta>,
}

impl DenseIndex {
    pub fn new(dim: usize) -> Self {
        Self {
            dim,
            data: Vec::new(),
            meta: Vec::new(),
        }
    }

    pub fn dim(&self) -> usize {
        self.dim
    }

    /// Number of vectors.
    pub fn len(&self) -> usize {
        self.meta.len()
    }

    pub fn is_empty(&self) -> bool {
        self.meta.is_empty()
    }

    /// Bytes held by the vector matrix (reported by the health endpoint).
    pub fn size_bytes(&self) -> usize {
        self.data.len() * std::mem::size_of::<f32>()
    }

    /// Insertion-ordered metadata records, index-parallel to the rows.
    pub fn records(&self) -> &[VectorMeta] {
        &self.meta
    }

    /// One stored vector by insertion index.
    pub fn vector(&self, i: usize) -> &[f32] {
        &self.data[i * self.dim..(i + 1) * self.dim]
    }

    /// Append vectors with their metadata, in order. Every vector must match
    /// the index dimension.
    pub fn add(&mut self, vectors: &[Vec<f32>], meta: Vec<VectorMeta>) -> Result<()> {
        if vectors.len() != meta.len() {
            return Err(ScoutError::Input(format!(
                "vector/metadata count mismatch: {} vs {}",
                vectors.len(),
                meta.len()
            )));
        }
        for v in vectors {
            if v.len() != self.dim {
                return Err(ScoutError::DimensionMismatch {
                    expected: self.dim,
                    got: v.len(),
                });
            }
        }
        for v in vectors {
            self.data.extend_from_slice(v);
        }
        self.meta.extend(meta);
        Ok(())
    }

    /// Exhaustive top-k inner-product search. Results are ordered by score
    /// descending, ties broken by smaller insertion index.
    pub fn search(&self, query: &[f32], k: usize) -> Result<Vec<(VectorMeta, f32)>> {
        if query.len() != self.dim {
            return Err(ScoutError::Query(format!(
                "query dimension {} does not match index dimension {}",
                query.len(),
                self.dim
            )));
        }
        if k == 0 || self.meta.is_empty() {
            return Ok(Vec::new());
        }

        let mut scored: Vec<(usize, f32)> = self
            .data
            .chunks_exact(self.dim)
            .enumerate()
            .map(|(i, row)| {
                let dot: f32 = row.iter().zip(query).map(|(a, b)| a * b).sum();
                (i, dot)
            })
            .collect();

        scored.sort_by(|a, b| {
            b.1.partial_cmp(&a.1)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then(a.0.cmp(&b.0))
        });
        scored.truncate(k);

        Ok(scored
            .into_iter()
            .map(|(i, score)| (self.meta[i].clone(), score))
            .collect())
    }

    /// Drop every row belonging to a document and compact in place. Returns
    /// the number of removed rows.
    pub fn remove_by_doc_id(&mut self, doc_id: Uuid) -> usize {
        let dim = self.dim;
        let before = self.meta.len();

        let mut new_data = Vec::with_capacity(self.data.len());
        let mut new_meta = Vec::with_capacity(before);
        for (i, m) in self.meta.iter().enumerate() {
            if m.doc_id != doc_id {
                new_data.extend_from_slice(&self.data[i * dim..(i + 1) * dim]);
                new_meta.push(m.clone());
            }
        }
        self.data = new_data;
        let removed = before - new_meta.len();
        self.meta = new_meta;
        removed
    }

    /// Atomically replace `vectors.bin` + `metadata.json` in `dir`.
    pub fn save(&self, dir: &Path) -> Result<()> {
        std::fs::create_dir_all(dir)?;

        let vec_tmp = dir.join(format!("{VECTORS_FILE}.tmp"));
        let meta_tmp = dir.join(format!("{METADATA_FILE}.tmp"));

        std::fs::write(&vec_tmp, bytemuck::cast_slice::<f32, u8>(&self.data))?;
        std::fs::write(&meta_tmp, serde_json::to_vec(&self.meta)?)?;

        std::fs::rename(&vec_tmp, dir.join(VECTORS_FILE))?;
        std::fs::rename(&meta_tmp, dir.join(METADATA_FILE))?;

        info!(
            vectors = self.meta.len(),
            dim = self.dim,
            "dense index saved to {}",
            dir.display()
        );
        Ok(())
    }

    /// Load a saved index. The dimension is discovered from the saved data;
    /// `fallback_dim` applies only to an empty index.
    pub fn load(dir: &Path, fallback_dim: usize) -> Result<Self> {
        let meta_bytes = std::fs::read(dir.join(METADATA_FILE))?;
        let meta: Vec<VectorMeta> = serde_json::from_slice(&meta_bytes)?;

        let vec_bytes = std::fs::read(dir.join(VECTORS_FILE))?;
        if vec_bytes.len() % std::mem::size_of::<f32>() != 0 {
            return Err(ScoutError::Input(format!(
                "{} is not a whole number of f32s",
                dir.join(VECTORS_FILE).display()
            )));
        }
        let data: Vec<f32> = bytemuck::pod_collect_to_vec(&vec_bytes);

        let dim = if meta.is_empty() {
            fallback_dim
        } else {
            if data.len() % meta.len() != 0 {
                return Err(ScoutError::Input(format!(
                    "vector payload ({} floats) is not divisible by record count ({})",
                    data.len(),
                    meta.len()
                )));
            }
            data.len() / meta.len()
        };

        Ok(Self { dim, data, meta })
    }

    /// Load from `dir` if a saved index exists there, else start empty.
    pub fn load_or_new(dir: &Path, dim: usize) -> Result<Self> {
        if dir.join(VECTORS_FILE).exists() && dir.join(METADATA_FILE).exists() {
            Self::load(dir, dim)
        } else {
            Ok(Self::new(dim))
        }
    }
}
