use std::path::PathBuf;
use std::sync::Arc;

use image::RgbImage;
use tracing::warn;

use crate::core::error::{Result, ScoutError};
use crate::core::types::{PageKey, SearchResult, SearchStage};
use crate::embed::{MultiVectorEmbedder, PatchMatrix};

/// Rows with a norm below this are treated as blank and skipped.
const NORM_EPS: f32 = 1e-6;

/// MaxSim late-interaction score between a query matrix Q and a document
/// matrix D: `Σ_i max_j ⟨q̂_i, d̂_j⟩` over row-normalized rows. Blank rows on
/// either side contribute nothing.
pub fn maxsim(query: &PatchMatrix, doc: &PatchMatrix) -> f32 {
    if query.is_empty() || doc.is_empty() || query.dim != doc.dim {
        return 0.0;
    }

    let doc_norms: Vec<f32> = doc
        .iter_rows()
        .map(|row| row.iter().map(|v| v * v).sum::<f32>().sqrt())
        .collect();

    let mut total = 0.0;
    for q_row in query.iter_rows() {
        let q_norm: f32 = q_row.iter().map(|v| v * v).sum::<f32>().sqrt();
        if q_norm < NORM_EPS {
            continue;
        }
        let mut best = 0.0f32;
        for (d_row, d_norm) in doc.iter_rows().zip(&doc_norms) {
            if *d_norm < NORM_EPS {
                continue;
            }
            let dot: f32 = q_row.iter().zip(d_row).map(|(a, b)| a * b).sum();
            let sim = dot / (q_norm * d_norm);
            if sim > best {
                best = sim;
            }
        }
        total += best;
    }
    total
}

/// Second-stage reranker for candidates without stored patch matrices.
///
/// Loads each candidate's rendered page PNG, re-embeds it through the
/// multi-vector embedder, and scores it against the sketch with MaxSim.
/// Re-embeddings are cached (bounded, keyed by page) so repeated queries do
/// not pay the embedding cost again. Missing rendered pages drop the
/// candidate with a warning — a lost artifact never fails the whole query.
pub struct Reranker {
    multi: Arc<dyn MultiVectorEmbedder>,
    rendered_dir: PathBuf,
    cache: moka::sync::Cache<PageKey, Arc<PatchMatrix>>,
}

impl Reranker {
    pub fn new(multi: Arc<dyn MultiVectorEmbedder>, rendered_dir: PathBuf) -> Self {
        Self {
            multi,
            rendered_dir,
            cache: moka::sync::Cache::builder().max_capacity(512).build(),
        }
    }

    pub fn embed_sketch(&self, img: &RgbImage) -> Result<PatchMatrix> {
        self.multi
            .embed_one(img)
            .map_err(|e| ScoutError::Query(format!("sketch embedding failed: {e}")))
    }

    fn page_matrix(&self, key: PageKey) -> Result<Option<Arc<PatchMatrix>>> {
        if let Some(hit) = self.cache.get(&key) {
            return Ok(Some(hit));
        }

        let path = self
            .rendered_dir
            .join(key.doc_id.to_string())
            .join(format!("{}.png", key.page_num));
        if !path.exists() {
            warn!("rendered page missing, dropping rerank candidate: {}", path.display());
            return Ok(None);
        }

        let img = image::open(&path)?.to_rgb8();
        let matrix = Arc::new(
            self.multi
                .embed_one(&img)
                .map_err(|e| ScoutError::Embedding(e.to_string()))?,
        );
        self.cache.insert(key, matrix.clone());
        Ok(Some(matrix))
    }

    /// Rerank fast-stage candidates by MaxSim against the sketch. Candidates
    /// whose rendered page is gone are filtered, not failed.
    pub fn rerank(
        &self,
        query: &PatchMatrix,
        candidates: Vec<SearchResult>,
        top_k: usize,
    ) -> Result<Vec<SearchResult>> {
        let mut scored: Vec<(SearchResult, f32)> = Vec::with_capacity(candidates.len());
        for candidate in candidates {
            let key = PageKey::new(candidate.doc_id, candidate.page_num);
            match self.page_matrix(key)? {
                Some(matrix) => {
                    let score = maxsim(query, &matrix);
                    scored.push((candidate, score));
                }
                None => continue,
            }
        }

        scored.sort_by(|a, b| {
            b.1.partial_cmp(&a.1)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| {
                    (a.0.doc_id, a.0.page_num).cmp(&(b.0.doc_id, b.0.page_num))
                })
        });
        scored.truncate(top_k);

        Ok(scored
            .into_iter()
            .map(|(mut result, score)| {
                result.score = score;
                result.stage = SearchStage::Reranked;
                result
            })
            .collect())
    }
}
