//! Two-stage retrieval engine.
//!
//! Fast mode: single-vector search over region embeddings, max-aggregated to
//! page level, optionally fused with BM25 text hits by reciprocal rank
//! fusion. Accurate mode: multi-vector MaxSim over stored patch matrices,
//! falling back to fast-then-rerank when the patch channel was never
//! populated.
//!
//! The engine is read-only with respect to every store and safe for
//! concurrent queries. For a fixed index and fixed sketch bytes, results and
//! scores are bit-reproducible.

pub mod fusion;
pub mod rerank;

use std::collections::HashMap;
use std::time::Instant;

use image::DynamicImage;
use tracing::debug;

use crate::core::app_state::AppState;
use crate::core::error::{Result, ScoutError};
use crate::core::types::{PageKey, SearchMode, SearchResult, SearchStage, VectorMeta};
use crate::prepare;

pub use fusion::{reciprocal_rank_fusion, RRF_K};
pub use rerank::{maxsim, Reranker};

/// One search invocation.
pub struct SearchRequest {
    pub sketch: DynamicImage,
    pub text_query: Option<String>,
    pub top_k: usize,
    pub mode: SearchMode,
}

/// Ranked pages plus query-level bookkeeping for the API layer.
pub struct SearchOutcome {
    pub results: Vec<SearchResult>,
    pub query_time_ms: u64,
    pub total_indexed_pages: u64,
}

/// Run one query against the engine. Blocking; the HTTP layer wraps this in
/// `spawn_blocking`.
pub fn search(state: &AppState, req: &SearchRequest) -> Result<SearchOutcome> {
    let started = Instant::now();

    let results = match req.mode {
        SearchMode::Fast => fast_search(state, req, req.top_k)?,
        SearchMode::Accurate => accurate_search(state, req)?,
    };

    Ok(SearchOutcome {
        results,
        query_time_ms: started.elapsed().as_millis() as u64,
        total_indexed_pages: state.meta.page_count()?,
    })
}

/// Reduce region-level hits to one score per page by taking the maximum: a
/// crisp match in one quadrant must not be diluted by weak matches elsewhere.
/// Output is ordered by score descending, ties by page key. Idempotent.
pub fn aggregate_to_pages(hits: &[(PageKey, f32)]) -> Vec<(PageKey, f32)> {
    let mut best: HashMap<PageKey, f32> = HashMap::new();
    for (key, score) in hits {
        let entry = best.entry(*key).or_insert(f32::NEG_INFINITY);
        if *score > *entry {
            *entry = *score;
        }
    }
    let mut out: Vec<(PageKey, f32)> = best.into_iter().collect();
    out.sort_by(|a, b| {
        b.1.partial_cmp(&a.1)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then(a.0.cmp(&b.0))
    });
    out
}

/// Stage 1: dense region search + page aggregation + optional text fusion.
fn fast_search(state: &AppState, req: &SearchRequest, top_k: usize) -> Result<Vec<SearchResult>> {
    let settings = &state.settings;

    let normalized = prepare::normalize_sketch(
        &req.sketch,
        settings.clahe_clip_limit,
        settings.clahe_grid_size,
    );
    let query = state
        .single_embedder
        .embed_one(&normalized)
        .map_err(|e| ScoutError::Query(format!("sketch embedding failed: {e}")))?;

    let region_hits: Vec<(VectorMeta, f32)> = {
        let dense = state.dense.read().expect("dense lock poisoned");
        dense.search(&query, settings.stage1_top_k)?
    };
    let page_hits: Vec<(PageKey, f32)> = region_hits
        .iter()
        .map(|(m, s)| (PageKey::new(m.doc_id, m.page_num), *s))
        .collect();
    let visual = aggregate_to_pages(&page_hits);

    let text_query = req
        .text_query
        .as_deref()
        .map(str::trim)
        .filter(|t| !t.is_empty());

    let ranked: Vec<(PageKey, f32)> = match text_query {
        Some(text) if settings.enable_text_boost => {
            let text_hits = {
                let mut bm25 = state.bm25.write().expect("bm25 lock poisoned");
                bm25.search(text, settings.stage1_top_k)
            };
            debug!(
                visual = visual.len(),
                text = text_hits.len(),
                "fusing visual and text channels"
            );
            reciprocal_rank_fusion(&[visual, text_hits], RRF_K)
        }
        _ => visual,
    };

    resolve_results(state, ranked, top_k, SearchStage::Fast)
}

/// Accurate mode: MaxSim over the patch store when it is populated, else fast
/// candidates reranked against re-embedded rendered pages.
fn accurate_search(state: &AppState, req: &SearchRequest) -> Result<Vec<SearchResult>> {
    if state.patches.page_count() > 0 {
        let sketch_rgb = prepare::flatten_onto_white(&req.sketch);
        let query = state.reranker.embed_sketch(&sketch_rgb)?;

        let mut keys = state.patches.all_keys();
        keys.sort();

        let mut scored: Vec<(PageKey, f32)> = Vec::with_capacity(keys.len());
        for key in keys {
            let Some(matrix) = state.patches.get(key.doc_id, key.page_num)? else {
                continue;
            };
            scored.push((key, maxsim(&query, &matrix)));
        }
        scored.sort_by(|a, b| {
            b.1.partial_cmp(&a.1)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then(a.0.cmp(&b.0))
        });

        return resolve_results(state, scored, req.top_k, SearchStage::Reranked);
    }

    // Patch channel disabled at ingest: fall back to fast retrieval and
    // re-embed the candidates' rendered pages on the fly.
    debug!("patch store empty, using fast-then-rerank fallback");
    let candidates = fast_search(state, req, state.settings.stage1_top_k)?;
    let sketch_rgb = prepare::flatten_onto_white(&req.sketch);
    let query = state.reranker.embed_sketch(&sketch_rgb)?;
    state.reranker.rerank(&query, candidates, req.top_k)
}

/// Attach document names and thumbnail URLs. Pages whose document vanished
/// between scoring and resolution are skipped.
fn resolve_results(
    state: &AppState,
    ranked: Vec<(PageKey, f32)>,
    top_k: usize,
    stage: SearchStage,
) -> Result<Vec<SearchResult>> {
    let mut results = Vec::with_capacity(top_k.min(ranked.len()));
    for (key, score) in ranked {
        if results.len() >= top_k {
            break;
        }
        let Some(doc) = state.meta.get_document(key.doc_id)? else {
            continue;
        };
        results.push(SearchResult {
            doc_id: key.doc_id,
            doc_name: doc.display_name(),
            page_num: key.page_num,
            score,
            stage,
            thumbnail_url: format!("/v1/doc/{}/page/{}", key.doc_id, key.page_num),
        });
    }
    Ok(results)
}

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    #[test]
    fn aggregation_takes_max_across_regions() {
        let page = PageKey::new(Uuid::new_v4(), 0);
        let other = PageKey::new(Uuid::new_v4(), 3);
        let hits = vec![(page, 0.4), (page, 0.9), (other, 0.6), (page, 0.1)];

        let agg = aggregate_to_pages(&hits);
        assert_eq!(agg.len(), 2);
        assert_eq!(agg[0], (page, 0.9));
        assert_eq!(agg[1], (other, 0.6));
    }

    #[test]
    fn aggregation_is_idempotent() {
        let page_a = PageKey::new(Uuid::new_v4(), 0);
        let page_b = PageKey::new(Uuid::new_v4(), 1);
        let hits = vec![(page_a, 0.7), (page_b, 0.3), (page_a, 0.2)];

        let once = aggregate_to_pages(&hits);
        let twice = aggregate_to_pages(&once);
        assert_eq!(once, twice);
    }

    #[test]
    fn aggregation_of_empty_hits_is_empty() {
        assert!(aggregate_to_pages(&[]).is_empty());
    }
}
