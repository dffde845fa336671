use serde::{Deserialize, Serialize};

use crate::core::types::{PageKey, SearchResult};

/// Retrieval quality over a pseudo-query set.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RetrievalMetrics {
    pub recall_at_1: f32,
    pub recall_at_5: f32,
    pub recall_at_10: f32,
    pub recall_at_20: f32,
    pub mrr: f32,
    pub num_queries: usize,
}

/// Query latency percentiles, milliseconds.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LatencyMetrics {
    pub p50_ms: f64,
    pub p95_ms: f64,
    pub mean_ms: f64,
    pub num_samples: usize,
}

/// One evaluation run, serialized as a result file.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct EvalMetrics {
    pub retrieval: RetrievalMetrics,
    pub latency: LatencyMetrics,
    pub search_mode: String,
    pub timestamp: String,
}

/// 1.0 if the ground-truth page appears in the top-k results, else 0.0.
pub fn recall_at_k(results: &[SearchResult], ground_truth: PageKey, k: usize) -> f32 {
    let hit = results
        .iter()
        .take(k)
        .any(|r| r.doc_id == ground_truth.doc_id && r.page_num == ground_truth.page_num);
    if hit {
        1.0
    } else {
        0.0
    }
}

/// Reciprocal rank of the ground-truth page; 0.0 when it is not in the list.
pub fn reciprocal_rank(results: &[SearchResult], ground_truth: PageKey) -> f32 {
    results
        .iter()
        .position(|r| r.doc_id == ground_truth.doc_id && r.page_num == ground_truth.page_num)
        .map(|i| 1.0 / (i + 1) as f32)
        .unwrap_or(0.0)
}

/// Mean over per-query samples; 0.0 for an empty set.
fn mean(values: &[f32]) -> f32 {
    if values.is_empty() {
        0.0
    } else {
        values.iter().sum::<f32>() / values.len() as f32
    }
}

/// Nearest-rank percentile over unsorted samples. `q` in `[0, 1]`.
pub fn percentile(values: &[f64], q: f64) -> f64 {
    if values.is_empty() {
        return 0.0;
    }
    let mut sorted = values.to_vec();
    sorted.sort_by(|a, b| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal));
    let rank = ((q * sorted.len() as f64).ceil() as usize).clamp(1, sorted.len());
    sorted[rank - 1]
}

pub fn aggregate_retrieval(
    recalls_1: &[f32],
    recalls_5: &[f32],
    recalls_10: &[f32],
    recalls_20: &[f32],
    mrrs: &[f32],
) -> RetrievalMetrics {
    RetrievalMetrics {
        recall_at_1: mean(recalls_1),
        recall_at_5: mean(recalls_5),
        recall_at_10: mean(recalls_10),
        recall_at_20: mean(recalls_20),
        mrr: mean(mrrs),
        num_queries: mrrs.len(),
    }
}

pub fn latency_metrics(latencies_ms: &[f64]) -> LatencyMetrics {
    if latencies_ms.is_empty() {
        return LatencyMetrics::default();
    }
    let mean_ms = latencies_ms.iter().sum::<f64>() / latencies_ms.len() as f64;
    LatencyMetrics {
        p50_ms: percentile(latencies_ms, 0.50),
        p95_ms: percentile(latencies_ms, 0.95),
        mean_ms,
        num_samples: latencies_ms.len(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::types::SearchStage;
    use uuid::Uuid;

    fn result(key: PageKey) -> SearchResult {
        SearchResult {
            doc_id: key.doc_id,
            doc_name: "doc.pdf".into(),
            page_num: key.page_num,
            score: 1.0,
            stage: SearchStage::Fast,
            thumbnail_url: String::new(),
        }
    }

    #[test]
    fn recall_respects_cutoff() {
        let gt = PageKey::new(Uuid::new_v4(), 0);
        let other = PageKey::new(Uuid::new_v4(), 0);
        let results = vec![result(other), result(gt)];

        assert_eq!(recall_at_k(&results, gt, 1), 0.0);
        assert_eq!(recall_at_k(&results, gt, 2), 1.0);
    }

    #[test]
    fn reciprocal_rank_of_second_place_is_half() {
        let gt = PageKey::new(Uuid::new_v4(), 0);
        let other = PageKey::new(Uuid::new_v4(), 0);
        let results = vec![result(other), result(gt)];
        assert!((reciprocal_rank(&results, gt) - 0.5).abs() < 1e-6);
    }

    #[test]
    fn missing_ground_truth_scores_zero() {
        let gt = PageKey::new(Uuid::new_v4(), 0);
        assert_eq!(reciprocal_rank(&[], gt), 0.0);
        assert_eq!(recall_at_k(&[], gt, 10), 0.0);
    }

    #[test]
    fn percentiles_over_known_samples() {
        let values: Vec<f64> = (1..=100).map(|v| v as f64).collect();
        assert_eq!(percentile(&values, 0.50), 50.0);
        assert_eq!(percentile(&values, 0.95), 95.0);
        assert_eq!(percentile(&values, 1.0), 100.0);
    }

    #[test]
    fn latency_metrics_empty_is_zeroed() {
        let m = latency_metrics(&[]);
        assert_eq!(m.num_samples, 0);
        assert_eq!(m.mean_ms, 0.0);
    }
}
