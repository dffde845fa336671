use std::collections::HashMap;

use crate::core::types::PageKey;

/// Standard RRF constant. Higher k flattens the boost of top ranks.
pub const RRF_K: f32 = 60.0;

/// Reciprocal Rank Fusion over ranked page lists.
///
/// `score(p) = Σ_lists 1 / (k + rank_list(p))` with ranks starting at 1;
/// a page absent from a list contributes nothing for that list. Input scores
/// are ignored — only ranks matter, which is what lets visual cosine scores
/// and BM25 scores combine without calibration.
pub fn reciprocal_rank_fusion(lists: &[Vec<(PageKey, f32)>], k: f32) -> Vec<(PageKey, f32)> {
    let mut fused: HashMap<PageKey, f32> = HashMap::new();

    for list in lists {
        for (rank, (key, _)) in list.iter().enumerate() {
            *fused.entry(*key).or_insert(0.0) += 1.0 / (k + (rank + 1) as f32);
        }
    }

    let mut out: Vec<(PageKey, f32)> = fused.into_iter().collect();
    out.sort_by(|a, b| {
        b.1.partial_cmp(&a.1)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then(a.0.cmp(&b.0))
    });
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    fn keys(n: usize) -> Vec<PageKey> {
        (0..n).map(|i| PageKey::new(Uuid::nil(), i as u32)).collect()
    }

    fn list(keys: &[PageKey]) -> Vec<(PageKey, f32)> {
        keys.iter().map(|k| (*k, 1.0)).collect()
    }

    #[test]
    fn single_list_preserves_input_order() {
        let ks = keys(4);
        let fused = reciprocal_rank_fusion(&[list(&ks)], RRF_K);
        let order: Vec<PageKey> = fused.into_iter().map(|(k, _)| k).collect();
        assert_eq!(order, ks);
    }

    #[test]
    fn pages_in_both_lists_beat_pages_in_one() {
        // Visual [A, B, C], text [B, A, D]: fused top-2 must be {A, B};
        // C and D trail.
        let ks = keys(4);
        let (a, b, c, d) = (ks[0], ks[1], ks[2], ks[3]);
        let fused = reciprocal_rank_fusion(&[list(&[a, b, c]), list(&[b, a, d])], RRF_K);

        let top2: std::collections::HashSet<PageKey> =
            fused.iter().take(2).map(|(k, _)| *k).collect();
        assert!(top2.contains(&a) && top2.contains(&b));

        let tail: Vec<PageKey> = fused.iter().skip(2).map(|(k, _)| *k).collect();
        assert!(tail.contains(&c) && tail.contains(&d));
    }

    #[test]
    fn absent_entries_contribute_zero() {
        let ks = keys(2);
        let fused = reciprocal_rank_fusion(&[list(&[ks[0]]), list(&[ks[0], ks[1]])], RRF_K);
        assert_eq!(fused[0].0, ks[0]);
        let expected_second = 1.0 / (RRF_K + 2.0);
        assert!((fused[1].1 - expected_second).abs() < 1e-6);
    }

    #[test]
    fn empty_input_fuses_to_empty() {
        assert!(reciprocal_rank_fusion(&[], RRF_K).is_empty());
        assert!(reciprocal_rank_fusion(&[Vec::new()], RRF_K).is_empty());
    }
}
