use std::path::{Path, PathBuf};
use std::time::Instant;

use tracing::info;

use crate::core::app_state::AppState;
use crate::core::error::{Result, ScoutError};
use crate::core::types::SearchMode;
use crate::eval::metrics::{
    aggregate_retrieval, latency_metrics, recall_at_k, reciprocal_rank, EvalMetrics,
};
use crate::eval::pseudo::{
    generate_pseudo_queries, load_ground_truth, PseudoQuery, PseudoQueryConfig,
};
use crate::search::{search, SearchRequest};

/// Queries run before timing starts, to warm caches and lazily-built stats.
const WARMUP_QUERIES: usize = 3;

/// Result-list length used for metric computation (fixes Recall@20's cutoff).
const EVAL_TOP_K: usize = 20;

/// Offline evaluation driver: pseudo-query generation, timed search runs,
/// baseline comparison.
pub struct EvalRunner<'a> {
    state: &'a AppState,
    pub num_queries: usize,
    pub seed: u64,
    pub regenerate: bool,
}

/// Outcome of a baseline comparison.
#[derive(Debug, Clone)]
pub struct BaselineComparison {
    pub passed: bool,
    pub message: String,
}

impl<'a> EvalRunner<'a> {
    pub fn new(state: &'a AppState, num_queries: usize, seed: u64, regenerate: bool) -> Self {
        Self {
            state,
            num_queries,
            seed,
            regenerate,
        }
    }

    fn pseudo_dir(&self) -> PathBuf {
        self.state.settings.pseudo_queries_dir()
    }

    fn results_dir(&self) -> PathBuf {
        self.state.settings.eval_results_dir()
    }

    /// Run the harness for each requested mode, saving one result file per
    /// mode.
    pub fn run(&self, modes: &[SearchMode]) -> Result<Vec<(SearchMode, EvalMetrics)>> {
        self.ensure_pseudo_queries()?;
        let queries = load_ground_truth(&self.pseudo_dir())?;

        let mut out = Vec::with_capacity(modes.len());
        for &mode in modes {
            info!(%mode, queries = queries.len(), "running evaluation");
            let metrics = self.run_mode(mode, &queries)?;
            self.save_result(&metrics, mode)?;
            out.push((mode, metrics));
        }
        Ok(out)
    }

    fn ensure_pseudo_queries(&self) -> Result<()> {
        let gt = self.pseudo_dir().join("ground_truth.json");
        if gt.exists() && !self.regenerate {
            return Ok(());
        }
        let config = PseudoQueryConfig {
            num_queries: self.num_queries,
            seed: self.seed,
            ..PseudoQueryConfig::default()
        };
        generate_pseudo_queries(self.state, &config, &self.pseudo_dir())?;
        Ok(())
    }

    fn run_mode(&self, mode: SearchMode, queries: &[PseudoQuery]) -> Result<EvalMetrics> {
        let queries_dir = self.pseudo_dir().join("queries");

        // Warm-up: first queries pay one-time costs (lazy stats, cold caches)
        // that would skew the latency distribution.
        for q in queries.iter().take(WARMUP_QUERIES) {
            let path = queries_dir.join(format!("{}.png", q.query_id));
            if let Ok(img) = image::open(&path) {
                let _ = search(
                    self.state,
                    &SearchRequest {
                        sketch: img,
                        text_query: None,
                        top_k: 5,
                        mode,
                    },
                );
            }
        }

        let mut r1 = Vec::new();
        let mut r5 = Vec::new();
        let mut r10 = Vec::new();
        let mut r20 = Vec::new();
        let mut mrrs = Vec::new();
        let mut latencies = Vec::new();

        for q in queries {
            let path = queries_dir.join(format!("{}.png", q.query_id));
            let Ok(img) = image::open(&path) else {
                continue;
            };

            let started = Instant::now();
            let outcome = search(
                self.state,
                &SearchRequest {
                    sketch: img,
                    text_query: None,
                    top_k: EVAL_TOP_K,
                    mode,
                },
            )?;
            latencies.push(started.elapsed().as_secs_f64() * 1000.0);

            let gt = q.page_key();
            r1.push(recall_at_k(&outcome.results, gt, 1));
            r5.push(recall_at_k(&outcome.results, gt, 5));
            r10.push(recall_at_k(&outcome.results, gt, 10));
            r20.push(recall_at_k(&outcome.results, gt, 20));
            mrrs.push(reciprocal_rank(&outcome.results, gt));
        }

        Ok(EvalMetrics {
            retrieval: aggregate_retrieval(&r1, &r5, &r10, &r20, &mrrs),
            latency: latency_metrics(&latencies),
            search_mode: mode.to_string(),
            timestamp: chrono::Utc::now().to_rfc3339(),
        })
    }

    fn save_result(&self, metrics: &EvalMetrics, mode: SearchMode) -> Result<PathBuf> {
        std::fs::create_dir_all(self.results_dir())?;
        let stamp = chrono::Utc::now().format("%Y%m%d_%H%M%S");
        let path = self.results_dir().join(format!("{stamp}_{mode}.json"));
        std::fs::write(&path, serde_json::to_vec_pretty(metrics)?)?;
        info!("eval results saved to {}", path.display());
        Ok(path)
    }

    /// Promote the latest result for `mode` to the baseline file.
    pub fn save_as_baseline(&self, mode: SearchMode) -> Result<PathBuf> {
        let latest = self.latest_result(mode)?.ok_or_else(|| {
            ScoutError::Input(format!("no eval results found for {mode} mode"))
        })?;
        let baseline = self.results_dir().join(format!("baseline_{mode}.json"));
        std::fs::copy(&latest, &baseline)?;
        info!("baseline for {mode} saved to {}", baseline.display());
        Ok(baseline)
    }

    fn latest_result(&self, mode: SearchMode) -> Result<Option<PathBuf>> {
        let dir = self.results_dir();
        if !dir.exists() {
            return Ok(None);
        }
        let suffix = format!("_{mode}.json");
        let mut candidates: Vec<PathBuf> = std::fs::read_dir(&dir)?
            .filter_map(|e| e.ok())
            .map(|e| e.path())
            .filter(|p| {
                p.file_name()
                    .and_then(|n| n.to_str())
                    .map(|n| n.ends_with(&suffix) && !n.starts_with("baseline_"))
                    .unwrap_or(false)
            })
            .collect();
        candidates.sort();
        Ok(candidates.pop())
    }

    pub fn load_baseline(results_dir: &Path, mode: SearchMode) -> Result<Option<EvalMetrics>> {
        let path = results_dir.join(format!("baseline_{mode}.json"));
        if !path.exists() {
            return Ok(None);
        }
        let bytes = std::fs::read(&path)?;
        Ok(Some(serde_json::from_slice(&bytes)?))
    }

    /// Flag a regression when the baseline's recall@10 exceeds the current
    /// run's by more than `threshold`.
    pub fn compare_to_baseline(
        &self,
        current: &EvalMetrics,
        mode: SearchMode,
        threshold: f32,
    ) -> Result<BaselineComparison> {
        let Some(baseline) = Self::load_baseline(&self.results_dir(), mode)? else {
            return Ok(BaselineComparison {
                passed: true,
                message: format!("no baseline for {mode} mode, skipping comparison"),
            });
        };

        let base = baseline.retrieval.recall_at_10;
        let curr = current.retrieval.recall_at_10;
        let diff = base - curr;

        if diff > threshold {
            Ok(BaselineComparison {
                passed: false,
                message: format!(
                    "REGRESSION: recall@10 dropped from {base:.3} to {curr:.3} \
                     (diff {diff:.3}, threshold {threshold})"
                ),
            })
        } else {
            Ok(BaselineComparison {
                passed: true,
                message: format!("OK: recall@10 = {curr:.3} (baseline {base:.3})"),
            })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::config::Settings;
    use crate::eval::metrics::RetrievalMetrics;

    fn state_on(dir: &Path) -> AppState {
        let settings = Settings {
            data_dir: dir.to_path_buf(),
            ..Settings::default()
        };
        AppState::initialize(settings).unwrap()
    }

    fn metrics_with_recall10(r: f32) -> EvalMetrics {
        EvalMetrics {
            retrieval: RetrievalMetrics {
                recall_at_10: r,
                ..RetrievalMetrics::default()
            },
            ..EvalMetrics::default()
        }
    }

    #[test]
    fn regression_comparison_honors_threshold() {
        let dir = tempfile::tempdir().unwrap();
        let state = state_on(dir.path());
        let runner = EvalRunner::new(&state, 10, 42, false);

        std::fs::create_dir_all(runner.results_dir()).unwrap();
        let baseline = metrics_with_recall10(0.72);
        std::fs::write(
            runner.results_dir().join("baseline_fast.json"),
            serde_json::to_vec(&baseline).unwrap(),
        )
        .unwrap();

        let worse = runner
            .compare_to_baseline(&metrics_with_recall10(0.65), SearchMode::Fast, 0.05)
            .unwrap();
        assert!(!worse.passed);

        let fine = runner
            .compare_to_baseline(&metrics_with_recall10(0.70), SearchMode::Fast, 0.05)
            .unwrap();
        assert!(fine.passed);
    }

    #[test]
    fn missing_baseline_passes_with_note() {
        let dir = tempfile::tempdir().unwrap();
        let state = state_on(dir.path());
        let runner = EvalRunner::new(&state, 10, 42, false);
        let cmp = runner
            .compare_to_baseline(&metrics_with_recall10(0.5), SearchMode::Fast, 0.05)
            .unwrap();
        assert!(cmp.passed);
        assert!(cmp.message.contains("no baseline"));
    }
}
