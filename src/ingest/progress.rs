use serde::{Deserialize, Serialize};
use tokio::sync::watch;

/// Ingest job lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    Pending,
    Discovering,
    Indexing,
    Completed,
    Cancelled,
    Failed,
}

/// Snapshot of ingest progress. Emitted through a latest-wins watch channel:
/// observers care about current state, not history, so a slow reader simply
/// skips intermediate snapshots.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Progress {
    pub status: JobStatus,
    pub docs_done: u32,
    pub docs_total: u32,
    pub pages_done: u32,
    pub pages_total: u32,
    pub current_doc: String,
    /// Set when `status == Failed`.
    pub error: Option<String>,
}

impl Default for Progress {
    fn default() -> Self {
        Self {
            status: JobStatus::Pending,
            docs_done: 0,
            docs_total: 0,
            pages_done: 0,
            pages_total: 0,
            current_doc: String::new(),
            error: None,
        }
    }
}

impl Progress {
    /// Naive ETA from the observed per-page pace. `None` until at least one
    /// page has completed.
    pub fn eta_seconds(&self, elapsed_secs: f64) -> Option<u64> {
        if self.pages_done == 0 || self.pages_total <= self.pages_done {
            return None;
        }
        let per_page = elapsed_secs / self.pages_done as f64;
        Some((per_page * (self.pages_total - self.pages_done) as f64).round() as u64)
    }
}

/// Latest-wins progress channel.
pub fn progress_channel() -> (watch::Sender<Progress>, watch::Receiver<Progress>) {
    watch::channel(Progress::default())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn watch_observers_see_latest_snapshot() {
        let (tx, rx) = progress_channel();
        for done in 1..=5u32 {
            tx.send_replace(Progress {
                status: JobStatus::Indexing,
                pages_done: done,
                pages_total: 5,
                ..Progress::default()
            });
        }
        let seen = rx.borrow();
        assert_eq!(seen.pages_done, 5);
        assert_eq!(seen.status, JobStatus::Indexing);
    }

    #[test]
    fn eta_needs_at_least_one_page() {
        let p = Progress {
            pages_total: 10,
            ..Progress::default()
        };
        assert_eq!(p.eta_seconds(12.0), None);

        let p = Progress {
            pages_done: 5,
            pages_total: 10,
            status: JobStatus::Indexing,
            ..Progress::default()
        };
        assert_eq!(p.eta_seconds(10.0), Some(10));
    }
}
