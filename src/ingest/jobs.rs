use std::collections::{HashMap, VecDeque};
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;

use tokio::sync::{watch, RwLock, Semaphore};
use tracing::error;
use uuid::Uuid;

use crate::core::app_state::AppState;
use crate::ingest::progress::{progress_channel, JobStatus, Progress};

/// Completed jobs retained for status queries before being pruned.
const MAX_RETAINED_JOBS: usize = 32;

struct JobEntry {
    rx: watch::Receiver<Progress>,
    cancel: Arc<AtomicBool>,
    started: Instant,
}

/// Point-in-time view of one job, served by the ingest status endpoint.
#[derive(Debug, Clone)]
pub struct JobSnapshot {
    pub job_id: Uuid,
    pub progress: Progress,
    pub eta_seconds: Option<u64>,
}

/// Async ingest job control: a work queue with a single worker and a
/// retention-capped map of job states.
///
/// One ingest runs at a time per data directory — the worker semaphore is the
/// serialization point; the coordinator itself stays oblivious.
pub struct JobRegistry {
    jobs: RwLock<HashMap<Uuid, JobEntry>>,
    order: RwLock<VecDeque<Uuid>>,
    worker: Arc<Semaphore>,
}

impl JobRegistry {
    pub fn new() -> Self {
        Self {
            jobs: RwLock::new(HashMap::new()),
            order: RwLock::new(VecDeque::new()),
            worker: Arc::new(Semaphore::new(1)),
        }
    }

    /// Queue an ingest over `root`. Returns immediately with the job id; the
    /// job itself waits for the worker slot and then runs on the blocking
    /// pool.
    pub async fn submit(&self, state: Arc<AppState>, root: PathBuf, force: bool) -> Uuid {
        let job_id = Uuid::new_v4();
        let (tx, rx) = progress_channel();
        let cancel = Arc::new(AtomicBool::new(false));

        {
            let mut jobs = self.jobs.write().await;
            jobs.insert(
                job_id,
                JobEntry {
                    rx,
                    cancel: cancel.clone(),
                    started: Instant::now(),
                },
            );
        }
        {
            let mut order = self.order.write().await;
            order.push_back(job_id);
        }
        self.prune().await;

        let worker = self.worker.clone();
        tokio::spawn(async move {
            let _permit = match worker.acquire_owned().await {
                Ok(p) => p,
                Err(_) => return,
            };
            let tx_for_job = tx.clone();
            let cancel_for_job = cancel.clone();
            let result = tokio::task::spawn_blocking(move || {
                crate::ingest::run_ingest(&state, &root, force, &tx_for_job, &cancel_for_job)
            })
            .await;

            match result {
                Ok(Ok(_)) => {}
                Ok(Err(e)) => error!(%job_id, "ingest job failed: {e}"),
                Err(join_err) => {
                    error!(%job_id, "ingest job panicked: {join_err}");
                    let mut failed = tx.borrow().clone();
                    failed.status = JobStatus::Failed;
                    failed.error = Some(join_err.to_string());
                    tx.send_replace(failed);
                }
            }
        });

        job_id
    }

    pub async fn snapshot(&self, job_id: Uuid) -> Option<JobSnapshot> {
        let jobs = self.jobs.read().await;
        let entry = jobs.get(&job_id)?;
        let progress = entry.rx.borrow().clone();
        let eta_seconds = progress.eta_seconds(entry.started.elapsed().as_secs_f64());
        Some(JobSnapshot {
            job_id,
            progress,
            eta_seconds,
        })
    }

    /// Request cooperative cancellation. The coordinator checks the flag
    /// between pages; in-page cancellation is not guaranteed.
    pub async fn cancel(&self, job_id: Uuid) -> bool {
        let jobs = self.jobs.read().await;
        match jobs.get(&job_id) {
            Some(entry) => {
                entry.cancel.store(true, Ordering::Relaxed);
                true
            }
            None => false,
        }
    }

    /// Drop the oldest finished jobs beyond the retention cap. Running jobs
    /// are never pruned.
    async fn prune(&self) {
        let mut order = self.order.write().await;
        if order.len() <= MAX_RETAINED_JOBS {
            return;
        }
        let mut jobs = self.jobs.write().await;
        let excess = order.len() - MAX_RETAINED_JOBS;
        let mut pruned = 0;
        let mut survivors = VecDeque::with_capacity(order.len());
        while let Some(id) = order.pop_front() {
            let finished = jobs
                .get(&id)
                .map(|e| {
                    matches!(
                        e.rx.borrow().status,
                        JobStatus::Completed | JobStatus::Failed | JobStatus::Cancelled
                    )
                })
                .unwrap_or(true);
            if pruned < excess && finished {
                jobs.remove(&id);
                pruned += 1;
            } else {
                survivors.push_back(id);
            }
        }
        *order = survivors;
    }
}

impl Default for JobRegistry {
    fn default() -> Self {
        Self::new()
    }
}
