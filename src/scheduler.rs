//! Bounded-concurrency batch scheduler with aggregate progress tracking.
//!
//! A batch of jobs runs under a counting semaphore sized to the effective
//! concurrency limit, which is fixed once at batch start (optionally
//! adapted to current resource pressure) and never re-evaluated mid-run.
//! The job table and its counters are the only mutable shared state and
//! every access goes through one mutex, so each emitted snapshot is an
//! atomic view of the whole batch.
//!
//! Cancellation is two-tiered: [`JobScheduler::cancel`] only stops jobs
//! that have not yet started; callers that need to stop running encoders
//! must additionally cancel each running executor (see
//! [`crate::BatchConverter::cancel_all`]).

use std::future::Future;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::Serialize;
use tokio::sync::Semaphore;
use tokio_util::sync::CancellationToken;

use vp_core::config::SchedulerConfig;
use vp_core::Result;

use crate::monitor::ResourceMonitor;

/// Lifecycle status of one job within a batch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    Pending,
    InProgress,
    Completed,
    Failed,
    Cancelled,
}

impl JobStatus {
    /// Completed, Failed, and Cancelled are terminal.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            JobStatus::Completed | JobStatus::Failed | JobStatus::Cancelled
        )
    }
}

/// One unit of work in the batch table. Owned exclusively by the
/// scheduler; mutated only under the table lock.
#[derive(Debug, Clone)]
struct Job {
    id: usize,
    display_name: String,
    status: JobStatus,
    progress: f64,
    started_at: Option<DateTime<Utc>>,
    message: String,
}

impl Job {
    fn pending(id: usize, display_name: String) -> Self {
        Self {
            id,
            display_name,
            status: JobStatus::Pending,
            progress: 0.0,
            started_at: None,
            message: String::new(),
        }
    }
}

/// Immutable per-job view inside an [`AggregatedProgress`] snapshot.
#[derive(Debug, Clone, Serialize)]
pub struct JobSnapshot {
    pub id: usize,
    pub display_name: String,
    pub status: JobStatus,
    pub progress: f64,
    pub started_at: Option<DateTime<Utc>>,
    pub message: String,
}

/// Atomic snapshot of a whole batch.
#[derive(Debug, Clone, Serialize)]
pub struct AggregatedProgress {
    pub total_jobs: usize,
    /// Jobs that reached a terminal state. Monotonically non-decreasing
    /// within a batch.
    pub completed_jobs: usize,
    pub in_progress_jobs: usize,
    pub pending_jobs: usize,
    /// `(completed + sum of in-progress fractions) / total`, 0 for an
    /// empty batch.
    pub overall_progress: f64,
    /// Per-job views in input order.
    pub job_snapshots: Vec<JobSnapshot>,
    /// Display names of currently running jobs.
    pub active_file_names: Vec<String>,
}

/// Observer invoked with a fresh snapshot on every table change.
pub type ProgressObserver = Arc<dyn Fn(&AggregatedProgress) + Send + Sync>;

/// Anything schedulable: the scheduler only needs a display name for the
/// job table.
pub trait BatchItem {
    fn display_name(&self) -> String;
}

impl BatchItem for std::path::PathBuf {
    fn display_name(&self) -> String {
        self.file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_else(|| self.to_string_lossy().to_string())
    }
}

impl BatchItem for String {
    fn display_name(&self) -> String {
        self.clone()
    }
}

impl BatchItem for vp_av::JobSpec {
    fn display_name(&self) -> String {
        self.display_name()
    }
}

/// The job table plus the terminal-job counter.
struct BatchTable {
    jobs: Vec<Job>,
    completed: usize,
}

/// Shared state for one batch: the table under its single lock, plus the
/// caller's observer.
struct BatchShared {
    table: Mutex<BatchTable>,
    observer: Option<ProgressObserver>,
}

impl BatchShared {
    fn empty() -> Arc<Self> {
        Arc::new(Self {
            table: Mutex::new(BatchTable {
                jobs: Vec::new(),
                completed: 0,
            }),
            observer: None,
        })
    }

    fn aggregated(&self) -> AggregatedProgress {
        let table = self.table.lock();
        aggregate(&table)
    }

    fn emit(&self) {
        if let Some(ref observer) = self.observer {
            observer(&self.aggregated());
        }
    }

    fn mark_in_progress(&self, id: usize) {
        {
            let mut table = self.table.lock();
            let job = &mut table.jobs[id];
            job.status = JobStatus::InProgress;
            job.started_at = Some(Utc::now());
        }
        self.emit();
    }

    fn set_progress(&self, id: usize, progress: f64) {
        {
            let mut table = self.table.lock();
            let job = &mut table.jobs[id];
            if job.status == JobStatus::InProgress {
                job.progress = progress.clamp(0.0, 1.0);
            }
        }
        self.emit();
    }

    /// Move a job to a terminal state and bump the completed counter.
    /// Already-terminal jobs are left untouched.
    fn finish(&self, id: usize, status: JobStatus, progress: Option<f64>, message: &str) {
        {
            let mut table = self.table.lock();
            let job = &mut table.jobs[id];
            if job.status.is_terminal() {
                return;
            }
            job.status = status;
            if let Some(p) = progress {
                job.progress = p;
            }
            job.message = message.to_string();
            table.completed += 1;
        }
        self.emit();
    }
}

fn aggregate(table: &BatchTable) -> AggregatedProgress {
    let total_jobs = table.jobs.len();
    let in_progress_jobs = table
        .jobs
        .iter()
        .filter(|j| j.status == JobStatus::InProgress)
        .count();
    let pending_jobs = table
        .jobs
        .iter()
        .filter(|j| j.status == JobStatus::Pending)
        .count();

    let overall_progress = if total_jobs == 0 {
        0.0
    } else {
        let in_progress_sum: f64 = table
            .jobs
            .iter()
            .filter(|j| j.status == JobStatus::InProgress)
            .map(|j| j.progress)
            .sum();
        (table.completed as f64 + in_progress_sum) / total_jobs as f64
    };

    let job_snapshots = table
        .jobs
        .iter()
        .map(|j| JobSnapshot {
            id: j.id,
            display_name: j.display_name.clone(),
            status: j.status,
            progress: j.progress,
            started_at: j.started_at,
            message: j.message.clone(),
        })
        .collect();

    let active_file_names = table
        .jobs
        .iter()
        .filter(|j| j.status == JobStatus::InProgress)
        .map(|j| j.display_name.clone())
        .collect();

    AggregatedProgress {
        total_jobs,
        completed_jobs: table.completed,
        in_progress_jobs,
        pending_jobs,
        overall_progress,
        job_snapshots,
        active_file_names,
    }
}

/// Handle given to each job for reporting its own progress fraction.
#[derive(Clone)]
pub struct JobProgress {
    id: usize,
    shared: Arc<BatchShared>,
}

impl JobProgress {
    /// Index of this job within the batch.
    pub fn job_id(&self) -> usize {
        self.id
    }

    /// Record a progress fraction in `[0, 1]` for this job and re-emit an
    /// aggregate snapshot. Producers are expected to report monotonically.
    pub fn report(&self, progress: f64) {
        self.shared.set_progress(self.id, progress);
    }
}

/// Executes batches of jobs with bounded parallelism.
///
/// One batch runs at a time; [`JobScheduler::process_batch`] resets the
/// previous batch's state when it starts.
pub struct JobScheduler {
    config: SchedulerConfig,
    monitor: ResourceMonitor,
    current: Mutex<Arc<BatchShared>>,
    cancel: Mutex<CancellationToken>,
}

impl JobScheduler {
    pub fn new(config: SchedulerConfig, monitor: ResourceMonitor) -> Self {
        Self {
            config,
            monitor,
            current: Mutex::new(BatchShared::empty()),
            cancel: Mutex::new(CancellationToken::new()),
        }
    }

    /// Set the batch-wide cancel flag. Jobs still queued on the semaphore
    /// will not start; already-running jobs are unaffected.
    pub fn cancel(&self) {
        self.cancel.lock().cancel();
    }

    /// Clear all batch state for reuse.
    pub fn reset(&self) {
        *self.current.lock() = BatchShared::empty();
        *self.cancel.lock() = CancellationToken::new();
    }

    /// Atomic snapshot of the current (or most recent) batch.
    pub fn aggregated_progress(&self) -> AggregatedProgress {
        self.current.lock().aggregated()
    }

    /// The concurrency bound for a new batch. In adaptive mode the
    /// resource monitor is consulted exactly once; the result is fixed for
    /// the whole batch.
    pub fn effective_concurrency(&self) -> usize {
        let configured = self.config.max_concurrent.max(1);
        if !self.config.adaptive {
            return configured;
        }
        let status = self.monitor.status();
        tracing::info!(
            "adaptive concurrency: recommended {} (cpu {:.0}% {:?}, memory {:.0}% {:?})",
            status.recommended_concurrency,
            status.cpu_percent,
            status.cpu_level,
            status.memory_percent,
            status.memory_level
        );
        configured.min(status.recommended_concurrency.max(1))
    }

    /// Run a batch of jobs, returning one result slot per input item in
    /// input order. A failed job leaves `None` in its slot and never
    /// aborts its siblings.
    pub async fn process_batch<T, R, F, Fut>(
        &self,
        items: Vec<T>,
        job_fn: F,
        observer: Option<ProgressObserver>,
    ) -> Result<Vec<Option<R>>>
    where
        T: BatchItem + Send + 'static,
        R: Send + 'static,
        F: Fn(T, JobProgress) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<R>> + Send + 'static,
    {
        let count = items.len();
        let jobs = items
            .iter()
            .enumerate()
            .map(|(id, item)| Job::pending(id, item.display_name()))
            .collect();
        let shared = Arc::new(BatchShared {
            table: Mutex::new(BatchTable { jobs, completed: 0 }),
            observer,
        });
        let token = CancellationToken::new();
        {
            *self.current.lock() = Arc::clone(&shared);
            *self.cancel.lock() = token.clone();
        }

        let limit = self.effective_concurrency();
        tracing::info!("processing batch of {count} jobs (concurrency {limit})");

        let semaphore = Arc::new(Semaphore::new(limit));
        let job_fn = Arc::new(job_fn);
        shared.emit();

        let mut handles = Vec::with_capacity(count);
        for (id, item) in items.into_iter().enumerate() {
            let shared = Arc::clone(&shared);
            let token = token.clone();
            let semaphore = Arc::clone(&semaphore);
            let job_fn = Arc::clone(&job_fn);

            handles.push(tokio::spawn(async move {
                // A cancelled batch stops queued jobs before they ever
                // transition to InProgress.
                let _permit = tokio::select! {
                    biased;
                    _ = token.cancelled() => {
                        shared.finish(id, JobStatus::Cancelled, None, "cancelled before start");
                        return None;
                    }
                    permit = Arc::clone(&semaphore).acquire_owned() => match permit {
                        Ok(p) => p,
                        Err(_) => {
                            shared.finish(id, JobStatus::Failed, None, "scheduler semaphore closed");
                            return None;
                        }
                    },
                };

                shared.mark_in_progress(id);
                let progress = JobProgress {
                    id,
                    shared: Arc::clone(&shared),
                };

                match job_fn(item, progress).await {
                    Ok(result) => {
                        shared.finish(id, JobStatus::Completed, Some(1.0), "");
                        Some(result)
                    }
                    Err(e) if e.is_cancelled() => {
                        shared.finish(id, JobStatus::Cancelled, None, &e.to_string());
                        None
                    }
                    Err(e) => {
                        tracing::warn!("job {id} failed: {e}");
                        shared.finish(id, JobStatus::Failed, None, &e.to_string());
                        None
                    }
                }
            }));
        }

        let mut results = Vec::with_capacity(count);
        for (id, handle) in handles.into_iter().enumerate() {
            match handle.await {
                Ok(slot) => results.push(slot),
                Err(e) => {
                    // A panicking job_fn is isolated to its own slot.
                    tracing::error!("job {id} task aborted: {e}");
                    shared.finish(id, JobStatus::Failed, None, "job task panicked");
                    results.push(None);
                }
            }
        }

        Ok(results)
    }
}
