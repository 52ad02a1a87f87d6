//! Background worker pool draining the sync queue
//!
//! Up to `concurrency` jobs run at once, each in its own task holding a
//! semaphore permit. Shutdown stops leasing and waits for every permit to
//! come back, so in-flight jobs always finish.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{watch, OwnedSemaphorePermit, Semaphore};
use tokio::time::{sleep, Instant};
use tracing::{debug, error, info, warn, Instrument};

use super::handler::ControllerState;
use crate::error::Result;
use crate::queue::{FailOutcome, QueuedJob};

#[derive(Clone, Debug)]
pub struct WorkerConfig {
    /// Identity recorded on leased jobs
    pub worker_id: String,
    pub concurrency: usize,
    /// Idle wait between empty polls
    pub poll_interval: Duration,
    /// Leases older than this are considered abandoned
    pub stale_after: Duration,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            worker_id: default_worker_id(),
            concurrency: 4,
            poll_interval: Duration::from_secs(1),
            stale_after: Duration::from_secs(300),
        }
    }
}

/// `<hostname>-<pid>`
pub fn default_worker_id() -> String {
    let host = hostname::get()
        .ok()
        .and_then(|h| h.into_string().ok())
        .unwrap_or_else(|| "unknown-host".to_string());
    format!("{}-{}", host, std::process::id())
}

/// How one leased job ended
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum JobOutcome {
    Completed,
    Retrying,
    Dead,
}

pub struct SyncWorker {
    state: Arc<ControllerState>,
    config: WorkerConfig,
    permits: Arc<Semaphore>,
}

impl SyncWorker {
    pub fn new(state: Arc<ControllerState>, config: WorkerConfig) -> Self {
        let concurrency = config.concurrency.max(1);
        Self {
            state,
            config: WorkerConfig {
                concurrency,
                ..config
            },
            permits: Arc::new(Semaphore::new(concurrency)),
        }
    }

    /// Lease and run jobs until `shutdown` flips, then wait for in-flight jobs
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) {
        info!(
            "Sync worker {} started with {} slots",
            self.config.worker_id, self.config.concurrency
        );
        let mut last_release: Option<Instant> = None;

        loop {
            if *shutdown.borrow() {
                break;
            }

            let release_due = last_release
                .map(|at| at.elapsed() >= self.config.stale_after / 2)
                .unwrap_or(true);
            if release_due {
                self.release_stale().await;
                last_release = Some(Instant::now());
            }

            let first = tokio::select! {
                permit = Arc::clone(&self.permits).acquire_owned() => permit,
                changed = shutdown.changed() => {
                    if changed.is_err() {
                        break;
                    }
                    continue;
                }
            };
            let Ok(first) = first else {
                break;
            };
            let mut permits = vec![first];
            while let Ok(permit) = Arc::clone(&self.permits).try_acquire_owned() {
                permits.push(permit);
            }

            let leased = match self
                .state
                .queue
                .reserve(&self.config.worker_id, permits.len())
                .await
            {
                Ok(leased) => leased,
                Err(e) => {
                    error!("Failed to lease jobs: {}", e);
                    Vec::new()
                }
            };

            if leased.is_empty() {
                drop(permits);
                tokio::select! {
                    _ = sleep(self.config.poll_interval) => {}
                    _ = shutdown.changed() => {}
                }
                continue;
            }

            for (job, permit) in leased.into_iter().zip(permits) {
                self.spawn_job(job, permit);
            }
        }

        info!("Sync worker {} draining in-flight jobs", self.config.worker_id);
        let _ = self
            .permits
            .acquire_many(self.config.concurrency as u32)
            .await;
        info!("Sync worker {} stopped", self.config.worker_id);
    }

    fn spawn_job(&self, job: QueuedJob, permit: OwnedSemaphorePermit) {
        let state = Arc::clone(&self.state);
        let span = tracing::info_span!("sync_job", job_id = job.id, attempt = job.attempt);
        tokio::spawn(
            async move {
                process(&state, job).await;
                drop(permit);
            }
            .instrument(span),
        );
    }

    async fn release_stale(&self) {
        match self.state.queue.release_stale(self.config.stale_after).await {
            Ok(0) => {}
            Ok(released) => warn!("Released {} abandoned job leases", released),
            Err(e) => error!("Failed to release stale leases: {}", e),
        }
    }

    /// Run due jobs one at a time until none are left
    ///
    /// Jobs enqueued by the jobs being run are picked up in the same call.
    pub async fn drain(&self) -> Result<Vec<(QueuedJob, JobOutcome)>> {
        let mut processed = Vec::new();
        loop {
            let leased = self
                .state
                .queue
                .reserve(&self.config.worker_id, self.config.concurrency)
                .await?;
            if leased.is_empty() {
                return Ok(processed);
            }
            for job in leased {
                let outcome = process(&self.state, job.clone()).await;
                processed.push((job, outcome));
            }
        }
    }
}

/// Handle one leased job and report the result back to the queue
pub async fn process(state: &ControllerState, leased: QueuedJob) -> JobOutcome {
    let job_type = leased.job.job_type();
    let started = Instant::now();

    let outcome = match state.handle(&leased.job).await {
        Ok(()) => match state.queue.complete(leased.id).await {
            Ok(()) => {
                debug!("Job {} ({}) completed", leased.id, job_type);
                JobOutcome::Completed
            }
            Err(e) => {
                // The lease will be released as stale and the job replayed.
                error!("Failed to complete job {}: {}", leased.id, e);
                JobOutcome::Retrying
            }
        },
        Err(e) => {
            let retryable = e.is_retriable();
            match state.queue.fail(leased.id, &e.to_string(), retryable).await {
                Ok(FailOutcome::Retrying { run_at }) => {
                    warn!(
                        "Job {} ({}) attempt {}/{} failed, retrying at {}: {}",
                        leased.id, job_type, leased.attempt, leased.max_attempts, run_at, e
                    );
                    JobOutcome::Retrying
                }
                Ok(FailOutcome::Dead) => {
                    error!(
                        "Job {} ({}) failed permanently after {} attempts [{}]: {}",
                        leased.id,
                        job_type,
                        leased.attempt,
                        e.kind(),
                        e
                    );
                    JobOutcome::Dead
                }
                Err(queue_err) => {
                    error!("Failed to record failure of job {}: {}", leased.id, queue_err);
                    JobOutcome::Retrying
                }
            }
        }
    };

    #[cfg(feature = "metrics")]
    {
        let label = match outcome {
            JobOutcome::Completed => "completed",
            JobOutcome::Retrying => "retrying",
            JobOutcome::Dead => "dead",
        };
        super::metrics::inc_job(job_type, label);
        super::metrics::observe_job_duration_seconds(job_type, started.elapsed().as_secs_f64());
    }
    #[cfg(not(feature = "metrics"))]
    let _ = started;

    outcome
}
