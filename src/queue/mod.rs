//! Durable at-least-once sync queue
//!
//! Producers call [`SyncQueue::enqueue`]; the worker pool leases due jobs with
//! [`SyncQueue::reserve`] and reports back through `complete` / `fail`.
//! The queue is always passed around as `Arc<dyn SyncQueue>`, never held in a
//! global, so tests swap in [`MemoryQueue`].

mod job;
pub mod memory;
pub mod postgres;

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::Result;

pub use job::{DisconnectReason, SyncJob};
pub use memory::MemoryQueue;
pub use postgres::PgSyncQueue;

pub type JobId = i64;

/// Default name of the sync queue
pub const DEFAULT_QUEUE_NAME: &str = "mikrotik-sync";

/// Attempts and exponential backoff applied to failed jobs
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            base_delay: Duration::from_millis(10_000),
            max_delay: Duration::from_secs(3600),
        }
    }
}

impl RetryPolicy {
    /// Delay before the next try after `attempt` failed attempts (1-indexed)
    ///
    /// `base * 2^(attempt - 1)`, capped at `max_delay`.
    pub fn backoff(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(31);
        let delay_ms = (self.base_delay.as_millis() as u64)
            .saturating_mul(2_u64.saturating_pow(exponent));
        Duration::from_millis(delay_ms).min(self.max_delay)
    }
}

/// Per-enqueue options
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct JobOptions {
    /// Fixed identifier; enqueueing while a job with this key is still queued
    /// or running is a no-op returning the live job's id
    pub job_key: Option<String>,
    /// Override of the queue's default attempt count
    pub attempts: Option<u32>,
    pub delay: Option<Duration>,
}

impl JobOptions {
    pub fn keyed(key: impl Into<String>) -> Self {
        Self {
            job_key: Some(key.into()),
            ..Default::default()
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobState {
    Queued,
    Running,
    Completed,
    /// Retries exhausted or failure not retryable
    Dead,
}

impl JobState {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobState::Queued => "queued",
            JobState::Running => "running",
            JobState::Completed => "completed",
            JobState::Dead => "dead",
        }
    }
}

/// A job leased to a worker
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct QueuedJob {
    pub id: JobId,
    pub job: SyncJob,
    /// Attempts made including the current one
    pub attempt: u32,
    pub max_attempts: u32,
    pub job_key: Option<String>,
}

/// What the queue did with a failed job
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum FailOutcome {
    Retrying { run_at: DateTime<Utc> },
    Dead,
}

#[async_trait]
pub trait SyncQueue: Send + Sync {
    /// Enqueue and return immediately
    async fn enqueue(&self, job: SyncJob, options: JobOptions) -> Result<JobId>;

    /// Lease up to `limit` due jobs for `worker`
    async fn reserve(&self, worker: &str, limit: usize) -> Result<Vec<QueuedJob>>;

    async fn complete(&self, id: JobId) -> Result<()>;

    /// Record a failure; retryable failures are re-queued with backoff until
    /// attempts run out
    async fn fail(&self, id: JobId, message: &str, retryable: bool) -> Result<FailOutcome>;

    /// Put back jobs whose lease is older than `older_than` (crashed workers)
    async fn release_stale(&self, older_than: Duration) -> Result<u64>;

    async fn push(&self, job: SyncJob) -> Result<JobId> {
        self.enqueue(job, JobOptions::default()).await
    }
}
