//! In-memory sync queue for tests and single-process embedding
//!
//! Same semantics as the PostgreSQL queue (keyed de-duplication, leases,
//! backoff, dead jobs) without durability. The clock can be advanced so
//! backoff can be exercised without sleeping.

use std::collections::BTreeMap;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::Mutex;
use tracing::debug;

use super::{FailOutcome, JobId, JobOptions, JobState, QueuedJob, RetryPolicy, SyncJob, SyncQueue};
use crate::error::{Error, Result};

/// Snapshot of one job in the queue
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct JobEntry {
    pub id: JobId,
    pub job: SyncJob,
    pub state: JobState,
    pub attempts: u32,
    pub max_attempts: u32,
    pub job_key: Option<String>,
    pub run_at: DateTime<Utc>,
    pub locked_by: Option<String>,
    pub locked_at: Option<DateTime<Utc>>,
    pub last_error: Option<String>,
}

struct Inner {
    next_id: JobId,
    jobs: BTreeMap<JobId, JobEntry>,
    clock_offset: chrono::Duration,
}

impl Default for Inner {
    fn default() -> Self {
        Self {
            next_id: 0,
            jobs: BTreeMap::new(),
            clock_offset: chrono::Duration::zero(),
        }
    }
}

impl Inner {
    fn now(&self) -> DateTime<Utc> {
        Utc::now() + self.clock_offset
    }
}

#[derive(Default)]
pub struct MemoryQueue {
    policy: RetryPolicy,
    inner: Mutex<Inner>,
}

impl MemoryQueue {
    pub fn new(policy: RetryPolicy) -> Self {
        Self {
            policy,
            inner: Mutex::new(Inner::default()),
        }
    }

    /// Every job ever enqueued, in id order
    pub async fn entries(&self) -> Vec<JobEntry> {
        self.inner.lock().await.jobs.values().cloned().collect()
    }

    /// Jobs still waiting to run, in enqueue order
    pub async fn queued(&self) -> Vec<SyncJob> {
        self.inner
            .lock()
            .await
            .jobs
            .values()
            .filter(|e| e.state == JobState::Queued)
            .map(|e| e.job.clone())
            .collect()
    }

    pub async fn entry(&self, id: JobId) -> Option<JobEntry> {
        self.inner.lock().await.jobs.get(&id).cloned()
    }

    /// Move the queue clock forward so backed-off jobs become due
    pub async fn advance(&self, by: Duration) {
        let mut inner = self.inner.lock().await;
        inner.clock_offset = inner.clock_offset + to_chrono(by);
    }
}

fn to_chrono(d: Duration) -> chrono::Duration {
    chrono::Duration::from_std(d).unwrap_or(chrono::Duration::zero())
}

#[async_trait]
impl SyncQueue for MemoryQueue {
    async fn enqueue(&self, job: SyncJob, options: JobOptions) -> Result<JobId> {
        let mut inner = self.inner.lock().await;

        if let Some(key) = &options.job_key {
            let live = inner.jobs.values().find(|e| {
                e.job_key.as_deref() == Some(key.as_str())
                    && matches!(e.state, JobState::Queued | JobState::Running)
            });
            if let Some(existing) = live {
                debug!("Job key {} already queued as {}, skipping", key, existing.id);
                return Ok(existing.id);
            }
        }

        inner.next_id += 1;
        let id = inner.next_id;
        let delay = options.delay.map(to_chrono).unwrap_or_else(chrono::Duration::zero);
        let run_at = inner.now() + delay;
        inner.jobs.insert(
            id,
            JobEntry {
                id,
                job,
                state: JobState::Queued,
                attempts: 0,
                max_attempts: options.attempts.unwrap_or(self.policy.max_attempts),
                job_key: options.job_key,
                run_at,
                locked_by: None,
                locked_at: None,
                last_error: None,
            },
        );
        Ok(id)
    }

    async fn reserve(&self, worker: &str, limit: usize) -> Result<Vec<QueuedJob>> {
        let mut inner = self.inner.lock().await;
        let now = inner.now();

        let mut due: Vec<(DateTime<Utc>, JobId)> = inner
            .jobs
            .values()
            .filter(|e| e.state == JobState::Queued && e.run_at <= now)
            .map(|e| (e.run_at, e.id))
            .collect();
        due.sort();

        let mut leased = Vec::new();
        for (_, id) in due.into_iter().take(limit) {
            if let Some(entry) = inner.jobs.get_mut(&id) {
                entry.state = JobState::Running;
                entry.attempts += 1;
                entry.locked_by = Some(worker.to_string());
                entry.locked_at = Some(now);
                leased.push(QueuedJob {
                    id,
                    job: entry.job.clone(),
                    attempt: entry.attempts,
                    max_attempts: entry.max_attempts,
                    job_key: entry.job_key.clone(),
                });
            }
        }
        Ok(leased)
    }

    async fn complete(&self, id: JobId) -> Result<()> {
        let mut inner = self.inner.lock().await;
        let entry = inner
            .jobs
            .get_mut(&id)
            .ok_or_else(|| Error::QueueError(format!("job {id} not found")))?;
        entry.state = JobState::Completed;
        entry.locked_by = None;
        entry.locked_at = None;
        Ok(())
    }

    async fn fail(&self, id: JobId, message: &str, retryable: bool) -> Result<FailOutcome> {
        let mut inner = self.inner.lock().await;
        let now = inner.now();
        let entry = inner
            .jobs
            .get_mut(&id)
            .ok_or_else(|| Error::QueueError(format!("job {id} not found")))?;

        entry.last_error = Some(message.to_string());
        entry.locked_by = None;
        entry.locked_at = None;

        if !retryable || entry.attempts >= entry.max_attempts {
            entry.state = JobState::Dead;
            return Ok(FailOutcome::Dead);
        }

        let run_at = now + to_chrono(self.policy.backoff(entry.attempts));
        entry.state = JobState::Queued;
        entry.run_at = run_at;
        Ok(FailOutcome::Retrying { run_at })
    }

    async fn release_stale(&self, older_than: Duration) -> Result<u64> {
        let mut inner = self.inner.lock().await;
        let cutoff = inner.now() - to_chrono(older_than);
        let mut released = 0;
        for entry in inner.jobs.values_mut() {
            let stale = entry.state == JobState::Running
                && entry.locked_at.map(|at| at < cutoff).unwrap_or(true);
            if stale {
                entry.state = JobState::Queued;
                entry.locked_by = None;
                entry.locked_at = None;
                released += 1;
            }
        }
        Ok(released)
    }
}
