//! PostgreSQL-backed sync queue
//!
//! Jobs live in `sync_jobs`. Workers lease rows with `FOR UPDATE SKIP LOCKED`
//! so any number of worker processes can share one queue, and a partial
//! unique index on `(queue, job_key)` over live rows gives fixed-id jobs
//! their de-duplication.

use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use sqlx::postgres::PgRow;
use sqlx::{PgPool, Row};
use tracing::{debug, instrument};

use super::{FailOutcome, JobId, JobOptions, QueuedJob, RetryPolicy, SyncJob, SyncQueue};
use crate::error::{Error, Result};

#[derive(Clone)]
pub struct PgSyncQueue {
    pool: PgPool,
    name: String,
    policy: RetryPolicy,
}

impl PgSyncQueue {
    pub fn new(pool: PgPool, name: impl Into<String>, policy: RetryPolicy) -> Self {
        Self {
            pool,
            name: name.into(),
            policy,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }
}

fn to_chrono(d: Duration) -> chrono::Duration {
    chrono::Duration::from_std(d).unwrap_or(chrono::Duration::zero())
}

fn decode_leased(row: &PgRow) -> Result<QueuedJob> {
    let payload: String = row.try_get("payload")?;
    let attempts: i32 = row.try_get("attempts")?;
    let max_attempts: i32 = row.try_get("max_attempts")?;
    Ok(QueuedJob {
        id: row.try_get("id")?,
        job: serde_json::from_str(&payload)?,
        attempt: attempts.max(0) as u32,
        max_attempts: max_attempts.max(0) as u32,
        job_key: row.try_get("job_key")?,
    })
}

#[async_trait]
impl SyncQueue for PgSyncQueue {
    #[instrument(skip(self, job, options), fields(queue = %self.name, job_type = job.job_type()))]
    async fn enqueue(&self, job: SyncJob, options: JobOptions) -> Result<JobId> {
        let payload = serde_json::to_string(&job)?;
        let max_attempts = options.attempts.unwrap_or(self.policy.max_attempts) as i32;
        let delay = options.delay.map(to_chrono).unwrap_or_else(chrono::Duration::zero);
        let run_at = Utc::now() + delay;

        let inserted: Option<PgRow> = sqlx::query(
            r#"
            INSERT INTO sync_jobs (queue, job_type, payload, job_key, state, attempts, max_attempts, run_at)
            VALUES ($1, $2, $3, $4, 'queued', 0, $5, $6)
            ON CONFLICT (queue, job_key) WHERE job_key IS NOT NULL AND state IN ('queued', 'running')
            DO NOTHING
            RETURNING id
            "#,
        )
        .bind(&self.name)
        .bind(job.job_type())
        .bind(&payload)
        .bind(options.job_key.as_deref())
        .bind(max_attempts)
        .bind(run_at)
        .fetch_optional(&self.pool)
        .await?;

        if let Some(row) = inserted {
            return Ok(row.try_get("id")?);
        }

        // Key collision with a live job: hand back the existing id
        let existing: Option<PgRow> = sqlx::query(
            "SELECT id FROM sync_jobs WHERE queue = $1 AND job_key = $2 AND state IN ('queued', 'running')",
        )
        .bind(&self.name)
        .bind(options.job_key.as_deref())
        .fetch_optional(&self.pool)
        .await?;

        match existing {
            Some(row) => {
                let id: JobId = row.try_get("id")?;
                debug!("Job key {:?} already live as {}", options.job_key, id);
                Ok(id)
            }
            // The live job finished between the insert and the lookup
            None => Err(Error::QueueError(format!(
                "job key {:?} raced with completion, retry enqueue",
                options.job_key
            ))),
        }
    }

    async fn reserve(&self, worker: &str, limit: usize) -> Result<Vec<QueuedJob>> {
        if limit == 0 {
            return Ok(Vec::new());
        }

        let rows: Vec<PgRow> = sqlx::query(
            r#"
            UPDATE sync_jobs
            SET state = 'running', attempts = attempts + 1, locked_by = $2, locked_at = now(), updated_at = now()
            WHERE id IN (
                SELECT id FROM sync_jobs
                WHERE queue = $1 AND state = 'queued' AND run_at <= now()
                ORDER BY run_at, id
                LIMIT $3
                FOR UPDATE SKIP LOCKED
            )
            RETURNING id, payload, attempts, max_attempts, job_key
            "#,
        )
        .bind(&self.name)
        .bind(worker)
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await?;

        let mut jobs: Vec<QueuedJob> = Vec::with_capacity(rows.len());
        for row in &rows {
            match decode_leased(row) {
                Ok(job) => jobs.push(job),
                Err(e) => {
                    // A payload this build cannot decode will never succeed
                    let id: JobId = row.try_get("id")?;
                    tracing::error!("Dropping undecodable job {}: {}", id, e);
                    self.fail(id, &e.to_string(), false).await?;
                }
            }
        }
        jobs.sort_by_key(|j| j.id);
        Ok(jobs)
    }

    async fn complete(&self, id: JobId) -> Result<()> {
        sqlx::query(
            "UPDATE sync_jobs SET state = 'completed', locked_by = NULL, locked_at = NULL, updated_at = now() WHERE id = $1",
        )
        .bind(id)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn fail(&self, id: JobId, message: &str, retryable: bool) -> Result<FailOutcome> {
        let row: Option<PgRow> =
            sqlx::query("SELECT attempts, max_attempts FROM sync_jobs WHERE id = $1")
                .bind(id)
                .fetch_optional(&self.pool)
                .await?;
        let row = row.ok_or_else(|| Error::QueueError(format!("job {id} not found")))?;
        let attempts: i32 = row.try_get("attempts")?;
        let max_attempts: i32 = row.try_get("max_attempts")?;

        if !retryable || attempts >= max_attempts {
            sqlx::query(
                "UPDATE sync_jobs SET state = 'dead', last_error = $2, locked_by = NULL, locked_at = NULL, updated_at = now() WHERE id = $1",
            )
            .bind(id)
            .bind(message)
            .execute(&self.pool)
            .await?;
            return Ok(FailOutcome::Dead);
        }

        let run_at = Utc::now() + to_chrono(self.policy.backoff(attempts.max(1) as u32));
        sqlx::query(
            "UPDATE sync_jobs SET state = 'queued', last_error = $2, run_at = $3, locked_by = NULL, locked_at = NULL, updated_at = now() WHERE id = $1",
        )
        .bind(id)
        .bind(message)
        .bind(run_at)
        .execute(&self.pool)
        .await?;
        Ok(FailOutcome::Retrying { run_at })
    }

    async fn release_stale(&self, older_than: Duration) -> Result<u64> {
        let cutoff = Utc::now() - to_chrono(older_than);
        let result = sqlx::query(
            "UPDATE sync_jobs SET state = 'queued', locked_by = NULL, locked_at = NULL, updated_at = now() WHERE queue = $1 AND state = 'running' AND locked_at < $2",
        )
        .bind(&self.name)
        .bind(cutoff)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected())
    }
}
