//! Database schema
//!
//! Statements are idempotent and run in order by [`migrate`].

use sqlx::PgPool;
use tracing::info;

use crate::error::Result;

pub const SCHEMA: &[&str] = &[
    r#"
    CREATE TABLE IF NOT EXISTS tenants (
        id          TEXT PRIMARY KEY,
        name        TEXT NOT NULL,
        status      TEXT NOT NULL DEFAULT 'active'
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS routers (
        id          TEXT PRIMARY KEY,
        tenant_id   TEXT NOT NULL REFERENCES tenants (id),
        name        TEXT NOT NULL,
        endpoint    TEXT NOT NULL,
        username    TEXT NOT NULL,
        password    TEXT NOT NULL
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS packages (
        id          TEXT PRIMARY KEY,
        tenant_id   TEXT NOT NULL REFERENCES tenants (id),
        name        TEXT NOT NULL,
        ppp_profile TEXT NOT NULL,
        rate_limit  TEXT NOT NULL
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS subscribers (
        id                       TEXT PRIMARY KEY,
        tenant_id                TEXT NOT NULL REFERENCES tenants (id),
        router_id                TEXT NOT NULL,
        username                 TEXT NOT NULL,
        service_type             TEXT NOT NULL,
        password                 TEXT,
        static_ip                TEXT,
        package_id               TEXT NOT NULL,
        pending_package_id       TEXT,
        is_suspended             BOOLEAN NOT NULL DEFAULT FALSE,
        is_manually_disconnected BOOLEAN NOT NULL DEFAULT FALSE,
        provisioned              BOOLEAN NOT NULL DEFAULT FALSE,
        sync_status              TEXT NOT NULL DEFAULT 'pending',
        sync_error_message       TEXT,
        expires_at               TIMESTAMPTZ,
        updated_at               TIMESTAMPTZ NOT NULL DEFAULT now(),
        UNIQUE (tenant_id, username)
    )
    "#,
    r#"
    CREATE INDEX IF NOT EXISTS subscribers_expiry_idx
        ON subscribers (tenant_id, expires_at)
        WHERE is_suspended = FALSE
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS sync_jobs (
        id           BIGSERIAL PRIMARY KEY,
        queue        TEXT NOT NULL,
        job_type     TEXT NOT NULL,
        payload      TEXT NOT NULL,
        job_key      TEXT,
        state        TEXT NOT NULL DEFAULT 'queued',
        attempts     INTEGER NOT NULL DEFAULT 0,
        max_attempts INTEGER NOT NULL,
        run_at       TIMESTAMPTZ NOT NULL DEFAULT now(),
        locked_by    TEXT,
        locked_at    TIMESTAMPTZ,
        last_error   TEXT,
        created_at   TIMESTAMPTZ NOT NULL DEFAULT now(),
        updated_at   TIMESTAMPTZ NOT NULL DEFAULT now()
    )
    "#,
    r#"
    CREATE UNIQUE INDEX IF NOT EXISTS sync_jobs_live_key_idx
        ON sync_jobs (queue, job_key)
        WHERE job_key IS NOT NULL AND state IN ('queued', 'running')
    "#,
    r#"
    CREATE INDEX IF NOT EXISTS sync_jobs_due_idx
        ON sync_jobs (queue, run_at, id)
        WHERE state = 'queued'
    "#,
];

/// Create tables and indexes that do not exist yet
pub async fn migrate(pool: &PgPool) -> Result<()> {
    let mut tx = pool.begin().await?;
    for statement in SCHEMA {
        sqlx::query(statement).execute(&mut *tx).await?;
    }
    tx.commit().await?;
    info!("Schema up to date ({} statements)", SCHEMA.len());
    Ok(())
}
