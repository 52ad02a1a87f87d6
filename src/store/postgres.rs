//! PostgreSQL desired-state store

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures::stream::{BoxStream, StreamExt};
use sqlx::postgres::{PgArguments, PgRow};
use sqlx::query::Query;
use sqlx::{PgPool, Postgres, Row};
use tracing::instrument;

use super::SubscriberStore;
use crate::error::{Error, Result};
use crate::model::{
    Package, PackageId, Router, RouterId, Subscriber, SubscriberId, Tenant, TenantId,
    TenantStatus,
};

const SUBSCRIBER_COLUMNS: &str = "id, tenant_id, router_id, username, service_type, password, \
     static_ip, package_id, pending_package_id, is_suspended, is_manually_disconnected, \
     provisioned, sync_status, sync_error_message, expires_at";

#[derive(Clone)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

fn decode_subscriber(row: &PgRow) -> Result<Subscriber> {
    let service_type: String = row.try_get("service_type")?;
    let sync_status: String = row.try_get("sync_status")?;
    let package_id: String = row.try_get("package_id")?;
    let pending: Option<String> = row.try_get("pending_package_id")?;
    let router_id: String = row.try_get("router_id")?;
    let tenant_id: String = row.try_get("tenant_id")?;
    let id: String = row.try_get("id")?;

    Ok(Subscriber {
        id: id.into(),
        tenant_id: tenant_id.into(),
        router_id: router_id.into(),
        username: row.try_get("username")?,
        service_type: service_type.parse().map_err(Error::Inconsistent)?,
        password: row.try_get("password")?,
        static_ip: row.try_get("static_ip")?,
        package_id: package_id.into(),
        pending_package_id: pending.map(PackageId::from),
        is_suspended: row.try_get("is_suspended")?,
        is_manually_disconnected: row.try_get("is_manually_disconnected")?,
        provisioned: row.try_get("provisioned")?,
        sync_status: sync_status.parse().map_err(Error::Inconsistent)?,
        sync_error_message: row.try_get("sync_error_message")?,
        expires_at: row.try_get("expires_at")?,
    })
}

/// Bind every subscriber column except `id`, in table order
fn bind_fields<'q>(
    query: Query<'q, Postgres, PgArguments>,
    subscriber: &'q Subscriber,
) -> Query<'q, Postgres, PgArguments> {
    query
        .bind(subscriber.tenant_id.as_str())
        .bind(subscriber.router_id.as_str())
        .bind(subscriber.username.as_str())
        .bind(subscriber.service_type.to_string())
        .bind(subscriber.password.as_deref())
        .bind(subscriber.static_ip.as_deref())
        .bind(subscriber.package_id.as_str())
        .bind(subscriber.pending_package_id.as_ref().map(|p| p.as_str()))
        .bind(subscriber.is_suspended)
        .bind(subscriber.is_manually_disconnected)
        .bind(subscriber.provisioned)
        .bind(subscriber.sync_status.to_string())
        .bind(subscriber.sync_error_message.as_deref())
        .bind(subscriber.expires_at)
}

fn decode_router(row: &PgRow) -> Result<Router> {
    let id: String = row.try_get("id")?;
    let tenant_id: String = row.try_get("tenant_id")?;
    Ok(Router {
        id: id.into(),
        tenant_id: tenant_id.into(),
        name: row.try_get("name")?,
        endpoint: row.try_get("endpoint")?,
        username: row.try_get("username")?,
        password: row.try_get("password")?,
    })
}

fn decode_package(row: &PgRow) -> Result<Package> {
    let id: String = row.try_get("id")?;
    let tenant_id: String = row.try_get("tenant_id")?;
    Ok(Package {
        id: id.into(),
        tenant_id: tenant_id.into(),
        name: row.try_get("name")?,
        ppp_profile: row.try_get("ppp_profile")?,
        rate_limit: row.try_get("rate_limit")?,
    })
}

fn decode_tenant(row: &PgRow) -> Result<Tenant> {
    let id: String = row.try_get("id")?;
    let status: String = row.try_get("status")?;
    let status = match status.as_str() {
        "active" => TenantStatus::Active,
        "suspended" => TenantStatus::Suspended,
        other => {
            return Err(Error::Inconsistent(format!(
                "tenant {id} has unknown status '{other}'"
            )))
        }
    };
    Ok(Tenant {
        id: id.into(),
        name: row.try_get("name")?,
        status,
    })
}

#[async_trait]
impl SubscriberStore for PgStore {
    async fn get_subscriber(&self, id: &SubscriberId) -> Result<Option<Subscriber>> {
        let sql = format!("SELECT {SUBSCRIBER_COLUMNS} FROM subscribers WHERE id = $1");
        let row = sqlx::query(&sql)
            .bind(id.as_str())
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(decode_subscriber).transpose()
    }

    #[instrument(skip(self, subscriber), fields(subscriber = %subscriber.id))]
    async fn create_subscriber(&self, subscriber: &Subscriber) -> Result<()> {
        // Covers both the primary key and UNIQUE (tenant_id, username)
        let query = sqlx::query(
            r#"
            INSERT INTO subscribers (
                id, tenant_id, router_id, username, service_type, password, static_ip,
                package_id, pending_package_id, is_suspended, is_manually_disconnected,
                provisioned, sync_status, sync_error_message, expires_at, updated_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, now())
            ON CONFLICT DO NOTHING
            "#,
        )
        .bind(subscriber.id.as_str());
        let result = bind_fields(query, subscriber).execute(&self.pool).await?;
        if result.rows_affected() == 0 {
            return Err(Error::AlreadyExists(format!(
                "subscriber {} ({})",
                subscriber.id, subscriber.username
            )));
        }
        Ok(())
    }

    /// `expected` must have been read from this store: timestamps compare at
    /// the column's microsecond precision.
    #[instrument(skip(self, expected, next), fields(subscriber = %expected.id, status = %next.sync_status))]
    async fn replace_subscriber(&self, expected: &Subscriber, next: &Subscriber) -> Result<bool> {
        let query = sqlx::query(
            r#"
            UPDATE subscribers SET
                tenant_id = $2,
                router_id = $3,
                username = $4,
                service_type = $5,
                password = $6,
                static_ip = $7,
                package_id = $8,
                pending_package_id = $9,
                is_suspended = $10,
                is_manually_disconnected = $11,
                provisioned = $12,
                sync_status = $13,
                sync_error_message = $14,
                expires_at = $15,
                updated_at = now()
            WHERE id = $1
              AND tenant_id = $16
              AND router_id = $17
              AND username = $18
              AND service_type = $19
              AND password IS NOT DISTINCT FROM $20
              AND static_ip IS NOT DISTINCT FROM $21
              AND package_id = $22
              AND pending_package_id IS NOT DISTINCT FROM $23
              AND is_suspended = $24
              AND is_manually_disconnected = $25
              AND provisioned = $26
              AND sync_status = $27
              AND sync_error_message IS NOT DISTINCT FROM $28
              AND expires_at IS NOT DISTINCT FROM $29
            "#,
        )
        .bind(expected.id.as_str());
        let query = bind_fields(bind_fields(query, next), expected);
        let result = query.execute(&self.pool).await?;
        Ok(result.rows_affected() == 1)
    }

    async fn delete_subscriber(&self, id: &SubscriberId) -> Result<bool> {
        let result = sqlx::query("DELETE FROM subscribers WHERE id = $1")
            .bind(id.as_str())
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn list_subscribers(&self, tenant: &TenantId) -> Result<Vec<Subscriber>> {
        let sql = format!(
            "SELECT {SUBSCRIBER_COLUMNS} FROM subscribers WHERE tenant_id = $1 ORDER BY id"
        );
        let rows = sqlx::query(&sql)
            .bind(tenant.as_str())
            .fetch_all(&self.pool)
            .await?;
        rows.iter().map(decode_subscriber).collect()
    }

    fn stream_expired<'a>(
        &'a self,
        tenant: &'a TenantId,
        now: DateTime<Utc>,
    ) -> BoxStream<'a, Result<Subscriber>> {
        sqlx::query(
            "SELECT id, tenant_id, router_id, username, service_type, password, static_ip, \
             package_id, pending_package_id, is_suspended, is_manually_disconnected, \
             provisioned, sync_status, sync_error_message, expires_at \
             FROM subscribers \
             WHERE tenant_id = $1 AND is_suspended = FALSE AND expires_at <= $2 \
             ORDER BY id",
        )
        .bind(tenant.as_str())
        .bind(now)
        .fetch(&self.pool)
        .map(|row| row.map_err(Error::from).and_then(|row| decode_subscriber(&row)))
        .boxed()
    }

    async fn get_package(&self, id: &PackageId) -> Result<Option<Package>> {
        let row = sqlx::query(
            "SELECT id, tenant_id, name, ppp_profile, rate_limit FROM packages WHERE id = $1",
        )
        .bind(id.as_str())
        .fetch_optional(&self.pool)
        .await?;
        row.as_ref().map(decode_package).transpose()
    }

    async fn list_packages(&self, tenant: &TenantId) -> Result<Vec<Package>> {
        let rows = sqlx::query(
            "SELECT id, tenant_id, name, ppp_profile, rate_limit FROM packages WHERE tenant_id = $1 ORDER BY id",
        )
        .bind(tenant.as_str())
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(decode_package).collect()
    }

    async fn get_router(&self, id: &RouterId) -> Result<Option<Router>> {
        let row = sqlx::query(
            "SELECT id, tenant_id, name, endpoint, username, password FROM routers WHERE id = $1",
        )
        .bind(id.as_str())
        .fetch_optional(&self.pool)
        .await?;
        row.as_ref().map(decode_router).transpose()
    }

    async fn list_routers(&self, tenant: &TenantId) -> Result<Vec<Router>> {
        let rows = sqlx::query(
            "SELECT id, tenant_id, name, endpoint, username, password FROM routers WHERE tenant_id = $1 ORDER BY id",
        )
        .bind(tenant.as_str())
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(decode_router).collect()
    }

    async fn list_active_tenants(&self) -> Result<Vec<Tenant>> {
        let rows = sqlx::query(
            "SELECT id, name, status FROM tenants WHERE status = 'active' ORDER BY id",
        )
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(decode_tenant).collect()
    }
}
