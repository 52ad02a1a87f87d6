//! Periodic sweeps
//!
//! The cron loop in [`core`] enqueues one trigger job per tick. The worker
//! that picks up a trigger lists the active tenants and fans out one keyed
//! job per tenant through [`fan_out`], so both the tick and the per-tenant
//! work are ordinary queue jobs with queue retry semantics.

pub mod core;

use std::fmt;
use std::str::FromStr;

use tracing::{error, info};

use crate::error::Result;
use crate::model::TenantId;
use crate::queue::{JobId, JobOptions, SyncJob, SyncQueue};
use crate::store::SubscriberStore;

pub use self::core::{ScheduleEntry, Scheduler};

/// Cron expression for drift reconciliation, every 15 minutes
pub const DEFAULT_RECONCILE_CRON: &str = "0 */15 * * * *";

/// Cron expression for the expiry sweep, daily at midnight UTC
pub const DEFAULT_EXPIRE_CRON: &str = "0 0 0 * * *";

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum SweepKind {
    Reconcile,
    Expire,
}

impl SweepKind {
    /// Tick job enqueued by the cron loop
    pub fn trigger(&self) -> SyncJob {
        match self {
            SweepKind::Reconcile => SyncJob::ReconcileTrigger,
            SweepKind::Expire => SyncJob::ExpireSweepTrigger,
        }
    }

    /// Fixed job key of the tick job
    pub fn trigger_key(&self) -> &'static str {
        match self {
            SweepKind::Reconcile => "reconcile-sweep",
            SweepKind::Expire => "expire-sweep",
        }
    }

    pub fn tenant_job(&self, tenant: &TenantId) -> SyncJob {
        let tenant_id = tenant.clone();
        match self {
            SweepKind::Reconcile => SyncJob::Reconcile { tenant_id },
            SweepKind::Expire => SyncJob::ExpireSweep { tenant_id },
        }
    }

    /// Per-tenant job key; a slow tenant never gets a second sweep stacked
    pub fn tenant_key(&self, tenant: &TenantId) -> String {
        format!("{}:{}", self.as_str(), tenant)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            SweepKind::Reconcile => "reconcile",
            SweepKind::Expire => "expire",
        }
    }
}

impl fmt::Display for SweepKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SweepKind {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "reconcile" => Ok(SweepKind::Reconcile),
            "expire" => Ok(SweepKind::Expire),
            other => Err(format!(
                "unknown sweep kind '{other}', expected 'reconcile' or 'expire'"
            )),
        }
    }
}

/// Queue the per-tenant job of `kind` for one tenant
pub async fn enqueue_tenant(
    queue: &dyn SyncQueue,
    kind: SweepKind,
    tenant: &TenantId,
) -> Result<JobId> {
    queue
        .enqueue(kind.tenant_job(tenant), JobOptions::keyed(kind.tenant_key(tenant)))
        .await
}

/// Queue one `kind` job per active tenant
///
/// A tenant listing failure is returned, never treated as an empty fleet.
pub async fn fan_out(
    store: &dyn SubscriberStore,
    queue: &dyn SyncQueue,
    kind: SweepKind,
) -> Result<usize> {
    let tenants = match store.list_active_tenants().await {
        Ok(tenants) => tenants,
        Err(e) => {
            error!("Listing active tenants for {} sweep failed: {}", kind, e);
            return Err(e);
        }
    };

    for tenant in &tenants {
        enqueue_tenant(queue, kind, &tenant.id).await?;
    }
    info!("Fanned out {} sweep to {} tenants", kind, tenants.len());
    Ok(tenants.len())
}
