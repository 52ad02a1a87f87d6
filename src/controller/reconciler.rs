//! Drift detection between desired state and live routers
//!
//! One pass per tenant. For every router the tenant owns, one session reads
//! the full PPP secret and simple queue lists; every subscriber on that
//! router is then compared against those two reads. Corrections are queued
//! as ordinary sync jobs, never applied inline. Router objects no subscriber
//! claims are reported as ghosts and left untouched.

use std::collections::{BTreeMap, HashMap, HashSet};

use tracing::{debug, info, instrument, warn};

use super::handler::ControllerState;
use crate::error::{Error, Result};
use crate::gateway::{PppSecret, RateLimit, SimpleQueue};
use crate::model::{
    Package, PackageId, Router, RouterId, ServiceType, Subscriber, SubscriberId, SyncStatus,
    TenantId,
};
use crate::queue::{DisconnectReason, SyncJob};

/// Everything one router reported in a reconciliation pass
#[derive(Clone, Debug, Default)]
pub struct RouterInventory {
    pub secrets: Vec<PppSecret>,
    pub queues: Vec<SimpleQueue>,
}

impl RouterInventory {
    fn secret(&self, name: &str) -> Option<&PppSecret> {
        self.secrets.iter().find(|s| s.name == name)
    }

    fn queue(&self, name: &str) -> Option<&SimpleQueue> {
        self.queues.iter().find(|q| q.name == name)
    }
}

/// What to do about one subscriber
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Correction {
    Enqueue(SyncJob),
    /// Hardware already matches; only the status is stale
    MarkSynced,
    MarkError(String),
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum GhostKind {
    Secret,
    Queue,
}

/// A live router object with no subscriber record behind it
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Ghost {
    pub kind: GhostKind,
    pub name: String,
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct RouterDiff {
    pub corrections: Vec<(SubscriberId, Correction)>,
    pub ghosts: Vec<Ghost>,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RouterReport {
    pub router_id: RouterId,
    pub reachable: bool,
    pub jobs_emitted: usize,
    pub marked_synced: usize,
    pub marked_error: usize,
    pub ghosts: Vec<Ghost>,
}

impl RouterReport {
    fn new(router_id: RouterId) -> Self {
        Self {
            router_id,
            reachable: true,
            jobs_emitted: 0,
            marked_synced: 0,
            marked_error: 0,
            ghosts: Vec::new(),
        }
    }
}

/// Outcome of one tenant reconciliation
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ReconcileReport {
    pub tenant_id: TenantId,
    pub routers: Vec<RouterReport>,
    /// Subscribers pointing at a router the tenant does not have
    pub unresolved: Vec<SubscriberId>,
}

impl ReconcileReport {
    pub fn jobs_emitted(&self) -> usize {
        self.routers.iter().map(|r| r.jobs_emitted).sum()
    }

    pub fn unreachable_routers(&self) -> Vec<&RouterId> {
        self.routers
            .iter()
            .filter(|r| !r.reachable)
            .map(|r| &r.router_id)
            .collect()
    }

    pub fn ghost_count(&self) -> usize {
        self.routers.iter().map(|r| r.ghosts.len()).sum()
    }
}

/// Compare one router's subscribers against what the router reported
pub fn diff_router(
    subscribers: &[Subscriber],
    packages: &HashMap<PackageId, Package>,
    inventory: &RouterInventory,
) -> RouterDiff {
    let mut corrections = Vec::new();
    for subscriber in subscribers {
        if let Some(correction) = assess(subscriber, packages, inventory) {
            corrections.push((subscriber.id.clone(), correction));
        }
    }

    let claimed = |service: ServiceType| -> HashSet<&str> {
        subscribers
            .iter()
            .filter(|s| s.service_type == service)
            .map(|s| s.username.as_str())
            .collect()
    };
    let secret_names = claimed(ServiceType::Pppoe);
    let queue_names = claimed(ServiceType::Static);

    let ghosts = inventory
        .secrets
        .iter()
        .filter(|s| !secret_names.contains(s.name.as_str()))
        .map(|s| Ghost {
            kind: GhostKind::Secret,
            name: s.name.clone(),
        })
        .chain(
            inventory
                .queues
                .iter()
                .filter(|q| !queue_names.contains(q.name.as_str()))
                .map(|q| Ghost {
                    kind: GhostKind::Queue,
                    name: q.name.clone(),
                }),
        )
        .collect();

    RouterDiff {
        corrections,
        ghosts,
    }
}

fn assess(
    subscriber: &Subscriber,
    packages: &HashMap<PackageId, Package>,
    inventory: &RouterInventory,
) -> Option<Correction> {
    let id = subscriber.id.clone();

    // (disabled on router, matches the current package)
    let observed = match subscriber.service_type {
        ServiceType::Pppoe => inventory.secret(&subscriber.username).map(|secret| {
            let matches = |p: &Package| secret.profile == p.ppp_profile;
            (secret.disabled, packages.get(&subscriber.package_id).map(matches))
        }),
        ServiceType::Static => inventory.queue(&subscriber.username).map(|queue| {
            let matches = |p: &Package| RateLimit::same(&queue.max_limit, &p.rate_limit);
            (queue.disabled, packages.get(&subscriber.package_id).map(matches))
        }),
    };

    let Some((disabled, package_matches)) = observed else {
        return Some(Correction::Enqueue(SyncJob::Add { subscriber_id: id }));
    };

    if subscriber.is_suspended && !disabled {
        return Some(Correction::Enqueue(SyncJob::Disconnect {
            subscriber_id: id,
            reason: DisconnectReason::Reconcile,
            manual: None,
        }));
    }
    if !subscriber.is_suspended && disabled && !subscriber.is_manually_disconnected {
        return Some(Correction::Enqueue(SyncJob::Connect { subscriber_id: id }));
    }
    if subscriber.pending_package_id.is_some() {
        return Some(Correction::Enqueue(SyncJob::Update { subscriber_id: id }));
    }
    if !subscriber.is_suspended {
        match package_matches {
            None => {
                return Some(Correction::MarkError(format!(
                    "package {} does not exist",
                    subscriber.package_id
                )))
            }
            Some(false) => {
                return Some(Correction::Enqueue(SyncJob::Update { subscriber_id: id }))
            }
            Some(true) => {}
        }
    }

    if subscriber.sync_status != SyncStatus::Synced || !subscriber.provisioned {
        return Some(Correction::MarkSynced);
    }
    None
}

/// Reconcile every router of one tenant
#[instrument(skip(state), fields(tenant = %tenant))]
pub async fn reconcile_tenant(state: &ControllerState, tenant: &TenantId) -> Result<ReconcileReport> {
    let subscribers = state.store.list_subscribers(tenant).await?;
    let catalog = async {
        let routers = state.store.list_routers(tenant).await?;
        let packages = state.store.list_packages(tenant).await?;
        Ok::<_, Error>((routers, packages))
    }
    .await;

    let (routers, packages) = match catalog {
        Ok(catalog) => catalog,
        Err(e) => {
            warn!("Cannot enumerate routers/packages for {}: {}", tenant, e);
            for subscriber in &subscribers {
                mark_error(state, subscriber, &e.to_string()).await?;
            }
            return Err(e);
        }
    };
    let packages: HashMap<PackageId, Package> =
        packages.into_iter().map(|p| (p.id.clone(), p)).collect();

    let mut by_router: BTreeMap<RouterId, Vec<Subscriber>> = routers
        .iter()
        .map(|r| (r.id.clone(), Vec::new()))
        .collect();
    let mut unresolved = Vec::new();
    for subscriber in subscribers {
        match by_router.get_mut(&subscriber.router_id) {
            Some(list) => list.push(subscriber),
            None => {
                let message = format!(
                    "Inconsistent desired state: router {} does not exist",
                    subscriber.router_id
                );
                mark_error(state, &subscriber, &message).await?;
                unresolved.push(subscriber.id.clone());
            }
        }
    }

    let mut report = ReconcileReport {
        tenant_id: tenant.clone(),
        routers: Vec::with_capacity(routers.len()),
        unresolved,
    };
    for router in &routers {
        let subscribers = by_router.remove(&router.id).unwrap_or_default();
        let router_report = reconcile_router(state, tenant, router, &subscribers, &packages).await?;
        report.routers.push(router_report);
    }

    info!(
        "Reconciled tenant {}: {} routers, {} jobs, {} ghosts, {} unreachable",
        tenant,
        report.routers.len(),
        report.jobs_emitted(),
        report.ghost_count(),
        report.unreachable_routers().len()
    );
    Ok(report)
}

async fn read_inventory(state: &ControllerState, router: &Router) -> Result<RouterInventory> {
    let session = state.gateway.open(router).await?;
    let inventory = async {
        let secrets = session.list_secrets().await?;
        let queues = session.list_queues().await?;
        Ok(RouterInventory { secrets, queues })
    }
    .await;
    session.close().await;
    inventory
}

#[instrument(skip(state, subscribers, packages), fields(router = %router.id))]
async fn reconcile_router(
    state: &ControllerState,
    tenant: &TenantId,
    router: &Router,
    subscribers: &[Subscriber],
    packages: &HashMap<PackageId, Package>,
) -> Result<RouterReport> {
    let mut report = RouterReport::new(router.id.clone());

    let inventory = match read_inventory(state, router).await {
        Ok(inventory) => inventory,
        Err(e) => {
            warn!("Router {} unreachable during reconcile: {}", router.id, e);
            #[cfg(feature = "metrics")]
            super::metrics::inc_router_unreachable(tenant.as_str(), router.id.as_str());
            report.reachable = false;
            let message = e.to_string();
            for subscriber in subscribers {
                if mark_error(state, subscriber, &message).await? {
                    report.marked_error += 1;
                }
            }
            return Ok(report);
        }
    };

    let diff = diff_router(subscribers, packages, &inventory);
    let by_id: HashMap<&SubscriberId, &Subscriber> =
        subscribers.iter().map(|s| (&s.id, s)).collect();

    for (id, correction) in diff.corrections {
        let Some(snapshot) = by_id.get(&id).copied() else {
            continue;
        };
        match correction {
            Correction::Enqueue(job) => {
                if !write_if_unchanged(state, snapshot, snapshot.pending()).await? {
                    continue;
                }
                debug!("Drift on {}: queueing {}", snapshot.username, job.job_type());
                #[cfg(feature = "metrics")]
                super::metrics::inc_drift_correction(tenant.as_str(), job.job_type());
                state.queue.push(job).await?;
                report.jobs_emitted += 1;
            }
            Correction::MarkSynced => {
                let next = Subscriber {
                    provisioned: true,
                    ..snapshot.synced()
                };
                if write_if_unchanged(state, snapshot, next).await? {
                    #[cfg(feature = "metrics")]
                    super::metrics::inc_drift_correction(tenant.as_str(), "marked-synced");
                    report.marked_synced += 1;
                }
            }
            Correction::MarkError(message) => {
                let message = format!("Inconsistent desired state: {message}");
                if mark_error(state, snapshot, &message).await? {
                    report.marked_error += 1;
                }
            }
        }
    }

    for ghost in &diff.ghosts {
        warn!(
            "Ghost {:?} '{}' on router {} has no subscriber record",
            ghost.kind, ghost.name, router.id
        );
    }
    #[cfg(feature = "metrics")]
    super::metrics::set_ghost_objects(tenant.as_str(), router.id.as_str(), diff.ghosts.len() as i64);
    #[cfg(not(feature = "metrics"))]
    let _ = tenant;

    report.ghosts = diff.ghosts;
    Ok(report)
}

async fn mark_error(state: &ControllerState, subscriber: &Subscriber, message: &str) -> Result<bool> {
    write_if_unchanged(state, subscriber, subscriber.errored(message)).await
}

/// Write `next` unless the record changed since the snapshot was read
///
/// A job handler may have updated the subscriber while the routers were
/// being read; that newer write wins.
async fn write_if_unchanged(
    state: &ControllerState,
    snapshot: &Subscriber,
    next: Subscriber,
) -> Result<bool> {
    let written = state.store.replace_subscriber(snapshot, &next).await?;
    if !written {
        debug!("Subscriber {} changed during reconcile, skipping", snapshot.id);
    }
    Ok(written)
}
