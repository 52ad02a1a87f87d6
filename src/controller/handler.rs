//! Sync job handling
//!
//! [`ControllerState::handle`] is the single entry point the worker pool calls
//! for every leased job. Subscriber jobs follow one protocol: re-read the
//! record, plan the transition, open one router session, apply, always close,
//! then write the resulting sync status. A failure is written to the record
//! verbatim and returned so queue policy decides on retry.

use std::sync::Arc;

use chrono::Utc;
use tracing::{debug, error, info, instrument, warn};

use super::executor;
use super::transitions::{self, NextState, Operation, PlanContext};
use super::{expiry, reconciler};
use crate::error::{Error, Result};
use crate::gateway::RouterGateway;
use crate::model::{Package, PackageId, Router, Subscriber, SubscriberId};
use crate::queue::{SyncJob, SyncQueue};
use crate::scheduler::{self, SweepKind};
use crate::store::{SubscriberStore, MAX_WRITE_ATTEMPTS};

/// Engine settings that shape router state
#[derive(Clone, Debug)]
pub struct SyncSettings {
    /// PPP profile assigned while a PPPoE subscriber is suspended
    pub disconnect_profile: String,
}

impl Default for SyncSettings {
    fn default() -> Self {
        Self {
            disconnect_profile: "disconnected".to_string(),
        }
    }
}

/// Shared dependencies of every job handler
pub struct ControllerState {
    pub store: Arc<dyn SubscriberStore>,
    pub gateway: Arc<dyn RouterGateway>,
    pub queue: Arc<dyn SyncQueue>,
    pub settings: SyncSettings,
}

impl ControllerState {
    pub fn new(
        store: Arc<dyn SubscriberStore>,
        gateway: Arc<dyn RouterGateway>,
        queue: Arc<dyn SyncQueue>,
        settings: SyncSettings,
    ) -> Self {
        Self {
            store,
            gateway,
            queue,
            settings,
        }
    }

    pub(crate) fn plan_context(&self) -> PlanContext {
        PlanContext {
            disconnect_profile: self.settings.disconnect_profile.clone(),
            now: Utc::now(),
        }
    }

    /// Run one job to completion
    #[instrument(skip(self, job), fields(job_type = job.job_type()))]
    pub async fn handle(&self, job: &SyncJob) -> Result<()> {
        match job {
            SyncJob::Add { subscriber_id } => {
                self.sync_subscriber(subscriber_id, Operation::Add).await
            }
            SyncJob::Update { subscriber_id } => {
                self.sync_subscriber(subscriber_id, Operation::Update).await
            }
            SyncJob::Disconnect {
                subscriber_id,
                reason,
                manual,
            } => {
                let operation = Operation::Disconnect {
                    reason: *reason,
                    manual: *manual,
                };
                self.sync_subscriber(subscriber_id, operation).await
            }
            SyncJob::Connect { subscriber_id } => {
                self.sync_subscriber(subscriber_id, Operation::Connect).await
            }
            SyncJob::Remove { subscriber_id } => {
                self.sync_subscriber(subscriber_id, Operation::Remove).await
            }
            SyncJob::ExpireSweep { tenant_id } => {
                let suspended = expiry::sweep_tenant(self, tenant_id, Utc::now()).await?;
                debug!("Expiry sweep for {} suspended {}", tenant_id, suspended);
                Ok(())
            }
            SyncJob::Reconcile { tenant_id } => {
                let report = reconciler::reconcile_tenant(self, tenant_id).await?;
                debug!("Reconcile report for {}: {:?}", tenant_id, report);
                Ok(())
            }
            SyncJob::ExpireSweepTrigger => {
                scheduler::fan_out(self.store.as_ref(), self.queue.as_ref(), SweepKind::Expire)
                    .await
                    .map(|_| ())
            }
            SyncJob::ReconcileTrigger => {
                scheduler::fan_out(self.store.as_ref(), self.queue.as_ref(), SweepKind::Reconcile)
                    .await
                    .map(|_| ())
            }
        }
    }

    #[instrument(skip(self), fields(subscriber = %id, operation = operation.name()))]
    async fn sync_subscriber(&self, id: &SubscriberId, operation: Operation) -> Result<()> {
        let Some(subscriber) = self.store.get_subscriber(id).await? else {
            if operation == Operation::Remove {
                info!("Subscriber {} already removed", id);
                return Ok(());
            }
            return Err(Error::NotFound(format!("subscriber {id}")));
        };

        match self.apply_operation(&subscriber, operation).await {
            Ok(NextState::Save(next)) => {
                self.commit(&subscriber, next).await?;
                info!(
                    "{} applied for subscriber {} ({})",
                    operation.name(),
                    id,
                    subscriber.username
                );
                Ok(())
            }
            Ok(NextState::Delete(id)) => {
                self.store.delete_subscriber(&id).await?;
                info!("Subscriber {} removed from router and store", id);
                Ok(())
            }
            Err(e) => {
                warn!("{} failed for subscriber {}: {}", operation.name(), id, e);
                if let Err(write_err) = self
                    .commit(&subscriber, subscriber.errored(e.to_string()))
                    .await
                {
                    error!("Failed to record sync error for {}: {}", id, write_err);
                }
                Err(e)
            }
        }
    }

    async fn apply_operation(
        &self,
        subscriber: &Subscriber,
        operation: Operation,
    ) -> Result<NextState> {
        let package = match operation.package_id(subscriber) {
            Some(package_id) => Some(self.package(subscriber, package_id).await?),
            None => None,
        };
        let transition =
            transitions::plan(operation, subscriber, package.as_ref(), &self.plan_context())?;

        if transition.commands.is_empty() {
            debug!("No hardware changes for subscriber {}", subscriber.id);
            return Ok(transition.next);
        }

        let router = self.router_of(subscriber).await?;
        let session = self.gateway.open(&router).await?;
        let applied = executor::apply(session.as_ref(), &transition.commands).await;
        session.close().await;
        applied?;

        Ok(transition.next)
    }

    /// Persist a job's result with a conditional write
    ///
    /// If the record changed after `snapshot` was read, the job's changes are
    /// merged into the newer record so the concurrent edit survives.
    async fn commit(&self, snapshot: &Subscriber, next: Subscriber) -> Result<()> {
        let mut expected = snapshot.clone();
        let mut desired = next.clone();
        for _ in 0..MAX_WRITE_ATTEMPTS {
            if self.store.replace_subscriber(&expected, &desired).await? {
                return Ok(());
            }
            let Some(current) = self.store.get_subscriber(&snapshot.id).await? else {
                info!("Subscriber {} was deleted while its job ran", snapshot.id);
                return Ok(());
            };
            debug!("Subscriber {} changed while its job ran, merging", snapshot.id);
            desired = transitions::merge_concurrent(snapshot, &next, &current);
            expected = current;
        }
        Err(Error::ConcurrentUpdate(format!("subscriber {}", snapshot.id)))
    }

    async fn package(&self, subscriber: &Subscriber, package_id: &PackageId) -> Result<Package> {
        self.store.get_package(package_id).await?.ok_or_else(|| {
            Error::Inconsistent(format!(
                "package {} of subscriber {} does not exist",
                package_id, subscriber.id
            ))
        })
    }

    async fn router_of(&self, subscriber: &Subscriber) -> Result<Router> {
        self.store
            .get_router(&subscriber.router_id)
            .await?
            .ok_or_else(|| {
                Error::Inconsistent(format!(
                    "router {} of subscriber {} does not exist",
                    subscriber.router_id, subscriber.id
                ))
            })
    }
}
