//! Hardware-impacting edits made on behalf of collaborators
//!
//! Every intent follows the same contract: write the record with
//! `syncStatus = pending`, then enqueue exactly one job. The job does the
//! hardware work; nothing here opens a router session. Records are written
//! with a conditional replace, so an edit never overwrites a job's result
//! that landed in between.

use chrono::{DateTime, Utc};
use tracing::{debug, info};

use crate::error::{Error, Result};
use crate::model::{PackageId, Subscriber, SubscriberId, SyncStatus};
use crate::queue::{DisconnectReason, JobId, SyncJob, SyncQueue};
use crate::store::{SubscriberStore, MAX_WRITE_ATTEMPTS};

/// What a subscription renewal did
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RenewalOutcome {
    /// Subscriber was active; only the expiry moved
    Extended,
    /// Suspension lifted; a `connect` job was queued
    Reconnecting(JobId),
    /// Operator disconnect stays in force; only the expiry moved
    HeldByOperator,
}

async fn load(store: &dyn SubscriberStore, id: &SubscriberId) -> Result<Subscriber> {
    store
        .get_subscriber(id)
        .await?
        .ok_or_else(|| Error::NotFound(format!("subscriber {id}")))
}

/// Read, edit and conditionally write one record, re-reading on a lost race
async fn modify<T, F>(store: &dyn SubscriberStore, id: &SubscriberId, edit: F) -> Result<T>
where
    F: Fn(&Subscriber) -> Result<(Subscriber, T)>,
{
    for _ in 0..MAX_WRITE_ATTEMPTS {
        let current = load(store, id).await?;
        let (next, value) = edit(&current)?;
        if store.replace_subscriber(&current, &next).await? {
            return Ok(value);
        }
        debug!("Subscriber {} changed before the edit landed, retrying", id);
    }
    Err(Error::ConcurrentUpdate(format!("subscriber {id}")))
}

async fn push(queue: &dyn SyncQueue, id: &SubscriberId, job: SyncJob) -> Result<JobId> {
    let job_type = job.job_type();
    let job_id = queue.push(job).await?;
    info!("Queued {} job {} for subscriber {}", job_type, job_id, id);
    Ok(job_id)
}

/// Mark the record pending with `edit` applied, then queue `job`
async fn submit<F>(
    store: &dyn SubscriberStore,
    queue: &dyn SyncQueue,
    id: &SubscriberId,
    job: SyncJob,
    edit: F,
) -> Result<JobId>
where
    F: Fn(&Subscriber) -> Result<Subscriber>,
{
    modify(store, id, |current| Ok((edit(current)?.pending(), ()))).await?;
    push(queue, id, job).await
}

/// Create a subscriber record and provision it on its router
///
/// An id or tenant username that is already taken is rejected; re-sending a
/// provision request never resets an existing subscriber.
pub async fn provision(
    store: &dyn SubscriberStore,
    queue: &dyn SyncQueue,
    subscriber: Subscriber,
) -> Result<JobId> {
    subscriber.validate().map_err(Error::Inconsistent)?;
    match store.get_package(&subscriber.package_id).await? {
        Some(package) if package.tenant_id == subscriber.tenant_id => {}
        Some(_) => {
            return Err(Error::Inconsistent(format!(
                "package {} belongs to another tenant",
                subscriber.package_id
            )))
        }
        None => {
            return Err(Error::Inconsistent(format!(
                "package {} does not exist",
                subscriber.package_id
            )))
        }
    }
    match store.get_router(&subscriber.router_id).await? {
        Some(router) if router.tenant_id == subscriber.tenant_id => {}
        Some(_) => {
            return Err(Error::Inconsistent(format!(
                "router {} belongs to another tenant",
                subscriber.router_id
            )))
        }
        None => {
            return Err(Error::Inconsistent(format!(
                "router {} does not exist",
                subscriber.router_id
            )))
        }
    }

    let record = Subscriber {
        provisioned: false,
        sync_status: SyncStatus::Pending,
        sync_error_message: None,
        ..subscriber
    };
    store.create_subscriber(&record).await?;
    push(
        queue,
        &record.id,
        SyncJob::Add {
            subscriber_id: record.id.clone(),
        },
    )
    .await
}

/// Stage a package change; it reaches hardware with the `update` job
pub async fn change_package(
    store: &dyn SubscriberStore,
    queue: &dyn SyncQueue,
    id: &SubscriberId,
    package_id: PackageId,
) -> Result<JobId> {
    let subscriber = load(store, id).await?;
    match store.get_package(&package_id).await? {
        Some(package) if package.tenant_id == subscriber.tenant_id => {}
        _ => {
            return Err(Error::Inconsistent(format!(
                "package {package_id} does not exist for tenant {}",
                subscriber.tenant_id
            )))
        }
    }
    let job = SyncJob::Update {
        subscriber_id: id.clone(),
    };
    submit(store, queue, id, job, |current| {
        Ok(Subscriber {
            pending_package_id: Some(package_id.clone()),
            ..current.clone()
        })
    })
    .await
}

/// Operator-initiated disconnect; survives renewals until an operator connect
///
/// Both flags are written before the job is queued, so a disconnect job that
/// fails is still repaired by the next reconciliation.
pub async fn operator_disconnect(
    store: &dyn SubscriberStore,
    queue: &dyn SyncQueue,
    id: &SubscriberId,
) -> Result<JobId> {
    let job = SyncJob::Disconnect {
        subscriber_id: id.clone(),
        reason: DisconnectReason::Operator,
        manual: Some(true),
    };
    submit(store, queue, id, job, |current| {
        Ok(Subscriber {
            is_suspended: true,
            is_manually_disconnected: true,
            ..current.clone()
        })
    })
    .await
}

/// Operator-initiated reconnect; clears both suspension flags
pub async fn operator_connect(
    store: &dyn SubscriberStore,
    queue: &dyn SyncQueue,
    id: &SubscriberId,
) -> Result<JobId> {
    let job = SyncJob::Connect {
        subscriber_id: id.clone(),
    };
    submit(store, queue, id, job, |current| {
        Ok(Subscriber {
            is_suspended: false,
            is_manually_disconnected: false,
            ..current.clone()
        })
    })
    .await
}

/// Payment renewal: extend the expiry and lift an automatic suspension
pub async fn renew_subscription(
    store: &dyn SubscriberStore,
    queue: &dyn SyncQueue,
    id: &SubscriberId,
    expires_at: DateTime<Utc>,
) -> Result<RenewalOutcome> {
    // `None` means the suspension was lifted and a connect is due
    let settled = modify(store, id, |current| {
        let extended = Subscriber {
            expires_at: Some(expires_at),
            ..current.clone()
        };
        Ok(if extended.is_manually_disconnected {
            (extended, Some(RenewalOutcome::HeldByOperator))
        } else if !extended.is_suspended {
            (extended, Some(RenewalOutcome::Extended))
        } else {
            let reconnected = Subscriber {
                is_suspended: false,
                ..extended
            };
            (reconnected.pending(), None)
        })
    })
    .await?;

    match settled {
        Some(RenewalOutcome::HeldByOperator) => {
            info!("Renewal for {} held by operator disconnect", id);
            Ok(RenewalOutcome::HeldByOperator)
        }
        Some(outcome) => Ok(outcome),
        None => {
            let job = SyncJob::Connect {
                subscriber_id: id.clone(),
            };
            Ok(RenewalOutcome::Reconnecting(push(queue, id, job).await?))
        }
    }
}

/// Delete the subscriber from its router, then from the store
pub async fn deprovision(
    store: &dyn SubscriberStore,
    queue: &dyn SyncQueue,
    id: &SubscriberId,
) -> Result<JobId> {
    let job = SyncJob::Remove {
        subscriber_id: id.clone(),
    };
    submit(store, queue, id, job, |current| Ok(current.clone())).await
}

/// Re-assert desired state for one subscriber, e.g. after an `error`
pub async fn request_sync(
    store: &dyn SubscriberStore,
    queue: &dyn SyncQueue,
    id: &SubscriberId,
) -> Result<JobId> {
    let subscriber = load(store, id).await?;
    let job = if !subscriber.provisioned {
        SyncJob::Add {
            subscriber_id: id.clone(),
        }
    } else if subscriber.is_suspended {
        SyncJob::Disconnect {
            subscriber_id: id.clone(),
            reason: DisconnectReason::Reconcile,
            manual: None,
        }
    } else {
        SyncJob::Update {
            subscriber_id: id.clone(),
        }
    };
    submit(store, queue, id, job, |current| Ok(current.clone())).await
}
