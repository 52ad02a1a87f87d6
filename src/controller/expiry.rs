//! Expiry sweep
//!
//! Suspends subscribers whose service period ran out. The sweep only writes
//! desired state and queues `disconnect` jobs; it never talks to a router.

use chrono::{DateTime, Utc};
use futures::StreamExt;
use tracing::{debug, info, instrument};

use super::handler::ControllerState;
use crate::error::Result;
use crate::model::{Subscriber, TenantId};
use crate::queue::{DisconnectReason, SyncJob};

/// Suspend every expired subscriber of `tenant`, returning how many were queued
#[instrument(skip(state), fields(tenant = %tenant))]
pub async fn sweep_tenant(
    state: &ControllerState,
    tenant: &TenantId,
    now: DateTime<Utc>,
) -> Result<usize> {
    let mut expired = state.store.stream_expired(tenant, now);
    let mut suspended = 0;

    while let Some(subscriber) = expired.next().await {
        let subscriber = subscriber?;
        let next = Subscriber {
            is_suspended: true,
            ..subscriber.pending()
        };
        if !state.store.replace_subscriber(&subscriber, &next).await? {
            // Renewed or edited since it was read; the next sweep decides again.
            debug!("Subscriber {} changed during expiry sweep, skipping", subscriber.id);
            continue;
        }
        state
            .queue
            .push(SyncJob::Disconnect {
                subscriber_id: subscriber.id.clone(),
                reason: DisconnectReason::Expired,
                manual: None,
            })
            .await?;
        suspended += 1;
    }

    if suspended > 0 {
        info!("Suspended {} expired subscribers of {}", suspended, tenant);
    }
    Ok(suspended)
}
