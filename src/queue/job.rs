//! Sync job definitions
//!
//! Jobs carry identifiers only. Handlers re-read desired state when they run,
//! so a job replayed after a restart acts on current data, not on a snapshot
//! taken when it was enqueued.

use serde::{Deserialize, Serialize};

use crate::model::{SubscriberId, TenantId};

/// Why a subscriber is being disconnected; written into the router comment
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DisconnectReason {
    /// Service period ran out
    Expired,
    /// Operator action from the admin side
    Operator,
    /// Reconciler found the router enabled for a suspended subscriber
    Reconcile,
}

impl std::fmt::Display for DisconnectReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DisconnectReason::Expired => write!(f, "expired"),
            DisconnectReason::Operator => write!(f, "operator"),
            DisconnectReason::Reconcile => write!(f, "reconcile"),
        }
    }
}

/// One unit of work for the sync worker
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(
    tag = "type",
    rename_all = "kebab-case",
    rename_all_fields = "camelCase"
)]
pub enum SyncJob {
    Add {
        subscriber_id: SubscriberId,
    },
    Update {
        subscriber_id: SubscriberId,
    },
    Disconnect {
        subscriber_id: SubscriberId,
        reason: DisconnectReason,
        /// Operator override flag; `None` keeps the subscriber's current value
        #[serde(default, skip_serializing_if = "Option::is_none")]
        manual: Option<bool>,
    },
    Connect {
        subscriber_id: SubscriberId,
    },
    Remove {
        subscriber_id: SubscriberId,
    },
    #[serde(rename = "expire-sweep-for-tenant")]
    ExpireSweep {
        tenant_id: TenantId,
    },
    #[serde(rename = "reconcile-for-tenant")]
    Reconcile {
        tenant_id: TenantId,
    },
    /// Scheduler tick: fan out one expiry sweep per active tenant
    ExpireSweepTrigger,
    /// Scheduler tick: fan out one reconciliation per active tenant
    ReconcileTrigger,
}

impl SyncJob {
    /// Stable job type name, matching the serialized `type` tag
    pub fn job_type(&self) -> &'static str {
        match self {
            SyncJob::Add { .. } => "add",
            SyncJob::Update { .. } => "update",
            SyncJob::Disconnect { .. } => "disconnect",
            SyncJob::Connect { .. } => "connect",
            SyncJob::Remove { .. } => "remove",
            SyncJob::ExpireSweep { .. } => "expire-sweep-for-tenant",
            SyncJob::Reconcile { .. } => "reconcile-for-tenant",
            SyncJob::ExpireSweepTrigger => "expire-sweep-trigger",
            SyncJob::ReconcileTrigger => "reconcile-trigger",
        }
    }

    pub fn subscriber_id(&self) -> Option<&SubscriberId> {
        match self {
            SyncJob::Add { subscriber_id }
            | SyncJob::Update { subscriber_id }
            | SyncJob::Disconnect { subscriber_id, .. }
            | SyncJob::Connect { subscriber_id }
            | SyncJob::Remove { subscriber_id } => Some(subscriber_id),
            SyncJob::ExpireSweep { .. }
            | SyncJob::Reconcile { .. }
            | SyncJob::ExpireSweepTrigger
            | SyncJob::ReconcileTrigger => None,
        }
    }

    pub fn tenant_id(&self) -> Option<&TenantId> {
        match self {
            SyncJob::ExpireSweep { tenant_id } | SyncJob::Reconcile { tenant_id } => {
                Some(tenant_id)
            }
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_disconnect_payload_shape() {
        let job = SyncJob::Disconnect {
            subscriber_id: "s1".into(),
            reason: DisconnectReason::Expired,
            manual: None,
        };
        let value = serde_json::to_value(&job).unwrap();
        assert_eq!(
            value,
            json!({"type": "disconnect", "subscriberId": "s1", "reason": "expired"})
        );
        assert_eq!(job.job_type(), "disconnect");
    }

    #[test]
    fn test_tenant_job_payload_shape() {
        let job = SyncJob::Reconcile {
            tenant_id: "t1".into(),
        };
        let value = serde_json::to_value(&job).unwrap();
        assert_eq!(
            value,
            json!({"type": "reconcile-for-tenant", "tenantId": "t1"})
        );
        assert_eq!(value["type"], job.job_type());
        assert_eq!(job.tenant_id().map(|t| t.as_str()), Some("t1"));
        assert!(job.subscriber_id().is_none());
    }

    #[test]
    fn test_trigger_payload_has_no_ids() {
        let value = serde_json::to_value(SyncJob::ExpireSweepTrigger).unwrap();
        assert_eq!(value, json!({"type": "expire-sweep-trigger"}));
    }

    #[test]
    fn test_unknown_job_type_is_rejected() {
        let parsed: Result<SyncJob, _> =
            serde_json::from_value(json!({"type": "toggle", "subscriberId": "s1"}));
        assert!(parsed.is_err());
    }

    #[test]
    fn test_manual_flag_parses_when_present() {
        let job: SyncJob = serde_json::from_value(json!({
            "type": "disconnect",
            "subscriberId": "s1",
            "reason": "operator",
            "manual": true
        }))
        .unwrap();
        assert_eq!(
            job,
            SyncJob::Disconnect {
                subscriber_id: "s1".into(),
                reason: DisconnectReason::Operator,
                manual: Some(true),
            }
        );
    }
}
