//! Request and response bodies of the REST API

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::controller::intents::RenewalOutcome;
use crate::model::{
    PackageId, RouterId, ServiceType, Subscriber, SubscriberId, SyncStatus, TenantId,
};
use crate::queue::JobId;

#[derive(Debug, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub error: String,
    pub message: String,
}

impl ErrorResponse {
    pub fn new(error: &str, message: &str) -> Self {
        Self {
            error: error.to_string(),
            message: message.to_string(),
        }
    }
}

/// Returned by every endpoint that queues hardware work
#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JobAccepted {
    pub job_id: JobId,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProvisionRequest {
    pub id: SubscriberId,
    pub tenant_id: TenantId,
    pub router_id: RouterId,
    pub username: String,
    pub service_type: ServiceType,
    #[serde(default)]
    pub password: Option<String>,
    #[serde(default)]
    pub static_ip: Option<String>,
    pub package_id: PackageId,
    #[serde(default)]
    pub expires_at: Option<DateTime<Utc>>,
}

impl From<ProvisionRequest> for Subscriber {
    fn from(req: ProvisionRequest) -> Self {
        Subscriber {
            id: req.id,
            tenant_id: req.tenant_id,
            router_id: req.router_id,
            username: req.username,
            service_type: req.service_type,
            password: req.password,
            static_ip: req.static_ip,
            package_id: req.package_id,
            pending_package_id: None,
            is_suspended: false,
            is_manually_disconnected: false,
            provisioned: false,
            sync_status: SyncStatus::Pending,
            sync_error_message: None,
            expires_at: req.expires_at,
        }
    }
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChangePackageRequest {
    pub package_id: PackageId,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RenewRequest {
    pub expires_at: DateTime<Utc>,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RenewResponse {
    /// `extended`, `reconnecting` or `held_by_operator`
    pub outcome: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub job_id: Option<JobId>,
}

impl From<RenewalOutcome> for RenewResponse {
    fn from(outcome: RenewalOutcome) -> Self {
        let (outcome, job_id) = match outcome {
            RenewalOutcome::Extended => ("extended", None),
            RenewalOutcome::Reconnecting(job) => ("reconnecting", Some(job)),
            RenewalOutcome::HeldByOperator => ("held_by_operator", None),
        };
        Self {
            outcome: outcome.to_string(),
            job_id,
        }
    }
}

/// Sync state of one subscriber as seen by admin screens
#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SubscriberStatusResponse {
    pub id: SubscriberId,
    pub username: String,
    pub router_id: RouterId,
    pub package_id: PackageId,
    pub pending_package_id: Option<PackageId>,
    pub is_suspended: bool,
    pub is_manually_disconnected: bool,
    pub provisioned: bool,
    pub sync_status: SyncStatus,
    pub sync_error_message: Option<String>,
    pub expires_at: Option<DateTime<Utc>>,
}

impl From<Subscriber> for SubscriberStatusResponse {
    fn from(s: Subscriber) -> Self {
        Self {
            id: s.id,
            username: s.username,
            router_id: s.router_id,
            package_id: s.package_id,
            pending_package_id: s.pending_package_id,
            is_suspended: s.is_suspended,
            is_manually_disconnected: s.is_manually_disconnected,
            provisioned: s.provisioned,
            sync_status: s.sync_status,
            sync_error_message: s.sync_error_message,
            expires_at: s.expires_at,
        }
    }
}
