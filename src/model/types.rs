//! Shared types for subscriber desired state
//!
//! # Type Hierarchy
//!
//! - [`Tenant`] - an ISP account; owns routers, packages and subscribers
//! - [`Router`] - one MikroTik device in a tenant's fleet
//! - [`Package`] - a billing plan, mapped to a PPP profile or a queue rate limit
//! - [`Subscriber`] - one service account and its [`SyncStatus`]

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

macro_rules! id_type {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(pub String);

        impl $name {
            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl std::fmt::Display for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                f.write_str(&self.0)
            }
        }

        impl From<&str> for $name {
            fn from(value: &str) -> Self {
                Self(value.to_string())
            }
        }

        impl From<String> for $name {
            fn from(value: String) -> Self {
                Self(value)
            }
        }
    };
}

id_type!(
    /// Identifier of a subscriber record
    SubscriberId
);
id_type!(
    /// Identifier of a tenant
    TenantId
);
id_type!(
    /// Identifier of a router
    RouterId
);
id_type!(
    /// Identifier of a billing package
    PackageId
);

/// How a subscriber is authorized on the router
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ServiceType {
    /// PPPoE dial-in, backed by a PPP secret
    #[default]
    Pppoe,
    /// Static IP, backed by a simple queue targeting the address
    Static,
}

impl std::fmt::Display for ServiceType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ServiceType::Pppoe => write!(f, "pppoe"),
            ServiceType::Static => write!(f, "static"),
        }
    }
}

impl std::str::FromStr for ServiceType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pppoe" => Ok(ServiceType::Pppoe),
            "static" => Ok(ServiceType::Static),
            other => Err(format!("unknown service type '{other}'")),
        }
    }
}

/// Whether hardware reflects the record
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SyncStatus {
    #[default]
    Pending,
    Synced,
    Error,
}

impl std::fmt::Display for SyncStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SyncStatus::Pending => write!(f, "pending"),
            SyncStatus::Synced => write!(f, "synced"),
            SyncStatus::Error => write!(f, "error"),
        }
    }
}

impl std::str::FromStr for SyncStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(SyncStatus::Pending),
            "synced" => Ok(SyncStatus::Synced),
            "error" => Ok(SyncStatus::Error),
            other => Err(format!("unknown sync status '{other}'")),
        }
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TenantStatus {
    #[default]
    Active,
    Suspended,
}

impl std::fmt::Display for TenantStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TenantStatus::Active => write!(f, "active"),
            TenantStatus::Suspended => write!(f, "suspended"),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Tenant {
    pub id: TenantId,
    pub name: String,
    pub status: TenantStatus,
}

/// A MikroTik router reachable over the RouterOS REST API
///
/// Credentials are read-only here; rotation is owned elsewhere.
#[derive(Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Router {
    pub id: RouterId,
    pub tenant_id: TenantId,
    pub name: String,
    /// Base URL of the management API, e.g. `https://10.0.0.1`
    pub endpoint: String,
    pub username: String,
    pub password: String,
}

// Keep the password out of logs.
impl std::fmt::Debug for Router {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Router")
            .field("id", &self.id)
            .field("tenant_id", &self.tenant_id)
            .field("name", &self.name)
            .field("endpoint", &self.endpoint)
            .field("username", &self.username)
            .finish_non_exhaustive()
    }
}

/// A billing plan
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Package {
    pub id: PackageId,
    pub tenant_id: TenantId,
    pub name: String,
    /// PPP profile applied to PPPoE subscribers
    pub ppp_profile: String,
    /// Queue `max-limit` applied to static subscribers, `upload/download`
    pub rate_limit: String,
}

/// One subscriber's desired service configuration
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Subscriber {
    pub id: SubscriberId,
    pub tenant_id: TenantId,
    pub router_id: RouterId,
    /// Unique per tenant; the name of the object on the router
    pub username: String,
    pub service_type: ServiceType,
    /// PPPoE password
    #[serde(default)]
    pub password: Option<String>,
    /// Address targeted by the simple queue of a static subscriber
    #[serde(default)]
    pub static_ip: Option<String>,
    pub package_id: PackageId,
    /// Package change not yet applied to hardware
    #[serde(default)]
    pub pending_package_id: Option<PackageId>,
    #[serde(default)]
    pub is_suspended: bool,
    /// Operator override; automatic reconnection never clears it
    #[serde(default)]
    pub is_manually_disconnected: bool,
    #[serde(default)]
    pub provisioned: bool,
    #[serde(default)]
    pub sync_status: SyncStatus,
    #[serde(default)]
    pub sync_error_message: Option<String>,
    #[serde(default)]
    pub expires_at: Option<DateTime<Utc>>,
}

impl Subscriber {
    /// Copy of this record waiting for a hardware job
    pub fn pending(&self) -> Self {
        Self {
            sync_status: SyncStatus::Pending,
            sync_error_message: None,
            ..self.clone()
        }
    }

    /// Copy of this record confirmed on hardware
    pub fn synced(&self) -> Self {
        Self {
            sync_status: SyncStatus::Synced,
            sync_error_message: None,
            ..self.clone()
        }
    }

    /// Copy of this record with a sync failure recorded verbatim
    pub fn errored(&self, message: impl Into<String>) -> Self {
        Self {
            sync_status: SyncStatus::Error,
            sync_error_message: Some(message.into()),
            ..self.clone()
        }
    }

    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expires_at.map(|at| at <= now).unwrap_or(false)
    }

    /// Package that should be on hardware once the next update applies
    pub fn target_package_id(&self) -> &PackageId {
        self.pending_package_id.as_ref().unwrap_or(&self.package_id)
    }

    /// Checks the manual-disconnect invariant
    pub fn validate(&self) -> Result<(), String> {
        if self.is_manually_disconnected && !self.is_suspended {
            return Err(format!(
                "subscriber {} is manually disconnected but not suspended",
                self.id
            ));
        }
        if self.username.trim().is_empty() {
            return Err(format!("subscriber {} has an empty username", self.id));
        }
        match self.service_type {
            ServiceType::Static if self.static_ip.is_none() => Err(format!(
                "static subscriber {} has no IP address",
                self.id
            )),
            _ => Ok(()),
        }
    }
}
