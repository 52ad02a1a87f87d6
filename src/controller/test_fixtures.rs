//! Shared fixtures for controller tests: one tenant, two routers, two packages,
//! all backed by the in-memory store, queue and router fleet.

use std::sync::Arc;

use super::handler::{ControllerState, SyncSettings};
use super::worker::{SyncWorker, WorkerConfig};
use crate::gateway::{MemoryGateway, PppSecret, SimpleQueue};
use crate::model::{
    Package, Router, RouterId, ServiceType, Subscriber, SubscriberId, SyncStatus, Tenant,
    TenantStatus,
};
use crate::queue::{MemoryQueue, RetryPolicy};
use crate::store::{MemoryStore, SubscriberStore};

pub struct Harness {
    pub store: Arc<MemoryStore>,
    pub gateway: MemoryGateway,
    pub queue: Arc<MemoryQueue>,
    pub state: Arc<ControllerState>,
}

impl Harness {
    pub async fn new() -> Self {
        let store = Arc::new(MemoryStore::new());
        let gateway = MemoryGateway::new();
        let queue = Arc::new(MemoryQueue::new(RetryPolicy::default()));

        store
            .insert_tenant(Tenant {
                id: "t1".into(),
                name: "Acme ISP".to_string(),
                status: TenantStatus::Active,
            })
            .await;
        for id in ["r1", "r2"] {
            store.insert_router(router(id)).await;
        }
        store
            .insert_package(package("basic", "10mbps", "10M/10M"))
            .await;
        store
            .insert_package(package("premium", "50mbps", "50M/50M"))
            .await;

        let state = Arc::new(ControllerState::new(
            store.clone(),
            Arc::new(gateway.clone()),
            queue.clone(),
            SyncSettings::default(),
        ));

        Self {
            store,
            gateway,
            queue,
            state,
        }
    }

    pub fn worker(&self) -> SyncWorker {
        SyncWorker::new(
            Arc::clone(&self.state),
            WorkerConfig {
                worker_id: "test-worker".to_string(),
                concurrency: 2,
                ..Default::default()
            },
        )
    }

    pub async fn subscriber(&self, id: &str) -> Subscriber {
        let id: SubscriberId = id.into();
        self.store
            .get_subscriber(&id)
            .await
            .unwrap()
            .unwrap_or_else(|| panic!("subscriber {id} missing"))
    }

    /// Put a secret on the router matching what `add` would create
    pub async fn provision_secret(&self, sub: &Subscriber, profile: &str, disabled: bool) {
        self.gateway
            .insert_secret(
                &sub.router_id,
                PppSecret {
                    name: sub.username.clone(),
                    password: sub.password.clone(),
                    profile: profile.to_string(),
                    service: "pppoe".to_string(),
                    disabled,
                    ..Default::default()
                },
            )
            .await;
    }

    pub async fn provision_queue(&self, sub: &Subscriber, max_limit: &str, disabled: bool) {
        self.gateway
            .insert_queue(
                &sub.router_id,
                SimpleQueue {
                    name: sub.username.clone(),
                    target: format!("{}/32", sub.static_ip.clone().unwrap_or_default()),
                    max_limit: max_limit.to_string(),
                    disabled,
                    ..Default::default()
                },
            )
            .await;
    }
}

pub fn router(id: &str) -> Router {
    Router {
        id: id.into(),
        tenant_id: "t1".into(),
        name: format!("{id}-core"),
        endpoint: format!("https://{id}.example.net"),
        username: "api".to_string(),
        password: "api-pass".to_string(),
    }
}

pub fn package(id: &str, profile: &str, limit: &str) -> Package {
    Package {
        id: id.into(),
        tenant_id: "t1".into(),
        name: id.to_string(),
        ppp_profile: profile.to_string(),
        rate_limit: limit.to_string(),
    }
}

pub fn pppoe(id: &str) -> Subscriber {
    Subscriber {
        id: id.into(),
        tenant_id: "t1".into(),
        router_id: "r1".into(),
        username: id.to_string(),
        service_type: ServiceType::Pppoe,
        password: Some(format!("{id}-pw")),
        static_ip: None,
        package_id: "basic".into(),
        pending_package_id: None,
        is_suspended: false,
        is_manually_disconnected: false,
        provisioned: true,
        sync_status: SyncStatus::Synced,
        sync_error_message: None,
        expires_at: None,
    }
}

pub fn static_ip(id: &str, ip: &str) -> Subscriber {
    Subscriber {
        service_type: ServiceType::Static,
        password: None,
        static_ip: Some(ip.to_string()),
        ..pppoe(id)
    }
}

pub fn r(id: &str) -> RouterId {
    id.into()
}
