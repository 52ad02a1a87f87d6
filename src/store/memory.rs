//! In-memory desired-state store

use std::collections::BTreeMap;
use std::ops::Bound;
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures::stream::{self, BoxStream, StreamExt};
use tokio::sync::RwLock;

use super::SubscriberStore;
use crate::error::{Error, Result};
use crate::model::{
    Package, PackageId, Router, RouterId, Subscriber, SubscriberId, Tenant, TenantId,
    TenantStatus,
};

#[derive(Default)]
struct Records {
    tenants: BTreeMap<TenantId, Tenant>,
    routers: BTreeMap<RouterId, Router>,
    packages: BTreeMap<PackageId, Package>,
    subscribers: BTreeMap<SubscriberId, Subscriber>,
}

#[derive(Default)]
pub struct MemoryStore {
    records: RwLock<Records>,
    fail_tenant_listing: AtomicBool,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn insert_tenant(&self, tenant: Tenant) {
        self.records
            .write()
            .await
            .tenants
            .insert(tenant.id.clone(), tenant);
    }

    pub async fn insert_router(&self, router: Router) {
        self.records
            .write()
            .await
            .routers
            .insert(router.id.clone(), router);
    }

    pub async fn remove_router(&self, id: &RouterId) {
        self.records.write().await.routers.remove(id);
    }

    pub async fn insert_package(&self, package: Package) {
        self.records
            .write()
            .await
            .packages
            .insert(package.id.clone(), package);
    }

    pub async fn remove_package(&self, id: &PackageId) {
        self.records.write().await.packages.remove(id);
    }

    pub async fn insert_subscriber(&self, subscriber: Subscriber) {
        self.records
            .write()
            .await
            .subscribers
            .insert(subscriber.id.clone(), subscriber);
    }

    /// Make `list_active_tenants` fail, simulating a database outage
    pub fn fail_tenant_listing(&self, fail: bool) {
        self.fail_tenant_listing.store(fail, Ordering::SeqCst);
    }
}

#[async_trait]
impl SubscriberStore for MemoryStore {
    async fn get_subscriber(&self, id: &SubscriberId) -> Result<Option<Subscriber>> {
        Ok(self.records.read().await.subscribers.get(id).cloned())
    }

    async fn create_subscriber(&self, subscriber: &Subscriber) -> Result<()> {
        let mut records = self.records.write().await;
        let taken = records.subscribers.values().any(|s| {
            s.id == subscriber.id
                || (s.tenant_id == subscriber.tenant_id && s.username == subscriber.username)
        });
        if taken {
            return Err(Error::AlreadyExists(format!(
                "subscriber {} ({})",
                subscriber.id, subscriber.username
            )));
        }
        records
            .subscribers
            .insert(subscriber.id.clone(), subscriber.clone());
        Ok(())
    }

    async fn replace_subscriber(&self, expected: &Subscriber, next: &Subscriber) -> Result<bool> {
        let mut records = self.records.write().await;
        match records.subscribers.get_mut(&expected.id) {
            Some(current) if current == expected => {
                *current = next.clone();
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn delete_subscriber(&self, id: &SubscriberId) -> Result<bool> {
        Ok(self.records.write().await.subscribers.remove(id).is_some())
    }

    async fn list_subscribers(&self, tenant: &TenantId) -> Result<Vec<Subscriber>> {
        Ok(self
            .records
            .read()
            .await
            .subscribers
            .values()
            .filter(|s| &s.tenant_id == tenant)
            .cloned()
            .collect())
    }

    fn stream_expired<'a>(
        &'a self,
        tenant: &'a TenantId,
        now: DateTime<Utc>,
    ) -> BoxStream<'a, Result<Subscriber>> {
        // Keyset cursor over subscriber ids; the lock is only held per step.
        stream::unfold(None::<SubscriberId>, move |cursor| async move {
            let records = self.records.read().await;
            let due = |s: &&Subscriber| {
                &s.tenant_id == tenant && !s.is_suspended && s.is_expired(now)
            };
            let next: Option<Subscriber> = match &cursor {
                Some(last) => records
                    .subscribers
                    .range::<SubscriberId, _>((Bound::Excluded(last), Bound::Unbounded))
                    .map(|(_, s)| s)
                    .find(due)
                    .cloned(),
                None => records.subscribers.values().find(due).cloned(),
            };
            drop(records);
            next.map(|s| {
                let id = s.id.clone();
                (Ok(s), Some(id))
            })
        })
        .boxed()
    }

    async fn get_package(&self, id: &PackageId) -> Result<Option<Package>> {
        Ok(self.records.read().await.packages.get(id).cloned())
    }

    async fn list_packages(&self, tenant: &TenantId) -> Result<Vec<Package>> {
        Ok(self
            .records
            .read()
            .await
            .packages
            .values()
            .filter(|p| &p.tenant_id == tenant)
            .cloned()
            .collect())
    }

    async fn get_router(&self, id: &RouterId) -> Result<Option<Router>> {
        Ok(self.records.read().await.routers.get(id).cloned())
    }

    async fn list_routers(&self, tenant: &TenantId) -> Result<Vec<Router>> {
        Ok(self
            .records
            .read()
            .await
            .routers
            .values()
            .filter(|r| &r.tenant_id == tenant)
            .cloned()
            .collect())
    }

    async fn list_active_tenants(&self) -> Result<Vec<Tenant>> {
        if self.fail_tenant_listing.load(Ordering::SeqCst) {
            return Err(Error::DatabaseError(sqlx::Error::PoolTimedOut));
        }
        Ok(self
            .records
            .read()
            .await
            .tenants
            .values()
            .filter(|t| t.status == TenantStatus::Active)
            .cloned()
            .collect())
    }
}
