//! Desired-state store
//!
//! Every write is scoped to a single subscriber record. Nothing here holds a
//! lock across records, so jobs for different subscribers never block each
//! other.

pub mod memory;
pub mod postgres;
pub mod schema;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures::stream::BoxStream;

use crate::error::Result;
use crate::model::{
    Package, PackageId, Router, RouterId, Subscriber, SubscriberId, Tenant, TenantId,
};

/// Conditional write attempts before giving up with `ConcurrentUpdate`
pub const MAX_WRITE_ATTEMPTS: usize = 5;

pub use memory::MemoryStore;
pub use postgres::PgStore;

#[async_trait]
pub trait SubscriberStore: Send + Sync {
    async fn get_subscriber(&self, id: &SubscriberId) -> Result<Option<Subscriber>>;

    /// Insert a new record; a taken id or tenant username is `AlreadyExists`
    async fn create_subscriber(&self, subscriber: &Subscriber) -> Result<()>;

    /// Replace the record only while it still equals `expected`
    ///
    /// Returns `false` when another writer changed or deleted it first; the
    /// caller re-reads and decides again.
    async fn replace_subscriber(&self, expected: &Subscriber, next: &Subscriber) -> Result<bool>;

    /// Returns whether a record was deleted
    async fn delete_subscriber(&self, id: &SubscriberId) -> Result<bool>;

    async fn list_subscribers(&self, tenant: &TenantId) -> Result<Vec<Subscriber>>;

    /// Lazily yield the tenant's expired, not yet suspended subscribers
    ///
    /// One pass per call. Records suspended while the stream is being consumed
    /// drop out of later passes, so an interrupted sweep simply resumes.
    fn stream_expired<'a>(
        &'a self,
        tenant: &'a TenantId,
        now: DateTime<Utc>,
    ) -> BoxStream<'a, Result<Subscriber>>;

    async fn get_package(&self, id: &PackageId) -> Result<Option<Package>>;

    async fn list_packages(&self, tenant: &TenantId) -> Result<Vec<Package>>;

    async fn get_router(&self, id: &RouterId) -> Result<Option<Router>>;

    async fn list_routers(&self, tenant: &TenantId) -> Result<Vec<Router>>;

    async fn list_active_tenants(&self) -> Result<Vec<Tenant>>;
}
