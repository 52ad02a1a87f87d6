//! Hardware gateway for MikroTik routers
//!
//! A [`RouterGateway`] opens one authenticated [`RouterSession`] per job.
//! Sessions are never pooled or kept between jobs; callers close them when
//! the job is done, whatever the outcome.

pub mod memory;
pub mod rest;
pub mod types;

use async_trait::async_trait;

use crate::error::Result;
use crate::model::Router;

pub use memory::MemoryGateway;
pub use rest::RouterOsGateway;
pub use types::*;

/// Connection factory for router management sessions
#[async_trait]
pub trait RouterGateway: Send + Sync {
    /// Open and authenticate a session; connectivity failures are retryable
    async fn open(&self, router: &Router) -> Result<Box<dyn RouterSession>>;
}

/// Imperative commands against one router
#[async_trait]
pub trait RouterSession: Send + Sync {
    async fn list_secrets(&self) -> Result<Vec<PppSecret>>;
    async fn add_secret(&self, secret: &PppSecret) -> Result<()>;
    async fn set_secret(&self, id: &str, patch: &SecretPatch) -> Result<()>;
    async fn remove_secret(&self, id: &str) -> Result<()>;

    async fn list_queues(&self) -> Result<Vec<SimpleQueue>>;
    async fn add_queue(&self, queue: &SimpleQueue) -> Result<()>;
    async fn set_queue(&self, id: &str, patch: &QueuePatch) -> Result<()>;
    async fn remove_queue(&self, id: &str) -> Result<()>;

    async fn list_active_sessions(&self) -> Result<Vec<ActiveSession>>;
    async fn remove_active_session(&self, id: &str) -> Result<()>;

    /// Read-only traffic sample, not used on the write path
    async fn interface_traffic(&self, interface: &str) -> Result<InterfaceTraffic>;

    /// Release the session
    async fn close(&self);

    async fn find_secret(&self, name: &str) -> Result<Option<PppSecret>> {
        Ok(self
            .list_secrets()
            .await?
            .into_iter()
            .find(|s| s.name == name))
    }

    async fn find_queue(&self, name: &str) -> Result<Option<SimpleQueue>> {
        Ok(self.list_queues().await?.into_iter().find(|q| q.name == name))
    }

    async fn find_active_sessions(&self, name: &str) -> Result<Vec<ActiveSession>> {
        Ok(self
            .list_active_sessions()
            .await?
            .into_iter()
            .filter(|a| a.name == name)
            .collect())
    }
}
