//! In-memory router fleet
//!
//! Behaves like RouterOS for the calls the engine makes (duplicate names are
//! rejected, unknown ids are 404) and counts opened/closed sessions so tests
//! can assert that every session is released.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::Mutex;

use super::{
    ActiveSession, InterfaceTraffic, PppSecret, QueuePatch, RouterGateway, RouterSession,
    SecretPatch, SimpleQueue,
};
use crate::error::{Error, Result};
use crate::model::{Router, RouterId};

#[derive(Debug, Default, Clone)]
pub struct RouterState {
    pub secrets: Vec<PppSecret>,
    pub queues: Vec<SimpleQueue>,
    pub active: Vec<ActiveSession>,
    next_id: u64,
}

impl RouterState {
    fn allocate_id(&mut self) -> String {
        self.next_id += 1;
        format!("*{:X}", self.next_id)
    }
}

#[derive(Default)]
struct Fleet {
    routers: HashMap<RouterId, RouterState>,
    unreachable: HashSet<RouterId>,
    /// Mutating calls, in order, for assertions
    writes: Vec<String>,
}

/// Gateway backed by in-memory router state
#[derive(Clone, Default)]
pub struct MemoryGateway {
    fleet: Arc<Mutex<Fleet>>,
    opened: Arc<AtomicUsize>,
    closed: Arc<AtomicUsize>,
}

impl MemoryGateway {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn set_unreachable(&self, router: &RouterId, unreachable: bool) {
        let mut fleet = self.fleet.lock().await;
        if unreachable {
            fleet.unreachable.insert(router.clone());
        } else {
            fleet.unreachable.remove(router);
        }
    }

    pub async fn insert_secret(&self, router: &RouterId, mut secret: PppSecret) {
        let mut fleet = self.fleet.lock().await;
        let state = fleet.routers.entry(router.clone()).or_default();
        secret.id = Some(state.allocate_id());
        state.secrets.push(secret);
    }

    pub async fn insert_queue(&self, router: &RouterId, mut queue: SimpleQueue) {
        let mut fleet = self.fleet.lock().await;
        let state = fleet.routers.entry(router.clone()).or_default();
        queue.id = Some(state.allocate_id());
        state.queues.push(queue);
    }

    pub async fn insert_active(&self, router: &RouterId, name: &str) {
        let mut fleet = self.fleet.lock().await;
        let state = fleet.routers.entry(router.clone()).or_default();
        let id = state.allocate_id();
        state.active.push(ActiveSession {
            id,
            name: name.to_string(),
            address: None,
        });
    }

    /// Snapshot of one router's objects
    pub async fn state(&self, router: &RouterId) -> RouterState {
        self.fleet
            .lock()
            .await
            .routers
            .get(router)
            .cloned()
            .unwrap_or_default()
    }

    /// Mutating calls made so far, e.g. `r1 set-secret u1`
    pub async fn writes(&self) -> Vec<String> {
        self.fleet.lock().await.writes.clone()
    }

    pub fn sessions_opened(&self) -> usize {
        self.opened.load(Ordering::SeqCst)
    }

    pub fn sessions_closed(&self) -> usize {
        self.closed.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl RouterGateway for MemoryGateway {
    async fn open(&self, router: &Router) -> Result<Box<dyn RouterSession>> {
        {
            let mut fleet = self.fleet.lock().await;
            if fleet.unreachable.contains(&router.id) {
                return Err(Error::RouterUnavailable {
                    router: router.id.to_string(),
                    message: "connection refused".to_string(),
                });
            }
            fleet.routers.entry(router.id.clone()).or_default();
        }
        self.opened.fetch_add(1, Ordering::SeqCst);
        Ok(Box::new(MemorySession {
            router: router.id.clone(),
            fleet: Arc::clone(&self.fleet),
            closed: Arc::clone(&self.closed),
        }))
    }
}

struct MemorySession {
    router: RouterId,
    fleet: Arc<Mutex<Fleet>>,
    closed: Arc<AtomicUsize>,
}

fn not_found(id: &str) -> Error {
    Error::RouterApi {
        status: 404,
        message: format!("no such item ({id})"),
    }
}

impl MemorySession {
    async fn with_state<T>(
        &self,
        write: Option<String>,
        f: impl FnOnce(&mut RouterState) -> Result<T>,
    ) -> Result<T> {
        let mut fleet = self.fleet.lock().await;
        if let Some(write) = write {
            fleet.writes.push(format!("{} {}", self.router, write));
        }
        let state = fleet.routers.entry(self.router.clone()).or_default();
        f(state)
    }
}

#[async_trait]
impl RouterSession for MemorySession {
    async fn list_secrets(&self) -> Result<Vec<PppSecret>> {
        self.with_state(None, |s| Ok(s.secrets.clone())).await
    }

    async fn add_secret(&self, secret: &PppSecret) -> Result<()> {
        self.with_state(Some(format!("add-secret {}", secret.name)), |s| {
            if s.secrets.iter().any(|x| x.name == secret.name) {
                return Err(Error::RouterApi {
                    status: 400,
                    message: "failure: secret with the same name already exists".to_string(),
                });
            }
            let mut secret = secret.clone();
            secret.id = Some(s.allocate_id());
            s.secrets.push(secret);
            Ok(())
        })
        .await
    }

    async fn set_secret(&self, id: &str, patch: &SecretPatch) -> Result<()> {
        self.with_state(Some(format!("set-secret {id}")), |s| {
            let secret = s
                .secrets
                .iter_mut()
                .find(|x| x.id.as_deref() == Some(id))
                .ok_or_else(|| not_found(id))?;
            if let Some(profile) = &patch.profile {
                secret.profile = profile.clone();
            }
            if let Some(password) = &patch.password {
                secret.password = Some(password.clone());
            }
            if let Some(disabled) = patch.disabled {
                secret.disabled = disabled;
            }
            if let Some(comment) = &patch.comment {
                secret.comment = Some(comment.clone()).filter(|c| !c.is_empty());
            }
            Ok(())
        })
        .await
    }

    async fn remove_secret(&self, id: &str) -> Result<()> {
        self.with_state(Some(format!("remove-secret {id}")), |s| {
            let before = s.secrets.len();
            s.secrets.retain(|x| x.id.as_deref() != Some(id));
            if s.secrets.len() == before {
                return Err(not_found(id));
            }
            Ok(())
        })
        .await
    }

    async fn list_queues(&self) -> Result<Vec<SimpleQueue>> {
        self.with_state(None, |s| Ok(s.queues.clone())).await
    }

    async fn add_queue(&self, queue: &SimpleQueue) -> Result<()> {
        self.with_state(Some(format!("add-queue {}", queue.name)), |s| {
            if s.queues.iter().any(|x| x.name == queue.name) {
                return Err(Error::RouterApi {
                    status: 400,
                    message: "failure: queue with the same name already exists".to_string(),
                });
            }
            let mut queue = queue.clone();
            queue.id = Some(s.allocate_id());
            s.queues.push(queue);
            Ok(())
        })
        .await
    }

    async fn set_queue(&self, id: &str, patch: &QueuePatch) -> Result<()> {
        self.with_state(Some(format!("set-queue {id}")), |s| {
            let queue = s
                .queues
                .iter_mut()
                .find(|x| x.id.as_deref() == Some(id))
                .ok_or_else(|| not_found(id))?;
            if let Some(target) = &patch.target {
                queue.target = target.clone();
            }
            if let Some(max_limit) = &patch.max_limit {
                queue.max_limit = max_limit.clone();
            }
            if let Some(disabled) = patch.disabled {
                queue.disabled = disabled;
            }
            if let Some(comment) = &patch.comment {
                queue.comment = Some(comment.clone()).filter(|c| !c.is_empty());
            }
            Ok(())
        })
        .await
    }

    async fn remove_queue(&self, id: &str) -> Result<()> {
        self.with_state(Some(format!("remove-queue {id}")), |s| {
            let before = s.queues.len();
            s.queues.retain(|x| x.id.as_deref() != Some(id));
            if s.queues.len() == before {
                return Err(not_found(id));
            }
            Ok(())
        })
        .await
    }

    async fn list_active_sessions(&self) -> Result<Vec<ActiveSession>> {
        self.with_state(None, |s| Ok(s.active.clone())).await
    }

    async fn remove_active_session(&self, id: &str) -> Result<()> {
        self.with_state(Some(format!("remove-active {id}")), |s| {
            s.active.retain(|x| x.id != id);
            Ok(())
        })
        .await
    }

    async fn interface_traffic(&self, interface: &str) -> Result<InterfaceTraffic> {
        Ok(InterfaceTraffic {
            interface: interface.to_string(),
            rx_bits_per_second: 0,
            tx_bits_per_second: 0,
        })
    }

    async fn close(&self) {
        self.closed.fetch_add(1, Ordering::SeqCst);
    }
}
