//! Engine configuration
//!
//! Loaded from an optional TOML file; every field has a default so an empty
//! file (or no file) yields a working single-node setup. The binary layers
//! CLI flags and environment variables over the file.
//!
//! ```toml
//! [database]
//! url = "postgres://sync@localhost/isp"
//!
//! [worker]
//! concurrency = 8
//!
//! [schedule]
//! reconcile_cron = "0 */5 * * * *"
//! ```

use std::net::SocketAddr;
use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::controller::{SyncSettings, WorkerConfig};
use crate::error::{Error, Result};
use crate::queue::{RetryPolicy, DEFAULT_QUEUE_NAME};
use crate::scheduler::{ScheduleEntry, SweepKind, DEFAULT_EXPIRE_CRON, DEFAULT_RECONCILE_CRON};

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Config {
    pub database: DatabaseConfig,
    pub queue: QueueConfig,
    pub worker: WorkerSection,
    pub schedule: ScheduleConfig,
    pub router: RouterConfig,
    pub api: ApiConfig,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct DatabaseConfig {
    /// PostgreSQL URL; usually supplied through `DATABASE_URL` instead
    pub url: Option<String>,
    pub max_connections: u32,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            url: None,
            max_connections: 10,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct QueueConfig {
    pub name: String,
    pub max_attempts: u32,
    pub base_delay_ms: u64,
    pub max_delay_secs: u64,
}

impl Default for QueueConfig {
    fn default() -> Self {
        let policy = RetryPolicy::default();
        Self {
            name: DEFAULT_QUEUE_NAME.to_string(),
            max_attempts: policy.max_attempts,
            base_delay_ms: policy.base_delay.as_millis() as u64,
            max_delay_secs: policy.max_delay.as_secs(),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct WorkerSection {
    /// Defaults to `<hostname>-<pid>`
    pub worker_id: Option<String>,
    pub concurrency: usize,
    pub poll_interval_ms: u64,
    pub stale_after_secs: u64,
}

impl Default for WorkerSection {
    fn default() -> Self {
        Self {
            worker_id: None,
            concurrency: 4,
            poll_interval_ms: 1000,
            stale_after_secs: 300,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ScheduleConfig {
    /// Run the cron loop in this process
    pub enabled: bool,
    pub reconcile_cron: String,
    pub expire_cron: String,
}

impl Default for ScheduleConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            reconcile_cron: DEFAULT_RECONCILE_CRON.to_string(),
            expire_cron: DEFAULT_EXPIRE_CRON.to_string(),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct RouterConfig {
    /// Per-request timeout against the RouterOS REST API
    pub timeout_secs: u64,
    /// Accept the self-signed certificates routers ship with
    pub accept_invalid_certs: bool,
    /// PPP profile assigned to suspended PPPoE subscribers
    pub disconnect_profile: String,
}

impl Default for RouterConfig {
    fn default() -> Self {
        Self {
            timeout_secs: 5,
            accept_invalid_certs: true,
            disconnect_profile: SyncSettings::default().disconnect_profile,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ApiConfig {
    pub enabled: bool,
    pub bind: SocketAddr,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            bind: SocketAddr::from(([0, 0, 0, 0], 8080)),
        }
    }
}

impl Config {
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path).map_err(|e| {
            Error::ConfigError(format!("Failed to read {}: {}", path.display(), e))
        })?;
        Self::from_toml_str(&raw)
            .map_err(|e| Error::ConfigError(format!("{}: {}", path.display(), e)))
    }

    pub fn from_toml_str(raw: &str) -> Result<Self> {
        let config: Config =
            toml::from_str(raw).map_err(|e| Error::ConfigError(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Reject values the engine cannot run with
    pub fn validate(&self) -> Result<()> {
        if self.worker.concurrency == 0 {
            return Err(Error::ConfigError(
                "worker.concurrency must be at least 1".to_string(),
            ));
        }
        if self.queue.max_attempts == 0 {
            return Err(Error::ConfigError(
                "queue.max_attempts must be at least 1".to_string(),
            ));
        }
        if self.queue.name.trim().is_empty() {
            return Err(Error::ConfigError("queue.name must not be empty".to_string()));
        }
        if self.router.disconnect_profile.trim().is_empty() {
            return Err(Error::ConfigError(
                "router.disconnect_profile must not be empty".to_string(),
            ));
        }
        if self.database.max_connections == 0 {
            return Err(Error::ConfigError(
                "database.max_connections must be at least 1".to_string(),
            ));
        }
        self.schedule_entries()?;
        Ok(())
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_attempts: self.queue.max_attempts,
            base_delay: Duration::from_millis(self.queue.base_delay_ms),
            max_delay: Duration::from_secs(self.queue.max_delay_secs),
        }
    }

    pub fn worker_config(&self) -> WorkerConfig {
        let defaults = WorkerConfig::default();
        WorkerConfig {
            worker_id: self.worker.worker_id.clone().unwrap_or(defaults.worker_id),
            concurrency: self.worker.concurrency,
            poll_interval: Duration::from_millis(self.worker.poll_interval_ms),
            stale_after: Duration::from_secs(self.worker.stale_after_secs),
        }
    }

    pub fn schedule_entries(&self) -> Result<Vec<ScheduleEntry>> {
        Ok(vec![
            ScheduleEntry::new(SweepKind::Reconcile, &self.schedule.reconcile_cron)?,
            ScheduleEntry::new(SweepKind::Expire, &self.schedule.expire_cron)?,
        ])
    }

    pub fn sync_settings(&self) -> SyncSettings {
        SyncSettings {
            disconnect_profile: self.router.disconnect_profile.clone(),
        }
    }

    pub fn router_timeout(&self) -> Duration {
        Duration::from_secs(self.router.timeout_secs)
    }
}
