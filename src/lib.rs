//! MikroTik Sync: hardware synchronization and reconciliation engine
//!
//! Keeps MikroTik routers consistent with the desired subscriber state held
//! in PostgreSQL. Collaborators write intent and queue jobs; a worker pool
//! applies them over the RouterOS REST API; a cron-driven reconciler detects
//! and corrects drift; a daily sweep suspends expired subscribers.

pub mod config;
pub mod controller;
pub mod error;
pub mod gateway;
pub mod model;
pub mod queue;
pub mod scheduler;
pub mod store;
pub mod telemetry;

#[cfg(feature = "rest-api")]
pub mod rest_api;

pub use crate::config::Config;
pub use crate::error::{Error, Result};
