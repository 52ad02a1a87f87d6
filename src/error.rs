//! Error types for the sync engine
//!
//! Errors are grouped into the categories the queue cares about: transient
//! failures are retried with backoff, everything else is dead-lettered on the
//! first attempt and surfaced through the subscriber's sync status.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    /// Router unreachable, refused the connection or timed out
    #[error("Router {router} unreachable: {message}")]
    RouterUnavailable { router: String, message: String },

    /// RouterOS REST call failed at the transport layer
    #[error("HTTP error: {0}")]
    HttpError(#[from] reqwest::Error),

    /// RouterOS answered with an error status
    #[error("RouterOS API error ({status}): {message}")]
    RouterApi { status: u16, message: String },

    /// An object with the same name exists on the router with different settings
    #[error("Conflicting {kind} '{name}' already exists on router: {detail}")]
    Conflict {
        kind: &'static str,
        name: String,
        detail: String,
    },

    /// The router has no object for this subscriber
    #[error("{kind} '{name}' not found on router")]
    ObjectMissing { kind: &'static str, name: String },

    /// Desired state references something that does not exist
    #[error("Inconsistent desired state: {0}")]
    Inconsistent(String),

    /// Entity lookup in the desired-state store came back empty
    #[error("{0} not found")]
    NotFound(String),

    /// Create of a record whose id or tenant username is taken
    #[error("{0} already exists")]
    AlreadyExists(String),

    /// Record kept changing under a conditional write
    #[error("Concurrent update of {0}")]
    ConcurrentUpdate(String),

    /// Desired-state store failure
    #[error("Database error: {0}")]
    DatabaseError(#[from] sqlx::Error),

    #[error("Serialization error: {0}")]
    SerializationError(#[from] serde_json::Error),

    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("Invalid schedule '{expression}': {message}")]
    ScheduleError { expression: String, message: String },

    #[error("Queue error: {0}")]
    QueueError(String),
}

pub type Result<T, E = Error> = std::result::Result<T, E>;

impl Error {
    /// Whether the queue should try the job again after a backoff delay
    pub fn is_retriable(&self) -> bool {
        match self {
            Error::RouterUnavailable { .. }
            | Error::HttpError(_)
            | Error::DatabaseError(_)
            | Error::ConcurrentUpdate(_)
            | Error::QueueError(_) => true,
            // 5xx from RouterOS is usually a busy device
            Error::RouterApi { status, .. } => *status >= 500,
            Error::Conflict { .. }
            | Error::ObjectMissing { .. }
            | Error::Inconsistent(_)
            | Error::NotFound(_)
            | Error::AlreadyExists(_)
            | Error::SerializationError(_)
            | Error::ConfigError(_)
            | Error::ScheduleError { .. } => false,
        }
    }

    /// Short label used for metrics and log fields
    pub fn kind(&self) -> &'static str {
        match self {
            Error::RouterUnavailable { .. } => "router_unavailable",
            Error::HttpError(_) => "http",
            Error::RouterApi { .. } => "router_api",
            Error::Conflict { .. } => "conflict",
            Error::ObjectMissing { .. } => "object_missing",
            Error::Inconsistent(_) => "inconsistent",
            Error::NotFound(_) => "not_found",
            Error::AlreadyExists(_) => "already_exists",
            Error::ConcurrentUpdate(_) => "concurrent_update",
            Error::DatabaseError(_) => "database",
            Error::SerializationError(_) => "serialization",
            Error::ConfigError(_) => "config",
            Error::ScheduleError { .. } => "schedule",
            Error::QueueError(_) => "queue",
        }
    }
}
