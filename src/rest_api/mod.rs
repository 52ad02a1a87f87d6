//! REST API module for admin and billing integrations
//!
//! Exposes collaborator intents, subscriber sync status, one-off tenant
//! sweeps and read-only router traffic over HTTP.

mod dto;
mod handlers;
#[cfg(test)]
mod handlers_test;
mod server;

pub use dto::{ErrorResponse, JobAccepted, ProvisionRequest, SubscriberStatusResponse};
pub use server::{router, run_server};
