//! Controller module for subscriber synchronization
//! This module contains the job handlers, the reconciler, the expiry sweep
//! and the worker pool that drives them from the queue.

pub mod executor;
pub mod expiry;
mod handler;
pub mod intents;
#[cfg(feature = "metrics")]
pub mod metrics;
pub mod reconciler;
#[cfg(test)]
mod test_fixtures;
pub mod transitions;
pub mod worker;

pub use handler::{ControllerState, SyncSettings};
pub use reconciler::{reconcile_tenant, ReconcileReport, RouterReport};
pub use transitions::{HardwareCommand, NextState, Operation, PlanContext, Transition};
pub use worker::{JobOutcome, SyncWorker, WorkerConfig};
