//! Prometheus metrics for the sync engine
//!
//! # Exported metrics
//! The `/metrics` endpoint (when built with `--features metrics`) exports the following metrics:
//! - `mikrotik_sync_jobs_total` (counter): processed jobs labeled by job type and outcome.
//! - `mikrotik_sync_job_duration_seconds` (histogram): job handling time labeled by job type.
//! - `mikrotik_sync_drift_corrections_total` (counter): jobs emitted by reconciliation labeled by tenant and kind.
//! - `mikrotik_sync_ghost_objects` (gauge): router objects with no subscriber record, per router.
//! - `mikrotik_sync_router_unreachable_total` (counter): failed session opens during reconciliation.

use std::sync::atomic::{AtomicI64, AtomicU64};

use once_cell::sync::Lazy;
use prometheus_client::encoding::EncodeLabelSet;
use prometheus_client::metrics::counter::Counter;
use prometheus_client::metrics::family::Family;
use prometheus_client::metrics::gauge::Gauge;
use prometheus_client::metrics::histogram::{exponential_buckets, Histogram};
use prometheus_client::registry::Registry;

#[derive(Clone, Debug, Hash, PartialEq, Eq, EncodeLabelSet)]
pub struct JobLabels {
    pub job_type: String,
    /// "completed", "retrying" or "dead"
    pub outcome: String,
}

#[derive(Clone, Debug, Hash, PartialEq, Eq, EncodeLabelSet)]
pub struct JobTypeLabels {
    pub job_type: String,
}

#[derive(Clone, Debug, Hash, PartialEq, Eq, EncodeLabelSet)]
pub struct DriftLabels {
    pub tenant: String,
    /// Corrective job type, or "marked-synced"
    pub kind: String,
}

#[derive(Clone, Debug, Hash, PartialEq, Eq, EncodeLabelSet)]
pub struct RouterLabels {
    pub tenant: String,
    pub router: String,
}

pub static JOBS_TOTAL: Lazy<Family<JobLabels, Counter<u64, AtomicU64>>> =
    Lazy::new(Family::default);

/// Histogram tracking job duration (seconds)
pub static JOB_DURATION_SECONDS: Lazy<Family<JobTypeLabels, Histogram>> = Lazy::new(|| {
    fn job_histogram() -> Histogram {
        // 5ms .. ~160s across 16 buckets.
        Histogram::new(exponential_buckets(0.005, 2.0, 16))
    }

    Family::new_with_constructor(job_histogram)
});

pub static DRIFT_CORRECTIONS_TOTAL: Lazy<Family<DriftLabels, Counter<u64, AtomicU64>>> =
    Lazy::new(Family::default);

pub static GHOST_OBJECTS: Lazy<Family<RouterLabels, Gauge<i64, AtomicI64>>> =
    Lazy::new(Family::default);

pub static ROUTER_UNREACHABLE_TOTAL: Lazy<Family<RouterLabels, Counter<u64, AtomicU64>>> =
    Lazy::new(Family::default);

/// Global metrics registry
pub static REGISTRY: Lazy<Registry> = Lazy::new(|| {
    let mut registry = Registry::default();

    registry.register(
        "mikrotik_sync_jobs",
        "Total number of sync jobs processed",
        JOBS_TOTAL.clone(),
    );
    registry.register(
        "mikrotik_sync_job_duration_seconds",
        "Duration of sync job handling in seconds",
        JOB_DURATION_SECONDS.clone(),
    );
    registry.register(
        "mikrotik_sync_drift_corrections",
        "Corrective jobs emitted by reconciliation",
        DRIFT_CORRECTIONS_TOTAL.clone(),
    );
    registry.register(
        "mikrotik_sync_ghost_objects",
        "Router objects with no matching subscriber record",
        GHOST_OBJECTS.clone(),
    );
    registry.register(
        "mikrotik_sync_router_unreachable",
        "Routers that could not be reached during reconciliation",
        ROUTER_UNREACHABLE_TOTAL.clone(),
    );

    registry
});

pub fn inc_job(job_type: &str, outcome: &str) {
    let labels = JobLabels {
        job_type: job_type.to_string(),
        outcome: outcome.to_string(),
    };
    JOBS_TOTAL.get_or_create(&labels).inc();
}

pub fn observe_job_duration_seconds(job_type: &str, seconds: f64) {
    let labels = JobTypeLabels {
        job_type: job_type.to_string(),
    };
    JOB_DURATION_SECONDS.get_or_create(&labels).observe(seconds);
}

pub fn inc_drift_correction(tenant: &str, kind: &str) {
    let labels = DriftLabels {
        tenant: tenant.to_string(),
        kind: kind.to_string(),
    };
    DRIFT_CORRECTIONS_TOTAL.get_or_create(&labels).inc();
}

pub fn set_ghost_objects(tenant: &str, router: &str, count: i64) {
    let labels = RouterLabels {
        tenant: tenant.to_string(),
        router: router.to_string(),
    };
    GHOST_OBJECTS.get_or_create(&labels).set(count);
}

pub fn inc_router_unreachable(tenant: &str, router: &str) {
    let labels = RouterLabels {
        tenant: tenant.to_string(),
        router: router.to_string(),
    };
    ROUTER_UNREACHABLE_TOTAL.get_or_create(&labels).inc();
}
