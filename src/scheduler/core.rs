//! Cron loop that enqueues the keyed sweep trigger jobs

use std::str::FromStr;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use cron::Schedule;
use tokio::sync::watch;
use tokio::time::{sleep, Duration};
use tracing::{error, info, warn};

use super::SweepKind;
use crate::error::{Error, Result};
use crate::queue::{JobId, JobOptions, SyncQueue};

/// One cron-driven sweep
#[derive(Clone, Debug)]
pub struct ScheduleEntry {
    pub kind: SweepKind,
    pub expression: String,
    schedule: Schedule,
}

impl ScheduleEntry {
    pub fn new(kind: SweepKind, expression: &str) -> Result<Self> {
        let schedule = Schedule::from_str(expression).map_err(|e| Error::ScheduleError {
            expression: expression.to_string(),
            message: e.to_string(),
        })?;
        Ok(Self {
            kind,
            expression: expression.to_string(),
            schedule,
        })
    }

    /// First fire time strictly after `after`
    pub fn next_after(&self, after: DateTime<Utc>) -> Option<DateTime<Utc>> {
        self.schedule.after(&after).next()
    }
}

pub struct Scheduler {
    queue: Arc<dyn SyncQueue>,
    entries: Vec<ScheduleEntry>,
}

impl Scheduler {
    pub fn new(queue: Arc<dyn SyncQueue>, entries: Vec<ScheduleEntry>) -> Self {
        Self { queue, entries }
    }

    /// Earliest upcoming fire time and every sweep due at that instant
    pub fn next_fire(&self, after: DateTime<Utc>) -> Option<(DateTime<Utc>, Vec<SweepKind>)> {
        let upcoming: Vec<(DateTime<Utc>, SweepKind)> = self
            .entries
            .iter()
            .filter_map(|e| e.next_after(after).map(|at| (at, e.kind)))
            .collect();
        let earliest = upcoming.iter().map(|(at, _)| *at).min()?;
        let due = upcoming
            .into_iter()
            .filter(|(at, _)| *at == earliest)
            .map(|(_, kind)| kind)
            .collect();
        Some((earliest, due))
    }

    /// Enqueue the tick job of `kind` under its fixed key
    pub async fn fire(&self, kind: SweepKind) -> Result<JobId> {
        self.queue
            .enqueue(kind.trigger(), JobOptions::keyed(kind.trigger_key()))
            .await
    }

    /// Sleep until each fire time and enqueue; returns when `shutdown` flips
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) {
        for entry in &self.entries {
            info!("Scheduling {} sweep with '{}'", entry.kind, entry.expression);
        }

        loop {
            if *shutdown.borrow() {
                break;
            }

            let now = Utc::now();
            let Some((at, kinds)) = self.next_fire(now) else {
                warn!("No upcoming fire time, scheduler stopping");
                return;
            };
            let wait = (at - now).to_std().unwrap_or(Duration::ZERO);

            tokio::select! {
                _ = sleep(wait) => {}
                changed = shutdown.changed() => {
                    if changed.is_err() {
                        break;
                    }
                    continue;
                }
            }

            for kind in kinds {
                match self.fire(kind).await {
                    Ok(id) => info!("Queued {} sweep trigger as job {}", kind, id),
                    Err(e) => error!("Failed to queue {} sweep trigger: {}", kind, e),
                }
            }
        }

        info!("Scheduler stopped");
    }
}
