// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Minute-tick automation scheduler.
//!
//! Runs independently of the manager's request/response cycle: the first
//! tick is aligned to the next wall-clock minute boundary, then the loop
//! ticks every 60 seconds until stopped. Each tick snapshots the enabled job
//! list, evaluates every schedule against the tick's minute-floored local
//! timestamp, and dispatches due jobs concurrently.
//!
//! The in-flight id set prevents this process from dispatching the same job
//! twice; the runner's advisory file lock remains the authoritative overlap
//! guard across all invokers. Stopping the scheduler only ends the loop -
//! jobs already dispatched are not killed, and there is no per-job timeout:
//! a job that never exits holds its lock and starves its own future runs.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use chrono::{Local, NaiveDateTime, Timelike};
use tokio::sync::{Mutex, Notify};
use tracing::{debug, error, info, warn};

use homeport_core::cron::{Schedule, truncate_to_minute};

use crate::jobs::JobRunner;
use crate::manager::StackManager;

/// Background scheduler for spec automations.
pub struct AutomationScheduler {
    manager: Arc<StackManager>,
    runner: Arc<dyn JobRunner>,
    inflight: Arc<Mutex<HashSet<String>>>,
    shutdown: Arc<Notify>,
}

impl AutomationScheduler {
    /// Create a scheduler over the given manager and runner.
    pub fn new(manager: Arc<StackManager>, runner: Arc<dyn JobRunner>) -> Self {
        Self {
            manager,
            runner,
            inflight: Arc::new(Mutex::new(HashSet::new())),
            shutdown: Arc::new(Notify::new()),
        }
    }

    /// Get a handle that can be used to signal shutdown.
    pub fn shutdown_handle(&self) -> Arc<Notify> {
        self.shutdown.clone()
    }

    /// Run the scheduler loop until shutdown is signalled.
    pub async fn run(&self) {
        info!("Automation scheduler started");

        // Align the first tick to the next wall-clock minute boundary.
        let now = Local::now();
        let until_boundary = 60_000u64.saturating_sub(
            (now.second() as u64) * 1000 + (now.timestamp_subsec_millis() as u64),
        );
        tokio::select! {
            biased;
            _ = self.shutdown.notified() => {
                info!("Automation scheduler stopped before first tick");
                return;
            }
            _ = tokio::time::sleep(Duration::from_millis(until_boundary)) => {}
        }

        let mut interval = tokio::time::interval(Duration::from_secs(60));
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                biased;

                _ = self.shutdown.notified() => {
                    info!("Automation scheduler shutting down");
                    break;
                }

                _ = interval.tick() => {
                    let now = truncate_to_minute(Local::now().naive_local());
                    self.tick(now).await;
                }
            }
        }

        info!("Automation scheduler stopped");
    }

    /// Evaluate and dispatch every due job for one minute-floored timestamp.
    async fn tick(&self, now: NaiveDateTime) {
        let spec = match self.manager.current_spec() {
            Ok(spec) => spec,
            Err(e) => {
                error!(error = %e, "Failed to load spec for scheduler tick");
                return;
            }
        };

        for job in spec.automations.iter().filter(|j| j.enabled) {
            let schedule = match Schedule::parse(&job.schedule) {
                Ok(schedule) => schedule,
                Err(e) => {
                    // Validated at upsert; only an external edit can get here.
                    warn!(id = %job.id, error = %e, "Skipping job with unparseable schedule");
                    continue;
                }
            };
            if !schedule.matches(now) {
                continue;
            }

            {
                let mut inflight = self.inflight.lock().await;
                if !inflight.insert(job.id.clone()) {
                    warn!(id = %job.id, "Skipping tick: job still in flight");
                    continue;
                }
            }

            debug!(id = %job.id, "Dispatching job");
            let runner = self.runner.clone();
            let inflight = self.inflight.clone();
            let job = job.clone();
            tokio::spawn(async move {
                // Remove-after-execute must run even when the job fails;
                // the runner reports failures as records, never panics.
                runner.run(&job).await;
                inflight.lock().await.remove(&job.id);
            });
        }
    }
}
