// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Shell job runner with overlap guard and JSONL history.
//!
//! Automations execute as subprocesses: the job's shell body is written to a
//! per-job script file, and every run - scheduled or manual - goes through a
//! non-blocking advisory file lock keyed by job id. The lock is the
//! authoritative overlap guard across all invokers; if it is held, the run
//! is recorded as skipped and nothing executes. Each execution appends one
//! JSON line to the job's history file.
//!
//! A crontab-style combined schedule file is regenerated on every sync so
//! the jobs stay runnable even when the in-process scheduler is down.

use std::os::unix::fs::PermissionsExt;
use std::time::Instant;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use fs2::FileExt;
use serde::{Deserialize, Serialize};
use tokio::process::Command;
use tracing::{info, warn};

use homeport_core::model::{AutomationJob, StackSpec};

use crate::error::Result;
use crate::paths::StackPaths;

/// Longest single-line output preview stored in history.
const OUTPUT_PREVIEW_LIMIT: usize = 400;

/// Outcome of one job execution.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    /// The script exited zero.
    Success,
    /// The script exited non-zero or could not be spawned.
    Failed,
    /// The overlap lock was held; nothing executed.
    Skipped,
}

/// One line of a job's JSONL execution history.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JobExecution {
    /// When the run was attempted.
    pub timestamp: DateTime<Utc>,
    /// Job id.
    pub id: String,
    /// Outcome.
    pub status: JobStatus,
    /// Exit code, when the script ran.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub exit_code: Option<i32>,
    /// Wall-clock duration in milliseconds.
    pub duration_ms: u64,
    /// Truncated, single-line output preview.
    pub output: String,
}

/// Executes automation jobs.
///
/// Implementations must guarantee that two runs of the same job id never
/// execute concurrently, across every invoker.
#[async_trait]
pub trait JobRunner: Send + Sync {
    /// Run a job and record the outcome. Execution failures are reported in
    /// the returned record, never as an error.
    async fn run(&self, job: &AutomationJob) -> JobExecution;
}

/// The production runner: subprocess + advisory file lock.
pub struct ShellJobRunner {
    paths: StackPaths,
    shell: String,
}

impl ShellJobRunner {
    /// Create a runner over the given layout.
    pub fn new(paths: StackPaths, shell: impl Into<String>) -> Self {
        Self { paths, shell: shell.into() }
    }

    /// Write per-job scripts and the combined crontab file for a spec.
    ///
    /// Scripts for deleted automations are removed; lock files are left
    /// behind (a held lock must survive a sync).
    pub fn sync(&self, spec: &StackSpec) -> Result<()> {
        std::fs::create_dir_all(self.paths.automations_dir())?;
        std::fs::create_dir_all(self.paths.logs_dir())?;

        for job in &spec.automations {
            let script = format!("#!/bin/sh\n{}\n", job.script);
            crate::store::atomic_write(&self.paths.script_file(&job.id), &script)?;
            let mut perms = std::fs::metadata(self.paths.script_file(&job.id))?.permissions();
            perms.set_mode(0o755);
            std::fs::set_permissions(self.paths.script_file(&job.id), perms)?;
        }

        // Remove scripts whose automation is gone.
        for entry in std::fs::read_dir(self.paths.automations_dir())? {
            let entry = entry?;
            let name = entry.file_name();
            let Some(id) = name.to_str().and_then(|n| n.strip_suffix(".sh")) else {
                continue;
            };
            if spec.automation(id).is_none() {
                std::fs::remove_file(entry.path())?;
            }
        }

        self.write_crontab(spec)
    }

    /// Regenerate the combined crontab-style schedule file.
    fn write_crontab(&self, spec: &StackSpec) -> Result<()> {
        let mut out = String::from("# Generated by homeport; do not edit.\n");
        for job in spec.automations.iter().filter(|j| j.enabled) {
            out.push_str(&format!(
                "{} {} {} # {}\n",
                job.schedule,
                self.shell,
                self.paths.script_file(&job.id).display(),
                job.name
            ));
        }
        crate::store::atomic_write(&self.paths.crontab_file(), &out)?;
        Ok(())
    }

    /// Read the most recent `limit` history records for a job.
    pub fn history(&self, id: &str, limit: usize) -> Result<Vec<JobExecution>> {
        let raw = match std::fs::read_to_string(self.paths.log_file(id)) {
            Ok(raw) => raw,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };
        let mut records: Vec<JobExecution> = raw
            .lines()
            .filter_map(|line| serde_json::from_str(line).ok())
            .collect();
        if records.len() > limit {
            records.drain(..records.len() - limit);
        }
        Ok(records)
    }

    fn record(&self, execution: &JobExecution) {
        let line = match serde_json::to_string(execution) {
            Ok(line) => line,
            Err(e) => {
                warn!(id = %execution.id, error = %e, "Failed to serialize job record");
                return;
            }
        };
        let append = std::fs::create_dir_all(self.paths.logs_dir()).and_then(|_| {
            use std::io::Write;
            let mut file = std::fs::OpenOptions::new()
                .create(true)
                .append(true)
                .open(self.paths.log_file(&execution.id))?;
            writeln!(file, "{line}")
        });
        if let Err(e) = append {
            warn!(id = %execution.id, error = %e, "Failed to append job history");
        }
    }

    async fn execute(&self, job: &AutomationJob) -> JobExecution {
        let started = Instant::now();
        let timestamp = Utc::now();

        // The lock file outlives the run; holding the handle holds the lock.
        let lock = std::fs::OpenOptions::new()
            .create(true)
            .truncate(false)
            .write(true)
            .open(self.paths.lock_file(&job.id));
        let lock = match lock {
            Ok(file) => file,
            Err(e) => {
                return JobExecution {
                    timestamp,
                    id: job.id.clone(),
                    status: JobStatus::Failed,
                    exit_code: None,
                    duration_ms: 0,
                    output: format!("failed to open lock file: {e}"),
                };
            }
        };

        if lock.try_lock_exclusive().is_err() {
            info!(id = %job.id, "Skipped: previous run active");
            return JobExecution {
                timestamp,
                id: job.id.clone(),
                status: JobStatus::Skipped,
                exit_code: None,
                duration_ms: 0,
                output: "skipped: previous run active".to_string(),
            };
        }

        let script = self.paths.script_file(&job.id);
        let output = Command::new(&self.shell).arg(&script).output().await;
        let duration_ms = started.elapsed().as_millis() as u64;

        // Release before classifying the outcome; dropping the handle would
        // also release, this just makes the lifetime explicit.
        let _ = fs2::FileExt::unlock(&lock);

        match output {
            Ok(output) => {
                let mut combined = String::from_utf8_lossy(&output.stdout).to_string();
                combined.push_str(&String::from_utf8_lossy(&output.stderr));
                JobExecution {
                    timestamp,
                    id: job.id.clone(),
                    status: if output.status.success() {
                        JobStatus::Success
                    } else {
                        JobStatus::Failed
                    },
                    exit_code: output.status.code(),
                    duration_ms,
                    output: sanitize_output(&combined),
                }
            }
            Err(e) => JobExecution {
                timestamp,
                id: job.id.clone(),
                status: JobStatus::Failed,
                exit_code: None,
                duration_ms,
                output: format!("spawn failed: {e}"),
            },
        }
    }
}

#[async_trait]
impl JobRunner for ShellJobRunner {
    async fn run(&self, job: &AutomationJob) -> JobExecution {
        let execution = self.execute(job).await;
        match execution.status {
            JobStatus::Success => {
                info!(id = %job.id, duration_ms = execution.duration_ms, "Job completed")
            }
            JobStatus::Failed => warn!(
                id = %job.id,
                exit_code = ?execution.exit_code,
                output = %execution.output,
                "Job failed"
            ),
            JobStatus::Skipped => {}
        }
        self.record(&execution);
        execution
    }
}

/// Collapse output to one sanitized line, capped for logging.
fn sanitize_output(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len().min(OUTPUT_PREVIEW_LIMIT));
    for c in raw.chars() {
        if out.len() >= OUTPUT_PREVIEW_LIMIT {
            out.push_str("...");
            break;
        }
        match c {
            '\n' | '\r' | '\t' => {
                if !out.ends_with(' ') {
                    out.push(' ');
                }
            }
            c if c.is_control() => {}
            c => out.push(c),
        }
    }
    out.trim().to_string()
}

/// Mock runner for scheduler tests: records run ids, configurable outcome.
#[cfg(test)]
pub struct MockJobRunner {
    /// Ids of every job handed to the runner, in order.
    pub runs: std::sync::Mutex<Vec<String>>,
    /// Delay before completing, to keep runs in flight.
    pub delay_ms: u64,
}

#[cfg(test)]
impl MockJobRunner {
    /// A mock that completes immediately.
    pub fn new() -> Self {
        Self { runs: std::sync::Mutex::new(Vec::new()), delay_ms: 0 }
    }
}

#[cfg(test)]
#[async_trait]
impl JobRunner for MockJobRunner {
    async fn run(&self, job: &AutomationJob) -> JobExecution {
        if let Ok(mut runs) = self.runs.lock() {
            runs.push(job.id.clone());
        }
        if self.delay_ms > 0 {
            tokio::time::sleep(std::time::Duration::from_millis(self.delay_ms)).await;
        }
        JobExecution {
            timestamp: Utc::now(),
            id: job.id.clone(),
            status: JobStatus::Success,
            exit_code: Some(0),
            duration_ms: self.delay_ms,
            output: String::new(),
        }
    }
}
