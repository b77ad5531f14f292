// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Best-effort compose/proxy subprocess application.
//!
//! The rendered artifacts are the source of truth; this module is the thin
//! reconciliation layer that asks the container backend to converge on them.
//! Every operation shells out to `<compose_bin> compose -f <descriptor>` and
//! surfaces the exit code and stderr. Failures never roll back the persisted
//! spec or artifacts - the apply step can simply be retried.

use tokio::process::Command;
use tracing::{info, warn};

use crate::error::{Error, Result};
use crate::paths::StackPaths;
use crate::render::{ImpactAction, ImpactReport};

/// Path of the routing config inside the caddy container (mounted from the
/// artifacts directory).
const CADDY_CONFIG_IN_CONTAINER: &str = "/etc/caddy/caddy.json";

/// Subprocess driver for the container backend and the reverse proxy.
pub struct Reconciler {
    compose_bin: String,
    paths: StackPaths,
}

impl Reconciler {
    /// Create a reconciler invoking `<compose_bin> compose` against the
    /// rendered descriptor.
    pub fn new(paths: StackPaths, compose_bin: impl Into<String>) -> Self {
        Self { compose_bin: compose_bin.into(), paths }
    }

    /// Run one compose subcommand, capturing output.
    async fn compose(&self, args: &[&str]) -> Result<String> {
        let descriptor = self.paths.compose_file();
        let op = format!("compose {}", args.join(" "));
        let output = Command::new(&self.compose_bin)
            .arg("compose")
            .arg("-f")
            .arg(&descriptor)
            .args(args)
            .output()
            .await
            .map_err(|e| Error::External {
                op: op.clone(),
                status: None,
                stderr: e.to_string(),
            })?;

        if !output.status.success() {
            return Err(Error::External {
                op,
                status: output.status.code(),
                stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            });
        }
        Ok(String::from_utf8_lossy(&output.stdout).to_string())
    }

    /// Bring one service up (create + start).
    pub async fn up(&self, service: &str) -> Result<()> {
        self.compose(&["up", "-d", service]).await.map(|_| ())
    }

    /// Stop one service.
    pub async fn down(&self, service: &str) -> Result<()> {
        self.compose(&["stop", service]).await.map(|_| ())
    }

    /// Restart one service.
    pub async fn restart(&self, service: &str) -> Result<()> {
        self.compose(&["restart", service]).await.map(|_| ())
    }

    /// Pull every image referenced by the descriptor.
    pub async fn pull(&self) -> Result<()> {
        self.compose(&["pull"]).await.map(|_| ())
    }

    /// `compose ps` output for the admin layer.
    pub async fn ps(&self) -> Result<String> {
        self.compose(&["ps"]).await
    }

    /// Recent logs for one service.
    pub async fn logs(&self, service: &str, tail: u32) -> Result<String> {
        let tail = tail.to_string();
        self.compose(&["logs", "--no-color", "--tail", &tail, service]).await
    }

    /// Tell the running proxy to reload the routing config.
    pub async fn reload_proxy(&self) -> Result<()> {
        self.compose(&["exec", "caddy", "caddy", "reload", "--config", CADDY_CONFIG_IN_CONTAINER])
            .await
            .map(|_| ())
    }

    /// Apply an impact report with the minimal necessary actions.
    ///
    /// Actions are attempted in order; the first failure is returned, but
    /// the artifacts stay as rendered and a later retry picks up where this
    /// left off.
    pub async fn apply(&self, report: &ImpactReport) -> Result<()> {
        if report.is_empty() {
            return Ok(());
        }
        info!(actions = report.actions.len(), "Applying impact report");
        for action in &report.actions {
            match action {
                ImpactAction::ReloadProxy => {
                    // The proxy may not be running yet on first apply.
                    if let Err(e) = self.reload_proxy().await {
                        warn!(error = %e, "Proxy reload failed, bringing caddy up instead");
                        self.up("caddy").await?;
                    }
                }
                ImpactAction::UpService(service) => self.up(service).await?,
                ImpactAction::DownService(service) => self.down(service).await?,
                ImpactAction::RestartService(service) => self.restart(service).await?,
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn reconciler(bin: &str) -> (TempDir, Reconciler) {
        let tmp = TempDir::new().unwrap();
        let paths = StackPaths::new(tmp.path().join("data"));
        paths.ensure().unwrap();
        (tmp, Reconciler::new(paths, bin))
    }

    #[tokio::test]
    async fn test_missing_binary_surfaces_external_error() {
        let (_tmp, reconciler) = reconciler("/nonexistent/homeport-compose");
        let err = reconciler.ps().await.unwrap_err();
        assert!(matches!(err, Error::External { status: None, .. }));
    }

    #[tokio::test]
    async fn test_nonzero_exit_surfaces_status_and_stderr() {
        // `false compose -f ... ps` exits 1 with no output.
        let (_tmp, reconciler) = reconciler("false");
        let err = reconciler.ps().await.unwrap_err();
        match err {
            Error::External { op, status, .. } => {
                assert_eq!(status, Some(1));
                assert!(op.contains("ps"));
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[tokio::test]
    async fn test_empty_report_applies_without_subprocess() {
        let (_tmp, reconciler) = reconciler("/nonexistent/homeport-compose");
        reconciler.apply(&ImpactReport::default()).await.unwrap();
    }
}
