// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Embeddable engine runtime.
//!
//! [`StackRuntime`] wires the stores, manager, reconciler, and scheduler
//! together so the engine can run as the `homeport-stack` daemon or be
//! embedded into an existing tokio application (typically under the admin
//! HTTP layer):
//!
//! ```rust,ignore
//! use homeport_stack::config::Config;
//! use homeport_stack::runtime::StackRuntime;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let runtime = StackRuntime::start(Config::from_env()).await?;
//!
//!     // ... serve the admin API over runtime.manager() ...
//!
//!     runtime.shutdown().await;
//!     Ok(())
//! }
//! ```

use std::sync::Arc;

use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tracing::{info, warn};

use crate::config::Config;
use crate::error::Result;
use crate::manager::StackManager;
use crate::paths::StackPaths;
use crate::reconcile::Reconciler;
use crate::scheduler::AutomationScheduler;

/// A started engine: manager handle plus the background scheduler.
pub struct StackRuntime {
    manager: Arc<StackManager>,
    reconciler: Arc<Reconciler>,
    scheduler_shutdown: Option<Arc<Notify>>,
    scheduler_task: Option<JoinHandle<()>>,
}

impl StackRuntime {
    /// Wire everything up, render once from the persisted spec, and start
    /// the scheduler.
    ///
    /// A render failure at startup (an unresolved secret reference left by
    /// an external edit) is logged, not fatal: the engine stays up so the
    /// operator can repair the spec through the admin layer.
    pub async fn start(config: Config) -> Result<Self> {
        let paths = StackPaths::new(&config.data_dir);
        paths.ensure()?;

        let manager = Arc::new(StackManager::new(paths.clone(), config.shell.clone()));
        manager.ensure_core_secrets()?;

        let reconciler = Arc::new(Reconciler::new(paths, config.compose_bin.clone()));

        match manager.render_now() {
            Ok(report) => {
                if config.auto_apply
                    && let Err(e) = reconciler.apply(&report).await
                {
                    warn!(error = %e, "Initial apply failed; artifacts stay rendered, retry later");
                }
            }
            Err(e) => warn!(error = %e, "Initial render failed; serving last good artifacts"),
        }

        let (scheduler_shutdown, scheduler_task) = if config.scheduler_disabled {
            info!("In-process scheduler disabled; crontab artifact remains authoritative");
            (None, None)
        } else {
            let scheduler =
                Arc::new(AutomationScheduler::new(manager.clone(), manager.runner()));
            let shutdown = scheduler.shutdown_handle();
            let task = tokio::spawn(async move { scheduler.run().await });
            (Some(shutdown), Some(task))
        };

        Ok(Self {
            manager,
            reconciler,
            scheduler_shutdown,
            scheduler_task,
        })
    }

    /// The stack manager, for the admin layer.
    pub fn manager(&self) -> Arc<StackManager> {
        self.manager.clone()
    }

    /// The reconciler, for apply/retry endpoints.
    pub fn reconciler(&self) -> Arc<Reconciler> {
        self.reconciler.clone()
    }

    /// Stop the scheduler and wait for its loop to end. Jobs already
    /// dispatched to the runner are not killed.
    pub async fn shutdown(self) {
        if let Some(shutdown) = self.scheduler_shutdown {
            shutdown.notify_waiters();
        }
        if let Some(task) = self.scheduler_task
            && let Err(e) = task.await
        {
            warn!(error = %e, "Scheduler task ended abnormally");
        }
        info!("Stack runtime shut down");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn config(tmp: &TempDir) -> Config {
        Config {
            data_dir: tmp.path().join("data"),
            compose_bin: "/nonexistent/homeport-compose".to_string(),
            shell: "/bin/sh".to_string(),
            scheduler_disabled: false,
            auto_apply: false,
        }
    }

    #[tokio::test]
    async fn test_start_renders_and_bootstraps() {
        let tmp = TempDir::new().unwrap();
        let runtime = StackRuntime::start(config(&tmp)).await.unwrap();

        let manager = runtime.manager();
        let paths = manager.paths().clone();
        assert!(paths.spec_file().exists());
        assert!(paths.caddy_config().exists());
        assert!(paths.compose_file().exists());
        assert!(paths.crontab_file().exists());
        // Core secrets were generated.
        let secrets = manager.current_secrets().unwrap();
        assert!(secrets.contains_key("POSTGRES_PASSWORD"));

        runtime.shutdown().await;
    }

    #[tokio::test]
    async fn test_scheduler_disabled() {
        let tmp = TempDir::new().unwrap();
        let mut config = config(&tmp);
        config.scheduler_disabled = true;
        let runtime = StackRuntime::start(config).await.unwrap();
        assert!(runtime.scheduler_task.is_none());
        runtime.shutdown().await;
    }
}
