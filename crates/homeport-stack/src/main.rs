// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Homeport Stack - Rendering & Scheduling Daemon
//!
//! Renders the stack spec into its artifacts on startup, then keeps the
//! automation scheduler ticking until interrupted. The admin HTTP layer
//! embeds the same runtime instead of running this binary.

use tracing::{info, warn};

use homeport_stack::config::Config;
use homeport_stack::runtime::StackRuntime;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "homeport_stack=info".into()),
        )
        .init();

    // Load .env file if present
    if let Err(e) = dotenvy::dotenv() {
        warn!("No .env file loaded: {}", e);
    }

    let config = Config::from_env();

    info!(
        data_dir = %config.data_dir.display(),
        compose_bin = %config.compose_bin,
        scheduler_disabled = config.scheduler_disabled,
        "Starting Homeport Stack"
    );

    let runtime = StackRuntime::start(config).await?;

    info!("Stack engine ready");

    // Wait for shutdown signal
    tokio::signal::ctrl_c().await?;
    info!("Shutdown signal received");

    runtime.shutdown().await;

    info!("Homeport Stack shut down");

    Ok(())
}
