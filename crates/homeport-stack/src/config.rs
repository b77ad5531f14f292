// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Engine configuration loaded from environment variables.

use std::path::PathBuf;

/// Parse an env var into a bool with a sensible default.
fn parse_env_bool(var: &str, default: bool) -> bool {
    std::env::var(var)
        .map(|v| matches!(v.to_ascii_lowercase().as_str(), "1" | "true" | "yes" | "on"))
        .unwrap_or(default)
}

/// Engine configuration.
#[derive(Debug, Clone)]
pub struct Config {
    /// Data directory for the spec, secrets, artifacts, and job state.
    pub data_dir: PathBuf,
    /// Binary invoked as `<bin> compose ...` for container lifecycle ops.
    pub compose_bin: String,
    /// Shell used to execute automation scripts.
    pub shell: String,
    /// Skip starting the in-process scheduler (jobs stay runnable through
    /// the generated crontab artifact).
    pub scheduler_disabled: bool,
    /// Apply impact reports via the reconciler after the initial render.
    pub auto_apply: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from(".data"),
            compose_bin: "docker".to_string(),
            shell: "/bin/sh".to_string(),
            scheduler_disabled: false,
            auto_apply: false,
        }
    }
}

impl Config {
    /// Load configuration from environment variables.
    pub fn from_env() -> Self {
        Self {
            data_dir: std::env::var("HOMEPORT_DATA_DIR")
                .map(PathBuf::from)
                .unwrap_or_else(|_| PathBuf::from(".data")),
            compose_bin: std::env::var("HOMEPORT_COMPOSE_BIN")
                .unwrap_or_else(|_| "docker".to_string()),
            shell: std::env::var("HOMEPORT_SHELL").unwrap_or_else(|_| "/bin/sh".to_string()),
            scheduler_disabled: parse_env_bool("HOMEPORT_SCHEDULER_DISABLED", false),
            auto_apply: parse_env_bool("HOMEPORT_AUTO_APPLY", false),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = Config::default();
        assert_eq!(config.data_dir, PathBuf::from(".data"));
        assert_eq!(config.compose_bin, "docker");
        assert_eq!(config.shell, "/bin/sh");
        assert!(!config.scheduler_disabled);
        assert!(!config.auto_apply);
    }
}
