// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! On-disk layout derived from the data directory.
//!
//! ```text
//! {DATA_DIR}/
//!   stack.json                 - the spec document
//!   secrets.env                - flat KEY=value secret file
//!   artifacts/
//!     caddy.json               - reverse-proxy routing config
//!     compose.yaml             - multi-service container descriptor
//!     env/<service>.env        - per-service env files
//!   automations/
//!     <id>.sh                  - per-job shell scripts
//!     <id>.lock                - per-job advisory lock files
//!     homeport.cron            - combined crontab-style schedule file
//!     logs/<id>.jsonl          - per-job execution history
//!   templates/                 - externally discovered template snippets
//!   backups/                   - target of the core backup automation
//! ```

use std::path::{Path, PathBuf};

/// Every file location the engine reads or writes.
#[derive(Debug, Clone)]
pub struct StackPaths {
    data_dir: PathBuf,
}

impl StackPaths {
    /// Derive all locations from one data directory.
    pub fn new(data_dir: impl Into<PathBuf>) -> Self {
        Self { data_dir: data_dir.into() }
    }

    /// The data directory itself.
    pub fn data_dir(&self) -> &Path {
        &self.data_dir
    }

    /// The stack spec document.
    pub fn spec_file(&self) -> PathBuf {
        self.data_dir.join("stack.json")
    }

    /// The flat secret file.
    pub fn secrets_file(&self) -> PathBuf {
        self.data_dir.join("secrets.env")
    }

    /// Directory holding all rendered artifacts.
    pub fn artifacts_dir(&self) -> PathBuf {
        self.data_dir.join("artifacts")
    }

    /// The reverse-proxy routing config artifact.
    pub fn caddy_config(&self) -> PathBuf {
        self.artifacts_dir().join("caddy.json")
    }

    /// The container descriptor artifact.
    pub fn compose_file(&self) -> PathBuf {
        self.artifacts_dir().join("compose.yaml")
    }

    /// Directory holding per-service env files.
    pub fn env_dir(&self) -> PathBuf {
        self.artifacts_dir().join("env")
    }

    /// Env file for one service.
    pub fn env_file(&self, service: &str) -> PathBuf {
        self.env_dir().join(format!("{service}.env"))
    }

    /// Directory holding job scripts, locks, and the crontab artifact.
    pub fn automations_dir(&self) -> PathBuf {
        self.data_dir.join("automations")
    }

    /// Shell script for one job.
    pub fn script_file(&self, id: &str) -> PathBuf {
        self.automations_dir().join(format!("{id}.sh"))
    }

    /// Advisory lock file for one job.
    pub fn lock_file(&self, id: &str) -> PathBuf {
        self.automations_dir().join(format!("{id}.lock"))
    }

    /// Directory holding per-job execution histories.
    pub fn logs_dir(&self) -> PathBuf {
        self.automations_dir().join("logs")
    }

    /// JSONL execution history for one job.
    pub fn log_file(&self, id: &str) -> PathBuf {
        self.logs_dir().join(format!("{id}.jsonl"))
    }

    /// The combined crontab-style schedule file.
    pub fn crontab_file(&self) -> PathBuf {
        self.automations_dir().join("homeport.cron")
    }

    /// Directory scanned for externally discovered template snippets.
    pub fn templates_dir(&self) -> PathBuf {
        self.data_dir.join("templates")
    }

    /// Target directory of the core backup automation.
    pub fn backups_dir(&self) -> PathBuf {
        self.data_dir.join("backups")
    }

    /// Create the directory skeleton.
    pub fn ensure(&self) -> std::io::Result<()> {
        for dir in [
            self.data_dir.clone(),
            self.artifacts_dir(),
            self.env_dir(),
            self.automations_dir(),
            self.logs_dir(),
            self.templates_dir(),
            self.backups_dir(),
        ] {
            std::fs::create_dir_all(dir)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_layout() {
        let paths = StackPaths::new("/srv/homeport");
        assert_eq!(paths.spec_file(), PathBuf::from("/srv/homeport/stack.json"));
        assert_eq!(
            paths.env_file("telegram"),
            PathBuf::from("/srv/homeport/artifacts/env/telegram.env")
        );
        assert_eq!(
            paths.script_file("backup-spec"),
            PathBuf::from("/srv/homeport/automations/backup-spec.sh")
        );
        assert_eq!(
            paths.log_file("backup-spec"),
            PathBuf::from("/srv/homeport/automations/logs/backup-spec.jsonl")
        );
    }

    #[test]
    fn test_ensure_creates_skeleton() {
        let tmp = tempfile::TempDir::new().unwrap();
        let paths = StackPaths::new(tmp.path().join("data"));
        paths.ensure().unwrap();
        assert!(paths.env_dir().is_dir());
        assert!(paths.logs_dir().is_dir());
        assert!(paths.backups_dir().is_dir());
    }
}
