// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Impact classification of artifact diffs.
//!
//! Compares a freshly rendered artifact set against what is currently on
//! disk and classifies every difference into the minimal remedial action:
//! proxy reload, service restart, service up, or service down. A second
//! render of unchanged inputs therefore produces an empty report.

use std::collections::BTreeSet;
use std::path::Path;

use serde::Serialize;
use sha2::{Digest, Sha256};
use tracing::debug;

use super::RenderedStack;
use super::compose::ComposeFile;
use crate::error::Result;
use crate::paths::StackPaths;
use crate::store::atomic_write;

/// The minimal remedial action implied by one artifact diff.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "camelCase", tag = "action", content = "service")]
pub enum ImpactAction {
    /// The routing config changed; the reverse proxy must reload.
    ReloadProxy,
    /// The service definition or its env file changed; restart it.
    RestartService(String),
    /// The service is new; bring it up.
    UpService(String),
    /// The service no longer exists; take it down.
    DownService(String),
}

/// Every action implied by one render, deduplicated and sorted.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ImpactReport {
    /// The classified actions.
    pub actions: Vec<ImpactAction>,
}

impl ImpactReport {
    /// Whether nothing changed.
    pub fn is_empty(&self) -> bool {
        self.actions.is_empty()
    }
}

fn content_hash(bytes: &[u8]) -> String {
    hex::encode(Sha256::digest(bytes))
}

/// Whether `path` currently holds exactly `contents`.
fn file_matches(path: &Path, contents: &str) -> bool {
    match std::fs::read(path) {
        Ok(existing) => content_hash(&existing) == content_hash(contents.as_bytes()),
        Err(_) => false,
    }
}

fn read_old_compose(paths: &StackPaths) -> Option<ComposeFile> {
    let raw = std::fs::read_to_string(paths.compose_file()).ok()?;
    serde_yaml::from_str(&raw).ok()
}

/// Classify the diff between `rendered` and the persisted artifact set.
pub fn assess(paths: &StackPaths, rendered: &RenderedStack) -> Result<ImpactReport> {
    let mut actions = BTreeSet::new();

    if !file_matches(&paths.caddy_config(), &rendered.caddy_json) {
        actions.insert(ImpactAction::ReloadProxy);
    }

    let old = read_old_compose(paths);
    let old_services = old.as_ref().map(|c| &c.services);

    for (name, service) in &rendered.compose.services {
        match old_services.and_then(|s| s.get(name)) {
            None => {
                actions.insert(ImpactAction::UpService(name.clone()));
            }
            Some(previous) => {
                let env_changed = match rendered.env_files.get(name) {
                    Some(contents) => !file_matches(&paths.env_file(name), contents),
                    None => false,
                };
                if previous != service || env_changed {
                    actions.insert(ImpactAction::RestartService(name.clone()));
                }
            }
        }
    }

    if let Some(old_services) = old_services {
        for name in old_services.keys() {
            if !rendered.compose.services.contains_key(name) {
                actions.insert(ImpactAction::DownService(name.clone()));
            }
        }
    }

    let report = ImpactReport { actions: actions.into_iter().collect() };
    if !report.is_empty() {
        debug!(actions = report.actions.len(), "Render changed artifacts");
    }
    Ok(report)
}

/// Atomically persist the full artifact set.
///
/// Unchanged files are rewritten too - the writes are idempotent and the
/// artifact tree must always equal the last render. Env files for services
/// that no longer exist are removed.
pub fn write_artifacts(paths: &StackPaths, rendered: &RenderedStack) -> Result<()> {
    std::fs::create_dir_all(paths.env_dir())?;
    atomic_write(&paths.caddy_config(), &rendered.caddy_json)?;
    atomic_write(&paths.compose_file(), &rendered.compose_yaml)?;

    for (name, contents) in &rendered.env_files {
        atomic_write(&paths.env_file(name), contents)?;
    }

    // Drop env files that no longer correspond to a service.
    for entry in std::fs::read_dir(paths.env_dir())? {
        let entry = entry?;
        let file_name = entry.file_name();
        let Some(stem) = Path::new(&file_name).file_stem().and_then(|s| s.to_str()) else {
            continue;
        };
        if !rendered.env_files.contains_key(stem) {
            std::fs::remove_file(entry.path())?;
        }
    }

    Ok(())
}
