// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Mtime-gated spec and secret stores with atomic persistence.
//!
//! Both stores cache the parsed value together with the file's modification
//! time and re-read only when the mtime changes. The cache is replaced
//! wholesale on every refresh, never mutated in place, so concurrent readers
//! always see a consistent snapshot. This invalidation scheme is racy under
//! concurrent external edits; the admin layer is assumed to be the single
//! writer.
//!
//! Writes go through a temp file in the same directory followed by an atomic
//! rename, so a crash mid-write never leaves a torn file.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::SystemTime;

use rand::Rng;
use rand::distributions::Alphanumeric;
use tracing::{debug, info};

use homeport_core::model::StackSpec;
use homeport_core::secrets::{self, CORE_SECRETS};

use crate::error::Result;

/// Atomically replace `path` with `contents`.
pub fn atomic_write(path: &Path, contents: &str) -> std::io::Result<()> {
    let dir = path.parent().unwrap_or_else(|| Path::new("."));
    let tmp = tempfile::NamedTempFile::new_in(dir)?;
    std::fs::write(tmp.path(), contents)?;
    tmp.persist(path).map_err(|e| e.error)?;
    Ok(())
}

fn mtime(path: &Path) -> Option<SystemTime> {
    std::fs::metadata(path).and_then(|m| m.modified()).ok()
}

type Cached<T> = Option<(SystemTime, Arc<T>)>;

/// Cached, validated access to the spec document on disk.
#[derive(Debug)]
pub struct SpecStore {
    path: PathBuf,
    cache: Mutex<Cached<StackSpec>>,
}

impl SpecStore {
    /// Create a store for the given spec file.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into(), cache: Mutex::new(None) }
    }

    /// Load the current spec, creating the default document on first run.
    ///
    /// Returns the cached value unless the file's mtime moved since the last
    /// read.
    pub fn load(&self) -> Result<Arc<StackSpec>> {
        if !self.path.exists() {
            info!(path = %self.path.display(), "Spec file missing, writing default document");
            let spec = StackSpec::default();
            self.save(&spec)?;
            return Ok(Arc::new(spec));
        }

        let on_disk = mtime(&self.path);
        if let Some((cached_mtime, spec)) = self.cache.lock().ok().and_then(|c| c.clone())
            && on_disk == Some(cached_mtime)
        {
            return Ok(spec);
        }

        let raw = std::fs::read_to_string(&self.path)?;
        let spec = Arc::new(StackSpec::from_json(&raw)?);
        debug!(path = %self.path.display(), "Spec reloaded from disk");
        self.replace_cache(on_disk, spec.clone());
        Ok(spec)
    }

    /// Validate and atomically persist a spec, refreshing the cache.
    pub fn save(&self, spec: &StackSpec) -> Result<()> {
        homeport_core::validate::validate(spec)?;
        atomic_write(&self.path, &spec.to_json()?)?;
        self.replace_cache(mtime(&self.path), Arc::new(spec.clone()));
        Ok(())
    }

    fn replace_cache(&self, on_disk: Option<SystemTime>, spec: Arc<StackSpec>) {
        if let (Ok(mut cache), Some(t)) = (self.cache.lock(), on_disk) {
            *cache = Some((t, spec));
        }
    }
}

/// Cached access to the flat secret file.
#[derive(Debug)]
pub struct SecretStore {
    path: PathBuf,
    cache: Mutex<Cached<BTreeMap<String, String>>>,
}

impl SecretStore {
    /// Create a store for the given secret file.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into(), cache: Mutex::new(None) }
    }

    /// Load the current secret map. A missing file is an empty map.
    pub fn load(&self) -> Result<Arc<BTreeMap<String, String>>> {
        if !self.path.exists() {
            return Ok(Arc::new(BTreeMap::new()));
        }

        let on_disk = mtime(&self.path);
        if let Some((cached_mtime, map)) = self.cache.lock().ok().and_then(|c| c.clone())
            && on_disk == Some(cached_mtime)
        {
            return Ok(map);
        }

        let raw = std::fs::read_to_string(&self.path)?;
        let map = Arc::new(secrets::parse_env_file(&raw));
        debug!(path = %self.path.display(), keys = map.len(), "Secrets reloaded from disk");
        self.replace_cache(on_disk, map.clone());
        Ok(map)
    }

    /// Insert or replace a secret and persist.
    pub fn upsert(&self, name: &str, value: &str) -> Result<()> {
        let mut map = (*self.load()?).clone();
        map.insert(name.to_string(), value.to_string());
        self.persist(map)
    }

    /// Remove a secret and persist. The in-use guard lives in the manager.
    pub fn remove(&self, name: &str) -> Result<()> {
        let mut map = (*self.load()?).clone();
        map.remove(name);
        self.persist(map)
    }

    /// Generate any missing core-required secrets.
    ///
    /// Keys already present in the file - known or not - are never touched.
    pub fn ensure_core_secrets(&self) -> Result<()> {
        let mut map = (*self.load()?).clone();
        let mut added = 0usize;
        for name in CORE_SECRETS {
            if map.get(*name).is_none_or(|v| v.is_empty()) {
                map.insert((*name).to_string(), random_token());
                added += 1;
            }
        }
        if added > 0 {
            info!(added, "Generated missing core secrets");
            self.persist(map)?;
        }
        Ok(())
    }

    fn persist(&self, map: BTreeMap<String, String>) -> Result<()> {
        atomic_write(&self.path, &secrets::render_env_file(&map))?;
        self.replace_cache(mtime(&self.path), Arc::new(map));
        Ok(())
    }

    fn replace_cache(&self, on_disk: Option<SystemTime>, map: Arc<BTreeMap<String, String>>) {
        if let (Ok(mut cache), Some(t)) = (self.cache.lock(), on_disk) {
            *cache = Some((t, map));
        }
    }
}

fn random_token() -> String {
    rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(32)
        .map(char::from)
        .collect()
}
