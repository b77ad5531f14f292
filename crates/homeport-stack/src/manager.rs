// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Mutation operations over the stack spec.
//!
//! The manager owns the cached spec/secret stores and runs every mutation
//! through the same pipeline: validate -> persist (atomic) -> re-render ->
//! write artifacts -> sync job scripts. The rendered tree is therefore
//! always a pure function of the last successfully persisted spec.
//!
//! Mutations are expected to be serialized by a single-writer admin layer;
//! the manager itself takes no cross-process lock. Reads interleave safely
//! with writes because the store caches are replaced wholesale.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use tracing::info;

use homeport_core::model::{AutomationJob, StackSpec};
use homeport_core::secrets::{CORE_SECRETS, SecretRef, is_valid_secret_name};
use homeport_core::templates::{self, TemplateKind};
use homeport_core::validate;

use crate::catalog::{self, CatalogItem};
use crate::error::{Error, Result};
use crate::jobs::{JobExecution, JobRunner, ShellJobRunner};
use crate::paths::StackPaths;
use crate::render::{self, ImpactReport, impact};
use crate::store::{SecretStore, SpecStore};

/// The stack control plane: cached state plus every mutation operation.
pub struct StackManager {
    paths: StackPaths,
    spec_store: SpecStore,
    secret_store: SecretStore,
    runner: Arc<ShellJobRunner>,
}

impl StackManager {
    /// Create a manager over the given layout.
    pub fn new(paths: StackPaths, shell: impl Into<String>) -> Self {
        let spec_store = SpecStore::new(paths.spec_file());
        let secret_store = SecretStore::new(paths.secrets_file());
        let runner = Arc::new(ShellJobRunner::new(paths.clone(), shell));
        Self { paths, spec_store, secret_store, runner }
    }

    /// The on-disk layout.
    pub fn paths(&self) -> &StackPaths {
        &self.paths
    }

    /// The job runner, shared with the scheduler.
    pub fn runner(&self) -> Arc<dyn JobRunner> {
        self.runner.clone()
    }

    /// The current spec (cached, mtime-gated).
    pub fn current_spec(&self) -> Result<Arc<StackSpec>> {
        self.spec_store.load()
    }

    /// The current secret map (cached, mtime-gated).
    pub fn current_secrets(&self) -> Result<Arc<BTreeMap<String, String>>> {
        self.secret_store.load()
    }

    /// Generate any missing core-required secrets.
    pub fn ensure_core_secrets(&self) -> Result<()> {
        self.secret_store.ensure_core_secrets()
    }

    /// Validate, persist, re-render, and write artifacts for a mutated spec.
    ///
    /// Validation failures reject before any write. A render failure (an
    /// unresolved secret reference) leaves the spec persisted and the
    /// artifact tree at the last good render; re-rendering later is always
    /// safe.
    fn commit(&self, spec: StackSpec) -> Result<(Arc<StackSpec>, ImpactReport)> {
        validate::validate(&spec)?;
        self.spec_store.save(&spec)?;
        let report = self.render_now()?;
        Ok((Arc::new(spec), report))
    }

    /// Re-render all artifacts from the last persisted spec and write them.
    ///
    /// Idempotent: unchanged inputs produce byte-identical artifacts and an
    /// empty impact report.
    pub fn render_now(&self) -> Result<ImpactReport> {
        let spec = self.spec_store.load()?;
        let secrets = self.secret_store.load()?;
        let rendered = render::render(&spec, &secrets)?;
        let report = impact::assess(&self.paths, &rendered)?;
        impact::write_artifacts(&self.paths, &rendered)?;
        self.runner.sync(&spec)?;
        Ok(report)
    }

    /// Replace the whole document (admin-layer PUT).
    pub fn replace_spec(&self, spec: StackSpec) -> Result<Arc<StackSpec>> {
        Ok(self.commit(spec)?.0)
    }

    /// Enable an instance, materializing it from a builtin template when it
    /// is not installed yet.
    pub fn install(&self, kind: TemplateKind, name: &str) -> Result<Arc<StackSpec>> {
        let mut spec = (*self.current_spec()?).clone();
        let installed = match kind {
            TemplateKind::Channel => spec.channels.contains_key(name),
            TemplateKind::Service => spec.services.contains_key(name),
        };
        if installed {
            match kind {
                TemplateKind::Channel => {
                    if let Some(channel) = spec.channels.get_mut(name) {
                        channel.enabled = true;
                    }
                }
                TemplateKind::Service => {
                    if let Some(service) = spec.services.get_mut(name) {
                        service.enabled = true;
                    }
                }
            }
        } else {
            let tpl = templates::find_builtin(name)
                .filter(|t| t.kind == kind)
                .ok_or_else(|| Error::UnknownTemplate(name.to_string()))?;
            if spec.has_instance(name)
                || (!tpl.supports_multiple_instances && !spec.instances_of(name).is_empty())
            {
                return Err(Error::AlreadyInstalled(name.to_string()));
            }
            match kind {
                TemplateKind::Channel => {
                    spec.channels.insert(name.to_string(), tpl.channel_entry(name));
                }
                TemplateKind::Service => {
                    spec.services.insert(name.to_string(), tpl.service_entry());
                }
            }
        }
        info!(kind = %kind, name, "Installing instance");
        Ok(self.commit(spec)?.0)
    }

    /// Disable an installed instance. The entry and its configuration stay
    /// in the spec; the rendered service goes down.
    pub fn uninstall(&self, kind: TemplateKind, name: &str) -> Result<Arc<StackSpec>> {
        let mut spec = (*self.current_spec()?).clone();
        let enabled = match kind {
            TemplateKind::Channel => spec.channels.get_mut(name).map(|c| &mut c.enabled),
            TemplateKind::Service => spec.services.get_mut(name).map(|s| &mut s.enabled),
        };
        match enabled {
            Some(enabled) => *enabled = false,
            None => return Err(Error::NotInstalled(name.to_string())),
        }
        info!(kind = %kind, name, "Uninstalling instance");
        Ok(self.commit(spec)?.0)
    }

    /// Update an instance's config map.
    ///
    /// Builtin-template instances accept only the template's known keys;
    /// unknown keys are silently dropped. Catalog/custom instances accept
    /// arbitrary keys.
    pub fn configure(
        &self,
        kind: TemplateKind,
        name: &str,
        fields: BTreeMap<String, String>,
    ) -> Result<Arc<StackSpec>> {
        let mut spec = (*self.current_spec()?).clone();
        let (template, config) = match kind {
            TemplateKind::Channel => spec
                .channels
                .get_mut(name)
                .map(|c| (c.template.clone(), &mut c.config)),
            TemplateKind::Service => spec
                .services
                .get_mut(name)
                .map(|s| (s.template.clone(), &mut s.config)),
        }
        .ok_or_else(|| Error::NotInstalled(name.to_string()))?;

        apply_fields(&template, config, fields);
        Ok(self.commit(spec)?.0)
    }

    /// Install a fresh instance of a template, generating a non-colliding
    /// name for multi-instance templates. Returns the new instance name.
    pub fn add_instance(
        &self,
        template: &str,
        fields: BTreeMap<String, String>,
    ) -> Result<(String, Arc<StackSpec>)> {
        let tpl = templates::find_builtin(template)
            .ok_or_else(|| Error::UnknownTemplate(template.to_string()))?;
        let mut spec = (*self.current_spec()?).clone();

        if !tpl.supports_multiple_instances && !spec.instances_of(template).is_empty() {
            return Err(Error::AlreadyInstalled(template.to_string()));
        }

        let name = next_instance_name(&spec, template);
        match tpl.kind {
            TemplateKind::Channel => {
                let mut entry = tpl.channel_entry(&name);
                apply_fields(template, &mut entry.config, fields);
                spec.channels.insert(name.clone(), entry);
            }
            TemplateKind::Service => {
                let mut entry = tpl.service_entry();
                apply_fields(template, &mut entry.config, fields);
                spec.services.insert(name.clone(), entry);
            }
        }
        info!(template, instance = %name, "Adding instance");
        let (spec, _) = self.commit(spec)?;
        Ok((name, spec))
    }

    /// The union of statically required core secrets and every `${NAME}`
    /// reference currently present in the spec.
    pub fn in_use_secrets(&self) -> Result<BTreeSet<String>> {
        let spec = self.current_spec()?;
        let mut in_use: BTreeSet<String> =
            CORE_SECRETS.iter().map(|n| (*n).to_string()).collect();

        for channel in spec.channels.values() {
            for value in channel.config.values() {
                if let Some(name) = SecretRef::reference(value) {
                    in_use.insert(name.to_string());
                }
            }
            if let Some(name) = &channel.shared_secret_env {
                in_use.insert(name.clone());
            }
        }
        for service in spec.services.values() {
            for value in service.config.values() {
                if let Some(name) = SecretRef::reference(value) {
                    in_use.insert(name.to_string());
                }
            }
        }
        Ok(in_use)
    }

    /// Insert or replace a secret, then re-render.
    pub fn upsert_secret(&self, name: &str, value: &str) -> Result<()> {
        if !is_valid_secret_name(name) {
            return Err(Error::InvalidSecretName(name.to_string()));
        }
        self.secret_store.upsert(name, value)?;
        self.render_now()?;
        Ok(())
    }

    /// Delete a secret unless it is required or referenced.
    pub fn delete_secret(&self, name: &str) -> Result<()> {
        if self.in_use_secrets()?.contains(name) {
            return Err(Error::SecretInUse { name: name.to_string() });
        }
        self.secret_store.remove(name)?;
        self.render_now()?;
        Ok(())
    }

    /// Insert or update an automation.
    ///
    /// Updating a core job changes only its mutable fields; the `core` flag
    /// and id are permanent.
    pub fn upsert_automation(&self, job: AutomationJob) -> Result<Arc<StackSpec>> {
        validate::validate_automation(&job)?;
        let mut spec = (*self.current_spec()?).clone();
        if let Some(pos) = spec.automations.iter().position(|j| j.id == job.id) {
            let existing = &mut spec.automations[pos];
            existing.name = job.name;
            existing.schedule = job.schedule;
            existing.script = job.script;
            existing.enabled = job.enabled;
            existing.description = job.description;
            // `core` is deliberately left untouched.
        } else {
            spec.automations.push(job);
        }
        Ok(self.commit(spec)?.0)
    }

    /// Delete an automation. Core jobs are immutable by identity and can
    /// only be disabled.
    pub fn delete_automation(&self, id: &str) -> Result<Arc<StackSpec>> {
        let mut spec = (*self.current_spec()?).clone();
        let Some(job) = spec.automation(id) else {
            return Err(Error::AutomationNotFound(id.to_string()));
        };
        if job.core {
            return Err(Error::CoreAutomationImmutable { id: id.to_string() });
        }
        spec.automations.retain(|j| j.id != id);
        info!(id, "Deleting automation");
        Ok(self.commit(spec)?.0)
    }

    /// Trigger an automation immediately through the shared runner. The
    /// runner's lock still guards against overlap with scheduled runs.
    pub async fn run_automation(&self, id: &str) -> Result<JobExecution> {
        let spec = self.current_spec()?;
        let job = spec
            .automation(id)
            .cloned()
            .ok_or_else(|| Error::AutomationNotFound(id.to_string()))?;
        Ok(self.runner.run(&job).await)
    }

    /// The most recent `limit` history records for an automation.
    pub fn automation_history(&self, id: &str, limit: usize) -> Result<Vec<JobExecution>> {
        self.runner.history(id, limit)
    }

    /// The merged catalog view.
    pub fn list_catalog(&self) -> Result<Vec<CatalogItem>> {
        let spec = self.current_spec()?;
        Ok(catalog::list_catalog(&spec, &self.paths.templates_dir()))
    }
}

/// Merge `fields` into a config map, dropping keys a builtin template does
/// not know.
fn apply_fields(
    template: &str,
    config: &mut BTreeMap<String, String>,
    fields: BTreeMap<String, String>,
) {
    let allowed = templates::find_builtin(template).map(|t| t.config_keys);
    for (key, value) in fields {
        if let Some(keys) = allowed
            && !keys.contains(&key.as_str())
        {
            continue;
        }
        config.insert(key, value);
    }
}

/// First non-colliding instance name: `base`, `base-2`, `base-3`, ...
fn next_instance_name(spec: &StackSpec, base: &str) -> String {
    if !spec.has_instance(base) {
        return base.to_string();
    }
    let mut i = 2usize;
    loop {
        let candidate = format!("{base}-{i}");
        if !spec.has_instance(&candidate) {
            return candidate;
        }
        i += 1;
    }
}
