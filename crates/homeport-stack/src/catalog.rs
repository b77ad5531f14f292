// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Installed/builtin/discovered catalog merge.
//!
//! The catalog is one sorted view over three heterogeneous sources: entries
//! installed in the spec, compiled-in builtin templates, and template
//! snippets discovered in the templates directory. Each source keeps its own
//! variant; the projection into a display record is shared.

use std::path::Path;

use serde::{Deserialize, Serialize};
use tracing::warn;

use homeport_core::model::StackSpec;
use homeport_core::templates::{self, TemplateKind};

/// Where a catalog item came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum CatalogSource {
    /// An instance present in the spec.
    Installed,
    /// A compiled-in template without an installation.
    Builtin,
    /// An externally discovered template snippet without an installation.
    Discovered,
}

/// One row of the merged catalog view.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CatalogItem {
    /// Channel or service.
    #[serde(serialize_with = "serialize_kind")]
    pub kind: TemplateKind,
    /// Instance name for installed items, template name otherwise.
    pub name: String,
    /// Human-readable name.
    pub display_name: String,
    /// One-line description.
    pub description: Option<String>,
    /// The template this item derives from.
    pub template: String,
    /// Whether the item is an installed instance.
    pub installed: bool,
    /// Whether the installed instance is enabled.
    pub enabled: bool,
    /// Whether further instances may be added.
    pub multi_instance: bool,
    /// The source this row was projected from.
    pub source: CatalogSource,
}

fn serialize_kind<S: serde::Serializer>(
    kind: &TemplateKind,
    serializer: S,
) -> Result<S::Ok, S::Error> {
    serializer.serialize_str(&kind.to_string())
}

/// A template snippet file dropped into the templates directory.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DiscoveredTemplate {
    /// Template name.
    pub name: String,
    /// `channel` or `service`.
    pub kind: String,
    /// Human-readable name.
    #[serde(default)]
    pub display_name: Option<String>,
    /// One-line description.
    #[serde(default)]
    pub description: Option<String>,
    /// Container image reference.
    pub image: String,
    /// Port the container listens on.
    pub container_port: u16,
    /// Default path prefixes (channels only).
    #[serde(default)]
    pub path_prefixes: Vec<String>,
    /// Whether several instances may be installed.
    #[serde(default)]
    pub supports_multiple_instances: bool,
}

impl DiscoveredTemplate {
    fn kind(&self) -> Option<TemplateKind> {
        match self.kind.as_str() {
            "channel" => Some(TemplateKind::Channel),
            "service" => Some(TemplateKind::Service),
            _ => None,
        }
    }
}

/// Read template snippets from `dir`. Malformed snippets are skipped with a
/// warning; a missing directory is an empty set.
pub fn discover_templates(dir: &Path) -> Vec<DiscoveredTemplate> {
    let Ok(entries) = std::fs::read_dir(dir) else {
        return Vec::new();
    };
    let mut found = Vec::new();
    for entry in entries.flatten() {
        let path = entry.path();
        if path.extension().and_then(|e| e.to_str()) != Some("json") {
            continue;
        }
        let raw = match std::fs::read_to_string(&path) {
            Ok(raw) => raw,
            Err(e) => {
                warn!(path = %path.display(), error = %e, "Skipping unreadable template snippet");
                continue;
            }
        };
        match serde_json::from_str::<DiscoveredTemplate>(&raw) {
            Ok(tpl) if tpl.kind().is_some() => found.push(tpl),
            Ok(tpl) => {
                warn!(path = %path.display(), kind = %tpl.kind, "Skipping snippet with unknown kind");
            }
            Err(e) => {
                warn!(path = %path.display(), error = %e, "Skipping malformed template snippet");
            }
        }
    }
    found
}

/// Whether `template` already has an installation that forbids listing it as
/// an available template (installed and not multi-instance).
fn blocked_by_installation(spec: &StackSpec, template: &str, multi: bool) -> bool {
    !multi && !spec.instances_of(template).is_empty()
}

/// Merge the three sources into one sorted catalog view.
///
/// Sort order: type, then installed before template, then display name.
pub fn list_catalog(spec: &StackSpec, templates_dir: &Path) -> Vec<CatalogItem> {
    let mut items = Vec::new();

    for (name, channel) in &spec.channels {
        items.push(CatalogItem {
            kind: TemplateKind::Channel,
            name: name.clone(),
            display_name: channel.name.clone().unwrap_or_else(|| name.clone()),
            description: channel.description.clone(),
            template: channel.template.clone(),
            installed: true,
            enabled: channel.enabled,
            multi_instance: channel.supports_multiple_instances,
            source: CatalogSource::Installed,
        });
    }
    for (name, service) in &spec.services {
        items.push(CatalogItem {
            kind: TemplateKind::Service,
            name: name.clone(),
            display_name: service.name.clone().unwrap_or_else(|| name.clone()),
            description: service.description.clone(),
            template: service.template.clone(),
            installed: true,
            enabled: service.enabled,
            multi_instance: service.supports_multiple_instances,
            source: CatalogSource::Installed,
        });
    }

    for tpl in templates::builtin_templates() {
        if blocked_by_installation(spec, tpl.name, tpl.supports_multiple_instances) {
            continue;
        }
        items.push(CatalogItem {
            kind: tpl.kind,
            name: tpl.name.to_string(),
            display_name: tpl.display_name.to_string(),
            description: Some(tpl.description.to_string()),
            template: tpl.name.to_string(),
            installed: false,
            enabled: false,
            multi_instance: tpl.supports_multiple_instances,
            source: CatalogSource::Builtin,
        });
    }

    for tpl in discover_templates(templates_dir) {
        let Some(kind) = tpl.kind() else { continue };
        // Builtins shadow discovered snippets with the same name.
        if templates::find_builtin(&tpl.name).is_some()
            || blocked_by_installation(spec, &tpl.name, tpl.supports_multiple_instances)
        {
            continue;
        }
        items.push(CatalogItem {
            kind,
            display_name: tpl.display_name.clone().unwrap_or_else(|| tpl.name.clone()),
            description: tpl.description.clone(),
            template: tpl.name.clone(),
            name: tpl.name,
            installed: false,
            enabled: false,
            multi_instance: tpl.supports_multiple_instances,
            source: CatalogSource::Discovered,
        });
    }

    items.sort_by(|a, b| {
        (a.kind, !a.installed, a.display_name.to_lowercase()).cmp(&(
            b.kind,
            !b.installed,
            b.display_name.to_lowercase(),
        ))
    });
    items
}
