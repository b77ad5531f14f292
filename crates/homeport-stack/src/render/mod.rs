// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Pure artifact renderer.
//!
//! `render(spec, secrets)` is a pure transformation into the three artifact
//! kinds: the reverse-proxy routing config, the compose descriptor, and the
//! per-service env files. It fails closed: an unresolved `${NAME}` reference
//! anywhere aborts the whole render before any artifact is considered for
//! writing. Rendering the same inputs twice yields byte-identical output.

use std::collections::BTreeMap;

use homeport_core::model::{AccessScope, StackSpec};

use crate::error::Result;

/// Compose descriptor types and rendering.
pub mod compose;

/// Per-service env file rendering.
pub mod envfiles;

/// Impact classification of artifact diffs.
pub mod impact;

/// Reverse-proxy routing config rendering.
pub mod routing;

pub use impact::{ImpactAction, ImpactReport};

/// The rendered artifact set for one spec/secret pair.
#[derive(Debug, Clone)]
pub struct RenderedStack {
    /// Reverse-proxy routing config, serialized.
    pub caddy_json: String,
    /// Container descriptor, serialized.
    pub compose_yaml: String,
    /// Container descriptor, typed, for per-service impact diffing.
    pub compose: compose::ComposeFile,
    /// Env file contents keyed by compose service name.
    pub env_files: BTreeMap<String, String>,
}

/// Render every artifact from a spec and resolved secret map.
pub fn render(
    spec: &StackSpec,
    secrets: &BTreeMap<String, String>,
) -> Result<RenderedStack> {
    // Env files first: they are the only artifact that can fail, and nothing
    // may be produced once anything fails.
    let env_files = envfiles::render_env_files(spec, secrets)?;

    let caddy = routing::render_caddy(spec);
    let mut caddy_json = serde_json::to_string_pretty(&caddy)?;
    caddy_json.push('\n');

    let compose = compose::render_compose(spec);
    let compose_yaml = serde_yaml::to_string(&compose)?;

    Ok(RenderedStack { caddy_json, compose_yaml, compose, env_files })
}

/// Derive a compose-safe service name from a spec key.
pub fn service_name(key: &str) -> String {
    let mut out = String::with_capacity(key.len());
    let mut last_dash = true;
    for c in key.chars() {
        let c = c.to_ascii_lowercase();
        if c.is_ascii_lowercase() || c.is_ascii_digit() {
            out.push(c);
            last_dash = false;
        } else if !last_dash {
            out.push('-');
            last_dash = true;
        }
    }
    let trimmed = out.trim_end_matches('-');
    if trimmed.is_empty() {
        "svc".to_string()
    } else {
        trimmed.to_string()
    }
}

/// The reachability policy in effect for an entry.
pub fn effective_scope(spec: &StackSpec, exposure: Option<AccessScope>) -> AccessScope {
    exposure.unwrap_or(spec.access_scope)
}

#[cfg(test)]
mod tests {
    use super::*;
    use homeport_core::templates;

    #[test]
    fn test_service_name_transform() {
        assert_eq!(service_name("telegram"), "telegram");
        assert_eq!(service_name("My Bot_2"), "my-bot-2");
        assert_eq!(service_name("--weird--"), "weird");
        assert_eq!(service_name("!!!"), "svc");
    }

    #[test]
    fn test_render_is_deterministic() {
        let mut spec = StackSpec::default();
        spec.channels.insert(
            "telegram".to_string(),
            templates::find_builtin("telegram")
                .unwrap()
                .channel_entry("telegram"),
        );
        let mut secrets = BTreeMap::new();
        for name in homeport_core::secrets::CORE_SECRETS {
            secrets.insert((*name).to_string(), "x".to_string());
        }
        secrets.insert("TELEGRAM_WEBHOOK_SECRET".to_string(), "s".to_string());

        let a = render(&spec, &secrets).unwrap();
        let b = render(&spec, &secrets).unwrap();
        assert_eq!(a.caddy_json, b.caddy_json);
        assert_eq!(a.compose_yaml, b.compose_yaml);
        assert_eq!(a.env_files, b.env_files);
    }
}
