// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Stack spec document types.
//!
//! The stack spec is a single versioned JSON document describing every
//! channel, auxiliary service, and automation of an installation. It is the
//! only source of truth: all rendered artifacts (routing config, compose
//! descriptor, env files, job scripts) are pure functions of it.
//!
//! Unknown fields are rejected at parse time (`deny_unknown_fields`), and a
//! version mismatch is a hard error with no migration path. Maps use
//! `BTreeMap` so document equality does not depend on key order and
//! serialization is deterministic.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// Current stack spec schema version. Any other value is rejected.
pub const SPEC_VERSION: u32 = 1;

/// Network reachability policy for a routed entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AccessScope {
    /// Reachable from the host machine only (loopback).
    #[default]
    Host,
    /// Reachable from the private network (RFC1918 + loopback).
    Lan,
    /// Reachable from anywhere; no guard is synthesized.
    Public,
}

impl std::fmt::Display for AccessScope {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AccessScope::Host => write!(f, "host"),
            AccessScope::Lan => write!(f, "lan"),
            AccessScope::Public => write!(f, "public"),
        }
    }
}

/// Reverse-proxy level settings.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct CaddySettings {
    /// Contact email for certificate issuance. When set, domain-routed
    /// entries get a TLS automation policy.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
}

/// An externally reachable message-adapter instance routed through the
/// reverse proxy.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct ChannelEntry {
    /// Whether the instance is installed and rendered.
    #[serde(default)]
    pub enabled: bool,
    /// Per-entry override of the stack-wide access scope.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub exposure: Option<AccessScope>,
    /// Name of the builtin or catalog template this instance derives from.
    pub template: String,
    /// Whether more instances of the same template may be added.
    #[serde(default)]
    pub supports_multiple_instances: bool,
    /// Display name.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    /// Display description.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    /// Container image reference.
    pub image: String,
    /// Port the adapter listens on inside its container.
    pub container_port: u16,
    /// Override for the published host port.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub host_port: Option<u16>,
    /// When non-empty, route by hostname (+TLS) instead of by path.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub domains: Vec<String>,
    /// Path prefixes routed to this instance.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub path_prefixes: Vec<String>,
    /// Custom rewrite applied instead of stripping the matched prefix.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rewrite_path: Option<String>,
    /// HTTP path probed by the container healthcheck.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub healthcheck_path: Option<String>,
    /// Name of the HMAC shared-secret env var this adapter expects.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub shared_secret_env: Option<String>,
    /// Volume mounts (`host:container` form).
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub volumes: Vec<String>,
    /// Env var name -> literal value or `${SECRET_NAME}` reference.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub config: BTreeMap<String, String>,
}

/// A non-channel auxiliary container instance.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct ServiceEntry {
    /// Whether the instance is installed and rendered.
    #[serde(default)]
    pub enabled: bool,
    /// Per-entry override of the stack-wide access scope.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub exposure: Option<AccessScope>,
    /// Name of the builtin or catalog template this instance derives from.
    pub template: String,
    /// Whether more instances of the same template may be added.
    #[serde(default)]
    pub supports_multiple_instances: bool,
    /// Display name.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    /// Display description.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    /// Container image reference.
    pub image: String,
    /// Port the service listens on inside its container.
    pub container_port: u16,
    /// Override for the published host port.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub host_port: Option<u16>,
    /// HTTP path probed by the container healthcheck.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub healthcheck_path: Option<String>,
    /// Other service names that must start first.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub depends_on: Vec<String>,
    /// Volume mounts (`host:container` form).
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub volumes: Vec<String>,
    /// Env var name -> literal value or `${SECRET_NAME}` reference.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub config: BTreeMap<String, String>,
}

/// A named, cron-scheduled shell job.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct AutomationJob {
    /// Unique, filesystem-safe identifier. Permanent for core jobs.
    pub id: String,
    /// Display name.
    pub name: String,
    /// Five-field cron expression.
    pub schedule: String,
    /// Shell body executed by the job runner.
    pub script: String,
    /// Whether the scheduler considers this job.
    #[serde(default)]
    pub enabled: bool,
    /// Display description.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    /// System-owned jobs cannot be deleted, only disabled.
    #[serde(default)]
    pub core: bool,
}

/// The versioned stack specification document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct StackSpec {
    /// Schema version; must equal [`SPEC_VERSION`].
    pub version: u32,
    /// Default network reachability for entries without an override.
    #[serde(default)]
    pub access_scope: AccessScope,
    /// Port of the public listener.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ingress_port: Option<u16>,
    /// Reverse-proxy level settings.
    #[serde(default, rename = "caddyConfig", skip_serializing_if = "Option::is_none")]
    pub caddy: Option<CaddySettings>,
    /// Channel instances keyed by instance name.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub channels: BTreeMap<String, ChannelEntry>,
    /// Service instances keyed by instance name.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub services: BTreeMap<String, ServiceEntry>,
    /// Scheduled shell jobs, in declaration order.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub automations: Vec<AutomationJob>,
}

impl Default for StackSpec {
    fn default() -> Self {
        Self {
            version: SPEC_VERSION,
            access_scope: AccessScope::default(),
            ingress_port: None,
            caddy: None,
            channels: BTreeMap::new(),
            services: BTreeMap::new(),
            automations: crate::templates::core_automations(),
        }
    }
}

impl StackSpec {
    /// Parse and validate a spec document from JSON.
    pub fn from_json(raw: &str) -> Result<Self, crate::CoreError> {
        let spec: StackSpec = serde_json::from_str(raw)?;
        crate::validate::validate(&spec)?;
        Ok(spec)
    }

    /// Serialize the spec as pretty-printed JSON with a trailing newline.
    ///
    /// The output is the exact inverse of [`StackSpec::from_json`] for any
    /// value the validator accepts.
    pub fn to_json(&self) -> Result<String, crate::CoreError> {
        let mut out = serde_json::to_string_pretty(self)?;
        out.push('\n');
        Ok(out)
    }

    /// Look up an automation by id.
    pub fn automation(&self, id: &str) -> Option<&AutomationJob> {
        self.automations.iter().find(|j| j.id == id)
    }

    /// Whether any channel or service already uses `name` as its key.
    pub fn has_instance(&self, name: &str) -> bool {
        self.channels.contains_key(name) || self.services.contains_key(name)
    }

    /// All instance names that derive from `template`, across both maps.
    pub fn instances_of(&self, template: &str) -> Vec<&str> {
        self.channels
            .iter()
            .filter(|(_, c)| c.template == template)
            .map(|(k, _)| k.as_str())
            .chain(
                self.services
                    .iter()
                    .filter(|(_, s)| s.template == template)
                    .map(|(k, _)| k.as_str()),
            )
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_spec() -> StackSpec {
        let mut spec = StackSpec::default();
        spec.ingress_port = Some(8443);
        spec.caddy = Some(CaddySettings {
            email: Some("ops@example.com".to_string()),
        });
        spec.channels.insert(
            "telegram".to_string(),
            ChannelEntry {
                enabled: true,
                exposure: Some(AccessScope::Public),
                template: "telegram".to_string(),
                supports_multiple_instances: false,
                name: Some("Telegram".to_string()),
                description: None,
                image: "ghcr.io/homeport/telegram-adapter:1.4".to_string(),
                container_port: 8080,
                host_port: None,
                domains: vec![],
                path_prefixes: vec!["/channels/telegram".to_string()],
                rewrite_path: None,
                healthcheck_path: Some("/healthz".to_string()),
                shared_secret_env: Some("TELEGRAM_WEBHOOK_SECRET".to_string()),
                volumes: vec![],
                config: BTreeMap::from([(
                    "TELEGRAM_BOT_TOKEN".to_string(),
                    "${TELEGRAM_BOT_TOKEN}".to_string(),
                )]),
            },
        );
        spec
    }

    #[test]
    fn test_round_trip_preserves_value() {
        let spec = sample_spec();
        let json = spec.to_json().unwrap();
        let parsed = StackSpec::from_json(&json).unwrap();
        assert_eq!(parsed, spec);
    }

    #[test]
    fn test_default_document_round_trips() {
        let spec = StackSpec::default();
        let json = spec.to_json().unwrap();
        assert_eq!(StackSpec::from_json(&json).unwrap(), spec);
    }

    #[test]
    fn test_unknown_top_level_key_rejected() {
        let raw = r#"{ "version": 1, "clusterMode": true }"#;
        assert!(StackSpec::from_json(raw).is_err());
    }

    #[test]
    fn test_unknown_entry_key_rejected() {
        let raw = r#"{
            "version": 1,
            "channels": {
                "telegram": {
                    "template": "telegram",
                    "image": "ghcr.io/homeport/telegram-adapter:1.4",
                    "containerPort": 8080,
                    "replicas": 3
                }
            }
        }"#;
        assert!(StackSpec::from_json(raw).is_err());
    }

    #[test]
    fn test_instances_of_spans_channels_and_services() {
        let mut spec = sample_spec();
        spec.services.insert(
            "ollama".to_string(),
            ServiceEntry {
                enabled: true,
                exposure: None,
                template: "ollama".to_string(),
                supports_multiple_instances: false,
                name: None,
                description: None,
                image: "ollama/ollama:latest".to_string(),
                container_port: 11434,
                host_port: None,
                healthcheck_path: None,
                depends_on: vec![],
                volumes: vec![],
                config: BTreeMap::new(),
            },
        );
        assert_eq!(spec.instances_of("telegram"), vec!["telegram"]);
        assert_eq!(spec.instances_of("ollama"), vec!["ollama"]);
        assert!(spec.has_instance("ollama"));
        assert!(!spec.has_instance("discord"));
    }
}
