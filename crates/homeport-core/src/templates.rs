// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Compiled-in templates and core service definitions.
//!
//! Builtin templates are the channel/service types homeport ships with; the
//! catalog merges them with installed instances and externally discovered
//! snippets. Core services are always rendered into the compose descriptor
//! regardless of the spec's channel/service maps.

use std::collections::BTreeMap;

use crate::model::{AutomationJob, ChannelEntry, ServiceEntry};

/// Whether a template produces a routed channel or an auxiliary service.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum TemplateKind {
    /// Routed message adapter.
    Channel,
    /// Auxiliary container without routing fields.
    Service,
}

impl std::fmt::Display for TemplateKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TemplateKind::Channel => write!(f, "channel"),
            TemplateKind::Service => write!(f, "service"),
        }
    }
}

/// A compiled-in template definition.
#[derive(Debug, Clone, Copy)]
pub struct BuiltinTemplate {
    /// Template name; also the default instance name.
    pub name: &'static str,
    /// Channel or service.
    pub kind: TemplateKind,
    /// Human-readable name.
    pub display_name: &'static str,
    /// One-line description for the catalog.
    pub description: &'static str,
    /// Container image reference.
    pub image: &'static str,
    /// Port the container listens on.
    pub container_port: u16,
    /// Default path prefixes (channels only).
    pub path_prefixes: &'static [&'static str],
    /// Config keys an instance of this template may declare. Keys outside
    /// this set are dropped by `configure`.
    pub config_keys: &'static [&'static str],
    /// Whether several instances may be installed.
    pub supports_multiple_instances: bool,
    /// Healthcheck path, when the adapter exposes one.
    pub healthcheck_path: Option<&'static str>,
    /// Name of the HMAC shared-secret env var the adapter expects.
    pub shared_secret_env: Option<&'static str>,
}

const BUILTINS: &[BuiltinTemplate] = &[
    BuiltinTemplate {
        name: "webchat",
        kind: TemplateKind::Channel,
        display_name: "Web Chat",
        description: "Browser chat widget served behind the proxy",
        image: "ghcr.io/homeport/webchat:1",
        container_port: 8080,
        path_prefixes: &["/channels/webchat"],
        config_keys: &["WEBCHAT_TITLE", "WEBCHAT_THEME", "GATEWAY_API_TOKEN"],
        supports_multiple_instances: true,
        healthcheck_path: Some("/healthz"),
        shared_secret_env: None,
    },
    BuiltinTemplate {
        name: "telegram",
        kind: TemplateKind::Channel,
        display_name: "Telegram",
        description: "Telegram bot webhook adapter",
        image: "ghcr.io/homeport/telegram-adapter:1",
        container_port: 8080,
        path_prefixes: &["/channels/telegram"],
        config_keys: &["TELEGRAM_BOT_TOKEN", "TELEGRAM_ALLOWED_CHATS"],
        supports_multiple_instances: false,
        healthcheck_path: Some("/healthz"),
        shared_secret_env: Some("TELEGRAM_WEBHOOK_SECRET"),
    },
    BuiltinTemplate {
        name: "discord",
        kind: TemplateKind::Channel,
        display_name: "Discord",
        description: "Discord gateway adapter",
        image: "ghcr.io/homeport/discord-adapter:1",
        container_port: 8080,
        path_prefixes: &["/channels/discord"],
        config_keys: &["DISCORD_BOT_TOKEN", "DISCORD_GUILD_ID"],
        supports_multiple_instances: false,
        healthcheck_path: Some("/healthz"),
        shared_secret_env: None,
    },
    BuiltinTemplate {
        name: "slack",
        kind: TemplateKind::Channel,
        display_name: "Slack",
        description: "Slack events adapter",
        image: "ghcr.io/homeport/slack-adapter:1",
        container_port: 8080,
        path_prefixes: &["/channels/slack"],
        config_keys: &["SLACK_BOT_TOKEN", "SLACK_APP_TOKEN"],
        supports_multiple_instances: false,
        healthcheck_path: Some("/healthz"),
        shared_secret_env: Some("SLACK_SIGNING_SECRET"),
    },
    BuiltinTemplate {
        name: "voice-gateway",
        kind: TemplateKind::Channel,
        display_name: "Voice Gateway",
        description: "SIP/WebRTC voice bridge",
        image: "ghcr.io/homeport/voice-gateway:1",
        container_port: 8090,
        path_prefixes: &["/channels/voice"],
        config_keys: &["VOICE_STUN_SERVER", "VOICE_CODEC"],
        supports_multiple_instances: false,
        healthcheck_path: Some("/healthz"),
        shared_secret_env: None,
    },
    BuiltinTemplate {
        name: "mcp-bridge",
        kind: TemplateKind::Channel,
        display_name: "MCP Bridge",
        description: "Model Context Protocol endpoint",
        image: "ghcr.io/homeport/mcp-bridge:1",
        container_port: 8080,
        path_prefixes: &["/channels/mcp"],
        config_keys: &["MCP_UPSTREAM_URL", "MCP_AUTH_TOKEN"],
        supports_multiple_instances: true,
        healthcheck_path: Some("/healthz"),
        shared_secret_env: None,
    },
    BuiltinTemplate {
        name: "ollama",
        kind: TemplateKind::Service,
        display_name: "Ollama",
        description: "Local model runtime",
        image: "ollama/ollama:latest",
        container_port: 11434,
        path_prefixes: &[],
        config_keys: &["OLLAMA_MODELS", "OLLAMA_KEEP_ALIVE"],
        supports_multiple_instances: false,
        healthcheck_path: None,
        shared_secret_env: None,
    },
];

/// All compiled-in templates.
pub fn builtin_templates() -> &'static [BuiltinTemplate] {
    BUILTINS
}

/// Look up a compiled-in template by name.
pub fn find_builtin(name: &str) -> Option<&'static BuiltinTemplate> {
    BUILTINS.iter().find(|t| t.name == name)
}

impl BuiltinTemplate {
    /// Materialize a channel entry from this template's defaults.
    ///
    /// `instance` is the spec key the entry will be stored under; it feeds the
    /// default path prefix so several instances never collide on a route.
    pub fn channel_entry(&self, instance: &str) -> ChannelEntry {
        ChannelEntry {
            enabled: true,
            exposure: None,
            template: self.name.to_string(),
            supports_multiple_instances: self.supports_multiple_instances,
            name: Some(self.display_name.to_string()),
            description: Some(self.description.to_string()),
            image: self.image.to_string(),
            container_port: self.container_port,
            host_port: None,
            domains: Vec::new(),
            path_prefixes: self
                .path_prefixes
                .iter()
                .map(|p| {
                    if instance == self.name {
                        (*p).to_string()
                    } else {
                        format!("{p}-{}", instance.trim_start_matches(self.name).trim_start_matches('-'))
                    }
                })
                .collect(),
            rewrite_path: None,
            healthcheck_path: self.healthcheck_path.map(str::to_string),
            shared_secret_env: self.shared_secret_env.map(str::to_string),
            volumes: Vec::new(),
            config: BTreeMap::new(),
        }
    }

    /// Materialize a service entry from this template's defaults.
    pub fn service_entry(&self) -> ServiceEntry {
        ServiceEntry {
            enabled: true,
            exposure: None,
            template: self.name.to_string(),
            supports_multiple_instances: self.supports_multiple_instances,
            name: Some(self.display_name.to_string()),
            description: Some(self.description.to_string()),
            image: self.image.to_string(),
            container_port: self.container_port,
            host_port: None,
            healthcheck_path: self.healthcheck_path.map(str::to_string),
            depends_on: Vec::new(),
            volumes: Vec::new(),
            config: BTreeMap::new(),
        }
    }
}

/// A fixed service rendered into every compose descriptor.
#[derive(Debug, Clone, Copy)]
pub struct CoreService {
    /// Compose service name.
    pub name: &'static str,
    /// Container image reference.
    pub image: &'static str,
    /// Container port, when the service is addressable.
    pub container_port: Option<u16>,
    /// Secret names copied into this service's env file.
    pub env_allowlist: &'static [&'static str],
    /// Volume mounts.
    pub volumes: &'static [&'static str],
    /// Core services that must start first.
    pub depends_on: &'static [&'static str],
    /// Healthcheck command, when the image supports one.
    pub healthcheck: Option<&'static [&'static str]>,
}

const CORE_SERVICES: &[CoreService] = &[
    CoreService {
        name: "gateway",
        image: "ghcr.io/homeport/gateway:1",
        container_port: Some(8100),
        env_allowlist: &["GATEWAY_API_TOKEN", "POSTGRES_PASSWORD"],
        volumes: &["homeport-gateway-data:/var/lib/homeport"],
        depends_on: &["postgres"],
        healthcheck: Some(&["CMD", "wget", "-q", "--spider", "http://127.0.0.1:8100/healthz"]),
    },
    CoreService {
        name: "postgres",
        image: "postgres:16-alpine",
        container_port: Some(5432),
        env_allowlist: &["POSTGRES_PASSWORD"],
        volumes: &["homeport-postgres-data:/var/lib/postgresql/data"],
        depends_on: &[],
        healthcheck: Some(&["CMD-SHELL", "pg_isready -U postgres"]),
    },
    CoreService {
        name: "caddy",
        image: "caddy:2-alpine",
        container_port: None,
        env_allowlist: &[],
        volumes: &[
            "./artifacts/caddy.json:/etc/caddy/caddy.json:ro",
            "homeport-caddy-data:/data",
        ],
        depends_on: &["gateway"],
        healthcheck: None,
    },
];

/// The fixed core services.
pub fn core_services() -> &'static [CoreService] {
    CORE_SERVICES
}

/// Compose service name and port of the admin gateway, the catch-all route
/// target.
pub const GATEWAY_SERVICE: (&str, u16) = ("gateway", 8100);

/// System-owned automations shipped with the default document. Their ids are
/// permanent; they can be disabled but never deleted.
pub fn core_automations() -> Vec<AutomationJob> {
    vec![
        AutomationJob {
            id: "backup-spec".to_string(),
            name: "Back up stack spec".to_string(),
            schedule: "30 3 * * *".to_string(),
            script: "cp stack.json secrets.env backups/ 2>/dev/null || true".to_string(),
            enabled: true,
            description: Some("Daily copy of the spec and secret files".to_string()),
            core: true,
        },
        AutomationJob {
            id: "prune-logs".to_string(),
            name: "Prune automation logs".to_string(),
            schedule: "0 4 * * 0".to_string(),
            script: "find automations/logs -name '*.jsonl' -size +10M -delete".to_string(),
            enabled: false,
            description: Some("Weekly removal of oversized job logs".to_string()),
            core: true,
        },
    ]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_find_builtin() {
        assert!(find_builtin("telegram").is_some());
        assert!(find_builtin("minecraft").is_none());
    }

    #[test]
    fn test_channel_entry_defaults() {
        let tpl = find_builtin("telegram").unwrap();
        let entry = tpl.channel_entry("telegram");
        assert!(entry.enabled);
        assert_eq!(entry.template, "telegram");
        assert_eq!(entry.path_prefixes, vec!["/channels/telegram"]);
        assert_eq!(entry.container_port, 8080);
    }

    #[test]
    fn test_multi_instance_prefixes_do_not_collide() {
        let tpl = find_builtin("webchat").unwrap();
        let first = tpl.channel_entry("webchat");
        let second = tpl.channel_entry("webchat-2");
        assert_eq!(first.path_prefixes, vec!["/channels/webchat"]);
        assert_eq!(second.path_prefixes, vec!["/channels/webchat-2"]);
    }

    #[test]
    fn test_core_service_names_are_reserved_shape() {
        for svc in core_services() {
            assert!(svc.name.chars().all(|c| c.is_ascii_lowercase()));
        }
    }

    #[test]
    fn test_core_automations_are_core() {
        for job in core_automations() {
            assert!(job.core);
            assert!(crate::cron::Schedule::parse(&job.schedule).is_ok());
        }
    }
}
