// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Compose descriptor rendering.
//!
//! One entry per fixed core service plus one per enabled channel/service
//! instance, all on a single internal bridge network. Published ports bind
//! to loopback when the effective exposure is host-only and to all
//! interfaces otherwise. Container lifecycle itself is the reconciler's job;
//! this module only describes the desired state.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use homeport_core::model::{AccessScope, StackSpec};
use homeport_core::templates;

use super::{effective_scope, service_name};

/// The fixed internal network every service joins.
pub const NETWORK: &str = "homeport-internal";

/// A parsed or rendered compose file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ComposeFile {
    /// Service entries keyed by derived service name.
    pub services: BTreeMap<String, ComposeService>,
    /// Declared networks.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub networks: BTreeMap<String, ComposeNetwork>,
    /// Declared named volumes.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub volumes: BTreeMap<String, ComposeVolume>,
}

/// One compose service entry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ComposeService {
    /// Container image reference.
    pub image: String,
    /// Restart policy.
    pub restart: String,
    /// Env files, relative to the compose file.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub env_file: Vec<String>,
    /// Published ports (`[host-ip:]host:container`).
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub ports: Vec<String>,
    /// Volume mounts.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub volumes: Vec<String>,
    /// Services that must start first.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub depends_on: Vec<String>,
    /// Health probe.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub healthcheck: Option<Healthcheck>,
    /// Network memberships.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub networks: Vec<String>,
}

/// A compose healthcheck block.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Healthcheck {
    /// Probe command in exec form.
    pub test: Vec<String>,
    /// Probe interval.
    pub interval: String,
    /// Probe timeout.
    pub timeout: String,
    /// Failures before the container is marked unhealthy.
    pub retries: u32,
}

/// A declared network.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ComposeNetwork {
    /// Network driver.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub driver: Option<String>,
}

/// A declared named volume. Compose accepts an empty mapping.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct ComposeVolume {}

fn http_healthcheck(port: u16, path: &str) -> Healthcheck {
    Healthcheck {
        test: vec![
            "CMD".to_string(),
            "wget".to_string(),
            "-q".to_string(),
            "--spider".to_string(),
            format!("http://127.0.0.1:{port}{path}"),
        ],
        interval: "30s".to_string(),
        timeout: "5s".to_string(),
        retries: 3,
    }
}

fn publish(scope: AccessScope, host_port: u16, container_port: u16) -> String {
    match scope {
        AccessScope::Host => format!("127.0.0.1:{host_port}:{container_port}"),
        AccessScope::Lan | AccessScope::Public => format!("{host_port}:{container_port}"),
    }
}

/// Render the full compose descriptor for a spec.
pub fn render_compose(spec: &StackSpec) -> ComposeFile {
    let mut services = BTreeMap::new();

    for core in templates::core_services() {
        let mut entry = ComposeService {
            image: core.image.to_string(),
            restart: "unless-stopped".to_string(),
            env_file: if core.env_allowlist.is_empty() {
                vec![]
            } else {
                vec![format!("./env/{}.env", core.name)]
            },
            ports: vec![],
            volumes: core.volumes.iter().map(|v| (*v).to_string()).collect(),
            depends_on: core.depends_on.iter().map(|d| (*d).to_string()).collect(),
            healthcheck: core.healthcheck.map(|test| Healthcheck {
                test: test.iter().map(|t| (*t).to_string()).collect(),
                interval: "30s".to_string(),
                timeout: "5s".to_string(),
                retries: 3,
            }),
            networks: vec![NETWORK.to_string()],
        };
        if core.name == "caddy" {
            let port = spec.ingress_port.unwrap_or(80);
            entry.ports.push(publish(spec.access_scope, port, port));
        }
        services.insert(core.name.to_string(), entry);
    }

    for (key, channel) in spec.channels.iter().filter(|(_, c)| c.enabled) {
        let name = service_name(key);
        let mut ports = vec![];
        if let Some(host_port) = channel.host_port {
            ports.push(publish(
                effective_scope(spec, channel.exposure),
                host_port,
                channel.container_port,
            ));
        }
        services.insert(
            name.clone(),
            ComposeService {
                image: channel.image.clone(),
                restart: "unless-stopped".to_string(),
                env_file: vec![format!("./env/{name}.env")],
                ports,
                volumes: channel.volumes.clone(),
                depends_on: vec!["gateway".to_string()],
                healthcheck: channel
                    .healthcheck_path
                    .as_deref()
                    .map(|path| http_healthcheck(channel.container_port, path)),
                networks: vec![NETWORK.to_string()],
            },
        );
    }

    for (key, service) in spec.services.iter().filter(|(_, s)| s.enabled) {
        let name = service_name(key);
        let mut ports = vec![];
        if let Some(host_port) = service.host_port {
            ports.push(publish(
                effective_scope(spec, service.exposure),
                host_port,
                service.container_port,
            ));
        }
        services.insert(
            name.clone(),
            ComposeService {
                image: service.image.clone(),
                restart: "unless-stopped".to_string(),
                env_file: vec![format!("./env/{name}.env")],
                ports,
                volumes: service.volumes.clone(),
                depends_on: service.depends_on.iter().map(|d| service_name(d)).collect(),
                healthcheck: service
                    .healthcheck_path
                    .as_deref()
                    .map(|path| http_healthcheck(service.container_port, path)),
                networks: vec![NETWORK.to_string()],
            },
        );
    }

    let volumes = named_volumes(&services);
    ComposeFile {
        services,
        networks: BTreeMap::from([(
            NETWORK.to_string(),
            ComposeNetwork { driver: Some("bridge".to_string()) },
        )]),
        volumes,
    }
}

/// Collect named volumes (sources that are not paths) for the top-level map.
fn named_volumes(services: &BTreeMap<String, ComposeService>) -> BTreeMap<String, ComposeVolume> {
    let mut volumes = BTreeMap::new();
    for service in services.values() {
        for mount in &service.volumes {
            let Some((source, _)) = mount.split_once(':') else {
                continue;
            };
            if !source.starts_with('/') && !source.starts_with('.') {
                volumes.insert(source.to_string(), ComposeVolume::default());
            }
        }
    }
    volumes
}
