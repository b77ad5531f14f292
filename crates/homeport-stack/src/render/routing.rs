// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Reverse-proxy routing config rendering.
//!
//! Produces the Caddy JSON app tree: one guarded route per enabled channel,
//! then a catch-all fallback to the admin gateway. The guard is a network
//! match derived from the effective exposure - `host` admits loopback only,
//! `lan` adds the private ranges, `public` has no guard. Channels with
//! domains route by hostname instead of path; when a certificate contact
//! email is configured they are also covered by a TLS automation policy.

use serde_json::{Value, json};

use homeport_core::model::{AccessScope, ChannelEntry, StackSpec};
use homeport_core::templates::GATEWAY_SERVICE;

use super::{effective_scope, service_name};

/// CIDR ranges admitted for host-only exposure.
const LOOPBACK_RANGES: &[&str] = &["127.0.0.1/32", "::1/128"];

/// CIDR ranges admitted for LAN exposure, in addition to loopback.
const PRIVATE_RANGES: &[&str] = &[
    "10.0.0.0/8",
    "172.16.0.0/12",
    "192.168.0.0/16",
    "169.254.0.0/16",
    "fc00::/7",
    "fe80::/10",
];

/// The ranges admitted by a scope, or `None` for an unguarded route.
fn allowed_ranges(scope: AccessScope) -> Option<Vec<&'static str>> {
    match scope {
        AccessScope::Host => Some(LOOPBACK_RANGES.to_vec()),
        AccessScope::Lan => {
            let mut ranges = LOOPBACK_RANGES.to_vec();
            ranges.extend_from_slice(PRIVATE_RANGES);
            Some(ranges)
        }
        AccessScope::Public => None,
    }
}

/// A 403 route matching every client outside the allowed ranges.
fn guard_route(ranges: &[&str]) -> Value {
    json!({
        "match": [{ "not": [{ "remote_ip": { "ranges": ranges } }] }],
        "handle": [{ "handler": "static_response", "status_code": 403 }]
    })
}

/// The proxy leg of a subroute: optional rewrite, then reverse_proxy.
fn proxy_route(upstream: &str, rewrite: Option<Value>) -> Value {
    let mut handle = Vec::new();
    if let Some(rewrite) = rewrite {
        handle.push(rewrite);
    }
    handle.push(json!({
        "handler": "reverse_proxy",
        "upstreams": [{ "dial": upstream }]
    }));
    json!({ "handle": handle })
}

/// Wrap guard + proxy into one terminal subroute with the given matcher.
fn terminal_route(matcher: Value, scope: AccessScope, proxy: Value) -> Value {
    let mut routes = Vec::new();
    if let Some(ranges) = allowed_ranges(scope) {
        routes.push(guard_route(&ranges));
    }
    routes.push(proxy);
    json!({
        "match": [matcher],
        "handle": [{ "handler": "subroute", "routes": routes }],
        "terminal": true
    })
}

/// Routes for one enabled channel. Domain entries get one host-matched
/// route; path entries get one route per prefix.
fn channel_routes(spec: &StackSpec, key: &str, channel: &ChannelEntry) -> Vec<Value> {
    let scope = effective_scope(spec, channel.exposure);
    let upstream = format!("{}:{}", service_name(key), channel.container_port);
    let mut routes = Vec::new();

    if !channel.domains.is_empty() {
        let rewrite = channel
            .rewrite_path
            .as_deref()
            .map(|uri| json!({ "handler": "rewrite", "uri": uri }));
        routes.push(terminal_route(
            json!({ "host": channel.domains }),
            scope,
            proxy_route(&upstream, rewrite),
        ));
        return routes;
    }

    for prefix in &channel.path_prefixes {
        let rewrite = match channel.rewrite_path.as_deref() {
            Some(uri) => json!({ "handler": "rewrite", "uri": uri }),
            None => json!({ "handler": "rewrite", "strip_path_prefix": prefix }),
        };
        routes.push(terminal_route(
            json!({ "path": [prefix.clone(), format!("{prefix}/*")] }),
            scope,
            proxy_route(&upstream, Some(rewrite)),
        ));
    }
    routes
}

/// Render the full reverse-proxy configuration for a spec.
pub fn render_caddy(spec: &StackSpec) -> Value {
    let mut routes = Vec::new();
    for (key, channel) in spec.channels.iter().filter(|(_, c)| c.enabled) {
        routes.extend(channel_routes(spec, key, channel));
    }

    // Catch-all admin-panel fallback, guarded by the stack-wide scope.
    let (gateway, gateway_port) = GATEWAY_SERVICE;
    let mut fallback = Vec::new();
    if let Some(ranges) = allowed_ranges(spec.access_scope) {
        fallback.push(guard_route(&ranges));
    }
    fallback.push(proxy_route(&format!("{gateway}:{gateway_port}"), None));
    routes.push(json!({
        "handle": [{ "handler": "subroute", "routes": fallback }],
        "terminal": true
    }));

    let listen_port = spec.ingress_port.unwrap_or(80);
    let mut config = json!({
        "admin": { "disabled": true },
        "apps": {
            "http": {
                "servers": {
                    "main": {
                        "listen": [format!(":{listen_port}")],
                        "routes": routes
                    }
                }
            }
        }
    });

    // Certificate automation only when a contact email is configured and at
    // least one channel routes by hostname.
    let email = spec.caddy.as_ref().and_then(|c| c.email.as_deref());
    let subjects: Vec<String> = spec
        .channels
        .values()
        .filter(|c| c.enabled)
        .flat_map(|c| c.domains.iter().cloned())
        .collect();
    if let (Some(email), false) = (email, subjects.is_empty()) {
        config["apps"]["tls"] = json!({
            "automation": {
                "policies": [{
                    "subjects": subjects,
                    "issuers": [{ "module": "acme", "email": email }]
                }]
            }
        });
    }

    config
}

#[cfg(test)]
mod tests {
    use super::*;
    use homeport_core::model::CaddySettings;
    use homeport_core::templates;

    fn spec_with_channel(mutate: impl FnOnce(&mut ChannelEntry)) -> StackSpec {
        let mut spec = StackSpec::default();
        let mut entry = templates::find_builtin("telegram")
            .unwrap()
            .channel_entry("telegram");
        mutate(&mut entry);
        spec.channels.insert("telegram".to_string(), entry);
        spec
    }

    fn routes(config: &Value) -> &Vec<Value> {
        config["apps"]["http"]["servers"]["main"]["routes"]
            .as_array()
            .unwrap()
    }

    #[test]
    fn test_admin_endpoint_disabled() {
        let config = render_caddy(&StackSpec::default());
        assert_eq!(config["admin"]["disabled"], json!(true));
    }

    #[test]
    fn test_empty_spec_has_only_fallback() {
        let config = render_caddy(&StackSpec::default());
        let routes = routes(&config);
        assert_eq!(routes.len(), 1);
        // Default host scope guards the admin panel with loopback ranges.
        let subroutes = routes[0]["handle"][0]["routes"].as_array().unwrap();
        assert_eq!(subroutes.len(), 2);
        assert_eq!(
            subroutes[0]["match"][0]["not"][0]["remote_ip"]["ranges"],
            json!(LOOPBACK_RANGES)
        );
    }

    #[test]
    fn test_path_route_strips_prefix() {
        let spec = spec_with_channel(|_| {});
        let config = render_caddy(&spec);
        let routes = routes(&config);
        assert_eq!(routes.len(), 2);
        assert_eq!(
            routes[0]["match"][0]["path"],
            json!(["/channels/telegram", "/channels/telegram/*"])
        );
        let subroutes = routes[0]["handle"][0]["routes"].as_array().unwrap();
        let proxy = subroutes.last().unwrap();
        assert_eq!(
            proxy["handle"][0]["strip_path_prefix"],
            json!("/channels/telegram")
        );
        assert_eq!(
            proxy["handle"][1]["upstreams"][0]["dial"],
            json!("telegram:8080")
        );
        assert_eq!(routes[0]["terminal"], json!(true));
    }

    #[test]
    fn test_custom_rewrite_replaces_strip() {
        let spec = spec_with_channel(|c| c.rewrite_path = Some("/hook".to_string()));
        let config = render_caddy(&spec);
        let subroutes = routes(&config)[0]["handle"][0]["routes"].as_array().unwrap();
        let proxy = subroutes.last().unwrap();
        assert_eq!(proxy["handle"][0]["uri"], json!("/hook"));
    }

    #[test]
    fn test_public_channel_has_no_guard() {
        let spec = spec_with_channel(|c| c.exposure = Some(AccessScope::Public));
        let config = render_caddy(&spec);
        let subroutes = routes(&config)[0]["handle"][0]["routes"].as_array().unwrap();
        // Proxy only, no 403 leg.
        assert_eq!(subroutes.len(), 1);
    }

    #[test]
    fn test_lan_guard_includes_private_ranges() {
        let spec = spec_with_channel(|c| c.exposure = Some(AccessScope::Lan));
        let config = render_caddy(&spec);
        let subroutes = routes(&config)[0]["handle"][0]["routes"].as_array().unwrap();
        let ranges = subroutes[0]["match"][0]["not"][0]["remote_ip"]["ranges"]
            .as_array()
            .unwrap();
        assert!(ranges.contains(&json!("10.0.0.0/8")));
        assert!(ranges.contains(&json!("127.0.0.1/32")));
    }

    #[test]
    fn test_domain_route_and_tls_policy() {
        let mut spec = spec_with_channel(|c| {
            c.domains = vec!["bot.example.com".to_string()];
            c.exposure = Some(AccessScope::Public);
        });
        spec.caddy = Some(CaddySettings { email: Some("ops@example.com".to_string()) });
        let config = render_caddy(&spec);
        let routes = routes(&config);
        assert_eq!(routes[0]["match"][0]["host"], json!(["bot.example.com"]));
        assert_eq!(
            config["apps"]["tls"]["automation"]["policies"][0]["issuers"][0]["email"],
            json!("ops@example.com")
        );
    }

    #[test]
    fn test_no_tls_app_without_email() {
        let spec = spec_with_channel(|c| {
            c.domains = vec!["bot.example.com".to_string()];
        });
        let config = render_caddy(&spec);
        assert!(config["apps"].get("tls").is_none());
    }

    #[test]
    fn test_listen_uses_ingress_port() {
        let mut spec = StackSpec::default();
        spec.ingress_port = Some(8443);
        let config = render_caddy(&spec);
        assert_eq!(
            config["apps"]["http"]["servers"]["main"]["listen"],
            json!([":8443"])
        );
    }
}
