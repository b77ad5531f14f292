// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Per-service env file rendering.
//!
//! Core services select an explicit allow-list of secret names; channel and
//! service instances resolve their full `config` map, with `${NAME}` values
//! looked up in the secret store. Any reference that resolves to a missing
//! or empty value aborts the entire render with the offending field
//! identified - no partial artifact set is ever produced.

use std::collections::BTreeMap;

use homeport_core::model::StackSpec;
use homeport_core::secrets::{SecretRef, render_env_file};
use homeport_core::templates;

use super::service_name;
use crate::error::{Error, Result};

fn lookup<'a>(
    secrets: &'a BTreeMap<String, String>,
    location: String,
    name: &str,
) -> Result<&'a str> {
    match secrets.get(name) {
        Some(value) if !value.is_empty() => Ok(value),
        _ => Err(Error::UnresolvedSecret { location, name: name.to_string() }),
    }
}

/// Resolve one instance config map into env file lines.
fn resolve_config(
    prefix: &str,
    config: &BTreeMap<String, String>,
    secrets: &BTreeMap<String, String>,
) -> Result<BTreeMap<String, String>> {
    let mut out = BTreeMap::new();
    for (key, value) in config {
        let resolved = match SecretRef::of(value) {
            SecretRef::Literal(v) => v.to_string(),
            SecretRef::Reference(name) => {
                lookup(secrets, format!("{prefix}.{key}"), name)?.to_string()
            }
        };
        out.insert(key.clone(), resolved);
    }
    Ok(out)
}

/// Render every service's env file contents, keyed by compose service name.
pub fn render_env_files(
    spec: &StackSpec,
    secrets: &BTreeMap<String, String>,
) -> Result<BTreeMap<String, String>> {
    let mut files = BTreeMap::new();

    for core in templates::core_services() {
        if core.env_allowlist.is_empty() {
            continue;
        }
        let mut vars = BTreeMap::new();
        for name in core.env_allowlist {
            let value = lookup(secrets, format!("core.{}", core.name), name)?;
            vars.insert((*name).to_string(), value.to_string());
        }
        files.insert(core.name.to_string(), render_env_file(&vars));
    }

    for (key, channel) in spec.channels.iter().filter(|(_, c)| c.enabled) {
        let name = service_name(key);
        let mut vars = resolve_config(&format!("channels.{key}"), &channel.config, secrets)?;
        // The HMAC shared secret is an implicit reference by name.
        if let Some(env_name) = &channel.shared_secret_env {
            let value = lookup(secrets, format!("channels.{key}.sharedSecretEnv"), env_name)?;
            vars.insert(env_name.clone(), value.to_string());
        }
        files.insert(name, render_env_file(&vars));
    }

    for (key, service) in spec.services.iter().filter(|(_, s)| s.enabled) {
        let name = service_name(key);
        let vars = resolve_config(&format!("services.{key}"), &service.config, secrets)?;
        files.insert(name, render_env_file(&vars));
    }

    Ok(files)
}

#[cfg(test)]
mod tests {
    use super::*;
    use homeport_core::secrets::CORE_SECRETS;

    fn base_secrets() -> BTreeMap<String, String> {
        CORE_SECRETS
            .iter()
            .map(|n| ((*n).to_string(), "core-value".to_string()))
            .collect()
    }

    fn spec_with_config(value: &str) -> StackSpec {
        let mut spec = StackSpec::default();
        let mut entry = templates::find_builtin("telegram")
            .unwrap()
            .channel_entry("telegram");
        entry.shared_secret_env = None;
        entry
            .config
            .insert("TELEGRAM_BOT_TOKEN".to_string(), value.to_string());
        spec.channels.insert("telegram".to_string(), entry);
        spec
    }

    #[test]
    fn test_core_allowlist_selection() {
        let files = render_env_files(&StackSpec::default(), &base_secrets()).unwrap();
        assert!(files["postgres"].contains("POSTGRES_PASSWORD=core-value"));
        assert!(files["gateway"].contains("GATEWAY_API_TOKEN=core-value"));
        // Caddy has no allow-list, so no env file.
        assert!(!files.contains_key("caddy"));
    }

    #[test]
    fn test_reference_resolution() {
        let spec = spec_with_config("${TELEGRAM_BOT_TOKEN}");
        let mut secrets = base_secrets();
        secrets.insert("TELEGRAM_BOT_TOKEN".to_string(), "12345:abc".to_string());
        let files = render_env_files(&spec, &secrets).unwrap();
        assert!(files["telegram"].contains("TELEGRAM_BOT_TOKEN=12345:abc"));
    }

    #[test]
    fn test_literal_passthrough() {
        let spec = spec_with_config("literal-token");
        let files = render_env_files(&spec, &base_secrets()).unwrap();
        assert!(files["telegram"].contains("TELEGRAM_BOT_TOKEN=literal-token"));
    }

    #[test]
    fn test_missing_reference_fails_closed() {
        let spec = spec_with_config("${MISSING}");
        let err = render_env_files(&spec, &base_secrets()).unwrap_err();
        match err {
            Error::UnresolvedSecret { location, name } => {
                assert_eq!(location, "channels.telegram.TELEGRAM_BOT_TOKEN");
                assert_eq!(name, "MISSING");
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_empty_secret_value_fails_closed() {
        let spec = spec_with_config("${EMPTY}");
        let mut secrets = base_secrets();
        secrets.insert("EMPTY".to_string(), String::new());
        assert!(render_env_files(&spec, &secrets).is_err());
    }

    #[test]
    fn test_shared_secret_env_is_required() {
        let mut spec = StackSpec::default();
        let entry = templates::find_builtin("telegram")
            .unwrap()
            .channel_entry("telegram");
        spec.channels.insert("telegram".to_string(), entry);

        let err = render_env_files(&spec, &base_secrets()).unwrap_err();
        assert!(matches!(err, Error::UnresolvedSecret { ref name, .. } if name == "TELEGRAM_WEBHOOK_SECRET"));

        let mut secrets = base_secrets();
        secrets.insert("TELEGRAM_WEBHOOK_SECRET".to_string(), "hmac".to_string());
        let files = render_env_files(&spec, &secrets).unwrap();
        assert!(files["telegram"].contains("TELEGRAM_WEBHOOK_SECRET=hmac"));
    }

    #[test]
    fn test_disabled_instances_have_no_env_file() {
        let mut spec = spec_with_config("x");
        if let Some(c) = spec.channels.get_mut("telegram") {
            c.enabled = false;
        }
        let files = render_env_files(&spec, &base_secrets()).unwrap();
        assert!(!files.contains_key("telegram"));
    }
}
