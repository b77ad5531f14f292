// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Structural validation of a stack spec.
//!
//! Runs after deserialization and before every persist. Each rejection gets
//! its own variant so the admin layer can map errors to reason codes without
//! string matching. Unknown fields never reach this pass - serde rejects them
//! at parse time.

use std::collections::BTreeSet;
use std::sync::LazyLock;

use regex::Regex;
use thiserror::Error;

use crate::cron::Schedule;
use crate::model::{AutomationJob, ChannelEntry, ServiceEntry, SPEC_VERSION, StackSpec};
use crate::secrets;
use crate::templates;

/// Channel/service/automation identifiers: filesystem- and compose-safe.
static IDENT: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"^[a-z0-9][a-z0-9-]{0,62}$").unwrap());

/// Container image references: `registry/repo:tag` shapes, no uppercase.
static IMAGE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[a-z0-9][a-z0-9._/-]*(:[a-zA-Z0-9._-]+)?(@sha256:[a-f0-9]{64})?$").unwrap());

/// Hostnames: lowercase DNS labels joined by dots.
static DOMAIN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^[a-z0-9]([a-z0-9-]*[a-z0-9])?(\.[a-z0-9]([a-z0-9-]*[a-z0-9])?)+$").unwrap()
});

/// Errors from validating a stack spec.
#[derive(Debug, Error, PartialEq, Eq)]
#[non_exhaustive]
pub enum ValidationError {
    /// Spec schema version does not match the supported version.
    #[error("unsupported spec version {found}, expected {SPEC_VERSION}")]
    Version {
        /// Version found in the document.
        found: u32,
    },

    /// A channel/service/automation identifier is not filesystem-safe.
    #[error("invalid identifier '{0}'")]
    Identifier(String),

    /// A port is outside `[1, 65535]`.
    #[error("invalid port {port} for '{entry}'")]
    Port {
        /// Entry the port belongs to.
        entry: String,
        /// The offending port.
        port: u32,
    },

    /// An image reference is malformed.
    #[error("invalid image reference '{image}' for '{entry}'")]
    Image {
        /// Entry the image belongs to.
        entry: String,
        /// The offending reference.
        image: String,
    },

    /// A domain is not a valid hostname.
    #[error("invalid domain '{domain}' for '{entry}'")]
    Domain {
        /// Entry the domain belongs to.
        entry: String,
        /// The offending domain.
        domain: String,
    },

    /// A path prefix or rewrite path is malformed.
    #[error("invalid path '{path}' for '{entry}'")]
    Path {
        /// Entry the path belongs to.
        entry: String,
        /// The offending path.
        path: String,
    },

    /// A config value looks like `${...}` but is not a valid reference.
    #[error("malformed secret reference '{value}' in '{entry}.{key}'")]
    SecretReference {
        /// Entry the value belongs to.
        entry: String,
        /// Config key holding the value.
        key: String,
        /// The offending value.
        value: String,
    },

    /// A builtin-template instance declares a config key its template does
    /// not allow.
    #[error("config key '{key}' not allowed by template '{template}' for '{entry}'")]
    ConfigKey {
        /// Entry declaring the key.
        entry: String,
        /// The builtin template.
        template: String,
        /// The offending key.
        key: String,
    },

    /// A `dependsOn` name does not exist in the services map.
    #[error("'{entry}' depends on unknown service '{dependency}'")]
    UnknownDependency {
        /// Entry declaring the dependency.
        entry: String,
        /// The missing service name.
        dependency: String,
    },

    /// An automation field is empty.
    #[error("automation '{id}' has an empty {field}")]
    EmptyAutomationField {
        /// Automation id (or `<missing>` when the id itself is empty).
        id: String,
        /// Name of the empty field.
        field: &'static str,
    },

    /// Two automations share an id.
    #[error("duplicate automation id '{0}'")]
    DuplicateAutomation(String),

    /// An automation schedule does not parse.
    #[error("automation '{id}': {source}")]
    Schedule {
        /// Automation id.
        id: String,
        /// Underlying parse error.
        #[source]
        source: crate::cron::CronError,
    },
}

/// Whether `name` is a valid channel/service/automation identifier.
pub fn is_valid_identifier(name: &str) -> bool {
    IDENT.is_match(name)
}

/// Validate a parsed spec. Returns the first violation found.
pub fn validate(spec: &StackSpec) -> Result<(), ValidationError> {
    if spec.version != SPEC_VERSION {
        return Err(ValidationError::Version { found: spec.version });
    }

    if let Some(port) = spec.ingress_port {
        check_port("ingress", port)?;
    }

    for (name, channel) in &spec.channels {
        validate_channel(name, channel)?;
    }
    for (name, service) in &spec.services {
        validate_service(name, service, spec)?;
    }
    validate_automations(&spec.automations)?;

    Ok(())
}

fn check_identifier(name: &str) -> Result<(), ValidationError> {
    if is_valid_identifier(name) {
        Ok(())
    } else {
        Err(ValidationError::Identifier(name.to_string()))
    }
}

fn check_port(entry: &str, port: u16) -> Result<(), ValidationError> {
    if port == 0 {
        return Err(ValidationError::Port { entry: entry.to_string(), port: port as u32 });
    }
    Ok(())
}

fn check_image(entry: &str, image: &str) -> Result<(), ValidationError> {
    if IMAGE.is_match(image) {
        Ok(())
    } else {
        Err(ValidationError::Image {
            entry: entry.to_string(),
            image: image.to_string(),
        })
    }
}

fn check_path(entry: &str, path: &str) -> Result<(), ValidationError> {
    let ok = path.starts_with('/')
        && !path.contains("..")
        && !path.chars().any(char::is_whitespace);
    if ok {
        Ok(())
    } else {
        Err(ValidationError::Path {
            entry: entry.to_string(),
            path: path.to_string(),
        })
    }
}

fn check_config(
    entry: &str,
    template: &str,
    config: &std::collections::BTreeMap<String, String>,
) -> Result<(), ValidationError> {
    // Builtin templates constrain the key set; catalog/custom entries accept
    // arbitrary keys.
    let allowed = templates::find_builtin(template).map(|t| t.config_keys);
    for (key, value) in config {
        if let Some(keys) = allowed {
            if !keys.contains(&key.as_str()) {
                return Err(ValidationError::ConfigKey {
                    entry: entry.to_string(),
                    template: template.to_string(),
                    key: key.clone(),
                });
            }
        }
        if secrets::is_malformed_reference(value) {
            return Err(ValidationError::SecretReference {
                entry: entry.to_string(),
                key: key.clone(),
                value: value.clone(),
            });
        }
    }
    Ok(())
}

fn validate_channel(name: &str, channel: &ChannelEntry) -> Result<(), ValidationError> {
    check_identifier(name)?;
    check_image(name, &channel.image)?;
    check_port(name, channel.container_port)?;
    if let Some(port) = channel.host_port {
        check_port(name, port)?;
    }
    for domain in &channel.domains {
        if !DOMAIN.is_match(domain) {
            return Err(ValidationError::Domain {
                entry: name.to_string(),
                domain: domain.clone(),
            });
        }
    }
    for prefix in &channel.path_prefixes {
        check_path(name, prefix)?;
    }
    if let Some(rewrite) = &channel.rewrite_path {
        check_path(name, rewrite)?;
    }
    if let Some(path) = &channel.healthcheck_path {
        check_path(name, path)?;
    }
    check_config(name, &channel.template, &channel.config)
}

fn validate_service(
    name: &str,
    service: &ServiceEntry,
    spec: &StackSpec,
) -> Result<(), ValidationError> {
    check_identifier(name)?;
    check_image(name, &service.image)?;
    check_port(name, service.container_port)?;
    if let Some(port) = service.host_port {
        check_port(name, port)?;
    }
    if let Some(path) = &service.healthcheck_path {
        check_path(name, path)?;
    }
    for dep in &service.depends_on {
        if !spec.services.contains_key(dep) {
            return Err(ValidationError::UnknownDependency {
                entry: name.to_string(),
                dependency: dep.clone(),
            });
        }
    }
    check_config(name, &service.template, &service.config)
}

/// Validate an automation list: identifiers, non-empty fields, unique ids,
/// parseable schedules. Also used by the manager on upsert.
pub fn validate_automations(jobs: &[AutomationJob]) -> Result<(), ValidationError> {
    let mut seen = BTreeSet::new();
    for job in jobs {
        validate_automation(job)?;
        if !seen.insert(job.id.as_str()) {
            return Err(ValidationError::DuplicateAutomation(job.id.clone()));
        }
    }
    Ok(())
}

/// Validate a single automation.
pub fn validate_automation(job: &AutomationJob) -> Result<(), ValidationError> {
    if job.id.is_empty() {
        return Err(ValidationError::EmptyAutomationField {
            id: "<missing>".to_string(),
            field: "id",
        });
    }
    check_identifier(&job.id)?;
    if job.name.trim().is_empty() {
        return Err(ValidationError::EmptyAutomationField {
            id: job.id.clone(),
            field: "name",
        });
    }
    if job.script.trim().is_empty() {
        return Err(ValidationError::EmptyAutomationField {
            id: job.id.clone(),
            field: "script",
        });
    }
    Schedule::parse(&job.schedule).map_err(|source| ValidationError::Schedule {
        id: job.id.clone(),
        source,
    })?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;

    fn spec_with_channel(name: &str, mutate: impl FnOnce(&mut ChannelEntry)) -> StackSpec {
        let mut spec = StackSpec::default();
        let mut entry = templates::find_builtin("telegram")
            .unwrap()
            .channel_entry(name);
        mutate(&mut entry);
        spec.channels.insert(name.to_string(), entry);
        spec
    }

    #[test]
    fn test_version_mismatch_is_hard_failure() {
        let mut spec = StackSpec::default();
        spec.version = 2;
        assert_eq!(validate(&spec), Err(ValidationError::Version { found: 2 }));
    }

    #[test]
    fn test_default_spec_is_valid() {
        assert_eq!(validate(&StackSpec::default()), Ok(()));
    }

    #[test]
    fn test_bad_instance_name() {
        let spec = spec_with_channel("Bad_Name", |_| {});
        assert!(matches!(
            validate(&spec),
            Err(ValidationError::Identifier(name)) if name == "Bad_Name"
        ));
    }

    #[test]
    fn test_bad_image() {
        let spec = spec_with_channel("telegram", |c| {
            c.image = "Registry/Bad Image".to_string();
        });
        assert!(matches!(validate(&spec), Err(ValidationError::Image { .. })));
    }

    #[test]
    fn test_image_with_digest_accepted() {
        let digest = "a".repeat(64);
        let spec = spec_with_channel("telegram", |c| {
            c.image = format!("ghcr.io/homeport/telegram-adapter:1@sha256:{digest}");
        });
        assert_eq!(validate(&spec), Ok(()));
    }

    #[test]
    fn test_bad_domain() {
        let spec = spec_with_channel("telegram", |c| {
            c.domains = vec!["Not A Domain".to_string()];
        });
        assert!(matches!(validate(&spec), Err(ValidationError::Domain { .. })));
    }

    #[test]
    fn test_bad_path_prefix() {
        for bad in ["no-slash", "/has space", "/dot/../dot"] {
            let spec = spec_with_channel("telegram", |c| {
                c.path_prefixes = vec![bad.to_string()];
            });
            assert!(matches!(validate(&spec), Err(ValidationError::Path { .. })), "{bad}");
        }
    }

    #[test]
    fn test_builtin_template_constrains_config_keys() {
        let spec = spec_with_channel("telegram", |c| {
            c.config
                .insert("NOT_A_TELEGRAM_KEY".to_string(), "x".to_string());
        });
        assert!(matches!(validate(&spec), Err(ValidationError::ConfigKey { .. })));
    }

    #[test]
    fn test_custom_template_accepts_any_keys() {
        let spec = spec_with_channel("telegram", |c| {
            c.template = "community-bridge".to_string();
            c.config
                .insert("ANYTHING_GOES".to_string(), "x".to_string());
        });
        assert_eq!(validate(&spec), Ok(()));
    }

    #[test]
    fn test_malformed_secret_reference() {
        let spec = spec_with_channel("telegram", |c| {
            c.config
                .insert("TELEGRAM_BOT_TOKEN".to_string(), "${not-valid}".to_string());
        });
        assert!(matches!(
            validate(&spec),
            Err(ValidationError::SecretReference { .. })
        ));
    }

    #[test]
    fn test_unknown_dependency() {
        let mut spec = StackSpec::default();
        let mut entry = templates::find_builtin("ollama").unwrap().service_entry();
        entry.depends_on = vec!["redis".to_string()];
        spec.services.insert("ollama".to_string(), entry);
        assert!(matches!(
            validate(&spec),
            Err(ValidationError::UnknownDependency { .. })
        ));
    }

    #[test]
    fn test_automation_rules() {
        let job = AutomationJob {
            id: "nightly-sync".to_string(),
            name: "Nightly sync".to_string(),
            schedule: "0 2 * * *".to_string(),
            script: "echo hi".to_string(),
            enabled: true,
            description: None,
            core: false,
        };
        assert_eq!(validate_automation(&job), Ok(()));

        let mut bad = job.clone();
        bad.schedule = "often".to_string();
        assert!(matches!(
            validate_automation(&bad),
            Err(ValidationError::Schedule { .. })
        ));

        let mut empty = job.clone();
        empty.script = "   ".to_string();
        assert!(matches!(
            validate_automation(&empty),
            Err(ValidationError::EmptyAutomationField { field: "script", .. })
        ));

        let dup = vec![job.clone(), job];
        assert!(matches!(
            validate_automations(&dup),
            Err(ValidationError::DuplicateAutomation(_))
        ));
    }

    #[test]
    fn test_zero_port_rejected() {
        let raw = r#"{ "version": 1, "ingressPort": 0 }"#;
        let spec: StackSpec = serde_json::from_str(raw).unwrap();
        assert!(matches!(validate(&spec), Err(ValidationError::Port { .. })));
    }

    #[test]
    fn test_config_map_keys_unconstrained_for_empty_config() {
        let spec = spec_with_channel("telegram", |c| c.config.clear());
        assert_eq!(validate(&spec), Ok(()));
    }
}
