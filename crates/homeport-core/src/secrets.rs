// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Flat secret file format and `${NAME}` reference syntax.
//!
//! Secrets live in a single human-editable `KEY=value` file. Spec config
//! values refer to them indirectly as `${NAME}`; resolution happens at render
//! time. This module is format only - caching, persistence, and the deletion
//! guard live in the `homeport-stack` secret store.

use std::collections::BTreeMap;
use std::sync::LazyLock;

use regex::Regex;

/// Secret names that are always required by the core services and can never
/// be deleted.
pub const CORE_SECRETS: &[&str] = &["POSTGRES_PASSWORD", "GATEWAY_API_TOKEN"];

static SECRET_REF: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^\$\{([A-Z][A-Z0-9_]*)\}$").unwrap());

static SECRET_NAME: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[A-Z][A-Z0-9_]*$").unwrap());

/// A config value, classified.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SecretRef<'a> {
    /// A literal value used as-is.
    Literal(&'a str),
    /// An indirect `${NAME}` reference into the secret file.
    Reference(&'a str),
}

impl<'a> SecretRef<'a> {
    /// Classify a config value as a literal or a `${NAME}` reference.
    pub fn of(value: &'a str) -> Self {
        match SECRET_REF.captures(value) {
            Some(caps) => match caps.get(1) {
                Some(name) => SecretRef::Reference(name.as_str()),
                None => SecretRef::Literal(value),
            },
            None => SecretRef::Literal(value),
        }
    }

    /// The referenced secret name, if this is a reference.
    pub fn reference(value: &'a str) -> Option<&'a str> {
        match Self::of(value) {
            SecretRef::Reference(name) => Some(name),
            SecretRef::Literal(_) => None,
        }
    }
}

/// Whether `name` is a valid secret name (`[A-Z][A-Z0-9_]*`).
pub fn is_valid_secret_name(name: &str) -> bool {
    SECRET_NAME.is_match(name)
}

/// Whether `value` looks like a reference attempt (`${...}`) that does not
/// parse as one. Used by the validator to reject malformed references early.
pub fn is_malformed_reference(value: &str) -> bool {
    value.starts_with("${") && SecretRef::reference(value).is_none()
}

/// Parse a flat `KEY=value` file.
///
/// Comment lines (`#`) and blank lines are ignored. Values may be wrapped in
/// single or double quotes; the quotes are stripped. Lines without `=` are
/// skipped.
pub fn parse_env_file(raw: &str) -> BTreeMap<String, String> {
    let mut map = BTreeMap::new();
    for line in raw.lines() {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        let Some((key, value)) = line.split_once('=') else {
            continue;
        };
        let key = key.trim();
        if key.is_empty() {
            continue;
        }
        map.insert(key.to_string(), unquote(value.trim()).to_string());
    }
    map
}

/// Render a secret map back to `KEY=value` lines, sorted, trailing newline.
///
/// Values containing spaces or `#` are double-quoted so the file re-parses to
/// the same map.
pub fn render_env_file(map: &BTreeMap<String, String>) -> String {
    let mut out = String::new();
    for (key, value) in map {
        if value.contains(' ') || value.contains('#') {
            out.push_str(&format!("{key}=\"{value}\"\n"));
        } else {
            out.push_str(&format!("{key}={value}\n"));
        }
    }
    out
}

fn unquote(value: &str) -> &str {
    let bytes = value.as_bytes();
    if bytes.len() >= 2 {
        let (first, last) = (bytes[0], bytes[bytes.len() - 1]);
        if (first == b'"' && last == b'"') || (first == b'\'' && last == b'\'') {
            return &value[1..value.len() - 1];
        }
    }
    value
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_ignores_comments_and_blanks() {
        let raw = "# secrets\n\nPOSTGRES_PASSWORD=hunter2\n  # indented comment\nAPI_KEY='abc def'\nQUOTED=\"x=y\"\n";
        let map = parse_env_file(raw);
        assert_eq!(map.len(), 3);
        assert_eq!(map["POSTGRES_PASSWORD"], "hunter2");
        assert_eq!(map["API_KEY"], "abc def");
        assert_eq!(map["QUOTED"], "x=y");
    }

    #[test]
    fn test_render_round_trips() {
        let mut map = BTreeMap::new();
        map.insert("A".to_string(), "plain".to_string());
        map.insert("B".to_string(), "has space".to_string());
        map.insert("C".to_string(), "tagged#value".to_string());
        assert_eq!(parse_env_file(&render_env_file(&map)), map);
    }

    #[test]
    fn test_reference_classification() {
        assert_eq!(
            SecretRef::of("${TELEGRAM_BOT_TOKEN}"),
            SecretRef::Reference("TELEGRAM_BOT_TOKEN")
        );
        assert_eq!(SecretRef::of("plain"), SecretRef::Literal("plain"));
        // Embedded references are not recognized; the whole value must be one.
        assert_eq!(
            SecretRef::of("prefix-${NAME}"),
            SecretRef::Literal("prefix-${NAME}")
        );
        assert_eq!(SecretRef::reference("${A_1}"), Some("A_1"));
        assert_eq!(SecretRef::reference("${lower}"), None);
    }

    #[test]
    fn test_malformed_reference_detection() {
        assert!(is_malformed_reference("${lower}"));
        assert!(is_malformed_reference("${1BAD}"));
        assert!(is_malformed_reference("${}"));
        assert!(!is_malformed_reference("${GOOD_NAME}"));
        assert!(!is_malformed_reference("literal"));
    }

    #[test]
    fn test_core_secret_names_are_valid() {
        for name in CORE_SECRETS {
            assert!(is_valid_secret_name(name));
        }
    }
}
