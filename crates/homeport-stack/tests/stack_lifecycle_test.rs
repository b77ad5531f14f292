// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! End-to-end lifecycle tests over the stack manager: install, configure,
//! render idempotence, fail-closed references, and artifact consistency.

use std::collections::BTreeMap;

use homeport_core::templates::TemplateKind;
use homeport_stack::error::Error;
use homeport_stack::manager::StackManager;
use homeport_stack::paths::StackPaths;
use tempfile::TempDir;

fn manager() -> (TempDir, StackManager) {
    let tmp = TempDir::new().unwrap();
    let paths = StackPaths::new(tmp.path().join("data"));
    paths.ensure().unwrap();
    let manager = StackManager::new(paths, "/bin/sh");
    manager.ensure_core_secrets().unwrap();
    manager.render_now().unwrap();
    (tmp, manager)
}

#[test]
fn install_configure_uninstall_full_cycle() {
    let (_tmp, manager) = manager();
    manager.upsert_secret("TELEGRAM_WEBHOOK_SECRET", "hmac").unwrap();
    manager.upsert_secret("TELEGRAM_BOT_TOKEN", "12345:abc").unwrap();

    let spec = manager.install(TemplateKind::Channel, "telegram").unwrap();
    assert!(spec.channels["telegram"].enabled);

    manager
        .configure(
            TemplateKind::Channel,
            "telegram",
            BTreeMap::from([(
                "TELEGRAM_BOT_TOKEN".to_string(),
                "${TELEGRAM_BOT_TOKEN}".to_string(),
            )]),
        )
        .unwrap();

    let paths = manager.paths();
    let caddy = std::fs::read_to_string(paths.caddy_config()).unwrap();
    assert!(caddy.contains("/channels/telegram"));
    let compose = std::fs::read_to_string(paths.compose_file()).unwrap();
    assert!(compose.contains("telegram"));
    let env = std::fs::read_to_string(paths.env_file("telegram")).unwrap();
    assert!(env.contains("TELEGRAM_BOT_TOKEN=12345:abc"));

    manager.uninstall(TemplateKind::Channel, "telegram").unwrap();
    let compose = std::fs::read_to_string(paths.compose_file()).unwrap();
    assert!(!compose.contains("image: ghcr.io/homeport/telegram-adapter"));
    assert!(!paths.env_file("telegram").exists());
    // The entry survives for reinstallation, configuration intact.
    let spec = manager.current_spec().unwrap();
    assert_eq!(
        spec.channels["telegram"].config["TELEGRAM_BOT_TOKEN"],
        "${TELEGRAM_BOT_TOKEN}"
    );
}

#[test]
fn render_is_idempotent_across_calls() {
    let (_tmp, manager) = manager();
    let report = manager.render_now().unwrap();
    assert!(report.is_empty(), "unexpected actions: {:?}", report.actions);

    let paths = manager.paths();
    let before = std::fs::read(paths.caddy_config()).unwrap();
    manager.render_now().unwrap();
    assert_eq!(std::fs::read(paths.caddy_config()).unwrap(), before);
}

#[test]
fn missing_reference_leaves_artifacts_untouched() {
    let (_tmp, manager) = manager();
    manager.install(TemplateKind::Service, "ollama").unwrap();

    let paths = manager.paths();
    let caddy_before = std::fs::read(paths.caddy_config()).unwrap();
    let compose_before = std::fs::read(paths.compose_file()).unwrap();
    let env_before = std::fs::read(paths.env_file("ollama")).unwrap();

    let err = manager
        .configure(
            TemplateKind::Service,
            "ollama",
            BTreeMap::from([("OLLAMA_MODELS".to_string(), "${MISSING}".to_string())]),
        )
        .unwrap_err();
    assert!(matches!(err, Error::UnresolvedSecret { ref name, .. } if name == "MISSING"));

    // No artifact changed.
    assert_eq!(std::fs::read(paths.caddy_config()).unwrap(), caddy_before);
    assert_eq!(std::fs::read(paths.compose_file()).unwrap(), compose_before);
    assert_eq!(std::fs::read(paths.env_file("ollama")).unwrap(), env_before);

    // Supplying the secret repairs the render on the next mutation.
    manager.upsert_secret("MISSING", "now-present").unwrap();
    let env = std::fs::read_to_string(paths.env_file("ollama")).unwrap();
    assert!(env.contains("OLLAMA_MODELS=now-present"));
}

#[test]
fn catalog_tracks_installations() {
    let (_tmp, manager) = manager();
    let before = manager.list_catalog().unwrap();
    let ollama_rows = |items: &[homeport_stack::catalog::CatalogItem]| {
        items.iter().filter(|i| i.template == "ollama").count()
    };
    assert_eq!(ollama_rows(&before), 1);

    manager.install(TemplateKind::Service, "ollama").unwrap();
    let after = manager.list_catalog().unwrap();
    assert_eq!(ollama_rows(&after), 1);
    assert!(after.iter().any(|i| i.template == "ollama" && i.installed));
}

#[test]
fn spec_file_round_trips_on_disk() {
    let (_tmp, manager) = manager();
    manager.install(TemplateKind::Service, "ollama").unwrap();

    let raw = std::fs::read_to_string(manager.paths().spec_file()).unwrap();
    let parsed = homeport_core::StackSpec::from_json(&raw).unwrap();
    assert_eq!(parsed, *manager.current_spec().unwrap());
    assert_eq!(parsed.to_json().unwrap(), raw);
}
