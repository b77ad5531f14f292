// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Error types for engine operations.
//!
//! Validation and reference errors reject before any write; conflict errors
//! reject with no state change; external-process errors surface after the
//! spec and artifacts are already persisted and never roll them back.

use thiserror::Error;

/// Engine errors.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum Error {
    /// Spec parsing or validation failed.
    #[error("Core error: {0}")]
    Core(#[from] homeport_core::CoreError),

    /// Structural validation failed.
    #[error("Validation error: {0}")]
    Validation(#[from] homeport_core::validate::ValidationError),

    /// A cron expression could not be parsed.
    #[error("Cron error: {0}")]
    Cron(#[from] homeport_core::cron::CronError),

    /// I/O operation failed.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization/deserialization failed.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// YAML serialization/deserialization failed.
    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    /// A `${NAME}` reference did not resolve to a non-empty secret value.
    /// Rendering aborts entirely; no artifact is written.
    #[error("Unresolved secret reference '${{{name}}}' at {location}")]
    UnresolvedSecret {
        /// Spec field holding the reference, e.g. `channels.telegram.TELEGRAM_BOT_TOKEN`.
        location: String,
        /// The referenced secret name.
        name: String,
    },

    /// A secret name is not `[A-Z][A-Z0-9_]*`.
    #[error("Invalid secret name '{0}'")]
    InvalidSecretName(String),

    /// The secret is still required by the core services or referenced by
    /// the spec.
    #[error("Secret '{name}' is in use and cannot be deleted")]
    SecretInUse {
        /// The secret name.
        name: String,
    },

    /// Core automations can be disabled but never deleted.
    #[error("Automation '{id}' is system-owned and cannot be deleted")]
    CoreAutomationImmutable {
        /// The automation id.
        id: String,
    },

    /// No automation with this id exists.
    #[error("Automation not found: {0}")]
    AutomationNotFound(String),

    /// No template with this name exists in the catalog.
    #[error("Unknown template: {0}")]
    UnknownTemplate(String),

    /// The template already has an installation and does not support
    /// multiple instances.
    #[error("Template '{0}' is already installed")]
    AlreadyInstalled(String),

    /// No installed channel/service with this name exists.
    #[error("Not installed: {0}")]
    NotInstalled(String),

    /// An external subprocess (compose backend, proxy reload) failed. The
    /// persisted spec and artifacts are untouched; the apply step can be
    /// retried.
    #[error("External command '{op}' failed (status {status:?}): {stderr}")]
    External {
        /// The operation that was attempted.
        op: String,
        /// Exit code, when the process ran at all.
        status: Option<i32>,
        /// Captured stderr.
        stderr: String,
    },
}

/// Result type using the engine [`Error`].
pub type Result<T> = std::result::Result<T, Error>;
