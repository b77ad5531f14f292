// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Crate-level error type.

use thiserror::Error;

/// Errors from parsing or validating core documents.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum CoreError {
    /// The document is not valid JSON for the spec schema.
    #[error("Spec parse error: {0}")]
    Parse(#[from] serde_json::Error),

    /// The document parsed but violates a structural rule.
    #[error("Validation error: {0}")]
    Validation(#[from] crate::validate::ValidationError),

    /// A cron expression could not be parsed.
    #[error("Cron error: {0}")]
    Cron(#[from] crate::cron::CronError),
}
