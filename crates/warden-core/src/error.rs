// SPDX-FileCopyrightText: 2026 Chatwarden Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Error types shared across the chatwarden fleet.

use thiserror::Error;

/// The primary error type used across worker, manager, and data-plane.
#[derive(Debug, Error)]
pub enum WardenError {
    /// Configuration errors (missing required fields, invalid values, port overflow).
    #[error("configuration error: {0}")]
    Config(String),

    /// The upstream rejected our chat session credential (`not-authorized`).
    ///
    /// Handled by forcing a token refresh on the next connection attempt.
    #[error("upstream session not authorized")]
    AuthExpired,

    /// The transport to the upstream chat service was lost.
    #[error("transport lost: {message}")]
    TransportLost {
        message: String,
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    /// The upstream reported a room as gone (IQ error 404 against a known entity).
    #[error("entity no longer exists upstream: {entity_id}")]
    EntityGone { entity_id: String },

    /// The upstream admin API rejected a moderation action with 403.
    #[error("insufficient permissions for {action}")]
    PermissionDenied { action: String },

    /// The data-plane service could not be reached.
    #[error("data-plane unreachable: {message}")]
    DataPlaneUnreachable {
        message: String,
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    /// Malformed dynamic configuration (commands, timers, custom words).
    ///
    /// Callers substitute safe defaults; this variant is for the write path
    /// where malformed values are rejected outright.
    #[error("malformed configuration for {what}")]
    ConfigMalformed { what: String },

    /// Relational store errors (connection, query, migration).
    #[error("storage error: {source}")]
    Storage {
        source: Box<dyn std::error::Error + Send + Sync>,
    },

    /// Outbound HTTP errors that are not one of the specific kinds above.
    #[error("http error: {message}")]
    Http {
        message: String,
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    /// Unrecoverable conditions: startup budget exhausted, circuit breaker
    /// tripped, process watchdog tripped. The process exits nonzero and the
    /// surrounding supervisor restarts it.
    #[error("fatal: {0}")]
    Fatal(String),

    /// Internal or unexpected errors.
    #[error("internal error: {0}")]
    Internal(String),
}

impl WardenError {
    /// Whether this error must terminate the process rather than be retried.
    pub fn is_fatal(&self) -> bool {
        matches!(self, WardenError::Fatal(_))
    }
}
