// SPDX-FileCopyrightText: 2026 Chatwarden Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! The chatwarden data-plane: one HTTP endpoint in front of the relational
//! store.
//!
//! Serves bot rosters and per-entity configuration to workers and the
//! manager, owns the upstream OAuth refresh flow (rate-limited per bot),
//! and fans configuration changes out to the affected workers.

pub mod fanout;
pub mod http;
pub mod store;
pub mod tokens;

pub use http::{AppState, router};
