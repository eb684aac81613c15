// SPDX-FileCopyrightText: 2026 Chatwarden Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Configuration for the chatwarden fleet.
//!
//! All three binaries load the same [`WardenConfig`] from compiled defaults,
//! an optional `warden.toml`, and `WARDEN_*` environment variables. Every
//! timing constant of the worker and manager is a config field so tests can
//! shrink intervals without patching code.

pub mod loader;
pub mod model;
pub mod validation;

pub use loader::{load_config, load_config_from_str};
pub use model::WardenConfig;
