// SPDX-FileCopyrightText: 2026 Chatwarden Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Shared domain types for the chatwarden moderation fleet.
//!
//! This crate holds everything the worker, manager, and data-plane agree on:
//! the entity/bot data model, the [`WardenError`] taxonomy, and the room
//! address derivation rules for the upstream chat service.

pub mod error;
pub mod jid;
pub mod types;

pub use error::WardenError;
pub use types::{
    BotConfig, Command, EntityConfig, EntityType, Preset, ProfanityConfig, Timer,
};
