// SPDX-FileCopyrightText: 2026 Chatwarden Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Moderation for chatwarden workers.
//!
//! - [`matcher`]: evasion-tolerant banned-word matching with per-word
//!   compiled patterns.
//! - [`presets`]: reference-counted cache of shared word presets.
//! - [`engine`]: per-entity moderation state and the banned-word review.
//! - [`actions`]: upstream admin-API client (delete, mute).
//! - [`webhook`]: best-effort Discord notification.

pub mod actions;
pub mod engine;
pub mod matcher;
pub mod presets;
pub mod webhook;

pub use actions::AdminApi;
pub use engine::{ModerationEngine, Review, Violation};
pub use matcher::BannedWordMatcher;
pub use presets::PresetCache;
pub use webhook::WebhookNotifier;
