// SPDX-FileCopyrightText: 2026 Chatwarden Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Domain model shared by the worker, manager, and data-plane.
//!
//! Dynamic per-entity blobs (commands, timers, custom words) are stored as
//! JSON in the relational store. The [`commands_from_json`] /
//! [`timers_from_json`] / [`words_from_json`] helpers parse them defensively:
//! malformed values degrade to empty defaults with a warning instead of
//! failing the read path.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use tracing::warn;

/// Kind of chat room an entity represents.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EntityType {
    /// Standalone community room.
    Community,
    /// Channel within a parent community.
    Chat,
    /// IHL channel within a parent community.
    Ihl,
}

impl EntityType {
    /// Channel-style entities require a parent guid.
    pub fn requires_parent(self) -> bool {
        matches!(self, EntityType::Chat | EntityType::Ihl)
    }
}

/// A chat command: `!trigger` -> response.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Command {
    /// Response text queued when the trigger matches.
    pub response: String,
    /// Optional upload attachment id sent alongside the response.
    #[serde(default)]
    pub attachment_id: Option<String>,
}

/// A timed message emitted on counter rollover, in list order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Timer {
    /// Message text.
    pub message: String,
    /// Optional upload attachment id.
    #[serde(default)]
    pub attachment_id: Option<String>,
}

/// Per-entity configuration as served by the data-plane.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EntityConfig {
    /// Upstream room guid.
    pub guid: String,
    /// Display name.
    pub name: String,
    /// Room kind.
    pub entity_type: EntityType,
    /// Parent community guid; required for chat/ihl entities.
    #[serde(default)]
    pub parent_guid: Option<String>,
    /// Trigger -> command map (triggers are stored lowercased).
    #[serde(default)]
    pub commands: HashMap<String, Command>,
    /// Ordered timed messages.
    #[serde(default)]
    pub timers: Vec<Timer>,
    /// Messages between timer emissions.
    #[serde(default)]
    pub timer_counter_max: u32,
    /// When set, non-exempt messages are deleted on sight.
    #[serde(default)]
    pub read_only: bool,
    /// Optional direct message for newly added members.
    #[serde(default)]
    pub welcome_message: Option<String>,
}

/// Bot credentials as served by `GET /bots/:id/config`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BotConfig {
    /// Upstream account guid the worker authenticates as.
    pub bot_guid: String,
    /// Short-lived access credential (bearer token for the admin API).
    pub bot_token: String,
    /// Display name.
    pub nickname: String,
}

/// Per-entity profanity/moderation configuration, extended with the manager
/// exemption list by `GET /profanity-filter-config/:entityId`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProfanityConfig {
    /// Shared preset referenced by id, if any.
    #[serde(default)]
    pub preset_id: Option<i64>,
    /// Entity-specific banned words, unioned with the preset.
    #[serde(default)]
    pub custom_words: Vec<String>,
    /// Discord webhook notified on violations.
    #[serde(default)]
    pub webhook_url: Option<String>,
    /// Custom webhook message prefix.
    #[serde(default)]
    pub webhook_message: Option<String>,
    /// Optional in-chat reply queued on violations.
    #[serde(default)]
    pub chat_reply: Option<String>,
    /// Mute duration for violators; 0 means no mute.
    #[serde(default)]
    pub mute_duration_seconds: u64,
    /// Whether the banned-word stage runs at all.
    #[serde(default)]
    pub active: bool,
    /// User guids exempt from moderation in this entity.
    #[serde(default)]
    pub manager_guids: Vec<String>,
}

/// A shared banned-word preset.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Preset {
    pub preset_id: i64,
    pub preset_name: String,
    pub language: String,
    pub words: Vec<String>,
}

/// Parses a commands JSON blob, degrading to an empty map on malformed input.
pub fn commands_from_json(raw: &str) -> HashMap<String, Command> {
    if raw.trim().is_empty() {
        return HashMap::new();
    }
    match serde_json::from_str::<HashMap<String, Command>>(raw) {
        Ok(map) => map
            .into_iter()
            .map(|(trigger, cmd)| (trigger.to_lowercase(), cmd))
            .collect(),
        Err(e) => {
            warn!(error = %e, "malformed commands blob, using empty map");
            HashMap::new()
        }
    }
}

/// Parses a timers JSON blob, degrading to an empty list on malformed input.
pub fn timers_from_json(raw: &str) -> Vec<Timer> {
    if raw.trim().is_empty() {
        return Vec::new();
    }
    match serde_json::from_str::<Vec<Timer>>(raw) {
        Ok(timers) => timers,
        Err(e) => {
            warn!(error = %e, "malformed timers blob, using empty list");
            Vec::new()
        }
    }
}

/// Parses a custom-words JSON blob, degrading to an empty list on malformed input.
pub fn words_from_json(raw: &str) -> Vec<String> {
    if raw.trim().is_empty() {
        return Vec::new();
    }
    match serde_json::from_str::<Vec<String>>(raw) {
        Ok(words) => words,
        Err(e) => {
            warn!(error = %e, "malformed custom_words blob, using empty list");
            Vec::new()
        }
    }
}
