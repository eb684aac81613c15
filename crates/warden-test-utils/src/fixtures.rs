// SPDX-FileCopyrightText: 2026 Chatwarden Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Entity and moderation fixtures shared across test suites.

use std::collections::HashMap;

use warden_core::{Command, EntityConfig, EntityType, Preset, ProfanityConfig, Timer};

/// A community entity with no commands, timers, or welcome message.
pub fn community(guid: &str) -> EntityConfig {
    EntityConfig {
        guid: guid.into(),
        name: format!("room-{guid}"),
        entity_type: EntityType::Community,
        parent_guid: None,
        commands: HashMap::new(),
        timers: Vec::new(),
        timer_counter_max: 0,
        read_only: false,
        welcome_message: None,
    }
}

/// A chat channel under a parent community.
pub fn channel(guid: &str, parent: &str) -> EntityConfig {
    EntityConfig {
        parent_guid: Some(parent.into()),
        entity_type: EntityType::Chat,
        ..community(guid)
    }
}

/// Adds timers with a counter threshold.
pub fn with_timers(mut entity: EntityConfig, messages: &[&str], counter_max: u32) -> EntityConfig {
    entity.timers = messages
        .iter()
        .map(|m| Timer {
            message: m.to_string(),
            attachment_id: None,
        })
        .collect();
    entity.timer_counter_max = counter_max;
    entity
}

/// Adds a `!trigger` command.
pub fn with_command(mut entity: EntityConfig, trigger: &str, response: &str) -> EntityConfig {
    entity.commands.insert(
        trigger.to_lowercase(),
        Command {
            response: response.into(),
            attachment_id: None,
        },
    );
    entity
}

/// An active profanity config with custom words and a mute duration.
pub fn profanity(custom_words: &[&str], managers: &[&str]) -> ProfanityConfig {
    ProfanityConfig {
        preset_id: None,
        custom_words: custom_words.iter().map(|w| w.to_string()).collect(),
        webhook_url: None,
        webhook_message: None,
        chat_reply: None,
        mute_duration_seconds: 60,
        active: true,
        manager_guids: managers.iter().map(|m| m.to_string()).collect(),
    }
}

/// A preset with the given words.
pub fn preset(id: i64, words: &[&str]) -> Preset {
    Preset {
        preset_id: id,
        preset_name: format!("preset-{id}"),
        language: "en".into(),
        words: words.iter().map(|w| w.to_string()).collect(),
    }
}

/// A groupchat message frame from an occupant of a room.
pub fn groupchat_frame(room_jid: &str, author: &str, msg_id: &str, body: &str) -> String {
    format!(
        "<message type='groupchat' from='{room_jid}/{author}' id='{msg_id}'>\
         <body>{body}</body></message>"
    )
}

/// A MUC-Light configuration reply carrying a presence group.
pub fn config_reply_frame(room_jid: &str, presence_group: &str) -> String {
    format!(
        "<iq type='result' id='q1' from='{room_jid}'>\
         <query xmlns='urn:xmpp:muclight:0#configuration'>\
         <presence-group>{presence_group}</presence-group></query></iq>"
    )
}

/// An IQ error frame with a legacy code.
pub fn iq_error_frame(room_jid: &str, code: u16) -> String {
    format!(
        "<iq type='error' id='e1' from='{room_jid}'>\
         <error type='cancel' code='{code}'><item-not-found/></error></iq>"
    )
}
