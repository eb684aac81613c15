// SPDX-FileCopyrightText: 2026 Chatwarden Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Room identifier derivation for the upstream chat service.
//!
//! All addressing is derived from the entity guid and its parent:
//! - MUC-Light JID: `club-{base}-general@{muc}` for communities,
//!   `club-{parent}-channel-{guid}@{muc}` for channels.
//! - Supergroup base: `club-{base}@{supergroup}` where base is the parent
//!   guid for channels, the entity guid otherwise.
//! - Presence group: supergroup base plus `/general` or `/channel-{guid}`.

use crate::error::WardenError;
use crate::types::{EntityConfig, EntityType};

/// Base guid used for club-level addressing: the parent for channel-style
/// entities, the entity's own guid otherwise.
pub fn base_guid(entity: &EntityConfig) -> &str {
    match entity.entity_type {
        EntityType::Community => &entity.guid,
        EntityType::Chat | EntityType::Ihl => {
            entity.parent_guid.as_deref().unwrap_or(&entity.guid)
        }
    }
}

/// The MUC-Light room JID stanzas are addressed to.
pub fn muc_jid(entity: &EntityConfig, muc_domain: &str) -> String {
    match entity.entity_type {
        EntityType::Community => format!("club-{}-general@{muc_domain}", entity.guid),
        EntityType::Chat | EntityType::Ihl => format!(
            "club-{}-channel-{}@{muc_domain}",
            base_guid(entity),
            entity.guid
        ),
    }
}

/// The supergroup base JID for an entity's club.
pub fn supergroup_jid(entity: &EntityConfig, supergroup_domain: &str) -> String {
    format!("club-{}@{supergroup_domain}", base_guid(entity))
}

/// The presence group an entity's live messages arrive on.
///
/// This is the default derivation; the authoritative value comes back in the
/// MUC-Light configuration reply and overrides it.
pub fn presence_group(entity: &EntityConfig, supergroup_domain: &str) -> String {
    let base = supergroup_jid(entity, supergroup_domain);
    match entity.entity_type {
        EntityType::Community => format!("{base}/general"),
        EntityType::Chat | EntityType::Ihl => format!("{base}/channel-{}", entity.guid),
    }
}

/// Club id used by the admin mute endpoint: parent guid for channel-style
/// entities, the entity guid itself for communities.
pub fn club_id(entity: &EntityConfig) -> &str {
    base_guid(entity)
}

/// The bare JID (everything before the resource separator).
pub fn bare_jid(jid: &str) -> &str {
    jid.split_once('/').map(|(bare, _)| bare).unwrap_or(jid)
}

/// Control-surface port for a worker, derived from the bot id.
///
/// Fails on overflow rather than wrapping into another worker's port.
pub fn worker_port(bot_id: i64) -> Result<u16, WardenError> {
    let port = 4000_i64.checked_add(bot_id).ok_or_else(|| {
        WardenError::Config(format!("bot id {bot_id} overflows the port range"))
    })?;
    u16::try_from(port)
        .map_err(|_| WardenError::Config(format!("derived port {port} out of range for bot {bot_id}")))
}
