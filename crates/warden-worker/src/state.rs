// SPDX-FileCopyrightText: 2026 Chatwarden Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! In-memory room state of one worker.
//!
//! The entity map is reconciled against the data-plane; per-room counters
//! live in a separate table so the hourly cleanup pass can drop entries
//! whose room has disappeared.

use std::collections::{HashMap, HashSet};
use std::time::{Duration, Instant};

use warden_core::{EntityConfig, jid};

/// Per-room session state.
#[derive(Debug, Clone)]
pub struct RoomState {
    pub entity: EntityConfig,
    /// Authoritative presence group from the MUC-Light configuration reply.
    pub presence_group: Option<String>,
}

/// Timer bookkeeping per room.
#[derive(Debug, Clone, Copy, Default)]
pub struct RoomCounters {
    /// Messages since the last timer emission.
    pub counter: u32,
    /// Round-robin cursor into the timers list.
    pub cursor: usize,
}

/// All mutable room state of one worker.
#[derive(Debug)]
pub struct WorkerState {
    pub rooms: HashMap<String, RoomState>,
    pub counters: HashMap<String, RoomCounters>,
    /// Entities the upstream reported gone; outgoing stanzas to them are
    /// suppressed until an explicit assign clears the flag.
    pub non_existent: HashSet<String>,
    /// Recently unassigned entities with their leave time.
    recently_unassigned: HashMap<String, Instant>,
    unassign_debounce: Duration,
}

impl WorkerState {
    pub fn new(unassign_debounce: Duration) -> Self {
        Self {
            rooms: HashMap::new(),
            counters: HashMap::new(),
            non_existent: HashSet::new(),
            recently_unassigned: HashMap::new(),
            unassign_debounce,
        }
    }

    /// Inserts a newly assigned entity; the presence group is learned later
    /// from the configuration reply.
    pub fn insert_entity(&mut self, entity: EntityConfig) {
        let guid = entity.guid.clone();
        self.rooms.insert(
            guid.clone(),
            RoomState {
                entity,
                presence_group: None,
            },
        );
        self.counters.entry(guid).or_default();
    }

    /// Overwrites a kept entity's configuration in place, preserving the
    /// presence group and counters. Inserts when the entity is new.
    pub fn update_entity(&mut self, entity: EntityConfig) {
        match self.rooms.get_mut(&entity.guid) {
            Some(room) => room.entity = entity,
            None => self.insert_entity(entity),
        }
    }

    /// Drops an entity and its counters.
    pub fn remove_entity(&mut self, entity_id: &str) -> Option<RoomState> {
        self.counters.remove(entity_id);
        self.rooms.remove(entity_id)
    }

    pub fn entity_ids(&self) -> HashSet<String> {
        self.rooms.keys().cloned().collect()
    }

    /// Resolves an inbound bare JID (MUC room, supergroup base, or presence
    /// group base) to the entity it belongs to.
    pub fn room_by_jid(
        &self,
        bare_jid: &str,
        muc_domain: &str,
        supergroup_domain: &str,
    ) -> Option<String> {
        for (id, room) in &self.rooms {
            if jid::muc_jid(&room.entity, muc_domain) == bare_jid
                || jid::supergroup_jid(&room.entity, supergroup_domain) == bare_jid
            {
                return Some(id.clone());
            }
            if let Some(pg) = &room.presence_group
                && jid::bare_jid(pg) == bare_jid
            {
                return Some(id.clone());
            }
        }
        None
    }

    /// Marks an entity as recently unassigned.
    pub fn mark_unassigned(&mut self, entity_id: &str, now: Instant) {
        self.recently_unassigned.insert(entity_id.to_string(), now);
    }

    /// Clears the unassign debounce (on assignment).
    pub fn clear_unassigned(&mut self, entity_id: &str) {
        self.recently_unassigned.remove(entity_id);
    }

    /// Whether the unassign debounce window is still open for an entity.
    pub fn recently_unassigned(&self, entity_id: &str, now: Instant) -> bool {
        self.recently_unassigned
            .get(entity_id)
            .is_some_and(|left| now.duration_since(*left) < self.unassign_debounce)
    }

    /// Periodic memory cleanup: drops counters for rooms no longer in the
    /// entity map and expires old unassign entries.
    pub fn cleanup(&mut self, now: Instant) {
        self.counters.retain(|id, _| self.rooms.contains_key(id));
        let debounce = self.unassign_debounce;
        self.recently_unassigned
            .retain(|_, left| now.duration_since(*left) < debounce);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap as Map;
    use warden_core::EntityType;

    fn entity(guid: &str) -> EntityConfig {
        EntityConfig {
            guid: guid.into(),
            name: "room".into(),
            entity_type: EntityType::Community,
            parent_guid: None,
            commands: Map::new(),
            timers: Vec::new(),
            timer_counter_max: 0,
            read_only: false,
            welcome_message: None,
        }
    }

    fn state() -> WorkerState {
        WorkerState::new(Duration::from_secs(300))
    }

    #[test]
    fn insert_and_resolve_by_muc_jid() {
        let mut s = state();
        s.insert_entity(entity("e1"));
        assert_eq!(
            s.room_by_jid("club-e1-general@muc.x", "muc.x", "sg.x"),
            Some("e1".to_string())
        );
        assert_eq!(
            s.room_by_jid("club-e1@sg.x", "muc.x", "sg.x"),
            Some("e1".to_string())
        );
        assert_eq!(s.room_by_jid("club-other-general@muc.x", "muc.x", "sg.x"), None);
    }

    #[test]
    fn resolve_by_learned_presence_group() {
        let mut s = state();
        s.insert_entity(entity("e1"));
        s.rooms.get_mut("e1").unwrap().presence_group =
            Some("club-custom@sg.x/general".to_string());
        assert_eq!(
            s.room_by_jid("club-custom@sg.x", "muc.x", "sg.x"),
            Some("e1".to_string())
        );
    }

    #[test]
    fn update_preserves_presence_group_and_counters() {
        let mut s = state();
        s.insert_entity(entity("e1"));
        s.rooms.get_mut("e1").unwrap().presence_group = Some("pg".into());
        s.counters.get_mut("e1").unwrap().counter = 7;

        let mut updated = entity("e1");
        updated.read_only = true;
        s.update_entity(updated);

        let room = &s.rooms["e1"];
        assert!(room.entity.read_only);
        assert_eq!(room.presence_group.as_deref(), Some("pg"));
        assert_eq!(s.counters["e1"].counter, 7);
    }

    #[test]
    fn unassign_debounce_window() {
        let mut s = state();
        let now = Instant::now();
        s.mark_unassigned("e1", now);
        assert!(s.recently_unassigned("e1", now));
        assert!(s.recently_unassigned("e1", now + Duration::from_secs(299)));
        assert!(!s.recently_unassigned("e1", now + Duration::from_secs(301)));

        s.clear_unassigned("e1");
        assert!(!s.recently_unassigned("e1", now));
    }

    #[test]
    fn cleanup_drops_orphaned_counters_and_expired_debounces() {
        let mut s = state();
        s.insert_entity(entity("kept"));
        s.counters.insert("orphan".into(), RoomCounters::default());
        let now = Instant::now();
        s.mark_unassigned("old", now);

        s.cleanup(now + Duration::from_secs(400));
        assert!(s.counters.contains_key("kept"));
        assert!(!s.counters.contains_key("orphan"));
        assert!(!s.recently_unassigned("old", now + Duration::from_secs(400)));
    }
}
