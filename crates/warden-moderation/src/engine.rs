// SPDX-FileCopyrightText: 2026 Chatwarden Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Per-entity moderation state and the banned-word review.
//!
//! The engine owns the preset cache and one compiled matcher per entity.
//! Matchers are rebuilt (never patched) on configure and preset refresh.

use std::collections::{HashMap, HashSet};

use tracing::{debug, warn};
use warden_core::{Preset, ProfanityConfig};

use crate::matcher::BannedWordMatcher;
use crate::presets::PresetCache;

/// A banned-word hit.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Violation {
    /// The banned word that matched.
    pub word: String,
}

/// Moderation state for one entity: its config and compiled matcher.
pub struct EntityModeration {
    config: ProfanityConfig,
    /// Manager guids lowercased for exemption lookups.
    managers: HashSet<String>,
    matcher: BannedWordMatcher,
}

/// Moderation state for all entities of one worker.
#[derive(Default)]
pub struct ModerationEngine {
    presets: PresetCache,
    entities: HashMap<String, EntityModeration>,
}

impl ModerationEngine {
    pub fn new() -> Self {
        Self::default()
    }

    /// Whether configuring an entity with this preset id needs a fetch first.
    pub fn needs_preset(&self, preset_id: i64) -> bool {
        !self.presets.contains(preset_id)
    }

    /// Installs or replaces an entity's moderation configuration.
    ///
    /// `fetched` must carry the preset when `config.preset_id` is set and
    /// [`needs_preset`](Self::needs_preset) returned true; a missing preset
    /// degrades to custom words only.
    pub fn configure(&mut self, entity_id: &str, config: ProfanityConfig, fetched: Option<Preset>) {
        // Acquire the new preset before releasing the old one so a
        // reconfigure onto the same id never drops it to zero in between.
        let preset = match config.preset_id {
            Some(id) => match self.presets.acquire(id) {
                Some(preset) => Some(preset),
                None => match fetched {
                    Some(preset) if preset.preset_id == id => Some(self.presets.insert(preset)),
                    _ => {
                        warn!(entity_id, preset_id = id, "preset unavailable, using custom words only");
                        None
                    }
                },
            },
            None => None,
        };

        if let Some(previous) = self.entities.remove(entity_id)
            && let Some(old_id) = previous.config.preset_id
        {
            self.presets.release(old_id);
        }

        let matcher = build_matcher(&config, preset.as_deref().map(|p| p.words.as_slice()));
        let managers = config
            .manager_guids
            .iter()
            .map(|g| g.to_lowercase())
            .collect();
        debug!(entity_id, words = matcher.len(), "moderation configured");
        self.entities.insert(
            entity_id.to_string(),
            EntityModeration {
                config,
                managers,
                matcher,
            },
        );
    }

    /// Releases an entity's moderation resources.
    pub fn remove(&mut self, entity_id: &str) {
        if let Some(entry) = self.entities.remove(entity_id)
            && let Some(preset_id) = entry.config.preset_id
        {
            self.presets.release(preset_id);
        }
    }

    /// Replaces a cached preset and rebuilds every matcher referencing it.
    /// Returns false when nothing references the preset.
    pub fn refresh_preset(&mut self, preset: Preset) -> bool {
        let preset_id = preset.preset_id;
        if !self.presets.refresh(preset) {
            return false;
        }
        let words = self.presets.get(preset_id);
        for (entity_id, entry) in &mut self.entities {
            if entry.config.preset_id == Some(preset_id) {
                entry.matcher = build_matcher(
                    &entry.config,
                    words.as_deref().map(|p| p.words.as_slice()),
                );
                debug!(entity_id = entity_id.as_str(), preset_id, "matcher rebuilt after preset refresh");
            }
        }
        true
    }

    /// Stage-A review: returns the violation, or `None` when the stage is
    /// inactive, the author is exempt, or the message is clean.
    pub fn review(&self, entity_id: &str, author_guid: &str, bot_guid: &str) -> Review<'_> {
        let Some(entry) = self.entities.get(entity_id) else {
            return Review::Skip;
        };
        if !entry.config.active {
            return Review::Skip;
        }
        let author = author_guid.to_lowercase();
        if author == bot_guid.to_lowercase() || entry.managers.contains(&author) {
            return Review::Exempt;
        }
        Review::Check(entry)
    }

    /// Whether the author is exempt from moderation in this entity
    /// (the bot itself or a listed manager).
    pub fn is_exempt(&self, entity_id: &str, author_guid: &str, bot_guid: &str) -> bool {
        let author = author_guid.to_lowercase();
        if author == bot_guid.to_lowercase() {
            return true;
        }
        self.entities
            .get(entity_id)
            .is_some_and(|e| e.managers.contains(&author))
    }

    /// Currently cached preset ids (test observability).
    pub fn cached_preset_ids(&self) -> Vec<i64> {
        self.presets.ids()
    }
}

/// Outcome of the stage-A precondition checks.
pub enum Review<'a> {
    /// No active config for the entity; skip the stage.
    Skip,
    /// Author is exempt; skip the stage.
    Exempt,
    /// Run the matcher.
    Check(&'a EntityModeration),
}

impl EntityModeration {
    /// Checks the message body against the effective word list.
    pub fn check(&self, body: &str) -> Option<Violation> {
        self.matcher.check(body).map(|word| Violation {
            word: word.to_string(),
        })
    }

    /// The entity's profanity configuration.
    pub fn config(&self) -> &ProfanityConfig {
        &self.config
    }
}

/// Effective word list: preset words unioned with custom words, lowercased
/// and deduplicated.
fn build_matcher(config: &ProfanityConfig, preset_words: Option<&[String]>) -> BannedWordMatcher {
    let mut seen = HashSet::new();
    let mut words = Vec::new();
    for word in preset_words
        .unwrap_or_default()
        .iter()
        .chain(config.custom_words.iter())
    {
        let lower = word.to_lowercase();
        if seen.insert(lower.clone()) {
            words.push(lower);
        }
    }
    BannedWordMatcher::new(words.iter().map(String::as_str))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn profanity(preset_id: Option<i64>, custom: &[&str], managers: &[&str]) -> ProfanityConfig {
        ProfanityConfig {
            preset_id,
            custom_words: custom.iter().map(|w| w.to_string()).collect(),
            webhook_url: None,
            webhook_message: None,
            chat_reply: None,
            mute_duration_seconds: 60,
            active: true,
            manager_guids: managers.iter().map(|m| m.to_string()).collect(),
        }
    }

    fn preset(id: i64, words: &[&str]) -> Preset {
        Preset {
            preset_id: id,
            preset_name: "test".into(),
            language: "en".into(),
            words: words.iter().map(|w| w.to_string()).collect(),
        }
    }

    fn check(engine: &ModerationEngine, entity: &str, author: &str, body: &str) -> Option<Violation> {
        match engine.review(entity, author, "bot-guid") {
            Review::Check(entry) => entry.check(body),
            _ => None,
        }
    }

    #[test]
    fn union_of_preset_and_custom_words() {
        let mut engine = ModerationEngine::new();
        engine.configure("e1", profanity(Some(1), &["custom"], &[]), Some(preset(1, &["preset"])));

        assert!(check(&engine, "e1", "u1", "a preset word").is_some());
        assert!(check(&engine, "e1", "u1", "a custom word").is_some());
        assert!(check(&engine, "e1", "u1", "clean").is_none());
    }

    #[test]
    fn inactive_config_skips_stage() {
        let mut engine = ModerationEngine::new();
        let mut cfg = profanity(None, &["bad"], &[]);
        cfg.active = false;
        engine.configure("e1", cfg, None);
        assert!(matches!(engine.review("e1", "u1", "bot-guid"), Review::Skip));
    }

    #[test]
    fn managers_and_bot_are_exempt() {
        let mut engine = ModerationEngine::new();
        engine.configure("e1", profanity(None, &["bad"], &["Mgr-1"]), None);

        assert!(matches!(engine.review("e1", "MGR-1", "bot-guid"), Review::Exempt));
        assert!(matches!(engine.review("e1", "Bot-Guid", "bot-guid"), Review::Exempt));
        assert!(matches!(engine.review("e1", "u1", "bot-guid"), Review::Check(_)));
    }

    #[test]
    fn preset_cache_tracks_references() {
        let mut engine = ModerationEngine::new();
        assert!(engine.needs_preset(1));
        engine.configure("e1", profanity(Some(1), &[], &[]), Some(preset(1, &["w"])));
        assert!(!engine.needs_preset(1));

        // Second entity shares the cached preset, no fetch needed.
        engine.configure("e2", profanity(Some(1), &[], &[]), None);
        assert_eq!(engine.cached_preset_ids(), vec![1]);

        engine.remove("e1");
        assert_eq!(engine.cached_preset_ids(), vec![1], "still referenced by e2");
        engine.remove("e2");
        assert!(engine.cached_preset_ids().is_empty(), "dropped at zero refs");
    }

    #[test]
    fn reconfigure_same_preset_keeps_it_cached() {
        let mut engine = ModerationEngine::new();
        engine.configure("e1", profanity(Some(1), &[], &[]), Some(preset(1, &["w"])));
        // Overwrite in place with the same preset id and no fetched copy.
        engine.configure("e1", profanity(Some(1), &["extra"], &[]), None);
        assert_eq!(engine.cached_preset_ids(), vec![1]);
        assert!(check(&engine, "e1", "u1", "w here").is_some());
        assert!(check(&engine, "e1", "u1", "extra here").is_some());
    }

    #[test]
    fn switching_presets_releases_the_old_one() {
        let mut engine = ModerationEngine::new();
        engine.configure("e1", profanity(Some(1), &[], &[]), Some(preset(1, &["one"])));
        engine.configure("e1", profanity(Some(2), &[], &[]), Some(preset(2, &["two"])));
        assert_eq!(engine.cached_preset_ids(), vec![2]);
    }

    #[test]
    fn refresh_rebuilds_matchers() {
        let mut engine = ModerationEngine::new();
        engine.configure("e1", profanity(Some(1), &[], &[]), Some(preset(1, &["old"])));
        assert!(check(&engine, "e1", "u1", "old word").is_some());

        assert!(engine.refresh_preset(preset(1, &["new"])));
        assert!(check(&engine, "e1", "u1", "old word").is_none());
        assert!(check(&engine, "e1", "u1", "new word").is_some());
    }

    #[test]
    fn refresh_of_unreferenced_preset_is_ignored() {
        let mut engine = ModerationEngine::new();
        assert!(!engine.refresh_preset(preset(5, &["x"])));
        assert!(engine.cached_preset_ids().is_empty());
    }

    #[test]
    fn missing_fetched_preset_degrades_to_custom_words() {
        let mut engine = ModerationEngine::new();
        engine.configure("e1", profanity(Some(1), &["custom"], &[]), None);
        assert!(check(&engine, "e1", "u1", "custom").is_some());
        assert!(engine.cached_preset_ids().is_empty());
    }
}
