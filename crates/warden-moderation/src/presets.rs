// SPDX-FileCopyrightText: 2026 Chatwarden Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Reference-counted preset cache.
//!
//! A preset stays cached exactly as long as at least one live entity
//! references it. Acquire/release pairs are driven by the engine's
//! configure/remove calls.

use std::collections::HashMap;
use std::sync::Arc;

use tracing::debug;
use warden_core::Preset;

struct CacheEntry {
    preset: Arc<Preset>,
    refs: usize,
}

/// Cache of shared presets keyed by preset id.
#[derive(Default)]
pub struct PresetCache {
    entries: HashMap<i64, CacheEntry>,
}

impl PresetCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Whether a preset is currently cached.
    pub fn contains(&self, id: i64) -> bool {
        self.entries.contains_key(&id)
    }

    /// The cached preset, without touching the refcount.
    pub fn get(&self, id: i64) -> Option<Arc<Preset>> {
        self.entries.get(&id).map(|e| e.preset.clone())
    }

    /// Takes a reference on an already cached preset.
    pub fn acquire(&mut self, id: i64) -> Option<Arc<Preset>> {
        let entry = self.entries.get_mut(&id)?;
        entry.refs += 1;
        Some(entry.preset.clone())
    }

    /// Inserts a freshly fetched preset with one reference.
    pub fn insert(&mut self, preset: Preset) -> Arc<Preset> {
        let id = preset.preset_id;
        let preset = Arc::new(preset);
        self.entries.insert(
            id,
            CacheEntry {
                preset: preset.clone(),
                refs: 1,
            },
        );
        preset
    }

    /// Releases one reference; the preset is dropped at zero.
    pub fn release(&mut self, id: i64) {
        if let Some(entry) = self.entries.get_mut(&id) {
            entry.refs = entry.refs.saturating_sub(1);
            if entry.refs == 0 {
                self.entries.remove(&id);
                debug!(preset_id = id, "dropped unreferenced preset");
            }
        }
    }

    /// Replaces the cached words for a preset, keeping its refcount.
    /// Returns false when the preset is not cached (nothing references it).
    pub fn refresh(&mut self, preset: Preset) -> bool {
        match self.entries.get_mut(&preset.preset_id) {
            Some(entry) => {
                entry.preset = Arc::new(preset);
                true
            }
            None => false,
        }
    }

    /// Currently cached preset ids.
    pub fn ids(&self) -> Vec<i64> {
        self.entries.keys().copied().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn preset(id: i64, words: &[&str]) -> Preset {
        Preset {
            preset_id: id,
            preset_name: format!("preset-{id}"),
            language: "en".into(),
            words: words.iter().map(|w| w.to_string()).collect(),
        }
    }

    #[test]
    fn cached_while_referenced_dropped_at_zero() {
        let mut cache = PresetCache::new();
        cache.insert(preset(1, &["a"]));
        assert!(cache.contains(1));

        // Second entity references the same preset.
        assert!(cache.acquire(1).is_some());

        cache.release(1);
        assert!(cache.contains(1), "still one reference");
        cache.release(1);
        assert!(!cache.contains(1), "dropped at zero references");
    }

    #[test]
    fn acquire_missing_returns_none() {
        let mut cache = PresetCache::new();
        assert!(cache.acquire(42).is_none());
    }

    #[test]
    fn refresh_replaces_words_preserving_refs() {
        let mut cache = PresetCache::new();
        cache.insert(preset(1, &["old"]));
        cache.acquire(1);

        assert!(cache.refresh(preset(1, &["new"])));
        assert_eq!(cache.get(1).unwrap().words, vec!["new"]);

        cache.release(1);
        assert!(cache.contains(1), "refresh kept the refcount");
    }

    #[test]
    fn refresh_of_unreferenced_preset_is_noop() {
        let mut cache = PresetCache::new();
        assert!(!cache.refresh(preset(9, &["x"])));
        assert!(!cache.contains(9));
    }

    #[test]
    fn release_of_missing_id_is_harmless() {
        let mut cache = PresetCache::new();
        cache.release(7);
        assert!(cache.ids().is_empty());
    }
}
