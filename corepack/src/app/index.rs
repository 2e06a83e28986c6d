// SPDX-FileCopyrightText: Copyright © 2024 Corepack Contributors
//
// SPDX-License-Identifier: MPL-2.0

//! Helm chart index (spec SPEC_FULL §4.11, grounded in the "apps" store's
//! chart-index rebuild behavior): an in-core `index.yaml`-shaped record kept
//! alongside the package store, rebuildable from the envelopes present.

use std::collections::HashMap;
use std::sync::Mutex;

/// One chart version entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IndexEntry {
    pub name: String,
    pub version: String,
    pub digest: String,
}

/// In-memory chart index, keyed by chart name. `AppService` updates it
/// inline on create/delete of Helm-kind applications and can fully rebuild
/// it from the store's envelopes when corrupted (spec §8 scenario 5).
#[derive(Default)]
pub struct ChartIndex {
    entries: Mutex<HashMap<String, Vec<IndexEntry>>>,
}

impl ChartIndex {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&self, entry: IndexEntry) {
        let mut entries = self.entries.lock().unwrap();
        let versions = entries.entry(entry.name.clone()).or_default();
        versions.retain(|e| e.version != entry.version);
        versions.push(entry);
    }

    pub fn remove(&self, name: &str, version: &str) {
        let mut entries = self.entries.lock().unwrap();
        if let Some(versions) = entries.get_mut(name) {
            versions.retain(|e| e.version != version);
            if versions.is_empty() {
                entries.remove(name);
            }
        }
    }

    /// Replaces the whole index with `entries`, used by `RebuildIndex` after
    /// scanning every Helm-kind envelope in the store.
    pub fn rebuild(&self, fresh: Vec<IndexEntry>) {
        let mut by_name: HashMap<String, Vec<IndexEntry>> = HashMap::new();
        for entry in fresh {
            by_name.entry(entry.name.clone()).or_default().push(entry);
        }
        *self.entries.lock().unwrap() = by_name;
    }

    pub fn entries(&self) -> Vec<IndexEntry> {
        self.entries.lock().unwrap().values().flatten().cloned().collect()
    }
}

#[cfg(test)]
mod test {
    use super::*;

    fn entry(name: &str, version: &str) -> IndexEntry {
        IndexEntry {
            name: name.into(),
            version: version.into(),
            digest: "deadbeef".into(),
        }
    }

    #[test]
    fn add_then_entries_contains_it() {
        let index = ChartIndex::new();
        index.add(entry("alpine", "0.1.0"));
        assert_eq!(index.entries().len(), 1);
    }

    #[test]
    fn rebuild_replaces_corrupted_index() {
        let index = ChartIndex::new();
        index.add(entry("stale", "0.0.1"));
        index.rebuild(vec![entry("alpine", "0.1.0"), entry("alpine", "0.2.0")]);

        let entries = index.entries();
        assert_eq!(entries.len(), 2);
        assert!(entries.iter().all(|e| e.name == "alpine"));
    }

    #[test]
    fn remove_drops_only_matching_version() {
        let index = ChartIndex::new();
        index.add(entry("alpine", "0.1.0"));
        index.add(entry("alpine", "0.2.0"));
        index.remove("alpine", "0.1.0");

        let entries = index.entries();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].version, "0.2.0");
    }
}
