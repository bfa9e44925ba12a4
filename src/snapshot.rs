//! Persisted persona snapshot
//!
//! A returning visitor is recognized by the compact snapshot written to local
//! storage. Storage may be missing, full or hold garbage; none of that is an
//! error for the classifier.

use tracing::debug;

use crate::host::KeyValueStore;
use crate::types::PersonaSnapshot;

/// Reads and writes the snapshot under one storage key
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SnapshotStore {
    key: String,
}

impl SnapshotStore {
    pub fn new(key: impl Into<String>) -> Self {
        Self { key: key.into() }
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    /// Stored snapshot, or `None` when absent, unreadable or malformed
    pub fn load(&self, storage: &dyn KeyValueStore) -> Option<PersonaSnapshot> {
        let raw = match storage.get(&self.key) {
            Ok(Some(raw)) => raw,
            Ok(None) => return None,
            Err(e) => {
                debug!(key = %self.key, error = %e, "snapshot read failed");
                return None;
            }
        };

        match serde_json::from_str(&raw) {
            Ok(snapshot) => Some(snapshot),
            Err(e) => {
                debug!(key = %self.key, error = %e, "ignoring malformed snapshot");
                None
            }
        }
    }

    /// Overwrite the stored snapshot. Returns whether it was written.
    pub fn save(&self, storage: &mut dyn KeyValueStore, snapshot: &PersonaSnapshot) -> bool {
        let json = match serde_json::to_string(snapshot) {
            Ok(json) => json,
            Err(e) => {
                debug!(error = %e, "snapshot serialization failed");
                return false;
            }
        };

        match storage.set(&self.key, &json) {
            Ok(()) => true,
            Err(e) => {
                debug!(key = %self.key, error = %e, "snapshot write failed");
                false
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::host::{DisabledStorage, MemoryStorage};
    use crate::types::{CategoryScores, Persona};

    fn snapshot() -> PersonaSnapshot {
        PersonaSnapshot {
            persona: Persona::TrustSeeker,
            confidence: 64,
            scores: CategoryScores {
                trust: 12.0,
                ..Default::default()
            },
            timestamp: 1_709_287_200_000,
        }
    }

    #[test]
    fn test_save_then_load() {
        let store = SnapshotStore::new("persona.snapshot");
        let mut storage = MemoryStorage::new();

        assert!(store.save(&mut storage, &snapshot()));
        assert_eq!(store.load(&storage), Some(snapshot()));
    }

    #[test]
    fn test_malformed_snapshot_is_ignored() {
        let store = SnapshotStore::new("persona.snapshot");
        let mut storage = MemoryStorage::new();
        storage.set("persona.snapshot", "{not json").unwrap();

        assert_eq!(store.load(&storage), None);
    }

    #[test]
    fn test_disabled_storage_is_swallowed() {
        let store = SnapshotStore::new("persona.snapshot");
        let mut storage = DisabledStorage;

        assert!(!store.save(&mut storage, &snapshot()));
        assert_eq!(store.load(&storage), None);
    }

    #[test]
    fn test_wire_format() {
        let json = serde_json::to_value(snapshot()).unwrap();
        assert_eq!(json["persona"], "trust-seeker");
        assert_eq!(json["scores"]["trust"], 12.0);
        assert_eq!(json["timestamp"], 1_709_287_200_000i64);
    }
}
