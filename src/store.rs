//! Record storage with optimistic concurrency.
//!
//! Each [`DocumentRecord`] is the unit of mutation. Writers read a record,
//! compute the next version, and hand it back with the version they read;
//! [`MemoryStore::replace`] refuses the write if somebody else got there
//! first, and the caller re-reads and tries again.

use std::collections::BTreeMap;
use std::path::Path;
use std::sync::{Mutex, MutexGuard};

use chrono::Utc;
use serde::{Deserialize, Serialize};

use crate::error::StoreError;
use crate::queue::DownloadTask;
use crate::state_machine::{DocumentRecord, RecordKey};
use crate::unit::{TranslatableUnit, Unit};

/// A downloaded translation of one unit.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoredTranslation {
    pub key: RecordKey,
    pub locale: String,
    pub fields: BTreeMap<String, String>,
}

/// Everything the tracker persists between runs.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Snapshot {
    #[serde(default)]
    pub records: Vec<DocumentRecord>,
    #[serde(default)]
    pub units: Vec<Unit>,
    #[serde(default)]
    pub translations: Vec<StoredTranslation>,
    #[serde(default)]
    pub tasks: Vec<DownloadTask>,
    /// Set after a payment-required answer; cleared by `lingotrack resume`.
    #[serde(default)]
    pub account_blocked: bool,
}

impl Snapshot {
    /// Read a snapshot file; a missing file is an empty snapshot.
    pub fn load(path: &Path) -> Result<Self, StoreError> {
        if !path.exists() {
            return Ok(Self::default());
        }
        let contents = std::fs::read_to_string(path).map_err(|source| StoreError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Ok(serde_json::from_str(&contents)?)
    }

    pub fn save(&self, path: &Path) -> Result<(), StoreError> {
        let json = serde_json::to_string_pretty(self)?;
        std::fs::write(path, json).map_err(|source| StoreError::Io {
            path: path.to_path_buf(),
            source,
        })
    }
}

#[derive(Default)]
struct StoreState {
    records: BTreeMap<RecordKey, DocumentRecord>,
    units: BTreeMap<RecordKey, Unit>,
    translations: BTreeMap<(RecordKey, String), BTreeMap<String, String>>,
}

#[derive(Default)]
pub struct MemoryStore {
    state: Mutex<StoreState>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_snapshot(snapshot: &Snapshot) -> Self {
        let store = Self::new();
        {
            let mut state = store.state();
            for record in &snapshot.records {
                state.records.insert(record.key.clone(), record.clone());
            }
            for unit in &snapshot.units {
                state.units.insert(unit.key(), unit.clone());
            }
            for t in &snapshot.translations {
                state
                    .translations
                    .insert((t.key.clone(), t.locale.clone()), t.fields.clone());
            }
        }
        store
    }

    /// Snapshot of records, units and translations. Tasks and the account
    /// flag belong to the tracker and are left at their defaults.
    pub fn snapshot(&self) -> Snapshot {
        let state = self.state();
        Snapshot {
            records: state.records.values().cloned().collect(),
            units: state.units.values().cloned().collect(),
            translations: state
                .translations
                .iter()
                .map(|((key, locale), fields)| StoredTranslation {
                    key: key.clone(),
                    locale: locale.clone(),
                    fields: fields.clone(),
                })
                .collect(),
            ..Snapshot::default()
        }
    }

    fn state(&self) -> MutexGuard<'_, StoreState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Store a new record. Fails if one already exists for the key.
    pub fn insert(&self, mut record: DocumentRecord) -> Result<DocumentRecord, StoreError> {
        let mut state = self.state();
        if let Some(existing) = state.records.get(&record.key) {
            return Err(StoreError::Conflict {
                key: record.key.clone(),
                expected: 0,
                found: existing.version,
            });
        }
        record.version = 1;
        record.updated_at = Utc::now();
        state.records.insert(record.key.clone(), record.clone());
        Ok(record)
    }

    pub fn get(&self, key: &RecordKey) -> Option<DocumentRecord> {
        self.state().records.get(key).cloned()
    }

    /// Compare-and-swap on the record version.
    pub fn replace(
        &self,
        mut record: DocumentRecord,
        expected_version: u64,
    ) -> Result<DocumentRecord, StoreError> {
        let mut state = self.state();
        let found = state.records.get(&record.key).map_or(0, |r| r.version);
        if found != expected_version {
            return Err(StoreError::Conflict {
                key: record.key.clone(),
                expected: expected_version,
                found,
            });
        }
        record.version = expected_version + 1;
        record.updated_at = Utc::now();
        state.records.insert(record.key.clone(), record.clone());
        Ok(record)
    }

    pub fn records(&self) -> Vec<DocumentRecord> {
        self.state().records.values().cloned().collect()
    }

    pub fn keys(&self) -> Vec<RecordKey> {
        self.state().records.keys().cloned().collect()
    }

    pub fn find_by_document_id(&self, document_id: &str) -> Option<DocumentRecord> {
        self.state()
            .records
            .values()
            .find(|r| r.document_id.as_deref() == Some(document_id))
            .cloned()
    }

    pub fn put_unit(&self, unit: Unit) {
        self.state().units.insert(unit.key(), unit);
    }

    pub fn unit(&self, key: &RecordKey) -> Option<Unit> {
        self.state().units.get(key).cloned()
    }

    /// Drop the local unit; its record stays until disassociated.
    pub fn remove_unit(&self, key: &RecordKey) -> Option<Unit> {
        self.state().units.remove(key)
    }

    pub fn put_translation(&self, key: &RecordKey, locale: &str, fields: BTreeMap<String, String>) {
        self.state()
            .translations
            .insert((key.clone(), locale.to_string()), fields);
    }

    pub fn translation(&self, key: &RecordKey, locale: &str) -> Option<BTreeMap<String, String>> {
        self.state()
            .translations
            .get(&(key.clone(), locale.to_string()))
            .cloned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::profile::Profile;
    use crate::state_machine::Status;
    use crate::unit::ContentEntity;

    fn entity() -> ContentEntity {
        ContentEntity::new("node", "article", "1", "Llamas are cool", "en_US")
    }

    fn record() -> DocumentRecord {
        DocumentRecord::create(&entity(), &Profile::manual(), &["es_MX".to_string()])
    }

    #[test]
    fn insert_then_replace_bumps_version() {
        let store = MemoryStore::new();
        let stored = store.insert(record()).unwrap();
        assert_eq!(stored.version, 1);

        let mut next = stored.clone();
        next.source_status = Status::Importing;
        next.document_id = Some("doc-1".into());
        let saved = store.replace(next, 1).unwrap();
        assert_eq!(saved.version, 2);
        assert_eq!(store.get(&saved.key).unwrap().source_status, Status::Importing);
    }

    #[test]
    fn stale_write_is_rejected() {
        let store = MemoryStore::new();
        let stored = store.insert(record()).unwrap();
        store.replace(stored.clone(), 1).unwrap();

        let err = store.replace(stored, 1).unwrap_err();
        assert!(matches!(
            err,
            StoreError::Conflict {
                expected: 1,
                found: 2,
                ..
            }
        ));
    }

    #[test]
    fn duplicate_insert_is_rejected() {
        let store = MemoryStore::new();
        store.insert(record()).unwrap();
        assert!(store.insert(record()).is_err());
    }

    #[test]
    fn lookup_by_document_id() {
        let store = MemoryStore::new();
        let mut rec = store.insert(record()).unwrap();
        rec.document_id = Some("doc-9".into());
        rec.source_status = Status::Importing;
        store.replace(rec, 1).unwrap();
        assert_eq!(
            store.find_by_document_id("doc-9").unwrap().key,
            RecordKey::new("node", "1")
        );
        assert!(store.find_by_document_id("nope").is_none());
    }

    #[test]
    fn snapshot_file_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("store.json");

        let store = MemoryStore::new();
        store.insert(record()).unwrap();
        store.put_unit(entity().into());
        store.put_translation(
            &RecordKey::new("node", "1"),
            "es_MX",
            BTreeMap::from([("title".to_string(), "Las llamas".to_string())]),
        );
        store.snapshot().save(&path).unwrap();

        let loaded = MemoryStore::from_snapshot(&Snapshot::load(&path).unwrap());
        let key = RecordKey::new("node", "1");
        assert_eq!(loaded.get(&key).unwrap().version, 1);
        assert!(loaded.unit(&key).is_some());
        assert_eq!(loaded.translation(&key, "es_MX").unwrap()["title"], "Las llamas");
    }

    #[test]
    fn missing_snapshot_file_is_empty() {
        let dir = tempfile::tempdir().unwrap();
        let snapshot = Snapshot::load(&dir.path().join("absent.json")).unwrap();
        assert!(snapshot.records.is_empty());
        assert!(snapshot.tasks.is_empty());
    }
}
