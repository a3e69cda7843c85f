//! Record store collaborator.
//!
//! The engine only reads from the record store: it asks which records of a
//! collection match a filter and joins their summaries onto embeddings by
//! owner id. [`InMemoryRecordStore`] backs the CLI and tests; an application
//! with a relational store implements [`RecordStore`] over it.

use std::collections::{BTreeMap, HashMap};
use std::path::Path;

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};

use crate::error::{EngineError, EngineResult, StorageContext};
use crate::types::{Collection, OwnerId, RecordFilter, RecordSummary};

/// Read-only view of the durable record store.
pub trait RecordStore: Send + Sync {
    /// Records of `collection` matching `filter`, ordered by owner id.
    fn list(
        &self,
        collection: Collection,
        filter: &RecordFilter,
    ) -> EngineResult<Vec<RecordSummary>>;

    /// One record, or `None` if it does not exist.
    fn get(&self, collection: Collection, owner_id: OwnerId) -> EngineResult<Option<RecordSummary>>;
}

/// JSON dataset layout accepted by [`InMemoryRecordStore::from_json_file`].
///
/// ```json
/// { "solutions": [{"id": 1, "title": "...", "description": "..."}],
///   "issues": [{"id": 7, "title": "...", "status": "reported", "category": "roads"}] }
/// ```
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RecordDataset {
    #[serde(default)]
    pub solutions: Vec<RecordSummary>,
    #[serde(default)]
    pub issues: Vec<RecordSummary>,
}

impl RecordDataset {
    pub fn records(&self, collection: Collection) -> &[RecordSummary] {
        match collection {
            Collection::Solution => &self.solutions,
            Collection::Issue => &self.issues,
        }
    }

    pub fn len(&self) -> usize {
        self.solutions.len() + self.issues.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn from_json_file(path: &Path) -> EngineResult<Self> {
        let json = std::fs::read_to_string(path).map_err(|e| EngineError::RecordStore {
            reason: format!("failed to read {}: {e}", path.display()),
        })?;
        serde_json::from_str(&json).map_err(|e| EngineError::RecordStore {
            reason: format!("failed to parse {}: {e}", path.display()),
        })
    }

    pub fn save_json(&self, path: &Path) -> EngineResult<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).at_path(parent)?;
        }
        let json = serde_json::to_string_pretty(self).at_path(path)?;
        std::fs::write(path, json).at_path(path)
    }
}

#[derive(Debug, Default)]
pub struct InMemoryRecordStore {
    records: RwLock<HashMap<Collection, BTreeMap<OwnerId, RecordSummary>>>,
}

impl InMemoryRecordStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_dataset(dataset: &RecordDataset) -> EngineResult<Self> {
        let store = Self::new();
        for collection in Collection::ALL {
            for record in dataset.records(collection) {
                if store.insert(collection, record.clone()).is_some() {
                    return Err(EngineError::RecordStore {
                        reason: format!("duplicate {collection} id {}", record.owner_id),
                    });
                }
            }
        }
        Ok(store)
    }

    pub fn from_json_file(path: &Path) -> EngineResult<Self> {
        Self::from_dataset(&RecordDataset::from_json_file(path)?)
    }

    /// Insert or replace a record, returning the previous version.
    pub fn insert(&self, collection: Collection, record: RecordSummary) -> Option<RecordSummary> {
        self.records
            .write()
            .entry(collection)
            .or_default()
            .insert(record.owner_id, record)
    }

    pub fn remove(&self, collection: Collection, owner_id: OwnerId) -> Option<RecordSummary> {
        self.records
            .write()
            .get_mut(&collection)
            .and_then(|records| records.remove(&owner_id))
    }

    pub fn len(&self, collection: Collection) -> usize {
        self.records
            .read()
            .get(&collection)
            .map_or(0, BTreeMap::len)
    }

    pub fn is_empty(&self) -> bool {
        self.records.read().values().all(BTreeMap::is_empty)
    }
}

impl RecordStore for InMemoryRecordStore {
    fn list(
        &self,
        collection: Collection,
        filter: &RecordFilter,
    ) -> EngineResult<Vec<RecordSummary>> {
        Ok(self
            .records
            .read()
            .get(&collection)
            .map(|records| {
                records
                    .values()
                    .filter(|record| filter.matches(record))
                    .cloned()
                    .collect()
            })
            .unwrap_or_default())
    }

    fn get(
        &self,
        collection: Collection,
        owner_id: OwnerId,
    ) -> EngineResult<Option<RecordSummary>> {
        Ok(self
            .records
            .read()
            .get(&collection)
            .and_then(|records| records.get(&owner_id).cloned()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_store() -> InMemoryRecordStore {
        let store = InMemoryRecordStore::new();
        store.insert(
            Collection::Issue,
            RecordSummary::new(OwnerId::new(2), "Streetlight out", "Dark corner")
                .with_status("reported")
                .with_category("lighting"),
        );
        store.insert(
            Collection::Issue,
            RecordSummary::new(OwnerId::new(1), "Pothole", "Main St")
                .with_status("resolved")
                .with_category("roads"),
        );
        store.insert(
            Collection::Solution,
            RecordSummary::new(OwnerId::new(1), "File a 311 request", "Step by step"),
        );
        store
    }

    #[test]
    fn test_list_applies_filter_in_id_order() {
        let store = sample_store();

        let all = store.list(Collection::Issue, &RecordFilter::any()).unwrap();
        let ids: Vec<u64> = all.iter().map(|r| r.owner_id.get()).collect();
        assert_eq!(ids, vec![1, 2]);

        let reported = store
            .list(Collection::Issue, &RecordFilter::any().with_status("reported"))
            .unwrap();
        assert_eq!(reported.len(), 1);
        assert_eq!(reported[0].title, "Streetlight out");
    }

    #[test]
    fn test_collections_are_separate() {
        let store = sample_store();
        assert_eq!(store.len(Collection::Issue), 2);
        assert_eq!(store.len(Collection::Solution), 1);
        let solution = store.get(Collection::Solution, OwnerId::new(1)).unwrap().unwrap();
        assert_eq!(solution.title, "File a 311 request");
        assert!(store.get(Collection::Solution, OwnerId::new(2)).unwrap().is_none());
    }

    #[test]
    fn test_dataset_rejects_duplicate_ids() {
        let dataset = RecordDataset {
            solutions: vec![],
            issues: vec![
                RecordSummary::new(OwnerId::new(1), "A", ""),
                RecordSummary::new(OwnerId::new(1), "B", ""),
            ],
        };
        assert!(matches!(
            InMemoryRecordStore::from_dataset(&dataset),
            Err(EngineError::RecordStore { .. })
        ));
    }

    #[test]
    fn test_from_json_file() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("records.json");
        std::fs::write(
            &path,
            r#"{"issues": [{"id": 3, "title": "Leak", "description": "Water main", "status": "reported"}]}"#,
        )
        .unwrap();

        let store = InMemoryRecordStore::from_json_file(&path).unwrap();
        assert_eq!(store.len(Collection::Issue), 1);
        assert_eq!(store.len(Collection::Solution), 0);
        assert!(!store.is_empty());

        assert!(InMemoryRecordStore::from_json_file(&dir.path().join("missing.json")).is_err());
    }
}
