//! Metadata tracking for vector store persistence.
//!
//! Records which model produced the stored embeddings and each collection's
//! established dimension, so a reload can detect a model change.

use crate::error::{EngineError, EngineResult, StorageContext};
use crate::types::Collection;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;

const METADATA_FILE: &str = "metadata.json";

/// Per-collection statistics.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CollectionMetadata {
    pub dimension: usize,
    pub embedding_count: usize,
}

/// Metadata for vector store persistence
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoreMetadata {
    /// Name of the embedding model used
    pub model_name: String,

    pub collections: BTreeMap<Collection, CollectionMetadata>,

    /// Unix timestamp when created
    pub created_at: i64,

    /// Unix timestamp when last updated
    pub updated_at: i64,

    /// Version of the metadata format
    pub version: u32,
}

impl StoreMetadata {
    /// Current metadata version
    pub const CURRENT_VERSION: u32 = 1;

    /// Create new metadata with current timestamp
    pub fn new(model_name: impl Into<String>) -> Self {
        let now = chrono::Utc::now().timestamp();
        Self {
            model_name: model_name.into(),
            collections: BTreeMap::new(),
            created_at: now,
            updated_at: now,
            version: Self::CURRENT_VERSION,
        }
    }

    /// Replace the collection statistics and bump the update timestamp
    pub fn update(&mut self, collections: BTreeMap<Collection, CollectionMetadata>) {
        self.collections = collections;
        self.updated_at = chrono::Utc::now().timestamp();
    }

    pub fn save(&self, dir: &Path) -> EngineResult<()> {
        let path = dir.join(METADATA_FILE);
        let json = serde_json::to_string_pretty(self).at_path(&path)?;
        std::fs::write(&path, json).at_path(&path)
    }

    pub fn load(dir: &Path) -> EngineResult<Self> {
        let path = dir.join(METADATA_FILE);
        let json = std::fs::read_to_string(&path).at_path(&path)?;
        let metadata: Self = serde_json::from_str(&json).at_path(&path)?;

        if metadata.version > Self::CURRENT_VERSION {
            return Err(EngineError::Storage {
                path,
                reason: format!(
                    "metadata version {} is newer than supported version {}",
                    metadata.version,
                    Self::CURRENT_VERSION
                ),
            });
        }

        Ok(metadata)
    }

    /// Check if a metadata file exists
    pub fn exists(dir: &Path) -> bool {
        dir.join(METADATA_FILE).exists()
    }
}
