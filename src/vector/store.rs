//! Vector store: the mapping `(collection, owner_id) -> Embedding`.
//!
//! # Concurrency
//! - `scan` copies the matching embeddings under a shared lock and iterates
//!   the copy, so a scan sees a consistent snapshot and never observes
//!   writes that land after it started.
//! - Upserts to different keys are independent. Upserts to the same key
//!   race; the last write wins. There is no optimistic locking.

use std::collections::{BTreeMap, HashMap};
use std::path::Path;

use parking_lot::RwLock;

use crate::error::{EngineError, EngineResult, StorageContext};
use crate::types::{Collection, OwnerId};
use crate::vector::metadata::{CollectionMetadata, StoreMetadata};
use crate::vector::storage::{read_segment, segment_path, write_segment};
use crate::vector::{Embedding, VectorDimension, ensure_finite, magnitude};

/// What an upsert did to the store.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpsertOutcome {
    Inserted,
    Replaced,
}

/// Storage contract used by search and clustering.
pub trait VectorStore: Send + Sync {
    /// Insert or overwrite the embedding for `(collection, owner_id)`.
    ///
    /// The first vector written to a collection establishes its dimension;
    /// later vectors of another length fail with `DimensionMismatch`.
    fn upsert_with_hash(
        &self,
        collection: Collection,
        owner_id: OwnerId,
        vector: Vec<f32>,
        content_hash: Option<String>,
    ) -> EngineResult<UpsertOutcome>;

    /// Insert or overwrite without recording which text produced the vector.
    fn upsert(
        &self,
        collection: Collection,
        owner_id: OwnerId,
        vector: Vec<f32>,
    ) -> EngineResult<UpsertOutcome> {
        self.upsert_with_hash(collection, owner_id, vector, None)
    }

    /// Fetch one embedding, `NotFound` if absent.
    fn get(&self, collection: Collection, owner_id: OwnerId) -> EngineResult<Embedding>;

    /// Remove one embedding. Returns whether anything was removed.
    fn delete(&self, collection: Collection, owner_id: OwnerId) -> EngineResult<bool>;

    /// Snapshot of the embeddings whose owner satisfies `predicate`.
    fn scan(
        &self,
        collection: Collection,
        predicate: &dyn Fn(OwnerId) -> bool,
    ) -> EngineResult<EmbeddingScan>;

    /// Hash of the text last embedded for this owner, if recorded.
    fn content_hash(&self, collection: Collection, owner_id: OwnerId) -> Option<String>;

    /// Dimension established for the collection, if any vector was written.
    fn dimension(&self, collection: Collection) -> Option<VectorDimension>;

    /// Number of embeddings held for the collection.
    fn len(&self, collection: Collection) -> usize;

    /// Drop every embedding in the collection and forget its dimension.
    fn clear(&self, collection: Collection) -> EngineResult<()>;
}

/// One-shot, finite iterator over a scan snapshot, ordered by owner id.
#[derive(Debug)]
pub struct EmbeddingScan {
    inner: std::vec::IntoIter<Embedding>,
}

impl EmbeddingScan {
    fn new(mut embeddings: Vec<Embedding>) -> Self {
        embeddings.sort_by_key(|e| e.owner_id);
        Self {
            inner: embeddings.into_iter(),
        }
    }
}

impl Iterator for EmbeddingScan {
    type Item = Embedding;

    fn next(&mut self) -> Option<Self::Item> {
        self.inner.next()
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        self.inner.size_hint()
    }
}

impl ExactSizeIterator for EmbeddingScan {}

#[derive(Debug, Default)]
struct CollectionIndex {
    dimension: Option<VectorDimension>,
    vectors: HashMap<OwnerId, Vec<f32>>,
    hashes: HashMap<OwnerId, String>,
}

/// Lock-protected in-memory store with optional on-disk persistence.
#[derive(Debug, Default)]
pub struct InMemoryVectorStore {
    collections: RwLock<HashMap<Collection, CollectionIndex>>,
}

impl InMemoryVectorStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Persist every collection under `dir`.
    ///
    /// Writes one segment per collection, a hash side file, and
    /// `metadata.json` recording `model_name`.
    pub fn save(&self, dir: &Path, model_name: &str) -> EngineResult<()> {
        std::fs::create_dir_all(dir).at_path(dir)?;

        let mut metadata = if StoreMetadata::exists(dir) {
            let mut existing = StoreMetadata::load(dir)?;
            existing.model_name = model_name.to_string();
            existing
        } else {
            StoreMetadata::new(model_name)
        };

        let collections = self.collections.read();
        let mut stats = BTreeMap::new();
        for (collection, index) in collections.iter() {
            let Some(dimension) = index.dimension else {
                continue;
            };
            let mut entries: Vec<(OwnerId, &[f32])> = index
                .vectors
                .iter()
                .map(|(id, v)| (*id, v.as_slice()))
                .collect();
            entries.sort_by_key(|(id, _)| *id);
            write_segment(&segment_path(dir, *collection), dimension, &entries)?;

            let hashes_path = hashes_path(dir, *collection);
            let hashes: BTreeMap<u64, &String> =
                index.hashes.iter().map(|(id, h)| (id.get(), h)).collect();
            let json = serde_json::to_string(&hashes).at_path(&hashes_path)?;
            std::fs::write(&hashes_path, json).at_path(&hashes_path)?;

            stats.insert(
                *collection,
                CollectionMetadata {
                    dimension: dimension.get(),
                    embedding_count: entries.len(),
                },
            );
        }
        drop(collections);

        metadata.update(stats);
        metadata.save(dir)?;
        tracing::debug!("Saved vector store to {}", dir.display());
        Ok(())
    }

    /// Load a store previously written by [`save`](Self::save).
    ///
    /// Returns the store and the model name recorded with it.
    pub fn load(dir: &Path) -> EngineResult<(Self, String)> {
        let metadata = StoreMetadata::load(dir)?;
        let mut collections = HashMap::new();

        for (collection, stats) in &metadata.collections {
            let path = segment_path(dir, *collection);
            let segment = read_segment(&path)?;
            if segment.dimension.get() != stats.dimension {
                return Err(EngineError::Storage {
                    path,
                    reason: format!(
                        "segment dimension {} disagrees with metadata dimension {}",
                        segment.dimension.get(),
                        stats.dimension
                    ),
                });
            }
            if segment.vectors.len() != stats.embedding_count {
                tracing::warn!(
                    "Expected {} {collection} embeddings but found {}",
                    stats.embedding_count,
                    segment.vectors.len()
                );
            }

            let hashes_path = hashes_path(dir, *collection);
            let hashes = if hashes_path.exists() {
                let json = std::fs::read_to_string(&hashes_path).at_path(&hashes_path)?;
                let raw: HashMap<u64, String> =
                    serde_json::from_str(&json).at_path(&hashes_path)?;
                raw.into_iter().map(|(id, h)| (OwnerId::new(id), h)).collect()
            } else {
                HashMap::new()
            };

            collections.insert(
                *collection,
                CollectionIndex {
                    dimension: Some(segment.dimension),
                    vectors: segment.vectors.into_iter().collect(),
                    hashes,
                },
            );
        }

        Ok((
            Self {
                collections: RwLock::new(collections),
            },
            metadata.model_name,
        ))
    }
}

fn hashes_path(dir: &Path, collection: Collection) -> std::path::PathBuf {
    dir.join(format!("{}.hashes.json", collection.as_str()))
}

impl VectorStore for InMemoryVectorStore {
    fn upsert_with_hash(
        &self,
        collection: Collection,
        owner_id: OwnerId,
        vector: Vec<f32>,
        content_hash: Option<String>,
    ) -> EngineResult<UpsertOutcome> {
        ensure_finite(&vector)?;
        if magnitude(&vector) == 0.0 {
            return Err(EngineError::invalid(
                "vector",
                "zero-magnitude vector has no direction and cannot be compared",
            ));
        }

        let mut collections = self.collections.write();
        let index = collections.entry(collection).or_default();

        match index.dimension {
            Some(dimension) if dimension.get() != vector.len() => {
                return Err(EngineError::DimensionMismatch {
                    collection,
                    expected: dimension.get(),
                    actual: vector.len(),
                });
            }
            Some(_) => {}
            None => index.dimension = Some(VectorDimension::new(vector.len())?),
        }

        match content_hash {
            Some(hash) => {
                index.hashes.insert(owner_id, hash);
            }
            None => {
                index.hashes.remove(&owner_id);
            }
        }

        Ok(match index.vectors.insert(owner_id, vector) {
            Some(_) => UpsertOutcome::Replaced,
            None => UpsertOutcome::Inserted,
        })
    }

    fn get(&self, collection: Collection, owner_id: OwnerId) -> EngineResult<Embedding> {
        self.collections
            .read()
            .get(&collection)
            .and_then(|index| index.vectors.get(&owner_id))
            .map(|vector| Embedding {
                owner_id,
                collection,
                vector: vector.clone(),
            })
            .ok_or(EngineError::NotFound {
                collection,
                owner_id,
            })
    }

    fn delete(&self, collection: Collection, owner_id: OwnerId) -> EngineResult<bool> {
        let mut collections = self.collections.write();
        let Some(index) = collections.get_mut(&collection) else {
            return Ok(false);
        };
        index.hashes.remove(&owner_id);
        Ok(index.vectors.remove(&owner_id).is_some())
    }

    fn scan(
        &self,
        collection: Collection,
        predicate: &dyn Fn(OwnerId) -> bool,
    ) -> EngineResult<EmbeddingScan> {
        let collections = self.collections.read();
        let snapshot = collections
            .get(&collection)
            .map(|index| {
                index
                    .vectors
                    .iter()
                    .filter(|(id, _)| predicate(**id))
                    .map(|(id, vector)| Embedding {
                        owner_id: *id,
                        collection,
                        vector: vector.clone(),
                    })
                    .collect()
            })
            .unwrap_or_default();
        Ok(EmbeddingScan::new(snapshot))
    }

    fn content_hash(&self, collection: Collection, owner_id: OwnerId) -> Option<String> {
        self.collections
            .read()
            .get(&collection)
            .and_then(|index| index.hashes.get(&owner_id).cloned())
    }

    fn dimension(&self, collection: Collection) -> Option<VectorDimension> {
        self.collections
            .read()
            .get(&collection)
            .and_then(|index| index.dimension)
    }

    fn len(&self, collection: Collection) -> usize {
        self.collections
            .read()
            .get(&collection)
            .map_or(0, |index| index.vectors.len())
    }

    fn clear(&self, collection: Collection) -> EngineResult<()> {
        self.collections.write().remove(&collection);
        Ok(())
    }
}
