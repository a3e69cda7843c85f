//! `SemanticEngine`: the entry point tying embedding, storage, search and
//! clustering together.
//!
//! Every collaborator is injected at construction. There is no process-wide
//! client cache; two engines built from the same settings are independent.

use std::path::Path;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tokio_util::sync::CancellationToken;

use crate::clustering::{Cluster, ClusteringEngine};
use crate::config::Settings;
use crate::error::EngineResult;
use crate::records::RecordStore;
use crate::search::{SearchResult, SimilaritySearch};
use crate::types::{Collection, OwnerId, RecordFilter, RecordSummary};
use crate::vector::{
    EmbeddingProvider, FastEmbedProvider, InMemoryVectorStore, StoreMetadata, TimedEmbedder,
    UpsertOutcome, VectorStore, record_text,
};

/// What [`SemanticEngine::index_record`] did.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum IndexOutcome {
    Created,
    Updated,
    /// Text hash matched the stored one; nothing was embedded.
    Unchanged,
}

/// Counts from a batch index run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct IndexStats {
    pub created: usize,
    pub updated: usize,
    pub unchanged: usize,
    pub removed: usize,
}

impl IndexStats {
    fn record(&mut self, outcome: IndexOutcome) {
        match outcome {
            IndexOutcome::Created => self.created += 1,
            IndexOutcome::Updated => self.updated += 1,
            IndexOutcome::Unchanged => self.unchanged += 1,
        }
    }
}

/// Hex SHA-256 of the text embedded for a record.
pub fn content_hash(text: &str) -> String {
    format!("{:x}", Sha256::digest(text.as_bytes()))
}

pub struct SemanticEngine {
    settings: Settings,
    store: Arc<InMemoryVectorStore>,
    records: Arc<dyn RecordStore>,
    embedder: Arc<TimedEmbedder>,
    search: SimilaritySearch,
    clustering: ClusteringEngine,
}

impl std::fmt::Debug for SemanticEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SemanticEngine")
            .field("model", &self.embedder.model_name())
            .field("timeout", &self.embedder.timeout())
            .finish_non_exhaustive()
    }
}

impl SemanticEngine {
    /// Build an engine from explicit collaborators.
    ///
    /// `provider` is wrapped in a [`TimedEmbedder`] using
    /// `settings.embedding.timeout_secs`.
    pub fn new(
        settings: Settings,
        provider: Arc<dyn EmbeddingProvider>,
        store: Arc<InMemoryVectorStore>,
        records: Arc<dyn RecordStore>,
    ) -> EngineResult<Self> {
        settings.validate()?;
        let embedder = Arc::new(TimedEmbedder::new(provider, settings.embedding.timeout())?);

        let search = SimilaritySearch::new(
            store.clone() as Arc<dyn VectorStore>,
            records.clone(),
            embedder.clone() as Arc<dyn EmbeddingProvider>,
        );
        let clustering = ClusteringEngine::new(store.clone(), records.clone())
            .with_threads(settings.clustering.parallel_threads)?
            .with_large_pool_warning(settings.clustering.large_pool_warning);

        Ok(Self {
            settings,
            store,
            records,
            embedder,
            search,
            clustering,
        })
    }

    /// Build an engine backed by fastembed and the persisted vector store.
    pub fn from_settings(settings: Settings, records: Arc<dyn RecordStore>) -> EngineResult<Self> {
        let provider = FastEmbedProvider::new(
            &settings.embedding.model,
            &settings.models_dir(),
            settings.embedding.show_download_progress,
        )?;
        let store = open_store(&settings.vectors_dir(), &provider.model_name())?;
        Self::new(settings, Arc::new(provider), Arc::new(store), records)
    }

    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    pub fn store(&self) -> &Arc<InMemoryVectorStore> {
        &self.store
    }

    pub fn model_name(&self) -> String {
        self.embedder.model_name()
    }

    /// Embed a record's text and store it, skipping unchanged text.
    pub fn index_record(
        &self,
        collection: Collection,
        record: &RecordSummary,
    ) -> EngineResult<IndexOutcome> {
        let text = record_text(&record.title, &record.description);
        let hash = content_hash(&text);

        if self.store.content_hash(collection, record.owner_id).as_deref() == Some(hash.as_str()) {
            tracing::debug!("{collection} {} unchanged", record.owner_id);
            return Ok(IndexOutcome::Unchanged);
        }

        let vector = self.embedder.embed(&text)?;
        let outcome = match self
            .store
            .upsert_with_hash(collection, record.owner_id, vector, Some(hash))?
        {
            UpsertOutcome::Inserted => IndexOutcome::Created,
            UpsertOutcome::Replaced => IndexOutcome::Updated,
        };
        tracing::debug!("{collection} {} {outcome:?}", record.owner_id);
        Ok(outcome)
    }

    /// Index every record in order, stopping at the first failure.
    pub fn index_all(
        &self,
        collection: Collection,
        records: &[RecordSummary],
    ) -> EngineResult<IndexStats> {
        let mut stats = IndexStats::default();
        for record in records {
            stats.record(self.index_record(collection, record)?);
        }
        tracing::info!(
            "Indexed {} {collection} records: {} created, {} updated, {} unchanged",
            records.len(),
            stats.created,
            stats.updated,
            stats.unchanged
        );
        Ok(stats)
    }

    /// Index every record the record store holds for `collection` and drop
    /// embeddings whose record no longer exists.
    pub fn sync_collection(&self, collection: Collection) -> EngineResult<IndexStats> {
        let records = self.records.list(collection, &RecordFilter::any())?;
        let mut stats = self.index_all(collection, &records)?;
        stats.removed = self.prune_orphans(collection)?;
        Ok(stats)
    }

    /// Delete the embedding of a deleted record.
    pub fn remove_record(&self, collection: Collection, owner_id: OwnerId) -> EngineResult<bool> {
        let removed = self.store.delete(collection, owner_id)?;
        if removed {
            tracing::debug!("Removed embedding for {collection} {owner_id}");
        }
        Ok(removed)
    }

    /// Delete embeddings whose owner is missing from the record store.
    pub fn prune_orphans(&self, collection: Collection) -> EngineResult<usize> {
        let mut removed = 0;
        for embedding in self.store.scan(collection, &|_| true)? {
            if self.records.get(collection, embedding.owner_id)?.is_none()
                && self.remove_record(collection, embedding.owner_id)?
            {
                removed += 1;
            }
        }
        if removed > 0 {
            tracing::info!("Pruned {removed} orphaned {collection} embeddings");
        }
        Ok(removed)
    }

    /// Text search. `None` falls back to the configured limit and threshold.
    pub fn search(
        &self,
        collection: Collection,
        query: &str,
        limit: Option<usize>,
        threshold: Option<f32>,
    ) -> EngineResult<Vec<SearchResult>> {
        self.search.search_by_text(
            collection,
            query,
            limit.unwrap_or(self.settings.search.default_limit),
            threshold.unwrap_or(self.settings.search.threshold),
        )
    }

    /// Search with an already computed query vector.
    pub fn search_vector(
        &self,
        collection: Collection,
        query: &[f32],
        limit: usize,
        threshold: f32,
    ) -> EngineResult<Vec<SearchResult>> {
        self.search.search(collection, query, limit, threshold)
    }

    pub fn find_similar(
        &self,
        collection: Collection,
        owner_id: OwnerId,
        limit: Option<usize>,
    ) -> EngineResult<Vec<SearchResult>> {
        self.search.find_similar(
            collection,
            owner_id,
            limit.unwrap_or(self.settings.search.similar_limit),
        )
    }

    /// Filter used when a caller gives no status: the configured default.
    pub fn default_cluster_filter(&self) -> RecordFilter {
        RecordFilter {
            status: self.settings.clustering.status_filter().map(str::to_string),
            category: None,
        }
    }

    pub fn cluster(
        &self,
        collection: Collection,
        filter: &RecordFilter,
        min_similarity: Option<f32>,
        cancel: &CancellationToken,
    ) -> EngineResult<Vec<Cluster>> {
        self.clustering.cluster(
            collection,
            filter,
            min_similarity.unwrap_or(self.settings.clustering.min_similarity),
            cancel,
        )
    }

    pub fn cluster_by_category(
        &self,
        collection: Collection,
        filter: &RecordFilter,
        min_similarity: Option<f32>,
        cancel: &CancellationToken,
    ) -> EngineResult<Vec<Cluster>> {
        self.clustering.cluster_by_category(
            collection,
            filter,
            min_similarity.unwrap_or(self.settings.clustering.min_similarity),
            cancel,
        )
    }

    /// Persist the vector store under the configured index directory.
    pub fn save(&self) -> EngineResult<()> {
        self.save_to(&self.settings.vectors_dir())
    }

    pub fn save_to(&self, dir: &Path) -> EngineResult<()> {
        self.store.save(dir, &self.model_name())
    }
}

/// Load the persisted store from `dir`, or start empty.
///
/// A store written by a different model is discarded: its vectors are not
/// comparable with new ones, and the empty hash table forces a re-embed.
pub fn open_store(dir: &Path, model_name: &str) -> EngineResult<InMemoryVectorStore> {
    if !StoreMetadata::exists(dir) {
        return Ok(InMemoryVectorStore::new());
    }
    let (store, stored_model) = InMemoryVectorStore::load(dir)?;
    if stored_model != model_name {
        tracing::warn!(
            "Index at {} was built with {stored_model}, now using {model_name}; starting fresh",
            dir.display()
        );
        return Ok(InMemoryVectorStore::new());
    }
    Ok(store)
}
