//! Similarity search service: turns a query into ranked candidates.
//!
//! Ranking is a brute-force cosine scan over a store snapshot. Results are
//! ordered by descending similarity, ties broken by ascending owner id, and
//! only candidates strictly above the threshold are returned.

use std::cmp::Ordering;
use std::sync::Arc;

use rayon::prelude::*;
use serde::{Deserialize, Serialize};

use crate::error::{EngineError, EngineResult};
use crate::records::RecordStore;
use crate::types::{Collection, OwnerId, RecordSummary};
use crate::vector::{EmbeddingProvider, Score, VectorStore, ensure_finite, similarity};

/// Default number of results for text search.
pub const DEFAULT_SEARCH_LIMIT: usize = 10;

/// Default number of results for similar-record lookup.
pub const DEFAULT_SIMILAR_LIMIT: usize = 5;

/// Default minimum similarity for text search.
pub const DEFAULT_SEARCH_THRESHOLD: f32 = 0.7;

/// One ranked hit with a snapshot of the record it belongs to.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SearchResult {
    pub owner_id: OwnerId,
    pub collection: Collection,
    pub similarity: Score,
    pub record: RecordSummary,
}

impl std::fmt::Display for SearchResult {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{}  {} #{}  {}",
            self.similarity, self.collection, self.owner_id, self.record.title
        )?;
        if let Some(status) = &self.record.status {
            write!(f, " [{status}]")?;
        }
        Ok(())
    }
}

/// Ranking order: similarity descending, then owner id ascending.
pub fn rank_order(a: (Score, OwnerId), b: (Score, OwnerId)) -> Ordering {
    b.0.cmp(&a.0).then_with(|| a.1.cmp(&b.1))
}

/// Check `limit` is usable.
pub fn validate_limit(limit: usize) -> EngineResult<()> {
    if limit == 0 {
        return Err(EngineError::invalid("limit", "must be at least 1"));
    }
    Ok(())
}

/// Check a similarity threshold lies in `[0, 1]`.
pub fn validate_threshold(name: &'static str, threshold: f32) -> EngineResult<()> {
    if !threshold.is_finite() || !(0.0..=1.0).contains(&threshold) {
        return Err(EngineError::invalid(
            name,
            format!("{threshold} is outside [0, 1]"),
        ));
    }
    Ok(())
}

/// Search over one vector store, joined with record summaries.
pub struct SimilaritySearch {
    store: Arc<dyn VectorStore>,
    records: Arc<dyn RecordStore>,
    embedder: Arc<dyn EmbeddingProvider>,
}

impl SimilaritySearch {
    /// `embedder` is expected to be a [`crate::vector::TimedEmbedder`].
    pub fn new(
        store: Arc<dyn VectorStore>,
        records: Arc<dyn RecordStore>,
        embedder: Arc<dyn EmbeddingProvider>,
    ) -> Self {
        Self {
            store,
            records,
            embedder,
        }
    }

    /// Rank stored vectors against `query`.
    ///
    /// Returns at most `limit` results, each with similarity `> threshold`.
    /// Fewer results are returned when fewer qualify.
    pub fn search(
        &self,
        collection: Collection,
        query: &[f32],
        limit: usize,
        threshold: f32,
    ) -> EngineResult<Vec<SearchResult>> {
        validate_limit(limit)?;
        validate_threshold("threshold", threshold)?;
        self.rank(collection, query, limit, Some(threshold), None)
    }

    /// Embed `query_text`, then [`search`](Self::search).
    ///
    /// Provider failures and timeouts surface as `EmbeddingUnavailable`.
    pub fn search_by_text(
        &self,
        collection: Collection,
        query_text: &str,
        limit: usize,
        threshold: f32,
    ) -> EngineResult<Vec<SearchResult>> {
        validate_limit(limit)?;
        validate_threshold("threshold", threshold)?;

        let query = self.embedder.embed(query_text)?;
        let results = self.rank(collection, &query, limit, Some(threshold), None)?;
        tracing::debug!(
            "search {collection} '{query_text}': {} results above {threshold}",
            results.len()
        );
        Ok(results)
    }

    /// Records most similar to the stored embedding of `reference`.
    ///
    /// The reference itself is excluded. Fails with `NotFound` if the
    /// reference has no stored embedding.
    pub fn find_similar(
        &self,
        collection: Collection,
        reference: OwnerId,
        limit: usize,
    ) -> EngineResult<Vec<SearchResult>> {
        validate_limit(limit)?;
        let embedding = self.store.get(collection, reference)?;
        self.rank(collection, &embedding.vector, limit, None, Some(reference))
    }

    fn rank(
        &self,
        collection: Collection,
        query: &[f32],
        limit: usize,
        threshold: Option<f32>,
        exclude: Option<OwnerId>,
    ) -> EngineResult<Vec<SearchResult>> {
        ensure_finite(query)?;
        let Some(dimension) = self.store.dimension(collection) else {
            return Ok(Vec::new());
        };
        if dimension.get() != query.len() {
            return Err(EngineError::DimensionMismatch {
                collection,
                expected: dimension.get(),
                actual: query.len(),
            });
        }

        let candidates: Vec<_> = self
            .store
            .scan(collection, &|owner| Some(owner) != exclude)?
            .collect();

        let mut scored: Vec<(Score, OwnerId)> = candidates
            .par_iter()
            .map(|embedding| (similarity(query, &embedding.vector), embedding.owner_id))
            .filter(|(score, _)| threshold.is_none_or(|t| score.get() > t))
            .collect();
        scored.sort_by(|a, b| rank_order(*a, *b));

        let mut results = Vec::with_capacity(limit.min(scored.len()));
        for (score, owner_id) in scored {
            if results.len() == limit {
                break;
            }
            match self.records.get(collection, owner_id)? {
                Some(record) => results.push(SearchResult {
                    owner_id,
                    collection,
                    similarity: score,
                    record,
                }),
                None => tracing::warn!(
                    "Skipping {collection} {owner_id}: embedding has no matching record"
                ),
            }
        }
        Ok(results)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::records::InMemoryRecordStore;
    use crate::vector::{
        DEFAULT_EMBED_TIMEOUT, InMemoryVectorStore, MockEmbeddingProvider, TimedEmbedder,
        VectorDimension,
    };

    type Fixture = (SimilaritySearch, Arc<InMemoryVectorStore>, Arc<InMemoryRecordStore>);

    fn fixture_with(provider: Arc<dyn EmbeddingProvider>) -> Fixture {
        let store = Arc::new(InMemoryVectorStore::new());
        let records = Arc::new(InMemoryRecordStore::new());
        let embedder = Arc::new(TimedEmbedder::new(provider, DEFAULT_EMBED_TIMEOUT).unwrap());
        let search = SimilaritySearch::new(store.clone(), records.clone(), embedder);
        (search, store, records)
    }

    fn fixture() -> Fixture {
        fixture_with(Arc::new(MockEmbeddingProvider::new(2)))
    }

    struct OfflineProvider;

    impl EmbeddingProvider for OfflineProvider {
        fn embed(&self, _text: &str) -> EngineResult<Vec<f32>> {
            Err(EngineError::unavailable("connection refused"))
        }
        fn dimension(&self) -> VectorDimension {
            VectorDimension::new(2).unwrap()
        }
        fn model_name(&self) -> String {
            "offline".to_string()
        }
    }

    fn add(
        store: &InMemoryVectorStore,
        records: &InMemoryRecordStore,
        id: u64,
        angle_deg: f32,
    ) {
        let rad = angle_deg.to_radians();
        store
            .upsert(Collection::Issue, OwnerId::new(id), vec![rad.cos(), rad.sin()])
            .unwrap();
        records.insert(
            Collection::Issue,
            RecordSummary::new(OwnerId::new(id), format!("issue {id}"), ""),
        );
    }

    #[test]
    fn test_search_orders_and_limits() {
        let (search, store, records) = fixture();
        add(&store, &records, 1, 0.0);
        add(&store, &records, 2, 10.0);
        add(&store, &records, 3, 20.0);
        add(&store, &records, 4, 80.0);

        let results = search.search(Collection::Issue, &[1.0, 0.0], 2, 0.5).unwrap();
        let ids: Vec<u64> = results.iter().map(|r| r.owner_id.get()).collect();
        assert_eq!(ids, vec![1, 2]);

        let results = search.search(Collection::Issue, &[1.0, 0.0], 10, 0.5).unwrap();
        assert_eq!(results.len(), 3, "80 degrees is below the threshold");
        assert!(results.iter().all(|r| r.similarity.get() > 0.5));
        assert_eq!(results[0].record.title, "issue 1");
    }

    #[test]
    fn test_threshold_is_strict() {
        let (search, store, records) = fixture();
        add(&store, &records, 1, 0.0);

        let results = search.search(Collection::Issue, &[1.0, 0.0], 5, 1.0).unwrap();
        assert!(results.is_empty());
    }

    #[test]
    fn test_ties_break_by_owner_id() {
        let (search, store, records) = fixture();
        for id in [9, 3, 6] {
            add(&store, &records, id, 30.0);
        }
        let results = search.search(Collection::Issue, &[1.0, 0.0], 10, 0.0).unwrap();
        let ids: Vec<u64> = results.iter().map(|r| r.owner_id.get()).collect();
        assert_eq!(ids, vec![3, 6, 9]);
    }

    #[test]
    fn test_invalid_arguments() {
        let (search, _, _) = fixture();
        assert!(matches!(
            search.search(Collection::Issue, &[1.0, 0.0], 0, 0.5),
            Err(EngineError::InvalidArgument { name: "limit", .. })
        ));
        for bad in [-0.1, 1.5, f32::NAN] {
            assert!(matches!(
                search.search(Collection::Issue, &[1.0, 0.0], 5, bad),
                Err(EngineError::InvalidArgument {
                    name: "threshold",
                    ..
                })
            ));
        }
    }

    #[test]
    fn test_query_dimension_must_match() {
        let (search, store, records) = fixture();
        add(&store, &records, 1, 0.0);
        assert!(matches!(
            search.search(Collection::Issue, &[1.0, 0.0, 0.0], 5, 0.5),
            Err(EngineError::DimensionMismatch { .. })
        ));
    }

    #[test]
    fn test_empty_collection_returns_nothing() {
        let (search, _, _) = fixture();
        assert!(search.search(Collection::Solution, &[1.0, 0.0], 5, 0.1).unwrap().is_empty());
    }

    #[test]
    fn test_find_similar_excludes_reference() {
        let (search, store, records) = fixture();
        add(&store, &records, 1, 0.0);
        add(&store, &records, 2, 5.0);
        add(&store, &records, 3, 170.0);

        let results = search.find_similar(Collection::Issue, OwnerId::new(1), 5).unwrap();
        let ids: Vec<u64> = results.iter().map(|r| r.owner_id.get()).collect();
        // No threshold: the opposed vector is still listed, at similarity 0
        assert_eq!(ids, vec![2, 3]);
        assert_eq!(results[1].similarity, Score::zero());
    }

    #[test]
    fn test_find_similar_unknown_reference() {
        let (search, store, records) = fixture();
        add(&store, &records, 1, 0.0);
        assert!(matches!(
            search.find_similar(Collection::Issue, OwnerId::new(42), 5),
            Err(EngineError::NotFound { .. })
        ));
    }

    #[test]
    fn test_dangling_embeddings_are_skipped() {
        let (search, store, records) = fixture();
        add(&store, &records, 1, 0.0);
        add(&store, &records, 2, 1.0);
        records.remove(Collection::Issue, OwnerId::new(1));

        let results = search.search(Collection::Issue, &[1.0, 0.0], 5, 0.5).unwrap();
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].owner_id, OwnerId::new(2));
    }

    #[test]
    fn test_search_by_text_rejects_empty_query() {
        let (search, store, records) = fixture();
        add(&store, &records, 1, 0.0);
        assert!(matches!(
            search.search_by_text(Collection::Issue, "  ", 5, 0.5),
            Err(EngineError::InvalidArgument { name: "text", .. })
        ));
    }

    #[test]
    fn test_search_by_text_propagates_provider_failure() {
        let (search, store, records) = fixture_with(Arc::new(OfflineProvider));
        add(&store, &records, 1, 0.0);

        let err = search
            .search_by_text(Collection::Issue, "pothole", 5, 0.0)
            .unwrap_err();
        assert!(matches!(err, EngineError::EmbeddingUnavailable { .. }));
        assert!(err.to_string().contains("connection refused"));
    }
}
