//! Threshold clustering over a filtered candidate pool.
//!
//! # Algorithm
//! 1. Materialize the pool: record ids matching the filter, joined with
//!    their stored embeddings.
//! 2. Score every unordered pair once and keep pairs strictly above
//!    `min_similarity`. Rows are scored in parallel; the edge list is
//!    collected in `(i, j)` order.
//! 3. Union every qualifying pair in a [`DisjointSet`], so records linked
//!    through a chain of qualifying pairs share a cluster.
//! 4. Drop singletons and report each component's mean edge similarity.
//!
//! Pair scoring is O(n²). Pools beyond `large_pool_warning` records are
//! logged but not capped.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::Arc;

use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;

use super::DisjointSet;
use crate::error::{EngineError, EngineResult};
use crate::records::RecordStore;
use crate::search::validate_threshold;
use crate::types::{Collection, OwnerId, RecordFilter};
use crate::vector::{Embedding, Score, VectorStore, similarity};

/// Default minimum pair similarity for clustering.
pub const DEFAULT_MIN_SIMILARITY: f32 = 0.8;

/// Pool size above which clustering logs a warning.
pub const DEFAULT_LARGE_POOL_WARNING: usize = 5000;

/// A group of mutually reachable records.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Cluster {
    /// Member ids, ascending.
    pub members: Vec<OwnerId>,
    pub count: usize,
    /// Mean similarity of the qualifying pairs inside the cluster.
    pub avg_similarity: Score,
    /// Partition key the pool was scoped by.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub category: Option<String>,
}

impl Cluster {
    pub fn contains(&self, owner_id: OwnerId) -> bool {
        self.members.binary_search(&owner_id).is_ok()
    }

    fn smallest_member(&self) -> Option<OwnerId> {
        self.members.first().copied()
    }
}

impl std::fmt::Display for Cluster {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let members: Vec<String> = self.members.iter().map(ToString::to_string).collect();
        write!(
            f,
            "{} records, avg {}: {}",
            self.count,
            self.avg_similarity,
            members.join(", ")
        )?;
        if let Some(category) = &self.category {
            write!(f, " ({category})")?;
        }
        Ok(())
    }
}

/// A qualifying pair, as indices into the materialized pool.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Edge {
    pub i: usize,
    pub j: usize,
    pub similarity: f32,
}

/// Score all pairs of `pool` and keep those strictly above `min_similarity`.
///
/// Checks `cancel` once per row.
pub fn qualifying_edges(
    pool: &[Embedding],
    min_similarity: f32,
    cancel: &CancellationToken,
) -> EngineResult<Vec<Edge>> {
    let rows: Vec<Vec<Edge>> = (0..pool.len())
        .into_par_iter()
        .map(|i| {
            if cancel.is_cancelled() {
                return Err(EngineError::Cancelled {
                    operation: "cluster",
                });
            }
            Ok(((i + 1)..pool.len())
                .filter_map(|j| {
                    let score = similarity(&pool[i].vector, &pool[j].vector).get();
                    (score > min_similarity).then_some(Edge {
                        i,
                        j,
                        similarity: score,
                    })
                })
                .collect::<Vec<_>>())
        })
        .collect::<EngineResult<_>>()?;

    Ok(rows.into_iter().flatten().collect())
}

/// Group `ids` into connected components over `edges`.
///
/// Singletons are dropped. Output is sorted by descending average
/// similarity, then by smallest member id.
pub fn connected_components(
    ids: &[OwnerId],
    edges: &[Edge],
    category: Option<&str>,
) -> Vec<Cluster> {
    let mut set = DisjointSet::new(ids.len());
    for edge in edges {
        set.union(edge.i, edge.j);
    }

    let mut members: HashMap<usize, Vec<OwnerId>> = HashMap::new();
    for (index, id) in ids.iter().enumerate() {
        members.entry(set.find(index)).or_default().push(*id);
    }

    let mut edge_sums: HashMap<usize, (f64, usize)> = HashMap::new();
    for edge in edges {
        let entry = edge_sums.entry(set.find(edge.i)).or_default();
        entry.0 += f64::from(edge.similarity);
        entry.1 += 1;
    }

    let mut clusters: Vec<Cluster> = members
        .into_iter()
        .filter(|(_, ids)| ids.len() >= 2)
        .map(|(root, mut ids)| {
            ids.sort_unstable();
            let (sum, count) = edge_sums.get(&root).copied().unwrap_or_default();
            let mean = if count == 0 { 0.0 } else { sum / count as f64 };
            Cluster {
                count: ids.len(),
                members: ids,
                avg_similarity: Score::clamped(mean as f32),
                category: category.map(str::to_string),
            }
        })
        .collect();

    sort_clusters(&mut clusters);
    clusters
}

fn sort_clusters(clusters: &mut [Cluster]) {
    clusters.sort_by(|a, b| {
        b.avg_similarity
            .cmp(&a.avg_similarity)
            .then_with(|| a.smallest_member().cmp(&b.smallest_member()))
    });
}

/// Clusters records of one collection by embedding similarity.
pub struct ClusteringEngine {
    store: Arc<dyn VectorStore>,
    records: Arc<dyn RecordStore>,
    thread_pool: Option<Arc<rayon::ThreadPool>>,
    large_pool_warning: usize,
}

impl ClusteringEngine {
    pub fn new(store: Arc<dyn VectorStore>, records: Arc<dyn RecordStore>) -> Self {
        Self {
            store,
            records,
            thread_pool: None,
            large_pool_warning: DEFAULT_LARGE_POOL_WARNING,
        }
    }

    /// Score pairs on a dedicated pool of `threads` workers instead of the
    /// global rayon pool.
    pub fn with_threads(mut self, threads: usize) -> EngineResult<Self> {
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(threads)
            .thread_name(|i| format!("civicsim-cluster-{i}"))
            .build()
            .map_err(|e| EngineError::Config {
                reason: format!("failed to build clustering thread pool: {e}"),
            })?;
        self.thread_pool = Some(Arc::new(pool));
        Ok(self)
    }

    #[must_use]
    pub fn with_large_pool_warning(mut self, size: usize) -> Self {
        self.large_pool_warning = size;
        self
    }

    /// Cluster the records of `collection` matching `filter`.
    ///
    /// Each cluster's category is the filter's category. Fails with
    /// `Cancelled` if `cancel` fires before the result is complete; no
    /// partial cluster set is ever returned.
    pub fn cluster(
        &self,
        collection: Collection,
        filter: &RecordFilter,
        min_similarity: f32,
        cancel: &CancellationToken,
    ) -> EngineResult<Vec<Cluster>> {
        validate_threshold("min_similarity", min_similarity)?;
        let pool: HashSet<OwnerId> = self
            .records
            .list(collection, filter)?
            .into_iter()
            .map(|record| record.owner_id)
            .collect();

        self.cluster_pool(
            collection,
            &pool,
            min_similarity,
            filter.category.as_deref(),
            cancel,
        )
    }

    /// Partition the filtered pool by record category and cluster each
    /// partition on its own.
    ///
    /// Records without a category form one partition with no category.
    pub fn cluster_by_category(
        &self,
        collection: Collection,
        filter: &RecordFilter,
        min_similarity: f32,
        cancel: &CancellationToken,
    ) -> EngineResult<Vec<Cluster>> {
        validate_threshold("min_similarity", min_similarity)?;
        let mut partitions: BTreeMap<Option<String>, HashSet<OwnerId>> = BTreeMap::new();
        for record in self.records.list(collection, filter)? {
            partitions
                .entry(record.category)
                .or_default()
                .insert(record.owner_id);
        }

        let mut clusters = Vec::new();
        for (category, pool) in &partitions {
            clusters.extend(self.cluster_pool(
                collection,
                pool,
                min_similarity,
                category.as_deref(),
                cancel,
            )?);
        }
        sort_clusters(&mut clusters);

        tracing::info!(
            "Found {} {collection} clusters across {} categories",
            clusters.len(),
            partitions.len()
        );
        Ok(clusters)
    }

    fn cluster_pool(
        &self,
        collection: Collection,
        pool: &HashSet<OwnerId>,
        min_similarity: f32,
        category: Option<&str>,
        cancel: &CancellationToken,
    ) -> EngineResult<Vec<Cluster>> {
        if cancel.is_cancelled() {
            return Err(EngineError::Cancelled {
                operation: "cluster",
            });
        }

        let embeddings: Vec<Embedding> = self
            .store
            .scan(collection, &|owner| pool.contains(&owner))?
            .collect();
        if embeddings.len() < pool.len() {
            tracing::debug!(
                "{} of {} {collection} records have no embedding and were left out",
                pool.len() - embeddings.len(),
                pool.len()
            );
        }
        if embeddings.len() < 2 {
            return Ok(Vec::new());
        }
        if embeddings.len() > self.large_pool_warning {
            tracing::warn!(
                "Clustering {} {collection} records scores {} pairs; consider a narrower filter",
                embeddings.len(),
                embeddings.len() * (embeddings.len() - 1) / 2
            );
        }

        let edges = match &self.thread_pool {
            Some(threads) => {
                threads.install(|| qualifying_edges(&embeddings, min_similarity, cancel))
            }
            None => qualifying_edges(&embeddings, min_similarity, cancel),
        }?;
        tracing::debug!(
            "{} of {} {collection} records produced {} pairs above {min_similarity}",
            embeddings.len(),
            pool.len(),
            edges.len()
        );

        let ids: Vec<OwnerId> = embeddings.iter().map(|e| e.owner_id).collect();
        let clusters = connected_components(&ids, &edges, category);

        // A cancel that lands during grouping still voids the result
        if cancel.is_cancelled() {
            return Err(EngineError::Cancelled {
                operation: "cluster",
            });
        }
        Ok(clusters)
    }
}
