//! Similarity clustering of records for collective action.

mod disjoint_set;
mod engine;

pub use disjoint_set::DisjointSet;
pub use engine::{
    Cluster, ClusteringEngine, DEFAULT_LARGE_POOL_WARNING, DEFAULT_MIN_SIMILARITY, Edge,
    connected_components, qualifying_edges,
};
