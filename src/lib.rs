//! Semantic similarity engine for civic issues and solutions.
//!
//! Records are embedded into a [`VectorStore`](vector::VectorStore), ranked
//! against text queries or each other by cosine similarity, and grouped
//! into clusters of near-duplicates for collective action.

pub mod clustering;
pub mod config;
pub mod engine;
pub mod error;
#[cfg(feature = "http-server")]
pub mod http_server;
pub mod io;
pub mod records;
pub mod search;
pub mod types;
pub mod vector;

// Explicit exports for better API clarity
pub use clustering::{Cluster, ClusteringEngine, DisjointSet};
pub use config::Settings;
pub use engine::{IndexOutcome, IndexStats, SemanticEngine, content_hash, open_store};
pub use error::{EngineError, EngineResult};
pub use records::{InMemoryRecordStore, RecordDataset, RecordStore};
pub use search::{SearchResult, SimilaritySearch};
pub use types::{Collection, OwnerId, RecordFilter, RecordSummary};
pub use vector::{
    EmbeddingProvider, FastEmbedProvider, InMemoryVectorStore, Score, TimedEmbedder,
    VectorStore, similarity,
};
