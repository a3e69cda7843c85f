//! Vector storage, embedding providers and similarity math.
//!
//! # Architecture
//! Text goes through an [`EmbeddingProvider`] (always wrapped in a
//! [`TimedEmbedder`]) and lands in a [`VectorStore`] keyed by
//! `(collection, owner_id)`. Search and clustering read the store through
//! snapshot scans and compare vectors with [`similarity`].
//!
//! Similarity is brute-force cosine over the scan. At the volumes this
//! engine targets (thousands of records per collection) that is fast
//! enough; an approximate index could replace the scan behind the same
//! `VectorStore` contract without changing ranking rules.

mod embedding;
mod metadata;
mod similarity;
mod storage;
mod store;
mod types;

// Re-export core types for public API
#[cfg(test)]
pub use embedding::MockEmbeddingProvider;
pub use embedding::{
    DEFAULT_EMBED_TIMEOUT, EmbeddingProvider, FastEmbedProvider, TimedEmbedder,
    parse_embedding_model, record_text,
};
pub use metadata::{CollectionMetadata, StoreMetadata};
pub use similarity::{cosine_similarity, magnitude, similarity};
pub use storage::{Segment, read_segment, segment_path, write_segment};
pub use store::{EmbeddingScan, InMemoryVectorStore, UpsertOutcome, VectorStore};
pub use types::{
    Embedding, Score, VECTOR_DIMENSION_384, VectorDimension, VectorError, ensure_finite,
};
