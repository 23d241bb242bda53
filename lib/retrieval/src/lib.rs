//! # SchemaSeek Retrieval
//!
//! Picks the few tables of a database schema that matter for a natural
//! language question.
//!
//! Per datasource, a [`SchemaRetrievalService`] loads the catalog through a
//! [`CatalogSource`], ranks every table with BM25 and with a persisted
//! embedding index ([`VectorIndex`]), fuses the two orderings, and lets an
//! optional cross-encoder [`Reranker`] pick the final few.
//! [`ServiceRegistry`] keeps one service per datasource.

pub mod catalog_loader;
pub mod config;
pub mod embedder;
pub mod registry;
pub mod rerank;
pub mod service;
pub mod vector_index;

#[cfg(test)]
mod test_support;

pub use catalog_loader::{
    introspect, CatalogConnection, CatalogSource, JsonCatalogSource, SchemaCatalogLoader, SqliteCatalogSource,
    StaticCatalogSource,
};
pub use config::{EmbeddingConfig, EmbeddingProvider, EngineConfig, RerankConfig, RetrievalConfig};
pub use embedder::{normalize_base_url, DisabledEmbedder, Embedder, HttpEmbedder};
pub use registry::ServiceRegistry;
pub use rerank::{rerank_candidates, HttpReranker, RerankOutcome, RerankScore, RerankStatus, Reranker};
pub use service::{Degradation, RetrievalResult, SchemaRetrievalService};
pub use vector_index::{BuildOutcome, IndexState, VectorIndex};
