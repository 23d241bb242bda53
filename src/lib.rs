//! # SchemaSeek
//!
//! Hybrid schema retrieval for text-to-SQL pipelines.
//!
//! Given a question and a database catalog that may hold hundreds of
//! tables, SchemaSeek returns the handful of table definitions a SQL
//! generation prompt should include.
//!
//! ## Pipeline
//!
//! 1. The catalog is introspected once and cached per datasource.
//! 2. Every table becomes a flat text document.
//! 3. BM25 ranks all tables, boosting tables whose comment matches the
//!    question.
//! 4. A persisted embedding index ranks them semantically. It is rebuilt
//!    only when the schema fingerprint changes.
//! 5. Reciprocal rank fusion merges both orderings.
//! 6. An optional cross-encoder reranker picks the final four.
//!
//! Each stage past the catalog degrades instead of failing: without an
//! embedding service the ranking is lexical only, and without a reranker
//! the fused order is kept.
//!
//! ## Quick Start
//!
//! ### As a CLI
//!
//! ```bash
//! schemaseek retrieve --catalog shop.sqlite --embed-url localhost:11434 \
//!     --embed-provider ollama --embed-model bge-m3 "top customers by order amount"
//! ```
//!
//! ### As a Library
//!
//! ```rust,no_run
//! use schemaseek::prelude::*;
//! use std::sync::Arc;
//!
//! # async fn run() -> Result<()> {
//! let embedder = Arc::new(HttpEmbedder::new(&EmbeddingConfig::new("localhost:8000/v1", "bge-m3"))?);
//! let registry = ServiceRegistry::new("./data", RetrievalConfig::default(), embedder, None)?;
//! registry.get_or_register("shop", Arc::new(SqliteCatalogSource::new("shop.sqlite")))?;
//!
//! let result = registry.retrieve("shop", "top customers by order amount").await?;
//! for table in &result.tables {
//!     println!("{}", table.table_name);
//! }
//! # Ok(())
//! # }
//! ```
//!
//! ## Crate Structure
//!
//! - `schemaseek-core` - catalog model, documents, fingerprint, BM25, flat index, fusion
//! - `schemaseek-storage` - vector index snapshots on disk
//! - `schemaseek-retrieval` - catalog sources, model clients, vector index, service

// Re-export core types
pub use schemaseek_core::{
    build_document, BM25Index, Bm25Params, Catalog, ColumnInfo, Error, FlatIpIndex, FusionParams, FusionRanker,
    RankedCandidate, Result, SchemaFingerprint, SkippedTable, TableInfo, Vector,
};

// Re-export storage
pub use schemaseek_storage::{SnapshotStore, VectorIndexSnapshot};

// Re-export retrieval
pub use schemaseek_retrieval::{
    introspect, BuildOutcome, CatalogConnection, CatalogSource, Degradation, DisabledEmbedder, Embedder, EmbeddingConfig, EmbeddingProvider,
    EngineConfig, HttpEmbedder, HttpReranker, IndexState, JsonCatalogSource, RerankConfig, RerankScore, Reranker,
    RetrievalConfig, RetrievalResult, SchemaCatalogLoader, SchemaRetrievalService, ServiceRegistry,
    SqliteCatalogSource, StaticCatalogSource, VectorIndex,
};

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::{
        Catalog, CatalogSource, Degradation, Embedder, EmbeddingConfig, EmbeddingProvider, Error, HttpEmbedder,
        HttpReranker, JsonCatalogSource, RerankConfig, Reranker, Result, RetrievalConfig, RetrievalResult,
        SchemaRetrievalService, ServiceRegistry, SqliteCatalogSource, StaticCatalogSource, TableInfo,
    };
}

/// Inner-product kernels
pub mod simd {
    pub use schemaseek_core::simd::{dot_product_simd, norm_simd};
}
