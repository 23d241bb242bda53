//! # SchemaSeek Core
//!
//! Data model and ranking primitives of the schema retrieval engine.
//!
//! - [`Catalog`] / [`TableInfo`] - table metadata of one datasource
//! - [`SchemaFingerprint`] - content hash deciding vector index reuse
//! - [`build_document`] - the text each table is ranked by
//! - [`BM25Index`] - lexical ranking with a table comment boost
//! - [`FlatIpIndex`] - exact inner-product search over embeddings
//! - [`FusionRanker`] - reciprocal rank fusion, narrowing and selection
//!
//! ## Example
//!
//! ```rust
//! use schemaseek_core::{BM25Index, Bm25Params, Catalog, FusionRanker, TableInfo};
//!
//! let catalog = Catalog::new(
//!     vec![
//!         TableInfo::new("orders")
//!             .with_comment("customer orders")
//!             .with_column("amount", "REAL", Some("order total")),
//!         TableInfo::new("audit_log").with_column("message", "TEXT", None),
//!     ],
//!     Vec::new(),
//! );
//!
//! let bm25 = BM25Index::from_catalog(&catalog, Bm25Params::default());
//! let names = catalog.table_names();
//! let bm25_order: Vec<String> = bm25
//!     .rank("find customer orders")
//!     .into_iter()
//!     .map(|i| names[i].clone())
//!     .collect();
//!
//! let ranked = FusionRanker::default().rank(&bm25_order, &[]);
//! assert_eq!(ranked[0].table_name, "orders");
//! ```

pub mod bm25;
pub mod catalog;
pub mod document;
pub mod error;
pub mod fingerprint;
pub mod flat;
pub mod fusion;
pub mod tokenizer;
pub mod vector;

/// Inner-product kernels
///
/// - AVX2/FMA on x86_64
/// - NEON on ARM64/Apple Silicon
/// - scalar fallback elsewhere
pub mod simd;

pub use bm25::{BM25Index, Bm25Params};
pub use catalog::{format_foreign_key, Catalog, ColumnInfo, SkippedTable, TableInfo};
pub use document::{build_corpus, build_document};
pub use error::{Error, Result};
pub use fingerprint::SchemaFingerprint;
pub use flat::FlatIpIndex;
pub use fusion::{FusionParams, FusionRanker, RankedCandidate};
pub use tokenizer::{token_set, tokenize};
pub use vector::Vector;
