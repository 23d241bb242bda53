use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

/// Errors raised while loading a catalog, ranking tables or maintaining
/// the vector index.
///
/// Only [`Error::MetadataUnavailable`] is ever returned from a retrieval
/// call. Every other kind is absorbed by the component that produced it and
/// turned into a degraded (smaller or reordered) result.
#[derive(Error, Debug)]
pub enum Error {
    #[error("Schema metadata unavailable: {0}")]
    MetadataUnavailable(String),

    #[error("Embedding service unavailable: {0}")]
    EmbeddingUnavailable(String),

    #[error("Vector index corrupt: {0}")]
    IndexCorrupt(String),

    #[error("Rerank service unavailable: {0}")]
    RerankUnavailable(String),

    #[error("Failed to introspect table {table}: {reason}")]
    TableIntrospection { table: String, reason: String },

    #[error("Invalid vector dimension: expected {expected}, got {actual}")]
    InvalidDimension { expected: usize, actual: usize },

    #[error("Storage error: {0}")]
    Storage(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),
}

impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Self {
        Error::Serialization(e.to_string())
    }
}
