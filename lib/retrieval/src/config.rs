//! Tunables of the retrieval pipeline and the endpoints of the embedding
//! and rerank services.
//!
//! Every field has a default, so a JSON config file only needs the keys it
//! overrides.

use schemaseek_core::{Bm25Params, Error, FusionParams, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

pub const DEFAULT_RESULT_CAP: usize = 4;
pub const DEFAULT_EMBED_BATCH_SIZE: usize = 16;
pub const DEFAULT_EMBED_TIMEOUT_MS: u64 = 15_000;
pub const DEFAULT_RERANK_TIMEOUT_MS: u64 = 10_000;
pub const DEFAULT_EMBED_RETRY_COOLDOWN_SECS: u64 = 60;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetrievalConfig {
    pub bm25: Bm25Params,
    pub fusion: FusionParams,
    /// tables returned per non-empty query
    pub result_cap: usize,
    pub embed_batch_size: usize,
    pub embed_timeout_ms: u64,
    /// after a build that embedded nothing, rebuilds for the same schema
    /// are not retried for this long; 0 retries on every call
    pub embed_retry_cooldown_secs: u64,
    pub rerank_timeout_ms: u64,
    pub rerank_enabled: bool,
    /// reload the catalog after this many seconds; `None` keeps it until
    /// invalidated
    pub catalog_ttl_secs: Option<u64>,
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            bm25: Bm25Params::default(),
            fusion: FusionParams::default(),
            result_cap: DEFAULT_RESULT_CAP,
            embed_batch_size: DEFAULT_EMBED_BATCH_SIZE,
            embed_timeout_ms: DEFAULT_EMBED_TIMEOUT_MS,
            embed_retry_cooldown_secs: DEFAULT_EMBED_RETRY_COOLDOWN_SECS,
            rerank_timeout_ms: DEFAULT_RERANK_TIMEOUT_MS,
            rerank_enabled: true,
            catalog_ttl_secs: None,
        }
    }
}

impl RetrievalConfig {
    pub fn validate(&self) -> Result<()> {
        let Bm25Params { k1, b, comment_boost } = self.bm25;
        check(k1 > 0.0, "bm25.k1 must be positive")?;
        check((0.0..=1.0).contains(&b), "bm25.b must be within [0, 1]")?;
        check(comment_boost >= 0.0, "bm25.comment_boost must not be negative")?;

        let f = &self.fusion;
        check(f.rrf_k > 0.0, "fusion.rrf_k must be positive")?;
        check(f.score_precision <= 12, "fusion.score_precision must be at most 12")?;
        check(f.fused_threshold >= 0.0, "fusion.fused_threshold must not be negative")?;
        check(f.vector_top_k > 0, "fusion.vector_top_k must be positive")?;
        check(f.bm25_candidate_depth > 0, "fusion.bm25_candidate_depth must be positive")?;
        check(f.fallback_size > 0, "fusion.fallback_size must be positive")?;
        check(f.fused_cap > 0, "fusion.fused_cap must be positive")?;

        check(self.result_cap > 0, "result_cap must be positive")?;
        check(self.embed_batch_size > 0, "embed_batch_size must be positive")?;
        check(self.embed_timeout_ms > 0, "embed_timeout_ms must be positive")?;
        check(self.rerank_timeout_ms > 0, "rerank_timeout_ms must be positive")?;
        Ok(())
    }

    #[inline]
    pub fn embed_timeout(&self) -> Duration {
        Duration::from_millis(self.embed_timeout_ms)
    }

    #[inline]
    pub fn embed_retry_cooldown(&self) -> Duration {
        Duration::from_secs(self.embed_retry_cooldown_secs)
    }

    #[inline]
    pub fn rerank_timeout(&self) -> Duration {
        Duration::from_millis(self.rerank_timeout_ms)
    }

    #[inline]
    pub fn catalog_ttl(&self) -> Option<Duration> {
        self.catalog_ttl_secs.map(Duration::from_secs)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum EmbeddingProvider {
    #[default]
    OpenAiCompatible,
    /// Ollama's OpenAI-compatible surface lives under `/v1`
    Ollama,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EmbeddingConfig {
    pub base_url: String,
    pub model: String,
    #[serde(default)]
    pub provider: EmbeddingProvider,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,
}

impl EmbeddingConfig {
    pub fn new(base_url: impl Into<String>, model: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            model: model.into(),
            provider: EmbeddingProvider::default(),
            api_key: None,
        }
    }

    pub fn validate(&self) -> Result<()> {
        check(!self.base_url.trim().is_empty(), "embedding.base_url is empty")?;
        check(!self.model.trim().is_empty(), "embedding.model is empty")
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RerankConfig {
    pub base_url: String,
    pub model: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,
}

impl RerankConfig {
    pub fn new(base_url: impl Into<String>, model: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            model: model.into(),
            api_key: None,
        }
    }

    pub fn validate(&self) -> Result<()> {
        check(!self.base_url.trim().is_empty(), "rerank.base_url is empty")?;
        check(!self.model.trim().is_empty(), "rerank.model is empty")
    }
}

/// Everything the CLI reads from `--config`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub data_dir: PathBuf,
    pub retrieval: RetrievalConfig,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub embedding: Option<EmbeddingConfig>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rerank: Option<RerankConfig>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from("./data"),
            retrieval: RetrievalConfig::default(),
            embedding: None,
            rerank: None,
        }
    }
}

impl EngineConfig {
    pub fn from_json_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let bytes = std::fs::read(path)?;
        let config: Self = serde_json::from_slice(&bytes)
            .map_err(|e| Error::InvalidConfig(format!("{}: {}", path.display(), e)))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        self.retrieval.validate()?;
        if let Some(embedding) = &self.embedding {
            embedding.validate()?;
        }
        if let Some(rerank) = &self.rerank {
            rerank.validate()?;
        }
        Ok(())
    }
}

#[inline]
fn check(ok: bool, message: &str) -> Result<()> {
    if ok {
        Ok(())
    } else {
        Err(Error::InvalidConfig(message.to_string()))
    }
}
