//! Cross-encoder reranking of the fused candidates.
//!
//! The reranker is optional. Whenever it is missing, disabled, slow or
//! returns nothing usable, candidates pass through in their fused order
//! with a score of 1.0.

use crate::config::{EmbeddingProvider, RerankConfig};
use crate::embedder::normalize_base_url;
use ahash::AHashSet;
use async_trait::async_trait;
use schemaseek_core::{Error, Result};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::warn;

/// Relevance of the document at `index` of the request
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RerankScore {
    pub index: usize,
    pub relevance_score: f32,
}

#[async_trait]
pub trait Reranker: Send + Sync {
    async fn rerank(&self, query: &str, documents: &[String], top_n: usize) -> Result<Vec<RerankScore>>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RerankStatus {
    Applied,
    /// no reranker configured, or turned off
    Disabled,
    Failed,
}

#[derive(Debug, Clone, PartialEq)]
pub struct RerankOutcome {
    /// `(candidate index, score)`, best first
    pub order: Vec<(usize, f32)>,
    pub status: RerankStatus,
}

impl RerankOutcome {
    fn identity(len: usize, top_n: usize, status: RerankStatus) -> Self {
        Self {
            order: (0..len.min(top_n)).map(|i| (i, 1.0)).collect(),
            status,
        }
    }

    #[inline]
    pub fn degraded(&self) -> bool {
        self.status != RerankStatus::Applied
    }
}

/// Rerank `documents` (one per candidate, in fused order) and keep the best
/// `top_n`. Indices outside the candidate list and repeated indices are
/// ignored.
pub async fn rerank_candidates(
    reranker: Option<&dyn Reranker>,
    query: &str,
    documents: &[String],
    top_n: usize,
    timeout: Duration,
) -> RerankOutcome {
    let Some(reranker) = reranker else {
        return RerankOutcome::identity(documents.len(), top_n, RerankStatus::Disabled);
    };
    if documents.is_empty() {
        return RerankOutcome::identity(0, top_n, RerankStatus::Applied);
    }

    let scores = match tokio::time::timeout(timeout, reranker.rerank(query, documents, top_n)).await {
        Ok(Ok(scores)) => scores,
        Ok(Err(e)) => {
            warn!(error = %e, "Rerank failed, keeping fused order");
            return RerankOutcome::identity(documents.len(), top_n, RerankStatus::Failed);
        }
        Err(_) => {
            warn!(timeout_ms = timeout.as_millis() as u64, "Rerank timed out, keeping fused order");
            return RerankOutcome::identity(documents.len(), top_n, RerankStatus::Failed);
        }
    };

    let mut seen = AHashSet::new();
    let mut order: Vec<(usize, f32)> = scores
        .into_iter()
        .filter(|s| s.index < documents.len() && s.relevance_score.is_finite() && seen.insert(s.index))
        .map(|s| (s.index, s.relevance_score))
        .collect();

    if order.is_empty() {
        warn!("Rerank returned no usable results, keeping fused order");
        return RerankOutcome::identity(documents.len(), top_n, RerankStatus::Failed);
    }

    // stable: equal scores keep the service's order
    order.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(std::cmp::Ordering::Equal));
    order.truncate(top_n);
    RerankOutcome {
        order,
        status: RerankStatus::Applied,
    }
}

#[derive(Serialize)]
struct RerankRequest<'a> {
    model: &'a str,
    query: &'a str,
    documents: &'a [String],
    top_n: usize,
}

#[derive(Deserialize)]
struct RerankResponse {
    results: Vec<RerankScore>,
}

/// Client for `POST {base}/rerank` services (TEI, Jina, Cohere-style)
pub struct HttpReranker {
    client: reqwest::Client,
    endpoint: String,
    model: String,
    api_key: Option<String>,
}

impl HttpReranker {
    pub fn new(config: &RerankConfig) -> Result<Self> {
        config.validate()?;
        let client = reqwest::Client::builder()
            .build()
            .map_err(|e| Error::RerankUnavailable(format!("HTTP client: {}", e)))?;
        let base = normalize_base_url(&config.base_url, EmbeddingProvider::OpenAiCompatible);
        Ok(Self {
            client,
            endpoint: format!("{}/rerank", base),
            model: config.model.clone(),
            api_key: config.api_key.clone().filter(|k| !k.is_empty()),
        })
    }

    #[inline]
    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }
}

#[async_trait]
impl Reranker for HttpReranker {
    async fn rerank(&self, query: &str, documents: &[String], top_n: usize) -> Result<Vec<RerankScore>> {
        let mut request = self.client.post(&self.endpoint).json(&RerankRequest {
            model: &self.model,
            query,
            documents,
            top_n,
        });
        if let Some(key) = &self.api_key {
            request = request.bearer_auth(key);
        }

        let response = request
            .send()
            .await
            .map_err(|e| Error::RerankUnavailable(format!("HTTP error: {}", e)))?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(Error::RerankUnavailable(format!("API returned {}: {}", status, body)));
        }

        let parsed: RerankResponse = response
            .json()
            .await
            .map_err(|e| Error::RerankUnavailable(format!("JSON parse error: {}", e)))?;
        Ok(parsed.results)
    }
}
