//! Embedding clients.
//!
//! [`Embedder`] is the seam the vector index talks to. [`HttpEmbedder`]
//! speaks the OpenAI-compatible `/embeddings` protocol, which covers hosted
//! APIs as well as local servers such as Ollama and vLLM.

use crate::config::{EmbeddingConfig, EmbeddingProvider};
use async_trait::async_trait;
use schemaseek_core::{Error, Result};
use serde::{Deserialize, Serialize};
use tracing::debug;

#[async_trait]
pub trait Embedder: Send + Sync {
    async fn embed(&self, text: &str) -> Result<Vec<f32>>;

    /// One vector per input, in input order. The default calls
    /// [`Embedder::embed`] once per text.
    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        let mut vectors = Vec::with_capacity(texts.len());
        for text in texts {
            vectors.push(self.embed(text).await?);
        }
        Ok(vectors)
    }
}

#[derive(Serialize)]
struct EmbedRequest<'a> {
    model: &'a str,
    input: &'a [String],
}

#[derive(Deserialize)]
struct EmbedResponse {
    data: Vec<EmbedData>,
}

#[derive(Deserialize)]
struct EmbedData {
    #[serde(default)]
    index: Option<usize>,
    embedding: Vec<f32>,
}

pub struct HttpEmbedder {
    client: reqwest::Client,
    endpoint: String,
    model: String,
    api_key: Option<String>,
}

impl HttpEmbedder {
    pub fn new(config: &EmbeddingConfig) -> Result<Self> {
        config.validate()?;
        let client = reqwest::Client::builder()
            .build()
            .map_err(|e| Error::EmbeddingUnavailable(format!("HTTP client: {}", e)))?;
        let base = normalize_base_url(&config.base_url, config.provider);
        Ok(Self {
            client,
            endpoint: format!("{}/embeddings", base),
            model: config.model.clone(),
            api_key: config.api_key.clone().filter(|k| !k.is_empty()),
        })
    }

    #[inline]
    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    async fn request(&self, input: &[String]) -> Result<Vec<Vec<f32>>> {
        let mut request = self.client.post(&self.endpoint).json(&EmbedRequest {
            model: &self.model,
            input,
        });
        if let Some(key) = &self.api_key {
            request = request.bearer_auth(key);
        }

        let response = request
            .send()
            .await
            .map_err(|e| Error::EmbeddingUnavailable(format!("HTTP error: {}", e)))?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(Error::EmbeddingUnavailable(format!("API returned {}: {}", status, body)));
        }

        let parsed: EmbedResponse = response
            .json()
            .await
            .map_err(|e| Error::EmbeddingUnavailable(format!("JSON parse error: {}", e)))?;
        debug!(inputs = input.len(), returned = parsed.data.len(), "Embedding response");
        order_embeddings(parsed.data, input.len())
    }
}

// Servers may return `data` out of order; `index` says where each belongs.
fn order_embeddings(data: Vec<EmbedData>, expected: usize) -> Result<Vec<Vec<f32>>> {
    if data.len() != expected {
        return Err(Error::EmbeddingUnavailable(format!(
            "expected {} embeddings, got {}",
            expected,
            data.len()
        )));
    }
    let mut slots: Vec<Option<Vec<f32>>> = vec![None; expected];
    for (position, item) in data.into_iter().enumerate() {
        let index = item.index.unwrap_or(position);
        match slots.get_mut(index) {
            Some(slot) if slot.is_none() => *slot = Some(item.embedding),
            _ => {
                return Err(Error::EmbeddingUnavailable(format!(
                    "invalid or duplicate embedding index {}",
                    index
                )))
            }
        }
    }
    Ok(slots.into_iter().flatten().collect())
}

#[async_trait]
impl Embedder for HttpEmbedder {
    async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        let input = [text.to_string()];
        self.request(&input)
            .await?
            .into_iter()
            .next()
            .ok_or_else(|| Error::EmbeddingUnavailable("empty response".into()))
    }

    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }
        self.request(texts).await
    }
}

/// Stand-in when no embedding service is configured. Every call fails, so
/// retrieval runs on BM25 alone.
#[derive(Debug, Clone, Copy, Default)]
pub struct DisabledEmbedder;

#[async_trait]
impl Embedder for DisabledEmbedder {
    async fn embed(&self, _text: &str) -> Result<Vec<f32>> {
        Err(Error::EmbeddingUnavailable("no embedding service configured".into()))
    }

    async fn embed_batch(&self, _texts: &[String]) -> Result<Vec<Vec<f32>>> {
        Err(Error::EmbeddingUnavailable("no embedding service configured".into()))
    }
}

/// Add a scheme when missing (`http://` for loopback hosts, `https://`
/// otherwise), drop trailing slashes, and make sure Ollama URLs end in
/// `/v1`.
pub fn normalize_base_url(base_url: &str, provider: EmbeddingProvider) -> String {
    let trimmed = base_url.trim();
    let mut url = if trimmed.starts_with("http://") || trimmed.starts_with("https://") {
        trimmed.to_string()
    } else if ["localhost", "127.0.0.1", "0.0.0.0"]
        .iter()
        .any(|host| trimmed.starts_with(host))
    {
        format!("http://{}", trimmed)
    } else {
        format!("https://{}", trimmed)
    };

    while url.ends_with('/') {
        url.pop();
    }
    if provider == EmbeddingProvider::Ollama && !url.ends_with("/v1") {
        url.push_str("/v1");
    }
    url
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::serve_once;

    #[test]
    fn test_normalize_base_url() {
        use EmbeddingProvider::*;
        assert_eq!(normalize_base_url("localhost:11434", OpenAiCompatible), "http://localhost:11434");
        assert_eq!(normalize_base_url("127.0.0.1:8000/", OpenAiCompatible), "http://127.0.0.1:8000");
        assert_eq!(normalize_base_url("api.example.com/v1", OpenAiCompatible), "https://api.example.com/v1");
        assert_eq!(normalize_base_url(" http://gpu-box:8000 ", OpenAiCompatible), "http://gpu-box:8000");
        assert_eq!(normalize_base_url("0.0.0.0:11434", Ollama), "http://0.0.0.0:11434/v1");
        assert_eq!(normalize_base_url("http://ollama:11434/v1/", Ollama), "http://ollama:11434/v1");
    }

    #[test]
    fn test_order_embeddings_uses_index() {
        let data = vec![
            EmbedData { index: Some(1), embedding: vec![2.0] },
            EmbedData { index: Some(0), embedding: vec![1.0] },
        ];
        assert_eq!(order_embeddings(data, 2).unwrap(), vec![vec![1.0], vec![2.0]]);
    }

    #[test]
    fn test_order_embeddings_rejects_bad_responses() {
        let short = vec![EmbedData { index: Some(0), embedding: vec![1.0] }];
        assert!(order_embeddings(short, 2).is_err());

        let duplicate = vec![
            EmbedData { index: Some(0), embedding: vec![1.0] },
            EmbedData { index: Some(0), embedding: vec![2.0] },
        ];
        assert!(order_embeddings(duplicate, 2).is_err());
    }

    #[tokio::test]
    async fn test_http_embedder_batch() {
        let body = r#"{"data":[{"index":1,"embedding":[0.0,1.0]},{"index":0,"embedding":[1.0,0.0]}]}"#;
        let (base, request) = serve_once(200, body).await;
        let mut config = EmbeddingConfig::new(base, "test-model");
        config.api_key = Some("secret".into());
        let embedder = HttpEmbedder::new(&config).unwrap();

        let vectors = embedder
            .embed_batch(&["orders".to_string(), "customers".to_string()])
            .await
            .unwrap();
        assert_eq!(vectors, vec![vec![1.0, 0.0], vec![0.0, 1.0]]);

        let raw = request.await.unwrap();
        assert!(raw.starts_with("POST /embeddings"));
        assert!(raw.to_ascii_lowercase().contains("authorization: bearer secret"));
        assert!(raw.contains(r#""model":"test-model""#));
        assert!(raw.contains(r#""input":["orders","customers"]"#));
    }

    #[tokio::test]
    async fn test_http_embedder_server_error() {
        let (base, _request) = serve_once(503, r#"{"error":"overloaded"}"#).await;
        let embedder = HttpEmbedder::new(&EmbeddingConfig::new(base, "m")).unwrap();
        let err = embedder.embed("orders").await.unwrap_err();
        assert!(matches!(err, Error::EmbeddingUnavailable(_)));
    }

    #[tokio::test]
    async fn test_disabled_embedder() {
        assert!(matches!(DisabledEmbedder.embed("orders").await, Err(Error::EmbeddingUnavailable(_))));
        assert!(DisabledEmbedder.embed_batch(&["orders".to_string()]).await.is_err());
    }

    #[tokio::test]
    async fn test_empty_batch_skips_request() {
        let embedder = HttpEmbedder::new(&EmbeddingConfig::new("http://127.0.0.1:1", "m")).unwrap();
        assert!(embedder.embed_batch(&[]).await.unwrap().is_empty());
    }
}
