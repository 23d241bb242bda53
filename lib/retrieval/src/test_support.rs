// Helpers shared by the unit tests of this crate
use async_trait::async_trait;
use schemaseek_core::{Error, Result};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpListener;
use tokio::task::JoinHandle;

use crate::embedder::Embedder;

/// Answer exactly one HTTP request with `status` and a JSON `body`.
/// Returns the base URL and a handle yielding the raw request text.
pub async fn serve_once(status: u16, body: &str) -> (String, JoinHandle<String>) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let body = body.to_string();

    let handle = tokio::spawn(async move {
        let (mut socket, _) = listener.accept().await.unwrap();
        let mut buf = Vec::new();
        let mut chunk = [0u8; 4096];
        loop {
            let n = socket.read(&mut chunk).await.unwrap();
            if n == 0 {
                break;
            }
            buf.extend_from_slice(&chunk[..n]);
            if request_complete(&buf) {
                break;
            }
        }

        let response = format!(
            "HTTP/1.1 {} Test\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
            status,
            body.len(),
            body
        );
        socket.write_all(response.as_bytes()).await.unwrap();
        socket.shutdown().await.ok();
        String::from_utf8_lossy(&buf).into_owned()
    });

    (format!("http://{}", addr), handle)
}

fn request_complete(buf: &[u8]) -> bool {
    let text = String::from_utf8_lossy(buf);
    let Some(header_end) = text.find("\r\n\r\n") else {
        return false;
    };
    let content_length = text[..header_end]
        .lines()
        .filter_map(|line| line.split_once(':'))
        .find(|(name, _)| name.trim().eq_ignore_ascii_case("content-length"))
        .and_then(|(_, value)| value.trim().parse::<usize>().ok())
        .unwrap_or(0);
    buf.len() >= header_end + 4 + content_length
}

/// Deterministic bag-of-words embedder: each token lands in one of `dim`
/// buckets. Counts every call and can be switched to fail or hang.
pub struct BucketEmbedder {
    pub dim: usize,
    pub calls: AtomicUsize,
    pub texts_embedded: AtomicUsize,
    pub fail: bool,
    pub hang: bool,
    /// texts containing this marker fail individually
    pub poison: Option<String>,
}

impl BucketEmbedder {
    pub fn new(dim: usize) -> Self {
        Self {
            dim,
            calls: AtomicUsize::new(0),
            texts_embedded: AtomicUsize::new(0),
            fail: false,
            hang: false,
            poison: None,
        }
    }

    pub fn failing() -> Self {
        Self { fail: true, ..Self::new(32) }
    }

    pub fn hanging() -> Self {
        Self { hang: true, ..Self::new(32) }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    fn vector(&self, text: &str) -> Vec<f32> {
        let mut v = vec![0.0; self.dim];
        for token in schemaseek_core::tokenize(text) {
            let bucket = token.bytes().fold(7usize, |h, b| h.wrapping_mul(31).wrapping_add(b as usize));
            v[bucket % self.dim] += 1.0;
        }
        v
    }
}

#[async_trait]
impl Embedder for BucketEmbedder {
    async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.hang {
            tokio::time::sleep(Duration::from_secs(3600)).await;
        }
        if self.fail {
            return Err(Error::EmbeddingUnavailable("connection refused".into()));
        }
        if let Some(poison) = &self.poison {
            if text.contains(poison.as_str()) {
                return Err(Error::EmbeddingUnavailable("rejected input".into()));
            }
        }
        self.texts_embedded.fetch_add(1, Ordering::SeqCst);
        Ok(self.vector(text))
    }

    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.hang {
            tokio::time::sleep(Duration::from_secs(3600)).await;
        }
        if self.fail {
            return Err(Error::EmbeddingUnavailable("connection refused".into()));
        }
        if let Some(poison) = &self.poison {
            if texts.iter().any(|t| t.contains(poison.as_str())) {
                return Err(Error::EmbeddingUnavailable("batch rejected".into()));
            }
        }
        self.texts_embedded.fetch_add(texts.len(), Ordering::SeqCst);
        Ok(texts.iter().map(|t| self.vector(t)).collect())
    }
}
