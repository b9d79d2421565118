//! Text embeddings for document chunks and search queries.
//!
//! `HashingEmbedder` needs no external service and is used unless
//! `EMBEDDING_API_URL` is set, in which case `HttpEmbedder` calls an
//! OpenAI-compatible `/embeddings` endpoint.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, warn};

use crate::config::EmbeddingSettings;

const MAX_RETRIES: u32 = 3;

#[derive(Debug, Error)]
pub enum EmbeddingError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("API error (status {status}): {message}")]
    Api { status: u16, message: String },

    #[error("expected {expected} embeddings, got {actual}")]
    CountMismatch { expected: usize, actual: usize },

    #[error("expected {expected}-dimensional vectors, got {actual}")]
    DimensionMismatch { expected: usize, actual: usize },

    #[error("gave up after {retries} retries")]
    RetriesExhausted { retries: u32 },
}

#[async_trait]
pub trait Embedder: Send + Sync {
    fn dimensions(&self) -> usize;

    /// One vector per input, in input order.
    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, EmbeddingError>;
}

/// Builds the embedder selected by the configuration.
pub fn from_settings(settings: &EmbeddingSettings) -> Result<Box<dyn Embedder>, EmbeddingError> {
    match &settings.api_url {
        Some(url) => Ok(Box::new(HttpEmbedder::new(
            url,
            settings.api_key.clone(),
            settings.model.clone(),
            settings.dimensions,
        )?)),
        None => Ok(Box::new(HashingEmbedder::new(settings.dimensions))),
    }
}

/// Deterministic bag-of-words embedding: lowercase alphanumeric tokens are
/// hashed into a fixed number of buckets with a hashed sign, then the vector
/// is L2-normalised.
#[derive(Debug, Clone)]
pub struct HashingEmbedder {
    dimensions: usize,
}

impl HashingEmbedder {
    pub fn new(dimensions: usize) -> Self {
        Self {
            dimensions: dimensions.max(1),
        }
    }

    pub fn embed_one(&self, text: &str) -> Vec<f32> {
        let mut vector = vec![0f32; self.dimensions];
        for token in text
            .split(|c: char| !c.is_alphanumeric())
            .filter(|t| !t.is_empty())
        {
            let h = fnv1a(token.to_lowercase().as_bytes());
            let index = (h % self.dimensions as u64) as usize;
            let sign = if (h >> 63) & 1 == 0 { 1.0 } else { -1.0 };
            vector[index] += sign;
        }
        normalize(&mut vector);
        vector
    }
}

#[async_trait]
impl Embedder for HashingEmbedder {
    fn dimensions(&self) -> usize {
        self.dimensions
    }

    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, EmbeddingError> {
        Ok(texts.iter().map(|t| self.embed_one(t)).collect())
    }
}

/// FNV-1a, stable across builds so stored vectors stay comparable.
fn fnv1a(bytes: &[u8]) -> u64 {
    let mut hash: u64 = 0xcbf2_9ce4_8422_2325;
    for b in bytes {
        hash ^= u64::from(*b);
        hash = hash.wrapping_mul(0x0000_0100_0000_01b3);
    }
    hash
}

pub fn normalize(vector: &mut [f32]) {
    let norm = vector.iter().map(|v| v * v).sum::<f32>().sqrt();
    if norm > 0.0 {
        for v in vector.iter_mut() {
            *v /= norm;
        }
    }
}

/// Cosine similarity; 0 when either vector is zero or the lengths differ.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }
    let dot: f32 = a.iter().zip(b).map(|(x, y)| x * y).sum();
    let na = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let nb = b.iter().map(|x| x * x).sum::<f32>().sqrt();
    if na == 0.0 || nb == 0.0 {
        0.0
    } else {
        dot / (na * nb)
    }
}

#[derive(Debug, Serialize)]
struct EmbeddingRequest<'a> {
    model: &'a str,
    input: &'a [String],
    /// Models with native output sizes above this shorten their vectors to it.
    dimensions: usize,
}

#[derive(Debug, Deserialize)]
struct EmbeddingResponse {
    data: Vec<EmbeddingData>,
}

#[derive(Debug, Deserialize)]
struct EmbeddingData {
    index: usize,
    embedding: Vec<f32>,
}

/// Client for an OpenAI-compatible embeddings API.
#[derive(Clone)]
pub struct HttpEmbedder {
    client: Client,
    url: String,
    api_key: Option<String>,
    model: String,
    dimensions: usize,
}

impl HttpEmbedder {
    pub fn new(
        base_url: &str,
        api_key: Option<String>,
        model: String,
        dimensions: usize,
    ) -> Result<Self, EmbeddingError> {
        let base = base_url.trim_end_matches('/');
        let url = if base.ends_with("/embeddings") {
            base.to_string()
        } else {
            format!("{base}/embeddings")
        };
        Ok(Self {
            client: Client::builder().timeout(Duration::from_secs(60)).build()?,
            url,
            api_key,
            model,
            dimensions,
        })
    }

    fn into_vectors(
        &self,
        mut response: EmbeddingResponse,
        expected: usize,
    ) -> Result<Vec<Vec<f32>>, EmbeddingError> {
        if response.data.len() != expected {
            return Err(EmbeddingError::CountMismatch {
                expected,
                actual: response.data.len(),
            });
        }
        response.data.sort_by_key(|d| d.index);
        let mut vectors = Vec::with_capacity(expected);
        for item in response.data {
            if item.embedding.len() != self.dimensions {
                return Err(EmbeddingError::DimensionMismatch {
                    expected: self.dimensions,
                    actual: item.embedding.len(),
                });
            }
            vectors.push(item.embedding);
        }
        Ok(vectors)
    }
}

#[async_trait]
impl Embedder for HttpEmbedder {
    fn dimensions(&self) -> usize {
        self.dimensions
    }

    /// Retries 429 and 5xx responses with exponential backoff.
    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, EmbeddingError> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }
        let body = EmbeddingRequest {
            model: &self.model,
            input: texts,
            dimensions: self.dimensions,
        };

        let mut last_error: Option<EmbeddingError> = None;

        for attempt in 0..MAX_RETRIES {
            if attempt > 0 {
                // 1s, 2s
                let delay = Duration::from_millis(1000 * (1 << (attempt - 1)));
                warn!(
                    "Embedding attempt {} failed, retrying after {}ms...",
                    attempt,
                    delay.as_millis()
                );
                tokio::time::sleep(delay).await;
            }

            let mut request = self.client.post(&self.url).json(&body);
            if let Some(key) = &self.api_key {
                request = request.bearer_auth(key);
            }

            let response = match request.send().await {
                Ok(r) => r,
                Err(e) => {
                    last_error = Some(EmbeddingError::Http(e));
                    continue;
                }
            };

            let status = response.status();
            if status.as_u16() == 429 || status.is_server_error() {
                let message = response.text().await.unwrap_or_default();
                warn!("Embedding API returned {}: {}", status, message);
                last_error = Some(EmbeddingError::Api {
                    status: status.as_u16(),
                    message,
                });
                continue;
            }
            if !status.is_success() {
                let message = response.text().await.unwrap_or_default();
                return Err(EmbeddingError::Api {
                    status: status.as_u16(),
                    message,
                });
            }

            let parsed: EmbeddingResponse = response.json().await?;
            debug!("Embedded {} text(s) with {}", texts.len(), self.model);
            return self.into_vectors(parsed, texts.len());
        }

        Err(last_error.unwrap_or(EmbeddingError::RetriesExhausted {
            retries: MAX_RETRIES,
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_hashing_embedder_is_deterministic_and_normalised() {
        let embedder = HashingEmbedder::new(64);
        let texts = vec!["Quarterly revenue report".to_string(), "".to_string()];
        let a = embedder.embed(&texts).await.unwrap();
        let b = embedder.embed(&texts).await.unwrap();
        assert_eq!(a, b);
        assert_eq!(a[0].len(), 64);
        let norm: f32 = a[0].iter().map(|v| v * v).sum::<f32>().sqrt();
        assert!((norm - 1.0).abs() < 1e-5);
        // Empty text stays the zero vector.
        assert!(a[1].iter().all(|v| *v == 0.0));
    }

    #[test]
    fn test_similar_texts_score_higher() {
        let embedder = HashingEmbedder::new(256);
        let query = embedder.embed_one("invoice payment terms");
        let close = embedder.embed_one("The invoice lists payment terms of 30 days");
        let far = embedder.embed_one("Mountain hiking trail guide");
        assert!(cosine_similarity(&query, &close) > cosine_similarity(&query, &far));
    }

    #[test]
    fn test_case_and_punctuation_do_not_matter() {
        let embedder = HashingEmbedder::new(32);
        assert_eq!(embedder.embed_one("Hello, World!"), embedder.embed_one("hello world"));
    }

    #[test]
    fn test_cosine_edge_cases() {
        assert_eq!(cosine_similarity(&[1.0, 0.0], &[1.0]), 0.0);
        assert_eq!(cosine_similarity(&[0.0, 0.0], &[1.0, 0.0]), 0.0);
        assert!((cosine_similarity(&[1.0, 1.0], &[2.0, 2.0]) - 1.0).abs() < 1e-6);
    }

    #[test]
    fn test_request_body_carries_configured_dimensions() {
        let input = vec!["x".to_string()];
        let body = EmbeddingRequest {
            model: "text-embedding-3-small",
            input: &input,
            dimensions: 256,
        };
        let json = serde_json::to_value(&body).unwrap();
        assert_eq!(json["dimensions"], 256);
        assert_eq!(json["model"], "text-embedding-3-small");
        assert_eq!(json["input"][0], "x");
    }

    #[test]
    fn test_http_embedder_url_and_response_checks() {
        let embedder =
            HttpEmbedder::new("https://api.example.com/v1/", None, "m".into(), 2).unwrap();
        assert_eq!(embedder.url, "https://api.example.com/v1/embeddings");

        let response = EmbeddingResponse {
            data: vec![
                EmbeddingData { index: 1, embedding: vec![0.0, 1.0] },
                EmbeddingData { index: 0, embedding: vec![1.0, 0.0] },
            ],
        };
        let vectors = embedder.into_vectors(response, 2).unwrap();
        assert_eq!(vectors[0], vec![1.0, 0.0]);

        let wrong_dims = EmbeddingResponse {
            data: vec![EmbeddingData { index: 0, embedding: vec![1.0, 0.0, 0.0] }],
        };
        assert!(matches!(
            embedder.into_vectors(wrong_dims, 1),
            Err(EmbeddingError::DimensionMismatch { expected: 2, actual: 3 })
        ));
    }
}
