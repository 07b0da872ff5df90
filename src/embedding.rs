//! Embedding provider abstraction and implementations.
//!
//! Defines the [`EmbeddingProvider`] trait and two backends:
//!
//! - **[`OllamaEmbedder`]** — calls an Ollama-compatible `/api/embed`
//!   endpoint with batching, retry, and backoff.
//! - **[`HashEmbedder`]** — offline, deterministic bag-of-tokens hashing.
//!   No semantic quality; exists so indexing and retrieval can run
//!   without a model backend (development and the test suite).
//!
//! # Retry Strategy
//!
//! The HTTP backend retries transient failures with exponential backoff:
//! - HTTP 429 (rate limited) and 5xx (server error) → retry
//! - Other 4xx (client error) → fail immediately
//! - Network errors → retry
//! - Backoff: 1s, 2s, 4s, 8s, 16s, 32s (capped at 2^5)

use async_trait::async_trait;
use sha2::{Digest, Sha256};
use std::time::Duration;

use crate::config::EmbeddingConfig;
use crate::error::CoraError;

/// Trait for embedding backends.
#[async_trait]
pub trait EmbeddingProvider: Send + Sync {
    /// Returns the model identifier.
    fn model_name(&self) -> &str;

    /// Returns the embedding vector dimensionality.
    fn dims(&self) -> usize;

    /// Embed a batch of texts, one vector per input in input order.
    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, CoraError>;
}

/// Create the appropriate provider based on configuration.
///
/// | Config value | Provider |
/// |--------------|----------|
/// | `"ollama"` | [`OllamaEmbedder`] |
/// | `"hash"` | [`HashEmbedder`] |
pub fn create_provider(
    host: &str,
    config: &EmbeddingConfig,
) -> Result<Box<dyn EmbeddingProvider>, CoraError> {
    match config.provider.as_str() {
        "ollama" => Ok(Box::new(OllamaEmbedder::new(host, config)?)),
        "hash" => Ok(Box::new(HashEmbedder::new(config.dims))),
        other => Err(CoraError::Embedding(format!(
            "unknown embedding provider: {}",
            other
        ))),
    }
}

// ============ Ollama Provider ============

/// Embedding provider backed by an Ollama-compatible HTTP endpoint.
pub struct OllamaEmbedder {
    base_url: String,
    model: String,
    dims: usize,
    max_retries: u32,
    client: reqwest::Client,
}

impl OllamaEmbedder {
    pub fn new(host: &str, config: &EmbeddingConfig) -> Result<Self, CoraError> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| CoraError::Embedding(e.to_string()))?;

        Ok(Self {
            base_url: host.trim_end_matches('/').to_string(),
            model: config.model.clone(),
            dims: config.dims,
            max_retries: config.max_retries,
            client,
        })
    }
}

#[async_trait]
impl EmbeddingProvider for OllamaEmbedder {
    fn model_name(&self) -> &str {
        &self.model
    }

    fn dims(&self) -> usize {
        self.dims
    }

    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, CoraError> {
        let url = format!("{}/api/embed", self.base_url);
        let body = serde_json::json!({
            "model": self.model,
            "input": texts,
        });

        let mut last_err = None;

        for attempt in 0..=self.max_retries {
            if attempt > 0 {
                let delay = Duration::from_secs(1 << (attempt - 1).min(5));
                tokio::time::sleep(delay).await;
            }

            let resp = self.client.post(&url).json(&body).send().await;

            match resp {
                Ok(response) => {
                    let status = response.status();

                    if status.is_success() {
                        let json: serde_json::Value = response
                            .json()
                            .await
                            .map_err(|e| CoraError::Embedding(e.to_string()))?;
                        return parse_embed_response(&json, texts.len());
                    }

                    // Rate limited or server error: retry
                    if status.as_u16() == 429 || status.is_server_error() {
                        let body_text = response.text().await.unwrap_or_default();
                        last_err = Some(CoraError::Embedding(format!(
                            "embedding API error {}: {}",
                            status, body_text
                        )));
                        continue;
                    }

                    // Client error (not 429): don't retry
                    let body_text = response.text().await.unwrap_or_default();
                    return Err(CoraError::Embedding(format!(
                        "embedding API error {}: {}",
                        status, body_text
                    )));
                }
                Err(e) => {
                    last_err = Some(CoraError::Embedding(e.to_string()));
                    continue;
                }
            }
        }

        Err(last_err
            .unwrap_or_else(|| CoraError::Embedding("embedding failed after retries".to_string())))
    }
}

/// Extracts `embeddings: [[f32]]` from the `/api/embed` response body.
fn parse_embed_response(
    json: &serde_json::Value,
    expected: usize,
) -> Result<Vec<Vec<f32>>, CoraError> {
    let data = json
        .get("embeddings")
        .and_then(|d| d.as_array())
        .ok_or_else(|| {
            CoraError::Embedding("invalid embed response: missing embeddings array".to_string())
        })?;

    if data.len() != expected {
        return Err(CoraError::Embedding(format!(
            "embed response length mismatch: expected {}, got {}",
            expected,
            data.len()
        )));
    }

    let mut embeddings = Vec::with_capacity(data.len());
    for item in data {
        let vector = item.as_array().ok_or_else(|| {
            CoraError::Embedding("invalid embed response: embedding is not an array".to_string())
        })?;
        embeddings.push(
            vector
                .iter()
                .map(|v| v.as_f64().unwrap_or(0.0) as f32)
                .collect(),
        );
    }

    Ok(embeddings)
}

// ============ Hash Provider ============

/// Deterministic bag-of-tokens embedder.
///
/// Each lowercased alphanumeric token is hashed into a bucket with a
/// sign bit; the accumulated vector is L2-normalized. Equal texts always
/// produce equal vectors, and token overlap produces nonzero similarity,
/// which is all the offline pipeline needs.
pub struct HashEmbedder {
    dims: usize,
}

impl HashEmbedder {
    pub fn new(dims: usize) -> Self {
        Self { dims }
    }
}

#[async_trait]
impl EmbeddingProvider for HashEmbedder {
    fn model_name(&self) -> &str {
        "hash"
    }

    fn dims(&self) -> usize {
        self.dims
    }

    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, CoraError> {
        Ok(texts.iter().map(|t| hash_embed(t, self.dims)).collect())
    }
}

fn hash_embed(text: &str, dims: usize) -> Vec<f32> {
    let mut vector = vec![0.0f32; dims];

    for token in text
        .to_lowercase()
        .split(|c: char| !c.is_alphanumeric())
        .filter(|t| !t.is_empty())
    {
        let digest = Sha256::digest(token.as_bytes());
        let bucket = u64::from_le_bytes(digest[0..8].try_into().unwrap()) as usize % dims;
        let sign = if digest[8] & 1 == 0 { 1.0 } else { -1.0 };
        vector[bucket] += sign;
    }

    let norm = vector.iter().map(|v| v * v).sum::<f32>().sqrt();
    if norm > f32::EPSILON {
        for v in &mut vector {
            *v /= norm;
        }
    }

    vector
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_hash_embedder_deterministic() {
        let embedder = HashEmbedder::new(64);
        let a = embedder.embed(&["reset my password".to_string()]).await.unwrap();
        let b = embedder.embed(&["reset my password".to_string()]).await.unwrap();
        assert_eq!(a, b);
    }

    #[tokio::test]
    async fn test_hash_embedder_dims_and_norm() {
        let embedder = HashEmbedder::new(32);
        let vectors = embedder.embed(&["no signal on my phone".to_string()]).await.unwrap();
        assert_eq!(vectors.len(), 1);
        assert_eq!(vectors[0].len(), 32);
        let norm: f32 = vectors[0].iter().map(|v| v * v).sum::<f32>().sqrt();
        assert!((norm - 1.0).abs() < 1e-5);
    }

    #[tokio::test]
    async fn test_hash_embedder_overlap_beats_disjoint() {
        let embedder = HashEmbedder::new(128);
        let vectors = embedder
            .embed(&[
                "how do I reset my password".to_string(),
                "password reset steps".to_string(),
                "volte call quality settings".to_string(),
            ])
            .await
            .unwrap();
        let dot = |a: &[f32], b: &[f32]| -> f32 { a.iter().zip(b).map(|(x, y)| x * y).sum() };
        assert!(dot(&vectors[0], &vectors[1]) > dot(&vectors[0], &vectors[2]));
    }

    #[test]
    fn test_parse_embed_response() {
        let json = serde_json::json!({ "embeddings": [[0.1, 0.2], [0.3, 0.4]] });
        let parsed = parse_embed_response(&json, 2).unwrap();
        assert_eq!(parsed.len(), 2);
        assert_eq!(parsed[0].len(), 2);
    }

    #[test]
    fn test_parse_embed_response_length_mismatch() {
        let json = serde_json::json!({ "embeddings": [[0.1]] });
        assert!(parse_embed_response(&json, 2).is_err());
    }

    #[test]
    fn test_unknown_provider() {
        let config = EmbeddingConfig {
            provider: "magic".to_string(),
            ..Default::default()
        };
        assert!(create_provider("http://localhost", &config).is_err());
    }
}
