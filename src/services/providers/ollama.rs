/// Ollama embeddings provider
///
/// API Flow:
/// 1. `POST {base_url}/api/embeddings` with `{"model": ..., "prompt": ...}`
/// 2. Response carries `{"embedding": [f32; dimension]}`
use reqwest::Client as HttpClient;
use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::error::{AppError, AppResult};
use crate::services::providers::EmbeddingProvider;

#[derive(Serialize)]
struct EmbeddingRequest<'a> {
    model: &'a str,
    prompt: &'a str,
}

#[derive(Deserialize)]
struct EmbeddingResponse {
    embedding: Option<Vec<f32>>,
}

#[derive(Clone)]
pub struct OllamaEmbeddingProvider {
    http_client: HttpClient,
    base_url: String,
    model: String,
    dimension: usize,
}

impl OllamaEmbeddingProvider {
    pub fn new(
        base_url: String,
        model: String,
        dimension: usize,
        connect_timeout: Duration,
        read_timeout: Duration,
    ) -> AppResult<Self> {
        let http_client = HttpClient::builder()
            .connect_timeout(connect_timeout)
            .timeout(read_timeout)
            .build()?;

        tracing::info!(
            url = %base_url,
            model = %model,
            dimension,
            "Ollama embedding provider initialized"
        );

        Ok(Self {
            http_client,
            base_url: base_url.trim_end_matches('/').to_string(),
            model,
            dimension,
        })
    }

    fn zero_vector(&self) -> Vec<f32> {
        vec![0.0; self.dimension]
    }

    async fn request_embedding(&self, text: &str) -> AppResult<Vec<f32>> {
        let url = format!("{}/api/embeddings", self.base_url);

        let response = self
            .http_client
            .post(&url)
            .json(&EmbeddingRequest {
                model: &self.model,
                prompt: text,
            })
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(AppError::Dependency(format!(
                "Ollama returned status {}: {}",
                status, body
            )));
        }

        let body: EmbeddingResponse = response.json().await?;
        let embedding = body
            .embedding
            .ok_or_else(|| AppError::Dependency("No embedding in Ollama response".to_string()))?;

        if embedding.len() != self.dimension {
            return Err(AppError::DimensionMismatch {
                expected: self.dimension,
                actual: embedding.len(),
            });
        }

        Ok(embedding)
    }
}

#[async_trait::async_trait]
impl EmbeddingProvider for OllamaEmbeddingProvider {
    async fn embed(&self, text: &str) -> Vec<f32> {
        if text.trim().is_empty() {
            tracing::warn!("Empty text provided for embedding generation");
            return self.zero_vector();
        }

        match self.request_embedding(text).await {
            Ok(embedding) => {
                tracing::debug!(size = embedding.len(), "Generated embedding");
                embedding
            }
            Err(e) => {
                tracing::error!(error = %e, "Embedding generation failed, using zero vector");
                self.zero_vector()
            }
        }
    }

    fn dimension(&self) -> usize {
        self.dimension
    }

    fn name(&self) -> &'static str {
        "ollama"
    }
}
