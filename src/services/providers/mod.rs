//! Text embedding providers.
//!
//! Providers turn free text into a fixed-length vector. A provider never
//! fails: transport or decoding problems degrade to the zero vector and
//! callers treat that as a missing signal.

pub mod ollama;

pub use ollama::OllamaEmbeddingProvider;

#[cfg_attr(test, mockall::automock)]
#[async_trait::async_trait]
pub trait EmbeddingProvider: Send + Sync {
    /// Embeds `text`, returning `dimension()` zeros on any failure
    async fn embed(&self, text: &str) -> Vec<f32>;

    /// Length of every vector this provider returns
    fn dimension(&self) -> usize;

    /// Provider name for logging and debugging
    fn name(&self) -> &'static str;
}
