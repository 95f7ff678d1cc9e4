//! Embedding generation for segment indexing and query retrieval.

mod ollama;
mod openai;

pub use ollama::OllamaEmbedder;
pub use openai::OpenAIEmbedder;

use crate::config::{CapabilityProvider, Settings};
use crate::error::Result;
use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;

/// Trait for embedding generation.
#[async_trait]
pub trait Embedder: Send + Sync {
    /// Generate an embedding for a single text.
    async fn embed(&self, text: &str) -> Result<Vec<f32>>;

    /// Generate embeddings for multiple texts, in input order.
    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>>;

    /// Get the embedding dimensions.
    fn dimensions(&self) -> usize;
}

/// Create the embedder selected by the settings.
pub fn create_embedder(settings: &Settings) -> Result<Arc<dyn Embedder>> {
    let config = &settings.embedding;
    let timeout = Duration::from_secs(settings.generation.timeout_secs);

    let embedder: Arc<dyn Embedder> = match config.provider {
        CapabilityProvider::OpenAI => Arc::new(OpenAIEmbedder::with_config(
            &config.model,
            config.dimensions as usize,
            config.api_base.as_deref(),
        )?),
        CapabilityProvider::Ollama => Arc::new(OllamaEmbedder::new(
            config.api_base.as_deref().unwrap_or(ollama::DEFAULT_BASE_URL),
            &config.model,
            config.dimensions as usize,
            timeout,
        )?),
    };
    Ok(embedder)
}
