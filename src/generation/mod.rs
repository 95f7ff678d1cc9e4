//! Text generation capability.
//!
//! Answers, query rewrites, ground-truth questions and judge verdicts all go
//! through the [`Generator`] trait. Any failure (transport error, timeout,
//! empty output) surfaces as [`TubeqaError::Generation`].
//!
//! [`TubeqaError::Generation`]: crate::error::TubeqaError::Generation

mod ollama;
mod openai;

pub use ollama::OllamaGenerator;
pub use openai::OpenAIGenerator;

use crate::config::{CapabilityProvider, Settings};
use crate::error::{Result, TubeqaError};
use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;

/// Trait for text generation.
#[async_trait]
pub trait Generator: Send + Sync {
    /// Generate a completion for a system instruction and a user prompt.
    async fn generate(&self, system: &str, prompt: &str) -> Result<String>;

    /// Model name, recorded alongside evaluation results.
    fn model(&self) -> &str;
}

/// Create the answer/rewrite/ground-truth generator selected by the settings.
pub fn create_generator(settings: &Settings) -> Result<Arc<dyn Generator>> {
    let config = &settings.generation;
    build(settings, &config.model, config.temperature)
}

/// Create the relevance judge. Runs deterministically on the judge model.
pub fn create_judge_generator(settings: &Settings) -> Result<Arc<dyn Generator>> {
    build(settings, settings.generation.judge_model(), 0.0)
}

fn build(settings: &Settings, model: &str, temperature: f32) -> Result<Arc<dyn Generator>> {
    let config = &settings.generation;
    let timeout = Duration::from_secs(config.timeout_secs);

    let generator: Arc<dyn Generator> = match config.provider {
        CapabilityProvider::OpenAI => Arc::new(OpenAIGenerator::new(
            model,
            temperature,
            timeout,
            config.api_base.as_deref(),
        )?),
        CapabilityProvider::Ollama => Arc::new(OllamaGenerator::new(
            config.api_base.as_deref().unwrap_or(ollama::DEFAULT_BASE_URL),
            model,
            temperature,
            timeout,
        )?),
    };
    Ok(generator)
}

/// Reject blank completions.
pub(crate) fn non_empty(text: Option<String>) -> Result<String> {
    match text {
        Some(t) if !t.trim().is_empty() => Ok(t.trim().to_string()),
        _ => Err(TubeqaError::Generation("Empty response from model".to_string())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_non_empty() {
        assert_eq!(non_empty(Some("  hi \n".to_string())).unwrap(), "hi");
        assert!(non_empty(Some("   ".to_string())).unwrap_err().is_generation());
        assert!(non_empty(None).is_err());
    }

    #[test]
    fn test_judge_uses_judge_model() {
        let mut settings = Settings::default();
        settings.generation.judge_model = Some("gpt-4o".to_string());
        let judge = create_judge_generator(&settings).unwrap();
        assert_eq!(judge.model(), "gpt-4o");
        let generator = create_generator(&settings).unwrap();
        assert_eq!(generator.model(), "gpt-4o-mini");
    }
}
