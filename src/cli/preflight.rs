//! Pre-flight checks before expensive operations.
//!
//! Validates that the configured model backends are usable before starting
//! jobs that would otherwise fail midway through a batch.

use crate::config::{CapabilityProvider, Settings};
use crate::error::{Result, TubeqaError};

/// Requirements for different operations.
#[derive(Debug, Clone, Copy)]
pub enum Operation {
    /// Ingestion embeds segments.
    Ingest,
    /// Asking embeds the query and generates an answer.
    Ask,
    /// Search embeds the query.
    Search,
    /// Ground-truth generation only calls the generator.
    GroundTruth,
    /// Evaluation needs every capability, the judge included.
    Evaluate,
}

impl Operation {
    fn needs_embedding(self) -> bool {
        !matches!(self, Operation::GroundTruth)
    }

    fn needs_generation(self) -> bool {
        matches!(self, Operation::Ask | Operation::GroundTruth | Operation::Evaluate)
    }
}

/// Run pre-flight checks for the given operation.
///
/// Returns Ok(()) if all checks pass, or an error describing what's missing.
pub fn check(settings: &Settings, operation: Operation) -> Result<()> {
    let key = std::env::var("OPENAI_API_KEY").ok();
    check_with_key(settings, operation, key.as_deref())
}

fn check_with_key(settings: &Settings, operation: Operation, api_key: Option<&str>) -> Result<()> {
    let needs_openai = (operation.needs_embedding()
        && settings.embedding.provider == CapabilityProvider::OpenAI)
        || (operation.needs_generation() && settings.generation.provider == CapabilityProvider::OpenAI);

    if needs_openai {
        check_api_key(api_key)?;
    }
    Ok(())
}

/// Check if OpenAI API key is configured.
fn check_api_key(api_key: Option<&str>) -> Result<()> {
    match api_key {
        Some(key) if !key.is_empty() => Ok(()),
        Some(_) => Err(TubeqaError::Config(
            "OPENAI_API_KEY is empty. Set it with: export OPENAI_API_KEY='sk-...'".to_string(),
        )),
        None => Err(TubeqaError::Config(
            "OPENAI_API_KEY not set. Set it with: export OPENAI_API_KEY='sk-...'".to_string(),
        )),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_openai_requires_key() {
        let settings = Settings::default();
        assert!(check_with_key(&settings, Operation::Ask, None).is_err());
        assert!(check_with_key(&settings, Operation::Ask, Some("")).is_err());
        assert!(check_with_key(&settings, Operation::Ask, Some("sk-test")).is_ok());
    }

    #[test]
    fn test_ollama_needs_no_key() {
        let mut settings = Settings::default();
        settings.embedding.provider = CapabilityProvider::Ollama;
        settings.generation.provider = CapabilityProvider::Ollama;
        assert!(check_with_key(&settings, Operation::Evaluate, None).is_ok());
    }

    #[test]
    fn test_only_used_capabilities_are_checked() {
        let mut settings = Settings::default();
        settings.embedding.provider = CapabilityProvider::Ollama;
        // Search never calls the generator.
        assert!(check_with_key(&settings, Operation::Search, None).is_ok());
        assert!(check_with_key(&settings, Operation::GroundTruth, None).is_err());
    }
}
