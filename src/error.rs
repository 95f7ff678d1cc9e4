//! Error types for tubeqa.

use thiserror::Error;

/// Library-level error type for tubeqa operations.
///
/// Expected outcomes of a probabilistic pipeline (an empty retrieval, a segment
/// that yields no ground-truth questions, a judge answer that cannot be parsed)
/// are *not* errors and never surface through this type.
#[derive(Error, Debug)]
pub enum TubeqaError {
    #[error("Configuration error: {0}")]
    Config(String),

    /// A segment write would break the (video id, segment id) join key.
    #[error("Integrity error: {0}")]
    Integrity(String),

    #[error("Segment store error: {0}")]
    Store(String),

    /// The search backend could not be reached or answered with a failure.
    #[error("Search index unavailable: {0}")]
    IndexUnavailable(String),

    #[error("Generation failed: {0}")]
    Generation(String),

    #[error("Embedding generation failed: {0}")]
    Embedding(String),

    #[error("Video not found: {0}")]
    VideoNotFound(String),

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Operation cancelled: {0}")]
    Cancelled(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("TOML parse error: {0}")]
    TomlParse(#[from] toml::de::Error),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),
}

impl TubeqaError {
    /// Whether this error means the search backend is down, as opposed to a
    /// bad request or a bug.
    pub fn is_index_unavailable(&self) -> bool {
        matches!(self, TubeqaError::IndexUnavailable(_))
    }

    /// Whether this error came from the text-generation capability.
    pub fn is_generation(&self) -> bool {
        matches!(self, TubeqaError::Generation(_))
    }
}

/// Result type alias for tubeqa operations.
pub type Result<T> = std::result::Result<T, TubeqaError>;
