//! Configuration module for tubeqa.
//!
//! Handles loading and managing application settings and prompt templates.

mod prompts;
mod settings;

pub use prompts::{GroundTruthPrompts, JudgePrompts, Prompts, RagPrompts, RewritePrompts};
pub use settings::{
    CapabilityProvider, EmbeddingSettings, EvaluationSettings, GeneralSettings,
    GenerationSettings, GroundTruthSettings, IndexProvider, PromptSettings, RagSettings,
    RetrievalSettings, Settings, StoreSettings, VectorIndexSettings,
};
