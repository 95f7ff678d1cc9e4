//! RAG (Retrieval-Augmented Generation) for question answering with sources.
//!
//! [`AnswerGenerator`] turns ranked segments into a cited answer;
//! [`RagEngine`] runs the whole live path (rewrite, retrieve, answer) and
//! turns backend outages into labeled answers instead of errors.

mod answer;
pub mod context;
mod engine;

pub use answer::AnswerGenerator;
pub use context::{build_context, PromptContext};
pub use engine::{RagEngine, RagResponse};

use crate::store::{format_timestamp, Video};
use crate::vector_index::SegmentHit;
use serde::{Deserialize, Serialize};

pub const INSUFFICIENT_CONTEXT_TEXT: &str =
    "I couldn't find anything in the indexed video transcripts that answers this question.";
pub const SEARCH_UNAVAILABLE_TEXT: &str =
    "Search is unavailable right now, so this question cannot be answered. Please try again later.";
pub const GENERATION_FAILED_TEXT: &str =
    "Relevant transcript passages were found, but an answer could not be generated. Please try again.";

/// Outcome of answering a question.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AnswerStatus {
    Answered,
    /// Retrieval found nothing relevant.
    InsufficientContext,
    /// The vector index could not be reached.
    SearchUnavailable,
    /// The model failed twice.
    GenerationFailed,
}

impl AnswerStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            AnswerStatus::Answered => "answered",
            AnswerStatus::InsufficientContext => "insufficient_context",
            AnswerStatus::SearchUnavailable => "search_unavailable",
            AnswerStatus::GenerationFailed => "generation_failed",
        }
    }
}

/// A segment an answer relies on.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Citation {
    pub video_id: String,
    pub segment_id: String,
    pub start_seconds: f64,
    /// Formatted start time (e.g. "02:34").
    pub timestamp: String,
    pub score: f32,
    pub content: String,
    /// Watch URL starting at the segment.
    pub url: String,
}

impl From<&SegmentHit> for Citation {
    fn from(hit: &SegmentHit) -> Self {
        Self {
            video_id: hit.video_id.clone(),
            segment_id: hit.segment_id.clone(),
            start_seconds: hit.start_seconds,
            timestamp: format_timestamp(hit.start_seconds),
            score: hit.score,
            content: hit.content.clone(),
            url: Video::url_at(&hit.video_id, hit.start_seconds),
        }
    }
}

/// A generated (or labeled) answer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Answer {
    pub text: String,
    pub citations: Vec<Citation>,
    pub status: AnswerStatus,
}

impl Answer {
    pub fn insufficient_context() -> Self {
        Self::labeled(INSUFFICIENT_CONTEXT_TEXT, AnswerStatus::InsufficientContext)
    }

    pub fn search_unavailable() -> Self {
        Self::labeled(SEARCH_UNAVAILABLE_TEXT, AnswerStatus::SearchUnavailable)
    }

    pub fn generation_failed() -> Self {
        Self::labeled(GENERATION_FAILED_TEXT, AnswerStatus::GenerationFailed)
    }

    fn labeled(text: &str, status: AnswerStatus) -> Self {
        Self {
            text: text.to_string(),
            citations: Vec::new(),
            status,
        }
    }

    /// (video id, segment id) of every cited segment.
    pub fn cited_segment_ids(&self) -> Vec<(String, String)> {
        self.citations
            .iter()
            .map(|c| (c.video_id.clone(), c.segment_id.clone()))
            .collect()
    }

    /// Format the answer and its sources for display.
    pub fn format_for_display(&self) -> String {
        let mut output = self.text.clone();

        if !self.citations.is_empty() {
            output.push_str("\n\n--- Sources ---\n");
            for (i, c) in self.citations.iter().enumerate() {
                output.push_str(&format!(
                    "\n[{}] {} @ {} (score: {:.2})\n  {}",
                    i + 1,
                    c.video_id,
                    c.timestamp,
                    c.score,
                    c.url
                ));
            }
        }

        output
    }
}
