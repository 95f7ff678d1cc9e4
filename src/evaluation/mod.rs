//! Self-evaluation of retrieval and answer quality.
//!
//! - [`metrics`]: hit rate and mean reciprocal rank over a batch of ranks.
//! - [`Judge`]: LLM-as-judge relevance classification.
//! - [`EvaluationHarness`]: runs batches of ground-truth questions through
//!   the live path and persists the results to the segment store.

mod harness;
mod judge;
pub mod metrics;

pub use harness::{AnswerRunReport, CancellationFlag, EvaluationHarness, RetrievalConfig, SweepResult};
pub use judge::{parse_judgement, Judge, Judgement};
pub use metrics::{rank_of, RetrievalMetrics};

use serde::{Deserialize, Serialize};

/// What to do with judge output that is not one of the three labels.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, Default, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ParseFailurePolicy {
    /// Count the answer as `NON_RELEVANT`.
    #[default]
    NonRelevant,
    /// Drop the item from the run.
    Skip,
}

impl std::str::FromStr for ParseFailurePolicy {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_lowercase().replace('-', "_").as_str() {
            "non_relevant" => Ok(ParseFailurePolicy::NonRelevant),
            "skip" => Ok(ParseFailurePolicy::Skip),
            _ => Err(format!("Unknown parse failure policy: {}", s)),
        }
    }
}
