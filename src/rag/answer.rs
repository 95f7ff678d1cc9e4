//! Grounded answer generation.

use super::context::build_context;
use super::{Answer, AnswerStatus, Citation};
use crate::config::{Prompts, RagSettings};
use crate::error::{Result, TubeqaError};
use crate::generation::Generator;
use crate::vector_index::SegmentHit;
use regex::Regex;
use std::collections::HashMap;
use std::sync::{Arc, LazyLock};
use tracing::{debug, instrument, warn};

static CITATION: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\[(\d+(?:\s*,\s*\d+)*)\]").expect("valid citation pattern"));

/// Produces cited answers from ranked segments.
#[derive(Clone)]
pub struct AnswerGenerator {
    generator: Arc<dyn Generator>,
    prompts: Arc<Prompts>,
    settings: RagSettings,
}

impl AnswerGenerator {
    pub fn new(generator: Arc<dyn Generator>, prompts: Arc<Prompts>, settings: RagSettings) -> Self {
        Self {
            generator,
            prompts,
            settings,
        }
    }

    /// Answer a question from ranked segments.
    ///
    /// With no segments the answer says so without calling the model. A failed
    /// generation is retried once with a smaller context; a second failure is
    /// returned as [`TubeqaError::Generation`].
    #[instrument(skip(self, segments), fields(segments = segments.len()))]
    pub async fn answer(&self, question: &str, segments: &[SegmentHit]) -> Result<Answer> {
        if segments.is_empty() {
            debug!("No segments retrieved, answering without generation");
            return Ok(Answer::insufficient_context());
        }

        let budget = self.settings.max_context_chars;
        match self.attempt(question, segments, budget).await {
            Ok(answer) => Ok(answer),
            Err(first) => {
                let reduced = ((budget as f32) * self.settings.retry_context_ratio) as usize;
                warn!(
                    "Answer generation failed ({}), retrying with {} context characters",
                    first,
                    reduced.max(1)
                );
                self.attempt(question, segments, reduced.max(1))
                    .await
                    .map_err(|e| match e {
                        TubeqaError::Generation(_) => e,
                        other => TubeqaError::Generation(other.to_string()),
                    })
            }
        }
    }

    async fn attempt(&self, question: &str, segments: &[SegmentHit], budget: usize) -> Result<Answer> {
        let context = build_context(segments, budget, self.settings.include_timestamps);

        let mut vars = HashMap::new();
        vars.insert("question".to_string(), question.to_string());
        vars.insert("context".to_string(), context.text);
        let prompt = self.prompts.render_with_custom(&self.prompts.rag.user, &vars);

        let text = self.generator.generate(&self.prompts.rag.system, &prompt).await?;

        let included = &segments[..context.included];
        let cited = cited_indices(&text, included.len());
        let citations = if cited.is_empty() {
            included.iter().map(Citation::from).collect()
        } else {
            cited.into_iter().map(|i| Citation::from(&included[i])).collect()
        };

        Ok(Answer {
            text,
            citations,
            status: AnswerStatus::Answered,
        })
    }
}

/// Zero-based indices of `[n]` markers that refer to one of `count` segments,
/// in order of first appearance.
fn cited_indices(text: &str, count: usize) -> Vec<usize> {
    let mut indices = Vec::new();
    for caps in CITATION.captures_iter(text) {
        for n in caps[1].split(',') {
            let Ok(n) = n.trim().parse::<usize>() else {
                continue;
            };
            if (1..=count).contains(&n) && !indices.contains(&(n - 1)) {
                indices.push(n - 1);
            }
        }
    }
    indices
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::ScriptedGenerator;

    fn hit(id: &str, start: f64, content: &str) -> SegmentHit {
        SegmentHit {
            video_id: "vid".to_string(),
            segment_id: id.to_string(),
            start_seconds: start,
            content: content.to_string(),
            score: 0.8,
        }
    }

    fn answerer(generator: Arc<ScriptedGenerator>, max_context_chars: usize) -> AnswerGenerator {
        AnswerGenerator::new(
            generator,
            Arc::new(Prompts::default()),
            RagSettings {
                max_context_chars,
                ..RagSettings::default()
            },
        )
    }

    #[tokio::test]
    async fn test_empty_segments_make_no_generation_call() {
        let generator = Arc::new(ScriptedGenerator::always("should not be used"));
        let answer = answerer(generator.clone(), 1000)
            .answer("What is ownership?", &[])
            .await
            .unwrap();

        assert_eq!(answer.status, AnswerStatus::InsufficientContext);
        assert!(answer.citations.is_empty());
        assert_eq!(generator.calls(), 0);
    }

    #[tokio::test]
    async fn test_citations_map_to_included_segments() {
        let generator = Arc::new(ScriptedGenerator::always(
            "Ownership moves values [2]. See also [1, 2] and [7].",
        ));
        let segments = [hit("a", 0.0, "borrowing"), hit("b", 30.0, "ownership moves")];
        let answer = answerer(generator, 1000)
            .answer("What moves?", &segments)
            .await
            .unwrap();

        let ids: Vec<_> = answer.citations.iter().map(|c| c.segment_id.as_str()).collect();
        assert_eq!(ids, vec!["b", "a"]);
        assert_eq!(answer.status, AnswerStatus::Answered);
        assert_eq!(answer.citations[0].url, "https://youtube.com/watch?v=vid&t=30s");
    }

    #[tokio::test]
    async fn test_no_markers_cites_all_included() {
        let generator = Arc::new(ScriptedGenerator::always("Plain answer."));
        let segments = [hit("a", 0.0, "aaaa"), hit("b", 5.0, "bbbbbbbbbbbbbbbbbbbbbbbbbbbbbb")];
        // Only the first block fits in 20 characters.
        let answer = answerer(generator, 20).answer("q", &segments).await.unwrap();
        assert_eq!(answer.citations.len(), 1);
        assert_eq!(answer.citations[0].segment_id, "a");
    }

    #[tokio::test]
    async fn test_retry_uses_smaller_context() {
        let generator = Arc::new(ScriptedGenerator::scripted(vec![
            Err("timeout"),
            Ok("Recovered [1]."),
        ]));
        let segments = [hit("a", 0.0, &"x".repeat(50)), hit("b", 5.0, &"y".repeat(50))];
        let answer = answerer(generator.clone(), 200)
            .answer("q", &segments)
            .await
            .unwrap();

        assert_eq!(answer.text, "Recovered [1].");
        assert_eq!(generator.calls(), 2);
        let prompts = generator.prompts();
        assert!(prompts[0].contains(&"y".repeat(50)));
        assert!(!prompts[1].contains(&"y".repeat(50)));
    }

    #[tokio::test]
    async fn test_second_failure_is_terminal_generation_error() {
        let generator = Arc::new(ScriptedGenerator::failing());
        let err = answerer(generator.clone(), 1000)
            .answer("q", &[hit("a", 0.0, "text")])
            .await
            .unwrap_err();
        assert!(err.is_generation());
        assert_eq!(generator.calls(), 2);
    }

    #[test]
    fn test_cited_indices() {
        assert_eq!(cited_indices("[3][1] [1]", 3), vec![2, 0]);
        assert_eq!(cited_indices("[0] [4] [x]", 3), Vec::<usize>::new());
    }
}
