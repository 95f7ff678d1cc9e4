//! Synthetic ground-truth question generation.
//!
//! Each transcript segment is turned into a handful of questions whose answer
//! lies in that segment. The (video id, segment id) of the source is what the
//! retrieval evaluation later looks for.

use crate::config::Prompts;
use crate::error::{Result, TubeqaError};
use crate::generation::Generator;
use crate::store::{GroundTruthQuestion, SegmentStore, TranscriptSegment};
use futures::stream::{self, StreamExt};
use serde::Serialize;
use serde_json::Value;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tracing::{debug, info, instrument, warn};

/// Outcome of generating ground truth for one video.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct GroundTruthReport {
    pub video_id: String,
    /// Segments processed.
    pub segments: usize,
    /// New questions stored (duplicates of stored questions are not counted).
    pub questions_added: usize,
    /// Segments whose output held no usable question.
    pub skipped_segments: usize,
}

/// Generates evaluation questions from transcript segments.
pub struct GroundTruthGenerator {
    generator: Arc<dyn Generator>,
    prompts: Arc<Prompts>,
    questions_per_segment: usize,
    max_concurrent: usize,
    max_attempts: usize,
}

impl GroundTruthGenerator {
    pub fn new(
        generator: Arc<dyn Generator>,
        prompts: Arc<Prompts>,
        questions_per_segment: usize,
        max_concurrent: usize,
    ) -> Self {
        Self {
            generator,
            prompts,
            questions_per_segment: questions_per_segment.max(1),
            max_concurrent: max_concurrent.max(1),
            max_attempts: 3,
        }
    }

    /// Number of generation calls allowed per segment to reach the target count.
    pub fn with_max_attempts(mut self, max_attempts: usize) -> Self {
        self.max_attempts = max_attempts.max(1);
        self
    }

    /// Questions answerable from one segment.
    ///
    /// Output that holds no usable question yields an empty list; a failed
    /// generation call is an error.
    pub async fn generate(&self, segment: &TranscriptSegment, title: &str) -> Result<Vec<String>> {
        self.generate_excluding(segment, title, &HashSet::new()).await
    }

    /// Like [`generate`](Self::generate), leaving out questions in `existing`
    /// (compared case-insensitively).
    ///
    /// The model is asked again, up to the attempt limit, until enough new
    /// distinct questions are collected. A failed call ends the loop: it is
    /// returned as an error when nothing was collected yet, otherwise the
    /// questions gathered so far are kept.
    #[instrument(skip(self, segment, title, existing), fields(segment_id = %segment.segment_id))]
    pub async fn generate_excluding(
        &self,
        segment: &TranscriptSegment,
        title: &str,
        existing: &HashSet<String>,
    ) -> Result<Vec<String>> {
        let mut vars = HashMap::new();
        vars.insert("count".to_string(), self.questions_per_segment.to_string());
        vars.insert("title".to_string(), title.to_string());
        vars.insert("segment".to_string(), segment.content.clone());
        let prompt = self
            .prompts
            .render_with_custom(&self.prompts.ground_truth.user, &vars);

        let mut seen: HashSet<String> = existing.iter().map(|q| q.to_lowercase()).collect();
        let mut questions = Vec::new();

        for attempt in 1..=self.max_attempts {
            let output = match self
                .generator
                .generate(&self.prompts.ground_truth.system, &prompt)
                .await
            {
                Ok(output) => output,
                Err(e) if questions.is_empty() => return Err(e),
                Err(e) => {
                    warn!("Attempt {} failed, keeping {} questions: {}", attempt, questions.len(), e);
                    break;
                }
            };

            for question in parse_questions(&output, usize::MAX) {
                if questions.len() < self.questions_per_segment && seen.insert(question.to_lowercase()) {
                    questions.push(question);
                }
            }
            debug!("Attempt {}: {} questions collected", attempt, questions.len());

            if questions.len() >= self.questions_per_segment {
                break;
            }
        }

        if questions.is_empty() {
            warn!(
                "No usable questions for segment {} of {}",
                segment.segment_id, segment.video_id
            );
        } else if questions.len() < self.questions_per_segment {
            warn!(
                "Only {} of {} questions for segment {} after {} attempts",
                questions.len(),
                self.questions_per_segment,
                segment.segment_id,
                self.max_attempts
            );
        }
        Ok(questions)
    }

    /// Generate and store questions for every segment of a video.
    ///
    /// Segments run concurrently; questions are stored as each segment
    /// completes. Questions already stored for a segment are not asked for
    /// again. The first generation failure stops the run and is returned,
    /// keeping what was already stored.
    #[instrument(skip(self, store))]
    pub async fn generate_for_video(&self, store: &SegmentStore, video_id: &str) -> Result<GroundTruthReport> {
        let video = store
            .get_video(video_id)?
            .ok_or_else(|| TubeqaError::VideoNotFound(video_id.to_string()))?;
        let segments = store.segments_for_video(video_id)?;

        let mut existing: HashMap<String, HashSet<String>> = HashMap::new();
        for q in store.ground_truth(Some(video_id))? {
            existing.entry(q.segment_id).or_default().insert(q.question);
        }
        let none = HashSet::new();

        info!(
            "Generating ground truth for {} segments of {}",
            segments.len(),
            video_id
        );

        let mut report = GroundTruthReport {
            video_id: video_id.to_string(),
            ..GroundTruthReport::default()
        };

        let title = video.title.as_str();
        let (existing, none) = (&existing, &none);
        let mut results = stream::iter(segments.iter())
            .map(|segment| async move {
                let known = existing.get(&segment.segment_id).unwrap_or(none);
                (segment, self.generate_excluding(segment, title, known).await)
            })
            .buffer_unordered(self.max_concurrent);

        while let Some((segment, result)) = results.next().await {
            let questions = result?;
            report.segments += 1;

            if questions.is_empty() {
                report.skipped_segments += 1;
                continue;
            }

            let records: Vec<GroundTruthQuestion> = questions
                .into_iter()
                .map(|q| GroundTruthQuestion::new(video_id, &segment.segment_id, q))
                .collect();
            report.questions_added += store.add_ground_truth(&records)?;
        }

        info!(
            "Stored {} questions ({} segments skipped)",
            report.questions_added, report.skipped_segments
        );
        Ok(report)
    }
}

/// Extract up to `max` distinct questions from model output.
///
/// Accepts `{"questions": [...]}`, a bare JSON array, or one question per line.
pub fn parse_questions(output: &str, max: usize) -> Vec<String> {
    let body = strip_code_fence(output);

    let candidates = json_questions(body)
        .or_else(|| embedded_json(body).and_then(json_questions))
        .unwrap_or_else(|| body.lines().map(String::from).collect());

    let mut seen = HashSet::new();
    candidates
        .into_iter()
        .map(|c| clean_question(&c))
        .filter(|q| q.ends_with('?') && q.len() > 1)
        .filter(|q| seen.insert(q.to_lowercase()))
        .take(max)
        .collect()
}

pub(crate) fn strip_code_fence(output: &str) -> &str {
    let trimmed = output.trim();
    let Some(rest) = trimmed.strip_prefix("```") else {
        return trimmed;
    };
    let rest = rest.trim_start_matches(|c: char| c.is_ascii_alphabetic());
    rest.strip_suffix("```").unwrap_or(rest).trim()
}

fn json_questions(body: &str) -> Option<Vec<String>> {
    let value: Value = serde_json::from_str(body).ok()?;
    let items = match &value {
        Value::Object(map) => map.get("questions")?.as_array()?,
        Value::Array(items) => items,
        _ => return None,
    };
    Some(
        items
            .iter()
            .filter_map(|item| match item {
                Value::String(s) => Some(s.clone()),
                Value::Object(obj) => obj.get("question")?.as_str().map(String::from),
                _ => None,
            })
            .collect(),
    )
}

/// The outermost `{...}` span, for JSON wrapped in prose.
pub(crate) fn embedded_json(body: &str) -> Option<&str> {
    let start = body.find('{')?;
    let end = body.rfind('}')?;
    (end > start).then(|| &body[start..=end])
}

fn clean_question(raw: &str) -> String {
    let mut s = raw.trim().trim_end_matches(',').trim();
    let without_bullet = s.trim_start_matches(['-', '*', '•']);
    if without_bullet.len() != s.len() {
        s = without_bullet.trim_start();
    } else {
        let digits = s.chars().take_while(|c| c.is_ascii_digit()).count();
        if digits > 0 && s[digits..].starts_with(['.', ')']) {
            s = s[digits + 1..].trim_start();
        }
    }
    s.trim_matches(|c| c == '"' || c == '\'').trim().to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::Video;
    use crate::testing::ScriptedGenerator;

    #[test]
    fn test_parse_json_object() {
        let out = r#"{"questions": ["What is ownership?", "Why borrow?", "Not a question"]}"#;
        assert_eq!(parse_questions(out, 5), vec!["What is ownership?", "Why borrow?"]);
    }

    #[test]
    fn test_parse_fenced_array_and_cap() {
        let out = "```json\n[\"A?\", \"B?\", \"a?\", \"C?\"]\n```";
        assert_eq!(parse_questions(out, 2), vec!["A?", "B?"]);
    }

    #[test]
    fn test_parse_json_embedded_in_prose() {
        let out = "Sure! Here you go:\n{\"questions\": [{\"question\": \"How do lifetimes work?\"}]}\nEnjoy.";
        assert_eq!(parse_questions(out, 3), vec!["How do lifetimes work?"]);
    }

    #[test]
    fn test_parse_line_fallback() {
        let out = "1. What is a trait?\n- \"Why use generics?\"\nThis line is a statement.\n\n";
        assert_eq!(
            parse_questions(out, 5),
            vec!["What is a trait?", "Why use generics?"]
        );
    }

    #[test]
    fn test_unusable_output_is_empty_not_error() {
        assert!(parse_questions("I cannot help with that.", 3).is_empty());
        assert!(parse_questions("{\"questions\": []}", 3).is_empty());
    }

    fn seeded_store() -> SegmentStore {
        let store = SegmentStore::in_memory().unwrap();
        store.upsert_video(&Video::new("vid", "Rust basics")).unwrap();
        store
            .insert_segments(
                "vid",
                &[
                    TranscriptSegment::new("vid", "s0", "ownership talk", 0.0, 5.0),
                    TranscriptSegment::new("vid", "s1", "filler music", 5.0, 5.0),
                ],
            )
            .unwrap();
        store
    }

    #[tokio::test]
    async fn test_generate_for_video_stores_and_skips() {
        let store = seeded_store();
        let generator = ScriptedGenerator::responding(|prompt| {
            if prompt.contains("ownership talk") {
                Ok(r#"{"questions": ["Who owns a value?", "When is a value dropped?"]}"#.to_string())
            } else {
                Ok("nothing to ask here".to_string())
            }
        });
        let gt = GroundTruthGenerator::new(Arc::new(generator), Arc::new(Prompts::default()), 3, 2);

        let report = gt.generate_for_video(&store, "vid").await.unwrap();
        assert_eq!(report.segments, 2);
        assert_eq!(report.questions_added, 2);
        assert_eq!(report.skipped_segments, 1);

        let stored = store.ground_truth(Some("vid")).unwrap();
        assert!(stored.iter().all(|q| q.segment_id == "s0"));

        // A second run adds nothing new.
        let again = gt.generate_for_video(&store, "vid").await.unwrap();
        assert_eq!(again.questions_added, 0);
    }

    #[tokio::test]
    async fn test_generation_failure_propagates() {
        let store = seeded_store();
        let gt = GroundTruthGenerator::new(
            Arc::new(ScriptedGenerator::failing()),
            Arc::new(Prompts::default()),
            3,
            1,
        );
        assert!(gt
            .generate_for_video(&store, "vid")
            .await
            .unwrap_err()
            .is_generation());
    }

    #[tokio::test]
    async fn test_unknown_video() {
        let store = SegmentStore::in_memory().unwrap();
        let gt = GroundTruthGenerator::new(
            Arc::new(ScriptedGenerator::always("{}")),
            Arc::new(Prompts::default()),
            3,
            1,
        );
        assert!(matches!(
            gt.generate_for_video(&store, "ghost").await,
            Err(TubeqaError::VideoNotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_generate_asks_again_until_count_is_reached() {
        let generator = Arc::new(ScriptedGenerator::scripted(vec![
            Ok(r#"{"questions": ["What is ownership?"]}"#),
            Ok(r#"{"questions": ["what is ownership?", "Why borrow?", "When is memory freed?", "Extra?"]}"#),
        ]));
        let gt = GroundTruthGenerator::new(generator.clone(), Arc::new(Prompts::default()), 3, 1);
        let seg = TranscriptSegment::new("vid", "s0", "ownership talk", 0.0, 1.0);

        let questions = gt.generate(&seg, "Rust").await.unwrap();
        assert_eq!(
            questions,
            vec!["What is ownership?", "Why borrow?", "When is memory freed?"]
        );
        assert_eq!(generator.calls(), 2);
    }

    #[tokio::test]
    async fn test_generate_stops_at_attempt_limit() {
        let generator = Arc::new(ScriptedGenerator::always(r#"["Only one?"]"#));
        let gt = GroundTruthGenerator::new(generator.clone(), Arc::new(Prompts::default()), 3, 1)
            .with_max_attempts(2);
        let seg = TranscriptSegment::new("vid", "s0", "body", 0.0, 1.0);

        assert_eq!(gt.generate(&seg, "t").await.unwrap(), vec!["Only one?"]);
        assert_eq!(generator.calls(), 2);
    }

    #[tokio::test]
    async fn test_later_failure_keeps_collected_questions() {
        let generator = Arc::new(ScriptedGenerator::scripted(vec![Ok(r#"["First?"]"#), Err("timeout")]));
        let gt = GroundTruthGenerator::new(generator, Arc::new(Prompts::default()), 3, 1);
        let seg = TranscriptSegment::new("vid", "s0", "body", 0.0, 1.0);
        assert_eq!(gt.generate(&seg, "t").await.unwrap(), vec!["First?"]);
    }

    #[tokio::test]
    async fn test_stored_questions_are_not_generated_again() {
        let store = seeded_store();
        store
            .add_ground_truth(&[GroundTruthQuestion::new("vid", "s0", "Who owns a value?")])
            .unwrap();
        let generator = ScriptedGenerator::responding(|prompt| {
            if prompt.contains("ownership talk") {
                Ok(r#"["Who owns a value?", "When is a value dropped?"]"#.to_string())
            } else {
                Ok("nothing".to_string())
            }
        });
        let gt = GroundTruthGenerator::new(Arc::new(generator), Arc::new(Prompts::default()), 1, 1);

        let report = gt.generate_for_video(&store, "vid").await.unwrap();
        assert_eq!(report.questions_added, 1);
        let stored: Vec<String> = store
            .ground_truth(Some("vid"))
            .unwrap()
            .into_iter()
            .map(|q| q.question)
            .collect();
        assert!(stored.contains(&"When is a value dropped?".to_string()));
        assert_eq!(stored.len(), 2);
    }

    #[tokio::test]
    async fn test_prompt_carries_title_and_count() {
        let generator = Arc::new(ScriptedGenerator::always("[\"Q?\"]"));
        let gt = GroundTruthGenerator::new(generator.clone(), Arc::new(Prompts::default()), 4, 1);
        let seg = TranscriptSegment::new("vid", "s0", "segment body", 0.0, 1.0);
        gt.generate(&seg, "My Title").await.unwrap();

        let prompt = &generator.prompts()[0];
        assert!(prompt.contains("exactly 4 questions"));
        assert!(prompt.contains("My Title"));
        assert!(prompt.contains("segment body"));
    }
}
