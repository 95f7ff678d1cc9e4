//! LLM-as-judge answer relevance.

use super::ParseFailurePolicy;
use crate::config::Prompts;
use crate::error::Result;
use crate::generation::Generator;
use crate::ground_truth::{embedded_json, strip_code_fence};
use crate::store::Relevance;
use serde::Serialize;
use serde_json::{Map, Value};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{instrument, warn};

/// A judge verdict.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Judgement {
    pub relevance: Relevance,
    pub explanation: Option<String>,
}

/// Classifies generated answers against their source segment.
#[derive(Clone)]
pub struct Judge {
    generator: Arc<dyn Generator>,
    prompts: Arc<Prompts>,
    policy: ParseFailurePolicy,
}

impl Judge {
    pub fn new(generator: Arc<dyn Generator>, prompts: Arc<Prompts>, policy: ParseFailurePolicy) -> Self {
        Self {
            generator,
            prompts,
            policy,
        }
    }

    pub fn policy(&self) -> ParseFailurePolicy {
        self.policy
    }

    /// Judge one answer.
    ///
    /// Returns `None` only when the output could not be parsed and the policy
    /// is [`ParseFailurePolicy::Skip`]. A failed judge call is an error.
    #[instrument(skip_all)]
    pub async fn judge(&self, question: &str, reference: &str, answer: &str) -> Result<Option<Judgement>> {
        let mut vars = HashMap::new();
        vars.insert("question".to_string(), question.to_string());
        vars.insert("reference".to_string(), reference.to_string());
        vars.insert("answer".to_string(), answer.to_string());
        let prompt = self.prompts.render_with_custom(&self.prompts.judge.user, &vars);

        let output = self.generator.generate(&self.prompts.judge.system, &prompt).await?;

        if let Some(judgement) = parse_judgement(&output) {
            return Ok(Some(judgement));
        }

        warn!("Unparseable judge output: {}", preview(&output));
        Ok(match self.policy {
            ParseFailurePolicy::NonRelevant => Some(Judgement {
                relevance: Relevance::NonRelevant,
                explanation: Some("Judge output could not be parsed".to_string()),
            }),
            ParseFailurePolicy::Skip => None,
        })
    }
}

/// Parse judge output: a JSON object with a `Relevance` key (any casing), or
/// a bare label.
pub fn parse_judgement(output: &str) -> Option<Judgement> {
    let body = strip_code_fence(output);

    let object = serde_json::from_str::<Value>(body)
        .ok()
        .or_else(|| embedded_json(body).and_then(|s| serde_json::from_str(s).ok()));
    if let Some(Value::Object(map)) = object {
        return from_object(&map);
    }

    let label = body.trim_matches(|c: char| c == '"' || c == '\'' || c == '.' || c.is_whitespace());
    label.parse::<Relevance>().ok().map(|relevance| Judgement {
        relevance,
        explanation: None,
    })
}

fn from_object(map: &Map<String, Value>) -> Option<Judgement> {
    let field = |name: &str| {
        map.iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .and_then(|(_, v)| v.as_str())
    };

    let relevance = field("relevance")?.parse::<Relevance>().ok()?;
    let explanation = field("explanation")
        .map(str::trim)
        .filter(|e| !e.is_empty())
        .map(String::from);
    Some(Judgement {
        relevance,
        explanation,
    })
}

fn preview(s: &str) -> String {
    let s = s.replace('\n', " ");
    if s.chars().count() <= 120 {
        s
    } else {
        format!("{}...", s.chars().take(120).collect::<String>())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::ScriptedGenerator;

    #[test]
    fn test_parse_json_verdict() {
        let j = parse_judgement(r#"{"Relevance": "PARTLY_RELEVANT", "Explanation": "Misses the second half."}"#)
            .unwrap();
        assert_eq!(j.relevance, Relevance::PartlyRelevant);
        assert_eq!(j.explanation.as_deref(), Some("Misses the second half."));
    }

    #[test]
    fn test_parse_fenced_lowercase_keys() {
        let j = parse_judgement("```json\n{\"relevance\": \"relevant\"}\n```").unwrap();
        assert_eq!(j.relevance, Relevance::Relevant);
        assert_eq!(j.explanation, None);
    }

    #[test]
    fn test_parse_bare_label() {
        assert_eq!(parse_judgement("NON_RELEVANT").unwrap().relevance, Relevance::NonRelevant);
        assert_eq!(parse_judgement(" \"RELEVANT\".\n").unwrap().relevance, Relevance::Relevant);
    }

    #[test]
    fn test_out_of_enum_output_is_unparsed() {
        assert!(parse_judgement("MOSTLY_RELEVANT").is_none());
        assert!(parse_judgement(r#"{"Relevance": "VERY"}"#).is_none());
        assert!(parse_judgement("The answer looks fine to me.").is_none());
    }

    fn judge(output: &str, policy: ParseFailurePolicy) -> (Judge, Arc<ScriptedGenerator>) {
        let generator = Arc::new(ScriptedGenerator::always(output));
        (
            Judge::new(generator.clone(), Arc::new(Prompts::default()), policy),
            generator,
        )
    }

    #[tokio::test]
    async fn test_unparseable_defaults_to_non_relevant() {
        let (judge, _) = judge("I think it's great", ParseFailurePolicy::NonRelevant);
        let verdict = judge.judge("q?", "ref", "ans").await.unwrap().unwrap();
        assert_eq!(verdict.relevance, Relevance::NonRelevant);
    }

    #[tokio::test]
    async fn test_unparseable_skipped_under_skip_policy() {
        let (judge, _) = judge("MOSTLY_RELEVANT", ParseFailurePolicy::Skip);
        assert!(judge.judge("q?", "ref", "ans").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_prompt_carries_all_three_inputs() {
        let (judge, generator) = judge("RELEVANT", ParseFailurePolicy::NonRelevant);
        judge
            .judge("What is a slice?", "a slice is a view", "A view into memory.")
            .await
            .unwrap();
        let prompt = &generator.prompts()[0];
        assert!(prompt.contains("What is a slice?"));
        assert!(prompt.contains("a slice is a view"));
        assert!(prompt.contains("A view into memory."));
    }

    #[tokio::test]
    async fn test_judge_call_failure_is_error() {
        let judge = Judge::new(
            Arc::new(ScriptedGenerator::failing()),
            Arc::new(Prompts::default()),
            ParseFailurePolicy::NonRelevant,
        );
        assert!(judge.judge("q", "r", "a").await.unwrap_err().is_generation());
    }
}
