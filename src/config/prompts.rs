//! Prompt templates for tubeqa.
//!
//! Prompts can be customized by placing TOML files in the custom prompts directory.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::PathBuf;

/// Collection of all prompt templates.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct Prompts {
    pub rag: RagPrompts,
    pub rewrite: RewritePrompts,
    pub ground_truth: GroundTruthPrompts,
    pub judge: JudgePrompts,
    /// Custom variables from config, available in all prompts.
    #[serde(skip)]
    pub variables: HashMap<String, String>,
}

/// Prompts for grounded answer generation.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RagPrompts {
    pub system: String,
    pub user: String,
}

impl Default for RagPrompts {
    fn default() -> Self {
        Self {
            system: r#"You are an assistant analyzing YouTube video transcripts. You answer questions using only the transcript excerpts you are given.

Guidelines:
1. Use only information from the provided excerpts
2. Cite the excerpts you rely on with their bracketed number, e.g. [1] or [2][3]
3. If the excerpts do not contain enough information, say so plainly
4. Be specific and direct; avoid speculation"#
                .to_string(),

            user: r#"QUESTION: {{question}}

CONTEXT:
{{context}}

Answer the QUESTION using only the CONTEXT above."#
                .to_string(),
        }
    }
}

/// Prompts for query rewriting, one per strategy.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RewritePrompts {
    pub chain_of_thought: String,
    pub react: String,
    pub expand: String,
}

impl Default for RewritePrompts {
    fn default() -> Self {
        Self {
            chain_of_thought: r#"Rewrite the following question into a search query for a video transcript database. Think step by step about what the user is really asking, then output only the final rewritten query on a single line.
{{#context}}
Conversation context: {{context}}
{{/context}}
Question: {{question}}

Rewritten query:"#
                .to_string(),

            react: r#"Rewrite the following question for searching video transcripts using the ReAct approach (reason about the information need, decide what to look for). Output only the final rewritten query on a single line.
{{#context}}
Conversation context: {{context}}
{{/context}}
Question: {{question}}

Final rewritten query:"#
                .to_string(),

            expand: r#"Write {{count}} alternative phrasings of the question below that would help find the answer in a video transcript. Use different wording and synonyms. Output one phrasing per line with no numbering and no extra text.
{{#context}}
Conversation context: {{context}}
{{/context}}
Question: {{question}}"#
                .to_string(),
        }
    }
}

/// Prompts for synthetic ground-truth questions.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GroundTruthPrompts {
    pub system: String,
    pub user: String,
}

impl Default for GroundTruthPrompts {
    fn default() -> Self {
        Self {
            system: "You generate evaluation questions for a search system over YouTube video transcripts.".to_string(),

            user: r#"Formulate exactly {{count}} questions a viewer might ask whose answer is contained in the transcript excerpt below.
Make the questions specific to the excerpt, complete, and not too short. Use as few words from the excerpt as possible.
All questions must be different from each other.

Video: {{title}}
Excerpt:
{{segment}}

Provide the output in parsable JSON without code blocks:

{"questions": ["question1", "question2"]}"#
                .to_string(),
        }
    }
}

/// Prompts for the LLM-as-judge relevance classification.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct JudgePrompts {
    pub system: String,
    pub user: String,
}

impl Default for JudgePrompts {
    fn default() -> Self {
        Self {
            system: "You are an expert evaluator for a YouTube transcript question-answering assistant.".to_string(),

            user: r#"Analyze the relevance of the generated answer to the given question, using the transcript excerpt as ground truth.
Classify the answer as "NON_RELEVANT", "PARTLY_RELEVANT", or "RELEVANT".

Question: {{question}}
Transcript excerpt: {{reference}}
Generated answer: {{answer}}

Provide your evaluation in parsable JSON without code blocks:

{
  "Relevance": "NON_RELEVANT" | "PARTLY_RELEVANT" | "RELEVANT",
  "Explanation": "[a brief explanation for your evaluation]"
}"#
                .to_string(),
        }
    }
}

impl Prompts {
    /// Load prompts from the default location, with optional custom directory and variables.
    pub fn load(
        custom_dir: Option<&str>,
        custom_variables: Option<&HashMap<String, String>>,
    ) -> crate::error::Result<Self> {
        let mut prompts = Prompts::default();

        if let Some(vars) = custom_variables {
            prompts.variables = vars.clone();
        }

        if let Some(dir) = custom_dir {
            let custom_path = PathBuf::from(shellexpand::tilde(dir).to_string());

            let rag_path = custom_path.join("rag.toml");
            if rag_path.exists() {
                prompts.rag = toml::from_str(&std::fs::read_to_string(&rag_path)?)?;
            }

            let rewrite_path = custom_path.join("rewrite.toml");
            if rewrite_path.exists() {
                prompts.rewrite = toml::from_str(&std::fs::read_to_string(&rewrite_path)?)?;
            }

            let ground_truth_path = custom_path.join("ground_truth.toml");
            if ground_truth_path.exists() {
                prompts.ground_truth =
                    toml::from_str(&std::fs::read_to_string(&ground_truth_path)?)?;
            }

            let judge_path = custom_path.join("judge.toml");
            if judge_path.exists() {
                prompts.judge = toml::from_str(&std::fs::read_to_string(&judge_path)?)?;
            }
        }

        Ok(prompts)
    }

    /// Render a prompt template with the given variables.
    ///
    /// `{{name}}` is replaced by the variable value. A `{{#name}}...{{/name}}`
    /// block is kept (markers stripped) when `name` is set and non-empty, and
    /// removed otherwise.
    pub fn render(template: &str, vars: &HashMap<String, String>) -> String {
        let mut result = strip_sections(template, vars);
        for (key, value) in vars {
            result = result.replace(&format!("{{{{{}}}}}", key), value);
        }
        result
    }

    /// Render a prompt template with both provided variables and custom config variables.
    /// Provided variables take precedence over custom config variables.
    pub fn render_with_custom(&self, template: &str, vars: &HashMap<String, String>) -> String {
        let mut merged = self.variables.clone();
        for (key, value) in vars {
            merged.insert(key.clone(), value.clone());
        }
        Self::render(template, &merged)
    }
}

fn strip_sections(template: &str, vars: &HashMap<String, String>) -> String {
    let mut out = template.to_string();
    while let Some(open_start) = out.find("{{#") {
        let Some(open_len) = out[open_start..].find("}}") else {
            break;
        };
        let name = out[open_start + 3..open_start + open_len].to_string();
        let close_tag = format!("{{{{/{}}}}}", name);
        let body_start = open_start + open_len + 2;
        let Some(close_rel) = out[body_start..].find(&close_tag) else {
            break;
        };
        let body_end = body_start + close_rel;
        let keep = vars.get(&name).is_some_and(|v| !v.trim().is_empty());

        let mut end = body_end + close_tag.len();
        // Swallow the newline after a closing tag that sits on its own line.
        if out[end..].starts_with('\n') {
            end += 1;
        }

        let replacement = if keep {
            out[body_start..body_end].trim_start_matches('\n').to_string()
        } else {
            String::new()
        };
        out.replace_range(open_start..end, &replacement);
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_prompts() {
        let prompts = Prompts::default();
        assert!(!prompts.rag.system.is_empty());
        assert!(prompts.judge.user.contains("PARTLY_RELEVANT"));
        assert!(prompts.ground_truth.user.contains("{{segment}}"));
    }

    #[test]
    fn test_render_template() {
        let template = "Hello {{name}}, you have {{count}} messages.";
        let mut vars = HashMap::new();
        vars.insert("name".to_string(), "Alice".to_string());
        vars.insert("count".to_string(), "5".to_string());

        let result = Prompts::render(template, &vars);
        assert_eq!(result, "Hello Alice, you have 5 messages.");
    }

    #[test]
    fn test_optional_section_dropped_when_missing() {
        let template = "A\n{{#context}}\nCtx: {{context}}\n{{/context}}\nQ: {{question}}";
        let mut vars = HashMap::new();
        vars.insert("question".to_string(), "why?".to_string());

        assert_eq!(Prompts::render(template, &vars), "A\nQ: why?");

        vars.insert("context".to_string(), "earlier talk".to_string());
        assert_eq!(
            Prompts::render(template, &vars),
            "A\nCtx: earlier talk\nQ: why?"
        );
    }

    #[test]
    fn test_custom_variables_are_overridden_by_call_vars() {
        let mut prompts = Prompts::default();
        prompts.variables.insert("tone".to_string(), "formal".to_string());
        prompts.variables.insert("name".to_string(), "config".to_string());

        let mut vars = HashMap::new();
        vars.insert("name".to_string(), "call".to_string());

        let out = prompts.render_with_custom("{{name}} / {{tone}}", &vars);
        assert_eq!(out, "call / formal");
    }

    #[test]
    fn test_load_overrides_from_custom_dir() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(
            dir.path().join("judge.toml"),
            "system = \"strict judge\"\nuser = \"Q={{question}}\"\n",
        )
        .unwrap();

        let prompts = Prompts::load(dir.path().to_str(), None).unwrap();
        assert_eq!(prompts.judge.system, "strict judge");
        assert_eq!(prompts.rag.system, RagPrompts::default().system);
    }
}
