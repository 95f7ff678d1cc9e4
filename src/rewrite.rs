//! Query rewriting.
//!
//! Turns a raw user question into one or more retrieval queries. The original
//! question is always the first query, so a rewrite can only add recall; a
//! failed or useless rewrite degrades to searching with the question alone.

use crate::config::Prompts;
use crate::generation::Generator;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tracing::{debug, instrument, warn};

const REWRITE_SYSTEM: &str =
    "You rewrite user questions into queries for searching YouTube video transcripts.";

/// Prefixes models like to put in front of the query they were asked for.
const ANSWER_PREFIXES: [&str; 5] = [
    "final rewritten query:",
    "rewritten query:",
    "final query:",
    "search query:",
    "query:",
];

/// Query rewriting strategy.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, Default, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum RewriteStrategy {
    /// Search with the question as asked.
    #[default]
    None,
    /// Step-by-step reasoning, one final query.
    ChainOfThought,
    /// Reason-then-act prompting, one final query.
    React,
    /// Several alternative phrasings.
    Expand,
}

impl RewriteStrategy {
    pub const ALL: [RewriteStrategy; 4] = [
        RewriteStrategy::None,
        RewriteStrategy::ChainOfThought,
        RewriteStrategy::React,
        RewriteStrategy::Expand,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            RewriteStrategy::None => "none",
            RewriteStrategy::ChainOfThought => "chain_of_thought",
            RewriteStrategy::React => "react",
            RewriteStrategy::Expand => "expand",
        }
    }
}

impl std::str::FromStr for RewriteStrategy {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_lowercase().replace('-', "_").as_str() {
            "none" => Ok(RewriteStrategy::None),
            "chain_of_thought" | "cot" => Ok(RewriteStrategy::ChainOfThought),
            "react" => Ok(RewriteStrategy::React),
            "expand" | "expansion" => Ok(RewriteStrategy::Expand),
            _ => Err(format!("Unknown rewrite strategy: {}", s)),
        }
    }
}

impl std::fmt::Display for RewriteStrategy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Rewrites questions into retrieval queries.
#[derive(Clone)]
pub struct QueryRewriter {
    generator: Arc<dyn Generator>,
    prompts: Arc<Prompts>,
    strategy: RewriteStrategy,
    max_rewrites: usize,
}

impl QueryRewriter {
    pub fn new(
        generator: Arc<dyn Generator>,
        prompts: Arc<Prompts>,
        strategy: RewriteStrategy,
        max_rewrites: usize,
    ) -> Self {
        Self {
            generator,
            prompts,
            strategy,
            max_rewrites,
        }
    }

    /// Same rewriter with a different strategy (used by parameter sweeps).
    pub fn with_strategy(&self, strategy: RewriteStrategy) -> Self {
        Self {
            strategy,
            ..self.clone()
        }
    }

    pub fn strategy(&self) -> RewriteStrategy {
        self.strategy
    }

    /// Produce retrieval queries for a question.
    ///
    /// Never fails: the result always starts with `question` and holds at most
    /// `max_rewrites + 1` distinct queries.
    #[instrument(skip(self, context), fields(strategy = %self.strategy))]
    pub async fn rewrite(&self, question: &str, context: Option<&str>) -> Vec<String> {
        let original = vec![question.to_string()];

        let template = match self.strategy {
            RewriteStrategy::None => return original,
            _ if self.max_rewrites == 0 || question.trim().is_empty() => return original,
            RewriteStrategy::ChainOfThought => &self.prompts.rewrite.chain_of_thought,
            RewriteStrategy::React => &self.prompts.rewrite.react,
            RewriteStrategy::Expand => &self.prompts.rewrite.expand,
        };

        let mut vars = HashMap::new();
        vars.insert("question".to_string(), question.to_string());
        vars.insert("count".to_string(), self.max_rewrites.to_string());
        if let Some(ctx) = context {
            vars.insert("context".to_string(), ctx.to_string());
        }
        let prompt = self.prompts.render_with_custom(template, &vars);

        let output = match self.generator.generate(REWRITE_SYSTEM, &prompt).await {
            Ok(output) => output,
            Err(e) => {
                warn!("Query rewrite failed, searching with the original question: {}", e);
                return original;
            }
        };

        let variants = match self.strategy {
            RewriteStrategy::Expand => parse_variants(&output),
            _ => parse_single(&output).into_iter().collect(),
        };

        let queries = merge_queries(question, variants, self.max_rewrites);
        debug!("Rewrote question into {} queries", queries.len());
        queries
    }
}

/// Strip list markers, answer prefixes and wrapping quotes from one line.
fn clean_line(line: &str) -> String {
    let mut s = line.trim();

    let without_bullet = s.trim_start_matches(['-', '*', '•']);
    if without_bullet.len() != s.len() {
        s = without_bullet.trim_start();
    } else {
        let digits = s.chars().take_while(|c| c.is_ascii_digit()).count();
        if digits > 0 && s[digits..].starts_with(['.', ')']) {
            s = s[digits + 1..].trim_start();
        }
    }

    if let Some(prefix) = ANSWER_PREFIXES.iter().find(|p| has_prefix(s, p)) {
        s = s[prefix.len()..].trim_start();
    }

    s.trim_matches(|c| c == '"' || c == '\'' || c == '`').trim().to_string()
}

fn has_prefix(s: &str, prefix: &str) -> bool {
    s.get(..prefix.len())
        .is_some_and(|head| head.eq_ignore_ascii_case(prefix))
}

/// The final query of a single-query strategy: the line after an answer
/// prefix if the model used one, else the last non-empty line.
fn parse_single(output: &str) -> Option<String> {
    let lines: Vec<&str> = output.lines().filter(|l| !l.trim().is_empty()).collect();

    let prefixed = lines.iter().rev().find(|l| {
        ANSWER_PREFIXES.iter().any(|p| has_prefix(l.trim(), p)) && !clean_line(l).is_empty()
    });

    prefixed
        .or(lines.last())
        .map(|l| clean_line(l))
        .filter(|q| !q.is_empty())
}

fn parse_variants(output: &str) -> Vec<String> {
    output
        .lines()
        .map(clean_line)
        .filter(|l| !l.is_empty())
        .collect()
}

fn merge_queries(question: &str, variants: Vec<String>, max_rewrites: usize) -> Vec<String> {
    let mut seen = HashSet::new();
    seen.insert(question.trim().to_lowercase());

    let mut queries = vec![question.to_string()];
    for variant in variants {
        if queries.len() > max_rewrites {
            break;
        }
        if seen.insert(variant.to_lowercase()) {
            queries.push(variant);
        }
    }
    queries
}
