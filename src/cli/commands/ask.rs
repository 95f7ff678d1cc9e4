//! Ask command implementation.

use crate::cli::preflight::{self, Operation};
use crate::cli::Output;
use crate::config::Settings;
use crate::pipeline::Pipeline;
use crate::rag::AnswerStatus;
use crate::retrieval::SearchMethod;
use crate::rewrite::RewriteStrategy;
use anyhow::Result;

/// Run the ask command.
pub async fn run_ask(
    question: &str,
    video: Option<&str>,
    strategy: Option<RewriteStrategy>,
    method: Option<SearchMethod>,
    json: bool,
    mut settings: Settings,
) -> Result<()> {
    // Pre-flight checks
    if let Err(e) = preflight::check(&settings, Operation::Ask) {
        Output::error(&format!("{}", e));
        return Err(e.into());
    }

    if let Some(strategy) = strategy {
        settings.retrieval.rewrite_strategy = strategy;
    }
    if let Some(method) = method {
        settings.retrieval.search_method = method;
    }

    let pipeline = Pipeline::new(settings)?;

    let spinner = Output::spinner("Searching transcripts...");
    let result = pipeline.ask(&pipeline.rag_engine(), question, video).await;
    spinner.finish_and_clear();

    let chat = match result {
        Ok(chat) => chat,
        Err(e) => {
            Output::error(&format!("Failed to answer: {}", e));
            return Err(e.into());
        }
    };

    if json {
        println!("{}", serde_json::to_string_pretty(&chat)?);
        return Ok(());
    }
    let response = &chat.response;

    if response.queries.len() > 1 {
        Output::header("Queries");
        for q in &response.queries {
            Output::list_item(q);
        }
    }

    println!("\n{}\n", response.answer.text);

    match response.status() {
        AnswerStatus::Answered => {
            Output::header("Sources");
            for (i, c) in response.answer.citations.iter().enumerate() {
                Output::search_result(i + 1, &c.video_id, c.start_seconds, c.score, &c.content, &c.url);
            }
        }
        AnswerStatus::SearchUnavailable => Output::warning("The vector index could not be reached."),
        AnswerStatus::GenerationFailed => Output::warning("The model did not produce an answer."),
        AnswerStatus::InsufficientContext => {}
    }

    if let Some(chat_id) = chat.chat_id {
        println!();
        Output::info(&format!(
            "Chat #{} (rate it with 'tubeqa feedback --chat-id {}')",
            chat_id, chat_id
        ));
    }

    Ok(())
}
