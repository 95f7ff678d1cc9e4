//! Search command implementation.

use crate::cli::preflight::{self, Operation};
use crate::cli::Output;
use crate::config::Settings;
use crate::pipeline::Pipeline;
use crate::retrieval::SearchMethod;
use crate::rewrite::RewriteStrategy;
use crate::store::Video;
use crate::vector_index::SearchFilter;
use anyhow::Result;

/// Run the search command.
pub async fn run_search(
    query: &str,
    video: Option<&str>,
    limit: Option<usize>,
    strategy: Option<RewriteStrategy>,
    method: Option<SearchMethod>,
    mut settings: Settings,
) -> Result<()> {
    if strategy.is_some_and(|s| s != RewriteStrategy::None) {
        preflight::check(&settings, Operation::Ask)?;
    } else {
        preflight::check(&settings, Operation::Search)?;
    }

    if let Some(limit) = limit {
        settings.retrieval.context_size = limit.max(1);
        settings.retrieval.top_k = settings.retrieval.top_k.max(limit);
    }
    if let Some(strategy) = strategy {
        settings.retrieval.rewrite_strategy = strategy;
    }
    if let Some(method) = method {
        settings.retrieval.search_method = method;
    }

    let pipeline = Pipeline::new(settings)?;
    let filter = video.map(SearchFilter::video).unwrap_or_default();

    let spinner = Output::spinner("Searching...");
    let results = pipeline.rag_engine().search(query, &filter).await;
    spinner.finish_and_clear();

    match results {
        Ok((queries, hits)) => {
            if queries.len() > 1 {
                Output::info(&format!("Searched with {} queries", queries.len()));
            }
            if hits.is_empty() {
                Output::warning("No results found matching your query.");
            } else {
                Output::success(&format!("Found {} results", hits.len()));

                for (i, hit) in hits.iter().enumerate() {
                    Output::search_result(
                        i + 1,
                        &hit.video_id,
                        hit.start_seconds,
                        hit.score,
                        &hit.content,
                        &Video::url_at(&hit.video_id, hit.start_seconds),
                    );
                }
            }
        }
        Err(e) => {
            Output::error(&format!("Search failed: {}", e));
            return Err(e.into());
        }
    }

    Ok(())
}
