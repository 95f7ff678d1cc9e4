//! Stats command implementation.

use crate::cli::Output;
use crate::config::Settings;
use crate::store::SegmentStore;
use anyhow::Result;
use chrono::{Duration, Utc};

/// Run the stats command.
pub fn run_stats(days: Option<i64>, json: bool, settings: Settings) -> Result<()> {
    let store = SegmentStore::open(&settings.store_path())?;
    let since = days.map(|d| Utc::now() - Duration::days(d.max(0)));
    let stats = store.dashboard_stats(since)?;

    if json {
        println!("{}", serde_json::to_string_pretty(&stats)?);
        return Ok(());
    }

    let window = match days {
        Some(d) => format!("last {} days", d),
        None => "all time".to_string(),
    };

    Output::header(&format!("Answer relevance ({})", window));
    for c in &stats.relevance {
        Output::kv(&c.label, &c.count.to_string());
    }

    Output::header(&format!("Retrieval ({})", window));
    let perf = &stats.search_performance;
    if perf.runs == 0 {
        Output::info("No retrieval evaluations recorded.");
    } else {
        Output::kv("Runs", &perf.runs.to_string());
        Output::kv("Mean hit rate", &format!("{:.3}", perf.hit_rate));
        Output::kv("Mean MRR", &format!("{:.3}", perf.mrr));
        println!();
        for record in store.search_performance_history(5)? {
            Output::performance(&record);
        }
    }

    Output::header("User feedback");
    if stats.feedback.is_empty() {
        Output::info("No feedback recorded.");
    }
    for c in &stats.feedback {
        Output::kv(&c.label, &c.count.to_string());
    }

    Output::header("Ground truth");
    for v in &stats.ground_truth {
        Output::list_item(&format!(
            "{} ({}): {} questions",
            v.title.as_deref().unwrap_or("unknown video"),
            v.video_id,
            v.count
        ));
    }

    Ok(())
}
