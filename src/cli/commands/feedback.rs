//! Feedback command implementation.

use crate::cli::Output;
use crate::config::Settings;
use crate::store::{SegmentStore, UserFeedbackRecord};
use anyhow::Result;

/// Run the feedback command.
pub fn run_feedback(
    query: &str,
    response: &str,
    label: &str,
    video: Option<String>,
    chat_id: Option<i64>,
    settings: Settings,
) -> Result<()> {
    let store = SegmentStore::open(&settings.store_path())?;
    let record = UserFeedbackRecord::new(video, query, response, label).for_chat(chat_id);
    let id = store.record_feedback(&record)?;
    Output::success(&format!("Recorded feedback #{}", id));
    Ok(())
}
