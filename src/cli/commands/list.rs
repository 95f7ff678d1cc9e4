//! List command implementation.

use crate::cli::Output;
use crate::config::Settings;
use crate::store::SegmentStore;
use anyhow::Result;

/// Run the list command.
pub fn run_list(settings: Settings) -> Result<()> {
    let store = SegmentStore::open(&settings.store_path())?;

    match store.list_videos() {
        Ok(videos) => {
            if videos.is_empty() {
                Output::info("No videos ingested yet. Use 'tubeqa ingest <file>' to add content.");
            } else {
                Output::header(&format!("Ingested Videos ({})", videos.len()));
                println!();

                for summary in &videos {
                    Output::video_info(summary);
                }

                let total_segments: usize = videos.iter().map(|v| v.segment_count).sum();
                let total_questions: usize = videos.iter().map(|v| v.ground_truth_count).sum();
                println!();
                Output::kv("Total videos", &videos.len().to_string());
                Output::kv("Total segments", &total_segments.to_string());
                Output::kv("Ground-truth questions", &total_questions.to_string());
            }
        }
        Err(e) => {
            Output::error(&format!("Failed to list videos: {}", e));
            return Err(e.into());
        }
    }

    Ok(())
}
