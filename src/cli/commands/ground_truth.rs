//! Ground-truth command implementation.

use crate::cli::preflight::{self, Operation};
use crate::cli::Output;
use crate::config::Settings;
use crate::pipeline::Pipeline;
use anyhow::Result;

/// Run the ground-truth command.
pub async fn run_ground_truth(videos: &[String], all: bool, settings: Settings) -> Result<()> {
    if let Err(e) = preflight::check(&settings, Operation::GroundTruth) {
        Output::error(&format!("{}", e));
        return Err(e.into());
    }

    let pipeline = Pipeline::new(settings)?;
    let store = pipeline.store();

    let video_ids: Vec<String> = if all {
        store.list_videos()?.into_iter().map(|s| s.video.id).collect()
    } else {
        videos.to_vec()
    };

    if video_ids.is_empty() {
        Output::warning("No videos selected. Pass video ids or --all.");
        return Ok(());
    }

    let generator = pipeline.ground_truth_generator();
    let mut total = 0;

    for video_id in &video_ids {
        let spinner = Output::spinner(&format!("Generating questions for {}...", video_id));
        let result = generator.generate_for_video(&store, video_id).await;
        spinner.finish_and_clear();

        match result {
            Ok(report) => {
                total += report.questions_added;
                Output::success(&format!(
                    "{}: {} new questions from {} segments",
                    video_id, report.questions_added, report.segments
                ));
                if report.skipped_segments > 0 {
                    Output::warning(&format!(
                        "{} segments produced no usable questions",
                        report.skipped_segments
                    ));
                }
            }
            Err(e) => {
                Output::error(&format!("{}: {}", video_id, e));
                return Err(e.into());
            }
        }
    }

    Output::kv("Questions added", &total.to_string());
    Ok(())
}
