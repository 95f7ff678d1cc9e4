//! Check command implementation.

use crate::cli::preflight::{self, Operation};
use crate::cli::Output;
use crate::config::Settings;
use crate::pipeline::Pipeline;
use anyhow::Result;

/// Run the check command.
pub async fn run_check(video: Option<&str>, repair: bool, settings: Settings) -> Result<()> {
    if repair {
        preflight::check(&settings, Operation::Ingest)?;
    }

    let pipeline = Pipeline::new(settings)?;
    let video_ids: Vec<String> = match video {
        Some(id) => vec![id.to_string()],
        None => pipeline.store().list_videos()?.into_iter().map(|s| s.video.id).collect(),
    };

    let mut diverged = 0;
    for video_id in &video_ids {
        let report = if repair {
            pipeline.repair(video_id).await?
        } else {
            pipeline.verify_consistency(video_id).await?
        };

        if report.is_consistent() {
            Output::success(&format!("{}: {} segments, consistent", video_id, report.stored));
            continue;
        }

        diverged += 1;
        Output::warning(&format!(
            "{}: {} stored, {} indexed, {} missing from index, {} orphaned",
            video_id,
            report.stored,
            report.indexed,
            report.missing_from_index.len(),
            report.orphaned_in_index.len()
        ));
        if repair {
            Output::info("Repaired.");
        }
    }

    Output::kv("Index", pipeline.index().name());
    Output::kv("Indexed segments", &pipeline.index().len().await?.to_string());

    if diverged > 0 && !repair {
        anyhow::bail!("{} videos diverged; run 'tubeqa check --repair' to fix", diverged);
    }
    Ok(())
}
