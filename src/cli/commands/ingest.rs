//! Ingest command implementation.

use crate::cli::preflight::{self, Operation};
use crate::cli::Output;
use crate::config::Settings;
use crate::pipeline::{IngestDocument, Pipeline};
use anyhow::{Context, Result};
use std::path::PathBuf;

/// Run the ingest command.
pub async fn run_ingest(files: &[PathBuf], settings: Settings) -> Result<()> {
    if let Err(e) = preflight::check(&settings, Operation::Ingest) {
        Output::error(&format!("{}", e));
        return Err(e.into());
    }

    let pipeline = Pipeline::new(settings)?;
    let mut failed = 0;

    for path in files {
        let doc = IngestDocument::from_path(path)
            .with_context(|| format!("Failed to read {}", path.display()))?;

        let spinner = Output::spinner(&format!("Ingesting {} ({} segments)...", doc.video.id, doc.segments.len()));
        let result = pipeline.ingest(&doc).await;
        spinner.finish_and_clear();

        match result {
            Ok(report) => {
                Output::success(&format!(
                    "{} ({}): {} new segments, {} unchanged",
                    report.title, report.video_id, report.segments_stored, report.segments_skipped
                ));
            }
            Err(e) => {
                failed += 1;
                Output::error(&format!("{}: {}", path.display(), e));
            }
        }
    }

    if failed > 0 {
        anyhow::bail!("{} of {} documents failed to ingest", failed, files.len());
    }
    Ok(())
}
