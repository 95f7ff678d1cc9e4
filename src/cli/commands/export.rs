//! Export command implementation.

use crate::cli::{ExportTarget, Output};
use crate::config::Settings;
use crate::store::{
    to_db_time, ChatRecord, GroundTruthQuestion, RagEvaluationRecord, SearchPerformanceRecord, SegmentStore,
    UserFeedbackRecord,
};
use anyhow::Result;
use serde::Serialize;

/// Serialization format for exported records.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExportFormat {
    Json,
    Csv,
}

impl std::str::FromStr for ExportFormat {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "json" => Ok(ExportFormat::Json),
            "csv" => Ok(ExportFormat::Csv),
            _ => Err(format!("Unknown export format: {} (expected json or csv)", s)),
        }
    }
}

/// A record that can be written as one CSV row.
trait CsvRow {
    const HEADER: &'static [&'static str];

    fn fields(&self) -> Vec<String>;
}

fn opt<T: ToString>(value: &Option<T>) -> String {
    value.as_ref().map(|v| v.to_string()).unwrap_or_default()
}

impl CsvRow for GroundTruthQuestion {
    const HEADER: &'static [&'static str] = &["id", "video_id", "segment_id", "question", "generated_at"];

    fn fields(&self) -> Vec<String> {
        vec![
            opt(&self.id),
            self.video_id.clone(),
            self.segment_id.clone(),
            self.question.clone(),
            to_db_time(&self.generated_at),
        ]
    }
}

impl CsvRow for RagEvaluationRecord {
    const HEADER: &'static [&'static str] = &[
        "id",
        "run_id",
        "video_id",
        "segment_id",
        "question",
        "answer",
        "relevance",
        "explanation",
        "evaluated_at",
    ];

    fn fields(&self) -> Vec<String> {
        vec![
            opt(&self.id),
            self.run_id.clone(),
            self.video_id.clone(),
            self.segment_id.clone(),
            self.question.clone(),
            self.answer.clone(),
            self.relevance.to_string(),
            opt(&self.explanation),
            to_db_time(&self.evaluated_at),
        ]
    }
}

impl CsvRow for SearchPerformanceRecord {
    const HEADER: &'static [&'static str] = &[
        "id",
        "run_id",
        "video_id",
        "label",
        "parameters",
        "question_count",
        "hit_rate",
        "mrr",
        "evaluated_at",
    ];

    fn fields(&self) -> Vec<String> {
        vec![
            opt(&self.id),
            self.run_id.clone(),
            opt(&self.video_id),
            self.label.clone(),
            self.parameters.to_string(),
            self.question_count.to_string(),
            self.hit_rate.to_string(),
            self.mrr.to_string(),
            to_db_time(&self.evaluated_at),
        ]
    }
}

impl CsvRow for UserFeedbackRecord {
    const HEADER: &'static [&'static str] =
        &["id", "chat_id", "video_id", "query", "response", "label", "created_at"];

    fn fields(&self) -> Vec<String> {
        vec![
            opt(&self.id),
            opt(&self.chat_id),
            opt(&self.video_id),
            self.query.clone(),
            self.response.clone(),
            self.label.clone(),
            to_db_time(&self.created_at),
        ]
    }
}

impl CsvRow for ChatRecord {
    const HEADER: &'static [&'static str] = &["id", "video_id", "question", "answer", "status", "created_at"];

    fn fields(&self) -> Vec<String> {
        vec![
            opt(&self.id),
            opt(&self.video_id),
            self.question.clone(),
            self.answer.clone(),
            self.status.clone(),
            to_db_time(&self.created_at),
        ]
    }
}

/// Quote a CSV field when it contains a separator, quote or line break.
fn csv_field(value: &str) -> String {
    if value.contains([',', '"', '\n', '\r']) {
        format!("\"{}\"", value.replace('"', "\"\""))
    } else {
        value.to_string()
    }
}

fn csv_line(fields: &[String]) -> String {
    fields
        .iter()
        .map(|f| csv_field(f))
        .collect::<Vec<_>>()
        .join(",")
}

fn render<T: Serialize + CsvRow>(records: &[T], format: ExportFormat) -> Result<String> {
    match format {
        ExportFormat::Json => Ok(serde_json::to_string_pretty(records)?),
        ExportFormat::Csv => {
            let header: Vec<String> = T::HEADER.iter().map(|h| h.to_string()).collect();
            let mut out = csv_line(&header);
            out.push('\n');
            for record in records {
                out.push_str(&csv_line(&record.fields()));
                out.push('\n');
            }
            Ok(out)
        }
    }
}

/// Render the selected records. Returns the text and the record count.
fn export_records(
    store: &SegmentStore,
    target: ExportTarget,
    format: ExportFormat,
    video: Option<&str>,
) -> Result<(String, usize)> {
    let in_scope = |video_id: Option<&str>| video.map_or(true, |v| video_id == Some(v));

    match target {
        ExportTarget::GroundTruth => {
            let records = store.ground_truth(video)?;
            Ok((render(&records, format)?, records.len()))
        }
        ExportTarget::Evaluations => {
            let records: Vec<RagEvaluationRecord> = store
                .rag_evaluations(None)?
                .into_iter()
                .filter(|r| in_scope(Some(r.video_id.as_str())))
                .collect();
            Ok((render(&records, format)?, records.len()))
        }
        ExportTarget::SearchPerformance => {
            let records: Vec<SearchPerformanceRecord> = store
                .search_performance_history(i64::MAX as usize)?
                .into_iter()
                .filter(|r| in_scope(r.video_id.as_deref()))
                .collect();
            Ok((render(&records, format)?, records.len()))
        }
        ExportTarget::Feedback => {
            let records = store.user_feedback(video)?;
            Ok((render(&records, format)?, records.len()))
        }
        ExportTarget::Chats => {
            let records: Vec<ChatRecord> = store
                .chat_history(i64::MAX as usize)?
                .into_iter()
                .filter(|r| in_scope(r.video_id.as_deref()))
                .collect();
            Ok((render(&records, format)?, records.len()))
        }
    }
}

/// Run the export command.
pub fn run_export(
    target: ExportTarget,
    format: &str,
    output: Option<String>,
    video: Option<&str>,
    settings: Settings,
) -> Result<()> {
    let format: ExportFormat = format.parse().map_err(|e: String| anyhow::anyhow!(e))?;
    let store = SegmentStore::open(&settings.store_path())?;

    let (text, count) = export_records(&store, target, format, video)?;
    if count == 0 {
        Output::warning("No records to export.");
    }

    match output {
        Some(path) if path != "-" => {
            std::fs::write(&path, &text)?;
            Output::success(&format!("Exported {} records to {}", count, path));
        }
        _ => {
            print!("{}", text);
        }
    }

    Ok(())
}
