//! Segment store: durable record of videos, transcript segments, ground truth
//! and evaluation/feedback records.
//!
//! Backed by a single SQLite database. Evaluation and feedback tables are
//! append-only (autoincrement ids, no update-in-place), video rows are
//! upserted by platform id, and segments are immutable once written.

mod queries;
mod sqlite;

pub use queries::{DashboardStats, LabelCount, PerformanceAverage, VideoCount};
pub use sqlite::SegmentStore;

use chrono::{DateTime, NaiveDate, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};

/// A video known to the system.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Video {
    /// Platform-native id (e.g. the YouTube video id).
    pub id: String,
    pub title: String,
    #[serde(default)]
    pub author: Option<String>,
    #[serde(default)]
    pub upload_date: Option<NaiveDate>,
    #[serde(default)]
    pub view_count: u64,
    #[serde(default)]
    pub like_count: u64,
    #[serde(default)]
    pub comment_count: u64,
    /// Total duration in seconds.
    #[serde(default)]
    pub duration_seconds: f64,
}

impl Video {
    /// Create a video with only an id and title.
    pub fn new(id: impl Into<String>, title: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            title: title.into(),
            author: None,
            upload_date: None,
            view_count: 0,
            like_count: 0,
            comment_count: 0,
            duration_seconds: 0.0,
        }
    }

    /// Watch URL starting at the given offset.
    pub fn url_at(video_id: &str, seconds: f64) -> String {
        format!("https://youtube.com/watch?v={}&t={}s", video_id, seconds.max(0.0) as u32)
    }
}

/// One retrievable unit of a video transcript.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TranscriptSegment {
    /// May be left out of ingestion documents; filled from the enclosing video.
    #[serde(default)]
    pub video_id: String,
    /// Unique within the video; together with `video_id` it is the join key
    /// between the store and the vector index.
    pub segment_id: String,
    pub content: String,
    pub start_seconds: f64,
    #[serde(default)]
    pub duration_seconds: f64,
}

impl TranscriptSegment {
    pub fn new(
        video_id: impl Into<String>,
        segment_id: impl Into<String>,
        content: impl Into<String>,
        start_seconds: f64,
        duration_seconds: f64,
    ) -> Self {
        Self {
            video_id: video_id.into(),
            segment_id: segment_id.into(),
            content: content.into(),
            start_seconds,
            duration_seconds,
        }
    }

    /// End time in seconds.
    pub fn end_seconds(&self) -> f64 {
        self.start_seconds + self.duration_seconds
    }

    /// Format the start time as MM:SS or HH:MM:SS.
    pub fn format_timestamp(&self) -> String {
        format_timestamp(self.start_seconds)
    }
}

/// Format seconds as MM:SS or HH:MM:SS.
pub fn format_timestamp(seconds: f64) -> String {
    let total_seconds = seconds.max(0.0) as u32;
    let hours = total_seconds / 3600;
    let minutes = (total_seconds % 3600) / 60;
    let secs = total_seconds % 60;

    if hours > 0 {
        format!("{:02}:{:02}:{:02}", hours, minutes, secs)
    } else {
        format!("{:02}:{:02}", minutes, secs)
    }
}

/// A synthetic evaluation question derived from one segment.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GroundTruthQuestion {
    pub id: Option<i64>,
    pub video_id: String,
    pub segment_id: String,
    pub question: String,
    pub generated_at: DateTime<Utc>,
}

impl GroundTruthQuestion {
    pub fn new(
        video_id: impl Into<String>,
        segment_id: impl Into<String>,
        question: impl Into<String>,
    ) -> Self {
        Self {
            id: None,
            video_id: video_id.into(),
            segment_id: segment_id.into(),
            question: question.into(),
            generated_at: Utc::now(),
        }
    }
}

/// Aggregate retrieval quality of one evaluation run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SearchPerformanceRecord {
    pub id: Option<i64>,
    pub run_id: String,
    /// Video the run was restricted to, if any.
    pub video_id: Option<String>,
    /// Human-readable parameter configuration, e.g. `k=5,rewrite=none`.
    pub label: String,
    /// Full parameter configuration.
    pub parameters: serde_json::Value,
    pub question_count: usize,
    pub hit_rate: f64,
    pub mrr: f64,
    pub evaluated_at: DateTime<Utc>,
}

/// Judge verdict on a generated answer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Relevance {
    Relevant,
    PartlyRelevant,
    NonRelevant,
}

impl Relevance {
    pub const ALL: [Relevance; 3] = [
        Relevance::Relevant,
        Relevance::PartlyRelevant,
        Relevance::NonRelevant,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Relevance::Relevant => "RELEVANT",
            Relevance::PartlyRelevant => "PARTLY_RELEVANT",
            Relevance::NonRelevant => "NON_RELEVANT",
        }
    }
}

impl std::str::FromStr for Relevance {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.trim().to_uppercase().replace([' ', '-'], "_").as_str() {
            "RELEVANT" => Ok(Relevance::Relevant),
            "PARTLY_RELEVANT" => Ok(Relevance::PartlyRelevant),
            "NON_RELEVANT" => Ok(Relevance::NonRelevant),
            _ => Err(format!("Unknown relevance label: {}", s)),
        }
    }
}

impl std::fmt::Display for Relevance {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Judged answer for one ground-truth question.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RagEvaluationRecord {
    pub id: Option<i64>,
    pub run_id: String,
    pub video_id: String,
    pub segment_id: String,
    pub question: String,
    pub answer: String,
    pub relevance: Relevance,
    pub explanation: Option<String>,
    pub evaluated_at: DateTime<Utc>,
}

/// A question answered on the live path.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatRecord {
    pub id: Option<i64>,
    pub video_id: Option<String>,
    pub question: String,
    pub answer: String,
    /// Answer status as reported to the user (e.g. `answered`).
    pub status: String,
    pub created_at: DateTime<Utc>,
}

impl ChatRecord {
    pub fn new(
        video_id: Option<String>,
        question: impl Into<String>,
        answer: impl Into<String>,
        status: impl Into<String>,
    ) -> Self {
        Self {
            id: None,
            video_id,
            question: question.into(),
            answer: answer.into(),
            status: status.into(),
            created_at: Utc::now(),
        }
    }
}

/// Feedback left by a user on a live answer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UserFeedbackRecord {
    pub id: Option<i64>,
    /// Chat exchange the feedback is about, when known.
    #[serde(default)]
    pub chat_id: Option<i64>,
    pub video_id: Option<String>,
    pub query: String,
    pub response: String,
    /// Free-form label; the chat front-end sends `+1` / `-1`.
    pub label: String,
    pub created_at: DateTime<Utc>,
}

impl UserFeedbackRecord {
    pub fn new(
        video_id: Option<String>,
        query: impl Into<String>,
        response: impl Into<String>,
        label: impl Into<String>,
    ) -> Self {
        Self {
            id: None,
            chat_id: None,
            video_id,
            query: query.into(),
            response: response.into(),
            label: label.into(),
            created_at: Utc::now(),
        }
    }

    /// Attach the chat exchange this feedback refers to.
    pub fn for_chat(mut self, chat_id: Option<i64>) -> Self {
        self.chat_id = chat_id;
        self
    }
}

/// A video together with its per-video counts.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VideoSummary {
    pub video: Video,
    pub segment_count: usize,
    pub ground_truth_count: usize,
    pub ingested_at: DateTime<Utc>,
}

/// Timestamps are stored as fixed-width UTC RFC 3339 so that text comparison
/// in SQL matches chronological order.
pub(crate) fn to_db_time(dt: &DateTime<Utc>) -> String {
    dt.to_rfc3339_opts(SecondsFormat::Micros, true)
}

/// Parse a stored timestamp; `column` locates a corrupt value in the error.
pub(crate) fn from_db_time(s: &str, column: usize) -> rusqlite::Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(s)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| conversion_error(column, e))
}

/// Error for a stored text value that does not parse.
pub(crate) fn conversion_error(
    column: usize,
    e: impl Into<Box<dyn std::error::Error + Send + Sync>>,
) -> rusqlite::Error {
    rusqlite::Error::FromSqlConversionFailure(column, rusqlite::types::Type::Text, e.into())
}
