//! SQLite-backed segment store.

use super::{
    conversion_error, from_db_time, to_db_time, ChatRecord, GroundTruthQuestion,
    RagEvaluationRecord, SearchPerformanceRecord, TranscriptSegment, UserFeedbackRecord, Video,
    VideoSummary,
};
use crate::error::{Result, TubeqaError};
use chrono::{NaiveDate, Utc};
use rusqlite::{params, Connection, OptionalExtension, Row};
use std::collections::HashSet;
use std::path::Path;
use std::sync::{Mutex, MutexGuard};
use tracing::{debug, info, instrument};

const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS videos (
    id TEXT PRIMARY KEY,
    title TEXT NOT NULL,
    author TEXT,
    upload_date TEXT,
    view_count INTEGER NOT NULL DEFAULT 0,
    like_count INTEGER NOT NULL DEFAULT 0,
    comment_count INTEGER NOT NULL DEFAULT 0,
    duration_seconds REAL NOT NULL DEFAULT 0,
    ingested_at TEXT NOT NULL,
    updated_at TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS transcript_segments (
    video_id TEXT NOT NULL,
    segment_id TEXT NOT NULL,
    position INTEGER NOT NULL,
    content TEXT NOT NULL,
    start_seconds REAL NOT NULL,
    duration_seconds REAL NOT NULL,
    PRIMARY KEY (video_id, segment_id)
);

CREATE INDEX IF NOT EXISTS idx_segments_order ON transcript_segments(video_id, position);

CREATE TABLE IF NOT EXISTS ground_truth (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    video_id TEXT NOT NULL,
    segment_id TEXT NOT NULL,
    question TEXT NOT NULL,
    generated_at TEXT NOT NULL,
    UNIQUE(video_id, question)
);

CREATE TABLE IF NOT EXISTS search_performance (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    run_id TEXT NOT NULL,
    video_id TEXT,
    label TEXT NOT NULL,
    parameters TEXT NOT NULL,
    question_count INTEGER NOT NULL,
    hit_rate REAL NOT NULL,
    mrr REAL NOT NULL,
    evaluated_at TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_search_performance_time ON search_performance(evaluated_at);

CREATE TABLE IF NOT EXISTS rag_evaluations (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    run_id TEXT NOT NULL,
    video_id TEXT NOT NULL,
    segment_id TEXT NOT NULL,
    question TEXT NOT NULL,
    answer TEXT NOT NULL,
    relevance TEXT NOT NULL,
    explanation TEXT,
    evaluated_at TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_rag_evaluations_time ON rag_evaluations(evaluated_at);

CREATE TABLE IF NOT EXISTS chat_history (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    video_id TEXT,
    question TEXT NOT NULL,
    answer TEXT NOT NULL,
    status TEXT NOT NULL,
    created_at TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_chat_history_time ON chat_history(created_at);

CREATE TABLE IF NOT EXISTS user_feedback (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    chat_id INTEGER REFERENCES chat_history(id),
    video_id TEXT,
    query TEXT NOT NULL,
    response TEXT NOT NULL,
    label TEXT NOT NULL,
    created_at TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_feedback_video ON user_feedback(video_id);
"#;

/// SQLite-based segment store.
///
/// A single connection behind a mutex: every write is an insert, an
/// insert-or-ignore, or an upsert by key, so concurrent evaluation and
/// ingestion jobs never need a read-modify-write.
pub struct SegmentStore {
    conn: Mutex<Connection>,
}

impl SegmentStore {
    /// Open (or create) a store at the given path.
    #[instrument(skip_all)]
    pub fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let conn = Connection::open(path)?;
        conn.execute_batch("PRAGMA journal_mode=WAL; PRAGMA synchronous=NORMAL;")?;
        conn.execute_batch(SCHEMA)?;
        migrate(&conn)?;

        info!("Initialized segment store at {:?}", path);

        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// Create an in-memory store (useful for testing).
    pub fn in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        conn.execute_batch(SCHEMA)?;
        migrate(&conn)?;

        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    pub(super) fn lock(&self) -> Result<MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|e| TubeqaError::Store(format!("Failed to acquire lock: {}", e)))
    }

    // === Videos ===

    /// Insert a video or refresh its metadata. Calling this twice with the same
    /// data leaves exactly one row.
    #[instrument(skip(self, video), fields(video_id = %video.id))]
    pub fn upsert_video(&self, video: &Video) -> Result<()> {
        if video.id.trim().is_empty() {
            return Err(TubeqaError::InvalidInput("Video id must not be empty".to_string()));
        }

        let conn = self.lock()?;
        let now = to_db_time(&Utc::now());

        conn.execute(
            r#"
            INSERT INTO videos
            (id, title, author, upload_date, view_count, like_count, comment_count,
             duration_seconds, ingested_at, updated_at)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?9)
            ON CONFLICT(id) DO UPDATE SET
                title = excluded.title,
                author = excluded.author,
                upload_date = excluded.upload_date,
                view_count = excluded.view_count,
                like_count = excluded.like_count,
                comment_count = excluded.comment_count,
                duration_seconds = excluded.duration_seconds,
                updated_at = excluded.updated_at
            "#,
            params![
                video.id,
                video.title,
                video.author,
                video.upload_date.map(|d| d.format("%Y-%m-%d").to_string()),
                video.view_count as i64,
                video.like_count as i64,
                video.comment_count as i64,
                video.duration_seconds,
                now,
            ],
        )?;

        debug!("Upserted video {}", video.id);
        Ok(())
    }

    /// Get a video by platform id.
    pub fn get_video(&self, video_id: &str) -> Result<Option<Video>> {
        let conn = self.lock()?;
        let video = conn
            .query_row(
                r#"
                SELECT id, title, author, upload_date, view_count, like_count,
                       comment_count, duration_seconds
                FROM videos WHERE id = ?1
                "#,
                params![video_id],
                row_to_video,
            )
            .optional()?;
        Ok(video)
    }

    /// List all videos with their segment and ground-truth counts, newest upload first.
    pub fn list_videos(&self) -> Result<Vec<VideoSummary>> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare(
            r#"
            SELECT v.id, v.title, v.author, v.upload_date, v.view_count, v.like_count,
                   v.comment_count, v.duration_seconds,
                   (SELECT COUNT(*) FROM transcript_segments s WHERE s.video_id = v.id),
                   (SELECT COUNT(*) FROM ground_truth g WHERE g.video_id = v.id),
                   v.ingested_at
            FROM videos v
            ORDER BY v.upload_date DESC, v.id
            "#,
        )?;

        let rows = stmt.query_map([], |row| {
            let video = row_to_video(row)?;
            let segment_count: i64 = row.get(8)?;
            let ground_truth_count: i64 = row.get(9)?;
            let ingested_at: String = row.get(10)?;
            Ok(VideoSummary {
                video,
                segment_count: segment_count as usize,
                ground_truth_count: ground_truth_count as usize,
                ingested_at: from_db_time(&ingested_at, 10)?,
            })
        })?;

        Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
    }

    // === Segments ===

    /// Validate a segment batch against the store without writing anything.
    pub fn check_segments(&self, video_id: &str, segments: &[TranscriptSegment]) -> Result<()> {
        let conn = self.lock()?;
        new_segments(&conn, video_id, segments).map(|_| ())
    }

    /// Bulk insert segments for a video in one transaction.
    ///
    /// Returns the number of newly written segments; segments already stored
    /// with identical content are skipped. Any integrity violation aborts the
    /// whole batch and leaves existing rows untouched.
    #[instrument(skip(self, segments), fields(count = segments.len()))]
    pub fn insert_segments(&self, video_id: &str, segments: &[TranscriptSegment]) -> Result<usize> {
        let conn = self.lock()?;
        let fresh = new_segments(&conn, video_id, segments)?;

        let tx = conn.unchecked_transaction()?;
        let mut position: i64 = tx.query_row(
            "SELECT COALESCE(MAX(position) + 1, 0) FROM transcript_segments WHERE video_id = ?1",
            params![video_id],
            |row| row.get(0),
        )?;

        for seg in &fresh {
            tx.execute(
                r#"
                INSERT INTO transcript_segments
                (video_id, segment_id, position, content, start_seconds, duration_seconds)
                VALUES (?1, ?2, ?3, ?4, ?5, ?6)
                "#,
                params![
                    video_id,
                    seg.segment_id,
                    position,
                    seg.content,
                    seg.start_seconds,
                    seg.duration_seconds,
                ],
            )?;
            position += 1;
        }

        tx.commit()?;
        info!("Inserted {} segments for video {}", fresh.len(), video_id);
        Ok(fresh.len())
    }

    /// All segments of a video in ingestion order.
    pub fn segments_for_video(&self, video_id: &str) -> Result<Vec<TranscriptSegment>> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare(
            r#"
            SELECT video_id, segment_id, content, start_seconds, duration_seconds
            FROM transcript_segments
            WHERE video_id = ?1
            ORDER BY position
            "#,
        )?;
        let rows = stmt.query_map(params![video_id], row_to_segment)?;
        Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
    }

    /// Segment ids of a video in ingestion order.
    pub fn segment_ids(&self, video_id: &str) -> Result<Vec<String>> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare(
            "SELECT segment_id FROM transcript_segments WHERE video_id = ?1 ORDER BY position",
        )?;
        let rows = stmt.query_map(params![video_id], |row| row.get(0))?;
        Ok(rows.collect::<rusqlite::Result<Vec<String>>>()?)
    }

    /// Look up a single segment.
    pub fn get_segment(&self, video_id: &str, segment_id: &str) -> Result<Option<TranscriptSegment>> {
        let conn = self.lock()?;
        let seg = conn
            .query_row(
                r#"
                SELECT video_id, segment_id, content, start_seconds, duration_seconds
                FROM transcript_segments
                WHERE video_id = ?1 AND segment_id = ?2
                "#,
                params![video_id, segment_id],
                row_to_segment,
            )
            .optional()?;
        Ok(seg)
    }

    // === Ground truth ===

    /// Store ground-truth questions, ignoring ones already recorded for the
    /// same video. Returns the number of new rows.
    pub fn add_ground_truth(&self, questions: &[GroundTruthQuestion]) -> Result<usize> {
        let conn = self.lock()?;
        let tx = conn.unchecked_transaction()?;
        let mut added = 0;

        for q in questions {
            added += tx.execute(
                r#"
                INSERT OR IGNORE INTO ground_truth (video_id, segment_id, question, generated_at)
                VALUES (?1, ?2, ?3, ?4)
                "#,
                params![q.video_id, q.segment_id, q.question, to_db_time(&q.generated_at)],
            )?;
        }

        tx.commit()?;
        debug!("Stored {} of {} ground-truth questions", added, questions.len());
        Ok(added)
    }

    /// Ground-truth questions, optionally for a single video.
    pub fn ground_truth(&self, video_id: Option<&str>) -> Result<Vec<GroundTruthQuestion>> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare(
            r#"
            SELECT id, video_id, segment_id, question, generated_at
            FROM ground_truth
            WHERE ?1 IS NULL OR video_id = ?1
            ORDER BY id
            "#,
        )?;
        let rows = stmt.query_map(params![video_id], |row| {
            let generated_at: String = row.get(4)?;
            Ok(GroundTruthQuestion {
                id: Some(row.get(0)?),
                video_id: row.get(1)?,
                segment_id: row.get(2)?,
                question: row.get(3)?,
                generated_at: from_db_time(&generated_at, 4)?,
            })
        })?;
        Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
    }

    // === Append-only records ===

    /// Append a search performance record. Returns its id.
    pub fn record_search_performance(&self, record: &SearchPerformanceRecord) -> Result<i64> {
        let conn = self.lock()?;
        conn.execute(
            r#"
            INSERT INTO search_performance
            (run_id, video_id, label, parameters, question_count, hit_rate, mrr, evaluated_at)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)
            "#,
            params![
                record.run_id,
                record.video_id,
                record.label,
                record.parameters.to_string(),
                record.question_count as i64,
                record.hit_rate,
                record.mrr,
                to_db_time(&record.evaluated_at),
            ],
        )?;
        Ok(conn.last_insert_rowid())
    }

    /// Append a judged answer. Returns its id.
    pub fn record_evaluation(&self, record: &RagEvaluationRecord) -> Result<i64> {
        let conn = self.lock()?;
        conn.execute(
            r#"
            INSERT INTO rag_evaluations
            (run_id, video_id, segment_id, question, answer, relevance, explanation, evaluated_at)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)
            "#,
            params![
                record.run_id,
                record.video_id,
                record.segment_id,
                record.question,
                record.answer,
                record.relevance.as_str(),
                record.explanation,
                to_db_time(&record.evaluated_at),
            ],
        )?;
        Ok(conn.last_insert_rowid())
    }

    /// Append a live question and its answer. Returns its id.
    pub fn record_chat(&self, record: &ChatRecord) -> Result<i64> {
        let conn = self.lock()?;
        conn.execute(
            r#"
            INSERT INTO chat_history (video_id, question, answer, status, created_at)
            VALUES (?1, ?2, ?3, ?4, ?5)
            "#,
            params![
                record.video_id,
                record.question,
                record.answer,
                record.status,
                to_db_time(&record.created_at),
            ],
        )?;
        Ok(conn.last_insert_rowid())
    }

    /// Most recent chat exchanges first.
    pub fn chat_history(&self, limit: usize) -> Result<Vec<ChatRecord>> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare(
            r#"
            SELECT id, video_id, question, answer, status, created_at
            FROM chat_history
            ORDER BY created_at DESC, id DESC
            LIMIT ?1
            "#,
        )?;
        let rows = stmt.query_map(params![limit as i64], |row| {
            let created_at: String = row.get(5)?;
            Ok(ChatRecord {
                id: Some(row.get(0)?),
                video_id: row.get(1)?,
                question: row.get(2)?,
                answer: row.get(3)?,
                status: row.get(4)?,
                created_at: from_db_time(&created_at, 5)?,
            })
        })?;
        Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
    }

    /// User feedback, optionally for a single video, in insertion order.
    pub fn user_feedback(&self, video_id: Option<&str>) -> Result<Vec<UserFeedbackRecord>> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare(
            r#"
            SELECT id, chat_id, video_id, query, response, label, created_at
            FROM user_feedback
            WHERE ?1 IS NULL OR video_id = ?1
            ORDER BY id
            "#,
        )?;
        let rows = stmt.query_map(params![video_id], |row| {
            let created_at: String = row.get(6)?;
            Ok(UserFeedbackRecord {
                id: Some(row.get(0)?),
                chat_id: row.get(1)?,
                video_id: row.get(2)?,
                query: row.get(3)?,
                response: row.get(4)?,
                label: row.get(5)?,
                created_at: from_db_time(&created_at, 6)?,
            })
        })?;
        Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
    }

    /// Append user feedback. Returns its id.
    pub fn record_feedback(&self, record: &UserFeedbackRecord) -> Result<i64> {
        let conn = self.lock()?;

        if let Some(video_id) = &record.video_id {
            let exists: bool = conn.query_row(
                "SELECT EXISTS(SELECT 1 FROM videos WHERE id = ?1)",
                params![video_id],
                |row| row.get(0),
            )?;
            if !exists {
                return Err(TubeqaError::VideoNotFound(video_id.clone()));
            }
        }
        if let Some(chat_id) = record.chat_id {
            let exists: bool = conn.query_row(
                "SELECT EXISTS(SELECT 1 FROM chat_history WHERE id = ?1)",
                params![chat_id],
                |row| row.get(0),
            )?;
            if !exists {
                return Err(TubeqaError::InvalidInput(format!("Unknown chat id {}", chat_id)));
            }
        }

        conn.execute(
            r#"
            INSERT INTO user_feedback (chat_id, video_id, query, response, label, created_at)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6)
            "#,
            params![
                record.chat_id,
                record.video_id,
                record.query,
                record.response,
                record.label,
                to_db_time(&record.created_at),
            ],
        )?;
        Ok(conn.last_insert_rowid())
    }

    /// Most recent search performance records first.
    pub fn search_performance_history(&self, limit: usize) -> Result<Vec<SearchPerformanceRecord>> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare(
            r#"
            SELECT id, run_id, video_id, label, parameters, question_count, hit_rate, mrr, evaluated_at
            FROM search_performance
            ORDER BY evaluated_at DESC, id DESC
            LIMIT ?1
            "#,
        )?;
        let rows = stmt.query_map(params![limit as i64], |row| {
            let parameters: String = row.get(4)?;
            let question_count: i64 = row.get(5)?;
            let evaluated_at: String = row.get(8)?;
            Ok(SearchPerformanceRecord {
                id: Some(row.get(0)?),
                run_id: row.get(1)?,
                video_id: row.get(2)?,
                label: row.get(3)?,
                parameters: serde_json::from_str(&parameters).map_err(|e| conversion_error(4, e))?,
                question_count: question_count as usize,
                hit_rate: row.get(6)?,
                mrr: row.get(7)?,
                evaluated_at: from_db_time(&evaluated_at, 8)?,
            })
        })?;
        Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
    }

    /// Judged answers, optionally restricted to one run, in insertion order.
    pub fn rag_evaluations(&self, run_id: Option<&str>) -> Result<Vec<RagEvaluationRecord>> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare(
            r#"
            SELECT id, run_id, video_id, segment_id, question, answer, relevance,
                   explanation, evaluated_at
            FROM rag_evaluations
            WHERE ?1 IS NULL OR run_id = ?1
            ORDER BY id
            "#,
        )?;
        let rows = stmt.query_map(params![run_id], |row| {
            let relevance: String = row.get(6)?;
            let evaluated_at: String = row.get(8)?;
            Ok(RagEvaluationRecord {
                id: Some(row.get(0)?),
                run_id: row.get(1)?,
                video_id: row.get(2)?,
                segment_id: row.get(3)?,
                question: row.get(4)?,
                answer: row.get(5)?,
                relevance: relevance.parse().map_err(|e: String| conversion_error(6, e))?,
                explanation: row.get(7)?,
                evaluated_at: from_db_time(&evaluated_at, 8)?,
            })
        })?;
        Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
    }
}

/// Bring databases created by older versions up to the current schema.
fn migrate(conn: &Connection) -> Result<()> {
    if !has_column(conn, "user_feedback", "chat_id")? {
        conn.execute_batch("ALTER TABLE user_feedback ADD COLUMN chat_id INTEGER REFERENCES chat_history(id);")?;
        info!("Added chat_id column to user_feedback");
    }
    Ok(())
}

fn has_column(conn: &Connection, table: &str, column: &str) -> Result<bool> {
    let mut stmt = conn.prepare(&format!("PRAGMA table_info({})", table))?;
    let names = stmt
        .query_map([], |row| row.get::<_, String>(1))?
        .collect::<rusqlite::Result<Vec<_>>>()?;
    Ok(names.iter().any(|n| n == column))
}

/// Validate a batch and return the segments not yet stored.
fn new_segments<'a>(
    conn: &Connection,
    video_id: &str,
    segments: &'a [TranscriptSegment],
) -> Result<Vec<&'a TranscriptSegment>> {
    let video_exists: bool = conn.query_row(
        "SELECT EXISTS(SELECT 1 FROM videos WHERE id = ?1)",
        params![video_id],
        |row| row.get(0),
    )?;
    if !video_exists {
        return Err(TubeqaError::VideoNotFound(video_id.to_string()));
    }

    let mut seen = HashSet::new();
    let mut previous_start = f64::NEG_INFINITY;
    for seg in segments {
        if seg.video_id != video_id {
            return Err(TubeqaError::Integrity(format!(
                "Segment '{}' belongs to video '{}', not '{}'",
                seg.segment_id, seg.video_id, video_id
            )));
        }
        if seg.segment_id.trim().is_empty() {
            return Err(TubeqaError::InvalidInput(format!(
                "Empty segment id in video '{}'",
                video_id
            )));
        }
        if !seen.insert(seg.segment_id.as_str()) {
            return Err(TubeqaError::Integrity(format!(
                "Segment id '{}' appears twice in the batch for video '{}'",
                seg.segment_id, video_id
            )));
        }
        if !seg.start_seconds.is_finite() || seg.start_seconds < previous_start {
            return Err(TubeqaError::InvalidInput(format!(
                "Segment '{}' starts at {} which is before the previous segment ({})",
                seg.segment_id, seg.start_seconds, previous_start
            )));
        }
        previous_start = seg.start_seconds;
    }

    let last_stored_start: Option<f64> = conn.query_row(
        "SELECT MAX(start_seconds) FROM transcript_segments WHERE video_id = ?1",
        params![video_id],
        |row| row.get(0),
    )?;

    let mut stmt = conn.prepare(
        r#"
        SELECT content, start_seconds, duration_seconds
        FROM transcript_segments
        WHERE video_id = ?1 AND segment_id = ?2
        "#,
    )?;

    let mut fresh = Vec::new();
    for seg in segments {
        let existing: Option<(String, f64, f64)> = stmt
            .query_row(params![video_id, seg.segment_id], |row| {
                Ok((row.get(0)?, row.get(1)?, row.get(2)?))
            })
            .optional()?;

        match existing {
            Some((content, start, duration)) => {
                let identical = content == seg.content
                    && (start - seg.start_seconds).abs() < 1e-9
                    && (duration - seg.duration_seconds).abs() < 1e-9;
                if !identical {
                    return Err(TubeqaError::Integrity(format!(
                        "Segment '{}' of video '{}' already exists with different content",
                        seg.segment_id, video_id
                    )));
                }
            }
            None => {
                if let Some(last) = last_stored_start {
                    if seg.start_seconds < last {
                        return Err(TubeqaError::InvalidInput(format!(
                            "Segment '{}' starts at {} which is before already stored segments ({})",
                            seg.segment_id, seg.start_seconds, last
                        )));
                    }
                }
                fresh.push(seg);
            }
        }
    }

    Ok(fresh)
}

fn row_to_video(row: &Row<'_>) -> rusqlite::Result<Video> {
    let upload_date: Option<String> = row.get(3)?;
    let view_count: i64 = row.get(4)?;
    let like_count: i64 = row.get(5)?;
    let comment_count: i64 = row.get(6)?;
    Ok(Video {
        id: row.get(0)?,
        title: row.get(1)?,
        author: row.get(2)?,
        upload_date: upload_date
            .map(|d| NaiveDate::parse_from_str(&d, "%Y-%m-%d"))
            .transpose()
            .map_err(|e| conversion_error(3, e))?,
        view_count: view_count.max(0) as u64,
        like_count: like_count.max(0) as u64,
        comment_count: comment_count.max(0) as u64,
        duration_seconds: row.get(7)?,
    })
}

fn row_to_segment(row: &Row<'_>) -> rusqlite::Result<TranscriptSegment> {
    Ok(TranscriptSegment {
        video_id: row.get(0)?,
        segment_id: row.get(1)?,
        content: row.get(2)?,
        start_seconds: row.get(3)?,
        duration_seconds: row.get(4)?,
    })
}
