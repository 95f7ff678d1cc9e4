//! SQLite-based vector index.
//!
//! Embeddings are stored as little-endian f32 BLOBs and cosine similarity is
//! computed in Rust. Fine for the few thousand segments of a video library;
//! larger corpora belong in Elasticsearch. Keyword search runs on an FTS5
//! table kept in sync with the vectors by triggers.

use super::{
    cosine_similarity, keyword_terms, rank_hits, IndexEntry, SearchFilter, SegmentHit, VectorIndex,
};
use crate::error::{Result, TubeqaError};
use async_trait::async_trait;
use chrono::Utc;
use rusqlite::{params, Connection};
use std::path::Path;
use std::sync::{Mutex, MutexGuard};
use tracing::{debug, info, instrument};

const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS segment_vectors (
    video_id TEXT NOT NULL,
    segment_id TEXT NOT NULL,
    start_seconds REAL NOT NULL,
    content TEXT NOT NULL,
    embedding BLOB NOT NULL,
    indexed_at TEXT NOT NULL,
    PRIMARY KEY (video_id, segment_id)
);

CREATE VIRTUAL TABLE IF NOT EXISTS segment_text USING fts5(
    content,
    content='segment_vectors',
    content_rowid='rowid'
);

CREATE TRIGGER IF NOT EXISTS segment_text_ai AFTER INSERT ON segment_vectors BEGIN
    INSERT INTO segment_text(rowid, content) VALUES (new.rowid, new.content);
END;
CREATE TRIGGER IF NOT EXISTS segment_text_ad AFTER DELETE ON segment_vectors BEGIN
    INSERT INTO segment_text(segment_text, rowid, content) VALUES('delete', old.rowid, old.content);
END;
CREATE TRIGGER IF NOT EXISTS segment_text_au AFTER UPDATE ON segment_vectors BEGIN
    INSERT INTO segment_text(segment_text, rowid, content) VALUES('delete', old.rowid, old.content);
    INSERT INTO segment_text(rowid, content) VALUES (new.rowid, new.content);
END;
"#;

/// SQLite-based vector index.
pub struct SqliteVectorIndex {
    conn: Mutex<Connection>,
}

impl SqliteVectorIndex {
    /// Open (or create) an index at the given path.
    #[instrument(skip_all)]
    pub fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let conn = Connection::open(path).map_err(unavailable)?;
        conn.execute_batch("PRAGMA journal_mode=WAL;")
            .map_err(unavailable)?;
        conn.execute_batch(SCHEMA).map_err(unavailable)?;
        // Indexes written before the keyword table existed.
        conn.execute_batch("INSERT INTO segment_text(segment_text) VALUES('rebuild');")
            .map_err(unavailable)?;

        info!("Initialized SQLite vector index at {:?}", path);

        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// Create an in-memory index (useful for testing).
    pub fn in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory().map_err(unavailable)?;
        conn.execute_batch(SCHEMA).map_err(unavailable)?;

        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn lock(&self) -> Result<MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|e| TubeqaError::IndexUnavailable(format!("Failed to acquire lock: {}", e)))
    }

    fn embedding_to_bytes(embedding: &[f32]) -> Vec<u8> {
        embedding.iter().flat_map(|f| f.to_le_bytes()).collect()
    }

    fn bytes_to_embedding(bytes: &[u8]) -> Vec<f32> {
        bytes
            .chunks_exact(4)
            .map(|chunk| f32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]))
            .collect()
    }
}

/// FTS5 query matching any of the terms, or `None` when there are none.
fn match_expression(query: &str) -> Option<String> {
    let terms = keyword_terms(query);
    if terms.is_empty() {
        return None;
    }
    Some(
        terms
            .iter()
            .map(|t| format!("\"{}\"", t))
            .collect::<Vec<_>>()
            .join(" OR "),
    )
}

fn unavailable(e: rusqlite::Error) -> TubeqaError {
    TubeqaError::IndexUnavailable(format!("SQLite index: {}", e))
}

#[async_trait]
impl VectorIndex for SqliteVectorIndex {
    #[instrument(skip(self, entries), fields(count = entries.len()))]
    async fn index_segments(&self, video_id: &str, entries: &[IndexEntry]) -> Result<usize> {
        let conn = self.lock()?;
        let tx = conn.unchecked_transaction().map_err(unavailable)?;
        let now = Utc::now().to_rfc3339();

        for entry in entries {
            // An upsert rather than INSERT OR REPLACE, so the update trigger
            // keeps the keyword table in sync.
            tx.execute(
                r#"
                INSERT INTO segment_vectors
                (video_id, segment_id, start_seconds, content, embedding, indexed_at)
                VALUES (?1, ?2, ?3, ?4, ?5, ?6)
                ON CONFLICT(video_id, segment_id) DO UPDATE SET
                    start_seconds = excluded.start_seconds,
                    content = excluded.content,
                    embedding = excluded.embedding,
                    indexed_at = excluded.indexed_at
                "#,
                params![
                    video_id,
                    entry.segment.segment_id,
                    entry.segment.start_seconds,
                    entry.segment.content,
                    Self::embedding_to_bytes(&entry.embedding),
                    now,
                ],
            )
            .map_err(unavailable)?;
        }

        tx.commit().map_err(unavailable)?;
        debug!("Indexed {} segments for {}", entries.len(), video_id);
        Ok(entries.len())
    }

    #[instrument(skip(self, query))]
    async fn search(&self, query: &[f32], k: usize, filter: &SearchFilter) -> Result<Vec<SegmentHit>> {
        if k == 0 {
            return Ok(Vec::new());
        }

        let conn = self.lock()?;
        let mut stmt = conn
            .prepare(
                r#"
                SELECT video_id, segment_id, start_seconds, content, embedding
                FROM segment_vectors
                WHERE ?1 IS NULL OR video_id = ?1
                "#,
            )
            .map_err(unavailable)?;

        let hits = stmt
            .query_map(params![filter.video_id], |row| {
                let bytes: Vec<u8> = row.get(4)?;
                Ok(SegmentHit {
                    video_id: row.get(0)?,
                    segment_id: row.get(1)?,
                    start_seconds: row.get(2)?,
                    content: row.get(3)?,
                    score: cosine_similarity(query, &Self::bytes_to_embedding(&bytes)),
                })
            })
            .map_err(unavailable)?
            .collect::<rusqlite::Result<Vec<_>>>()
            .map_err(unavailable)?;

        debug!("Scored {} candidate segments", hits.len());
        Ok(rank_hits(hits, k))
    }

    #[instrument(skip(self))]
    async fn text_search(&self, query: &str, k: usize, filter: &SearchFilter) -> Result<Vec<SegmentHit>> {
        let expression = match match_expression(query) {
            Some(expression) if k > 0 => expression,
            _ => return Ok(Vec::new()),
        };

        let conn = self.lock()?;
        let mut stmt = conn
            .prepare(
                r#"
                SELECT v.video_id, v.segment_id, v.start_seconds, v.content, bm25(segment_text)
                FROM segment_text
                JOIN segment_vectors v ON v.rowid = segment_text.rowid
                WHERE segment_text MATCH ?1 AND (?2 IS NULL OR v.video_id = ?2)
                "#,
            )
            .map_err(unavailable)?;

        // bm25() is lower-is-better; negate so higher scores rank first.
        let hits = stmt
            .query_map(params![expression, filter.video_id], |row| {
                let rank: f64 = row.get(4)?;
                Ok(SegmentHit {
                    video_id: row.get(0)?,
                    segment_id: row.get(1)?,
                    start_seconds: row.get(2)?,
                    content: row.get(3)?,
                    score: -rank as f32,
                })
            })
            .map_err(unavailable)?
            .collect::<rusqlite::Result<Vec<_>>>()
            .map_err(unavailable)?;

        debug!("Matched {} segments by keyword", hits.len());
        Ok(rank_hits(hits, k))
    }

    async fn segment_ids(&self, video_id: &str) -> Result<Vec<String>> {
        let conn = self.lock()?;
        let mut stmt = conn
            .prepare(
                "SELECT segment_id FROM segment_vectors WHERE video_id = ?1 ORDER BY start_seconds, segment_id",
            )
            .map_err(unavailable)?;
        let ids = stmt
            .query_map(params![video_id], |row| row.get(0))
            .map_err(unavailable)?
            .collect::<rusqlite::Result<Vec<String>>>()
            .map_err(unavailable)?;
        Ok(ids)
    }

    async fn delete_segments(&self, video_id: &str, segment_ids: &[String]) -> Result<usize> {
        let conn = self.lock()?;
        let mut deleted = 0;
        for id in segment_ids {
            deleted += conn
                .execute(
                    "DELETE FROM segment_vectors WHERE video_id = ?1 AND segment_id = ?2",
                    params![video_id, id],
                )
                .map_err(unavailable)?;
        }
        Ok(deleted)
    }

    async fn delete_video(&self, video_id: &str) -> Result<usize> {
        let conn = self.lock()?;
        let deleted = conn
            .execute("DELETE FROM segment_vectors WHERE video_id = ?1", params![video_id])
            .map_err(unavailable)?;
        Ok(deleted)
    }

    async fn len(&self) -> Result<usize> {
        let conn = self.lock()?;
        let count: i64 = conn
            .query_row("SELECT COUNT(*) FROM segment_vectors", [], |row| row.get(0))
            .map_err(unavailable)?;
        Ok(count as usize)
    }

    fn name(&self) -> &'static str {
        "sqlite"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::TranscriptSegment;

    fn entry(video_id: &str, segment_id: &str, start: f64, embedding: Vec<f32>) -> IndexEntry {
        IndexEntry::new(
            TranscriptSegment::new(video_id, segment_id, format!("text of {}", segment_id), start, 5.0),
            embedding,
        )
    }

    #[test]
    fn test_embedding_serialization() {
        let embedding = vec![1.0, -2.5, 3.75, 0.0];
        let bytes = SqliteVectorIndex::embedding_to_bytes(&embedding);
        assert_eq!(bytes.len(), 16);
        assert_eq!(SqliteVectorIndex::bytes_to_embedding(&bytes), embedding);
    }

    #[tokio::test]
    async fn test_search_orders_and_filters() {
        let index = SqliteVectorIndex::in_memory().unwrap();
        index
            .index_segments(
                "v1",
                &[
                    entry("v1", "s0", 0.0, vec![1.0, 0.0, 0.0]),
                    entry("v1", "s1", 5.0, vec![0.7, 0.7, 0.0]),
                ],
            )
            .await
            .unwrap();
        index
            .index_segments("v2", &[entry("v2", "s0", 0.0, vec![1.0, 0.1, 0.0])])
            .await
            .unwrap();

        let all = index.search(&[1.0, 0.0, 0.0], 10, &SearchFilter::all()).await.unwrap();
        assert_eq!(all.len(), 3);
        assert_eq!(all[0].key(), ("v1", "s0"));
        assert_eq!(all[1].key(), ("v2", "s0"));

        let scoped = index
            .search(&[1.0, 0.0, 0.0], 10, &SearchFilter::video("v2"))
            .await
            .unwrap();
        assert_eq!(scoped.len(), 1);
        assert_eq!(scoped[0].video_id, "v2");

        let top1 = index.search(&[0.0, 1.0, 0.0], 1, &SearchFilter::all()).await.unwrap();
        assert_eq!(top1[0].key(), ("v1", "s1"));
    }

    #[tokio::test]
    async fn test_reindex_overwrites_and_delete() {
        let index = SqliteVectorIndex::in_memory().unwrap();
        index
            .index_segments("v1", &[entry("v1", "s0", 0.0, vec![1.0, 0.0])])
            .await
            .unwrap();
        index
            .index_segments("v1", &[entry("v1", "s0", 0.0, vec![0.0, 1.0])])
            .await
            .unwrap();
        assert_eq!(index.len().await.unwrap(), 1);

        let hits = index.search(&[0.0, 1.0], 1, &SearchFilter::all()).await.unwrap();
        assert!((hits[0].score - 1.0).abs() < 1e-6);

        index
            .index_segments("v1", &[entry("v1", "s1", 3.0, vec![1.0, 0.0])])
            .await
            .unwrap();
        assert_eq!(index.segment_ids("v1").await.unwrap(), vec!["s0", "s1"]);
        assert_eq!(
            index.delete_segments("v1", &["s1".to_string()]).await.unwrap(),
            1
        );
        assert_eq!(index.delete_video("v1").await.unwrap(), 1);
        assert_eq!(index.len().await.unwrap(), 0);
    }

    #[test]
    fn test_match_expression_quotes_terms() {
        assert_eq!(
            match_expression("What's \"borrowing\"?").as_deref(),
            Some("\"what\" OR \"borrowing\"")
        );
        assert_eq!(match_expression("?!"), None);
    }

    #[tokio::test]
    async fn test_text_search_follows_reindex_and_delete() {
        let index = SqliteVectorIndex::in_memory().unwrap();
        let segment = |id: &str, start: f64, content: &str| {
            IndexEntry::new(TranscriptSegment::new("v1", id, content, start, 5.0), vec![1.0])
        };
        index
            .index_segments(
                "v1",
                &[
                    segment("s0", 0.0, "closures capture their environment"),
                    segment("s1", 5.0, "traits define shared behavior"),
                    segment("s2", 10.0, "closures and traits together"),
                ],
            )
            .await
            .unwrap();

        let hits = index
            .text_search("how do closures capture", 10, &SearchFilter::all())
            .await
            .unwrap();
        assert_eq!(hits[0].segment_id, "s0");
        assert_eq!(hits.len(), 2);
        assert!(hits.iter().all(|h| h.score > 0.0));

        // Re-indexing replaces the searchable text.
        index
            .index_segments("v1", &[segment("s0", 0.0, "lifetimes everywhere")])
            .await
            .unwrap();
        let hits = index
            .text_search("closures", 10, &SearchFilter::all())
            .await
            .unwrap();
        let ids: Vec<_> = hits.iter().map(|h| h.segment_id.as_str()).collect();
        assert_eq!(ids, vec!["s2"]);

        index.delete_video("v1").await.unwrap();
        assert!(index
            .text_search("lifetimes", 10, &SearchFilter::all())
            .await
            .unwrap()
            .is_empty());
        assert!(index
            .text_search("lifetimes", 10, &SearchFilter::video("v2"))
            .await
            .unwrap()
            .is_empty());
    }

    #[tokio::test]
    async fn test_empty_index_returns_no_hits() {
        let index = SqliteVectorIndex::in_memory().unwrap();
        let hits = index.search(&[1.0], 5, &SearchFilter::all()).await.unwrap();
        assert!(hits.is_empty());
    }
}
