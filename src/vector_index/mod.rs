//! Vector index abstraction.
//!
//! Similarity and keyword search over embedded transcript segments, keyed by
//! (video id, segment id) so that every hit joins back to the segment store.

mod elasticsearch;
mod memory;
mod sqlite;

pub use elasticsearch::ElasticsearchIndex;
pub use memory::MemoryVectorIndex;
pub use sqlite::SqliteVectorIndex;

use crate::config::{IndexProvider, Settings};
use crate::error::Result;
use crate::store::TranscriptSegment;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::sync::Arc;
use std::time::Duration;

/// A segment together with its embedding, ready to be indexed.
#[derive(Debug, Clone)]
pub struct IndexEntry {
    pub segment: TranscriptSegment,
    pub embedding: Vec<f32>,
}

impl IndexEntry {
    pub fn new(segment: TranscriptSegment, embedding: Vec<f32>) -> Self {
        Self { segment, embedding }
    }
}

/// A search hit.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SegmentHit {
    pub video_id: String,
    pub segment_id: String,
    pub start_seconds: f64,
    pub content: String,
    /// Cosine similarity or keyword relevance, depending on the search
    /// (higher is better).
    pub score: f32,
}

impl SegmentHit {
    /// The (video id, segment id) join key.
    pub fn key(&self) -> (&str, &str) {
        (&self.video_id, &self.segment_id)
    }
}

/// Restricts a search before scoring.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SearchFilter {
    pub video_id: Option<String>,
}

impl SearchFilter {
    /// Search across all videos.
    pub fn all() -> Self {
        Self::default()
    }

    /// Search within a single video.
    pub fn video(video_id: impl Into<String>) -> Self {
        Self {
            video_id: Some(video_id.into()),
        }
    }

    pub(crate) fn matches(&self, video_id: &str) -> bool {
        self.video_id.as_deref().map_or(true, |v| v == video_id)
    }
}

/// Trait for vector index implementations.
///
/// A backend that cannot be reached returns [`TubeqaError::IndexUnavailable`];
/// a search with no matches returns an empty list.
///
/// [`TubeqaError::IndexUnavailable`]: crate::error::TubeqaError::IndexUnavailable
#[async_trait]
pub trait VectorIndex: Send + Sync {
    /// Write entries for a video. Re-indexing an existing key overwrites it.
    async fn index_segments(&self, video_id: &str, entries: &[IndexEntry]) -> Result<usize>;

    /// Up to `k` hits ordered by descending similarity, then lower start time,
    /// then segment id.
    async fn search(&self, query: &[f32], k: usize, filter: &SearchFilter) -> Result<Vec<SegmentHit>>;

    /// Up to `k` keyword hits for free text, same ordering as [`search`].
    /// Segments sharing no term with the query are not returned.
    ///
    /// [`search`]: VectorIndex::search
    async fn text_search(&self, query: &str, k: usize, filter: &SearchFilter) -> Result<Vec<SegmentHit>>;

    /// Indexed segment ids of a video.
    async fn segment_ids(&self, video_id: &str) -> Result<Vec<String>>;

    /// Remove specific segments of a video.
    async fn delete_segments(&self, video_id: &str, segment_ids: &[String]) -> Result<usize>;

    /// Remove every segment of a video.
    async fn delete_video(&self, video_id: &str) -> Result<usize>;

    /// Total number of indexed segments.
    async fn len(&self) -> Result<usize>;

    /// Backend name for display.
    fn name(&self) -> &'static str;
}

/// Create the vector index selected by the settings.
pub fn create_index(settings: &Settings) -> Result<Arc<dyn VectorIndex>> {
    let index: Arc<dyn VectorIndex> = match settings.vector_index.provider {
        IndexProvider::Sqlite => Arc::new(SqliteVectorIndex::open(&settings.vector_index_path())?),
        IndexProvider::Memory => Arc::new(MemoryVectorIndex::new()),
        IndexProvider::Elasticsearch => Arc::new(ElasticsearchIndex::new(
            &settings.vector_index.elasticsearch_url,
            &settings.vector_index.index_name,
            settings.embedding.dimensions as usize,
            Duration::from_secs(settings.vector_index.timeout_secs),
        )?),
    };
    Ok(index)
}

/// Total order used for every ranked segment list.
pub fn compare_hits(a: &SegmentHit, b: &SegmentHit) -> Ordering {
    b.score
        .partial_cmp(&a.score)
        .unwrap_or(Ordering::Equal)
        .then_with(|| {
            a.start_seconds
                .partial_cmp(&b.start_seconds)
                .unwrap_or(Ordering::Equal)
        })
        .then_with(|| a.segment_id.cmp(&b.segment_id))
        .then_with(|| a.video_id.cmp(&b.video_id))
}

/// Sort hits and keep the best `k`.
pub(crate) fn rank_hits(mut hits: Vec<SegmentHit>, k: usize) -> Vec<SegmentHit> {
    hits.sort_by(compare_hits);
    hits.truncate(k);
    hits
}

/// Lowercased, deduplicated search terms of a text.
pub(crate) fn keyword_terms(text: &str) -> Vec<String> {
    let mut terms: Vec<String> = Vec::new();
    for word in text.split(|c: char| !c.is_alphanumeric()) {
        let word = word.to_lowercase();
        if word.chars().count() >= 2 && !terms.contains(&word) {
            terms.push(word);
        }
    }
    terms
}

/// Number of query terms present in the content.
pub(crate) fn keyword_score(terms: &[String], content: &str) -> f32 {
    let words = keyword_terms(content);
    terms.iter().filter(|t| words.contains(t)).count() as f32
}

/// Compute cosine similarity between two vectors.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }

    let dot_product: f32 = a.iter().zip(b.iter()).map(|(x, y)| x * y).sum();
    let norm_a: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let norm_b: f32 = b.iter().map(|x| x * x).sum::<f32>().sqrt();

    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }

    dot_product / (norm_a * norm_b)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn hit(segment_id: &str, start: f64, score: f32) -> SegmentHit {
        SegmentHit {
            video_id: "v".to_string(),
            segment_id: segment_id.to_string(),
            start_seconds: start,
            content: String::new(),
            score,
        }
    }

    #[test]
    fn test_cosine_similarity() {
        let a = vec![1.0, 0.0, 0.0];
        assert!((cosine_similarity(&a, &[1.0, 0.0, 0.0]) - 1.0).abs() < 0.001);
        assert!(cosine_similarity(&a, &[0.0, 1.0, 0.0]).abs() < 0.001);
        assert!((cosine_similarity(&a, &[-1.0, 0.0, 0.0]) + 1.0).abs() < 0.001);
        assert_eq!(cosine_similarity(&a, &[1.0, 0.0]), 0.0);
    }

    #[test]
    fn test_ties_break_on_start_then_segment_id() {
        let ranked = rank_hits(
            vec![
                hit("b", 10.0, 0.5),
                hit("a", 10.0, 0.5),
                hit("c", 2.0, 0.5),
                hit("d", 50.0, 0.9),
            ],
            10,
        );
        let ids: Vec<_> = ranked.iter().map(|h| h.segment_id.as_str()).collect();
        assert_eq!(ids, vec!["d", "c", "a", "b"]);
    }

    #[test]
    fn test_keyword_terms_and_score() {
        let terms = keyword_terms("What's a Trait? a trait!");
        assert_eq!(terms, vec!["what", "trait"]);
        assert_eq!(keyword_score(&terms, "Traits and the trait object"), 1.0);
        assert_eq!(keyword_score(&terms, "what is a trait"), 2.0);
        assert_eq!(keyword_score(&[], "anything"), 0.0);
    }

    #[test]
    fn test_filter_matches() {
        assert!(SearchFilter::all().matches("x"));
        assert!(SearchFilter::video("x").matches("x"));
        assert!(!SearchFilter::video("x").matches("y"));
    }
}
