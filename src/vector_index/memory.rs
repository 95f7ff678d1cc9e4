//! In-memory vector index.
//!
//! Useful for testing and small datasets.

use super::{
    cosine_similarity, keyword_score, keyword_terms, rank_hits, IndexEntry, SearchFilter, SegmentHit,
    VectorIndex,
};
use crate::error::{Result, TubeqaError};
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};

#[derive(Debug, Clone)]
struct StoredSegment {
    start_seconds: f64,
    content: String,
    embedding: Vec<f32>,
}

type Key = (String, String);

/// In-memory vector index.
#[derive(Default)]
pub struct MemoryVectorIndex {
    segments: RwLock<HashMap<Key, StoredSegment>>,
}

impl MemoryVectorIndex {
    /// Create an empty index.
    pub fn new() -> Self {
        Self::default()
    }

    fn read(&self) -> Result<RwLockReadGuard<'_, HashMap<Key, StoredSegment>>> {
        self.segments
            .read()
            .map_err(|e| TubeqaError::IndexUnavailable(format!("Failed to acquire lock: {}", e)))
    }

    fn write(&self) -> Result<RwLockWriteGuard<'_, HashMap<Key, StoredSegment>>> {
        self.segments
            .write()
            .map_err(|e| TubeqaError::IndexUnavailable(format!("Failed to acquire lock: {}", e)))
    }
}

#[async_trait]
impl VectorIndex for MemoryVectorIndex {
    async fn index_segments(&self, video_id: &str, entries: &[IndexEntry]) -> Result<usize> {
        let mut segments = self.write()?;
        for entry in entries {
            segments.insert(
                (video_id.to_string(), entry.segment.segment_id.clone()),
                StoredSegment {
                    start_seconds: entry.segment.start_seconds,
                    content: entry.segment.content.clone(),
                    embedding: entry.embedding.clone(),
                },
            );
        }
        Ok(entries.len())
    }

    async fn search(&self, query: &[f32], k: usize, filter: &SearchFilter) -> Result<Vec<SegmentHit>> {
        let segments = self.read()?;

        let hits: Vec<SegmentHit> = segments
            .iter()
            .filter(|((video_id, _), _)| filter.matches(video_id))
            .map(|((video_id, segment_id), seg)| SegmentHit {
                video_id: video_id.clone(),
                segment_id: segment_id.clone(),
                start_seconds: seg.start_seconds,
                content: seg.content.clone(),
                score: cosine_similarity(query, &seg.embedding),
            })
            .collect();

        Ok(rank_hits(hits, k))
    }

    async fn text_search(&self, query: &str, k: usize, filter: &SearchFilter) -> Result<Vec<SegmentHit>> {
        let terms = keyword_terms(query);
        let segments = self.read()?;

        let hits: Vec<SegmentHit> = segments
            .iter()
            .filter(|((video_id, _), _)| filter.matches(video_id))
            .filter_map(|((video_id, segment_id), seg)| {
                let score = keyword_score(&terms, &seg.content);
                (score > 0.0).then(|| SegmentHit {
                    video_id: video_id.clone(),
                    segment_id: segment_id.clone(),
                    start_seconds: seg.start_seconds,
                    content: seg.content.clone(),
                    score,
                })
            })
            .collect();

        Ok(rank_hits(hits, k))
    }

    async fn segment_ids(&self, video_id: &str) -> Result<Vec<String>> {
        let segments = self.read()?;
        let mut ids: Vec<(f64, String)> = segments
            .iter()
            .filter(|((v, _), _)| v == video_id)
            .map(|((_, id), seg)| (seg.start_seconds, id.clone()))
            .collect();
        ids.sort_by(|a, b| {
            a.0.partial_cmp(&b.0)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| a.1.cmp(&b.1))
        });
        Ok(ids.into_iter().map(|(_, id)| id).collect())
    }

    async fn delete_segments(&self, video_id: &str, segment_ids: &[String]) -> Result<usize> {
        let mut segments = self.write()?;
        let deleted = segment_ids
            .iter()
            .filter(|id| segments.remove(&(video_id.to_string(), (*id).clone())).is_some())
            .count();
        Ok(deleted)
    }

    async fn delete_video(&self, video_id: &str) -> Result<usize> {
        let mut segments = self.write()?;
        let initial_len = segments.len();
        segments.retain(|(v, _), _| v != video_id);
        Ok(initial_len - segments.len())
    }

    async fn len(&self) -> Result<usize> {
        Ok(self.read()?.len())
    }

    fn name(&self) -> &'static str {
        "memory"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::TranscriptSegment;

    #[tokio::test]
    async fn test_memory_vector_index() {
        let index = MemoryVectorIndex::new();

        let entries = vec![
            IndexEntry::new(
                TranscriptSegment::new("video1", "s0", "Hello world", 0.0, 30.0),
                vec![1.0, 0.0, 0.0],
            ),
            IndexEntry::new(
                TranscriptSegment::new("video1", "s1", "Goodbye world", 30.0, 30.0),
                vec![0.0, 1.0, 0.0],
            ),
        ];
        index.index_segments("video1", &entries).await.unwrap();

        assert_eq!(index.len().await.unwrap(), 2);

        let results = index
            .search(&[1.0, 0.0, 0.0], 10, &SearchFilter::all())
            .await
            .unwrap();
        assert_eq!(results.len(), 2);
        assert!(results[0].score > results[1].score);
        assert_eq!(results[0].content, "Hello world");

        assert!(index
            .search(&[1.0, 0.0, 0.0], 10, &SearchFilter::video("other"))
            .await
            .unwrap()
            .is_empty());

        let text = index
            .text_search("goodbye cruel world", 10, &SearchFilter::all())
            .await
            .unwrap();
        assert_eq!(text[0].content, "Goodbye world");
        assert_eq!(text[0].score, 2.0);
        assert_eq!(text.len(), 2);
        assert!(index
            .text_search("nothing here", 10, &SearchFilter::all())
            .await
            .unwrap()
            .is_empty());

        assert_eq!(index.segment_ids("video1").await.unwrap(), vec!["s0", "s1"]);
        assert_eq!(index.delete_segments("video1", &["s0".to_string()]).await.unwrap(), 1);
        assert_eq!(index.delete_video("video1").await.unwrap(), 1);
    }
}
