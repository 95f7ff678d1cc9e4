//! Multi-query retrieval.
//!
//! Every rewritten query is searched independently (by embedding, by
//! keywords, or both fused); the hit lists are thresholded, merged per
//! (video id, segment id), re-ranked and truncated to the context size.
//! Searches that hit an unreachable index are retried with exponential
//! backoff before the failure is handed to the caller.

use crate::config::RagSettings;
use crate::embedding::Embedder;
use crate::error::{Result, TubeqaError};
use crate::vector_index::{compare_hits, SearchFilter, SegmentHit, VectorIndex};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, instrument, warn};

/// Smoothing constant for reciprocal rank fusion.
pub const RRF_K: f32 = 60.0;

/// How scores of the same segment found by several queries are combined.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, Default, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum MergePolicy {
    /// Keep the best similarity across queries.
    #[default]
    Max,
    /// Sum of `1 / (RRF_K + rank)` across queries.
    ReciprocalRank,
}

impl std::str::FromStr for MergePolicy {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_lowercase().replace('-', "_").as_str() {
            "max" => Ok(MergePolicy::Max),
            "reciprocal_rank" | "rrf" => Ok(MergePolicy::ReciprocalRank),
            _ => Err(format!("Unknown merge policy: {}", s)),
        }
    }
}

impl std::fmt::Display for MergePolicy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            MergePolicy::Max => write!(f, "max"),
            MergePolicy::ReciprocalRank => write!(f, "reciprocal_rank"),
        }
    }
}

/// How a single query is matched against the index.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, Default, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum SearchMethod {
    /// Cosine similarity between query and segment embeddings.
    #[default]
    Embedding,
    /// Keyword relevance over the segment text.
    Text,
    /// Embedding and keyword hits fused by reciprocal rank.
    Hybrid,
}

impl SearchMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            SearchMethod::Embedding => "embedding",
            SearchMethod::Text => "text",
            SearchMethod::Hybrid => "hybrid",
        }
    }

    fn uses_embeddings(self) -> bool {
        !matches!(self, SearchMethod::Text)
    }
}

impl std::str::FromStr for SearchMethod {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "embedding" | "vector" | "knn" => Ok(SearchMethod::Embedding),
            "text" | "keyword" => Ok(SearchMethod::Text),
            "hybrid" => Ok(SearchMethod::Hybrid),
            _ => Err(format!("Unknown search method: {}", s)),
        }
    }
}

impl std::fmt::Display for SearchMethod {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Retrieval parameters for one run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetrievalParams {
    /// Hits requested per query.
    pub top_k: usize,
    /// Segments kept after merging.
    pub context_size: usize,
    /// Hits scoring at or below this are dropped.
    pub min_score: f32,
    pub merge_policy: MergePolicy,
    #[serde(default)]
    pub search_method: SearchMethod,
}

impl From<&crate::config::RetrievalSettings> for RetrievalParams {
    fn from(settings: &crate::config::RetrievalSettings) -> Self {
        Self {
            top_k: settings.top_k,
            context_size: settings.context_size,
            min_score: settings.min_score,
            merge_policy: settings.merge_policy,
            search_method: settings.search_method,
        }
    }
}

/// Retry schedule for searches against an unreachable index.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total tries, the first included.
    pub attempts: u32,
    /// Delay before the first retry; doubled for each one after it.
    pub base_delay: Duration,
}

impl RetryPolicy {
    pub fn new(attempts: u32, base_delay: Duration) -> Self {
        Self {
            attempts: attempts.max(1),
            base_delay,
        }
    }

    /// A single try.
    pub fn none() -> Self {
        Self::new(1, Duration::ZERO)
    }

    /// Delay before retry number `retry` (1-based).
    pub fn delay(&self, retry: u32) -> Duration {
        self.base_delay
            .saturating_mul(2u32.saturating_pow(retry.saturating_sub(1)))
    }
}

impl From<&RagSettings> for RetryPolicy {
    fn from(settings: &RagSettings) -> Self {
        Self::new(
            settings.index_retry_attempts,
            Duration::from_millis(settings.index_retry_base_ms),
        )
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::from(&RagSettings::default())
    }
}

/// Finds the best segments for a set of queries.
#[derive(Clone)]
pub struct Retriever {
    index: Arc<dyn VectorIndex>,
    embedder: Arc<dyn Embedder>,
    params: RetrievalParams,
    retry: RetryPolicy,
}

impl Retriever {
    pub fn new(index: Arc<dyn VectorIndex>, embedder: Arc<dyn Embedder>, params: RetrievalParams) -> Self {
        Self {
            index,
            embedder,
            params,
            retry: RetryPolicy::default(),
        }
    }

    /// Same retriever with a different retry schedule.
    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn retry(&self) -> RetryPolicy {
        self.retry
    }

    /// Same retriever with different parameters.
    pub fn with_params(&self, params: RetrievalParams) -> Self {
        Self {
            params,
            ..self.clone()
        }
    }

    pub fn params(&self) -> &RetrievalParams {
        &self.params
    }

    /// Ranked, deduplicated segments for the queries. An empty list is a valid
    /// result. Embedding failures propagate unchanged; an unreachable index is
    /// retried per the retry policy and then reported as `IndexUnavailable`.
    #[instrument(skip(self, queries), fields(queries = queries.len(), method = %self.params.search_method))]
    pub async fn retrieve(&self, queries: &[String], filter: &SearchFilter) -> Result<Vec<SegmentHit>> {
        let embeddings = if self.params.search_method.uses_embeddings() {
            let embeddings = self.embedder.embed_batch(queries).await?;
            if embeddings.len() != queries.len() {
                return Err(TubeqaError::Embedding(format!(
                    "Expected {} query embeddings, got {}",
                    queries.len(),
                    embeddings.len()
                )));
            }
            embeddings
        } else {
            Vec::new()
        };

        let per_query = self.search_with_retry(queries, &embeddings, filter).await?;

        let mut ranked = merge(per_query, self.params.merge_policy);
        let candidates = ranked.len();
        ranked.sort_by(compare_hits);
        ranked.truncate(self.params.context_size);

        debug!(
            "Merged {} candidates into {} segments",
            candidates,
            ranked.len()
        );
        Ok(ranked)
    }
}

impl Retriever {
    async fn search_with_retry(
        &self,
        queries: &[String],
        embeddings: &[Vec<f32>],
        filter: &SearchFilter,
    ) -> Result<Vec<Vec<SegmentHit>>> {
        let mut attempt = 1;
        loop {
            match self.search_all(queries, embeddings, filter).await {
                Err(TubeqaError::IndexUnavailable(reason)) if attempt < self.retry.attempts => {
                    let delay = self.retry.delay(attempt);
                    warn!(
                        "Index unavailable (attempt {}/{}), retrying in {:?}: {}",
                        attempt, self.retry.attempts, delay, reason
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                result => return result,
            }
        }
    }

    async fn search_all(
        &self,
        queries: &[String],
        embeddings: &[Vec<f32>],
        filter: &SearchFilter,
    ) -> Result<Vec<Vec<SegmentHit>>> {
        let mut per_query = Vec::with_capacity(queries.len());
        for (i, query) in queries.iter().enumerate() {
            let hits = match self.params.search_method {
                SearchMethod::Embedding => self.vector_hits(&embeddings[i], filter).await?,
                SearchMethod::Text => self.text_hits(query, filter).await?,
                SearchMethod::Hybrid => {
                    let vector = self.vector_hits(&embeddings[i], filter).await?;
                    let text = self.text_hits(query, filter).await?;
                    let mut fused = merge(vec![vector, text], MergePolicy::ReciprocalRank);
                    fused.sort_by(compare_hits);
                    fused
                }
            };
            per_query.push(hits);
        }
        Ok(per_query)
    }

    // `min_score` applies to each backend's raw score, before any merging.
    async fn vector_hits(&self, embedding: &[f32], filter: &SearchFilter) -> Result<Vec<SegmentHit>> {
        let hits = self.index.search(embedding, self.params.top_k, filter).await?;
        Ok(self.above_threshold(hits))
    }

    async fn text_hits(&self, query: &str, filter: &SearchFilter) -> Result<Vec<SegmentHit>> {
        let hits = self.index.text_search(query, self.params.top_k, filter).await?;
        Ok(self.above_threshold(hits))
    }

    fn above_threshold(&self, hits: Vec<SegmentHit>) -> Vec<SegmentHit> {
        hits.into_iter()
            .filter(|h| h.score > self.params.min_score)
            .collect()
    }
}

/// Merge hit lists per (video id, segment id).
fn merge(per_query: Vec<Vec<SegmentHit>>, policy: MergePolicy) -> Vec<SegmentHit> {
    let mut merged: HashMap<(String, String), SegmentHit> = HashMap::new();

    for hits in per_query {
        for (rank, hit) in hits.into_iter().enumerate() {
            let contribution = match policy {
                MergePolicy::Max => hit.score,
                MergePolicy::ReciprocalRank => 1.0 / (RRF_K + rank as f32 + 1.0),
            };
            let key = (hit.video_id.clone(), hit.segment_id.clone());
            match merged.get_mut(&key) {
                Some(existing) => match policy {
                    MergePolicy::Max => existing.score = existing.score.max(contribution),
                    MergePolicy::ReciprocalRank => existing.score += contribution,
                },
                None => {
                    merged.insert(
                        key,
                        SegmentHit {
                            score: contribution,
                            ..hit
                        },
                    );
                }
            }
        }
    }

    merged.into_values().collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::TranscriptSegment;
    use crate::testing::{FaultyIndex, KeywordEmbedder};
    use crate::vector_index::{IndexEntry, MemoryVectorIndex};

    const VOCAB: [&str; 4] = ["ownership", "borrowing", "traits", "async"];

    async fn setup() -> (Arc<MemoryVectorIndex>, Arc<KeywordEmbedder>) {
        let embedder = Arc::new(KeywordEmbedder::new(&VOCAB));
        let index = Arc::new(MemoryVectorIndex::new());

        let segments = vec![
            TranscriptSegment::new("v1", "s0", "ownership rules", 0.0, 5.0),
            TranscriptSegment::new("v1", "s1", "borrowing and ownership", 5.0, 5.0),
            TranscriptSegment::new("v1", "s2", "traits everywhere", 10.0, 5.0),
            TranscriptSegment::new("v2", "s0", "async traits", 0.0, 5.0),
        ];
        for seg in segments {
            let embedding = embedder.embed(&seg.content).await.unwrap();
            let video_id = seg.video_id.clone();
            index
                .index_segments(&video_id, &[IndexEntry::new(seg, embedding)])
                .await
                .unwrap();
        }
        (index, embedder)
    }

    fn params(policy: MergePolicy) -> RetrievalParams {
        RetrievalParams {
            top_k: 5,
            context_size: 5,
            min_score: 0.0,
            merge_policy: policy,
            search_method: SearchMethod::Embedding,
        }
    }

    fn method(search_method: SearchMethod) -> RetrievalParams {
        RetrievalParams {
            search_method,
            ..params(MergePolicy::Max)
        }
    }

    #[tokio::test]
    async fn test_zero_scores_are_dropped() {
        let (index, embedder) = setup().await;
        let retriever = Retriever::new(index, embedder, params(MergePolicy::Max));

        let hits = retriever
            .retrieve(&["tell me about ownership".to_string()], &SearchFilter::all())
            .await
            .unwrap();
        let ids: Vec<_> = hits.iter().map(|h| h.key()).collect();
        assert_eq!(ids, vec![("v1", "s0"), ("v1", "s1")]);

        let none = retriever
            .retrieve(&["completely unrelated".to_string()], &SearchFilter::all())
            .await
            .unwrap();
        assert!(none.is_empty());
    }

    #[tokio::test]
    async fn test_max_merge_across_queries_dedups() {
        let (index, embedder) = setup().await;
        let retriever = Retriever::new(index, embedder, params(MergePolicy::Max));

        let hits = retriever
            .retrieve(
                &["ownership".to_string(), "borrowing".to_string()],
                &SearchFilter::video("v1"),
            )
            .await
            .unwrap();

        assert_eq!(hits.len(), 2);
        assert_eq!(hits[0].key(), ("v1", "s0"));
        assert!((hits[0].score - 1.0).abs() < 1e-6);
        assert_eq!(hits[1].key(), ("v1", "s1"));
    }

    #[tokio::test]
    async fn test_reciprocal_rank_rewards_agreement() {
        let (index, embedder) = setup().await;
        let retriever = Retriever::new(index, embedder, params(MergePolicy::ReciprocalRank));

        let hits = retriever
            .retrieve(
                &["ownership".to_string(), "borrowing".to_string()],
                &SearchFilter::video("v1"),
            )
            .await
            .unwrap();

        // s1 is found by both queries; s0 only by the first.
        assert_eq!(hits[0].key(), ("v1", "s1"));
    }

    #[tokio::test]
    async fn test_context_size_truncates() {
        let (index, embedder) = setup().await;
        let mut p = params(MergePolicy::Max);
        p.context_size = 1;
        let retriever = Retriever::new(index, embedder, p);

        let hits = retriever
            .retrieve(&["traits".to_string()], &SearchFilter::all())
            .await
            .unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].key(), ("v1", "s2"));
    }

    #[tokio::test]
    async fn test_embedding_failure_propagates() {
        let (index, _) = setup().await;
        let retriever = Retriever::new(
            index,
            Arc::new(KeywordEmbedder::failing()),
            params(MergePolicy::Max),
        );
        assert!(retriever
            .retrieve(&["ownership".to_string()], &SearchFilter::all())
            .await
            .is_err());
    }

    #[tokio::test]
    async fn test_text_search_needs_no_embeddings() {
        let (index, embedder) = setup().await;
        let retriever = Retriever::new(index, embedder.clone(), method(SearchMethod::Text));

        let hits = retriever
            .retrieve(&["ownership and borrowing".to_string()], &SearchFilter::all())
            .await
            .unwrap();
        let ids: Vec<_> = hits.iter().map(|h| h.key()).collect();
        assert_eq!(ids, vec![("v1", "s1"), ("v1", "s0")]);
        assert_eq!(embedder.calls(), 0);
    }

    #[tokio::test]
    async fn test_hybrid_adds_keyword_only_matches() {
        let (index, embedder) = setup().await;
        let query = vec!["everywhere ownership".to_string()];

        let embedding_only = Retriever::new(index.clone(), embedder.clone(), method(SearchMethod::Embedding))
            .retrieve(&query, &SearchFilter::all())
            .await
            .unwrap();
        assert!(embedding_only.iter().all(|h| h.key() != ("v1", "s2")));

        let hybrid = Retriever::new(index, embedder, method(SearchMethod::Hybrid))
            .retrieve(&query, &SearchFilter::all())
            .await
            .unwrap();
        assert_eq!(hybrid[0].key(), ("v1", "s0"));
        assert!(hybrid.iter().any(|h| h.key() == ("v1", "s2")));
        // Fused scores are reciprocal ranks, not similarities.
        assert!((hybrid[0].score - 2.0 / (RRF_K + 1.0)).abs() < 1e-6);
    }

    #[test]
    fn test_search_method_parsing() {
        assert_eq!("hybrid".parse::<SearchMethod>().unwrap(), SearchMethod::Hybrid);
        assert_eq!("keyword".parse::<SearchMethod>().unwrap(), SearchMethod::Text);
        assert_eq!(SearchMethod::default(), SearchMethod::Embedding);
        assert!("fuzzy".parse::<SearchMethod>().is_err());
    }

    #[test]
    fn test_retry_delay_doubles() {
        let retry = RetryPolicy::new(4, Duration::from_millis(100));
        assert_eq!(retry.delay(1), Duration::from_millis(100));
        assert_eq!(retry.delay(2), Duration::from_millis(200));
        assert_eq!(retry.delay(3), Duration::from_millis(400));
        assert_eq!(RetryPolicy::new(0, Duration::ZERO).attempts, 1);
    }

    async fn faulty_setup(failures: usize) -> (Arc<FaultyIndex>, Arc<KeywordEmbedder>) {
        let embedder = Arc::new(KeywordEmbedder::new(&VOCAB));
        let index = Arc::new(FaultyIndex::new().failing_searches(failures));
        let seg = TranscriptSegment::new("v1", "s0", "ownership rules", 0.0, 5.0);
        let embedding = embedder.embed(&seg.content).await.unwrap();
        index
            .index_segments("v1", &[IndexEntry::new(seg, embedding)])
            .await
            .unwrap();
        (index, embedder)
    }

    #[tokio::test]
    async fn test_transient_outage_is_retried() {
        let (index, embedder) = faulty_setup(2).await;
        let retriever = Retriever::new(index.clone(), embedder, params(MergePolicy::Max))
            .with_retry(RetryPolicy::new(3, Duration::from_millis(1)));

        let hits = retriever
            .retrieve(&["ownership".to_string()], &SearchFilter::all())
            .await
            .unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(index.searches(), 3);
    }

    #[tokio::test]
    async fn test_persistent_outage_surfaces_after_retries() {
        let (index, embedder) = faulty_setup(10).await;
        let retriever = Retriever::new(index.clone(), embedder, params(MergePolicy::Max))
            .with_retry(RetryPolicy::new(2, Duration::from_millis(1)));

        let err = retriever
            .retrieve(&["ownership".to_string()], &SearchFilter::all())
            .await
            .unwrap_err();
        assert!(err.is_index_unavailable());
        assert_eq!(index.searches(), 2);
    }
}
