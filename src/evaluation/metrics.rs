//! Retrieval quality metrics.
//!
//! A rank is the 1-based position of a question's source segment in the
//! ranked results, `None` when the segment was not retrieved.

use crate::vector_index::SegmentHit;
use serde::{Deserialize, Serialize};

/// Aggregate retrieval quality over one batch.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct RetrievalMetrics {
    pub question_count: usize,
    pub hit_rate: f64,
    pub mrr: f64,
}

impl RetrievalMetrics {
    pub fn from_ranks(ranks: &[Option<usize>]) -> Self {
        Self {
            question_count: ranks.len(),
            hit_rate: hit_rate(ranks),
            mrr: mrr(ranks),
        }
    }
}

/// Fraction of questions whose source segment was retrieved.
pub fn hit_rate(ranks: &[Option<usize>]) -> f64 {
    if ranks.is_empty() {
        return 0.0;
    }
    let found = ranks.iter().filter(|r| r.is_some()).count();
    found as f64 / ranks.len() as f64
}

/// Mean of `1 / rank`, counting misses as 0.
pub fn mrr(ranks: &[Option<usize>]) -> f64 {
    if ranks.is_empty() {
        return 0.0;
    }
    let total: f64 = ranks
        .iter()
        .map(|r| match r {
            Some(rank) if *rank > 0 => 1.0 / *rank as f64,
            _ => 0.0,
        })
        .sum();
    total / ranks.len() as f64
}

/// 1-based position of (video id, segment id) in ranked hits.
pub fn rank_of(hits: &[SegmentHit], video_id: &str, segment_id: &str) -> Option<usize> {
    hits.iter()
        .position(|h| h.video_id == video_id && h.segment_id == segment_id)
        .map(|i| i + 1)
}
