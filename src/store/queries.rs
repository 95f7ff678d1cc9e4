//! Aggregate queries backing the monitoring panels.

use super::{to_db_time, Relevance, SegmentStore};
use crate::error::Result;
use chrono::{DateTime, Utc};
use rusqlite::params;
use serde::Serialize;

/// Count of records carrying one label.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LabelCount {
    pub label: String,
    pub count: usize,
}

/// Mean retrieval quality over a time window.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PerformanceAverage {
    pub runs: usize,
    pub hit_rate: f64,
    pub mrr: f64,
}

/// Everything the monitoring panels show, in one snapshot.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DashboardStats {
    pub relevance: Vec<LabelCount>,
    pub feedback: Vec<LabelCount>,
    pub search_performance: PerformanceAverage,
    pub ground_truth: Vec<VideoCount>,
}

/// Per-video record count.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct VideoCount {
    pub video_id: String,
    pub title: Option<String>,
    pub count: usize,
}

impl SegmentStore {
    /// Judge verdict counts since the given time (all time if `None`).
    ///
    /// All three labels are always present, with zero counts where no record matches.
    pub fn relevance_counts(&self, since: Option<DateTime<Utc>>) -> Result<Vec<LabelCount>> {
        let conn = self.lock()?;
        let since = since.map(|t| to_db_time(&t));

        let mut stmt = conn.prepare(
            r#"
            SELECT relevance, COUNT(*)
            FROM rag_evaluations
            WHERE ?1 IS NULL OR evaluated_at >= ?1
            GROUP BY relevance
            "#,
        )?;
        let rows = stmt
            .query_map(params![since], |row| {
                let label: String = row.get(0)?;
                let count: i64 = row.get(1)?;
                Ok((label, count as usize))
            })?
            .collect::<rusqlite::Result<Vec<_>>>()?;

        Ok(Relevance::ALL
            .iter()
            .map(|r| LabelCount {
                label: r.as_str().to_string(),
                count: rows
                    .iter()
                    .filter(|(label, _)| label == r.as_str())
                    .map(|(_, c)| *c)
                    .sum(),
            })
            .collect())
    }

    /// Feedback label counts, optionally for a single video, most frequent first.
    pub fn feedback_counts(&self, video_id: Option<&str>) -> Result<Vec<LabelCount>> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare(
            r#"
            SELECT label, COUNT(*) AS n
            FROM user_feedback
            WHERE ?1 IS NULL OR video_id = ?1
            GROUP BY label
            ORDER BY n DESC, label
            "#,
        )?;
        let rows = stmt.query_map(params![video_id], |row| {
            let count: i64 = row.get(1)?;
            Ok(LabelCount {
                label: row.get(0)?,
                count: count as usize,
            })
        })?;
        Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
    }

    /// Mean hit rate and MRR over runs evaluated in `[since, until)`.
    ///
    /// An empty window yields zero runs and zero means.
    pub fn search_performance_average(
        &self,
        since: Option<DateTime<Utc>>,
        until: Option<DateTime<Utc>>,
    ) -> Result<PerformanceAverage> {
        let conn = self.lock()?;
        let since = since.map(|t| to_db_time(&t));
        let until = until.map(|t| to_db_time(&t));

        let (runs, hit_rate, mrr): (i64, Option<f64>, Option<f64>) = conn.query_row(
            r#"
            SELECT COUNT(*), AVG(hit_rate), AVG(mrr)
            FROM search_performance
            WHERE (?1 IS NULL OR evaluated_at >= ?1)
              AND (?2 IS NULL OR evaluated_at < ?2)
            "#,
            params![since, until],
            |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?)),
        )?;

        Ok(PerformanceAverage {
            runs: runs as usize,
            hit_rate: hit_rate.unwrap_or(0.0),
            mrr: mrr.unwrap_or(0.0),
        })
    }

    /// Ground-truth question counts per video, largest first.
    pub fn ground_truth_counts_by_video(&self) -> Result<Vec<VideoCount>> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare(
            r#"
            SELECT g.video_id, v.title, COUNT(*) AS n
            FROM ground_truth g
            LEFT JOIN videos v ON v.id = g.video_id
            GROUP BY g.video_id
            ORDER BY n DESC, g.video_id
            "#,
        )?;
        let rows = stmt.query_map([], |row| {
            let count: i64 = row.get(2)?;
            Ok(VideoCount {
                video_id: row.get(0)?,
                title: row.get(1)?,
                count: count as usize,
            })
        })?;
        Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
    }

    /// Dashboard snapshot for records since the given time.
    pub fn dashboard_stats(&self, since: Option<DateTime<Utc>>) -> Result<DashboardStats> {
        Ok(DashboardStats {
            relevance: self.relevance_counts(since)?,
            feedback: self.feedback_counts(None)?,
            search_performance: self.search_performance_average(since, None)?,
            ground_truth: self.ground_truth_counts_by_video()?,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::{
        GroundTruthQuestion, RagEvaluationRecord, SearchPerformanceRecord, UserFeedbackRecord,
        Video,
    };
    use chrono::Duration;

    fn eval(relevance: Relevance, at: DateTime<Utc>) -> RagEvaluationRecord {
        RagEvaluationRecord {
            id: None,
            run_id: "run".to_string(),
            video_id: "v1".to_string(),
            segment_id: "s1".to_string(),
            question: "q".to_string(),
            answer: "a".to_string(),
            relevance,
            explanation: None,
            evaluated_at: at,
        }
    }

    fn perf(hit_rate: f64, mrr: f64, at: DateTime<Utc>) -> SearchPerformanceRecord {
        SearchPerformanceRecord {
            id: None,
            run_id: "run".to_string(),
            video_id: None,
            label: "k=5".to_string(),
            parameters: serde_json::json!({}),
            question_count: 4,
            hit_rate,
            mrr,
            evaluated_at: at,
        }
    }

    #[test]
    fn test_relevance_counts_include_zero_labels() {
        let store = SegmentStore::in_memory().unwrap();
        let now = Utc::now();
        store.record_evaluation(&eval(Relevance::Relevant, now)).unwrap();
        store.record_evaluation(&eval(Relevance::Relevant, now)).unwrap();
        store
            .record_evaluation(&eval(Relevance::NonRelevant, now - Duration::days(10)))
            .unwrap();

        let all = store.relevance_counts(None).unwrap();
        assert_eq!(all.len(), 3);
        assert_eq!(all[0], LabelCount { label: "RELEVANT".to_string(), count: 2 });
        assert_eq!(all[1].count, 0);
        assert_eq!(all[2].count, 1);

        let recent = store.relevance_counts(Some(now - Duration::days(1))).unwrap();
        assert_eq!(recent[2].count, 0);
    }

    #[test]
    fn test_search_performance_average_over_window() {
        let store = SegmentStore::in_memory().unwrap();
        let now = Utc::now();
        store.record_search_performance(&perf(1.0, 0.5, now)).unwrap();
        store.record_search_performance(&perf(0.5, 0.25, now)).unwrap();
        store
            .record_search_performance(&perf(0.0, 0.0, now - Duration::days(30)))
            .unwrap();

        let avg = store
            .search_performance_average(Some(now - Duration::days(1)), None)
            .unwrap();
        assert_eq!(avg.runs, 2);
        assert!((avg.hit_rate - 0.75).abs() < 1e-9);
        assert!((avg.mrr - 0.375).abs() < 1e-9);

        let empty = store
            .search_performance_average(Some(now + Duration::days(1)), None)
            .unwrap();
        assert_eq!(empty, PerformanceAverage { runs: 0, hit_rate: 0.0, mrr: 0.0 });
    }

    #[test]
    fn test_feedback_counts_by_video() {
        let store = SegmentStore::in_memory().unwrap();
        store.upsert_video(&Video::new("v1", "One")).unwrap();
        for label in ["+1", "+1", "-1"] {
            store
                .record_feedback(&UserFeedbackRecord::new(Some("v1".to_string()), "q", "a", label))
                .unwrap();
        }
        store
            .record_feedback(&UserFeedbackRecord::new(None, "q", "a", "-1"))
            .unwrap();

        let v1 = store.feedback_counts(Some("v1")).unwrap();
        assert_eq!(v1[0], LabelCount { label: "+1".to_string(), count: 2 });
        assert_eq!(v1[1].count, 1);

        let all = store.feedback_counts(None).unwrap();
        assert_eq!(all.iter().map(|c| c.count).sum::<usize>(), 4);
    }

    #[test]
    fn test_ground_truth_counts_by_video() {
        let store = SegmentStore::in_memory().unwrap();
        store.upsert_video(&Video::new("v1", "One")).unwrap();
        store
            .add_ground_truth(&[
                GroundTruthQuestion::new("v1", "s0", "What is A?"),
                GroundTruthQuestion::new("v1", "s1", "What is B?"),
                GroundTruthQuestion::new("v2", "s0", "What is C?"),
            ])
            .unwrap();

        let counts = store.ground_truth_counts_by_video().unwrap();
        assert_eq!(counts[0].video_id, "v1");
        assert_eq!(counts[0].title.as_deref(), Some("One"));
        assert_eq!(counts[0].count, 2);
        assert_eq!(counts[1].title, None);
    }

    #[test]
    fn test_dashboard_stats_on_empty_store() {
        let store = SegmentStore::in_memory().unwrap();
        let stats = store.dashboard_stats(None).unwrap();
        assert_eq!(stats.relevance.len(), 3);
        assert!(stats.relevance.iter().all(|c| c.count == 0));
        assert!(stats.feedback.is_empty());
        assert_eq!(stats.search_performance.runs, 0);
        assert!(stats.ground_truth.is_empty());
    }
}
