//! Batch evaluation runs over ground-truth questions.

use super::judge::Judge;
use super::metrics::{rank_of, RetrievalMetrics};
use crate::config::EvaluationSettings;
use crate::error::{Result, TubeqaError};
use crate::rag::RagEngine;
use crate::retrieval::{RetrievalParams, Retriever, SearchMethod};
use crate::rewrite::{QueryRewriter, RewriteStrategy};
use crate::store::{GroundTruthQuestion, RagEvaluationRecord, Relevance, SearchPerformanceRecord, SegmentStore};
use crate::vector_index::SearchFilter;
use chrono::Utc;
use futures::stream::{self, StreamExt};
use indicatif::{ProgressBar, ProgressStyle};
use serde::Serialize;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::{debug, info, instrument, warn};
use uuid::Uuid;

/// Shared flag that stops a run between work units.
#[derive(Debug, Clone, Default)]
pub struct CancellationFlag(Arc<AtomicBool>);

impl CancellationFlag {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }

    fn check(&self) -> Result<()> {
        if self.is_cancelled() {
            Err(TubeqaError::Cancelled("evaluation run cancelled".to_string()))
        } else {
            Ok(())
        }
    }
}

/// Retrieval configuration evaluated by one run.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RetrievalConfig {
    pub rewrite_strategy: RewriteStrategy,
    #[serde(flatten)]
    pub params: RetrievalParams,
}

impl RetrievalConfig {
    pub fn label(&self) -> String {
        format!(
            "k={} rewrite={} search={} merge={}",
            self.params.context_size,
            self.rewrite_strategy,
            self.params.search_method,
            self.params.merge_policy
        )
    }
}

/// Outcome of an answer-quality run.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct AnswerRunReport {
    pub run_id: String,
    pub relevant: usize,
    pub partly_relevant: usize,
    pub non_relevant: usize,
    /// Items dropped because the judge output was unparseable.
    pub skipped: usize,
    /// Items whose answer or verdict could not be generated.
    pub failed: usize,
}

impl AnswerRunReport {
    /// Number of records written.
    pub fn judged(&self) -> usize {
        self.relevant + self.partly_relevant + self.non_relevant
    }

    fn count(&mut self, relevance: Relevance) {
        match relevance {
            Relevance::Relevant => self.relevant += 1,
            Relevance::PartlyRelevant => self.partly_relevant += 1,
            Relevance::NonRelevant => self.non_relevant += 1,
        }
    }
}

/// Every configuration of a sweep and the winner.
#[derive(Debug, Clone, Serialize)]
pub struct SweepResult {
    pub records: Vec<SearchPerformanceRecord>,
    /// Highest MRR; ties go to the higher hit rate, then the earlier configuration.
    pub best: Option<SearchPerformanceRecord>,
}

enum AnswerOutcome {
    Judged(Relevance),
    Skipped,
    Failed,
}

/// Runs ground-truth questions through the live path and records the results.
pub struct EvaluationHarness {
    store: Arc<SegmentStore>,
    engine: RagEngine,
    judge: Judge,
    settings: EvaluationSettings,
    show_progress: bool,
}

impl EvaluationHarness {
    pub fn new(store: Arc<SegmentStore>, engine: RagEngine, judge: Judge, settings: EvaluationSettings) -> Self {
        Self {
            store,
            engine,
            judge,
            settings,
            show_progress: false,
        }
    }

    /// Draw a progress bar on stderr while a batch runs.
    pub fn with_progress(mut self, show: bool) -> Self {
        self.show_progress = show;
        self
    }

    /// The configuration the live path currently uses.
    pub fn current_config(&self) -> RetrievalConfig {
        RetrievalConfig {
            rewrite_strategy: self.engine.rewriter().strategy(),
            params: self.engine.retriever().params().clone(),
        }
    }

    /// Measure hit rate and MRR for one retrieval configuration.
    ///
    /// One [`SearchPerformanceRecord`] is written after the whole batch has
    /// been ranked. Index failures and cancellation abort the run without a
    /// record.
    #[instrument(skip(self, questions, cancel), fields(questions = questions.len(), label = %config.label()))]
    pub async fn evaluate_retrieval(
        &self,
        questions: &[GroundTruthQuestion],
        config: &RetrievalConfig,
        scope: Option<&str>,
        cancel: &CancellationFlag,
    ) -> Result<SearchPerformanceRecord> {
        let rewriter = self.engine.rewriter().with_strategy(config.rewrite_strategy);
        let retriever = self.engine.retriever().with_params(config.params.clone());
        let pb = self.progress_bar(questions.len(), "Retrieval");

        let mut units = stream::iter(questions)
            .map(|q| self.rank_question(q, &rewriter, &retriever, cancel))
            .buffer_unordered(self.settings.max_concurrent.max(1));

        let mut ranks = Vec::with_capacity(questions.len());
        while let Some(result) = units.next().await {
            pb.inc(1);
            match result {
                Ok(rank) => ranks.push(rank),
                Err(e) => {
                    pb.finish_and_clear();
                    return Err(e);
                }
            }
        }
        pb.finish_and_clear();
        cancel.check()?;

        let metrics = RetrievalMetrics::from_ranks(&ranks);
        let mut record = SearchPerformanceRecord {
            id: None,
            run_id: Uuid::new_v4().to_string(),
            video_id: scope.map(String::from),
            label: config.label(),
            parameters: serde_json::to_value(config)?,
            question_count: metrics.question_count,
            hit_rate: metrics.hit_rate,
            mrr: metrics.mrr,
            evaluated_at: Utc::now(),
        };
        record.id = Some(self.store.record_search_performance(&record)?);

        info!(
            "Retrieval run {}: hit rate {:.3}, MRR {:.3} over {} questions",
            record.label, record.hit_rate, record.mrr, record.question_count
        );
        Ok(record)
    }

    async fn rank_question(
        &self,
        question: &GroundTruthQuestion,
        rewriter: &QueryRewriter,
        retriever: &Retriever,
        cancel: &CancellationFlag,
    ) -> Result<Option<usize>> {
        cancel.check()?;

        let queries = rewriter.rewrite(&question.question, None).await;
        let hits = retriever.retrieve(&queries, &self.filter_for(question)).await?;
        let rank = rank_of(&hits, &question.video_id, &question.segment_id);

        debug!("{:?} -> rank {:?}", question.question, rank);
        Ok(rank)
    }

    /// Answer every question and have the judge classify each answer.
    ///
    /// Each verdict is persisted as soon as it is known, so a cancelled or
    /// aborted run keeps what it already wrote. Items whose answer or verdict
    /// fails to generate are counted as failed and the run continues; an
    /// unreachable index aborts it.
    #[instrument(skip(self, questions, cancel), fields(questions = questions.len()))]
    pub async fn evaluate_answers(
        &self,
        questions: &[GroundTruthQuestion],
        cancel: &CancellationFlag,
    ) -> Result<AnswerRunReport> {
        let mut report = AnswerRunReport {
            run_id: Uuid::new_v4().to_string(),
            ..AnswerRunReport::default()
        };
        let run_id = report.run_id.clone();
        let pb = self.progress_bar(questions.len(), "Judging");

        let mut units = stream::iter(questions)
            .map(|q| self.judge_question(&run_id, q, cancel))
            .buffer_unordered(self.settings.max_concurrent.max(1));

        while let Some(result) = units.next().await {
            pb.inc(1);
            match result {
                Ok(AnswerOutcome::Judged(relevance)) => report.count(relevance),
                Ok(AnswerOutcome::Skipped) => report.skipped += 1,
                Ok(AnswerOutcome::Failed) => report.failed += 1,
                Err(e) => {
                    pb.finish_and_clear();
                    return Err(e);
                }
            }
        }
        pb.finish_and_clear();
        cancel.check()?;

        info!(
            "Answer run {}: {} relevant, {} partly, {} non-relevant ({} skipped, {} failed)",
            report.run_id,
            report.relevant,
            report.partly_relevant,
            report.non_relevant,
            report.skipped,
            report.failed
        );
        Ok(report)
    }

    async fn judge_question(
        &self,
        run_id: &str,
        question: &GroundTruthQuestion,
        cancel: &CancellationFlag,
    ) -> Result<AnswerOutcome> {
        cancel.check()?;

        let response = match self.engine.try_ask(&question.question, &self.filter_for(question)).await {
            Ok(response) => response,
            Err(TubeqaError::Generation(reason)) => {
                warn!("No answer for {:?}: {}", question.question, reason);
                return Ok(AnswerOutcome::Failed);
            }
            Err(e) => return Err(e),
        };

        let reference = self
            .store
            .get_segment(&question.video_id, &question.segment_id)?
            .map(|s| s.content)
            .unwrap_or_default();

        let verdict = match self
            .judge
            .judge(&question.question, &reference, &response.answer.text)
            .await
        {
            Ok(Some(verdict)) => verdict,
            Ok(None) => return Ok(AnswerOutcome::Skipped),
            Err(TubeqaError::Generation(reason)) => {
                warn!("No verdict for {:?}: {}", question.question, reason);
                return Ok(AnswerOutcome::Failed);
            }
            Err(e) => return Err(e),
        };

        let record = RagEvaluationRecord {
            id: None,
            run_id: run_id.to_string(),
            video_id: question.video_id.clone(),
            segment_id: question.segment_id.clone(),
            question: question.question.clone(),
            answer: response.answer.text,
            relevance: verdict.relevance,
            explanation: verdict.explanation,
            evaluated_at: Utc::now(),
        };
        self.store.record_evaluation(&record)?;

        Ok(AnswerOutcome::Judged(verdict.relevance))
    }

    /// Evaluate retrieval for every `k` × rewrite strategy × search method.
    ///
    /// `k` sets both the hits per query and the segments kept; merge policy
    /// and score threshold come from the live configuration, as does the
    /// search method when `methods` is empty.
    pub async fn sweep(
        &self,
        questions: &[GroundTruthQuestion],
        k_values: &[usize],
        strategies: &[RewriteStrategy],
        methods: &[SearchMethod],
        scope: Option<&str>,
        cancel: &CancellationFlag,
    ) -> Result<SweepResult> {
        if k_values.contains(&0) {
            return Err(TubeqaError::InvalidInput("sweep k values must be at least 1".to_string()));
        }

        let base = self.engine.retriever().params().clone();
        let methods = if methods.is_empty() {
            vec![base.search_method]
        } else {
            methods.to_vec()
        };
        let mut records = Vec::with_capacity(k_values.len() * strategies.len() * methods.len());

        for &k in k_values {
            for &strategy in strategies {
                for &search_method in &methods {
                    let config = RetrievalConfig {
                        rewrite_strategy: strategy,
                        params: RetrievalParams {
                            top_k: k,
                            context_size: k,
                            search_method,
                            ..base.clone()
                        },
                    };
                    records.push(self.evaluate_retrieval(questions, &config, scope, cancel).await?);
                }
            }
        }

        let best = best_record(&records).cloned();
        if let Some(best) = &best {
            info!("Best configuration: {} (MRR {:.3})", best.label, best.mrr);
        }
        Ok(SweepResult { records, best })
    }

    fn filter_for(&self, question: &GroundTruthQuestion) -> SearchFilter {
        if self.settings.scope_to_video {
            SearchFilter::video(question.video_id.clone())
        } else {
            SearchFilter::all()
        }
    }

    fn progress_bar(&self, len: usize, label: &str) -> ProgressBar {
        if !self.show_progress {
            return ProgressBar::hidden();
        }
        let pb = ProgressBar::new(len as u64);
        if let Ok(style) =
            ProgressStyle::default_bar().template("  {spinner:.green} {msg:<10} [{bar:30.cyan/blue}] {pos}/{len}")
        {
            pb.set_style(style.progress_chars("█▓░"));
        }
        pb.set_message(label.to_string());
        pb
    }
}

fn best_record(records: &[SearchPerformanceRecord]) -> Option<&SearchPerformanceRecord> {
    records.iter().fold(None, |best: Option<&SearchPerformanceRecord>, r| match best {
        Some(b) if r.mrr < b.mrr || (r.mrr == b.mrr && r.hit_rate <= b.hit_rate) => Some(b),
        _ => Some(r),
    })
}
