//! Pipeline wiring for tubeqa.
//!
//! Builds every component from one [`Settings`] value and owns the
//! ingestion path, which keeps the segment store and the vector index in
//! step.

use crate::config::{Prompts, Settings};
use crate::embedding::{create_embedder, Embedder};
use crate::error::{Result, TubeqaError};
use crate::evaluation::{EvaluationHarness, Judge};
use crate::generation::{create_generator, create_judge_generator, Generator};
use crate::ground_truth::GroundTruthGenerator;
use crate::rag::{AnswerGenerator, RagEngine, RagResponse};
use crate::retrieval::{RetrievalParams, Retriever, RetryPolicy};
use crate::rewrite::QueryRewriter;
use crate::store::{SegmentStore, TranscriptSegment, Video};
use crate::vector_index::{create_index, IndexEntry, SearchFilter, VectorIndex};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::Path;
use std::sync::Arc;
use tracing::{info, instrument, warn};

/// One video and its transcript segments, as accepted by `tubeqa ingest`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IngestDocument {
    pub video: Video,
    pub segments: Vec<TranscriptSegment>,
}

impl IngestDocument {
    /// Parse a document, filling segment video ids left blank.
    pub fn from_json(json: &str) -> Result<Self> {
        let mut doc: IngestDocument = serde_json::from_str(json)?;
        for seg in &mut doc.segments {
            if seg.video_id.is_empty() {
                seg.video_id = doc.video.id.clone();
            }
        }
        Ok(doc)
    }

    pub fn from_path(path: &Path) -> Result<Self> {
        Self::from_json(&std::fs::read_to_string(path)?)
    }
}

/// Result of ingesting one video.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct IngestReport {
    pub video_id: String,
    pub title: String,
    /// Segments newly written to the store.
    pub segments_stored: usize,
    /// Segments embedded and written to the index.
    pub segments_indexed: usize,
    /// Segments already present in both store and index.
    pub segments_skipped: usize,
}

/// Store/index agreement for one video.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ConsistencyReport {
    pub video_id: String,
    pub stored: usize,
    pub indexed: usize,
    /// In the store but not the index.
    pub missing_from_index: Vec<String>,
    /// In the index but not the store.
    pub orphaned_in_index: Vec<String>,
}

impl ConsistencyReport {
    pub fn is_consistent(&self) -> bool {
        self.missing_from_index.is_empty() && self.orphaned_in_index.is_empty()
    }
}

/// A live answer and the chat history row it was recorded under.
#[derive(Debug, Clone, Serialize)]
pub struct ChatResponse {
    /// `None` when the exchange could not be recorded.
    pub chat_id: Option<i64>,
    #[serde(flatten)]
    pub response: RagResponse,
}

/// The assembled tubeqa components.
pub struct Pipeline {
    settings: Settings,
    prompts: Arc<Prompts>,
    store: Arc<SegmentStore>,
    index: Arc<dyn VectorIndex>,
    embedder: Arc<dyn Embedder>,
    generator: Arc<dyn Generator>,
    judge_generator: Arc<dyn Generator>,
}

impl Pipeline {
    /// Build every component from the settings.
    pub fn new(settings: Settings) -> Result<Self> {
        let store = Arc::new(SegmentStore::open(&settings.store_path())?);
        let index = create_index(&settings)?;
        let embedder = create_embedder(&settings)?;
        let generator = create_generator(&settings)?;
        let judge_generator = create_judge_generator(&settings)?;

        info!(
            "Pipeline ready (index: {}, generator: {}, judge: {})",
            index.name(),
            generator.model(),
            judge_generator.model()
        );

        Self::with_components(settings, store, index, embedder, generator, judge_generator)
    }

    /// Create a pipeline with custom components.
    pub fn with_components(
        settings: Settings,
        store: Arc<SegmentStore>,
        index: Arc<dyn VectorIndex>,
        embedder: Arc<dyn Embedder>,
        generator: Arc<dyn Generator>,
        judge_generator: Arc<dyn Generator>,
    ) -> Result<Self> {
        let prompts = Arc::new(Prompts::load(
            settings.prompts.custom_dir.as_deref(),
            Some(&settings.prompts.variables),
        )?);

        Ok(Self {
            settings,
            prompts,
            store,
            index,
            embedder,
            generator,
            judge_generator,
        })
    }

    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    pub fn store(&self) -> Arc<SegmentStore> {
        self.store.clone()
    }

    pub fn index(&self) -> Arc<dyn VectorIndex> {
        self.index.clone()
    }

    /// The live question-answering engine.
    pub fn rag_engine(&self) -> RagEngine {
        let retrieval = &self.settings.retrieval;
        RagEngine::new(
            QueryRewriter::new(
                self.generator.clone(),
                self.prompts.clone(),
                retrieval.rewrite_strategy,
                retrieval.max_rewrites,
            ),
            Retriever::new(
                self.index.clone(),
                self.embedder.clone(),
                RetrievalParams::from(retrieval),
            )
            .with_retry(RetryPolicy::from(&self.settings.rag)),
            AnswerGenerator::new(
                self.generator.clone(),
                self.prompts.clone(),
                self.settings.rag.clone(),
            ),
        )
    }

    pub fn ground_truth_generator(&self) -> GroundTruthGenerator {
        GroundTruthGenerator::new(
            self.generator.clone(),
            self.prompts.clone(),
            self.settings.ground_truth.questions_per_segment,
            self.settings.ground_truth.max_concurrent,
        )
        .with_max_attempts(self.settings.ground_truth.max_attempts)
    }

    pub fn evaluation_harness(&self) -> EvaluationHarness {
        let judge = Judge::new(
            self.judge_generator.clone(),
            self.prompts.clone(),
            self.settings.evaluation.judge_parse_failure,
        );
        EvaluationHarness::new(
            self.store.clone(),
            self.rag_engine(),
            judge,
            self.settings.evaluation.clone(),
        )
    }

    /// Answer a question and append the exchange to the chat history.
    ///
    /// A failed history write is logged and leaves `chat_id` empty; the
    /// answer is still returned.
    pub async fn ask(&self, engine: &RagEngine, question: &str, video_id: Option<&str>) -> Result<ChatResponse> {
        let filter = video_id.map(SearchFilter::video).unwrap_or_default();
        let response = engine.ask(question, &filter).await?;

        let chat_id = match self
            .store
            .record_chat(&response.to_chat_record(video_id.map(String::from)))
        {
            Ok(id) => Some(id),
            Err(e) => {
                warn!("Failed to record chat history: {}", e);
                None
            }
        };

        Ok(ChatResponse { chat_id, response })
    }

    /// Ingest one video and its segments.
    ///
    /// The segment batch is validated against the store before anything is
    /// embedded. Segments are indexed before they are stored; if either the
    /// index write or the store write fails, the entries this call may have
    /// added to the index are removed again, so a failed ingestion never
    /// leaves the two diverged.
    #[instrument(skip(self, doc), fields(video_id = %doc.video.id, segments = doc.segments.len()))]
    pub async fn ingest(&self, doc: &IngestDocument) -> Result<IngestReport> {
        let video_id = doc.video.id.as_str();

        self.store.upsert_video(&doc.video)?;
        self.store.check_segments(video_id, &doc.segments)?;

        let stored: HashSet<String> = self.store.segment_ids(video_id)?.into_iter().collect();
        let indexed: HashSet<String> = self.index.segment_ids(video_id).await?.into_iter().collect();

        let pending: Vec<&TranscriptSegment> = doc
            .segments
            .iter()
            .filter(|s| !(stored.contains(&s.segment_id) && indexed.contains(&s.segment_id)))
            .collect();

        let mut report = IngestReport {
            video_id: video_id.to_string(),
            title: doc.video.title.clone(),
            segments_skipped: doc.segments.len() - pending.len(),
            ..IngestReport::default()
        };

        let added: Vec<String> = pending
            .iter()
            .map(|s| s.segment_id.clone())
            .filter(|id| !indexed.contains(id))
            .collect();

        if !pending.is_empty() {
            info!("Embedding {} segments", pending.len());
            let texts: Vec<String> = pending.iter().map(|s| s.content.clone()).collect();
            let embeddings = self.embedder.embed_batch(&texts).await?;
            if embeddings.len() != pending.len() {
                return Err(TubeqaError::Embedding(format!(
                    "Expected {} embeddings, got {}",
                    pending.len(),
                    embeddings.len()
                )));
            }

            let entries: Vec<IndexEntry> = pending
                .iter()
                .zip(embeddings)
                .map(|(seg, embedding)| IndexEntry::new((*seg).clone(), embedding))
                .collect();
            match self.index.index_segments(video_id, &entries).await {
                Ok(count) => report.segments_indexed = count,
                Err(e) => {
                    warn!("Index write failed: {}", e);
                    self.remove_from_index(video_id, &added).await;
                    return Err(e);
                }
            }
        }

        match self.store.insert_segments(video_id, &doc.segments) {
            Ok(count) => report.segments_stored = count,
            Err(e) => {
                warn!("Store write failed: {}", e);
                self.remove_from_index(video_id, &added).await;
                return Err(e);
            }
        }

        info!(
            "Ingested {}: {} stored, {} indexed, {} unchanged",
            video_id, report.segments_stored, report.segments_indexed, report.segments_skipped
        );
        Ok(report)
    }

    /// Best-effort removal of index entries written by a failed ingestion.
    async fn remove_from_index(&self, video_id: &str, segment_ids: &[String]) {
        if segment_ids.is_empty() {
            return;
        }
        warn!("Removing {} index entries", segment_ids.len());
        if let Err(rollback) = self.index.delete_segments(video_id, segment_ids).await {
            warn!("Index rollback failed: {}", rollback);
        }
    }

    /// Compare the store's and the index's segment ids for a video.
    pub async fn verify_consistency(&self, video_id: &str) -> Result<ConsistencyReport> {
        let stored = self.store.segment_ids(video_id)?;
        let indexed = self.index.segment_ids(video_id).await?;

        let stored_set: HashSet<&String> = stored.iter().collect();
        let indexed_set: HashSet<&String> = indexed.iter().collect();

        let mut orphaned: Vec<String> = indexed
            .iter()
            .filter(|id| !stored_set.contains(id))
            .cloned()
            .collect();
        orphaned.sort();

        Ok(ConsistencyReport {
            video_id: video_id.to_string(),
            stored: stored.len(),
            indexed: indexed.len(),
            missing_from_index: stored
                .iter()
                .filter(|id| !indexed_set.contains(id))
                .cloned()
                .collect(),
            orphaned_in_index: orphaned,
        })
    }

    /// Bring the index back in line with the store for a video: embed
    /// missing segments and drop orphaned entries. Returns the state found
    /// before repairing.
    #[instrument(skip(self))]
    pub async fn repair(&self, video_id: &str) -> Result<ConsistencyReport> {
        let report = self.verify_consistency(video_id).await?;
        if report.is_consistent() {
            return Ok(report);
        }

        if !report.missing_from_index.is_empty() {
            let missing: HashSet<&String> = report.missing_from_index.iter().collect();
            let segments: Vec<TranscriptSegment> = self
                .store
                .segments_for_video(video_id)?
                .into_iter()
                .filter(|s| missing.contains(&s.segment_id))
                .collect();
            let texts: Vec<String> = segments.iter().map(|s| s.content.clone()).collect();
            let embeddings = self.embedder.embed_batch(&texts).await?;
            let entries: Vec<IndexEntry> = segments
                .into_iter()
                .zip(embeddings)
                .map(|(seg, embedding)| IndexEntry::new(seg, embedding))
                .collect();
            self.index.index_segments(video_id, &entries).await?;
        }

        if !report.orphaned_in_index.is_empty() {
            self.index
                .delete_segments(video_id, &report.orphaned_in_index)
                .await?;
        }

        info!(
            "Repaired {}: {} re-indexed, {} removed",
            video_id,
            report.missing_from_index.len(),
            report.orphaned_in_index.len()
        );
        Ok(report)
    }
}
