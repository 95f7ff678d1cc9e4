//! The live question-answering path.

use super::{Answer, AnswerGenerator, AnswerStatus};
use crate::error::{Result, TubeqaError};
use crate::retrieval::{RetrievalParams, Retriever};
use crate::rewrite::QueryRewriter;
use crate::store::ChatRecord;
use crate::vector_index::{SearchFilter, SegmentHit};
use serde::Serialize;
use tracing::{info, instrument, warn};

/// RAG engine: rewrite, retrieve, answer.
#[derive(Clone)]
pub struct RagEngine {
    rewriter: QueryRewriter,
    retriever: Retriever,
    answerer: AnswerGenerator,
}

/// Everything the live path produced for one question.
#[derive(Debug, Clone, Serialize)]
pub struct RagResponse {
    pub question: String,
    /// Retrieval queries, original question first.
    pub queries: Vec<String>,
    /// Ranked segments handed to the answer generator.
    pub segments: Vec<SegmentHit>,
    pub answer: Answer,
}

impl RagResponse {
    pub fn status(&self) -> AnswerStatus {
        self.answer.status
    }

    /// Chat history row for this exchange.
    pub fn to_chat_record(&self, video_id: Option<String>) -> ChatRecord {
        ChatRecord::new(video_id, &self.question, &self.answer.text, self.status().as_str())
    }
}

impl RagEngine {
    pub fn new(rewriter: QueryRewriter, retriever: Retriever, answerer: AnswerGenerator) -> Self {
        Self {
            rewriter,
            retriever,
            answerer,
        }
    }

    pub fn rewriter(&self) -> &QueryRewriter {
        &self.rewriter
    }

    pub fn retriever(&self) -> &Retriever {
        &self.retriever
    }

    /// Same engine retrieving with different parameters.
    pub fn with_retrieval_params(&self, params: RetrievalParams) -> Self {
        Self {
            retriever: self.retriever.with_params(params),
            ..self.clone()
        }
    }

    /// Rewrite and retrieve without generating an answer.
    pub async fn search(&self, question: &str, filter: &SearchFilter) -> Result<(Vec<String>, Vec<SegmentHit>)> {
        let queries = self.rewriter.rewrite(question, None).await;
        let segments = self.retriever.retrieve(&queries, filter).await?;
        Ok((queries, segments))
    }

    /// Run the full path, propagating index and generation failures.
    pub async fn try_ask(&self, question: &str, filter: &SearchFilter) -> Result<RagResponse> {
        let (queries, segments) = self.search(question, filter).await?;
        let answer = self.answerer.answer(question, &segments).await?;
        Ok(RagResponse {
            question: question.to_string(),
            queries,
            segments,
            answer,
        })
    }

    /// Answer a question for a user.
    ///
    /// An index that stays unreachable through the retriever's retries yields
    /// a `SearchUnavailable` answer and a model
    /// that fails twice yields a `GenerationFailed` answer; neither carries
    /// made-up content. Other failures (embedding, configuration) propagate.
    #[instrument(skip(self), fields(question = %question))]
    pub async fn ask(&self, question: &str, filter: &SearchFilter) -> Result<RagResponse> {
        info!("Processing question");

        let queries = self.rewriter.rewrite(question, None).await;

        let segments = match self.retriever.retrieve(&queries, filter).await {
            Ok(segments) => segments,
            Err(TubeqaError::IndexUnavailable(reason)) => {
                warn!("Search unavailable: {}", reason);
                return Ok(RagResponse {
                    question: question.to_string(),
                    queries,
                    segments: Vec::new(),
                    answer: Answer::search_unavailable(),
                });
            }
            Err(e) => return Err(e),
        };

        let answer = match self.answerer.answer(question, &segments).await {
            Ok(answer) => answer,
            Err(TubeqaError::Generation(reason)) => {
                warn!("Answer generation failed: {}", reason);
                Answer::generation_failed()
            }
            Err(e) => return Err(e),
        };

        info!("Answered with {} citations", answer.citations.len());

        Ok(RagResponse {
            question: question.to_string(),
            queries,
            segments,
            answer,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{Prompts, RagSettings};
    use crate::embedding::Embedder;
    use crate::retrieval::{MergePolicy, RetryPolicy, SearchMethod};
    use crate::rewrite::RewriteStrategy;
    use crate::store::TranscriptSegment;
    use crate::testing::{FaultyIndex, KeywordEmbedder, ScriptedGenerator};
    use crate::vector_index::{IndexEntry, MemoryVectorIndex, VectorIndex};
    use std::sync::Arc;
    use std::time::Duration;

    async fn populated_index(embedder: &KeywordEmbedder) -> Arc<MemoryVectorIndex> {
        let index = Arc::new(MemoryVectorIndex::new());
        populate(index.as_ref(), embedder).await;
        index
    }

    async fn populate(index: &dyn VectorIndex, embedder: &KeywordEmbedder) {
        let seg = TranscriptSegment::new("vid", "s0", "ownership is about moves", 12.0, 4.0);
        let embedding = embedder.embed(&seg.content).await.unwrap();
        index
            .index_segments("vid", &[IndexEntry::new(seg, embedding)])
            .await
            .unwrap();
    }

    fn engine(index: Arc<dyn VectorIndex>, generator: Arc<ScriptedGenerator>) -> RagEngine {
        let prompts = Arc::new(Prompts::default());
        let embedder = Arc::new(KeywordEmbedder::new(&["ownership", "moves"]));
        RagEngine::new(
            QueryRewriter::new(generator.clone(), prompts.clone(), RewriteStrategy::None, 3),
            Retriever::new(
                index,
                embedder,
                RetrievalParams {
                    top_k: 5,
                    context_size: 5,
                    min_score: 0.0,
                    merge_policy: MergePolicy::Max,
                    search_method: SearchMethod::Embedding,
                },
            )
            .with_retry(RetryPolicy::new(3, Duration::from_millis(1))),
            AnswerGenerator::new(generator, prompts, RagSettings::default()),
        )
    }

    #[tokio::test]
    async fn test_ask_answers_with_citations() {
        let embedder = KeywordEmbedder::new(&["ownership", "moves"]);
        let generator = Arc::new(ScriptedGenerator::always("Values move [1]."));
        let engine = engine(populated_index(&embedder).await, generator);

        let response = engine.ask("what about ownership?", &SearchFilter::all()).await.unwrap();
        assert_eq!(response.status(), AnswerStatus::Answered);
        assert_eq!(response.queries, vec!["what about ownership?"]);
        assert_eq!(response.answer.citations[0].url, "https://youtube.com/watch?v=vid&t=12s");
    }

    #[tokio::test]
    async fn test_ask_without_matches_is_insufficient_context() {
        let embedder = KeywordEmbedder::new(&["ownership", "moves"]);
        let generator = Arc::new(ScriptedGenerator::always("unused"));
        let engine = engine(populated_index(&embedder).await, generator.clone());

        let response = engine.ask("tell me about cooking", &SearchFilter::all()).await.unwrap();
        assert_eq!(response.status(), AnswerStatus::InsufficientContext);
        assert_eq!(generator.calls(), 0);
    }

    #[tokio::test]
    async fn test_index_outage_is_labeled() {
        let generator = Arc::new(ScriptedGenerator::always("unused"));
        let index = Arc::new(FaultyIndex::new().failing_searches(usize::MAX));
        let engine = engine(index.clone(), generator.clone());

        let response = engine.ask("ownership?", &SearchFilter::all()).await.unwrap();
        assert_eq!(response.status(), AnswerStatus::SearchUnavailable);
        assert!(response.answer.citations.is_empty());
        assert_eq!(generator.calls(), 0);
        assert_eq!(index.searches(), 3);

        let err = engine.try_ask("ownership?", &SearchFilter::all()).await.unwrap_err();
        assert!(err.is_index_unavailable());
    }

    #[tokio::test]
    async fn test_flaky_index_still_answers() {
        let embedder = KeywordEmbedder::new(&["ownership", "moves"]);
        let index = Arc::new(FaultyIndex::new().failing_searches(1));
        populate(index.as_ref(), &embedder).await;
        let generator = Arc::new(ScriptedGenerator::always("Values move [1]."));
        let engine = engine(index.clone(), generator);

        let response = engine.ask("what about ownership?", &SearchFilter::all()).await.unwrap();
        assert_eq!(response.status(), AnswerStatus::Answered);
        assert_eq!(response.segments.len(), 1);
        assert_eq!(index.searches(), 2);
    }

    #[tokio::test]
    async fn test_generation_outage_is_labeled() {
        let embedder = KeywordEmbedder::new(&["ownership", "moves"]);
        let generator = Arc::new(ScriptedGenerator::failing());
        let engine = engine(populated_index(&embedder).await, generator);

        let response = engine.ask("ownership?", &SearchFilter::all()).await.unwrap();
        assert_eq!(response.status(), AnswerStatus::GenerationFailed);
        assert!(response.answer.citations.is_empty());
    }
}
