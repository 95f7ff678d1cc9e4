//! HTTP API server for the chat front-end and monitoring dashboards.
//!
//! Provides the live ask/search path, feedback capture, and read-only
//! aggregate queries over the evaluation records.

use crate::cli::preflight::{self, Operation};
use crate::cli::Output;
use crate::config::Settings;
use crate::error::TubeqaError;
use crate::pipeline::Pipeline;
use crate::rag::RagEngine;
use crate::retrieval::{RetrievalParams, SearchMethod};
use crate::store::{UserFeedbackRecord, Video};
use crate::vector_index::SearchFilter;
use axum::{
    extract::{Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use chrono::{Duration, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};
use tracing::warn;

/// Shared application state.
struct AppState {
    pipeline: Pipeline,
    engine: RagEngine,
}

/// Run the HTTP API server.
pub async fn run_serve(host: &str, port: u16, settings: Settings) -> anyhow::Result<()> {
    if let Err(e) = preflight::check(&settings, Operation::Ask) {
        Output::error(&format!("{}", e));
        return Err(e.into());
    }

    let pipeline = Pipeline::new(settings)?;
    let engine = pipeline.rag_engine();
    let state = Arc::new(AppState { pipeline, engine });

    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    let app = Router::new()
        .route("/health", get(health))
        .route("/ask", post(ask))
        .route("/search", post(search))
        .route("/feedback", post(feedback))
        .route("/videos", get(list_videos))
        .route("/stats", get(stats))
        .route("/stats/relevance", get(relevance_stats))
        .route("/stats/search-performance", get(search_performance_stats))
        .route("/stats/feedback", get(feedback_stats))
        .layer(cors)
        .with_state(state);

    let addr = format!("{}:{}", host, port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;

    Output::header("tubeqa API Server");
    println!();
    Output::success(&format!("Listening on http://{}", addr));
    println!();
    println!("Endpoints:");
    Output::kv("Health", "GET  /health");
    Output::kv("Ask (RAG)", "POST /ask");
    Output::kv("Search", "POST /search");
    Output::kv("Feedback", "POST /feedback");
    Output::kv("List Videos", "GET  /videos");
    Output::kv("Dashboard", "GET  /stats, /stats/relevance, /stats/search-performance, /stats/feedback");
    println!();
    Output::info("Press Ctrl+C to stop the server.");

    axum::serve(listener, app).await?;

    Ok(())
}

// === Request/Response Types ===

#[derive(Deserialize)]
struct AskRequest {
    question: String,
    #[serde(default)]
    video_id: Option<String>,
    #[serde(default)]
    search_method: Option<SearchMethod>,
}

#[derive(Deserialize)]
struct SearchRequest {
    query: String,
    #[serde(default)]
    video_id: Option<String>,
    #[serde(default)]
    limit: Option<usize>,
    #[serde(default)]
    search_method: Option<SearchMethod>,
}

#[derive(Serialize)]
struct SearchResult {
    video_id: String,
    segment_id: String,
    content: String,
    start_seconds: f64,
    score: f32,
    url: String,
}

#[derive(Serialize)]
struct SearchResponse {
    queries: Vec<String>,
    results: Vec<SearchResult>,
}

#[derive(Deserialize)]
struct FeedbackRequest {
    query: String,
    response: String,
    label: String,
    #[serde(default)]
    video_id: Option<String>,
    /// Id returned by `/ask`.
    #[serde(default)]
    chat_id: Option<i64>,
}

#[derive(Deserialize)]
struct WindowQuery {
    /// Only records from the last N days.
    #[serde(default)]
    days: Option<i64>,
}

#[derive(Deserialize)]
struct FeedbackQuery {
    #[serde(default)]
    video_id: Option<String>,
}

#[derive(Serialize)]
struct ErrorResponse {
    error: String,
}

impl WindowQuery {
    fn since(&self) -> Option<chrono::DateTime<Utc>> {
        self.days.map(|d| Utc::now() - Duration::days(d.max(0)))
    }
}

fn status_for(e: &TubeqaError) -> StatusCode {
    match e {
        TubeqaError::InvalidInput(_) => StatusCode::BAD_REQUEST,
        TubeqaError::VideoNotFound(_) => StatusCode::NOT_FOUND,
        TubeqaError::IndexUnavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
        TubeqaError::Generation(_) | TubeqaError::Embedding(_) => StatusCode::BAD_GATEWAY,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

fn error_response(e: TubeqaError) -> Response {
    warn!("Request failed: {}", e);
    (
        status_for(&e),
        Json(ErrorResponse {
            error: e.to_string(),
        }),
    )
        .into_response()
}

fn filter_for(video_id: Option<String>) -> SearchFilter {
    video_id.map(SearchFilter::video).unwrap_or_default()
}

// === Handlers ===

async fn health() -> impl IntoResponse {
    Json(serde_json::json!({ "status": "ok" }))
}

async fn ask(State(state): State<Arc<AppState>>, Json(req): Json<AskRequest>) -> Response {
    if req.question.trim().is_empty() {
        return error_response(TubeqaError::InvalidInput("question is empty".to_string()));
    }

    let engine = match req.search_method {
        Some(search_method) => state.engine.with_retrieval_params(RetrievalParams {
            search_method,
            ..state.engine.retriever().params().clone()
        }),
        None => state.engine.clone(),
    };

    match state.pipeline.ask(&engine, &req.question, req.video_id.as_deref()).await {
        Ok(chat) => Json(chat).into_response(),
        Err(e) => error_response(e),
    }
}

async fn search(State(state): State<Arc<AppState>>, Json(req): Json<SearchRequest>) -> Response {
    let mut params = state.engine.retriever().params().clone();
    if let Some(limit) = req.limit {
        params.top_k = params.top_k.max(limit);
        params.context_size = limit.max(1);
    }
    if let Some(search_method) = req.search_method {
        params.search_method = search_method;
    }
    let retriever = state.engine.retriever().with_params(params);

    let queries = state.engine.rewriter().rewrite(&req.query, None).await;
    match retriever.retrieve(&queries, &filter_for(req.video_id)).await {
        Ok(hits) => Json(SearchResponse {
            queries,
            results: hits
                .into_iter()
                .map(|h| SearchResult {
                    url: Video::url_at(&h.video_id, h.start_seconds),
                    video_id: h.video_id,
                    segment_id: h.segment_id,
                    content: h.content,
                    start_seconds: h.start_seconds,
                    score: h.score,
                })
                .collect(),
        })
        .into_response(),
        Err(e) => error_response(e),
    }
}

async fn feedback(State(state): State<Arc<AppState>>, Json(req): Json<FeedbackRequest>) -> Response {
    let record = UserFeedbackRecord::new(req.video_id, req.query, req.response, req.label).for_chat(req.chat_id);
    match state.pipeline.store().record_feedback(&record) {
        Ok(id) => (StatusCode::CREATED, Json(serde_json::json!({ "id": id }))).into_response(),
        Err(e) => error_response(e),
    }
}

async fn list_videos(State(state): State<Arc<AppState>>) -> Response {
    match state.pipeline.store().list_videos() {
        Ok(videos) => Json(serde_json::json!({ "total": videos.len(), "videos": videos })).into_response(),
        Err(e) => error_response(e),
    }
}

async fn stats(State(state): State<Arc<AppState>>, Query(window): Query<WindowQuery>) -> Response {
    match state.pipeline.store().dashboard_stats(window.since()) {
        Ok(stats) => Json(stats).into_response(),
        Err(e) => error_response(e),
    }
}

async fn relevance_stats(State(state): State<Arc<AppState>>, Query(window): Query<WindowQuery>) -> Response {
    match state.pipeline.store().relevance_counts(window.since()) {
        Ok(counts) => Json(counts).into_response(),
        Err(e) => error_response(e),
    }
}

async fn search_performance_stats(
    State(state): State<Arc<AppState>>,
    Query(window): Query<WindowQuery>,
) -> Response {
    let store = state.pipeline.store();
    let average = match store.search_performance_average(window.since(), None) {
        Ok(average) => average,
        Err(e) => return error_response(e),
    };
    match store.search_performance_history(20) {
        Ok(recent) => Json(serde_json::json!({ "average": average, "recent": recent })).into_response(),
        Err(e) => error_response(e),
    }
}

async fn feedback_stats(State(state): State<Arc<AppState>>, Query(q): Query<FeedbackQuery>) -> Response {
    match state.pipeline.store().feedback_counts(q.video_id.as_deref()) {
        Ok(counts) => Json(counts).into_response(),
        Err(e) => error_response(e),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_status_mapping() {
        assert_eq!(
            status_for(&TubeqaError::IndexUnavailable("down".to_string())),
            StatusCode::SERVICE_UNAVAILABLE
        );
        assert_eq!(status_for(&TubeqaError::VideoNotFound("v".to_string())), StatusCode::NOT_FOUND);
        assert_eq!(status_for(&TubeqaError::InvalidInput("x".to_string())), StatusCode::BAD_REQUEST);
        assert_eq!(
            status_for(&TubeqaError::Store("poisoned".to_string())),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }

    #[test]
    fn test_requests_accept_optional_fields() {
        let ask: AskRequest =
            serde_json::from_str(r#"{"question": "why?", "search_method": "hybrid"}"#).unwrap();
        assert_eq!(ask.search_method, Some(SearchMethod::Hybrid));
        assert!(ask.video_id.is_none());

        let feedback: FeedbackRequest =
            serde_json::from_str(r#"{"query": "q", "response": "r", "label": "+1", "chat_id": 7}"#).unwrap();
        assert_eq!(feedback.chat_id, Some(7));

        let search: SearchRequest = serde_json::from_str(r#"{"query": "q"}"#).unwrap();
        assert!(search.search_method.is_none() && search.limit.is_none());
    }

    #[test]
    fn test_window_since() {
        assert!(WindowQuery { days: None }.since().is_none());
        let since = WindowQuery { days: Some(7) }.since().unwrap();
        assert!(Utc::now() - since >= Duration::days(7));
    }
}
