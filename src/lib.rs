//! tubeqa - Grounded question answering over YouTube transcripts
//!
//! Ask natural-language questions about a set of videos and get answers
//! grounded in their transcripts, with timestamped sources. A built-in
//! evaluation harness measures how well it does.
//!
//! # Overview
//!
//! tubeqa allows you to:
//! - Ingest video metadata and transcript segments into a segment store and
//!   a vector index that never disagree
//! - Ask questions and get cited answers, with optional query rewriting
//! - Generate synthetic ground-truth questions per segment
//! - Measure retrieval quality (hit rate, MRR) and answer relevance
//!   (LLM-as-judge), and sweep retrieval parameters
//!
//! # Architecture
//!
//! - `config` - Settings and prompt templates
//! - `store` - SQLite segment store: videos, segments, ground truth, evaluation records
//! - `vector_index` - Similarity search backends (SQLite, memory, Elasticsearch)
//! - `embedding` / `generation` - Model capabilities (OpenAI, Ollama)
//! - `rewrite` - Query rewriting strategies
//! - `retrieval` - Multi-query retrieval and score merging
//! - `rag` - Context assembly and cited answer generation
//! - `ground_truth` - Synthetic question generation
//! - `evaluation` - Hit rate, MRR, judge and evaluation runs
//! - `pipeline` - Component wiring and ingestion
//!
//! # Example
//!
//! ```rust,no_run
//! use tubeqa::config::Settings;
//! use tubeqa::pipeline::{IngestDocument, Pipeline};
//! use tubeqa::vector_index::SearchFilter;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let pipeline = Pipeline::new(Settings::load()?)?;
//!
//!     let doc = IngestDocument::from_path("transcript.json".as_ref())?;
//!     pipeline.ingest(&doc).await?;
//!
//!     let response = pipeline
//!         .rag_engine()
//!         .ask("What is ownership?", &SearchFilter::all())
//!         .await?;
//!     println!("{}", response.answer.format_for_display());
//!
//!     Ok(())
//! }
//! ```

pub mod cli;
pub mod config;
pub mod embedding;
pub mod error;
pub mod evaluation;
pub mod generation;
pub mod ground_truth;
pub mod openai;
pub mod pipeline;
pub mod rag;
pub mod retrieval;
pub mod rewrite;
pub mod store;
pub mod vector_index;

#[cfg(test)]
mod testing;

pub use error::{Result, TubeqaError};
