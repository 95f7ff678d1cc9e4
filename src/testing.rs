//! Deterministic capability doubles for unit tests.

use crate::embedding::Embedder;
use crate::error::{Result, TubeqaError};
use crate::generation::Generator;
use crate::vector_index::{IndexEntry, MemoryVectorIndex, SearchFilter, SegmentHit, VectorIndex};
use async_trait::async_trait;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;

type Responder = Box<dyn Fn(&str) -> Result<String> + Send + Sync>;

/// Generator that replays scripted outputs, or answers through a closure.
pub struct ScriptedGenerator {
    script: Mutex<VecDeque<Result<String>>>,
    responder: Option<Responder>,
    calls: AtomicUsize,
    prompts: Mutex<Vec<String>>,
}

impl ScriptedGenerator {
    /// Replay `Ok` texts and `Err` failures in order; fails once exhausted.
    pub fn scripted(steps: Vec<std::result::Result<&str, &str>>) -> Self {
        let script = steps
            .into_iter()
            .map(|s| match s {
                Ok(text) => Ok(text.to_string()),
                Err(msg) => Err(TubeqaError::Generation(msg.to_string())),
            })
            .collect();
        Self {
            script: Mutex::new(script),
            responder: None,
            calls: AtomicUsize::new(0),
            prompts: Mutex::new(Vec::new()),
        }
    }

    /// Always return the same text.
    pub fn always(text: &str) -> Self {
        let text = text.to_string();
        Self::responding(move |_| Ok(text.clone()))
    }

    /// Always fail.
    pub fn failing() -> Self {
        Self::responding(|_| Err(TubeqaError::Generation("model offline".to_string())))
    }

    /// Answer each prompt through a closure.
    pub fn responding(f: impl Fn(&str) -> Result<String> + Send + Sync + 'static) -> Self {
        Self {
            script: Mutex::new(VecDeque::new()),
            responder: Some(Box::new(f)),
            calls: AtomicUsize::new(0),
            prompts: Mutex::new(Vec::new()),
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn prompts(&self) -> Vec<String> {
        self.prompts.lock().unwrap().clone()
    }
}

#[async_trait]
impl Generator for ScriptedGenerator {
    async fn generate(&self, _system: &str, prompt: &str) -> Result<String> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.prompts.lock().unwrap().push(prompt.to_string());

        if let Some(responder) = &self.responder {
            return responder(prompt);
        }
        self.script
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| Err(TubeqaError::Generation("script exhausted".to_string())))
    }

    fn model(&self) -> &str {
        "scripted"
    }
}

/// Bag-of-words embedder over a fixed vocabulary.
///
/// Texts sharing vocabulary words get high cosine similarity; texts with no
/// vocabulary words embed to the zero vector and score 0 against everything.
pub struct KeywordEmbedder {
    vocabulary: Vec<String>,
    fail: bool,
    calls: AtomicUsize,
}

impl KeywordEmbedder {
    pub fn new(vocabulary: &[&str]) -> Self {
        Self {
            vocabulary: vocabulary.iter().map(|w| w.to_lowercase()).collect(),
            fail: false,
            calls: AtomicUsize::new(0),
        }
    }

    pub fn failing() -> Self {
        Self {
            vocabulary: vec!["x".to_string()],
            fail: true,
            calls: AtomicUsize::new(0),
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    fn vectorize(&self, text: &str) -> Vec<f32> {
        let mut vector = vec![0.0; self.vocabulary.len()];
        for word in text.split(|c: char| !c.is_alphanumeric()) {
            let word = word.to_lowercase();
            if let Some(i) = self.vocabulary.iter().position(|v| *v == word) {
                vector[i] += 1.0;
            }
        }
        vector
    }
}

#[async_trait]
impl Embedder for KeywordEmbedder {
    async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.fail {
            return Err(TubeqaError::Embedding("embedding service offline".to_string()));
        }
        Ok(self.vectorize(text))
    }

    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        let mut out = Vec::with_capacity(texts.len());
        for text in texts {
            out.push(self.embed(text).await?);
        }
        Ok(out)
    }

    fn dimensions(&self) -> usize {
        self.vocabulary.len()
    }
}

/// In-memory index that injects backend failures.
#[derive(Default)]
pub struct FaultyIndex {
    inner: MemoryVectorIndex,
    failing_searches: AtomicUsize,
    write_limit: Option<usize>,
    searches: AtomicUsize,
}

impl FaultyIndex {
    pub fn new() -> Self {
        Self::default()
    }

    /// The next `n` searches (vector or keyword) fail as unreachable.
    pub fn failing_searches(self, n: usize) -> Self {
        self.failing_searches.store(n, Ordering::SeqCst);
        self
    }

    /// Each write stores only its first `n` entries, then fails.
    pub fn partial_writes(mut self, n: usize) -> Self {
        self.write_limit = Some(n);
        self
    }

    /// Search calls made so far, failed ones included.
    pub fn searches(&self) -> usize {
        self.searches.load(Ordering::SeqCst)
    }

    fn check_search(&self) -> Result<()> {
        self.searches.fetch_add(1, Ordering::SeqCst);
        let failed = self
            .failing_searches
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if failed {
            return Err(TubeqaError::IndexUnavailable("transient".to_string()));
        }
        Ok(())
    }
}

#[async_trait]
impl VectorIndex for FaultyIndex {
    async fn index_segments(&self, video_id: &str, entries: &[IndexEntry]) -> Result<usize> {
        match self.write_limit {
            Some(limit) if limit < entries.len() => {
                self.inner.index_segments(video_id, &entries[..limit]).await?;
                Err(TubeqaError::IndexUnavailable("connection reset mid-batch".to_string()))
            }
            _ => self.inner.index_segments(video_id, entries).await,
        }
    }

    async fn search(&self, query: &[f32], k: usize, filter: &SearchFilter) -> Result<Vec<SegmentHit>> {
        self.check_search()?;
        self.inner.search(query, k, filter).await
    }

    async fn text_search(&self, query: &str, k: usize, filter: &SearchFilter) -> Result<Vec<SegmentHit>> {
        self.check_search()?;
        self.inner.text_search(query, k, filter).await
    }

    async fn segment_ids(&self, video_id: &str) -> Result<Vec<String>> {
        self.inner.segment_ids(video_id).await
    }

    async fn delete_segments(&self, video_id: &str, segment_ids: &[String]) -> Result<usize> {
        self.inner.delete_segments(video_id, segment_ids).await
    }

    async fn delete_video(&self, video_id: &str) -> Result<usize> {
        self.inner.delete_video(video_id).await
    }

    async fn len(&self) -> Result<usize> {
        self.inner.len().await
    }

    fn name(&self) -> &'static str {
        "faulty"
    }
}
