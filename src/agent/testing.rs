//! Deterministic stand-ins for the model, embedder and index.

use super::conversation::{Message, ToolCallRequest};
use super::events::AgentEvent;
use super::model::{ChatModel, ModelChunk, ModelStream};
use super::tools::{ToolRegistry, ToolSchema};
use crate::config::{ChunkingSettings, SearchSettings};
use crate::embedding::Embedder;
use crate::error::{Result, SyllabiError};
use crate::index::{DocumentChunk, DocumentIndex, IndexStats, IndexedFile, SearchHit};
use crate::ingest::Ingestor;
use async_trait::async_trait;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::mpsc::UnboundedReceiver;
use uuid::Uuid;

/// One scripted model response.
#[derive(Debug, Clone)]
pub enum Reply {
    Chunks(Vec<ModelChunk>),
    Failure(String),
    /// A stream that never produces anything.
    Stalled,
}

/// Chat model that plays back canned replies.
pub struct ScriptedModel {
    replies: Mutex<VecDeque<Reply>>,
    repeat: Option<Reply>,
    calls: AtomicUsize,
    seen: Mutex<Vec<Vec<Message>>>,
}

impl ScriptedModel {
    pub fn new(replies: Vec<Reply>) -> Self {
        Self {
            replies: Mutex::new(replies.into()),
            repeat: None,
            calls: AtomicUsize::new(0),
            seen: Mutex::new(Vec::new()),
        }
    }

    /// Answer every request with the same reply.
    pub fn repeating(reply: Reply) -> Self {
        Self {
            repeat: Some(reply),
            ..Self::new(Vec::new())
        }
    }

    pub fn text(parts: &[&str]) -> Reply {
        Reply::Chunks(
            parts
                .iter()
                .map(|p| ModelChunk::TextDelta(p.to_string()))
                .collect(),
        )
    }

    pub fn tool_calls(calls: Vec<ToolCallRequest>) -> Reply {
        Reply::Chunks(vec![ModelChunk::ToolCalls(calls)])
    }

    pub fn failure(message: &str) -> Reply {
        Reply::Failure(message.to_string())
    }

    pub fn stalled() -> Reply {
        Reply::Stalled
    }

    /// Number of model requests made so far.
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    /// Message histories sent with each request.
    pub fn seen(&self) -> Vec<Vec<Message>> {
        self.seen.lock().unwrap().clone()
    }
}

#[async_trait]
impl ChatModel for ScriptedModel {
    async fn stream(&self, messages: &[Message], _tools: &[ToolSchema]) -> Result<ModelStream> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.seen.lock().unwrap().push(messages.to_vec());

        let reply = self
            .replies
            .lock()
            .unwrap()
            .pop_front()
            .or_else(|| self.repeat.clone())
            .unwrap_or_else(|| Reply::Failure("script exhausted".to_string()));

        match reply {
            Reply::Chunks(chunks) => Ok(Box::pin(futures::stream::iter(
                chunks.into_iter().map(Ok),
            ))),
            Reply::Failure(message) => Err(SyllabiError::OpenAI(message)),
            Reply::Stalled => Ok(Box::pin(futures::stream::pending())),
        }
    }

    fn name(&self) -> &str {
        "scripted"
    }
}

/// Bag-of-words embedder: texts sharing words land close together.
pub struct KeywordEmbedder {
    dimensions: usize,
}

impl Default for KeywordEmbedder {
    fn default() -> Self {
        Self { dimensions: 256 }
    }
}

impl KeywordEmbedder {
    fn vector(&self, text: &str) -> Vec<f32> {
        let mut vector = vec![0.0; self.dimensions];
        for word in text
            .split(|c: char| !c.is_alphanumeric())
            .filter(|w| !w.is_empty())
        {
            // FNV-1a
            let hash = word
                .to_lowercase()
                .bytes()
                .fold(0xcbf29ce484222325u64, |h, b| {
                    (h ^ b as u64).wrapping_mul(0x100000001b3)
                });
            vector[(hash % self.dimensions as u64) as usize] += 1.0;
        }
        vector
    }
}

#[async_trait]
impl Embedder for KeywordEmbedder {
    async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        Ok(self.vector(text))
    }

    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        Ok(texts.iter().map(|t| self.vector(t)).collect())
    }

    fn dimensions(&self) -> usize {
        self.dimensions
    }
}

/// Embedder that drops an event receiver the first time it is used,
/// simulating a caller that disconnects while a tool is running.
pub struct ClosingEmbedder {
    inner: KeywordEmbedder,
    receiver: Mutex<Option<UnboundedReceiver<AgentEvent>>>,
}

impl ClosingEmbedder {
    pub fn new(receiver: UnboundedReceiver<AgentEvent>) -> Self {
        Self {
            inner: KeywordEmbedder::default(),
            receiver: Mutex::new(Some(receiver)),
        }
    }
}

#[async_trait]
impl Embedder for ClosingEmbedder {
    async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        drop(self.receiver.lock().unwrap().take());
        self.inner.embed(text).await
    }

    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        drop(self.receiver.lock().unwrap().take());
        self.inner.embed_batch(texts).await
    }

    fn dimensions(&self) -> usize {
        self.inner.dimensions()
    }
}

/// Embedder that sleeps before answering queries containing a keyword and
/// records the order in which embeddings complete.
pub struct DelayedEmbedder {
    inner: KeywordEmbedder,
    delays: Vec<(String, Duration)>,
    completed: Mutex<Vec<String>>,
}

impl DelayedEmbedder {
    pub fn new(delays: &[(&str, Duration)]) -> Self {
        Self {
            inner: KeywordEmbedder::default(),
            delays: delays
                .iter()
                .map(|(keyword, delay)| (keyword.to_string(), *delay))
                .collect(),
            completed: Mutex::new(Vec::new()),
        }
    }

    /// Texts in the order their embeddings finished.
    pub fn completed(&self) -> Vec<String> {
        self.completed.lock().unwrap().clone()
    }
}

#[async_trait]
impl Embedder for DelayedEmbedder {
    async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        if let Some((_, delay)) = self.delays.iter().find(|(k, _)| text.contains(k.as_str())) {
            tokio::time::sleep(*delay).await;
        }
        self.completed.lock().unwrap().push(text.to_string());
        self.inner.embed(text).await
    }

    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        self.inner.embed_batch(texts).await
    }

    fn dimensions(&self) -> usize {
        self.inner.dimensions()
    }
}

/// Index whose every operation fails.
pub struct FailingIndex;

fn unavailable<T>() -> Result<T> {
    Err(SyllabiError::Index("index unavailable".to_string()))
}

#[async_trait]
impl DocumentIndex for FailingIndex {
    fn backend(&self) -> &'static str {
        "failing"
    }

    async fn insert(&self, _chunk: &DocumentChunk) -> Result<Uuid> {
        unavailable()
    }

    async fn insert_batch(&self, _chunks: &[DocumentChunk]) -> Result<usize> {
        unavailable()
    }

    async fn search(&self, _query_embedding: &[f32], _k: usize) -> Result<Vec<SearchHit>> {
        unavailable()
    }

    async fn stats(&self) -> Result<IndexStats> {
        unavailable()
    }

    async fn list_files(&self) -> Result<Vec<IndexedFile>> {
        unavailable()
    }

    async fn get_by_source(&self, _source: &str) -> Result<Vec<DocumentChunk>> {
        unavailable()
    }

    async fn replace_source(&self, _source: &str, _chunks: &[DocumentChunk]) -> Result<(usize, usize)> {
        unavailable()
    }
}

/// Tool registry over the given index with default settings.
pub fn registry(index: Arc<dyn DocumentIndex>, embedder: Arc<dyn Embedder>) -> ToolRegistry {
    let ingestor = Arc::new(Ingestor::new(
        index.clone(),
        embedder.clone(),
        &ChunkingSettings::default(),
    ));
    ToolRegistry::new(index, embedder, ingestor, SearchSettings::default())
}

/// Collect events until every sender is gone.
pub async fn drain(rx: &mut UnboundedReceiver<AgentEvent>) -> Vec<AgentEvent> {
    let mut events = Vec::new();
    while let Some(event) = rx.recv().await {
        events.push(event);
    }
    events
}
