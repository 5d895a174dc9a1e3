//! Document index abstraction.
//!
//! Stores syllabus chunks with their embeddings and answers nearest-neighbour
//! queries. Backends share the ranking rule in [`rank`]: smallest cosine
//! distance first, ties broken by insertion order.

mod memory;
mod sqlite;

pub use memory::MemoryIndex;
pub use sqlite::SqliteIndex;

use crate::error::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use uuid::Uuid;

/// A chunk of an uploaded document.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DocumentChunk {
    /// Unique chunk ID.
    pub id: Uuid,
    /// Source file this chunk was cut from.
    pub source: String,
    /// Text content of this chunk.
    pub content: String,
    /// Embedding vector.
    pub embedding: Vec<f32>,
    /// Ordinal of this chunk within its source.
    pub position: u32,
    /// Byte offset of the chunk start within its source.
    pub offset: usize,
    /// When this chunk was indexed.
    pub indexed_at: DateTime<Utc>,
}

impl DocumentChunk {
    /// Create a new chunk with a fresh ID.
    pub fn new(
        source: String,
        content: String,
        embedding: Vec<f32>,
        position: u32,
        offset: usize,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            source,
            content,
            embedding,
            position,
            offset,
            indexed_at: Utc::now(),
        }
    }

    /// File name portion of the source path.
    pub fn filename(&self) -> &str {
        std::path::Path::new(&self.source)
            .file_name()
            .and_then(|n| n.to_str())
            .unwrap_or(&self.source)
    }
}

/// A search hit.
#[derive(Debug, Clone)]
pub struct SearchHit {
    /// The matched chunk.
    pub chunk: DocumentChunk,
    /// Cosine similarity (higher is better).
    pub score: f32,
    /// Cosine distance, `1 - score` (lower is better).
    pub distance: f32,
}

/// Counts reported by [`DocumentIndex::stats`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct IndexStats {
    /// Number of indexed chunks.
    pub chunk_count: usize,
    /// Number of distinct source files.
    pub file_count: usize,
}

/// Summary information about an indexed file.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IndexedFile {
    /// Source path.
    pub source: String,
    /// Number of indexed chunks.
    pub chunk_count: u32,
    /// Total characters across the file's chunks.
    pub characters: u64,
    /// When the file was (last) indexed.
    pub indexed_at: DateTime<Utc>,
}

/// Trait for document index implementations.
///
/// Implementations must be safe to share between concurrent agent loops.
/// An insert is visible to every search that starts after it returns.
#[async_trait]
pub trait DocumentIndex: Send + Sync {
    /// Short backend name for stats output.
    fn backend(&self) -> &'static str;

    /// Store a chunk and return its ID. Re-inserting an existing ID replaces it.
    async fn insert(&self, chunk: &DocumentChunk) -> Result<Uuid>;

    /// Store several chunks, returning how many were written.
    async fn insert_batch(&self, chunks: &[DocumentChunk]) -> Result<usize>;

    /// The `k` chunks closest to `query_embedding`.
    async fn search(&self, query_embedding: &[f32], k: usize) -> Result<Vec<SearchHit>>;

    /// Chunk and distinct-file counts.
    async fn stats(&self) -> Result<IndexStats>;

    /// Per-file summaries, most recently indexed first.
    async fn list_files(&self) -> Result<Vec<IndexedFile>>;

    /// All chunks of a source in position order.
    async fn get_by_source(&self, source: &str) -> Result<Vec<DocumentChunk>>;

    /// Swap every chunk of `source` for `chunks` as one step, returning
    /// `(removed, inserted)`.
    ///
    /// Searches see either the old chunks or the new ones, never neither.
    /// On error the old chunks stay in place.
    async fn replace_source(&self, source: &str, chunks: &[DocumentChunk]) -> Result<(usize, usize)>;

    /// Flush pending state before the process exits.
    async fn close(&self) -> Result<()> {
        Ok(())
    }
}

/// Compute cosine similarity between two vectors.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }

    let dot_product: f32 = a.iter().zip(b.iter()).map(|(x, y)| x * y).sum();
    let norm_a: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let norm_b: f32 = b.iter().map(|x| x * x).sum::<f32>().sqrt();

    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }

    dot_product / (norm_a * norm_b)
}

/// Rank candidates by distance to the query and keep the best `k`.
///
/// `candidates` carry their insertion sequence number; equal distances keep
/// the earlier insertion first.
pub(crate) fn rank<I>(candidates: I, query_embedding: &[f32], k: usize) -> Vec<SearchHit>
where
    I: IntoIterator<Item = (u64, DocumentChunk)>,
{
    if k == 0 {
        return Vec::new();
    }

    let mut scored: Vec<(u64, SearchHit)> = candidates
        .into_iter()
        .map(|(seq, chunk)| {
            let score = cosine_similarity(query_embedding, &chunk.embedding);
            (
                seq,
                SearchHit {
                    chunk,
                    score,
                    distance: 1.0 - score,
                },
            )
        })
        .collect();

    scored.sort_by(|(seq_a, a), (seq_b, b)| {
        a.distance
            .partial_cmp(&b.distance)
            .unwrap_or(Ordering::Equal)
            .then(seq_a.cmp(seq_b))
    });
    scored.truncate(k);

    scored.into_iter().map(|(_, hit)| hit).collect()
}
