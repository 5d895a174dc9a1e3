//! Content chunking for breaking uploaded documents into indexable spans.

mod text;

pub use text::TextChunker;

use crate::config::ChunkingSettings;
use serde::{Deserialize, Serialize};

/// A span of a source document.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TextChunk {
    /// Text content of this chunk (trailing whitespace removed).
    pub content: String,
    /// Byte offset of the chunk start within the source text.
    pub offset: usize,
    /// Ordinal of this chunk within the source.
    pub position: u32,
}

/// Configuration for chunking.
#[derive(Debug, Clone, Copy)]
pub struct ChunkingConfig {
    /// Target chunk length in bytes.
    pub chunk_size: usize,
    /// Bytes repeated at the start of the following chunk.
    pub chunk_overlap: usize,
}

impl Default for ChunkingConfig {
    fn default() -> Self {
        Self {
            chunk_size: 1200,
            chunk_overlap: 200,
        }
    }
}

impl From<&ChunkingSettings> for ChunkingConfig {
    fn from(settings: &ChunkingSettings) -> Self {
        Self {
            chunk_size: settings.chunk_size,
            chunk_overlap: settings.chunk_overlap,
        }
    }
}

/// Trait for content chunking implementations.
pub trait Chunker: Send + Sync {
    /// Split a document into chunks.
    fn chunk(&self, text: &str, config: &ChunkingConfig) -> Vec<TextChunk>;
}
