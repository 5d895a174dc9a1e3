//! In-memory document index.
//!
//! Useful for testing and for throwaway sessions.

use super::{rank, DocumentChunk, DocumentIndex, IndexStats, IndexedFile, SearchHit};
use crate::error::{Result, SyllabiError};
use async_trait::async_trait;
use std::collections::{HashMap, HashSet};
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};
use uuid::Uuid;

#[derive(Default)]
struct State {
    /// Chunk ID -> (insertion sequence, chunk).
    chunks: HashMap<Uuid, (u64, DocumentChunk)>,
    next_seq: u64,
}

impl State {
    fn put(&mut self, chunk: &DocumentChunk) {
        let seq = self.next_seq;
        self.next_seq += 1;
        self.chunks.insert(chunk.id, (seq, chunk.clone()));
    }
}

/// In-memory document index.
#[derive(Default)]
pub struct MemoryIndex {
    state: RwLock<State>,
}

impl MemoryIndex {
    /// Create an empty in-memory index.
    pub fn new() -> Self {
        Self::default()
    }

    fn read(&self) -> Result<RwLockReadGuard<'_, State>> {
        self.state
            .read()
            .map_err(|e| SyllabiError::Index(format!("Failed to acquire lock: {}", e)))
    }

    fn write(&self) -> Result<RwLockWriteGuard<'_, State>> {
        self.state
            .write()
            .map_err(|e| SyllabiError::Index(format!("Failed to acquire lock: {}", e)))
    }
}

#[async_trait]
impl DocumentIndex for MemoryIndex {
    fn backend(&self) -> &'static str {
        "memory"
    }

    async fn insert(&self, chunk: &DocumentChunk) -> Result<Uuid> {
        self.write()?.put(chunk);
        Ok(chunk.id)
    }

    async fn insert_batch(&self, chunks: &[DocumentChunk]) -> Result<usize> {
        let mut state = self.write()?;
        for chunk in chunks {
            state.put(chunk);
        }
        Ok(chunks.len())
    }

    async fn search(&self, query_embedding: &[f32], k: usize) -> Result<Vec<SearchHit>> {
        let state = self.read()?;
        let candidates = state
            .chunks
            .values()
            .map(|(seq, chunk)| (*seq, chunk.clone()));
        Ok(rank(candidates, query_embedding, k))
    }

    async fn stats(&self) -> Result<IndexStats> {
        let state = self.read()?;
        let files: HashSet<&str> = state
            .chunks
            .values()
            .map(|(_, c)| c.source.as_str())
            .collect();
        Ok(IndexStats {
            chunk_count: state.chunks.len(),
            file_count: files.len(),
        })
    }

    async fn list_files(&self) -> Result<Vec<IndexedFile>> {
        let state = self.read()?;

        let mut by_source: HashMap<&str, IndexedFile> = HashMap::new();
        for (_, chunk) in state.chunks.values() {
            let entry = by_source
                .entry(chunk.source.as_str())
                .or_insert_with(|| IndexedFile {
                    source: chunk.source.clone(),
                    chunk_count: 0,
                    characters: 0,
                    indexed_at: chunk.indexed_at,
                });

            entry.chunk_count += 1;
            entry.characters += chunk.content.chars().count() as u64;
            if chunk.indexed_at > entry.indexed_at {
                entry.indexed_at = chunk.indexed_at;
            }
        }

        let mut files: Vec<IndexedFile> = by_source.into_values().collect();
        files.sort_by(|a, b| {
            b.indexed_at
                .cmp(&a.indexed_at)
                .then_with(|| a.source.cmp(&b.source))
        });
        Ok(files)
    }

    async fn get_by_source(&self, source: &str) -> Result<Vec<DocumentChunk>> {
        let state = self.read()?;
        let mut chunks: Vec<DocumentChunk> = state
            .chunks
            .values()
            .filter(|(_, c)| c.source == source)
            .map(|(_, c)| c.clone())
            .collect();
        chunks.sort_by_key(|c| c.position);
        Ok(chunks)
    }

    async fn replace_source(&self, source: &str, chunks: &[DocumentChunk]) -> Result<(usize, usize)> {
        let mut state = self.write()?;
        let before = state.chunks.len();
        state.chunks.retain(|_, (_, c)| c.source != source);
        let removed = before - state.chunks.len();
        for chunk in chunks {
            state.put(chunk);
        }
        Ok((removed, chunks.len()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    fn chunk(source: &str, content: &str, embedding: Vec<f32>, position: u32) -> DocumentChunk {
        DocumentChunk::new(source.to_string(), content.to_string(), embedding, position, 0)
    }

    #[tokio::test]
    async fn test_memory_index() {
        let index = MemoryIndex::new();

        let c1 = chunk("cs101.md", "Hello world", vec![1.0, 0.0, 0.0], 0);
        let c2 = chunk("cs101.md", "Goodbye world", vec![0.0, 1.0, 0.0], 1);
        index.insert_batch(&[c1, c2]).await.unwrap();

        let stats = index.stats().await.unwrap();
        assert_eq!(stats, IndexStats { chunk_count: 2, file_count: 1 });

        let hits = index.search(&[1.0, 0.0, 0.0], 10).await.unwrap();
        assert_eq!(hits.len(), 2);
        assert!(hits[0].score > hits[1].score);

        let files = index.list_files().await.unwrap();
        assert_eq!(files.len(), 1);
        assert_eq!(files[0].chunk_count, 2);
        assert_eq!(files[0].characters, 24);
    }

    #[tokio::test]
    async fn test_insert_then_search_own_embedding_is_top() {
        let index = MemoryIndex::new();
        index.insert(&chunk("a.md", "first", vec![0.3, 0.4, 0.5], 0)).await.unwrap();
        let twin = chunk("b.md", "second", vec![0.3, 0.4, 0.5], 0);
        let id = index.insert(&twin).await.unwrap();
        assert_eq!(id, twin.id);

        let hits = index.search(&twin.embedding, 2).await.unwrap();
        // Identical embeddings tie; the earlier insertion wins.
        assert_eq!(hits[0].chunk.content, "first");
        assert_eq!(hits[1].chunk.id, twin.id);
    }

    #[tokio::test]
    async fn test_reinsert_same_id_replaces() {
        let index = MemoryIndex::new();
        let mut c = chunk("a.md", "v1", vec![1.0, 0.0], 0);
        index.insert(&c).await.unwrap();
        c.content = "v2".to_string();
        index.insert(&c).await.unwrap();

        assert_eq!(index.stats().await.unwrap().chunk_count, 1);
        let chunks = index.get_by_source("a.md").await.unwrap();
        assert_eq!(chunks[0].content, "v2");
    }

    #[tokio::test]
    async fn test_stats_idempotent_and_remove_source() {
        let index = MemoryIndex::new();
        index
            .insert_batch(&[
                chunk("a.md", "x", vec![1.0], 0),
                chunk("b.md", "y", vec![1.0], 0),
                chunk("b.md", "z", vec![1.0], 1),
            ])
            .await
            .unwrap();

        let first = index.stats().await.unwrap();
        let second = index.stats().await.unwrap();
        assert_eq!(first, second);
        assert_eq!(first.file_count, 2);

        assert_eq!(index.replace_source("b.md", &[]).await.unwrap(), (2, 0));
        assert!(index.get_by_source("b.md").await.unwrap().is_empty());
        assert_eq!(index.stats().await.unwrap().chunk_count, 1);
    }

    #[tokio::test]
    async fn test_replace_source_swaps_only_that_source() {
        let index = MemoryIndex::new();
        index
            .insert_batch(&[
                chunk("cs101.md", "old intro", vec![1.0, 0.0], 0),
                chunk("cs101.md", "old grading", vec![1.0, 0.0], 1),
                chunk("bio150.md", "lab safety", vec![0.0, 1.0], 0),
            ])
            .await
            .unwrap();

        let replaced = index
            .replace_source("cs101.md", &[chunk("cs101.md", "new syllabus", vec![1.0, 0.0], 0)])
            .await
            .unwrap();
        assert_eq!(replaced, (2, 1));

        let cs101 = index.get_by_source("cs101.md").await.unwrap();
        assert_eq!(cs101.len(), 1);
        assert_eq!(cs101[0].content, "new syllabus");
        assert_eq!(index.get_by_source("bio150.md").await.unwrap().len(), 1);
        assert_eq!(
            index.stats().await.unwrap(),
            IndexStats { chunk_count: 2, file_count: 2 }
        );
    }

    #[tokio::test]
    async fn test_concurrent_insert_and_search() {
        let index = Arc::new(MemoryIndex::new());

        let mut handles = Vec::new();
        for i in 0..8u32 {
            let index = index.clone();
            handles.push(tokio::spawn(async move {
                let c = chunk(&format!("f{}.md", i % 2), "text", vec![1.0, i as f32], i);
                index.insert(&c).await.unwrap();
                index.search(&[1.0, 0.0], 3).await.unwrap().len()
            }));
        }
        for handle in handles {
            let found = handle.await.unwrap();
            assert!((1..=3).contains(&found));
        }

        let stats = index.stats().await.unwrap();
        assert_eq!(stats, IndexStats { chunk_count: 8, file_count: 2 });
    }
}
