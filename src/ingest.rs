//! Turning files on disk into indexed, embedded chunks.

use crate::chunking::{Chunker, ChunkingConfig, TextChunker};
use crate::config::ChunkingSettings;
use crate::embedding::Embedder;
use crate::error::{Result, SyllabiError};
use crate::index::{DocumentChunk, DocumentIndex};
use serde::Serialize;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info, instrument};
use walkdir::WalkDir;

/// Result of ingesting one document.
#[derive(Debug, Clone, Serialize)]
pub struct IngestReport {
    /// Canonical source path the chunks are stored under.
    pub source: String,
    /// Number of chunks indexed.
    pub chunks_indexed: usize,
    /// Chunks from a previous upload of the same source that were replaced.
    pub superseded: usize,
}

/// Reads, chunks, embeds and indexes documents.
pub struct Ingestor {
    index: Arc<dyn DocumentIndex>,
    embedder: Arc<dyn Embedder>,
    chunker: Box<dyn Chunker>,
    config: ChunkingConfig,
    extensions: Vec<String>,
}

impl Ingestor {
    pub fn new(
        index: Arc<dyn DocumentIndex>,
        embedder: Arc<dyn Embedder>,
        settings: &ChunkingSettings,
    ) -> Self {
        Self {
            index,
            embedder,
            chunker: Box::new(TextChunker::new()),
            config: ChunkingConfig::from(settings),
            extensions: settings
                .extensions
                .iter()
                .map(|e| e.trim_start_matches('.').to_lowercase())
                .collect(),
        }
    }

    /// Whether a path has one of the accepted extensions.
    pub fn is_supported(&self, path: &Path) -> bool {
        path.extension()
            .and_then(|e| e.to_str())
            .map(|e| self.extensions.iter().any(|x| x.eq_ignore_ascii_case(e)))
            .unwrap_or(false)
    }

    /// Ingest a single file from the local filesystem.
    ///
    /// Re-ingesting the same path replaces its previous chunks.
    #[instrument(skip(self), fields(path = %path.display()))]
    pub async fn ingest_file(&self, path: &Path) -> Result<IngestReport> {
        if !path.exists() {
            return Err(SyllabiError::FileNotFound(path.display().to_string()));
        }
        if !path.is_file() {
            return Err(SyllabiError::InvalidInput(format!(
                "Not a regular file: {}",
                path.display()
            )));
        }
        if !self.is_supported(path) {
            return Err(SyllabiError::UnsupportedFile(format!(
                "{} (accepted: {})",
                path.display(),
                self.extensions.join(", ")
            )));
        }

        let text = tokio::fs::read_to_string(path).await.map_err(|e| {
            if e.kind() == std::io::ErrorKind::InvalidData {
                SyllabiError::UnsupportedFile(format!("{} is not UTF-8 text", path.display()))
            } else {
                SyllabiError::Io(e)
            }
        })?;

        let source = tokio::fs::canonicalize(path).await?;
        self.ingest_text(&source.to_string_lossy(), &text).await
    }

    /// Chunk, embed and index text under the given source name.
    #[instrument(skip(self, text), fields(bytes = text.len()))]
    pub async fn ingest_text(&self, source: &str, text: &str) -> Result<IngestReport> {
        let chunks = self.chunker.chunk(text, &self.config);
        if chunks.is_empty() {
            return Err(SyllabiError::InvalidInput(format!("{} contains no text", source)));
        }
        debug!("Cut {} into {} chunks", source, chunks.len());

        // Embed before touching the index so a failure leaves old chunks in place
        let texts: Vec<String> = chunks.iter().map(|c| c.content.clone()).collect();
        let embeddings = self.embedder.embed_batch(&texts).await?;
        if embeddings.len() != chunks.len() {
            return Err(SyllabiError::Embedding(format!(
                "Expected {} embeddings, got {}",
                chunks.len(),
                embeddings.len()
            )));
        }

        let documents: Vec<DocumentChunk> = chunks
            .into_iter()
            .zip(embeddings)
            .map(|(chunk, embedding)| {
                DocumentChunk::new(
                    source.to_string(),
                    chunk.content,
                    embedding,
                    chunk.position,
                    chunk.offset,
                )
            })
            .collect();

        let (superseded, chunks_indexed) = self.index.replace_source(source, &documents).await?;

        info!(
            "Indexed {} chunks from {} (replaced {})",
            chunks_indexed, source, superseded
        );

        Ok(IngestReport {
            source: source.to_string(),
            chunks_indexed,
            superseded,
        })
    }

    /// Supported files under a directory, sorted by path.
    pub fn collect_files(&self, root: &Path) -> Result<Vec<PathBuf>> {
        if !root.exists() {
            return Err(SyllabiError::FileNotFound(root.display().to_string()));
        }

        let mut files = Vec::new();
        for entry in WalkDir::new(root).follow_links(true) {
            let entry = entry.map_err(std::io::Error::from)?;
            if entry.file_type().is_file() && self.is_supported(entry.path()) {
                files.push(entry.into_path());
            }
        }
        files.sort();
        Ok(files)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agent::testing::KeywordEmbedder;
    use crate::index::{MemoryIndex, SqliteIndex};
    use std::io::Write;
    use tokio_test::{assert_err, assert_ok};

    fn ingestor(index: Arc<dyn DocumentIndex>) -> Ingestor {
        Ingestor::new(index, Arc::new(KeywordEmbedder::default()), &ChunkingSettings::default())
    }

    #[tokio::test]
    async fn test_ingest_file_indexes_chunks() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("cs101.md");
        std::fs::write(&path, "CS 101 prerequisites: none.\n\nGrading: 40% exams.").unwrap();

        let index = Arc::new(MemoryIndex::new());
        let report = assert_ok!(ingestor(index.clone()).ingest_file(&path).await);

        assert_eq!(report.chunks_indexed, 1);
        assert_eq!(report.superseded, 0);
        assert!(report.source.ends_with("cs101.md"));
        assert_eq!(index.stats().await.unwrap().chunk_count, 1);
    }

    #[tokio::test]
    async fn test_reingest_supersedes_previous_chunks() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("cs101.txt");
        std::fs::write(&path, "Old syllabus text.").unwrap();

        let index = Arc::new(MemoryIndex::new());
        let ingestor = ingestor(index.clone());
        ingestor.ingest_file(&path).await.unwrap();

        std::fs::write(&path, "New syllabus text.").unwrap();
        let report = ingestor.ingest_file(&path).await.unwrap();

        assert_eq!(report.superseded, 1);
        let chunks = index.get_by_source(&report.source).await.unwrap();
        assert_eq!(chunks.len(), 1);
        assert_eq!(chunks[0].content, "New syllabus text.");
    }

    #[tokio::test]
    async fn test_missing_and_unsupported_files() {
        let dir = tempfile::tempdir().unwrap();
        let ingestor = ingestor(Arc::new(MemoryIndex::new()));

        let missing = ingestor.ingest_file(&dir.path().join("nope.txt")).await;
        assert!(matches!(missing, Err(SyllabiError::FileNotFound(_))));

        let pdf = dir.path().join("syllabus.pdf");
        std::fs::write(&pdf, "%PDF-1.7").unwrap();
        let unsupported = ingestor.ingest_file(&pdf).await;
        assert!(matches!(unsupported, Err(SyllabiError::UnsupportedFile(_))));
    }

    #[tokio::test]
    async fn test_binary_file_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("garbage.txt");
        std::fs::File::create(&path)
            .unwrap()
            .write_all(&[0xff, 0xfe, 0x00, 0x81])
            .unwrap();

        let result = ingestor(Arc::new(MemoryIndex::new())).ingest_file(&path).await;
        assert!(matches!(result, Err(SyllabiError::UnsupportedFile(_))));
    }

    #[tokio::test]
    async fn test_blank_text_is_rejected() {
        let index = Arc::new(MemoryIndex::new());
        let err = assert_err!(ingestor(index.clone()).ingest_text("empty.txt", "  \n ").await);
        assert!(matches!(err, SyllabiError::InvalidInput(_)));
        assert_eq!(index.stats().await.unwrap().chunk_count, 0);
    }

    #[tokio::test]
    async fn test_failed_reupload_keeps_previous_version() {
        let dir = tempfile::tempdir().unwrap();
        let db = dir.path().join("index.db");
        let path = dir.path().join("cs101.md");
        std::fs::write(&path, "CS 101 grading: 40% exams.").unwrap();

        let index = Arc::new(SqliteIndex::open(&db).unwrap());
        let ingestor = ingestor(index.clone());
        let first = assert_ok!(ingestor.ingest_file(&path).await);

        // Make every further insert fail, as a full disk would
        rusqlite::Connection::open(&db)
            .unwrap()
            .execute_batch(
                "CREATE TRIGGER reject_inserts BEFORE INSERT ON chunks
                 BEGIN SELECT RAISE(ABORT, 'disk full'); END;",
            )
            .unwrap();

        std::fs::write(&path, "CS 101 grading: 60% projects.").unwrap();
        let err = assert_err!(ingestor.ingest_file(&path).await);
        assert!(matches!(err, SyllabiError::Database(_)));

        let chunks = index.get_by_source(&first.source).await.unwrap();
        assert_eq!(chunks.len(), 1);
        assert_eq!(chunks[0].content, "CS 101 grading: 40% exams.");
        assert_eq!(index.stats().await.unwrap().file_count, 1);
    }

    #[test]
    fn test_collect_files_filters_and_sorts() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir(dir.path().join("fall")).unwrap();
        std::fs::write(dir.path().join("fall/b.md"), "b").unwrap();
        std::fs::write(dir.path().join("a.TXT"), "a").unwrap();
        std::fs::write(dir.path().join("logo.png"), "png").unwrap();

        let ingestor = ingestor(Arc::new(MemoryIndex::new()));
        let files = ingestor.collect_files(dir.path()).unwrap();

        assert_eq!(files.len(), 2);
        assert!(files[0].ends_with("a.TXT"));
        assert!(files[1].ends_with("fall/b.md"));
    }
}
