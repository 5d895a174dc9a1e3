//! SQLite-backed document index.
//!
//! Embeddings are stored as little-endian `f32` blobs and cosine distance is
//! computed in Rust. The autoincrement `seq` column records insertion order
//! for tie-breaking.

use super::{rank, DocumentChunk, DocumentIndex, IndexStats, IndexedFile, SearchHit};
use crate::error::{Result, SyllabiError};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rusqlite::types::Type;
use rusqlite::{params, Connection, Row};
use std::path::Path;
use std::sync::{Mutex, MutexGuard};
use tracing::{debug, info, instrument};
use uuid::Uuid;

const SCHEMA: &str = r#"
    CREATE TABLE IF NOT EXISTS chunks (
        seq INTEGER PRIMARY KEY AUTOINCREMENT,
        id TEXT NOT NULL UNIQUE,
        source TEXT NOT NULL,
        content TEXT NOT NULL,
        embedding BLOB NOT NULL,
        position INTEGER NOT NULL,
        char_offset INTEGER NOT NULL,
        indexed_at TEXT NOT NULL
    );

    CREATE INDEX IF NOT EXISTS idx_chunks_source ON chunks(source);
"#;

const INSERT_SQL: &str = r#"
    INSERT OR REPLACE INTO chunks
    (id, source, content, embedding, position, char_offset, indexed_at)
    VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
"#;

const LIST_FILES_SQL: &str = r#"
    SELECT source, COUNT(*), COALESCE(SUM(LENGTH(content)), 0), MAX(indexed_at)
    FROM chunks
    GROUP BY source
    ORDER BY MAX(indexed_at) DESC, source
"#;

/// SQLite-based document index.
pub struct SqliteIndex {
    conn: Mutex<Connection>,
}

impl SqliteIndex {
    /// Open (or create) an index database at `path`.
    #[instrument(skip_all)]
    pub fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let conn = Connection::open(path)?;

        // WAL lets concurrent readers proceed while a writer commits
        conn.execute_batch("PRAGMA journal_mode=WAL;")?;
        conn.execute_batch(SCHEMA)?;

        info!("Opened SQLite index at {:?}", path);

        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// Create an in-memory SQLite index (useful for testing).
    pub fn in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        conn.execute_batch(SCHEMA)?;

        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn lock(&self) -> Result<MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|e| SyllabiError::Index(format!("Failed to acquire lock: {}", e)))
    }

    /// Serialize embedding to bytes.
    fn embedding_to_bytes(embedding: &[f32]) -> Vec<u8> {
        embedding.iter().flat_map(|f| f.to_le_bytes()).collect()
    }

    /// Deserialize embedding from bytes.
    fn bytes_to_embedding(bytes: &[u8]) -> Vec<f32> {
        bytes
            .chunks_exact(4)
            .map(|chunk| {
                let arr: [u8; 4] = chunk.try_into().unwrap_or_default();
                f32::from_le_bytes(arr)
            })
            .collect()
    }

    fn parse_timestamp(column: usize, value: &str) -> rusqlite::Result<DateTime<Utc>> {
        DateTime::parse_from_rfc3339(value)
            .map(|dt| dt.with_timezone(&Utc))
            .map_err(|e| rusqlite::Error::FromSqlConversionFailure(column, Type::Text, Box::new(e)))
    }

    fn parse_id(column: usize, value: &str) -> rusqlite::Result<Uuid> {
        Uuid::parse_str(value)
            .map_err(|e| rusqlite::Error::FromSqlConversionFailure(column, Type::Text, Box::new(e)))
    }

    fn write_chunk(conn: &Connection, chunk: &DocumentChunk) -> Result<()> {
        conn.execute(
            INSERT_SQL,
            params![
                chunk.id.to_string(),
                chunk.source,
                chunk.content,
                Self::embedding_to_bytes(&chunk.embedding),
                chunk.position,
                chunk.offset as i64,
                chunk.indexed_at.to_rfc3339(),
            ],
        )?;
        Ok(())
    }

    /// Map a `seq, id, source, content, embedding, position, char_offset, indexed_at` row.
    fn row_to_chunk(row: &Row<'_>) -> rusqlite::Result<(u64, DocumentChunk)> {
        let seq: i64 = row.get(0)?;
        let id_str: String = row.get(1)?;
        let embedding_bytes: Vec<u8> = row.get(4)?;
        let offset: i64 = row.get(6)?;
        let indexed_at_str: String = row.get(7)?;

        Ok((
            seq as u64,
            DocumentChunk {
                id: Self::parse_id(1, &id_str)?,
                source: row.get(2)?,
                content: row.get(3)?,
                embedding: Self::bytes_to_embedding(&embedding_bytes),
                position: row.get(5)?,
                offset: offset as usize,
                indexed_at: Self::parse_timestamp(7, &indexed_at_str)?,
            },
        ))
    }

    fn row_to_file(row: &Row<'_>) -> rusqlite::Result<IndexedFile> {
        let characters: i64 = row.get(2)?;
        let indexed_at_str: String = row.get(3)?;
        Ok(IndexedFile {
            source: row.get(0)?,
            chunk_count: row.get(1)?,
            characters: characters as u64,
            indexed_at: Self::parse_timestamp(3, &indexed_at_str)?,
        })
    }
}

#[async_trait]
impl DocumentIndex for SqliteIndex {
    fn backend(&self) -> &'static str {
        "sqlite"
    }

    #[instrument(skip(self, chunk), fields(id = %chunk.id))]
    async fn insert(&self, chunk: &DocumentChunk) -> Result<Uuid> {
        let conn = self.lock()?;
        Self::write_chunk(&conn, chunk)?;
        debug!("Inserted chunk {}", chunk.id);
        Ok(chunk.id)
    }

    #[instrument(skip(self, chunks), fields(count = chunks.len()))]
    async fn insert_batch(&self, chunks: &[DocumentChunk]) -> Result<usize> {
        let conn = self.lock()?;
        let tx = conn.unchecked_transaction()?;
        for chunk in chunks {
            Self::write_chunk(&tx, chunk)?;
        }
        tx.commit()?;

        info!("Batch inserted {} chunks", chunks.len());
        Ok(chunks.len())
    }

    #[instrument(skip(self, query_embedding))]
    async fn search(&self, query_embedding: &[f32], k: usize) -> Result<Vec<SearchHit>> {
        if k == 0 {
            return Ok(Vec::new());
        }

        let conn = self.lock()?;
        let mut stmt = conn.prepare(
            r#"
            SELECT seq, id, source, content, embedding, position, char_offset, indexed_at
            FROM chunks
            ORDER BY seq
            "#,
        )?;

        let candidates = stmt
            .query_map([], Self::row_to_chunk)?
            .collect::<rusqlite::Result<Vec<_>>>()?;

        let hits = rank(candidates, query_embedding, k);
        debug!("Found {} matching chunks", hits.len());
        Ok(hits)
    }

    async fn stats(&self) -> Result<IndexStats> {
        let conn = self.lock()?;
        let (chunks, files): (i64, i64) = conn.query_row(
            "SELECT COUNT(*), COUNT(DISTINCT source) FROM chunks",
            [],
            |row| Ok((row.get(0)?, row.get(1)?)),
        )?;

        Ok(IndexStats {
            chunk_count: chunks as usize,
            file_count: files as usize,
        })
    }

    #[instrument(skip(self))]
    async fn list_files(&self) -> Result<Vec<IndexedFile>> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare(LIST_FILES_SQL)?;

        let files = stmt
            .query_map([], Self::row_to_file)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(files)
    }

    #[instrument(skip(self))]
    async fn get_by_source(&self, source: &str) -> Result<Vec<DocumentChunk>> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare(
            r#"
            SELECT seq, id, source, content, embedding, position, char_offset, indexed_at
            FROM chunks
            WHERE source = ?1
            ORDER BY position
            "#,
        )?;

        let chunks = stmt
            .query_map(params![source], Self::row_to_chunk)?
            .map(|r| r.map(|(_, chunk)| chunk))
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(chunks)
    }

    #[instrument(skip(self, chunks), fields(count = chunks.len()))]
    async fn replace_source(&self, source: &str, chunks: &[DocumentChunk]) -> Result<(usize, usize)> {
        let conn = self.lock()?;
        let tx = conn.unchecked_transaction()?;
        let removed = tx.execute("DELETE FROM chunks WHERE source = ?1", params![source])?;
        for chunk in chunks {
            Self::write_chunk(&tx, chunk)?;
        }
        tx.commit()?;

        info!("Replaced {} chunks of {} with {}", removed, source, chunks.len());
        Ok((removed, chunks.len()))
    }

    async fn close(&self) -> Result<()> {
        let conn = self.lock()?;
        conn.execute_batch("PRAGMA wal_checkpoint(TRUNCATE);")?;
        info!("Checkpointed SQLite index");
        Ok(())
    }
}
