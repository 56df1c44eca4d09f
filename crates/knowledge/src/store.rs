//! SQLite-backed knowledge base store.
//!
//! Holds the synchronized documents (soft-deleted ones included, for audit)
//! and a persisted embedding table keyed by `(content_hash, model_version)`
//! so a restarted process does not re-embed unchanged content.

use crate::types::Document;
use chrono::{DateTime, Utc};
use mentor_core::{AppError, AppResult};
use rusqlite::{params, Connection, OptionalExtension, Row};
use std::path::Path;
use std::sync::{Mutex, MutexGuard};

const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS documents (
    id TEXT PRIMARY KEY,
    source_path TEXT NOT NULL,
    content TEXT NOT NULL,
    content_hash TEXT NOT NULL,
    chapter TEXT,
    tags TEXT NOT NULL,
    version INTEGER NOT NULL,
    removed INTEGER NOT NULL DEFAULT 0,
    updated_at TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_documents_removed ON documents(removed);

CREATE TABLE IF NOT EXISTS embeddings (
    content_hash TEXT NOT NULL,
    model_version TEXT NOT NULL,
    vector BLOB NOT NULL,
    created_at TEXT NOT NULL,
    PRIMARY KEY (content_hash, model_version)
);
"#;

const DOCUMENT_COLUMNS: &str =
    "id, source_path, content, content_hash, chapter, tags, version, removed, updated_at";

/// Document and embedding persistence.
pub struct DocumentStore {
    conn: Mutex<Connection>,
}

impl std::fmt::Debug for DocumentStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DocumentStore").finish_non_exhaustive()
    }
}

impl DocumentStore {
    /// Open (creating if needed) the store at `db_path`.
    pub fn open(db_path: &Path) -> AppResult<Self> {
        if let Some(parent) = db_path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| {
                AppError::Knowledge(format!("Failed to create store directory: {}", e))
            })?;
        }

        let conn = Connection::open(db_path)
            .map_err(|e| AppError::Knowledge(format!("Failed to open SQLite store: {}", e)))?;

        tracing::debug!("Opened document store at {:?}", db_path);
        Self::with_connection(conn)
    }

    /// Open a throwaway in-memory store.
    pub fn open_in_memory() -> AppResult<Self> {
        let conn = Connection::open_in_memory()
            .map_err(|e| AppError::Knowledge(format!("Failed to open SQLite store: {}", e)))?;
        Self::with_connection(conn)
    }

    fn with_connection(conn: Connection) -> AppResult<Self> {
        conn.execute_batch(SCHEMA)
            .map_err(|e| AppError::Knowledge(format!("Failed to create tables: {}", e)))?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// Run raw SQL against the store, for fault injection in tests.
    #[cfg(test)]
    pub(crate) fn run_sql(&self, sql: &str) {
        self.conn().execute_batch(sql).unwrap();
    }

    fn conn(&self) -> MutexGuard<'_, Connection> {
        self.conn.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Insert or replace a document.
    pub fn upsert_document(&self, doc: &Document) -> AppResult<()> {
        let tags = serde_json::to_string(&doc.tags)?;

        self.conn()
            .execute(
                "INSERT OR REPLACE INTO documents (id, source_path, content, content_hash, chapter, tags, version, removed, updated_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
                params![
                    doc.id,
                    doc.source_path,
                    doc.content,
                    doc.content_hash,
                    doc.chapter,
                    tags,
                    doc.version as i64,
                    doc.removed as i64,
                    doc.updated_at.to_rfc3339(),
                ],
            )
            .map_err(|e| AppError::Knowledge(format!("Failed to upsert document {}: {}", doc.id, e)))?;

        Ok(())
    }

    /// Soft-delete a document. Returns false if it was absent or already removed.
    pub fn mark_removed(&self, id: &str) -> AppResult<bool> {
        let changed = self
            .conn()
            .execute(
                "UPDATE documents SET removed = 1, updated_at = ?2 WHERE id = ?1 AND removed = 0",
                params![id, Utc::now().to_rfc3339()],
            )
            .map_err(|e| AppError::Knowledge(format!("Failed to remove document {}: {}", id, e)))?;

        Ok(changed > 0)
    }

    /// Fetch a retrievable (not removed) document.
    pub fn get_document(&self, id: &str) -> AppResult<Option<Document>> {
        Ok(self.get_any(id)?.filter(|doc| !doc.removed))
    }

    /// Fetch a document whether or not it was removed.
    pub fn get_any(&self, id: &str) -> AppResult<Option<Document>> {
        let sql = format!("SELECT {} FROM documents WHERE id = ?1", DOCUMENT_COLUMNS);
        self.conn()
            .query_row(&sql, params![id], row_to_document)
            .optional()
            .map_err(|e| AppError::Knowledge(format!("Failed to load document {}: {}", id, e)))
    }

    /// All retrievable documents, ordered by id.
    pub fn active_documents(&self) -> AppResult<Vec<Document>> {
        let sql = format!(
            "SELECT {} FROM documents WHERE removed = 0 ORDER BY id",
            DOCUMENT_COLUMNS
        );
        let conn = self.conn();
        let mut stmt = conn
            .prepare(&sql)
            .map_err(|e| AppError::Knowledge(format!("Failed to prepare query: {}", e)))?;

        let rows = stmt
            .query_map([], row_to_document)
            .map_err(|e| AppError::Knowledge(format!("Failed to query documents: {}", e)))?;

        rows.collect::<Result<Vec<_>, _>>()
            .map_err(|e| AppError::Knowledge(format!("Failed to read document row: {}", e)))
    }

    /// Returns (active, removed) document counts.
    pub fn counts(&self) -> AppResult<(u32, u32)> {
        let conn = self.conn();
        let count = |removed: i64| -> AppResult<u32> {
            conn.query_row(
                "SELECT COUNT(*) FROM documents WHERE removed = ?1",
                params![removed],
                |row| row.get::<_, i64>(0).map(|v| v as u32),
            )
            .map_err(|e| AppError::Knowledge(format!("Failed to count documents: {}", e)))
        };

        Ok((count(0)?, count(1)?))
    }

    /// Load a persisted embedding for content produced by `model_version`.
    pub fn load_embedding(&self, content_hash: &str, model_version: &str) -> AppResult<Option<Vec<f32>>> {
        let bytes: Option<Vec<u8>> = self
            .conn()
            .query_row(
                "SELECT vector FROM embeddings WHERE content_hash = ?1 AND model_version = ?2",
                params![content_hash, model_version],
                |row| row.get(0),
            )
            .optional()
            .map_err(|e| AppError::Knowledge(format!("Failed to load embedding: {}", e)))?;

        bytes.map(|b| bytes_to_embedding(&b)).transpose()
    }

    /// Persist an embedding.
    pub fn save_embedding(&self, content_hash: &str, model_version: &str, vector: &[f32]) -> AppResult<()> {
        self.conn()
            .execute(
                "INSERT OR REPLACE INTO embeddings (content_hash, model_version, vector, created_at)
                 VALUES (?1, ?2, ?3, ?4)",
                params![
                    content_hash,
                    model_version,
                    embedding_to_bytes(vector),
                    Utc::now().to_rfc3339(),
                ],
            )
            .map_err(|e| AppError::Knowledge(format!("Failed to save embedding: {}", e)))?;

        Ok(())
    }

    /// Number of persisted embeddings.
    pub fn embedding_count(&self) -> AppResult<u32> {
        self.conn()
            .query_row("SELECT COUNT(*) FROM embeddings", [], |row| {
                row.get::<_, i64>(0).map(|v| v as u32)
            })
            .map_err(|e| AppError::Knowledge(format!("Failed to count embeddings: {}", e)))
    }
}

fn row_to_document(row: &Row<'_>) -> rusqlite::Result<Document> {
    let tags_json: String = row.get(5)?;
    let tags: Vec<String> = serde_json::from_str(&tags_json)
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(5, rusqlite::types::Type::Text, Box::new(e)))?;

    let updated_at: String = row.get(8)?;
    let updated_at = DateTime::parse_from_rfc3339(&updated_at)
        .map(|t| t.with_timezone(&Utc))
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(8, rusqlite::types::Type::Text, Box::new(e)))?;

    Ok(Document {
        id: row.get(0)?,
        source_path: row.get(1)?,
        content: row.get(2)?,
        content_hash: row.get(3)?,
        chapter: row.get(4)?,
        tags,
        version: row.get::<_, i64>(6)? as u32,
        removed: row.get::<_, i64>(7)? != 0,
        updated_at,
    })
}

/// Convert embedding vector to little-endian bytes for storage.
fn embedding_to_bytes(embedding: &[f32]) -> Vec<u8> {
    let mut bytes = Vec::with_capacity(embedding.len() * 4);
    for &value in embedding {
        bytes.extend_from_slice(&value.to_le_bytes());
    }
    bytes
}

/// Convert stored bytes back to an embedding vector.
fn bytes_to_embedding(bytes: &[u8]) -> AppResult<Vec<f32>> {
    if bytes.len() % 4 != 0 {
        return Err(AppError::Knowledge(
            "Invalid embedding bytes length".to_string(),
        ));
    }

    Ok(bytes
        .chunks_exact(4)
        .map(|c| f32::from_le_bytes([c[0], c[1], c[2], c[3]]))
        .collect())
}
