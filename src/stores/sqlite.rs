//! Durable vector index on SQLite with the sqlite-vec extension.
//!
//! Chunk rows live in a plain `chunks` table; their vectors live in a
//! `chunk_embeddings` vec0 virtual table joined by rowid. Nearest-neighbor
//! search runs `vec_distance_cosine` in SQL and converts distance to
//! similarity (`1 - distance`) before applying the caller's floor.
//!
//! The embedding model id and dimension are persisted in an `index_meta`
//! table; reopening the index with a different model fails instead of
//! mixing embedding spaces.

use std::mem::transmute;
use std::os::raw::c_char;
use std::path::Path;
use std::sync::OnceLock;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio_rusqlite::{Connection, OptionalExtension, ffi};
use tracing::debug;

use crate::types::{RagError, RagResult};

use super::{RetrievalHit, StoredChunk, VectorIndex};

pub struct SqliteVectorIndex {
    conn: Connection,
    model_id: String,
    dimensions: usize,
}

impl SqliteVectorIndex {
    /// Opens (or creates) the index at `path`, bound to the given embedding
    /// model. Returns a `Config` error if the file was built with a
    /// different model or dimension.
    pub async fn open(
        path: impl AsRef<Path>,
        model_id: impl Into<String>,
        dimensions: usize,
    ) -> RagResult<Self> {
        register_sqlite_vec()?;
        let model_id = model_id.into();

        let conn = Connection::open(path)
            .await
            .map_err(|err| RagError::Storage(err.to_string()))?;

        // Confirm the extension actually loaded before touching vec0 tables.
        conn.call(|conn| {
            conn.query_row("SELECT vec_version()", [], |row| row.get::<_, String>(0))?;
            Ok(())
        })
        .await
        .map_err(|err| RagError::Storage(err.to_string()))?;

        let index = Self {
            conn,
            model_id,
            dimensions,
        };
        index.init_schema().await?;
        Ok(index)
    }

    async fn init_schema(&self) -> RagResult<()> {
        let model_id = self.model_id.clone();
        let dimensions = self.dimensions;

        self.conn
            .call(move |conn| {
                conn.execute(
                    "CREATE TABLE IF NOT EXISTS index_meta (
                        key TEXT PRIMARY KEY,
                        value TEXT NOT NULL
                    )",
                    [],
                )?;

                let stored_model: Option<String> = conn
                    .query_row(
                        "SELECT value FROM index_meta WHERE key = 'embedding_model'",
                        [],
                        |row| row.get(0),
                    )
                    .optional()?;
                let stored_dims: Option<String> = conn
                    .query_row(
                        "SELECT value FROM index_meta WHERE key = 'dimensions'",
                        [],
                        |row| row.get(0),
                    )
                    .optional()?;

                if let Some(stored) = &stored_model {
                    if stored != &model_id {
                        return Err(tokio_rusqlite::Error::Other(
                            format!(
                                "index built with embedding model '{stored}', \
                                 opened with '{model_id}'"
                            )
                            .into(),
                        ));
                    }
                }
                if let Some(stored) = &stored_dims {
                    if stored != &dimensions.to_string() {
                        return Err(tokio_rusqlite::Error::Other(
                            format!(
                                "index built with dimension {stored}, opened with {dimensions}"
                            )
                            .into(),
                        ));
                    }
                }

                conn.execute(
                    "INSERT OR IGNORE INTO index_meta (key, value) VALUES ('embedding_model', ?)",
                    [&model_id],
                )?;
                conn.execute(
                    "INSERT OR IGNORE INTO index_meta (key, value) VALUES ('dimensions', ?)",
                    [&dimensions.to_string()],
                )?;

                conn.execute(
                    "CREATE TABLE IF NOT EXISTS chunks (
                        chunk_id TEXT PRIMARY KEY,
                        article_id TEXT NOT NULL,
                        title TEXT NOT NULL,
                        url TEXT NOT NULL,
                        source TEXT NOT NULL,
                        published_date TEXT NOT NULL,
                        chunk_index INTEGER NOT NULL,
                        start_offset INTEGER NOT NULL,
                        byte_length INTEGER NOT NULL,
                        content TEXT NOT NULL
                    )",
                    [],
                )?;
                conn.execute(
                    "CREATE INDEX IF NOT EXISTS idx_chunks_article ON chunks(article_id)",
                    [],
                )?;
                conn.execute(
                    &format!(
                        "CREATE VIRTUAL TABLE IF NOT EXISTS chunk_embeddings \
                         USING vec0(embedding float[{dimensions}])"
                    ),
                    [],
                )?;
                Ok(())
            })
            .await
            .map_err(storage_or_config)
    }
}

#[async_trait]
impl VectorIndex for SqliteVectorIndex {
    fn model_id(&self) -> &str {
        &self.model_id
    }

    fn dimensions(&self) -> usize {
        self.dimensions
    }

    async fn upsert(&self, chunks: Vec<StoredChunk>) -> RagResult<()> {
        let mut rows: Vec<(StoredChunk, String)> = Vec::with_capacity(chunks.len());
        for chunk in chunks {
            let Some(embedding) = chunk.embedding.as_ref() else {
                continue;
            };
            if embedding.len() != self.dimensions {
                return Err(RagError::Config(format!(
                    "chunk {} has dimension {}, index expects {}",
                    chunk.chunk_id,
                    embedding.len(),
                    self.dimensions
                )));
            }
            let json = serde_json::to_string(embedding)
                .map_err(|err| RagError::Index(err.to_string()))?;
            rows.push((chunk, json));
        }
        if rows.is_empty() {
            return Ok(());
        }

        self.conn
            .call(move |conn| {
                let tx = conn.transaction()?;
                for (chunk, embedding_json) in rows {
                    let existing: Option<i64> = tx
                        .query_row(
                            "SELECT rowid FROM chunks WHERE chunk_id = ?",
                            [&chunk.chunk_id],
                            |row| row.get(0),
                        )
                        .optional()?;
                    if let Some(rowid) = existing {
                        tx.execute(
                            "DELETE FROM chunk_embeddings WHERE rowid = ?",
                            [rowid],
                        )?;
                        tx.execute("DELETE FROM chunks WHERE rowid = ?", [rowid])?;
                    }

                    tx.execute(
                        "INSERT INTO chunks (chunk_id, article_id, title, url, source, \
                         published_date, chunk_index, start_offset, byte_length, content) \
                         VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
                        (
                            &chunk.chunk_id,
                            &chunk.article_id,
                            &chunk.title,
                            &chunk.url,
                            &chunk.source,
                            chunk.published_date.to_rfc3339(),
                            chunk.chunk_index as i64,
                            chunk.offset as i64,
                            chunk.length as i64,
                            &chunk.text,
                        ),
                    )?;
                    let rowid = tx.last_insert_rowid();
                    tx.execute(
                        "INSERT INTO chunk_embeddings (rowid, embedding) VALUES (?, ?)",
                        (rowid, &embedding_json),
                    )?;
                }
                tx.commit()?;
                Ok(())
            })
            .await
            .map_err(|err| RagError::Index(err.to_string()))
    }

    async fn remove_article(&self, article_id: &str) -> RagResult<usize> {
        let article_id = article_id.to_string();
        self.conn
            .call(move |conn| {
                let tx = conn.transaction()?;
                let rowids: Vec<i64> = {
                    let mut stmt =
                        tx.prepare("SELECT rowid FROM chunks WHERE article_id = ?")?;
                    let mapped = stmt.query_map([&article_id], |row| row.get(0))?;
                    let mut out = Vec::new();
                    for rowid in mapped {
                        out.push(rowid?);
                    }
                    out
                };
                // vec0 tables only support deletes addressed by rowid.
                for rowid in &rowids {
                    tx.execute("DELETE FROM chunk_embeddings WHERE rowid = ?", [rowid])?;
                }
                let deleted = tx.execute("DELETE FROM chunks WHERE article_id = ?", [&article_id])?;
                tx.commit()?;
                Ok(deleted)
            })
            .await
            .map_err(|err| RagError::Index(err.to_string()))
    }

    async fn search(
        &self,
        query: &[f32],
        top_k: usize,
        min_similarity: f32,
    ) -> RagResult<Vec<RetrievalHit>> {
        if query.len() != self.dimensions {
            return Err(RagError::Config(format!(
                "query has dimension {}, index expects {}",
                query.len(),
                self.dimensions
            )));
        }
        let embedding_json = serde_json::to_string(query)
            .map_err(|err| RagError::Index(err.to_string()))?;

        let rows = self
            .conn
            .call(move |conn| {
                let mut stmt = conn.prepare(&format!(
                    "SELECT c.chunk_id, c.article_id, c.title, c.url, c.source, \
                     c.published_date, c.chunk_index, c.start_offset, c.byte_length, \
                     c.content, \
                     vec_distance_cosine(e.embedding, vec_f32(?)) AS distance \
                     FROM chunks c \
                     JOIN chunk_embeddings e ON e.rowid = c.rowid \
                     ORDER BY distance ASC, c.chunk_id ASC \
                     LIMIT {top_k}"
                ))?;

                let mapped = stmt.query_map([&embedding_json], |row| {
                    let published: String = row.get(5)?;
                    let distance: f32 = row.get(10)?;
                    let chunk = StoredChunk {
                        chunk_id: row.get(0)?,
                        article_id: row.get(1)?,
                        title: row.get(2)?,
                        url: row.get(3)?,
                        source: row.get(4)?,
                        published_date: DateTime::parse_from_rfc3339(&published)
                            .map(|dt| dt.with_timezone(&Utc))
                            .unwrap_or(DateTime::UNIX_EPOCH),
                        chunk_index: row.get::<_, i64>(6)? as usize,
                        offset: row.get::<_, i64>(7)? as usize,
                        length: row.get::<_, i64>(8)? as usize,
                        text: row.get(9)?,
                        embedding: None,
                    };
                    Ok((chunk, 1.0 - distance))
                })?;

                let mut results = Vec::new();
                for row in mapped {
                    results.push(row?);
                }
                Ok(results)
            })
            .await
            .map_err(|err| RagError::Index(err.to_string()))?;

        let hits: Vec<RetrievalHit> = rows
            .into_iter()
            .filter(|(_, similarity)| *similarity >= min_similarity)
            .map(|(chunk, similarity)| RetrievalHit { chunk, similarity })
            .collect();
        debug!(hits = hits.len(), "sqlite vector search complete");
        Ok(hits)
    }

    async fn count(&self) -> RagResult<usize> {
        self.conn
            .call(|conn| {
                let count: i64 =
                    conn.query_row("SELECT COUNT(*) FROM chunks", [], |row| row.get(0))?;
                Ok(count as usize)
            })
            .await
            .map_err(|err| RagError::Index(err.to_string()))
    }
}

/// Meta-table mismatches come back through `Error::Other`; everything else
/// is a storage failure.
fn storage_or_config(err: tokio_rusqlite::Error) -> RagError {
    match err {
        tokio_rusqlite::Error::Other(inner) => RagError::Config(inner.to_string()),
        other => RagError::Storage(other.to_string()),
    }
}

/// Registers sqlite-vec as an auto extension, once per process.
fn register_sqlite_vec() -> RagResult<()> {
    static INIT: OnceLock<Result<(), String>> = OnceLock::new();

    let result = INIT.get_or_init(|| unsafe {
        type SqliteExtensionInit = unsafe extern "C" fn(
            *mut ffi::sqlite3,
            *mut *const c_char,
            *const ffi::sqlite3_api_routines,
        ) -> i32;

        let init: unsafe extern "C" fn() = sqlite_vec::sqlite3_vec_init;
        let init_fn: SqliteExtensionInit =
            transmute::<unsafe extern "C" fn(), SqliteExtensionInit>(init);
        let rc = ffi::sqlite3_auto_extension(Some(init_fn));
        if rc != ffi::SQLITE_OK {
            Err(format!("failed to register sqlite-vec extension (code {rc})"))
        } else {
            Ok(())
        }
    });

    result.clone().map_err(RagError::Storage)
}
