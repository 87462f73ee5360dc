//! SQLite-backed [`VectorIndex`] and [`ConversationStore`].
//!
//! Embeddings are stored as little-endian f32 BLOBs next to the chunk text;
//! similarity search is a brute-force cosine scan over all stored vectors.
//! Turn indexes are assigned inside a write transaction, which SQLite
//! serializes, and `(conversation_id, turn_index)` is the primary key.

use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, SqlitePool};

use crate::embedding::{blob_to_vec, vec_to_blob};
use crate::error::Error;
use crate::models::{DocumentChunk, Role, ScoredChunk, SourceRecord, Turn};
use crate::store::{rank_by_similarity, ConversationStore, VectorIndex};

/// SQLite implementation of both storage traits.
///
/// Cheap to clone: wraps a pooled [`SqlitePool`].
#[derive(Clone)]
pub struct SqliteStore {
    pool: SqlitePool,
}

impl SqliteStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

fn source_from_row(row: &SqliteRow) -> SourceRecord {
    SourceRecord {
        source_id: row.get("source_id"),
        content_hash: row.get("content_hash"),
        chunk_count: row.get("chunk_count"),
        embedding_model: row.get("embedding_model"),
        embedding_dims: row.get("embedding_dims"),
        updated_at: row.get("updated_at"),
    }
}

fn chunk_from_row(row: &SqliteRow) -> DocumentChunk {
    let blob: Vec<u8> = row.get("embedding");
    DocumentChunk {
        source_id: row.get("source_id"),
        chunk_index: row.get("chunk_index"),
        text: row.get("text"),
        embedding: blob_to_vec(&blob),
    }
}

fn turn_from_row(row: &SqliteRow) -> crate::error::Result<Turn> {
    let role: String = row.get("role");
    let created_at: i64 = row.get("created_at");
    Ok(Turn {
        conversation_id: row.get("conversation_id"),
        turn_index: row.get("turn_index"),
        role: Role::parse(&role)
            .ok_or_else(|| Error::Storage(format!("unknown role in turns table: {}", role)))?,
        text: row.get("text"),
        created_at: DateTime::from_timestamp_millis(created_at).ok_or_else(|| {
            Error::Storage(format!("invalid created_at in turns table: {}", created_at))
        })?,
    })
}

#[async_trait]
impl VectorIndex for SqliteStore {
    async fn replace_source(&self, record: &SourceRecord, chunks: &[DocumentChunk]) -> Result<()> {
        let mut tx = self.pool.begin().await?;

        sqlx::query(
            r#"
            INSERT INTO sources (source_id, content_hash, chunk_count, embedding_model, embedding_dims, updated_at)
            VALUES (?, ?, ?, ?, ?, ?)
            ON CONFLICT(source_id) DO UPDATE SET
                content_hash = excluded.content_hash,
                chunk_count = excluded.chunk_count,
                embedding_model = excluded.embedding_model,
                embedding_dims = excluded.embedding_dims,
                updated_at = excluded.updated_at
            "#,
        )
        .bind(&record.source_id)
        .bind(&record.content_hash)
        .bind(record.chunk_count)
        .bind(&record.embedding_model)
        .bind(record.embedding_dims)
        .bind(record.updated_at)
        .execute(&mut *tx)
        .await?;

        sqlx::query("DELETE FROM chunks WHERE source_id = ?")
            .bind(&record.source_id)
            .execute(&mut *tx)
            .await?;

        for chunk in chunks {
            sqlx::query(
                "INSERT INTO chunks (source_id, chunk_index, text, dims, embedding) VALUES (?, ?, ?, ?, ?)",
            )
            .bind(&chunk.source_id)
            .bind(chunk.chunk_index)
            .bind(&chunk.text)
            .bind(chunk.embedding.len() as i64)
            .bind(vec_to_blob(&chunk.embedding))
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;
        Ok(())
    }

    async fn source(&self, source_id: &str) -> Result<Option<SourceRecord>> {
        let row = sqlx::query(
            "SELECT source_id, content_hash, chunk_count, embedding_model, embedding_dims, updated_at FROM sources WHERE source_id = ?",
        )
        .bind(source_id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.as_ref().map(source_from_row))
    }

    async fn list_sources(&self) -> Result<Vec<SourceRecord>> {
        let rows = sqlx::query(
            "SELECT source_id, content_hash, chunk_count, embedding_model, embedding_dims, updated_at FROM sources ORDER BY source_id ASC",
        )
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.iter().map(source_from_row).collect())
    }

    async fn remove_source(&self, source_id: &str) -> Result<bool> {
        let mut tx = self.pool.begin().await?;

        sqlx::query("DELETE FROM chunks WHERE source_id = ?")
            .bind(source_id)
            .execute(&mut *tx)
            .await?;
        let removed = sqlx::query("DELETE FROM sources WHERE source_id = ?")
            .bind(source_id)
            .execute(&mut *tx)
            .await?
            .rows_affected();

        tx.commit().await?;
        Ok(removed > 0)
    }

    async fn chunks_for(&self, source_id: &str) -> Result<Vec<DocumentChunk>> {
        let rows = sqlx::query(
            "SELECT source_id, chunk_index, text, embedding FROM chunks WHERE source_id = ? ORDER BY chunk_index ASC",
        )
        .bind(source_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.iter().map(chunk_from_row).collect())
    }

    async fn nearest(&self, query: &[f32], top_k: usize) -> Result<Vec<ScoredChunk>> {
        if top_k == 0 {
            return Ok(Vec::new());
        }

        // Vectors of another width come from a different embedding setup
        let rows = sqlx::query(
            "SELECT source_id, chunk_index, text, embedding FROM chunks WHERE dims = ?",
        )
        .bind(query.len() as i64)
        .fetch_all(&self.pool)
        .await?;

        Ok(rank_by_similarity(
            rows.iter().map(chunk_from_row),
            query,
            top_k,
        ))
    }
}

#[async_trait]
impl ConversationStore for SqliteStore {
    async fn append_turn(
        &self,
        conversation_id: &str,
        role: Role,
        text: &str,
    ) -> crate::error::Result<Turn> {
        let created_at = Utc::now();
        let ts = created_at.timestamp_millis();

        let mut tx = self.pool.begin().await.map_err(Error::storage)?;

        // Writing first takes the database write lock for the rest of the
        // transaction, so the MAX() below cannot race another append.
        sqlx::query(
            r#"
            INSERT INTO conversations (id, created_at, updated_at) VALUES (?, ?, ?)
            ON CONFLICT(id) DO UPDATE SET updated_at = excluded.updated_at
            "#,
        )
        .bind(conversation_id)
        .bind(ts)
        .bind(ts)
        .execute(&mut *tx)
        .await
        .map_err(Error::storage)?;

        let turn_index: i64 = sqlx::query_scalar(
            "SELECT COALESCE(MAX(turn_index), 0) + 1 FROM turns WHERE conversation_id = ?",
        )
        .bind(conversation_id)
        .fetch_one(&mut *tx)
        .await
        .map_err(Error::storage)?;

        sqlx::query(
            "INSERT INTO turns (conversation_id, turn_index, role, text, created_at) VALUES (?, ?, ?, ?, ?)",
        )
        .bind(conversation_id)
        .bind(turn_index)
        .bind(role.as_str())
        .bind(text)
        .bind(ts)
        .execute(&mut *tx)
        .await
        .map_err(Error::storage)?;

        tx.commit().await.map_err(Error::storage)?;

        Ok(Turn {
            conversation_id: conversation_id.to_string(),
            turn_index,
            role,
            text: text.to_string(),
            created_at: DateTime::from_timestamp_millis(ts).unwrap_or(created_at),
        })
    }

    async fn read_history(
        &self,
        conversation_id: &str,
        limit: usize,
    ) -> crate::error::Result<Vec<Turn>> {
        if limit == 0 {
            return Ok(Vec::new());
        }

        let rows = sqlx::query(
            r#"
            SELECT conversation_id, turn_index, role, text, created_at FROM (
                SELECT conversation_id, turn_index, role, text, created_at
                FROM turns
                WHERE conversation_id = ?
                ORDER BY turn_index DESC
                LIMIT ?
            )
            ORDER BY turn_index ASC
            "#,
        )
        .bind(conversation_id)
        .bind(i64::try_from(limit).unwrap_or(i64::MAX))
        .fetch_all(&self.pool)
        .await
        .map_err(Error::storage)?;

        rows.iter().map(turn_from_row).collect()
    }
}
