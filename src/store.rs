//! Storage abstractions for the chat pipeline.
//!
//! Two independent resources with independent consistency domains:
//!
//! | Trait | Holds | Error type |
//! |-------|-------|------------|
//! | [`VectorIndex`] | chunk sets and their embeddings, keyed by `(source_id, chunk_index)` | `anyhow` (the document adapter classifies failures) |
//! | [`ConversationStore`] | append-only conversation turns | [`Error::Storage`](crate::error::Error::Storage) |
//!
//! Both are injected as trait objects so tests can substitute doubles. The
//! production implementation for both is
//! [`SqliteStore`](crate::sqlite_store::SqliteStore).

use async_trait::async_trait;
use std::cmp::Ordering;

use crate::embedding::cosine_similarity;
use crate::error::Result;
use crate::models::{DocumentChunk, Role, ScoredChunk, SourceRecord, Turn};

#[async_trait]
pub trait VectorIndex: Send + Sync {
    /// Atomically replace every chunk of `record.source_id` with `chunks`
    /// and upsert the source record. On error nothing changes.
    async fn replace_source(
        &self,
        record: &SourceRecord,
        chunks: &[DocumentChunk],
    ) -> anyhow::Result<()>;

    async fn source(&self, source_id: &str) -> anyhow::Result<Option<SourceRecord>>;

    /// All source records, ordered by `source_id`.
    async fn list_sources(&self) -> anyhow::Result<Vec<SourceRecord>>;

    /// Delete a source and its chunks. Returns whether it existed.
    async fn remove_source(&self, source_id: &str) -> anyhow::Result<bool>;

    /// Chunks of one source, ordered by `chunk_index`.
    async fn chunks_for(&self, source_id: &str) -> anyhow::Result<Vec<DocumentChunk>>;

    /// The `top_k` chunks closest to `query` (see [`rank_by_similarity`]).
    async fn nearest(&self, query: &[f32], top_k: usize) -> anyhow::Result<Vec<ScoredChunk>>;
}

#[async_trait]
pub trait ConversationStore: Send + Sync {
    /// Persist a turn under the next free `turn_index` of the conversation.
    ///
    /// Index assignment is atomic: concurrent appends to the same
    /// conversation never share an index.
    async fn append_turn(&self, conversation_id: &str, role: Role, text: &str) -> Result<Turn>;

    /// Up to `limit` most recent turns, oldest first. Unknown conversations
    /// yield an empty vector.
    async fn read_history(&self, conversation_id: &str, limit: usize) -> Result<Vec<Turn>>;
}

/// Score `candidates` against `query` and keep the best `top_k`.
///
/// Order: cosine similarity descending, then smaller `chunk_index`, then
/// `source_id` ascending, so equal scores always come back in the same
/// order.
pub fn rank_by_similarity(
    candidates: impl IntoIterator<Item = DocumentChunk>,
    query: &[f32],
    top_k: usize,
) -> Vec<ScoredChunk> {
    let mut scored: Vec<ScoredChunk> = candidates
        .into_iter()
        .map(|chunk| {
            let score = cosine_similarity(query, &chunk.embedding);
            ScoredChunk { chunk, score }
        })
        .collect();

    scored.sort_by(compare_hits);
    scored.truncate(top_k);
    scored
}

fn compare_hits(a: &ScoredChunk, b: &ScoredChunk) -> Ordering {
    b.score
        .total_cmp(&a.score)
        .then_with(|| a.chunk.chunk_index.cmp(&b.chunk.chunk_index))
        .then_with(|| a.chunk.source_id.cmp(&b.chunk.source_id))
}
