//! Document store adapter: text in, chunked embedded records out, and
//! similarity search back.
//!
//! ```text
//! ingest(source_id, text)
//!   └─ chunk_text ─→ Embedder::embed ─→ validate ─→ VectorIndex::replace_source (one tx)
//!
//! search(query, top_k)
//!   └─ Embedder::embed(query) ─→ VectorIndex::nearest
//! ```
//!
//! All embedding work happens before the write transaction opens, so a
//! provider failure or a malformed vector leaves the previous chunk set of
//! the source untouched.

use chrono::Utc;
use sha2::{Digest, Sha256};
use std::sync::Arc;
use tracing::{debug, info};

use crate::chunk::chunk_text;
use crate::config::ChunkingConfig;
use crate::embedding::{embed_query, Embedder};
use crate::error::{Error, Result};
use crate::models::{DocumentChunk, ScoredChunk, SourceRecord};
use crate::store::VectorIndex;

/// Result of [`DocumentStore::ingest_if_changed`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IngestOutcome {
    /// The chunk set was (re)written with this many chunks.
    Indexed(usize),
    /// Same content hash and embedding model as the stored record.
    Unchanged,
}

pub struct DocumentStore {
    embedder: Arc<dyn Embedder>,
    index: Arc<dyn VectorIndex>,
    max_chars: usize,
    overlap_chars: usize,
}

impl DocumentStore {
    pub fn new(
        embedder: Arc<dyn Embedder>,
        index: Arc<dyn VectorIndex>,
        chunking: &ChunkingConfig,
    ) -> Self {
        Self {
            embedder,
            index,
            max_chars: chunking.max_chars,
            overlap_chars: chunking.overlap_chars,
        }
    }

    pub fn embedding_model(&self) -> &str {
        self.embedder.model_name()
    }

    /// Chunk, embed and store `text` as the full content of `source_id`,
    /// replacing whatever was stored for it. Returns the chunk count.
    pub async fn ingest(&self, source_id: &str, text: &str) -> Result<usize> {
        let pieces = chunk_text(text, self.max_chars, self.overlap_chars);

        let vectors = if pieces.is_empty() {
            Vec::new()
        } else {
            self.embedder
                .embed(&pieces)
                .await
                .map_err(|e| Error::ingest(source_id, e))?
        };
        self.check_vectors(pieces.len(), &vectors)
            .map_err(|msg| Error::ingest(source_id, msg))?;

        let chunks: Vec<DocumentChunk> = pieces
            .into_iter()
            .zip(vectors)
            .enumerate()
            .map(|(i, (text, embedding))| DocumentChunk {
                source_id: source_id.to_string(),
                chunk_index: i as i64,
                text,
                embedding,
            })
            .collect();

        let record = SourceRecord {
            source_id: source_id.to_string(),
            content_hash: content_hash(text),
            chunk_count: chunks.len() as i64,
            embedding_model: self.embedder.model_name().to_string(),
            embedding_dims: self.embedder.dims() as i64,
            updated_at: Utc::now().timestamp(),
        };

        self.index
            .replace_source(&record, &chunks)
            .await
            .map_err(|e| Error::ingest(source_id, e))?;

        debug!(source_id, chunks = chunks.len(), "source indexed");
        Ok(chunks.len())
    }

    /// Like [`ingest`](Self::ingest) but skips sources whose stored hash,
    /// embedding model and vector width already match, unless `force` is set.
    pub async fn ingest_if_changed(
        &self,
        source_id: &str,
        text: &str,
        force: bool,
    ) -> Result<IngestOutcome> {
        if !force {
            let existing = self
                .index
                .source(source_id)
                .await
                .map_err(|e| Error::ingest(source_id, e))?;
            if let Some(record) = existing {
                if record.content_hash == content_hash(text)
                    && record.embedding_model == self.embedder.model_name()
                    && record.embedding_dims == self.embedder.dims() as i64
                {
                    return Ok(IngestOutcome::Unchanged);
                }
            }
        }

        self.ingest(source_id, text).await.map(IngestOutcome::Indexed)
    }

    /// Top `top_k` chunks for `query`, best first.
    pub async fn search(&self, query: &str, top_k: usize) -> Result<Vec<ScoredChunk>> {
        if top_k == 0 {
            return Ok(Vec::new());
        }

        let vector = embed_query(self.embedder.as_ref(), query)
            .await
            .map_err(Error::retrieval)?;
        self.check_vectors(1, std::slice::from_ref(&vector))
            .map_err(Error::retrieval)?;

        let hits = self
            .index
            .nearest(&vector, top_k)
            .await
            .map_err(Error::retrieval)?;

        debug!(top_k, hits = hits.len(), "document search");
        Ok(hits)
    }

    pub async fn remove_source(&self, source_id: &str) -> Result<bool> {
        let removed = self
            .index
            .remove_source(source_id)
            .await
            .map_err(Error::storage)?;
        if removed {
            info!(source_id, "source removed");
        }
        Ok(removed)
    }

    pub async fn list_sources(&self) -> Result<Vec<SourceRecord>> {
        self.index.list_sources().await.map_err(Error::storage)
    }

    fn check_vectors(
        &self,
        expected: usize,
        vectors: &[Vec<f32>],
    ) -> std::result::Result<(), String> {
        if vectors.len() != expected {
            return Err(format!(
                "embedding provider returned {} vectors for {} inputs",
                vectors.len(),
                expected
            ));
        }
        let dims = self.embedder.dims();
        for (i, v) in vectors.iter().enumerate() {
            if v.len() != dims {
                return Err(format!(
                    "vector {} has {} dimensions, expected {}",
                    i,
                    v.len(),
                    dims
                ));
            }
            if v.iter().any(|x| !x.is_finite()) {
                return Err(format!("vector {} contains a non-finite value", i));
            }
            if !v.iter().map(|x| x * x).sum::<f32>().is_finite() {
                return Err(format!("vector {} has a norm too large to score", i));
            }
        }
        Ok(())
    }
}

/// SHA-256 hex digest used to detect unchanged sources.
pub fn content_hash(text: &str) -> String {
    hex::encode(Sha256::digest(text.as_bytes()))
}
