//! Core data models shared by the ingestion and chat pipelines.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// A file picked up by the ingest walker, before it is read.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceFile {
    /// Path relative to the ingest root, `/`-separated.
    pub source_id: String,
    pub path: PathBuf,
}

/// A span of source text plus its embedding.
///
/// Identity is `(source_id, chunk_index)`; a chunk is never mutated, the
/// whole set for a source is replaced on re-ingestion.
#[derive(Debug, Clone, PartialEq)]
pub struct DocumentChunk {
    pub source_id: String,
    pub chunk_index: i64,
    pub text: String,
    pub embedding: Vec<f32>,
}

impl DocumentChunk {
    pub fn citation(&self) -> Citation {
        Citation {
            source_id: self.source_id.clone(),
            chunk_index: self.chunk_index,
        }
    }
}

/// Bookkeeping row written alongside a source's chunk set.
#[derive(Debug, Clone, PartialEq)]
pub struct SourceRecord {
    pub source_id: String,
    /// SHA-256 hex of the ingested text.
    pub content_hash: String,
    pub chunk_count: i64,
    pub embedding_model: String,
    /// Width of every stored vector of this source.
    pub embedding_dims: i64,
    pub updated_at: i64,
}

/// One search hit.
#[derive(Debug, Clone)]
pub struct ScoredChunk {
    pub chunk: DocumentChunk,
    pub score: f32,
}

/// Reference to a chunk used as context, `source_id#chunk_index`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Citation {
    pub source_id: String,
    pub chunk_index: i64,
}

impl Citation {
    pub fn marker(&self) -> String {
        format!("[{}#{}]", self.source_id, self.chunk_index)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::User => "user",
            Role::Assistant => "assistant",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "user" => Some(Role::User),
            "assistant" => Some(Role::Assistant),
            _ => None,
        }
    }

    /// Prefix used when rendering history into a prompt.
    pub fn label(&self) -> &'static str {
        match self {
            Role::User => "User",
            Role::Assistant => "Assistant",
        }
    }
}

/// A persisted conversation message.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Turn {
    pub conversation_id: String,
    /// Starts at 1, contiguous within a conversation.
    pub turn_index: i64,
    pub role: Role,
    pub text: String,
    pub created_at: DateTime<Utc>,
}
