//! Chat orchestration: the retrieve → history → render → complete → persist
//! pipeline behind `POST /chat` and `docchat chat`.
//!
//! # Failure handling
//!
//! | Step | Failure | Result |
//! |------|---------|--------|
//! | search | [`Error::Retrieval`] | `degrade`: empty context + warning; `abort`: error |
//! | read history | [`Error::Storage`] | error, no answer |
//! | model call | [`Error::Model`] | error, nothing written |
//! | user append | [`Error::Storage`] | answer returned, [`Persistence::Unsaved`] |
//! | assistant append | [`Error::Storage`] | answer returned, [`Persistence::Partial`] |
//!
//! The two appends run on a spawned task. Once the model has answered, the
//! pair completes even if the caller drops the request future.

use anyhow::Context;
use serde::Serialize;
use std::sync::Arc;
use tracing::{info, warn};

use crate::completion::{create_model, CompletionModel};
use crate::config::{Config, RetrievalFailurePolicy};
use crate::documents::DocumentStore;
use crate::embedding::create_embedder;
use crate::error::{Error, ErrorInfo, Result};
use crate::models::{Role, ScoredChunk};
use crate::prompt::PromptAssembler;
use crate::sqlite_store::SqliteStore;
use crate::store::ConversationStore;

/// A chunk the answer was grounded on.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SourceRef {
    pub source_id: String,
    pub chunk_index: i64,
    pub score: f32,
}

impl From<&ScoredChunk> for SourceRef {
    fn from(hit: &ScoredChunk) -> Self {
        Self {
            source_id: hit.chunk.source_id.clone(),
            chunk_index: hit.chunk.chunk_index,
            score: hit.score,
        }
    }
}

/// What happened to the turn pair after the answer was produced.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "status", rename_all = "lowercase")]
pub enum Persistence {
    Saved {
        user_turn: i64,
        assistant_turn: i64,
    },
    /// The user turn is stored without its answer.
    Partial { user_turn: i64, error: ErrorInfo },
    Unsaved { error: ErrorInfo },
}

impl Persistence {
    pub fn is_saved(&self) -> bool {
        matches!(self, Persistence::Saved { .. })
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct ChatOutcome {
    pub conversation_id: String,
    pub answer: String,
    pub sources: Vec<SourceRef>,
    pub persistence: Persistence,
    pub warnings: Vec<String>,
}

pub struct ChatOrchestrator {
    documents: Arc<DocumentStore>,
    conversations: Arc<dyn ConversationStore>,
    prompt: PromptAssembler,
    model: Arc<dyn CompletionModel>,
    on_failure: RetrievalFailurePolicy,
}

impl ChatOrchestrator {
    pub fn new(
        documents: Arc<DocumentStore>,
        conversations: Arc<dyn ConversationStore>,
        prompt: PromptAssembler,
        model: Arc<dyn CompletionModel>,
        on_failure: RetrievalFailurePolicy,
    ) -> Self {
        Self {
            documents,
            conversations,
            prompt,
            model,
            on_failure,
        }
    }

    /// Wire the configured providers around one SQLite store.
    pub fn from_config(config: &Config, store: SqliteStore) -> anyhow::Result<Self> {
        let embedder = create_embedder(&config.embedding)?;
        let model = create_model(&config.model)?;
        let prompt =
            PromptAssembler::from_config(&config.prompt).context("Failed to load prompt")?;
        let documents = Arc::new(DocumentStore::new(
            embedder,
            Arc::new(store.clone()),
            &config.chunking,
        ));

        Ok(Self::new(
            documents,
            Arc::new(store),
            prompt,
            model,
            config.retrieval.on_failure,
        ))
    }

    pub async fn handle_chat(
        &self,
        conversation_id: &str,
        question: &str,
        top_k: usize,
        history_limit: usize,
    ) -> Result<ChatOutcome> {
        let mut warnings = Vec::new();

        let context = match self.documents.search(question, top_k).await {
            Ok(hits) => hits,
            Err(e) if self.on_failure == RetrievalFailurePolicy::Degrade => {
                warn!(conversation_id, error = %e, "retrieval failed, answering without context");
                warnings.push(format!("answered without document context: {}", e));
                Vec::new()
            }
            Err(e) => return Err(e),
        };

        let history = self
            .conversations
            .read_history(conversation_id, history_limit)
            .await?;

        let prompt = self.prompt.render(&context, &history, question);

        let answer = self.model.complete(&prompt).await.map_err(Error::model)?;

        let persistence = self.persist_pair(conversation_id, question, &answer).await;

        info!(
            conversation_id,
            model = self.model.model_name(),
            sources = context.len(),
            history = history.len(),
            saved = persistence.is_saved(),
            "chat answered"
        );

        Ok(ChatOutcome {
            conversation_id: conversation_id.to_string(),
            answer,
            sources: context.iter().map(SourceRef::from).collect(),
            persistence,
            warnings,
        })
    }

    async fn persist_pair(
        &self,
        conversation_id: &str,
        question: &str,
        answer: &str,
    ) -> Persistence {
        let store = Arc::clone(&self.conversations);
        let conversation_id = conversation_id.to_string();
        let question = question.to_string();
        let answer = answer.to_string();

        let task = tokio::spawn(async move {
            let user = match store
                .append_turn(&conversation_id, Role::User, &question)
                .await
            {
                Ok(turn) => turn,
                Err(e) => {
                    warn!(conversation_id = %conversation_id, error = %e, "user turn not saved");
                    return Persistence::Unsaved {
                        error: ErrorInfo::from(&e),
                    };
                }
            };

            match store
                .append_turn(&conversation_id, Role::Assistant, &answer)
                .await
            {
                Ok(assistant) => Persistence::Saved {
                    user_turn: user.turn_index,
                    assistant_turn: assistant.turn_index,
                },
                Err(e) => {
                    warn!(
                        conversation_id = %conversation_id,
                        user_turn = user.turn_index,
                        error = %e,
                        "assistant turn not saved, user turn left without answer"
                    );
                    Persistence::Partial {
                        user_turn: user.turn_index,
                        error: ErrorInfo::from(&e),
                    }
                }
            }
        });

        match task.await {
            Ok(persistence) => persistence,
            Err(e) => {
                let err = Error::storage(format!("persistence task failed: {}", e));
                Persistence::Unsaved {
                    error: ErrorInfo::from(&err),
                }
            }
        }
    }
}
