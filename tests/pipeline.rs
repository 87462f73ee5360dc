//! End-to-end tests of the chat orchestrator against a real SQLite store,
//! with the model and failure points replaced by in-test doubles.

use anyhow::Result;
use async_trait::async_trait;
use docchat::chat::{ChatOrchestrator, Persistence};
use docchat::completion::CompletionModel;
use docchat::config::{ChunkingConfig, Config, RetrievalFailurePolicy};
use docchat::db;
use docchat::documents::DocumentStore;
use docchat::embedding::{Embedder, HashEmbedder};
use docchat::error::Error;
use docchat::migrate;
use docchat::models::{Role, Turn};
use docchat::prompt::PromptAssembler;
use docchat::sqlite_store::SqliteStore;
use docchat::store::ConversationStore;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use tempfile::TempDir;

// ─── Doubles ────────────────────────────────────────────────────────

/// Returns a fixed answer and records every prompt it was sent.
struct ScriptedModel {
    answer: String,
    prompts: Mutex<Vec<String>>,
}

impl ScriptedModel {
    fn new(answer: &str) -> Arc<Self> {
        Arc::new(Self {
            answer: answer.to_string(),
            prompts: Mutex::new(Vec::new()),
        })
    }

    fn prompts(&self) -> Vec<String> {
        self.prompts.lock().unwrap().clone()
    }
}

#[async_trait]
impl CompletionModel for ScriptedModel {
    fn model_name(&self) -> &str {
        "scripted"
    }

    async fn complete(&self, prompt: &str) -> Result<String> {
        self.prompts.lock().unwrap().push(prompt.to_string());
        Ok(self.answer.clone())
    }
}

struct FailingModel;

#[async_trait]
impl CompletionModel for FailingModel {
    fn model_name(&self) -> &str {
        "failing"
    }

    async fn complete(&self, _prompt: &str) -> Result<String> {
        anyhow::bail!("upstream returned 500")
    }
}

/// Embeds successfully until `broken` is set.
struct SwitchableEmbedder {
    inner: HashEmbedder,
    broken: std::sync::atomic::AtomicBool,
}

#[async_trait]
impl Embedder for SwitchableEmbedder {
    fn model_name(&self) -> &str {
        "switchable"
    }

    fn dims(&self) -> usize {
        self.inner.dims()
    }

    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        if self.broken.load(Ordering::SeqCst) {
            anyhow::bail!("embedding service unreachable");
        }
        self.inner.embed(texts).await
    }
}

/// Wraps the SQLite store and injects failures.
struct FlakyStore {
    inner: SqliteStore,
    fail_append: Option<Role>,
    fail_reads: bool,
}

#[async_trait]
impl ConversationStore for FlakyStore {
    async fn append_turn(
        &self,
        conversation_id: &str,
        role: Role,
        text: &str,
    ) -> docchat::error::Result<Turn> {
        if self.fail_append == Some(role) {
            return Err(Error::Storage("injected write failure".into()));
        }
        self.inner.append_turn(conversation_id, role, text).await
    }

    async fn read_history(
        &self,
        conversation_id: &str,
        limit: usize,
    ) -> docchat::error::Result<Vec<Turn>> {
        if self.fail_reads {
            return Err(Error::Storage("injected read failure".into()));
        }
        self.inner.read_history(conversation_id, limit).await
    }
}

// ─── Fixture ────────────────────────────────────────────────────────

struct Fixture {
    _tmp: TempDir,
    sqlite: SqliteStore,
    embedder: Arc<SwitchableEmbedder>,
    documents: Arc<DocumentStore>,
}

impl Fixture {
    async fn new() -> Self {
        let tmp = TempDir::new().unwrap();
        let config: Config = toml::from_str(&format!(
            "[db]\npath = \"{}\"\n",
            tmp.path().join("docchat.sqlite").display()
        ))
        .unwrap();
        let pool = db::connect(&config).await.unwrap();
        migrate::apply(&pool).await.unwrap();
        let sqlite = SqliteStore::new(pool);

        let embedder = Arc::new(SwitchableEmbedder {
            inner: HashEmbedder::new(256),
            broken: std::sync::atomic::AtomicBool::new(false),
        });
        let documents = Arc::new(DocumentStore::new(
            embedder.clone(),
            Arc::new(sqlite.clone()),
            &ChunkingConfig::default(),
        ));

        documents
            .ingest("faq.md", "Return policy: 30 days")
            .await
            .unwrap();
        documents
            .ingest(
                "ops.md",
                "Kubernetes clusters are upgraded every month by the platform team.",
            )
            .await
            .unwrap();

        Self {
            _tmp: tmp,
            sqlite,
            embedder,
            documents,
        }
    }

    fn orchestrator(
        &self,
        conversations: Arc<dyn ConversationStore>,
        model: Arc<dyn CompletionModel>,
        policy: RetrievalFailurePolicy,
    ) -> ChatOrchestrator {
        ChatOrchestrator::new(
            self.documents.clone(),
            conversations,
            PromptAssembler::default(),
            model,
            policy,
        )
    }

    fn plain(&self, model: Arc<dyn CompletionModel>) -> ChatOrchestrator {
        self.orchestrator(
            Arc::new(self.sqlite.clone()),
            model,
            RetrievalFailurePolicy::Degrade,
        )
    }

    fn break_embeddings(&self) {
        self.embedder.broken.store(true, Ordering::SeqCst);
    }
}

// ─── Tests ──────────────────────────────────────────────────────────

#[tokio::test]
async fn test_answer_cites_ingested_source() {
    let fx = Fixture::new().await;
    let model = ScriptedModel::new("Returns are accepted for 30 days [faq.md#0].");
    let chat = fx.plain(model.clone());

    let outcome = chat
        .handle_chat("conv-1", "What is the return policy?", 6, 50)
        .await
        .unwrap();

    assert_eq!(outcome.answer, "Returns are accepted for 30 days [faq.md#0].");
    assert_eq!(outcome.conversation_id, "conv-1");
    assert!(outcome
        .sources
        .iter()
        .any(|s| s.source_id == "faq.md" && s.chunk_index == 0));
    assert_eq!(outcome.sources[0].source_id, "faq.md");
    assert!(outcome.warnings.is_empty());
    assert_eq!(
        outcome.persistence,
        Persistence::Saved {
            user_turn: 1,
            assistant_turn: 2
        }
    );

    let prompts = model.prompts();
    assert_eq!(prompts.len(), 1);
    assert!(prompts[0].contains("[faq.md#0]\nReturn policy: 30 days"));
    assert!(prompts[0].contains("What is the return policy?"));
}

#[tokio::test]
async fn test_unknown_conversation_starts_with_empty_history() {
    let fx = Fixture::new().await;
    let model = ScriptedModel::new("30 days.");
    let chat = fx.plain(model.clone());

    let outcome = chat
        .handle_chat("never-seen-before", "What is the return policy?", 6, 50)
        .await
        .unwrap();

    assert_eq!(outcome.answer, "30 days.");
    assert!(model.prompts()[0].contains("(no previous messages)"));
}

#[tokio::test]
async fn test_follow_up_sees_previous_turns() {
    let fx = Fixture::new().await;
    let model = ScriptedModel::new("30 days.");
    let chat = fx.plain(model.clone());

    chat.handle_chat("conv-1", "What is the return policy?", 6, 50)
        .await
        .unwrap();
    let second = chat
        .handle_chat("conv-1", "And for sale items?", 6, 50)
        .await
        .unwrap();

    assert_eq!(
        second.persistence,
        Persistence::Saved {
            user_turn: 3,
            assistant_turn: 4
        }
    );
    let prompt = &model.prompts()[1];
    assert!(prompt.contains("User: What is the return policy?\nAssistant: 30 days."));

    let history = fx.sqlite.read_history("conv-1", 50).await.unwrap();
    let roles: Vec<Role> = history.iter().map(|t| t.role).collect();
    assert_eq!(
        roles,
        vec![Role::User, Role::Assistant, Role::User, Role::Assistant]
    );
    assert_eq!(history[2].text, "And for sale items?");
}

#[tokio::test]
async fn test_history_limit_keeps_most_recent_turns() {
    let fx = Fixture::new().await;
    let model = ScriptedModel::new("ok");
    let chat = fx.plain(model.clone());

    for q in ["first question", "second question", "third question"] {
        chat.handle_chat("conv-1", q, 6, 2).await.unwrap();
    }

    let last_prompt = &model.prompts()[2];
    assert!(last_prompt.contains("User: second question\nAssistant: ok"));
    assert!(!last_prompt.contains("first question"));
}

#[tokio::test]
async fn test_model_error_writes_nothing() {
    let fx = Fixture::new().await;
    let chat = fx.plain(Arc::new(FailingModel));

    let err = chat
        .handle_chat("conv-1", "What is the return policy?", 6, 50)
        .await
        .unwrap_err();

    assert_eq!(err.code(), "model_error");
    assert!(err.to_string().contains("upstream returned 500"));
    assert!(fx.sqlite.read_history("conv-1", 50).await.unwrap().is_empty());
}

#[tokio::test]
async fn test_assistant_append_failure_is_partial() {
    let fx = Fixture::new().await;
    let store = Arc::new(FlakyStore {
        inner: fx.sqlite.clone(),
        fail_append: Some(Role::Assistant),
        fail_reads: false,
    });
    let chat = fx.orchestrator(
        store,
        ScriptedModel::new("30 days."),
        RetrievalFailurePolicy::Degrade,
    );

    let outcome = chat
        .handle_chat("conv-1", "What is the return policy?", 6, 50)
        .await
        .unwrap();

    assert_eq!(outcome.answer, "30 days.");
    match &outcome.persistence {
        Persistence::Partial { user_turn, error } => {
            assert_eq!(*user_turn, 1);
            assert_eq!(error.code, "storage_error");
        }
        other => panic!("expected partial persistence, got {:?}", other),
    }

    let history = fx.sqlite.read_history("conv-1", 50).await.unwrap();
    assert_eq!(history.len(), 1);
    assert_eq!(history[0].role, Role::User);
    assert_eq!(history[0].text, "What is the return policy?");
}

#[tokio::test]
async fn test_user_append_failure_is_unsaved() {
    let fx = Fixture::new().await;
    let store = Arc::new(FlakyStore {
        inner: fx.sqlite.clone(),
        fail_append: Some(Role::User),
        fail_reads: false,
    });
    let chat = fx.orchestrator(
        store,
        ScriptedModel::new("30 days."),
        RetrievalFailurePolicy::Degrade,
    );

    let outcome = chat
        .handle_chat("conv-1", "What is the return policy?", 6, 50)
        .await
        .unwrap();

    assert_eq!(outcome.answer, "30 days.");
    assert!(matches!(outcome.persistence, Persistence::Unsaved { .. }));
    assert!(fx.sqlite.read_history("conv-1", 50).await.unwrap().is_empty());
}

#[tokio::test]
async fn test_history_read_failure_stops_before_model() {
    let fx = Fixture::new().await;
    let model = ScriptedModel::new("never sent");
    let store = Arc::new(FlakyStore {
        inner: fx.sqlite.clone(),
        fail_append: None,
        fail_reads: true,
    });
    let chat = fx.orchestrator(store, model.clone(), RetrievalFailurePolicy::Degrade);

    let err = chat
        .handle_chat("conv-1", "What is the return policy?", 6, 50)
        .await
        .unwrap_err();

    assert_eq!(err.code(), "storage_error");
    assert!(model.prompts().is_empty());
}

#[tokio::test]
async fn test_retrieval_failure_degrades_by_default() {
    let fx = Fixture::new().await;
    fx.break_embeddings();
    let model = ScriptedModel::new("I do not know.");
    let chat = fx.plain(model.clone());

    let outcome = chat
        .handle_chat("conv-1", "What is the return policy?", 6, 50)
        .await
        .unwrap();

    assert!(outcome.sources.is_empty());
    assert_eq!(outcome.warnings.len(), 1);
    assert!(outcome.warnings[0].contains("embedding service unreachable"));
    assert!(model.prompts()[0].contains("(no relevant documents)"));
    assert!(outcome.persistence.is_saved());
}

#[tokio::test]
async fn test_retrieval_failure_aborts_when_configured() {
    let fx = Fixture::new().await;
    fx.break_embeddings();
    let model = ScriptedModel::new("never sent");
    let chat = fx.orchestrator(
        Arc::new(fx.sqlite.clone()),
        model.clone(),
        RetrievalFailurePolicy::Abort,
    );

    let err = chat
        .handle_chat("conv-1", "What is the return policy?", 6, 50)
        .await
        .unwrap_err();

    assert_eq!(err.code(), "retrieval_error");
    assert!(model.prompts().is_empty());
    assert!(fx.sqlite.read_history("conv-1", 50).await.unwrap().is_empty());
}

#[tokio::test]
async fn test_top_k_bounds_cited_sources() {
    let fx = Fixture::new().await;
    let chat = fx.plain(ScriptedModel::new("ok"));

    let outcome = chat
        .handle_chat("conv-1", "return policy kubernetes", 1, 50)
        .await
        .unwrap();
    assert_eq!(outcome.sources.len(), 1);
}

/// Requests that are dropped after the model answered still store both turns.
#[tokio::test]
async fn test_persistence_survives_dropped_request() {
    struct SlowStore {
        inner: SqliteStore,
        appends: AtomicUsize,
    }

    #[async_trait]
    impl ConversationStore for SlowStore {
        async fn append_turn(
            &self,
            conversation_id: &str,
            role: Role,
            text: &str,
        ) -> docchat::error::Result<Turn> {
            self.appends.fetch_add(1, Ordering::SeqCst);
            tokio::time::sleep(std::time::Duration::from_millis(50)).await;
            self.inner.append_turn(conversation_id, role, text).await
        }

        async fn read_history(
            &self,
            conversation_id: &str,
            limit: usize,
        ) -> docchat::error::Result<Vec<Turn>> {
            self.inner.read_history(conversation_id, limit).await
        }
    }

    let fx = Fixture::new().await;
    let store = Arc::new(SlowStore {
        inner: fx.sqlite.clone(),
        appends: AtomicUsize::new(0),
    });
    let chat = Arc::new(fx.orchestrator(
        store.clone(),
        ScriptedModel::new("30 days."),
        RetrievalFailurePolicy::Degrade,
    ));

    let request = {
        let chat = chat.clone();
        tokio::spawn(async move {
            chat.handle_chat("conv-1", "What is the return policy?", 6, 50)
                .await
        })
    };

    // Cancel once the first append has started
    while store.appends.load(Ordering::SeqCst) == 0 {
        tokio::time::sleep(std::time::Duration::from_millis(5)).await;
    }
    request.abort();

    tokio::time::sleep(std::time::Duration::from_millis(300)).await;
    let history = fx.sqlite.read_history("conv-1", 50).await.unwrap();
    assert_eq!(history.len(), 2);
    assert_eq!(history[1].role, Role::Assistant);
}
