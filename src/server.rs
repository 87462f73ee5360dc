//! HTTP chat endpoint.
//!
//! # Endpoints
//!
//! | Method | Path | Description |
//! |--------|------|-------------|
//! | `POST` | `/chat` | Ask a question within a conversation |
//! | `GET`  | `/conversations/{id}/turns?limit=` | Read back stored turns, oldest first |
//! | `GET`  | `/health` | Health check (returns version) |
//!
//! `/chat` and `/conversations/...` check the `Authorization` header before
//! touching the body, the document index or the conversation store.
//!
//! # Error Contract
//!
//! ```json
//! { "error": { "code": "model_error", "message": "model call failed: ..." } }
//! ```
//!
//! | Code | Status |
//! |------|--------|
//! | `bad_request` | 400 |
//! | `unauthorized` | 401 |
//! | `model_error` | 502 |
//! | `retrieval_error` | 503 |
//! | `storage_error`, `template_error`, `ingest_error` | 500 |
//!
//! An answer that could not be stored is still a `200`; the body's
//! `persistence.status` is `partial` or `unsaved`.
//!
//! # CORS
//!
//! `server.cors_origins = ["*"]` allows any origin without credentials.
//! Otherwise only the listed origins are allowed, with credentials, for
//! `GET`/`POST` and the `Authorization` and `Content-Type` headers.

use anyhow::Context;
use axum::{
    extract::{rejection::JsonRejection, rejection::QueryRejection, Path, Query, State},
    http::{header, HeaderMap, HeaderValue, Method, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};
use tracing::{info, warn};
use uuid::Uuid;

use crate::auth::AuthGate;
use crate::chat::{ChatOrchestrator, ChatOutcome};
use crate::config::{Config, RetrievalConfig};
use crate::db;
use crate::error::Error;
use crate::migrate;
use crate::models::Turn;
use crate::sqlite_store::SqliteStore;
use crate::store::ConversationStore;

/// Shared state handed to every route handler.
#[derive(Clone)]
pub struct AppState {
    chat: Arc<ChatOrchestrator>,
    conversations: Arc<dyn ConversationStore>,
    auth: Arc<AuthGate>,
    top_k: usize,
    history_limit: usize,
}

impl AppState {
    pub fn new(
        chat: Arc<ChatOrchestrator>,
        conversations: Arc<dyn ConversationStore>,
        auth: Arc<AuthGate>,
        retrieval: &RetrievalConfig,
    ) -> Self {
        Self {
            chat,
            conversations,
            auth,
            top_k: retrieval.top_k,
            history_limit: retrieval.history_limit,
        }
    }

    pub fn from_config(config: &Config, store: SqliteStore) -> anyhow::Result<Self> {
        let chat = ChatOrchestrator::from_config(config, store.clone())?;
        let auth = AuthGate::from_config(&config.auth)?;
        Ok(Self::new(
            Arc::new(chat),
            Arc::new(store),
            Arc::new(auth),
            &config.retrieval,
        ))
    }
}

/// Starts the HTTP server on `[server].bind` and runs until the process is
/// terminated. Creates the schema if the database is new.
pub async fn run_server(config: &Config) -> anyhow::Result<()> {
    let pool = db::connect(config).await?;
    migrate::apply(&pool).await?;

    let state = AppState::from_config(config, SqliteStore::new(pool))?;
    let app = router(state, &config.server.cors_origins)?;

    let listener = tokio::net::TcpListener::bind(&config.server.bind)
        .await
        .with_context(|| format!("Failed to bind {}", config.server.bind))?;
    println!("docchat listening on http://{}", listener.local_addr()?);

    axum::serve(listener, app).await?;
    Ok(())
}

/// Build the application router with CORS applied.
pub fn router(state: AppState, cors_origins: &[String]) -> anyhow::Result<Router> {
    Ok(Router::new()
        .route("/chat", post(handle_chat))
        .route("/conversations/{id}/turns", get(handle_turns))
        .route("/health", get(handle_health))
        .layer(cors_layer(cors_origins)?)
        .with_state(state))
}

fn cors_layer(origins: &[String]) -> anyhow::Result<CorsLayer> {
    let layer = CorsLayer::new()
        .allow_methods([Method::GET, Method::POST])
        .allow_headers([header::AUTHORIZATION, header::CONTENT_TYPE]);

    if origins.iter().any(|o| o == "*") {
        return Ok(layer.allow_origin(Any));
    }

    let origins = origins
        .iter()
        .map(|o| {
            HeaderValue::from_str(o).with_context(|| format!("Invalid CORS origin: {}", o))
        })
        .collect::<anyhow::Result<Vec<_>>>()?;
    Ok(layer.allow_origin(origins).allow_credentials(true))
}

// ============ Error response ============

#[derive(Serialize)]
struct ErrorBody {
    error: ErrorDetail,
}

#[derive(Serialize)]
struct ErrorDetail {
    code: String,
    message: String,
}

/// Error type that converts into an Axum HTTP response.
struct AppError {
    status: StatusCode,
    code: String,
    message: String,
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let body = ErrorBody {
            error: ErrorDetail {
                code: self.code,
                message: self.message,
            },
        };
        (self.status, Json(body)).into_response()
    }
}

impl From<Error> for AppError {
    fn from(err: Error) -> Self {
        let status = match err {
            Error::Auth(_) => StatusCode::UNAUTHORIZED,
            Error::Retrieval(_) => StatusCode::SERVICE_UNAVAILABLE,
            Error::Model(_) => StatusCode::BAD_GATEWAY,
            Error::Storage(_) | Error::Template(_) | Error::Ingest { .. } => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        };
        AppError {
            status,
            code: err.code().to_string(),
            message: err.to_string(),
        }
    }
}

fn bad_request(message: impl Into<String>) -> AppError {
    AppError {
        status: StatusCode::BAD_REQUEST,
        code: "bad_request".to_string(),
        message: message.into(),
    }
}

fn authorize(state: &AppState, headers: &HeaderMap) -> Result<(), AppError> {
    let credential = headers
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok());
    state.auth.verify(credential).map(|_| ()).map_err(|e| {
        warn!(error = %e, "request rejected");
        AppError::from(e)
    })
}

// ============ GET /health ============

#[derive(Serialize)]
struct HealthResponse {
    status: String,
    version: String,
}

async fn handle_health() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
    })
}

// ============ POST /chat ============

#[derive(Deserialize)]
struct ChatRequest {
    #[serde(default)]
    conversation_id: Option<String>,
    question: String,
    #[serde(default)]
    top_k: Option<usize>,
    #[serde(default)]
    history_limit: Option<usize>,
}

async fn handle_chat(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Result<Json<ChatRequest>, JsonRejection>,
) -> Result<Json<ChatOutcome>, AppError> {
    authorize(&state, &headers)?;
    let Json(req) = body.map_err(|e| bad_request(e.body_text()))?;

    let question = req.question.trim();
    if question.is_empty() {
        return Err(bad_request("question must not be empty"));
    }
    let top_k = req.top_k.unwrap_or(state.top_k);
    if top_k == 0 {
        return Err(bad_request("top_k must be >= 1"));
    }
    let history_limit = req.history_limit.unwrap_or(state.history_limit);

    // A missing id starts a new conversation
    let conversation_id = match req.conversation_id {
        Some(id) if !id.trim().is_empty() => id.trim().to_string(),
        _ => Uuid::new_v4().to_string(),
    };

    let outcome = state
        .chat
        .handle_chat(&conversation_id, question, top_k, history_limit)
        .await
        .map_err(|e| {
            warn!(conversation_id = %conversation_id, code = e.code(), error = %e, "chat failed");
            AppError::from(e)
        })?;

    Ok(Json(outcome))
}

// ============ GET /conversations/{id}/turns ============

#[derive(Deserialize)]
struct TurnsQuery {
    #[serde(default)]
    limit: Option<usize>,
}

#[derive(Serialize)]
struct TurnsResponse {
    conversation_id: String,
    turns: Vec<Turn>,
}

async fn handle_turns(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(id): Path<String>,
    query: Result<Query<TurnsQuery>, QueryRejection>,
) -> Result<Json<TurnsResponse>, AppError> {
    authorize(&state, &headers)?;
    let Query(query) = query.map_err(|e| bad_request(e.body_text()))?;

    let limit = query.limit.unwrap_or(state.history_limit);
    let turns = state.conversations.read_history(&id, limit).await?;
    info!(conversation_id = %id, turns = turns.len(), "history read");

    Ok(Json(TurnsResponse {
        conversation_id: id,
        turns,
    }))
}
