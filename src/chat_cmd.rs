//! `docchat chat` and `docchat history`: the chat pipeline from the
//! terminal, against the same database the server uses.

use anyhow::{bail, Result};
use uuid::Uuid;

use crate::chat::{ChatOrchestrator, Persistence};
use crate::config::Config;
use crate::db;
use crate::migrate;
use crate::sqlite_store::SqliteStore;
use crate::store::ConversationStore;

pub async fn run_chat(
    config: &Config,
    question: &str,
    conversation_id: Option<String>,
    top_k: Option<usize>,
) -> Result<()> {
    if question.trim().is_empty() {
        bail!("question must not be empty");
    }
    let conversation_id = conversation_id.unwrap_or_else(|| Uuid::new_v4().to_string());

    let pool = db::connect(config).await?;
    migrate::apply(&pool).await?;
    let chat = ChatOrchestrator::from_config(config, SqliteStore::new(pool.clone()))?;

    let outcome = chat
        .handle_chat(
            &conversation_id,
            question.trim(),
            top_k.unwrap_or(config.retrieval.top_k),
            config.retrieval.history_limit,
        )
        .await?;

    for warning in &outcome.warnings {
        eprintln!("warning: {}", warning);
    }

    println!("{}", outcome.answer);
    println!();
    if !outcome.sources.is_empty() {
        println!("sources:");
        for source in &outcome.sources {
            println!(
                "  [{}#{}] {:.3}",
                source.source_id, source.chunk_index, source.score
            );
        }
    }
    println!("conversation: {}", outcome.conversation_id);

    match &outcome.persistence {
        Persistence::Saved { .. } => {}
        Persistence::Partial { error, .. } => {
            eprintln!("warning: answer not saved: {}", error.message);
        }
        Persistence::Unsaved { error } => {
            eprintln!("warning: turn not saved: {}", error.message);
        }
    }

    pool.close().await;
    Ok(())
}

pub async fn run_history(
    config: &Config,
    conversation_id: &str,
    limit: Option<usize>,
) -> Result<()> {
    let pool = db::connect(config).await?;
    migrate::apply(&pool).await?;
    let store = SqliteStore::new(pool.clone());

    let limit = limit.unwrap_or(config.retrieval.history_limit);
    let turns = store.read_history(conversation_id, limit).await?;

    if turns.is_empty() {
        println!("No turns.");
    }
    for turn in &turns {
        println!(
            "#{} {} {}",
            turn.turn_index,
            turn.created_at.format("%Y-%m-%d %H:%M:%S"),
            turn.role.label()
        );
        for line in turn.text.lines() {
            println!("    {}", line);
        }
    }

    pool.close().await;
    Ok(())
}
