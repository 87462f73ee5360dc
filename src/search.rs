//! `docchat search`: run a similarity query against the index and print
//! the hits, without calling the model.

use anyhow::{bail, Result};
use std::sync::Arc;

use crate::config::Config;
use crate::db;
use crate::documents::DocumentStore;
use crate::embedding::create_embedder;
use crate::sqlite_store::SqliteStore;

const EXCERPT_CHARS: usize = 160;

pub async fn run_search(config: &Config, query: &str, limit: Option<usize>) -> Result<()> {
    if query.trim().is_empty() {
        bail!("query must not be empty");
    }
    let top_k = limit.unwrap_or(config.retrieval.top_k);

    let pool = db::connect(config).await?;
    let documents = DocumentStore::new(
        create_embedder(&config.embedding)?,
        Arc::new(SqliteStore::new(pool.clone())),
        &config.chunking,
    );

    let hits = documents.search(query, top_k).await?;

    if hits.is_empty() {
        println!("No results.");
        pool.close().await;
        return Ok(());
    }

    for (i, hit) in hits.iter().enumerate() {
        println!(
            "{}. [{:.3}] {}",
            i + 1,
            hit.score,
            hit.chunk.citation().marker()
        );
        println!("    excerpt: \"{}\"", excerpt(&hit.chunk.text));
        println!();
    }

    pool.close().await;
    Ok(())
}

fn excerpt(text: &str) -> String {
    let flat = text.split_whitespace().collect::<Vec<_>>().join(" ");
    if flat.chars().count() <= EXCERPT_CHARS {
        return flat;
    }
    let cut: String = flat.chars().take(EXCERPT_CHARS).collect();
    format!("{}...", cut.trim_end())
}
