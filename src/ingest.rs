//! Batch ingestion of the document folder.
//!
//! Coordinates the flow: walker → read → chunk → embed → replace chunk set.
//! Every file is its own source and its own transaction; a failing file is
//! reported and counted, the rest of the run continues, and the command
//! fails at the end if anything failed.

use anyhow::{bail, Context, Result};
use std::collections::HashSet;
use std::path::Path;
use std::sync::Arc;
use tracing::{info, warn};

use crate::config::Config;
use crate::connector_fs::scan_sources;
use crate::db;
use crate::documents::{DocumentStore, IngestOutcome};
use crate::embedding::create_embedder;
use crate::error::Error;
use crate::migrate;
use crate::sqlite_store::SqliteStore;

#[derive(Debug, Default)]
struct IngestReport {
    found: usize,
    indexed: usize,
    unchanged: usize,
    chunks: usize,
    removed: usize,
    failed: Vec<String>,
}

pub async fn run_ingest(config: &Config, full: bool, prune: bool, dry_run: bool) -> Result<()> {
    let files = scan_sources(&config.ingest)?;

    if dry_run {
        let mut estimated = 0usize;
        for file in &files {
            let text = read_source(&file.path).unwrap_or_default();
            estimated += crate::chunk::chunk_text(
                &text,
                config.chunking.max_chars,
                config.chunking.overlap_chars,
            )
            .len();
        }
        println!("ingest {} (dry-run)", config.ingest.root.display());
        println!("  files found: {}", files.len());
        println!("  estimated chunks: {}", estimated);
        return Ok(());
    }

    if !config.embedding.is_enabled() {
        bail!("Embedding provider is disabled. Set [embedding] provider in config.");
    }

    let pool = db::connect(config).await?;
    migrate::apply(&pool).await?;
    let embedder = create_embedder(&config.embedding)?;
    let documents = DocumentStore::new(
        embedder,
        Arc::new(SqliteStore::new(pool.clone())),
        &config.chunking,
    );

    let mut report = IngestReport {
        found: files.len(),
        ..IngestReport::default()
    };

    for file in &files {
        let result = match read_source(&file.path) {
            Ok(text) => documents.ingest_if_changed(&file.source_id, &text, full).await,
            Err(e) => Err(Error::ingest(&file.source_id, e)),
        };

        match result {
            Ok(IngestOutcome::Indexed(n)) => {
                report.indexed += 1;
                report.chunks += n;
            }
            Ok(IngestOutcome::Unchanged) => report.unchanged += 1,
            Err(e) => {
                warn!(source_id = %file.source_id, error = %e, "ingest failed");
                eprintln!("  failed: {}", e);
                report.failed.push(file.source_id.clone());
            }
        }
    }

    if prune {
        let present: HashSet<&str> = files.iter().map(|f| f.source_id.as_str()).collect();
        for record in documents.list_sources().await? {
            if !present.contains(record.source_id.as_str())
                && documents.remove_source(&record.source_id).await?
            {
                report.removed += 1;
            }
        }
    }

    pool.close().await;

    info!(
        model = documents.embedding_model(),
        found = report.found,
        indexed = report.indexed,
        unchanged = report.unchanged,
        failed = report.failed.len(),
        "ingest finished"
    );

    println!("ingest {}", config.ingest.root.display());
    println!("  files found: {}", report.found);
    println!("  sources indexed: {}", report.indexed);
    println!("  sources unchanged: {}", report.unchanged);
    println!("  chunks written: {}", report.chunks);
    if prune {
        println!("  sources removed: {}", report.removed);
    }
    if !report.failed.is_empty() {
        println!("  sources failed: {}", report.failed.len());
        bail!(
            "{} source(s) failed to ingest: {}",
            report.failed.len(),
            report.failed.join(", ")
        );
    }
    println!("ok");

    Ok(())
}

/// Read a file as text, replacing invalid UTF-8 sequences.
fn read_source(path: &Path) -> Result<String> {
    let bytes =
        std::fs::read(path).with_context(|| format!("Failed to read {}", path.display()))?;
    Ok(String::from_utf8_lossy(&bytes).into_owned())
}
