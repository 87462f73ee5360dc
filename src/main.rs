//! # docchat CLI
//!
//! ## Usage
//!
//! ```bash
//! docchat --config ./config/docchat.toml <command>
//! ```
//!
//! ## Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `docchat init` | Create the SQLite database and run schema migrations |
//! | `docchat ingest` | Index the document folder |
//! | `docchat search "<query>"` | Show the chunks a question would retrieve |
//! | `docchat chat "<question>"` | Ask a question through the full pipeline |
//! | `docchat history <id>` | Print the stored turns of a conversation |
//! | `docchat serve` | Start the HTTP server |
//! | `docchat token <subject>` | Mint a JWT for `auth.mode = "jwt"` |

use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

use docchat::{auth, chat_cmd, config, ingest, migrate, search, server};

/// docchat: retrieval-augmented chat over a document folder.
///
/// All commands accept a `--config` flag pointing to a TOML configuration
/// file. See `config/docchat.example.toml` for a full example.
#[derive(Parser)]
#[command(name = "docchat", version, about = "Retrieval-augmented chat over a document folder")]
struct Cli {
    /// Path to configuration file (TOML).
    #[arg(long, global = true, default_value = "./config/docchat.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Initialize the database schema. Idempotent.
    Init,

    /// Chunk, embed and store every file under `[ingest] root`.
    ///
    /// Unchanged files (same content hash and embedding model) are skipped.
    Ingest {
        /// Re-embed every file, changed or not.
        #[arg(long)]
        full: bool,

        /// Remove sources whose files no longer exist.
        #[arg(long)]
        prune: bool,

        /// Only count files and estimated chunks.
        #[arg(long)]
        dry_run: bool,
    },

    /// Similarity search over indexed chunks.
    Search {
        query: String,

        /// Maximum number of results (defaults to `retrieval.top_k`).
        #[arg(long)]
        limit: Option<usize>,
    },

    /// Ask a question, answer it from the documents and store the turn pair.
    Chat {
        question: String,

        /// Continue an existing conversation; a new id is generated if omitted.
        #[arg(long)]
        conversation: Option<String>,

        #[arg(long)]
        top_k: Option<usize>,
    },

    /// Print the stored turns of a conversation, oldest first.
    History {
        conversation: String,

        #[arg(long)]
        limit: Option<usize>,
    },

    /// Start the HTTP server on `[server] bind`.
    Serve,

    /// Mint a signed JWT (requires the JWT secret env var).
    Token {
        subject: String,

        /// Lifetime in minutes (defaults to `auth.token_ttl_minutes`).
        #[arg(long)]
        ttl_minutes: Option<i64>,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let cfg = config::load_config(&cli.config)?;

    match cli.command {
        Commands::Init => {
            migrate::run_migrations(&cfg).await?;
            println!("Database initialized successfully.");
        }
        Commands::Ingest {
            full,
            prune,
            dry_run,
        } => {
            ingest::run_ingest(&cfg, full, prune, dry_run).await?;
        }
        Commands::Search { query, limit } => {
            search::run_search(&cfg, &query, limit).await?;
        }
        Commands::Chat {
            question,
            conversation,
            top_k,
        } => {
            chat_cmd::run_chat(&cfg, &question, conversation, top_k).await?;
        }
        Commands::History {
            conversation,
            limit,
        } => {
            chat_cmd::run_history(&cfg, &conversation, limit).await?;
        }
        Commands::Serve => {
            server::run_server(&cfg).await?;
        }
        Commands::Token {
            subject,
            ttl_minutes,
        } => {
            auth::run_token(&cfg.auth, &subject, ttl_minutes)?;
        }
    }

    Ok(())
}
