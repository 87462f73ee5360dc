//! # docchat
//!
//! Retrieval-augmented chat over a folder of documents.
//!
//! Markdown and text files are chunked, embedded and stored in SQLite. A
//! chat request retrieves the closest chunks, adds the conversation's recent
//! turns, renders a prompt, asks a language model and stores the new
//! question/answer pair.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────┐   ┌─────────────┐   ┌──────────────┐
//! │ docs folder │──▶│ Chunk+Embed │──▶│    SQLite     │
//! │  (ingest)   │   │ (documents) │   │ chunks+turns │
//! └─────────────┘   └─────────────┘   └──────┬───────┘
//!                                            │
//!        ┌──────────┐   ┌──────────────┐     │
//!        │   HTTP   │──▶│ Auth → Chat  │◀────┘
//!        │ (server) │   │ Orchestrator │──▶ model
//!        └──────────┘   └──────────────┘
//! ```
//!
//! ## Quick Start
//!
//! ```bash
//! docchat init                          # create database
//! docchat ingest                        # index ./docs
//! docchat search "return policy"        # inspect retrieval
//! docchat chat "What is the return policy?"
//! docchat serve                         # start HTTP server
//! ```
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | TOML configuration parsing |
//! | [`error`] | Pipeline error taxonomy |
//! | [`models`] | Core data types |
//! | [`chunk`] | Text chunking |
//! | [`embedding`] | Embedding provider abstraction |
//! | [`completion`] | Language model abstraction |
//! | [`store`] | Vector index and conversation store traits |
//! | [`sqlite_store`] | SQLite implementation of the store traits |
//! | [`documents`] | Document store adapter (ingest + search) |
//! | [`prompt`] | Prompt template parsing and rendering |
//! | [`chat`] | Chat orchestrator |
//! | [`auth`] | Credential checks and JWT issuing |
//! | [`server`] | HTTP server |
//! | [`connector_fs`] | Document folder walker |
//! | [`ingest`] | Batch ingestion command |
//! | [`search`] | Search command |
//! | [`chat_cmd`] | Chat and history commands |
//! | [`db`] | Database connection |
//! | [`migrate`] | Schema migrations |

pub mod auth;
pub mod chat;
pub mod chat_cmd;
pub mod chunk;
pub mod completion;
pub mod config;
pub mod connector_fs;
pub mod db;
pub mod documents;
pub mod embedding;
pub mod error;
pub mod ingest;
pub mod migrate;
pub mod models;
pub mod prompt;
pub mod search;
pub mod server;
pub mod sqlite_store;
pub mod store;
