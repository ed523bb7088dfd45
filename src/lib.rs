//! # COBOL Lens
//!
//! Codebase-grounded question answering for legacy COBOL.
//!
//! COBOL Lens splits COBOL sources into structural chunks (divisions,
//! sections, paragraphs), embeds them into a local SQLite vector index, and
//! answers questions by retrieving, reranking, and quality-gating those
//! chunks before streaming a cited answer.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────┐   ┌──────────────┐   ┌──────────┐
//! │  discover   │──▶│    ingest    │──▶│  SQLite   │
//! │ walk + glob │   │ chunk+embed  │   │  vectors  │
//! └─────────────┘   └──────────────┘   └────┬─────┘
//!                                           │
//!                      ┌────────────────────┤
//!                      ▼                    ▼
//!                 ┌──────────┐        ┌──────────┐
//!                 │   CLI    │        │   HTTP   │
//!                 │  (lens)  │        │  (SSE)   │
//!                 └──────────┘        └──────────┘
//! ```
//!
//! Chunking, retrieval, reranking, gating, and answer streaming live in
//! [`cobol_lens_core`]; this crate supplies the concrete collaborators
//! (HTTP embedding and generation clients, the SQLite index) and the
//! CLI/server surfaces.
//!
//! ## Quick Start
//!
//! ```bash
//! lens init                     # create database
//! lens ingest                   # chunk, embed, and index [ingest] root
//! lens ask "where is FICA withheld?"
//! lens serve                    # start HTTP server
//! ```
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | TOML configuration parsing and validation |
//! | [`discover`] | Source tree walking and glob filtering |
//! | [`ingest`] | Full-rebuild ingestion |
//! | [`embedding`] | OpenAI / Ollama embedders |
//! | [`generation`] | OpenAI chat completions (structured and streamed) |
//! | [`sqlite_index`] | SQLite vector index |
//! | [`server`] | HTTP server |
//! | [`commands`] | CLI command implementations |
//! | [`db`] | Database connection |
//! | [`migrate`] | Schema migrations |

pub mod app;
pub mod commands;
pub mod config;
pub mod db;
pub mod discover;
pub mod embedding;
pub mod generation;
pub mod http;
pub mod ingest;
pub mod logging;
pub mod migrate;
pub mod progress;
pub mod server;
pub mod sqlite_index;
