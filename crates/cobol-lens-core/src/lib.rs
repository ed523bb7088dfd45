//! # COBOL Lens Core
//!
//! Shared, WASM-safe logic for COBOL Lens: data models, structural
//! chunking, collaborator traits (embedding, generation, vector index),
//! candidate retrieval, reranking, the quality gate, the mode table, and
//! the streamed answer assembler.
//!
//! This crate contains no tokio, sqlx, filesystem I/O, or other
//! native-only dependencies. Concrete collaborators (HTTP clients, the
//! SQLite index) live in the `cobol-lens` app crate.
//!
//! ## Query flow
//!
//! ```text
//! ModeTable ─▶ Retriever ─▶ Reranker ─▶ gate ─▶ PreparedAnswer::into_stream
//!  (prefix)    (embed +     (one graded   (skip        sources → token* → done
//!               2×topK)      completion)   generation)
//! ```

pub mod answer;
pub mod chunk;
pub mod embedding;
pub mod error;
pub mod gate;
pub mod generation;
pub mod models;
pub mod modes;
pub mod pipeline;
pub mod rerank;
pub mod retrieve;
pub mod store;

#[cfg(test)]
pub(crate) mod test_support;
