//! Candidate retrieval over the vector index.
//!
//! The retriever embeds a (possibly mode-augmented) query and over-fetches
//! `2 × top_k` neighbours so the reranker has room to reorder. Every match
//! is validated through [`ChunkMetadata`]; records that do not fit the
//! schema are skipped with a warning.

use std::sync::Arc;

use crate::embedding::Embedder;
use crate::error::{PipelineError, Stage};
use crate::models::{Chunk, SearchCandidate};
use crate::store::{ChunkMetadata, MetadataFilter, VectorIndex, VectorMatch, VectorQuery};

/// Over-fetch multiplier applied to `top_k` before reranking.
pub const OVERFETCH_FACTOR: usize = 2;

/// Ceiling on chunks returned for a single file.
pub const FILE_CONTEXT_CEILING: usize = 1000;

#[derive(Clone)]
pub struct Retriever {
    embedder: Arc<dyn Embedder>,
    index: Arc<dyn VectorIndex>,
}

impl Retriever {
    pub fn new(embedder: Arc<dyn Embedder>, index: Arc<dyn VectorIndex>) -> Self {
        Self { embedder, index }
    }

    /// Nearest `2 × top_k` candidates for `query_text`, best first.
    pub async fn search(
        &self,
        query_text: &str,
        top_k: usize,
    ) -> Result<Vec<SearchCandidate>, PipelineError> {
        let vector = self
            .embedder
            .embed_one(query_text)
            .await
            .map_err(|e| PipelineError::upstream(Stage::Embedding, e))?;

        let matches = self
            .index
            .query(&VectorQuery {
                vector,
                top_k: top_k.saturating_mul(OVERFETCH_FACTOR),
                filter: None,
            })
            .await
            .map_err(|e| PipelineError::upstream(Stage::VectorSearch, e))?;

        let mut candidates: Vec<SearchCandidate> = matches
            .into_iter()
            .filter_map(|m| {
                let similarity_score = m.score;
                to_chunk(m).map(|chunk| SearchCandidate {
                    chunk,
                    similarity_score,
                })
            })
            .collect();
        candidates.sort_by(|a, b| b.similarity_score.total_cmp(&a.similarity_score));

        tracing::debug!(count = candidates.len(), top_k, "retrieved candidates");
        Ok(candidates)
    }

    /// Every indexed chunk of `file_path`, ordered by start line.
    pub async fn file_chunks(&self, file_path: &str) -> Result<Vec<Chunk>, PipelineError> {
        let matches = self
            .index
            .query(&VectorQuery {
                vector: vec![0.0; self.embedder.dims()],
                top_k: FILE_CONTEXT_CEILING,
                filter: Some(MetadataFilter::file_path(file_path)),
            })
            .await
            .map_err(|e| PipelineError::upstream(Stage::VectorSearch, e))?;

        let mut chunks: Vec<Chunk> = matches.into_iter().filter_map(to_chunk).collect();
        chunks.sort_by_key(|c| c.start_line);
        Ok(chunks)
    }
}

fn to_chunk(m: VectorMatch) -> Option<Chunk> {
    match ChunkMetadata::parse(&m.metadata) {
        Ok(meta) => Some(meta.into_chunk()),
        Err(reason) => {
            tracing::warn!(id = %m.id, %reason, "skipping vector record with invalid metadata");
            None
        }
    }
}
