//! Per-request orchestration: mode → retrieval → rerank → gate → answer.
//!
//! Everything up to the generation call runs in [`Pipeline::prepare`], so a
//! caller can surface validation and retrieval failures before it commits
//! to a streamed response. The returned [`PreparedAnswer`] is then streamed
//! or collected with [`Pipeline::answer`].

use std::sync::Arc;
use std::time::Instant;

use futures::StreamExt;
use serde::{Deserialize, Serialize};

use crate::answer::{AnswerEvent, PreparedAnswer};
use crate::embedding::Embedder;
use crate::error::PipelineError;
use crate::gate;
use crate::generation::Generator;
use crate::models::{Chunk, RankedResult};
use crate::modes::{augment_query, ModeConfig, ModeTable, DEFAULT_MODE};
use crate::rerank::{Reranker, DEFAULT_PREVIEW_CHARS};
use crate::retrieve::Retriever;
use crate::store::VectorIndex;

/// Upper bound on `top_k` accepted from callers.
pub const DEFAULT_MAX_TOP_K: usize = 50;

/// A question for the pipeline.
#[derive(Debug, Clone, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AnswerRequest {
    pub query: String,
    #[serde(default)]
    pub mode: Option<String>,
    #[serde(default)]
    pub top_k: Option<usize>,
}

impl AnswerRequest {
    pub fn new(query: impl Into<String>) -> Self {
        Self {
            query: query.into(),
            ..Default::default()
        }
    }

    pub fn with_mode(mut self, mode: impl Into<String>) -> Self {
        self.mode = Some(mode.into());
        self
    }

    pub fn with_top_k(mut self, top_k: usize) -> Self {
        self.top_k = Some(top_k);
        self
    }
}

/// Collected, non-streamed answer.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AnswerResponse {
    pub answer: String,
    pub results: Vec<RankedResult>,
    pub latency_ms: u64,
}

pub struct Pipeline {
    retriever: Retriever,
    reranker: Reranker,
    generator: Arc<dyn Generator>,
    modes: ModeTable,
    max_top_k: usize,
}

impl Pipeline {
    pub fn new(
        embedder: Arc<dyn Embedder>,
        index: Arc<dyn VectorIndex>,
        generator: Arc<dyn Generator>,
    ) -> Self {
        Self {
            retriever: Retriever::new(embedder, index),
            reranker: Reranker::new(generator.clone()).with_preview_chars(DEFAULT_PREVIEW_CHARS),
            generator,
            modes: ModeTable::builtin(),
            max_top_k: DEFAULT_MAX_TOP_K,
        }
    }

    pub fn with_max_top_k(mut self, max_top_k: usize) -> Self {
        self.max_top_k = max_top_k.max(1);
        self
    }

    pub fn with_preview_chars(mut self, preview_chars: usize) -> Self {
        self.reranker = self.reranker.with_preview_chars(preview_chars);
        self
    }

    pub fn modes(&self) -> &ModeTable {
        &self.modes
    }

    /// Check the request and resolve its mode and `top_k`.
    pub fn validate(&self, req: &AnswerRequest) -> Result<(&ModeConfig, usize), PipelineError> {
        if req.query.trim().is_empty() {
            return Err(PipelineError::validation("query must not be empty"));
        }

        let mode_id = req.mode.as_deref().unwrap_or(DEFAULT_MODE);
        let mode = self.modes.get(mode_id).ok_or_else(|| {
            PipelineError::validation(format!(
                "unknown mode '{}'; expected one of: {}",
                mode_id,
                self.modes.ids().join(", ")
            ))
        })?;

        let top_k = req.top_k.unwrap_or(mode.default_top_k);
        if top_k == 0 || top_k > self.max_top_k {
            return Err(PipelineError::validation(format!(
                "topK must be between 1 and {}",
                self.max_top_k
            )));
        }

        Ok((mode, top_k))
    }

    /// Search and rerank without generating.
    pub async fn retrieve(&self, req: &AnswerRequest) -> Result<Vec<RankedResult>, PipelineError> {
        let (mode, top_k) = self.validate(req)?;
        self.ranked(mode, req, top_k).await
    }

    async fn ranked(
        &self,
        mode: &ModeConfig,
        req: &AnswerRequest,
        top_k: usize,
    ) -> Result<Vec<RankedResult>, PipelineError> {
        let search_text = augment_query(mode, &req.query);
        let candidates = self.retriever.search(&search_text, top_k).await?;
        Ok(self.reranker.rerank(&req.query, candidates, top_k).await)
    }

    /// Run every stage before generation and decide how to answer.
    pub async fn prepare(&self, req: &AnswerRequest) -> Result<PreparedAnswer, PipelineError> {
        let (mode, top_k) = self.validate(req)?;
        let results = self.ranked(mode, req, top_k).await?;

        if mode.gated && !gate::passes(&results) {
            tracing::info!(
                mode = mode.id,
                candidates = results.len(),
                "quality gate failed; refusing without generation"
            );
            return Ok(PreparedAnswer::refusal());
        }

        tracing::debug!(mode = mode.id, results = results.len(), "generating answer");
        Ok(PreparedAnswer::generate(
            results,
            self.generator.clone(),
            mode.full_system_prompt(),
            &req.query,
        ))
    }

    /// Prepare and collect the full answer.
    pub async fn answer(&self, req: &AnswerRequest) -> Result<AnswerResponse, PipelineError> {
        let started = Instant::now();
        let prepared = self.prepare(req).await?;

        let mut stream = prepared.into_stream();
        let mut answer = String::new();
        let mut results = Vec::new();
        while let Some(event) = stream.next().await {
            match event? {
                AnswerEvent::Sources { results: r } => results = r,
                AnswerEvent::Token { text } => answer.push_str(&text),
                AnswerEvent::Done => break,
            }
        }

        Ok(AnswerResponse {
            answer,
            results,
            latency_ms: started.elapsed().as_millis() as u64,
        })
    }

    /// Every indexed chunk of one file, in line order.
    pub async fn file_context(&self, file_path: &str) -> Result<Vec<Chunk>, PipelineError> {
        if file_path.trim().is_empty() {
            return Err(PipelineError::validation("filePath must not be empty"));
        }
        self.retriever.file_chunks(file_path).await
    }
}
