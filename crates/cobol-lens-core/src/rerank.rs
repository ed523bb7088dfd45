//! LLM-graded reranking of over-fetched candidates.
//!
//! When retrieval returns more candidates than requested, one structured
//! completion grades every candidate 0–10 against the raw user question and
//! the candidates are reordered by that grade. Any failure (upstream error,
//! unparseable output, schema mismatch) is recovered locally: the first
//! `top_k` candidates are returned in retrieval order without scores.

use std::sync::Arc;

use serde_json::{json, Value};

use crate::generation::{CompletionRequest, Generator};
use crate::models::{RankedResult, SearchCandidate};

/// Characters of chunk content shown to the grader per candidate.
pub const DEFAULT_PREVIEW_CHARS: usize = 600;

/// Highest grade on the rerank scale.
pub const MAX_SCORE: u8 = 10;

const RERANK_SYSTEM_PROMPT: &str = "You grade how useful COBOL source excerpts are for answering a developer's question about a legacy codebase. \
Give every candidate an integer score from 0 (irrelevant) to 10 (directly answers the question). \
Score each candidate independently and return one entry per candidate index.";

#[derive(Clone)]
pub struct Reranker {
    generator: Arc<dyn Generator>,
    preview_chars: usize,
}

impl Reranker {
    pub fn new(generator: Arc<dyn Generator>) -> Self {
        Self {
            generator,
            preview_chars: DEFAULT_PREVIEW_CHARS,
        }
    }

    pub fn with_preview_chars(mut self, preview_chars: usize) -> Self {
        self.preview_chars = preview_chars;
        self
    }

    /// Reorder `candidates` and keep the best `top_k`.
    ///
    /// `query` must be the literal user question, never a mode-augmented
    /// search string.
    pub async fn rerank(
        &self,
        query: &str,
        candidates: Vec<SearchCandidate>,
        top_k: usize,
    ) -> Vec<RankedResult> {
        if candidates.len() <= top_k {
            return candidates.into_iter().map(RankedResult::unscored).collect();
        }

        let request = self.build_request(query, &candidates);
        let scores = match self.generator.complete(&request).await {
            Ok(text) => parse_scores(&text, candidates.len()),
            Err(e) => Err(format!("{:#}", e)),
        };

        match scores {
            Ok(scores) => order_by_scores(candidates, &scores, top_k),
            Err(reason) => {
                tracing::warn!(%reason, "rerank failed; falling back to similarity order");
                candidates
                    .into_iter()
                    .take(top_k)
                    .map(RankedResult::unscored)
                    .collect()
            }
        }
    }

    fn build_request(&self, query: &str, candidates: &[SearchCandidate]) -> CompletionRequest {
        let listing = candidates
            .iter()
            .enumerate()
            .map(|(i, c)| {
                let preview: String = c.chunk.content.chars().take(self.preview_chars).collect();
                format!("[{}] {}\n{}", i, c.chunk.citation(), preview)
            })
            .collect::<Vec<_>>()
            .join("\n\n");

        let user = format!("Question: {}\n\nCandidates:\n\n{}", query, listing);
        CompletionRequest::new(RERANK_SYSTEM_PROMPT, user)
            .with_schema(score_schema())
            .with_temperature(0.0)
    }
}

/// JSON schema for `{"scores": [{"index": int, "score": int}]}`.
pub fn score_schema() -> Value {
    json!({
        "type": "object",
        "properties": {
            "scores": {
                "type": "array",
                "items": {
                    "type": "object",
                    "properties": {
                        "index": { "type": "integer" },
                        "score": { "type": "integer", "minimum": 0, "maximum": MAX_SCORE }
                    },
                    "required": ["index", "score"],
                    "additionalProperties": false
                }
            }
        },
        "required": ["scores"],
        "additionalProperties": false
    })
}

/// Parse grader output into one score per candidate.
///
/// Accepts `{"scores": [...]}` or a bare array, optionally wrapped in a
/// markdown code fence. Every entry must carry numeric `index` and `score`.
/// Out-of-range indices are ignored and unscored candidates get 0.
pub fn parse_scores(text: &str, count: usize) -> Result<Vec<u8>, String> {
    let value: Value = serde_json::from_str(strip_code_fence(text))
        .map_err(|e| format!("rerank output is not JSON: {}", e))?;

    let entries = match &value {
        Value::Array(items) => items,
        Value::Object(map) => match map.get("scores") {
            Some(Value::Array(items)) => items,
            _ => return Err("rerank output has no scores array".to_string()),
        },
        _ => return Err("rerank output is neither an object nor an array".to_string()),
    };

    let mut scores = vec![0u8; count];
    for entry in entries {
        let index = entry.get("index").and_then(Value::as_f64);
        let score = entry.get("score").and_then(Value::as_f64);
        let (index, score) = match (index, score) {
            (Some(i), Some(s)) => (i, s),
            _ => return Err(format!("malformed rerank entry: {}", entry)),
        };
        if index < 0.0 || index.fract() != 0.0 || index as usize >= count {
            continue;
        }
        scores[index as usize] = score.round().clamp(0.0, MAX_SCORE as f64) as u8;
    }
    Ok(scores)
}

fn strip_code_fence(text: &str) -> &str {
    let trimmed = text.trim();
    match trimmed.strip_prefix("```") {
        Some(rest) => {
            let body = rest.trim_start_matches(|c: char| c.is_ascii_alphabetic());
            body.strip_suffix("```").unwrap_or(body).trim()
        }
        None => trimmed,
    }
}

fn order_by_scores(
    candidates: Vec<SearchCandidate>,
    scores: &[u8],
    top_k: usize,
) -> Vec<RankedResult> {
    let mut ranked: Vec<RankedResult> = candidates
        .into_iter()
        .zip(scores.iter())
        .map(|(candidate, &score)| RankedResult {
            candidate,
            rerank_score: Some(score),
        })
        .collect();
    ranked.sort_by(|a, b| b.rerank_score.cmp(&a.rerank_score));
    ranked.truncate(top_k);
    ranked
}
