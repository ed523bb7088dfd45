//! Core data models used throughout COBOL Lens.
//!
//! These types represent the source documents, chunks, and ranked search
//! results that flow through the ingestion and retrieval pipeline.

use serde::{Deserialize, Serialize};
use std::fmt;

/// A discovered source file, consumed once per ingestion run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceDocument {
    /// Stable relative identifier, `/`-separated (e.g. `"src/PAYROLL.cbl"`).
    pub path: String,
    /// Full text of the file.
    pub content: String,
    /// Number of lines in `content`.
    pub line_count: usize,
}

impl SourceDocument {
    pub fn new(path: impl Into<String>, content: impl Into<String>) -> Self {
        let content = content.into();
        let line_count = content.lines().count();
        Self {
            path: path.into(),
            content,
            line_count,
        }
    }

    /// Lowercased file extension, if any.
    pub fn extension(&self) -> Option<String> {
        let file_name = self.file_name();
        file_name
            .rsplit_once('.')
            .filter(|(stem, _)| !stem.is_empty())
            .map(|(_, ext)| ext.to_ascii_lowercase())
    }

    /// The last path segment.
    pub fn file_name(&self) -> &str {
        self.path.rsplit(['/', '\\']).next().unwrap_or(&self.path)
    }
}

/// Structural kind of a chunk.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChunkType {
    Division,
    Section,
    Paragraph,
    Data,
    Fixed,
}

impl ChunkType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ChunkType::Division => "division",
            ChunkType::Section => "section",
            ChunkType::Paragraph => "paragraph",
            ChunkType::Data => "data",
            ChunkType::Fixed => "fixed",
        }
    }

    /// Parse a stored label. Unknown labels are `None`.
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "division" => Some(ChunkType::Division),
            "section" => Some(ChunkType::Section),
            "paragraph" => Some(ChunkType::Paragraph),
            "data" => Some(ChunkType::Data),
            "fixed" => Some(ChunkType::Fixed),
            _ => None,
        }
    }
}

impl fmt::Display for ChunkType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A citeable, line-addressable unit of source text.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Chunk {
    /// Deterministic ID derived from `file_path` and `start_line`.
    pub id: String,
    pub content: String,
    pub file_path: String,
    /// 1-based, inclusive.
    pub start_line: usize,
    /// 1-based, inclusive.
    pub end_line: usize,
    pub chunk_type: ChunkType,
    /// Human label, e.g. `"MAIN-PARA"` or `"WORKING-STORAGE SECTION"`.
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent_section: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub program_id: Option<String>,
}

impl Chunk {
    /// Citation header used in prompts: `path:start-end (type: name)`.
    pub fn citation(&self) -> String {
        format!(
            "{}:{}-{} ({}: {})",
            self.file_path, self.start_line, self.end_line, self.chunk_type, self.name
        )
    }
}

/// A chunk returned by similarity search.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SearchCandidate {
    pub chunk: Chunk,
    /// Cosine similarity; only comparable within one query.
    pub similarity_score: f32,
}

/// A candidate after reranking.
///
/// `rerank_score` is absent when the reranker was skipped or failed, in
/// which case ordering falls back to `similarity_score`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RankedResult {
    #[serde(flatten)]
    pub candidate: SearchCandidate,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rerank_score: Option<u8>,
}

impl RankedResult {
    pub fn unscored(candidate: SearchCandidate) -> Self {
        Self {
            candidate,
            rerank_score: None,
        }
    }

    pub fn chunk(&self) -> &Chunk {
        &self.candidate.chunk
    }

    pub fn similarity_score(&self) -> f32 {
        self.candidate.similarity_score
    }
}
