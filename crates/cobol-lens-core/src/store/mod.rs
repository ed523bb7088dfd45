//! Vector index abstraction.
//!
//! The [`VectorIndex`] trait is the only storage seam the query pipeline
//! needs: upsert vectors with metadata, query nearest neighbours with an
//! optional metadata equality filter, and clear for a full rebuild.
//!
//! Metadata crosses this boundary as a loose [`serde_json::Value`]. Readers
//! validate it through [`ChunkMetadata`] and skip records that do not fit
//! the schema instead of trusting them.
//!
//! Implementations must be `Send + Sync` to work with async runtimes.

pub mod memory;

use anyhow::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::chunk::chunk_id;
use crate::models::{Chunk, ChunkType};

/// A vector with its chunk metadata, ready to upsert.
#[derive(Debug, Clone, PartialEq)]
pub struct VectorRecord {
    pub id: String,
    pub vector: Vec<f32>,
    pub metadata: serde_json::Value,
}

impl VectorRecord {
    /// Build a record for a chunk, serializing its [`ChunkMetadata`].
    pub fn from_chunk(chunk: &Chunk, vector: Vec<f32>) -> Result<Self> {
        Ok(Self {
            id: chunk.id.clone(),
            vector,
            metadata: serde_json::to_value(ChunkMetadata::from_chunk(chunk))?,
        })
    }
}

/// Equality filter on one top-level metadata field.
#[derive(Debug, Clone, PartialEq)]
pub struct MetadataFilter {
    pub field: String,
    pub equals: serde_json::Value,
}

impl MetadataFilter {
    pub fn file_path(path: &str) -> Self {
        Self {
            field: "file_path".to_string(),
            equals: serde_json::Value::String(path.to_string()),
        }
    }
}

/// Nearest-neighbour query.
#[derive(Debug, Clone, PartialEq)]
pub struct VectorQuery {
    pub vector: Vec<f32>,
    pub top_k: usize,
    pub filter: Option<MetadataFilter>,
}

/// One neighbour returned by [`VectorIndex::query`], best first.
#[derive(Debug, Clone, PartialEq)]
pub struct VectorMatch {
    pub id: String,
    pub score: f32,
    pub metadata: serde_json::Value,
}

#[async_trait]
pub trait VectorIndex: Send + Sync {
    /// Insert or replace records by ID. Callers send at most
    /// [`max_upsert_batch`](VectorIndex::max_upsert_batch) records per call.
    async fn upsert(&self, records: &[VectorRecord]) -> Result<()>;

    /// Return up to `top_k` matches ordered by descending similarity.
    async fn query(&self, query: &VectorQuery) -> Result<Vec<VectorMatch>>;

    /// Remove every record.
    async fn clear(&self) -> Result<()>;

    /// Number of stored records.
    async fn count(&self) -> Result<usize>;

    /// Largest batch accepted by a single [`upsert`](VectorIndex::upsert).
    fn max_upsert_batch(&self) -> usize;
}

/// Stored schema of a chunk inside the vector index.
///
/// `file_path`, `start_line`, `end_line`, and `content` are required.
/// The rest fall back to defaults when absent.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChunkMetadata {
    pub file_path: String,
    pub start_line: usize,
    pub end_line: usize,
    pub content: String,
    #[serde(default)]
    pub chunk_type: Option<String>,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent_section: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub program_id: Option<String>,
}

impl ChunkMetadata {
    pub fn from_chunk(chunk: &Chunk) -> Self {
        Self {
            file_path: chunk.file_path.clone(),
            start_line: chunk.start_line,
            end_line: chunk.end_line,
            content: chunk.content.clone(),
            chunk_type: Some(chunk.chunk_type.as_str().to_string()),
            name: Some(chunk.name.clone()),
            parent_section: chunk.parent_section.clone(),
            program_id: chunk.program_id.clone(),
        }
    }

    /// Validate loose metadata. Returns a description of the problem when
    /// the value does not fit the schema.
    pub fn parse(value: &serde_json::Value) -> std::result::Result<Self, String> {
        let meta: ChunkMetadata =
            serde_json::from_value(value.clone()).map_err(|e| e.to_string())?;
        if meta.start_line == 0 || meta.end_line < meta.start_line {
            return Err(format!(
                "invalid line range {}-{}",
                meta.start_line, meta.end_line
            ));
        }
        Ok(meta)
    }

    /// Rebuild a [`Chunk`], applying defaults for optional fields.
    pub fn into_chunk(self) -> Chunk {
        let chunk_type = self
            .chunk_type
            .as_deref()
            .and_then(ChunkType::parse)
            .unwrap_or(ChunkType::Fixed);
        let name = self
            .name
            .unwrap_or_else(|| format!("{}:{}", self.file_path, self.start_line));
        Chunk {
            id: chunk_id(&self.file_path, self.start_line),
            content: self.content,
            file_path: self.file_path,
            start_line: self.start_line,
            end_line: self.end_line,
            chunk_type,
            name,
            parent_section: self.parent_section,
            program_id: self.program_id,
        }
    }
}
