//! Error taxonomy for the query pipeline.
//!
//! Collaborator traits return [`anyhow::Result`]; the pipeline wraps their
//! failures in [`PipelineError::Upstream`] with the stage that failed so
//! callers (HTTP server, CLI) can map them to a status without string
//! matching.

use std::fmt;

/// Pipeline stage that produced an upstream failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Embedding,
    VectorSearch,
    Generation,
}

impl Stage {
    pub fn as_str(&self) -> &'static str {
        match self {
            Stage::Embedding => "embedding",
            Stage::VectorSearch => "vector search",
            Stage::Generation => "generation",
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Failure of a query request.
#[derive(Debug, thiserror::Error)]
pub enum PipelineError {
    /// The request was rejected before any collaborator was called.
    #[error("{0}")]
    Validation(String),

    /// A collaborator call failed.
    #[error("{stage} failed: {source:#}")]
    Upstream {
        stage: Stage,
        #[source]
        source: anyhow::Error,
    },
}

impl PipelineError {
    pub fn validation(msg: impl Into<String>) -> Self {
        PipelineError::Validation(msg.into())
    }

    pub fn upstream(stage: Stage, source: anyhow::Error) -> Self {
        PipelineError::Upstream { stage, source }
    }

    pub fn is_validation(&self) -> bool {
        matches!(self, PipelineError::Validation(_))
    }
}
