//! Text generation trait.
//!
//! A [`Generator`] produces either a full completion (optionally
//! constrained to a JSON schema, used by the reranker) or a stream of
//! token fragments (used by the answer assembler).

use anyhow::Result;
use async_trait::async_trait;
use futures::stream::BoxStream;

/// Incremental text fragments from a streaming completion.
///
/// Dropping the stream must release the underlying connection.
pub type TokenStream = BoxStream<'static, Result<String>>;

/// A single completion request.
#[derive(Debug, Clone, PartialEq)]
pub struct CompletionRequest {
    pub system: String,
    pub user: String,
    /// JSON schema the response must conform to, if any.
    pub response_schema: Option<serde_json::Value>,
    /// `None` uses the generator's configured default.
    pub temperature: Option<f32>,
    pub max_tokens: Option<u32>,
}

impl CompletionRequest {
    pub fn new(system: impl Into<String>, user: impl Into<String>) -> Self {
        Self {
            system: system.into(),
            user: user.into(),
            response_schema: None,
            temperature: None,
            max_tokens: None,
        }
    }

    pub fn with_schema(mut self, schema: serde_json::Value) -> Self {
        self.response_schema = Some(schema);
        self
    }

    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.temperature = Some(temperature);
        self
    }
}

#[async_trait]
pub trait Generator: Send + Sync {
    /// Produce a full completion.
    async fn complete(&self, request: &CompletionRequest) -> Result<String>;

    /// Open a streaming completion. Errors opening the stream are returned
    /// here; errors after the first fragment arrive as stream items.
    async fn stream(&self, request: &CompletionRequest) -> Result<TokenStream>;
}
