//! Concrete [`Generator`] implementations.
//!
//! [`OpenAIGenerator`] talks to an OpenAI-compatible
//! `/v1/chat/completions` endpoint. Structured completions (used by the
//! reranker) send a strict `json_schema` response format; streamed
//! completions parse the server-sent event body with `eventsource-stream`.
//!
//! Retries apply only to opening a request. Once a stream has produced its
//! first fragment, errors are surfaced to the caller as stream items. A body
//! that ends before `[DONE]` or a `finish_reason` is an error, so a truncated
//! answer never looks complete.
//!
//! `timeout_secs` bounds a whole structured completion, but only connecting
//! and each read of a streamed one.

use anyhow::{anyhow, bail, Result};
use async_trait::async_trait;
use eventsource_stream::Eventsource;
use futures::{stream, StreamExt};
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Duration;

use cobol_lens_core::generation::{CompletionRequest, Generator, TokenStream};

use crate::config::GenerationConfig;
use crate::http;

pub const DEFAULT_OPENAI_URL: &str = "https://api.openai.com";

/// Placeholder used when `[generation] provider = "disabled"`.
pub struct DisabledGenerator;

#[async_trait]
impl Generator for DisabledGenerator {
    async fn complete(&self, _request: &CompletionRequest) -> Result<String> {
        bail!("Generation provider is disabled. Set [generation] provider in the config.")
    }

    async fn stream(&self, _request: &CompletionRequest) -> Result<TokenStream> {
        bail!("Generation provider is disabled. Set [generation] provider in the config.")
    }
}

pub struct OpenAIGenerator {
    client: reqwest::Client,
    base_url: String,
    api_key: String,
    model: String,
    temperature: f32,
    max_tokens: Option<u32>,
    max_retries: u32,
    timeout: Duration,
}

impl OpenAIGenerator {
    /// Build from config, reading the key from `OPENAI_API_KEY`.
    pub fn new(config: &GenerationConfig) -> Result<Self> {
        let api_key =
            std::env::var("OPENAI_API_KEY").map_err(|_| anyhow!("OPENAI_API_KEY not set"))?;
        Self::with_api_key(config, api_key)
    }

    pub fn with_api_key(config: &GenerationConfig, api_key: impl Into<String>) -> Result<Self> {
        let model = config
            .model
            .clone()
            .ok_or_else(|| anyhow!("generation.model required"))?;
        Ok(Self {
            client: http::streaming_client(config.timeout_secs)?,
            base_url: config
                .url
                .as_deref()
                .unwrap_or(DEFAULT_OPENAI_URL)
                .trim_end_matches('/')
                .to_string(),
            api_key: api_key.into(),
            model,
            temperature: config.temperature,
            max_tokens: config.max_tokens,
            max_retries: config.max_retries,
            timeout: Duration::from_secs(config.timeout_secs),
        })
    }

    fn request_body(&self, request: &CompletionRequest, stream: bool) -> Value {
        let mut body = json!({
            "model": self.model,
            "messages": [
                { "role": "system", "content": request.system },
                { "role": "user", "content": request.user },
            ],
            "temperature": request.temperature.unwrap_or(self.temperature),
        });

        if let Some(max_tokens) = request.max_tokens.or(self.max_tokens) {
            body["max_tokens"] = json!(max_tokens);
        }
        if let Some(schema) = &request.response_schema {
            body["response_format"] = json!({
                "type": "json_schema",
                "json_schema": {
                    "name": "response",
                    "schema": schema,
                    "strict": true,
                },
            });
        }
        if stream {
            body["stream"] = json!(true);
        }
        body
    }

    /// POST a chat completion. `whole_request` adds a total timeout on top of
    /// the client's connect and read timeouts.
    async fn send(&self, body: &Value, whole_request: bool) -> Result<reqwest::Response> {
        let url = format!("{}/v1/chat/completions", self.base_url);
        http::send_with_retry("OpenAI API", self.max_retries, || {
            let builder = self
                .client
                .post(&url)
                .bearer_auth(&self.api_key)
                .json(body);
            if whole_request {
                builder.timeout(self.timeout)
            } else {
                builder
            }
        })
        .await
    }
}

#[async_trait]
impl Generator for OpenAIGenerator {
    async fn complete(&self, request: &CompletionRequest) -> Result<String> {
        let body = self.request_body(request, false);
        let response = self.send(&body, true).await?;
        let json: Value = response.json().await?;

        json.pointer("/choices/0/message/content")
            .and_then(Value::as_str)
            .map(str::to_string)
            .ok_or_else(|| anyhow!("Invalid OpenAI response: missing choices[0].message.content"))
    }

    async fn stream(&self, request: &CompletionRequest) -> Result<TokenStream> {
        let body = self.request_body(request, true);
        let response = self.send(&body, false).await?;

        let events = response.bytes_stream().eventsource().boxed();
        let tokens = stream::unfold(Some((events, false)), |state| async move {
            let (mut events, mut finished) = state?;
            loop {
                match events.next().await {
                    Some(Ok(event)) if event.data.trim() == "[DONE]" => return None,
                    Some(Ok(event)) => match parse_delta(&event.data) {
                        Ok(delta) => {
                            finished |= delta.finished;
                            if let Some(token) = delta.content {
                                return Some((Ok(token), Some((events, finished))));
                            }
                        }
                        Err(e) => return Some((Err(e), None)),
                    },
                    Some(Err(e)) => {
                        return Some((Err(anyhow!("generation stream error: {}", e)), None))
                    }
                    None if finished => return None,
                    None => {
                        return Some((Err(anyhow!("generation stream ended before [DONE]")), None))
                    }
                }
            }
        })
        .boxed();

        Ok(tokens)
    }
}

/// One parsed streaming chunk.
#[derive(Debug, Default, PartialEq)]
struct Delta {
    content: Option<String>,
    finished: bool,
}

/// Extract the content fragment and completion flag from one streamed chunk.
///
/// `content` is `None` for role-only or empty deltas.
fn parse_delta(data: &str) -> Result<Delta> {
    let json: Value = serde_json::from_str(data)
        .map_err(|e| anyhow!("generation stream sent invalid JSON: {}", e))?;

    if let Some(error) = json.get("error") {
        bail!("generation stream error: {}", error);
    }

    Ok(Delta {
        content: json
            .pointer("/choices/0/delta/content")
            .and_then(Value::as_str)
            .filter(|s| !s.is_empty())
            .map(str::to_string),
        finished: json
            .pointer("/choices/0/finish_reason")
            .is_some_and(|reason| !reason.is_null()),
    })
}

/// Create the appropriate [`Generator`] based on configuration.
pub fn create_generator(config: &GenerationConfig) -> Result<Arc<dyn Generator>> {
    match config.provider.as_str() {
        "disabled" => Ok(Arc::new(DisabledGenerator)),
        "openai" => Ok(Arc::new(OpenAIGenerator::new(config)?)),
        other => bail!("Unknown generation provider: {}", other),
    }
}
