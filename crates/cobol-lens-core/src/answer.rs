//! Streamed answer assembly.
//!
//! A [`PreparedAnswer`] holds the final ranked results and either a
//! refusal or a ready-to-send generation request. [`PreparedAnswer::into_stream`]
//! turns it into a pull-based event stream:
//!
//! ```text
//! Sources ──▶ Refusal ──────────────────────▶ Done ──▶ Closed
//!    └──────▶ Opening ──▶ Streaming (token*) ──┘
//! ```
//!
//! Exactly one `sources` event is emitted first, then zero or more `token`
//! events forwarded verbatim, then exactly one `done` event. An upstream
//! error yields a single `Err` item and ends the stream without `done`.
//!
//! Nothing runs unless the consumer polls. Dropping the stream drops the
//! open generation stream with it, which closes the upstream connection.

use std::sync::Arc;

use futures::stream::BoxStream;
use futures::StreamExt;
use serde::Serialize;

use crate::error::{PipelineError, Stage};
use crate::gate::REFUSAL_MESSAGE;
use crate::generation::{CompletionRequest, Generator, TokenStream};
use crate::models::RankedResult;

/// Separator between context blocks.
pub const CONTEXT_SEPARATOR: &str = "\n\n---\n\n";

/// One event of the answer protocol.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum AnswerEvent {
    Sources { results: Vec<RankedResult> },
    Token { text: String },
    Done,
}

impl AnswerEvent {
    /// Event name used on the wire (SSE `event:` field).
    pub fn name(&self) -> &'static str {
        match self {
            AnswerEvent::Sources { .. } => "sources",
            AnswerEvent::Token { .. } => "token",
            AnswerEvent::Done => "done",
        }
    }
}

pub type AnswerStream = BoxStream<'static, Result<AnswerEvent, PipelineError>>;

/// Citation-formatted context for the generation prompt.
pub fn build_context(results: &[RankedResult]) -> String {
    results
        .iter()
        .enumerate()
        .map(|(i, r)| format!("[{}] {}\n{}", i + 1, r.chunk().citation(), r.chunk().content))
        .collect::<Vec<_>>()
        .join(CONTEXT_SEPARATOR)
}

pub fn build_user_prompt(context: &str, question: &str) -> String {
    format!("Context:\n{}\n\nQuestion: {}", context, question)
}

enum Plan {
    Refuse,
    Generate {
        generator: Arc<dyn Generator>,
        request: CompletionRequest,
    },
}

/// Results plus the decided answer strategy, ready to stream.
pub struct PreparedAnswer {
    results: Vec<RankedResult>,
    plan: Plan,
}

impl PreparedAnswer {
    /// Gate failure: empty sources, the fixed refusal text, done.
    pub fn refusal() -> Self {
        Self {
            results: Vec::new(),
            plan: Plan::Refuse,
        }
    }

    pub fn generate(
        results: Vec<RankedResult>,
        generator: Arc<dyn Generator>,
        system_prompt: String,
        question: &str,
    ) -> Self {
        let user = build_user_prompt(&build_context(&results), question);
        Self {
            results,
            plan: Plan::Generate {
                generator,
                request: CompletionRequest::new(system_prompt, user),
            },
        }
    }

    pub fn results(&self) -> &[RankedResult] {
        &self.results
    }

    pub fn is_refusal(&self) -> bool {
        matches!(self.plan, Plan::Refuse)
    }

    pub fn into_stream(self) -> AnswerStream {
        futures::stream::unfold(StreamState::Sources(self), next_event).boxed()
    }
}

/// Logs when a stream is dropped while generation is still open.
struct CancelGuard {
    finished: bool,
}

impl Drop for CancelGuard {
    fn drop(&mut self) {
        if !self.finished {
            tracing::debug!("answer stream dropped mid-generation; upstream stream cancelled");
        }
    }
}

enum StreamState {
    Sources(PreparedAnswer),
    Refusal,
    Opening {
        generator: Arc<dyn Generator>,
        request: CompletionRequest,
    },
    Streaming {
        tokens: TokenStream,
        guard: CancelGuard,
    },
    Done,
    Closed,
}

type Step = Option<(Result<AnswerEvent, PipelineError>, StreamState)>;

async fn next_event(state: StreamState) -> Step {
    let mut state = state;
    loop {
        state = match state {
            StreamState::Sources(prepared) => {
                let next = match prepared.plan {
                    Plan::Refuse => StreamState::Refusal,
                    Plan::Generate { generator, request } => {
                        StreamState::Opening { generator, request }
                    }
                };
                let event = AnswerEvent::Sources {
                    results: prepared.results,
                };
                return Some((Ok(event), next));
            }
            StreamState::Refusal => {
                let event = AnswerEvent::Token {
                    text: REFUSAL_MESSAGE.to_string(),
                };
                return Some((Ok(event), StreamState::Done));
            }
            StreamState::Opening { generator, request } => {
                match generator.stream(&request).await {
                    Ok(tokens) => StreamState::Streaming {
                        tokens,
                        guard: CancelGuard { finished: false },
                    },
                    Err(e) => {
                        return Some((
                            Err(PipelineError::upstream(Stage::Generation, e)),
                            StreamState::Closed,
                        ))
                    }
                }
            }
            StreamState::Streaming {
                mut tokens,
                mut guard,
            } => match tokens.next().await {
                Some(Ok(text)) => {
                    return Some((
                        Ok(AnswerEvent::Token { text }),
                        StreamState::Streaming { tokens, guard },
                    ))
                }
                Some(Err(e)) => {
                    guard.finished = true;
                    tracing::warn!(error = %format!("{:#}", e), "generation stream failed");
                    return Some((
                        Err(PipelineError::upstream(Stage::Generation, e)),
                        StreamState::Closed,
                    ));
                }
                None => {
                    guard.finished = true;
                    StreamState::Done
                }
            },
            StreamState::Done => return Some((Ok(AnswerEvent::Done), StreamState::Closed)),
            StreamState::Closed => return None,
        };
    }
}
