//! HTTP server for the query pipeline.
//!
//! # Endpoints
//!
//! | Method | Path | Description |
//! |--------|------|-------------|
//! | `GET`  | `/health` | Health check (version, indexed chunk count) |
//! | `GET`  | `/modes` | List the built-in answer modes |
//! | `POST` | `/query` | Chat-mode answer as a server-sent event stream |
//! | `POST` | `/query/complete` | Chat-mode answer collected into one JSON body |
//! | `POST` | `/analyze` | Answer in an explicit mode, streamed |
//! | `POST` | `/file-context` | Every indexed chunk of one file |
//!
//! # Streaming
//!
//! Streamed endpoints emit `sources`, then zero or more `token`, then
//! `done`. Each SSE `event:` field carries the event name and `data:` the
//! JSON event, e.g.
//!
//! ```text
//! event: token
//! data: {"type":"token","text":"PAYROLL-CALC "}
//! ```
//!
//! Validation and retrieval failures are reported as JSON errors before the
//! stream opens. A generation failure after the stream opens ends it
//! without `done`. A client disconnect drops the upstream generation
//! stream.
//!
//! # Error Contract
//!
//! ```json
//! { "error": { "code": "bad_request", "message": "query must not be empty" } }
//! ```
//!
//! Error codes: `bad_request` (400), `upstream_error` (502), `internal` (500).
//!
//! # CORS
//!
//! All origins, methods, and headers are permitted to support browser-based
//! clients.

use axum::{
    extract::{rejection::JsonRejection, State},
    http::StatusCode,
    response::{
        sse::{Event, KeepAlive, Sse},
        IntoResponse, Response,
    },
    routing::{get, post},
    Json, Router,
};
use futures::{future, Stream, StreamExt};
use serde::{Deserialize, Serialize};
use std::convert::Infallible;
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};

use cobol_lens_core::answer::{AnswerEvent, PreparedAnswer};
use cobol_lens_core::error::PipelineError;
use cobol_lens_core::models::Chunk;
use cobol_lens_core::modes::{ModeConfig, DEFAULT_MODE};
use cobol_lens_core::pipeline::{AnswerRequest, AnswerResponse, Pipeline};
use cobol_lens_core::store::VectorIndex;

use crate::app::Lens;
use crate::config::Config;

/// Shared application state passed to all route handlers via Axum's `State` extractor.
#[derive(Clone)]
pub struct AppState {
    pub pipeline: Arc<Pipeline>,
    /// Used for the indexed-chunk count in `/health`.
    pub index: Arc<dyn VectorIndex>,
}

/// Starts the HTTP server.
///
/// Binds to `[server].bind` and runs until the process is terminated.
pub async fn run_server(config: &Config) -> anyhow::Result<()> {
    let lens = Lens::open(config).await?;
    let state = AppState {
        pipeline: lens.pipeline.clone(),
        index: lens.index.clone(),
    };

    let bind_addr = config.server.bind.clone();
    let listener = tokio::net::TcpListener::bind(&bind_addr).await?;
    println!("COBOL Lens listening on http://{}", bind_addr);
    tracing::info!(%bind_addr, "server started");

    axum::serve(listener, build_router(state)).await?;
    Ok(())
}

/// Build the router with every route and the CORS layer.
pub fn build_router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/health", get(handle_health))
        .route("/modes", get(handle_modes))
        .route("/query", post(handle_query))
        .route("/query/complete", post(handle_query_complete))
        .route("/analyze", post(handle_analyze))
        .route("/file-context", post(handle_file_context))
        .layer(cors)
        .with_state(state)
}

// ============ Error response ============

#[derive(Serialize)]
struct ErrorBody {
    error: ErrorDetail,
}

#[derive(Serialize)]
struct ErrorDetail {
    code: String,
    message: String,
}

/// Internal error type that converts into an Axum HTTP response.
#[derive(Debug)]
struct AppError {
    status: StatusCode,
    code: String,
    message: String,
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let body = ErrorBody {
            error: ErrorDetail {
                code: self.code,
                message: self.message,
            },
        };
        (self.status, Json(body)).into_response()
    }
}

fn bad_request(message: impl Into<String>) -> AppError {
    AppError {
        status: StatusCode::BAD_REQUEST,
        code: "bad_request".to_string(),
        message: message.into(),
    }
}

fn upstream_error(message: impl Into<String>) -> AppError {
    AppError {
        status: StatusCode::BAD_GATEWAY,
        code: "upstream_error".to_string(),
        message: message.into(),
    }
}

fn internal(message: impl Into<String>) -> AppError {
    AppError {
        status: StatusCode::INTERNAL_SERVER_ERROR,
        code: "internal".to_string(),
        message: message.into(),
    }
}

impl From<PipelineError> for AppError {
    fn from(err: PipelineError) -> Self {
        match &err {
            PipelineError::Validation(msg) => bad_request(msg.clone()),
            PipelineError::Upstream { stage, .. } => {
                tracing::warn!(%stage, error = %err, "upstream failure");
                upstream_error(err.to_string())
            }
        }
    }
}

impl From<JsonRejection> for AppError {
    fn from(rejection: JsonRejection) -> Self {
        bad_request(rejection.body_text())
    }
}

// ============ GET /health ============

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct HealthResponse {
    status: String,
    version: String,
    indexed_chunks: usize,
}

async fn handle_health(State(state): State<AppState>) -> Result<Json<HealthResponse>, AppError> {
    let indexed_chunks = state
        .index
        .count()
        .await
        .map_err(|e| internal(format!("{:#}", e)))?;
    Ok(Json(HealthResponse {
        status: "ok".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        indexed_chunks,
    }))
}

// ============ GET /modes ============

async fn handle_modes(State(state): State<AppState>) -> Json<Vec<ModeConfig>> {
    Json(state.pipeline.modes().all().to_vec())
}

// ============ POST /query, /query/complete ============

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct QueryBody {
    query: String,
    #[serde(default)]
    top_k: Option<usize>,
}

impl QueryBody {
    fn into_request(self) -> AnswerRequest {
        AnswerRequest {
            query: self.query,
            mode: Some(DEFAULT_MODE.to_string()),
            top_k: self.top_k,
        }
    }
}

async fn handle_query(
    State(state): State<AppState>,
    body: Result<Json<QueryBody>, JsonRejection>,
) -> Result<Sse<impl Stream<Item = Result<Event, Infallible>>>, AppError> {
    let Json(body) = body?;
    let prepared = state.pipeline.prepare(&body.into_request()).await?;
    Ok(sse_response(prepared))
}

async fn handle_query_complete(
    State(state): State<AppState>,
    body: Result<Json<QueryBody>, JsonRejection>,
) -> Result<Json<AnswerResponse>, AppError> {
    let Json(body) = body?;
    Ok(Json(state.pipeline.answer(&body.into_request()).await?))
}

// ============ POST /analyze ============

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct AnalyzeBody {
    query: String,
    #[serde(default)]
    mode: Option<String>,
    #[serde(default)]
    top_k: Option<usize>,
}

async fn handle_analyze(
    State(state): State<AppState>,
    body: Result<Json<AnalyzeBody>, JsonRejection>,
) -> Result<Sse<impl Stream<Item = Result<Event, Infallible>>>, AppError> {
    let Json(body) = body?;
    let mode = body
        .mode
        .filter(|m| !m.trim().is_empty())
        .ok_or_else(|| bad_request("mode is required"))?;

    let request = AnswerRequest {
        query: body.query,
        mode: Some(mode),
        top_k: body.top_k,
    };
    let prepared = state.pipeline.prepare(&request).await?;
    Ok(sse_response(prepared))
}

/// Forward answer events as SSE until `done` or the first error.
fn sse_response(prepared: PreparedAnswer) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    let events = prepared.into_stream().filter_map(|item| {
        future::ready(match item {
            Ok(event) => to_sse_event(&event).map(Ok),
            Err(e) => {
                tracing::warn!(error = %e, "answer stream failed; closing without done");
                None
            }
        })
    });
    Sse::new(events).keep_alive(KeepAlive::default())
}

fn to_sse_event(event: &AnswerEvent) -> Option<Event> {
    match Event::default().event(event.name()).json_data(event) {
        Ok(sse) => Some(sse),
        Err(e) => {
            tracing::error!(error = %e, event = event.name(), "failed to encode event");
            None
        }
    }
}

// ============ POST /file-context ============

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct FileContextBody {
    file_path: String,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct FileContextResponse {
    file_path: String,
    chunks: Vec<Chunk>,
}

async fn handle_file_context(
    State(state): State<AppState>,
    body: Result<Json<FileContextBody>, JsonRejection>,
) -> Result<Json<FileContextResponse>, AppError> {
    let Json(body) = body?;
    let chunks = state.pipeline.file_context(&body.file_path).await?;
    Ok(Json(FileContextResponse {
        file_path: body.file_path,
        chunks,
    }))
}
