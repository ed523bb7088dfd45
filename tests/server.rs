//! End-to-end HTTP tests: real router and chunker, in-memory index, scripted
//! embedder and generator.

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use futures::StreamExt;
use serde_json::Value;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use cobol_lens::server::{build_router, AppState};
use cobol_lens_core::chunk::{chunk_document, ChunkOptions};
use cobol_lens_core::embedding::Embedder;
use cobol_lens_core::gate::REFUSAL_MESSAGE;
use cobol_lens_core::generation::{CompletionRequest, Generator, TokenStream};
use cobol_lens_core::models::SourceDocument;
use cobol_lens_core::pipeline::Pipeline;
use cobol_lens_core::store::memory::InMemoryVectorIndex;
use cobol_lens_core::store::{VectorIndex, VectorRecord};

const PAYROLL: &str = "\
       IDENTIFICATION DIVISION.
       PROGRAM-ID. PAYROLL.
       DATA DIVISION.
       WORKING-STORAGE SECTION.
       01 WS-GROSS        PIC 9(7)V99.
       01 WS-NET          PIC 9(7)V99.
       PROCEDURE DIVISION.
       MAIN-PARA.
           PERFORM CALC-NET.
           STOP RUN.
       CALC-NET.
           COMPUTE WS-NET = WS-GROSS * 0.8.
";

/// `[1,0,0]` for text mentioning WS-NET, `[0,0,1]` for "xyzzy", else `[0,1,0]`.
struct KeywordEmbedder {
    fail: bool,
}

#[async_trait]
impl Embedder for KeywordEmbedder {
    fn model_name(&self) -> &str {
        "keyword"
    }
    fn dims(&self) -> usize {
        3
    }
    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        if self.fail {
            return Err(anyhow!("embedding service unavailable"));
        }
        Ok(texts
            .iter()
            .map(|t| {
                let upper = t.to_uppercase();
                if upper.contains("XYZZY") {
                    vec![0.0, 0.0, 1.0]
                } else if upper.contains("WS-NET") {
                    vec![1.0, 0.0, 0.0]
                } else {
                    vec![0.0, 1.0, 0.0]
                }
            })
            .collect())
    }
}

struct TokenGenerator {
    tokens: Vec<&'static str>,
    fail_after_tokens: bool,
    streams: AtomicUsize,
}

impl TokenGenerator {
    fn new(tokens: Vec<&'static str>) -> Self {
        Self {
            tokens,
            fail_after_tokens: false,
            streams: AtomicUsize::new(0),
        }
    }
}

#[async_trait]
impl Generator for TokenGenerator {
    async fn complete(&self, _request: &CompletionRequest) -> Result<String> {
        Ok(r#"{"scores":[]}"#.to_string())
    }

    async fn stream(&self, _request: &CompletionRequest) -> Result<TokenStream> {
        self.streams.fetch_add(1, Ordering::SeqCst);
        let tokens: Vec<Result<String>> = self.tokens.iter().map(|t| Ok(t.to_string())).collect();
        let tail: Vec<Result<String>> = if self.fail_after_tokens {
            vec![Err(anyhow!("connection reset"))]
        } else {
            Vec::new()
        };
        Ok(futures::stream::iter(tokens.into_iter().chain(tail)).boxed())
    }
}

async fn seeded_index(embedder: &KeywordEmbedder) -> Arc<InMemoryVectorIndex> {
    let doc = SourceDocument::new("src/PAYROLL.cbl", PAYROLL);
    let chunks = chunk_document(&doc, &ChunkOptions::default());
    let texts: Vec<String> = chunks.iter().map(|c| c.content.clone()).collect();
    let vectors = embedder.embed(&texts).await.unwrap();
    let records: Vec<VectorRecord> = chunks
        .iter()
        .zip(vectors)
        .map(|(c, v)| VectorRecord::from_chunk(c, v).unwrap())
        .collect();

    let index = Arc::new(InMemoryVectorIndex::new());
    index.upsert(&records).await.unwrap();
    index
}

async fn spawn(embedder: KeywordEmbedder, generator: Arc<TokenGenerator>) -> String {
    let index = seeded_index(&KeywordEmbedder { fail: false }).await;
    let pipeline = Pipeline::new(Arc::new(embedder), index.clone(), generator);
    let state = AppState {
        pipeline: Arc::new(pipeline),
        index,
    };

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, build_router(state)).await.unwrap();
    });
    format!("http://{}", addr)
}

async fn spawn_default(tokens: Vec<&'static str>) -> (String, Arc<TokenGenerator>) {
    let generator = Arc::new(TokenGenerator::new(tokens));
    let base = spawn(KeywordEmbedder { fail: false }, generator.clone()).await;
    (base, generator)
}

/// Split an SSE body into `(event name, JSON data)` pairs.
fn parse_sse(body: &str) -> Vec<(String, Value)> {
    body.split("\n\n")
        .filter_map(|block| {
            let mut event = None;
            let mut data = String::new();
            for line in block.lines() {
                if let Some(v) = line.strip_prefix("event:") {
                    event = Some(v.trim().to_string());
                } else if let Some(v) = line.strip_prefix("data:") {
                    data.push_str(v.trim_start());
                }
            }
            Some((event?, serde_json::from_str(&data).ok()?))
        })
        .collect()
}

async fn post(base: &str, path: &str, body: Value) -> reqwest::Response {
    reqwest::Client::new()
        .post(format!("{}{}", base, path))
        .json(&body)
        .send()
        .await
        .unwrap()
}

#[tokio::test]
async fn test_health_reports_index_size() {
    let (base, _) = spawn_default(vec![]).await;
    let body: Value = reqwest::get(format!("{}/health", base))
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(body["status"], "ok");
    assert_eq!(body["version"], env!("CARGO_PKG_VERSION"));
    assert!(body["indexedChunks"].as_u64().unwrap() >= 3);
}

#[tokio::test]
async fn test_modes_lists_builtin_modes_without_prompts() {
    let (base, _) = spawn_default(vec![]).await;
    let modes: Vec<Value> = reqwest::get(format!("{}/modes", base))
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    let ids: Vec<&str> = modes.iter().map(|m| m["id"].as_str().unwrap()).collect();
    assert!(ids.contains(&"chat"));
    assert!(ids.contains(&"data-flow"));
    assert!(modes.iter().all(|m| m.get("systemPrompt").is_none()));
    assert!(modes.iter().all(|m| m["defaultTopK"].as_u64().is_some()));
}

#[tokio::test]
async fn test_query_streams_sources_tokens_done() {
    let (base, generator) = spawn_default(vec!["WS-NET is ", "80% of ", "WS-GROSS."]).await;

    let response = post(&base, "/query", serde_json::json!({ "query": "how is WS-NET computed?" })).await;
    assert_eq!(response.status(), 200);
    assert!(response.headers()["content-type"]
        .to_str()
        .unwrap()
        .starts_with("text/event-stream"));

    let events = parse_sse(&response.text().await.unwrap());
    let names: Vec<&str> = events.iter().map(|(n, _)| n.as_str()).collect();
    assert_eq!(names, vec!["sources", "token", "token", "token", "done"]);

    let (_, sources) = &events[0];
    assert_eq!(sources["type"], "sources");
    let results = sources["results"].as_array().unwrap();
    assert!(!results.is_empty());
    assert!(results[0]["chunk"]["content"].as_str().unwrap().contains("WS-NET"));
    assert_eq!(results[0]["chunk"]["filePath"], "src/PAYROLL.cbl");

    let answer: String = events
        .iter()
        .filter(|(n, _)| n == "token")
        .map(|(_, d)| d["text"].as_str().unwrap())
        .collect();
    assert_eq!(answer, "WS-NET is 80% of WS-GROSS.");
    assert_eq!(generator.streams.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_query_complete_collects_answer() {
    let (base, _) = spawn_default(vec!["COMPUTE ", "in CALC-NET"]).await;

    let response = post(
        &base,
        "/query/complete",
        serde_json::json!({ "query": "where is WS-NET set?", "topK": 2 }),
    )
    .await;
    assert_eq!(response.status(), 200);
    let body: Value = response.json().await.unwrap();
    assert_eq!(body["answer"], "COMPUTE in CALC-NET");
    assert!(body["results"].as_array().unwrap().len() <= 2);
    assert!(body["latencyMs"].as_u64().is_some());
}

#[tokio::test]
async fn test_validation_errors_are_400() {
    let (base, generator) = spawn_default(vec!["x"]).await;

    for (path, body) in [
        ("/query", serde_json::json!({ "query": "   " })),
        ("/query", serde_json::json!({ "query": "WS-NET", "topK": 0 })),
        ("/query", serde_json::json!({ "query": "WS-NET", "topK": 500 })),
        ("/query", serde_json::json!({ "topK": 3 })),
        ("/analyze", serde_json::json!({ "query": "WS-NET" })),
        ("/analyze", serde_json::json!({ "query": "WS-NET", "mode": "poetry" })),
        ("/file-context", serde_json::json!({ "filePath": "" })),
    ] {
        let response = post(&base, path, body.clone()).await;
        assert_eq!(response.status(), 400, "{} {}", path, body);
        let err: Value = response.json().await.unwrap();
        assert_eq!(err["error"]["code"], "bad_request", "{} {}", path, body);
        assert!(err["error"]["message"].as_str().is_some());
    }
    assert_eq!(generator.streams.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn test_embedding_failure_is_502_before_stream() {
    let generator = Arc::new(TokenGenerator::new(vec!["x"]));
    let base = spawn(KeywordEmbedder { fail: true }, generator.clone()).await;

    let response = post(&base, "/query", serde_json::json!({ "query": "WS-NET" })).await;
    assert_eq!(response.status(), 502);
    let err: Value = response.json().await.unwrap();
    assert_eq!(err["error"]["code"], "upstream_error");
    assert!(err["error"]["message"]
        .as_str()
        .unwrap()
        .contains("embedding service unavailable"));
    assert_eq!(generator.streams.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn test_gated_mode_refuses_without_generation() {
    let (base, generator) = spawn_default(vec!["should not appear"]).await;

    let response = post(
        &base,
        "/analyze",
        serde_json::json!({ "query": "xyzzy", "mode": "explain" }),
    )
    .await;
    assert_eq!(response.status(), 200);

    let events = parse_sse(&response.text().await.unwrap());
    let names: Vec<&str> = events.iter().map(|(n, _)| n.as_str()).collect();
    assert_eq!(names, vec!["sources", "token", "done"]);
    assert_eq!(events[0].1["results"].as_array().unwrap().len(), 0);
    assert_eq!(events[1].1["text"], REFUSAL_MESSAGE);
    assert_eq!(generator.streams.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn test_mid_stream_failure_ends_without_done() {
    let generator = Arc::new(TokenGenerator {
        tokens: vec!["partial "],
        fail_after_tokens: true,
        streams: AtomicUsize::new(0),
    });
    let base = spawn(KeywordEmbedder { fail: false }, generator).await;

    let response = post(&base, "/query", serde_json::json!({ "query": "WS-NET" })).await;
    assert_eq!(response.status(), 200);

    let events = parse_sse(&response.text().await.unwrap());
    let names: Vec<&str> = events.iter().map(|(n, _)| n.as_str()).collect();
    assert_eq!(names, vec!["sources", "token"]);
}

#[tokio::test]
async fn test_file_context_returns_chunks_in_line_order() {
    let (base, _) = spawn_default(vec![]).await;

    let response = post(
        &base,
        "/file-context",
        serde_json::json!({ "filePath": "src/PAYROLL.cbl" }),
    )
    .await;
    assert_eq!(response.status(), 200);
    let body: Value = response.json().await.unwrap();
    assert_eq!(body["filePath"], "src/PAYROLL.cbl");

    let starts: Vec<u64> = body["chunks"]
        .as_array()
        .unwrap()
        .iter()
        .map(|c| c["startLine"].as_u64().unwrap())
        .collect();
    assert_eq!(starts.first(), Some(&1));
    assert!(starts.windows(2).all(|w| w[0] < w[1]));

    let missing: Value = post(
        &base,
        "/file-context",
        serde_json::json!({ "filePath": "src/NOPE.cbl" }),
    )
    .await
    .json()
    .await
    .unwrap();
    assert_eq!(missing["chunks"].as_array().unwrap().len(), 0);
}
