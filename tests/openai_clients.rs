//! HTTP clients against a mock OpenAI-compatible / Ollama server.

use futures::StreamExt;
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;
use wiremock::matchers::{body_partial_json, header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use cobol_lens::config::{EmbeddingConfig, GenerationConfig};
use cobol_lens::embedding::{OllamaEmbedder, OpenAIEmbedder};
use cobol_lens::generation::OpenAIGenerator;
use cobol_lens_core::answer::{AnswerEvent, PreparedAnswer};
use cobol_lens_core::embedding::Embedder;
use cobol_lens_core::generation::{CompletionRequest, Generator};

fn embedding_config(server: &MockServer, provider: &str, max_retries: u32) -> EmbeddingConfig {
    EmbeddingConfig {
        provider: provider.to_string(),
        model: Some("test-embed".to_string()),
        dims: Some(2),
        url: Some(server.uri()),
        max_retries,
        timeout_secs: 5,
        ..EmbeddingConfig::default()
    }
}

fn generation_config(server: &MockServer) -> GenerationConfig {
    GenerationConfig {
        provider: "openai".to_string(),
        model: Some("test-chat".to_string()),
        url: Some(server.uri()),
        max_retries: 0,
        timeout_secs: 5,
        ..GenerationConfig::default()
    }
}

#[tokio::test]
async fn test_openai_embeddings_ordered_by_index() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v1/embeddings"))
        .and(header("authorization", "Bearer sk-test"))
        .and(body_partial_json(json!({ "model": "test-embed" })))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "data": [
                { "index": 1, "embedding": [0.0, 1.0] },
                { "index": 0, "embedding": [1.0, 0.0] }
            ]
        })))
        .expect(1)
        .mount(&server)
        .await;

    let embedder =
        OpenAIEmbedder::with_api_key(&embedding_config(&server, "openai", 0), "sk-test").unwrap();
    let vectors = embedder
        .embed(&["MOVE A TO B".to_string(), "PERFORM X".to_string()])
        .await
        .unwrap();
    assert_eq!(vectors, vec![vec![1.0, 0.0], vec![0.0, 1.0]]);
}

#[tokio::test]
async fn test_openai_client_error_is_not_retried() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v1/embeddings"))
        .respond_with(ResponseTemplate::new(400).set_body_string("bad input"))
        .expect(1)
        .mount(&server)
        .await;

    let embedder =
        OpenAIEmbedder::with_api_key(&embedding_config(&server, "openai", 3), "sk-test").unwrap();
    let err = embedder.embed_one("x").await.unwrap_err();
    assert!(err.to_string().contains("400"), "{}", err);
}

#[tokio::test]
async fn test_server_error_is_retried() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v1/embeddings"))
        .respond_with(ResponseTemplate::new(503))
        .up_to_n_times(1)
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/v1/embeddings"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "data": [{ "index": 0, "embedding": [0.6, 0.8] }]
        })))
        .expect(1)
        .mount(&server)
        .await;

    let embedder =
        OpenAIEmbedder::with_api_key(&embedding_config(&server, "openai", 1), "sk-test").unwrap();
    let vector = embedder.embed_one("x").await.unwrap();
    assert_eq!(vector, vec![0.6, 0.8]);
}

#[tokio::test]
async fn test_dimension_mismatch_is_rejected() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v1/embeddings"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "data": [{ "index": 0, "embedding": [0.1, 0.2, 0.3] }]
        })))
        .mount(&server)
        .await;

    let embedder =
        OpenAIEmbedder::with_api_key(&embedding_config(&server, "openai", 0), "sk-test").unwrap();
    let err = embedder.embed_one("x").await.unwrap_err();
    assert!(err.to_string().contains("embedding.dims"), "{}", err);
}

#[tokio::test]
async fn test_ollama_embed() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/api/embed"))
        .and(body_partial_json(json!({ "model": "test-embed", "input": ["WS-NET"] })))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "embeddings": [[0.25, 0.75]]
        })))
        .expect(1)
        .mount(&server)
        .await;

    let embedder = OllamaEmbedder::new(&embedding_config(&server, "ollama", 0)).unwrap();
    assert_eq!(embedder.embed_one("WS-NET").await.unwrap(), vec![0.25, 0.75]);
}

#[tokio::test]
async fn test_structured_completion_sends_json_schema() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v1/chat/completions"))
        .and(body_partial_json(json!({
            "model": "test-chat",
            "temperature": 0.0,
            "response_format": { "type": "json_schema", "json_schema": { "strict": true } }
        })))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "choices": [{ "message": { "role": "assistant", "content": "{\"scores\":[]}" } }]
        })))
        .expect(1)
        .mount(&server)
        .await;

    let generator = OpenAIGenerator::with_api_key(&generation_config(&server), "sk-test").unwrap();
    let request = CompletionRequest::new("grade", "candidates")
        .with_schema(json!({ "type": "object" }))
        .with_temperature(0.0);
    assert_eq!(generator.complete(&request).await.unwrap(), "{\"scores\":[]}");
}

#[tokio::test]
async fn test_stream_parses_sse_deltas() {
    let server = MockServer::start().await;
    let body = concat!(
        "data: {\"choices\":[{\"delta\":{\"role\":\"assistant\"}}]}\n\n",
        "data: {\"choices\":[{\"delta\":{\"content\":\"CALC-NET \"}}]}\n\n",
        "data: {\"choices\":[{\"delta\":{\"content\":\"computes WS-NET.\"}}]}\n\n",
        "data: {\"choices\":[{\"delta\":{},\"finish_reason\":\"stop\"}]}\n\n",
        "data: [DONE]\n\n",
    );
    Mock::given(method("POST"))
        .and(path("/v1/chat/completions"))
        .and(body_partial_json(json!({ "stream": true })))
        .respond_with(
            ResponseTemplate::new(200)
                .insert_header("content-type", "text/event-stream")
                .set_body_string(body),
        )
        .expect(1)
        .mount(&server)
        .await;

    let generator = OpenAIGenerator::with_api_key(&generation_config(&server), "sk-test").unwrap();
    let tokens: Vec<String> = generator
        .stream(&CompletionRequest::new("sys", "question"))
        .await
        .unwrap()
        .map(|t| t.unwrap())
        .collect()
        .await;
    assert_eq!(tokens, vec!["CALC-NET ", "computes WS-NET."]);
}

#[tokio::test]
async fn test_stream_open_failure_is_error() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v1/chat/completions"))
        .respond_with(ResponseTemplate::new(401).set_body_string("invalid key"))
        .mount(&server)
        .await;

    let generator = OpenAIGenerator::with_api_key(&generation_config(&server), "sk-bad").unwrap();
    assert!(generator
        .stream(&CompletionRequest::new("sys", "question"))
        .await
        .is_err());
}

fn sse_response(body: &'static str) -> ResponseTemplate {
    ResponseTemplate::new(200)
        .insert_header("content-type", "text/event-stream")
        .set_body_string(body)
}

#[tokio::test]
async fn test_stream_cut_before_done_ends_with_error() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v1/chat/completions"))
        .respond_with(sse_response(
            "data: {\"choices\":[{\"delta\":{\"content\":\"MAIN-PARA calls \"}}]}\n\n",
        ))
        .mount(&server)
        .await;

    let generator = OpenAIGenerator::with_api_key(&generation_config(&server), "sk-test").unwrap();
    let items: Vec<_> = generator
        .stream(&CompletionRequest::new("sys", "question"))
        .await
        .unwrap()
        .collect()
        .await;

    assert_eq!(items.len(), 2);
    assert_eq!(items[0].as_ref().unwrap(), "MAIN-PARA calls ");
    let err = items[1].as_ref().unwrap_err();
    assert!(err.to_string().contains("[DONE]"), "{}", err);
}

#[tokio::test]
async fn test_stream_finish_reason_without_done_is_complete() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v1/chat/completions"))
        .respond_with(sse_response(concat!(
            "data: {\"choices\":[{\"delta\":{\"content\":\"GOBACK.\"}}]}\n\n",
            "data: {\"choices\":[{\"delta\":{},\"finish_reason\":\"stop\"}]}\n\n",
        )))
        .mount(&server)
        .await;

    let generator = OpenAIGenerator::with_api_key(&generation_config(&server), "sk-test").unwrap();
    let items: Vec<_> = generator
        .stream(&CompletionRequest::new("sys", "question"))
        .await
        .unwrap()
        .collect()
        .await;

    assert_eq!(items.len(), 1);
    assert_eq!(items[0].as_ref().unwrap(), "GOBACK.");
}

#[tokio::test]
async fn test_truncated_answer_is_not_marked_done() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v1/chat/completions"))
        .respond_with(sse_response(
            "data: {\"choices\":[{\"delta\":{\"content\":\"MAIN-PARA calls \"}}]}\n\n",
        ))
        .mount(&server)
        .await;

    let generator = OpenAIGenerator::with_api_key(&generation_config(&server), "sk-test").unwrap();
    let prepared =
        PreparedAnswer::generate(Vec::new(), Arc::new(generator), "sys".to_string(), "question");
    let events: Vec<_> = prepared.into_stream().collect().await;

    let names: Vec<&str> = events
        .iter()
        .filter_map(|e| e.as_ref().ok())
        .map(AnswerEvent::name)
        .collect();
    assert_eq!(names, vec!["sources", "token"]);
    assert!(events.last().unwrap().is_err());
}

#[tokio::test]
async fn test_structured_completion_has_whole_request_timeout() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v1/chat/completions"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(json!({ "choices": [{ "message": { "content": "{}" } }] }))
                .set_delay(Duration::from_secs(3)),
        )
        .mount(&server)
        .await;

    let config = GenerationConfig {
        timeout_secs: 1,
        ..generation_config(&server)
    };
    let generator = OpenAIGenerator::with_api_key(&config, "sk-test").unwrap();
    assert!(generator
        .complete(&CompletionRequest::new("grade", "candidates"))
        .await
        .is_err());
}
