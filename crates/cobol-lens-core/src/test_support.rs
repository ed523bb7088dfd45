//! Scripted collaborators shared by the unit tests.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use futures::StreamExt;

use crate::chunk::chunk_id;
use crate::embedding::Embedder;
use crate::generation::{CompletionRequest, Generator, TokenStream};
use crate::models::{Chunk, ChunkType};
use crate::store::memory::InMemoryVectorIndex;
use crate::store::{VectorIndex, VectorRecord};

/// Returns the same query vector for every input and records what it saw.
pub struct FixedEmbedder {
    pub vector: Vec<f32>,
    pub fail: bool,
    pub seen: Mutex<Vec<String>>,
}

impl FixedEmbedder {
    pub fn new() -> Self {
        Self {
            vector: vec![1.0, 0.0],
            fail: false,
            seen: Mutex::new(Vec::new()),
        }
    }

    pub fn failing() -> Self {
        Self {
            fail: true,
            ..Self::new()
        }
    }
}

#[async_trait]
impl Embedder for FixedEmbedder {
    fn model_name(&self) -> &str {
        "fixed"
    }

    fn dims(&self) -> usize {
        self.vector.len()
    }

    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        if self.fail {
            return Err(anyhow!("embedding service unavailable"));
        }
        self.seen.lock().unwrap().extend(texts.iter().cloned());
        Ok(texts.iter().map(|_| self.vector.clone()).collect())
    }
}

/// Vector whose cosine similarity to `[1, 0]` is exactly `similarity`.
pub fn unit(similarity: f32) -> Vec<f32> {
    vec![similarity, (1.0 - similarity * similarity).max(0.0).sqrt()]
}

pub fn chunk(path: &str, start: usize, end: usize, name: &str) -> Chunk {
    Chunk {
        id: chunk_id(path, start),
        content: format!("       {}.\n           CONTINUE.", name),
        file_path: path.to_string(),
        start_line: start,
        end_line: end,
        chunk_type: ChunkType::Paragraph,
        name: name.to_string(),
        parent_section: Some("PROCEDURE DIVISION".to_string()),
        program_id: Some("TESTPROG".to_string()),
    }
}

/// Index holding `n` chunks of `PROG.cbl` with strictly descending
/// similarity (0.9, 0.85, ...) to the fixed query vector.
pub async fn seeded_index(n: usize) -> Arc<InMemoryVectorIndex> {
    let index = Arc::new(InMemoryVectorIndex::new());
    let records: Vec<VectorRecord> = (0..n)
        .map(|i| {
            let c = chunk("PROG.cbl", i * 10 + 1, i * 10 + 10, &format!("PARA-{}", i));
            VectorRecord::from_chunk(&c, unit(0.9 - 0.05 * i as f32)).unwrap()
        })
        .collect();
    index.upsert(&records).await.unwrap();
    index
}

struct DropFlag(Arc<AtomicBool>);

impl Drop for DropFlag {
    fn drop(&mut self) {
        self.0.store(true, Ordering::SeqCst);
    }
}

/// Generator with a canned completion and a canned token stream.
pub struct ScriptedGenerator {
    completion: std::result::Result<String, String>,
    tokens: Vec<String>,
    fail_open: bool,
    fail_after_tokens: bool,
    pub complete_calls: AtomicUsize,
    pub stream_calls: AtomicUsize,
    pub requests: Mutex<Vec<CompletionRequest>>,
    pub stream_dropped: Arc<AtomicBool>,
}

impl ScriptedGenerator {
    pub fn new(tokens: &[&str]) -> Self {
        Self {
            completion: Err("no completion scripted".to_string()),
            tokens: tokens.iter().map(|t| t.to_string()).collect(),
            fail_open: false,
            fail_after_tokens: false,
            complete_calls: AtomicUsize::new(0),
            stream_calls: AtomicUsize::new(0),
            requests: Mutex::new(Vec::new()),
            stream_dropped: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn with_completion(mut self, text: &str) -> Self {
        self.completion = Ok(text.to_string());
        self
    }

    pub fn with_failing_completion(mut self) -> Self {
        self.completion = Err("rate limited".to_string());
        self
    }

    pub fn failing_open(mut self) -> Self {
        self.fail_open = true;
        self
    }

    pub fn failing_after_tokens(mut self) -> Self {
        self.fail_after_tokens = true;
        self
    }

    pub fn complete_count(&self) -> usize {
        self.complete_calls.load(Ordering::SeqCst)
    }

    pub fn stream_count(&self) -> usize {
        self.stream_calls.load(Ordering::SeqCst)
    }

    pub fn last_request(&self) -> CompletionRequest {
        self.requests.lock().unwrap().last().cloned().unwrap()
    }
}

#[async_trait]
impl Generator for ScriptedGenerator {
    async fn complete(&self, request: &CompletionRequest) -> Result<String> {
        self.complete_calls.fetch_add(1, Ordering::SeqCst);
        self.requests.lock().unwrap().push(request.clone());
        self.completion.clone().map_err(|e| anyhow!(e))
    }

    async fn stream(&self, request: &CompletionRequest) -> Result<TokenStream> {
        self.stream_calls.fetch_add(1, Ordering::SeqCst);
        self.requests.lock().unwrap().push(request.clone());
        if self.fail_open {
            return Err(anyhow!("generation service returned 503"));
        }

        let mut items: Vec<Result<String>> = self.tokens.iter().cloned().map(Ok).collect();
        if self.fail_after_tokens {
            items.push(Err(anyhow!("connection reset")));
        }
        let guard = DropFlag(self.stream_dropped.clone());
        Ok(futures::stream::iter(items)
            .map(move |item| {
                let _ = &guard;
                item
            })
            .boxed())
    }
}
