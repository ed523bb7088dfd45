//! Full-rebuild ingestion.
//!
//! ```text
//! discover ─▶ chunk_document (per file) ─▶ clear index
//!          ─▶ embed in batches (bounded concurrency) ─▶ upsert ─▶ record run
//! ```
//!
//! Every run clears the vector index first and re-upserts every chunk;
//! there is no incremental indexing. A dry run stops after chunking.

use anyhow::{bail, Context, Result};
use chrono::{DateTime, Utc};
use futures::{stream, StreamExt};
use serde::Serialize;
use sha2::{Digest, Sha256};
use sqlx::SqlitePool;

use cobol_lens_core::chunk::{chunk_document, ChunkOptions};
use cobol_lens_core::embedding::Embedder;
use cobol_lens_core::models::{Chunk, SourceDocument};
use cobol_lens_core::store::{VectorIndex, VectorRecord};

use crate::config::Config;
use crate::db;
use crate::discover::discover;
use crate::embedding::create_embedder;
use crate::migrate;
use crate::progress::{IngestProgressEvent, IngestProgressReporter};
use crate::sqlite_index::SqliteVectorIndex;

/// Outcome of one ingest run.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct IngestReport {
    pub files: usize,
    pub chunks: usize,
    pub embedded: usize,
    pub corpus_sha256: String,
    pub dry_run: bool,
}

/// A row of `ingest_runs`.
#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
pub struct IngestRun {
    pub started_at: i64,
    pub finished_at: i64,
    pub files: i64,
    pub chunks: i64,
    pub corpus_sha256: String,
    pub embedding_model: String,
}

impl IngestRun {
    pub fn finished(&self) -> Option<DateTime<Utc>> {
        DateTime::from_timestamp(self.finished_at, 0)
    }
}

pub async fn run_ingest(
    config: &Config,
    dry_run: bool,
    progress: &dyn IngestProgressReporter,
) -> Result<IngestReport> {
    let started_at = Utc::now();

    progress.report(IngestProgressEvent::Discovering {
        root: config.ingest.root.display().to_string(),
    });
    let documents = discover(&config.ingest)?;

    let options = ChunkOptions {
        max_chars: config.chunking.max_chars,
        overlap_lines: config.chunking.overlap_lines,
    };
    let chunks = chunk_all(&documents, &options);
    let corpus_sha256 = corpus_digest(&documents);

    progress.report(IngestProgressEvent::Chunked {
        files: documents.len() as u64,
        chunks: chunks.len() as u64,
    });
    tracing::info!(
        files = documents.len(),
        chunks = chunks.len(),
        %corpus_sha256,
        "chunking complete"
    );

    let mut report = IngestReport {
        files: documents.len(),
        chunks: chunks.len(),
        embedded: 0,
        corpus_sha256,
        dry_run,
    };
    if dry_run {
        return Ok(report);
    }

    if !config.embedding.is_enabled() {
        bail!("Ingest requires an embedding provider. Set [embedding] provider, or pass --dry-run to chunk only.");
    }
    let embedder = create_embedder(&config.embedding)?;

    let pool = db::connect(config).await?;
    migrate::apply(&pool).await?;
    let index = SqliteVectorIndex::new(pool.clone());

    report.embedded = index_chunks(
        &chunks,
        embedder.as_ref(),
        &index,
        config.embedding.batch_size,
        config.ingest.concurrency,
        progress,
    )
    .await?;

    record_run(&pool, started_at, &report, embedder.model_name()).await?;
    pool.close().await;

    tracing::info!(embedded = report.embedded, "ingest complete");
    Ok(report)
}

/// Chunk every document in order.
pub fn chunk_all(documents: &[SourceDocument], options: &ChunkOptions) -> Vec<Chunk> {
    documents
        .iter()
        .flat_map(|doc| chunk_document(doc, options))
        .collect()
}

/// SHA-256 over every `(path, content)` pair, in discovery order.
pub fn corpus_digest(documents: &[SourceDocument]) -> String {
    let mut hasher = Sha256::new();
    for doc in documents {
        hasher.update(doc.path.as_bytes());
        hasher.update([0u8]);
        hasher.update(doc.content.as_bytes());
        hasher.update([0u8]);
    }
    format!("{:x}", hasher.finalize())
}

/// Clear `index` and rebuild it from `chunks`.
///
/// Batches of `batch_size` chunk texts are embedded with at most
/// `concurrency` calls in flight; each batch is upserted in slices of
/// [`VectorIndex::max_upsert_batch`]. Returns the number of chunks stored.
pub async fn index_chunks(
    chunks: &[Chunk],
    embedder: &dyn Embedder,
    index: &dyn VectorIndex,
    batch_size: usize,
    concurrency: usize,
    progress: &dyn IngestProgressReporter,
) -> Result<usize> {
    index.clear().await.context("Failed to clear vector index")?;

    let total = chunks.len() as u64;
    let upsert_batch = index.max_upsert_batch().max(1);
    let mut stored = 0usize;

    let mut batches = stream::iter(chunks.chunks(batch_size.max(1)))
        .map(|batch| async move {
            let texts: Vec<String> = batch.iter().map(|c| c.content.clone()).collect();
            let vectors = embedder.embed(&texts).await?;
            if vectors.len() != batch.len() {
                bail!(
                    "embedder returned {} vectors for {} chunks",
                    vectors.len(),
                    batch.len()
                );
            }
            Ok::<_, anyhow::Error>((batch, vectors))
        })
        .buffer_unordered(concurrency.max(1));

    while let Some(result) = batches.next().await {
        let (batch, vectors) = result.context("Embedding batch failed")?;
        let records = batch
            .iter()
            .zip(vectors)
            .map(|(chunk, vector)| VectorRecord::from_chunk(chunk, vector))
            .collect::<Result<Vec<_>>>()?;

        for slice in records.chunks(upsert_batch) {
            index.upsert(slice).await?;
        }

        stored += batch.len();
        progress.report(IngestProgressEvent::Embedding {
            n: stored as u64,
            total,
        });
    }

    Ok(stored)
}

async fn record_run(
    pool: &SqlitePool,
    started_at: DateTime<Utc>,
    report: &IngestReport,
    embedding_model: &str,
) -> Result<()> {
    sqlx::query(
        r#"
        INSERT INTO ingest_runs (started_at, finished_at, files, chunks, corpus_sha256, embedding_model)
        VALUES (?, ?, ?, ?, ?, ?)
        "#,
    )
    .bind(started_at.timestamp())
    .bind(Utc::now().timestamp())
    .bind(report.files as i64)
    .bind(report.embedded as i64)
    .bind(&report.corpus_sha256)
    .bind(embedding_model)
    .execute(pool)
    .await?;
    Ok(())
}

/// Most recent completed ingest, if any.
pub async fn last_run(pool: &SqlitePool) -> Result<Option<IngestRun>> {
    let run = sqlx::query_as::<_, IngestRun>(
        r#"
        SELECT started_at, finished_at, files, chunks, corpus_sha256, embedding_model
        FROM ingest_runs
        ORDER BY id DESC
        LIMIT 1
        "#,
    )
    .fetch_optional(pool)
    .await?;
    Ok(run)
}
