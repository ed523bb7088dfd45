//! CLI command implementations.
//!
//! Each `run_*` function backs one `lens` subcommand. Results go to stdout;
//! progress and logs go to stderr.

use anyhow::Result;
use futures::StreamExt;
use std::io::Write;

use cobol_lens_core::answer::AnswerEvent;
use cobol_lens_core::models::RankedResult;
use cobol_lens_core::modes::ModeTable;
use cobol_lens_core::pipeline::AnswerRequest;

use crate::app::Lens;
use crate::config::Config;
use crate::ingest::{last_run, run_ingest};
use crate::migrate;
use crate::progress::{format_number, ProgressMode};

pub async fn run_init(config: &Config) -> Result<()> {
    migrate::run_migrations(config).await?;
    println!("Database initialized successfully.");
    Ok(())
}

pub async fn run_ingest_cmd(config: &Config, dry_run: bool, progress: ProgressMode) -> Result<()> {
    let reporter = progress.reporter();
    let report = run_ingest(config, dry_run, reporter.as_ref()).await?;

    if dry_run {
        println!("Dry run: no changes written.");
    }
    println!("files: {}", format_number(report.files as u64));
    println!("chunks: {}", format_number(report.chunks as u64));
    if !dry_run {
        println!("embedded: {}", format_number(report.embedded as u64));
    }
    println!("corpus sha256: {}", report.corpus_sha256);
    Ok(())
}

fn request(query: &str, mode: Option<String>, top_k: Option<usize>) -> AnswerRequest {
    AnswerRequest {
        query: query.to_string(),
        mode,
        top_k,
    }
}

/// Retrieve and rerank without generating an answer.
pub async fn run_search(
    config: &Config,
    query: &str,
    mode: Option<String>,
    top_k: Option<usize>,
) -> Result<()> {
    let lens = Lens::open(config).await?;
    let results = lens.pipeline.retrieve(&request(query, mode, top_k)).await?;

    if results.is_empty() {
        println!("No results.");
    }
    for (i, result) in results.iter().enumerate() {
        print_result(i + 1, result);
    }

    lens.close().await;
    Ok(())
}

/// Stream an answer to stdout, sources first.
pub async fn run_ask(
    config: &Config,
    query: &str,
    mode: Option<String>,
    top_k: Option<usize>,
) -> Result<()> {
    let lens = Lens::open(config).await?;
    let prepared = lens.pipeline.prepare(&request(query, mode, top_k)).await?;

    let mut stdout = std::io::stdout();
    let mut events = prepared.into_stream();
    while let Some(event) = events.next().await {
        match event? {
            AnswerEvent::Sources { results } => {
                if !results.is_empty() {
                    println!("Sources:");
                    for (i, result) in results.iter().enumerate() {
                        print_result(i + 1, result);
                    }
                    println!();
                }
            }
            AnswerEvent::Token { text } => {
                write!(stdout, "{}", text)?;
                stdout.flush()?;
            }
            AnswerEvent::Done => {
                println!();
                break;
            }
        }
    }

    lens.close().await;
    Ok(())
}

fn print_result(rank: usize, result: &RankedResult) {
    let rerank = result
        .rerank_score
        .map(|s| format!("  rerank={}", s))
        .unwrap_or_default();
    println!(
        "{:>3}. {}  similarity={:.3}{}",
        rank,
        result.chunk().citation(),
        result.similarity_score(),
        rerank
    );
}

/// Print every indexed chunk of one file.
pub async fn run_file(config: &Config, path: &str) -> Result<()> {
    let lens = Lens::open(config).await?;
    let chunks = lens.pipeline.file_context(path).await?;

    if chunks.is_empty() {
        println!("No indexed chunks for {}.", path);
    }
    for chunk in &chunks {
        println!("--- {}", chunk.citation());
        println!("{}", chunk.content);
    }

    lens.close().await;
    Ok(())
}

pub fn run_modes() {
    let table = ModeTable::builtin();
    println!("{:<16} {:<6} {:<6} LABEL", "MODE", "TOP_K", "GATED");
    for mode in table.all() {
        println!(
            "{:<16} {:<6} {:<6} {}",
            mode.id,
            mode.default_top_k,
            if mode.gated { "yes" } else { "no" },
            mode.label
        );
    }
}

/// Index size and the most recent ingest run.
pub async fn run_status(config: &Config) -> Result<()> {
    let lens = Lens::open(config).await?;
    let count = lens.index.count().await?;
    println!("indexed chunks: {}", format_number(count as u64));

    match last_run(lens.pool()).await? {
        Some(run) => {
            let finished = run
                .finished()
                .map(|t| t.format("%Y-%m-%d %H:%M:%S UTC").to_string())
                .unwrap_or_else(|| run.finished_at.to_string());
            println!("last ingest: {}", finished);
            println!("  files: {}", format_number(run.files as u64));
            println!("  chunks: {}", format_number(run.chunks as u64));
            println!("  embedding model: {}", run.embedding_model);
            println!("  corpus sha256: {}", run.corpus_sha256);
        }
        None => println!("last ingest: never"),
    }

    lens.close().await;
    Ok(())
}
