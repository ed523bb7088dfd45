//! # COBOL Lens CLI (`lens`)
//!
//! ## Usage
//!
//! ```bash
//! lens --config ./config/lens.toml <command>
//! ```
//!
//! ## Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `lens init` | Create the SQLite database and run schema migrations |
//! | `lens ingest` | Rebuild the index from `[ingest] root` |
//! | `lens search "<query>"` | Show ranked source chunks without generating |
//! | `lens ask "<question>"` | Stream a cited answer to stdout |
//! | `lens file <path>` | Print every indexed chunk of one file |
//! | `lens modes` | List answer modes |
//! | `lens status` | Index size and last ingest run |
//! | `lens serve` | Start the HTTP server |
//!
//! ## Examples
//!
//! ```bash
//! # Chunk only, without embedding
//! lens ingest --dry-run
//!
//! # Explain a batch flow with the business-rules prompt
//! lens ask "how is overtime pay computed?" --mode business-rules
//! ```

use clap::{Parser, Subcommand};
use std::path::PathBuf;

use cobol_lens::commands;
use cobol_lens::config;
use cobol_lens::logging;
use cobol_lens::progress::ProgressMode;
use cobol_lens::server;

/// COBOL Lens: codebase-grounded question answering for legacy COBOL.
#[derive(Parser)]
#[command(
    name = "lens",
    about = "COBOL Lens: codebase-grounded question answering for legacy COBOL",
    version,
    long_about = "COBOL Lens splits COBOL sources into division, section, and paragraph chunks, \
    embeds them into a local SQLite vector index, and answers questions with reranked, \
    quality-gated, cited context via a CLI and an HTTP server."
)]
struct Cli {
    /// Path to configuration file (TOML).
    #[arg(long, global = true, default_value = "./config/lens.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Initialize the database schema.
    ///
    /// Idempotent; running it multiple times is safe.
    Init,

    /// Rebuild the index from the configured source tree.
    ///
    /// Clears every stored vector, then chunks, embeds, and stores all
    /// matching files.
    Ingest {
        /// Discover and chunk only; print counts without embedding or writing.
        #[arg(long)]
        dry_run: bool,

        /// Show progress on stderr (default: on when stderr is a TTY).
        #[arg(long)]
        progress: bool,

        /// Emit progress as JSON lines on stderr.
        #[arg(long)]
        progress_json: bool,
    },

    /// Retrieve and rerank source chunks for a query.
    Search {
        query: String,

        /// Answer mode whose retrieval prefix to apply.
        #[arg(long)]
        mode: Option<String>,

        /// Number of results (defaults to the mode's default).
        #[arg(long)]
        top_k: Option<usize>,
    },

    /// Ask a question and stream the answer.
    Ask {
        question: String,

        /// Answer mode (see `lens modes`). Defaults to `chat`.
        #[arg(long)]
        mode: Option<String>,

        #[arg(long)]
        top_k: Option<usize>,
    },

    /// Print every indexed chunk of one file in line order.
    File {
        /// Path relative to the ingest root, e.g. `src/PAYROLL.cbl`.
        path: String,
    },

    /// List the built-in answer modes.
    Modes,

    /// Show index size and the last ingest run.
    Status,

    /// Start the HTTP server on `[server] bind`.
    Serve,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    if let Commands::Modes = cli.command {
        logging::init();
        commands::run_modes();
        return Ok(());
    }

    let cfg = config::load_config(&cli.config)?;
    logging::init_with_config(&cfg.logging);

    match cli.command {
        Commands::Init => {
            commands::run_init(&cfg).await?;
        }
        Commands::Ingest {
            dry_run,
            progress,
            progress_json,
        } => {
            let mode = if progress_json {
                ProgressMode::Json
            } else if progress {
                ProgressMode::Human
            } else {
                ProgressMode::default_for_tty()
            };
            commands::run_ingest_cmd(&cfg, dry_run, mode).await?;
        }
        Commands::Search { query, mode, top_k } => {
            commands::run_search(&cfg, &query, mode, top_k).await?;
        }
        Commands::Ask {
            question,
            mode,
            top_k,
        } => {
            commands::run_ask(&cfg, &question, mode, top_k).await?;
        }
        Commands::File { path } => {
            commands::run_file(&cfg, &path).await?;
        }
        Commands::Modes => unreachable!("handled before config load"),
        Commands::Status => {
            commands::run_status(&cfg).await?;
        }
        Commands::Serve => {
            server::run_server(&cfg).await?;
        }
    }

    Ok(())
}
