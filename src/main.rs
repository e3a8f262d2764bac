//! # qbank CLI
//!
//! The `qbank` binary drives the staging pipeline from the command line:
//! database initialization, document upload, review, duplicate resolution,
//! import, and the JSON API server.
//!
//! ## Usage
//!
//! ```bash
//! qbank --config ./config/qbank.toml <command>
//! ```
//!
//! ## Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `qbank init` | Create the SQLite database and run schema migrations |
//! | `qbank upload <file>` | Parse a document and stage its records as a new batch |
//! | `qbank batches` | List upload batches |
//! | `qbank show <batch-id>` | Show a batch with its records and duplicates |
//! | `qbank approve <batch-id> <ids...>` | Approve staged records |
//! | `qbank reject <batch-id> <ids...>` | Reject staged records |
//! | `qbank resolve <duplicate-id> <resolution>` | Resolve a flagged duplicate |
//! | `qbank import <batch-id>` | Import approved records into the authoritative store |
//! | `qbank discard <batch-id>` | Discard a batch before import |
//! | `qbank serve` | Start the JSON HTTP server |

mod batch;
mod config;
mod db;
mod dedup;
mod error;
mod identifier;
mod import;
mod ingest;
mod migrate;
mod models;
mod parser;
mod review;
mod server;
mod similarity;
mod store;
mod validate;

use anyhow::Context;
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

use crate::models::Resolution;

/// qbank — a staging and review pipeline for bulk-importing question banks.
///
/// All commands accept a `--config` flag pointing to a TOML configuration
/// file. See `config/qbank.example.toml` for a full example.
#[derive(Parser)]
#[command(
    name = "qbank",
    about = "qbank — a staging and review pipeline for bulk-importing question banks",
    version,
    long_about = "qbank parses semi-structured markdown documents into candidate question/answer \
    records, validates them, flags likely duplicates with trigram similarity, and stages \
    everything for human review before committing approved records to the authoritative store."
)]
struct Cli {
    /// Path to configuration file (TOML).
    #[arg(long, global = true, default_value = "./config/qbank.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

/// Top-level CLI commands.
#[derive(Subcommand)]
enum Commands {
    /// Initialize the database schema.
    ///
    /// Creates the SQLite database file and all required tables (questions,
    /// upload_batches, staged_records, staging_duplicates, questions_fts).
    /// This command is idempotent — running it multiple times is safe.
    Init,

    /// Parse a document and stage its records as a new batch.
    ///
    /// Malformed blocks are recorded as parse errors without aborting the
    /// upload; candidates that fail validation are staged anyway so they
    /// can be inspected during review.
    Upload {
        /// Path to the markdown document.
        file: PathBuf,

        /// Source name recorded on the batch. Defaults to the file name.
        #[arg(long)]
        source_name: Option<String>,
    },

    /// List upload batches, newest first.
    Batches {
        /// Filter by batch status (e.g. `validated`, `ready_to_import`).
        #[arg(long)]
        status: Option<String>,

        /// Page number (1-based).
        #[arg(long, default_value_t = 1)]
        page: i64,
    },

    /// Show a batch with its records, duplicates, and parse errors.
    Show {
        /// Batch id.
        batch_id: String,

        /// Filter records by status (e.g. `pending`, `duplicate_flagged`).
        #[arg(long)]
        status: Option<String>,
    },

    /// Approve staged records.
    Approve {
        /// Batch id.
        batch_id: String,

        /// Staged record ids to approve.
        #[arg(required = true)]
        staged_ids: Vec<String>,
    },

    /// Reject staged records.
    Reject {
        /// Batch id.
        batch_id: String,

        /// Staged record ids to reject.
        #[arg(required = true)]
        staged_ids: Vec<String>,
    },

    /// Resolve a flagged duplicate.
    ///
    /// `keep_new` and `keep_both` make the record approvable again;
    /// `discard_new` rejects it; `keep_existing` rejects it in favor of the
    /// matched authoritative record.
    Resolve {
        /// Duplicate id.
        duplicate_id: String,

        /// One of: keep_new, keep_existing, keep_both, discard_new.
        resolution: String,
    },

    /// Import a batch's approved records into the authoritative store.
    ///
    /// Each record imports independently; failures are isolated and
    /// reported per record. Re-running only retries records that have not
    /// imported yet.
    Import {
        /// Batch id.
        batch_id: String,
    },

    /// Discard a batch before import begins.
    Discard {
        /// Batch id.
        batch_id: String,
    },

    /// Start the JSON HTTP server.
    ///
    /// Binds to the address configured in `[server].bind` and serves the
    /// staging operations as a JSON API.
    Serve,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("qbank=warn")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let cfg = config::load_config(&cli.config)?;

    match cli.command {
        Commands::Init => {
            migrate::run_migrations(&cfg).await?;
            println!("Database initialized successfully.");
        }
        Commands::Upload { file, source_name } => {
            let document = std::fs::read_to_string(&file)
                .with_context(|| format!("Failed to read document: {}", file.display()))?;
            let source_name = source_name.unwrap_or_else(|| {
                file.file_name()
                    .map(|n| n.to_string_lossy().into_owned())
                    .unwrap_or_else(|| file.display().to_string())
            });

            let pool = db::connect(&cfg).await?;
            let summary = ingest::create_batch(&pool, &cfg, &document, &source_name).await?;
            pool.close().await;

            println!("upload {}", source_name);
            println!("  batch: {}", summary.batch_id);
            println!("  staged: {}", summary.staged);
            println!("  validation failed: {}", summary.validation_failed);
            println!("  duplicates flagged: {}", summary.duplicate_flagged);
            println!("  parse errors: {}", summary.parse_errors.len());
            for err in &summary.parse_errors {
                println!("    line {}: {}", err.line, err.reason);
            }
            println!("ok");
        }
        Commands::Batches { status, page } => {
            let status_filter = match &status {
                Some(s) => Some(models::BatchStatus::parse(s).ok_or_else(|| {
                    anyhow::anyhow!("invalid status filter: '{}'", s)
                })?),
                None => None,
            };
            let pool = db::connect(&cfg).await?;
            let batches =
                store::list_batches(&pool, status_filter, page, cfg.review.page_size).await?;
            pool.close().await;

            if batches.is_empty() {
                println!("No batches.");
                return Ok(());
            }
            for b in &batches {
                println!(
                    "{}  [{}]  {}  total={} pending={} approved={} rejected={} flagged={} imported={} failed={}",
                    b.batch_id,
                    b.status,
                    b.source_name,
                    b.counts.total,
                    b.counts.pending,
                    b.counts.approved,
                    b.counts.rejected,
                    b.counts.duplicate_flagged,
                    b.counts.imported,
                    b.counts.import_failed,
                );
            }
        }
        Commands::Show { batch_id, status } => {
            let pool = db::connect(&cfg).await?;
            let batch = store::get_batch(&pool, &batch_id).await?;
            let records =
                review::list_records(&pool, &cfg, &batch_id, status.as_deref(), 1).await?;
            let duplicates = store::fetch_batch_duplicates(&pool, &batch_id).await?;
            let parse_errors = store::fetch_parse_errors(&pool, &batch_id).await?;
            pool.close().await;

            println!("batch {} [{}] from {}", batch.batch_id, batch.status, batch.source_name);
            println!(
                "  counts: total={} pending={} validation_failed={} flagged={} approved={} rejected={} imported={} import_failed={}",
                batch.counts.total,
                batch.counts.pending,
                batch.counts.validation_failed,
                batch.counts.duplicate_flagged,
                batch.counts.approved,
                batch.counts.rejected,
                batch.counts.imported,
                batch.counts.import_failed,
            );
            for r in &records {
                println!(
                    "  {}  [{}]  line {}  {} / {}  {}",
                    r.staged_id,
                    r.status,
                    r.source_line,
                    r.topic,
                    r.subtopic,
                    r.assigned_id.as_deref().unwrap_or("-"),
                );
                println!("      Q: {}", first_line(&r.question));
                for e in &r.validation_errors {
                    println!("      error[{}]: {}", e.field, e.message);
                }
                if let Some(reason) = &r.import_error {
                    println!("      import error: {}", reason);
                }
            }
            for d in &duplicates {
                println!(
                    "  duplicate {}  staged={}  {} {}  score={:.3}  [{}]",
                    d.duplicate_id,
                    d.staged_id,
                    d.match_kind.as_str(),
                    d.matched_ref,
                    d.similarity,
                    d.resolution,
                );
            }
            for e in &parse_errors {
                println!("  parse error line {}: {}", e.line, e.reason);
            }
        }
        Commands::Approve { batch_id, staged_ids } => {
            let pool = db::connect(&cfg).await?;
            let batch = review::review(&pool, &batch_id, &staged_ids, &[]).await?;
            pool.close().await;
            println!(
                "approved {} record(s); batch is now {}",
                staged_ids.len(),
                batch.status
            );
        }
        Commands::Reject { batch_id, staged_ids } => {
            let pool = db::connect(&cfg).await?;
            let batch = review::review(&pool, &batch_id, &[], &staged_ids).await?;
            pool.close().await;
            println!(
                "rejected {} record(s); batch is now {}",
                staged_ids.len(),
                batch.status
            );
        }
        Commands::Resolve { duplicate_id, resolution } => {
            let resolution = Resolution::parse(&resolution)
                .filter(|r| *r != Resolution::Unresolved)
                .ok_or_else(|| anyhow::anyhow!("invalid resolution: '{}'", resolution))?;
            let pool = db::connect(&cfg).await?;
            let duplicate = review::resolve_duplicate(&pool, &duplicate_id, resolution).await?;
            pool.close().await;
            println!(
                "resolved {} as {} (staged {})",
                duplicate.duplicate_id, duplicate.resolution, duplicate.staged_id
            );
        }
        Commands::Import { batch_id } => {
            let pool = db::connect(&cfg).await?;
            let outcomes = import::import_batch(&pool, &batch_id).await?;
            let batch = store::get_batch(&pool, &batch_id).await?;
            pool.close().await;

            println!("import {}", batch_id);
            for outcome in &outcomes {
                match &outcome.reason {
                    None => println!(
                        "  {}  {}  {}",
                        outcome.staged_id,
                        outcome.status,
                        outcome.assigned_id.as_deref().unwrap_or("-"),
                    ),
                    Some(reason) => println!(
                        "  {}  {}  {}",
                        outcome.staged_id, outcome.status, reason
                    ),
                }
            }
            println!(
                "  imported: {}, failed: {}",
                batch.counts.imported, batch.counts.import_failed
            );
            println!("  batch status: {}", batch.status);
            println!("ok");
        }
        Commands::Discard { batch_id } => {
            let pool = db::connect(&cfg).await?;
            let batch = review::discard_batch(&pool, &batch_id).await?;
            pool.close().await;
            println!("batch {} discarded ({})", batch.batch_id, batch.status);
        }
        Commands::Serve => {
            server::run_server(&cfg).await?;
        }
    }

    Ok(())
}

fn first_line(text: &str) -> &str {
    text.lines().next().unwrap_or("")
}
