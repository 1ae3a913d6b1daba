//! # Chat Harness CLI (`chx`)
//!
//! The `chx` binary ingests AI chat exports into the local archive and
//! serves it over HTTP.
//!
//! ## Usage
//!
//! ```bash
//! chx --config ./config/chx.toml <command>
//! ```
//!
//! ## Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `chx init` | Create the SQLite database and run schema migrations |
//! | `chx sources` | List configured vendor drops |
//! | `chx sync <vendor\|all>` | Parse a drop and upsert it into the archive |
//! | `chx parse <vendor> <file>` | Parse one export file without the database |
//! | `chx get <uuid>` | Print a conversation and its messages |
//! | `chx stats` | Archive summary |
//! | `chx serve` | Start the REST API |
//!
//! ## Examples
//!
//! ```bash
//! chx init
//! chx sync gpt --path ~/Downloads/chatgpt-export.zip
//! chx sync all --progress human
//! chx parse codex rollout.jsonl --output parsed/codex
//! chx serve
//! ```

use anyhow::Result;
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

use chat_harness::ingest::{self, SyncOptions};
use chat_harness::models::Vendor;
use chat_harness::progress::ProgressMode;
use chat_harness::{config, export, get, migrate, server, sources, stats};

/// Chat Harness CLI: normalize AI chat exports into one local archive.
///
/// All commands accept a `--config` flag pointing to a TOML configuration
/// file. See `config/chx.example.toml` for a full example.
#[derive(Parser)]
#[command(
    name = "chx",
    about = "Chat Harness: normalize AI chat exports into one local SQLite archive",
    version,
    long_about = "Chat Harness parses conversation exports from GPT, Claude, Claude Code, \
    Codex and Gemini into one normalized model, stores them idempotently in SQLite, \
    and serves the archive over a REST API."
)]
struct Cli {
    /// Path to configuration file (TOML).
    ///
    /// Defaults to `./config/chx.toml`.
    #[arg(long, global = true, default_value = "./config/chx.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

/// Top-level CLI commands.
#[derive(Subcommand)]
enum Commands {
    /// Initialize the database schema.
    ///
    /// Idempotent: running it multiple times is safe.
    Init,

    /// List vendor drops and whether their roots exist.
    Sources,

    /// Ingest a vendor drop.
    ///
    /// Scans the drop, skips inputs already recorded in the ledger, parses
    /// the rest in parallel, validates and upserts every conversation.
    Sync {
        /// `gpt`, `claude`, `claude_code`, `codex`, `gemini`, or `all`.
        vendor: String,

        /// Read this file or directory instead of the configured root.
        #[arg(long)]
        path: Option<PathBuf>,

        /// Ignore the ledger and reprocess every input.
        #[arg(long)]
        full: bool,

        /// Parse and validate without writing to the database.
        #[arg(long)]
        dry_run: bool,

        /// Maximum number of inputs to process.
        #[arg(long)]
        limit: Option<usize>,

        /// Progress output on stderr: `off`, `human` or `json`.
        /// Defaults to `human` when stderr is a terminal.
        #[arg(long)]
        progress: Option<ProgressMode>,
    },

    /// Parse one export file and print the normalized conversations.
    Parse {
        /// Vendor of the file.
        vendor: Vendor,

        /// Export file (JSON, JSONL or ZIP).
        file: PathBuf,

        /// Write one JSON file per conversation into this directory
        /// instead of printing a JSON array.
        #[arg(long)]
        output: Option<PathBuf>,
    },

    /// Print a conversation and its messages.
    Get {
        /// Conversation uuid.
        uuid: String,
    },

    /// Show archive statistics.
    Stats,

    /// Start the REST API on `[server].bind`.
    Serve,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")))
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    // Parsing a single file needs no config or database.
    if let Commands::Parse {
        vendor,
        file,
        output,
    } = &cli.command
    {
        return export::run_parse(*vendor, file, output.as_deref());
    }

    let cfg = config::load_config(&cli.config)?;

    match cli.command {
        Commands::Init => {
            migrate::run_migrations(&cfg).await?;
            println!("Database initialized successfully.");
        }
        Commands::Sources => {
            sources::list_sources(&cfg)?;
        }
        Commands::Sync {
            vendor,
            path,
            full,
            dry_run,
            limit,
            progress,
        } => {
            let opts = SyncOptions {
                full,
                dry_run,
                limit,
                path,
            };
            let reporter = progress
                .unwrap_or_else(ProgressMode::default_for_tty)
                .reporter();
            ingest::run_sync(&cfg, &vendor, &opts, reporter.as_ref()).await?;
        }
        Commands::Parse { .. } => {}
        Commands::Get { uuid } => {
            get::run_get(&cfg, &uuid).await?;
        }
        Commands::Stats => {
            stats::run_stats(&cfg).await?;
        }
        Commands::Serve => {
            server::run_server(&cfg).await?;
        }
    }

    Ok(())
}
