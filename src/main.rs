//! # Catalog Reconcile CLI (`reconcile`)
//!
//! The `reconcile` binary resolves locally extracted music tags against a
//! remote catalog and records one decision per record.
//!
//! ## Usage
//!
//! ```bash
//! reconcile --config ./config/reconcile.toml <command>
//! ```
//!
//! ## Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `reconcile init` | Create the SQLite database and run schema migrations |
//! | `reconcile run --kind <kind>` | Resolve input records into match decisions |
//! | `reconcile stats` | Outcome counts per kind and recent runs |
//! | `reconcile probe` | Issue one search request and report catalog health |
//! | `reconcile normalize "<text>"` | Print the normalized form of a tag string |
//!
//! ## Examples
//!
//! ```bash
//! # Initialize the database
//! reconcile init --config ./config/reconcile.toml
//!
//! # Resolve track tags against the remote catalog
//! CATALOG_ACCESS_TOKEN=... reconcile run --kind track
//!
//! # Preview artist decisions from the offline table, without writing
//! reconcile run --kind artist --offline --dry-run
//! ```

use anyhow::Result;
use clap::{Parser, Subcommand, ValueEnum};
use std::path::PathBuf;

use catalog_reconcile::config;
use catalog_reconcile::migrate;
use catalog_reconcile::models::EntityKind;
use catalog_reconcile::normalize::Normalizer;
use catalog_reconcile::probe;
use catalog_reconcile::progress::ProgressMode;
use catalog_reconcile::run_cmd::{self, RunOptions};
use catalog_reconcile::stats;

/// Catalog Reconcile CLI: resolve local music tags to remote catalog
/// identifiers.
///
/// All commands except `normalize` accept a `--config` flag pointing to a
/// TOML configuration file. See `config/reconcile.example.toml` for a full
/// example.
#[derive(Parser)]
#[command(
    name = "reconcile",
    about = "Catalog Reconcile — resolve local music tags to remote catalog identifiers",
    version,
    long_about = "Catalog Reconcile reads locally extracted audio tags, searches a rate-limited \
    remote catalog for candidates, scores them by fuzzy similarity and records a \
    matched/unmatched/failed decision for every record in SQLite."
)]
struct Cli {
    /// Path to configuration file (TOML).
    ///
    /// Defaults to `./config/reconcile.toml`.
    #[arg(long, global = true, default_value = "./config/reconcile.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

/// Top-level CLI commands.
#[derive(Subcommand)]
enum Commands {
    /// Initialize the database schema.
    ///
    /// Creates the SQLite database file and the `match_decisions` and
    /// `reconcile_runs` tables. Idempotent.
    Init,

    /// Resolve input records against the catalog.
    ///
    /// Reads newline-delimited tag records, searches the catalog for each,
    /// and writes one decision per record. Ctrl-C stops the run after the
    /// records in flight.
    Run {
        /// Entity kind to resolve.
        #[arg(long, value_enum, default_value = "track")]
        kind: KindArg,

        /// Input file or directory (overrides `[input].root`).
        #[arg(long)]
        input: Option<PathBuf>,

        /// Maximum number of records to process.
        #[arg(long)]
        limit: Option<usize>,

        /// Serve lookups from the `[offline.*]` tables instead of the remote catalog.
        #[arg(long)]
        offline: bool,

        /// Print decisions as JSON lines instead of writing the database.
        #[arg(long)]
        dry_run: bool,

        /// Progress reporting on stderr. Defaults to human when stderr is a TTY.
        #[arg(long, value_enum)]
        progress: Option<ProgressArg>,
    },

    /// Show decision counts per kind and the latest runs.
    Stats,

    /// Check that the catalog answers a search.
    Probe {
        /// Artist name to search for.
        #[arg(long, default_value = "Radiohead")]
        term: String,

        /// Probe the offline table instead of the remote catalog.
        #[arg(long)]
        offline: bool,
    },

    /// Print the normalized form of a tag string.
    Normalize {
        /// Raw tag text.
        text: String,
    },
}

#[derive(Clone, Copy, ValueEnum)]
enum KindArg {
    Artist,
    Album,
    Track,
}

impl From<KindArg> for EntityKind {
    fn from(kind: KindArg) -> Self {
        match kind {
            KindArg::Artist => EntityKind::Artist,
            KindArg::Album => EntityKind::Album,
            KindArg::Track => EntityKind::Track,
        }
    }
}

#[derive(Clone, Copy, ValueEnum)]
enum ProgressArg {
    Off,
    Human,
    Json,
}

impl From<ProgressArg> for ProgressMode {
    fn from(mode: ProgressArg) -> Self {
        match mode {
            ProgressArg::Off => ProgressMode::Off,
            ProgressArg::Human => ProgressMode::Human,
            ProgressArg::Json => ProgressMode::Json,
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let cli = Cli::parse();

    // Commands that don't require config
    if let Commands::Normalize { text } = &cli.command {
        let normalizer = config::load_config(&cli.config)
            .map(|cfg| Normalizer::from_config(&cfg.matching))
            .unwrap_or_default();
        println!("{}", normalizer.normalize(text));
        return Ok(());
    }

    let cfg = config::load_config(&cli.config)?;

    match cli.command {
        Commands::Init => {
            migrate::run_migrations(&cfg).await?;
            println!("Database initialized successfully.");
        }
        Commands::Run {
            kind,
            input,
            limit,
            offline,
            dry_run,
            progress,
        } => {
            let opts = RunOptions {
                kind: kind.into(),
                input,
                limit,
                offline,
                dry_run,
                progress: progress
                    .map(ProgressMode::from)
                    .unwrap_or_else(ProgressMode::default_for_tty),
            };
            run_cmd::run_reconcile(&cfg, opts).await?;
        }
        Commands::Stats => {
            stats::run_stats(&cfg).await?;
        }
        Commands::Probe { term, offline } => {
            let normalizer = Normalizer::from_config(&cfg.matching);
            let transport = run_cmd::build_transport(&cfg, &normalizer, offline)?;
            probe::run_probe(transport.as_ref(), &normalizer, &term).await?;
        }
        Commands::Normalize { .. } => {
            // Handled above (before config loading)
        }
    }

    Ok(())
}
