//! # Warehouse Bench CLI (`wbench`)
//!
//! The `wbench` binary drives the dual-target pipeline: schema creation,
//! full and incremental loads, the benchmark suite, and integrity checks.
//!
//! ## Usage
//!
//! ```bash
//! wbench --config ./config/wbench.toml <command>
//! ```
//!
//! ## Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `wbench init` | Create the Postgres schema and MongoDB indexes |
//! | `wbench load` | Full truncate-then-reload of both targets |
//! | `wbench refresh` | Incremental upsert/replace-in-place refresh |
//! | `wbench bench` | Time loads and queries, write the JSON report |
//! | `wbench verify` | Integrity checks on both targets |
//!
//! ## Examples
//!
//! ```bash
//! # Initialize both schema surfaces
//! wbench init --config ./config/wbench.toml
//!
//! # Load a 1000-product sample into Postgres only
//! wbench load --target postgres --limit 1000
//!
//! # See what a load would do without writing anything
//! wbench load --dry-run
//!
//! # Benchmark against already-loaded targets, three timing runs each
//! wbench bench --skip-load --iterations 3
//! ```

use clap::{Parser, Subcommand};
use std::path::PathBuf;

use warehouse_bench::{commands, config};

/// Warehouse Bench — load one product dataset into Postgres and MongoDB
/// and benchmark the same analytical queries against both.
///
/// All commands accept a `--config` flag pointing to a TOML configuration
/// file. See `config/wbench.example.toml` for a full example.
#[derive(Parser)]
#[command(
    name = "wbench",
    about = "Warehouse Bench — dual-target ETL and query benchmarking for an Amazon product dataset",
    version,
    long_about = "Warehouse Bench loads a product dataset (products, price history, sales-rank \
    history, product metrics) from CSV into a normalized Postgres schema and an embedded-document \
    MongoDB collection, then times a fixed suite of analytical queries against both and writes a \
    paired comparison report."
)]
struct Cli {
    /// Path to configuration file (TOML).
    ///
    /// Defaults to `./config/wbench.toml`. Source paths, both database
    /// connections, and load/benchmark tuning are read from this file.
    #[arg(long, global = true, default_value = "./config/wbench.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

/// Top-level CLI commands.
#[derive(Subcommand)]
enum Commands {
    /// Initialize both schema surfaces.
    ///
    /// Creates the Postgres tables and indexes and the MongoDB indexes.
    /// This command is idempotent — running it multiple times is safe.
    Init,

    /// Full load: truncate/drop, then reload from the source files.
    ///
    /// Postgres is loaded table by table with COPY; MongoDB gets one
    /// document per product with embedded history arrays. Rejected rows
    /// are counted and summarized; too many rejections abort the load.
    Load {
        /// Target to load: `postgres`, `mongodb`, or `all`.
        #[arg(long, default_value = "all")]
        target: String,

        /// Cap the number of products loaded (observations for excluded
        /// products are skipped).
        #[arg(long)]
        limit: Option<usize>,

        /// Run the transform and assembly passes and report counts
        /// without writing to either store.
        #[arg(long)]
        dry_run: bool,
    },

    /// Incremental refresh against already-loaded targets.
    ///
    /// Upserts row by key in Postgres (overwriting on conflict) and
    /// replaces each product document's embedded arrays in place in
    /// MongoDB. Re-running on unchanged source is a no-op in effect.
    Refresh {
        /// Target to refresh: `postgres`, `mongodb`, or `all`.
        #[arg(long, default_value = "all")]
        target: String,
    },

    /// Run the benchmark suite and write the comparison report.
    ///
    /// Times the load phases (unless skipped) and each analytical query
    /// against both targets, pairs the results per operation, and writes
    /// a JSON report plus a printed table.
    Bench {
        /// Benchmark against the data already in the targets instead of
        /// reloading first.
        #[arg(long)]
        skip_load: bool,

        /// Timing runs per query (overrides `bench.iterations`).
        #[arg(long)]
        iterations: Option<u32>,

        /// Report output path (overrides `bench.report_path`).
        #[arg(long)]
        out: Option<PathBuf>,
    },

    /// Check integrity of both targets.
    ///
    /// Verifies row counts and foreign keys in Postgres and document and
    /// embedded-array statistics in MongoDB. Exits non-zero if orphaned
    /// rows exist.
    Verify,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warehouse_bench=info")),
        )
        .init();

    let cli = Cli::parse();
    let cfg = config::load_config(&cli.config)?;

    match cli.command {
        Commands::Init => {
            commands::run_init(&cfg).await?;
        }
        Commands::Load {
            target,
            limit,
            dry_run,
        } => {
            commands::run_load(&cfg, &target, limit, dry_run).await?;
        }
        Commands::Refresh { target } => {
            commands::run_refresh(&cfg, &target).await?;
        }
        Commands::Bench {
            skip_load,
            iterations,
            out,
        } => {
            commands::run_bench(&cfg, skip_load, iterations, out).await?;
        }
        Commands::Verify => {
            commands::run_verify(&cfg).await?;
        }
    }

    Ok(())
}
