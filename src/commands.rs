//! Command implementations behind the `wbench` CLI.
//!
//! Each function owns one subcommand end to end: connect, run, print a
//! human-readable summary. Machine-readable output is the benchmark
//! report's job.

use anyhow::{bail, Result};

use crate::config::Config;
use crate::{bench, db, loader_mongodb, loader_postgres, migrate};

/// Which target(s) a load or refresh applies to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TargetChoice {
    Postgres,
    Mongodb,
    All,
}

impl TargetChoice {
    pub fn parse(raw: &str) -> Result<Self> {
        match raw {
            "postgres" => Ok(TargetChoice::Postgres),
            "mongodb" => Ok(TargetChoice::Mongodb),
            "all" => Ok(TargetChoice::All),
            other => bail!("unknown target '{}' (expected postgres, mongodb, or all)", other),
        }
    }

    fn postgres(&self) -> bool {
        matches!(self, TargetChoice::Postgres | TargetChoice::All)
    }

    fn mongodb(&self) -> bool {
        matches!(self, TargetChoice::Mongodb | TargetChoice::All)
    }
}

/// `wbench init` — create both schema surfaces. Idempotent.
pub async fn run_init(config: &Config) -> Result<()> {
    let pool = db::connect_postgres(config, "schema init").await?;
    migrate::init_postgres(&pool).await?;
    println!("Postgres schema ready.");

    let mongo = db::connect_mongo(config, "schema init").await?;
    migrate::init_mongo(&mongo, config).await?;
    println!("MongoDB indexes ready.");
    Ok(())
}

/// `wbench load` — full truncate-then-reload of the selected target(s).
pub async fn run_load(
    config: &Config,
    target: &str,
    limit: Option<usize>,
    dry_run: bool,
) -> Result<()> {
    let target = TargetChoice::parse(target)?;

    if dry_run {
        return run_dry_load(config, limit);
    }

    if target.postgres() {
        let pool = db::connect_postgres(config, "full load").await?;
        migrate::init_postgres(&pool).await?;
        let stats = loader_postgres::full_load(config, &pool, limit).await?;
        println!("Postgres load");
        println!("  products:           {:>10}", stats.products);
        println!("  price_history:      {:>10}", stats.price_history);
        println!("  sales_rank_history: {:>10}", stats.sales_rank_history);
        println!("  product_metrics:    {:>10}", stats.product_metrics);
        print_tally(&stats.tally, stats.orphans_skipped);
        if !stats.failed_chunks.is_empty() {
            println!("  failed chunks:");
            for failure in &stats.failed_chunks {
                println!(
                    "    {} chunk {}: {}",
                    failure.table, failure.chunk_index, failure.detail
                );
            }
        }
    }

    if target.mongodb() {
        let mongo = db::connect_mongo(config, "full load").await?;
        let stats = loader_mongodb::full_load(config, &mongo, limit).await?;
        println!("MongoDB load");
        println!("  documents:          {:>10}", stats.documents);
        println!("  batches:            {:>10}", stats.batches);
        print_tally(&stats.tally, stats.orphans_skipped);
        for oversized in &stats.oversized {
            println!("  skipped: {}", oversized);
        }
        for failure in &stats.failed_documents {
            println!(
                "  rejected: {} (code {}): {}",
                failure.asin, failure.code, failure.message
            );
        }
    }

    Ok(())
}

/// `wbench load --dry-run` — run the transform and assembly passes without
/// touching either store, and report what a real load would do.
fn run_dry_load(config: &Config, limit: Option<usize>) -> Result<()> {
    let mut stats = loader_mongodb::MongoLoadStats::default();
    let documents = loader_mongodb::assemble(config, limit, &mut stats)?;

    let price_rows: usize = documents.iter().map(|d| d.price_history.len()).sum();
    let rank_rows: usize = documents.iter().map(|d| d.sales_rank_history.len()).sum();

    println!("Dry run (no data written)");
    println!("  products/documents: {:>10}", documents.len());
    println!("  price rows:         {:>10}", price_rows);
    println!("  rank rows:          {:>10}", rank_rows);
    print_tally(&stats.tally, stats.orphans_skipped);
    Ok(())
}

/// `wbench refresh` — incremental upsert/replace-in-place path.
pub async fn run_refresh(config: &Config, target: &str) -> Result<()> {
    let target = TargetChoice::parse(target)?;

    if target.postgres() {
        let pool = db::connect_postgres(config, "refresh").await?;
        let stats = loader_postgres::incremental_refresh(config, &pool).await?;
        println!("Postgres refresh: {} rows upserted", stats.total_rows());
        print_tally(&stats.tally, stats.orphans_skipped);
    }

    if target.mongodb() {
        let mongo = db::connect_mongo(config, "refresh").await?;
        let stats = loader_mongodb::incremental_refresh(config, &mongo).await?;
        println!("MongoDB refresh: {} documents upserted", stats.documents);
        print_tally(&stats.tally, stats.orphans_skipped);
    }

    Ok(())
}

/// `wbench bench` — load (unless skipped), run the query suite against
/// both targets, write the JSON report, print the comparison table.
pub async fn run_bench(
    config: &Config,
    skip_load: bool,
    iterations: Option<u32>,
    out: Option<std::path::PathBuf>,
) -> Result<()> {
    let pool = db::connect_postgres(config, "benchmark").await?;
    migrate::init_postgres(&pool).await?;
    let mongo = db::connect_mongo(config, "benchmark").await?;

    let opts = bench::BenchRun {
        skip_load,
        iterations: iterations.unwrap_or(config.bench.iterations),
    };
    let report = bench::run(config, &pool, &mongo, &opts).await?;

    let path = out.unwrap_or_else(|| config.bench.report_path.clone());
    report.write_json(&path)?;
    report.print_summary();
    println!("Report written to {}", path.display());
    Ok(())
}

/// `wbench verify` — relational integrity and document array statistics.
pub async fn run_verify(config: &Config) -> Result<()> {
    let pool = db::connect_postgres(config, "verify").await?;
    let pg = loader_postgres::verify(&pool).await?;
    println!("Postgres");
    println!("  products:           {:>10}", pg.products);
    println!("  price_history:      {:>10}", pg.price_history);
    println!("  sales_rank_history: {:>10}", pg.sales_rank_history);
    println!("  product_metrics:    {:>10}", pg.product_metrics);
    println!(
        "  orphaned rows:      {:>10}",
        pg.orphaned_price_history + pg.orphaned_sales_rank_history + pg.orphaned_product_metrics
    );
    println!("  avg price rows/product: {:.1}", pg.avg_price_rows_per_product);
    println!("  avg rank rows/product:  {:.1}", pg.avg_rank_rows_per_product);

    let mongo = db::connect_mongo(config, "verify").await?;
    let doc = loader_mongodb::verify(config, &mongo).await?;
    println!("MongoDB");
    println!("  documents:          {:>10}", doc.documents);
    println!(
        "  price entries/doc:  avg {:.1}, max {}",
        doc.avg_price_entries, doc.max_price_entries
    );
    println!(
        "  rank entries/doc:   avg {:.1}, max {}",
        doc.avg_rank_entries, doc.max_rank_entries
    );

    let orphans =
        pg.orphaned_price_history + pg.orphaned_sales_rank_history + pg.orphaned_product_metrics;
    if orphans > 0 {
        bail!("integrity check failed: {} orphaned rows", orphans);
    }
    Ok(())
}

fn print_tally(tally: &crate::transform::RejectionTally, orphans_skipped: u64) {
    println!("  rows seen:          {:>10}", tally.seen);
    println!("  rejected:           {:>10}", tally.rejected);
    println!("  adjusted:           {:>10}", tally.adjusted);
    if orphans_skipped > 0 {
        println!("  orphans skipped:    {:>10}", orphans_skipped);
    }
    for reason in tally.reasons() {
        println!("    {}", reason);
    }
}
