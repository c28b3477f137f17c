//! Relational bulk loader.
//!
//! Full loads truncate the four tables, then stream validated records into
//! Postgres with `COPY ... FROM STDIN`, one streaming transfer per chunk
//! instead of one statement per row. Products are loaded before any
//! dependent table so foreign keys hold. A chunk that violates a
//! constraint fails as a unit and is reported with its index and the
//! violating key; sibling chunks keep going.
//!
//! The incremental path is the slow one: batched
//! `INSERT ... ON CONFLICT ... DO UPDATE` statements that overwrite the
//! stored row for an existing key.

use std::collections::hash_map::Entry;
use std::collections::{HashMap, HashSet};
use std::hash::Hash;

use sqlx::postgres::PgPoolCopyExt;
use sqlx::{PgPool, Postgres, QueryBuilder, Row};
use tracing::{info, warn};

use crate::config::Config;
use crate::error::LoadError;
use crate::models::{MetricsRecord, PriceObservation, ProductRecord, RankObservation};
use crate::reader::{ChunkReader, RawMetricsRow, RawPriceRow, RawProductRow, RawRankRow};
use crate::retry::RetryPolicy;
use crate::transform::{RejectionTally, Transformer};

const COPY_PRODUCTS: &str = "COPY products (asin, title, brand, source_category, \
     current_price, current_sales_rank, rating, review_count) \
     FROM STDIN WITH (FORMAT csv)";

const COPY_PRICE_HISTORY: &str = "COPY price_history (asin, date, price_usd, \
     source_category, brand, price_bucket) \
     FROM STDIN WITH (FORMAT csv)";

const COPY_SALES_RANK_HISTORY: &str = "COPY sales_rank_history (asin, date, sales_rank, \
     source_category, brand, rank_bucket) \
     FROM STDIN WITH (FORMAT csv)";

const COPY_PRODUCT_METRICS: &str = "COPY product_metrics (asin, source_category, brand, \
     current_price, current_rating, review_count, current_sales_rank, monthly_sold) \
     FROM STDIN WITH (FORMAT csv)";

/// A chunk that failed as a unit, with enough detail to find the culprit.
#[derive(Debug, Clone)]
pub struct ChunkFailure {
    pub table: &'static str,
    pub chunk_index: usize,
    pub detail: String,
}

/// Outcome of one relational load phase.
#[derive(Debug, Default)]
pub struct PgLoadStats {
    pub products: u64,
    pub price_history: u64,
    pub sales_rank_history: u64,
    pub product_metrics: u64,
    pub tally: RejectionTally,
    /// Valid observation rows skipped because their product was not loaded
    /// (only non-zero when a `--limit` truncates the product set).
    pub orphans_skipped: u64,
    pub failed_chunks: Vec<ChunkFailure>,
}

impl PgLoadStats {
    pub fn total_rows(&self) -> u64 {
        self.products + self.price_history + self.sales_rank_history + self.product_metrics
    }
}

/// Full truncate-then-reload of the relational target.
pub async fn full_load(
    config: &Config,
    pool: &PgPool,
    limit: Option<usize>,
) -> Result<PgLoadStats, LoadError> {
    let retry = RetryPolicy::from_config(&config.retry);
    let transformer = Transformer::default();
    let mut stats = PgLoadStats::default();

    // Idempotence: a re-run replaces the previous load wholesale.
    sqlx::query("TRUNCATE products, price_history, sales_rank_history, product_metrics CASCADE")
        .execute(pool)
        .await
        .map_err(|e| LoadError::from_pg(e, "truncate"))?;

    // Products first: every other table references them.
    let mut loaded_asins: HashSet<String> = HashSet::new();
    let mut reader = ChunkReader::<RawProductRow>::open(
        &config.source.products_path(),
        config.source.chunk_size,
    )?;
    let mut chunk_index = 0usize;
    while let Some(chunk) = reader.next_chunk() {
        let mut tally = RejectionTally::default();
        let mut records = Vec::with_capacity(chunk.len());
        let mut hit_limit = false;
        for raw in chunk {
            if limit.is_some_and(|l| loaded_asins.len() >= l) {
                hit_limit = true;
                break;
            }
            let row = raw.row;
            if let Some(record) = transformer.product(raw, &mut tally) {
                if loaded_asins.insert(record.asin.clone()) {
                    records.push(record);
                } else {
                    tally.reject(&LoadError::validation(row, "duplicate asin"));
                }
            }
        }
        tally.check_threshold(config.load.reject_threshold)?;
        stats.tally.absorb(&tally);

        if !records.is_empty() {
            let data = encode_products(&records)?;
            submit_chunk(pool, &retry, COPY_PRODUCTS, data, "products", chunk_index, &mut stats)
                .await?;
        }
        chunk_index += 1;
        if hit_limit {
            break;
        }
    }
    info!(products = stats.products, "products loaded");

    // Fact tables, filtered to loaded products so a truncated product set
    // cannot orphan observations.
    load_price_history(config, pool, &retry, &transformer, &loaded_asins, &mut stats).await?;
    load_sales_rank_history(config, pool, &retry, &transformer, &loaded_asins, &mut stats).await?;
    load_product_metrics(config, pool, &retry, &transformer, &loaded_asins, &mut stats).await?;

    Ok(stats)
}

async fn load_price_history(
    config: &Config,
    pool: &PgPool,
    retry: &RetryPolicy,
    transformer: &Transformer,
    loaded_asins: &HashSet<String>,
    stats: &mut PgLoadStats,
) -> Result<(), LoadError> {
    let mut reader = ChunkReader::<RawPriceRow>::open(
        &config.source.price_history_path(),
        config.source.chunk_size,
    )?;
    let mut chunk_index = 0usize;
    while let Some(chunk) = reader.next_chunk() {
        let mut tally = RejectionTally::default();
        let mut records = Vec::with_capacity(chunk.len());
        for raw in chunk {
            if let Some(obs) = transformer.price(raw, &mut tally) {
                if loaded_asins.contains(&obs.asin) {
                    records.push(obs);
                } else {
                    stats.orphans_skipped += 1;
                }
            }
        }
        tally.check_threshold(config.load.reject_threshold)?;
        stats.tally.absorb(&tally);

        if !records.is_empty() {
            let data = encode_price_history(&records)?;
            submit_chunk(
                pool,
                retry,
                COPY_PRICE_HISTORY,
                data,
                "price_history",
                chunk_index,
                stats,
            )
            .await?;
        }
        chunk_index += 1;
    }
    info!(rows = stats.price_history, "price history loaded");
    Ok(())
}

async fn load_sales_rank_history(
    config: &Config,
    pool: &PgPool,
    retry: &RetryPolicy,
    transformer: &Transformer,
    loaded_asins: &HashSet<String>,
    stats: &mut PgLoadStats,
) -> Result<(), LoadError> {
    let mut reader = ChunkReader::<RawRankRow>::open(
        &config.source.sales_rank_history_path(),
        config.source.chunk_size,
    )?;
    let mut chunk_index = 0usize;
    while let Some(chunk) = reader.next_chunk() {
        let mut tally = RejectionTally::default();
        let mut records = Vec::with_capacity(chunk.len());
        for raw in chunk {
            if let Some(obs) = transformer.rank(raw, &mut tally) {
                if loaded_asins.contains(&obs.asin) {
                    records.push(obs);
                } else {
                    stats.orphans_skipped += 1;
                }
            }
        }
        tally.check_threshold(config.load.reject_threshold)?;
        stats.tally.absorb(&tally);

        if !records.is_empty() {
            let data = encode_sales_rank_history(&records)?;
            submit_chunk(
                pool,
                retry,
                COPY_SALES_RANK_HISTORY,
                data,
                "sales_rank_history",
                chunk_index,
                stats,
            )
            .await?;
        }
        chunk_index += 1;
    }
    info!(rows = stats.sales_rank_history, "sales rank history loaded");
    Ok(())
}

async fn load_product_metrics(
    config: &Config,
    pool: &PgPool,
    retry: &RetryPolicy,
    transformer: &Transformer,
    loaded_asins: &HashSet<String>,
    stats: &mut PgLoadStats,
) -> Result<(), LoadError> {
    let path = config.source.product_metrics_path();
    if !path.exists() {
        // The metrics export is optional in the source dataset.
        warn!(path = %path.display(), "product metrics file not found, skipping");
        return Ok(());
    }

    let mut reader = ChunkReader::<RawMetricsRow>::open(&path, config.source.chunk_size)?;
    let mut chunk_index = 0usize;
    while let Some(chunk) = reader.next_chunk() {
        let mut tally = RejectionTally::default();
        let mut records = Vec::with_capacity(chunk.len());
        for raw in chunk {
            if let Some(record) = transformer.metrics(raw, &mut tally) {
                if loaded_asins.contains(&record.asin) {
                    records.push(record);
                } else {
                    stats.orphans_skipped += 1;
                }
            }
        }
        tally.check_threshold(config.load.reject_threshold)?;
        stats.tally.absorb(&tally);

        if !records.is_empty() {
            let data = encode_product_metrics(&records)?;
            submit_chunk(
                pool,
                retry,
                COPY_PRODUCT_METRICS,
                data,
                "product_metrics",
                chunk_index,
                stats,
            )
            .await?;
        }
        chunk_index += 1;
    }
    info!(rows = stats.product_metrics, "product metrics loaded");
    Ok(())
}

/// Stream one encoded chunk through COPY. Constraint violations fail only
/// this chunk and are recorded; anything else aborts the phase.
async fn submit_chunk(
    pool: &PgPool,
    retry: &RetryPolicy,
    copy_sql: &'static str,
    data: Vec<u8>,
    table: &'static str,
    chunk_index: usize,
    stats: &mut PgLoadStats,
) -> Result<(), LoadError> {
    let result = retry
        .run(table, || {
            let data = &data;
            async move {
                let mut copy = pool
                    .copy_in_raw(copy_sql)
                    .await
                    .map_err(|e| LoadError::from_pg(e, table))?;
                copy.send(data.as_slice())
                    .await
                    .map_err(|e| LoadError::from_pg(e, table))?;
                copy.finish()
                    .await
                    .map_err(|e| LoadError::from_pg(e, table))
            }
        })
        .await;

    match result {
        Ok(rows) => {
            match table {
                "products" => stats.products += rows,
                "price_history" => stats.price_history += rows,
                "sales_rank_history" => stats.sales_rank_history += rows,
                "product_metrics" => stats.product_metrics += rows,
                _ => unreachable!("unknown table {table}"),
            }
            Ok(())
        }
        Err(LoadError::ConstraintViolation { detail, .. }) => {
            warn!(table, chunk_index, %detail, "chunk failed, continuing");
            stats.failed_chunks.push(ChunkFailure {
                table,
                chunk_index,
                detail,
            });
            Ok(())
        }
        Err(other) => Err(other),
    }
}

fn into_bytes(writer: csv::Writer<Vec<u8>>) -> Result<Vec<u8>, LoadError> {
    writer
        .into_inner()
        .map_err(|e| LoadError::Io(std::io::Error::other(e.to_string())))
}

fn opt_str(value: &Option<String>) -> String {
    value.clone().unwrap_or_default()
}

fn opt_f64(value: Option<f64>) -> String {
    value.map(|v| v.to_string()).unwrap_or_default()
}

fn opt_i64(value: Option<i64>) -> String {
    value.map(|v| v.to_string()).unwrap_or_default()
}

/// Encode product rows as COPY-ready CSV. Empty unquoted fields read back
/// as SQL NULL.
fn encode_products(records: &[ProductRecord]) -> Result<Vec<u8>, LoadError> {
    let mut writer = csv::WriterBuilder::new()
        .has_headers(false)
        .from_writer(Vec::new());
    for r in records {
        writer.write_record([
            r.asin.clone(),
            opt_str(&r.title),
            opt_str(&r.brand),
            opt_str(&r.source_category),
            opt_f64(r.current_price),
            opt_i64(r.current_sales_rank),
            opt_f64(r.rating),
            r.review_count.to_string(),
        ])?;
    }
    into_bytes(writer)
}

fn encode_price_history(records: &[PriceObservation]) -> Result<Vec<u8>, LoadError> {
    let mut writer = csv::WriterBuilder::new()
        .has_headers(false)
        .from_writer(Vec::new());
    for r in records {
        writer.write_record([
            r.asin.clone(),
            r.date.format("%Y-%m-%d").to_string(),
            opt_f64(r.price_usd),
            opt_str(&r.source_category),
            opt_str(&r.brand),
            r.price_bucket.unwrap_or_default().to_string(),
        ])?;
    }
    into_bytes(writer)
}

fn encode_sales_rank_history(records: &[RankObservation]) -> Result<Vec<u8>, LoadError> {
    let mut writer = csv::WriterBuilder::new()
        .has_headers(false)
        .from_writer(Vec::new());
    for r in records {
        writer.write_record([
            r.asin.clone(),
            r.date.format("%Y-%m-%d").to_string(),
            opt_i64(r.sales_rank),
            opt_str(&r.source_category),
            opt_str(&r.brand),
            r.rank_bucket.unwrap_or_default().to_string(),
        ])?;
    }
    into_bytes(writer)
}

fn encode_product_metrics(records: &[MetricsRecord]) -> Result<Vec<u8>, LoadError> {
    let mut writer = csv::WriterBuilder::new()
        .has_headers(false)
        .from_writer(Vec::new());
    for r in records {
        writer.write_record([
            r.asin.clone(),
            opt_str(&r.source_category),
            opt_str(&r.brand),
            opt_f64(r.current_price),
            opt_f64(r.current_rating),
            r.review_count.to_string(),
            opt_i64(r.current_sales_rank),
            opt_i64(r.monthly_sold),
        ])?;
    }
    into_bytes(writer)
}

/// Incremental refresh: per-key upsert, overwriting the stored row on
/// conflict. Much slower than COPY; meant for small deltas against an
/// already loaded target.
pub async fn incremental_refresh(config: &Config, pool: &PgPool) -> Result<PgLoadStats, LoadError> {
    let transformer = Transformer::default();
    let mut stats = PgLoadStats::default();
    let mut known_asins: HashSet<String> = HashSet::new();

    // Products first, same ordering contract as the bulk path.
    let mut reader = ChunkReader::<RawProductRow>::open(
        &config.source.products_path(),
        config.load.batch_size,
    )?;
    while let Some(chunk) = reader.next_chunk() {
        let mut tally = RejectionTally::default();
        let records = dedupe_by_key(
            chunk
                .into_iter()
                .filter_map(|raw| transformer.product(raw, &mut tally))
                .collect(),
            |r: &ProductRecord| r.asin.clone(),
        );
        tally.check_threshold(config.load.reject_threshold)?;
        stats.tally.absorb(&tally);
        for r in &records {
            known_asins.insert(r.asin.clone());
        }
        if !records.is_empty() {
            stats.products += upsert_products(pool, &records).await?;
        }
    }

    let mut reader = ChunkReader::<RawPriceRow>::open(
        &config.source.price_history_path(),
        config.load.batch_size,
    )?;
    while let Some(chunk) = reader.next_chunk() {
        let mut tally = RejectionTally::default();
        let records = dedupe_by_key(
            chunk
                .into_iter()
                .filter_map(|raw| transformer.price(raw, &mut tally))
                .filter(|obs| known_asins.contains(&obs.asin))
                .collect(),
            |r: &PriceObservation| (r.asin.clone(), r.date),
        );
        tally.check_threshold(config.load.reject_threshold)?;
        stats.tally.absorb(&tally);
        if !records.is_empty() {
            stats.price_history += upsert_price_history(pool, &records).await?;
        }
    }

    let mut reader = ChunkReader::<RawRankRow>::open(
        &config.source.sales_rank_history_path(),
        config.load.batch_size,
    )?;
    while let Some(chunk) = reader.next_chunk() {
        let mut tally = RejectionTally::default();
        let records = dedupe_by_key(
            chunk
                .into_iter()
                .filter_map(|raw| transformer.rank(raw, &mut tally))
                .filter(|obs| known_asins.contains(&obs.asin))
                .collect(),
            |r: &RankObservation| (r.asin.clone(), r.date),
        );
        tally.check_threshold(config.load.reject_threshold)?;
        stats.tally.absorb(&tally);
        if !records.is_empty() {
            stats.sales_rank_history += upsert_sales_rank_history(pool, &records).await?;
        }
    }

    let metrics_path = config.source.product_metrics_path();
    if metrics_path.exists() {
        let mut reader = ChunkReader::<RawMetricsRow>::open(&metrics_path, config.load.batch_size)?;
        while let Some(chunk) = reader.next_chunk() {
            let mut tally = RejectionTally::default();
            let records = dedupe_by_key(
                chunk
                    .into_iter()
                    .filter_map(|raw| transformer.metrics(raw, &mut tally))
                    .filter(|r| known_asins.contains(&r.asin))
                    .collect(),
                |r: &MetricsRecord| r.asin.clone(),
            );
            tally.check_threshold(config.load.reject_threshold)?;
            stats.tally.absorb(&tally);
            if !records.is_empty() {
                stats.product_metrics += upsert_product_metrics(pool, &records).await?;
            }
        }
    }

    Ok(stats)
}

/// An upsert batch must not hold the same conflict key twice; Postgres
/// refuses to update one row a second time within a statement. The last
/// occurrence wins, matching overwrite-on-conflict.
fn dedupe_by_key<T, K, F>(records: Vec<T>, key: F) -> Vec<T>
where
    K: Hash + Eq,
    F: Fn(&T) -> K,
{
    let mut seen: HashMap<K, usize> = HashMap::new();
    let mut kept: Vec<Option<T>> = Vec::with_capacity(records.len());
    for record in records {
        match seen.entry(key(&record)) {
            Entry::Occupied(slot) => kept[*slot.get()] = Some(record),
            Entry::Vacant(slot) => {
                slot.insert(kept.len());
                kept.push(Some(record));
            }
        }
    }
    kept.into_iter().flatten().collect()
}

async fn upsert_products(pool: &PgPool, records: &[ProductRecord]) -> Result<u64, LoadError> {
    let mut qb: QueryBuilder<Postgres> = QueryBuilder::new(
        "INSERT INTO products (asin, title, brand, source_category, current_price, \
         current_sales_rank, rating, review_count) ",
    );
    qb.push_values(records, |mut b, r| {
        b.push_bind(&r.asin)
            .push_bind(&r.title)
            .push_bind(&r.brand)
            .push_bind(&r.source_category)
            .push_bind(r.current_price)
            .push_bind(r.current_sales_rank)
            .push_bind(r.rating)
            .push_bind(r.review_count as i32);
    });
    qb.push(
        " ON CONFLICT (asin) DO UPDATE SET \
         title = EXCLUDED.title, brand = EXCLUDED.brand, \
         source_category = EXCLUDED.source_category, \
         current_price = EXCLUDED.current_price, \
         current_sales_rank = EXCLUDED.current_sales_rank, \
         rating = EXCLUDED.rating, review_count = EXCLUDED.review_count",
    );
    let result = qb
        .build()
        .execute(pool)
        .await
        .map_err(|e| LoadError::from_pg(e, "upsert products"))?;
    Ok(result.rows_affected())
}

async fn upsert_price_history(
    pool: &PgPool,
    records: &[PriceObservation],
) -> Result<u64, LoadError> {
    let mut qb: QueryBuilder<Postgres> = QueryBuilder::new(
        "INSERT INTO price_history (asin, date, price_usd, source_category, brand, price_bucket) ",
    );
    qb.push_values(records, |mut b, r| {
        b.push_bind(&r.asin)
            .push_bind(r.date)
            .push_bind(r.price_usd)
            .push_bind(&r.source_category)
            .push_bind(&r.brand)
            .push_bind(r.price_bucket);
    });
    qb.push(
        " ON CONFLICT (asin, date) DO UPDATE SET \
         price_usd = EXCLUDED.price_usd, \
         source_category = EXCLUDED.source_category, \
         brand = EXCLUDED.brand, price_bucket = EXCLUDED.price_bucket",
    );
    let result = qb
        .build()
        .execute(pool)
        .await
        .map_err(|e| LoadError::from_pg(e, "upsert price_history"))?;
    Ok(result.rows_affected())
}

async fn upsert_sales_rank_history(
    pool: &PgPool,
    records: &[RankObservation],
) -> Result<u64, LoadError> {
    let mut qb: QueryBuilder<Postgres> = QueryBuilder::new(
        "INSERT INTO sales_rank_history (asin, date, sales_rank, source_category, brand, \
         rank_bucket) ",
    );
    qb.push_values(records, |mut b, r| {
        b.push_bind(&r.asin)
            .push_bind(r.date)
            .push_bind(r.sales_rank)
            .push_bind(&r.source_category)
            .push_bind(&r.brand)
            .push_bind(r.rank_bucket);
    });
    qb.push(
        " ON CONFLICT (asin, date) DO UPDATE SET \
         sales_rank = EXCLUDED.sales_rank, \
         source_category = EXCLUDED.source_category, \
         brand = EXCLUDED.brand, rank_bucket = EXCLUDED.rank_bucket",
    );
    let result = qb
        .build()
        .execute(pool)
        .await
        .map_err(|e| LoadError::from_pg(e, "upsert sales_rank_history"))?;
    Ok(result.rows_affected())
}

async fn upsert_product_metrics(
    pool: &PgPool,
    records: &[MetricsRecord],
) -> Result<u64, LoadError> {
    let mut qb: QueryBuilder<Postgres> = QueryBuilder::new(
        "INSERT INTO product_metrics (asin, source_category, brand, current_price, \
         current_rating, review_count, current_sales_rank, monthly_sold) ",
    );
    qb.push_values(records, |mut b, r| {
        b.push_bind(&r.asin)
            .push_bind(&r.source_category)
            .push_bind(&r.brand)
            .push_bind(r.current_price)
            .push_bind(r.current_rating)
            .push_bind(r.review_count as i32)
            .push_bind(r.current_sales_rank)
            .push_bind(r.monthly_sold);
    });
    qb.push(
        " ON CONFLICT (asin) DO UPDATE SET \
         source_category = EXCLUDED.source_category, brand = EXCLUDED.brand, \
         current_price = EXCLUDED.current_price, current_rating = EXCLUDED.current_rating, \
         review_count = EXCLUDED.review_count, \
         current_sales_rank = EXCLUDED.current_sales_rank, \
         monthly_sold = EXCLUDED.monthly_sold",
    );
    let result = qb
        .build()
        .execute(pool)
        .await
        .map_err(|e| LoadError::from_pg(e, "upsert product_metrics"))?;
    Ok(result.rows_affected())
}

/// Integrity summary for `wbench verify`.
#[derive(Debug)]
pub struct PgIntegrity {
    pub products: i64,
    pub price_history: i64,
    pub sales_rank_history: i64,
    pub product_metrics: i64,
    pub orphaned_price_history: i64,
    pub orphaned_sales_rank_history: i64,
    pub orphaned_product_metrics: i64,
    pub avg_price_rows_per_product: f64,
    pub avg_rank_rows_per_product: f64,
}

pub async fn verify(pool: &PgPool) -> Result<PgIntegrity, LoadError> {
    async fn count(pool: &PgPool, sql: &str) -> Result<i64, LoadError> {
        sqlx::query_scalar(sql)
            .fetch_one(pool)
            .await
            .map_err(|e| LoadError::from_pg(e, "verify"))
    }

    async fn avg(pool: &PgPool, sql: &str) -> Result<f64, LoadError> {
        let row = sqlx::query(sql)
            .fetch_one(pool)
            .await
            .map_err(|e| LoadError::from_pg(e, "verify"))?;
        Ok(row.get("avg_n"))
    }

    Ok(PgIntegrity {
        products: count(pool, "SELECT COUNT(*) FROM products").await?,
        price_history: count(pool, "SELECT COUNT(*) FROM price_history").await?,
        sales_rank_history: count(pool, "SELECT COUNT(*) FROM sales_rank_history").await?,
        product_metrics: count(pool, "SELECT COUNT(*) FROM product_metrics").await?,
        orphaned_price_history: count(
            pool,
            "SELECT COUNT(*) FROM price_history ph \
             LEFT JOIN products p ON ph.asin = p.asin WHERE p.asin IS NULL",
        )
        .await?,
        orphaned_sales_rank_history: count(
            pool,
            "SELECT COUNT(*) FROM sales_rank_history srh \
             LEFT JOIN products p ON srh.asin = p.asin WHERE p.asin IS NULL",
        )
        .await?,
        orphaned_product_metrics: count(
            pool,
            "SELECT COUNT(*) FROM product_metrics pm \
             LEFT JOIN products p ON pm.asin = p.asin WHERE p.asin IS NULL",
        )
        .await?,
        avg_price_rows_per_product: avg(
            pool,
            "SELECT COALESCE(AVG(n), 0)::FLOAT8 AS avg_n FROM \
             (SELECT COUNT(*) AS n FROM price_history GROUP BY asin) sub",
        )
        .await?,
        avg_rank_rows_per_product: avg(
            pool,
            "SELECT COALESCE(AVG(n), 0)::FLOAT8 AS avg_n FROM \
             (SELECT COUNT(*) AS n FROM sales_rank_history GROUP BY asin) sub",
        )
        .await?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bucket::price_bucket;
    use chrono::NaiveDate;

    #[test]
    fn test_encode_products_nulls_are_empty_fields() {
        let records = vec![ProductRecord {
            asin: "B000000001".into(),
            title: Some("Widget".into()),
            brand: None,
            source_category: Some("Electronics".into()),
            current_price: Some(19.99),
            current_sales_rank: None,
            rating: None,
            review_count: 12,
        }];
        let bytes = encode_products(&records).unwrap();
        let text = String::from_utf8(bytes).unwrap();
        assert_eq!(text, "B000000001,Widget,,Electronics,19.99,,,12\n");
    }

    #[test]
    fn test_encode_price_history_dates_and_buckets() {
        let records = vec![PriceObservation {
            asin: "B000000001".into(),
            date: NaiveDate::from_ymd_opt(2025, 3, 7).unwrap(),
            price_usd: Some(7.5),
            source_category: None,
            brand: Some("Acme".into()),
            price_bucket: Some("$0-$10"),
        }];
        let bytes = encode_price_history(&records).unwrap();
        let text = String::from_utf8(bytes).unwrap();
        assert_eq!(text, "B000000001,2025-03-07,7.5,,Acme,$0-$10\n");
    }

    #[test]
    fn test_encode_quotes_embedded_commas() {
        let records = vec![ProductRecord {
            asin: "B000000001".into(),
            title: Some("Widget, Deluxe".into()),
            brand: None,
            source_category: None,
            current_price: None,
            current_sales_rank: None,
            rating: None,
            review_count: 0,
        }];
        let bytes = encode_products(&records).unwrap();
        let text = String::from_utf8(bytes).unwrap();
        assert!(text.contains("\"Widget, Deluxe\""));
    }

    fn obs(asin: &str, day: u32, price: f64) -> PriceObservation {
        PriceObservation {
            asin: asin.into(),
            date: NaiveDate::from_ymd_opt(2025, 1, day).unwrap(),
            price_usd: Some(price),
            source_category: None,
            brand: None,
            price_bucket: price_bucket(Some(price)),
        }
    }

    #[test]
    fn test_dedupe_keeps_last_value_per_key() {
        let records = vec![
            obs("B000000001", 1, 10.0),
            obs("B000000002", 1, 20.0),
            obs("B000000001", 1, 30.0),
        ];
        let deduped = dedupe_by_key(records, |r| (r.asin.clone(), r.date));
        assert_eq!(deduped.len(), 2);
        assert_eq!(deduped[0].asin, "B000000001");
        assert_eq!(deduped[0].price_usd, Some(30.0));
        assert_eq!(deduped[1].asin, "B000000002");
    }

    #[test]
    fn test_dedupe_keeps_distinct_dates_for_one_asin() {
        let records = vec![obs("B000000001", 1, 10.0), obs("B000000001", 2, 10.0)];
        let deduped = dedupe_by_key(records, |r| (r.asin.clone(), r.date));
        assert_eq!(deduped.len(), 2);
    }

    #[test]
    fn test_encode_null_rank_with_null_bucket() {
        let records = vec![RankObservation {
            asin: "B000000001".into(),
            date: NaiveDate::from_ymd_opt(2025, 1, 1).unwrap(),
            sales_rank: None,
            source_category: None,
            brand: None,
            rank_bucket: None,
        }];
        let bytes = encode_sales_rank_history(&records).unwrap();
        let text = String::from_utf8(bytes).unwrap();
        assert_eq!(text, "B000000001,2025-01-01,,,,\n");
    }
}
