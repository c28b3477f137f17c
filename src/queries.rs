//! Fixed analytical operations, each expressed twice: once as SQL against
//! the normalized relational schema and once as an aggregation pipeline
//! against the embedded-document collection. Both variants of an operation
//! answer the same question so their timings are comparable.

use bson::{doc, Document};
use chrono::{Duration, Utc};
use futures::TryStreamExt;
use mongodb::{Collection, Database};
use sqlx::PgPool;

use crate::config::Config;
use crate::error::LoadError;

/// The benchmark operations, in report order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operation {
    /// Monthly price statistics per category over the last 12 months.
    PriceTrend,
    /// Top 10 products by sales-rank improvement over the last 30 days.
    RankImprovement,
    /// Per-brand rating and review aggregates.
    BrandAnalysis,
}

impl Operation {
    pub fn all() -> [Operation; 3] {
        [
            Operation::PriceTrend,
            Operation::RankImprovement,
            Operation::BrandAnalysis,
        ]
    }

    pub fn name(&self) -> &'static str {
        match self {
            Operation::PriceTrend => "price_trend_by_category",
            Operation::RankImprovement => "rank_improvement",
            Operation::BrandAnalysis => "brand_analysis",
        }
    }
}

impl std::fmt::Display for Operation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

/// Date floor for windowed operations, as the `YYYY-MM-DD` string the
/// embedded arrays store.
fn cutoff(days_back: i64) -> String {
    (Utc::now().date_naive() - Duration::days(days_back))
        .format("%Y-%m-%d")
        .to_string()
}

const SQL_PRICE_TREND: &str = "\
    SELECT p.source_category, \
           date_trunc('month', ph.date) AS month, \
           AVG(ph.price_usd) AS avg_price, \
           MIN(ph.price_usd) AS min_price, \
           MAX(ph.price_usd) AS max_price, \
           STDDEV(ph.price_usd) AS stddev_price, \
           COUNT(DISTINCT ph.asin) AS product_count \
    FROM price_history ph \
    JOIN products p ON ph.asin = p.asin \
    WHERE ph.date >= CURRENT_DATE - INTERVAL '12 months' \
      AND ph.price_usd IS NOT NULL \
    GROUP BY p.source_category, month \
    ORDER BY p.source_category, month";

const SQL_RANK_IMPROVEMENT: &str = "\
    WITH daily AS ( \
        SELECT asin, date, sales_rank, \
               LAG(sales_rank) OVER (PARTITION BY asin ORDER BY date) AS prev_rank \
        FROM sales_rank_history \
        WHERE date >= CURRENT_DATE - INTERVAL '30 days' \
          AND sales_rank IS NOT NULL \
    ) \
    SELECT asin, SUM(sales_rank - prev_rank) AS rank_change, COUNT(*) AS observations \
    FROM daily \
    WHERE prev_rank IS NOT NULL \
    GROUP BY asin \
    HAVING SUM(sales_rank - prev_rank) < 0 \
    ORDER BY rank_change ASC \
    LIMIT 10";

const SQL_BRAND_ANALYSIS: &str = "\
    SELECT brand, \
           COUNT(*) AS product_count, \
           AVG(rating) AS avg_rating, \
           SUM(review_count) AS total_reviews, \
           AVG(current_price) AS avg_price \
    FROM products \
    WHERE brand IS NOT NULL \
    GROUP BY brand \
    HAVING COUNT(*) >= 5 \
    ORDER BY product_count DESC \
    LIMIT 100";

fn pipeline_price_trend() -> Vec<Document> {
    let floor = cutoff(365);
    vec![
        doc! { "$unwind": "$price_history" },
        doc! { "$match": {
            "price_history.date": { "$gte": floor },
            "price_history.price_usd": { "$ne": null },
        }},
        doc! { "$group": {
            "_id": {
                "category": "$category",
                // YYYY-MM prefix of the embedded date string.
                "month": { "$substrBytes": ["$price_history.date", 0, 7] },
            },
            "avg_price": { "$avg": "$price_history.price_usd" },
            "min_price": { "$min": "$price_history.price_usd" },
            "max_price": { "$max": "$price_history.price_usd" },
            "stddev_price": { "$stdDevSamp": "$price_history.price_usd" },
            "products": { "$addToSet": "$asin" },
        }},
        doc! { "$project": {
            "avg_price": 1,
            "min_price": 1,
            "max_price": 1,
            "stddev_price": 1,
            "product_count": { "$size": "$products" },
        }},
        doc! { "$sort": { "_id.category": 1, "_id.month": 1 } },
    ]
}

fn pipeline_rank_improvement() -> Vec<Document> {
    let floor = cutoff(30);
    vec![
        doc! { "$unwind": "$sales_rank_history" },
        doc! { "$match": {
            "sales_rank_history.date": { "$gte": floor },
            "sales_rank_history.sales_rank": { "$ne": null },
        }},
        doc! { "$sort": { "asin": 1, "sales_rank_history.date": 1 } },
        doc! { "$group": {
            "_id": "$asin",
            "ranks": { "$push": "$sales_rank_history.sales_rank" },
        }},
        doc! { "$project": {
            "observations": { "$size": "$ranks" },
            "rank_change": { "$subtract": [
                { "$last": "$ranks" },
                { "$first": "$ranks" },
            ]},
        }},
        doc! { "$match": { "rank_change": { "$lt": 0 } } },
        doc! { "$sort": { "rank_change": 1 } },
        doc! { "$limit": 10 },
    ]
}

fn pipeline_brand_analysis() -> Vec<Document> {
    vec![
        doc! { "$match": { "brand": { "$ne": null } } },
        doc! { "$group": {
            "_id": "$brand",
            "product_count": { "$sum": 1 },
            "avg_rating": { "$avg": "$rating" },
            "total_reviews": { "$sum": "$review_count" },
            "avg_price": { "$avg": "$current_price" },
        }},
        doc! { "$match": { "product_count": { "$gte": 5 } } },
        doc! { "$sort": { "product_count": -1 } },
        doc! { "$limit": 100 },
    ]
}

/// Run one operation against the relational target, returning the number
/// of result rows.
pub async fn run_postgres(op: Operation, pool: &PgPool) -> Result<u64, LoadError> {
    let sql = match op {
        Operation::PriceTrend => SQL_PRICE_TREND,
        Operation::RankImprovement => SQL_RANK_IMPROVEMENT,
        Operation::BrandAnalysis => SQL_BRAND_ANALYSIS,
    };
    let rows = sqlx::query(sql)
        .fetch_all(pool)
        .await
        .map_err(|e| LoadError::from_pg(e, op.name()))?;
    Ok(rows.len() as u64)
}

/// Run one operation against the document target, returning the number of
/// result documents.
pub async fn run_mongo(op: Operation, config: &Config, db: &Database) -> Result<u64, LoadError> {
    let pipeline = match op {
        Operation::PriceTrend => pipeline_price_trend(),
        Operation::RankImprovement => pipeline_rank_improvement(),
        Operation::BrandAnalysis => pipeline_brand_analysis(),
    };
    let collection: Collection<Document> = db.collection(&config.mongodb.collection);
    let mut cursor = collection
        .aggregate(pipeline)
        .await
        .map_err(|e| LoadError::from_mongo(e, op.name()))?;

    let mut rows = 0u64;
    while cursor
        .try_next()
        .await
        .map_err(|e| LoadError::from_mongo(e, op.name()))?
        .is_some()
    {
        rows += 1;
    }
    Ok(rows)
}
