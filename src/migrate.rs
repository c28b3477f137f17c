//! Schema surfaces for both targets.
//!
//! Postgres gets four normalized tables with foreign keys cascading from
//! `products`; MongoDB gets one collection with a unique ASIN index plus
//! secondary indexes on the embedded array date fields and the common
//! filter columns. Everything here is idempotent so `wbench init` can be
//! re-run safely.

use mongodb::options::IndexOptions;
use mongodb::{Database, IndexModel};
use sqlx::PgPool;

use crate::config::Config;
use crate::error::LoadError;

pub async fn init_postgres(pool: &PgPool) -> Result<(), LoadError> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS products (
            asin CHAR(10) PRIMARY KEY,
            title TEXT,
            brand TEXT,
            source_category TEXT,
            current_price DOUBLE PRECISION,
            current_sales_rank BIGINT,
            rating DOUBLE PRECISION,
            review_count INTEGER NOT NULL DEFAULT 0
        )
        "#,
    )
    .execute(pool)
    .await
    .map_err(|e| LoadError::from_pg(e, "create products"))?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS price_history (
            id BIGSERIAL PRIMARY KEY,
            asin CHAR(10) NOT NULL REFERENCES products(asin) ON DELETE CASCADE,
            date DATE NOT NULL,
            price_usd DOUBLE PRECISION,
            source_category TEXT,
            brand TEXT,
            price_bucket TEXT,
            UNIQUE (asin, date)
        )
        "#,
    )
    .execute(pool)
    .await
    .map_err(|e| LoadError::from_pg(e, "create price_history"))?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS sales_rank_history (
            id BIGSERIAL PRIMARY KEY,
            asin CHAR(10) NOT NULL REFERENCES products(asin) ON DELETE CASCADE,
            date DATE NOT NULL,
            sales_rank BIGINT,
            source_category TEXT,
            brand TEXT,
            rank_bucket TEXT,
            UNIQUE (asin, date)
        )
        "#,
    )
    .execute(pool)
    .await
    .map_err(|e| LoadError::from_pg(e, "create sales_rank_history"))?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS product_metrics (
            asin CHAR(10) PRIMARY KEY REFERENCES products(asin) ON DELETE CASCADE,
            source_category TEXT,
            brand TEXT,
            current_price DOUBLE PRECISION,
            current_rating DOUBLE PRECISION,
            review_count INTEGER NOT NULL DEFAULT 0,
            current_sales_rank BIGINT,
            monthly_sold BIGINT
        )
        "#,
    )
    .execute(pool)
    .await
    .map_err(|e| LoadError::from_pg(e, "create product_metrics"))?;

    for stmt in [
        "CREATE INDEX IF NOT EXISTS idx_price_history_date ON price_history(date)",
        "CREATE INDEX IF NOT EXISTS idx_price_history_category ON price_history(source_category)",
        "CREATE INDEX IF NOT EXISTS idx_sales_rank_history_date ON sales_rank_history(date)",
        "CREATE INDEX IF NOT EXISTS idx_sales_rank_history_category ON sales_rank_history(source_category)",
        "CREATE INDEX IF NOT EXISTS idx_products_brand ON products(brand)",
        "CREATE INDEX IF NOT EXISTS idx_products_category ON products(source_category)",
    ] {
        sqlx::query(stmt)
            .execute(pool)
            .await
            .map_err(|e| LoadError::from_pg(e, "create index"))?;
    }

    Ok(())
}

pub async fn init_mongo(db: &Database, config: &Config) -> Result<(), LoadError> {
    let collection = db.collection::<bson::Document>(&config.mongodb.collection);
    create_mongo_indexes(&collection).await
}

/// Index creation is shared between `init` and the tail of a full load
/// (the loader drops the collection, which drops its indexes too).
pub async fn create_mongo_indexes(
    collection: &mongodb::Collection<bson::Document>,
) -> Result<(), LoadError> {
    let unique_asin = IndexModel::builder()
        .keys(bson::doc! { "asin": 1 })
        .options(IndexOptions::builder().unique(true).build())
        .build();
    collection
        .create_index(unique_asin)
        .await
        .map_err(|e| LoadError::from_mongo(e, "create asin index"))?;

    for keys in [
        bson::doc! { "price_history.date": 1 },
        bson::doc! { "sales_rank_history.date": 1 },
        bson::doc! { "brand": 1 },
        bson::doc! { "category": 1 },
        bson::doc! { "category": 1, "brand": 1 },
    ] {
        collection
            .create_index(IndexModel::builder().keys(keys).build())
            .await
            .map_err(|e| LoadError::from_mongo(e, "create secondary index"))?;
    }

    Ok(())
}
