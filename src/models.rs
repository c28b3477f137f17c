//! Core data models for the dual-target pipeline.
//!
//! The transformer owns the canonical validated records; the relational
//! loader consumes them as flat rows, and the document assembler folds the
//! observation records into one [`ProductDocument`] per ASIN with two
//! embedded, date-ordered history arrays.

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

/// Validated product row for both targets.
#[derive(Debug, Clone, PartialEq)]
pub struct ProductRecord {
    pub asin: String,
    pub title: Option<String>,
    pub brand: Option<String>,
    pub source_category: Option<String>,
    pub current_price: Option<f64>,
    pub current_sales_rank: Option<i64>,
    pub rating: Option<f64>,
    pub review_count: i64,
}

/// Validated price observation. At most one per (asin, date).
#[derive(Debug, Clone, PartialEq)]
pub struct PriceObservation {
    pub asin: String,
    pub date: NaiveDate,
    pub price_usd: Option<f64>,
    pub source_category: Option<String>,
    pub brand: Option<String>,
    pub price_bucket: Option<&'static str>,
}

/// Validated sales-rank observation. At most one per (asin, date).
#[derive(Debug, Clone, PartialEq)]
pub struct RankObservation {
    pub asin: String,
    pub date: NaiveDate,
    pub sales_rank: Option<i64>,
    pub source_category: Option<String>,
    pub brand: Option<String>,
    pub rank_bucket: Option<&'static str>,
}

/// Derived metrics snapshot, exactly one per product. Recomputed wholesale
/// on every reload, never patched field by field.
#[derive(Debug, Clone, PartialEq)]
pub struct MetricsRecord {
    pub asin: String,
    pub source_category: Option<String>,
    pub brand: Option<String>,
    pub current_price: Option<f64>,
    pub current_rating: Option<f64>,
    pub review_count: i64,
    pub current_sales_rank: Option<i64>,
    pub monthly_sold: Option<i64>,
}

/// Embedded price-history entry. Dates are stored as `YYYY-MM-DD` strings
/// so lexicographic comparison matches chronological order in aggregation
/// pipelines.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PriceEntry {
    pub date: String,
    pub price_usd: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub source_category: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub brand: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub price_bucket: Option<String>,
}

/// Embedded sales-rank-history entry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RankEntry {
    pub date: String,
    pub sales_rank: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub source_category: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub brand: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rank_bucket: Option<String>,
}

/// One document per product in the MongoDB target. The two history arrays
/// are ordered by date ascending; their lifecycle is bound to the parent
/// document (created and replaced together, never stored standalone).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProductDocument {
    pub asin: String,
    pub title: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub brand: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub category: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub current_price: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub current_sales_rank: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rating: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub review_count: Option<i64>,
    pub price_history: Vec<PriceEntry>,
    pub sales_rank_history: Vec<RankEntry>,
    pub created_at: bson::DateTime,
    pub updated_at: bson::DateTime,
}

impl From<&PriceObservation> for PriceEntry {
    fn from(obs: &PriceObservation) -> Self {
        PriceEntry {
            date: obs.date.format("%Y-%m-%d").to_string(),
            price_usd: obs.price_usd,
            source_category: obs.source_category.clone(),
            brand: obs.brand.clone(),
            price_bucket: obs.price_bucket.map(|b| b.to_string()),
        }
    }
}

impl From<&RankObservation> for RankEntry {
    fn from(obs: &RankObservation) -> Self {
        RankEntry {
            date: obs.date.format("%Y-%m-%d").to_string(),
            sales_rank: obs.sales_rank,
            source_category: obs.source_category.clone(),
            brand: obs.brand.clone(),
            rank_bucket: obs.rank_bucket.map(|b| b.to_string()),
        }
    }
}
