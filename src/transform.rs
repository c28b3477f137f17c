//! Row validation and normalization.
//!
//! Converts loosely typed raw CSV rows into the canonical records consumed
//! by both loaders. Rules:
//!
//! - ASIN must be exactly 10 alphanumeric characters, else the row is
//!   rejected.
//! - Observation dates must parse as `YYYY-MM-DD` and must not lie in the
//!   future, else the row is rejected.
//! - A negative price or rank measurement rejects the observation row (a
//!   null measurement is fine, a negative one is corrupt).
//! - Product-level scalars degrade instead of rejecting: negative
//!   current price/rank becomes null, a rating outside [0.0, 5.0] becomes
//!   null. These are counted as adjustments.
//!
//! Nothing is dropped silently: every rejection and adjustment lands in a
//! [`RejectionTally`], and a batch whose rejection rate crosses the
//! configured threshold escalates to an abort.

use chrono::NaiveDate;
use tracing::warn;

use crate::bucket::{price_bucket, rank_bucket};
use crate::error::LoadError;
use crate::models::{MetricsRecord, PriceObservation, ProductRecord, RankObservation};
use crate::reader::{RawMetricsRow, RawPriceRow, RawProductRow, RawRankRow, RawRow};

/// Below this many rows a batch is too small for its rejection rate to be
/// meaningful, so the threshold is not enforced.
const THRESHOLD_MIN_ROWS: u64 = 100;

/// How many individual rejection reasons to keep for the summary.
const MAX_KEPT_REASONS: usize = 20;

/// Counts of rows seen, rejected, and adjusted during one table's pass.
#[derive(Debug, Default, Clone)]
pub struct RejectionTally {
    pub seen: u64,
    pub rejected: u64,
    pub adjusted: u64,
    reasons: Vec<String>,
}

impl RejectionTally {
    /// Count one rejected row. Only [`LoadError::Validation`] reaches here;
    /// its display already carries the row number and reason.
    pub fn reject(&mut self, err: &LoadError) {
        self.rejected += 1;
        warn!(%err, "rejected row");
        if self.reasons.len() < MAX_KEPT_REASONS {
            self.reasons.push(err.to_string());
        }
    }

    pub fn adjust(&mut self, row: u64, reason: &str) {
        self.adjusted += 1;
        warn!(row, reason, "adjusted row");
    }

    pub fn reasons(&self) -> &[String] {
        &self.reasons
    }

    /// Escalate if the rejection rate for this batch crossed `threshold`.
    /// Adjusted rows still load, so they do not count against the rate.
    pub fn check_threshold(&self, threshold: f64) -> Result<(), LoadError> {
        if self.seen >= THRESHOLD_MIN_ROWS
            && self.rejected as f64 / self.seen as f64 > threshold
        {
            return Err(LoadError::ThresholdExceeded {
                rejected: self.rejected,
                seen: self.seen,
            });
        }
        Ok(())
    }

    pub fn absorb(&mut self, other: &RejectionTally) {
        self.seen += other.seen;
        self.rejected += other.rejected;
        self.adjusted += other.adjusted;
        for reason in &other.reasons {
            if self.reasons.len() >= MAX_KEPT_REASONS {
                break;
            }
            self.reasons.push(reason.clone());
        }
    }
}

/// ASINs are 10 characters, alphanumeric.
pub fn valid_asin(asin: &str) -> bool {
    asin.len() == 10 && asin.bytes().all(|b| b.is_ascii_alphanumeric())
}

/// Stateless validator; `today` is injected so the future-date rule is
/// deterministic under test.
#[derive(Debug, Clone)]
pub struct Transformer {
    today: NaiveDate,
}

impl Default for Transformer {
    fn default() -> Self {
        Self {
            today: chrono::Utc::now().date_naive(),
        }
    }
}

impl Transformer {
    pub fn with_today(today: NaiveDate) -> Self {
        Self { today }
    }

    fn parse_date(&self, row: u64, raw: &str) -> Result<NaiveDate, LoadError> {
        let date = NaiveDate::parse_from_str(raw.trim(), "%Y-%m-%d")
            .map_err(|_| LoadError::validation(row, format!("unparseable date '{}'", raw)))?;
        if date > self.today {
            return Err(LoadError::validation(row, format!("future date '{}'", raw)));
        }
        Ok(date)
    }

    fn check_asin(row: u64, raw: &str) -> Result<String, LoadError> {
        let asin = raw.trim().to_string();
        if valid_asin(&asin) {
            Ok(asin)
        } else {
            Err(LoadError::validation(row, format!("malformed asin '{}'", asin)))
        }
    }

    pub fn product(
        &self,
        raw: RawRow<RawProductRow>,
        tally: &mut RejectionTally,
    ) -> Option<ProductRecord> {
        tally.seen += 1;
        let row = raw.row;
        let parsed = match raw.parsed {
            Ok(p) => p,
            Err(reason) => {
                tally.reject(&LoadError::validation(row, reason));
                return None;
            }
        };

        let asin = match Self::check_asin(row, &parsed.asin) {
            Ok(a) => a,
            Err(err) => {
                tally.reject(&err);
                return None;
            }
        };

        let current_price = match parsed.current_price {
            Some(p) if p < 0.0 => {
                tally.adjust(row, "negative current_price set to null");
                None
            }
            other => other,
        };

        let current_sales_rank = match parsed.current_sales_rank {
            Some(r) if r < 0.0 => {
                tally.adjust(row, "negative current_sales_rank set to null");
                None
            }
            Some(r) => Some(r.round() as i64),
            None => None,
        };

        let rating = match parsed.rating {
            Some(r) if !(0.0..=5.0).contains(&r) => {
                tally.adjust(row, "out-of-range rating set to null");
                None
            }
            other => other,
        };

        Some(ProductRecord {
            asin,
            title: parsed.title,
            brand: parsed.brand,
            source_category: parsed.source_category,
            current_price,
            current_sales_rank,
            rating,
            review_count: parsed.review_count.map(|c| c.round() as i64).unwrap_or(0),
        })
    }

    pub fn price(
        &self,
        raw: RawRow<RawPriceRow>,
        tally: &mut RejectionTally,
    ) -> Option<PriceObservation> {
        tally.seen += 1;
        let row = raw.row;
        let parsed = match raw.parsed {
            Ok(p) => p,
            Err(reason) => {
                tally.reject(&LoadError::validation(row, reason));
                return None;
            }
        };

        let asin = match Self::check_asin(row, &parsed.asin) {
            Ok(a) => a,
            Err(err) => {
                tally.reject(&err);
                return None;
            }
        };

        let date = match self.parse_date(row, &parsed.date) {
            Ok(d) => d,
            Err(err) => {
                tally.reject(&err);
                return None;
            }
        };

        if let Some(p) = parsed.price_usd {
            if p < 0.0 {
                tally.reject(&LoadError::validation(row, format!("negative price {}", p)));
                return None;
            }
        }

        Some(PriceObservation {
            asin,
            date,
            price_usd: parsed.price_usd,
            source_category: parsed.source_category,
            brand: parsed.brand,
            price_bucket: price_bucket(parsed.price_usd),
        })
    }

    pub fn rank(
        &self,
        raw: RawRow<RawRankRow>,
        tally: &mut RejectionTally,
    ) -> Option<RankObservation> {
        tally.seen += 1;
        let row = raw.row;
        let parsed = match raw.parsed {
            Ok(p) => p,
            Err(reason) => {
                tally.reject(&LoadError::validation(row, reason));
                return None;
            }
        };

        let asin = match Self::check_asin(row, &parsed.asin) {
            Ok(a) => a,
            Err(err) => {
                tally.reject(&err);
                return None;
            }
        };

        let date = match self.parse_date(row, &parsed.date) {
            Ok(d) => d,
            Err(err) => {
                tally.reject(&err);
                return None;
            }
        };

        let sales_rank = match parsed.sales_rank {
            Some(r) if r < 0.0 => {
                tally.reject(&LoadError::validation(row, format!("negative sales rank {}", r)));
                return None;
            }
            Some(r) => Some(r.round() as i64),
            None => None,
        };

        Some(RankObservation {
            asin,
            date,
            sales_rank,
            source_category: parsed.source_category,
            brand: parsed.brand,
            rank_bucket: rank_bucket(sales_rank),
        })
    }

    pub fn metrics(
        &self,
        raw: RawRow<RawMetricsRow>,
        tally: &mut RejectionTally,
    ) -> Option<MetricsRecord> {
        tally.seen += 1;
        let row = raw.row;
        let parsed = match raw.parsed {
            Ok(p) => p,
            Err(reason) => {
                tally.reject(&LoadError::validation(row, reason));
                return None;
            }
        };

        let asin = match Self::check_asin(row, &parsed.asin) {
            Ok(a) => a,
            Err(err) => {
                tally.reject(&err);
                return None;
            }
        };

        let current_price = match parsed.current_price {
            Some(p) if p < 0.0 => {
                tally.adjust(row, "negative current_price set to null");
                None
            }
            other => other,
        };

        let current_rating = match parsed.current_rating {
            Some(r) if !(0.0..=5.0).contains(&r) => {
                tally.adjust(row, "out-of-range rating set to null");
                None
            }
            other => other,
        };

        let current_sales_rank = match parsed.current_sales_rank {
            Some(r) if r < 0.0 => {
                tally.adjust(row, "negative current_sales_rank set to null");
                None
            }
            Some(r) => Some(r.round() as i64),
            None => None,
        };

        Some(MetricsRecord {
            asin,
            source_category: parsed.source_category,
            brand: parsed.brand,
            current_price,
            current_rating,
            review_count: parsed.review_count.map(|c| c.round() as i64).unwrap_or(0),
            current_sales_rank,
            monthly_sold: parsed.monthly_sold.map(|m| m.round() as i64),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn raw_price(row: u64, asin: &str, date: &str, price: Option<f64>) -> RawRow<RawPriceRow> {
        RawRow {
            row,
            parsed: Ok(RawPriceRow {
                asin: asin.to_string(),
                date: date.to_string(),
                price_usd: price,
                source_category: Some("Electronics".to_string()),
                brand: Some("Acme".to_string()),
            }),
        }
    }

    fn transformer() -> Transformer {
        Transformer::with_today(NaiveDate::from_ymd_opt(2025, 6, 1).unwrap())
    }

    #[test]
    fn test_valid_asin() {
        assert!(valid_asin("B08N5WRWNW"));
        assert!(valid_asin("1234567890"));
        assert!(!valid_asin("B08N5WRWN"));
        assert!(!valid_asin("B08N5WRWNW1"));
        assert!(!valid_asin("B08N5-RWNW"));
        assert!(!valid_asin(""));
    }

    #[test]
    fn test_price_row_happy_path() {
        let t = transformer();
        let mut tally = RejectionTally::default();
        let obs = t
            .price(raw_price(1, "B000000001", "2025-05-01", Some(42.0)), &mut tally)
            .unwrap();
        assert_eq!(obs.date, NaiveDate::from_ymd_opt(2025, 5, 1).unwrap());
        assert_eq!(obs.price_bucket, Some("$20-$50"));
        assert_eq!(tally.seen, 1);
        assert_eq!(tally.rejected, 0);
    }

    #[test]
    fn test_null_price_keeps_row_with_null_bucket() {
        let t = transformer();
        let mut tally = RejectionTally::default();
        let obs = t
            .price(raw_price(1, "B000000001", "2025-05-01", None), &mut tally)
            .unwrap();
        assert!(obs.price_usd.is_none());
        assert!(obs.price_bucket.is_none());
        assert_eq!(tally.rejected, 0);
    }

    #[test]
    fn test_negative_price_rejects_row() {
        let t = transformer();
        let mut tally = RejectionTally::default();
        let obs = t.price(raw_price(3, "B000000001", "2025-05-01", Some(-1.0)), &mut tally);
        assert!(obs.is_none());
        assert_eq!(tally.rejected, 1);
        assert!(tally.reasons()[0].contains("row 3"));
    }

    #[test]
    fn test_future_date_rejects_row() {
        let t = transformer();
        let mut tally = RejectionTally::default();
        let obs = t.price(raw_price(9, "B000000001", "2025-06-02", Some(5.0)), &mut tally);
        assert!(obs.is_none());
        assert_eq!(tally.rejected, 1);
        assert!(tally.reasons()[0].contains("future date"));
    }

    #[test]
    fn test_unparseable_date_rejects_row() {
        let t = transformer();
        let mut tally = RejectionTally::default();
        let obs = t.price(raw_price(2, "B000000001", "05/01/2025", Some(5.0)), &mut tally);
        assert!(obs.is_none());
        assert_eq!(tally.rejected, 1);
    }

    #[test]
    fn test_malformed_asin_rejects_row() {
        let t = transformer();
        let mut tally = RejectionTally::default();
        let obs = t.price(raw_price(1, "short", "2025-05-01", Some(5.0)), &mut tally);
        assert!(obs.is_none());
        assert_eq!(tally.rejected, 1);
    }

    #[test]
    fn test_rejections_are_validation_errors() {
        let t = transformer();

        let err = t.parse_date(4, "2099-01-01").unwrap_err();
        assert_eq!(err.kind_label(), "validation");
        assert!(err.to_string().contains("row 4"));
        assert!(err.to_string().contains("future date"));

        let err = Transformer::check_asin(9, "short").unwrap_err();
        assert_eq!(err.kind_label(), "validation");
        assert!(err.to_string().contains("row 9"));
    }

    #[test]
    fn test_product_rating_clamped_to_null() {
        let t = transformer();
        let mut tally = RejectionTally::default();
        let record = t
            .product(
                RawRow {
                    row: 1,
                    parsed: Ok(RawProductRow {
                        asin: "B000000001".to_string(),
                        title: Some("Widget".to_string()),
                        brand: None,
                        source_category: None,
                        current_price: Some(-3.0),
                        current_sales_rank: Some(12.0),
                        rating: Some(6.5),
                        review_count: None,
                    }),
                },
                &mut tally,
            )
            .unwrap();
        assert!(record.rating.is_none());
        assert!(record.current_price.is_none());
        assert_eq!(record.current_sales_rank, Some(12));
        assert_eq!(record.review_count, 0);
        assert_eq!(tally.adjusted, 2);
        assert_eq!(tally.rejected, 0);
    }

    #[test]
    fn test_threshold_not_enforced_on_tiny_batches() {
        let mut tally = RejectionTally::default();
        tally.seen = 10;
        tally.rejected = 9;
        assert!(tally.check_threshold(0.05).is_ok());
    }

    #[test]
    fn test_threshold_escalates() {
        let mut tally = RejectionTally::default();
        tally.seen = 1000;
        tally.rejected = 100;
        let err = tally.check_threshold(0.05).unwrap_err();
        assert_eq!(err.kind_label(), "rejection_threshold");
    }

    #[test]
    fn test_threshold_adjustments_do_not_count() {
        let mut tally = RejectionTally::default();
        tally.seen = 1000;
        tally.adjusted = 500;
        tally.rejected = 0;
        assert!(tally.check_threshold(0.05).is_ok());
    }
}
