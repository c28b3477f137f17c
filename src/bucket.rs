//! Price and sales-rank bucket derivation.
//!
//! Buckets are categorical range labels attached to every observation so
//! that both targets can group on them without re-deriving ranges at query
//! time. The breakpoints are fixed; downstream dashboards depend on the
//! exact label spellings, so they must not drift.

/// Map a price (USD) onto its bucket label. `None` stays `None`.
pub fn price_bucket(price: Option<f64>) -> Option<&'static str> {
    let p = price?;
    let label = if p < 10.0 {
        "$0-$10"
    } else if p < 20.0 {
        "$10-$20"
    } else if p < 50.0 {
        "$20-$50"
    } else if p < 100.0 {
        "$50-$100"
    } else {
        "$100+"
    };
    Some(label)
}

/// Map a sales rank onto its bucket label. `None` stays `None`.
pub fn rank_bucket(rank: Option<i64>) -> Option<&'static str> {
    let r = rank?;
    let label = if r <= 100 {
        "Top 100"
    } else if r <= 1000 {
        "Top 1000"
    } else if r <= 10_000 {
        "Top 10000"
    } else {
        "10000+"
    };
    Some(label)
}
