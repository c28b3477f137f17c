//! Document loader.
//!
//! Folds the validated records into one document per product, each with two
//! embedded history arrays ordered by date ascending, then loads the whole
//! collection in unordered batches. Documents fail individually: an
//! oversized document or a duplicate key skips that product and the rest of
//! the batch still lands.

use std::collections::HashMap;

use bson::doc;
use mongodb::error::ErrorKind;
use mongodb::{Collection, Database};
use tracing::{info, warn};

use crate::config::Config;
use crate::error::LoadError;
use crate::migrate;
use crate::models::{PriceEntry, PriceObservation, ProductDocument, ProductRecord, RankEntry, RankObservation};
use crate::reader::{ChunkReader, RawPriceRow, RawProductRow, RawRankRow};
use crate::retry::RetryPolicy;
use crate::transform::{RejectionTally, Transformer};

/// One document that could not be inserted, with the server's verdict.
#[derive(Debug, Clone)]
pub struct DocumentFailure {
    pub asin: String,
    pub code: i32,
    pub message: String,
}

/// Outcome of one document load phase.
#[derive(Debug, Default)]
pub struct MongoLoadStats {
    pub documents: u64,
    pub batches: u64,
    pub tally: RejectionTally,
    /// Observation rows whose product never materialized (only non-zero
    /// when a `--limit` truncates the product set).
    pub orphans_skipped: u64,
    /// Products whose serialized document exceeded the size ceiling.
    pub oversized: Vec<LoadError>,
    pub failed_documents: Vec<DocumentFailure>,
}

/// Buffers per-product accumulators, then emits finished documents with
/// both history arrays sorted by date ascending. Memory is bounded by the
/// distinct-product count, not by observation count ordering.
#[derive(Debug, Default)]
pub struct DocumentAssembler {
    products: HashMap<String, ProductDocument>,
}

impl DocumentAssembler {
    pub fn add_product(&mut self, record: &ProductRecord) {
        let now = bson::DateTime::now();
        self.products.insert(
            record.asin.clone(),
            ProductDocument {
                asin: record.asin.clone(),
                title: record.title.clone(),
                brand: record.brand.clone(),
                category: record.source_category.clone(),
                current_price: record.current_price,
                current_sales_rank: record.current_sales_rank,
                rating: record.rating,
                review_count: Some(record.review_count),
                price_history: Vec::new(),
                sales_rank_history: Vec::new(),
                created_at: now,
                updated_at: now,
            },
        );
    }

    /// Returns false when no product with this ASIN was registered.
    pub fn add_price(&mut self, obs: &PriceObservation) -> bool {
        match self.products.get_mut(&obs.asin) {
            Some(document) => {
                document.price_history.push(PriceEntry::from(obs));
                true
            }
            None => false,
        }
    }

    pub fn add_rank(&mut self, obs: &RankObservation) -> bool {
        match self.products.get_mut(&obs.asin) {
            Some(document) => {
                document.sales_rank_history.push(RankEntry::from(obs));
                true
            }
            None => false,
        }
    }

    pub fn len(&self) -> usize {
        self.products.len()
    }

    pub fn is_empty(&self) -> bool {
        self.products.is_empty()
    }

    /// Sort both embedded arrays by date and hand the documents over in
    /// ASIN order. Date strings are `YYYY-MM-DD`, so the lexicographic sort
    /// is the chronological one.
    pub fn finish(self) -> Vec<ProductDocument> {
        let mut documents: Vec<ProductDocument> = self.products.into_values().collect();
        for document in &mut documents {
            document.price_history.sort_by(|a, b| a.date.cmp(&b.date));
            document
                .sales_rank_history
                .sort_by(|a, b| a.date.cmp(&b.date));
        }
        documents.sort_by(|a, b| a.asin.cmp(&b.asin));
        documents
    }
}

/// Serialized size gate. The store rejects anything past its hard document
/// ceiling, so catching it here keeps the failure attributable to one ASIN.
fn check_document_size(document: &ProductDocument, limit: usize) -> Result<(), LoadError> {
    let bytes = bson::to_vec(document)?;
    if bytes.len() > limit {
        return Err(LoadError::CapacityExceeded {
            asin: document.asin.clone(),
            bytes: bytes.len(),
            limit,
        });
    }
    Ok(())
}

/// Run the assembly passes over the source files and return the finished
/// documents plus the tally of rejected and skipped rows.
pub fn assemble(
    config: &Config,
    limit: Option<usize>,
    stats: &mut MongoLoadStats,
) -> Result<Vec<ProductDocument>, LoadError> {
    let transformer = Transformer::default();
    let mut assembler = DocumentAssembler::default();

    let mut reader = ChunkReader::<RawProductRow>::open(
        &config.source.products_path(),
        config.source.chunk_size,
    )?;
    while let Some(chunk) = reader.next_chunk() {
        let mut tally = RejectionTally::default();
        let mut hit_limit = false;
        for raw in chunk {
            if limit.is_some_and(|l| assembler.len() >= l) {
                hit_limit = true;
                break;
            }
            if let Some(record) = transformer.product(raw, &mut tally) {
                assembler.add_product(&record);
            }
        }
        tally.check_threshold(config.load.reject_threshold)?;
        stats.tally.absorb(&tally);
        if hit_limit {
            break;
        }
    }

    let mut reader = ChunkReader::<RawPriceRow>::open(
        &config.source.price_history_path(),
        config.source.chunk_size,
    )?;
    while let Some(chunk) = reader.next_chunk() {
        let mut tally = RejectionTally::default();
        for raw in chunk {
            if let Some(obs) = transformer.price(raw, &mut tally) {
                if !assembler.add_price(&obs) {
                    stats.orphans_skipped += 1;
                }
            }
        }
        tally.check_threshold(config.load.reject_threshold)?;
        stats.tally.absorb(&tally);
    }

    let mut reader = ChunkReader::<RawRankRow>::open(
        &config.source.sales_rank_history_path(),
        config.source.chunk_size,
    )?;
    while let Some(chunk) = reader.next_chunk() {
        let mut tally = RejectionTally::default();
        for raw in chunk {
            if let Some(obs) = transformer.rank(raw, &mut tally) {
                if !assembler.add_rank(&obs) {
                    stats.orphans_skipped += 1;
                }
            }
        }
        tally.check_threshold(config.load.reject_threshold)?;
        stats.tally.absorb(&tally);
    }

    Ok(assembler.finish())
}

/// Full drop-then-reload of the document target.
pub async fn full_load(
    config: &Config,
    db: &Database,
    limit: Option<usize>,
) -> Result<MongoLoadStats, LoadError> {
    let retry = RetryPolicy::from_config(&config.retry);
    let mut stats = MongoLoadStats::default();

    let documents = assemble(config, limit, &mut stats)?;
    info!(documents = documents.len(), "documents assembled");

    let collection: Collection<ProductDocument> = db.collection(&config.mongodb.collection);
    collection
        .drop()
        .await
        .map_err(|e| LoadError::from_mongo(e, "drop collection"))?;

    for batch in documents.chunks(config.load.batch_size) {
        // Oversized documents fail alone; the rest of the batch proceeds.
        let mut accepted: Vec<&ProductDocument> = Vec::with_capacity(batch.len());
        for document in batch {
            match check_document_size(document, config.load.max_document_bytes) {
                Ok(()) => accepted.push(document),
                Err(err) => {
                    warn!(error = %err, "document skipped");
                    stats.oversized.push(err);
                }
            }
        }
        if accepted.is_empty() {
            continue;
        }

        let inserted = retry
            .run("insert batch", || {
                let accepted = &accepted;
                let collection = &collection;
                async move { insert_batch(collection, accepted).await }
            })
            .await;
        match inserted {
            Ok(n) => stats.documents += n,
            Err(err) => {
                // Partial batch: decompose per document instead of retrying,
                // a duplicate key will fail the same way again.
                let (n, failures) = decompose_insert_error(err, &accepted)?;
                stats.documents += n;
                stats.failed_documents.extend(failures);
            }
        }
        stats.batches += 1;
    }

    let index_target: Collection<bson::Document> = db.collection(&config.mongodb.collection);
    migrate::create_mongo_indexes(&index_target).await?;
    info!(
        documents = stats.documents,
        batches = stats.batches,
        "document load complete"
    );

    Ok(stats)
}

async fn insert_batch(
    collection: &Collection<ProductDocument>,
    batch: &[&ProductDocument],
) -> Result<u64, LoadError> {
    collection
        .insert_many(batch.iter().map(|d| (*d).clone()))
        .ordered(false)
        .await
        .map(|outcome| outcome.inserted_ids.len() as u64)
        .map_err(|e| LoadError::from_mongo(e, "insert batch"))
}

/// Unordered insert reports every failed index at once; everything else in
/// the batch was written. Maps each failed index back to its ASIN.
fn decompose_insert_error(
    err: LoadError,
    batch: &[&ProductDocument],
) -> Result<(u64, Vec<DocumentFailure>), LoadError> {
    let LoadError::Mongo(driver_err) = &err else {
        // Connectivity and friends already failed the retry loop; nothing
        // document-shaped to salvage.
        return Err(err);
    };
    let ErrorKind::InsertMany(fail) = &*driver_err.kind else {
        return Err(err);
    };

    let mut failures = Vec::new();
    for we in fail.write_errors.iter().flatten() {
        let asin = batch
            .get(we.index)
            .map(|d| d.asin.clone())
            .unwrap_or_default();
        warn!(%asin, code = we.code, message = %we.message, "document rejected");
        failures.push(DocumentFailure {
            asin,
            code: we.code,
            message: we.message.clone(),
        });
    }
    let inserted = (batch.len() - failures.len()) as u64;
    Ok((inserted, failures))
}

/// Incremental refresh: upsert each document keyed by ASIN, replacing both
/// embedded arrays wholesale so a re-run never appends duplicate dates.
pub async fn incremental_refresh(
    config: &Config,
    db: &Database,
) -> Result<MongoLoadStats, LoadError> {
    let mut stats = MongoLoadStats::default();
    let documents = assemble(config, None, &mut stats)?;

    let collection: Collection<bson::Document> = db.collection(&config.mongodb.collection);
    for document in &documents {
        if let Err(err) = check_document_size(document, config.load.max_document_bytes) {
            warn!(error = %err, "document skipped");
            stats.oversized.push(err);
            continue;
        }
        let update = refresh_update(document)?;
        collection
            .update_one(doc! { "asin": &document.asin }, update)
            .upsert(true)
            .await
            .map_err(|e| LoadError::from_mongo(e, &format!("refresh {}", document.asin)))?;
        stats.documents += 1;
    }

    Ok(stats)
}

/// Build the `$set`/`$setOnInsert` update for one refreshed document.
/// `created_at` is only written on first insert; everything else, the two
/// arrays included, is replaced in place.
fn refresh_update(document: &ProductDocument) -> Result<bson::Document, LoadError> {
    let mut fields = bson::to_document(document)?;
    let created_at = fields.remove("created_at").unwrap_or_else(|| {
        bson::Bson::DateTime(bson::DateTime::now())
    });
    Ok(doc! {
        "$set": fields,
        "$setOnInsert": { "created_at": created_at },
    })
}

/// Integrity summary for `wbench verify`.
#[derive(Debug)]
pub struct MongoIntegrity {
    pub documents: u64,
    pub avg_price_entries: f64,
    pub max_price_entries: i64,
    pub avg_rank_entries: f64,
    pub max_rank_entries: i64,
}

pub async fn verify(config: &Config, db: &Database) -> Result<MongoIntegrity, LoadError> {
    use futures::TryStreamExt;

    let collection: Collection<bson::Document> = db.collection(&config.mongodb.collection);
    let documents = collection
        .count_documents(doc! {})
        .await
        .map_err(|e| LoadError::from_mongo(e, "verify"))?;

    let pipeline = vec![
        doc! { "$project": {
            "n_price": { "$size": "$price_history" },
            "n_rank": { "$size": "$sales_rank_history" },
        }},
        doc! { "$group": {
            "_id": null,
            "avg_price": { "$avg": "$n_price" },
            "max_price": { "$max": "$n_price" },
            "avg_rank": { "$avg": "$n_rank" },
            "max_rank": { "$max": "$n_rank" },
        }},
    ];
    let mut cursor = collection
        .aggregate(pipeline)
        .await
        .map_err(|e| LoadError::from_mongo(e, "verify"))?;
    let summary = cursor
        .try_next()
        .await
        .map_err(|e| LoadError::from_mongo(e, "verify"))?;

    let (avg_price_entries, max_price_entries, avg_rank_entries, max_rank_entries) = summary
        .map(|doc| {
            (
                doc.get_f64("avg_price").unwrap_or(0.0),
                doc.get_i32("max_price").map(i64::from).unwrap_or(0),
                doc.get_f64("avg_rank").unwrap_or(0.0),
                doc.get_i32("max_rank").map(i64::from).unwrap_or(0),
            )
        })
        .unwrap_or((0.0, 0, 0.0, 0));

    Ok(MongoIntegrity {
        documents,
        avg_price_entries,
        max_price_entries,
        avg_rank_entries,
        max_rank_entries,
    })
}
