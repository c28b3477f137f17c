//! End-to-end transform and assembly over synthetic source files. These
//! tests exercise the full read -> validate -> assemble path without
//! needing either database.

use std::fmt::Write as _;
use std::fs;
use std::path::PathBuf;

use chrono::{Duration, NaiveDate};
use tempfile::TempDir;

use warehouse_bench::config::{
    BenchConfig, Config, LoadConfig, MongoConfig, PostgresConfig, RetryConfig, SourceConfig,
};
use warehouse_bench::loader_mongodb::{self, MongoLoadStats};

fn test_config(data_dir: PathBuf) -> Config {
    Config {
        source: SourceConfig {
            data_dir,
            chunk_size: 1_000,
        },
        load: LoadConfig::default(),
        postgres: PostgresConfig {
            url: "postgresql://localhost/unused".to_string(),
            max_connections: 1,
        },
        mongodb: MongoConfig {
            uri: "mongodb://localhost/unused".to_string(),
            database: "unused".to_string(),
            collection: "products".to_string(),
        },
        bench: BenchConfig::default(),
        retry: RetryConfig::default(),
    }
}

fn asin(i: usize) -> String {
    format!("B{:09}", i)
}

/// 100 products with 90 daily price and rank observations each. The price
/// file carries two corrupt rows: one negative price (product 0) and one
/// future date (product 1).
fn write_dataset(dir: &TempDir) -> PathBuf {
    let data_dir = dir.path().join("data");
    fs::create_dir_all(&data_dir).unwrap();

    let start = NaiveDate::from_ymd_opt(2025, 1, 1).unwrap();

    let mut products = String::from(
        "asin,title,brand,source_category,current_price,current_sales_rank,rating,review_count\n",
    );
    for i in 0..100 {
        writeln!(
            products,
            "{},Product {},Brand{},Electronics,19.99,{},4.2,{}",
            asin(i),
            i,
            i % 7,
            100 + i,
            10 * i
        )
        .unwrap();
    }
    fs::write(data_dir.join("products.csv"), products).unwrap();

    let mut prices = String::from("asin,date,price_usd,source_category,brand\n");
    let mut ranks = String::from("asin,date,sales_rank,source_category,brand\n");
    for i in 0..100 {
        for day in 0..90i64 {
            let date = start + Duration::days(day);
            let mut date_field = date.format("%Y-%m-%d").to_string();
            let mut price = format!("{:.2}", 10.0 + (day as f64) * 0.1);
            if i == 0 && day == 0 {
                price = "-5.00".to_string();
            }
            if i == 1 && day == 0 {
                date_field = "2099-01-01".to_string();
            }
            writeln!(prices, "{},{},{},Electronics,Brand{}", asin(i), date_field, price, i % 7)
                .unwrap();
            writeln!(
                ranks,
                "{},{},{},Electronics,Brand{}",
                asin(i),
                date.format("%Y-%m-%d"),
                500 + day,
                i % 7
            )
            .unwrap();
        }
    }
    fs::write(data_dir.join("price_history.csv"), prices).unwrap();
    fs::write(data_dir.join("sales_rank_history.csv"), ranks).unwrap();

    data_dir
}

#[test]
fn test_corrupt_rows_reject_without_aborting() {
    let tmp = TempDir::new().unwrap();
    let config = test_config(write_dataset(&tmp));

    let mut stats = MongoLoadStats::default();
    let documents = loader_mongodb::assemble(&config, None, &mut stats).unwrap();

    assert_eq!(documents.len(), 100);
    assert_eq!(stats.tally.rejected, 2);

    let total_price_rows: usize = documents.iter().map(|d| d.price_history.len()).sum();
    assert_eq!(total_price_rows, 8_998);
    let total_rank_rows: usize = documents.iter().map(|d| d.sales_rank_history.len()).sum();
    assert_eq!(total_rank_rows, 9_000);

    // The products that lost a row have 89 entries; the rest keep 90.
    let affected: Vec<&str> = documents
        .iter()
        .filter(|d| d.price_history.len() == 89)
        .map(|d| d.asin.as_str())
        .collect();
    assert_eq!(affected, vec!["B000000000", "B000000001"]);
}

#[test]
fn test_embedded_arrays_are_date_ordered() {
    let tmp = TempDir::new().unwrap();
    let config = test_config(write_dataset(&tmp));

    let mut stats = MongoLoadStats::default();
    let documents = loader_mongodb::assemble(&config, None, &mut stats).unwrap();

    for document in &documents {
        for pair in document.price_history.windows(2) {
            assert!(pair[0].date <= pair[1].date, "{} out of order", document.asin);
        }
        for pair in document.sales_rank_history.windows(2) {
            assert!(pair[0].date <= pair[1].date, "{} out of order", document.asin);
        }
    }
}

#[test]
fn test_limit_caps_products_and_skips_their_observations() {
    let tmp = TempDir::new().unwrap();
    let config = test_config(write_dataset(&tmp));

    let mut stats = MongoLoadStats::default();
    let documents = loader_mongodb::assemble(&config, Some(10), &mut stats).unwrap();

    assert_eq!(documents.len(), 10);
    // 90 observations of the remaining products, both files, minus the two
    // corrupt rows that fall inside the kept set.
    assert!(stats.orphans_skipped > 0);
    for document in &documents {
        assert!(document.price_history.len() >= 89);
    }
}

#[test]
fn test_observations_for_unknown_products_are_skipped() {
    let tmp = TempDir::new().unwrap();
    let data_dir = tmp.path().join("data");
    fs::create_dir_all(&data_dir).unwrap();
    fs::write(
        data_dir.join("products.csv"),
        "asin,title,brand,source_category,current_price,current_sales_rank,rating,review_count\n\
         B000000001,Widget,Acme,Electronics,9.99,50,4.0,3\n",
    )
    .unwrap();
    fs::write(
        data_dir.join("price_history.csv"),
        "asin,date,price_usd,source_category,brand\n\
         B000000001,2025-01-01,9.99,Electronics,Acme\n\
         B999999999,2025-01-01,5.00,Electronics,Acme\n",
    )
    .unwrap();
    fs::write(
        data_dir.join("sales_rank_history.csv"),
        "asin,date,sales_rank,source_category,brand\n",
    )
    .unwrap();

    let config = test_config(data_dir);
    let mut stats = MongoLoadStats::default();
    let documents = loader_mongodb::assemble(&config, None, &mut stats).unwrap();

    assert_eq!(documents.len(), 1);
    assert_eq!(documents[0].price_history.len(), 1);
    assert_eq!(stats.orphans_skipped, 1);
    assert_eq!(stats.tally.rejected, 0);
}

#[test]
fn test_missing_source_file_fails_with_path() {
    let tmp = TempDir::new().unwrap();
    let config = test_config(tmp.path().join("nonexistent"));

    let mut stats = MongoLoadStats::default();
    let err = loader_mongodb::assemble(&config, None, &mut stats).unwrap_err();
    assert!(err.to_string().contains("products.csv"));
}
