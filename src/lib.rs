//! # Warehouse Bench
//!
//! A dual-target ETL and benchmarking pipeline for an Amazon product
//! dataset. The same four delimited source files (products, price history,
//! sales-rank history, product metrics) are loaded into two stores with
//! deliberately different shapes, then a fixed suite of analytical queries
//! runs against both and the timings are paired into a comparison report.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────┐   ┌──────────────┐   ┌────────────────────┐
//! │  CSV source  │──▶│  Transformer │──▶│ Postgres (COPY,    │
//! │  4 files     │   │  + buckets   │   │ normalized tables) │
//! └──────────────┘   └──────┬───────┘   └─────────┬──────────┘
//!                           │                     │
//!                           ▼                     ▼
//!                 ┌──────────────────┐   ┌────────────────────┐
//!                 │ Document         │   │  Benchmark harness │
//!                 │ assembler        │──▶│  + JSON report     │
//!                 │ (MongoDB docs)   │   │                    │
//!                 └──────────────────┘   └────────────────────┘
//! ```
//!
//! ## Quick Start
//!
//! ```bash
//! wbench init                   # create both schema surfaces
//! wbench load                   # full load into both targets
//! wbench bench                  # time the query suite, write the report
//! wbench verify                 # integrity checks
//! ```
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | TOML configuration parsing |
//! | [`models`] | Canonical records and document shapes |
//! | [`bucket`] | Price and rank bucketing |
//! | [`reader`] | Chunked CSV source reading |
//! | [`transform`] | Row validation and normalization |
//! | [`error`] | Load/benchmark error taxonomy |
//! | [`retry`] | Backoff policy for connectivity failures |
//! | [`db`] | Connections to both targets |
//! | [`migrate`] | Relational DDL and document indexes |
//! | [`loader_postgres`] | COPY bulk load and upsert refresh |
//! | [`loader_mongodb`] | Document assembly and batch insert |
//! | [`queries`] | The fixed analytical operations |
//! | [`bench`] | Timed execution harness |
//! | [`report`] | Report pairing and serialization |

pub mod bench;
pub mod bucket;
pub mod commands;
pub mod config;
pub mod db;
pub mod error;
pub mod loader_mongodb;
pub mod loader_postgres;
pub mod migrate;
pub mod models;
pub mod queries;
pub mod reader;
pub mod report;
pub mod retry;
pub mod transform;
