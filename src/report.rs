//! Benchmark report: pairing, serialization, and the printed table.
//!
//! The report is a map keyed by operation name; each entry holds one result
//! per target. Pairing rules: both succeeded means the entry is comparable
//! and the faster target and speedup are computed; a one-sided failure
//! marks the entry non-comparable and no duration is fabricated for the
//! missing side.

use std::collections::BTreeMap;
use std::path::Path;

use serde::Serialize;

use crate::error::LoadError;

/// Result of one operation on one target.
#[derive(Debug, Clone, Serialize)]
pub struct TargetResult {
    pub status: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub duration_seconds: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub row_count: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_kind: Option<String>,
}

impl TargetResult {
    fn succeeded(&self) -> bool {
        self.status == "succeeded"
    }
}

/// Both targets' results for one operation, plus the derived comparison.
#[derive(Debug, Clone, Serialize)]
pub struct OperationEntry {
    pub postgres: TargetResult,
    pub mongodb: TargetResult,
    pub comparable: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub faster_target: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub speedup: Option<f64>,
}

#[derive(Debug, Serialize)]
pub struct BenchReport {
    pub generated_at: String,
    pub iterations: u32,
    pub operations: BTreeMap<String, OperationEntry>,
}

impl BenchReport {
    pub fn new(iterations: u32) -> Self {
        Self {
            generated_at: chrono::Utc::now().to_rfc3339(),
            iterations,
            operations: BTreeMap::new(),
        }
    }

    /// Pair the two targets' results under one operation name.
    pub fn record(&mut self, operation: &str, postgres: TargetResult, mongodb: TargetResult) {
        let comparable = postgres.succeeded() && mongodb.succeeded();
        let (faster_target, speedup) = if comparable {
            match (postgres.duration_seconds, mongodb.duration_seconds) {
                (Some(pg), Some(mg)) if pg > 0.0 && mg > 0.0 => {
                    if pg <= mg {
                        (Some("postgres".to_string()), Some(mg / pg))
                    } else {
                        (Some("mongodb".to_string()), Some(pg / mg))
                    }
                }
                _ => (None, None),
            }
        } else {
            (None, None)
        };
        self.operations.insert(
            operation.to_string(),
            OperationEntry {
                postgres,
                mongodb,
                comparable,
                faster_target,
                speedup,
            },
        );
    }

    pub fn write_json(&self, path: &Path) -> Result<(), LoadError> {
        let json = serde_json::to_string_pretty(self)
            .map_err(|e| LoadError::Io(std::io::Error::other(e.to_string())))?;
        std::fs::write(path, json)?;
        Ok(())
    }

    /// Print the comparison table.
    pub fn print_summary(&self) {
        println!();
        println!("Benchmark Report ({} iteration(s))", self.iterations);
        println!("{}", "=".repeat(78));
        println!(
            "{:<26} {:>12} {:>12} {:>14} {:>8}",
            "operation", "postgres", "mongodb", "faster", "speedup"
        );
        println!("{}", "-".repeat(78));
        for (name, entry) in &self.operations {
            println!(
                "{:<26} {:>12} {:>12} {:>14} {:>8}",
                name,
                format_result(&entry.postgres),
                format_result(&entry.mongodb),
                entry
                    .faster_target
                    .as_deref()
                    .unwrap_or(if entry.comparable { "-" } else { "non-comparable" }),
                entry
                    .speedup
                    .map(|s| format!("{:.2}x", s))
                    .unwrap_or_else(|| "-".to_string()),
            );
        }
        println!("{}", "=".repeat(78));
    }
}

fn format_result(result: &TargetResult) -> String {
    if result.succeeded() {
        match result.duration_seconds {
            Some(secs) => format!("{:.3}s", secs),
            None => "ok".to_string(),
        }
    } else {
        result
            .error_kind
            .clone()
            .unwrap_or_else(|| "failed".to_string())
    }
}
