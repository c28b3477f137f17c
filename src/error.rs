//! Error taxonomy for the load and benchmark pipeline.
//!
//! Every failure that crosses a module boundary is classified into one of
//! these variants so that callers can decide recovery per unit: row-level
//! errors are counted and skipped, chunk/batch/document errors are isolated
//! to their unit, and phase-level errors (connectivity, rejection-threshold
//! breach) abort the current phase.

use thiserror::Error;

/// Which storage backend an operation ran against.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Target {
    Postgres,
    Mongodb,
}

impl Target {
    pub fn as_str(&self) -> &'static str {
        match self {
            Target::Postgres => "postgres",
            Target::Mongodb => "mongodb",
        }
    }
}

impl std::fmt::Display for Target {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Error)]
pub enum LoadError {
    /// A row failed schema/type/range rules. Recoverable: the caller counts
    /// it and moves on unless the rejection rate crosses the threshold.
    #[error("row {row}: {reason}")]
    Validation { row: u64, reason: String },

    /// Too many rows were rejected in one batch; the phase must abort.
    #[error("rejection threshold exceeded: {rejected} of {seen} rows rejected")]
    ThresholdExceeded { rejected: u64, seen: u64 },

    /// Uniqueness or foreign-key violation while loading one unit
    /// (a COPY chunk or a single document).
    #[error("constraint violation in {unit}: {detail}")]
    ConstraintViolation { unit: String, detail: String },

    /// A single assembled document would exceed the store's size ceiling.
    #[error("document for {asin} is {bytes} bytes, exceeds limit of {limit}")]
    CapacityExceeded { asin: String, bytes: usize, limit: usize },

    /// The target store hit a resource ceiling (sort memory, disk) while
    /// executing an operation. Recorded as a failure, never retried.
    #[error("target resource limit: {detail}")]
    ResourceLimit { detail: String },

    /// A timed operation ran past a deadline. The deadline is absent when
    /// the server cancelled the statement without reporting one.
    #[error("operation timed out{}", match .seconds { Some(s) => format!(" after {s}s"), None => String::new() })]
    Timeout { seconds: Option<u64> },

    /// The target store is unreachable. Fatal to the current phase.
    #[error("cannot reach {target} during {phase}: {source}")]
    Connectivity {
        target: Target,
        phase: String,
        #[source]
        source: anyhow::Error,
    },

    #[error("source file error: {0}")]
    Csv(#[from] csv::Error),

    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),

    #[error("postgres error: {0}")]
    Sqlx(sqlx::Error),

    #[error("mongodb error: {0}")]
    Mongo(mongodb::error::Error),

    #[error("bson encoding error: {0}")]
    Bson(#[from] bson::ser::Error),
}

impl LoadError {
    pub fn validation(row: u64, reason: impl Into<String>) -> LoadError {
        LoadError::Validation {
            row,
            reason: reason.into(),
        }
    }

    /// Stable label used in benchmark report entries and summaries.
    pub fn kind_label(&self) -> &'static str {
        match self {
            LoadError::Validation { .. } => "validation",
            LoadError::ThresholdExceeded { .. } => "rejection_threshold",
            LoadError::ConstraintViolation { .. } => "constraint_violation",
            LoadError::CapacityExceeded { .. } => "capacity_exceeded",
            LoadError::ResourceLimit { .. } => "resource_limit",
            LoadError::Timeout { .. } => "timeout",
            LoadError::Connectivity { .. } => "connectivity",
            LoadError::Csv(_) | LoadError::Io(_) => "source_io",
            LoadError::Sqlx(_) => "postgres",
            LoadError::Mongo(_) => "mongodb",
            LoadError::Bson(_) => "encoding",
        }
    }

    /// Only connectivity failures are worth another attempt; constraint,
    /// capacity, and resource-limit errors will fail the same way again.
    pub fn is_retryable(&self) -> bool {
        matches!(self, LoadError::Connectivity { .. })
    }

    /// Classify a sqlx error raised while loading `unit` into the taxonomy.
    pub fn from_pg(err: sqlx::Error, unit: &str) -> LoadError {
        if let Some(db_err) = err.as_database_error() {
            let code = db_err.code().map(|c| c.to_string()).unwrap_or_default();
            match code.as_str() {
                // unique_violation, foreign_key_violation
                "23505" | "23503" => {
                    let detail = db_err
                        .try_downcast_ref::<sqlx::postgres::PgDatabaseError>()
                        .and_then(|pg| pg.detail())
                        .map(|d| d.to_string())
                        .unwrap_or_else(|| db_err.message().to_string());
                    return LoadError::ConstraintViolation {
                        unit: unit.to_string(),
                        detail,
                    };
                }
                // disk_full, out_of_memory, too_many_connections,
                // configuration_limit_exceeded
                "53100" | "53200" | "53300" | "53400" => {
                    return LoadError::ResourceLimit {
                        detail: db_err.message().to_string(),
                    };
                }
                // query_canceled (statement_timeout)
                "57014" => return LoadError::Timeout { seconds: None },
                _ => {}
            }
        }
        match err {
            sqlx::Error::Io(_) | sqlx::Error::PoolTimedOut | sqlx::Error::PoolClosed => {
                LoadError::Connectivity {
                    target: Target::Postgres,
                    phase: unit.to_string(),
                    source: err.into(),
                }
            }
            other => LoadError::Sqlx(other),
        }
    }

    /// Classify a MongoDB driver error raised while loading `unit`.
    pub fn from_mongo(err: mongodb::error::Error, unit: &str) -> LoadError {
        use mongodb::error::{ErrorKind, WriteFailure};

        match &*err.kind {
            ErrorKind::Write(WriteFailure::WriteError(we)) if we.code == 11000 => {
                LoadError::ConstraintViolation {
                    unit: unit.to_string(),
                    detail: we.message.clone(),
                }
            }
            // QueryExceededMemoryLimitNoDiskUseAllowed / ExceededMemoryLimit
            ErrorKind::Command(ce) if ce.code == 292 || ce.code == 146 => {
                LoadError::ResourceLimit {
                    detail: ce.message.clone(),
                }
            }
            ErrorKind::ServerSelection { .. } | ErrorKind::Io(_) => LoadError::Connectivity {
                target: Target::Mongodb,
                phase: unit.to_string(),
                source: err.into(),
            },
            _ => LoadError::Mongo(err),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kind_labels_are_stable() {
        let err = LoadError::Validation {
            row: 7,
            reason: "bad asin".into(),
        };
        assert_eq!(err.kind_label(), "validation");

        let err = LoadError::CapacityExceeded {
            asin: "B000000001".into(),
            bytes: 20_000_000,
            limit: 16_777_216,
        };
        assert_eq!(err.kind_label(), "capacity_exceeded");
    }

    #[test]
    fn test_only_connectivity_is_retryable() {
        let conn = LoadError::Connectivity {
            target: Target::Postgres,
            phase: "load".into(),
            source: anyhow::anyhow!("refused"),
        };
        assert!(conn.is_retryable());

        let constraint = LoadError::ConstraintViolation {
            unit: "chunk 3".into(),
            detail: "duplicate key".into(),
        };
        assert!(!constraint.is_retryable());

        let limit = LoadError::ResourceLimit {
            detail: "sort memory".into(),
        };
        assert!(!limit.is_retryable());
    }

    #[test]
    fn test_timeout_display_with_and_without_deadline() {
        let with = LoadError::Timeout { seconds: Some(300) };
        assert_eq!(with.to_string(), "operation timed out after 300s");

        let without = LoadError::Timeout { seconds: None };
        assert_eq!(without.to_string(), "operation timed out");
        assert_eq!(without.kind_label(), "timeout");
    }

    #[test]
    fn test_target_labels() {
        assert_eq!(Target::Postgres.as_str(), "postgres");
        assert_eq!(Target::Mongodb.as_str(), "mongodb");
    }
}
