//! Benchmark harness.
//!
//! Times the load phases and the fixed query suite against both targets.
//! Queries run under the configured timeout; loads are timed wall-clock
//! and never cancelled, since an interrupted load would leave partial data
//! behind for the query suite. A failure (timeout, resource limit,
//! anything) is recorded with its error kind and never retried, so the
//! report reflects what actually happened.

use std::future::Future;
use std::time::{Duration, Instant};

use mongodb::Database;
use sqlx::PgPool;
use tracing::info;

use crate::config::Config;
use crate::error::LoadError;
use crate::queries::{self, Operation};
use crate::report::{BenchReport, TargetResult};
use crate::{loader_mongodb, loader_postgres};

/// Terminal state of one timed operation on one target.
#[derive(Debug, Clone, PartialEq)]
pub enum OpOutcome {
    Succeeded { duration: Duration, rows: u64 },
    Failed { duration: Duration, error_kind: &'static str },
}

impl OpOutcome {
    pub fn to_result(&self) -> TargetResult {
        match self {
            OpOutcome::Succeeded { duration, rows } => TargetResult {
                status: "succeeded".to_string(),
                duration_seconds: Some(duration.as_secs_f64()),
                row_count: Some(*rows),
                error_kind: None,
            },
            OpOutcome::Failed {
                duration,
                error_kind,
            } => TargetResult {
                status: "failed".to_string(),
                duration_seconds: Some(duration.as_secs_f64()),
                row_count: None,
                error_kind: Some(error_kind.to_string()),
            },
        }
    }
}

/// Run one operation under a deadline and classify its terminal state.
async fn timed<F>(deadline: Duration, fut: F) -> OpOutcome
where
    F: Future<Output = Result<u64, LoadError>>,
{
    let start = Instant::now();
    match tokio::time::timeout(deadline, fut).await {
        Ok(Ok(rows)) => OpOutcome::Succeeded {
            duration: start.elapsed(),
            rows,
        },
        Ok(Err(err)) => OpOutcome::Failed {
            duration: start.elapsed(),
            error_kind: err.kind_label(),
        },
        Err(_) => OpOutcome::Failed {
            duration: start.elapsed(),
            error_kind: "timeout",
        },
    }
}

/// Time an operation end-to-end with no deadline. Load phases use this:
/// cancelling a load mid-flight would leave a truncated schema or a
/// half-inserted collection under the query suite.
async fn timed_unbounded<F>(fut: F) -> OpOutcome
where
    F: Future<Output = Result<u64, LoadError>>,
{
    let start = Instant::now();
    match fut.await {
        Ok(rows) => OpOutcome::Succeeded {
            duration: start.elapsed(),
            rows,
        },
        Err(err) => OpOutcome::Failed {
            duration: start.elapsed(),
            error_kind: err.kind_label(),
        },
    }
}

/// Mean duration over `iterations` runs; the first failure short-circuits
/// and is recorded as the outcome for that target.
async fn timed_iterations<F, Fut>(deadline: Duration, iterations: u32, mut run: F) -> OpOutcome
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<u64, LoadError>>,
{
    let mut total = Duration::ZERO;
    let mut rows = 0u64;
    for _ in 0..iterations.max(1) {
        match timed(deadline, run()).await {
            OpOutcome::Succeeded {
                duration,
                rows: row_count,
            } => {
                total += duration;
                rows = row_count;
            }
            failed => return failed,
        }
    }
    OpOutcome::Succeeded {
        duration: total / iterations.max(1),
        rows,
    }
}

pub struct BenchRun {
    pub skip_load: bool,
    pub iterations: u32,
}

/// Execute the full benchmark: optional load phases, then the query suite,
/// both targets each. Returns the paired report; writing and printing are
/// the caller's business.
pub async fn run(
    config: &Config,
    pool: &PgPool,
    db: &Database,
    opts: &BenchRun,
) -> Result<BenchReport, LoadError> {
    let deadline = Duration::from_secs(config.bench.query_timeout_secs);
    let mut report = BenchReport::new(opts.iterations);

    if !opts.skip_load {
        info!("timing load phases");
        // Loads are not repeated per iteration; one full load per target,
        // timed without the query deadline.
        let pg_load = timed_unbounded(async {
            loader_postgres::full_load(config, pool, None)
                .await
                .map(|stats| stats.total_rows())
        })
        .await;
        let mongo_load = timed_unbounded(async {
            loader_mongodb::full_load(config, db, None)
                .await
                .map(|stats| stats.documents)
        })
        .await;
        report.record("load", pg_load.to_result(), mongo_load.to_result());
    }

    for op in Operation::all() {
        info!(operation = op.name(), "timing operation");
        let pg = timed_iterations(deadline, opts.iterations, || {
            queries::run_postgres(op, pool)
        })
        .await;
        let mongo = timed_iterations(deadline, opts.iterations, || {
            queries::run_mongo(op, config, db)
        })
        .await;
        report.record(op.name(), pg.to_result(), mongo.to_result());
    }

    Ok(report)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_timed_success_reports_rows() {
        let outcome = timed(Duration::from_secs(5), async { Ok(42u64) }).await;
        match outcome {
            OpOutcome::Succeeded { rows, .. } => assert_eq!(rows, 42),
            other => panic!("unexpected outcome: {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_timed_error_keeps_kind() {
        let outcome = timed(Duration::from_secs(5), async {
            Err(LoadError::ResourceLimit {
                detail: "sort memory".into(),
            })
        })
        .await;
        match outcome {
            OpOutcome::Failed { error_kind, .. } => assert_eq!(error_kind, "resource_limit"),
            other => panic!("unexpected outcome: {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_timed_deadline_becomes_timeout() {
        let outcome = timed(Duration::from_millis(10), async {
            tokio::time::sleep(Duration::from_secs(60)).await;
            Ok(0u64)
        })
        .await;
        match outcome {
            OpOutcome::Failed { error_kind, .. } => assert_eq!(error_kind, "timeout"),
            other => panic!("unexpected outcome: {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_unbounded_outlasts_query_deadline() {
        // A load slower than the query deadline still completes.
        let deadline = Duration::from_millis(10);
        let outcome = timed_unbounded(async {
            tokio::time::sleep(deadline * 5).await;
            Ok(7u64)
        })
        .await;
        match outcome {
            OpOutcome::Succeeded { duration, rows } => {
                assert_eq!(rows, 7);
                assert!(duration >= deadline);
            }
            other => panic!("unexpected outcome: {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_unbounded_error_keeps_kind() {
        let outcome = timed_unbounded(async {
            Err(LoadError::Connectivity {
                target: crate::error::Target::Postgres,
                phase: "load".into(),
                source: anyhow::anyhow!("connection reset"),
            })
        })
        .await;
        match outcome {
            OpOutcome::Failed { error_kind, .. } => assert_eq!(error_kind, "connectivity"),
            other => panic!("unexpected outcome: {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_iterations_stop_at_first_failure() {
        let mut calls = 0u32;
        let outcome = timed_iterations(Duration::from_secs(5), 3, || {
            calls += 1;
            let fail = calls == 2;
            async move {
                if fail {
                    Err(LoadError::ConstraintViolation {
                        unit: "batch".into(),
                        detail: "dup".into(),
                    })
                } else {
                    Ok(1u64)
                }
            }
        })
        .await;
        assert_eq!(calls, 2);
        assert!(matches!(outcome, OpOutcome::Failed { .. }));
    }
}
