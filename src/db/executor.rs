//! Instrumented query execution.
//!
//! [`execute`] is the single funnel every operation goes through: expand the
//! shorthand, render it, run the matching primitive, decode, log. Elapsed
//! time is recorded in fractional milliseconds and compared against the
//! long-running threshold; driver failures are logged and re-raised
//! unchanged.

use std::time::{Duration, Instant};

use futures_util::TryStreamExt;
use tracing::{debug, error, warn};

use crate::config::{ExecuteOptions, RowFn};
use crate::db::conn::DbConn;
use crate::error::DbResult;
use crate::query::{self, Query, QueryForm};
use crate::sql::{self, RenderedSql};
use crate::value::{Row, SqlValue};

/// What one execution produced.
#[derive(Debug, Clone, PartialEq)]
pub enum ExecutionOutcome {
    /// Rows returned by a read.
    Rows(Vec<Row>),
    /// Affected-row count of a write.
    Affected(u64),
    /// Stored rows handed back by a returning write.
    Keys(Vec<Row>),
}

/// Everything known about one completed execution.
#[derive(Debug, Clone)]
pub struct ExecutionResult {
    /// The canonical query that was run.
    pub query: Query,
    /// Rendered SQL text.
    pub sql: String,
    /// Bound parameters, in placeholder order.
    pub params: Vec<SqlValue>,
    /// Wall-clock time in fractional milliseconds.
    pub elapsed_ms: f64,
    pub outcome: ExecutionOutcome,
}

impl ExecutionResult {
    /// Rows this execution returned, from a read or a returning write alike.
    pub fn rows(&self) -> &[Row] {
        match &self.outcome {
            ExecutionOutcome::Rows(rows) | ExecutionOutcome::Keys(rows) => rows,
            ExecutionOutcome::Affected(_) => &[],
        }
    }

    /// Consume the result, keeping only its rows.
    pub fn into_rows(self) -> Vec<Row> {
        match self.outcome {
            ExecutionOutcome::Rows(rows) | ExecutionOutcome::Keys(rows) => rows,
            ExecutionOutcome::Affected(_) => Vec::new(),
        }
    }

    /// Affected-row count; row-returning executions count their rows.
    pub fn rows_affected(&self) -> u64 {
        match &self.outcome {
            ExecutionOutcome::Affected(count) => *count,
            ExecutionOutcome::Rows(rows) | ExecutionOutcome::Keys(rows) => rows.len() as u64,
        }
    }
}

/// Run one query through the full pipeline.
///
/// Reads and returning writes stream rows back; other writes report their
/// affected-row count. The row transform in `opts` applies to read rows only.
/// Driver errors propagate unchanged after an error-level log.
pub async fn execute(
    conn: DbConn<'_>,
    form: impl Into<QueryForm>,
    opts: &ExecuteOptions,
) -> DbResult<ExecutionResult> {
    let query = query::expand(form);
    let rendered = sql::render(&query, conn.dialect())?;
    let wants_rows = query.is_read() || query.returning;

    let start = Instant::now();
    let outcome = run_primitive(conn, &rendered, wants_rows).await;
    let elapsed_ms = millis_since(start);

    let raw = match outcome {
        Ok(raw) => raw,
        Err(err) => {
            error!(sql = %rendered.sql, elapsed_ms, error = %err, "Query failed");
            return Err(err);
        }
    };

    debug!(
        sql = %rendered.sql,
        params = rendered.params.len(),
        elapsed_ms,
        "Query executed"
    );
    let threshold = opts.threshold_or_default();
    if is_long_running(elapsed_ms, threshold) {
        warn!(
            sql = %rendered.sql,
            elapsed_ms,
            threshold_ms = millis(threshold),
            "Query exceeded long-running threshold"
        );
    }

    let outcome = match raw {
        RawOutcome::Rows(rows) if query.is_read() => {
            ExecutionOutcome::Rows(apply_row_fn(rows, opts.row_fn.as_ref()))
        }
        RawOutcome::Rows(rows) => ExecutionOutcome::Keys(rows),
        RawOutcome::Affected(count) => ExecutionOutcome::Affected(count),
    };

    let RenderedSql { sql, params } = rendered;
    Ok(ExecutionResult {
        query,
        sql,
        params,
        elapsed_ms,
        outcome,
    })
}

/// Strictly greater than the threshold; equal elapsed time does not warn.
pub(crate) fn is_long_running(elapsed_ms: f64, threshold: Duration) -> bool {
    elapsed_ms > millis(threshold)
}

fn millis(duration: Duration) -> f64 {
    duration.as_secs_f64() * 1000.0
}

fn millis_since(start: Instant) -> f64 {
    millis(start.elapsed())
}

fn apply_row_fn(rows: Vec<Row>, row_fn: Option<&RowFn>) -> Vec<Row> {
    match row_fn {
        Some(f) => rows.into_iter().map(|row| f(row)).collect(),
        None => rows,
    }
}

enum RawOutcome {
    Rows(Vec<Row>),
    Affected(u64),
}

async fn run_primitive(
    conn: DbConn<'_>,
    rendered: &RenderedSql,
    wants_rows: bool,
) -> DbResult<RawOutcome> {
    match conn {
        DbConn::Postgres(conn) => {
            if wants_rows {
                let rows = postgres::fetch_rows(conn, &rendered.sql, &rendered.params).await?;
                Ok(RawOutcome::Rows(rows))
            } else {
                let count = postgres::execute_write(conn, &rendered.sql, &rendered.params).await?;
                Ok(RawOutcome::Affected(count))
            }
        }
        DbConn::Sqlite(conn) => {
            if wants_rows {
                let rows = sqlite::fetch_rows(conn, &rendered.sql, &rendered.params).await?;
                Ok(RawOutcome::Rows(rows))
            } else {
                let count = sqlite::execute_write(conn, &rendered.sql, &rendered.params).await?;
                Ok(RawOutcome::Affected(count))
            }
        }
    }
}

// The per-backend primitives are intentionally parallel.

mod postgres {
    use sqlx::PgConnection;
    use sqlx::postgres::PgRow;

    use super::*;
    use crate::db::params::bind_postgres_param;
    use crate::db::types::RowToJson;

    pub(super) async fn fetch_rows(
        conn: &mut PgConnection,
        sql: &str,
        params: &[SqlValue],
    ) -> DbResult<Vec<Row>> {
        let mut query = sqlx::query(sql);
        for param in params {
            query = bind_postgres_param(query, param);
        }
        let rows: Vec<PgRow> = query.fetch(conn).try_collect().await?;
        Ok(rows.iter().map(RowToJson::to_json_map).collect())
    }

    pub(super) async fn execute_write(
        conn: &mut PgConnection,
        sql: &str,
        params: &[SqlValue],
    ) -> DbResult<u64> {
        let mut query = sqlx::query(sql);
        for param in params {
            query = bind_postgres_param(query, param);
        }
        let result = query.execute(conn).await?;
        Ok(result.rows_affected())
    }
}

mod sqlite {
    use sqlx::SqliteConnection;
    use sqlx::sqlite::SqliteRow;

    use super::*;
    use crate::db::params::bind_sqlite_param;
    use crate::db::types::RowToJson;

    pub(super) async fn fetch_rows(
        conn: &mut SqliteConnection,
        sql: &str,
        params: &[SqlValue],
    ) -> DbResult<Vec<Row>> {
        let mut query = sqlx::query(sql);
        for param in params {
            query = bind_sqlite_param(query, param);
        }
        let rows: Vec<SqliteRow> = query.fetch(conn).try_collect().await?;
        Ok(rows.iter().map(RowToJson::to_json_map).collect())
    }

    pub(super) async fn execute_write(
        conn: &mut SqliteConnection,
        sql: &str,
        params: &[SqlValue],
    ) -> DbResult<u64> {
        let mut query = sqlx::query(sql);
        for param in params {
            query = bind_sqlite_param(query, param);
        }
        let result = query.execute(conn).await?;
        Ok(result.rows_affected())
    }
}
