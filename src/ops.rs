//! CRUD operations over an explicit connection.
//!
//! Every function here expands its shorthand, makes exactly one execution
//! call, and holds no state between calls. The `_required` variants fail
//! with [`DbError::NotFound`] where their base forms return `None`. Options
//! propagate through every delegation, including the `get_by` family.

use serde_json::Value as JsonValue;

use crate::config::ExecuteOptions;
use crate::db::conn::DbConn;
use crate::db::executor::{self, ExecutionResult};
use crate::error::{DbError, DbResult};
use crate::query::{self, Aggregate, DEFAULT_PRIMARY_KEY, QueryForm, Selector};
use crate::value::Row;

/// Every row the query matches.
pub async fn all(
    conn: DbConn<'_>,
    form: impl Into<QueryForm>,
    opts: &ExecuteOptions,
) -> DbResult<Vec<Row>> {
    let result = executor::execute(conn, form, opts).await?;
    Ok(result.into_rows())
}

/// The single row the query matches, or `None`.
///
/// More than one matching row is [`DbError::MultipleResults`].
pub async fn one(
    conn: DbConn<'_>,
    form: impl Into<QueryForm>,
    opts: &ExecuteOptions,
) -> DbResult<Option<Row>> {
    at_most_one(executor::execute(conn, form, opts).await?)
}

/// Like [`one`], but zero rows is [`DbError::NotFound`].
pub async fn one_required(
    conn: DbConn<'_>,
    form: impl Into<QueryForm>,
    opts: &ExecuteOptions,
) -> DbResult<Row> {
    let result = executor::execute(conn, form, opts).await?;
    let sql = result.sql.clone();
    match at_most_one(result)? {
        Some(row) => Ok(row),
        None => Err(DbError::not_found(sql)),
    }
}

fn at_most_one(result: ExecutionResult) -> DbResult<Option<Row>> {
    let count = result.rows().len();
    if count > 1 {
        return Err(DbError::multiple_results(count, result.sql));
    }
    Ok(result.into_rows().into_iter().next())
}

/// Fetch one record by primary key; the input is a bare id or a record
/// carrying an `id` field.
pub async fn get(
    conn: DbConn<'_>,
    table: &str,
    id_or_record: &JsonValue,
    opts: &ExecuteOptions,
) -> DbResult<Option<Row>> {
    let query = query::by_primary_key(table, id_or_record, DEFAULT_PRIMARY_KEY)?;
    one(conn, query, opts).await
}

/// Like [`get`], but a missing record is [`DbError::NotFound`].
pub async fn get_required(
    conn: DbConn<'_>,
    table: &str,
    id_or_record: &JsonValue,
    opts: &ExecuteOptions,
) -> DbResult<Row> {
    let query = query::by_primary_key(table, id_or_record, DEFAULT_PRIMARY_KEY)?;
    one_required(conn, query, opts).await
}

/// Fetch one record matching every predicate in the map.
pub async fn get_by(
    conn: DbConn<'_>,
    table: &str,
    predicates: &JsonValue,
    opts: &ExecuteOptions,
) -> DbResult<Option<Row>> {
    let query = query::by(table, predicates)?;
    one(conn, query, opts).await
}

/// Like [`get_by`], but a missing record is [`DbError::NotFound`].
pub async fn get_by_required(
    conn: DbConn<'_>,
    table: &str,
    predicates: &JsonValue,
    opts: &ExecuteOptions,
) -> DbResult<Row> {
    let query = query::by(table, predicates)?;
    one_required(conn, query, opts).await
}

/// Run an aggregate over the rows the form matches, returning the scalar.
///
/// The select list is replaced with the aggregate selector; the scalar is
/// read back under the aggregate's own name. An engine that returns no
/// value for the aggregate yields `Null`.
pub async fn aggregate(
    conn: DbConn<'_>,
    form: impl Into<QueryForm>,
    kind: Aggregate,
    column: &str,
    opts: &ExecuteOptions,
) -> DbResult<JsonValue> {
    let query = query::expand(form).select(vec![Selector::Aggregate(kind, column.to_string())]);
    let row = one(conn, query, opts).await?;
    Ok(row
        .and_then(|mut row| row.remove(kind.as_str()))
        .unwrap_or(JsonValue::Null))
}

/// Insert one record and return the stored row.
pub async fn insert(
    conn: DbConn<'_>,
    table: &str,
    record: &JsonValue,
    opts: &ExecuteOptions,
) -> DbResult<Row> {
    let query = query::insert(table, record)?;
    let result = executor::execute(conn, query, opts).await?;
    match result.into_rows().into_iter().next() {
        Some(row) => Ok(row),
        // A returning insert that hands back nothing is a driver anomaly.
        None => Err(DbError::Driver(sqlx::Error::RowNotFound)),
    }
}

/// Insert many records in one statement, returning the inserted count.
///
/// Columns default to the union of record keys in first-seen order; absent
/// values become null.
pub async fn insert_all(
    conn: DbConn<'_>,
    table: &str,
    records: &[JsonValue],
    columns: Option<&[&str]>,
    opts: &ExecuteOptions,
) -> DbResult<u64> {
    let query = query::insert_all(table, records, columns)?;
    let result = executor::execute(conn, query, opts).await?;
    Ok(result.rows_affected())
}

/// Update the record whose primary key the input carries, returning the
/// stored row, or `None` when the key matched nothing.
pub async fn update(
    conn: DbConn<'_>,
    table: &str,
    record: &JsonValue,
    opts: &ExecuteOptions,
) -> DbResult<Option<Row>> {
    let query = query::update(table, record, DEFAULT_PRIMARY_KEY)?;
    let result = executor::execute(conn, query, opts).await?;
    Ok(result.into_rows().into_iter().next())
}

/// Delete one record by primary key, returning the deleted count.
pub async fn delete(
    conn: DbConn<'_>,
    table: &str,
    id_or_record: &JsonValue,
    opts: &ExecuteOptions,
) -> DbResult<u64> {
    let query = query::delete(table, id_or_record, DEFAULT_PRIMARY_KEY)?;
    let result = executor::execute(conn, query, opts).await?;
    Ok(result.rows_affected())
}

/// Delete every row the form's filter matches, returning the deleted count.
pub async fn delete_all(
    conn: DbConn<'_>,
    table: &str,
    form: impl Into<QueryForm>,
    opts: &ExecuteOptions,
) -> DbResult<u64> {
    let query = query::delete_all(table, form);
    let result = executor::execute(conn, query, opts).await?;
    Ok(result.rows_affected())
}

/// Whether at least one row matches. Caps the query at one row rather than
/// materializing more.
pub async fn exists(
    conn: DbConn<'_>,
    form: impl Into<QueryForm>,
    opts: &ExecuteOptions,
) -> DbResult<bool> {
    let query = query::expand(form).with_limit(1);
    Ok(one(conn, query, opts).await?.is_some())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::PoolOptions;
    use crate::db::pool::DbPool;
    use serde_json::json;

    async fn seeded_pool() -> DbPool {
        let pool = DbPool::connect("sqlite::memory:", &PoolOptions::default())
            .await
            .unwrap();
        match &pool {
            DbPool::SQLite(inner) => {
                sqlx::query("CREATE TABLE users (id INTEGER PRIMARY KEY, name TEXT, age INTEGER)")
                    .execute(inner)
                    .await
                    .unwrap();
            }
            DbPool::Postgres(_) => unreachable!(),
        }
        pool
    }

    #[tokio::test]
    async fn test_one_distinguishes_zero_one_many() {
        let pool = seeded_pool().await;
        let mut conn = pool.acquire().await.unwrap();
        let opts = ExecuteOptions::new();

        assert_eq!(one(conn.as_conn(), "users", &opts).await.unwrap(), None);

        insert(conn.as_conn(), "users", &json!({"name": "ada"}), &opts)
            .await
            .unwrap();
        let row = one(conn.as_conn(), "users", &opts).await.unwrap().unwrap();
        assert_eq!(row.get("name"), Some(&json!("ada")));

        insert(conn.as_conn(), "users", &json!({"name": "grace"}), &opts)
            .await
            .unwrap();
        let err = one(conn.as_conn(), "users", &opts).await.unwrap_err();
        match err {
            DbError::MultipleResults { count, sql } => {
                assert_eq!(count, 2);
                assert!(sql.contains("users"));
            }
            other => panic!("expected MultipleResults, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_one_required_reports_not_found() {
        let pool = seeded_pool().await;
        let mut conn = pool.acquire().await.unwrap();
        let err = one_required(conn.as_conn(), "users", &ExecuteOptions::new())
            .await
            .unwrap_err();
        assert!(err.is_not_found());
        match err {
            DbError::NotFound { sql } => assert!(sql.contains("users")),
            other => panic!("expected NotFound, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_get_accepts_id_or_record() {
        let pool = seeded_pool().await;
        let mut conn = pool.acquire().await.unwrap();
        let opts = ExecuteOptions::new();
        let stored = insert(conn.as_conn(), "users", &json!({"name": "ada"}), &opts)
            .await
            .unwrap();
        let id = stored.get("id").cloned().unwrap();

        let by_id = get(conn.as_conn(), "users", &id, &opts).await.unwrap();
        let by_record = get(conn.as_conn(), "users", &json!({"id": id}), &opts)
            .await
            .unwrap();
        assert_eq!(by_id, by_record);
        assert!(by_id.is_some());

        assert_eq!(
            get(conn.as_conn(), "users", &json!(999), &opts)
                .await
                .unwrap(),
            None
        );
        let err = get_required(conn.as_conn(), "users", &json!(999), &opts)
            .await
            .unwrap_err();
        assert!(matches!(err, DbError::NotFound { .. }));
    }

    #[tokio::test]
    async fn test_get_by_propagates_options() {
        let pool = seeded_pool().await;
        let mut conn = pool.acquire().await.unwrap();
        let opts = ExecuteOptions::new();
        insert(
            conn.as_conn(),
            "users",
            &json!({"name": "ada", "age": 36}),
            &opts,
        )
        .await
        .unwrap();

        let renaming = ExecuteOptions::new().with_row_fn(|mut row: Row| {
            if let Some(name) = row.remove("name") {
                row.insert("handle".to_string(), name);
            }
            row
        });
        let row = get_by(conn.as_conn(), "users", &json!({"age": 36}), &renaming)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(row.get("handle"), Some(&json!("ada")));

        let row = get_by_required(conn.as_conn(), "users", &json!({"age": 36}), &renaming)
            .await
            .unwrap();
        assert_eq!(row.get("handle"), Some(&json!("ada")));
    }

    #[tokio::test]
    async fn test_aggregate_extracts_scalar() {
        let pool = seeded_pool().await;
        let mut conn = pool.acquire().await.unwrap();
        let opts = ExecuteOptions::new();
        let records = [
            json!({"name": "ada", "age": 36}),
            json!({"name": "grace", "age": 44}),
        ];
        insert_all(conn.as_conn(), "users", &records, None, &opts)
            .await
            .unwrap();

        let count = aggregate(conn.as_conn(), "users", Aggregate::Count, "*", &opts)
            .await
            .unwrap();
        assert_eq!(count, json!(2));

        let max = aggregate(conn.as_conn(), "users", Aggregate::Max, "age", &opts)
            .await
            .unwrap();
        assert_eq!(max, json!(44));

        let avg = aggregate(conn.as_conn(), "users", Aggregate::Avg, "age", &opts)
            .await
            .unwrap();
        assert_eq!(avg, json!(40.0));
    }

    #[tokio::test]
    async fn test_aggregate_over_no_rows() {
        let pool = seeded_pool().await;
        let mut conn = pool.acquire().await.unwrap();
        let opts = ExecuteOptions::new();

        let count = aggregate(conn.as_conn(), "users", Aggregate::Count, "*", &opts)
            .await
            .unwrap();
        assert_eq!(count, json!(0));

        // Engines report aggregates over nothing as NULL.
        let sum = aggregate(conn.as_conn(), "users", Aggregate::Sum, "age", &opts)
            .await
            .unwrap();
        assert_eq!(sum, JsonValue::Null);
    }

    #[tokio::test]
    async fn test_update_returns_stored_row_or_none() {
        let pool = seeded_pool().await;
        let mut conn = pool.acquire().await.unwrap();
        let opts = ExecuteOptions::new();
        let stored = insert(
            conn.as_conn(),
            "users",
            &json!({"name": "ada", "age": 36}),
            &opts,
        )
        .await
        .unwrap();
        let id = stored.get("id").cloned().unwrap();

        let updated = update(
            conn.as_conn(),
            "users",
            &json!({"id": id, "age": 37}),
            &opts,
        )
        .await
        .unwrap()
        .unwrap();
        assert_eq!(updated.get("age"), Some(&json!(37)));
        assert_eq!(updated.get("name"), Some(&json!("ada")));

        let missing = update(
            conn.as_conn(),
            "users",
            &json!({"id": 999, "age": 1}),
            &opts,
        )
        .await
        .unwrap();
        assert_eq!(missing, None);

        let err = update(conn.as_conn(), "users", &json!({"age": 1}), &opts)
            .await
            .unwrap_err();
        assert!(matches!(err, DbError::MissingPrimaryKey { .. }));
    }

    #[tokio::test]
    async fn test_delete_counts() {
        let pool = seeded_pool().await;
        let mut conn = pool.acquire().await.unwrap();
        let opts = ExecuteOptions::new();
        let records = [
            json!({"name": "ada", "age": 36}),
            json!({"name": "grace", "age": 44}),
            json!({"name": "alan", "age": 41}),
        ];
        insert_all(conn.as_conn(), "users", &records, None, &opts)
            .await
            .unwrap();

        assert_eq!(
            delete(conn.as_conn(), "users", &json!(1), &opts)
                .await
                .unwrap(),
            1
        );
        assert_eq!(
            delete(conn.as_conn(), "users", &json!(1), &opts)
                .await
                .unwrap(),
            0
        );

        let filtered = query::by("users", &json!({"age": 44})).unwrap();
        assert_eq!(
            delete_all(conn.as_conn(), "users", filtered, &opts)
                .await
                .unwrap(),
            1
        );
        assert_eq!(
            delete_all(conn.as_conn(), "users", QueryForm::Empty, &opts)
                .await
                .unwrap(),
            1
        );
    }

    #[tokio::test]
    async fn test_exists_caps_at_one_row() {
        let pool = seeded_pool().await;
        let mut conn = pool.acquire().await.unwrap();
        let opts = ExecuteOptions::new();

        assert!(!exists(conn.as_conn(), "users", &opts).await.unwrap());

        let records = [json!({"name": "ada"}), json!({"name": "grace"})];
        insert_all(conn.as_conn(), "users", &records, None, &opts)
            .await
            .unwrap();

        // Two matching rows must not trip the single-row check.
        assert!(exists(conn.as_conn(), "users", &opts).await.unwrap());
    }
}
