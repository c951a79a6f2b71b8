//! Connection-bound database handles.
//!
//! A [`Db`] closes over a pool, an ambient [`DbConfig`] and an optional
//! transaction context, exposing every CRUD operation with the connection
//! parameter supplied internally. Handles are cheap to clone; derived
//! handles share the pool and, inside a transaction scope, the same
//! transaction slot.

use std::fmt;
use std::future::Future;
use std::sync::Arc;

use serde_json::Value as JsonValue;
use tracing::{debug, warn};

use crate::config::{DbConfig, ExecuteOptions};
use crate::db::executor::{self, ExecutionResult};
use crate::db::pool::DbPool;
use crate::db::transaction::{SharedTx, share};
use crate::error::{DbError, DbResult};
use crate::ops;
use crate::query::{Aggregate, QueryForm};
use crate::sql::Dialect;
use crate::value::Row;

/// Resolves the connection for one call: the active transaction slot when
/// present, a pooled connection otherwise. The slot stays locked for the
/// duration of the call.
macro_rules! with_conn {
    ($self:expr, |$conn:ident| $body:expr) => {
        match &$self.tx {
            Some(shared) => {
                let mut slot = shared.lock().await;
                let $conn = slot.conn()?;
                $body
            }
            None => {
                let mut pooled = $self.pool.acquire().await?;
                let $conn = pooled.as_conn();
                $body
            }
        }
    };
}

/// A database handle bound to one pool and one ambient configuration.
#[derive(Clone)]
pub struct Db {
    pool: DbPool,
    config: Arc<DbConfig>,
    tx: Option<SharedTx>,
}

impl Db {
    /// Connect to the database at `url` and bind a handle to it.
    ///
    /// The scheme picks the backend (`postgres://` or `sqlite://`); pool
    /// sizing comes from `config.pool`.
    pub async fn connect(url: &str, config: DbConfig) -> DbResult<Self> {
        let pool = DbPool::connect(url, &config.pool).await?;
        Ok(Self {
            pool,
            config: Arc::new(config),
            tx: None,
        })
    }

    /// Bind a handle to an existing pool.
    pub fn from_pool(pool: DbPool, config: DbConfig) -> Self {
        Self {
            pool,
            config: Arc::new(config),
            tx: None,
        }
    }

    /// The underlying pool, for statements this layer does not model.
    pub fn pool(&self) -> &DbPool {
        &self.pool
    }

    /// The ambient configuration this handle applies to every call.
    pub fn config(&self) -> &DbConfig {
        &self.config
    }

    /// The SQL dialect of the connected backend.
    pub fn dialect(&self) -> Dialect {
        self.pool.dialect()
    }

    /// Report the backend's server version, if it can be determined.
    pub async fn server_version(&self) -> Option<String> {
        self.pool.server_version().await
    }

    /// Close the pool. In-flight calls finish first.
    pub async fn close(&self) {
        self.pool.close().await;
    }

    /// Derive a handle whose options are layered over this handle's config.
    ///
    /// The derived handle shares the pool and any active transaction.
    pub fn with_options(&self, opts: ExecuteOptions) -> Self {
        Self {
            pool: self.pool.clone(),
            config: Arc::new(opts.layered_over(&self.config)),
            tx: self.tx.clone(),
        }
    }

    /// Whether this handle is inside a transaction scope.
    pub fn in_transaction(&self) -> bool {
        self.tx.is_some()
    }

    /// Make the enclosing transaction roll back at scope end, without
    /// aborting the scope itself.
    pub async fn mark_rollback(&self) -> DbResult<()> {
        match &self.tx {
            Some(shared) => {
                shared.lock().await.rollback_only = true;
                Ok(())
            }
            None => Err(DbError::NoActiveTransaction),
        }
    }

    /// Run `scope` inside a transaction.
    ///
    /// Begins a transaction on a pooled connection if none is active and
    /// hands `scope` a handle carrying it; every operation on that handle
    /// (and any handle derived from it) runs on the transaction's
    /// connection. When this handle is already inside a scope, `scope` runs
    /// against the same transaction and only the outermost scope completes
    /// it.
    ///
    /// An `Ok` outcome commits unless the scope was marked rollback-only, in
    /// which case the work rolls back but the value still returns. An `Err`
    /// outcome rolls back and propagates unchanged. A panic unwinds through
    /// the slot and the dropped transaction rolls back on its own.
    pub async fn transaction<F, Fut, T>(&self, scope: F) -> DbResult<T>
    where
        F: FnOnce(Db) -> Fut,
        Fut: Future<Output = DbResult<T>>,
    {
        if self.tx.is_some() {
            return scope(self.clone()).await;
        }

        let slot = share(self.pool.begin().await?);
        debug!("Transaction started");
        let scoped = Db {
            pool: self.pool.clone(),
            config: Arc::clone(&self.config),
            tx: Some(Arc::clone(&slot)),
        };

        let outcome = scope(scoped).await;

        let mut guard = slot.lock().await;
        let tx = guard.tx.take();
        let rollback_only = guard.rollback_only;
        drop(guard);

        match (outcome, tx) {
            (Ok(value), Some(tx)) => {
                if rollback_only {
                    tx.rollback().await?;
                    debug!("Transaction rolled back as marked");
                } else {
                    tx.commit().await?;
                    debug!("Transaction committed");
                }
                Ok(value)
            }
            (Err(err), Some(tx)) => {
                if let Err(rollback_err) = tx.rollback().await {
                    warn!(error = %rollback_err, "Rollback failed after scope error");
                } else {
                    debug!("Transaction rolled back");
                }
                Err(err)
            }
            // The slot can only be empty if a handle escaped its scope and
            // completed the transaction out from under us.
            (outcome, None) => outcome.and(Err(DbError::NoActiveTransaction)),
        }
    }

    /// Run one query through the execution pipeline.
    pub async fn execute(&self, form: impl Into<QueryForm>) -> DbResult<ExecutionResult> {
        let opts = self.options();
        with_conn!(self, |conn| executor::execute(conn, form, &opts).await)
    }

    /// Every row the query matches.
    pub async fn all(&self, form: impl Into<QueryForm>) -> DbResult<Vec<Row>> {
        let opts = self.options();
        with_conn!(self, |conn| ops::all(conn, form, &opts).await)
    }

    /// The single row the query matches, or `None`.
    pub async fn one(&self, form: impl Into<QueryForm>) -> DbResult<Option<Row>> {
        let opts = self.options();
        with_conn!(self, |conn| ops::one(conn, form, &opts).await)
    }

    /// Like [`Db::one`], but zero rows is an error.
    pub async fn one_required(&self, form: impl Into<QueryForm>) -> DbResult<Row> {
        let opts = self.options();
        with_conn!(self, |conn| ops::one_required(conn, form, &opts).await)
    }

    /// Fetch one record by primary key.
    pub async fn get(&self, table: &str, id_or_record: &JsonValue) -> DbResult<Option<Row>> {
        let opts = self.options();
        with_conn!(self, |conn| ops::get(conn, table, id_or_record, &opts).await)
    }

    /// Like [`Db::get`], but a missing record is an error.
    pub async fn get_required(&self, table: &str, id_or_record: &JsonValue) -> DbResult<Row> {
        let opts = self.options();
        with_conn!(self, |conn| {
            ops::get_required(conn, table, id_or_record, &opts).await
        })
    }

    /// Fetch one record matching every predicate in the map.
    pub async fn get_by(&self, table: &str, predicates: &JsonValue) -> DbResult<Option<Row>> {
        let opts = self.options();
        with_conn!(self, |conn| ops::get_by(conn, table, predicates, &opts).await)
    }

    /// Like [`Db::get_by`], but a missing record is an error.
    pub async fn get_by_required(&self, table: &str, predicates: &JsonValue) -> DbResult<Row> {
        let opts = self.options();
        with_conn!(self, |conn| {
            ops::get_by_required(conn, table, predicates, &opts).await
        })
    }

    /// Run an aggregate over the rows the form matches.
    pub async fn aggregate(
        &self,
        form: impl Into<QueryForm>,
        kind: Aggregate,
        column: &str,
    ) -> DbResult<JsonValue> {
        let opts = self.options();
        with_conn!(self, |conn| {
            ops::aggregate(conn, form, kind, column, &opts).await
        })
    }

    /// Insert one record and return the stored row.
    pub async fn insert(&self, table: &str, record: &JsonValue) -> DbResult<Row> {
        let opts = self.options();
        with_conn!(self, |conn| ops::insert(conn, table, record, &opts).await)
    }

    /// Insert many records in one statement, returning the inserted count.
    pub async fn insert_all(
        &self,
        table: &str,
        records: &[JsonValue],
        columns: Option<&[&str]>,
    ) -> DbResult<u64> {
        let opts = self.options();
        with_conn!(self, |conn| {
            ops::insert_all(conn, table, records, columns, &opts).await
        })
    }

    /// Update the record the input's primary key names, returning the stored
    /// row or `None` when nothing matched.
    pub async fn update(&self, table: &str, record: &JsonValue) -> DbResult<Option<Row>> {
        let opts = self.options();
        with_conn!(self, |conn| ops::update(conn, table, record, &opts).await)
    }

    /// Delete one record by primary key, returning the deleted count.
    pub async fn delete(&self, table: &str, id_or_record: &JsonValue) -> DbResult<u64> {
        let opts = self.options();
        with_conn!(self, |conn| ops::delete(conn, table, id_or_record, &opts).await)
    }

    /// Delete every row the form's filter matches, returning the deleted
    /// count.
    pub async fn delete_all(&self, table: &str, form: impl Into<QueryForm>) -> DbResult<u64> {
        let opts = self.options();
        with_conn!(self, |conn| ops::delete_all(conn, table, form, &opts).await)
    }

    /// Whether at least one row matches.
    pub async fn exists(&self, form: impl Into<QueryForm>) -> DbResult<bool> {
        let opts = self.options();
        with_conn!(self, |conn| ops::exists(conn, form, &opts).await)
    }

    /// Project the ambient config into the per-call options the executor
    /// consumes.
    fn options(&self) -> ExecuteOptions {
        ExecuteOptions::from(self.config.as_ref())
    }
}

impl fmt::Debug for Db {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Db")
            .field("dialect", &self.dialect())
            .field("config", &self.config)
            .field("in_transaction", &self.in_transaction())
            .finish()
    }
}
