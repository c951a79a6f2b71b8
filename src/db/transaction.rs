//! Transaction state carried by database handles.
//!
//! A transaction scope owns one [`DbTransaction`] inside a shared [`TxSlot`].
//! Every handle derived within the scope points at the same slot, so nested
//! scopes run on the same connection; only the outermost scope takes the
//! transaction out of the slot to commit or roll back.

use std::sync::Arc;

use sqlx::{Postgres, Sqlite, Transaction};
use tokio::sync::Mutex;

use crate::db::conn::DbConn;
use crate::error::{DbError, DbResult};
use crate::sql::Dialect;

/// Database-specific transaction wrapper.
///
/// Dropping an uncommitted transaction rolls it back, so a panic inside a
/// scope cannot leave the connection mid-transaction.
pub enum DbTransaction {
    /// PostgreSQL transaction
    Postgres(Transaction<'static, Postgres>),
    /// SQLite transaction
    SQLite(Transaction<'static, Sqlite>),
}

impl DbTransaction {
    /// Get the dialect for this transaction's backend.
    pub fn dialect(&self) -> Dialect {
        match self {
            DbTransaction::Postgres(_) => Dialect::Postgres,
            DbTransaction::SQLite(_) => Dialect::Sqlite,
        }
    }

    /// Borrow the transaction's connection for one call.
    pub fn as_conn(&mut self) -> DbConn<'_> {
        match self {
            DbTransaction::Postgres(tx) => DbConn::Postgres(&mut **tx),
            DbTransaction::SQLite(tx) => DbConn::Sqlite(&mut **tx),
        }
    }

    /// Commit the transaction.
    pub async fn commit(self) -> DbResult<()> {
        match self {
            DbTransaction::Postgres(tx) => tx.commit().await.map_err(DbError::from),
            DbTransaction::SQLite(tx) => tx.commit().await.map_err(DbError::from),
        }
    }

    /// Rollback the transaction.
    pub async fn rollback(self) -> DbResult<()> {
        match self {
            DbTransaction::Postgres(tx) => tx.rollback().await.map_err(DbError::from),
            DbTransaction::SQLite(tx) => tx.rollback().await.map_err(DbError::from),
        }
    }
}

/// State of one transaction scope, shared by every handle inside it.
pub struct TxSlot {
    /// Live transaction. The outermost scope takes it at completion time.
    pub(crate) tx: Option<DbTransaction>,
    /// When set, the outermost scope rolls back instead of committing.
    pub(crate) rollback_only: bool,
}

impl TxSlot {
    pub(crate) fn new(tx: DbTransaction) -> Self {
        Self {
            tx: Some(tx),
            rollback_only: false,
        }
    }

    /// Borrow the live transaction's connection.
    ///
    /// Fails if the transaction has already been completed, which can only
    /// happen when a handle escapes its scope.
    pub(crate) fn conn(&mut self) -> DbResult<DbConn<'_>> {
        match self.tx.as_mut() {
            Some(tx) => Ok(tx.as_conn()),
            None => Err(DbError::NoActiveTransaction),
        }
    }
}

/// Shared transaction state; cheap to clone into derived handles.
pub type SharedTx = Arc<Mutex<TxSlot>>;

/// Wrap a fresh transaction for sharing across a scope's handles.
pub(crate) fn share(tx: DbTransaction) -> SharedTx {
    Arc::new(Mutex::new(TxSlot::new(tx)))
}
