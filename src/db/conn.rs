//! Unified connection seam.
//!
//! Pooled connections and transaction connections end up as the same
//! [`DbConn`] borrow, so every operation runs identically inside and outside
//! a transaction scope.

use std::fmt;

use sqlx::pool::PoolConnection;
use sqlx::{PgConnection, Postgres, Sqlite, SqliteConnection};

use crate::sql::Dialect;

/// A connection checked out from a [`crate::db::pool::DbPool`].
pub enum PoolConn {
    Postgres(PoolConnection<Postgres>),
    SQLite(PoolConnection<Sqlite>),
}

impl PoolConn {
    /// Borrow the underlying connection for one call.
    pub fn as_conn(&mut self) -> DbConn<'_> {
        match self {
            PoolConn::Postgres(conn) => DbConn::Postgres(&mut **conn),
            PoolConn::SQLite(conn) => DbConn::Sqlite(&mut **conn),
        }
    }
}

impl fmt::Debug for PoolConn {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PoolConn::Postgres(_) => write!(f, "PoolConn::Postgres"),
            PoolConn::SQLite(_) => write!(f, "PoolConn::SQLite"),
        }
    }
}

/// A mutable borrow of one live connection for the duration of one call.
pub enum DbConn<'c> {
    Postgres(&'c mut PgConnection),
    Sqlite(&'c mut SqliteConnection),
}

impl DbConn<'_> {
    /// The SQL dialect this connection's backend speaks.
    pub fn dialect(&self) -> Dialect {
        match self {
            DbConn::Postgres(_) => Dialect::Postgres,
            DbConn::Sqlite(_) => Dialect::Sqlite,
        }
    }
}

impl fmt::Debug for DbConn<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "DbConn::{}", self.dialect().name())
    }
}
