//! Windlass
//!
//! A thin data-access layer over PostgreSQL and SQLite: shorthand query
//! expansion into a canonical query value, deterministic SQL rendering,
//! instrumented execution with long-running warnings, CRUD operations over
//! JSON records, and connection-bound [`Db`] handles with call-chain-scoped
//! transactions.

pub mod config;
pub mod db;
pub mod error;
pub mod handle;
pub mod ops;
pub mod query;
pub mod sql;
pub mod value;

pub use config::{DbConfig, ExecuteOptions, PoolOptions, RowFn};
pub use db::{DbConn, DbPool, ExecutionOutcome, ExecutionResult};
pub use error::{DbError, DbResult};
pub use handle::Db;
pub use query::{Aggregate, Predicate, Query, QueryForm, Selector};
pub use sql::{Dialect, RenderedSql};
pub use value::{Row, SqlValue};
