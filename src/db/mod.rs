//! Database access layer.
//!
//! This module owns everything that touches a live connection:
//! - Connection pool construction and checkout
//! - The unified connection seam shared by pooled and transaction paths
//! - Transaction state
//! - The instrumented execution pipeline
//! - Parameter binding and row decoding per backend

pub mod conn;
pub mod executor;
pub mod params;
pub mod pool;
pub mod transaction;
pub mod types;

pub use conn::{DbConn, PoolConn};
pub use executor::{ExecutionOutcome, ExecutionResult, execute};
pub use pool::DbPool;
pub use transaction::{DbTransaction, SharedTx, TxSlot};
