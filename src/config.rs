//! Ambient configuration for database handles.
//!
//! A [`DbConfig`] is built once, wrapped in an `Arc`, and shared by every
//! handle cloned from it. Per-call [`ExecuteOptions`] layer on top of it;
//! built-in defaults sit underneath.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use crate::value::Row;

// Pool configuration defaults
pub const DEFAULT_MAX_CONNECTIONS: u32 = 10;
pub const DEFAULT_MAX_CONNECTIONS_SQLITE: u32 = 1;
pub const DEFAULT_MIN_CONNECTIONS: u32 = 1;
pub const DEFAULT_IDLE_TIMEOUT_SECS: u64 = 600;
pub const DEFAULT_ACQUIRE_TIMEOUT_SECS: u64 = 30;

/// Elapsed time above which a completed query is logged as long-running.
pub const DEFAULT_LONG_RUNNING_THRESHOLD: Duration = Duration::from_millis(500);

/// Per-row transform applied to every row a query returns.
pub type RowFn = Arc<dyn Fn(Row) -> Row + Send + Sync>;

/// Connection pool configuration options.
#[derive(Debug, Clone, Default, serde::Serialize, serde::Deserialize)]
pub struct PoolOptions {
    /// Maximum connections in pool (default: 10 for PostgreSQL, 1 for SQLite)
    pub max_connections: Option<u32>,
    /// Minimum connections in pool (default: 1)
    pub min_connections: Option<u32>,
    /// Idle timeout in seconds (default: 600)
    pub idle_timeout_secs: Option<u64>,
    /// Connection acquire timeout in seconds (default: 30)
    pub acquire_timeout_secs: Option<u64>,
    /// Whether to test connections before use (default: true)
    pub test_before_acquire: Option<bool>,
}

impl PoolOptions {
    /// Get max_connections with default value based on database type.
    pub fn max_connections_or_default(&self, is_sqlite: bool) -> u32 {
        self.max_connections.unwrap_or(if is_sqlite {
            DEFAULT_MAX_CONNECTIONS_SQLITE
        } else {
            DEFAULT_MAX_CONNECTIONS
        })
    }

    /// Get min_connections with default value.
    pub fn min_connections_or_default(&self) -> u32 {
        self.min_connections.unwrap_or(DEFAULT_MIN_CONNECTIONS)
    }

    /// Get idle_timeout with default value.
    pub fn idle_timeout_or_default(&self) -> u64 {
        self.idle_timeout_secs.unwrap_or(DEFAULT_IDLE_TIMEOUT_SECS)
    }

    /// Get acquire_timeout with default value.
    pub fn acquire_timeout_or_default(&self) -> u64 {
        self.acquire_timeout_secs
            .unwrap_or(DEFAULT_ACQUIRE_TIMEOUT_SECS)
    }

    /// Get test_before_acquire with default value.
    pub fn test_before_acquire_or_default(&self) -> bool {
        self.test_before_acquire.unwrap_or(true)
    }

    /// Validate pool options and return an error message if invalid.
    pub fn validate(&self) -> Result<(), String> {
        if let Some(max) = self.max_connections {
            if max == 0 {
                return Err("max_connections must be greater than 0".to_string());
            }
        }
        if let Some(min) = self.min_connections {
            if min == 0 {
                return Err("min_connections must be greater than 0".to_string());
            }
            if let Some(max) = self.max_connections {
                if min > max {
                    return Err(format!(
                        "min_connections ({}) cannot exceed max_connections ({})",
                        min, max
                    ));
                }
            }
        }
        Ok(())
    }
}

/// Ambient defaults a handle applies to every operation.
#[derive(Clone, Default)]
pub struct DbConfig {
    /// Transform applied to every returned row. None means identity.
    pub row_fn: Option<RowFn>,
    /// Long-running warning threshold. None means the built-in 500 ms.
    pub long_running_threshold: Option<Duration>,
    /// Pool sizing and timeouts used at connect time.
    pub pool: PoolOptions,
}

impl DbConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the ambient row transform.
    pub fn with_row_fn<F>(mut self, f: F) -> Self
    where
        F: Fn(Row) -> Row + Send + Sync + 'static,
    {
        self.row_fn = Some(Arc::new(f));
        self
    }

    /// Set the ambient long-running threshold.
    pub fn with_long_running_threshold(mut self, threshold: Duration) -> Self {
        self.long_running_threshold = Some(threshold);
        self
    }

    /// Set the pool options used at connect time.
    pub fn with_pool_options(mut self, pool: PoolOptions) -> Self {
        self.pool = pool;
        self
    }
}

impl fmt::Debug for DbConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DbConfig")
            .field("row_fn", &self.row_fn.as_ref().map(|_| "Fn"))
            .field("long_running_threshold", &self.long_running_threshold)
            .field("pool", &self.pool)
            .finish()
    }
}

/// Per-call overrides, layered over the handle's [`DbConfig`].
#[derive(Clone, Default)]
pub struct ExecuteOptions {
    pub row_fn: Option<RowFn>,
    pub long_running_threshold: Option<Duration>,
}

impl ExecuteOptions {
    pub fn new() -> Self {
        Self::default()
    }

    /// Override the row transform for this call.
    pub fn with_row_fn<F>(mut self, f: F) -> Self
    where
        F: Fn(Row) -> Row + Send + Sync + 'static,
    {
        self.row_fn = Some(Arc::new(f));
        self
    }

    /// Override the long-running threshold for this call.
    pub fn with_long_running_threshold(mut self, threshold: Duration) -> Self {
        self.long_running_threshold = Some(threshold);
        self
    }

    /// Threshold to compare elapsed time against, falling back to the
    /// built-in default when unset.
    pub fn threshold_or_default(&self) -> Duration {
        self.long_running_threshold
            .unwrap_or(DEFAULT_LONG_RUNNING_THRESHOLD)
    }

    /// Layer these options under the handle's ambient config, producing the
    /// config a derived handle carries.
    pub fn layered_over(&self, config: &DbConfig) -> DbConfig {
        DbConfig {
            row_fn: self.row_fn.clone().or_else(|| config.row_fn.clone()),
            long_running_threshold: self
                .long_running_threshold
                .or(config.long_running_threshold),
            pool: config.pool.clone(),
        }
    }
}

/// Projects a handle's ambient defaults into the per-call options the
/// execution pipeline consumes.
impl From<&DbConfig> for ExecuteOptions {
    fn from(config: &DbConfig) -> Self {
        Self {
            row_fn: config.row_fn.clone(),
            long_running_threshold: config.long_running_threshold,
        }
    }
}

impl fmt::Debug for ExecuteOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ExecuteOptions")
            .field("row_fn", &self.row_fn.as_ref().map(|_| "Fn"))
            .field("long_running_threshold", &self.long_running_threshold)
            .finish()
    }
}
