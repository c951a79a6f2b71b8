//! Error types for the data-access layer.
//!
//! This module defines all error types using `thiserror` for ergonomic error
//! handling. Driver failures keep the original `sqlx::Error` as their source
//! so callers can still match on the underlying condition.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum DbError {
    #[error("Connection failed: {message}")]
    Connection { message: String, suggestion: String },

    #[error("Invalid query: {message}")]
    InvalidQuery { message: String },

    #[error("Missing primary key: no usable '{field}' value in input")]
    MissingPrimaryKey { field: String },

    #[error("Unsupported aggregate function: {kind}")]
    UnsupportedAggregate { kind: String },

    #[error("Query returned {count} rows where at most one was expected: {sql}")]
    MultipleResults { count: usize, sql: String },

    #[error("Query returned no rows: {sql}")]
    NotFound { sql: String },

    #[error("No active transaction in this call chain")]
    NoActiveTransaction,

    #[error("Driver error: {0}")]
    Driver(#[from] sqlx::Error),
}

impl DbError {
    /// Create a connection error with a helpful suggestion.
    pub fn connection(message: impl Into<String>, suggestion: impl Into<String>) -> Self {
        Self::Connection {
            message: message.into(),
            suggestion: suggestion.into(),
        }
    }

    /// Create an invalid query error.
    pub fn invalid_query(message: impl Into<String>) -> Self {
        Self::InvalidQuery {
            message: message.into(),
        }
    }

    /// Create a missing primary key error.
    pub fn missing_primary_key(field: impl Into<String>) -> Self {
        Self::MissingPrimaryKey {
            field: field.into(),
        }
    }

    /// Create an unsupported aggregate error.
    pub fn unsupported_aggregate(kind: impl Into<String>) -> Self {
        Self::UnsupportedAggregate { kind: kind.into() }
    }

    /// Create a multiple results error.
    pub fn multiple_results(count: usize, sql: impl Into<String>) -> Self {
        Self::MultipleResults {
            count,
            sql: sql.into(),
        }
    }

    /// Create a not found error.
    pub fn not_found(sql: impl Into<String>) -> Self {
        Self::NotFound { sql: sql.into() }
    }

    /// Get the suggestion for this error, if available.
    pub fn suggestion(&self) -> Option<&str> {
        match self {
            Self::Connection { suggestion, .. } => Some(suggestion),
            _ => None,
        }
    }

    /// Check whether this error means the requested row does not exist.
    pub fn is_not_found(&self) -> bool {
        matches!(
            self,
            Self::NotFound { .. } | Self::Driver(sqlx::Error::RowNotFound)
        )
    }
}

/// Result type alias for database operations.
pub type DbResult<T> = Result<T, DbError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = DbError::connection("Failed to connect", "Check credentials");
        assert!(err.to_string().contains("Connection failed"));
    }

    #[test]
    fn test_error_suggestion() {
        let err = DbError::connection("refused", "Check that the server is running");
        assert_eq!(err.suggestion(), Some("Check that the server is running"));
        assert_eq!(DbError::NoActiveTransaction.suggestion(), None);
    }

    #[test]
    fn test_driver_error_keeps_original() {
        let err = DbError::from(sqlx::Error::RowNotFound);
        assert!(matches!(err, DbError::Driver(sqlx::Error::RowNotFound)));
    }

    #[test]
    fn test_is_not_found() {
        assert!(DbError::not_found("SELECT * FROM \"users\"").is_not_found());
        assert!(DbError::Driver(sqlx::Error::RowNotFound).is_not_found());
        assert!(!DbError::NoActiveTransaction.is_not_found());
    }

    #[test]
    fn test_multiple_results_message() {
        let err = DbError::multiple_results(3, "SELECT * FROM \"users\"");
        assert!(err.to_string().contains("3 rows"));
        assert!(err.to_string().contains("SELECT * FROM \"users\""));
    }
}
