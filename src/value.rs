//! Value-level data models.
//!
//! Rows are opaque ordered mappings of column name to JSON value; bound
//! parameters are [`SqlValue`]s converted from JSON at render time.

use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;

use crate::error::{DbError, DbResult};

/// A result row: column name to JSON value, in select-list order.
pub type Row = serde_json::Map<String, JsonValue>;

/// A parameter value bound into a rendered statement.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum SqlValue {
    /// NULL value
    Null,
    /// Boolean value
    Bool(bool),
    /// Integer value (stored as i64 for maximum range)
    Int(i64),
    /// Floating point value
    Float(f64),
    /// String value
    Text(String),
    /// Structured value, bound as the backend's JSON representation
    Json(JsonValue),
}

impl SqlValue {
    /// Check if this value is null.
    pub fn is_null(&self) -> bool {
        matches!(self, Self::Null)
    }

    /// Get the type name of this value for debugging.
    pub fn type_name(&self) -> &'static str {
        match self {
            Self::Null => "null",
            Self::Bool(_) => "bool",
            Self::Int(_) => "int",
            Self::Float(_) => "float",
            Self::Text(_) => "text",
            Self::Json(_) => "json",
        }
    }
}

impl From<&JsonValue> for SqlValue {
    fn from(value: &JsonValue) -> Self {
        match value {
            JsonValue::Null => Self::Null,
            JsonValue::Bool(b) => Self::Bool(*b),
            JsonValue::Number(n) => match n.as_i64() {
                Some(i) => Self::Int(i),
                // u64 beyond i64 range and true floats both go through f64
                None => Self::Float(n.as_f64().unwrap_or(f64::NAN)),
            },
            JsonValue::String(s) => Self::Text(s.clone()),
            JsonValue::Array(_) | JsonValue::Object(_) => Self::Json(value.clone()),
        }
    }
}

impl From<JsonValue> for SqlValue {
    fn from(value: JsonValue) -> Self {
        Self::from(&value)
    }
}

/// Describe a JSON value's kind for error messages.
pub(crate) fn value_kind(value: &JsonValue) -> &'static str {
    match value {
        JsonValue::Null => "null",
        JsonValue::Bool(_) => "boolean",
        JsonValue::Number(_) => "number",
        JsonValue::String(_) => "string",
        JsonValue::Array(_) => "array",
        JsonValue::Object(_) => "object",
    }
}

/// Require a JSON object, naming the offending input on failure.
pub(crate) fn as_record<'a>(value: &'a JsonValue, what: &str) -> DbResult<&'a Row> {
    value.as_object().ok_or_else(|| {
        DbError::invalid_query(format!(
            "expected a JSON object for {}, got {}",
            what,
            value_kind(value)
        ))
    })
}
