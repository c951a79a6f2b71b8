//! Canonical query representation and shorthand expansion.
//!
//! Callers describe queries either as a full [`Query`] value or as a
//! [`QueryForm`] shorthand (a table name, a generator closure, or nothing).
//! [`expand`] turns any shorthand into its canonical query; [`by`] and
//! [`by_primary_key`] layer equality predicates on top. The CRUD builders
//! produce write-shaped queries from JSON records.

use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use serde_json::Value as JsonValue;

use crate::error::{DbError, DbResult};
use crate::value::as_record;

/// Primary key column assumed by the CRUD operations.
pub const DEFAULT_PRIMARY_KEY: &str = "id";

/// One entry of a select list.
#[derive(Debug, Clone, PartialEq)]
pub enum Selector {
    /// Select every column (`*`).
    All,
    /// Select a named column.
    Column(String),
    /// Select an aggregate over a column, aliased to the aggregate's name.
    Aggregate(Aggregate, String),
}

/// Aggregate functions the renderer knows how to emit.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Aggregate {
    Avg,
    Count,
    Max,
    Min,
    Sum,
}

impl Aggregate {
    /// The SQL function name, also used as the result column alias.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Avg => "avg",
            Self::Count => "count",
            Self::Max => "max",
            Self::Min => "min",
            Self::Sum => "sum",
        }
    }
}

impl fmt::Display for Aggregate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Aggregate {
    type Err = DbError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "avg" => Ok(Self::Avg),
            "count" => Ok(Self::Count),
            "max" => Ok(Self::Max),
            "min" => Ok(Self::Min),
            "sum" => Ok(Self::Sum),
            _ => Err(DbError::unsupported_aggregate(s)),
        }
    }
}

/// A filter tree. Conjunction only; a null comparison value renders as
/// `IS NULL`.
#[derive(Debug, Clone, PartialEq)]
pub enum Predicate {
    /// `column = value`
    Eq(String, JsonValue),
    /// Every child predicate must hold.
    And(Vec<Predicate>),
}

impl Predicate {
    /// Create an equality predicate.
    pub fn eq(column: impl Into<String>, value: impl Into<JsonValue>) -> Self {
        Self::Eq(column.into(), value.into())
    }

    /// Conjoin another predicate, flattening into an existing `And`.
    pub fn and(self, other: Predicate) -> Self {
        match self {
            Self::And(mut children) => {
                children.push(other);
                Self::And(children)
            }
            leaf => Self::And(vec![leaf, other]),
        }
    }
}

/// The canonical query the renderer consumes.
///
/// Read fields (`from`/`select`) and write fields (`insert_into`, `update`,
/// `delete_from`) are mutually exclusive; [`crate::sql::render`] rejects
/// mixed or empty shapes. Builder methods consume `self` and return a new
/// value.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Query {
    /// Table to read from.
    pub from: Option<String>,
    /// Select list; empty means select-all.
    pub select: Vec<Selector>,
    /// Row filter, shared by reads, updates and deletes.
    pub where_clause: Option<Predicate>,
    /// Maximum number of rows to return.
    pub limit: Option<u64>,
    /// Table to insert into.
    pub insert_into: Option<String>,
    /// Insert column list, in emission order.
    pub columns: Vec<String>,
    /// Insert rows; each inner vec is positionally aligned with `columns`.
    pub values: Vec<Vec<JsonValue>>,
    /// Table to update.
    pub update: Option<String>,
    /// Update assignments, in emission order.
    pub set: Vec<(String, JsonValue)>,
    /// Table to delete from.
    pub delete_from: Option<String>,
    /// Whether a write hands back the stored rows (`RETURNING *`).
    pub returning: bool,
}

impl Query {
    /// A select-all query over one table.
    pub fn table(name: impl Into<String>) -> Self {
        Self {
            from: Some(name.into()),
            select: vec![Selector::All],
            ..Self::default()
        }
    }

    /// Replace the select list.
    pub fn select(mut self, selectors: Vec<Selector>) -> Self {
        self.select = selectors;
        self
    }

    /// Conjoin a predicate onto the filter. Existing predicates are kept.
    pub fn and_where(mut self, predicate: Predicate) -> Self {
        self.where_clause = Some(match self.where_clause.take() {
            Some(existing) => existing.and(predicate),
            None => predicate,
        });
        self
    }

    /// Set the row limit.
    pub fn with_limit(mut self, limit: u64) -> Self {
        self.limit = Some(limit);
        self
    }

    /// Whether this query reads rows.
    pub fn is_read(&self) -> bool {
        self.from.is_some()
    }

    /// Whether this query writes rows.
    pub fn is_write(&self) -> bool {
        self.insert_into.is_some() || self.update.is_some() || self.delete_from.is_some()
    }
}

/// Shorthand forms accepted wherever a query is expected.
#[derive(Clone)]
pub enum QueryForm {
    /// No constraints at all; expands to the empty query.
    Empty,
    /// A bare table name; expands to select-all over that table.
    Table(String),
    /// A closure producing another form, invoked once per expansion.
    Generator(Arc<dyn Fn() -> QueryForm + Send + Sync>),
    /// An already-canonical query, passed through untouched.
    Explicit(Query),
}

impl QueryForm {
    /// Wrap a closure as a generator form.
    pub fn generator<F>(f: F) -> Self
    where
        F: Fn() -> QueryForm + Send + Sync + 'static,
    {
        Self::Generator(Arc::new(f))
    }
}

impl fmt::Debug for QueryForm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Empty => write!(f, "Empty"),
            Self::Table(name) => f.debug_tuple("Table").field(name).finish(),
            Self::Generator(_) => write!(f, "Generator(..)"),
            Self::Explicit(query) => f.debug_tuple("Explicit").field(query).finish(),
        }
    }
}

impl From<&str> for QueryForm {
    fn from(table: &str) -> Self {
        Self::Table(table.to_string())
    }
}

impl From<String> for QueryForm {
    fn from(table: String) -> Self {
        Self::Table(table)
    }
}

impl From<Query> for QueryForm {
    fn from(query: Query) -> Self {
        Self::Explicit(query)
    }
}

impl From<&Query> for QueryForm {
    fn from(query: &Query) -> Self {
        Self::Explicit(query.clone())
    }
}

/// Expand a shorthand form into its canonical query.
///
/// Expanding an already-expanded query is the identity, so expansion is
/// idempotent. Generator closures run exactly once per expansion.
pub fn expand(form: impl Into<QueryForm>) -> Query {
    match form.into() {
        QueryForm::Empty => Query::default(),
        QueryForm::Table(name) => Query::table(name),
        QueryForm::Generator(f) => expand(f()),
        QueryForm::Explicit(query) => query,
    }
}

/// Expand a form and conjoin one equality predicate per entry of the
/// predicate map, in key order.
pub fn by(form: impl Into<QueryForm>, predicates: &JsonValue) -> DbResult<Query> {
    let map = as_record(predicates, "a predicate map")?;
    let mut query = expand(form);
    for (column, value) in map {
        query = query.and_where(Predicate::eq(column.clone(), value.clone()));
    }
    Ok(query)
}

/// Expand a form and filter it by primary key.
///
/// Object input is treated as a record whose `primary_key` field holds the
/// key; anything else is the key value itself. An absent or null key fails
/// before any I/O.
pub fn by_primary_key(
    form: impl Into<QueryForm>,
    id_or_record: &JsonValue,
    primary_key: &str,
) -> DbResult<Query> {
    let id = primary_key_value(id_or_record, primary_key)?;
    Ok(expand(form).and_where(Predicate::eq(primary_key, id)))
}

/// Resolve the key value from an id-or-record input.
pub(crate) fn primary_key_value(input: &JsonValue, primary_key: &str) -> DbResult<JsonValue> {
    let id = match input {
        JsonValue::Object(record) => record.get(primary_key).cloned().unwrap_or(JsonValue::Null),
        other => other.clone(),
    };
    if id.is_null() {
        return Err(DbError::missing_primary_key(primary_key));
    }
    Ok(id)
}

/// Build a single-record insert returning the stored row.
///
/// The column list follows the record's key order.
pub fn insert(table: impl Into<String>, record: &JsonValue) -> DbResult<Query> {
    let record = as_record(record, "an insert record")?;
    let mut columns = Vec::with_capacity(record.len());
    let mut row = Vec::with_capacity(record.len());
    for (column, value) in record {
        columns.push(column.clone());
        row.push(value.clone());
    }
    Ok(Query {
        insert_into: Some(table.into()),
        columns,
        values: vec![row],
        returning: true,
        ..Query::default()
    })
}

/// Build a multi-record insert.
///
/// When `columns` is absent the column list is the distinct union of record
/// keys in first-seen order; columns a record lacks are filled with null.
pub fn insert_all(
    table: impl Into<String>,
    records: &[JsonValue],
    columns: Option<&[&str]>,
) -> DbResult<Query> {
    if records.is_empty() {
        return Err(DbError::invalid_query("insert requires at least one record"));
    }
    let maps = records
        .iter()
        .map(|record| as_record(record, "an insert record"))
        .collect::<DbResult<Vec<_>>>()?;

    let columns: Vec<String> = match columns {
        Some(list) => list.iter().map(|c| c.to_string()).collect(),
        None => {
            let mut union: Vec<String> = Vec::new();
            for record in &maps {
                for key in record.keys() {
                    if !union.iter().any(|seen| seen == key) {
                        union.push(key.clone());
                    }
                }
            }
            union
        }
    };

    let values = maps
        .iter()
        .map(|record| {
            columns
                .iter()
                .map(|column| record.get(column).cloned().unwrap_or(JsonValue::Null))
                .collect()
        })
        .collect();

    Ok(Query {
        insert_into: Some(table.into()),
        columns,
        values,
        returning: false,
        ..Query::default()
    })
}

/// Build an update keyed by `primary_key`, returning the stored row.
///
/// The key field is removed from the assignment set and becomes the filter.
pub fn update(table: impl Into<String>, record: &JsonValue, primary_key: &str) -> DbResult<Query> {
    let record = as_record(record, "an update record")?;
    let id = record.get(primary_key).cloned().unwrap_or(JsonValue::Null);
    if id.is_null() {
        return Err(DbError::missing_primary_key(primary_key));
    }
    let set = record
        .iter()
        .filter(|(column, _)| column.as_str() != primary_key)
        .map(|(column, value)| (column.clone(), value.clone()))
        .collect();
    Ok(Query {
        update: Some(table.into()),
        set,
        where_clause: Some(Predicate::eq(primary_key, id)),
        returning: true,
        ..Query::default()
    })
}

/// Build a delete of one record by primary key.
pub fn delete(
    table: impl Into<String>,
    id_or_record: &JsonValue,
    primary_key: &str,
) -> DbResult<Query> {
    let id = primary_key_value(id_or_record, primary_key)?;
    Ok(Query {
        delete_from: Some(table.into()),
        where_clause: Some(Predicate::eq(primary_key, id)),
        ..Query::default()
    })
}

/// Build a delete of every row the form's filter matches.
pub fn delete_all(table: impl Into<String>, form: impl Into<QueryForm>) -> Query {
    let expanded = expand(form);
    Query {
        delete_from: Some(table.into()),
        where_clause: expanded.where_clause,
        ..Query::default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_expand_table_is_select_all() {
        assert_eq!(expand("users"), Query::table("users"));
        assert_eq!(expand("users").select, vec![Selector::All]);
    }

    #[test]
    fn test_expand_empty_is_default() {
        assert_eq!(expand(QueryForm::Empty), Query::default());
    }

    #[test]
    fn test_expand_is_idempotent() {
        let once = expand("users");
        let twice = expand(expand("users"));
        assert_eq!(once, twice);

        let filtered = by("users", &json!({"active": true})).unwrap();
        assert_eq!(expand(filtered.clone()), filtered);
    }

    #[test]
    fn test_expand_generator_recurses() {
        let form = QueryForm::generator(|| QueryForm::from("users"));
        assert_eq!(expand(form), Query::table("users"));

        let nested = QueryForm::generator(|| QueryForm::generator(|| QueryForm::from("users")));
        assert_eq!(expand(nested), Query::table("users"));
    }

    #[test]
    fn test_expand_generator_runs_once_per_expansion() {
        use std::sync::atomic::{AtomicUsize, Ordering};
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&calls);
        let form = QueryForm::generator(move || {
            counter.fetch_add(1, Ordering::SeqCst);
            QueryForm::from("users")
        });
        expand(form.clone());
        expand(form);
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_by_adds_equality_predicates_in_key_order() {
        let query = by("users", &json!({"name": "ada", "active": true})).unwrap();
        assert_eq!(
            query.where_clause,
            Some(Predicate::And(vec![
                Predicate::eq("name", "ada"),
                Predicate::eq("active", true),
            ]))
        );
    }

    #[test]
    fn test_by_twice_equals_by_merged_map() {
        let step = by("users", &json!({"a": 1})).unwrap();
        let twice = by(step, &json!({"b": 2})).unwrap();
        let merged = by("users", &json!({"a": 1, "b": 2})).unwrap();
        assert_eq!(twice, merged);
    }

    #[test]
    fn test_by_preserves_existing_predicates() {
        let base = Query::table("users").and_where(Predicate::eq("active", true));
        let query = by(base, &json!({"name": "ada"})).unwrap();
        assert_eq!(
            query.where_clause,
            Some(Predicate::And(vec![
                Predicate::eq("active", true),
                Predicate::eq("name", "ada"),
            ]))
        );
    }

    #[test]
    fn test_by_rejects_non_object_predicates() {
        let err = by("users", &json!([1, 2])).unwrap_err();
        assert!(matches!(err, DbError::InvalidQuery { .. }));
    }

    #[test]
    fn test_by_primary_key_accepts_bare_id_and_record() {
        let from_id = by_primary_key("users", &json!(7), "id").unwrap();
        let from_record = by_primary_key("users", &json!({"id": 7, "name": "ada"}), "id").unwrap();
        assert_eq!(from_id, from_record);
        assert_eq!(from_id.where_clause, Some(Predicate::eq("id", 7)));
    }

    #[test]
    fn test_by_primary_key_rejects_missing_or_null_key() {
        for input in [json!({"name": "ada"}), json!({"id": null}), json!(null)] {
            let err = by_primary_key("users", &input, "id").unwrap_err();
            assert!(matches!(err, DbError::MissingPrimaryKey { ref field } if field == "id"));
        }
    }

    #[test]
    fn test_aggregate_from_str() {
        assert_eq!("count".parse::<Aggregate>().unwrap(), Aggregate::Count);
        assert_eq!("AVG".parse::<Aggregate>().unwrap(), Aggregate::Avg);
        let err = "median".parse::<Aggregate>().unwrap_err();
        assert!(matches!(err, DbError::UnsupportedAggregate { ref kind } if kind == "median"));
    }

    #[test]
    fn test_insert_columns_follow_record_key_order() {
        let query = insert("users", &json!({"name": "ada", "age": 36, "active": true})).unwrap();
        assert_eq!(query.columns, ["name", "age", "active"]);
        assert_eq!(query.values, vec![vec![json!("ada"), json!(36), json!(true)]]);
        assert!(query.returning);
    }

    #[test]
    fn test_insert_rejects_non_object() {
        assert!(insert("users", &json!("ada")).is_err());
    }

    #[test]
    fn test_insert_all_union_columns_first_seen_order() {
        let records = [json!({"a": 1, "b": 2}), json!({"b": 3, "c": 4})];
        let query = insert_all("t", &records, None).unwrap();
        assert_eq!(query.columns, ["a", "b", "c"]);
        assert_eq!(
            query.values,
            vec![
                vec![json!(1), json!(2), JsonValue::Null],
                vec![JsonValue::Null, json!(3), json!(4)],
            ]
        );
        assert!(!query.returning);
    }

    #[test]
    fn test_insert_all_explicit_columns() {
        let records = [json!({"a": 1, "b": 2})];
        let query = insert_all("t", &records, Some(&["b"])).unwrap();
        assert_eq!(query.columns, ["b"]);
        assert_eq!(query.values, vec![vec![json!(2)]]);
    }

    #[test]
    fn test_insert_all_rejects_empty_and_non_object() {
        assert!(insert_all("t", &[], None).is_err());
        assert!(insert_all("t", &[json!(1)], None).is_err());
    }

    #[test]
    fn test_update_excludes_key_from_assignments() {
        let query = update("users", &json!({"id": 7, "name": "ada"}), "id").unwrap();
        assert_eq!(query.set, vec![("name".to_string(), json!("ada"))]);
        assert_eq!(query.where_clause, Some(Predicate::eq("id", 7)));
        assert!(query.returning);
    }

    #[test]
    fn test_update_requires_key() {
        let err = update("users", &json!({"name": "ada"}), "id").unwrap_err();
        assert!(matches!(err, DbError::MissingPrimaryKey { .. }));
    }

    #[test]
    fn test_delete_by_id_and_record() {
        let by_id = delete("users", &json!(1), "id").unwrap();
        let by_record = delete("users", &json!({"id": 1}), "id").unwrap();
        assert_eq!(by_id, by_record);
        assert_eq!(by_id.where_clause, Some(Predicate::eq("id", 1)));

        let err = delete("users", &json!({"name": "ada"}), "id").unwrap_err();
        assert!(matches!(err, DbError::MissingPrimaryKey { .. }));
    }

    #[test]
    fn test_delete_all_carries_filter() {
        let filtered = by("users", &json!({"active": false})).unwrap();
        let query = delete_all("users", filtered);
        assert_eq!(query.delete_from.as_deref(), Some("users"));
        assert_eq!(query.where_clause, Some(Predicate::eq("active", false)));
        assert!(query.from.is_none());

        let everything = delete_all("users", QueryForm::Empty);
        assert_eq!(everything.where_clause, None);
    }

    #[test]
    fn test_and_where_flattens_conjunctions() {
        let query = Query::table("t")
            .and_where(Predicate::eq("a", 1))
            .and_where(Predicate::eq("b", 2))
            .and_where(Predicate::eq("c", 3));
        assert_eq!(
            query.where_clause,
            Some(Predicate::And(vec![
                Predicate::eq("a", 1),
                Predicate::eq("b", 2),
                Predicate::eq("c", 3),
            ]))
        );
    }

    #[test]
    fn test_read_write_classification() {
        let read = Query::table("users");
        assert!(read.is_read() && !read.is_write());

        let write = insert("users", &json!({"a": 1})).unwrap();
        assert!(write.is_write() && !write.is_read());

        let update = update("users", &json!({"id": 1, "a": 2}), "id").unwrap();
        assert!(update.is_write() && !update.is_read());

        let delete = delete_all("users", QueryForm::Empty);
        assert!(delete.is_write() && !delete.is_read());

        let neither = Query::default();
        assert!(!neither.is_read() && !neither.is_write());
    }
}
