//! Deterministic SQL rendering.
//!
//! [`render`] turns a canonical [`Query`] into SQL text plus an ordered
//! parameter list for one [`Dialect`]. Rendering is pure: the same query and
//! dialect always produce the same statement. Shape validation happens here,
//! before any I/O.

use std::fmt;

use serde_json::Value as JsonValue;

use crate::error::{DbError, DbResult};
use crate::query::{Predicate, Query, Selector};
use crate::value::SqlValue;

/// Placeholder syntax of the target backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Dialect {
    /// `$1`, `$2`, ... placeholders.
    Postgres,
    /// `?` placeholders.
    Sqlite,
}

impl Dialect {
    /// Human-readable backend name for logs and error suggestions.
    pub fn name(&self) -> &'static str {
        match self {
            Self::Postgres => "PostgreSQL",
            Self::Sqlite => "SQLite",
        }
    }
}

impl fmt::Display for Dialect {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// A rendered statement: SQL text plus parameters in placeholder order.
#[derive(Debug, Clone, PartialEq)]
pub struct RenderedSql {
    pub sql: String,
    pub params: Vec<SqlValue>,
}

/// Render a canonical query for a dialect.
///
/// The query must have exactly one table slot set (`from`, `insert_into`,
/// `update` or `delete_from`); anything else is [`DbError::InvalidQuery`].
pub fn render(query: &Query, dialect: Dialect) -> DbResult<RenderedSql> {
    validate_shape(query)?;
    let mut out = SqlBuilder::new(dialect);
    if query.from.is_some() {
        render_select(query, &mut out)?;
    } else if query.insert_into.is_some() {
        render_insert(query, &mut out)?;
    } else if query.update.is_some() {
        render_update(query, &mut out)?;
    } else {
        render_delete(query, &mut out)?;
    }
    Ok(out.finish())
}

fn validate_shape(query: &Query) -> DbResult<()> {
    let shapes = [
        query.from.is_some(),
        query.insert_into.is_some(),
        query.update.is_some(),
        query.delete_from.is_some(),
    ];
    match shapes.iter().filter(|present| **present).count() {
        0 => Err(DbError::invalid_query(
            "query names no table in from, insert_into, update or delete_from",
        )),
        1 => Ok(()),
        _ => Err(DbError::invalid_query(
            "query must name exactly one of from, insert_into, update or delete_from",
        )),
    }
}

fn render_select(query: &Query, out: &mut SqlBuilder) -> DbResult<()> {
    out.push("SELECT ");
    if query.select.is_empty() {
        out.push("*");
    } else {
        for (i, selector) in query.select.iter().enumerate() {
            if i > 0 {
                out.push(", ");
            }
            match selector {
                Selector::All => out.push("*"),
                Selector::Column(column) => out.push_ident(column),
                Selector::Aggregate(kind, column) => {
                    out.push(kind.as_str());
                    out.push("(");
                    if column == "*" {
                        out.push("*");
                    } else {
                        out.push_ident(column);
                    }
                    out.push(") AS ");
                    out.push_ident(kind.as_str());
                }
            }
        }
    }
    out.push(" FROM ");
    out.push_ident(query.from.as_deref().unwrap_or_default());
    if let Some(predicate) = &query.where_clause {
        out.push(" WHERE ");
        out.push_predicate(predicate)?;
    }
    if let Some(limit) = query.limit {
        out.push(" LIMIT ");
        out.push(&limit.to_string());
    }
    Ok(())
}

fn render_insert(query: &Query, out: &mut SqlBuilder) -> DbResult<()> {
    if query.columns.is_empty() {
        return Err(DbError::invalid_query("insert requires at least one column"));
    }
    if query.values.is_empty() {
        return Err(DbError::invalid_query(
            "insert requires at least one row of values",
        ));
    }
    out.push("INSERT INTO ");
    out.push_ident(query.insert_into.as_deref().unwrap_or_default());
    out.push(" (");
    for (i, column) in query.columns.iter().enumerate() {
        if i > 0 {
            out.push(", ");
        }
        out.push_ident(column);
    }
    out.push(") VALUES ");
    for (i, row) in query.values.iter().enumerate() {
        if row.len() != query.columns.len() {
            return Err(DbError::invalid_query(format!(
                "insert row has {} values but {} columns",
                row.len(),
                query.columns.len()
            )));
        }
        if i > 0 {
            out.push(", ");
        }
        out.push("(");
        for (j, value) in row.iter().enumerate() {
            if j > 0 {
                out.push(", ");
            }
            out.push_param(value);
        }
        out.push(")");
    }
    if query.returning {
        out.push(" RETURNING *");
    }
    Ok(())
}

fn render_update(query: &Query, out: &mut SqlBuilder) -> DbResult<()> {
    if query.set.is_empty() {
        return Err(DbError::invalid_query(
            "update requires at least one assignment",
        ));
    }
    out.push("UPDATE ");
    out.push_ident(query.update.as_deref().unwrap_or_default());
    out.push(" SET ");
    for (i, (column, value)) in query.set.iter().enumerate() {
        if i > 0 {
            out.push(", ");
        }
        out.push_ident(column);
        out.push(" = ");
        out.push_param(value);
    }
    if let Some(predicate) = &query.where_clause {
        out.push(" WHERE ");
        out.push_predicate(predicate)?;
    }
    if query.returning {
        out.push(" RETURNING *");
    }
    Ok(())
}

fn render_delete(query: &Query, out: &mut SqlBuilder) -> DbResult<()> {
    out.push("DELETE FROM ");
    out.push_ident(query.delete_from.as_deref().unwrap_or_default());
    if let Some(predicate) = &query.where_clause {
        out.push(" WHERE ");
        out.push_predicate(predicate)?;
    }
    if query.returning {
        out.push(" RETURNING *");
    }
    Ok(())
}

/// Accumulates SQL text and keeps parameters aligned with placeholders.
struct SqlBuilder {
    dialect: Dialect,
    sql: String,
    params: Vec<SqlValue>,
}

impl SqlBuilder {
    fn new(dialect: Dialect) -> Self {
        Self {
            dialect,
            sql: String::new(),
            params: Vec::new(),
        }
    }

    fn push(&mut self, text: &str) {
        self.sql.push_str(text);
    }

    /// Double-quote an identifier, doubling embedded quotes.
    fn push_ident(&mut self, ident: &str) {
        self.sql.push('"');
        for ch in ident.chars() {
            if ch == '"' {
                self.sql.push('"');
            }
            self.sql.push(ch);
        }
        self.sql.push('"');
    }

    fn push_param(&mut self, value: &JsonValue) {
        self.params.push(SqlValue::from(value));
        match self.dialect {
            Dialect::Postgres => {
                self.sql.push('$');
                self.sql.push_str(&self.params.len().to_string());
            }
            Dialect::Sqlite => self.sql.push('?'),
        }
    }

    fn push_predicate(&mut self, predicate: &Predicate) -> DbResult<()> {
        match predicate {
            Predicate::Eq(column, value) => {
                self.push_ident(column);
                if value.is_null() {
                    self.push(" IS NULL");
                } else {
                    self.push(" = ");
                    self.push_param(value);
                }
            }
            Predicate::And(children) => {
                if children.is_empty() {
                    return Err(DbError::invalid_query("empty AND predicate"));
                }
                for (i, child) in children.iter().enumerate() {
                    if i > 0 {
                        self.push(" AND ");
                    }
                    self.push_predicate(child)?;
                }
            }
        }
        Ok(())
    }

    fn finish(self) -> RenderedSql {
        RenderedSql {
            sql: self.sql,
            params: self.params,
        }
    }
}
