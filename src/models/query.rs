//! Query-related data models.
//!
//! This module defines bind parameters, rows and the predicate type used for
//! scatter-gather reads.

use crate::error::{ShardError, ShardResult};
use crate::models::Driver;
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;

/// A decoded result row, keyed by column name.
pub type Row = serde_json::Map<String, JsonValue>;

/// A parameter value for parameterized queries.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum QueryParam {
    /// NULL value
    Null,
    /// Boolean value
    Bool(bool),
    /// Integer value (stored as i64 for maximum range)
    Int(i64),
    /// Floating point value
    Float(f64),
    /// String value
    String(String),
    /// JSON document
    Json(JsonValue),
}

impl QueryParam {
    /// Check if this parameter is null.
    pub fn is_null(&self) -> bool {
        matches!(self, Self::Null)
    }

    /// Get the type name of this parameter for debugging.
    pub fn type_name(&self) -> &'static str {
        match self {
            Self::Null => "null",
            Self::Bool(_) => "bool",
            Self::Int(_) => "int",
            Self::Float(_) => "float",
            Self::String(_) => "string",
            Self::Json(_) => "json",
        }
    }
}

impl From<i64> for QueryParam {
    fn from(v: i64) -> Self {
        Self::Int(v)
    }
}

impl From<i32> for QueryParam {
    fn from(v: i32) -> Self {
        Self::Int(v as i64)
    }
}

impl From<bool> for QueryParam {
    fn from(v: bool) -> Self {
        Self::Bool(v)
    }
}

impl From<f64> for QueryParam {
    fn from(v: f64) -> Self {
        Self::Float(v)
    }
}

impl From<&str> for QueryParam {
    fn from(v: &str) -> Self {
        Self::String(v.to_string())
    }
}

impl From<String> for QueryParam {
    fn from(v: String) -> Self {
        Self::String(v)
    }
}

/// An ordered set of column values to insert.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Record {
    columns: Vec<(String, QueryParam)>,
}

impl Record {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a column value. A repeated column replaces the earlier value.
    pub fn with(mut self, column: impl Into<String>, value: impl Into<QueryParam>) -> Self {
        self.set(column, value);
        self
    }

    pub fn set(&mut self, column: impl Into<String>, value: impl Into<QueryParam>) {
        let column = column.into();
        let value = value.into();
        match self.columns.iter_mut().find(|(c, _)| *c == column) {
            Some(slot) => slot.1 = value,
            None => self.columns.push((column, value)),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.columns.is_empty()
    }

    pub fn len(&self) -> usize {
        self.columns.len()
    }

    pub fn columns(&self) -> impl Iterator<Item = &str> {
        self.columns.iter().map(|(c, _)| c.as_str())
    }

    pub fn values(&self) -> impl Iterator<Item = &QueryParam> {
        self.columns.iter().map(|(_, v)| v)
    }

    /// Render an INSERT statement for `table` with driver-specific placeholders.
    pub fn insert_sql(&self, table: &str, driver: Driver) -> ShardResult<String> {
        if self.columns.is_empty() {
            return Err(ShardError::invalid_input("Cannot insert an empty record"));
        }
        validate_identifier(table)?;
        for column in self.columns() {
            validate_identifier(column)?;
        }

        let columns: Vec<&str> = self.columns().collect();
        let placeholders: Vec<String> = (1..=self.columns.len())
            .map(|pos| driver.placeholder(pos))
            .collect();
        Ok(format!(
            "INSERT INTO {} ({}) VALUES ({})",
            table,
            columns.join(", "),
            placeholders.join(", ")
        ))
    }
}

/// Comparison operator of a [`Filter`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CompareOp {
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
    Like,
}

impl CompareOp {
    pub fn as_sql(&self) -> &'static str {
        match self {
            Self::Eq => "=",
            Self::Ne => "<>",
            Self::Lt => "<",
            Self::Le => "<=",
            Self::Gt => ">",
            Self::Ge => ">=",
            Self::Like => "LIKE",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Filter {
    pub column: String,
    pub op: CompareOp,
    pub value: QueryParam,
}

/// Conjunction of filters, applied identically to every physical table.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Predicate {
    #[serde(default)]
    pub filters: Vec<Filter>,
    /// Per-table ordering; merged output keeps it within each table.
    #[serde(default)]
    pub order_by: Option<String>,
    /// Per-table row limit.
    #[serde(default)]
    pub limit: Option<u32>,
}

impl Predicate {
    /// A predicate matching every row.
    pub fn all() -> Self {
        Self::default()
    }

    pub fn filter(
        mut self,
        column: impl Into<String>,
        op: CompareOp,
        value: impl Into<QueryParam>,
    ) -> Self {
        self.filters.push(Filter {
            column: column.into(),
            op,
            value: value.into(),
        });
        self
    }

    pub fn eq(self, column: impl Into<String>, value: impl Into<QueryParam>) -> Self {
        self.filter(column, CompareOp::Eq, value)
    }

    pub fn order_by(mut self, column: impl Into<String>) -> Self {
        self.order_by = Some(column.into());
        self
    }

    pub fn limit(mut self, limit: u32) -> Self {
        self.limit = Some(limit);
        self
    }

    /// Bind parameters in placeholder order.
    pub fn params(&self) -> Vec<QueryParam> {
        self.filters.iter().map(|f| f.value.clone()).collect()
    }

    /// Render the WHERE clause (with leading space), or an empty string.
    pub fn where_sql(&self, driver: Driver) -> ShardResult<String> {
        if self.filters.is_empty() {
            return Ok(String::new());
        }
        let mut clauses = Vec::with_capacity(self.filters.len());
        for (idx, filter) in self.filters.iter().enumerate() {
            validate_identifier(&filter.column)?;
            clauses.push(format!(
                "{} {} {}",
                filter.column,
                filter.op.as_sql(),
                driver.placeholder(idx + 1)
            ));
        }
        Ok(format!(" WHERE {}", clauses.join(" AND ")))
    }

    /// Render `SELECT * FROM <table> ...`.
    pub fn select_sql(&self, table: &str, driver: Driver) -> ShardResult<String> {
        validate_identifier(table)?;
        let mut sql = format!("SELECT * FROM {}{}", table, self.where_sql(driver)?);
        if let Some(column) = &self.order_by {
            validate_identifier(column)?;
            sql.push_str(&format!(" ORDER BY {}", column));
        }
        if let Some(limit) = self.limit {
            sql.push_str(&format!(" LIMIT {}", limit));
        }
        Ok(sql)
    }

    /// Render `SELECT COUNT(*) AS row_count FROM <table> ...`. Ordering and limit are ignored.
    pub fn count_sql(&self, table: &str, driver: Driver) -> ShardResult<String> {
        validate_identifier(table)?;
        Ok(format!(
            "SELECT COUNT(*) AS row_count FROM {}{}",
            table,
            self.where_sql(driver)?
        ))
    }
}

/// Validate a SQL identifier: `[A-Za-z_][A-Za-z0-9_]*`.
///
/// Identifiers are interpolated into SQL text, so anything else is rejected.
pub fn validate_identifier(ident: &str) -> ShardResult<()> {
    let mut chars = ident.chars();
    let valid = match chars.next() {
        Some(c) if c.is_ascii_alphabetic() || c == '_' => {
            chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
        }
        _ => false,
    };
    if valid {
        Ok(())
    } else {
        Err(ShardError::invalid_input(format!(
            "Invalid identifier '{}': use letters, digits and underscores only",
            ident
        )))
    }
}
