//! Metadata introspection trait.
//!
//! The `Introspector` trait abstracts over how physical table and column
//! metadata is fetched. Calls are synchronous: schema matching is a
//! single-threaded batch pass and blocks only on these metadata queries and
//! on the row-count estimate.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Errors surfaced by an introspection backend.
#[derive(Debug, thiserror::Error)]
pub enum IntrospectError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("backend error: {0}")]
    Backend(String),

    #[error("unknown table: '{0}'")]
    UnknownTable(String),
}

pub type IntrospectResult<T> = Result<T, IntrospectError>;

/// Physical kind of a catalog table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TableKind {
    Table,
    View,
}

/// SQL type of a physical column, reduced to what classification needs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SqlType {
    SmallInt,
    Integer,
    BigInt,
    Decimal,
    Float,
    Double,
    Varchar,
    Char,
    Date,
    Timestamp,
    Boolean,
}

impl SqlType {
    /// True for types that can hold a fact count or a measure.
    pub fn is_numeric(&self) -> bool {
        matches!(
            self,
            SqlType::SmallInt
                | SqlType::Integer
                | SqlType::BigInt
                | SqlType::Decimal
                | SqlType::Float
                | SqlType::Double
        )
    }

    /// Rough storage width in bytes, used for relative-cost estimation.
    pub fn width(&self) -> u64 {
        match self {
            SqlType::SmallInt => 2,
            SqlType::Integer | SqlType::Float | SqlType::Date => 4,
            SqlType::BigInt | SqlType::Double | SqlType::Timestamp => 8,
            SqlType::Decimal => 16,
            SqlType::Varchar | SqlType::Char => 32,
            SqlType::Boolean => 1,
        }
    }
}

/// Table entry returned by `list_tables`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TableMeta {
    pub name: String,
    pub kind: TableKind,
}

/// Column entry returned by `list_columns`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ColumnMeta {
    pub name: String,
    pub sql_type: SqlType,
    pub size: Option<u32>,
    pub nullable: bool,
}

/// Synchronous access to a database's catalog metadata.
pub trait Introspector {
    /// List all tables and views.
    fn list_tables(&self) -> IntrospectResult<Vec<TableMeta>>;

    /// List the columns of one table.
    fn list_columns(&self, table: &str) -> IntrospectResult<Vec<ColumnMeta>>;

    /// Run a `SELECT COUNT(*)`-style query and read back the row count.
    fn row_count(&self, table: &str) -> IntrospectResult<u64>;
}

/// In-memory introspector for tests and embedders without a live connection.
#[derive(Debug, Clone, Default)]
pub struct MemoryIntrospector {
    tables: Vec<TableMeta>,
    columns: HashMap<String, Vec<ColumnMeta>>,
    row_counts: HashMap<String, u64>,
    failing_counts: Vec<String>,
}

impl MemoryIntrospector {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a table with its columns. `columns` pairs are (name, type).
    pub fn add_table(&mut self, name: &str, columns: &[(&str, SqlType)], rows: u64) {
        self.tables.push(TableMeta {
            name: name.to_string(),
            kind: TableKind::Table,
        });
        self.columns.insert(
            name.to_string(),
            columns
                .iter()
                .map(|(n, t)| ColumnMeta {
                    name: n.to_string(),
                    sql_type: *t,
                    size: None,
                    nullable: true,
                })
                .collect(),
        );
        self.row_counts.insert(name.to_string(), rows);
    }

    /// Make `row_count` fail for one table, to exercise poisoned-cost paths.
    pub fn fail_row_count(&mut self, name: &str) {
        self.failing_counts.push(name.to_string());
    }
}

impl Introspector for MemoryIntrospector {
    fn list_tables(&self) -> IntrospectResult<Vec<TableMeta>> {
        Ok(self.tables.clone())
    }

    fn list_columns(&self, table: &str) -> IntrospectResult<Vec<ColumnMeta>> {
        self.columns
            .get(table)
            .cloned()
            .ok_or_else(|| IntrospectError::UnknownTable(table.to_string()))
    }

    fn row_count(&self, table: &str) -> IntrospectResult<u64> {
        if self.failing_counts.iter().any(|t| t == table) {
            return Err(IntrospectError::Backend(format!(
                "count query failed for '{}'",
                table
            )));
        }
        self.row_counts
            .get(table)
            .copied()
            .ok_or_else(|| IntrospectError::UnknownTable(table.to_string()))
    }
}
