//! Catalog model: an in-memory mirror of the physical database.
//!
//! The table list is loaded eagerly once per catalog; each table's columns
//! are loaded lazily, only when a name or pattern match makes that table a
//! candidate. Columns accumulate role usages while the recognizer runs;
//! `flush_usages` clears them all without forgetting column metadata.

mod introspect;

pub use introspect::{
    ColumnMeta, IntrospectError, IntrospectResult, Introspector, MemoryIntrospector, SqlType,
    TableKind, TableMeta,
};

use crate::star::{Aggregator, BitPos};
use std::collections::HashMap;

/// Errors raised by the catalog model.
#[derive(Debug, thiserror::Error)]
pub enum CatalogError {
    #[error("metadata introspection failed for '{table}': {source}")]
    Introspection {
        table: String,
        #[source]
        source: IntrospectError,
    },

    #[error("role of table '{table}' already set to {existing:?}")]
    RoleConflict { table: String, existing: TableRole },

    #[error("unknown catalog table: '{0}'")]
    UnknownTable(String),

    #[error("unknown column '{table}.{column}'")]
    UnknownColumn { table: String, column: String },
}

pub type CatalogResult<T> = Result<T, CatalogError>;

/// Usage classification of a whole catalog table. Set at most once.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TableRole {
    Fact,
    Aggregate,
}

/// What an aggregate foreign-key column points back to in the star schema.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FkTarget {
    /// The whole dimension subtree is present in the star.
    Table { alias: String },
    /// Embedded (non-shared) dimension: a single star column.
    Column { bit: BitPos },
}

/// A role usage attached to a catalog column during one recognizer run.
///
/// One variant per role, each carrying exactly the fields that role needs. A
/// column may carry more than one usage (e.g. a foreign key that also feeds a
/// distinct-count measure).
#[derive(Debug, Clone, PartialEq)]
pub enum ColumnUsage {
    /// Explicitly excluded from consideration.
    Ignore,
    /// Holds the number of raw fact rows each aggregate row represents.
    FactCount,
    /// An aggregated value.
    Measure {
        /// Symbolic measure name.
        name: String,
        aggregator: Aggregator,
        /// Bit of the corresponding star measure.
        star_bit: BitPos,
        /// Physical fact column the star measure aggregates.
        source_column: String,
    },
    /// A dimension join key.
    ForeignKey {
        /// Fact-table column holding the join key.
        fact_column: String,
        target: FkTarget,
    },
    /// A dimension attribute held directly because the dimension is collapsed
    /// to this level.
    Level {
        /// Bit of the owning star column.
        star_bit: BitPos,
        level_name: String,
        /// 1-based depth within the hierarchy.
        depth: usize,
        collapsed: bool,
    },
}

/// The five usage kinds, for queries that only care about the role.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UsageKind {
    Ignore,
    FactCount,
    Measure,
    ForeignKey,
    Level,
}

impl ColumnUsage {
    pub fn kind(&self) -> UsageKind {
        match self {
            ColumnUsage::Ignore => UsageKind::Ignore,
            ColumnUsage::FactCount => UsageKind::FactCount,
            ColumnUsage::Measure { .. } => UsageKind::Measure,
            ColumnUsage::ForeignKey { .. } => UsageKind::ForeignKey,
            ColumnUsage::Level { .. } => UsageKind::Level,
        }
    }
}

/// A mirrored physical column plus its accumulated usages.
#[derive(Debug, Clone, PartialEq)]
pub struct CatalogColumn {
    pub name: String,
    pub sql_type: SqlType,
    pub size: Option<u32>,
    pub nullable: bool,
    usages: Vec<ColumnUsage>,
}

impl CatalogColumn {
    fn from_meta(meta: ColumnMeta) -> Self {
        CatalogColumn {
            name: meta.name,
            sql_type: meta.sql_type,
            size: meta.size,
            nullable: meta.nullable,
            usages: Vec::new(),
        }
    }

    pub fn is_numeric(&self) -> bool {
        self.sql_type.is_numeric()
    }

    pub fn add_usage(&mut self, usage: ColumnUsage) {
        self.usages.push(usage);
    }

    pub fn usages(&self) -> &[ColumnUsage] {
        &self.usages
    }

    pub fn has_usage(&self, kind: UsageKind) -> bool {
        self.usages.iter().any(|u| u.kind() == kind)
    }

    pub fn is_unused(&self) -> bool {
        self.usages.is_empty()
    }
}

/// A mirrored physical table. Columns are loaded on demand.
#[derive(Debug, Clone, PartialEq)]
pub struct CatalogTable {
    pub name: String,
    pub kind: TableKind,
    role: Option<TableRole>,
    columns: Vec<CatalogColumn>,
    loaded: bool,
}

impl CatalogTable {
    fn from_meta(meta: TableMeta) -> Self {
        CatalogTable {
            name: meta.name,
            kind: meta.kind,
            role: None,
            columns: Vec::new(),
            loaded: false,
        }
    }

    /// Load this table's column list. Idempotent; one metadata query on the
    /// first call.
    pub fn load(&mut self, introspector: &dyn Introspector) -> CatalogResult<()> {
        if self.loaded {
            return Ok(());
        }
        let metas = introspector
            .list_columns(&self.name)
            .map_err(|source| CatalogError::Introspection {
                table: self.name.clone(),
                source,
            })?;
        self.columns = metas.into_iter().map(CatalogColumn::from_meta).collect();
        self.loaded = true;
        Ok(())
    }

    pub fn is_loaded(&self) -> bool {
        self.loaded
    }

    pub fn role(&self) -> Option<TableRole> {
        self.role
    }

    /// Classify the whole table. Changing an already-set role is an error.
    pub fn set_role(&mut self, role: TableRole) -> CatalogResult<()> {
        match self.role {
            None => {
                self.role = Some(role);
                Ok(())
            }
            Some(existing) if existing == role => Ok(()),
            Some(existing) => Err(CatalogError::RoleConflict {
                table: self.name.clone(),
                existing,
            }),
        }
    }

    pub fn columns(&self) -> &[CatalogColumn] {
        &self.columns
    }

    pub fn column(&self, name: &str) -> Option<&CatalogColumn> {
        self.columns.iter().find(|c| c.name == name)
    }

    pub fn column_mut(&mut self, name: &str) -> Option<&mut CatalogColumn> {
        self.columns.iter_mut().find(|c| c.name == name)
    }

    /// Attach a usage to a named column.
    pub fn add_usage(&mut self, column: &str, usage: ColumnUsage) -> CatalogResult<()> {
        match self.column_mut(column) {
            Some(col) => {
                col.add_usage(usage);
                Ok(())
            }
            None => Err(CatalogError::UnknownColumn {
                table: self.name.clone(),
                column: column.to_string(),
            }),
        }
    }

    /// Estimated row width from column types, for relative-cost ranking.
    pub fn estimated_row_width(&self) -> u64 {
        self.columns.iter().map(|c| c.sql_type.width()).sum()
    }

    fn flush_usages(&mut self) {
        for col in &mut self.columns {
            col.usages.clear();
        }
        self.role = None;
    }
}

/// The catalog model for one database connection.
#[derive(Debug, Clone, Default)]
pub struct DbCatalog {
    tables: HashMap<String, CatalogTable>,
    /// Deterministic iteration order for diagnostics.
    order: Vec<String>,
    loaded: bool,
}

impl DbCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Load the table list. Idempotent; one metadata query on the first call.
    pub fn load(&mut self, introspector: &dyn Introspector) -> CatalogResult<()> {
        if self.loaded {
            return Ok(());
        }
        let metas = introspector
            .list_tables()
            .map_err(|source| CatalogError::Introspection {
                table: "<table list>".to_string(),
                source,
            })?;
        for meta in metas {
            self.order.push(meta.name.clone());
            self.tables
                .insert(meta.name.clone(), CatalogTable::from_meta(meta));
        }
        self.order.sort();
        self.loaded = true;
        Ok(())
    }

    pub fn is_loaded(&self) -> bool {
        self.loaded
    }

    pub fn table(&self, name: &str) -> Option<&CatalogTable> {
        self.tables.get(name)
    }

    pub fn table_mut(&mut self, name: &str) -> Option<&mut CatalogTable> {
        self.tables.get_mut(name)
    }

    /// Table names in sorted order.
    pub fn table_names(&self) -> &[String] {
        &self.order
    }

    /// Clear every usage and role across all tables, keeping the mirrored
    /// metadata. Run before re-matching.
    pub fn flush_usages(&mut self) {
        for table in self.tables.values_mut() {
            table.flush_usages();
        }
    }
}
