//! Read-only star-schema collaborator model.
//!
//! The star schema (fact table, dimension tables, hierarchies, measures) is
//! an external input to this crate: it is consumed, never defined here. Every
//! measure and every dimension column reachable from the fact table arrives
//! with a stable bit position that joins this model to the catalog and to the
//! summary-table descriptors.

use crate::bitkey::BitKey;
use serde::{Deserialize, Serialize};
use std::fmt;

/// A bit position: a small integer, globally unique within one star schema.
pub type BitPos = usize;

/// Rollup aggregation function carried by measures.
///
/// `AvgFromSum` and `SumFromAvg` never come from the star schema itself; they
/// are the sibling-derived forms synthesized on aggregate measures when the
/// base schema models the same fact column as both a SUM and an AVG.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Aggregator {
    Sum,
    Count,
    Min,
    Max,
    Avg,
    DistinctCount,
    AvgFromSum,
    SumFromAvg,
}

impl Aggregator {
    /// The naming-convention token for this aggregator (e.g. `unit_sales_sum`).
    pub fn suffix(&self) -> &'static str {
        match self {
            Aggregator::Sum | Aggregator::SumFromAvg => "sum",
            Aggregator::Count => "count",
            Aggregator::Min => "min",
            Aggregator::Max => "max",
            Aggregator::Avg | Aggregator::AvgFromSum => "avg",
            Aggregator::DistinctCount => "distinct_count",
        }
    }

    /// True for distinct-count aggregators, which restrict further rollup.
    pub fn is_distinct(&self) -> bool {
        matches!(self, Aggregator::DistinctCount)
    }

    /// The derived aggregator for the missing half of a SUM/AVG sibling pair,
    /// given the half that is present.
    pub fn derive_sibling(present: Aggregator) -> Option<Aggregator> {
        match present {
            Aggregator::Sum => Some(Aggregator::AvgFromSum),
            Aggregator::Avg => Some(Aggregator::SumFromAvg),
            _ => None,
        }
    }
}

/// A column reference expression: `table_alias.column`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ColumnExpr {
    pub table: String,
    pub column: String,
}

impl ColumnExpr {
    pub fn new(table: impl Into<String>, column: impl Into<String>) -> Self {
        ColumnExpr {
            table: table.into(),
            column: column.into(),
        }
    }
}

impl fmt::Display for ColumnExpr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.table, self.column)
    }
}

/// The join condition tying a star table to its parent.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JoinCondition {
    /// Column on the parent side.
    pub left: ColumnExpr,
    /// Column on this table's side.
    pub right: ColumnExpr,
}

/// A column of a star table, identified by its global bit position.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StarColumn {
    pub name: String,
    pub table_alias: String,
    pub expr: ColumnExpr,
    pub bit_position: BitPos,
    /// Name columns (member captions) are presentation-only and never become
    /// aggregate levels.
    pub is_name_column: bool,
}

/// A node of the star schema's table tree: the fact table at the root,
/// dimension tables below it.
#[derive(Debug, Clone, PartialEq)]
pub struct StarTable {
    pub alias: String,
    /// Physical relation name.
    pub relation: String,
    /// Join to the parent table. `None` for the fact table.
    pub join: Option<JoinCondition>,
    pub columns: Vec<StarColumn>,
    pub children: Vec<StarTable>,
}

impl StarTable {
    /// Depth-first search for a descendant (or self) by alias.
    pub fn find_by_alias(&self, alias: &str) -> Option<&StarTable> {
        if self.alias == alias {
            return Some(self);
        }
        self.children.iter().find_map(|c| c.find_by_alias(alias))
    }

    fn find_column(&self, bit: BitPos) -> Option<&StarColumn> {
        self.columns
            .iter()
            .find(|c| c.bit_position == bit)
            .or_else(|| self.children.iter().find_map(|c| c.find_column(bit)))
    }
}

/// A measure of the fact table. Each measure is a star column in its own
/// right and owns its own bit position, even when two measures aggregate the
/// same physical column.
#[derive(Debug, Clone, PartialEq)]
pub struct StarMeasure {
    /// Symbolic name (e.g. `unit_sales`).
    pub name: String,
    pub aggregator: Aggregator,
    pub bit_position: BitPos,
    /// Physical fact-table column the measure aggregates.
    pub column_name: String,
    /// For distinct-count measures: the bit of the star column being counted.
    pub counted_bit: Option<BitPos>,
}

/// What a fact foreign key points at.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DimTarget {
    /// A shared dimension with a whole table subtree in the star.
    Table { alias: String },
    /// An embedded (non-shared) dimension: a single star column.
    Embedded { bit: BitPos },
}

/// A dimension joined to the fact table.
#[derive(Debug, Clone, PartialEq)]
pub struct StarDimension {
    pub name: String,
    /// Fact-table column holding the join key.
    pub foreign_key: String,
    pub target: DimTarget,
    pub hierarchies: Vec<StarHierarchy>,
}

/// A hierarchy of a dimension; levels are ordered root-down.
#[derive(Debug, Clone, PartialEq)]
pub struct StarHierarchy {
    pub name: String,
    pub levels: Vec<StarLevel>,
}

/// One level of a hierarchy.
#[derive(Debug, Clone, PartialEq)]
pub struct StarLevel {
    /// Symbolic level name (e.g. `Category`).
    pub name: String,
    /// 1-based depth from the hierarchy root.
    pub depth: usize,
    /// Bit of the star column holding this level's key.
    pub column_bit: BitPos,
    /// Physical column name in the dimension table.
    pub column_name: String,
    /// Whether members are unique within their parent. Non-collapsed rollups
    /// are only correct for unique-keyed levels.
    pub unique_members: bool,
    pub usage_prefix: Option<String>,
}

/// The star schema: the dimensional model this crate matches aggregates
/// against.
#[derive(Debug, Clone, PartialEq)]
pub struct Star {
    pub name: String,
    pub fact: StarTable,
    pub measures: Vec<StarMeasure>,
    pub dimensions: Vec<StarDimension>,
    /// Global column count; sizes every bitkey built for this star.
    pub column_count: usize,
}

impl Star {
    /// Look up a star column anywhere in the table tree by bit position.
    pub fn column_by_bit(&self, bit: BitPos) -> Option<&StarColumn> {
        self.fact.find_column(bit)
    }

    /// Find a table in the tree by alias.
    pub fn table_by_alias(&self, alias: &str) -> Option<&StarTable> {
        self.fact.find_by_alias(alias)
    }

    /// Locate the dimension/hierarchy/level owning a level column bit.
    pub fn find_level(&self, bit: BitPos) -> Option<(&StarDimension, &StarHierarchy, &StarLevel)> {
        for dim in &self.dimensions {
            for hier in &dim.hierarchies {
                for level in &hier.levels {
                    if level.column_bit == bit {
                        return Some((dim, hier, level));
                    }
                }
            }
        }
        None
    }

    /// The dimension whose fact foreign-key column is `fact_column`, if any.
    pub fn dimension_by_foreign_key(&self, fact_column: &str) -> Option<&StarDimension> {
        self.dimensions.iter().find(|d| d.foreign_key == fact_column)
    }

    /// Bits of every column on the tables along the join path from the fact
    /// table to the table owning `bit` (target table included, fact table
    /// excluded). Used to bound which levels a distinct-count measure can
    /// still be rolled up under.
    pub fn join_path_bits(&self, bit: BitPos) -> BitKey {
        let mut key = BitKey::new(self.column_count);
        let mut path: Vec<&StarTable> = Vec::new();
        if Self::path_to_column(&self.fact, bit, &mut path) {
            for table in path.iter().skip(1) {
                for col in &table.columns {
                    key.set(col.bit_position);
                }
            }
        }
        key
    }

    fn path_to_column<'a>(
        table: &'a StarTable,
        bit: BitPos,
        path: &mut Vec<&'a StarTable>,
    ) -> bool {
        path.push(table);
        if table.columns.iter().any(|c| c.bit_position == bit) {
            return true;
        }
        for child in &table.children {
            if Self::path_to_column(child, bit, path) {
                return true;
            }
        }
        path.pop();
        false
    }

    /// Fact columns modeled as both SUM and AVG, as (sum measure, avg
    /// measure) pairs. AVG is modeled as SUM over FACT_COUNT, so these pairs
    /// drive implied-measure derivation.
    pub fn sum_avg_pairs(&self) -> Vec<(&StarMeasure, &StarMeasure)> {
        let mut pairs = Vec::new();
        for sum in self
            .measures
            .iter()
            .filter(|m| m.aggregator == Aggregator::Sum)
        {
            for avg in self
                .measures
                .iter()
                .filter(|m| m.aggregator == Aggregator::Avg)
            {
                if sum.column_name == avg.column_name {
                    pairs.push((sum, avg));
                }
            }
        }
        pairs
    }
}
