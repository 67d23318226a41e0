//! Summary-table descriptor ("AggStar").
//!
//! Built once, immutably, from a successfully classified candidate table: a
//! bit-indexed structure mirroring the star schema at the granularity of that
//! table. The builder first collects plain usage records in a fixed visit
//! order (fact count, measures, foreign keys, levels), then assembles every
//! derived bitkey from the finished record tree in one step; no nested node
//! mutates shared parent state while being constructed.

use crate::bitkey::BitKey;
use crate::catalog::{CatalogTable, ColumnUsage, FkTarget};
use crate::star::{Aggregator, BitPos, ColumnExpr, DimTarget, JoinCondition, Star, StarTable};
use std::collections::HashMap;

/// Construction errors. Apart from `MissingFactCount` these indicate a
/// contract violation between this crate and the star-schema collaborator,
/// not a data-matching failure.
#[derive(Debug, thiserror::Error)]
pub enum AggStarError {
    #[error("no fact count usage on classified table '{0}'")]
    MissingFactCount(String),

    #[error("dimension subtree '{alias}' not found in star schema")]
    UnknownDimension { alias: String },

    #[error("star table '{alias}' has no join condition to its parent")]
    MissingJoin { alias: String },

    #[error("ancestor level bit {bit} not found in star schema")]
    AncestorBitNotFound { bit: BitPos },

    #[error("level bit {bit} not found in star schema")]
    LevelBitNotFound { bit: BitPos },

    #[error("non-collapsed level bit {bit} belongs to an embedded dimension")]
    EmbeddedNonCollapsed { bit: BitPos },
}

/// A measure column of the descriptor.
#[derive(Debug, Clone, PartialEq)]
pub struct AggMeasure {
    /// Symbolic name.
    pub name: String,
    /// Physical column in the aggregate table.
    pub column: String,
    pub aggregator: Aggregator,
    pub bit_position: BitPos,
    /// For distinct-count measures: bits of the levels in this descriptor
    /// that are still safe to roll up under the measure.
    pub rollup_safe: Option<BitKey>,
}

/// A level column, held directly by the aggregate table or reached through a
/// dimension-table join.
#[derive(Debug, Clone, PartialEq)]
pub struct AggLevel {
    pub name: String,
    /// Physical column in the owning table.
    pub column: String,
    pub bit_position: BitPos,
    pub collapsed: bool,
    /// For non-collapsed levels: bits of the implied ancestor levels, safe to
    /// roll up through this level's join.
    pub rollup_bitkey: Option<BitKey>,
}

/// A dimension-table node joined under the descriptor's fact node.
#[derive(Debug, Clone, PartialEq)]
pub struct AggDimTable {
    pub alias: String,
    pub relation: String,
    pub join: JoinCondition,
    pub levels: Vec<AggLevel>,
    pub children: Vec<AggDimTable>,
    /// True when this subtree exists only to reach the implied ancestors of
    /// a non-collapsed level.
    pub join_only: bool,
}

impl AggDimTable {
    /// The deepest table of this subtree (itself when it has no children).
    pub fn last_descendant(&self) -> &AggDimTable {
        match self.children.last() {
            Some(child) => child.last_descendant(),
            None => self,
        }
    }
}

/// The descriptor's fact node.
#[derive(Debug, Clone, PartialEq)]
pub struct AggFactTable {
    /// Physical aggregate table name.
    pub name: String,
    /// Cached, not bit-indexed.
    pub fact_count_column: String,
    pub measures: Vec<AggMeasure>,
    /// Levels held directly (collapsed rollups and embedded dimensions).
    pub levels: Vec<AggLevel>,
    pub dimensions: Vec<AggDimTable>,
}

/// What a bit position resolves to within one descriptor.
#[derive(Debug, Clone, PartialEq)]
pub enum AggColumn {
    Measure {
        bit: BitPos,
        column: String,
    },
    Level {
        bit: BitPos,
        column: String,
        table: String,
        collapsed: bool,
    },
    /// Synthetic column reachable only through a join, standing in for an
    /// ancestor of a non-collapsed level.
    JoinOnly {
        bit: BitPos,
        table: String,
        expr: ColumnExpr,
    },
}

/// The query-ready summary-table descriptor.
#[derive(Debug, Clone, PartialEq)]
pub struct AggStar {
    pub fact: AggFactTable,
    bitkey: BitKey,
    level_bitkey: BitKey,
    measure_bitkey: BitKey,
    distinct_measure_bitkey: BitKey,
    foreign_key_bitkey: BitKey,
    columns: HashMap<BitPos, AggColumn>,
    num_rows: u64,
    row_width: u64,
}

impl AggStar {
    /// Build a descriptor from a fully classified candidate table.
    pub fn build(star: &Star, table: &CatalogTable, num_rows: u64) -> Result<AggStar, AggStarError> {
        let records = UsageRecords::collect(table);
        let fact_count_column = records
            .fact_count
            .clone()
            .ok_or_else(|| AggStarError::MissingFactCount(table.name.clone()))?;

        let mut fact = AggFactTable {
            name: table.name.clone(),
            fact_count_column,
            measures: Vec::new(),
            levels: Vec::new(),
            dimensions: Vec::new(),
        };

        for rec in &records.measures {
            fact.measures.push(AggMeasure {
                name: rec.name.clone(),
                column: rec.column.clone(),
                aggregator: rec.aggregator,
                bit_position: rec.star_bit,
                rollup_safe: None,
            });
        }

        for rec in &records.foreign_keys {
            match &rec.target {
                FkTarget::Table { alias } => {
                    let subtree = star
                        .table_by_alias(alias)
                        .ok_or_else(|| AggStarError::UnknownDimension {
                            alias: alias.clone(),
                        })?;
                    let exclude = BitKey::new(star.column_count);
                    let dim =
                        convert_subtree(subtree, &table.name, &rec.column, None, &exclude, false)?;
                    fact.dimensions.push(dim);
                }
                FkTarget::Column { bit } => {
                    let star_col = star
                        .column_by_bit(*bit)
                        .ok_or(AggStarError::LevelBitNotFound { bit: *bit })?;
                    fact.levels.push(AggLevel {
                        name: star_col.name.clone(),
                        column: rec.column.clone(),
                        bit_position: *bit,
                        collapsed: true,
                        rollup_bitkey: None,
                    });
                }
            }
        }

        // Collapsed levels first: the non-collapsed pass must know every bit
        // already held directly.
        let mut held = BitKey::new(star.column_count);
        for rec in records.levels.iter().filter(|r| r.collapsed) {
            held.set(rec.star_bit);
            fact.levels.push(AggLevel {
                name: rec.level_name.clone(),
                column: rec.column.clone(),
                bit_position: rec.star_bit,
                collapsed: true,
                rollup_bitkey: None,
            });
        }

        for rec in records.levels.iter().filter(|r| !r.collapsed) {
            held.set(rec.star_bit);
            let rollup = attach_non_collapsed(star, table, &mut fact, rec, &held)?;
            fact.levels.push(AggLevel {
                name: rec.level_name.clone(),
                column: rec.column.clone(),
                bit_position: rec.star_bit,
                collapsed: false,
                rollup_bitkey: Some(rollup),
            });
        }

        Ok(Self::assemble(star, fact, table.estimated_row_width(), num_rows))
    }

    /// Compute every derived bitkey and the bit-position lookup map from the
    /// finished record tree.
    fn assemble(star: &Star, mut fact: AggFactTable, row_width: u64, num_rows: u64) -> AggStar {
        let n = star.column_count;
        let mut bitkey = BitKey::new(n);
        let mut level_bitkey = BitKey::new(n);
        let mut measure_bitkey = BitKey::new(n);
        let mut distinct_measure_bitkey = BitKey::new(n);
        let mut foreign_key_bitkey = BitKey::new(n);
        let mut columns: HashMap<BitPos, AggColumn> = HashMap::new();

        for m in &fact.measures {
            bitkey.set(m.bit_position);
            measure_bitkey.set(m.bit_position);
            columns.entry(m.bit_position).or_insert(AggColumn::Measure {
                bit: m.bit_position,
                column: m.column.clone(),
            });
        }

        for l in &fact.levels {
            bitkey.set(l.bit_position);
            level_bitkey.set(l.bit_position);
            columns.entry(l.bit_position).or_insert(AggColumn::Level {
                bit: l.bit_position,
                column: l.column.clone(),
                table: fact.name.clone(),
                collapsed: l.collapsed,
            });
        }

        for dim in &fact.dimensions {
            Self::assemble_dim(
                dim,
                &mut bitkey,
                &mut level_bitkey,
                &mut foreign_key_bitkey,
                &mut columns,
            );
        }

        // Distinct-count rollup restriction needs the full level tree.
        for m in &mut fact.measures {
            if !m.aggregator.is_distinct() {
                continue;
            }
            distinct_measure_bitkey.set(m.bit_position);
            let counted = star
                .measures
                .iter()
                .find(|sm| sm.bit_position == m.bit_position)
                .and_then(|sm| sm.counted_bit);
            let safe = match counted {
                Some(bit) => star.join_path_bits(bit).intersect(&level_bitkey),
                None => BitKey::new(n),
            };
            m.rollup_safe = Some(safe);
        }

        AggStar {
            fact,
            bitkey,
            level_bitkey,
            measure_bitkey,
            distinct_measure_bitkey,
            foreign_key_bitkey,
            columns,
            num_rows,
            row_width,
        }
    }

    fn assemble_dim(
        dim: &AggDimTable,
        bitkey: &mut BitKey,
        level_bitkey: &mut BitKey,
        foreign_key_bitkey: &mut BitKey,
        columns: &mut HashMap<BitPos, AggColumn>,
    ) {
        for l in &dim.levels {
            bitkey.set(l.bit_position);
            level_bitkey.set(l.bit_position);
            foreign_key_bitkey.set(l.bit_position);
            let entry = if dim.join_only {
                AggColumn::JoinOnly {
                    bit: l.bit_position,
                    table: dim.alias.clone(),
                    expr: ColumnExpr::new(dim.alias.clone(), l.column.clone()),
                }
            } else {
                AggColumn::Level {
                    bit: l.bit_position,
                    column: l.column.clone(),
                    table: dim.alias.clone(),
                    collapsed: false,
                }
            };
            columns.entry(l.bit_position).or_insert(entry);
        }
        for child in &dim.children {
            Self::assemble_dim(child, bitkey, level_bitkey, foreign_key_bitkey, columns);
        }
    }

    /// All covered star columns.
    pub fn bitkey(&self) -> &BitKey {
        &self.bitkey
    }

    /// Dimension/foreign-key columns.
    pub fn level_bitkey(&self) -> &BitKey {
        &self.level_bitkey
    }

    pub fn measure_bitkey(&self) -> &BitKey {
        &self.measure_bitkey
    }

    pub fn distinct_measure_bitkey(&self) -> &BitKey {
        &self.distinct_measure_bitkey
    }

    /// Star columns reached through a join rather than held directly.
    pub fn foreign_key_bitkey(&self) -> &BitKey {
        &self.foreign_key_bitkey
    }

    /// Resolve a bit position. `None` (bit not covered here) is a normal
    /// outcome, not an error.
    pub fn lookup(&self, bit: BitPos) -> Option<&AggColumn> {
        self.columns.get(&bit)
    }

    /// True iff every level present is collapsed; the planner then knows no
    /// additional join is ever needed.
    pub fn is_fully_collapsed(&self) -> bool {
        self.fact.levels.iter().all(|l| l.collapsed)
            && self.fact.dimensions.is_empty()
    }

    pub fn num_rows(&self) -> u64 {
        self.num_rows
    }

    /// Relative cost for ranking among matching descriptors: row count times
    /// estimated row width.
    pub fn cost(&self) -> u64 {
        self.num_rows.saturating_mul(self.row_width.max(1))
    }

    /// Can this descriptor answer a request?
    ///
    /// True iff the measures are covered and either the level bitkeys match
    /// exactly, or this descriptor covers extra levels that are identical
    /// whether or not `core_levels` are subtracted from both sides first —
    /// i.e. extra coverage is acceptable only along dimensions unrelated to
    /// any distinct-count rollup restriction.
    pub fn select(
        &self,
        requested_levels: &BitKey,
        core_levels: &BitKey,
        requested_measures: &BitKey,
    ) -> bool {
        if !self.measure_bitkey.is_superset_of(requested_measures) {
            return false;
        }
        if self.level_bitkey == *requested_levels {
            return true;
        }
        if !self.level_bitkey.is_superset_of(requested_levels) {
            return false;
        }
        let extra = self.level_bitkey.minus(requested_levels);
        let extra_after_core = self
            .level_bitkey
            .minus(core_levels)
            .minus(&requested_levels.minus(core_levels));
        extra == extra_after_core
    }

    /// The distinct-restricted core for a requested measure set: every level
    /// of this descriptor that some requested distinct-count measure forbids
    /// rolling up.
    pub fn core_levels_for(&self, requested_measures: &BitKey) -> BitKey {
        let mut core = BitKey::new(self.level_bitkey.universe());
        for m in &self.fact.measures {
            if !requested_measures.contains(m.bit_position) {
                continue;
            }
            if let Some(safe) = &m.rollup_safe {
                core.or_with(&self.level_bitkey.minus(safe));
            }
        }
        core
    }
}

struct MeasureRec {
    column: String,
    name: String,
    aggregator: Aggregator,
    star_bit: BitPos,
}

struct FkRec {
    column: String,
    target: FkTarget,
}

struct LevelRec {
    column: String,
    star_bit: BitPos,
    level_name: String,
    collapsed: bool,
}

/// Usages of a classified table, separated by kind in visit order.
struct UsageRecords {
    fact_count: Option<String>,
    measures: Vec<MeasureRec>,
    foreign_keys: Vec<FkRec>,
    levels: Vec<LevelRec>,
}

impl UsageRecords {
    fn collect(table: &CatalogTable) -> UsageRecords {
        let mut records = UsageRecords {
            fact_count: None,
            measures: Vec::new(),
            foreign_keys: Vec::new(),
            levels: Vec::new(),
        };
        for col in table.columns() {
            for usage in col.usages() {
                match usage {
                    ColumnUsage::Ignore => {}
                    ColumnUsage::FactCount => records.fact_count = Some(col.name.clone()),
                    ColumnUsage::Measure {
                        name,
                        aggregator,
                        star_bit,
                        ..
                    } => records.measures.push(MeasureRec {
                        column: col.name.clone(),
                        name: name.clone(),
                        aggregator: *aggregator,
                        star_bit: *star_bit,
                    }),
                    ColumnUsage::ForeignKey { target, .. } => records.foreign_keys.push(FkRec {
                        column: col.name.clone(),
                        target: target.clone(),
                    }),
                    ColumnUsage::Level {
                        star_bit,
                        level_name,
                        collapsed,
                        ..
                    } => records.levels.push(LevelRec {
                        column: col.name.clone(),
                        star_bit: *star_bit,
                        level_name: level_name.clone(),
                        collapsed: *collapsed,
                    }),
                }
            }
        }
        records
    }
}

/// Convert a star dimension subtree into descriptor dimension tables.
///
/// The top join substitutes the aggregate table's own name and column on the
/// left side; with `right_override` (the non-collapsed case) the right side
/// is the star column's own expression rather than the table's generic
/// parent-join column. `exclude` drops columns already held directly.
fn convert_subtree(
    subtree: &StarTable,
    agg_table: &str,
    agg_column: &str,
    right_override: Option<&ColumnExpr>,
    exclude: &BitKey,
    join_only: bool,
) -> Result<AggDimTable, AggStarError> {
    let star_join = subtree.join.as_ref().ok_or_else(|| AggStarError::MissingJoin {
        alias: subtree.alias.clone(),
    })?;
    let join = JoinCondition {
        left: ColumnExpr::new(agg_table, agg_column),
        right: right_override.cloned().unwrap_or_else(|| star_join.right.clone()),
    };

    let levels = subtree
        .columns
        .iter()
        .filter(|c| !c.is_name_column && !exclude.contains(c.bit_position))
        .map(|c| AggLevel {
            name: c.name.clone(),
            column: c.name.clone(),
            bit_position: c.bit_position,
            collapsed: false,
            rollup_bitkey: None,
        })
        .collect();

    let mut children = Vec::new();
    for child in &subtree.children {
        let child_join = child.join.as_ref().ok_or_else(|| AggStarError::MissingJoin {
            alias: child.alias.clone(),
        })?;
        children.push(convert_child(
            child,
            child_join.clone(),
            exclude,
            join_only,
        )?);
    }

    Ok(AggDimTable {
        alias: subtree.alias.clone(),
        relation: subtree.relation.clone(),
        join,
        levels,
        children,
        join_only,
    })
}

fn convert_child(
    table: &StarTable,
    join: JoinCondition,
    exclude: &BitKey,
    join_only: bool,
) -> Result<AggDimTable, AggStarError> {
    let levels = table
        .columns
        .iter()
        .filter(|c| !c.is_name_column && !exclude.contains(c.bit_position))
        .map(|c| AggLevel {
            name: c.name.clone(),
            column: c.name.clone(),
            bit_position: c.bit_position,
            collapsed: false,
            rollup_bitkey: None,
        })
        .collect();

    let mut children = Vec::new();
    for child in &table.children {
        let child_join = child.join.as_ref().ok_or_else(|| AggStarError::MissingJoin {
            alias: child.alias.clone(),
        })?;
        children.push(convert_child(child, child_join.clone(), exclude, join_only)?);
    }

    Ok(AggDimTable {
        alias: table.alias.clone(),
        relation: table.relation.clone(),
        join,
        levels,
        children,
        join_only,
    })
}

/// Handle a non-collapsed level: resolve its hierarchy, verify every implied
/// ancestor bit exists in the star, attach one join-only subtree reaching
/// them, and return the level's rollup bitkey.
fn attach_non_collapsed(
    star: &Star,
    table: &CatalogTable,
    fact: &mut AggFactTable,
    rec: &LevelRec,
    held: &BitKey,
) -> Result<BitKey, AggStarError> {
    let (dim, hierarchy, level) = star
        .find_level(rec.star_bit)
        .ok_or(AggStarError::LevelBitNotFound { bit: rec.star_bit })?;
    let alias = match &dim.target {
        DimTarget::Table { alias } => alias.clone(),
        DimTarget::Embedded { .. } => {
            return Err(AggStarError::EmbeddedNonCollapsed { bit: rec.star_bit });
        }
    };
    let subtree = star
        .table_by_alias(&alias)
        .ok_or_else(|| AggStarError::UnknownDimension {
            alias: alias.clone(),
        })?;
    let level_expr = star
        .column_by_bit(rec.star_bit)
        .ok_or(AggStarError::LevelBitNotFound { bit: rec.star_bit })?
        .expr
        .clone();

    let mut rollup = BitKey::new(star.column_count);
    for ancestor in hierarchy.levels.iter().filter(|l| l.depth < level.depth) {
        if held.contains(ancestor.column_bit) {
            continue;
        }
        star.column_by_bit(ancestor.column_bit)
            .ok_or(AggStarError::AncestorBitNotFound {
                bit: ancestor.column_bit,
            })?;
        rollup.set(ancestor.column_bit);
    }

    if !rollup.is_empty() && !fact.dimensions.iter().any(|d| d.alias == alias) {
        // Only the implied ancestors live on the join-only subtree; the
        // non-collapsed level's own column is held directly.
        let mut exclude = held.clone();
        exclude_non_rollup(subtree, &rollup, &mut exclude);
        let dim_table = convert_subtree(
            subtree,
            &table.name,
            &rec.column,
            Some(&level_expr),
            &exclude,
            true,
        )?;
        fact.dimensions.push(dim_table);
    }

    Ok(rollup)
}

/// Mark every column of the subtree, descendants included, that is not an
/// implied ancestor; the join-only conversion then carries the ancestors and
/// nothing else.
fn exclude_non_rollup(table: &StarTable, rollup: &BitKey, exclude: &mut BitKey) {
    for col in &table.columns {
        if !rollup.contains(col.bit_position) {
            exclude.set(col.bit_position);
        }
    }
    for child in &table.children {
        exclude_non_rollup(child, rollup, exclude);
    }
}
