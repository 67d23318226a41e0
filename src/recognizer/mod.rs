//! Column classification of candidate aggregate tables.
//!
//! One driver runs the phase algorithm; the Default and Explicit variants
//! differ only in the handful of matchers exposed through `MatchStrategy`.
//! `check` runs to completion accumulating diagnostics in one pass (a hard
//! error sets a sticky rejected flag rather than aborting), except where a
//! phase cannot proceed without an earlier phase's output.

mod default;
mod explicit;

pub use default::DefaultStrategy;
pub use explicit::ExplicitStrategy;

use crate::catalog::{CatalogTable, ColumnUsage, FkTarget, UsageKind};
use crate::recorder::{MsgRecorder, RecorderResult};
use crate::star::{Aggregator, DimTarget, Star, StarHierarchy, StarLevel, StarMeasure};
use std::collections::HashSet;

/// A successful level match, with an optional explicit collapsed override
/// (Explicit strategy only).
#[derive(Debug, Clone, Copy, Default)]
pub struct LevelHit {
    pub collapsed_override: Option<bool>,
}

/// The strategy-specific matchers of the classification algorithm.
pub trait MatchStrategy {
    /// Strategy name for diagnostics.
    fn name(&self) -> &'static str;

    /// Phase 1: should this column be excluded from all later phases?
    fn ignores(&self, column: &str) -> bool;

    /// Phase 2: does this column hold the fact count?
    fn matches_fact_count(&self, column: &str) -> bool;

    /// Phase 3: does this column hold the given star measure?
    fn matches_measure(&self, measure: &StarMeasure, column: &str) -> bool;

    /// Phase 5: does this column hold the aggregate side of the given fact
    /// foreign key?
    fn matches_foreign_key(&self, fact_fk: &str, column: &str) -> bool;

    /// Phase 6: does this column hold the given level?
    fn level_match(
        &self,
        hierarchy: &StarHierarchy,
        level: &StarLevel,
        column: &str,
    ) -> Option<LevelHit>;

    /// Phase 3 (Explicit only): the aggregate column carrying a "rider"
    /// measure for a star measure whose source column is a fact foreign key
    /// with an aggregate-FK mapping.
    fn fk_rider_measure_column(&self, _measure: &StarMeasure, _star: &Star) -> Option<String> {
        None
    }
}

/// The classification driver. One instance per candidate table check.
pub struct Recognizer<'a> {
    star: &'a Star,
    strategy: &'a dyn MatchStrategy,
    rejected: bool,
}

impl<'a> Recognizer<'a> {
    pub fn new(star: &'a Star, strategy: &'a dyn MatchStrategy) -> Self {
        Recognizer {
            star,
            strategy,
            rejected: false,
        }
    }

    /// Whether the last `check` rejected its table.
    pub fn is_rejected(&self) -> bool {
        self.rejected
    }

    fn reject(&mut self, recorder: &mut MsgRecorder, msg: impl AsRef<str>) -> RecorderResult<()> {
        self.rejected = true;
        recorder.error(msg)
    }

    /// Classify every column of `table`, returning `Ok(true)` on acceptance.
    /// All diagnostics accumulate in `recorder`; only blowing the error
    /// budget returns `Err`.
    pub fn check(
        &mut self,
        table: &mut CatalogTable,
        recorder: &mut MsgRecorder,
    ) -> RecorderResult<bool> {
        self.rejected = false;
        recorder.push_context(table.name.clone());

        let ignored = self.ignore_phase(table);
        self.fact_count_phase(table, &ignored, recorder)?;
        self.measure_phase(table, &ignored, recorder)?;
        self.implied_measure_phase(table);
        let unmatched = self.foreign_key_phase(table, &ignored, recorder)?;
        self.level_phase(table, &ignored, &unmatched, recorder)?;
        self.unused_phase(table, recorder);

        recorder.pop_context();
        Ok(!self.rejected)
    }

    /// Phase 1: mark ignored columns.
    fn ignore_phase(&self, table: &mut CatalogTable) -> HashSet<String> {
        let mut ignored = HashSet::new();
        let names: Vec<String> = table.columns().iter().map(|c| c.name.clone()).collect();
        for name in names {
            if self.strategy.ignores(&name) {
                if let Some(col) = table.column_mut(&name) {
                    col.add_usage(ColumnUsage::Ignore);
                }
                ignored.insert(name);
            }
        }
        ignored
    }

    fn candidate_names(&self, table: &CatalogTable, ignored: &HashSet<String>) -> Vec<String> {
        table
            .columns()
            .iter()
            .filter(|c| !ignored.contains(&c.name))
            .map(|c| c.name.clone())
            .collect()
    }

    /// Phase 2: exactly one numeric fact-count column.
    fn fact_count_phase(
        &mut self,
        table: &mut CatalogTable,
        ignored: &HashSet<String>,
        recorder: &mut MsgRecorder,
    ) -> RecorderResult<()> {
        let hits: Vec<String> = self
            .candidate_names(table, ignored)
            .into_iter()
            .filter(|n| self.strategy.matches_fact_count(n))
            .collect();

        match hits.len() {
            0 => self.reject(recorder, "no fact count column matched")?,
            1 => {
                let name = &hits[0];
                let numeric = table.column(name).map(|c| c.is_numeric()).unwrap_or(false);
                if numeric {
                    if let Some(col) = table.column_mut(name) {
                        col.add_usage(ColumnUsage::FactCount);
                    }
                } else {
                    self.reject(
                        recorder,
                        format!("fact count column '{}' is not numeric", name),
                    )?;
                }
            }
            _ => self.reject(
                recorder,
                format!("multiple fact count columns matched: {}", hits.join(", ")),
            )?,
        }
        Ok(())
    }

    /// Phase 3: per-measure matching plus the Explicit rider hook; at least
    /// one measure usage must exist afterward.
    fn measure_phase(
        &mut self,
        table: &mut CatalogTable,
        ignored: &HashSet<String>,
        recorder: &mut MsgRecorder,
    ) -> RecorderResult<()> {
        let candidates = self.candidate_names(table, ignored);
        let mut measure_count = 0usize;

        for measure in &self.star.measures {
            let hits: Vec<&String> = candidates
                .iter()
                .filter(|n| self.strategy.matches_measure(measure, n))
                .collect();

            match hits.len() {
                0 => {}
                1 => {
                    if let Some(col) = table.column_mut(hits[0]) {
                        col.add_usage(measure_usage(measure, measure.aggregator));
                        measure_count += 1;
                    }
                }
                _ => self.reject(
                    recorder,
                    format!(
                        "measure '{}' matched by multiple columns: {}",
                        measure.name,
                        hits.iter()
                            .map(|s| s.as_str())
                            .collect::<Vec<_>>()
                            .join(", ")
                    ),
                )?,
            }
        }

        // Measures riding along with a mapped foreign key (Explicit only).
        for measure in &self.star.measures {
            if let Some(column) = self.strategy.fk_rider_measure_column(measure, self.star) {
                let already_mapped = table.columns().iter().any(|c| {
                    c.usages().iter().any(|u| {
                        matches!(u, ColumnUsage::Measure { star_bit, .. }
                            if *star_bit == measure.bit_position)
                    })
                });
                if already_mapped || ignored.contains(&column) {
                    continue;
                }
                if let Some(col) = table.column_mut(&column) {
                    col.add_usage(measure_usage(measure, measure.aggregator));
                    measure_count += 1;
                }
            }
        }

        if measure_count == 0 {
            self.reject(recorder, "no measure columns matched")?;
        }
        Ok(())
    }

    /// Phase 4: synthesize the missing half of a SUM/AVG sibling pair on the
    /// same aggregate column.
    fn implied_measure_phase(&mut self, table: &mut CatalogTable) {
        for (sum_m, avg_m) in self.star.sum_avg_pairs() {
            let sum_col = column_with_measure_bit(table, sum_m.bit_position);
            let avg_col = column_with_measure_bit(table, avg_m.bit_position);

            match (sum_col, avg_col) {
                (Some(column), None) => {
                    if let Some(col) = table.column_mut(&column) {
                        col.add_usage(measure_usage(avg_m, Aggregator::AvgFromSum));
                    }
                }
                (None, Some(column)) => {
                    if let Some(col) = table.column_mut(&column) {
                        col.add_usage(measure_usage(sum_m, Aggregator::SumFromAvg));
                    }
                }
                _ => {}
            }
        }
    }

    /// Phase 5: match aggregate foreign keys; unmatched dimensions carry
    /// forward to the level phase.
    fn foreign_key_phase(
        &mut self,
        table: &mut CatalogTable,
        ignored: &HashSet<String>,
        recorder: &mut MsgRecorder,
    ) -> RecorderResult<Vec<usize>> {
        let candidates = self.candidate_names(table, ignored);
        let mut unmatched = Vec::new();

        for (idx, dim) in self.star.dimensions.iter().enumerate() {
            let hits: Vec<&String> = candidates
                .iter()
                .filter(|n| self.strategy.matches_foreign_key(&dim.foreign_key, n))
                .collect();

            match hits.len() {
                0 => unmatched.push(idx),
                1 => {
                    let target = match &dim.target {
                        DimTarget::Table { alias } => FkTarget::Table {
                            alias: alias.clone(),
                        },
                        DimTarget::Embedded { bit } => FkTarget::Column { bit: *bit },
                    };
                    if let Some(col) = table.column_mut(hits[0]) {
                        col.add_usage(ColumnUsage::ForeignKey {
                            fact_column: dim.foreign_key.clone(),
                            target,
                        });
                    }
                }
                _ => {
                    self.reject(
                        recorder,
                        format!(
                            "foreign key '{}' matched by multiple columns: {}",
                            dim.foreign_key,
                            hits.iter()
                                .map(|s| s.as_str())
                                .collect::<Vec<_>>()
                                .join(", ")
                        ),
                    )?;
                    unmatched.push(idx);
                }
            }
        }
        Ok(unmatched)
    }

    /// Phase 6: match collapsed levels for dimensions whose foreign key was
    /// not seen.
    fn level_phase(
        &mut self,
        table: &mut CatalogTable,
        ignored: &HashSet<String>,
        unmatched_dims: &[usize],
        recorder: &mut MsgRecorder,
    ) -> RecorderResult<()> {
        let candidates = self.candidate_names(table, ignored);

        for &dim_idx in unmatched_dims {
            let dim = &self.star.dimensions[dim_idx];
            for hierarchy in &dim.hierarchies {
                self.match_hierarchy(table, &candidates, hierarchy, recorder)?;
            }
        }
        Ok(())
    }

    fn match_hierarchy(
        &mut self,
        table: &mut CatalogTable,
        candidates: &[String],
        hierarchy: &StarHierarchy,
        recorder: &mut MsgRecorder,
    ) -> RecorderResult<()> {
        // Matched levels in depth order, walking root-down.
        let mut matched: Vec<(&StarLevel, String, LevelHit)> = Vec::new();

        for level in &hierarchy.levels {
            let hits: Vec<(&String, LevelHit)> = candidates
                .iter()
                .filter_map(|n| {
                    self.strategy
                        .level_match(hierarchy, level, n)
                        .map(|hit| (n, hit))
                })
                .collect();

            match hits.len() {
                0 => {}
                1 => matched.push((level, hits[0].0.clone(), hits[0].1)),
                _ => self.reject(
                    recorder,
                    format!(
                        "level '{}' of hierarchy '{}' matched by multiple columns",
                        level.name, hierarchy.name
                    ),
                )?,
            }
        }

        if matched.is_empty() {
            return Ok(());
        }

        // Contiguity: each matched level's predecessor in the list must be
        // its immediate parent.
        let mut valid = true;
        for i in 1..matched.len() {
            let (level, _, _) = matched[i];
            let (prev, _, _) = matched[i - 1];
            if level.depth != prev.depth + 1 {
                valid = false;
                self.reject(
                    recorder,
                    format!(
                        "hierarchy '{}': level '{}' at depth {} matched without its parent at depth {}",
                        hierarchy.name,
                        level.name,
                        level.depth,
                        level.depth - 1
                    ),
                )?;
            }
        }

        // Collapsed flags: a matched level is collapsed unless it is the
        // first match and sits below the hierarchy root. Explicit overrides
        // must stay internally consistent.
        let mut flags = Vec::with_capacity(matched.len());
        for (i, (level, _, hit)) in matched.iter().enumerate() {
            let default_collapsed = !(i == 0 && level.depth > 1);
            let collapsed = match hit.collapsed_override {
                None => default_collapsed,
                Some(true) => true,
                Some(false) => {
                    if i != 0 {
                        valid = false;
                        self.reject(
                            recorder,
                            format!(
                                "level '{}': only the first matched level may be non-collapsed",
                                level.name
                            ),
                        )?;
                    } else if level.depth == 1 {
                        valid = false;
                        self.reject(
                            recorder,
                            format!(
                                "level '{}' at depth 1 cannot be non-collapsed",
                                level.name
                            ),
                        )?;
                    } else if !level.unique_members {
                        valid = false;
                        self.reject(
                            recorder,
                            format!(
                                "level '{}' cannot be non-collapsed: members are not unique within their parent",
                                level.name
                            ),
                        )?;
                    }
                    false
                }
            };
            flags.push(collapsed);
        }

        if !valid {
            return Ok(());
        }

        for ((level, column, _), collapsed) in matched.iter().zip(flags) {
            if let Some(col) = table.column_mut(column) {
                col.add_usage(ColumnUsage::Level {
                    star_bit: level.column_bit,
                    level_name: level.name.clone(),
                    depth: level.depth,
                    collapsed,
                });
            }
        }
        Ok(())
    }

    /// Phase 7: after full success, warn per column carrying no usage.
    fn unused_phase(&self, table: &CatalogTable, recorder: &mut MsgRecorder) {
        if self.rejected {
            return;
        }
        for col in table.columns() {
            if col.is_unused() {
                recorder.warn(format!("unused column '{}'", col.name));
            }
        }
    }
}

fn measure_usage(measure: &StarMeasure, aggregator: Aggregator) -> ColumnUsage {
    ColumnUsage::Measure {
        name: measure.name.clone(),
        aggregator,
        star_bit: measure.bit_position,
        source_column: measure.column_name.clone(),
    }
}

fn column_with_measure_bit(table: &CatalogTable, bit: usize) -> Option<String> {
    table
        .columns()
        .iter()
        .find(|c| {
            c.usages()
                .iter()
                .any(|u| matches!(u, ColumnUsage::Measure { star_bit, .. } if *star_bit == bit))
        })
        .map(|c| c.name.clone())
}

/// Count usages of one kind across a table, for callers and tests.
pub fn usage_count(table: &CatalogTable, kind: UsageKind) -> usize {
    table
        .columns()
        .iter()
        .flat_map(|c| c.usages())
        .filter(|u| u.kind() == kind)
        .count()
}
