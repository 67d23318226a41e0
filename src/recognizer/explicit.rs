//! Rule-driven (Explicit) matching strategy.
//!
//! Wraps the mappings of one matched table definition. All name comparison is
//! case-insensitive; levels are matched by unique level name, then by column
//! name.

use super::{LevelHit, MatchStrategy};
use crate::rules::{TableDef, TableMappings};
use crate::star::{Star, StarHierarchy, StarLevel, StarMeasure};

/// Fact-count column assumed when the definition declares none.
const DEFAULT_FACT_COUNT: &str = "fact_count";

/// The Explicit recognizer's matchers, borrowed from a matched definition.
#[derive(Debug)]
pub struct ExplicitStrategy<'a> {
    mappings: &'a TableMappings,
}

impl<'a> ExplicitStrategy<'a> {
    pub fn new(def: &'a TableDef) -> Self {
        ExplicitStrategy {
            mappings: def.mappings(),
        }
    }
}

impl MatchStrategy for ExplicitStrategy<'_> {
    fn name(&self) -> &'static str {
        "explicit"
    }

    fn ignores(&self, column: &str) -> bool {
        self.mappings
            .ignore_columns
            .iter()
            .any(|c| c.eq_ignore_ascii_case(column))
    }

    fn matches_fact_count(&self, column: &str) -> bool {
        let expected = self
            .mappings
            .fact_count_column
            .as_deref()
            .unwrap_or(DEFAULT_FACT_COUNT);
        expected.eq_ignore_ascii_case(column)
    }

    fn matches_measure(&self, measure: &StarMeasure, column: &str) -> bool {
        self.mappings
            .measures
            .iter()
            .any(|m| m.measure_name == measure.name && m.column.eq_ignore_ascii_case(column))
    }

    fn matches_foreign_key(&self, fact_fk: &str, column: &str) -> bool {
        self.mappings
            .foreign_keys
            .get(fact_fk)
            .map(|agg| agg.eq_ignore_ascii_case(column))
            .unwrap_or(false)
    }

    fn level_match(
        &self,
        _hierarchy: &StarHierarchy,
        level: &StarLevel,
        column: &str,
    ) -> Option<LevelHit> {
        self.mappings
            .levels
            .iter()
            .find(|m| m.level_name == level.name && m.column.eq_ignore_ascii_case(column))
            .map(|m| LevelHit {
                collapsed_override: m.collapsed,
            })
    }

    fn fk_rider_measure_column(&self, measure: &StarMeasure, star: &Star) -> Option<String> {
        let dim = star.dimension_by_foreign_key(&measure.column_name)?;
        self.mappings.foreign_keys.get(&dim.foreign_key).cloned()
    }
}
