//! User-authored aggregate matching and mapping rules.
//!
//! Rules arrive pre-parsed (the textual XML-like source is out of scope) as
//! one `AggRuleGroup` per fact table: exclusion rules plus table definitions,
//! each definition carrying explicit column mappings. Selection precedence:
//! group-level excludes are unconditional and checked first; exact name
//! definitions always beat pattern definitions; a pattern definition rejects
//! names matching its own nested excludes.

use crate::recorder::{MsgRecorder, RecorderResult};
use crate::star::Star;
use regex::Regex;
use std::collections::{HashMap, HashSet};

/// Errors raised while constructing rules.
#[derive(Debug, thiserror::Error)]
pub enum RuleError {
    #[error("invalid pattern '{pattern}': {source}")]
    InvalidPattern {
        pattern: String,
        #[source]
        source: regex::Error,
    },
}

/// An exact-name or regex name matcher, optionally case-insensitive.
#[derive(Debug, Clone)]
pub enum NameMatcher {
    Exact { name: String, ignore_case: bool },
    Pattern { pattern: String, regex: Regex },
}

impl NameMatcher {
    pub fn exact(name: impl Into<String>, ignore_case: bool) -> Self {
        NameMatcher::Exact {
            name: name.into(),
            ignore_case,
        }
    }

    /// Compile a regex matcher, anchored to the full name.
    pub fn pattern(pattern: &str, ignore_case: bool) -> Result<Self, RuleError> {
        let anchored = if ignore_case {
            format!("(?i)^(?:{})$", pattern)
        } else {
            format!("^(?:{})$", pattern)
        };
        let regex = Regex::new(&anchored).map_err(|source| RuleError::InvalidPattern {
            pattern: pattern.to_string(),
            source,
        })?;
        Ok(NameMatcher::Pattern {
            pattern: pattern.to_string(),
            regex,
        })
    }

    pub fn matches(&self, name: &str) -> bool {
        match self {
            NameMatcher::Exact {
                name: expected,
                ignore_case,
            } => {
                if *ignore_case {
                    expected.eq_ignore_ascii_case(name)
                } else {
                    expected == name
                }
            }
            NameMatcher::Pattern { regex, .. } => regex.is_match(name),
        }
    }
}

/// Exclusion rule declared against a fact table or nested under a pattern.
#[derive(Debug, Clone)]
pub struct ExcludeRule {
    pub matcher: NameMatcher,
}

impl ExcludeRule {
    pub fn new(matcher: NameMatcher) -> Self {
        ExcludeRule { matcher }
    }

    pub fn matches(&self, name: &str) -> bool {
        self.matcher.matches(name)
    }
}

/// Declared level mapping: symbolic level name to aggregate column, with an
/// optional explicit collapsed flag overriding the default.
#[derive(Debug, Clone, PartialEq)]
pub struct LevelMapping {
    pub level_name: String,
    pub column: String,
    pub collapsed: Option<bool>,
}

/// Declared measure mapping: symbolic measure name to aggregate column.
#[derive(Debug, Clone, PartialEq)]
pub struct MeasureMapping {
    pub measure_name: String,
    pub column: String,
}

/// The explicit column mappings shared by both table definition kinds.
#[derive(Debug, Clone, Default)]
pub struct TableMappings {
    /// Name of the fact-count column in the aggregate table.
    pub fact_count_column: Option<String>,
    /// Columns excluded from consideration.
    pub ignore_columns: Vec<String>,
    /// Fact FK column name -> aggregate FK column name.
    pub foreign_keys: HashMap<String, String>,
    pub levels: Vec<LevelMapping>,
    pub measures: Vec<MeasureMapping>,
}

/// Exact-name table definition, with an optional approximate row-count hint
/// that short-circuits the COUNT query.
#[derive(Debug, Clone)]
pub struct NameTableDef {
    pub name: String,
    pub ignore_case: bool,
    pub approx_rows: Option<u64>,
    pub mappings: TableMappings,
}

/// Pattern-based table definition with its own nested excludes.
#[derive(Debug, Clone)]
pub struct PatternTableDef {
    pub matcher: NameMatcher,
    pub excludes: Vec<ExcludeRule>,
    pub mappings: TableMappings,
}

impl PatternTableDef {
    pub fn new(
        pattern: &str,
        ignore_case: bool,
        excludes: Vec<ExcludeRule>,
        mappings: TableMappings,
    ) -> Result<Self, RuleError> {
        Ok(PatternTableDef {
            matcher: NameMatcher::pattern(pattern, ignore_case)?,
            excludes,
            mappings,
        })
    }
}

/// A table definition: exact name or pattern.
#[derive(Debug, Clone)]
pub enum TableDef {
    Name(NameTableDef),
    Pattern(PatternTableDef),
}

impl TableDef {
    pub fn mappings(&self) -> &TableMappings {
        match self {
            TableDef::Name(def) => &def.mappings,
            TableDef::Pattern(def) => &def.mappings,
        }
    }

    pub fn approx_rows(&self) -> Option<u64> {
        match self {
            TableDef::Name(def) => def.approx_rows,
            TableDef::Pattern(_) => None,
        }
    }

    /// Whether this definition selects the candidate name. Pattern
    /// definitions reject names matching their own excludes.
    pub fn matches(&self, name: &str) -> bool {
        match self {
            TableDef::Name(def) => {
                if def.ignore_case {
                    def.name.eq_ignore_ascii_case(name)
                } else {
                    def.name == name
                }
            }
            TableDef::Pattern(def) => {
                def.matcher.matches(name) && !def.excludes.iter().any(|e| e.matches(name))
            }
        }
    }

    fn describe(&self) -> String {
        match self {
            TableDef::Name(def) => format!("name '{}'", def.name),
            TableDef::Pattern(def) => match &def.matcher {
                NameMatcher::Pattern { pattern, .. } => format!("pattern '{}'", pattern),
                NameMatcher::Exact { name, .. } => format!("pattern '{}'", name),
            },
        }
    }
}

/// All rules declared for one fact table.
#[derive(Debug, Clone, Default)]
pub struct AggRuleGroup {
    /// Catalog name of the fact table this group applies to.
    pub fact_table: String,
    pub excludes: Vec<ExcludeRule>,
    pub tables: Vec<TableDef>,
}

impl AggRuleGroup {
    pub fn new(fact_table: impl Into<String>) -> Self {
        AggRuleGroup {
            fact_table: fact_table.into(),
            excludes: Vec::new(),
            tables: Vec::new(),
        }
    }

    /// Group-level exclusion: unconditional, checked before any definition.
    pub fn is_excluded(&self, table_name: &str) -> bool {
        self.excludes.iter().any(|e| e.matches(table_name))
    }

    /// Select the definition for a candidate name. Exact matches win over
    /// pattern matches; group exclusion wins over everything.
    pub fn match_table(&self, table_name: &str) -> Option<&TableDef> {
        if self.is_excluded(table_name) {
            return None;
        }
        self.tables
            .iter()
            .filter(|d| matches!(d, TableDef::Name(_)))
            .find(|d| d.matches(table_name))
            .or_else(|| {
                self.tables
                    .iter()
                    .filter(|d| matches!(d, TableDef::Pattern(_)))
                    .find(|d| d.matches(table_name))
            })
    }

    /// Validate the group against the star schema. Findings are non-fatal
    /// diagnostics; only blowing the recorder's budget aborts.
    pub fn validate(&self, star: &Star, recorder: &mut MsgRecorder) -> RecorderResult<()> {
        recorder.push_context(format!("rules[{}]", self.fact_table));
        let result = self.validate_inner(star, recorder);
        recorder.pop_context();
        result
    }

    fn validate_inner(&self, star: &Star, recorder: &mut MsgRecorder) -> RecorderResult<()> {
        let fact_fks: HashSet<&str> = star
            .dimensions
            .iter()
            .map(|d| d.foreign_key.as_str())
            .collect();
        let star_levels: HashSet<&str> = star
            .dimensions
            .iter()
            .flat_map(|d| &d.hierarchies)
            .flat_map(|h| &h.levels)
            .map(|l| l.name.as_str())
            .collect();
        let star_measures: HashSet<&str> =
            star.measures.iter().map(|m| m.name.as_str()).collect();

        for def in &self.tables {
            recorder.push_context(def.describe());
            let mappings = def.mappings();

            if let Some(fc) = &mappings.fact_count_column {
                if fc.is_empty() {
                    recorder.error("empty fact-count column name")?;
                }
            }
            for ignore in &mappings.ignore_columns {
                if ignore.is_empty() {
                    recorder.error("empty ignore-column name")?;
                }
            }

            let mut level_names = HashSet::new();
            let mut level_columns = HashSet::new();
            for level in &mappings.levels {
                if level.level_name.is_empty() || level.column.is_empty() {
                    recorder.error("level mapping with empty name or column")?;
                    continue;
                }
                if !level_names.insert(level.level_name.as_str()) {
                    recorder.error(format!(
                        "duplicate level name '{}' in one table definition",
                        level.level_name
                    ))?;
                }
                if !level_columns.insert(level.column.as_str()) {
                    recorder.error(format!(
                        "duplicate level column '{}' in one table definition",
                        level.column
                    ))?;
                }
                if !star_levels.contains(level.level_name.as_str()) {
                    recorder.error(format!(
                        "level '{}' does not exist in the star schema",
                        level.level_name
                    ))?;
                }
            }

            let mut measure_names = HashSet::new();
            let mut measure_columns = HashSet::new();
            for measure in &mappings.measures {
                if measure.measure_name.is_empty() || measure.column.is_empty() {
                    recorder.error("measure mapping with empty name or column")?;
                    continue;
                }
                if !measure_names.insert(measure.measure_name.as_str()) {
                    recorder.error(format!(
                        "duplicate measure name '{}' in one table definition",
                        measure.measure_name
                    ))?;
                }
                if !measure_columns.insert(measure.column.as_str()) {
                    recorder.error(format!(
                        "duplicate measure column '{}' in one table definition",
                        measure.column
                    ))?;
                }
                if !star_measures.contains(measure.measure_name.as_str()) {
                    recorder.error(format!(
                        "measure '{}' does not exist in the star schema",
                        measure.measure_name
                    ))?;
                }
            }

            for fact_fk in mappings.foreign_keys.keys() {
                if !fact_fks.contains(fact_fk.as_str()) {
                    recorder.error(format!(
                        "foreign key '{}' names no join condition on fact table '{}'",
                        fact_fk, star.fact.relation
                    ))?;
                }
            }

            recorder.pop_context();
        }
        Ok(())
    }
}
