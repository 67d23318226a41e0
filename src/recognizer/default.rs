//! Convention-based (Default) matching strategy.
//!
//! Works without any user-supplied rules: column names are matched against
//! configurable templates derived from the star schema's own measure,
//! foreign-key and level names.

use super::{LevelHit, MatchStrategy};
use crate::config::ConventionSettings;
use crate::rules::RuleError;
use crate::star::{StarHierarchy, StarLevel, StarMeasure};
use once_cell::sync::Lazy;
use regex::Regex;

static DEFAULT_CONVENTIONS: Lazy<ConventionSettings> = Lazy::new(ConventionSettings::default);

/// Expand `{key}` placeholders in a template.
fn expand(template: &str, substitutions: &[(&str, &str)]) -> String {
    let mut out = template.to_string();
    for (key, value) in substitutions {
        out = out.replace(&format!("{{{}}}", key), value);
    }
    out
}

fn compile_anchored(pattern: &str, ignore_case: bool) -> Result<Regex, RuleError> {
    let anchored = if ignore_case {
        format!("(?i)^(?:{})$", pattern)
    } else {
        format!("^(?:{})$", pattern)
    };
    Regex::new(&anchored).map_err(|source| RuleError::InvalidPattern {
        pattern: pattern.to_string(),
        source,
    })
}

/// The Default recognizer's matchers, built once per star from convention
/// settings.
#[derive(Debug)]
pub struct DefaultStrategy {
    table_regex: Regex,
    ignore_regex: Option<Regex>,
    fact_count_name: String,
    measure_templates: Vec<String>,
    foreign_key_template: String,
    level_templates: Vec<String>,
    ignore_case: bool,
}

impl DefaultStrategy {
    /// Build from explicit convention settings for the given fact table.
    pub fn new(conventions: &ConventionSettings, fact_table: &str) -> Result<Self, RuleError> {
        let table_pattern = expand(&conventions.table_pattern, &[("fact_table", fact_table)]);
        let table_regex = compile_anchored(&table_pattern, conventions.ignore_case)?;
        let ignore_regex = match &conventions.ignore_pattern {
            Some(p) => Some(compile_anchored(p, conventions.ignore_case)?),
            None => None,
        };
        Ok(DefaultStrategy {
            table_regex,
            ignore_regex,
            fact_count_name: conventions.fact_count_name.clone(),
            measure_templates: conventions.measure_templates.clone(),
            foreign_key_template: conventions.foreign_key_template.clone(),
            level_templates: conventions.level_templates.clone(),
            ignore_case: conventions.ignore_case,
        })
    }

    /// Build from the built-in convention defaults.
    pub fn with_defaults(fact_table: &str) -> Result<Self, RuleError> {
        Self::new(&DEFAULT_CONVENTIONS, fact_table)
    }

    /// Candidate-table gate: whether a catalog table name is worth offering
    /// to this recognizer at all.
    pub fn table_matches(&self, table_name: &str) -> bool {
        self.table_regex.is_match(table_name)
    }

    fn names_equal(&self, a: &str, b: &str) -> bool {
        if self.ignore_case {
            a.eq_ignore_ascii_case(b)
        } else {
            a == b
        }
    }
}

impl MatchStrategy for DefaultStrategy {
    fn name(&self) -> &'static str {
        "default"
    }

    fn ignores(&self, column: &str) -> bool {
        self.ignore_regex
            .as_ref()
            .map(|r| r.is_match(column))
            .unwrap_or(false)
    }

    fn matches_fact_count(&self, column: &str) -> bool {
        self.names_equal(&self.fact_count_name, column)
    }

    fn matches_measure(&self, measure: &StarMeasure, column: &str) -> bool {
        let agg = measure.aggregator.suffix();
        self.measure_templates.iter().any(|t| {
            let candidate = expand(
                t,
                &[
                    ("measure_name", &measure.name),
                    ("column_name", &measure.column_name),
                    ("agg", agg),
                ],
            );
            self.names_equal(&candidate, column)
        })
    }

    fn matches_foreign_key(&self, fact_fk: &str, column: &str) -> bool {
        let candidate = expand(&self.foreign_key_template, &[("foreign_key_name", fact_fk)]);
        self.names_equal(&candidate, column)
    }

    fn level_match(
        &self,
        hierarchy: &StarHierarchy,
        level: &StarLevel,
        column: &str,
    ) -> Option<LevelHit> {
        let prefix = level.usage_prefix.as_deref().unwrap_or("");
        let hit = self.level_templates.iter().any(|t| {
            if t.contains("{usage_prefix}") && prefix.is_empty() {
                return false;
            }
            let candidate = expand(
                t,
                &[
                    ("hierarchy_name", &hierarchy.name),
                    ("level_name", &level.name),
                    ("level_column_name", &level.column_name),
                    ("usage_prefix", prefix),
                ],
            );
            self.names_equal(&candidate, column)
        });
        hit.then(LevelHit::default)
    }
}
