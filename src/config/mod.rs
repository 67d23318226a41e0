//! TOML-based configuration.
//!
//! Example configuration:
//! ```toml
//! error_budget = 10
//! catalog_cache_ttl_secs = 600
//!
//! [conventions]
//! table_pattern = "agg_.*"
//! fact_count_name = "fact_count"
//! ignore_case = true
//! measure_templates = ["{measure_name}", "{measure_name}_{agg}", "{column_name}_{agg}"]
//! level_templates = ["{hierarchy_name}_{level_name}", "{level_column_name}", "{usage_prefix}{level_column_name}"]
//! ```

use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

/// Error type for settings.
#[derive(Debug, thiserror::Error)]
pub enum SettingsError {
    #[error("Config file not found: {0}")]
    FileNotFound(PathBuf),

    #[error("Failed to read config file: {0}")]
    ReadError(#[from] std::io::Error),

    #[error("Failed to parse config file: {0}")]
    ParseError(#[from] toml::de::Error),
}

/// Root configuration structure.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct Settings {
    /// Error ceiling per classification pass; exceeding it aborts the pass
    /// with a single aggregate error.
    pub error_budget: usize,

    /// TTL for cached catalog models, in seconds.
    pub catalog_cache_ttl_secs: u64,

    /// Default-recognizer naming conventions.
    pub conventions: ConventionSettings,
}

impl Default for Settings {
    fn default() -> Self {
        Settings {
            error_budget: 10,
            catalog_cache_ttl_secs: 600,
            conventions: ConventionSettings::default(),
        }
    }
}

/// Naming conventions driving the Default recognizer.
///
/// Templates substitute `{fact_table}`, `{measure_name}`, `{column_name}`,
/// `{agg}`, `{hierarchy_name}`, `{level_name}`, `{level_column_name}` and
/// `{usage_prefix}`.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ConventionSettings {
    /// Candidate-table gate pattern. `{fact_table}` is substituted before the
    /// regex is compiled.
    pub table_pattern: String,

    /// Optional pattern naming columns to ignore outright.
    pub ignore_pattern: Option<String>,

    /// Exact name of the fact-count column.
    pub fact_count_name: String,

    /// Templates an aggregate measure column name may take.
    pub measure_templates: Vec<String>,

    /// Template for aggregate foreign-key column names.
    pub foreign_key_template: String,

    /// Templates an aggregate level column name may take.
    pub level_templates: Vec<String>,

    /// Case-insensitive name comparison.
    pub ignore_case: bool,
}

impl Default for ConventionSettings {
    fn default() -> Self {
        ConventionSettings {
            table_pattern: "agg_.*".to_string(),
            ignore_pattern: None,
            fact_count_name: "fact_count".to_string(),
            measure_templates: vec![
                "{measure_name}".to_string(),
                "{measure_name}_{agg}".to_string(),
                "{column_name}_{agg}".to_string(),
            ],
            foreign_key_template: "{foreign_key_name}".to_string(),
            level_templates: vec![
                "{hierarchy_name}_{level_name}".to_string(),
                "{level_column_name}".to_string(),
                "{usage_prefix}{level_column_name}".to_string(),
            ],
            ignore_case: true,
        }
    }
}

impl Settings {
    /// Load settings from a TOML file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, SettingsError> {
        let path = path.as_ref();
        if !path.exists() {
            return Err(SettingsError::FileNotFound(path.to_path_buf()));
        }
        let content = fs::read_to_string(path)?;
        Self::from_toml_str(&content)
    }

    /// Parse settings from a TOML string.
    pub fn from_toml_str(content: &str) -> Result<Self, SettingsError> {
        Ok(toml::from_str(content)?)
    }
}
