//! Orchestration: one entry point turning a catalog, a star schema and
//! optional rules into query-ready summary-table descriptors.
//!
//! Catalog models are cached per connection key with a TTL; every pass starts
//! by flushing stale usages, so re-running after a rules change needs no
//! catalog reload. A pass over one star is independent of every other star:
//! `load_all` reports per-star failures without aborting the batch.

use crate::aggstar::{AggStar, AggStarError};
use crate::catalog::{
    CatalogError, ColumnUsage, DbCatalog, FkTarget, Introspector, TableRole,
};
use crate::config::Settings;
use crate::recognizer::{DefaultStrategy, ExplicitStrategy, Recognizer};
use crate::recorder::{MsgRecorder, RecorderError};
use crate::rules::{AggRuleGroup, RuleError};
use crate::star::{DimTarget, Star};
use std::collections::hash_map::Entry;
use std::collections::HashMap;
use std::time::{Duration, Instant};

/// Errors that abort one star's load pass.
#[derive(Debug, thiserror::Error)]
pub enum LoadError {
    #[error("fact table '{0}' not present in catalog")]
    MissingFactTable(String),

    #[error(transparent)]
    Catalog(#[from] CatalogError),

    #[error(transparent)]
    Rule(#[from] RuleError),

    #[error(transparent)]
    Recorder(#[from] RecorderError),

    #[error(transparent)]
    Descriptor(#[from] AggStarError),

    /// A table was selected as a candidate (by an explicit definition or the
    /// default table gate) but failed classification. Selection implies
    /// intent; a malformed candidate is a schema defect, not noise.
    #[error("candidate '{table}' of star '{star}' failed classification:\n{details}")]
    MalformedAggregate {
        star: String,
        table: String,
        details: String,
    },
}

/// One star's load result.
#[derive(Debug)]
pub struct StarAggregates {
    pub star_name: String,
    pub descriptors: Vec<AggStar>,
    /// Non-fatal diagnostics accumulated during the pass.
    pub warnings: Vec<String>,
}

/// Batch result of `load_all`.
#[derive(Debug, Default)]
pub struct LoadReport {
    pub stars: Vec<StarAggregates>,
    pub failures: Vec<(String, LoadError)>,
}

impl LoadReport {
    pub fn total_descriptors(&self) -> usize {
        self.stars.iter().map(|s| s.descriptors.len()).sum()
    }

    pub fn is_clean(&self) -> bool {
        self.failures.is_empty()
    }
}

struct CacheEntry {
    catalog: DbCatalog,
    loaded_at: Instant,
}

/// TTL cache of catalog models, keyed by connection identifier.
///
/// Passes are single-threaded; the mutex only makes the cache shareable
/// between embedder threads that run passes one at a time.
struct CatalogCache {
    entries: std::sync::Mutex<HashMap<String, CacheEntry>>,
    ttl: Duration,
}

impl CatalogCache {
    fn new(ttl: Duration) -> Self {
        CatalogCache {
            entries: std::sync::Mutex::new(HashMap::new()),
            ttl,
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<String, CacheEntry>> {
        self.entries.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Run `f` against the cached catalog for `key`, loading or reloading it
    /// first when absent or expired.
    fn with_catalog<T>(
        &self,
        key: &str,
        introspector: &dyn Introspector,
        f: impl FnOnce(&mut DbCatalog) -> T,
    ) -> Result<T, CatalogError> {
        let mut entries = self.lock();
        let now = Instant::now();

        let expired = entries
            .get(key)
            .map(|e| now.duration_since(e.loaded_at) > self.ttl)
            .unwrap_or(false);
        if expired {
            entries.remove(key);
        }

        let entry = match entries.entry(key.to_string()) {
            Entry::Occupied(e) => e.into_mut(),
            Entry::Vacant(v) => {
                let mut catalog = DbCatalog::new();
                catalog.load(introspector)?;
                tracing::info!(target: "aggmatch", "loaded catalog '{}'", key);
                v.insert(CacheEntry {
                    catalog,
                    loaded_at: now,
                })
            }
        };
        Ok(f(&mut entry.catalog))
    }

    fn evict(&self, key: &str) {
        self.lock().remove(key);
    }

    /// Drop every expired entry.
    fn sweep(&self) {
        let now = Instant::now();
        let ttl = self.ttl;
        self.lock()
            .retain(|_, e| now.duration_since(e.loaded_at) <= ttl);
    }
}

/// The aggregate-table manager: owns the settings and the catalog cache.
pub struct AggTableManager {
    settings: Settings,
    cache: CatalogCache,
}

impl AggTableManager {
    pub fn new(settings: Settings) -> Self {
        let ttl = Duration::from_secs(settings.catalog_cache_ttl_secs);
        AggTableManager {
            settings,
            cache: CatalogCache::new(ttl),
        }
    }

    pub fn with_defaults() -> Self {
        Self::new(Settings::default())
    }

    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    /// Drop the cached catalog for one connection key.
    pub fn evict_catalog(&self, key: &str) {
        self.cache.evict(key);
    }

    /// Drop every expired cached catalog.
    pub fn sweep_cache(&self) {
        self.cache.sweep();
    }

    /// Run one full recognition pass for a star: flush usages, bind the fact
    /// table, classify every candidate, and build descriptors for the
    /// accepted, non-empty ones.
    pub fn load_star(
        &self,
        key: &str,
        introspector: &dyn Introspector,
        star: &Star,
        rules: Option<&AggRuleGroup>,
    ) -> Result<StarAggregates, LoadError> {
        self.cache
            .with_catalog(key, introspector, |catalog| {
                self.run_pass(catalog, introspector, star, rules)
            })?
    }

    /// Load every star independently; one star's failure never blocks the
    /// others.
    pub fn load_all<'a>(
        &self,
        key: &str,
        introspector: &dyn Introspector,
        stars: impl IntoIterator<Item = (&'a Star, Option<&'a AggRuleGroup>)>,
    ) -> LoadReport {
        let mut report = LoadReport::default();
        for (star, rules) in stars {
            match self.load_star(key, introspector, star, rules) {
                Ok(aggs) => {
                    tracing::info!(
                        target: "aggmatch",
                        "star '{}': {} aggregate table(s) recognized",
                        aggs.star_name,
                        aggs.descriptors.len()
                    );
                    report.stars.push(aggs);
                }
                Err(err) => {
                    tracing::error!(target: "aggmatch", "star '{}': {}", star.name, err);
                    report.failures.push((star.name.clone(), err));
                }
            }
        }
        report
    }

    fn run_pass(
        &self,
        catalog: &mut DbCatalog,
        introspector: &dyn Introspector,
        star: &Star,
        rules: Option<&AggRuleGroup>,
    ) -> Result<StarAggregates, LoadError> {
        let mut recorder = MsgRecorder::new(self.settings.error_budget);
        recorder.push_context(star.name.clone());

        catalog.flush_usages();
        self.bind_fact_table(catalog, introspector, star, &mut recorder)?;

        if let Some(group) = rules {
            group.validate(star, &mut recorder)?;
        }
        let default_strategy = DefaultStrategy::new(&self.settings.conventions, &star.fact.relation)?;

        let mut descriptors = Vec::new();
        let names: Vec<String> = catalog.table_names().to_vec();
        for name in names {
            if name == star.fact.relation {
                continue;
            }
            if let Some(group) = rules {
                if group.is_excluded(&name) {
                    recorder.info(format!("table '{}' excluded by rule", name));
                    continue;
                }
            }

            let def = rules.and_then(|g| g.match_table(&name));
            if def.is_none() && !default_strategy.table_matches(&name) {
                continue;
            }

            let table = catalog
                .table_mut(&name)
                .ok_or_else(|| CatalogError::UnknownTable(name.clone()))?;
            if let Err(err) = table.load(introspector) {
                recorder.warn(format!("skipping candidate '{}': {}", name, err));
                continue;
            }

            let errors_before = recorder.error_count();
            let accepted = match def {
                Some(def) => {
                    let strategy = ExplicitStrategy::new(def);
                    Recognizer::new(star, &strategy).check(table, &mut recorder)?
                }
                None => Recognizer::new(star, &default_strategy).check(table, &mut recorder)?,
            };

            if !accepted {
                // Only this table's diagnostics; earlier findings (e.g. rule
                // validation) stay out of the failure message.
                return Err(LoadError::MalformedAggregate {
                    star: star.name.clone(),
                    table: name,
                    details: recorder.errors()[errors_before..].join("\n"),
                });
            }

            table.set_role(TableRole::Aggregate)?;

            let num_rows = match def.and_then(|d| d.approx_rows()) {
                Some(rows) => rows,
                None => match introspector.row_count(&name) {
                    Ok(rows) => rows,
                    Err(err) => {
                        recorder.warn(format!(
                            "row count failed for '{}', cost poisoned: {}",
                            name, err
                        ));
                        u64::MAX
                    }
                },
            };
            if num_rows == 0 {
                recorder.warn(format!("aggregate table '{}' is empty, skipped", name));
                continue;
            }

            descriptors.push(AggStar::build(star, table, num_rows)?);
        }

        recorder.pop_context();
        Ok(StarAggregates {
            star_name: star.name.clone(),
            descriptors,
            warnings: recorder.warnings().to_vec(),
        })
    }

    /// Bind the fact table definitionally from the star schema: its measure
    /// source columns and foreign keys are known, not matched.
    fn bind_fact_table(
        &self,
        catalog: &mut DbCatalog,
        introspector: &dyn Introspector,
        star: &Star,
        recorder: &mut MsgRecorder,
    ) -> Result<(), LoadError> {
        let fact = catalog
            .table_mut(&star.fact.relation)
            .ok_or_else(|| LoadError::MissingFactTable(star.fact.relation.clone()))?;
        fact.load(introspector)?;

        for measure in &star.measures {
            let usage = ColumnUsage::Measure {
                name: measure.name.clone(),
                aggregator: measure.aggregator,
                star_bit: measure.bit_position,
                source_column: measure.column_name.clone(),
            };
            if fact.add_usage(&measure.column_name, usage).is_err() {
                recorder.warn(format!(
                    "fact table has no column '{}' for measure '{}'",
                    measure.column_name, measure.name
                ));
            }
        }

        for dim in &star.dimensions {
            let target = match &dim.target {
                DimTarget::Table { alias } => FkTarget::Table {
                    alias: alias.clone(),
                },
                DimTarget::Embedded { bit } => FkTarget::Column { bit: *bit },
            };
            let usage = ColumnUsage::ForeignKey {
                fact_column: dim.foreign_key.clone(),
                target,
            };
            if fact.add_usage(&dim.foreign_key, usage).is_err() {
                recorder.warn(format!(
                    "fact table has no foreign key column '{}'",
                    dim.foreign_key
                ));
            }
        }

        fact.set_role(TableRole::Fact)?;
        Ok(())
    }
}
