//! Two-stage pipeline orchestration
//!
//! partition → fit → extract → aggregate → derive → join → test → extract →
//! aggregate → correct
//!
//! Entities are independent until correction. Per-entity work runs through
//! [`map_ordered`], so results come back in entity order whether or not the
//! `rayon` feature is used. Each fitted model is reduced to its tidy rows
//! inside the per-entity closure and dropped there.
//!
//! ```rust
//! use groupwise::{CovariateTable, ObservationTable, Pipeline};
//!
//! let mut builder = ObservationTable::builder("protein", &["run", "feature"], "log2_intensity");
//! for (run, base) in [("R1", 1.0), ("R2", 1.2), ("R3", 3.0), ("R4", 3.3)] {
//!     builder = builder
//!         .row("P1", &[run, "F1"], Some(base))
//!         .row("P1", &[run, "F2"], Some(base + 0.5));
//! }
//! let table = builder.build()?;
//! let covariates = CovariateTable::builder("run", &["condition"])
//!     .row("R1", &["A"])
//!     .row("R2", &["A"])
//!     .row("R3", &["B"])
//!     .row("R4", &["B"])
//!     .build()?;
//!
//! let report = Pipeline::builder().build()?.run(&table, &covariates)?;
//! assert_eq!(report.tested(), 1);
//! # Ok::<(), groupwise::Error>(())
//! ```

use crate::aggregate::{Aggregator, EntityResult};
use crate::config::PipelineConfig;
use crate::correction::{correct, CorrectionMethod, TestResult};
use crate::derive::{derive, left_join, DerivedSummary, TermRule};
use crate::error::EntityFailure;
use crate::model::{LinearFit, TestMethod};
use crate::parallel::map_ordered;
use crate::partition::Partitions;
use crate::report::{AnalysisReport, ExcludedEntity, Stage};
use crate::second_stage::SecondStageTester;
use crate::storage::{CovariateTable, ObservationTable};
use crate::tidy::{CoefficientRecord, ModelRecord, ObservationRecord};
use crate::{Error, Result};
use rustc_hash::FxHashSet;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

/// First-stage output: aggregated tidy tables plus exclusions
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FirstStage {
    /// Coefficient-level rows of every fitted entity
    pub coefficients: Vec<EntityResult<CoefficientRecord>>,
    /// One model-level row per fitted entity
    pub models: Vec<EntityResult<ModelRecord>>,
    /// Observation-level rows, when requested
    pub observations: Option<Vec<EntityResult<ObservationRecord>>>,
    /// Entities whose fit failed
    pub excluded: Vec<ExcludedEntity>,
    /// Entities present in the input
    pub entities: usize,
}

impl FirstStage {
    /// Entities fitted successfully, in input order
    pub fn fitted_entities(&self) -> impl Iterator<Item = &str> {
        self.models.iter().map(|m| m.entity.as_str())
    }
}

/// Tidy rows extracted from one entity's fit
struct EntityExtract {
    entity: String,
    outcome: std::result::Result<
        (Vec<CoefficientRecord>, ModelRecord, Option<Vec<ObservationRecord>>),
        EntityFailure,
    >,
}

/// Configured two-stage analysis
#[derive(Debug, Clone)]
pub struct Pipeline {
    config: PipelineConfig,
}

impl Pipeline {
    /// Create from a configuration
    ///
    /// # Errors
    /// Returns `Config` if the configuration is invalid
    pub fn new(config: PipelineConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self { config })
    }

    /// Create a pipeline builder
    #[must_use]
    pub fn builder() -> PipelineBuilder {
        PipelineBuilder::default()
    }

    /// Active configuration
    #[must_use]
    pub const fn config(&self) -> &PipelineConfig {
        &self.config
    }

    /// Partition by entity, fit each partition, and aggregate tidy rows
    ///
    /// # Errors
    /// Returns error if a configured column is missing or mistyped
    pub fn fit_entities(&self, table: &ObservationTable) -> Result<FirstStage> {
        let config = &self.config;
        let partitions = Partitions::split(
            table,
            &config.entity_column,
            &config.response_column,
            &config.fit_covariates(),
        )?;
        let parts = partitions.to_vec();
        info!(entities = parts.len(), rows = table.num_rows(), "fitting first stage");

        let keep_observations = config.keep_observations;
        let extracts = map_ordered(&parts, config.parallel, |partition| {
            let fit = LinearFit::fit(partition);
            let outcome = fit.coefficients().and_then(|coefficients| {
                let summary = fit.summary()?;
                let observations = if keep_observations {
                    Some(fit.observations()?)
                } else {
                    None
                };
                Ok((coefficients, summary, observations))
            });
            EntityExtract {
                entity: partition.entity().to_string(),
                outcome: outcome.map_err(|_| {
                    fit.failure().cloned().unwrap_or_else(|| EntityFailure::ModelFitFailed {
                        entity: partition.entity().to_string(),
                        reason: "extraction failed".to_string(),
                    })
                }),
            }
        });

        let mut coefficients = Aggregator::with_capacity(extracts.len() * 4);
        let mut models = Aggregator::with_capacity(extracts.len());
        let mut observations = keep_observations.then(Aggregator::new);
        let mut excluded = Vec::new();

        for extract in extracts {
            match extract.outcome {
                Ok((coefs, summary, obs)) => {
                    coefficients.push(&extract.entity, coefs);
                    models.push(&extract.entity, [summary]);
                    if let (Some(aggregator), Some(rows)) = (observations.as_mut(), obs) {
                        aggregator.push(&extract.entity, rows);
                    }
                }
                Err(failure) => {
                    warn!(entity = %extract.entity, reason = failure.kind(), "excluding entity after first stage");
                    excluded.push(ExcludedEntity::new(Stage::Fit, failure));
                }
            }
        }

        info!(
            fitted = models.entity_count(),
            excluded = excluded.len(),
            coefficients = coefficients.len(),
            "first stage complete"
        );
        Ok(FirstStage {
            coefficients: coefficients.finish(),
            models: models.finish(),
            observations: observations.map(Aggregator::finish),
            excluded,
            entities: parts.len(),
        })
    }

    /// Run both stages and correct across entities
    ///
    /// # Errors
    /// Returns `Config` if the covariate table's key column is not the
    /// configured covariate key; otherwise error on missing columns, an
    /// ambiguous group variable, or
    /// `CorrectionInputEmpty` (carrying every exclusion) when no entity
    /// reaches correction
    pub fn run(
        &self,
        table: &ObservationTable,
        covariates: &CovariateTable,
    ) -> Result<AnalysisReport> {
        let config = &self.config;
        if covariates.key_column() != config.covariate_key() {
            return Err(Error::Config(format!(
                "covariate table is keyed by '{}', expected '{}'",
                covariates.key_column(),
                config.covariate_key()
            )));
        }

        let first = self.fit_entities(table)?;
        let mut excluded = first.excluded.clone();

        let rule = config.term_rule();
        let summaries = derive(&first.coefficients, &rule);
        excluded.extend(self.unmatched_entities(&first, &summaries, &rule));
        let (summaries, join_warnings) = left_join(summaries, covariates);
        info!(
            summaries = summaries.len(),
            join_warnings = join_warnings.len(),
            "derived summaries joined"
        );

        let mut tester = SecondStageTester::new(&config.group_variable)
            .method(config.test_method)
            .conf_level(config.conf_level)
            .parallel(config.parallel);
        if let Some([first_level, second_level]) = &config.comparison_levels {
            tester = tester.levels(first_level, second_level);
        }
        let fits = tester.test(&summaries)?;

        let mut tests = Aggregator::with_capacity(fits.len());
        for fit in fits {
            let entity = fit.entity().to_string();
            match fit.summary() {
                Ok(record) => tests.push(&entity, [record]),
                Err(_) => {
                    if let Some(failure) = fit.failure() {
                        warn!(entity = %entity, reason = failure.kind(), "excluding entity after second stage");
                        excluded.push(ExcludedEntity::new(Stage::Test, failure.clone()));
                    }
                }
            }
        }

        let results: Vec<TestResult> = tests
            .finish()
            .iter()
            .filter_map(|row| {
                row.record
                    .as_two_sample()
                    .map(|summary| TestResult::from_summary(&row.entity, summary))
            })
            .collect();
        if results.is_empty() {
            warn!(excluded = excluded.len(), "no entity reached correction");
            return Err(Error::CorrectionInputEmpty { excluded });
        }

        let corrected = correct(results, config.correction)?;
        info!(
            tested = corrected.len(),
            excluded = excluded.len(),
            method = ?config.correction,
            "correction complete"
        );
        Ok(AnalysisReport::new(
            corrected,
            excluded,
            join_warnings,
            config.correction,
            first.entities,
        ))
    }

    /// Fitted entities with no term matching the rule
    fn unmatched_entities(
        &self,
        first: &FirstStage,
        summaries: &[DerivedSummary],
        rule: &TermRule,
    ) -> Vec<ExcludedEntity> {
        let derived: FxHashSet<&str> = summaries.iter().map(|s| s.entity.as_str()).collect();
        first
            .fitted_entities()
            .filter(|entity| !derived.contains(entity))
            .map(|entity| {
                warn!(entity, pattern = %rule.pattern, "no coefficient terms match rule");
                ExcludedEntity::new(
                    Stage::Derive,
                    EntityFailure::InsufficientGroups {
                        entity: entity.to_string(),
                        group_variable: self.config.group_variable.clone(),
                        detail: format!("no coefficient terms match '{}'", rule.pattern),
                    },
                )
            })
            .collect()
    }
}

/// Fluent builder for [`Pipeline`]
#[derive(Debug, Clone, Default)]
pub struct PipelineBuilder {
    config: PipelineConfig,
}

impl PipelineBuilder {
    /// Start from an existing configuration
    #[must_use]
    pub fn config(mut self, config: PipelineConfig) -> Self {
        self.config = config;
        self
    }

    /// Entity (partition key) column
    #[must_use]
    pub fn entity_column(mut self, name: impl Into<String>) -> Self {
        self.config.entity_column = name.into();
        self
    }

    /// Response column
    #[must_use]
    pub fn response_column(mut self, name: impl Into<String>) -> Self {
        self.config.response_column = name.into();
        self
    }

    /// Group covariate (source of derived summaries)
    #[must_use]
    pub fn group_covariate(mut self, name: impl Into<String>) -> Self {
        self.config.group_covariate = name.into();
        self
    }

    /// Nuisance covariates, replacing the defaults
    #[must_use]
    pub fn nuisance_covariates<I, S>(mut self, names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.config.nuisance_covariates = names.into_iter().map(Into::into).collect();
        self
    }

    /// Term selection rule
    #[must_use]
    pub fn term_rule(mut self, pattern: impl Into<String>, strip_prefix: impl Into<String>) -> Self {
        self.config.term_rule = Some(TermRule {
            pattern: pattern.into(),
            strip_prefix: strip_prefix.into(),
        });
        self
    }

    /// Covariate-table column holding the comparison levels
    #[must_use]
    pub fn group_variable(mut self, name: impl Into<String>) -> Self {
        self.config.group_variable = name.into();
        self
    }

    /// Key column the covariate table must be keyed by
    #[must_use]
    pub fn covariate_key(mut self, name: impl Into<String>) -> Self {
        self.config.covariate_key = Some(name.into());
        self
    }

    /// Levels to compare, first minus second
    #[must_use]
    pub fn levels(mut self, first: impl Into<String>, second: impl Into<String>) -> Self {
        self.config.comparison_levels = Some([first.into(), second.into()]);
        self
    }

    /// Second-stage variance assumption
    #[must_use]
    pub const fn test_method(mut self, method: TestMethod) -> Self {
        self.config.test_method = method;
        self
    }

    /// Second-stage confidence level
    #[must_use]
    pub const fn conf_level(mut self, conf_level: f64) -> Self {
        self.config.conf_level = conf_level;
        self
    }

    /// Multiple-testing adjustment
    #[must_use]
    pub const fn correction(mut self, method: CorrectionMethod) -> Self {
        self.config.correction = method;
        self
    }

    /// Fit entities in parallel
    #[must_use]
    pub const fn parallel(mut self, parallel: bool) -> Self {
        self.config.parallel = parallel;
        self
    }

    /// Keep the first-stage observation-level table
    #[must_use]
    pub const fn keep_observations(mut self, keep: bool) -> Self {
        self.config.keep_observations = keep;
        self
    }

    /// Validate and build
    ///
    /// # Errors
    /// Returns `Config` if the configuration is invalid
    pub fn build(self) -> Result<Pipeline> {
        Pipeline::new(self.config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Two entities, four runs, two features. The interaction offset cancels
    /// within each run, so run coefficients equal run means.
    fn table() -> ObservationTable {
        let mut builder = ObservationTable::builder("protein", &["run", "feature"], "log2_intensity");
        let runs = [("R1", 1.0, 0.05), ("R2", 1.4, -0.03), ("R3", 3.0, 0.02), ("R4", 3.2, -0.04)];
        for (entity, shift) in [("P1", 0.0), ("P2", 10.0)] {
            for (run, base, offset) in runs {
                builder = builder
                    .row(entity, &[run, "F1"], Some(shift + base - 0.5 + offset))
                    .row(entity, &[run, "F2"], Some(shift + base + 0.5 - offset));
            }
        }
        builder.build().unwrap()
    }

    fn covariates() -> CovariateTable {
        CovariateTable::builder("run", &["condition"])
            .row("R1", &["A"])
            .row("R2", &["A"])
            .row("R3", &["B"])
            .row("R4", &["B"])
            .build()
            .unwrap()
    }

    #[test]
    fn test_fit_entities_aggregates_in_order() {
        let pipeline = Pipeline::builder().parallel(false).keep_observations(true).build().unwrap();
        let first = pipeline.fit_entities(&table()).unwrap();
        assert_eq!(first.entities, 2);
        assert!(first.excluded.is_empty());
        assert_eq!(first.fitted_entities().collect::<Vec<_>>(), vec!["P1", "P2"]);
        // 4 run terms + 2 feature terms per entity
        assert_eq!(first.coefficients.len(), 12);
        assert_eq!(first.coefficients[0].entity, "P1");
        assert_eq!(first.coefficients[0].record.term, "runR1");
        assert!((first.coefficients[0].record.estimate - 1.0).abs() < 1e-10);
        assert_eq!(first.observations.as_ref().map(Vec::len), Some(16));
    }

    #[test]
    fn test_run_produces_corrected_results() {
        let report = Pipeline::builder().build().unwrap().run(&table(), &covariates()).unwrap();
        assert_eq!(report.tested(), 2);
        assert_eq!(report.entities_total, 2);
        for row in &report.results {
            // mean(A) - mean(B) = 1.2 - 3.1
            assert!((row.result.estimate + 1.9).abs() < 1e-10);
            assert!(row.adj_p_value >= row.result.p_value);
        }
    }

    #[test]
    fn test_unmatched_rule_excludes_at_derive_stage() {
        let err = Pipeline::builder()
            .term_rule("batch", "batch")
            .build()
            .unwrap()
            .run(&table(), &covariates())
            .unwrap_err();
        let Error::CorrectionInputEmpty { excluded } = err else {
            panic!("expected CorrectionInputEmpty, got {err:?}");
        };
        assert_eq!(excluded.len(), 2);
        assert!(excluded.iter().all(|e| e.stage == Stage::Derive));
    }

    #[test]
    fn test_covariate_key_must_match_table() {
        let err = Pipeline::builder()
            .covariate_key("sample")
            .build()
            .unwrap()
            .run(&table(), &covariates())
            .unwrap_err();
        assert!(matches!(err, Error::Config(_)));
        assert!(err.to_string().contains("keyed by 'run', expected 'sample'"));

        // Default key is the group covariate
        let err = Pipeline::builder()
            .group_covariate("feature")
            .nuisance_covariates(["run"])
            .build()
            .unwrap()
            .run(&table(), &covariates())
            .unwrap_err();
        assert!(matches!(err, Error::Config(_)));

        let report = Pipeline::builder()
            .covariate_key("run")
            .build()
            .unwrap()
            .run(&table(), &covariates())
            .unwrap();
        assert_eq!(report.tested(), 2);
    }

    #[test]
    fn test_builder_validates() {
        assert!(Pipeline::builder().conf_level(0.0).build().is_err());
        assert!(Pipeline::builder().entity_column("").build().is_err());
    }

    #[test]
    fn test_missing_column_is_batch_error() {
        let err = Pipeline::builder()
            .response_column("intensity")
            .build()
            .unwrap()
            .fit_entities(&table())
            .unwrap_err();
        assert!(matches!(err, Error::ColumnNotFound(_)));
    }
}
