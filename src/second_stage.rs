//! Second-stage tester: one two-sample comparison per entity
//!
//! Derived summaries are re-partitioned by entity with the same
//! [`EntityIndex`] used for observations. Each entity's summaries are split
//! by the two levels of the group variable and compared with a t-test.
//! Failures stay isolated to their entity.

use crate::config::check_conf_level;
use crate::derive::DerivedSummary;
use crate::error::EntityFailure;
use crate::model::{FittedModel, TestMethod, TwoSampleTest};
use crate::parallel::map_ordered;
use crate::partition::EntityIndex;
use crate::{Error, Result};
use std::collections::BTreeSet;
use tracing::{debug, info};

/// Configured two-sample comparison across entities
#[derive(Debug, Clone)]
pub struct SecondStageTester {
    group_variable: String,
    levels: Option<[String; 2]>,
    method: TestMethod,
    conf_level: f64,
    parallel: bool,
}

impl SecondStageTester {
    /// Compare on `group_variable` with Welch's test at 95% confidence
    #[must_use]
    pub fn new(group_variable: impl Into<String>) -> Self {
        Self {
            group_variable: group_variable.into(),
            levels: None,
            method: TestMethod::default(),
            conf_level: 0.95,
            parallel: false,
        }
    }

    /// Fix the compared levels; estimate is `first - second`
    #[must_use]
    pub fn levels(mut self, first: impl Into<String>, second: impl Into<String>) -> Self {
        self.levels = Some([first.into(), second.into()]);
        self
    }

    /// Set the variance assumption
    #[must_use]
    pub const fn method(mut self, method: TestMethod) -> Self {
        self.method = method;
        self
    }

    /// Set the confidence level of the interval
    #[must_use]
    pub const fn conf_level(mut self, conf_level: f64) -> Self {
        self.conf_level = conf_level;
        self
    }

    /// Run entities in parallel (requires the `rayon` feature)
    #[must_use]
    pub const fn parallel(mut self, parallel: bool) -> Self {
        self.parallel = parallel;
        self
    }

    /// Column holding the comparison levels
    #[must_use]
    pub fn group_variable(&self) -> &str {
        &self.group_variable
    }

    /// Levels to compare: configured, or the sorted distinct observed values
    ///
    /// Returns fewer than two levels when the data has fewer; every entity
    /// then fails with `InsufficientGroups`.
    ///
    /// # Errors
    /// Returns `InvalidInput` if more than two levels are observed and none
    /// were configured
    pub fn resolve_levels(&self, summaries: &[DerivedSummary]) -> Result<Vec<String>> {
        if let Some(levels) = &self.levels {
            return Ok(levels.to_vec());
        }
        let observed: BTreeSet<&str> = summaries
            .iter()
            .filter_map(|s| s.covariate(&self.group_variable))
            .collect();
        if observed.len() > 2 {
            return Err(Error::InvalidInput(format!(
                "'{}' has {} levels ({}); configure the two levels to compare",
                self.group_variable,
                observed.len(),
                observed.into_iter().collect::<Vec<_>>().join(", ")
            )));
        }
        Ok(observed.into_iter().map(str::to_string).collect())
    }

    /// Test every entity present in `summaries`, in first-appearance order
    ///
    /// Summary rows without the group variable (e.g. unmatched joins) or
    /// with a level outside the comparison are left out of the test.
    ///
    /// # Errors
    /// Returns `Config` for a confidence level outside (0, 1), otherwise
    /// only batch-level problems (see [`Self::resolve_levels`])
    pub fn test(&self, summaries: &[DerivedSummary]) -> Result<Vec<FittedModel<TwoSampleTest>>> {
        check_conf_level(self.conf_level)?;
        let levels = self.resolve_levels(summaries)?;
        let index = EntityIndex::build(summaries.iter().map(|s| Some(s.entity.as_str())));
        let groups: Vec<(&str, &[usize])> = index.iter().collect();

        info!(
            entities = groups.len(),
            group_variable = %self.group_variable,
            levels = ?levels,
            "running second-stage tests"
        );

        let results = map_ordered(&groups, self.parallel, |&(entity, rows)| {
            self.test_entity(entity, rows, summaries, &levels)
        });
        Ok(results)
    }

    fn test_entity(
        &self,
        entity: &str,
        rows: &[usize],
        summaries: &[DerivedSummary],
        levels: &[String],
    ) -> FittedModel<TwoSampleTest> {
        let [first, second] = levels else {
            let failure = EntityFailure::InsufficientGroups {
                entity: entity.to_string(),
                group_variable: self.group_variable.clone(),
                detail: format!(
                    "only {} level(s) observed across all entities: {}",
                    levels.len(),
                    levels.join(", ")
                ),
            };
            return FittedModel::new(entity, Err(failure));
        };

        let mut samples = [Vec::new(), Vec::new()];
        for &row in rows {
            let summary = &summaries[row];
            if !summary.value.is_finite() {
                continue;
            }
            match summary.covariate(&self.group_variable) {
                Some(level) if level == first => samples[0].push((row, summary.value)),
                Some(level) if level == second => samples[1].push((row, summary.value)),
                _ => {}
            }
        }

        let fit = TwoSampleTest::run(
            entity,
            &self.group_variable,
            &[first.clone(), second.clone()],
            samples,
            self.method,
            self.conf_level,
        );
        if let Some(failure) = fit.failure() {
            debug!(entity, %failure, "second-stage test failed");
        }
        fit
    }
}
