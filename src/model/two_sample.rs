//! Two-sample t-test (Welch or pooled Student)

use super::{t_quantile, t_two_sided_p, FittedModel};
use crate::error::EntityFailure;
use crate::tidy::{CoefficientRecord, ModelRecord, ObservationRecord, Tidy, TwoSampleSummary};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Variance assumption of the two-sample t-test
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TestMethod {
    /// Unequal variances, Welch-Satterthwaite df
    #[default]
    Welch,
    /// Pooled variance, `n1 + n2 - 2` df
    Student,
}

impl TestMethod {
    /// Display name used in test summaries
    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            Self::Welch => "Welch Two Sample t-test",
            Self::Student => "Two Sample t-test",
        }
    }
}

fn mean(values: &[(usize, f64)]) -> f64 {
    #[allow(clippy::cast_precision_loss)]
    let n = values.len() as f64;
    values.iter().map(|&(_, v)| v).sum::<f64>() / n
}

fn sample_variance(values: &[(usize, f64)], mean: f64) -> f64 {
    #[allow(clippy::cast_precision_loss)]
    let df = (values.len() - 1) as f64;
    values.iter().map(|&(_, v)| (v - mean).powi(2)).sum::<f64>() / df
}

/// Completed two-sample comparison for one entity
#[derive(Debug, Clone)]
pub struct TwoSampleTest {
    group_variable: String,
    levels: [String; 2],
    samples: [Vec<(usize, f64)>; 2],
    std_error: f64,
    summary: TwoSampleSummary,
}

impl TwoSampleTest {
    /// Compare the values of `levels[0]` against `levels[1]`
    ///
    /// Each sample holds `(row, value)` pairs; `row` identifies the source
    /// summary row. The estimate is `mean(levels[0]) - mean(levels[1])`.
    #[must_use]
    pub fn run(
        entity: &str,
        group_variable: &str,
        levels: &[String; 2],
        samples: [Vec<(usize, f64)>; 2],
        method: TestMethod,
        conf_level: f64,
    ) -> FittedModel<Self> {
        let outcome = Self::compute(entity, group_variable, levels, &samples, method, conf_level)
            .map(|(summary, std_error)| Self {
                group_variable: group_variable.to_string(),
                levels: levels.clone(),
                samples,
                std_error,
                summary,
            });
        FittedModel::new(entity, outcome)
    }

    #[allow(clippy::cast_precision_loss)]
    fn compute(
        entity: &str,
        group_variable: &str,
        levels: &[String; 2],
        samples: &[Vec<(usize, f64)>; 2],
        method: TestMethod,
        conf_level: f64,
    ) -> Result<(TwoSampleSummary, f64), EntityFailure> {
        let insufficient = |detail: String| EntityFailure::InsufficientGroups {
            entity: entity.to_string(),
            group_variable: group_variable.to_string(),
            detail,
        };

        let absent: Vec<&str> = levels
            .iter()
            .zip(samples)
            .filter(|(_, s)| s.is_empty())
            .map(|(l, _)| l.as_str())
            .collect();
        if !absent.is_empty() {
            return Err(insufficient(format!("level(s) absent: {}", absent.join(", "))));
        }

        let (n1, n2) = (samples[0].len(), samples[1].len());
        match method {
            TestMethod::Welch => {
                if let Some((level, sample)) = levels.iter().zip(samples).find(|(_, s)| s.len() < 2)
                {
                    return Err(insufficient(format!(
                        "level '{level}' has {} observation, at least 2 required",
                        sample.len()
                    )));
                }
            }
            TestMethod::Student => {
                if n1 + n2 < 3 {
                    return Err(insufficient(format!(
                        "{} observations in total, at least 3 required",
                        n1 + n2
                    )));
                }
            }
        }

        let m1 = mean(&samples[0]);
        let m2 = mean(&samples[1]);
        let (std_error, df) = match method {
            TestMethod::Welch => {
                let a = sample_variance(&samples[0], m1) / n1 as f64;
                let b = sample_variance(&samples[1], m2) / n2 as f64;
                let se = (a + b).sqrt();
                let df = (a + b).powi(2)
                    / (a.powi(2) / (n1 - 1) as f64 + b.powi(2) / (n2 - 1) as f64);
                (se, df)
            }
            TestMethod::Student => {
                let df = (n1 + n2 - 2) as f64;
                let ss = |s: &[(usize, f64)], m: f64| {
                    if s.len() > 1 {
                        sample_variance(s, m) * (s.len() - 1) as f64
                    } else {
                        0.0
                    }
                };
                let pooled = (ss(&samples[0], m1) + ss(&samples[1], m2)) / df;
                let se = (pooled * (1.0 / n1 as f64 + 1.0 / n2 as f64)).sqrt();
                (se, df)
            }
        };

        if !(std_error > 10.0 * f64::EPSILON * m1.abs().max(m2.abs())) {
            return Err(EntityFailure::ModelFitFailed {
                entity: entity.to_string(),
                reason: "data are essentially constant".to_string(),
            });
        }

        let estimate = m1 - m2;
        let statistic = estimate / std_error;
        let half_width = t_quantile(0.5 + conf_level / 2.0, df) * std_error;

        let summary = TwoSampleSummary {
            estimate,
            estimate1: m1,
            estimate2: m2,
            statistic,
            p_value: t_two_sided_p(statistic, df),
            df,
            conf_low: estimate - half_width,
            conf_high: estimate + half_width,
            method: method.name().to_string(),
            alternative: "two.sided".to_string(),
        };
        Ok((summary, std_error))
    }

    /// Compared levels, in estimate order
    #[must_use]
    pub const fn levels(&self) -> &[String; 2] {
        &self.levels
    }

    /// Summary of the test
    #[must_use]
    pub const fn result(&self) -> &TwoSampleSummary {
        &self.summary
    }
}

impl Tidy for TwoSampleTest {
    fn tidy(&self) -> Vec<CoefficientRecord> {
        vec![CoefficientRecord {
            term: format!(
                "{gv}{} - {gv}{}",
                self.levels[0],
                self.levels[1],
                gv = self.group_variable
            ),
            estimate: self.summary.estimate,
            std_error: self.std_error,
            statistic: self.summary.statistic,
            p_value: self.summary.p_value,
        }]
    }

    fn augment(&self) -> Vec<ObservationRecord> {
        let means = [self.summary.estimate1, self.summary.estimate2];
        let mut records: Vec<ObservationRecord> = self
            .levels
            .iter()
            .zip(&self.samples)
            .zip(means)
            .flat_map(|((level, sample), fitted)| {
                sample.iter().map(move |&(row, value)| ObservationRecord {
                    row,
                    covariates: BTreeMap::from([(self.group_variable.clone(), level.clone())]),
                    response: value,
                    fitted,
                    residual: value - fitted,
                })
            })
            .collect();
        records.sort_by_key(|r| r.row);
        records
    }

    fn glance(&self) -> ModelRecord {
        ModelRecord::TwoSample(self.summary.clone())
    }
}
