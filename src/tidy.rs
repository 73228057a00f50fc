//! Tidy extraction: three canonical tabular views of a fitted model
//!
//! ```text
//! Coefficient  one row per estimated term   {term, estimate, std_error, statistic, p_value}
//! Observation  one row per row used in fit  {row, covariates, response, fitted, residual}
//! Model        exactly one row per fit      regression or two-sample summary
//! ```
//!
//! A single extraction call always yields one shape, enforced by [`TidyTable`].

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Which canonical view to extract
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TidyKind {
    /// Per-term estimates
    Coefficient,
    /// Per-observation fitted values and residuals
    Observation,
    /// One whole-model summary
    Model,
}

/// Coefficient-level row
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CoefficientRecord {
    /// Term name, `<covariate><level>` for fixed effects
    pub term: String,
    /// Point estimate
    pub estimate: f64,
    /// Standard error (NaN when the fit has no residual df)
    pub std_error: f64,
    /// t statistic
    pub statistic: f64,
    /// Two-sided p-value
    pub p_value: f64,
}

/// Observation-level row
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ObservationRecord {
    /// Row index in the source table
    pub row: usize,
    /// Covariate name -> level for this row
    pub covariates: BTreeMap<String, String>,
    /// Observed response
    pub response: f64,
    /// Fitted value
    pub fitted: f64,
    /// `response - fitted`
    pub residual: f64,
}

/// Whole-fit summary of a fixed-effects regression
///
/// An exact fit (`deviance == 0`) has `log_likelihood = +inf` and
/// `aic = bic = -inf`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RegressionSummary {
    /// Uncentered R² (model has no intercept)
    pub r_squared: f64,
    /// Adjusted R²
    pub adj_r_squared: f64,
    /// Residual standard error
    pub sigma: f64,
    /// Overall F statistic
    pub statistic: f64,
    /// p-value of the F statistic
    pub p_value: f64,
    /// Model degrees of freedom (free parameters)
    pub df: usize,
    /// Residual degrees of freedom
    pub df_residual: usize,
    /// Rows used in the fit
    pub nobs: usize,
    /// Gaussian log-likelihood
    pub log_likelihood: f64,
    /// Akaike information criterion
    pub aic: f64,
    /// Bayesian information criterion
    pub bic: f64,
    /// Residual sum of squares
    pub deviance: f64,
    /// True when `df_residual == 0`
    pub saturated: bool,
}

/// Whole-test summary of a two-sample comparison
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TwoSampleSummary {
    /// `estimate1 - estimate2`
    pub estimate: f64,
    /// Mean of the first level
    pub estimate1: f64,
    /// Mean of the second level
    pub estimate2: f64,
    /// t statistic
    pub statistic: f64,
    /// Two-sided p-value
    pub p_value: f64,
    /// Degrees of freedom of the reference t distribution
    pub df: f64,
    /// Lower confidence bound on `estimate`
    pub conf_low: f64,
    /// Upper confidence bound on `estimate`
    pub conf_high: f64,
    /// Test name
    pub method: String,
    /// Alternative hypothesis
    pub alternative: String,
}

/// Model-level row: one of the two model families
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "family", rename_all = "snake_case")]
pub enum ModelRecord {
    /// Fixed-effects regression summary
    Regression(RegressionSummary),
    /// Two-sample test summary
    TwoSample(TwoSampleSummary),
}

impl ModelRecord {
    /// Numeric summary statistics as name/value pairs
    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub fn pairs(&self) -> Vec<(&'static str, f64)> {
        match self {
            Self::Regression(s) => vec![
                ("r_squared", s.r_squared),
                ("adj_r_squared", s.adj_r_squared),
                ("sigma", s.sigma),
                ("statistic", s.statistic),
                ("p_value", s.p_value),
                ("df", s.df as f64),
                ("df_residual", s.df_residual as f64),
                ("nobs", s.nobs as f64),
                ("log_likelihood", s.log_likelihood),
                ("aic", s.aic),
                ("bic", s.bic),
                ("deviance", s.deviance),
            ],
            Self::TwoSample(s) => vec![
                ("estimate", s.estimate),
                ("estimate1", s.estimate1),
                ("estimate2", s.estimate2),
                ("statistic", s.statistic),
                ("p_value", s.p_value),
                ("df", s.df),
                ("conf_low", s.conf_low),
                ("conf_high", s.conf_high),
            ],
        }
    }

    /// Two-sample summary, if this is one
    #[must_use]
    pub const fn as_two_sample(&self) -> Option<&TwoSampleSummary> {
        match self {
            Self::TwoSample(s) => Some(s),
            Self::Regression(_) => None,
        }
    }

    /// Regression summary, if this is one
    #[must_use]
    pub const fn as_regression(&self) -> Option<&RegressionSummary> {
        match self {
            Self::Regression(s) => Some(s),
            Self::TwoSample(_) => None,
        }
    }
}

/// Result of one extraction call: exactly one shape
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "records", rename_all = "snake_case")]
pub enum TidyTable {
    /// Coefficient-level rows
    Coefficient(Vec<CoefficientRecord>),
    /// Observation-level rows
    Observation(Vec<ObservationRecord>),
    /// The single model-level row
    Model(ModelRecord),
}

impl TidyTable {
    /// Shape of this table
    #[must_use]
    pub const fn kind(&self) -> TidyKind {
        match self {
            Self::Coefficient(_) => TidyKind::Coefficient,
            Self::Observation(_) => TidyKind::Observation,
            Self::Model(_) => TidyKind::Model,
        }
    }

    /// Number of rows
    #[must_use]
    pub fn len(&self) -> usize {
        match self {
            Self::Coefficient(rows) => rows.len(),
            Self::Observation(rows) => rows.len(),
            Self::Model(_) => 1,
        }
    }

    /// True if the table has no rows
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Capability shared by every fitted model family
///
/// Implementors are immutable once built; extraction only reads.
pub trait Tidy {
    /// Coefficient-level view, in term-assignment order
    fn tidy(&self) -> Vec<CoefficientRecord>;

    /// Observation-level view over rows actually used
    fn augment(&self) -> Vec<ObservationRecord>;

    /// Model-level view
    fn glance(&self) -> ModelRecord;

    /// Extract the requested view
    fn extract(&self, kind: TidyKind) -> TidyTable {
        match kind {
            TidyKind::Coefficient => TidyTable::Coefficient(self.tidy()),
            TidyKind::Observation => TidyTable::Observation(self.augment()),
            TidyKind::Model => TidyTable::Model(self.glance()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn summary() -> TwoSampleSummary {
        TwoSampleSummary {
            estimate: 1.5,
            estimate1: 3.0,
            estimate2: 1.5,
            statistic: 2.0,
            p_value: 0.04,
            df: 8.0,
            conf_low: 0.1,
            conf_high: 2.9,
            method: "Welch Two Sample t-test".to_string(),
            alternative: "two.sided".to_string(),
        }
    }

    #[test]
    fn test_model_table_has_one_row() {
        let table = TidyTable::Model(ModelRecord::TwoSample(summary()));
        assert_eq!(table.len(), 1);
        assert_eq!(table.kind(), TidyKind::Model);
    }

    #[test]
    fn test_pairs_name_value_view() {
        let record = ModelRecord::TwoSample(summary());
        let pairs = record.pairs();
        assert_eq!(pairs[0], ("estimate", 1.5));
        assert!(pairs.iter().any(|&(name, value)| name == "p_value" && (value - 0.04).abs() < 1e-12));
        assert!(record.as_regression().is_none());
        assert!(record.as_two_sample().is_some());
    }

    #[test]
    fn test_model_record_serializes_family_tag() {
        let json = serde_json::to_string(&ModelRecord::TwoSample(summary())).unwrap();
        assert!(json.contains("\"family\":\"two_sample\""));
    }
}
