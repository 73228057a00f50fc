//! Model families and the fitted-model handle
//!
//! Two families exist, one per stage:
//! - [`LinearFit`]: fixed-effects regression per entity (first stage)
//! - [`TwoSampleTest`]: two-sample t-test per entity (second stage)
//!
//! Both are wrapped in [`FittedModel`], which pairs the entity key with
//! either the fitted model or the failure that prevented it.

mod design;
mod linear;
mod two_sample;

pub use design::{Coding, Design};
pub use linear::LinearFit;
pub use two_sample::{TestMethod, TwoSampleTest};

use crate::error::EntityFailure;
use crate::tidy::{CoefficientRecord, ModelRecord, ObservationRecord, Tidy, TidyKind, TidyTable};
use statrs::distribution::{ContinuousCDF, StudentsT};

/// Two-sided p-value of a t statistic on `df` degrees of freedom
///
/// NaN when the statistic is undefined or `df` is not positive; an infinite
/// statistic (exact fit) gives 0.
pub(crate) fn t_two_sided_p(statistic: f64, df: f64) -> f64 {
    if statistic.is_nan() || df.is_nan() || df <= 0.0 {
        return f64::NAN;
    }
    if statistic.is_infinite() {
        return 0.0;
    }
    StudentsT::new(0.0, 1.0, df).map_or(f64::NAN, |t| (2.0 * t.sf(statistic.abs())).min(1.0))
}

/// Quantile of Student's t(df)
///
/// NaN when `p` is outside [0, 1].
pub(crate) fn t_quantile(p: f64, df: f64) -> f64 {
    if !(0.0..=1.0).contains(&p) {
        return f64::NAN;
    }
    if p == 0.0 {
        return f64::NEG_INFINITY;
    }
    if p == 1.0 {
        return f64::INFINITY;
    }
    StudentsT::new(0.0, 1.0, df).map_or(f64::NAN, |t| t.inverse_cdf(p))
}

/// Fitted-model handle for one entity
///
/// Never mutated after creation. A failed fit keeps its reason; extracting
/// from it yields `ModelFitFailed` instead of an empty table.
#[derive(Debug, Clone)]
pub struct FittedModel<M> {
    entity: String,
    outcome: Result<M, EntityFailure>,
}

impl<M: Tidy> FittedModel<M> {
    pub(crate) fn new(entity: impl Into<String>, outcome: Result<M, EntityFailure>) -> Self {
        Self {
            entity: entity.into(),
            outcome,
        }
    }

    /// Entity key
    #[must_use]
    pub fn entity(&self) -> &str {
        &self.entity
    }

    /// True if the model was fitted
    #[must_use]
    pub const fn is_success(&self) -> bool {
        self.outcome.is_ok()
    }

    /// The fitted model, if any
    #[must_use]
    pub fn model(&self) -> Option<&M> {
        self.outcome.as_ref().ok()
    }

    /// Why fitting failed, if it did
    #[must_use]
    pub fn failure(&self) -> Option<&EntityFailure> {
        self.outcome.as_ref().err()
    }

    /// Consume the handle, yielding the model or the fit failure
    ///
    /// # Errors
    /// Returns the original failure if fitting did not succeed
    pub fn into_result(self) -> Result<M, EntityFailure> {
        self.outcome
    }

    fn fitted(&self) -> Result<&M, EntityFailure> {
        self.outcome
            .as_ref()
            .map_err(|failure| EntityFailure::ModelFitFailed {
                entity: self.entity.clone(),
                reason: failure.to_string(),
            })
    }

    /// Extract one canonical view
    ///
    /// # Errors
    /// Returns `ModelFitFailed` if the handle carries a failure
    pub fn extract(&self, kind: TidyKind) -> Result<TidyTable, EntityFailure> {
        Ok(self.fitted()?.extract(kind))
    }

    /// Coefficient-level view
    ///
    /// # Errors
    /// Returns `ModelFitFailed` if the handle carries a failure
    pub fn coefficients(&self) -> Result<Vec<CoefficientRecord>, EntityFailure> {
        Ok(self.fitted()?.tidy())
    }

    /// Observation-level view
    ///
    /// # Errors
    /// Returns `ModelFitFailed` if the handle carries a failure
    pub fn observations(&self) -> Result<Vec<ObservationRecord>, EntityFailure> {
        Ok(self.fitted()?.augment())
    }

    /// Model-level view
    ///
    /// # Errors
    /// Returns `ModelFitFailed` if the handle carries a failure
    pub fn summary(&self) -> Result<ModelRecord, EntityFailure> {
        Ok(self.fitted()?.glance())
    }
}
