//! Fixed-effects linear regression (ordinary least squares, no intercept)
//!
//! Solves the normal equations `(X^T X) beta = X^T y` by Cholesky after a
//! rank check. Rank-deficient designs fail explicitly with
//! `ModelUnderdetermined`; no aliased term is ever dropped silently.

use super::design::Design;
use super::{t_two_sided_p, FittedModel};
use crate::error::EntityFailure;
use crate::partition::Partition;
use crate::tidy::{CoefficientRecord, ModelRecord, ObservationRecord, RegressionSummary, Tidy};
use nalgebra::DVector;
use statrs::distribution::{ContinuousCDF, FisherSnedecor};
use tracing::debug;

/// Successful fixed-effects fit for one partition
#[derive(Debug, Clone)]
pub struct LinearFit {
    design: Design,
    coefficients: Vec<CoefficientRecord>,
    fitted: DVector<f64>,
    residuals: DVector<f64>,
    summary: RegressionSummary,
}

impl LinearFit {
    /// Fit the fixed-effects model to one partition
    ///
    /// The first covariate of the partition is the group covariate; the
    /// rest are nuisance covariates. Failures are carried in the returned
    /// handle, never raised.
    #[must_use]
    pub fn fit(partition: &Partition<'_>) -> FittedModel<Self> {
        let entity = partition.entity();
        let outcome = Self::solve(entity, Design::build(partition));
        if let Err(failure) = &outcome {
            debug!(entity, %failure, "fixed-effects fit failed");
        }
        FittedModel::new(entity, outcome)
    }

    #[allow(clippy::cast_precision_loss)]
    fn solve(entity: &str, design: Design) -> Result<Self, EntityFailure> {
        let n = design.nobs();
        let p = design.parameters();

        let rank = if n == 0 || p == 0 {
            0
        } else {
            let svd = design.x.clone().svd(false, false);
            let tol = svd.singular_values.max() * (n.max(p) as f64) * f64::EPSILON;
            svd.rank(tol)
        };
        if n == 0 || n < p || rank < p {
            return Err(EntityFailure::ModelUnderdetermined {
                entity: entity.to_string(),
                observations: n,
                rank,
                parameters: p,
            });
        }

        let numerical = |reason: &str| EntityFailure::ModelFitFailed {
            entity: entity.to_string(),
            reason: reason.to_string(),
        };

        let xt = design.x.transpose();
        let xtx = &xt * &design.x;
        let xty = &xt * &design.y;
        let cholesky = xtx
            .cholesky()
            .ok_or_else(|| numerical("normal equations are not positive definite"))?;
        let beta = cholesky.solve(&xty);
        if beta.iter().any(|b| !b.is_finite()) {
            return Err(numerical("non-finite coefficient estimates"));
        }
        let xtx_inv = cholesky.inverse();

        let fitted = &design.x * &beta;
        let residuals = &design.y - &fitted;
        let rss = residuals.norm_squared();
        let df_residual = n - p;
        let sigma2 = if df_residual > 0 {
            rss / df_residual as f64
        } else {
            f64::NAN
        };

        let coefficients = design
            .terms
            .iter()
            .map(|term| {
                let estimate = term.contrast.dot(&beta);
                let variance = (sigma2 * (&xtx_inv * &term.contrast).dot(&term.contrast)).max(0.0);
                let std_error = if sigma2.is_nan() { f64::NAN } else { variance.sqrt() };
                let statistic = estimate / std_error;
                CoefficientRecord {
                    term: term.name.clone(),
                    estimate,
                    std_error,
                    statistic,
                    p_value: t_two_sided_p(statistic, df_residual as f64),
                }
            })
            .collect();

        let summary = Self::summarize(&design, rss, sigma2);
        Ok(Self {
            design,
            coefficients,
            fitted,
            residuals,
            summary,
        })
    }

    #[allow(clippy::cast_precision_loss)]
    fn summarize(design: &Design, rss: f64, sigma2: f64) -> RegressionSummary {
        let n = design.nobs();
        let p = design.parameters();
        let df_residual = n - p;
        let nf = n as f64;
        let pf = p as f64;

        // Uncentered total sum of squares: the model has no intercept.
        let tss = design.y.norm_squared();
        let (r_squared, adj_r_squared, statistic, p_value) = if df_residual > 0 && tss > 0.0 {
            let r_squared = 1.0 - rss / tss;
            let adj = 1.0 - (1.0 - r_squared) * (nf / df_residual as f64);
            let statistic = ((tss - rss) / pf) / sigma2;
            let p_value = FisherSnedecor::new(pf, df_residual as f64)
                .map_or(f64::NAN, |f| if statistic.is_finite() { f.sf(statistic) } else { 0.0 });
            (r_squared, adj, statistic, p_value)
        } else {
            let r_squared = if tss > 0.0 { 1.0 - rss / tss } else { f64::NAN };
            (r_squared, f64::NAN, f64::NAN, f64::NAN)
        };

        let log_likelihood =
            0.5 * (-nf * (2.0 * std::f64::consts::PI).ln() - nf + nf * nf.ln() - nf * rss.ln());
        let k = pf + 1.0;

        RegressionSummary {
            r_squared,
            adj_r_squared,
            sigma: sigma2.sqrt(),
            statistic,
            p_value,
            df: p,
            df_residual,
            nobs: n,
            log_likelihood,
            aic: -2.0 * log_likelihood + 2.0 * k,
            bic: -2.0 * log_likelihood + nf.ln() * k,
            deviance: rss,
            saturated: df_residual == 0,
        }
    }

    /// Residual degrees of freedom
    #[must_use]
    pub const fn df_residual(&self) -> usize {
        self.summary.df_residual
    }

    /// Source rows used in the fit
    #[must_use]
    pub fn used_rows(&self) -> &[usize] {
        &self.design.rows
    }
}

impl Tidy for LinearFit {
    fn tidy(&self) -> Vec<CoefficientRecord> {
        self.coefficients.clone()
    }

    fn augment(&self) -> Vec<ObservationRecord> {
        self.design
            .rows
            .iter()
            .enumerate()
            .map(|(i, &row)| ObservationRecord {
                row,
                covariates: self.design.covariates_of(i),
                response: self.design.y[i],
                fitted: self.fitted[i],
                residual: self.residuals[i],
            })
            .collect()
    }

    fn glance(&self) -> ModelRecord {
        ModelRecord::Regression(self.summary.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::partition::Partitions;
    use crate::storage::ObservationTable;
    use crate::tidy::TidyKind;

    type Row<'a> = (&'a str, &'a str, &'a str, Option<f64>);

    fn fit_rows(rows: &[Row<'_>], entity: &str) -> FittedModel<LinearFit> {
        let table = rows
            .iter()
            .fold(
                ObservationTable::builder("protein", &["run", "feature"], "y"),
                |b, &(protein, run, feature, y)| b.row(protein, &[run, feature], y),
            )
            .build()
            .unwrap();
        let partitions =
            Partitions::split(&table, "protein", "y", &["run".to_string(), "feature".to_string()])
                .unwrap();
        LinearFit::fit(&partitions.get(entity).unwrap())
    }

    fn coefficient(fit: &FittedModel<LinearFit>, term: &str) -> CoefficientRecord {
        fit.coefficients()
            .unwrap()
            .into_iter()
            .find(|c| c.term == term)
            .unwrap()
    }

    #[test]
    fn test_two_by_two_recovers_half_sums() {
        let fit = fit_rows(
            &[
                ("P1", "R1", "F1", Some(10f64.log2())),
                ("P1", "R1", "F2", Some(12f64.log2())),
                ("P1", "R2", "F1", Some(20f64.log2())),
                ("P1", "R2", "F2", Some(24f64.log2())),
            ],
            "P1",
        );
        assert!(fit.is_success());

        let r1 = coefficient(&fit, "runR1").estimate;
        let r2 = coefficient(&fit, "runR2").estimate;
        let expected_r1 = (10f64.log2() + 12f64.log2()) / 2.0;
        let expected_r2 = (20f64.log2() + 24f64.log2()) / 2.0;
        assert!((r1 - expected_r1).abs() < 1e-10);
        assert!((r2 - expected_r2).abs() < 1e-10);
        assert!((r2 - r1 - 1.0).abs() < 1e-10);

        // Additive data: exact fit with one residual df
        assert_eq!(fit.model().unwrap().df_residual(), 1);
    }

    #[test]
    fn test_one_record_per_level_no_intercept() {
        let fit = fit_rows(
            &[
                ("P1", "R1", "F1", Some(1.0)),
                ("P1", "R1", "F2", Some(2.1)),
                ("P1", "R2", "F1", Some(3.2)),
                ("P1", "R2", "F2", Some(3.9)),
                ("P1", "R3", "F1", Some(1.5)),
                ("P1", "R3", "F2", Some(2.4)),
            ],
            "P1",
        );
        let terms: Vec<String> = fit.coefficients().unwrap().into_iter().map(|c| c.term).collect();
        assert_eq!(terms, vec!["runR1", "runR2", "runR3", "featureF1", "featureF2"]);

        let f1 = coefficient(&fit, "featureF1");
        let f2 = coefficient(&fit, "featureF2");
        assert!((f1.estimate + f2.estimate).abs() < 1e-10);
        assert!((f1.std_error - f2.std_error).abs() < 1e-10);
        assert!(f1.p_value > 0.0 && f1.p_value <= 1.0);
    }

    #[test]
    fn test_saturated_fit_flags_zero_df() {
        let fit = fit_rows(
            &[("P1", "R1", "F1", Some(1.0)), ("P1", "R2", "F1", Some(2.0))],
            "P1",
        );
        assert!(fit.is_success());
        let summary = fit.summary().unwrap();
        let summary = summary.as_regression().unwrap();
        assert!(summary.saturated);
        assert_eq!(summary.df_residual, 0);
        assert!(summary.sigma.is_nan());

        let r1 = coefficient(&fit, "runR1");
        assert!((r1.estimate - 1.0).abs() < 1e-12);
        assert!(r1.std_error.is_nan());
        assert!(r1.p_value.is_nan());
    }

    #[test]
    fn test_disconnected_design_is_underdetermined() {
        let fit = fit_rows(
            &[("P1", "R1", "F1", Some(1.0)), ("P1", "R2", "F2", Some(2.0))],
            "P1",
        );
        assert!(matches!(
            fit.failure(),
            Some(EntityFailure::ModelUnderdetermined { observations: 2, parameters: 3, .. })
        ));
    }

    #[test]
    fn test_confounded_design_is_rank_deficient() {
        // run and feature perfectly aliased across four rows
        let fit = fit_rows(
            &[
                ("P1", "R1", "F1", Some(1.0)),
                ("P1", "R1", "F1", Some(1.1)),
                ("P1", "R2", "F2", Some(2.0)),
                ("P1", "R2", "F2", Some(2.2)),
            ],
            "P1",
        );
        match fit.failure() {
            Some(EntityFailure::ModelUnderdetermined { rank, parameters, .. }) => {
                assert_eq!(*parameters, 3);
                assert_eq!(*rank, 2);
            }
            other => panic!("expected ModelUnderdetermined, got {other:?}"),
        }
    }

    #[test]
    fn test_extract_from_failed_fit() {
        let fit = fit_rows(&[("P1", "R1", "F1", None)], "P1");
        assert!(!fit.is_success());
        let err = fit.extract(TidyKind::Coefficient).unwrap_err();
        assert_eq!(err.kind(), "ModelFitFailed");
        assert_eq!(err.entity(), "P1");
    }

    #[test]
    fn test_missing_response_excluded_from_augment() {
        let fit = fit_rows(
            &[
                ("P1", "R1", "F1", Some(1.0)),
                ("P1", "R1", "F2", None),
                ("P1", "R2", "F1", Some(2.0)),
                ("P1", "R2", "F1", Some(2.5)),
            ],
            "P1",
        );
        let observations = fit.observations().unwrap();
        assert_eq!(observations.len(), 3);
        assert_eq!(
            observations.iter().map(|o| o.row).collect::<Vec<_>>(),
            vec![0, 2, 3]
        );
        for o in &observations {
            assert!((o.response - o.fitted - o.residual).abs() < 1e-12);
        }
        assert_eq!(fit.model().unwrap().used_rows(), &[0, 2, 3]);
    }

    #[test]
    fn test_regression_summary_matches_hand_computation() {
        // Single factor: estimates are level means
        let fit = fit_rows(
            &[
                ("P1", "R1", "F1", Some(1.0)),
                ("P1", "R1", "F1", Some(3.0)),
                ("P1", "R2", "F1", Some(5.0)),
                ("P1", "R2", "F1", Some(7.0)),
            ],
            "P1",
        );
        let summary = fit.summary().unwrap();
        let s = summary.as_regression().unwrap();
        // rss = 4 * 1^2 = 4, df = 2, sigma^2 = 2
        assert!((s.deviance - 4.0).abs() < 1e-10);
        assert!((s.sigma - 2f64.sqrt()).abs() < 1e-10);
        // tss = 1 + 9 + 25 + 49 = 84
        assert!((s.r_squared - (1.0 - 4.0 / 84.0)).abs() < 1e-10);
        assert_eq!(s.nobs, 4);
        assert_eq!(s.df, 2);

        let r2 = coefficient(&fit, "runR2");
        assert!((r2.estimate - 6.0).abs() < 1e-10);
        // se = sqrt(sigma^2 / 2) = 1
        assert!((r2.std_error - 1.0).abs() < 1e-10);
        assert!((r2.statistic - 6.0).abs() < 1e-10);
    }

    mod property_tests {
        use super::*;
        use proptest::prelude::*;

        proptest! {
            #![proptest_config(ProptestConfig::with_cases(64))]

            /// Property: complete two-way layouts always fit, one record per level
            #[test]
            fn prop_complete_layout_fits(
                runs in 1usize..5,
                features in 1usize..5,
                values in prop::collection::vec(-5.0f64..5.0, 16)
            ) {
                prop_assume!(runs * features >= 2);
                let labels: Vec<(String, String)> = (0..runs)
                    .flat_map(|r| (0..features).map(move |f| (format!("R{r}"), format!("F{f}"))))
                    .collect();
                let rows: Vec<Row<'_>> = labels
                    .iter()
                    .zip(&values)
                    .map(|((r, f), &y)| ("P", r.as_str(), f.as_str(), Some(y)))
                    .collect();

                let fit = fit_rows(&rows, "P");
                prop_assert!(fit.is_success(), "{:?}", fit.failure());
                let coefficients = fit.coefficients().unwrap();
                prop_assert_eq!(coefficients.len(), runs + features);
                prop_assert!(coefficients.iter().all(|c| !c.term.starts_with("(Intercept)")));
                prop_assert!(coefficients.iter().all(|c| c.estimate.is_finite()));
            }
        }
    }
}
