//! Multiple-testing correction across entities
//!
//! Rank-based adjustment needs the complete p-value set, so correction is a
//! barrier: it runs only after every entity has been tested. Adjusted values
//! are written back by input position, so the entity association never
//! depends on sort order.

use crate::tidy::TwoSampleSummary;
use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;

/// p-value adjustment procedure
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CorrectionMethod {
    /// Benjamini-Hochberg step-up (FDR)
    #[default]
    BenjaminiHochberg,
    /// Benjamini-Yekutieli (FDR under arbitrary dependence)
    BenjaminiYekutieli,
    /// Holm step-down (FWER)
    Holm,
    /// Bonferroni (FWER)
    Bonferroni,
    /// No adjustment
    None,
}

/// Second-stage result for one entity
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TestResult {
    /// Entity key
    pub entity: String,
    /// Effect estimate (difference of level means)
    pub estimate: f64,
    /// Test statistic
    pub statistic: f64,
    /// Raw two-sided p-value
    pub p_value: f64,
    /// Lower confidence bound
    pub conf_low: f64,
    /// Upper confidence bound
    pub conf_high: f64,
    /// Degrees of freedom
    pub df: f64,
}

impl TestResult {
    /// Build from a two-sample summary
    #[must_use]
    pub fn from_summary(entity: impl Into<String>, summary: &TwoSampleSummary) -> Self {
        Self {
            entity: entity.into(),
            estimate: summary.estimate,
            statistic: summary.statistic,
            p_value: summary.p_value,
            conf_low: summary.conf_low,
            conf_high: summary.conf_high,
            df: summary.df,
        }
    }
}

/// Test result with its adjusted p-value
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CorrectedResult {
    /// Uncorrected result
    #[serde(flatten)]
    pub result: TestResult,
    /// Adjusted p-value in `[0, 1]`
    pub adj_p_value: f64,
}

/// Indices of the finite p-values, ordered by p-value (stable on ties)
fn ranked(p_values: &[f64], descending: bool) -> Vec<usize> {
    let mut order: Vec<usize> = (0..p_values.len())
        .filter(|&i| p_values[i].is_finite())
        .collect();
    order.sort_by(|&a, &b| {
        let ord = p_values[a].partial_cmp(&p_values[b]).unwrap_or(Ordering::Equal);
        if descending {
            ord.reverse()
        } else {
            ord
        }
    });
    order
}

/// Adjust raw p-values; output is aligned with input
///
/// Non-finite inputs are left out of the family size and returned as NaN.
#[must_use]
#[allow(clippy::cast_precision_loss)]
pub fn adjust_p_values(p_values: &[f64], method: CorrectionMethod) -> Vec<f64> {
    let mut adjusted = vec![f64::NAN; p_values.len()];
    let n = p_values.iter().filter(|p| p.is_finite()).count();
    let nf = n as f64;

    match method {
        CorrectionMethod::None => {
            for (out, &p) in adjusted.iter_mut().zip(p_values) {
                if p.is_finite() {
                    *out = p;
                }
            }
        }
        CorrectionMethod::Bonferroni => {
            for (out, &p) in adjusted.iter_mut().zip(p_values) {
                if p.is_finite() {
                    *out = (p * nf).min(1.0);
                }
            }
        }
        CorrectionMethod::BenjaminiHochberg | CorrectionMethod::BenjaminiYekutieli => {
            let q = if method == CorrectionMethod::BenjaminiYekutieli {
                (1..=n).map(|i| 1.0 / i as f64).sum()
            } else {
                1.0
            };
            // Walk from the largest p (rank n) down, carrying the running minimum.
            let mut running = f64::INFINITY;
            for (k, idx) in ranked(p_values, true).into_iter().enumerate() {
                let rank = (n - k) as f64;
                running = running.min(q * p_values[idx] * nf / rank);
                adjusted[idx] = running.min(1.0);
            }
        }
        CorrectionMethod::Holm => {
            let mut running = 0.0_f64;
            for (k, idx) in ranked(p_values, false).into_iter().enumerate() {
                running = running.max((nf - k as f64) * p_values[idx]);
                adjusted[idx] = running.min(1.0);
            }
        }
    }
    adjusted
}

/// Attach adjusted p-values to test results
///
/// Output keeps input order, one result per input.
///
/// # Errors
/// Returns `CorrectionInputEmpty` when `results` is empty
pub fn correct(results: Vec<TestResult>, method: CorrectionMethod) -> Result<Vec<CorrectedResult>> {
    if results.is_empty() {
        return Err(Error::CorrectionInputEmpty {
            excluded: Vec::new(),
        });
    }
    let raw: Vec<f64> = results.iter().map(|r| r.p_value).collect();
    let adjusted = adjust_p_values(&raw, method);
    Ok(results
        .into_iter()
        .zip(adjusted)
        .map(|(result, adj_p_value)| CorrectedResult {
            result,
            adj_p_value,
        })
        .collect())
}
