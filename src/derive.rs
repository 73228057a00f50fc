//! Derived-summary builder
//!
//! Turns coefficient-level rows into one scalar per (entity, group label):
//! keep terms containing a pattern, strip a known prefix to recover the group
//! label, then left-join external covariates keyed by that label.
//!
//! The term-name contract is explicit: it never relies on coefficient
//! position.

use crate::aggregate::EntityResult;
use crate::storage::CovariateTable;
use crate::tidy::CoefficientRecord;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use tracing::warn;

/// Which terms become derived summaries, and how to label them
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TermRule {
    /// Substring a term must contain
    pub pattern: String,
    /// Prefix the term must start with; removed to form the group label
    pub strip_prefix: String,
}

impl TermRule {
    /// Rule matching `<covariate><level>` terms of one covariate
    #[must_use]
    pub fn for_covariate(covariate: &str) -> Self {
        Self {
            pattern: covariate.to_string(),
            strip_prefix: covariate.to_string(),
        }
    }

    /// Group label for `term`, if the term matches
    ///
    /// A term matches when it contains the pattern and starts with the
    /// prefix, so `featureFrun` is not a `run` term.
    #[must_use]
    pub fn label<'t>(&self, term: &'t str) -> Option<&'t str> {
        if !term.contains(&self.pattern) {
            return None;
        }
        term.strip_prefix(self.strip_prefix.as_str())
    }
}

/// Data-quality warning: a summary row found no covariate row
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JoinMismatch {
    /// Entity of the unmatched summary row
    pub entity: String,
    /// Group label with no covariate row
    pub group_label: String,
}

impl fmt::Display for JoinMismatch {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "join mismatch: no covariates for group '{}' (entity {})",
            self.group_label, self.entity
        )
    }
}

/// One scalar summary per entity per group
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DerivedSummary {
    /// Entity key
    pub entity: String,
    /// Group label (e.g. run)
    pub group_label: String,
    /// Coefficient estimate for the group
    pub value: f64,
    /// Joined covariates; `None` until joined or when unmatched
    pub covariates: Option<BTreeMap<String, String>>,
    /// Set when the join found no covariate row
    pub warning: Option<JoinMismatch>,
}

impl DerivedSummary {
    /// Covariate value, if joined and present
    #[must_use]
    pub fn covariate(&self, name: &str) -> Option<&str> {
        self.covariates.as_ref()?.get(name).map(String::as_str)
    }
}

/// Filter coefficient rows by `rule` into derived summaries
///
/// Output order follows the input rows.
#[must_use]
pub fn derive(results: &[EntityResult<CoefficientRecord>], rule: &TermRule) -> Vec<DerivedSummary> {
    results
        .iter()
        .filter_map(|row| {
            let label = rule.label(&row.record.term)?;
            Some(DerivedSummary {
                entity: row.entity.clone(),
                group_label: label.to_string(),
                value: row.record.estimate,
                covariates: None,
                warning: None,
            })
        })
        .collect()
}

/// Left-join covariates onto summaries by group label
///
/// Every summary survives. Unmatched rows keep `covariates = None`, carry a
/// [`JoinMismatch`] annotation, and are returned in the mismatch list.
pub fn left_join(
    summaries: Vec<DerivedSummary>,
    covariates: &CovariateTable,
) -> (Vec<DerivedSummary>, Vec<JoinMismatch>) {
    let mut mismatches = Vec::new();
    let joined = summaries
        .into_iter()
        .map(|mut summary| {
            match covariates.get(&summary.group_label) {
                Some(record) => {
                    summary.covariates = Some(record.clone());
                    summary.warning = None;
                }
                None => {
                    let mismatch = JoinMismatch {
                        entity: summary.entity.clone(),
                        group_label: summary.group_label.clone(),
                    };
                    warn!(entity = %mismatch.entity, group = %mismatch.group_label, "no covariate row for group label");
                    summary.covariates = None;
                    summary.warning = Some(mismatch.clone());
                    mismatches.push(mismatch);
                }
            }
            summary
        })
        .collect();
    (joined, mismatches)
}

/// Derive then left-join in one step
pub fn build_summaries(
    results: &[EntityResult<CoefficientRecord>],
    rule: &TermRule,
    covariates: &CovariateTable,
) -> (Vec<DerivedSummary>, Vec<JoinMismatch>) {
    left_join(derive(results, rule), covariates)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn row(entity: &str, term: &str, estimate: f64) -> EntityResult<CoefficientRecord> {
        EntityResult {
            entity: entity.to_string(),
            record: CoefficientRecord {
                term: term.to_string(),
                estimate,
                std_error: 0.1,
                statistic: 1.0,
                p_value: 0.3,
            },
        }
    }

    fn covariates() -> CovariateTable {
        CovariateTable::builder("run", &["condition"])
            .row("R1", &["control"])
            .row("R2", &["treated"])
            .build()
            .unwrap()
    }

    #[test]
    fn test_rule_label() {
        let rule = TermRule::for_covariate("run");
        assert_eq!(rule.label("runR1"), Some("R1"));
        assert_eq!(rule.label("featureF1"), None);

        let loose = TermRule {
            pattern: "R".to_string(),
            strip_prefix: "run".to_string(),
        };
        assert_eq!(loose.label("runR1"), Some("R1"));
        assert_eq!(loose.label("xR1"), None);

        let unprefixed = TermRule {
            pattern: "R".to_string(),
            strip_prefix: String::new(),
        };
        assert_eq!(unprefixed.label("xR1"), Some("xR1"));
    }

    #[test]
    fn test_nuisance_level_containing_covariate_name() {
        let rule = TermRule::for_covariate("run");
        assert_eq!(rule.label("featureFrun"), None);
        assert_eq!(rule.label("runFrun"), Some("Frun"));

        let results = vec![
            row("P1", "runR1", 1.0),
            row("P1", "runR2", 2.0),
            row("P1", "featureFrun", 0.4),
            row("P1", "featureF2", -0.4),
        ];
        let (joined, mismatches) = build_summaries(&results, &rule, &covariates());
        assert!(mismatches.is_empty(), "{mismatches:?}");
        let labels: Vec<_> = joined.iter().map(|s| s.group_label.as_str()).collect();
        assert_eq!(labels, vec!["R1", "R2"]);
    }

    #[test]
    fn test_derive_filters_and_strips() {
        let results = vec![
            row("P1", "runR1", 1.0),
            row("P1", "featureF1", 0.2),
            row("P1", "runR2", 2.0),
            row("P2", "runR1", 3.0),
        ];
        let summaries = derive(&results, &TermRule::for_covariate("run"));
        let got: Vec<_> = summaries
            .iter()
            .map(|s| (s.entity.as_str(), s.group_label.as_str(), s.value))
            .collect();
        assert_eq!(got, vec![("P1", "R1", 1.0), ("P1", "R2", 2.0), ("P2", "R1", 3.0)]);
    }

    #[test]
    fn test_left_join_keeps_unmatched_rows() {
        let results = vec![row("P1", "runR1", 1.0), row("P1", "runR9", 2.0)];
        let (joined, mismatches) =
            build_summaries(&results, &TermRule::for_covariate("run"), &covariates());

        assert_eq!(joined.len(), 2);
        assert_eq!(joined[0].covariate("condition"), Some("control"));
        assert!(joined[0].warning.is_none());

        assert!(joined[1].covariates.is_none());
        assert_eq!(joined[1].covariate("condition"), None);
        assert_eq!(
            joined[1].warning,
            Some(JoinMismatch {
                entity: "P1".to_string(),
                group_label: "R9".to_string()
            })
        );
        assert_eq!(mismatches.len(), 1);
        assert!(mismatches[0].to_string().contains("'R9'"));
    }

    #[test]
    fn test_join_is_many_to_one() {
        let results = vec![row("P1", "runR1", 1.0), row("P2", "runR1", 5.0)];
        let (joined, mismatches) =
            build_summaries(&results, &TermRule::for_covariate("run"), &covariates());
        assert!(mismatches.is_empty());
        assert!(joined.iter().all(|s| s.covariate("condition") == Some("control")));
    }
}
