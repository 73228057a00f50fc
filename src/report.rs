//! Final analysis report
//!
//! Lists every corrected result and every excluded entity with its reason;
//! no entity is dropped silently. Converts to Arrow record batches for
//! downstream writers and to JSON via serde.

use crate::correction::{CorrectedResult, CorrectionMethod};
use crate::derive::JoinMismatch;
use crate::error::EntityFailure;
use crate::Result;
use arrow::array::{ArrayRef, Float64Array, RecordBatch, StringArray};
use arrow::datatypes::{DataType, Field, Schema};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::sync::Arc;

/// Pipeline stage at which an entity was excluded
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    /// First-stage fixed-effects fit
    Fit,
    /// Derived summaries (no matching term rows)
    Derive,
    /// Second-stage two-sample test
    Test,
}

impl Stage {
    /// Stable lowercase name
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Fit => "fit",
            Self::Derive => "derive",
            Self::Test => "test",
        }
    }
}

/// An entity left out of correction, with the reason
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExcludedEntity {
    /// Entity key
    pub entity: String,
    /// Stage where it dropped out
    pub stage: Stage,
    /// Failure that excluded it
    pub reason: EntityFailure,
}

impl ExcludedEntity {
    /// Record a failure at `stage`
    #[must_use]
    pub fn new(stage: Stage, reason: EntityFailure) -> Self {
        Self {
            entity: reason.entity().to_string(),
            stage,
            reason,
        }
    }
}

/// Complete output of one pipeline run
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnalysisReport {
    /// Corrected results, adjusted p-value ascending
    pub results: Vec<CorrectedResult>,
    /// Entities left out, with reasons
    pub excluded: Vec<ExcludedEntity>,
    /// Summary rows with no covariate match (kept, annotated)
    pub join_warnings: Vec<JoinMismatch>,
    /// Adjustment procedure used
    pub correction: CorrectionMethod,
    /// Entities seen in the input
    pub entities_total: usize,
    /// Creation time
    pub generated_at: DateTime<Utc>,
}

impl AnalysisReport {
    /// Assemble a report, sorting results by adjusted p-value
    #[must_use]
    pub fn new(
        mut results: Vec<CorrectedResult>,
        excluded: Vec<ExcludedEntity>,
        join_warnings: Vec<JoinMismatch>,
        correction: CorrectionMethod,
        entities_total: usize,
    ) -> Self {
        results.sort_by(|a, b| {
            a.adj_p_value
                .partial_cmp(&b.adj_p_value)
                .unwrap_or(Ordering::Equal)
        });
        Self {
            results,
            excluded,
            join_warnings,
            correction,
            entities_total,
            generated_at: Utc::now(),
        }
    }

    /// Entities tested and corrected
    #[must_use]
    pub fn tested(&self) -> usize {
        self.results.len()
    }

    /// Results with adjusted p-value at or below `alpha`
    pub fn significant(&self, alpha: f64) -> impl Iterator<Item = &CorrectedResult> {
        self.results.iter().filter(move |r| r.adj_p_value <= alpha)
    }

    /// Exclusion record for an entity, if it was excluded
    #[must_use]
    pub fn exclusion(&self, entity: &str) -> Option<&ExcludedEntity> {
        self.excluded.iter().find(|e| e.entity == entity)
    }

    /// Corrected results as an Arrow record batch
    ///
    /// # Errors
    /// Returns error if the batch cannot be assembled
    pub fn results_batch(&self) -> Result<RecordBatch> {
        let f64_column = |get: fn(&CorrectedResult) -> f64| -> ArrayRef {
            Arc::new(Float64Array::from_iter_values(self.results.iter().map(get)))
        };

        let schema = Schema::new(vec![
            Field::new("entity", DataType::Utf8, false),
            Field::new("estimate", DataType::Float64, false),
            Field::new("statistic", DataType::Float64, false),
            Field::new("p_value", DataType::Float64, false),
            Field::new("conf_low", DataType::Float64, false),
            Field::new("conf_high", DataType::Float64, false),
            Field::new("df", DataType::Float64, false),
            Field::new("adj_p_value", DataType::Float64, false),
        ]);
        let columns: Vec<ArrayRef> = vec![
            Arc::new(StringArray::from_iter_values(
                self.results.iter().map(|r| r.result.entity.as_str()),
            )),
            f64_column(|r| r.result.estimate),
            f64_column(|r| r.result.statistic),
            f64_column(|r| r.result.p_value),
            f64_column(|r| r.result.conf_low),
            f64_column(|r| r.result.conf_high),
            f64_column(|r| r.result.df),
            f64_column(|r| r.adj_p_value),
        ];
        Ok(RecordBatch::try_new(Arc::new(schema), columns)?)
    }

    /// Excluded entities as an Arrow record batch
    ///
    /// # Errors
    /// Returns error if the batch cannot be assembled
    pub fn excluded_batch(&self) -> Result<RecordBatch> {
        let schema = Schema::new(vec![
            Field::new("entity", DataType::Utf8, false),
            Field::new("stage", DataType::Utf8, false),
            Field::new("reason", DataType::Utf8, false),
            Field::new("detail", DataType::Utf8, false),
        ]);
        let columns: Vec<ArrayRef> = vec![
            Arc::new(StringArray::from_iter_values(
                self.excluded.iter().map(|e| e.entity.as_str()),
            )),
            Arc::new(StringArray::from_iter_values(
                self.excluded.iter().map(|e| e.stage.as_str()),
            )),
            Arc::new(StringArray::from_iter_values(
                self.excluded.iter().map(|e| e.reason.kind()),
            )),
            Arc::new(StringArray::from_iter_values(
                self.excluded.iter().map(|e| e.reason.to_string()),
            )),
        ];
        Ok(RecordBatch::try_new(Arc::new(schema), columns)?)
    }

    /// Serialize to pretty JSON
    ///
    /// # Errors
    /// Returns error if serialization fails
    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }
}
