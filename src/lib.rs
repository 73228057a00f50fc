//! # Groupwise: Two-Stage Grouped Statistical Modeling
//!
//! **Version**: 0.1.0
//!
//! Groupwise fits one fixed-effects model per entity (e.g. per protein),
//! condenses each fit into per-group summaries (e.g. per-run abundance),
//! compares those summaries between two conditions with a t-test, and
//! controls the false discovery rate across all entities.
//!
//! ## Design Principles
//!
//! - **Isolation**: a failing entity is excluded with its reason, never aborts the batch
//! - **No silent drops**: every excluded entity is listed in the report
//! - **Explicit contracts**: derived summaries are selected by term name, not position
//! - **Determinism**: results come back in entity order with or without `rayon`
//!
//! ## Example Usage
//!
//! ```rust,no_run
//! use groupwise::{CovariateTable, ObservationTable, Pipeline};
//!
//! let table = ObservationTable::load_parquet("data/features.parquet")?;
//! let runs = CovariateTable::load_parquet("data/runs.parquet", "run")?;
//!
//! let report = Pipeline::builder()
//!     .group_variable("condition")
//!     .levels("treated", "control")
//!     .build()?
//!     .run(&table, &runs)?;
//!
//! for row in report.significant(0.05) {
//!     println!("{}: {:.3} (adj p {:.2e})", row.result.entity, row.result.estimate, row.adj_p_value);
//! }
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]

pub mod aggregate;
pub mod config;
pub mod correction;
pub mod derive;
pub mod error;
pub mod model;
pub mod parallel;
pub mod partition;
pub mod pipeline;
pub mod report;
pub mod second_stage;
pub mod storage;
pub mod tidy;

pub use config::PipelineConfig;
pub use correction::{adjust_p_values, CorrectedResult, CorrectionMethod, TestResult};
pub use error::{EntityFailure, Error, Result};
pub use model::{FittedModel, LinearFit, TestMethod, TwoSampleTest};
pub use pipeline::{FirstStage, Pipeline, PipelineBuilder};
pub use report::{AnalysisReport, ExcludedEntity, Stage};
pub use storage::{CovariateTable, ObservationTable};
pub use tidy::{Tidy, TidyKind, TidyTable};
