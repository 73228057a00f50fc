//! Error types for groupwise
//!
//! Two layers:
//! - [`EntityFailure`]: per-entity conditions. Cloneable and serializable so they
//!   can be carried in reports next to successful results.
//! - [`Error`]: batch-level failures returned to the caller.

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::report::ExcludedEntity;

/// Result type alias
pub type Result<T> = std::result::Result<T, Error>;

/// Failure isolated to a single entity.
///
/// These never abort a batch: the entity is excluded from downstream stages
/// and listed in the final report with its reason.
#[derive(Error, Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum EntityFailure {
    /// Fewer independent observations than free parameters
    #[error("model underdetermined for {entity}: {observations} usable rows, rank {rank}, {parameters} parameters")]
    ModelUnderdetermined {
        /// Entity key
        entity: String,
        /// Rows used in the fit
        observations: usize,
        /// Numerical rank of the design matrix
        rank: usize,
        /// Free parameters in the design
        parameters: usize,
    },

    /// Numerical failure, or extraction from a fit that did not succeed
    #[error("model fit failed for {entity}: {reason}")]
    ModelFitFailed {
        /// Entity key
        entity: String,
        /// Human-readable cause
        reason: String,
    },

    /// Two-sample comparison is missing a required level (or its replicates)
    #[error("insufficient groups for {entity} on '{group_variable}': {detail}")]
    InsufficientGroups {
        /// Entity key
        entity: String,
        /// Column holding the comparison levels
        group_variable: String,
        /// What was missing
        detail: String,
    },
}

impl EntityFailure {
    /// Entity the failure belongs to
    #[must_use]
    pub fn entity(&self) -> &str {
        match self {
            Self::ModelUnderdetermined { entity, .. }
            | Self::ModelFitFailed { entity, .. }
            | Self::InsufficientGroups { entity, .. } => entity,
        }
    }

    /// Short stable name of the failure kind
    #[must_use]
    pub const fn kind(&self) -> &'static str {
        match self {
            Self::ModelUnderdetermined { .. } => "ModelUnderdetermined",
            Self::ModelFitFailed { .. } => "ModelFitFailed",
            Self::InsufficientGroups { .. } => "InsufficientGroups",
        }
    }
}

/// Groupwise error types
#[derive(Error, Debug)]
pub enum Error {
    /// Per-entity failure surfaced directly (e.g. from a single-entity call)
    #[error(transparent)]
    Entity(#[from] EntityFailure),

    /// No successfully tested entities reached the correction stage
    #[error("correction input empty: no entity produced a test result ({} excluded)", excluded.len())]
    CorrectionInputEmpty {
        /// Every entity that failed upstream, with its reason
        excluded: Vec<ExcludedEntity>,
    },

    /// Required column missing from a table
    #[error("Column not found: {0}")]
    ColumnNotFound(String),

    /// Invalid input data or parameters
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// Invalid pipeline configuration
    #[error("Invalid configuration: {0}")]
    Config(String),

    /// Storage error (Parquet/Arrow)
    #[error("Storage error: {0}")]
    StorageError(String),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Arrow error
    #[error("Arrow error: {0}")]
    Arrow(#[from] arrow::error::ArrowError),

    /// Parquet error
    #[error("Parquet error: {0}")]
    Parquet(#[from] parquet::errors::ParquetError),

    /// JSON (de)serialization error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}
