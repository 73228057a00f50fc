//! Pipeline configuration
//!
//! Every field has a default, so a partial JSON document is enough:
//!
//! ```rust
//! use groupwise::config::PipelineConfig;
//!
//! let config = PipelineConfig::from_json_str(r#"{ "group_variable": "treatment" }"#)?;
//! assert_eq!(config.entity_column, "protein");
//! assert_eq!(config.group_variable, "treatment");
//! # Ok::<(), groupwise::Error>(())
//! ```

use crate::correction::CorrectionMethod;
use crate::derive::TermRule;
use crate::model::TestMethod;
use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Column names and method choices for one analysis
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    /// Column identifying the entity (partition key)
    pub entity_column: String,
    /// Numeric response column
    pub response_column: String,
    /// Covariate whose per-level coefficients become derived summaries
    pub group_covariate: String,
    /// Additional covariates adjusted for in the first stage
    pub nuisance_covariates: Vec<String>,
    /// Term selection rule; defaults to the group covariate's terms
    pub term_rule: Option<TermRule>,
    /// Key column of the covariate table (defaults to the group covariate)
    pub covariate_key: Option<String>,
    /// Covariate-table column holding the comparison levels
    pub group_variable: String,
    /// Levels to compare, first minus second
    pub comparison_levels: Option<[String; 2]>,
    /// Variance assumption of the second-stage test
    pub test_method: TestMethod,
    /// Confidence level of the second-stage interval
    pub conf_level: f64,
    /// Multiple-testing adjustment
    pub correction: CorrectionMethod,
    /// Fit entities in parallel
    pub parallel: bool,
    /// Keep the first-stage observation-level table
    pub keep_observations: bool,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            entity_column: "protein".to_string(),
            response_column: "log2_intensity".to_string(),
            group_covariate: "run".to_string(),
            nuisance_covariates: vec!["feature".to_string()],
            term_rule: None,
            covariate_key: None,
            group_variable: "condition".to_string(),
            comparison_levels: None,
            test_method: TestMethod::Welch,
            conf_level: 0.95,
            correction: CorrectionMethod::BenjaminiHochberg,
            parallel: true,
            keep_observations: false,
        }
    }
}

impl PipelineConfig {
    /// Parse a JSON document and validate it
    ///
    /// # Errors
    /// Returns error if the JSON is malformed or the configuration is invalid
    pub fn from_json_str(json: &str) -> Result<Self> {
        let config: Self = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    /// Read and validate a JSON configuration file
    ///
    /// # Errors
    /// Returns error if the file cannot be read, parsed or validated
    pub fn from_json_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let text = std::fs::read_to_string(path)?;
        Self::from_json_str(&text)
    }

    /// First-stage covariates: group covariate, then nuisance covariates
    #[must_use]
    pub fn fit_covariates(&self) -> Vec<String> {
        std::iter::once(self.group_covariate.clone())
            .chain(self.nuisance_covariates.iter().cloned())
            .collect()
    }

    /// Effective term rule
    #[must_use]
    pub fn term_rule(&self) -> TermRule {
        self.term_rule
            .clone()
            .unwrap_or_else(|| TermRule::for_covariate(&self.group_covariate))
    }

    /// Effective covariate-table key column
    #[must_use]
    pub fn covariate_key(&self) -> &str {
        self.covariate_key.as_deref().unwrap_or(&self.group_covariate)
    }

    /// Check column names and numeric settings
    ///
    /// # Errors
    /// Returns `Config` describing the first problem found
    pub fn validate(&self) -> Result<()> {
        let named = [
            ("entity_column", &self.entity_column),
            ("response_column", &self.response_column),
            ("group_covariate", &self.group_covariate),
            ("group_variable", &self.group_variable),
        ];
        for (field, value) in named {
            if value.trim().is_empty() {
                return Err(Error::Config(format!("{field} must not be empty")));
            }
        }

        let covariates = self.fit_covariates();
        for (i, name) in covariates.iter().enumerate() {
            if name.trim().is_empty() {
                return Err(Error::Config("covariate names must not be empty".to_string()));
            }
            if covariates[..i].contains(name) {
                return Err(Error::Config(format!("covariate '{name}' listed twice")));
            }
            if name == &self.entity_column || name == &self.response_column {
                return Err(Error::Config(format!(
                    "covariate '{name}' is also the entity or response column"
                )));
            }
        }
        if self.entity_column == self.response_column {
            return Err(Error::Config(
                "entity and response columns must differ".to_string(),
            ));
        }

        if let Some(rule) = &self.term_rule {
            if rule.pattern.is_empty() {
                return Err(Error::Config("term_rule.pattern must not be empty".to_string()));
            }
        }
        if let Some([first, second]) = &self.comparison_levels {
            if first == second {
                return Err(Error::Config(format!(
                    "comparison levels must differ (both '{first}')"
                )));
            }
        }
        check_conf_level(self.conf_level)
    }
}

/// Reject confidence levels outside the open interval (0, 1)
pub(crate) fn check_conf_level(conf_level: f64) -> Result<()> {
    if conf_level > 0.0 && conf_level < 1.0 {
        Ok(())
    } else {
        Err(Error::Config(format!(
            "conf_level must be in (0, 1), got {conf_level}"
        )))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_valid() {
        let config = PipelineConfig::default();
        config.validate().unwrap();
        assert_eq!(config.fit_covariates(), vec!["run", "feature"]);
        assert_eq!(config.term_rule(), TermRule::for_covariate("run"));
        assert_eq!(config.covariate_key(), "run");
    }

    #[test]
    fn test_partial_json_uses_defaults() {
        let config = PipelineConfig::from_json_str(
            r#"{
                "nuisance_covariates": [],
                "comparison_levels": ["treated", "control"],
                "test_method": "student",
                "correction": "holm"
            }"#,
        )
        .unwrap();
        assert!(config.nuisance_covariates.is_empty());
        assert_eq!(config.test_method, TestMethod::Student);
        assert_eq!(config.correction, CorrectionMethod::Holm);
        assert_eq!(config.response_column, "log2_intensity");
        assert!(config.parallel);
    }

    #[test]
    fn test_rejects_bad_conf_level() {
        let err = PipelineConfig::from_json_str(r#"{"conf_level": 1.5}"#).unwrap_err();
        assert!(matches!(err, Error::Config(_)));
    }

    #[test]
    fn test_rejects_duplicate_covariate() {
        let config = PipelineConfig {
            nuisance_covariates: vec!["run".to_string()],
            ..PipelineConfig::default()
        };
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("listed twice"));
    }

    #[test]
    fn test_rejects_identical_levels() {
        let config = PipelineConfig {
            comparison_levels: Some(["A".to_string(), "A".to_string()]),
            ..PipelineConfig::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_malformed_json() {
        let err = PipelineConfig::from_json_str("{ not json").unwrap_err();
        assert!(matches!(err, Error::Json(_)));
    }

    #[test]
    fn test_missing_file() {
        let err = PipelineConfig::from_json_file("/nonexistent/groupwise.json").unwrap_err();
        assert!(matches!(err, Error::Io(_)));
    }
}
