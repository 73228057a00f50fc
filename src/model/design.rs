//! Fixed-effects design matrix
//!
//! Coding (no intercept):
//! - group covariate (first covariate): one indicator column per level
//! - each nuisance covariate: sum-to-zero coding, `L - 1` columns
//!
//! Every level of every covariate is reported as a term. Nuisance terms are
//! linear contrasts of the columns; the last level is minus the sum of the
//! others, so group terms read as nuisance-adjusted group means.

use crate::partition::Partition;
use nalgebra::{DMatrix, DVector};
use std::collections::{BTreeMap, BTreeSet};

/// Column coding of one categorical covariate
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Coding {
    /// One column per level
    Indicator,
    /// `L - 1` effect-coded columns, levels sum to zero
    SumToZero,
}

/// One categorical covariate in the design
#[derive(Debug, Clone)]
pub struct Factor {
    pub(crate) name: String,
    pub(crate) levels: Vec<String>,
    pub(crate) coding: Coding,
    pub(crate) offset: usize,
}

impl Factor {
    /// Columns this factor occupies
    pub(crate) fn width(&self) -> usize {
        match self.coding {
            Coding::Indicator => self.levels.len(),
            Coding::SumToZero => self.levels.len().saturating_sub(1),
        }
    }

    /// Write the row encoding of `level` into `row`
    fn encode(&self, level: usize, row: &mut [f64]) {
        let last = self.levels.len() - 1;
        match self.coding {
            Coding::Indicator => row[self.offset + level] = 1.0,
            Coding::SumToZero if level < last => row[self.offset + level] = 1.0,
            Coding::SumToZero => {
                for value in &mut row[self.offset..self.offset + last] {
                    *value = -1.0;
                }
            }
        }
    }

    /// Contrast vector selecting the effect of `level`
    fn contrast(&self, level: usize, parameters: usize) -> DVector<f64> {
        let mut contrast = DVector::zeros(parameters);
        self.encode(level, contrast.as_mut_slice());
        contrast
    }
}

/// Reported coefficient: a named linear contrast of the parameters
#[derive(Debug, Clone)]
pub struct Term {
    pub(crate) name: String,
    pub(crate) contrast: DVector<f64>,
}

/// Design matrix and response for one partition
#[derive(Debug, Clone)]
pub struct Design {
    pub(crate) x: DMatrix<f64>,
    pub(crate) y: DVector<f64>,
    pub(crate) rows: Vec<usize>,
    pub(crate) row_levels: Vec<Vec<usize>>,
    pub(crate) factors: Vec<Factor>,
    pub(crate) terms: Vec<Term>,
}

impl Design {
    /// Build the design for a partition
    ///
    /// Rows with a missing response or a missing covariate level are left
    /// out. Levels are those present in the remaining rows, sorted.
    pub fn build(partition: &Partition<'_>) -> Self {
        let columns = partition.columns();
        let names = columns.covariate_names();

        let mut rows = Vec::with_capacity(partition.len());
        let mut responses = Vec::with_capacity(partition.len());
        let mut labels: Vec<Vec<&str>> = Vec::with_capacity(partition.len());
        for &row in partition.rows() {
            let Some(response) = columns.response(row) else {
                continue;
            };
            let levels: Option<Vec<&str>> =
                (0..names.len()).map(|which| columns.level(which, row)).collect();
            if let Some(levels) = levels {
                rows.push(row);
                responses.push(response);
                labels.push(levels);
            }
        }

        let mut factors = Vec::with_capacity(names.len());
        let mut offset = 0;
        for (which, name) in names.iter().enumerate() {
            let levels: BTreeSet<&str> = labels.iter().map(|l| l[which]).collect();
            let factor = Factor {
                name: name.clone(),
                levels: levels.into_iter().map(str::to_string).collect(),
                coding: if which == 0 {
                    Coding::Indicator
                } else {
                    Coding::SumToZero
                },
                offset,
            };
            offset += factor.width();
            factors.push(factor);
        }
        let parameters = offset;

        let lookup: Vec<BTreeMap<&str, usize>> = factors
            .iter()
            .map(|f| f.levels.iter().enumerate().map(|(i, l)| (l.as_str(), i)).collect())
            .collect();
        let row_levels: Vec<Vec<usize>> = labels
            .iter()
            .map(|l| l.iter().zip(&lookup).map(|(label, map)| map[label]).collect())
            .collect();

        let mut x = DMatrix::zeros(rows.len(), parameters);
        let mut encoded = vec![0.0; parameters];
        for (i, levels) in row_levels.iter().enumerate() {
            encoded.iter_mut().for_each(|v| *v = 0.0);
            for (factor, &level) in factors.iter().zip(levels) {
                factor.encode(level, &mut encoded);
            }
            for (j, &value) in encoded.iter().enumerate() {
                x[(i, j)] = value;
            }
        }

        let terms = factors
            .iter()
            .flat_map(|factor| {
                (0..factor.levels.len()).map(move |level| Term {
                    name: format!("{}{}", factor.name, factor.levels[level]),
                    contrast: factor.contrast(level, parameters),
                })
            })
            .collect();

        Self {
            x,
            y: DVector::from_vec(responses),
            rows,
            row_levels,
            factors,
            terms,
        }
    }

    /// Rows used in the fit
    pub(crate) fn nobs(&self) -> usize {
        self.x.nrows()
    }

    /// Free parameters
    pub(crate) fn parameters(&self) -> usize {
        self.x.ncols()
    }

    /// Covariate name -> level for the `i`-th used row
    pub(crate) fn covariates_of(&self, i: usize) -> BTreeMap<String, String> {
        self.factors
            .iter()
            .zip(&self.row_levels[i])
            .map(|(factor, &level)| (factor.name.clone(), factor.levels[level].clone()))
            .collect()
    }
}
