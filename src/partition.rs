//! Partitioner: split a flat table into per-entity partitions
//!
//! Partitions are index lists into the source table, never row copies. The
//! arena maps entity key -> slot, and every per-entity stage (fit, extract,
//! test) is addressed by slot, so no nested tables are ever built.
//!
//! Entities are ordered by first appearance in the input, which fixes the
//! order of every aggregated output.

use crate::storage::ObservationTable;
use crate::Result;
use arrow::array::{Array, Float64Array, StringArray};
use rustc_hash::FxHashMap;
use tracing::{debug, warn};

/// Entity key -> member row indices, in first-appearance order
#[derive(Debug, Clone, Default)]
pub struct EntityIndex {
    keys: Vec<String>,
    lookup: FxHashMap<String, usize>,
    members: Vec<Vec<usize>>,
}

impl EntityIndex {
    /// Group positions by key; `None` keys are skipped
    pub fn build<'a, I>(keys: I) -> Self
    where
        I: IntoIterator<Item = Option<&'a str>>,
    {
        let mut index = Self::default();
        for (row, key) in keys.into_iter().enumerate() {
            if let Some(key) = key {
                index.push(key, row);
            }
        }
        index
    }

    fn push(&mut self, key: &str, row: usize) {
        let slot = match self.lookup.get(key) {
            Some(&slot) => slot,
            None => {
                let slot = self.keys.len();
                self.keys.push(key.to_string());
                self.lookup.insert(key.to_string(), slot);
                self.members.push(Vec::new());
                slot
            }
        };
        self.members[slot].push(row);
    }

    /// Number of distinct entities
    #[must_use]
    pub fn len(&self) -> usize {
        self.keys.len()
    }

    /// True if no entity was seen
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }

    /// Entity keys in first-appearance order
    #[must_use]
    pub fn keys(&self) -> &[String] {
        &self.keys
    }

    /// Member positions of an entity
    #[must_use]
    pub fn rows(&self, key: &str) -> Option<&[usize]> {
        self.lookup.get(key).map(|&slot| self.members[slot].as_slice())
    }

    /// Iterate `(entity, rows)` in first-appearance order
    pub fn iter(&self) -> impl Iterator<Item = (&str, &[usize])> {
        self.keys
            .iter()
            .zip(&self.members)
            .map(|(key, rows)| (key.as_str(), rows.as_slice()))
    }
}

/// Columns of an observation table needed for fitting, read once
#[derive(Debug, Clone)]
pub struct FitColumns {
    response: Float64Array,
    covariate_names: Vec<String>,
    covariates: Vec<StringArray>,
}

impl FitColumns {
    /// Read the response and covariate columns from a table
    ///
    /// # Errors
    /// Returns error if any column is missing or has the wrong type
    pub fn read(table: &ObservationTable, response: &str, covariates: &[String]) -> Result<Self> {
        Ok(Self {
            response: table.numeric(response)?,
            covariate_names: covariates.to_vec(),
            covariates: covariates
                .iter()
                .map(|name| table.categorical(name))
                .collect::<Result<_>>()?,
        })
    }

    /// Covariate names in model order
    #[must_use]
    pub fn covariate_names(&self) -> &[String] {
        &self.covariate_names
    }

    /// Response at `row`, `None` if null or NaN
    #[must_use]
    pub fn response(&self, row: usize) -> Option<f64> {
        if self.response.is_null(row) {
            return None;
        }
        let value = self.response.value(row);
        (!value.is_nan()).then_some(value)
    }

    /// Level of covariate `which` at `row`, `None` if null
    #[must_use]
    pub fn level(&self, which: usize, row: usize) -> Option<&str> {
        let column = &self.covariates[which];
        (!column.is_null(row)).then(|| column.value(row))
    }
}

/// One entity's rows, borrowed from the source table
#[derive(Debug, Clone, Copy)]
pub struct Partition<'a> {
    entity: &'a str,
    rows: &'a [usize],
    columns: &'a FitColumns,
}

impl<'a> Partition<'a> {
    /// Entity key
    #[must_use]
    pub const fn entity(&self) -> &'a str {
        self.entity
    }

    /// Source row indices
    #[must_use]
    pub const fn rows(&self) -> &'a [usize] {
        self.rows
    }

    /// Number of rows (including missing responses)
    #[must_use]
    pub const fn len(&self) -> usize {
        self.rows.len()
    }

    /// True if the partition has no rows
    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Column view shared by all partitions
    #[must_use]
    pub const fn columns(&self) -> &'a FitColumns {
        self.columns
    }
}

/// Partitioned observation table
#[derive(Debug, Clone)]
pub struct Partitions {
    index: EntityIndex,
    columns: FitColumns,
}

impl Partitions {
    /// Split `table` by `key`, reading `response` and `covariates` for fitting
    ///
    /// Only keys present in the data yield partitions. Rows with a null key
    /// are skipped with a warning.
    ///
    /// # Errors
    /// Returns error if any named column is missing or has the wrong type
    pub fn split(
        table: &ObservationTable,
        key: &str,
        response: &str,
        covariates: &[String],
    ) -> Result<Self> {
        let keys = table.categorical(key)?;
        let columns = FitColumns::read(table, response, covariates)?;

        let null_keys = keys.null_count();
        if null_keys > 0 {
            warn!(column = key, rows = null_keys, "skipping rows with null entity key");
        }

        let index = EntityIndex::build(keys.iter());
        debug!(entities = index.len(), rows = table.num_rows(), "partitioned observations");
        Ok(Self { index, columns })
    }

    /// Number of partitions
    #[must_use]
    pub fn len(&self) -> usize {
        self.index.len()
    }

    /// True if no partition exists
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.index.is_empty()
    }

    /// Entity keys in first-appearance order
    #[must_use]
    pub fn entities(&self) -> &[String] {
        self.index.keys()
    }

    /// Partition for one entity
    #[must_use]
    pub fn get(&self, entity: &str) -> Option<Partition<'_>> {
        let (entity, _) = self.index.lookup.get_key_value(entity)?;
        let rows = self.index.rows(entity)?;
        Some(Partition {
            entity: entity.as_str(),
            rows,
            columns: &self.columns,
        })
    }

    /// All partitions in first-appearance order
    #[must_use]
    pub fn to_vec(&self) -> Vec<Partition<'_>> {
        self.index
            .iter()
            .map(|(entity, rows)| Partition {
                entity,
                rows,
                columns: &self.columns,
            })
            .collect()
    }
}
