//! Table storage (Arrow/Parquet)
//!
//! Both input tables live as Arrow `RecordBatch`es:
//! - [`ObservationTable`]: one row per measurement (entity, covariates, response)
//! - [`CovariateTable`]: descriptive columns keyed by a group label
//!
//! Categorical columns are read through a `Utf8` cast, so string, integer and
//! dictionary columns all work. Numeric columns are read through a `Float64`
//! cast. Parquet loading is a thin ingestion adapter.

use crate::{Error, Result};
use arrow::array::{Array, ArrayRef, Float64Array, RecordBatch, StringArray};
use arrow::compute;
use arrow::datatypes::{DataType, Field, Schema};
use rustc_hash::FxHashMap;
use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Arc;

/// Read every record batch of a Parquet file into memory
fn read_parquet_batches(path: &Path) -> Result<Vec<RecordBatch>> {
    use parquet::arrow::arrow_reader::ParquetRecordBatchReaderBuilder;
    use std::fs::File;

    let file = File::open(path)
        .map_err(|e| Error::StorageError(format!("Failed to open Parquet file: {e}")))?;

    let builder = ParquetRecordBatchReaderBuilder::try_new(file)
        .map_err(|e| Error::StorageError(format!("Failed to parse Parquet file: {e}")))?;

    let reader = builder
        .build()
        .map_err(|e| Error::StorageError(format!("Failed to create Parquet reader: {e}")))?;

    let mut batches = Vec::new();
    for batch in reader {
        let batch =
            batch.map_err(|e| Error::StorageError(format!("Failed to read record batch: {e}")))?;
        batches.push(batch);
    }
    Ok(batches)
}

/// Combine multiple batches into a single batch
fn combine_batches(batches: &[RecordBatch]) -> Result<RecordBatch> {
    match batches {
        [] => Err(Error::InvalidInput("No record batches to combine".to_string())),
        [single] => Ok(single.clone()),
        _ => compute::concat_batches(&batches[0].schema(), batches)
            .map_err(|e| Error::StorageError(format!("Failed to combine batches: {e}"))),
    }
}

fn column_by_name<'a>(batch: &'a RecordBatch, name: &str) -> Result<&'a ArrayRef> {
    batch
        .column_by_name(name)
        .ok_or_else(|| Error::ColumnNotFound(name.to_string()))
}

/// Cast a column to `Utf8` and return it as a `StringArray`
fn utf8_column(batch: &RecordBatch, name: &str) -> Result<StringArray> {
    let column = column_by_name(batch, name)?;
    let cast = compute::cast(column, &DataType::Utf8).map_err(|e| {
        Error::InvalidInput(format!("Column '{name}' is not categorical: {e}"))
    })?;
    cast.as_any()
        .downcast_ref::<StringArray>()
        .cloned()
        .ok_or_else(|| Error::InvalidInput(format!("Failed to downcast '{name}' to StringArray")))
}

/// Cast a column to `Float64` and return it as a `Float64Array`
fn f64_column(batch: &RecordBatch, name: &str) -> Result<Float64Array> {
    let column = column_by_name(batch, name)?;
    let cast = compute::cast(column, &DataType::Float64)
        .map_err(|e| Error::InvalidInput(format!("Column '{name}' is not numeric: {e}")))?;
    cast.as_any()
        .downcast_ref::<Float64Array>()
        .cloned()
        .ok_or_else(|| Error::InvalidInput(format!("Failed to downcast '{name}' to Float64Array")))
}

/// Flat table of observations
///
/// Immutable once constructed. Partitions borrow row indices into it
/// instead of copying rows.
#[derive(Debug, Clone)]
pub struct ObservationTable {
    batch: RecordBatch,
}

impl ObservationTable {
    /// Wrap an existing record batch
    #[must_use]
    pub const fn new(batch: RecordBatch) -> Self {
        Self { batch }
    }

    /// Concatenate batches sharing one schema
    ///
    /// # Errors
    /// Returns error if `batches` is empty or schemas differ
    pub fn from_batches(batches: &[RecordBatch]) -> Result<Self> {
        combine_batches(batches).map(Self::new)
    }

    /// Load table from Parquet file
    ///
    /// # Errors
    /// Returns error if file cannot be read or parsed
    pub fn load_parquet<P: AsRef<Path>>(path: P) -> Result<Self> {
        let batches = read_parquet_batches(path.as_ref())?;
        Self::from_batches(&batches)
    }

    /// Start a row-wise builder
    #[must_use]
    pub fn builder(
        entity_column: impl Into<String>,
        covariate_columns: &[&str],
        response_column: impl Into<String>,
    ) -> ObservationTableBuilder {
        ObservationTableBuilder::new(entity_column, covariate_columns, response_column)
    }

    /// Underlying record batch
    #[must_use]
    pub const fn batch(&self) -> &RecordBatch {
        &self.batch
    }

    /// Number of rows
    #[must_use]
    pub fn num_rows(&self) -> usize {
        self.batch.num_rows()
    }

    /// Read a categorical column as strings
    ///
    /// # Errors
    /// Returns error if the column is missing or cannot be cast to `Utf8`
    pub fn categorical(&self, name: &str) -> Result<StringArray> {
        utf8_column(&self.batch, name)
    }

    /// Read a numeric column as `f64`
    ///
    /// # Errors
    /// Returns error if the column is missing or cannot be cast to `Float64`
    pub fn numeric(&self, name: &str) -> Result<Float64Array> {
        f64_column(&self.batch, name)
    }
}

/// Row-wise builder for [`ObservationTable`]
#[derive(Debug)]
pub struct ObservationTableBuilder {
    entity_column: String,
    covariate_columns: Vec<String>,
    response_column: String,
    entities: Vec<String>,
    covariates: Vec<Vec<String>>,
    responses: Vec<Option<f64>>,
    malformed: Option<String>,
}

impl ObservationTableBuilder {
    /// Create a builder for the given column names
    #[must_use]
    pub fn new(
        entity_column: impl Into<String>,
        covariate_columns: &[&str],
        response_column: impl Into<String>,
    ) -> Self {
        Self {
            entity_column: entity_column.into(),
            covariate_columns: covariate_columns.iter().map(ToString::to_string).collect(),
            response_column: response_column.into(),
            entities: Vec::new(),
            covariates: vec![Vec::new(); covariate_columns.len()],
            responses: Vec::new(),
            malformed: None,
        }
    }

    /// Append one observation (`None` response = missing)
    #[must_use]
    pub fn row(mut self, entity: &str, covariates: &[&str], response: Option<f64>) -> Self {
        if covariates.len() != self.covariate_columns.len() {
            self.malformed.get_or_insert_with(|| {
                format!(
                    "row {} has {} covariates, expected {}",
                    self.entities.len(),
                    covariates.len(),
                    self.covariate_columns.len()
                )
            });
            return self;
        }
        self.entities.push(entity.to_string());
        for (column, value) in self.covariates.iter_mut().zip(covariates) {
            column.push((*value).to_string());
        }
        self.responses.push(response);
        self
    }

    /// Build the table
    ///
    /// # Errors
    /// Returns error if any row had the wrong number of covariates
    pub fn build(self) -> Result<ObservationTable> {
        if let Some(message) = self.malformed {
            return Err(Error::InvalidInput(message));
        }

        let mut fields = vec![Field::new(&self.entity_column, DataType::Utf8, false)];
        let mut columns: Vec<ArrayRef> = vec![Arc::new(StringArray::from(self.entities))];

        for (name, values) in self.covariate_columns.iter().zip(self.covariates) {
            fields.push(Field::new(name, DataType::Utf8, false));
            columns.push(Arc::new(StringArray::from(values)));
        }

        fields.push(Field::new(&self.response_column, DataType::Float64, true));
        columns.push(Arc::new(Float64Array::from(self.responses)));

        let batch = RecordBatch::try_new(Arc::new(Schema::new(fields)), columns)?;
        Ok(ObservationTable::new(batch))
    }
}

/// External covariates keyed by group label (e.g. run)
///
/// Keys are unique, so joins against it are many-to-one.
#[derive(Debug, Clone, Default)]
pub struct CovariateTable {
    key_column: String,
    lookup: FxHashMap<String, usize>,
    records: Vec<BTreeMap<String, String>>,
}

impl CovariateTable {
    /// Build from a record batch keyed by `key_column`
    ///
    /// Every non-key column is read as a categorical string column; null
    /// cells are left out of the row's attribute map.
    ///
    /// # Errors
    /// Returns error if the key column is missing, contains nulls, or has
    /// duplicate values
    pub fn from_batch(batch: &RecordBatch, key_column: &str) -> Result<Self> {
        let keys = utf8_column(batch, key_column)?;
        let schema = batch.schema();
        let attributes = schema
            .fields()
            .iter()
            .filter(|f| f.name() != key_column)
            .map(|f| Ok((f.name().clone(), utf8_column(batch, f.name())?)))
            .collect::<Result<Vec<_>>>()?;

        let mut table = Self::empty(key_column);
        for row in 0..batch.num_rows() {
            if keys.is_null(row) {
                return Err(Error::InvalidInput(format!(
                    "Null covariate key in column '{key_column}' at row {row}"
                )));
            }
            let record = attributes
                .iter()
                .filter(|(_, column)| !column.is_null(row))
                .map(|(name, column)| (name.clone(), column.value(row).to_string()))
                .collect();
            table.insert(keys.value(row), record)?;
        }
        Ok(table)
    }

    /// Load table from Parquet file
    ///
    /// # Errors
    /// Returns error if file cannot be read or the key is invalid
    pub fn load_parquet<P: AsRef<Path>>(path: P, key_column: &str) -> Result<Self> {
        let batches = read_parquet_batches(path.as_ref())?;
        Self::from_batch(&combine_batches(&batches)?, key_column)
    }

    /// Start a row-wise builder
    #[must_use]
    pub fn builder(key_column: impl Into<String>, attribute_columns: &[&str]) -> CovariateTableBuilder {
        CovariateTableBuilder {
            table: Self::empty(key_column),
            attribute_columns: attribute_columns.iter().map(ToString::to_string).collect(),
            error: None,
        }
    }

    fn empty(key_column: impl Into<String>) -> Self {
        Self {
            key_column: key_column.into(),
            lookup: FxHashMap::default(),
            records: Vec::new(),
        }
    }

    fn insert(&mut self, key: &str, record: BTreeMap<String, String>) -> Result<()> {
        if self.lookup.contains_key(key) {
            return Err(Error::InvalidInput(format!(
                "Duplicate covariate key '{key}' in column '{}'",
                self.key_column
            )));
        }
        self.lookup.insert(key.to_string(), self.records.len());
        self.records.push(record);
        Ok(())
    }

    /// Name of the key column
    #[must_use]
    pub fn key_column(&self) -> &str {
        &self.key_column
    }

    /// Attributes for one group label
    #[must_use]
    pub fn get(&self, key: &str) -> Option<&BTreeMap<String, String>> {
        self.lookup.get(key).map(|&idx| &self.records[idx])
    }

    /// Number of keyed rows
    #[must_use]
    pub fn len(&self) -> usize {
        self.records.len()
    }

    /// True if the table has no rows
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

/// Row-wise builder for [`CovariateTable`]
#[derive(Debug)]
pub struct CovariateTableBuilder {
    table: CovariateTable,
    attribute_columns: Vec<String>,
    error: Option<Error>,
}

impl CovariateTableBuilder {
    /// Append one keyed row
    #[must_use]
    pub fn row(mut self, key: &str, attributes: &[&str]) -> Self {
        if self.error.is_some() {
            return self;
        }
        if attributes.len() != self.attribute_columns.len() {
            self.error = Some(Error::InvalidInput(format!(
                "covariate row '{key}' has {} attributes, expected {}",
                attributes.len(),
                self.attribute_columns.len()
            )));
            return self;
        }
        let record = self
            .attribute_columns
            .iter()
            .zip(attributes)
            .map(|(name, value)| (name.clone(), (*value).to_string()))
            .collect();
        if let Err(e) = self.table.insert(key, record) {
            self.error = Some(e);
        }
        self
    }

    /// Build the table
    ///
    /// # Errors
    /// Returns error on a malformed or duplicate row
    pub fn build(self) -> Result<CovariateTable> {
        match self.error {
            Some(e) => Err(e),
            None => Ok(self.table),
        }
    }
}
