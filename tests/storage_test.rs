//! Parquet ingestion feeding the pipeline
//!
//! Files are written to the system temp directory with `ArrowWriter`, then
//! loaded back through the storage layer.

use arrow::array::{Float32Array, Int32Array, RecordBatch, StringArray};
use arrow::datatypes::{DataType, Field, Schema};
use groupwise::{CovariateTable, Error, ObservationTable, Pipeline};
use parquet::arrow::ArrowWriter;
use parquet::file::properties::WriterProperties;
use std::fs::File;
use std::path::PathBuf;
use std::sync::Arc;

fn temp_path(name: &str) -> PathBuf {
    std::env::temp_dir().join(format!("groupwise_{}_{name}.parquet", std::process::id()))
}

fn write_parquet(path: &PathBuf, batch: &RecordBatch) {
    let file = File::create(path).unwrap();
    let props = WriterProperties::builder().build();
    let mut writer = ArrowWriter::try_new(file, batch.schema(), Some(props)).unwrap();
    writer.write(batch).unwrap();
    writer.close().unwrap();
}

/// Two proteins x four integer-coded runs x two features, response as Float32
#[allow(clippy::cast_precision_loss)]
fn observation_batch() -> RecordBatch {
    let mut proteins = Vec::new();
    let mut runs = Vec::new();
    let mut features = Vec::new();
    let mut values = Vec::new();
    for (p, protein) in ["P1", "P2"].iter().enumerate() {
        for run in 1..=4 {
            for (f, feature) in ["F1", "F2"].iter().enumerate() {
                proteins.push(*protein);
                runs.push(run);
                features.push(*feature);
                let condition_shift = if run > 2 { 1.5 } else { 0.0 };
                values.push(
                    (10.0 + p as f64 + condition_shift + 0.25 * f as f64 + 0.05 * f64::from(run))
                        as f32,
                );
            }
        }
    }
    let schema = Schema::new(vec![
        Field::new("protein", DataType::Utf8, false),
        Field::new("run", DataType::Int32, false),
        Field::new("feature", DataType::Utf8, false),
        Field::new("log2_intensity", DataType::Float32, true),
    ]);
    RecordBatch::try_new(
        Arc::new(schema),
        vec![
            Arc::new(StringArray::from(proteins)),
            Arc::new(Int32Array::from(runs)),
            Arc::new(StringArray::from(features)),
            Arc::new(Float32Array::from(values)),
        ],
    )
    .unwrap()
}

fn covariate_batch() -> RecordBatch {
    let schema = Schema::new(vec![
        Field::new("run", DataType::Int32, false),
        Field::new("condition", DataType::Utf8, false),
    ]);
    RecordBatch::try_new(
        Arc::new(schema),
        vec![
            Arc::new(Int32Array::from(vec![1, 2, 3, 4])),
            Arc::new(StringArray::from(vec!["control", "control", "treated", "treated"])),
        ],
    )
    .unwrap()
}

#[test]
fn test_parquet_round_trip_through_pipeline() {
    let observations_path = temp_path("observations");
    let covariates_path = temp_path("runs");
    write_parquet(&observations_path, &observation_batch());
    write_parquet(&covariates_path, &covariate_batch());

    let table = ObservationTable::load_parquet(&observations_path).unwrap();
    let covariates = CovariateTable::load_parquet(&covariates_path, "run").unwrap();
    assert_eq!(table.num_rows(), 16);
    assert_eq!(covariates.len(), 4);
    assert_eq!(covariates.get("3").unwrap()["condition"], "treated");

    let report = Pipeline::builder()
        .levels("treated", "control")
        .build()
        .unwrap()
        .run(&table, &covariates)
        .unwrap();
    assert_eq!(report.tested(), 2);
    assert!(report.excluded.is_empty());
    assert!(report.join_warnings.is_empty());
    for row in &report.results {
        // treated - control: 1.5 shift plus the run trend (0.05 * 2)
        assert!((row.result.estimate - 1.6).abs() < 1e-4, "{}", row.result.estimate);
    }

    let batch = report.results_batch().unwrap();
    assert_eq!(batch.num_rows(), 2);
    assert_eq!(batch.schema().field(7).name(), "adj_p_value");

    let _ = std::fs::remove_file(observations_path);
    let _ = std::fs::remove_file(covariates_path);
}

#[test]
fn test_missing_parquet_file() {
    let err = ObservationTable::load_parquet("/nonexistent/groupwise.parquet").unwrap_err();
    assert!(matches!(err, Error::StorageError(_)));
}

#[test]
fn test_duplicate_covariate_keys_rejected_from_parquet() {
    let path = temp_path("duplicate_runs");
    let schema = Schema::new(vec![
        Field::new("run", DataType::Int32, false),
        Field::new("condition", DataType::Utf8, false),
    ]);
    let batch = RecordBatch::try_new(
        Arc::new(schema),
        vec![
            Arc::new(Int32Array::from(vec![1, 1])),
            Arc::new(StringArray::from(vec!["control", "treated"])),
        ],
    )
    .unwrap();
    write_parquet(&path, &batch);

    let err = CovariateTable::load_parquet(&path, "run").unwrap_err();
    assert!(matches!(err, Error::InvalidInput(_)));
    let _ = std::fs::remove_file(path);
}
