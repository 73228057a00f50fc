//! Protein Pipeline: per-protein run summaries and condition comparison
//!
//! Generates a synthetic protein x run x feature intensity table, fits one
//! fixed-effects model per protein, compares run-level abundance between
//! conditions, and prints the FDR-corrected report.
//!
//! Run with: cargo run --example protein_pipeline [config.json]
//! Logging:  RUST_LOG=groupwise=debug cargo run --example protein_pipeline

use anyhow::{Context, Result};
use groupwise::{CovariateTable, ObservationTable, Pipeline, PipelineConfig};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use tracing_subscriber::EnvFilter;

const PROTEINS: usize = 200;
const RUNS: [(&str, &str); 6] = [
    ("R1", "control"),
    ("R2", "control"),
    ("R3", "control"),
    ("R4", "treated"),
    ("R5", "treated"),
    ("R6", "treated"),
];
const FEATURES: usize = 4;

fn init_tracing() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_writer(std::io::stderr)
        .init();
}

/// Intensities on the log2 scale; every tenth protein is differentially abundant
#[allow(clippy::cast_precision_loss)]
fn synthetic_table(rng: &mut StdRng) -> Result<ObservationTable> {
    let mut builder = ObservationTable::builder("protein", &["run", "feature"], "log2_intensity");
    for p in 0..PROTEINS {
        let protein = format!("PROT{p:04}");
        let abundance: f64 = rng.gen_range(18.0..28.0);
        let effect = if p % 10 == 0 { rng.gen_range(1.0..2.5) } else { 0.0 };

        // The last protein is only ever seen in control runs
        let runs: &[(&str, &str)] = if p == PROTEINS - 1 { &RUNS[..3] } else { &RUNS };
        for &(run, condition) in runs {
            let run_noise = rng.gen_range(-0.15..0.15);
            let shift = if condition == "treated" { effect } else { 0.0 };
            for f in 0..FEATURES {
                let feature = format!("F{f}");
                // roughly 5% missing values
                let value = (rng.gen::<f64>() > 0.05).then(|| {
                    abundance + shift + run_noise + 0.4 * f as f64 + rng.gen_range(-0.3..0.3)
                });
                builder = builder.row(&protein, &[run, feature.as_str()], value);
            }
        }
    }
    Ok(builder.build()?)
}

fn run_covariates() -> Result<CovariateTable> {
    let table = RUNS
        .iter()
        .fold(CovariateTable::builder("run", &["condition"]), |builder, &(run, condition)| {
            builder.row(run, &[condition])
        })
        .build()?;
    Ok(table)
}

fn main() -> Result<()> {
    init_tracing();

    let config = match std::env::args().nth(1) {
        Some(path) => PipelineConfig::from_json_file(&path)
            .with_context(|| format!("loading configuration from {path}"))?,
        None => PipelineConfig {
            comparison_levels: Some(["treated".to_string(), "control".to_string()]),
            ..PipelineConfig::default()
        },
    };

    println!("=== Groupwise: Protein Pipeline ===\n");
    let mut rng = StdRng::seed_from_u64(2024);
    let table = synthetic_table(&mut rng)?;
    let covariates = run_covariates()?;
    println!("Observations: {} rows", table.num_rows());
    println!("Runs: {} ({} covariate rows)\n", RUNS.len(), covariates.len());

    let pipeline = Pipeline::new(config)?;
    let report = pipeline
        .run(&table, &covariates)
        .context("running two-stage analysis")?;

    println!("Tested: {} of {} proteins", report.tested(), report.entities_total);
    println!("Excluded: {}", report.excluded.len());
    for excluded in &report.excluded {
        println!("  {} [{}]: {}", excluded.entity, excluded.stage.as_str(), excluded.reason);
    }

    println!("\nTop results ({:?}):", report.correction);
    println!("  {:<10} {:>9} {:>9} {:>10} {:>10}", "protein", "estimate", "t", "p", "adj p");
    for row in report.results.iter().take(10) {
        let r = &row.result;
        println!(
            "  {:<10} {:>9.3} {:>9.2} {:>10.2e} {:>10.2e}",
            r.entity, r.estimate, r.statistic, r.p_value, row.adj_p_value
        );
    }
    println!(
        "\nSignificant at 5% FDR: {}",
        report.significant(0.05).count()
    );

    println!("\n=== JSON report (first 2 results) ===");
    let mut preview = report.clone();
    preview.results.truncate(2);
    println!("{}", preview.to_json()?);

    Ok(())
}
