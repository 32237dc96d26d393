//! Step orchestration.
//!
//! Setup is fatal on failure. Every other step opens one connection,
//! passes it down as `&dyn Database`, and reports per-unit failures in
//! the log rather than through the exit code.

use std::time::Instant;

use capeeco_cli_utils::{IndicatifProgress, MultiProgress};
use capeeco_database::db::{DatabaseConfig, connect};
use capeeco_database::indexes::{analyze_tables, build_indexes};
use capeeco_database::introspect::{count_rows, log_row_counts};
use capeeco_database::setup::setup_database;
use capeeco_dataset_models::Dataset;
use capeeco_dataset_models::config::LoaderConfig;
use capeeco_loader::load_all;
use capeeco_spatial::partition::Partition;
use capeeco_spatial::{IntersectOptions, run_intersections};
use switchy_database::Database;

/// Creates the database if needed, enables `PostGIS` and migrates.
///
/// # Errors
///
/// Returns an error if any part of setup fails.
pub async fn setup(db_config: &DatabaseConfig) -> Result<(), Box<dyn std::error::Error>> {
    setup_database(db_config).await?;
    Ok(())
}

/// Loads `datasets` and logs the resulting row counts.
///
/// # Errors
///
/// Returns an error if the database connection cannot be opened.
pub async fn load(
    multi: &MultiProgress,
    db_config: &DatabaseConfig,
    config: &LoaderConfig,
    datasets: &[Dataset],
) -> Result<(), Box<dyn std::error::Error>> {
    let db = connect(db_config).await?;
    run_load(multi, db.as_ref(), config, datasets).await;
    log_row_counts(db.as_ref(), &analyze_tables()).await;
    Ok(())
}

/// Builds indexes.
///
/// # Errors
///
/// Returns an error if the database connection cannot be opened.
pub async fn index(
    multi: &MultiProgress,
    db_config: &DatabaseConfig,
) -> Result<(), Box<dyn std::error::Error>> {
    let db = connect(db_config).await?;
    run_index(multi, db.as_ref()).await;
    Ok(())
}

/// Rebuilds the derived tables.
///
/// # Errors
///
/// Returns an error if the connection cannot be opened or the run cannot
/// start.
pub async fn intersect(
    multi: &MultiProgress,
    db_config: &DatabaseConfig,
    config: &LoaderConfig,
    resume_from: Option<Partition>,
) -> Result<(), Box<dyn std::error::Error>> {
    let db = connect(db_config).await?;
    run_intersect(multi, db.as_ref(), config, resume_from).await
}

/// Runs setup, load, index and intersect in order. A freshly loaded
/// parcel table invalidates any earlier overlap rows, so intersection
/// always starts from scratch here.
///
/// # Errors
///
/// Returns an error if setup fails, the connection cannot be opened, or
/// the intersection run cannot start.
pub async fn all(
    multi: &MultiProgress,
    db_config: &DatabaseConfig,
    config: &LoaderConfig,
) -> Result<(), Box<dyn std::error::Error>> {
    let start = Instant::now();

    setup(db_config).await?;

    let db = connect(db_config).await?;
    run_load(multi, db.as_ref(), config, Dataset::ALL).await;
    run_index(multi, db.as_ref()).await;
    run_intersect(multi, db.as_ref(), config, None).await?;

    log_row_counts(db.as_ref(), &analyze_tables()).await;
    log::info!("Pipeline complete in {:.1}s", start.elapsed().as_secs_f64());
    Ok(())
}

async fn run_load(
    multi: &MultiProgress,
    db: &dyn Database,
    config: &LoaderConfig,
    datasets: &[Dataset],
) {
    log::info!("  Data directory: {}", config.data_dir.display());
    let progress = IndicatifProgress::features_spinner(multi, "Loading");
    let summary = load_all(db, config, datasets, &progress).await;
    if !summary.all_succeeded() {
        log::warn!(
            "  {} of {} datasets failed; their production tables were left unchanged",
            summary.failures.len(),
            datasets.len()
        );
    }
}

async fn run_index(multi: &MultiProgress, db: &dyn Database) {
    let progress = IndicatifProgress::steps_bar(multi, "Indexes");
    build_indexes(db, &progress).await;
}

async fn run_intersect(
    multi: &MultiProgress,
    db: &dyn Database,
    config: &LoaderConfig,
    resume_from: Option<Partition>,
) -> Result<(), Box<dyn std::error::Error>> {
    let parcels = count_rows(db, Dataset::Parcels.production_table()).await?;
    if parcels == 0 {
        log::warn!("  No parcels loaded, skipping spatial intersections");
        return Ok(());
    }

    let options = IntersectOptions {
        progress_every: config.progress_every,
        resume_from,
    };
    let progress = IndicatifProgress::steps_bar(multi, "Intersections");
    let report = run_intersections(db, &options, &progress).await?;

    for overlap in &report.overlaps {
        if !overlap.partitions_failed.is_empty() {
            log::warn!(
                "  [{}] {} partitions failed: {}",
                overlap.kind,
                overlap.partitions_failed.len(),
                overlap
                    .partitions_failed
                    .iter()
                    .map(|(key, _)| key.as_str())
                    .collect::<Vec<_>>()
                    .join(", ")
            );
        }
    }
    Ok(())
}

