#![cfg_attr(feature = "fail-on-warnings", deny(warnings))]
#![warn(clippy::all, clippy::pedantic, clippy::nursery, clippy::cargo)]
#![allow(clippy::multiple_crate_versions, clippy::cargo_common_metadata)]

//! Staged loading of source datasets into the capeeco schema.
//!
//! A dataset load is: truncate staging, stream every source file through
//! the reader and normalizer, map properties to columns, write each batch
//! with sub-batch fallback, deduplicate on the unique key, then
//! [`promote::promote`] staging into production in one transaction.
//!
//! File reading and geometry work run on a blocking thread and hand
//! normalized batches to the async writer over a bounded channel, so at
//! most a couple of batches are in memory at once.

pub mod mapping;
pub mod promote;
pub mod staging;

use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};

use capeeco_database::DbError;
use capeeco_dataset_models::config::{ConfigError, LoaderConfig};
use capeeco_dataset_models::{Dataset, DatasetSource};
use capeeco_geometry::{NormalizeStats, NormalizedBatch, Normalizer};
use capeeco_source::progress::ProgressCallback;
use capeeco_source::{ChunkedFeatureReader, ReaderError};
use switchy_database::Database;
use tokio::sync::mpsc;

use crate::mapping::map_batch;
use crate::staging::{StagingWriter, WriteOutcome, write_with_fallback};

/// `PostgreSQL` limit on bind parameters per statement.
pub const PG_MAX_PARAMS: usize = 65_535;

/// Normalized batches buffered between the reader thread and the writer.
const CHANNEL_CAPACITY: usize = 2;

/// Errors that can occur while loading a dataset.
#[derive(Debug, thiserror::Error)]
pub enum LoadError {
    /// A required source file is not on disk.
    #[error("{dataset}: source file not found: {}", path.display())]
    MissingFile {
        /// Dataset being loaded.
        dataset: Dataset,
        /// Expected location.
        path: PathBuf,
    },

    /// A source file could not be read.
    #[error("Reader error: {0}")]
    Reader(#[from] ReaderError),

    /// Database error.
    #[error(transparent)]
    Database(#[from] DbError),

    /// Nothing survived validation, so production was left untouched.
    #[error("{dataset}: staging table is empty after load, nothing promoted")]
    EmptyStaging {
        /// Dataset being loaded.
        dataset: Dataset,
    },

    /// Staging and production tables are incompatible.
    #[error("{dataset}: schema mismatch: {message}")]
    SchemaMismatch {
        /// Dataset being loaded.
        dataset: Dataset,
        /// Description of the mismatch.
        message: String,
    },

    /// Invalid configuration for this dataset.
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    /// The reader thread panicked or was cancelled.
    #[error("Reader task failed: {0}")]
    Task(#[from] tokio::task::JoinError),
}

impl From<switchy_database::DatabaseError> for LoadError {
    fn from(e: switchy_database::DatabaseError) -> Self {
        Self::Database(DbError::from(e))
    }
}

/// Per-dataset load statistics.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DatasetReport {
    /// Features read from source files.
    pub features_read: usize,
    /// Features whose geometry was malformed and read as null. They are
    /// also counted in the normalizer's empty-geometry drops.
    pub unconvertible: usize,
    /// Normalizer counters summed over every batch.
    pub normalize: NormalizeStats,
    /// Rows dropped because the unique key was missing.
    pub missing_key: usize,
    /// Rows written to staging.
    pub staged: u64,
    /// Labels of rows that could not be written.
    pub write_failures: Vec<String>,
    /// Staged rows removed as duplicates of the unique key.
    pub duplicates_removed: u64,
    /// Rows in production after promotion.
    pub promoted: i64,
    /// Optional source files that were absent.
    pub files_skipped: Vec<String>,
    /// Wall-clock duration of the load.
    pub elapsed: Duration,
}

impl DatasetReport {
    fn log_summary(&self, dataset: Dataset) {
        log::info!(
            "[{dataset}] staged {} rows ({} features read, {} with malformed geometry, \
             {} dropped by normalization, {} missing key, {} failed writes, \
             {} duplicates removed), promoted {}",
            self.staged,
            self.features_read,
            self.unconvertible,
            self.normalize.dropped(),
            self.missing_key,
            self.write_failures.len(),
            self.duplicates_removed,
            self.promoted,
        );
    }
}

/// Checks that every required source file exists and returns the files to
/// read. Missing optional files are logged and reported as skipped.
///
/// # Errors
///
/// Returns [`LoadError::MissingFile`] for the first absent required file.
pub fn resolve_sources(
    config: &LoaderConfig,
    dataset: Dataset,
) -> Result<(Vec<(&'static DatasetSource, PathBuf)>, Vec<String>), LoadError> {
    let mut present = Vec::new();
    let mut skipped = Vec::new();

    for source in dataset.sources() {
        let path = config.file_path(source);
        if path.is_file() {
            present.push((source, path));
        } else if source.required {
            return Err(LoadError::MissingFile { dataset, path });
        } else {
            log::warn!(
                "  [{dataset}] optional file {} not found, skipping",
                path.display()
            );
            skipped.push(source.file_name());
        }
    }

    Ok((present, skipped))
}

/// Loads one dataset end to end: staging, validation, promotion.
///
/// # Errors
///
/// Returns [`LoadError`] if a required file is missing, a file cannot be
/// read, a database statement outside the per-row fallback fails, or
/// promotion fails. Production keeps its previous contents in every error
/// case.
pub async fn load_dataset(
    db: &dyn Database,
    config: &LoaderConfig,
    dataset: Dataset,
    progress: &Arc<dyn ProgressCallback>,
) -> Result<DatasetReport, LoadError> {
    let start = Instant::now();
    log::info!("[{dataset}] loading into {}", dataset.production_table());

    let (sources, files_skipped) = resolve_sources(config, dataset)?;
    let normalizer = Normalizer::new(config.source_crs(dataset)?, dataset.target_geometry());
    let chunk_size = config.chunk_size(dataset);

    let mut report = DatasetReport {
        files_skipped,
        ..DatasetReport::default()
    };

    staging::truncate(db, dataset).await?;

    for (source, path) in sources {
        log::info!("  Reading {}", path.display());
        progress.set_message(format!("{dataset}: {}", source.file_name()));

        let writer = StagingWriter::new(db, dataset, source.column_names());
        let (mut rx, handle) = spawn_reader(path, chunk_size, normalizer);

        while let Some(batch) = rx.recv().await {
            let batch = batch?;
            report.features_read += batch.stats.input;
            progress.inc(batch.stats.input as u64);

            let mapped = map_batch(source, dataset.unique_key(), batch.features);
            if mapped.missing_key > 0 {
                log::warn!(
                    "  Dropped {} rows without {}",
                    mapped.missing_key,
                    dataset.unique_key().unwrap_or("key")
                );
            }
            report.missing_key += mapped.missing_key;
            report.normalize += batch.stats;

            let WriteOutcome { written, failed } =
                write_with_fallback(&writer, &mapped.rows, config.sub_batch_size).await;
            report.staged += written;
            report.write_failures.extend(failed);

            log::info!("  Processed {} features so far...", report.features_read);
        }

        let unconvertible = handle.await??;
        if unconvertible > 0 {
            log::warn!(
                "  {unconvertible} features in {} had malformed geometry",
                source.file_name()
            );
        }
        report.unconvertible += unconvertible;
    }

    if let Some(key) = dataset.unique_key() {
        report.duplicates_removed = staging::deduplicate(db, dataset, key).await?;
    }

    let promotion = promote::promote(db, dataset).await?;
    report.promoted = promotion.promoted;
    report.elapsed = start.elapsed();

    report.log_summary(dataset);
    Ok(report)
}

type BatchReceiver = mpsc::Receiver<Result<NormalizedBatch, ReaderError>>;

/// Streams normalized batches from `path` on a blocking thread. The task
/// resolves to the number of features with malformed geometry.
fn spawn_reader(
    path: PathBuf,
    chunk_size: usize,
    normalizer: Normalizer,
) -> (
    BatchReceiver,
    tokio::task::JoinHandle<Result<usize, ReaderError>>,
) {
    let (tx, rx) = mpsc::channel(CHANNEL_CAPACITY);

    let handle = tokio::task::spawn_blocking(move || {
        let mut reader = ChunkedFeatureReader::open(&path, chunk_size)?;
        for batch in reader.by_ref() {
            let normalized = batch.map(|b| normalizer.normalize(b.features));
            let failed = normalized.is_err();
            if tx.blocking_send(normalized).is_err() || failed {
                break;
            }
        }
        Ok(reader.unconvertible())
    });

    (rx, handle)
}

/// Outcome of [`load_all`].
#[derive(Debug, Default)]
pub struct LoadSummary {
    /// Datasets that loaded, with their reports.
    pub reports: Vec<(Dataset, DatasetReport)>,
    /// Datasets that failed, with the error.
    pub failures: Vec<(Dataset, LoadError)>,
}

impl LoadSummary {
    /// Returns `true` if every dataset loaded.
    #[must_use]
    pub fn all_succeeded(&self) -> bool {
        self.failures.is_empty()
    }
}

/// Loads each of `datasets` in turn. A failed dataset is logged and the
/// run moves on to the next one.
pub async fn load_all(
    db: &dyn Database,
    config: &LoaderConfig,
    datasets: &[Dataset],
    progress: &Arc<dyn ProgressCallback>,
) -> LoadSummary {
    log::info!("=== STEP 2: LOAD DATA ===");
    let mut summary = LoadSummary::default();

    for &dataset in datasets {
        let start = Instant::now();
        match load_dataset(db, config, dataset, progress).await {
            Ok(report) => {
                log::info!(
                    "[{dataset}] completed in {:.1}s",
                    start.elapsed().as_secs_f64()
                );
                summary.reports.push((dataset, report));
            }
            Err(e) => {
                log::error!(
                    "[{dataset}] failed after {:.1}s: {e}",
                    start.elapsed().as_secs_f64()
                );
                summary.failures.push((dataset, e));
            }
        }
    }

    progress.finish(format!(
        "{} loaded, {} failed",
        summary.reports.len(),
        summary.failures.len()
    ));

    let succeeded: Vec<String> = summary.reports.iter().map(|(d, _)| d.to_string()).collect();
    let failed: Vec<String> = summary.failures.iter().map(|(d, _)| d.to_string()).collect();
    log::info!("  Succeeded: [{}]", succeeded.join(", "));
    if !failed.is_empty() {
        log::warn!("  Failed: [{}]", failed.join(", "));
    }

    summary
}

#[cfg(test)]
mod tests {
    use std::fs;

    use super::*;

    fn temp_dir(name: &str) -> PathBuf {
        let dir = std::env::temp_dir().join(format!("capeeco_loader_{name}_{}", std::process::id()));
        let _ = fs::remove_dir_all(&dir);
        fs::create_dir_all(&dir).unwrap();
        dir
    }

    fn config(dir: &std::path::Path) -> LoaderConfig {
        LoaderConfig {
            data_dir: dir.to_path_buf(),
            ..LoaderConfig::default()
        }
    }

    #[test]
    fn missing_required_file_fails_before_any_write() {
        let dir = temp_dir("missing_required");
        let err = resolve_sources(&config(&dir), Dataset::UrbanEdges).unwrap_err();
        assert!(matches!(
            err,
            LoadError::MissingFile {
                dataset: Dataset::UrbanEdges,
                ..
            }
        ));
    }

    #[test]
    fn missing_optional_file_is_skipped() {
        let dir = temp_dir("missing_optional");
        let cfg = config(&dir);
        let sources = Dataset::UrbanEdges.sources();
        fs::write(cfg.file_path(&sources[0]), "{}").unwrap();

        let (present, skipped) = resolve_sources(&cfg, Dataset::UrbanEdges).unwrap();
        assert_eq!(present.len(), 1);
        assert_eq!(present[0].0.file_stem, sources[0].file_stem);
        assert_eq!(skipped, vec![sources[1].file_name()]);
    }

    #[tokio::test]
    async fn reader_thread_streams_normalized_batches() {
        let dir = temp_dir("reader_thread");
        let path = dir.join("edges.geojson");
        fs::write(
            &path,
            r#"{"type":"FeatureCollection","features":[
                {"type":"Feature","properties":{"OBJECTID":1},"geometry":{"type":"Polygon","coordinates":[[[18.0,-34.0],[18.1,-34.0],[18.1,-33.9],[18.0,-34.0]]]}},
                {"type":"Feature","properties":{"OBJECTID":2},"geometry":null},
                {"type":"Feature","properties":{"OBJECTID":3},"geometry":{"type":"Polygon","coordinates":[[[18.2,-34.0],[18.3,-34.0],[18.3,-33.9],[18.2,-34.0]]]}}
            ]}"#,
        )
        .unwrap();

        let normalizer = Normalizer::new(
            Dataset::UrbanEdges.default_source_crs(),
            Dataset::UrbanEdges.target_geometry(),
        );
        let (mut rx, handle) = spawn_reader(path, 2, normalizer);

        let mut stats = NormalizeStats::default();
        let mut batches = 0;
        while let Some(batch) = rx.recv().await {
            stats += batch.unwrap().stats;
            batches += 1;
        }
        let unconvertible = handle.await.unwrap().unwrap();

        assert_eq!(unconvertible, 0);
        assert_eq!(batches, 2);
        assert_eq!(stats.input, 3);
        assert_eq!(stats.kept(), 2);
        assert_eq!(stats.dropped_empty, 1);
    }

    #[tokio::test]
    async fn reader_thread_counts_malformed_geometry_without_stopping() {
        let dir = temp_dir("reader_malformed");
        let path = dir.join("edges.geojson");
        fs::write(
            &path,
            r#"{"type":"FeatureCollection","features":[
                {"type":"Feature","properties":{"OBJECTID":1},"geometry":{"type":"Polygon","coordinates":null}},
                {"type":"Feature","properties":{"OBJECTID":2},"geometry":{"type":"Polygon","coordinates":[[[18.2,-34.0],[18.3,-34.0],[18.3,-33.9],[18.2,-34.0]]]}}
            ]}"#,
        )
        .unwrap();

        let normalizer = Normalizer::new(
            Dataset::UrbanEdges.default_source_crs(),
            Dataset::UrbanEdges.target_geometry(),
        );
        let (mut rx, handle) = spawn_reader(path, 10, normalizer);

        let mut stats = NormalizeStats::default();
        while let Some(batch) = rx.recv().await {
            stats += batch.unwrap().stats;
        }

        assert_eq!(handle.await.unwrap().unwrap(), 1);
        assert_eq!(stats.input, 2);
        assert_eq!(stats.kept(), 1);
        assert_eq!(stats.dropped_empty, 1);
    }

    #[tokio::test]
    async fn reader_thread_reports_missing_file() {
        let dir = temp_dir("reader_missing");
        let normalizer = Normalizer::new(
            Dataset::Wetlands.default_source_crs(),
            Dataset::Wetlands.target_geometry(),
        );
        let (mut rx, handle) = spawn_reader(dir.join("absent.geojson"), 10, normalizer);

        assert!(rx.recv().await.is_none());
        assert!(matches!(handle.await.unwrap(), Err(ReaderError::Io(_))));
    }
}
