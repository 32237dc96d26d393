#![cfg_attr(feature = "fail-on-warnings", deny(warnings))]
#![warn(clippy::all, clippy::pedantic, clippy::nursery, clippy::cargo)]
#![allow(clippy::multiple_crate_versions, clippy::cargo_common_metadata)]

//! Parcel intersections computed in `PostGIS`.
//!
//! Each overlap kind is rebuilt by truncating its table and then inserting
//! one suburb partition at a time, so no single statement joins the whole
//! parcel table. A failing partition is logged and skipped. Inserts ignore
//! conflicts on the `(parcel, feature)` pair, which makes an interrupted
//! run resumable from any partition.

pub mod overlap;
pub mod partition;
pub mod urban_edge;

use std::sync::Arc;
use std::time::Instant;

use capeeco_database::DbError;
use capeeco_source::progress::ProgressCallback;
use switchy_database::Database;

use crate::overlap::OverlapKind;
use crate::partition::{Partition, list_partitions, remaining};
use crate::urban_edge::{UrbanEdgeReport, compute_urban_edge};

/// Errors that can occur during the intersection step.
#[derive(Debug, thiserror::Error)]
pub enum IntersectError {
    /// Database error.
    #[error(transparent)]
    Database(#[from] DbError),

    /// Data conversion error.
    #[error("Data conversion error: {message}")]
    Conversion {
        /// Description of what went wrong.
        message: String,
    },

    /// `--resume-from` named a partition that does not exist.
    #[error("Unknown partition to resume from: {key}")]
    UnknownPartition {
        /// The requested key.
        key: String,
    },

    /// Some parcel has no urban edge status row, or has several.
    #[error("Urban edge status covers {statuses} rows for {parcels} parcels")]
    IncompleteCoverage {
        /// Parcel count.
        parcels: i64,
        /// Status row count.
        statuses: i64,
    },
}

impl From<switchy_database::DatabaseError> for IntersectError {
    fn from(e: switchy_database::DatabaseError) -> Self {
        Self::Database(DbError::from(e))
    }
}

/// Run options.
#[derive(Debug, Clone)]
pub struct IntersectOptions {
    /// Log a progress line every this many partitions.
    pub progress_every: usize,
    /// Continue an interrupted run from this partition, keeping existing
    /// rows.
    pub resume_from: Option<Partition>,
}

/// Result of one overlap kind.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OverlapReport {
    /// Which overlap.
    pub kind: OverlapKind,
    /// Partitions that completed.
    pub partitions_done: usize,
    /// Partitions that failed, with the error text.
    pub partitions_failed: Vec<(String, String)>,
    /// Pairs inserted during this run.
    pub rows_inserted: u64,
}

/// Result of [`run_intersections`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IntersectReport {
    /// One entry per overlap kind.
    pub overlaps: Vec<OverlapReport>,
    /// Urban edge counts, or `None` if that step failed.
    pub urban_edge: Option<UrbanEdgeReport>,
}

/// Rebuilds every derived table.
///
/// # Errors
///
/// Returns [`IntersectError`] if partitions cannot be listed, the resume
/// key is unknown, or a truncate fails. Per-partition and urban edge
/// failures are logged and reported, not returned.
pub async fn run_intersections(
    db: &dyn Database,
    options: &IntersectOptions,
    progress: &Arc<dyn ProgressCallback>,
) -> Result<IntersectReport, IntersectError> {
    log::info!("=== STEP 4: SPATIAL INTERSECTIONS ===");
    let start = Instant::now();

    let partitions = list_partitions(db).await?;
    let todo = remaining(&partitions, options.resume_from.as_ref())?;
    log::info!(
        "  {} suburb partitions ({} to process)",
        partitions.len(),
        todo.len()
    );

    let mut overlaps = Vec::with_capacity(OverlapKind::ALL.len());
    for &kind in OverlapKind::ALL {
        if options.resume_from.is_none() {
            db.exec_raw(&kind.truncate_sql()).await?;
        }
        overlaps.push(run_overlap(db, kind, todo, options.progress_every, progress).await);
    }

    let urban_edge = match compute_urban_edge(db).await {
        Ok(report) => Some(report),
        Err(e) => {
            log::error!("  Urban edge status failed: {e}");
            None
        }
    };

    log::info!(
        "  Intersections completed in {:.1}s",
        start.elapsed().as_secs_f64()
    );
    Ok(IntersectReport {
        overlaps,
        urban_edge,
    })
}

/// Inserts the overlaps of `kind` for each partition in order.
pub async fn run_overlap(
    db: &dyn Database,
    kind: OverlapKind,
    partitions: &[Partition],
    progress_every: usize,
    progress: &Arc<dyn ProgressCallback>,
) -> OverlapReport {
    log::info!("  [{kind}] intersecting parcels with {}", kind.dataset());
    let progress_every = progress_every.max(1);
    let total = partitions.len();

    progress.set_total(total as u64);
    progress.set_position(0);

    let mut report = OverlapReport {
        kind,
        partitions_done: 0,
        partitions_failed: Vec::new(),
        rows_inserted: 0,
    };

    for (i, partition) in partitions.iter().enumerate() {
        progress.set_message(format!("{kind}: {partition}"));
        match db
            .exec_raw_params(&kind.insert_sql(partition), &partition.params())
            .await
        {
            Ok(n) => {
                report.rows_inserted += n;
                report.partitions_done += 1;
            }
            Err(e) => {
                log::warn!("  [{kind}] partition {partition} failed: {e}");
                report.partitions_failed.push((partition.to_string(), e.to_string()));
            }
        }
        progress.inc(1);

        let done = i + 1;
        if done.is_multiple_of(progress_every) || done == total {
            log::info!(
                "  [{kind}] {done}/{total} partitions, {} rows",
                report.rows_inserted
            );
        }
    }

    progress.finish(format!(
        "{kind}: {} rows, {} failed partitions",
        report.rows_inserted,
        report.partitions_failed.len()
    ));
    report
}
