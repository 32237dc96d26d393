//! Staging to production promotion.
//!
//! One promotion is one transaction: truncate the production table, copy
//! the columns both tables share (with a final validity pass on `geom`),
//! fill derived fields, then empty the staging table. Any failure rolls
//! the whole unit back and leaves production as it was.

use std::collections::BTreeSet;

use capeeco_database::introspect::{count_rows, table_columns};
use capeeco_database::qualified;
use capeeco_dataset_models::{Dataset, TargetGeometry};
use switchy_database::Database;

use crate::LoadError;

/// Bookkeeping columns each table fills for itself.
pub const EXCLUDED_COLUMNS: &[&str] = &["id", "created_at"];

/// Outcome of [`promote`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PromotionReport {
    /// Columns copied, in production order.
    pub columns: Vec<String>,
    /// Staging-only columns that were left behind.
    pub dropped_columns: Vec<String>,
    /// Rows in the production table after the commit.
    pub promoted: i64,
}

/// Columns present in both tables, in `production` order, excluding
/// [`EXCLUDED_COLUMNS`].
#[must_use]
pub fn common_columns(production: &[String], staging: &[String]) -> Vec<String> {
    let staging: BTreeSet<&str> = staging.iter().map(String::as_str).collect();
    production
        .iter()
        .filter(|c| !EXCLUDED_COLUMNS.contains(&c.as_str()) && staging.contains(c.as_str()))
        .cloned()
        .collect()
}

/// Staging columns that production does not have.
#[must_use]
pub fn staging_only_columns(production: &[String], staging: &[String]) -> Vec<String> {
    staging
        .iter()
        .filter(|c| !EXCLUDED_COLUMNS.contains(&c.as_str()) && !production.contains(c))
        .cloned()
        .collect()
}

/// The last repair applied to staged geometry on its way into production.
#[must_use]
pub const fn geometry_expression(target: TargetGeometry) -> &'static str {
    match target {
        TargetGeometry::MultiPolygon => "ST_Multi(ST_CollectionExtract(ST_MakeValid(geom), 3))",
        TargetGeometry::Point => "ST_MakeValid(geom)",
    }
}

/// The `INSERT ... SELECT` that copies `columns` from `dataset`'s staging
/// table into its production table. Null and empty geometries are skipped.
#[must_use]
pub fn promote_sql(dataset: Dataset, columns: &[String]) -> String {
    let inner: Vec<String> = columns
        .iter()
        .map(|c| {
            if c == "geom" {
                format!("{} AS geom", geometry_expression(dataset.target_geometry()))
            } else {
                c.clone()
            }
        })
        .collect();
    let list = columns.join(", ");

    format!(
        "INSERT INTO {production} ({list})
         SELECT {list} FROM (
             SELECT id, {inner}
             FROM {staging}
             WHERE geom IS NOT NULL
         ) s
         WHERE NOT ST_IsEmpty(s.geom)
         ORDER BY s.id",
        production = qualified(dataset.production_table()),
        inner = inner.join(", "),
        staging = qualified(dataset.staging_table()),
    )
}

/// Post-insert update filling columns computed from the geometry, if
/// `dataset` has any.
#[must_use]
pub fn derived_fields_sql(dataset: Dataset) -> Option<String> {
    match dataset {
        Dataset::Parcels => Some(format!(
            "UPDATE {} SET
                 area_sqm = ST_Area(geom::geography),
                 area_ha = ST_Area(geom::geography) / 10000.0,
                 centroid_lon = ST_X(ST_Centroid(geom)),
                 centroid_lat = ST_Y(ST_Centroid(geom))",
            qualified(dataset.production_table())
        )),
        Dataset::BiodiversityAreas
        | Dataset::EcosystemTypes
        | Dataset::AddressPoints
        | Dataset::UrbanEdges
        | Dataset::HeritageSites
        | Dataset::EnvironmentalFocusAreas
        | Dataset::Wetlands => None,
    }
}

/// Replaces `dataset`'s production rows with its staging rows.
///
/// # Errors
///
/// * [`LoadError::SchemaMismatch`] if the tables share no columns or do
///   not share `geom`
/// * [`LoadError::EmptyStaging`] if there is nothing to promote
/// * [`LoadError::Database`] if any statement fails; the transaction is
///   rolled back
pub async fn promote(db: &dyn Database, dataset: Dataset) -> Result<PromotionReport, LoadError> {
    let production = table_columns(db, dataset.production_table()).await?;
    let staging = table_columns(db, dataset.staging_table()).await?;

    let columns = common_columns(&production, &staging);
    if columns.is_empty() || !columns.iter().any(|c| c == "geom") {
        return Err(LoadError::SchemaMismatch {
            dataset,
            message: format!(
                "{} and {} share no geometry column (common: [{}])",
                dataset.staging_table(),
                dataset.production_table(),
                columns.join(", ")
            ),
        });
    }

    let dropped_columns = staging_only_columns(&production, &staging);
    if !dropped_columns.is_empty() {
        log::warn!(
            "  [{dataset}] staging-only columns not promoted: {}",
            dropped_columns.join(", ")
        );
    }

    if count_rows(db, dataset.staging_table()).await? == 0 {
        return Err(LoadError::EmptyStaging { dataset });
    }

    log::info!(
        "  Promoting {} -> {} ({} columns)",
        dataset.staging_table(),
        dataset.production_table(),
        columns.len()
    );

    let txn = db.begin_transaction().await?;
    match replace_production(txn.as_ref(), dataset, &columns).await {
        Ok(promoted) => {
            txn.commit().await?;
            log::info!("  Promoted {promoted} rows into {}", dataset.production_table());
            Ok(PromotionReport {
                columns,
                dropped_columns,
                promoted,
            })
        }
        Err(e) => {
            log::error!("  Promotion of {dataset} failed, rolling back: {e}");
            if let Err(rollback) = txn.rollback().await {
                log::warn!("  Rollback of {dataset} promotion also failed: {rollback}");
            }
            Err(e)
        }
    }
}

async fn replace_production(
    db: &dyn Database,
    dataset: Dataset,
    columns: &[String],
) -> Result<i64, LoadError> {
    let production = qualified(dataset.production_table());

    db.exec_raw(&format!("TRUNCATE {production} CASCADE")).await?;

    let inserted = db
        .exec_raw_params(&promote_sql(dataset, columns), &[])
        .await?;
    log::debug!("  Inserted {inserted} rows into {production}");

    if let Some(sql) = derived_fields_sql(dataset) {
        log::info!("  Computing derived fields for {}", dataset.production_table());
        db.exec_raw_params(&sql, &[]).await?;
    }

    let promoted = count_rows(db, dataset.production_table()).await?;

    db.exec_raw(&format!("TRUNCATE {}", qualified(dataset.staging_table())))
        .await?;

    Ok(promoted)
}
