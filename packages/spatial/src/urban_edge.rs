//! Inside/outside urban edge status, one row per parcel.

use capeeco_database::introspect::count_rows;
use capeeco_database::{qualified, tables};
use capeeco_dataset_models::Dataset;
use switchy_database::Database;

use crate::IntersectError;

/// Edge type that bounds permitted development.
pub const DEVELOPMENT_EDGE: &str = "development";

/// Marks parcels touching a development edge polygon as inside.
#[must_use]
pub fn inside_sql() -> String {
    format!(
        "INSERT INTO {status} (property_id, inside_urban_edge)
         SELECT p.id, TRUE
         FROM {parcels} p
         WHERE EXISTS (
             SELECT 1 FROM {edges} e
             WHERE e.edge_type = '{DEVELOPMENT_EDGE}' AND ST_Intersects(p.geom, e.geom)
         )",
        status = qualified(tables::PROPERTY_URBAN_EDGE),
        parcels = qualified(Dataset::Parcels.production_table()),
        edges = qualified(Dataset::UrbanEdges.production_table()),
    )
}

/// Marks every parcel still without a status row as outside.
#[must_use]
pub fn outside_sql() -> String {
    format!(
        "INSERT INTO {status} (property_id, inside_urban_edge)
         SELECT p.id, FALSE
         FROM {parcels} p
         LEFT JOIN {status} s ON s.property_id = p.id
         WHERE s.property_id IS NULL",
        status = qualified(tables::PROPERTY_URBAN_EDGE),
        parcels = qualified(Dataset::Parcels.production_table()),
    )
}

/// Counts from [`compute_urban_edge`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct UrbanEdgeReport {
    /// Parcels inside a development edge.
    pub inside: u64,
    /// Parcels outside.
    pub outside: u64,
}

/// Rebuilds the status table in one transaction and checks that every
/// parcel has exactly one row.
///
/// # Errors
///
/// * [`IntersectError::Database`] if a statement fails; the table keeps
///   its previous contents
/// * [`IntersectError::IncompleteCoverage`] if the row count differs from
///   the parcel count
pub async fn compute_urban_edge(db: &dyn Database) -> Result<UrbanEdgeReport, IntersectError> {
    log::info!("  Computing urban edge status");

    let txn = db.begin_transaction().await?;
    let result = rebuild(txn.as_ref()).await;
    let report = match result {
        Ok(report) => {
            txn.commit().await?;
            report
        }
        Err(e) => {
            if let Err(rollback) = txn.rollback().await {
                log::warn!("  Rollback of urban edge status also failed: {rollback}");
            }
            return Err(e);
        }
    };

    let parcels = count_rows(db, Dataset::Parcels.production_table()).await?;
    let statuses = count_rows(db, tables::PROPERTY_URBAN_EDGE).await?;
    if parcels != statuses {
        return Err(IntersectError::IncompleteCoverage { parcels, statuses });
    }

    log::info!(
        "  Urban edge: {} inside, {} outside",
        report.inside,
        report.outside
    );
    Ok(report)
}

async fn rebuild(db: &dyn Database) -> Result<UrbanEdgeReport, IntersectError> {
    db.exec_raw(&format!(
        "TRUNCATE {}",
        qualified(tables::PROPERTY_URBAN_EDGE)
    ))
    .await?;
    let inside = db.exec_raw_params(&inside_sql(), &[]).await?;
    let outside = db.exec_raw_params(&outside_sql(), &[]).await?;
    Ok(UrbanEdgeReport { inside, outside })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn inside_uses_development_edges_only() {
        let sql = inside_sql();
        assert!(sql.starts_with(
            "INSERT INTO capeeco.property_urban_edge (property_id, inside_urban_edge)"
        ));
        assert!(sql.contains("SELECT p.id, TRUE"));
        assert!(sql.contains("e.edge_type = 'development'"));
        assert!(sql.contains("ST_Intersects(p.geom, e.geom)"));
    }

    #[test]
    fn outside_is_an_anti_join_on_existing_status() {
        let sql = outside_sql();
        assert!(sql.contains("SELECT p.id, FALSE"));
        assert!(sql.contains(
            "LEFT JOIN capeeco.property_urban_edge s ON s.property_id = p.id"
        ));
        assert!(sql.contains("WHERE s.property_id IS NULL"));
    }
}
