//! Post-load index creation.
//!
//! Indexes are created after bulk loading, never before: maintaining them
//! during the load would slow every insert. Each statement is
//! `CREATE INDEX IF NOT EXISTS`, so the step is safe to repeat, and each
//! runs on its own so one failure does not stop the rest.

use std::sync::Arc;

use capeeco_dataset_models::Dataset;
use capeeco_source::progress::ProgressCallback;
use switchy_database::Database;

use crate::{qualified, tables};

/// Index access method.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IndexMethod {
    /// R-tree over geometry bounding boxes.
    Gist,
    /// Ordinary B-tree.
    Btree,
    /// Inverted index for full-text search.
    Gin,
}

impl IndexMethod {
    const fn as_sql(self) -> &'static str {
        match self {
            Self::Gist => "GIST",
            Self::Btree => "BTREE",
            Self::Gin => "GIN",
        }
    }
}

/// One index definition.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IndexSpec {
    /// Index name, unique within the schema.
    pub name: &'static str,
    /// Unqualified table name.
    pub table: &'static str,
    /// Access method.
    pub method: IndexMethod,
    /// Indexed column list or expression, without parentheses.
    pub expression: &'static str,
}

impl IndexSpec {
    /// The idempotent `CREATE INDEX` statement.
    #[must_use]
    pub fn create_sql(&self) -> String {
        format!(
            "CREATE INDEX IF NOT EXISTS {} ON {} USING {} ({})",
            self.name,
            qualified(self.table),
            self.method.as_sql(),
            self.expression
        )
    }
}

const fn gist(name: &'static str, dataset: Dataset) -> IndexSpec {
    IndexSpec {
        name,
        table: dataset.production_table(),
        method: IndexMethod::Gist,
        expression: "geom",
    }
}

const fn btree(name: &'static str, table: &'static str, expression: &'static str) -> IndexSpec {
    IndexSpec {
        name,
        table,
        method: IndexMethod::Btree,
        expression,
    }
}

/// Every index the loader maintains.
pub const INDEXES: &[IndexSpec] = &[
    // Spatial
    gist("idx_properties_geom", Dataset::Parcels),
    gist("idx_biodiversity_geom", Dataset::BiodiversityAreas),
    gist("idx_ecosystem_geom", Dataset::EcosystemTypes),
    gist("idx_address_geom", Dataset::AddressPoints),
    gist("idx_heritage_geom", Dataset::HeritageSites),
    gist("idx_urban_edges_geom", Dataset::UrbanEdges),
    gist("idx_wetlands_geom", Dataset::Wetlands),
    gist("idx_envfocus_geom", Dataset::EnvironmentalFocusAreas),
    // Overlap lookups by parcel
    btree(
        "idx_prop_bio_property",
        tables::PROPERTY_BIODIVERSITY,
        "property_id",
    ),
    btree(
        "idx_prop_eco_property",
        tables::PROPERTY_ECOSYSTEMS,
        "property_id",
    ),
    // Attribute
    btree("idx_properties_sg26", "properties", "sg26_code"),
    btree("idx_properties_suburb", "properties", "suburb"),
    btree("idx_properties_erf", "properties", "erf_number"),
    btree("idx_properties_zoning", "properties", "zoning_primary"),
    btree(
        "idx_properties_centroid",
        "properties",
        "centroid_lon, centroid_lat",
    ),
    btree("idx_biodiversity_cba", "biodiversity_areas", "cba_category"),
    btree("idx_ecosystem_threat", "ecosystem_types", "threat_status"),
    btree("idx_urban_edges_type", "urban_edges", "edge_type"),
    btree("idx_address_suburb", "address_points", "suburb"),
    btree("idx_address_street", "address_points", "street_name"),
    // Full-text address search
    IndexSpec {
        name: "idx_address_full",
        table: "address_points",
        method: IndexMethod::Gin,
        expression: "to_tsvector('english', full_address)",
    },
];

/// Tables whose planner statistics are refreshed after indexing.
#[must_use]
pub fn analyze_tables() -> Vec<&'static str> {
    Dataset::ALL
        .iter()
        .map(|d| d.production_table())
        .chain(tables::DERIVED.iter().copied())
        .collect()
}

/// Outcome of [`build_indexes`].
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct IndexReport {
    /// Indexes that exist after the run.
    pub created: Vec<&'static str>,
    /// Indexes that failed, with the error text.
    pub failed: Vec<(&'static str, String)>,
    /// Tables analyzed successfully.
    pub analyzed: usize,
}

/// Creates every index in [`INDEXES`], then runs `ANALYZE` on every
/// loaded table. Failures are logged as warnings and recorded in the
/// report; this function never aborts part-way.
pub async fn build_indexes(
    db: &dyn Database,
    progress: &Arc<dyn ProgressCallback>,
) -> IndexReport {
    log::info!("=== STEP 3: CREATE INDEXES ===");

    let mut report = IndexReport::default();
    let analyze = analyze_tables();
    progress.set_total((INDEXES.len() + analyze.len()) as u64);

    for index in INDEXES {
        log::info!("  {}", index.name);
        progress.set_message(index.name.to_string());
        match db.exec_raw(&index.create_sql()).await {
            Ok(_) => report.created.push(index.name),
            Err(e) => {
                log::warn!("  Index warning ({}): {e}", index.name);
                report.failed.push((index.name, e.to_string()));
            }
        }
        progress.inc(1);
    }

    for table in analyze {
        progress.set_message(format!("ANALYZE {table}"));
        match db.exec_raw(&format!("ANALYZE {}", qualified(table))).await {
            Ok(_) => report.analyzed += 1,
            Err(e) => log::warn!("  ANALYZE {table} failed: {e}"),
        }
        progress.inc(1);
    }

    progress.finish(format!(
        "{} indexes, {} failed",
        report.created.len(),
        report.failed.len()
    ));
    log::info!(
        "  Indexes created ({} ok, {} failed) and {} tables analyzed",
        report.created.len(),
        report.failed.len(),
        report.analyzed
    );
    report
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeSet;

    use super::*;

    #[test]
    fn index_names_are_unique() {
        let names: BTreeSet<_> = INDEXES.iter().map(|i| i.name).collect();
        assert_eq!(names.len(), INDEXES.len());
    }

    #[test]
    fn every_production_table_has_a_spatial_index() {
        for dataset in Dataset::ALL {
            assert!(
                INDEXES.iter().any(|i| i.table == dataset.production_table()
                    && i.method == IndexMethod::Gist
                    && i.expression == "geom"),
                "{dataset} has no GiST index"
            );
        }
    }

    #[test]
    fn create_sql_is_idempotent_and_qualified() {
        let sql = INDEXES[0].create_sql();
        assert_eq!(
            sql,
            "CREATE INDEX IF NOT EXISTS idx_properties_geom ON capeeco.properties USING GIST (geom)"
        );
        assert!(INDEXES
            .iter()
            .all(|i| i.create_sql().starts_with("CREATE INDEX IF NOT EXISTS ")));
    }

    #[test]
    fn address_search_has_full_text_index() {
        let fts = INDEXES
            .iter()
            .find(|i| i.method == IndexMethod::Gin)
            .unwrap();
        assert_eq!(fts.table, Dataset::AddressPoints.production_table());
        assert!(fts.create_sql().contains("to_tsvector('english', full_address)"));
    }

    #[test]
    fn analyze_covers_production_and_derived_tables() {
        let analyzed = analyze_tables();
        assert_eq!(analyzed.len(), Dataset::ALL.len() + tables::DERIVED.len());
        assert!(analyzed.contains(&"properties"));
        assert!(analyzed.contains(&"property_urban_edge"));
    }
}
