//! Parcel overlaps with biodiversity areas and ecosystem types.

use capeeco_database::{qualified, tables};
use capeeco_dataset_models::Dataset;
use strum_macros::{AsRefStr, Display};

use crate::partition::Partition;

/// A polygon layer whose overlap with parcels is recorded per pair.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display, AsRefStr)]
#[strum(serialize_all = "snake_case")]
pub enum OverlapKind {
    /// Critical biodiversity areas.
    Biodiversity,
    /// Vegetation ecosystem types.
    Ecosystem,
}

impl OverlapKind {
    /// Every overlap kind, in run order.
    pub const ALL: &[Self] = &[Self::Biodiversity, Self::Ecosystem];

    /// Layer intersected with parcels.
    #[must_use]
    pub const fn dataset(self) -> Dataset {
        match self {
            Self::Biodiversity => Dataset::BiodiversityAreas,
            Self::Ecosystem => Dataset::EcosystemTypes,
        }
    }

    /// Derived table receiving the pairs.
    #[must_use]
    pub const fn target_table(self) -> &'static str {
        match self {
            Self::Biodiversity => tables::PROPERTY_BIODIVERSITY,
            Self::Ecosystem => tables::PROPERTY_ECOSYSTEMS,
        }
    }

    /// Feature-side half of the natural key.
    #[must_use]
    pub const fn feature_id_column(self) -> &'static str {
        match self {
            Self::Biodiversity => "biodiversity_area_id",
            Self::Ecosystem => "ecosystem_type_id",
        }
    }

    /// Feature attributes copied onto each pair, as
    /// `(target column, source column)`.
    #[must_use]
    pub const fn attributes(self) -> &'static [(&'static str, &'static str)] {
        match self {
            Self::Biodiversity => &[
                ("cba_category", "cba_category"),
                ("habitat_condition", "habitat_cond"),
            ],
            Self::Ecosystem => &[
                ("vegetation_type", "vegetation_type"),
                ("threat_status", "threat_status"),
            ],
        }
    }

    /// Empties the target table.
    #[must_use]
    pub fn truncate_sql(self) -> String {
        format!("TRUNCATE {}", qualified(self.target_table()))
    }

    /// Inserts every positive-area overlap between the parcels of
    /// `partition` and this layer. Areas are geodetic square metres; the
    /// percentage is of the parcel's area, capped at 100. Pairs already
    /// present are left alone.
    #[must_use]
    pub fn insert_sql(self, partition: &Partition) -> String {
        let feature_id = self.feature_id_column();
        let targets: Vec<&str> = self.attributes().iter().map(|(t, _)| *t).collect();
        let sources: Vec<String> = self
            .attributes()
            .iter()
            .map(|(t, s)| format!("x.{s} AS {t}"))
            .collect();

        format!(
            "INSERT INTO {target} (property_id, {feature_id}, {targets}, overlap_area_sqm, overlap_pct)
             SELECT property_id, {feature_id}, {targets}, overlap_area_sqm,
                    LEAST(overlap_area_sqm / NULLIF(parcel_area_sqm, 0) * 100.0, 100.0)
             FROM (
                 SELECT p.id AS property_id,
                        x.id AS {feature_id},
                        {sources},
                        p.area_sqm AS parcel_area_sqm,
                        ST_Area(ST_Intersection(p.geom, x.geom)::geography) AS overlap_area_sqm
                 FROM {parcels} p
                 JOIN {layer} x ON ST_Intersects(p.geom, x.geom)
                 WHERE {predicate}
             ) o
             WHERE overlap_area_sqm > 0
             ON CONFLICT (property_id, {feature_id}) DO NOTHING",
            target = qualified(self.target_table()),
            targets = targets.join(", "),
            sources = sources.join(", "),
            parcels = qualified(Dataset::Parcels.production_table()),
            layer = qualified(self.dataset().production_table()),
            predicate = partition.predicate(),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn biodiversity_insert_is_partitioned_and_conflict_free() {
        let sql = OverlapKind::Biodiversity.insert_sql(&Partition::Named("Tokai".to_string()));

        assert!(sql.starts_with(
            "INSERT INTO capeeco.property_biodiversity (property_id, biodiversity_area_id, \
             cba_category, habitat_condition, overlap_area_sqm, overlap_pct)"
        ));
        assert!(sql.contains("x.habitat_cond AS habitat_condition"));
        assert!(sql.contains("JOIN capeeco.biodiversity_areas x ON ST_Intersects(p.geom, x.geom)"));
        assert!(sql.contains("WHERE p.suburb = $1"));
        assert!(sql.contains("ON CONFLICT (property_id, biodiversity_area_id) DO NOTHING"));
    }

    #[test]
    fn overlap_is_geodetic_positive_and_capped() {
        let sql = OverlapKind::Ecosystem.insert_sql(&Partition::Unassigned);

        assert!(sql.contains("ST_Area(ST_Intersection(p.geom, x.geom)::geography)"));
        assert!(sql.contains("WHERE overlap_area_sqm > 0"));
        assert!(sql.contains("LEAST(overlap_area_sqm / NULLIF(parcel_area_sqm, 0) * 100.0, 100.0)"));
        assert!(sql.contains("WHERE p.suburb IS NULL"));
        assert!(!sql.contains("$1"));
        assert!(sql.contains("ON CONFLICT (property_id, ecosystem_type_id) DO NOTHING"));
    }

    #[test]
    fn every_kind_targets_a_derived_table() {
        for kind in OverlapKind::ALL {
            assert!(tables::DERIVED.contains(&kind.target_table()), "{kind}");
            assert_eq!(kind.attributes().len(), 2);
        }
        assert_eq!(
            OverlapKind::Ecosystem.truncate_sql(),
            "TRUNCATE capeeco.property_ecosystems"
        );
    }
}
