#![cfg_attr(feature = "fail-on-warnings", deny(warnings))]
#![warn(clippy::all, clippy::pedantic, clippy::nursery, clippy::cargo)]
#![allow(clippy::multiple_crate_versions, clippy::cargo_common_metadata)]

//! Geometry normalization for feature batches.
//!
//! Turns raw source geometry into rows the staging tables accept: every
//! geometry reprojected to `EPSG:4326`, valid, and of the dataset's single
//! target type. Null, empty, and unusable geometries are dropped and
//! counted, never passed through. Normalization is pure: the same batch
//! always yields the same output.

pub mod repair;
pub mod reproject;

use std::ops::AddAssign;

use capeeco_dataset_models::{Crs, TargetGeometry};
use geo::{Geometry, GeometryCollection, HasDimensions, MultiPolygon, Point, Polygon, Validation};

/// Property mapping of a feature, as parsed from the source file.
pub type Properties = serde_json::Map<String, serde_json::Value>;

/// A feature as read from a source file.
#[derive(Debug, Clone, PartialEq)]
pub struct RawFeature {
    /// Geometry, or `None` when the source feature had a null or
    /// unconvertible geometry.
    pub geometry: Option<Geometry<f64>>,
    /// Source properties keyed by field code.
    pub properties: Properties,
}

/// A feature whose geometry is valid, in storage coordinates, and of the
/// batch's target type.
#[derive(Debug, Clone, PartialEq)]
pub struct NormalizedFeature {
    /// Normalized geometry (`MultiPolygon` or `Point`).
    pub geometry: Geometry<f64>,
    /// Source properties, untouched.
    pub properties: Properties,
}

/// Counters describing what normalization did to a batch.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct NormalizeStats {
    /// Features received.
    pub input: usize,
    /// Features reprojected into storage coordinates.
    pub reprojected: usize,
    /// Invalid geometries repaired.
    pub repaired: usize,
    /// Single-part geometries wrapped into their multi-part type.
    pub promoted: usize,
    /// Geometry collections reduced to their target-type parts.
    pub extracted: usize,
    /// Null or empty geometries dropped.
    pub dropped_empty: usize,
    /// Geometries that could not be repaired, dropped.
    pub dropped_invalid: usize,
    /// Geometries with no parts of the target type, dropped.
    pub dropped_type: usize,
}

impl NormalizeStats {
    /// Total features dropped for any reason.
    #[must_use]
    pub const fn dropped(&self) -> usize {
        self.dropped_empty + self.dropped_invalid + self.dropped_type
    }

    /// Features that survived normalization.
    #[must_use]
    pub const fn kept(&self) -> usize {
        self.input - self.dropped()
    }
}

impl AddAssign for NormalizeStats {
    fn add_assign(&mut self, rhs: Self) {
        self.input += rhs.input;
        self.reprojected += rhs.reprojected;
        self.repaired += rhs.repaired;
        self.promoted += rhs.promoted;
        self.extracted += rhs.extracted;
        self.dropped_empty += rhs.dropped_empty;
        self.dropped_invalid += rhs.dropped_invalid;
        self.dropped_type += rhs.dropped_type;
    }
}

/// Output of [`Normalizer::normalize`].
#[derive(Debug, Clone, PartialEq)]
pub struct NormalizedBatch {
    /// Surviving features, in input order.
    pub features: Vec<NormalizedFeature>,
    /// What happened to the batch.
    pub stats: NormalizeStats,
}

/// Normalizes batches for one dataset.
#[derive(Debug, Clone, Copy)]
pub struct Normalizer {
    source_crs: Crs,
    target: TargetGeometry,
}

impl Normalizer {
    /// Creates a normalizer for a dataset published in `source_crs` whose
    /// rows must hold `target` geometry.
    #[must_use]
    pub const fn new(source_crs: Crs, target: TargetGeometry) -> Self {
        Self { source_crs, target }
    }

    /// Normalizes one batch.
    ///
    /// Per feature: drop null/empty, reproject, repair if invalid, then
    /// coerce to the target type. Reprojection happens before the validity
    /// check because validity can change with the coordinate units.
    #[must_use]
    pub fn normalize(&self, features: Vec<RawFeature>) -> NormalizedBatch {
        let mut stats = NormalizeStats {
            input: features.len(),
            ..NormalizeStats::default()
        };

        let features: Vec<NormalizedFeature> = features
            .into_iter()
            .filter_map(|feature| {
                let geometry = self.normalize_geometry(feature.geometry, &mut stats)?;
                Some(NormalizedFeature {
                    geometry,
                    properties: feature.properties,
                })
            })
            .collect();

        if stats.repaired > 0 {
            log::info!("  Fixing {} invalid geometries", stats.repaired);
        }
        if stats.promoted > 0 {
            log::debug!("  Promoted {} single-part geometries", stats.promoted);
        }
        if stats.extracted > 0 {
            log::info!("  Extracted {} geometry collections", stats.extracted);
        }
        if stats.dropped() > 0 {
            log::warn!(
                "  Dropping {} features ({} null/empty, {} unrepairable, {} wrong type)",
                stats.dropped(),
                stats.dropped_empty,
                stats.dropped_invalid,
                stats.dropped_type,
            );
        }

        NormalizedBatch { features, stats }
    }

    fn normalize_geometry(
        &self,
        geometry: Option<Geometry<f64>>,
        stats: &mut NormalizeStats,
    ) -> Option<Geometry<f64>> {
        let Some(geometry) = geometry.filter(|g| !g.is_empty()) else {
            stats.dropped_empty += 1;
            return None;
        };

        let geometry = if self.source_crs == Crs::STORAGE {
            geometry
        } else {
            stats.reprojected += 1;
            reproject::to_storage(&geometry, self.source_crs)
        };

        let geometry = if geometry.is_valid() {
            geometry
        } else {
            stats.repaired += 1;
            let Some(repaired) = repair::make_valid(geometry) else {
                stats.dropped_invalid += 1;
                return None;
            };
            repaired
        };

        let coerced = match self.target {
            TargetGeometry::MultiPolygon => into_multi_polygon(geometry, stats),
            TargetGeometry::Point => into_point(geometry, stats),
        };

        if coerced.is_none() {
            stats.dropped_type += 1;
        }
        coerced
    }
}

fn into_multi_polygon(geometry: Geometry<f64>, stats: &mut NormalizeStats) -> Option<Geometry<f64>> {
    match geometry {
        Geometry::MultiPolygon(mp) => Some(Geometry::MultiPolygon(mp)),
        Geometry::Polygon(p) => {
            stats.promoted += 1;
            Some(Geometry::MultiPolygon(MultiPolygon::new(vec![p])))
        }
        Geometry::Rect(r) => {
            stats.promoted += 1;
            Some(Geometry::MultiPolygon(MultiPolygon::new(vec![r.to_polygon()])))
        }
        Geometry::Triangle(t) => {
            stats.promoted += 1;
            Some(Geometry::MultiPolygon(MultiPolygon::new(vec![t.to_polygon()])))
        }
        Geometry::GeometryCollection(gc) => {
            stats.extracted += 1;
            let mut polygons = Vec::new();
            collect_polygons(gc, &mut polygons);
            if polygons.is_empty() {
                return None;
            }
            let merged = MultiPolygon::new(polygons);
            if merged.is_valid() {
                Some(Geometry::MultiPolygon(merged))
            } else {
                repair::union_polygons(&merged.0).map(Geometry::MultiPolygon)
            }
        }
        Geometry::Point(_)
        | Geometry::Line(_)
        | Geometry::LineString(_)
        | Geometry::MultiPoint(_)
        | Geometry::MultiLineString(_) => None,
    }
}

fn collect_polygons(gc: GeometryCollection<f64>, out: &mut Vec<Polygon<f64>>) {
    for part in gc {
        match part {
            Geometry::Polygon(p) => out.push(p),
            Geometry::MultiPolygon(mp) => out.extend(mp),
            Geometry::Rect(r) => out.push(r.to_polygon()),
            Geometry::Triangle(t) => out.push(t.to_polygon()),
            Geometry::GeometryCollection(inner) => collect_polygons(inner, out),
            Geometry::Point(_)
            | Geometry::Line(_)
            | Geometry::LineString(_)
            | Geometry::MultiPoint(_)
            | Geometry::MultiLineString(_) => {}
        }
    }
}

fn into_point(geometry: Geometry<f64>, stats: &mut NormalizeStats) -> Option<Geometry<f64>> {
    match geometry {
        Geometry::Point(p) => Some(Geometry::Point(p)),
        Geometry::MultiPoint(mp) if mp.0.len() == 1 => mp.0.into_iter().next().map(Geometry::Point),
        Geometry::GeometryCollection(gc) => {
            stats.extracted += 1;
            let points: Vec<Point<f64>> = gc
                .into_iter()
                .filter_map(|g| match g {
                    Geometry::Point(p) => Some(p),
                    _ => None,
                })
                .collect();
            match points.as_slice() {
                [single] => Some(Geometry::Point(*single)),
                _ => None,
            }
        }
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use geo::{Area, LineString, MultiPoint, coord, line_string, point, polygon};

    use super::*;

    fn feature(geometry: Option<Geometry<f64>>, id: i64) -> RawFeature {
        let mut properties = Properties::new();
        properties.insert("OBJECTID".to_string(), serde_json::json!(id));
        RawFeature {
            geometry,
            properties,
        }
    }

    fn square(x: f64, y: f64, size: f64) -> Polygon<f64> {
        polygon![
            (x: x, y: y),
            (x: x + size, y: y),
            (x: x + size, y: y + size),
            (x: x, y: y + size),
            (x: x, y: y),
        ]
    }

    fn bowtie() -> Polygon<f64> {
        polygon![
            (x: 0.0, y: 0.0),
            (x: 2.0, y: 2.0),
            (x: 2.0, y: 0.0),
            (x: 0.0, y: 2.0),
            (x: 0.0, y: 0.0),
        ]
    }

    fn polygon_normalizer() -> Normalizer {
        Normalizer::new(Crs::Wgs84, TargetGeometry::MultiPolygon)
    }

    #[test]
    fn valid_repaired_and_null_features() {
        let batch = polygon_normalizer().normalize(vec![
            feature(Some(Geometry::Polygon(square(0.0, 0.0, 1.0))), 1),
            feature(Some(Geometry::Polygon(bowtie())), 2),
            feature(None, 3),
        ]);

        assert_eq!(batch.features.len(), 2);
        assert_eq!(batch.stats.input, 3);
        assert_eq!(batch.stats.repaired, 1);
        assert_eq!(batch.stats.dropped(), 1);
        assert_eq!(batch.stats.dropped_empty, 1);
        assert_eq!(batch.stats.kept(), 2);

        for f in &batch.features {
            assert!(matches!(f.geometry, Geometry::MultiPolygon(_)));
        }

        let Geometry::MultiPolygon(repaired) = &batch.features[1].geometry else {
            panic!("expected MultiPolygon");
        };
        assert!((repaired.unsigned_area() - 2.0).abs() < 1e-6);
        assert_eq!(batch.features[1].properties["OBJECTID"], 2);
    }

    #[test]
    fn promotes_polygons_to_multi_polygons() {
        let batch = polygon_normalizer().normalize(vec![
            feature(Some(Geometry::Polygon(square(0.0, 0.0, 1.0))), 1),
            feature(
                Some(Geometry::MultiPolygon(MultiPolygon::new(vec![square(
                    5.0, 5.0, 1.0,
                )]))),
                2,
            ),
        ]);

        assert_eq!(batch.stats.promoted, 1);
        assert_eq!(batch.features.len(), 2);
        assert!(
            batch
                .features
                .iter()
                .all(|f| matches!(f.geometry, Geometry::MultiPolygon(_)))
        );
    }

    #[test]
    fn extracts_polygons_from_collections() {
        let collection = GeometryCollection(vec![
            Geometry::Polygon(square(0.0, 0.0, 1.0)),
            Geometry::LineString(line_string![(x: 3.0, y: 3.0), (x: 4.0, y: 4.0)]),
            Geometry::Point(point!(x: 9.0, y: 9.0)),
        ]);

        let batch =
            polygon_normalizer().normalize(vec![feature(Some(Geometry::GeometryCollection(collection)), 1)]);

        assert_eq!(batch.stats.extracted, 1);
        let Geometry::MultiPolygon(mp) = &batch.features[0].geometry else {
            panic!("expected MultiPolygon");
        };
        assert_eq!(mp.0.len(), 1);
        assert!((mp.unsigned_area() - 1.0).abs() < 1e-9);
    }

    #[test]
    fn drops_collections_without_target_parts() {
        let collection = GeometryCollection(vec![Geometry::LineString(LineString::new(vec![
            coord! { x: 0.0, y: 0.0 },
            coord! { x: 1.0, y: 1.0 },
        ]))]);

        let batch = polygon_normalizer().normalize(vec![
            feature(Some(Geometry::GeometryCollection(collection)), 1),
            feature(Some(Geometry::Point(point!(x: 1.0, y: 1.0))), 2),
        ]);

        assert!(batch.features.is_empty());
        assert_eq!(batch.stats.dropped_type, 2);
    }

    #[test]
    fn drops_empty_geometries() {
        let empty = Geometry::MultiPolygon(MultiPolygon::<f64>::new(vec![]));
        let batch = polygon_normalizer().normalize(vec![feature(Some(empty), 1)]);
        assert!(batch.features.is_empty());
        assert_eq!(batch.stats.dropped_empty, 1);
    }

    #[test]
    fn point_target_keeps_points_and_unwraps_single_multipoints() {
        let normalizer = Normalizer::new(Crs::Wgs84, TargetGeometry::Point);
        let batch = normalizer.normalize(vec![
            feature(Some(Geometry::Point(point!(x: 18.4, y: -33.9))), 1),
            feature(
                Some(Geometry::MultiPoint(MultiPoint::new(vec![point!(
                    x: 18.5, y: -33.8
                )]))),
                2,
            ),
            feature(Some(Geometry::Polygon(square(0.0, 0.0, 1.0))), 3),
        ]);

        assert_eq!(batch.features.len(), 2);
        assert_eq!(batch.stats.dropped_type, 1);
        assert_eq!(
            batch.features[1].geometry,
            Geometry::Point(point!(x: 18.5, y: -33.8))
        );
    }

    #[test]
    fn reprojects_web_mercator_before_repair() {
        let normalizer = Normalizer::new(Crs::WebMercator, TargetGeometry::MultiPolygon);
        let meters = polygon![
            (x: 0.0, y: 0.0),
            (x: 111_319.490_793_273_6, y: 0.0),
            (x: 111_319.490_793_273_6, y: 111_325.142_866_385_1),
            (x: 0.0, y: 111_325.142_866_385_1),
            (x: 0.0, y: 0.0),
        ];

        let batch = normalizer.normalize(vec![feature(Some(Geometry::Polygon(meters)), 1)]);

        assert_eq!(batch.stats.reprojected, 1);
        assert_eq!(batch.stats.repaired, 0);
        let Geometry::MultiPolygon(mp) = &batch.features[0].geometry else {
            panic!("expected MultiPolygon");
        };
        let rect = geo::BoundingRect::bounding_rect(mp).unwrap();
        assert!((rect.max().x - 1.0).abs() < 1e-6);
        assert!((rect.max().y - 1.0).abs() < 1e-4);
    }

    #[test]
    fn normalization_is_deterministic() {
        let input = vec![
            feature(Some(Geometry::Polygon(bowtie())), 1),
            feature(Some(Geometry::Polygon(square(1.0, 1.0, 2.0))), 2),
            feature(None, 3),
        ];
        let first = polygon_normalizer().normalize(input.clone());
        let second = polygon_normalizer().normalize(input);
        assert_eq!(first, second);
    }

    #[test]
    fn stats_accumulate() {
        let mut total = NormalizeStats::default();
        total += NormalizeStats {
            input: 3,
            dropped_empty: 1,
            ..NormalizeStats::default()
        };
        total += NormalizeStats {
            input: 2,
            dropped_type: 1,
            repaired: 1,
            ..NormalizeStats::default()
        };
        assert_eq!(total.input, 5);
        assert_eq!(total.dropped(), 2);
        assert_eq!(total.kept(), 3);
        assert_eq!(total.repaired, 1);
    }
}
