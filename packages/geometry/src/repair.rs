//! Validity repair.
//!
//! Each polygon is first re-filled with the even-odd rule, which splits
//! self-intersecting rings at their crossings and keeps every lobe
//! whatever its winding. The filled parts are then dissolved with a unary
//! union. The result is always a `MultiPolygon`; non-polygonal members of
//! a collection are kept only if they are already valid.

use geo::algorithm::bool_ops::FillRule;
use geo::{BooleanOps, CoordsIter, Geometry, GeometryCollection, MultiPolygon, Polygon, Validation};

/// Repairs `geometry`, returning `None` when nothing usable remains
/// (non-finite coordinates, zero-area polygons, invalid lines/points).
#[must_use]
pub fn make_valid(geometry: Geometry<f64>) -> Option<Geometry<f64>> {
    if geometry
        .coords_iter()
        .any(|c| !c.x.is_finite() || !c.y.is_finite())
    {
        return None;
    }

    match geometry {
        Geometry::Polygon(p) => union_polygons(std::slice::from_ref(&p)).map(Geometry::MultiPolygon),
        Geometry::MultiPolygon(mp) => union_polygons(&mp.0).map(Geometry::MultiPolygon),
        Geometry::Rect(r) => union_polygons(&[r.to_polygon()]).map(Geometry::MultiPolygon),
        Geometry::Triangle(t) => union_polygons(&[t.to_polygon()]).map(Geometry::MultiPolygon),
        Geometry::GeometryCollection(gc) => {
            let parts: Vec<Geometry<f64>> = gc.into_iter().filter_map(make_valid).collect();
            if parts.is_empty() {
                None
            } else {
                Some(Geometry::GeometryCollection(GeometryCollection(parts)))
            }
        }
        other @ (Geometry::Point(_)
        | Geometry::Line(_)
        | Geometry::LineString(_)
        | Geometry::MultiPoint(_)
        | Geometry::MultiLineString(_)) => other.is_valid().then_some(other),
    }
}

/// Even-odd fill of one polygon's rings. Lobes of a self-crossing ring
/// come back as separate, correctly wound polygons.
#[must_use]
pub fn fill_even_odd(polygon: &Polygon<f64>) -> MultiPolygon<f64> {
    polygon.union_with_fill_rule(&MultiPolygon::new(vec![]), FillRule::EvenOdd)
}

/// Dissolves `polygons` into a valid `MultiPolygon`. Returns `None` if the
/// union is empty.
#[must_use]
pub fn union_polygons(polygons: &[Polygon<f64>]) -> Option<MultiPolygon<f64>> {
    let filled: Vec<Polygon<f64>> = polygons.iter().flat_map(fill_even_odd).collect();
    let merged = geo::unary_union(filled.iter());
    if merged.0.is_empty() {
        None
    } else {
        Some(merged)
    }
}

#[cfg(test)]
mod tests {
    use geo::{Area, line_string, polygon};

    use super::*;

    #[test]
    fn dissolves_overlapping_parts() {
        let a = polygon![
            (x: 0.0, y: 0.0), (x: 2.0, y: 0.0), (x: 2.0, y: 2.0), (x: 0.0, y: 2.0), (x: 0.0, y: 0.0),
        ];
        let b = polygon![
            (x: 1.0, y: 1.0), (x: 3.0, y: 1.0), (x: 3.0, y: 3.0), (x: 1.0, y: 3.0), (x: 1.0, y: 1.0),
        ];

        let repaired = make_valid(Geometry::MultiPolygon(MultiPolygon::new(vec![a, b]))).unwrap();

        let Geometry::MultiPolygon(mp) = repaired else {
            panic!("expected MultiPolygon");
        };
        assert_eq!(mp.0.len(), 1);
        assert!((mp.unsigned_area() - 7.0).abs() < 1e-6);
        assert!(mp.is_valid());
    }

    #[test]
    fn self_crossing_ring_keeps_both_lobes() {
        let bowtie = polygon![
            (x: 0.0, y: 0.0), (x: 2.0, y: 2.0), (x: 2.0, y: 0.0), (x: 0.0, y: 2.0), (x: 0.0, y: 0.0),
        ];
        assert!(!bowtie.is_valid());

        let Some(Geometry::MultiPolygon(mp)) = make_valid(Geometry::Polygon(bowtie)) else {
            panic!("expected MultiPolygon");
        };
        assert!((mp.unsigned_area() - 2.0).abs() < 1e-9);

        let bounds = geo::BoundingRect::bounding_rect(&mp).unwrap();
        assert!((bounds.min().x - 0.0).abs() < 1e-9);
        assert!((bounds.max().x - 2.0).abs() < 1e-9);
    }

    #[test]
    fn holes_survive_the_even_odd_fill() {
        let with_hole = Polygon::new(
            line_string![
                (x: 0.0, y: 0.0), (x: 4.0, y: 0.0), (x: 4.0, y: 4.0), (x: 0.0, y: 4.0), (x: 0.0, y: 0.0),
            ],
            vec![line_string![
                (x: 1.0, y: 1.0), (x: 1.0, y: 2.0), (x: 2.0, y: 2.0), (x: 2.0, y: 1.0), (x: 1.0, y: 1.0),
            ]],
        );
        let filled = fill_even_odd(&with_hole);
        assert!((filled.unsigned_area() - 15.0).abs() < 1e-9);
    }

    #[test]
    fn zero_area_polygon_is_unrepairable() {
        let flat = polygon![
            (x: 0.0, y: 0.0), (x: 1.0, y: 0.0), (x: 2.0, y: 0.0), (x: 0.0, y: 0.0),
        ];
        assert!(make_valid(Geometry::Polygon(flat)).is_none());
    }

    #[test]
    fn non_finite_coordinates_are_unrepairable() {
        let broken = line_string![(x: 0.0, y: f64::NAN), (x: 1.0, y: 1.0)];
        assert!(make_valid(Geometry::LineString(broken)).is_none());
    }
}
