//! Reprojection into storage coordinates.

use std::f64::consts::FRAC_PI_2;

use capeeco_dataset_models::{Crs, crs::WEB_MERCATOR_RADIUS_M};
use geo::{Coord, Geometry, MapCoords};

/// Reprojects `geometry` from `from` into [`Crs::STORAGE`].
#[must_use]
pub fn to_storage(geometry: &Geometry<f64>, from: Crs) -> Geometry<f64> {
    match from {
        Crs::Wgs84 => geometry.clone(),
        Crs::WebMercator => geometry.map_coords(web_mercator_to_wgs84),
    }
}

/// Inverse spherical Mercator.
fn web_mercator_to_wgs84(c: Coord<f64>) -> Coord<f64> {
    let lon = (c.x / WEB_MERCATOR_RADIUS_M).to_degrees();
    let lat = 2.0f64
        .mul_add((c.y / WEB_MERCATOR_RADIUS_M).exp().atan(), -FRAC_PI_2)
        .to_degrees();
    Coord {
        x: lon.clamp(-180.0, 180.0),
        y: lat.clamp(-90.0, 90.0),
    }
}
