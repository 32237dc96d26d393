//! Coordinate reference systems understood by the loader.
//!
//! Production geometry is always stored as longitude/latitude
//! (`EPSG:4326`). Source files published in another system are reprojected
//! before geometry repair.

use strum_macros::Display;

/// Spherical radius used by `EPSG:3857`, in meters.
pub const WEB_MERCATOR_RADIUS_M: f64 = 6_378_137.0;

/// A supported coordinate reference system.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display)]
pub enum Crs {
    /// WGS 84 longitude/latitude, `EPSG:4326`.
    #[strum(serialize = "EPSG:4326")]
    Wgs84,
    /// WGS 84 / Pseudo-Mercator, `EPSG:3857`. ArcGIS portals publish in it.
    #[strum(serialize = "EPSG:3857")]
    WebMercator,
}

impl Crs {
    /// The reference system every production geometry column uses.
    pub const STORAGE: Self = Self::Wgs84;

    /// Returns the EPSG code.
    #[must_use]
    pub const fn epsg(self) -> u32 {
        match self {
            Self::Wgs84 => 4326,
            Self::WebMercator => 3857,
        }
    }

    /// Looks up a reference system by EPSG code.
    ///
    /// `900913` is accepted as the legacy alias of `3857`.
    #[must_use]
    pub const fn from_epsg(code: u32) -> Option<Self> {
        match code {
            4326 => Some(Self::Wgs84),
            3857 | 900_913 => Some(Self::WebMercator),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn epsg_codes_round_trip() {
        for crs in [Crs::Wgs84, Crs::WebMercator] {
            assert_eq!(Crs::from_epsg(crs.epsg()), Some(crs));
        }
        assert_eq!(Crs::from_epsg(900_913), Some(Crs::WebMercator));
        assert_eq!(Crs::from_epsg(22279), None);
    }

    #[test]
    fn displays_as_epsg_authority_string() {
        assert_eq!(Crs::WebMercator.to_string(), "EPSG:3857");
        assert_eq!(Crs::STORAGE.to_string(), "EPSG:4326");
    }
}
