#![cfg_attr(feature = "fail-on-warnings", deny(warnings))]
#![warn(clippy::all, clippy::pedantic, clippy::nursery, clippy::cargo)]
#![allow(clippy::multiple_crate_versions, clippy::cargo_common_metadata)]

//! Dataset definitions for the parcel eco-feasibility loader.
//!
//! Every dataset the pipeline knows how to load is a variant of the closed
//! [`Dataset`] enum. Each variant carries its source files, declarative
//! column mapping, target geometry type, staging/production tables, and
//! default chunk size, all resolved through exhaustive `match`es so adding
//! a dataset without wiring it up fails to compile.

pub mod columns;
pub mod config;
pub mod crs;

use serde::{Deserialize, Serialize};
use strum_macros::{AsRefStr, Display, EnumString};

pub use columns::{ColumnSpec, ColumnValue};
pub use crs::Crs;

/// The physical geometry type stored in a dataset's `geom` column.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display, AsRefStr)]
pub enum TargetGeometry {
    /// Every row holds a `MultiPolygon`; bare polygons are promoted.
    MultiPolygon,
    /// Every row holds a single `Point`.
    Point,
}

impl TargetGeometry {
    /// Returns `true` for polygon-bearing targets.
    #[must_use]
    pub const fn is_polygonal(self) -> bool {
        matches!(self, Self::MultiPolygon)
    }
}

/// One source file feeding a dataset.
#[derive(Debug, Clone, Copy)]
pub struct DatasetSource {
    /// File name without the `.geojson` extension.
    pub file_stem: &'static str,
    /// Whether the dataset fails when this file is absent. Optional files
    /// are skipped with a warning.
    pub required: bool,
    /// Destination columns and how to derive each from feature properties.
    pub columns: &'static [ColumnSpec],
}

impl DatasetSource {
    /// Returns the file name (stem plus `.geojson`).
    #[must_use]
    pub fn file_name(&self) -> String {
        format!("{}.geojson", self.file_stem)
    }

    /// Returns the destination column names in mapping order.
    #[must_use]
    pub fn column_names(&self) -> Vec<&'static str> {
        self.columns.iter().map(|c| c.column).collect()
    }
}

/// A loadable dataset.
///
/// The string form (`parcels`, `biodiversity_areas`, ...) is what the CLI
/// `--table` filter and the `[datasets.<name>]` config sections accept.
/// The CLI also accepts the older loader names (`properties`,
/// `biodiversity`, `heritage`, `environmental`).
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    PartialOrd,
    Ord,
    Hash,
    Serialize,
    Deserialize,
    Display,
    EnumString,
    AsRefStr,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum Dataset {
    /// Cadastral land parcels (erven).
    #[strum(to_string = "parcels", serialize = "properties")]
    Parcels,
    /// Street address points used for address search.
    AddressPoints,
    /// Terrestrial biodiversity network (CBA/ESA/PA/CA).
    #[strum(to_string = "biodiversity_areas", serialize = "biodiversity")]
    BiodiversityAreas,
    /// Vegetation ecosystem threat status.
    EcosystemTypes,
    /// Heritage inventory and NHRA protections.
    #[strum(to_string = "heritage_sites", serialize = "heritage")]
    HeritageSites,
    /// Urban development edge and coastal urban edge.
    UrbanEdges,
    /// Environmental focus areas.
    #[strum(to_string = "environmental_focus_areas", serialize = "environmental")]
    EnvironmentalFocusAreas,
    /// Wetlands.
    Wetlands,
}

impl Dataset {
    /// All datasets, in the order `load all` processes them.
    pub const ALL: &[Self] = &[
        Self::Parcels,
        Self::BiodiversityAreas,
        Self::EcosystemTypes,
        Self::AddressPoints,
        Self::UrbanEdges,
        Self::HeritageSites,
        Self::EnvironmentalFocusAreas,
        Self::Wetlands,
    ];

    /// Production table name (unqualified).
    #[must_use]
    pub const fn production_table(self) -> &'static str {
        match self {
            Self::Parcels => "properties",
            Self::AddressPoints => "address_points",
            Self::BiodiversityAreas => "biodiversity_areas",
            Self::EcosystemTypes => "ecosystem_types",
            Self::HeritageSites => "heritage_sites",
            Self::UrbanEdges => "urban_edges",
            Self::EnvironmentalFocusAreas => "environmental_focus_areas",
            Self::Wetlands => "wetlands",
        }
    }

    /// Staging table name (unqualified).
    #[must_use]
    pub const fn staging_table(self) -> &'static str {
        match self {
            Self::Parcels => "staging_properties",
            Self::AddressPoints => "staging_address_points",
            Self::BiodiversityAreas => "staging_biodiversity",
            Self::EcosystemTypes => "staging_ecosystem_types",
            Self::HeritageSites => "staging_heritage",
            Self::UrbanEdges => "staging_urban_edges",
            Self::EnvironmentalFocusAreas => "staging_environmental_focus_areas",
            Self::Wetlands => "staging_wetlands",
        }
    }

    /// Geometry type every row of this dataset is normalized to.
    #[must_use]
    pub const fn target_geometry(self) -> TargetGeometry {
        match self {
            Self::AddressPoints => TargetGeometry::Point,
            Self::Parcels
            | Self::BiodiversityAreas
            | Self::EcosystemTypes
            | Self::HeritageSites
            | Self::UrbanEdges
            | Self::EnvironmentalFocusAreas
            | Self::Wetlands => TargetGeometry::MultiPolygon,
        }
    }

    /// Features per batch when streaming the source files. Tuned to the
    /// size and vertex density of each dataset.
    #[must_use]
    pub const fn default_chunk_size(self) -> usize {
        match self {
            Self::Parcels => 10_000,
            Self::AddressPoints => 25_000,
            Self::BiodiversityAreas => 2_000,
            Self::EcosystemTypes => 1_000,
            Self::HeritageSites | Self::EnvironmentalFocusAreas | Self::Wetlands => 5_000,
            Self::UrbanEdges => 100,
        }
    }

    /// Reference system the source files are published in.
    #[must_use]
    pub const fn default_source_crs(self) -> Crs {
        match self {
            Self::Parcels
            | Self::AddressPoints
            | Self::BiodiversityAreas
            | Self::EcosystemTypes
            | Self::HeritageSites
            | Self::UrbanEdges
            | Self::EnvironmentalFocusAreas
            | Self::Wetlands => Crs::Wgs84,
        }
    }

    /// Column holding the dataset's unique business key, if it has one.
    ///
    /// Rows missing this value are dropped before staging, and duplicates
    /// are removed after staging.
    #[must_use]
    pub const fn unique_key(self) -> Option<&'static str> {
        match self {
            Self::Parcels => Some("sg26_code"),
            Self::AddressPoints
            | Self::BiodiversityAreas
            | Self::EcosystemTypes
            | Self::HeritageSites
            | Self::UrbanEdges
            | Self::EnvironmentalFocusAreas
            | Self::Wetlands => None,
        }
    }

    /// Source files feeding this dataset, primary file first.
    #[must_use]
    pub const fn sources(self) -> &'static [DatasetSource] {
        match self {
            Self::Parcels => columns::PARCEL_SOURCES,
            Self::AddressPoints => columns::ADDRESS_POINT_SOURCES,
            Self::BiodiversityAreas => columns::BIODIVERSITY_SOURCES,
            Self::EcosystemTypes => columns::ECOSYSTEM_SOURCES,
            Self::HeritageSites => columns::HERITAGE_SOURCES,
            Self::UrbanEdges => columns::URBAN_EDGE_SOURCES,
            Self::EnvironmentalFocusAreas => columns::ENVIRONMENTAL_FOCUS_SOURCES,
            Self::Wetlands => columns::WETLAND_SOURCES,
        }
    }
}
