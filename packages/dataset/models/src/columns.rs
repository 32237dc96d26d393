//! Declarative source-property to destination-column mappings.
//!
//! Source files use the City's abbreviated field codes (`SG26_CODE`,
//! `OFC_SBRB_NAME`, ...). Each [`ColumnSpec`] names the destination column
//! and a [`ColumnValue`] describing how its value is derived.

use crate::DatasetSource;

/// How a destination column's value is derived from feature properties.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ColumnValue {
    /// Trimmed text. Empty strings become NULL; numbers are rendered as text.
    Text(&'static str),
    /// 64-bit integer, from a number or a numeric string.
    Integer(&'static str),
    /// Double-precision float, from a number or a numeric string.
    Float(&'static str),
    /// `Yes`/`No` flag mapped to a boolean.
    YesNo(&'static str),
    /// First entry of a comma-separated list, trimmed.
    FirstOfList(&'static str),
    /// Non-empty parts joined with single spaces, NULL when all are empty.
    Joined(&'static [&'static str]),
    /// The same literal for every row of the source file.
    Constant(&'static str),
}

/// One destination column and the rule that fills it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ColumnSpec {
    /// Destination column name.
    pub column: &'static str,
    /// Derivation rule.
    pub value: ColumnValue,
}

const fn col(column: &'static str, value: ColumnValue) -> ColumnSpec {
    ColumnSpec { column, value }
}

use ColumnValue::{Constant, Float, FirstOfList, Integer, Joined, Text, YesNo};

const PARCEL_COLUMNS: &[ColumnSpec] = &[
    col("objectid", Integer("OBJECTID")),
    col("sg26_code", Text("SG26_CODE")),
    col("sl_parcel_key", Integer("SL_LAND_PRCL_KEY")),
    col("erf_number", Text("PRTY_NMBR")),
    col("address_number", Integer("ADR_NO")),
    col("address_suffix", Text("ADR_NO_SFX")),
    col("street_name", Text("STR_NAME")),
    col("street_type", Text("LU_STR_NAME_TYPE")),
    col("suburb", Text("OFC_SBRB_NAME")),
    col("alt_suburb_name", Text("ALT_NAME")),
    col("ward", Text("WARD_NAME")),
    col("subcouncil", Text("SUB_CNCL_NMBR")),
    col("legal_status", Text("LU_LGL_STS_DSCR")),
    col("zoning_raw", Text("ZONING")),
    col("zoning_primary", FirstOfList("ZONING")),
    col(
        "full_address",
        Joined(&[
            "ADR_NO",
            "ADR_NO_SFX",
            "STR_NAME",
            "LU_STR_NAME_TYPE",
            "OFC_SBRB_NAME",
        ]),
    ),
];

pub(crate) const PARCEL_SOURCES: &[DatasetSource] = &[DatasetSource {
    file_stem: "cct_land_parcels_2025",
    required: true,
    columns: PARCEL_COLUMNS,
}];

const ADDRESS_POINT_COLUMNS: &[ColumnSpec] = &[
    col("objectid", Integer("OBJECTID")),
    col("address_number", Integer("ADR_NO")),
    col("address_prefix", Text("ADR_NO_PRF")),
    col("address_suffix", Text("ADR_NO_SFX")),
    col("suburb", Text("OFC_SBRB_NAME")),
    col("street_name", Text("STR_NAME")),
    col("street_type", Text("LU_STR_NAME_TYPE")),
    col("full_address", Text("FULL_ADR")),
];

pub(crate) const ADDRESS_POINT_SOURCES: &[DatasetSource] = &[DatasetSource {
    file_stem: "cct_street_address_numbers_2025",
    required: true,
    columns: ADDRESS_POINT_COLUMNS,
}];

const BIODIVERSITY_COLUMNS: &[ColumnSpec] = &[
    col("objectid", Integer("OBJECTID")),
    col("cba_category", Text("CBA_CTGR")),
    col("cba_name", Text("CBA_NAME")),
    col("subtype", Text("SBTY")),
    col("sdf_category", Text("SDF_CTGR")),
    col("description", Text("CBA_DSCR")),
    col("significance", Text("SGNF_HBT")),
    col("objective", Text("OBJC")),
    col("action", Text("ACTN")),
    col("compatible_use", Text("CMPT_ACTV")),
    col("habitat_cond", Text("HBT_CNDT")),
    col("esa_significance", Text("CESA_SGNF")),
    col("protected_area", Text("NAME_PRTC_AREA")),
    col("proclaimed", Text("PRCL")),
    col("managed", YesNo("MNGD")),
    col("primary_class", Text("PRMR_CLS")),
    col("area_ha", Float("AREA_HCTR")),
    col("perimeter_m", Float("PRMT_MTR")),
];

pub(crate) const BIODIVERSITY_SOURCES: &[DatasetSource] = &[DatasetSource {
    file_stem: "cct_terrestrial_biodiversity_network_2025",
    required: true,
    columns: BIODIVERSITY_COLUMNS,
}];

const ECOSYSTEM_COLUMNS: &[ColumnSpec] = &[
    col("objectid", Integer("OBJECTID")),
    col("vegetation_type", Text("NTNL_VGTN_TYPE")),
    col("vegetation_subtype", Text("VGTN_SBTY")),
    col("community", Text("CMNT")),
    col("threat_status", Text("ECSY_STS_2011")),
    col("area_ha", Float("AREA_HCTR")),
    col("perimeter_m", Float("PRMT_MTR")),
];

pub(crate) const ECOSYSTEM_SOURCES: &[DatasetSource] = &[DatasetSource {
    file_stem: "cct_sanbi_ecosystem_status_2011",
    required: true,
    columns: ECOSYSTEM_COLUMNS,
}];

const HERITAGE_INVENTORY_COLUMNS: &[ColumnSpec] = &[
    col("objectid", Integer("OBJECTID")),
    col("source", Constant("inventory")),
    col("site_name", Text("HRTG_INV_SITE_NAME")),
    col("heritage_category", Integer("HRTG_INV_RCS_CAT")),
    col("resource_type_1", Text("HRTG_INV_RCS_TYPE_1")),
    col("resource_type_2", Text("HRTG_INV_RCS_TYPE_2")),
    col("description", Text("SITE_DSRP")),
    col("architectural_style", Text("ARCH_STYL")),
    col("period", Text("PRD")),
    col("nhra_status", Text("NHRA_STS")),
    col("city_grading", Text("CNFR_CCT_GRD")),
    col("street_address", Text("STR_ADR")),
];

const HERITAGE_NHRA_COLUMNS: &[ColumnSpec] = &[
    col("objectid", Integer("OBJECTID")),
    col("source", Constant("nhra")),
    col("site_name", Text("NHRA_NAME")),
];

pub(crate) const HERITAGE_SOURCES: &[DatasetSource] = &[
    DatasetSource {
        file_stem: "cct_heritage_inventory_2025",
        required: true,
        columns: HERITAGE_INVENTORY_COLUMNS,
    },
    DatasetSource {
        file_stem: "cct_nhra_protection_2025",
        required: false,
        columns: HERITAGE_NHRA_COLUMNS,
    },
];

const DEVELOPMENT_EDGE_COLUMNS: &[ColumnSpec] = &[
    col("objectid", Integer("OBJECTID")),
    col("edge_type", Constant("development")),
];

const COASTAL_EDGE_COLUMNS: &[ColumnSpec] = &[
    col("objectid", Integer("OBJECTID")),
    col("edge_type", Constant("coastal")),
];

pub(crate) const URBAN_EDGE_SOURCES: &[DatasetSource] = &[
    DatasetSource {
        file_stem: "cct_urban_development_edge_2025",
        required: true,
        columns: DEVELOPMENT_EDGE_COLUMNS,
    },
    DatasetSource {
        file_stem: "cct_coastal_urban_edge_2025",
        required: false,
        columns: COASTAL_EDGE_COLUMNS,
    },
];

const ENVIRONMENTAL_FOCUS_COLUMNS: &[ColumnSpec] = &[
    col("objectid", Integer("OBJECTID")),
    col("name", Text("NAME")),
    col("description", Text("DSCR")),
    col("area_ha", Float("AREA_HCTR")),
];

pub(crate) const ENVIRONMENTAL_FOCUS_SOURCES: &[DatasetSource] = &[DatasetSource {
    file_stem: "cct_environmental_focus_areas_2025",
    required: true,
    columns: ENVIRONMENTAL_FOCUS_COLUMNS,
}];

const WETLAND_COLUMNS: &[ColumnSpec] = &[col("objectid", Integer("OBJECTID"))];

pub(crate) const WETLAND_SOURCES: &[DatasetSource] = &[DatasetSource {
    file_stem: "cct_wetlands_2025",
    required: true,
    columns: WETLAND_COLUMNS,
}];
