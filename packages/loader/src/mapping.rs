//! Feature properties to staging rows.
//!
//! Applies a [`DatasetSource`]'s declarative [`ColumnSpec`] list to each
//! normalized feature. Coercion never fails: a value that does not fit its
//! column becomes NULL.

use capeeco_dataset_models::{ColumnValue, DatasetSource};
use capeeco_geometry::{NormalizedFeature, Properties};
use serde_json::Value;

/// Largest magnitude at which every integral `f64` is exact.
const MAX_EXACT_F64: f64 = 9_007_199_254_740_992.0;

/// A coerced column value.
#[derive(Debug, Clone, PartialEq)]
pub enum CellValue {
    /// SQL NULL.
    Null,
    /// Text.
    Text(String),
    /// 64-bit integer.
    Integer(i64),
    /// Double-precision float.
    Float(f64),
    /// Boolean.
    Bool(bool),
}

impl CellValue {
    /// Returns `true` for [`CellValue::Null`].
    #[must_use]
    pub const fn is_null(&self) -> bool {
        matches!(self, Self::Null)
    }

    fn text(&self) -> Option<String> {
        match self {
            Self::Text(s) => Some(s.clone()),
            Self::Integer(i) => Some(i.to_string()),
            Self::Float(f) => Some(f.to_string()),
            Self::Bool(b) => Some(b.to_string()),
            Self::Null => None,
        }
    }
}

/// A row ready for the staging table.
#[derive(Debug, Clone, PartialEq)]
pub struct StagingRow {
    /// Human-readable identification for logs (`sg26_code=...`,
    /// `objectid=...`).
    pub label: String,
    /// One value per mapped column, in mapping order.
    pub values: Vec<CellValue>,
    /// Geometry as `GeoJSON` text.
    pub geometry: String,
}

/// Output of [`map_batch`].
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MappedBatch {
    /// Rows that passed the required-key check.
    pub rows: Vec<StagingRow>,
    /// Rows dropped because the unique key was NULL.
    pub missing_key: usize,
}

/// Maps a normalized batch through `source`'s column list. When
/// `unique_key` names a mapped column, rows where it is NULL are dropped
/// and counted.
#[must_use]
pub fn map_batch(
    source: &DatasetSource,
    unique_key: Option<&str>,
    features: Vec<NormalizedFeature>,
) -> MappedBatch {
    let key_index = unique_key.and_then(|key| source.columns.iter().position(|c| c.column == key));
    let objectid_index = source.columns.iter().position(|c| c.column == "objectid");

    let mut batch = MappedBatch {
        rows: Vec::with_capacity(features.len()),
        missing_key: 0,
    };

    for (i, feature) in features.into_iter().enumerate() {
        let values: Vec<CellValue> = source
            .columns
            .iter()
            .map(|spec| coerce(spec.value, &feature.properties))
            .collect();

        if let Some(idx) = key_index
            && values[idx].is_null()
        {
            batch.missing_key += 1;
            continue;
        }

        let label = key_index
            .or(objectid_index)
            .and_then(|idx| {
                values[idx]
                    .text()
                    .map(|v| format!("{}={v}", source.columns[idx].column))
            })
            .unwrap_or_else(|| format!("{} #{i}", source.file_stem));

        let geometry = geojson::Geometry::new(geojson::Value::from(&feature.geometry)).to_string();

        batch.rows.push(StagingRow {
            label,
            values,
            geometry,
        });
    }

    batch
}

/// Derives one column value from a feature's properties.
#[must_use]
pub fn coerce(rule: ColumnValue, properties: &Properties) -> CellValue {
    let get = |field: &str| properties.get(field).unwrap_or(&Value::Null);

    let value = match rule {
        ColumnValue::Text(field) => text_value(get(field)).map(CellValue::Text),
        ColumnValue::Integer(field) => integer_value(get(field)).map(CellValue::Integer),
        ColumnValue::Float(field) => float_value(get(field)).map(CellValue::Float),
        ColumnValue::YesNo(field) => yes_no_value(get(field)).map(CellValue::Bool),
        ColumnValue::FirstOfList(field) => text_value(get(field))
            .and_then(|s| {
                s.split(',')
                    .next()
                    .map(str::trim)
                    .filter(|s| !s.is_empty())
                    .map(str::to_string)
            })
            .map(CellValue::Text),
        ColumnValue::Joined(fields) => {
            let parts: Vec<String> = fields.iter().filter_map(|f| text_value(get(f))).collect();
            (!parts.is_empty()).then(|| CellValue::Text(parts.join(" ")))
        }
        ColumnValue::Constant(literal) => Some(CellValue::Text(literal.to_string())),
    };

    value.unwrap_or(CellValue::Null)
}

/// Trimmed, non-empty text. Integral numbers render without a fractional
/// part.
fn text_value(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => {
            let trimmed = s.trim();
            (!trimmed.is_empty()).then(|| trimmed.to_string())
        }
        Value::Number(n) => {
            if let Some(i) = n.as_i64() {
                Some(i.to_string())
            } else if let Some(u) = n.as_u64() {
                Some(u.to_string())
            } else {
                n.as_f64().map(|f| {
                    if f.fract() == 0.0 && f.abs() < MAX_EXACT_F64 {
                        format!("{f:.0}")
                    } else {
                        f.to_string()
                    }
                })
            }
        }
        Value::Bool(b) => Some(b.to_string()),
        Value::Null | Value::Array(_) | Value::Object(_) => None,
    }
}

#[allow(clippy::cast_possible_truncation)]
fn integral(f: f64) -> Option<i64> {
    (f.is_finite() && f.fract() == 0.0 && f.abs() < MAX_EXACT_F64).then_some(f as i64)
}

fn integer_value(value: &Value) -> Option<i64> {
    match value {
        Value::Number(n) => n.as_i64().or_else(|| n.as_f64().and_then(integral)),
        Value::String(s) => {
            let s = s.trim();
            s.parse::<i64>()
                .ok()
                .or_else(|| s.parse::<f64>().ok().and_then(integral))
        }
        Value::Null | Value::Bool(_) | Value::Array(_) | Value::Object(_) => None,
    }
}

fn float_value(value: &Value) -> Option<f64> {
    let f = match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse::<f64>().ok(),
        Value::Null | Value::Bool(_) | Value::Array(_) | Value::Object(_) => None,
    }?;
    f.is_finite().then_some(f)
}

fn yes_no_value(value: &Value) -> Option<bool> {
    match value {
        Value::Bool(b) => Some(*b),
        Value::String(s) => match s.trim().to_ascii_lowercase().as_str() {
            "yes" | "y" | "true" | "t" | "1" => Some(true),
            "no" | "n" | "false" | "f" | "0" => Some(false),
            _ => None,
        },
        Value::Number(n) => match n.as_i64() {
            Some(1) => Some(true),
            Some(0) => Some(false),
            _ => None,
        },
        Value::Null | Value::Array(_) | Value::Object(_) => None,
    }
}

#[cfg(test)]
mod tests {
    use capeeco_dataset_models::Dataset;
    use geo::{Geometry, MultiPolygon, polygon};
    use serde_json::json;

    use super::*;

    fn props(value: Value) -> Properties {
        match value {
            Value::Object(map) => map,
            _ => panic!("expected object"),
        }
    }

    fn feature(properties: Value) -> NormalizedFeature {
        NormalizedFeature {
            geometry: Geometry::MultiPolygon(MultiPolygon::new(vec![polygon![
                (x: 18.0, y: -34.0),
                (x: 18.1, y: -34.0),
                (x: 18.1, y: -33.9),
                (x: 18.0, y: -34.0),
            ]])),
            properties: props(properties),
        }
    }

    #[test]
    fn text_is_trimmed_and_empty_is_null() {
        let p = props(json!({"A": "  Rondebosch ", "B": "   ", "C": 12, "D": 12.0, "E": 1.5}));
        assert_eq!(
            coerce(ColumnValue::Text("A"), &p),
            CellValue::Text("Rondebosch".to_string())
        );
        assert_eq!(coerce(ColumnValue::Text("B"), &p), CellValue::Null);
        assert_eq!(coerce(ColumnValue::Text("C"), &p), CellValue::Text("12".to_string()));
        assert_eq!(coerce(ColumnValue::Text("D"), &p), CellValue::Text("12".to_string()));
        assert_eq!(coerce(ColumnValue::Text("E"), &p), CellValue::Text("1.5".to_string()));
        assert_eq!(coerce(ColumnValue::Text("MISSING"), &p), CellValue::Null);
    }

    #[test]
    fn integers_accept_numeric_strings_only() {
        let p = props(json!({"A": "42", "B": 7.0, "C": "7.5", "D": "n/a", "E": 3}));
        assert_eq!(coerce(ColumnValue::Integer("A"), &p), CellValue::Integer(42));
        assert_eq!(coerce(ColumnValue::Integer("B"), &p), CellValue::Integer(7));
        assert_eq!(coerce(ColumnValue::Integer("C"), &p), CellValue::Null);
        assert_eq!(coerce(ColumnValue::Integer("D"), &p), CellValue::Null);
        assert_eq!(coerce(ColumnValue::Integer("E"), &p), CellValue::Integer(3));
    }

    #[test]
    fn floats_and_flags() {
        let p = props(json!({"AREA": "12.5", "M1": "Yes", "M2": "No", "M3": "maybe"}));
        assert_eq!(coerce(ColumnValue::Float("AREA"), &p), CellValue::Float(12.5));
        assert_eq!(coerce(ColumnValue::YesNo("M1"), &p), CellValue::Bool(true));
        assert_eq!(coerce(ColumnValue::YesNo("M2"), &p), CellValue::Bool(false));
        assert_eq!(coerce(ColumnValue::YesNo("M3"), &p), CellValue::Null);
    }

    #[test]
    fn first_of_list_takes_primary_zoning() {
        let p = props(json!({"ZONING": " GR2 , LB1", "EMPTY": ", LB1"}));
        assert_eq!(
            coerce(ColumnValue::FirstOfList("ZONING"), &p),
            CellValue::Text("GR2".to_string())
        );
        assert_eq!(coerce(ColumnValue::FirstOfList("EMPTY"), &p), CellValue::Null);
    }

    #[test]
    fn joined_skips_empty_parts() {
        let fields: &'static [&'static str] = &["ADR_NO", "ADR_NO_SFX", "STR_NAME", "SUBURB"];
        let p = props(json!({"ADR_NO": 12.0, "ADR_NO_SFX": " ", "STR_NAME": "Main Road", "SUBURB": "Observatory"}));
        assert_eq!(
            coerce(ColumnValue::Joined(fields), &p),
            CellValue::Text("12 Main Road Observatory".to_string())
        );
        assert_eq!(
            coerce(ColumnValue::Joined(fields), &Properties::new()),
            CellValue::Null
        );
    }

    #[test]
    fn rows_without_unique_key_are_dropped() {
        let source = &Dataset::Parcels.sources()[0];
        let batch = map_batch(
            source,
            Dataset::Parcels.unique_key(),
            vec![
                feature(json!({"OBJECTID": 1, "SG26_CODE": "C01600000000012300000"})),
                feature(json!({"OBJECTID": 2, "SG26_CODE": "  "})),
                feature(json!({"OBJECTID": 3})),
            ],
        );

        assert_eq!(batch.rows.len(), 1);
        assert_eq!(batch.missing_key, 2);
        assert_eq!(batch.rows[0].label, "sg26_code=C01600000000012300000");
        assert_eq!(batch.rows[0].values.len(), source.columns.len());
        assert!(batch.rows[0].geometry.contains("\"MultiPolygon\""));
    }

    #[test]
    fn constants_fill_every_row() {
        let source = &Dataset::HeritageSites.sources()[1];
        let batch = map_batch(source, None, vec![feature(json!({"OBJECTID": 9}))]);
        let idx = source.column_names().iter().position(|c| *c == "source").unwrap();
        assert_eq!(batch.rows[0].values[idx], CellValue::Text("nhra".to_string()));
        assert_eq!(batch.rows[0].label, "objectid=9");
    }
}
