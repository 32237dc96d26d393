//! Streaming, batched `GeoJSON` reader.
//!
//! Features are parsed one at a time from the `features` array, so memory
//! use is bounded by the batch size rather than the file size. A reader
//! covers its file exactly once, in file order; to read again, open a new
//! one.
//!
//! Each array element is first read as plain JSON and only then
//! interpreted as a feature. A feature whose geometry is malformed keeps
//! its properties and comes through with no geometry, so one bad record
//! never ends the stream.

use std::fs::File;
use std::io::{BufReader, Read};
use std::path::Path;

use capeeco_geometry::{Properties, RawFeature};
use serde_json::{Number, Value};

use crate::ReaderError;

type ValueStream = Box<dyn Iterator<Item = Result<Value, geojson::Error>> + Send>;

/// Upper bound on up-front batch allocation.
const PREALLOC_CAP: usize = 4_096;

/// One batch of features.
#[derive(Debug, Clone)]
pub struct FeatureBatch {
    /// Zero-based position of this batch in the file.
    pub index: usize,
    /// Features in file order. At most the reader's batch size.
    pub features: Vec<RawFeature>,
}

/// Yields [`FeatureBatch`]es of at most `batch_size` features. Every batch
/// but the last is full.
///
/// Only a stream that is not valid JSON, or not a feature collection,
/// produces an error. It is yielded once and the reader then returns
/// `None`.
pub struct ChunkedFeatureReader {
    values: ValueStream,
    batch_size: usize,
    batches: usize,
    features_read: usize,
    unconvertible: usize,
    finished: bool,
}

impl ChunkedFeatureReader {
    /// Opens `path` for streaming.
    ///
    /// # Errors
    ///
    /// Returns [`ReaderError::Io`] if the file cannot be opened.
    pub fn open(path: &Path, batch_size: usize) -> Result<Self, ReaderError> {
        let file = File::open(path)?;
        Ok(Self::from_reader(BufReader::new(file), batch_size))
    }

    /// Streams features from any reader. `batch_size` below 1 is treated
    /// as 1.
    pub fn from_reader<R: Read + Send + 'static>(reader: R, batch_size: usize) -> Self {
        // Untyped elements, so a bad geometry fails only its own feature.
        #[allow(deprecated)]
        let values = geojson::FeatureIterator::<R, Value>::new(reader);
        Self {
            values: Box::new(values),
            batch_size: batch_size.max(1),
            batches: 0,
            features_read: 0,
            unconvertible: 0,
            finished: false,
        }
    }

    /// Features yielded so far.
    #[must_use]
    pub const fn features_read(&self) -> usize {
        self.features_read
    }

    /// Features whose geometry could not be parsed or converted and was
    /// replaced with `None`.
    #[must_use]
    pub const fn unconvertible(&self) -> usize {
        self.unconvertible
    }

    fn convert(&mut self, value: Value) -> RawFeature {
        let position = self.features_read;
        self.features_read += 1;

        let Value::Object(mut object) = value else {
            self.unconvertible += 1;
            log::debug!("Feature {position} is not a JSON object");
            return RawFeature {
                geometry: None,
                properties: Properties::new(),
            };
        };

        let mut properties = match object.remove("properties") {
            Some(Value::Object(map)) => map,
            _ => Properties::new(),
        };
        for value in properties.values_mut() {
            normalize_numbers(value);
        }

        let geometry = match object.remove("geometry") {
            None | Some(Value::Null) => None,
            Some(raw) => match geojson::Geometry::from_json_value(raw)
                .and_then(geo::Geometry::<f64>::try_from)
            {
                Ok(geometry) => Some(geometry),
                Err(e) => {
                    self.unconvertible += 1;
                    log::debug!("Unconvertible geometry in feature {position}: {e}");
                    None
                }
            },
        };

        RawFeature {
            geometry,
            properties,
        }
    }
}

impl Iterator for ChunkedFeatureReader {
    type Item = Result<FeatureBatch, ReaderError>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.finished {
            return None;
        }

        let mut features = Vec::with_capacity(self.batch_size.min(PREALLOC_CAP));
        while features.len() < self.batch_size {
            match self.values.next() {
                Some(Ok(value)) => {
                    let raw = self.convert(value);
                    features.push(raw);
                }
                Some(Err(e)) => {
                    self.finished = true;
                    return Some(Err(e.into()));
                }
                None => {
                    self.finished = true;
                    break;
                }
            }
        }

        if features.is_empty() {
            return None;
        }

        let index = self.batches;
        self.batches += 1;
        Some(Ok(FeatureBatch { index, features }))
    }
}

/// Rewrites every number in `value` as either a signed 64-bit integer or
/// a double. Unsigned values above `i64::MAX` and all non-integral values
/// become doubles.
pub fn normalize_numbers(value: &mut Value) {
    match value {
        Value::Number(n) => {
            if n.as_i64().is_none() {
                if let Some(normalized) = n.as_f64().and_then(Number::from_f64) {
                    *n = normalized;
                }
            }
        }
        Value::Array(items) => items.iter_mut().for_each(normalize_numbers),
        Value::Object(map) => map.values_mut().for_each(normalize_numbers),
        Value::Null | Value::Bool(_) | Value::String(_) => {}
    }
}

#[cfg(test)]
mod tests {
    use std::io::Cursor;

    use geo::Geometry;

    use super::*;

    fn collection(features: &[String]) -> Cursor<Vec<u8>> {
        let json = format!(
            r#"{{"type":"FeatureCollection","name":"test","features":[{}]}}"#,
            features.join(",")
        );
        Cursor::new(json.into_bytes())
    }

    fn point_feature(id: i64) -> String {
        format!(
            r#"{{"type":"Feature","properties":{{"OBJECTID":{id},"AREA_HCTR":1.5}},"geometry":{{"type":"Point","coordinates":[18.4,-33.9]}}}}"#
        )
    }

    #[test]
    fn yields_bounded_batches_in_file_order() {
        let features: Vec<String> = (1..=5).map(point_feature).collect();
        let mut reader = ChunkedFeatureReader::from_reader(collection(&features), 2);

        let batches: Vec<FeatureBatch> = reader.by_ref().map(Result::unwrap).collect();

        let sizes: Vec<usize> = batches.iter().map(|b| b.features.len()).collect();
        assert_eq!(sizes, vec![2, 2, 1]);
        let indexes: Vec<usize> = batches.iter().map(|b| b.index).collect();
        assert_eq!(indexes, vec![0, 1, 2]);

        let ids: Vec<i64> = batches
            .iter()
            .flat_map(|b| &b.features)
            .map(|f| f.properties["OBJECTID"].as_i64().unwrap())
            .collect();
        assert_eq!(ids, vec![1, 2, 3, 4, 5]);
        assert_eq!(reader.features_read(), 5);
        assert!(reader.next().is_none());
    }

    #[test]
    fn exact_multiple_has_no_trailing_empty_batch() {
        let features: Vec<String> = (1..=4).map(point_feature).collect();
        let reader = ChunkedFeatureReader::from_reader(collection(&features), 2);
        assert_eq!(reader.count(), 2);
    }

    #[test]
    fn empty_collection_yields_nothing() {
        let mut reader = ChunkedFeatureReader::from_reader(collection(&[]), 10);
        assert!(reader.next().is_none());
    }

    #[test]
    fn null_geometry_becomes_none() {
        let features = vec![
            r#"{"type":"Feature","properties":{"OBJECTID":1},"geometry":null}"#.to_string(),
            point_feature(2),
        ];
        let batch = ChunkedFeatureReader::from_reader(collection(&features), 10)
            .next()
            .unwrap()
            .unwrap();

        assert!(batch.features[0].geometry.is_none());
        assert!(matches!(
            batch.features[1].geometry,
            Some(Geometry::Point(_))
        ));
    }

    #[test]
    fn numbers_become_integers_or_doubles() {
        let mut value = serde_json::json!({
            "big": u64::MAX,
            "small": 7,
            "ratio": 0.25,
            "nested": [u64::MAX, {"deep": 2.5}],
            "code": "0123",
        });
        normalize_numbers(&mut value);

        assert!(value["big"].is_f64());
        assert!(value["small"].is_i64());
        assert!(value["ratio"].is_f64());
        assert!(value["nested"][0].is_f64());
        assert!(value["nested"][1]["deep"].is_f64());
        assert_eq!(value["code"], "0123");
    }

    #[test]
    fn properties_are_normalized_while_reading() {
        let features = vec![format!(
            r#"{{"type":"Feature","properties":{{"BIG":{}}},"geometry":null}}"#,
            u64::MAX
        )];
        let batch = ChunkedFeatureReader::from_reader(collection(&features), 1)
            .next()
            .unwrap()
            .unwrap();
        assert!(batch.features[0].properties["BIG"].is_f64());
    }

    #[test]
    fn bad_geometries_keep_their_properties_and_the_stream_going() {
        let features = vec![
            point_feature(1),
            r#"{"type":"Feature","properties":{"OBJECTID":2},"geometry":{"type":"Polygon","coordinates":null}}"#.to_string(),
            r#"{"type":"Feature","properties":{"OBJECTID":3},"geometry":{"type":"Blob","coordinates":[]}}"#.to_string(),
            point_feature(4),
        ];
        let mut reader = ChunkedFeatureReader::from_reader(collection(&features), 3);

        let batches: Vec<FeatureBatch> = reader.by_ref().map(Result::unwrap).collect();
        let all: Vec<&RawFeature> = batches.iter().flat_map(|b| &b.features).collect();

        assert_eq!(all.len(), 4);
        assert!(all[0].geometry.is_some());
        assert!(all[1].geometry.is_none());
        assert_eq!(all[1].properties["OBJECTID"], 2);
        assert!(all[2].geometry.is_none());
        assert_eq!(all[2].properties["OBJECTID"], 3);
        assert!(all[3].geometry.is_some());
        assert_eq!(reader.features_read(), 4);
        assert_eq!(reader.unconvertible(), 2);
    }

    #[test]
    fn truncated_stream_yields_one_error_then_stops() {
        let json = r#"{"type":"FeatureCollection","features":[
            {"type":"Feature","properties":{},"geometry":null},
            {"type":"Feature","properties":{"#;
        let mut reader = ChunkedFeatureReader::from_reader(Cursor::new(json.as_bytes().to_vec()), 10);

        assert!(matches!(reader.next(), Some(Err(ReaderError::GeoJson(_)))));
        assert!(reader.next().is_none());
    }

    #[test]
    fn opens_files_from_disk() {
        let path = std::env::temp_dir().join("capeeco_reader_open_test.geojson");
        let features: Vec<String> = (1..=3).map(point_feature).collect();
        std::fs::write(&path, collection(&features).into_inner()).unwrap();

        let total: usize = ChunkedFeatureReader::open(&path, 2)
            .unwrap()
            .map(|b| b.unwrap().features.len())
            .sum();
        assert_eq!(total, 3);

        std::fs::remove_file(&path).unwrap();
    }

    #[test]
    fn missing_file_is_an_io_error() {
        let path = std::env::temp_dir().join("capeeco_reader_does_not_exist.geojson");
        assert!(matches!(
            ChunkedFeatureReader::open(&path, 2),
            Err(ReaderError::Io(_))
        ));
    }
}
