//! Run configuration for the loader.
//!
//! Dataset definitions are compiled in; this file only tunes them. A
//! config file looks like:
//!
//! ```toml
//! data_dir = "/srv/capeeco/raw"
//! sub_batch_size = 100
//!
//! [datasets.parcels]
//! chunk_size = 5000
//!
//! [datasets.wetlands]
//! source_epsg = 3857
//! ```

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use serde::Deserialize;

use crate::{Crs, Dataset, DatasetSource};

/// Default directory holding the raw `GeoJSON` files.
pub const DEFAULT_DATA_DIR: &str = "data/raw";

/// Default number of rows per sub-batch when a batch write fails.
pub const DEFAULT_SUB_BATCH_SIZE: usize = 100;

/// Default number of partitions between intersection progress lines.
pub const DEFAULT_PROGRESS_EVERY: usize = 50;

/// Errors raised while reading or validating configuration.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// The file could not be read.
    #[error("Failed to read config {path}: {source}")]
    Io {
        /// Path that failed.
        path: PathBuf,
        /// Underlying I/O error.
        source: std::io::Error,
    },

    /// The TOML was malformed or contained unknown keys.
    #[error("Invalid config: {0}")]
    Toml(#[from] toml::de::Error),

    /// An EPSG code the loader cannot reproject from.
    #[error("Unsupported source CRS EPSG:{epsg} for dataset {dataset}")]
    UnsupportedCrs {
        /// Dataset the override belongs to.
        dataset: Dataset,
        /// The rejected code.
        epsg: u32,
    },

    /// A numeric setting outside its valid range.
    #[error("Invalid config value: {message}")]
    InvalidValue {
        /// Description of the problem.
        message: String,
    },
}

/// Per-dataset overrides.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct DatasetOverride {
    /// Features per streamed batch.
    pub chunk_size: Option<usize>,
    /// EPSG code of the source files.
    pub source_epsg: Option<u32>,
}

/// Loader configuration.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct LoaderConfig {
    /// Directory holding the raw `GeoJSON` files.
    #[serde(default = "default_data_dir")]
    pub data_dir: PathBuf,
    /// Rows per sub-batch when retrying a failed batch write.
    #[serde(default = "default_sub_batch_size")]
    pub sub_batch_size: usize,
    /// Partitions between intersection progress log lines.
    #[serde(default = "default_progress_every")]
    pub progress_every: usize,
    /// Per-dataset overrides keyed by dataset name.
    #[serde(default)]
    pub datasets: BTreeMap<Dataset, DatasetOverride>,
}

fn default_data_dir() -> PathBuf {
    PathBuf::from(DEFAULT_DATA_DIR)
}

const fn default_sub_batch_size() -> usize {
    DEFAULT_SUB_BATCH_SIZE
}

const fn default_progress_every() -> usize {
    DEFAULT_PROGRESS_EVERY
}

impl Default for LoaderConfig {
    fn default() -> Self {
        Self {
            data_dir: default_data_dir(),
            sub_batch_size: DEFAULT_SUB_BATCH_SIZE,
            progress_every: DEFAULT_PROGRESS_EVERY,
            datasets: BTreeMap::new(),
        }
    }
}

impl LoaderConfig {
    /// Parses and validates a TOML config string.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] if the TOML is malformed, has unknown keys,
    /// or contains out-of-range values.
    pub fn from_toml_str(s: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(s)?;
        config.validate()?;
        Ok(config)
    }

    /// Reads and validates a TOML config file.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] if the file cannot be read or is invalid.
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml_str(&contents)
    }

    /// Checks numeric ranges and that every CRS override is supported.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] on the first invalid setting.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.sub_batch_size == 0 {
            return Err(ConfigError::InvalidValue {
                message: "sub_batch_size must be at least 1".to_string(),
            });
        }
        if self.progress_every == 0 {
            return Err(ConfigError::InvalidValue {
                message: "progress_every must be at least 1".to_string(),
            });
        }
        for (dataset, overrides) in &self.datasets {
            if overrides.chunk_size == Some(0) {
                return Err(ConfigError::InvalidValue {
                    message: format!("datasets.{dataset}.chunk_size must be at least 1"),
                });
            }
            self.source_crs(*dataset)?;
        }
        Ok(())
    }

    /// Features per batch for `dataset`.
    #[must_use]
    pub fn chunk_size(&self, dataset: Dataset) -> usize {
        self.datasets
            .get(&dataset)
            .and_then(|o| o.chunk_size)
            .unwrap_or_else(|| dataset.default_chunk_size())
    }

    /// Reference system of `dataset`'s source files.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::UnsupportedCrs`] if the override names an
    /// EPSG code the loader cannot reproject.
    pub fn source_crs(&self, dataset: Dataset) -> Result<Crs, ConfigError> {
        match self.datasets.get(&dataset).and_then(|o| o.source_epsg) {
            None => Ok(dataset.default_source_crs()),
            Some(epsg) => {
                Crs::from_epsg(epsg).ok_or(ConfigError::UnsupportedCrs { dataset, epsg })
            }
        }
    }

    /// Full path of a dataset source file.
    #[must_use]
    pub fn file_path(&self, source: &DatasetSource) -> PathBuf {
        self.data_dir.join(source.file_name())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_config_uses_defaults() {
        let config = LoaderConfig::from_toml_str("").unwrap();
        assert_eq!(config.data_dir, PathBuf::from(DEFAULT_DATA_DIR));
        assert_eq!(config.sub_batch_size, DEFAULT_SUB_BATCH_SIZE);
        assert_eq!(config.chunk_size(Dataset::Parcels), 10_000);
        assert_eq!(config.source_crs(Dataset::Wetlands).unwrap(), Crs::Wgs84);
    }

    #[test]
    fn dataset_overrides_apply() {
        let config = LoaderConfig::from_toml_str(
            r#"
            data_dir = "/srv/raw"

            [datasets.parcels]
            chunk_size = 500

            [datasets.wetlands]
            source_epsg = 3857
            "#,
        )
        .unwrap();

        assert_eq!(config.chunk_size(Dataset::Parcels), 500);
        assert_eq!(config.chunk_size(Dataset::Wetlands), 5_000);
        assert_eq!(
            config.source_crs(Dataset::Wetlands).unwrap(),
            Crs::WebMercator
        );
        let source = &Dataset::Parcels.sources()[0];
        assert_eq!(
            config.file_path(source),
            PathBuf::from("/srv/raw/cct_land_parcels_2025.geojson")
        );
    }

    #[test]
    fn rejects_unknown_keys() {
        assert!(matches!(
            LoaderConfig::from_toml_str("chunk_sizes = 3"),
            Err(ConfigError::Toml(_))
        ));
        assert!(matches!(
            LoaderConfig::from_toml_str("[datasets.not_a_dataset]\nchunk_size = 3"),
            Err(ConfigError::Toml(_))
        ));
    }

    #[test]
    fn rejects_unsupported_crs() {
        let err = LoaderConfig::from_toml_str("[datasets.parcels]\nsource_epsg = 22279")
            .unwrap_err();
        assert!(matches!(
            err,
            ConfigError::UnsupportedCrs {
                dataset: Dataset::Parcels,
                epsg: 22279
            }
        ));
    }

    #[test]
    fn rejects_zero_sizes() {
        assert!(LoaderConfig::from_toml_str("sub_batch_size = 0").is_err());
        assert!(LoaderConfig::from_toml_str("[datasets.parcels]\nchunk_size = 0").is_err());
    }
}
