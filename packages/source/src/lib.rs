#![cfg_attr(feature = "fail-on-warnings", deny(warnings))]
#![warn(clippy::all, clippy::pedantic, clippy::nursery, clippy::cargo)]
#![allow(clippy::multiple_crate_versions, clippy::cargo_common_metadata)]

//! Source file access for the loader.
//!
//! [`reader::ChunkedFeatureReader`] streams a `GeoJSON` `FeatureCollection`
//! in bounded batches without holding the whole file in memory. The
//! [`progress`] module defines the reporting trait long-running steps use.

pub mod progress;
pub mod reader;

pub use reader::{ChunkedFeatureReader, FeatureBatch};

/// Errors that can occur while reading a source file.
#[derive(Debug, thiserror::Error)]
pub enum ReaderError {
    /// The file could not be opened or read.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The stream is not a well-formed `GeoJSON` feature collection.
    #[error("GeoJSON parse error: {0}")]
    GeoJson(#[from] geojson::Error),
}
