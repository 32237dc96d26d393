#![cfg_attr(feature = "fail-on-warnings", deny(warnings))]
#![warn(clippy::all, clippy::pedantic, clippy::nursery, clippy::cargo)]
#![allow(clippy::multiple_crate_versions, clippy::cargo_common_metadata)]

//! Database access for the capeeco loader.
//!
//! Uses `switchy_database` over a raw `PostgreSQL` connection and
//! `switchy_schema` for embedded SQL migrations. All tables live in the
//! [`SCHEMA`] schema; `PostGIS` work is raw SQL through
//! `query_raw_params()` / `exec_raw_params()`.

pub mod db;
pub mod indexes;
pub mod introspect;
pub mod setup;

use include_dir::{Dir, include_dir};
use switchy_database::Database;
use switchy_schema::discovery::embedded::EmbeddedMigrationSource;
use switchy_schema::runner::MigrationRunner;

/// Embedded SQL migrations from the `migrations/` directory.
static MIGRATIONS_DIR: Dir<'_> = include_dir!("$CARGO_MANIFEST_DIR/../../migrations");

/// Schema holding every loader table.
pub const SCHEMA: &str = "capeeco";

/// Derived tables written by the intersection step.
pub mod tables {
    /// Parcel × biodiversity area overlaps.
    pub const PROPERTY_BIODIVERSITY: &str = "property_biodiversity";
    /// Parcel × ecosystem type overlaps.
    pub const PROPERTY_ECOSYSTEMS: &str = "property_ecosystems";
    /// One inside/outside row per parcel.
    pub const PROPERTY_URBAN_EDGE: &str = "property_urban_edge";

    /// All derived tables.
    pub const DERIVED: &[&str] = &[
        PROPERTY_BIODIVERSITY,
        PROPERTY_ECOSYSTEMS,
        PROPERTY_URBAN_EDGE,
    ];
}

/// Errors that can occur during database operations.
#[derive(Debug, thiserror::Error)]
pub enum DbError {
    /// Database query error.
    #[error("Database error: {0}")]
    Database(#[from] switchy_database::DatabaseError),

    /// Migration error.
    #[error("Migration error: {0}")]
    Migration(#[from] switchy_schema::MigrationError),

    /// The connection could not be established.
    #[error("Connection error: {message}")]
    Connection {
        /// Description of what went wrong.
        message: String,
    },

    /// Data conversion error.
    #[error("Data conversion error: {message}")]
    Conversion {
        /// Description of what went wrong.
        message: String,
    },
}

/// Returns `table` qualified with [`SCHEMA`].
#[must_use]
pub fn qualified(table: &str) -> String {
    format!("{SCHEMA}.{table}")
}

/// Runs all pending database migrations.
///
/// # Errors
///
/// Returns [`DbError`] if any migration fails to apply.
pub async fn run_migrations(db: &dyn Database) -> Result<(), DbError> {
    let source = EmbeddedMigrationSource::new(&MIGRATIONS_DIR);
    let runner = MigrationRunner::new(Box::new(source));
    runner.run(db).await?;
    log::info!("Database migrations completed successfully");
    Ok(())
}
