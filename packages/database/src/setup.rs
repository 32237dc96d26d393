//! First-time database setup.
//!
//! Creates the target database if it is missing, enables `PostGIS`, and
//! applies the embedded migrations. Every step is idempotent, so setup can
//! be re-run against an existing database.

use moosicbox_json_utils::database::ToValue as _;
use switchy_database::{Database, DatabaseValue};

use crate::DbError;
use crate::db::{DatabaseConfig, connect};

/// Extensions setup enables. The first is required; the rest are
/// best-effort.
const EXTENSIONS: &[&str] = &["postgis", "postgis_topology"];

/// Quotes `name` as a `PostgreSQL` identifier.
#[must_use]
pub fn quote_ident(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}

/// Runs the full setup sequence against `config`.
///
/// # Errors
///
/// Returns [`DbError`] if the database cannot be created, `PostGIS` cannot
/// be enabled, or a migration fails. Any of these is fatal for the run.
pub async fn setup_database(config: &DatabaseConfig) -> Result<(), DbError> {
    log::info!("=== STEP 1: DATABASE SETUP ===");

    ensure_database(config).await?;

    let db = connect(config).await?;
    enable_extensions(db.as_ref()).await?;
    crate::run_migrations(db.as_ref()).await?;

    log::info!("  Database setup complete");
    Ok(())
}

/// Creates the target database through the maintenance database if it
/// does not exist yet.
///
/// # Errors
///
/// Returns [`DbError`] if the maintenance connection or `CREATE DATABASE`
/// fails.
pub async fn ensure_database(config: &DatabaseConfig) -> Result<(), DbError> {
    let name = config.database_name()?;
    let maintenance = connect(&config.maintenance()?).await?;

    let rows = maintenance
        .query_raw_params(
            "SELECT COUNT(*)::bigint AS n FROM pg_database WHERE datname = $1",
            &[DatabaseValue::String(name.clone())],
        )
        .await?;
    let existing: i64 = rows
        .first()
        .map(|row| row.to_value("n"))
        .transpose()
        .map_err(|e| DbError::Conversion {
            message: format!("Failed to read pg_database count: {e}"),
        })?
        .unwrap_or(0);

    if existing > 0 {
        log::info!("  Database {name} already exists");
    } else {
        log::info!("  Creating database {name}");
        maintenance
            .exec_raw(&format!("CREATE DATABASE {}", quote_ident(&name)))
            .await?;
    }

    Ok(())
}

/// Enables the spatial extensions.
///
/// # Errors
///
/// Returns [`DbError`] if `postgis` itself cannot be enabled. Failures on
/// the optional extensions are logged.
pub async fn enable_extensions(db: &dyn Database) -> Result<(), DbError> {
    for (i, extension) in EXTENSIONS.iter().enumerate() {
        let sql = format!("CREATE EXTENSION IF NOT EXISTS {extension}");
        match db.exec_raw(&sql).await {
            Ok(_) => log::info!("  Extension {extension} enabled"),
            Err(e) if i > 0 => log::warn!("  Optional extension {extension} unavailable: {e}"),
            Err(e) => return Err(e.into()),
        }
    }
    Ok(())
}
