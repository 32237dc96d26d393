//! Live schema metadata and row counts.

use moosicbox_json_utils::database::ToValue as _;
use switchy_database::{Database, DatabaseValue};

use crate::{DbError, SCHEMA, qualified};

/// Column names of `table` in [`SCHEMA`], in ordinal order. Empty if the
/// table does not exist.
///
/// # Errors
///
/// Returns [`DbError`] if the catalog query fails.
pub async fn table_columns(db: &dyn Database, table: &str) -> Result<Vec<String>, DbError> {
    let rows = db
        .query_raw_params(
            "SELECT column_name::text AS column_name
             FROM information_schema.columns
             WHERE table_schema = $1 AND table_name = $2
             ORDER BY ordinal_position",
            &[
                DatabaseValue::String(SCHEMA.to_string()),
                DatabaseValue::String(table.to_string()),
            ],
        )
        .await?;

    rows.iter()
        .map(|row| {
            row.to_value("column_name").map_err(|e| DbError::Conversion {
                message: format!("Failed to read column name of {table}: {e}"),
            })
        })
        .collect()
}

/// Number of rows in `table` (in [`SCHEMA`]).
///
/// # Errors
///
/// Returns [`DbError`] if the count query fails.
pub async fn count_rows(db: &dyn Database, table: &str) -> Result<i64, DbError> {
    let rows = db
        .query_raw_params(
            &format!("SELECT COUNT(*)::bigint AS n FROM {}", qualified(table)),
            &[],
        )
        .await?;

    let row = rows.first().ok_or_else(|| DbError::Conversion {
        message: format!("COUNT(*) on {table} returned no rows"),
    })?;

    row.to_value("n").map_err(|e| DbError::Conversion {
        message: format!("Failed to parse row count of {table}: {e}"),
    })
}

/// Row count per table, logged as one summary block. Tables that cannot
/// be counted are reported as `None`.
pub async fn log_row_counts(db: &dyn Database, tables: &[&str]) -> Vec<(String, Option<i64>)> {
    log::info!("=== ROW COUNTS ===");
    let mut counts = Vec::with_capacity(tables.len());
    for table in tables {
        match count_rows(db, table).await {
            Ok(n) => {
                log::info!("  {table:<36} {n:>10}");
                counts.push(((*table).to_string(), Some(n)));
            }
            Err(e) => {
                log::warn!("  {table:<36} {:>10} ({e})", "?");
                counts.push(((*table).to_string(), None));
            }
        }
    }
    counts
}
