//! Staging table writes and post-load validation.
//!
//! Each batch is written as one multi-row `INSERT` inside a transaction.
//! When that fails, [`write_with_fallback`] narrows the failure down: first
//! to fixed-size sub-batches, then to single rows, so one malformed record
//! costs at most itself.

use std::fmt::Write as _;

use async_trait::async_trait;
use capeeco_database::{DbError, qualified};
use capeeco_dataset_models::Dataset;
use moosicbox_json_utils::database::ToValue as _;
use switchy_database::{Database, DatabaseValue};

use crate::PG_MAX_PARAMS;
use crate::mapping::{CellValue, StagingRow};

/// Persists staging rows. One call is one all-or-nothing unit.
#[async_trait]
pub trait RowWriter: Send + Sync {
    /// Writes `rows`, returning how many were inserted.
    ///
    /// # Errors
    ///
    /// Returns [`DbError`] if the write fails; no row of the call may be
    /// left behind.
    async fn write(&self, rows: &[StagingRow]) -> Result<u64, DbError>;
}

/// Writes into one dataset's staging table.
pub struct StagingWriter<'a> {
    db: &'a dyn Database,
    table: String,
    columns: Vec<&'static str>,
}

impl<'a> StagingWriter<'a> {
    /// Creates a writer for `columns` (plus `geom`) of `dataset`'s staging
    /// table.
    #[must_use]
    pub fn new(db: &'a dyn Database, dataset: Dataset, columns: Vec<&'static str>) -> Self {
        Self {
            db,
            table: qualified(dataset.staging_table()),
            columns,
        }
    }

    async fn insert_rows(&self, db: &dyn Database, rows: &[StagingRow]) -> Result<u64, DbError> {
        let mut inserted = 0u64;
        for chunk in rows.chunks(rows_per_statement(self.columns.len())) {
            let sql = insert_sql(&self.table, &self.columns, chunk.len());
            let mut params: Vec<DatabaseValue> =
                Vec::with_capacity(chunk.len() * (self.columns.len() + 1));
            for row in chunk {
                params.extend(row.values.iter().cloned().map(into_database_value));
                params.push(DatabaseValue::String(row.geometry.clone()));
            }
            inserted += db.exec_raw_params(&sql, &params).await?;
        }
        Ok(inserted)
    }
}

#[async_trait]
impl RowWriter for StagingWriter<'_> {
    async fn write(&self, rows: &[StagingRow]) -> Result<u64, DbError> {
        if rows.is_empty() {
            return Ok(0);
        }

        let txn = self.db.begin_transaction().await?;
        match self.insert_rows(txn.as_ref(), rows).await {
            Ok(inserted) => {
                txn.commit().await?;
                Ok(inserted)
            }
            Err(e) => {
                if let Err(rollback) = txn.rollback().await {
                    log::warn!("  Rollback after failed staging write also failed: {rollback}");
                }
                Err(e)
            }
        }
    }
}

/// Rows per `INSERT` statement for `column_count` mapped columns, bounded
/// by the bind-parameter limit.
#[must_use]
pub const fn rows_per_statement(column_count: usize) -> usize {
    // One parameter per mapped column plus one for the geometry.
    PG_MAX_PARAMS / (column_count + 1)
}

/// Builds a multi-row `INSERT` into `table` for `row_count` rows. The
/// geometry parameter of each row is `GeoJSON` text in `EPSG:4326`.
#[must_use]
pub fn insert_sql(table: &str, columns: &[&str], row_count: usize) -> String {
    let mut sql = format!("INSERT INTO {table} ({}, geom) VALUES ", columns.join(", "));

    let mut idx = 1usize;
    for r in 0..row_count {
        if r > 0 {
            sql.push_str(", ");
        }
        sql.push('(');
        for _ in columns {
            let _ = write!(sql, "${idx}, ");
            idx += 1;
        }
        let _ = write!(sql, "ST_SetSRID(ST_GeomFromGeoJSON(${idx}), 4326))");
        idx += 1;
    }
    sql
}

fn into_database_value(value: CellValue) -> DatabaseValue {
    match value {
        CellValue::Null => DatabaseValue::Null,
        CellValue::Text(s) => DatabaseValue::String(s),
        CellValue::Integer(i) => DatabaseValue::Int64(i),
        CellValue::Float(f) => DatabaseValue::Real64(f),
        CellValue::Bool(b) => DatabaseValue::Bool(b),
    }
}

/// Result of [`write_with_fallback`].
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct WriteOutcome {
    /// Rows inserted.
    pub written: u64,
    /// Labels of rows that could not be written even on their own.
    pub failed: Vec<String>,
}

/// Writes `rows` as one unit. If that fails, retries in sub-batches of
/// `sub_batch_size`; each sub-batch that still fails is retried row by
/// row, and rows that fail alone are logged and skipped.
pub async fn write_with_fallback(
    writer: &dyn RowWriter,
    rows: &[StagingRow],
    sub_batch_size: usize,
) -> WriteOutcome {
    let mut outcome = WriteOutcome::default();
    if rows.is_empty() {
        return outcome;
    }

    match writer.write(rows).await {
        Ok(n) => {
            outcome.written = n;
            return outcome;
        }
        Err(e) => {
            log::error!("  Error writing batch of {} rows to staging: {e}", rows.len());
        }
    }

    let sub_batch_size = sub_batch_size.max(1);
    if rows.len() <= sub_batch_size {
        write_rows_individually(writer, rows, &mut outcome).await;
        return outcome;
    }

    for (i, chunk) in rows.chunks(sub_batch_size).enumerate() {
        match writer.write(chunk).await {
            Ok(n) => outcome.written += n,
            Err(e) => {
                log::warn!(
                    "  Sub-batch at row {} failed ({e}), retrying row by row",
                    i * sub_batch_size
                );
                write_rows_individually(writer, chunk, &mut outcome).await;
            }
        }
    }

    if !outcome.failed.is_empty() {
        log::warn!(
            "  Recovered {} of {} rows; skipped {} malformed",
            outcome.written,
            rows.len(),
            outcome.failed.len()
        );
    }
    outcome
}

async fn write_rows_individually(
    writer: &dyn RowWriter,
    rows: &[StagingRow],
    outcome: &mut WriteOutcome,
) {
    for row in rows {
        match writer.write(std::slice::from_ref(row)).await {
            Ok(n) => outcome.written += n,
            Err(e) => {
                log::error!("  Skipping malformed row {}: {e}", row.label);
                outcome.failed.push(row.label.clone());
            }
        }
    }
}

/// Empties `dataset`'s staging table.
///
/// # Errors
///
/// Returns [`DbError`] if the `TRUNCATE` fails.
pub async fn truncate(db: &dyn Database, dataset: Dataset) -> Result<(), DbError> {
    db.exec_raw(&format!("TRUNCATE {}", qualified(dataset.staging_table())))
        .await?;
    Ok(())
}

/// Builds the statement that deletes duplicate `key` values from
/// `dataset`'s staging table, keeping the row with the lowest `id`.
#[must_use]
pub fn dedup_sql(dataset: Dataset, key: &str) -> String {
    let table = qualified(dataset.staging_table());
    format!(
        "DELETE FROM {table} a
         USING {table} b
         WHERE a.id > b.id AND a.{key} = b.{key}"
    )
}

/// Deduplicates `dataset`'s staging table on `key`. Returns the number of
/// rows removed.
///
/// # Errors
///
/// Returns [`DbError`] if a query fails.
pub async fn deduplicate(db: &dyn Database, dataset: Dataset, key: &str) -> Result<u64, DbError> {
    let rows = db
        .query_raw_params(
            &format!(
                "SELECT COUNT(*)::bigint AS n FROM (
                     SELECT {key} FROM {} GROUP BY {key} HAVING COUNT(*) > 1
                 ) d",
                qualified(dataset.staging_table())
            ),
            &[],
        )
        .await?;
    let duplicated_keys: i64 = rows
        .first()
        .map(|row| row.to_value("n"))
        .transpose()
        .map_err(|e| DbError::Conversion {
            message: format!("Failed to parse duplicate count: {e}"),
        })?
        .unwrap_or(0);

    if duplicated_keys == 0 {
        return Ok(0);
    }

    log::warn!("  Found {duplicated_keys} duplicate {key} values (keeping first)");
    let removed = db.exec_raw_params(&dedup_sql(dataset, key), &[]).await?;
    log::info!("  Removed {removed} duplicate rows");
    Ok(removed)
}
