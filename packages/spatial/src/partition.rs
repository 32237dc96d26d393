//! Suburb partitions of the parcel table.

use std::fmt;

use capeeco_database::qualified;
use capeeco_dataset_models::Dataset;
use moosicbox_json_utils::database::ToValue as _;
use switchy_database::{Database, DatabaseValue};

use crate::IntersectError;

/// Key used on the command line for parcels without a suburb.
pub const UNASSIGNED_KEY: &str = "<no suburb>";

/// One unit of intersection work: the parcels of one suburb.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
pub enum Partition {
    /// Parcels whose `suburb` equals this value.
    Named(String),
    /// Parcels with a NULL `suburb`. Always last.
    Unassigned,
}

impl Partition {
    /// `WHERE` predicate on the parcel alias `p`. Named partitions bind the
    /// suburb as `$1`.
    #[must_use]
    pub const fn predicate(&self) -> &'static str {
        match self {
            Self::Named(_) => "p.suburb = $1",
            Self::Unassigned => "p.suburb IS NULL",
        }
    }

    /// Parameters for [`Self::predicate`].
    #[must_use]
    pub fn params(&self) -> Vec<DatabaseValue> {
        match self {
            Self::Named(suburb) => vec![DatabaseValue::String(suburb.clone())],
            Self::Unassigned => vec![],
        }
    }

    /// Parses a `--resume-from` key.
    #[must_use]
    pub fn from_key(key: &str) -> Self {
        if key == UNASSIGNED_KEY {
            Self::Unassigned
        } else {
            Self::Named(key.to_string())
        }
    }
}

impl fmt::Display for Partition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Named(suburb) => f.write_str(suburb),
            Self::Unassigned => f.write_str(UNASSIGNED_KEY),
        }
    }
}

/// Distinct parcel suburbs in sorted order, followed by
/// [`Partition::Unassigned`] when any parcel has no suburb.
///
/// # Errors
///
/// Returns [`IntersectError`] if the query fails.
pub async fn list_partitions(db: &dyn Database) -> Result<Vec<Partition>, IntersectError> {
    let rows = db
        .query_raw_params(
            &format!(
                "SELECT DISTINCT suburb FROM {} ORDER BY suburb NULLS LAST",
                qualified(Dataset::Parcels.production_table())
            ),
            &[],
        )
        .await?;

    let mut partitions = Vec::with_capacity(rows.len());
    for row in &rows {
        let suburb: Option<String> = row.to_value("suburb").map_err(|e| {
            IntersectError::Conversion {
                message: format!("Failed to read suburb: {e}"),
            }
        })?;
        partitions.push(suburb.map_or(Partition::Unassigned, Partition::Named));
    }
    Ok(partitions)
}

/// Partitions from `resume_from` onward, or all of them.
///
/// # Errors
///
/// Returns [`IntersectError::UnknownPartition`] if `resume_from` is not
/// one of `partitions`.
pub fn remaining<'a>(
    partitions: &'a [Partition],
    resume_from: Option<&Partition>,
) -> Result<&'a [Partition], IntersectError> {
    let Some(start) = resume_from else {
        return Ok(partitions);
    };
    partitions
        .iter()
        .position(|p| p == start)
        .map(|idx| &partitions[idx..])
        .ok_or_else(|| IntersectError::UnknownPartition {
            key: start.to_string(),
        })
}
