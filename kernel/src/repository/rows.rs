//! Column decoding helpers shared by the repositories.

use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use sqlx::{sqlite::SqliteRow, Row};

use crate::domain::CoreError;

/// Reads an RFC 3339 timestamp column.
pub(crate) fn timestamp(row: &SqliteRow, column: &str) -> Result<DateTime<Utc>, CoreError> {
    let raw: String = row.try_get(column)?;
    Ok(DateTime::parse_from_rfc3339(&raw)?.with_timezone(&Utc))
}

/// Reads a JSON text column.
pub(crate) fn json<T: DeserializeOwned>(row: &SqliteRow, column: &str) -> Result<T, CoreError> {
    let raw: String = row.try_get(column)?;
    Ok(serde_json::from_str(&raw)?)
}

/// Reads a parseable text column (state enums).
pub(crate) fn parsed<T>(row: &SqliteRow, column: &str) -> Result<T, CoreError>
where
    T: std::str::FromStr,
    CoreError: From<T::Err>,
{
    let raw: String = row.try_get(column)?;
    Ok(raw.parse::<T>()?)
}

/// Reads a nullable non-negative count.
pub(crate) fn count(row: &SqliteRow, column: &str) -> Result<Option<u32>, CoreError> {
    let raw: Option<i64> = row.try_get(column)?;
    raw.map(|n| {
        u32::try_from(n).map_err(|_| CoreError::Corrupt(format!("{column} out of range: {n}")))
    })
    .transpose()
}
