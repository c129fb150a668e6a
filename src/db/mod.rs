pub mod connection;
pub mod migration_runner;

pub use connection::Database;

use chrono::{DateTime, Utc};
use rusqlite::types::Type;
use rusqlite::Row;
use rust_decimal::Decimal;
use std::str::FromStr;

// Money and quantities are stored as TEXT so no precision is lost in SQLite.

pub(crate) fn get_decimal(row: &Row, column: &str) -> rusqlite::Result<Decimal> {
    let raw: String = row.get(column)?;
    parse_decimal_column(row, column, &raw)
}

pub(crate) fn get_opt_decimal(row: &Row, column: &str) -> rusqlite::Result<Option<Decimal>> {
    let raw: Option<String> = row.get(column)?;
    raw.map(|raw| parse_decimal_column(row, column, &raw)).transpose()
}

fn parse_decimal_column(row: &Row, column: &str, raw: &str) -> rusqlite::Result<Decimal> {
    Decimal::from_str(raw).map_err(|e| {
        let idx = row.as_ref().column_index(column).unwrap_or(0);
        rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(e))
    })
}

pub(crate) fn get_datetime(row: &Row, column: &str) -> rusqlite::Result<DateTime<Utc>> {
    let millis: i64 = row.get(column)?;
    millis_to_datetime(row, column, millis)
}

pub(crate) fn get_opt_datetime(row: &Row, column: &str) -> rusqlite::Result<Option<DateTime<Utc>>> {
    let millis: Option<i64> = row.get(column)?;
    millis.map(|m| millis_to_datetime(row, column, m)).transpose()
}

fn millis_to_datetime(row: &Row, column: &str, millis: i64) -> rusqlite::Result<DateTime<Utc>> {
    DateTime::from_timestamp_millis(millis).ok_or_else(|| {
        let idx = row.as_ref().column_index(column).unwrap_or(0);
        rusqlite::Error::IntegralValueOutOfRange(idx, millis)
    })
}

/// Parse a TEXT column holding an enum name via `FromStr<Err = String>`
pub(crate) fn get_enum<T: FromStr<Err = String>>(row: &Row, column: &str) -> rusqlite::Result<T> {
    let raw: String = row.get(column)?;
    raw.parse::<T>().map_err(|e| {
        let idx = row.as_ref().column_index(column).unwrap_or(0);
        rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, e.into())
    })
}

pub(crate) fn now_millis() -> i64 {
    Utc::now().timestamp_millis()
}

/// Row id in the `PREFIX-<millis>-<uuid>` shape used across tables
pub(crate) fn new_id(prefix: &str) -> String {
    format!("{}-{}-{}", prefix, now_millis(), uuid::Uuid::new_v4())
}
