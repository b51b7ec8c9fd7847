//! Error types.

use chrono::NaiveDate;
use itertools::Itertools;

use crate::loader::Table;

/// A (location, date) key that occurs more than once, with its number of occurrences.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DuplicateKey {
    pub table: Table,
    pub location: String,
    pub date: NaiveDate,
    pub count: usize,
}

fn describe_keys(keys: &[DuplicateKey]) -> String {
    keys.iter()
        .map(|k| format!("{}:({}, {}) x{}", k.table, k.location, k.date, k.count))
        .join(", ")
}

#[derive(thiserror::Error, Debug)]
pub enum CovidLensError {
    #[error("Missing required column `{column}` in {table} table")]
    Schema { table: Table, column: String },
    #[error("Unsafe join, duplicated (location, date) keys: {}", describe_keys(.keys))]
    JoinSafety { keys: Vec<DuplicateKey> },
    #[error("Invalid date {value:?} in {table} table at row {row}")]
    InvalidDate {
        table: Table,
        row: usize,
        value: Option<String>,
    },
    #[error("Missing location in {table} table at row {row}")]
    MissingLocation { table: Table, row: usize },
    #[error("Value {value:?} in column `{column}` is not numeric")]
    Numeric { column: String, value: String },
    #[error("Unknown view: {0}")]
    UnknownView(String),
    #[error("Wrapped polars error: {0}")]
    PolarsError(#[from] polars::error::PolarsError),
    #[error("Wrapped IO error: {0}")]
    IoError(#[from] std::io::Error),
    #[error("Wrapped anyhow error: {0}")]
    AnyhowError(#[from] anyhow::Error),
}

pub type CovidLensResult<T> = Result<T, CovidLensError>;
