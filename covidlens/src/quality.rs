//! Diagnostic checks over the loaded tables.
//!
//! None of these checks fail on bad data: duplicated keys, nulls and odd date ranges are
//! reported, not raised. The only error is asking about a column a table does not have.

use std::collections::BTreeMap;

use chrono::NaiveDate;
use itertools::{Itertools, MinMaxResult};
use log::{debug, warn};
use serde::Serialize;

use crate::classify::classify;
use crate::error::{CovidLensError, CovidLensResult, DuplicateKey};
use crate::loader::{Datasets, Record, Table};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct RowCounts {
    pub total: usize,
    pub countries: usize,
    pub aggregates: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct DateRange {
    pub min: NaiveDate,
    pub max: NaiveDate,
}

pub fn row_counts<R: Record>(records: &[R]) -> RowCounts {
    let countries = records.iter().filter(|r| classify(*r).is_country()).count();
    RowCounts {
        total: records.len(),
        countries,
        aggregates: records.len() - countries,
    }
}

/// Every (location, date) key occurring more than once, with its count.
pub fn duplicate_keys<'a, R: Record + 'a>(
    records: impl IntoIterator<Item = &'a R>,
) -> BTreeMap<(String, NaiveDate), usize> {
    records
        .into_iter()
        .map(|r| (r.location().to_owned(), r.date()))
        .counts()
        .into_iter()
        .filter(|(_, count)| *count > 1)
        .collect()
}

/// Duplicated keys among `Country` rows, the ones that make a join unsafe.
pub fn country_duplicate_keys<R: Record>(
    records: &[R],
) -> BTreeMap<(String, NaiveDate), usize> {
    duplicate_keys(records.iter().filter(|r| classify(*r).is_country()))
}

/// Null tally per requested column, over `Country` rows only.
pub fn null_counts<R: Record>(
    records: &[R],
    columns: &[&str],
) -> CovidLensResult<BTreeMap<String, usize>> {
    let mut counts = BTreeMap::new();
    for column in columns {
        let mut nulls = 0;
        for record in records.iter().filter(|r| r.kind().is_country()) {
            match record.is_null(column) {
                Some(true) => nulls += 1,
                Some(false) => {}
                None => {
                    return Err(CovidLensError::Schema {
                        table: R::TABLE,
                        column: (*column).to_owned(),
                    })
                }
            }
        }
        counts.insert((*column).to_owned(), nulls);
    }
    Ok(counts)
}

pub fn date_range<R: Record>(records: &[R]) -> Option<DateRange> {
    match records.iter().map(|r| r.date()).minmax() {
        MinMaxResult::NoElements => None,
        MinMaxResult::OneElement(d) => Some(DateRange { min: d, max: d }),
        MinMaxResult::MinMax(min, max) => Some(DateRange { min, max }),
    }
}

/// Flattens a duplicate map into the keys carried by a join-safety error.
pub fn to_duplicate_keys(
    table: Table,
    duplicates: &BTreeMap<(String, NaiveDate), usize>,
) -> Vec<DuplicateKey> {
    duplicates
        .iter()
        .map(|((location, date), count)| DuplicateKey {
            table,
            location: location.clone(),
            date: *date,
            count: *count,
        })
        .collect()
}

/// Results of every check for one table.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TableReport {
    pub table: Table,
    pub row_counts: RowCounts,
    pub duplicate_keys: Vec<DuplicateKeyEntry>,
    /// Subset of `duplicate_keys` on `Country` rows, which block the join.
    pub join_blocking_keys: Vec<DuplicateKeyEntry>,
    pub null_counts: BTreeMap<String, usize>,
    pub date_range: Option<DateRange>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DuplicateKeyEntry {
    pub location: String,
    pub date: NaiveDate,
    pub count: usize,
}

fn entries(duplicates: BTreeMap<(String, NaiveDate), usize>) -> Vec<DuplicateKeyEntry> {
    duplicates
        .into_iter()
        .map(|((location, date), count)| DuplicateKeyEntry {
            location,
            date,
            count,
        })
        .collect_vec()
}

impl TableReport {
    pub fn build<R: Record>(records: &[R]) -> CovidLensResult<Self> {
        let columns = R::TABLE.required_columns();
        let duplicate_keys = entries(duplicate_keys(records));
        let join_blocking_keys = entries(country_duplicate_keys(records));
        if !duplicate_keys.is_empty() {
            warn!(
                "{} table has {} duplicated (location, date) keys",
                R::TABLE,
                duplicate_keys.len()
            );
        }
        Ok(Self {
            table: R::TABLE,
            row_counts: row_counts(records),
            duplicate_keys,
            join_blocking_keys,
            null_counts: null_counts(records, columns)?,
            date_range: date_range(records),
        })
    }
}

/// Quality checks for both tables.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct QualityReport {
    pub deaths: TableReport,
    pub vaccinations: TableReport,
}

impl QualityReport {
    pub fn build(datasets: &Datasets) -> CovidLensResult<Self> {
        let report = Self {
            deaths: TableReport::build(&datasets.deaths)?,
            vaccinations: TableReport::build(&datasets.vaccinations)?,
        };
        debug!("quality report: {report:?}");
        Ok(report)
    }

    /// True when neither table has duplicated keys among `Country` rows, exactly when
    /// [`crate::join::join`] accepts the tables.
    pub fn is_join_safe(&self) -> bool {
        self.deaths.join_blocking_keys.is_empty() && self.vaccinations.join_blocking_keys.is_empty()
    }
}
