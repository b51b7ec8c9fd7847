//! Reads the deaths and vaccinations tables into typed records.
//!
//! Every column is read as text. Numeric cells stay raw until the metric engine coerces them,
//! which is what lets a table imported with numbers-as-text load without a schema failure.

use std::path::Path;

use chrono::{NaiveDate, NaiveDateTime};
use itertools::izip;
use log::{debug, info};
use polars::prelude::*;
use serde::{Deserialize, Serialize};
use strum_macros::{Display, EnumString};

use crate::classify::{Classified, LocationKind};
use crate::config::Config;
use crate::error::{CovidLensError, CovidLensResult};
use crate::COL;

const DATE_FORMATS: [&str; 3] = ["%Y-%m-%d", "%m/%d/%Y", "%d.%m.%Y"];
const DATETIME_FORMATS: [&str; 2] = ["%Y-%m-%d %H:%M:%S", "%Y-%m-%dT%H:%M:%S"];

/// The two source tables.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, Display,
    EnumString,
)]
#[strum(serialize_all = "lowercase", ascii_case_insensitive)]
#[serde(rename_all = "lowercase")]
pub enum Table {
    Deaths,
    Vaccinations,
}

impl Table {
    pub fn required_columns(&self) -> &'static [&'static str] {
        match self {
            Table::Deaths => &COL::DEATHS_REQUIRED,
            Table::Vaccinations => &COL::VACCINATIONS_REQUIRED,
        }
    }
}

/// Common access to the keyed records of either table.
pub trait Record: Classified {
    const TABLE: Table;

    fn location(&self) -> &str;
    fn date(&self) -> NaiveDate;
    /// Raw value of `column`. The outer `None` means the table has no such text column.
    fn cell(&self, column: &str) -> Option<Option<&str>>;

    /// Whether `column` is null or blank in this record, `None` for an unknown column.
    fn is_null(&self, column: &str) -> Option<bool> {
        if column == COL::DATE {
            // Dates are parsed at load time and can never be absent.
            return Some(false);
        }
        self.cell(column)
            .map(|value| value.map_or(true, |v| v.trim().is_empty()))
    }
}

/// One row of the deaths table.
#[derive(Debug, Clone, PartialEq)]
pub struct ObservationRecord {
    pub location: String,
    pub date: NaiveDate,
    pub kind: LocationKind,
    pub population: Option<String>,
    pub total_cases: Option<String>,
    pub new_cases: Option<String>,
    pub total_deaths: Option<String>,
    pub new_deaths: Option<String>,
}

/// One row of the vaccinations table.
#[derive(Debug, Clone, PartialEq)]
pub struct VaccinationRecord {
    pub location: String,
    pub date: NaiveDate,
    pub kind: LocationKind,
    pub new_vaccinations: Option<String>,
    pub total_vaccinations: Option<String>,
}

impl Classified for ObservationRecord {
    fn kind(&self) -> &LocationKind {
        &self.kind
    }
}

impl Classified for VaccinationRecord {
    fn kind(&self) -> &LocationKind {
        &self.kind
    }
}

impl Record for ObservationRecord {
    const TABLE: Table = Table::Deaths;

    fn location(&self) -> &str {
        &self.location
    }

    fn date(&self) -> NaiveDate {
        self.date
    }

    fn cell(&self, column: &str) -> Option<Option<&str>> {
        let value = match column {
            COL::LOCATION => Some(self.location.as_str()),
            COL::CONTINENT => self.kind.continent(),
            COL::POPULATION => self.population.as_deref(),
            COL::TOTAL_CASES => self.total_cases.as_deref(),
            COL::NEW_CASES => self.new_cases.as_deref(),
            COL::TOTAL_DEATHS => self.total_deaths.as_deref(),
            COL::NEW_DEATHS => self.new_deaths.as_deref(),
            _ => return None,
        };
        Some(value)
    }
}

impl Record for VaccinationRecord {
    const TABLE: Table = Table::Vaccinations;

    fn location(&self) -> &str {
        &self.location
    }

    fn date(&self) -> NaiveDate {
        self.date
    }

    fn cell(&self, column: &str) -> Option<Option<&str>> {
        let value = match column {
            COL::LOCATION => Some(self.location.as_str()),
            COL::CONTINENT => self.kind.continent(),
            COL::NEW_VACCINATIONS => self.new_vaccinations.as_deref(),
            COL::TOTAL_VACCINATIONS => self.total_vaccinations.as_deref(),
            _ => return None,
        };
        Some(value)
    }
}

/// Both source tables, loaded.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Datasets {
    pub deaths: Vec<ObservationRecord>,
    pub vaccinations: Vec<VaccinationRecord>,
}

impl Datasets {
    /// Loads both tables from the CSV paths in `config`.
    pub fn load(config: &Config) -> CovidLensResult<Self> {
        info!(
            "Loading deaths from {} and vaccinations from {}",
            config.deaths_path, config.vaccinations_path
        );
        let deaths = read_csv(&config.deaths_path)?;
        let vaccinations = read_csv(&config.vaccinations_path)?;
        Self::from_frames(deaths, vaccinations)
    }

    pub fn from_frames(deaths: DataFrame, vaccinations: DataFrame) -> CovidLensResult<Self> {
        let datasets = Self {
            deaths: observations_from_frame(deaths)?,
            vaccinations: vaccinations_from_frame(vaccinations)?,
        };
        debug!(
            "Loaded {} deaths rows and {} vaccinations rows",
            datasets.deaths.len(),
            datasets.vaccinations.len()
        );
        Ok(datasets)
    }
}

/// Reads a CSV file with every column typed as text.
pub fn read_csv<P: AsRef<Path>>(path: P) -> CovidLensResult<DataFrame> {
    let df = CsvReadOptions::default()
        .with_has_header(true)
        // No schema inference: every column is read as a string
        .with_infer_schema_length(Some(0))
        .try_into_reader_with_file_path(Some(path.as_ref().to_path_buf()))?
        .finish()?;
    Ok(df)
}

/// Checks the required columns of `table` exist, then projects them all to text.
fn project_required(df: DataFrame, table: Table) -> CovidLensResult<DataFrame> {
    let required = table.required_columns();
    if let Some(missing) = required.iter().find(|name| df.column(name).is_err()) {
        return Err(CovidLensError::Schema {
            table,
            column: (*missing).to_owned(),
        });
    }
    let projected = df
        .lazy()
        .select(
            required
                .iter()
                .map(|name| col(name).cast(DataType::String))
                .collect::<Vec<_>>(),
        )
        .collect()?;
    Ok(projected)
}

fn text_cells<'a>(df: &'a DataFrame, name: &str) -> CovidLensResult<Vec<Option<&'a str>>> {
    Ok(df.column(name)?.str()?.into_iter().collect())
}

fn owned(cell: Option<&str>) -> Option<String> {
    cell.map(str::to_owned)
}

pub fn parse_date(raw: &str) -> Option<NaiveDate> {
    let raw = raw.trim();
    DATE_FORMATS
        .iter()
        .find_map(|fmt| NaiveDate::parse_from_str(raw, fmt).ok())
        .or_else(|| {
            DATETIME_FORMATS
                .iter()
                .find_map(|fmt| NaiveDateTime::parse_from_str(raw, fmt).ok())
                .map(|dt| dt.date())
        })
}

/// The location half of the key. Null and blank locations are rejected.
fn location_at(table: Table, row: usize, raw: Option<&str>) -> CovidLensResult<String> {
    match raw {
        Some(location) if !location.trim().is_empty() => Ok(location.to_owned()),
        _ => Err(CovidLensError::MissingLocation { table, row }),
    }
}

fn date_at(table: Table, row: usize, raw: Option<&str>) -> CovidLensResult<NaiveDate> {
    raw.and_then(parse_date)
        .ok_or_else(|| CovidLensError::InvalidDate {
            table,
            row,
            value: owned(raw),
        })
}

pub fn observations_from_frame(df: DataFrame) -> CovidLensResult<Vec<ObservationRecord>> {
    let table = Table::Deaths;
    let df = project_required(df, table)?;
    izip!(
        text_cells(&df, COL::LOCATION)?,
        text_cells(&df, COL::DATE)?,
        text_cells(&df, COL::CONTINENT)?,
        text_cells(&df, COL::POPULATION)?,
        text_cells(&df, COL::TOTAL_CASES)?,
        text_cells(&df, COL::NEW_CASES)?,
        text_cells(&df, COL::TOTAL_DEATHS)?,
        text_cells(&df, COL::NEW_DEATHS)?,
    )
    .enumerate()
    .map(
        |(row, (location, date, continent, population, total_cases, new_cases, total_deaths, new_deaths))| {
            Ok(ObservationRecord {
                location: location_at(table, row, location)?,
                date: date_at(table, row, date)?,
                kind: LocationKind::from_continent(continent),
                population: owned(population),
                total_cases: owned(total_cases),
                new_cases: owned(new_cases),
                total_deaths: owned(total_deaths),
                new_deaths: owned(new_deaths),
            })
        },
    )
    .collect()
}

pub fn vaccinations_from_frame(df: DataFrame) -> CovidLensResult<Vec<VaccinationRecord>> {
    let table = Table::Vaccinations;
    let df = project_required(df, table)?;
    izip!(
        text_cells(&df, COL::LOCATION)?,
        text_cells(&df, COL::DATE)?,
        text_cells(&df, COL::CONTINENT)?,
        text_cells(&df, COL::NEW_VACCINATIONS)?,
        text_cells(&df, COL::TOTAL_VACCINATIONS)?,
    )
    .enumerate()
    .map(
        |(row, (location, date, continent, new_vaccinations, total_vaccinations))| {
            Ok(VaccinationRecord {
                location: location_at(table, row, location)?,
                date: date_at(table, row, date)?,
                kind: LocationKind::from_continent(continent),
                new_vaccinations: owned(new_vaccinations),
                total_vaccinations: owned(total_vaccinations),
            })
        },
    )
    .collect()
}
