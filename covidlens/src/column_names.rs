//! This module stores the column names of the two source tables and of every materialized view.
//! Source names must stay in sync with the headers of the published dataset; view names are the
//! stable contract for anything exporting or charting the views.

pub const LOCATION: &str = "location";
pub const DATE: &str = "date";
pub const CONTINENT: &str = "continent";
pub const POPULATION: &str = "population";

pub const TOTAL_CASES: &str = "total_cases";
pub const NEW_CASES: &str = "new_cases";
pub const TOTAL_DEATHS: &str = "total_deaths";
pub const NEW_DEATHS: &str = "new_deaths";

pub const NEW_VACCINATIONS: &str = "new_vaccinations";
pub const TOTAL_VACCINATIONS: &str = "total_vaccinations";

pub const ROLLING_DOSES: &str = "rolling_doses";
pub const PERCENT_POPULATION_VACCINATED: &str = "percent_population_vaccinated";

pub const DEATH_PERCENTAGE: &str = "death_percentage";
pub const PERCENT_POPULATION_INFECTED: &str = "percent_population_infected";


pub const GLOBAL_NEW_CASES: &str = "global_new_cases";
pub const GLOBAL_NEW_DEATHS: &str = "global_new_deaths";
pub const REPORTING_ROWS: &str = "reporting_rows";

pub const HIGHEST_INFECTION_COUNT: &str = "highest_infection_count";
pub const TOTAL_DEATH_COUNT: &str = "total_death_count";

pub const CASES_QUARTILE: &str = "cases_quartile";
pub const DEATHS_QUARTILE: &str = "deaths_quartile";
pub const SEGMENT: &str = "segment";

/// Label of a per-capita scale: 100 000 gives `per_100k`, 1 000 000 gives `per_1m`.
pub fn per_capita_suffix(scale: f64) -> String {
    if scale > 0.0 && scale.fract() == 0.0 && scale < u64::MAX as f64 {
        let scale = scale as u64;
        match scale {
            s if s % 1_000_000 == 0 => format!("per_{}m", s / 1_000_000),
            s if s % 1_000 == 0 => format!("per_{}k", s / 1_000),
            s => format!("per_{s}"),
        }
    } else {
        format!("per_{scale}").replace('.', "_")
    }
}

/// `column` normalized per `scale` people, e.g. `total_cases_per_100k`.
pub fn per_capita(column: &str, scale: f64) -> String {
    format!("{column}_{}", per_capita_suffix(scale))
}

/// Trailing average of `column` over `window` rows, e.g. `new_cases_7day_avg`.
pub fn moving_average(column: &str, window: usize) -> String {
    format!("{column}_{window}day_avg")
}

/// Columns the deaths table must provide.
pub const DEATHS_REQUIRED: [&str; 8] = [
    LOCATION,
    DATE,
    CONTINENT,
    POPULATION,
    TOTAL_CASES,
    NEW_CASES,
    TOTAL_DEATHS,
    NEW_DEATHS,
];

/// Columns the vaccinations table must provide.
pub const VACCINATIONS_REQUIRED: [&str; 5] = [
    LOCATION,
    DATE,
    CONTINENT,
    NEW_VACCINATIONS,
    TOTAL_VACCINATIONS,
];
