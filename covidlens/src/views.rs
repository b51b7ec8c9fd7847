//! Named derived tables materialized as polars `DataFrame`s.
//!
//! Each view is a pure function of the two source tables. Views are computed on first request and
//! cached; the cache is only ever cleared as a whole, so every cached view always derives from the
//! same sources.

use std::collections::BTreeMap;
use std::sync::{Mutex, PoisonError};

use chrono::NaiveDate;
use log::{debug, info};
use polars::prelude::*;
use serde::{Deserialize, Serialize};
use strum_macros::{Display, EnumIter, EnumString};

use crate::config::Config;
use crate::error::CovidLensResult;
use crate::join::{enrich, join, EnrichedRecord};
use crate::loader::Datasets;
use crate::metrics::{
    continent_deaths, global_daily, infection_ranking, moving_averages, per_capita_rows, ratios,
    ContinentDeathsRow, GlobalDailyRow, InfectionRankingRow, MovingAverageRow, PerCapitaRow,
    RatioRow,
};
use crate::segment::{segment_countries, CountrySegment};
use crate::COL;

#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    PartialOrd,
    Ord,
    Hash,
    Serialize,
    Deserialize,
    Display,
    EnumString,
    EnumIter,
)]
#[strum(serialize_all = "snake_case", ascii_case_insensitive)]
#[serde(rename_all = "snake_case")]
pub enum ViewName {
    /// Joined deaths and vaccinations with rolling doses
    RollingVaccinations,
    /// Trailing averages of new cases and deaths
    MovingAverage,
    /// Named `per_100k` whatever the scale; its columns follow `per_capita_scale`
    #[strum(serialize = "per_100k")]
    #[serde(rename = "per_100k")]
    PerCapita,
    Segmentation,
    DeathPercentage,
    GlobalDaily,
    InfectionRanking,
    ContinentDeaths,
}

fn dates(dates: impl Iterator<Item = NaiveDate>) -> Vec<String> {
    dates.map(|d| d.format("%Y-%m-%d").to_string()).collect()
}

pub fn rolling_vaccinations_frame(rows: &[EnrichedRecord]) -> PolarsResult<DataFrame> {
    DataFrame::new(vec![
        Series::new(
            COL::LOCATION,
            rows.iter().map(|r| r.location.clone()).collect::<Vec<_>>(),
        ),
        Series::new(
            COL::CONTINENT,
            rows.iter().map(|r| r.continent.clone()).collect::<Vec<_>>(),
        ),
        Series::new(COL::DATE, dates(rows.iter().map(|r| r.date))),
        Series::new(
            COL::POPULATION,
            rows.iter().map(|r| r.population).collect::<Vec<_>>(),
        ),
        Series::new(
            COL::NEW_VACCINATIONS,
            rows.iter().map(|r| r.new_vaccinations).collect::<Vec<_>>(),
        ),
        Series::new(
            COL::TOTAL_VACCINATIONS,
            rows.iter().map(|r| r.total_vaccinations).collect::<Vec<_>>(),
        ),
        Series::new(
            COL::ROLLING_DOSES,
            rows.iter().map(|r| r.rolling_doses).collect::<Vec<_>>(),
        ),
        Series::new(
            COL::PERCENT_POPULATION_VACCINATED,
            rows.iter()
                .map(|r| r.percent_population_vaccinated)
                .collect::<Vec<_>>(),
        ),
    ])
}

/// Average columns are named after the effective `window`.
pub fn moving_average_frame(
    rows: &[MovingAverageRow],
    window: usize,
) -> PolarsResult<DataFrame> {
    let window = window.max(1);
    DataFrame::new(vec![
        Series::new(
            COL::LOCATION,
            rows.iter().map(|r| r.location.clone()).collect::<Vec<_>>(),
        ),
        Series::new(COL::DATE, dates(rows.iter().map(|r| r.date))),
        Series::new(COL::NEW_CASES, rows.iter().map(|r| r.new_cases).collect::<Vec<_>>()),
        Series::new(
            COL::NEW_DEATHS,
            rows.iter().map(|r| r.new_deaths).collect::<Vec<_>>(),
        ),
        Series::new(
            &COL::moving_average(COL::NEW_CASES, window),
            rows.iter().map(|r| r.new_cases_avg).collect::<Vec<_>>(),
        ),
        Series::new(
            &COL::moving_average(COL::NEW_DEATHS, window),
            rows.iter().map(|r| r.new_deaths_avg).collect::<Vec<_>>(),
        ),
    ])
}

pub fn per_capita_frame(rows: &[PerCapitaRow], scale: f64) -> PolarsResult<DataFrame> {
    DataFrame::new(vec![
        Series::new(
            COL::LOCATION,
            rows.iter().map(|r| r.location.clone()).collect::<Vec<_>>(),
        ),
        Series::new(COL::DATE, dates(rows.iter().map(|r| r.date))),
        Series::new(
            COL::POPULATION,
            rows.iter().map(|r| r.population).collect::<Vec<_>>(),
        ),
        Series::new(
            &COL::per_capita(COL::TOTAL_CASES, scale),
            rows.iter().map(|r| r.total_cases).collect::<Vec<_>>(),
        ),
        Series::new(
            &COL::per_capita(COL::NEW_CASES, scale),
            rows.iter().map(|r| r.new_cases).collect::<Vec<_>>(),
        ),
        Series::new(
            &COL::per_capita(COL::TOTAL_DEATHS, scale),
            rows.iter().map(|r| r.total_deaths).collect::<Vec<_>>(),
        ),
        Series::new(
            &COL::per_capita(COL::NEW_DEATHS, scale),
            rows.iter().map(|r| r.new_deaths).collect::<Vec<_>>(),
        ),
    ])
}

pub fn segmentation_frame(rows: &[CountrySegment], scale: f64) -> PolarsResult<DataFrame> {
    DataFrame::new(vec![
        Series::new(
            COL::LOCATION,
            rows.iter().map(|r| r.location.clone()).collect::<Vec<_>>(),
        ),
        Series::new(COL::DATE, dates(rows.iter().map(|r| r.date))),
        Series::new(
            &COL::per_capita(COL::TOTAL_CASES, scale),
            rows.iter().map(|r| r.cases_per_capita).collect::<Vec<_>>(),
        ),
        Series::new(
            &COL::per_capita(COL::TOTAL_DEATHS, scale),
            rows.iter().map(|r| r.deaths_per_capita).collect::<Vec<_>>(),
        ),
        Series::new(
            COL::CASES_QUARTILE,
            rows.iter()
                .map(|r| u32::from(r.cases_quartile))
                .collect::<Vec<_>>(),
        ),
        Series::new(
            COL::DEATHS_QUARTILE,
            rows.iter()
                .map(|r| u32::from(r.deaths_quartile))
                .collect::<Vec<_>>(),
        ),
        Series::new(
            COL::SEGMENT,
            rows.iter()
                .map(|r| r.segment.to_string())
                .collect::<Vec<_>>(),
        ),
    ])
}

pub fn death_percentage_frame(rows: &[RatioRow]) -> PolarsResult<DataFrame> {
    DataFrame::new(vec![
        Series::new(
            COL::LOCATION,
            rows.iter().map(|r| r.location.clone()).collect::<Vec<_>>(),
        ),
        Series::new(COL::DATE, dates(rows.iter().map(|r| r.date))),
        Series::new(
            COL::POPULATION,
            rows.iter().map(|r| r.population).collect::<Vec<_>>(),
        ),
        Series::new(
            COL::TOTAL_CASES,
            rows.iter().map(|r| r.total_cases).collect::<Vec<_>>(),
        ),
        Series::new(
            COL::TOTAL_DEATHS,
            rows.iter().map(|r| r.total_deaths).collect::<Vec<_>>(),
        ),
        Series::new(
            COL::DEATH_PERCENTAGE,
            rows.iter().map(|r| r.death_percentage).collect::<Vec<_>>(),
        ),
        Series::new(
            COL::PERCENT_POPULATION_INFECTED,
            rows.iter()
                .map(|r| r.percent_population_infected)
                .collect::<Vec<_>>(),
        ),
    ])
}

pub fn global_daily_frame(rows: &[GlobalDailyRow]) -> PolarsResult<DataFrame> {
    DataFrame::new(vec![
        Series::new(COL::DATE, dates(rows.iter().map(|r| r.date))),
        Series::new(
            COL::GLOBAL_NEW_CASES,
            rows.iter().map(|r| r.new_cases).collect::<Vec<_>>(),
        ),
        Series::new(
            COL::GLOBAL_NEW_DEATHS,
            rows.iter().map(|r| r.new_deaths).collect::<Vec<_>>(),
        ),
        Series::new(
            COL::DEATH_PERCENTAGE,
            rows.iter().map(|r| r.death_percentage).collect::<Vec<_>>(),
        ),
        Series::new(
            COL::REPORTING_ROWS,
            rows.iter()
                .map(|r| r.reporting_rows as u64)
                .collect::<Vec<_>>(),
        ),
    ])
}

pub fn infection_ranking_frame(rows: &[InfectionRankingRow]) -> PolarsResult<DataFrame> {
    DataFrame::new(vec![
        Series::new(
            COL::LOCATION,
            rows.iter().map(|r| r.location.clone()).collect::<Vec<_>>(),
        ),
        Series::new(
            COL::POPULATION,
            rows.iter().map(|r| r.population).collect::<Vec<_>>(),
        ),
        Series::new(
            COL::HIGHEST_INFECTION_COUNT,
            rows.iter()
                .map(|r| r.highest_infection_count)
                .collect::<Vec<_>>(),
        ),
        Series::new(
            COL::PERCENT_POPULATION_INFECTED,
            rows.iter()
                .map(|r| r.percent_population_infected)
                .collect::<Vec<_>>(),
        ),
    ])
}

pub fn continent_deaths_frame(rows: &[ContinentDeathsRow]) -> PolarsResult<DataFrame> {
    DataFrame::new(vec![
        Series::new(
            COL::CONTINENT,
            rows.iter().map(|r| r.continent.clone()).collect::<Vec<_>>(),
        ),
        Series::new(
            COL::TOTAL_DEATH_COUNT,
            rows.iter().map(|r| r.total_death_count).collect::<Vec<_>>(),
        ),
    ])
}

/// The loaded sources together with a cache of every view derived from them.
#[derive(Debug)]
pub struct Views {
    datasets: Datasets,
    config: Config,
    cache: Mutex<BTreeMap<ViewName, DataFrame>>,
}

impl Views {
    pub fn new(datasets: Datasets, config: Config) -> Self {
        Self {
            datasets,
            config,
            cache: Mutex::new(BTreeMap::new()),
        }
    }

    pub fn datasets(&self) -> &Datasets {
        &self.datasets
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Returns the view, computing and caching it on first use.
    pub fn get(&self, name: ViewName) -> CovidLensResult<DataFrame> {
        if let Some(df) = self.lock_cache().get(&name) {
            debug!("view {name} served from cache");
            return Ok(df.clone());
        }
        let df = self.compute(name)?;
        self.lock_cache().insert(name, df.clone());
        Ok(df)
    }

    /// Computes the view from the sources, bypassing the cache.
    pub fn compute(&self, name: ViewName) -> CovidLensResult<DataFrame> {
        info!("Materializing view {name}");
        let deaths = &self.datasets.deaths;
        let config = &self.config;
        let df = match name {
            ViewName::RollingVaccinations => {
                let joined = join(deaths, &self.datasets.vaccinations)?;
                rolling_vaccinations_frame(&enrich(&joined))?
            }
            ViewName::MovingAverage => moving_average_frame(
                &moving_averages(deaths, config.scope, config.moving_average_window),
                config.moving_average_window,
            )?,
            ViewName::PerCapita => per_capita_frame(
                &per_capita_rows(
                    deaths,
                    config.scope,
                    config.per_capita_scale,
                    config.coercion,
                )?,
                config.per_capita_scale,
            )?,
            ViewName::Segmentation => segmentation_frame(
                &segment_countries(deaths, config.per_capita_scale)?,
                config.per_capita_scale,
            )?,
            ViewName::DeathPercentage => {
                death_percentage_frame(&ratios(deaths, config.scope, config.coercion)?)?
            }
            ViewName::GlobalDaily => global_daily_frame(&global_daily(deaths, config.scope))?,
            ViewName::InfectionRanking => {
                infection_ranking_frame(&infection_ranking(deaths, config.scope))?
            }
            ViewName::ContinentDeaths => continent_deaths_frame(&continent_deaths(deaths))?,
        };
        debug!("view {name} has shape {:?}", df.shape());
        Ok(df)
    }

    /// Drops every cached view.
    pub fn invalidate(&self) {
        self.lock_cache().clear();
    }

    /// Swaps in new sources and drops every view derived from the old ones.
    pub fn replace_sources(&mut self, datasets: Datasets) {
        self.datasets = datasets;
        self.invalidate();
    }

    pub fn cached(&self) -> Vec<ViewName> {
        self.lock_cache().keys().copied().collect()
    }

    fn lock_cache(&self) -> std::sync::MutexGuard<'_, BTreeMap<ViewName, DataFrame>> {
        self.cache.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
