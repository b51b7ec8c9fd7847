use std::str::FromStr;

use log::debug;
use polars::frame::DataFrame;

use crate::config::Config;
use crate::error::{CovidLensError, CovidLensResult};
use crate::loader::Datasets;
use crate::quality::QualityReport;
use crate::views::{ViewName, Views};

// Re-exports
pub use column_names as COL;

// Modules
pub mod classify;
pub mod column_names;
pub mod config;
pub mod error;
pub mod formatters;
pub mod join;
pub mod loader;
pub mod metrics;
pub mod numeric;
pub mod quality;
pub mod segment;
pub mod views;

/// Type for the covidlens pipeline: the two loaded tables and every view derived from them
pub struct CovidLens {
    views: Views,
}

impl CovidLens {
    /// Load the tables from the default configuration
    pub fn new() -> CovidLensResult<Self> {
        Self::new_with_config(Config::default())
    }

    /// Load the tables from the paths in a custom configuration
    pub fn new_with_config(config: Config) -> CovidLensResult<Self> {
        debug!("config: {config:?}");
        let datasets = Datasets::load(&config)?;
        Ok(Self::from_datasets(datasets, config))
    }

    /// Build the pipeline over tables that are already loaded
    pub fn from_datasets(datasets: Datasets, config: Config) -> Self {
        Self {
            views: Views::new(datasets, config),
        }
    }

    pub fn config(&self) -> &Config {
        self.views.config()
    }

    pub fn datasets(&self) -> &Datasets {
        self.views.datasets()
    }

    /// Runs every quality check over both tables
    pub fn quality_report(&self) -> CovidLensResult<QualityReport> {
        QualityReport::build(self.datasets())
    }

    /// Materializes the named view
    pub fn view(&self, name: ViewName) -> CovidLensResult<DataFrame> {
        self.views.get(name)
    }

    /// Materializes a view named as in `ViewName`'s string form, e.g. `per_100k`
    pub fn view_by_name(&self, name: &str) -> CovidLensResult<DataFrame> {
        let name =
            ViewName::from_str(name).map_err(|_| CovidLensError::UnknownView(name.to_owned()))?;
        self.view(name)
    }

    pub fn views(&self) -> &Views {
        &self.views
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::loader::tests::{deaths_df, vaccinations_df};

    #[test]
    fn pipeline_over_frames() {
        let datasets = Datasets::from_frames(deaths_df(), vaccinations_df()).unwrap();
        let lens = CovidLens::from_datasets(datasets, Config::default());
        let report = lens.quality_report().unwrap();
        assert!(report.is_join_safe());
        assert_eq!(report.deaths.row_counts.total, 3);
        let df = lens.view(ViewName::DeathPercentage).unwrap();
        assert_eq!(df.height(), 2);
    }

    #[test]
    fn views_by_name() {
        let datasets = Datasets::from_frames(deaths_df(), vaccinations_df()).unwrap();
        let lens = CovidLens::from_datasets(datasets, Config::default());
        assert_eq!(lens.view_by_name("Global_Daily").unwrap().height(), 2);
        assert!(matches!(
            lens.view_by_name("dashboard"),
            Err(CovidLensError::UnknownView(name)) if name == "dashboard"
        ));
    }

    #[test]
    fn missing_input_file_is_an_error() {
        let config = Config {
            deaths_path: "/nonexistent/deaths.csv".into(),
            ..Config::default()
        };
        assert!(CovidLens::new_with_config(config).is_err());
    }
}
