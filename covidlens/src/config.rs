use serde::{Deserialize, Serialize};

use crate::classify::Scope;
use crate::numeric::CoercionMode;

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(default)]
pub struct Config {
    pub deaths_path: String,
    pub vaccinations_path: String,
    /// Rows in the trailing moving-average window, current row included.
    pub moving_average_window: usize,
    pub per_capita_scale: f64,
    pub coercion: CoercionMode,
    /// Rows the per-row and aggregate views run over. The join and segmentation always use
    /// countries.
    pub scope: Scope,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            deaths_path: "data/CovidDeaths.csv".into(),
            vaccinations_path: "data/CovidVaccinations.csv".into(),
            moving_average_window: 7,
            per_capita_scale: 100_000.0,
            coercion: CoercionMode::Lenient,
            scope: Scope::Countries,
        }
    }
}
