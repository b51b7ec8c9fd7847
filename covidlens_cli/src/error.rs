use covidlens::error::CovidLensError;
use polars::error::PolarsError;

#[derive(thiserror::Error, Debug)]
pub enum CovidLensCliError {
    #[error("{0}")]
    Anyhow(#[from] anyhow::Error),
    #[error("serde JSON error: {0}")]
    SerdeJSONError(#[from] serde_json::Error),
    #[error("polars error: {0}")]
    PolarsError(#[from] PolarsError),
    #[error("{0}")]
    CovidLensError(#[from] CovidLensError),
    #[error("std IO error: {0}")]
    IOError(#[from] std::io::Error),
    #[error("Invalid TOML in config file: {0}")]
    TomlError(#[from] toml::de::Error),
}

pub type CovidLensCliResult<T> = Result<T, CovidLensCliError>;
