//! Conversion of raw table cells into numbers.
//!
//! The source tables are frequently imported with numeric columns typed as text, so every
//! numeric cell is kept as raw text until a metric needs it.

use serde::{Deserialize, Serialize};
use strum_macros::{Display, EnumString};

use crate::error::{CovidLensError, CovidLensResult};

/// How unparseable cells are treated.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, EnumString, Display,
)]
#[strum(ascii_case_insensitive)]
#[serde(rename_all = "lowercase")]
pub enum CoercionMode {
    /// Unparseable cells become `None`.
    #[default]
    Lenient,
    /// Unparseable cells are an error. Never used for aggregates.
    Strict,
}

/// Converts a raw cell to `f64`. Blank, unparseable and non-finite values give `None`.
pub fn coerce(raw: Option<&str>) -> Option<f64> {
    let trimmed = raw?.trim();
    if trimmed.is_empty() {
        return None;
    }
    trimmed.parse::<f64>().ok().filter(|v| v.is_finite())
}

/// Like [`coerce`] but rejects cells that are present and not numeric.
pub fn coerce_strict(column: &str, raw: Option<&str>) -> CovidLensResult<Option<f64>> {
    match raw.map(str::trim) {
        None | Some("") => Ok(None),
        Some(value) => coerce(Some(value)).map(Some).ok_or_else(|| CovidLensError::Numeric {
            column: column.to_owned(),
            value: value.to_owned(),
        }),
    }
}

/// Dispatches to [`coerce`] or [`coerce_strict`] according to `mode`.
pub fn coerce_with(mode: CoercionMode, column: &str, raw: Option<&str>) -> CovidLensResult<Option<f64>> {
    match mode {
        CoercionMode::Lenient => Ok(coerce(raw)),
        CoercionMode::Strict => coerce_strict(column, raw),
    }
}

/// `numerator / denominator * scale`, or `None` when either side is missing or the
/// denominator is zero.
pub fn scaled_ratio(numerator: Option<f64>, denominator: Option<f64>, scale: f64) -> Option<f64> {
    match (numerator, denominator) {
        (Some(n), Some(d)) if d != 0.0 => Some(n / d * scale),
        _ => None,
    }
}
