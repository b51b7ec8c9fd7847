//! Country vs aggregate classification.
//!
//! The published tables mix single countries with multi-country rollups (continents, income
//! groups, "World"). Rollups are the rows whose continent is absent.

use serde::{Deserialize, Serialize};
use strum_macros::{Display, EnumString};

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum LocationKind {
    Country { continent: String },
    Aggregate,
}

impl LocationKind {
    /// Null, empty and whitespace-only continents are all treated as absent.
    pub fn from_continent(continent: Option<&str>) -> Self {
        match continent.map(str::trim) {
            Some(c) if !c.is_empty() => LocationKind::Country {
                continent: c.to_owned(),
            },
            _ => LocationKind::Aggregate,
        }
    }

    pub fn is_country(&self) -> bool {
        matches!(self, LocationKind::Country { .. })
    }

    pub fn continent(&self) -> Option<&str> {
        match self {
            LocationKind::Country { continent } => Some(continent),
            LocationKind::Aggregate => None,
        }
    }
}

/// Which rows an analysis runs over.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, EnumString, Display)]
#[strum(serialize_all = "lowercase", ascii_case_insensitive)]
#[serde(rename_all = "lowercase")]
pub enum Scope {
    #[default]
    Countries,
    Aggregates,
    All,
}

impl Scope {
    pub fn includes(&self, kind: &LocationKind) -> bool {
        match self {
            Scope::Countries => kind.is_country(),
            Scope::Aggregates => !kind.is_country(),
            Scope::All => true,
        }
    }
}

/// Implemented by every record that carries a classification.
pub trait Classified {
    fn kind(&self) -> &LocationKind;
}

pub fn classify<R: Classified>(record: &R) -> &LocationKind {
    record.kind()
}
