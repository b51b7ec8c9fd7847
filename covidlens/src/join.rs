//! Inner join of the deaths and vaccinations tables on (location, date), and the rolling dose
//! enrichment computed over the joined rows.
//!
//! Vaccination reporting starts months after case reporting, so early deaths rows have no
//! partner and are dropped by the inner join.

use std::collections::HashMap;

use chrono::NaiveDate;
use log::{debug, info};
use rayon::prelude::*;

use crate::classify::Scope;
use crate::error::{CovidLensError, CovidLensResult};
use crate::loader::{ObservationRecord, Record, Table, VaccinationRecord};
use crate::metrics::{by_location, rolling_sum};
use crate::numeric::{coerce, scaled_ratio};
use crate::quality::{country_duplicate_keys, to_duplicate_keys};

/// A matched pair of rows sharing (location, date).
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct JoinedRecord<'a> {
    pub deaths: &'a ObservationRecord,
    pub vaccinations: &'a VaccinationRecord,
}

impl JoinedRecord<'_> {
    pub fn location(&self) -> &str {
        &self.deaths.location
    }

    pub fn date(&self) -> NaiveDate {
        self.deaths.date
    }
}

/// Fails with a join-safety error listing every duplicated key among `Country` rows.
pub fn ensure_unique_keys(
    deaths: &[ObservationRecord],
    vaccinations: &[VaccinationRecord],
) -> CovidLensResult<()> {
    let mut keys = to_duplicate_keys(Table::Deaths, &country_duplicate_keys(deaths));
    keys.extend(to_duplicate_keys(
        Table::Vaccinations,
        &country_duplicate_keys(vaccinations),
    ));
    if keys.is_empty() {
        Ok(())
    } else {
        Err(CovidLensError::JoinSafety { keys })
    }
}

/// Inner join of `Country` rows, ordered by location then date.
pub fn join<'a>(
    deaths: &'a [ObservationRecord],
    vaccinations: &'a [VaccinationRecord],
) -> CovidLensResult<Vec<JoinedRecord<'a>>> {
    ensure_unique_keys(deaths, vaccinations)?;
    let lookup: HashMap<(&str, NaiveDate), &VaccinationRecord> = vaccinations
        .iter()
        .filter(|r| r.kind.is_country())
        .map(|r| ((r.location(), r.date), r))
        .collect();
    let joined: Vec<JoinedRecord> = by_location(deaths, Scope::Countries)
        .into_iter()
        .flat_map(|(_, rows)| rows)
        .filter_map(|d| {
            lookup
                .get(&(d.location(), d.date))
                .copied()
                .map(|v| JoinedRecord {
                    deaths: d,
                    vaccinations: v,
                })
        })
        .collect();
    info!(
        "Joined {} rows ({} deaths rows, {} vaccinations rows)",
        joined.len(),
        deaths.len(),
        vaccinations.len()
    );
    Ok(joined)
}

/// A joined row with the running total of administered doses for its location.
#[derive(Debug, Clone, PartialEq)]
pub struct EnrichedRecord {
    pub location: String,
    pub continent: Option<String>,
    pub date: NaiveDate,
    pub population: Option<f64>,
    pub new_vaccinations: Option<f64>,
    pub total_vaccinations: Option<f64>,
    pub rolling_doses: f64,
    /// Dose based, so it can exceed 100.
    pub percent_population_vaccinated: Option<f64>,
}

/// Adds rolling doses to joined rows. `joined` must be ordered by location then date, as
/// returned by [`join`].
pub fn enrich(joined: &[JoinedRecord]) -> Vec<EnrichedRecord> {
    let locations: Vec<&[JoinedRecord]> = joined
        .chunk_by(|a, b| a.location() == b.location())
        .collect();
    debug!("rolling doses over {} locations", locations.len());
    locations
        .par_iter()
        .map(|rows| {
            let doses = rolling_sum(
                rows.iter()
                    .map(|r| coerce(r.vaccinations.new_vaccinations.as_deref())),
            );
            rows.iter()
                .zip(doses)
                .map(|(r, rolling_doses)| {
                    let population = coerce(r.deaths.population.as_deref());
                    EnrichedRecord {
                        location: r.location().to_owned(),
                        continent: r.deaths.kind.continent().map(str::to_owned),
                        date: r.date(),
                        population,
                        new_vaccinations: coerce(r.vaccinations.new_vaccinations.as_deref()),
                        total_vaccinations: coerce(r.vaccinations.total_vaccinations.as_deref()),
                        rolling_doses,
                        percent_population_vaccinated: scaled_ratio(
                            Some(rolling_doses),
                            population,
                            100.0,
                        ),
                    }
                })
                .collect::<Vec<_>>()
        })
        .collect::<Vec<_>>()
        .into_iter()
        .flatten()
        .collect()
}

#[cfg(test)]
mod tests {
    use itertools::Itertools;
    use polars::df;

    use super::*;
    use crate::classify::LocationKind;
    use crate::loader::tests::{deaths_df, vaccinations_df};
    use crate::loader::{observations_from_frame, vaccinations_from_frame};
    use crate::COL;

    fn vaccination(location: &str, day: u32, doses: Option<&str>) -> VaccinationRecord {
        VaccinationRecord {
            location: location.into(),
            date: NaiveDate::from_ymd_opt(2021, 1, day).unwrap(),
            kind: LocationKind::from_continent(Some("Europe")),
            new_vaccinations: doses.map(Into::into),
            total_vaccinations: None,
        }
    }

    fn observation(location: &str, day: u32) -> ObservationRecord {
        ObservationRecord {
            location: location.into(),
            date: NaiveDate::from_ymd_opt(2021, 1, day).unwrap(),
            kind: LocationKind::from_continent(Some("Europe")),
            population: Some("200".into()),
            total_cases: None,
            new_cases: None,
            total_deaths: None,
            new_deaths: None,
        }
    }

    #[test]
    fn inner_join_drops_unmatched_rows() {
        let deaths = observations_from_frame(deaths_df()).unwrap();
        let vaccinations = vaccinations_from_frame(df!(
            COL::LOCATION => &["Testland", "Elsewhere", "World"],
            COL::DATE => &["2021-01-02", "2021-01-02", "2021-01-01"],
            COL::CONTINENT => &[Some("Europe"), Some("Asia"), None],
            COL::NEW_VACCINATIONS => &["5", "6", "7"],
            COL::TOTAL_VACCINATIONS => &["5", "6", "7"]
        )
        .unwrap())
        .unwrap();
        let joined = join(&deaths, &vaccinations).unwrap();
        assert_eq!(joined.len(), 1);
        assert_eq!(joined[0].location(), "Testland");
        let country_deaths = deaths.iter().filter(|r| r.kind.is_country()).count();
        let country_vaccinations = vaccinations.iter().filter(|r| r.kind.is_country()).count();
        assert!(joined.len() <= country_deaths.min(country_vaccinations));
    }

    #[test]
    fn join_refuses_duplicated_keys() {
        let deaths = vec![observation("X", 1), observation("X", 1)];
        let vaccinations = vec![vaccination("X", 1, Some("1"))];
        match join(&deaths, &vaccinations) {
            Err(CovidLensError::JoinSafety { keys }) => {
                assert_eq!(keys.len(), 1);
                assert_eq!(keys[0].table, Table::Deaths);
                assert_eq!(keys[0].count, 2);
            }
            other => panic!("expected a join safety error, got {other:?}"),
        }
    }

    #[test]
    fn rolling_doses_accumulate_per_location() {
        let deaths = vec![
            observation("B", 1),
            observation("A", 3),
            observation("A", 1),
            observation("A", 2),
        ];
        let vaccinations = vec![
            vaccination("A", 1, None),
            vaccination("A", 2, Some("50")),
            vaccination("A", 3, Some("30")),
            vaccination("B", 1, Some("7")),
        ];
        let joined = join(&deaths, &vaccinations).unwrap();
        let enriched = enrich(&joined);
        let rolling = enriched
            .iter()
            .map(|r| (r.location.as_str(), r.rolling_doses))
            .collect_vec();
        assert_eq!(rolling, vec![("A", 0.0), ("A", 50.0), ("A", 80.0), ("B", 7.0)]);
        assert_eq!(enriched[2].percent_population_vaccinated, Some(40.0));
    }

    #[test]
    fn testland_join_from_frames() {
        let deaths = observations_from_frame(deaths_df()).unwrap();
        let vaccinations = vaccinations_from_frame(vaccinations_df()).unwrap();
        let enriched = enrich(&join(&deaths, &vaccinations).unwrap());
        assert_eq!(enriched.len(), 2);
        assert_eq!(enriched[1].rolling_doses, 50.0);
        assert_eq!(enriched[0].continent.as_deref(), Some("Europe"));
    }
}
