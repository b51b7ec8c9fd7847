//! Derived metrics: ratios, per-capita normalization, global daily sums, rolling sums, moving
//! averages and latest snapshots.
//!
//! Functions taking a [`Scope`] run over the rows it selects, `Country` rows by default. The
//! others run over `Country` rows only. Per-location work is
//! fanned out with rayon; the per-location results are reassembled in location then date order so
//! that every output is deterministic.

use std::cmp::Ordering;
use std::collections::{BTreeMap, VecDeque};

use chrono::NaiveDate;
use itertools::Itertools;
use log::debug;
use rayon::prelude::*;

use crate::classify::Scope;
use crate::error::CovidLensResult;
use crate::loader::{ObservationRecord, Record};
use crate::numeric::{coerce, coerce_with, scaled_ratio, CoercionMode};
use crate::COL;

const PERCENT: f64 = 100.0;

/// `total_deaths / total_cases * 100`, `None` when cases are null or zero.
pub fn death_percentage(total_deaths: Option<f64>, total_cases: Option<f64>) -> Option<f64> {
    scaled_ratio(total_deaths, total_cases, PERCENT)
}

/// `total_cases / population * 100`, `None` when population is null or zero.
pub fn percent_population_infected(total_cases: Option<f64>, population: Option<f64>) -> Option<f64> {
    scaled_ratio(total_cases, population, PERCENT)
}

/// `value / population * scale`, e.g. a scale of 100 000 gives "per 100k".
pub fn per_capita(value: Option<f64>, population: Option<f64>, scale: f64) -> Option<f64> {
    scaled_ratio(value, population, scale)
}

/// Running total where missing values add nothing, so it never decreases or resets on a gap.
pub fn rolling_sum<I>(values: I) -> Vec<f64>
where
    I: IntoIterator<Item = Option<f64>>,
{
    values
        .into_iter()
        .scan(0.0, |acc, value| {
            *acc += value.unwrap_or(0.0);
            Some(*acc)
        })
        .collect()
}

/// Trailing average over the last `window` rows, skipping nulls.
#[derive(Debug, Clone)]
pub struct MovingAverage {
    window: usize,
    values: VecDeque<Option<f64>>,
    sum: f64,
    non_null: usize,
}

impl MovingAverage {
    pub fn new(window: usize) -> Self {
        let window = window.max(1);
        Self {
            window,
            values: VecDeque::with_capacity(window),
            sum: 0.0,
            non_null: 0,
        }
    }

    /// Pushes the next row and returns the average of the current window, or `None` if every
    /// value in it is null.
    pub fn push(&mut self, value: Option<f64>) -> Option<f64> {
        if self.values.len() == self.window {
            if let Some(Some(evicted)) = self.values.pop_front() {
                self.sum -= evicted;
                self.non_null -= 1;
            }
        }
        if let Some(v) = value {
            self.sum += v;
            self.non_null += 1;
        }
        self.values.push_back(value);
        match self.non_null {
            0 => {
                self.sum = 0.0;
                None
            }
            n => Some(self.sum / n as f64),
        }
    }
}

pub fn moving_average(values: &[Option<f64>], window: usize) -> Vec<Option<f64>> {
    let mut average = MovingAverage::new(window);
    values.iter().map(|v| average.push(*v)).collect()
}

/// Groups records by location in `scope`, each group sorted by date. Sorting is stable, so rows
/// sharing a date keep their insertion order.
pub fn by_location<R: Record>(records: &[R], scope: Scope) -> Vec<(&str, Vec<&R>)> {
    let mut groups: BTreeMap<&str, Vec<&R>> = BTreeMap::new();
    for record in records.iter().filter(|r| scope.includes(r.kind())) {
        groups.entry(record.location()).or_default().push(record);
    }
    groups
        .into_iter()
        .map(|(location, mut rows)| {
            rows.sort_by_key(|r| r.date());
            (location, rows)
        })
        .collect()
}

/// For each location, the record with the greatest date. When several records share that date
/// the earliest-inserted one wins.
pub fn latest_snapshot<R: Record>(records: &[R], scope: Scope) -> Vec<&R> {
    let mut latest: BTreeMap<&str, &R> = BTreeMap::new();
    for record in records.iter().filter(|r| scope.includes(r.kind())) {
        latest
            .entry(record.location())
            .and_modify(|current| {
                if record.date() > current.date() {
                    *current = record;
                }
            })
            .or_insert(record);
    }
    latest.into_values().collect()
}

fn raw_number(
    mode: CoercionMode,
    column: &str,
    raw: &Option<String>,
) -> CovidLensResult<Option<f64>> {
    coerce_with(mode, column, raw.as_deref())
}

#[derive(Debug, Clone, PartialEq)]
pub struct RatioRow {
    pub location: String,
    pub date: NaiveDate,
    pub population: Option<f64>,
    pub total_cases: Option<f64>,
    pub total_deaths: Option<f64>,
    pub death_percentage: Option<f64>,
    pub percent_population_infected: Option<f64>,
}

/// Death percentage and percent of population infected for every row in `scope`.
pub fn ratios(
    records: &[ObservationRecord],
    scope: Scope,
    mode: CoercionMode,
) -> CovidLensResult<Vec<RatioRow>> {
    by_location(records, scope)
        .into_iter()
        .flat_map(|(_, rows)| rows)
        .map(|r| {
            let population = raw_number(mode, COL::POPULATION, &r.population)?;
            let total_cases = raw_number(mode, COL::TOTAL_CASES, &r.total_cases)?;
            let total_deaths = raw_number(mode, COL::TOTAL_DEATHS, &r.total_deaths)?;
            Ok(RatioRow {
                location: r.location.clone(),
                date: r.date,
                population,
                total_cases,
                total_deaths,
                death_percentage: death_percentage(total_deaths, total_cases),
                percent_population_infected: percent_population_infected(total_cases, population),
            })
        })
        .collect()
}

#[derive(Debug, Clone, PartialEq)]
pub struct PerCapitaRow {
    pub location: String,
    pub date: NaiveDate,
    pub population: Option<f64>,
    pub total_cases: Option<f64>,
    pub new_cases: Option<f64>,
    pub total_deaths: Option<f64>,
    pub new_deaths: Option<f64>,
}

impl PerCapitaRow {
    pub fn from_record(
        record: &ObservationRecord,
        scale: f64,
        mode: CoercionMode,
    ) -> CovidLensResult<Self> {
        let population = raw_number(mode, COL::POPULATION, &record.population)?;
        let normalize = |column: &str, raw: &Option<String>| -> CovidLensResult<Option<f64>> {
            Ok(per_capita(raw_number(mode, column, raw)?, population, scale))
        };
        Ok(Self {
            location: record.location.clone(),
            date: record.date,
            population,
            total_cases: normalize(COL::TOTAL_CASES, &record.total_cases)?,
            new_cases: normalize(COL::NEW_CASES, &record.new_cases)?,
            total_deaths: normalize(COL::TOTAL_DEATHS, &record.total_deaths)?,
            new_deaths: normalize(COL::NEW_DEATHS, &record.new_deaths)?,
        })
    }
}

/// Total and new cases and deaths per `scale` people, for every row in `scope`.
pub fn per_capita_rows(
    records: &[ObservationRecord],
    scope: Scope,
    scale: f64,
    mode: CoercionMode,
) -> CovidLensResult<Vec<PerCapitaRow>> {
    by_location(records, scope)
        .into_iter()
        .flat_map(|(_, rows)| rows)
        .map(|r| PerCapitaRow::from_record(r, scale, mode))
        .collect()
}

#[derive(Debug, Clone, PartialEq)]
pub struct GlobalDailyRow {
    pub date: NaiveDate,
    pub new_cases: Option<f64>,
    pub new_deaths: Option<f64>,
    pub death_percentage: Option<f64>,
    pub reporting_rows: usize,
}

fn sum_present(values: impl Iterator<Item = Option<f64>>) -> Option<f64> {
    values.flatten().fold(None, |acc, v| Some(acc.unwrap_or(0.0) + v))
}

/// Per date sums of new cases and new deaths across the rows in `scope`. Nulls are excluded from the sums
/// rather than counted as zero; a date with no reported value at all sums to `None`.
pub fn global_daily(records: &[ObservationRecord], scope: Scope) -> Vec<GlobalDailyRow> {
    let mut by_date: BTreeMap<NaiveDate, Vec<&ObservationRecord>> = BTreeMap::new();
    for record in records.iter().filter(|r| scope.includes(&r.kind)) {
        by_date.entry(record.date).or_default().push(record);
    }
    by_date
        .into_iter()
        .map(|(date, rows)| {
            let new_cases = sum_present(rows.iter().map(|r| coerce(r.new_cases.as_deref())));
            let new_deaths = sum_present(rows.iter().map(|r| coerce(r.new_deaths.as_deref())));
            GlobalDailyRow {
                date,
                new_cases,
                new_deaths,
                death_percentage: death_percentage(new_deaths, new_cases),
                reporting_rows: rows.len(),
            }
        })
        .collect()
}

#[derive(Debug, Clone, PartialEq)]
pub struct MovingAverageRow {
    pub location: String,
    pub date: NaiveDate,
    pub new_cases: Option<f64>,
    pub new_deaths: Option<f64>,
    pub new_cases_avg: Option<f64>,
    pub new_deaths_avg: Option<f64>,
}

/// Trailing `window`-row averages of new cases and new deaths per location.
pub fn moving_averages(
    records: &[ObservationRecord],
    scope: Scope,
    window: usize,
) -> Vec<MovingAverageRow> {
    let groups = by_location(records, scope);
    debug!("moving averages over {} locations", groups.len());
    groups
        .par_iter()
        .map(|(_, rows)| {
            let mut cases = MovingAverage::new(window);
            let mut deaths = MovingAverage::new(window);
            rows.iter()
                .map(|r| {
                    let new_cases = coerce(r.new_cases.as_deref());
                    let new_deaths = coerce(r.new_deaths.as_deref());
                    MovingAverageRow {
                        location: r.location.clone(),
                        date: r.date,
                        new_cases,
                        new_deaths,
                        new_cases_avg: cases.push(new_cases),
                        new_deaths_avg: deaths.push(new_deaths),
                    }
                })
                .collect_vec()
        })
        .collect::<Vec<_>>()
        .into_iter()
        .flatten()
        .collect()
}

#[derive(Debug, Clone, PartialEq)]
pub struct InfectionRankingRow {
    pub location: String,
    pub population: Option<f64>,
    pub highest_infection_count: Option<f64>,
    pub percent_population_infected: Option<f64>,
}

fn max_present(values: impl Iterator<Item = Option<f64>>) -> Option<f64> {
    values.flatten().reduce(f64::max)
}

/// Orders `None` after every value, larger values first.
fn descending_nulls_last(a: Option<f64>, b: Option<f64>) -> Ordering {
    match (a, b) {
        (Some(a), Some(b)) => b.total_cmp(&a),
        (Some(_), None) => Ordering::Less,
        (None, Some(_)) => Ordering::Greater,
        (None, None) => Ordering::Equal,
    }
}

/// Locations in `scope` ranked by the highest share of their population ever reported infected.
pub fn infection_ranking(
    records: &[ObservationRecord],
    scope: Scope,
) -> Vec<InfectionRankingRow> {
    let mut rows = by_location(records, scope)
        .into_par_iter()
        .map(|(location, rows)| {
            let population = max_present(rows.iter().map(|r| coerce(r.population.as_deref())));
            InfectionRankingRow {
                location: location.to_owned(),
                population,
                highest_infection_count: max_present(
                    rows.iter().map(|r| coerce(r.total_cases.as_deref())),
                ),
                percent_population_infected: max_present(rows.iter().map(|r| {
                    percent_population_infected(
                        coerce(r.total_cases.as_deref()),
                        coerce(r.population.as_deref()),
                    )
                })),
            }
        })
        .collect::<Vec<_>>();
    rows.sort_by(|a, b| {
        descending_nulls_last(a.percent_population_infected, b.percent_population_infected)
            .then_with(|| a.location.cmp(&b.location))
    });
    rows
}

#[derive(Debug, Clone, PartialEq)]
pub struct ContinentDeathsRow {
    pub continent: String,
    pub total_death_count: f64,
}

/// Sum over each continent's countries of the highest cumulative death count they reported.
pub fn continent_deaths(records: &[ObservationRecord]) -> Vec<ContinentDeathsRow> {
    let mut totals: BTreeMap<&str, f64> = BTreeMap::new();
    for (_, rows) in by_location(records, Scope::Countries) {
        let Some(continent) = rows.first().and_then(|r| r.kind.continent()) else {
            continue;
        };
        let highest = max_present(rows.iter().map(|r| coerce(r.total_deaths.as_deref())));
        *totals.entry(continent).or_default() += highest.unwrap_or(0.0);
    }
    let mut rows = totals
        .into_iter()
        .map(|(continent, total_death_count)| ContinentDeathsRow {
            continent: continent.to_owned(),
            total_death_count,
        })
        .collect_vec();
    rows.sort_by(|a, b| {
        b.total_death_count
            .total_cmp(&a.total_death_count)
            .then_with(|| a.continent.cmp(&b.continent))
    });
    rows
}

#[cfg(test)]
mod tests {
    use polars::df;

    use super::*;
    use crate::classify::LocationKind;
    use crate::loader::observations_from_frame;
    use crate::loader::tests::deaths_df;

    fn assert_close(actual: Option<f64>, expected: f64) {
        let actual = actual.expect("expected a value");
        assert!(
            (actual - expected).abs() < 1e-2,
            "expected {expected}, got {actual}"
        );
    }

    fn record(location: &str, continent: Option<&str>, day: u32, new_cases: Option<&str>) -> ObservationRecord {
        ObservationRecord {
            location: location.into(),
            date: NaiveDate::from_ymd_opt(2021, 1, day).unwrap(),
            kind: LocationKind::from_continent(continent),
            population: Some("1000".into()),
            total_cases: None,
            new_cases: new_cases.map(Into::into),
            total_deaths: None,
            new_deaths: None,
        }
    }

    #[test]
    fn testland_ratios() {
        let records = observations_from_frame(deaths_df()).unwrap();
        let rows = ratios(&records, Scope::Countries, CoercionMode::Lenient).unwrap();
        // The aggregate "World" row is excluded
        assert_eq!(rows.len(), 2);
        assert_close(rows[0].death_percentage, 10.0);
        assert_close(rows[1].death_percentage, 13.33);
        assert_close(rows[0].percent_population_infected, 10.0);
        assert_close(rows[1].percent_population_infected, 15.0);
    }

    #[test]
    fn death_percentage_is_null_iff_cases_null_or_zero() {
        assert_eq!(death_percentage(Some(5.0), Some(0.0)), None);
        assert_eq!(death_percentage(Some(5.0), None), None);
        assert_close(death_percentage(Some(5.0), Some(50.0)), 10.0);
        assert_eq!(death_percentage(Some(0.0), Some(50.0)), Some(0.0));
    }

    #[test]
    fn strict_ratios_reject_malformed_cells() {
        let df = df!(
            COL::LOCATION => &["A"],
            COL::DATE => &["2021-01-01"],
            COL::CONTINENT => &["Asia"],
            COL::POPULATION => &["1000"],
            COL::TOTAL_CASES => &["1O0"],
            COL::NEW_CASES => &["1"],
            COL::TOTAL_DEATHS => &["1"],
            COL::NEW_DEATHS => &["1"]
        )
        .unwrap();
        let records = observations_from_frame(df).unwrap();
        assert!(ratios(&records, Scope::Countries, CoercionMode::Strict).is_err());
        let lenient = ratios(&records, Scope::Countries, CoercionMode::Lenient).unwrap();
        assert_eq!(lenient[0].death_percentage, None);
    }

    #[test]
    fn per_capita_normalizes_to_scale() {
        let records = observations_from_frame(deaths_df()).unwrap();
        let rows = per_capita_rows(&records, Scope::Countries, 100_000.0, CoercionMode::Lenient).unwrap();
        assert_close(rows[0].total_cases, 10_000.0);
        assert_close(rows[1].new_deaths, 1_000.0);
        let mut zero_population = records[0].clone();
        zero_population.population = Some("0".into());
        let row = PerCapitaRow::from_record(&zero_population, 100_000.0, CoercionMode::Lenient).unwrap();
        assert_eq!(row.total_cases, None);
    }

    #[test]
    fn rolling_doses_treat_gaps_as_zero() {
        let values = [None, Some("50"), Some("30")].map(coerce);
        assert_eq!(rolling_sum(values), vec![0.0, 50.0, 80.0]);
        let values = [Some("10"), Some("bad"), None, Some("5")].map(coerce);
        let rolled = rolling_sum(values);
        assert!(rolled.windows(2).all(|w| w[0] <= w[1]));
        assert_eq!(rolled.last(), Some(&15.0));
    }

    #[test]
    fn moving_average_warms_up_on_available_rows() {
        let values: Vec<Option<f64>> = (1..=9).map(|v| Some(v as f64)).collect();
        let averages = moving_average(&values, 7);
        assert_eq!(averages[0], Some(1.0));
        assert_eq!(averages[1], Some(1.5));
        assert_close(averages[6], 4.0);
        // Window slides: rows 3..=9
        assert_close(averages[8], 6.0);
    }

    #[test]
    fn moving_average_skips_nulls() {
        let averages = moving_average(&[None, None, Some(4.0), None, Some(8.0)], 3);
        assert_eq!(averages, vec![None, None, Some(4.0), Some(4.0), Some(6.0)]);
        let averages = moving_average(&[Some(2.0), None, None, None], 3);
        assert_eq!(averages, vec![Some(2.0), Some(2.0), Some(2.0), None]);
    }

    #[test]
    fn moving_averages_reset_per_location() {
        let records = vec![
            record("B", Some("Asia"), 1, Some("10")),
            record("A", Some("Asia"), 2, Some("4")),
            record("A", Some("Asia"), 1, Some("2")),
            record("B", Some("Asia"), 2, Some("20")),
        ];
        let rows = moving_averages(&records, Scope::Countries, 7);
        let summary = rows
            .iter()
            .map(|r| (r.location.as_str(), r.date.format("%d").to_string(), r.new_cases_avg))
            .collect_vec();
        assert_eq!(
            summary,
            vec![
                ("A", "01".to_string(), Some(2.0)),
                ("A", "02".to_string(), Some(3.0)),
                ("B", "01".to_string(), Some(10.0)),
                ("B", "02".to_string(), Some(15.0)),
            ]
        );
    }

    #[test]
    fn global_daily_excludes_nulls_and_aggregates() {
        let records = vec![
            record("A", Some("Asia"), 1, Some("10")),
            record("B", Some("Asia"), 1, None),
            record("World", None, 1, Some("1000")),
            record("A", Some("Asia"), 2, None),
        ];
        let rows = global_daily(&records, Scope::Countries);
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].new_cases, Some(10.0));
        assert_eq!(rows[0].reporting_rows, 2);
        assert_eq!(rows[1].new_cases, None);
        assert_eq!(rows[1].death_percentage, None);
    }

    #[test]
    fn scope_selects_aggregate_rows() {
        let records = vec![
            record("A", Some("Asia"), 1, Some("10")),
            record("World", None, 1, Some("1000")),
            record("Asia", None, 1, Some("600")),
        ];
        let aggregates = global_daily(&records, Scope::Aggregates);
        assert_eq!(aggregates[0].new_cases, Some(1600.0));
        assert_eq!(aggregates[0].reporting_rows, 2);
        let all = global_daily(&records, Scope::All);
        assert_eq!(all[0].new_cases, Some(1610.0));

        let rows = moving_averages(&records, Scope::Aggregates, 7);
        let locations = rows.iter().map(|r| r.location.as_str()).collect_vec();
        assert_eq!(locations, vec!["Asia", "World"]);
        let every_row = ratios(&records, Scope::All, CoercionMode::Lenient).unwrap();
        assert_eq!(every_row.len(), 3);
    }

    #[test]
    fn latest_snapshot_breaks_ties_by_insertion_order() {
        let mut first = record("A", Some("Asia"), 3, Some("1"));
        first.total_cases = Some("first".into());
        let mut second = record("A", Some("Asia"), 3, Some("2"));
        second.total_cases = Some("second".into());
        let records = vec![record("A", Some("Asia"), 1, None), first, second];
        let latest = latest_snapshot(&records, Scope::Countries);
        assert_eq!(latest.len(), 1);
        assert_eq!(latest[0].total_cases.as_deref(), Some("first"));
    }

    #[test]
    fn infection_ranking_orders_by_percent_infected() {
        let mut a = record("A", Some("Asia"), 1, None);
        a.total_cases = Some("50".into());
        let mut b = record("B", Some("Europe"), 1, None);
        b.total_cases = Some("300".into());
        let c = record("C", Some("Europe"), 1, None);
        let rows = infection_ranking(&[a, b, c], Scope::Countries);
        let order = rows.iter().map(|r| r.location.as_str()).collect_vec();
        assert_eq!(order, vec!["B", "A", "C"]);
        assert_close(rows[0].percent_population_infected, 30.0);
        assert_eq!(rows[2].highest_infection_count, None);
    }

    #[test]
    fn continent_deaths_sum_country_maxima() {
        let mut rows = Vec::new();
        for (location, continent, day, deaths) in [
            ("A", "Asia", 1, "5"),
            ("A", "Asia", 2, "7"),
            ("B", "Asia", 1, "3"),
            ("C", "Europe", 1, "20"),
        ] {
            let mut r = record(location, Some(continent), day, None);
            r.total_deaths = Some(deaths.into());
            rows.push(r);
        }
        let totals = continent_deaths(&rows);
        assert_eq!(
            totals,
            vec![
                ContinentDeathsRow {
                    continent: "Europe".into(),
                    total_death_count: 20.0
                },
                ContinentDeathsRow {
                    continent: "Asia".into(),
                    total_death_count: 10.0
                },
            ]
        );
    }
}
