//! Quartile segmentation of countries by cases and deaths per capita.

use chrono::NaiveDate;
use log::warn;
use serde::Serialize;
use strum_macros::{Display, EnumIter, EnumString};

use crate::classify::Scope;
use crate::error::CovidLensResult;
use crate::loader::ObservationRecord;
use crate::metrics::{latest_snapshot, PerCapitaRow};
use crate::numeric::CoercionMode;

const QUARTILES: usize = 4;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Display, EnumString, EnumIter)]
pub enum Segment {
    #[strum(serialize = "High Cases / High Deaths")]
    HighCasesHighDeaths,
    #[strum(serialize = "High Cases / Low Deaths")]
    HighCasesLowDeaths,
    #[strum(serialize = "Low Cases / High Deaths")]
    LowCasesHighDeaths,
    #[strum(serialize = "Low Cases / Low Deaths")]
    LowCasesLowDeaths,
    #[strum(serialize = "Mid Cluster")]
    MidCluster,
}

impl Segment {
    /// Maps a (cases, deaths) quartile pair to its category. Quartile 1 is the highest.
    pub fn from_quartiles(cases: u8, deaths: u8) -> Self {
        match (cases, deaths) {
            (1..=2, 1..=2) => Segment::HighCasesHighDeaths,
            (1..=2, 3..=4) => Segment::HighCasesLowDeaths,
            (3..=4, 1..=2) => Segment::LowCasesHighDeaths,
            (3..=4, 3..=4) => Segment::LowCasesLowDeaths,
            _ => Segment::MidCluster,
        }
    }
}

/// 1-based bucket of the item at `position` when `n` ranked items are split into `buckets`
/// groups of near-equal size, larger groups first.
pub fn ntile(position: usize, n: usize, buckets: usize) -> usize {
    let base = n / buckets;
    let remainder = n % buckets;
    let large_span = remainder * (base + 1);
    if position < large_span {
        position / (base + 1) + 1
    } else {
        remainder + (position - large_span) / base + 1
    }
}

/// Quartile of every `(name, value)` item, in input order. Items are ranked by value descending,
/// ties by name ascending.
pub fn quartiles(items: &[(&str, f64)]) -> Vec<u8> {
    let mut order: Vec<usize> = (0..items.len()).collect();
    order.sort_by(|&a, &b| {
        items[b]
            .1
            .total_cmp(&items[a].1)
            .then_with(|| items[a].0.cmp(items[b].0))
    });
    let mut result = vec![0u8; items.len()];
    for (position, index) in order.into_iter().enumerate() {
        // At most four buckets, always fits
        result[index] = ntile(position, items.len(), QUARTILES) as u8;
    }
    result
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CountrySegment {
    pub location: String,
    pub date: NaiveDate,
    pub cases_per_capita: f64,
    pub deaths_per_capita: f64,
    pub cases_quartile: u8,
    pub deaths_quartile: u8,
    pub segment: Segment,
}

/// Segments every country by its latest cases and deaths per `scale` people. Countries missing
/// either metric on their latest row are left out.
pub fn segment_countries(
    records: &[ObservationRecord],
    scale: f64,
) -> CovidLensResult<Vec<CountrySegment>> {
    let mut snapshots = Vec::new();
    let mut skipped = Vec::new();
    for record in latest_snapshot(records, Scope::Countries) {
        let row = PerCapitaRow::from_record(record, scale, CoercionMode::Lenient)?;
        match (row.total_cases, row.total_deaths) {
            (Some(cases), Some(deaths)) => snapshots.push((row, cases, deaths)),
            _ => skipped.push(row.location),
        }
    }
    if !skipped.is_empty() {
        warn!(
            "{} countries left out of segmentation, their latest row lacks cases or deaths per capita: {}",
            skipped.len(),
            skipped.join(", ")
        );
    }
    let cases: Vec<(&str, f64)> = snapshots
        .iter()
        .map(|(row, c, _)| (row.location.as_str(), *c))
        .collect();
    let deaths: Vec<(&str, f64)> = snapshots
        .iter()
        .map(|(row, _, d)| (row.location.as_str(), *d))
        .collect();
    let cases_quartiles = quartiles(&cases);
    let deaths_quartiles = quartiles(&deaths);
    Ok(snapshots
        .iter()
        .zip(cases_quartiles.into_iter().zip(deaths_quartiles))
        .map(|((row, c, d), (cq, dq))| CountrySegment {
            location: row.location.clone(),
            date: row.date,
            cases_per_capita: *c,
            deaths_per_capita: *d,
            cases_quartile: cq,
            deaths_quartile: dq,
            segment: Segment::from_quartiles(cq, dq),
        })
        .collect())
}

#[cfg(test)]
mod tests {
    use std::str::FromStr;

    use itertools::Itertools;
    use strum::IntoEnumIterator;

    use super::*;
    use crate::classify::LocationKind;

    fn latest(location: &str, cases: &str, deaths: &str) -> ObservationRecord {
        ObservationRecord {
            location: location.into(),
            date: NaiveDate::from_ymd_opt(2022, 6, 1).unwrap(),
            kind: LocationKind::from_continent(Some("Africa")),
            population: Some("100000".into()),
            total_cases: Some(cases.into()),
            new_cases: None,
            total_deaths: Some(deaths.into()),
            new_deaths: None,
        }
    }

    #[test]
    fn quartile_buckets_partition_every_size() {
        for n in 0..=13 {
            let buckets = (0..n).map(|p| ntile(p, n, 4)).collect_vec();
            let sizes = (1..=4)
                .map(|q| buckets.iter().filter(|&&b| b == q).count())
                .collect_vec();
            assert_eq!(sizes.iter().sum::<usize>(), n);
            for size in &sizes {
                assert!(*size == n / 4 || *size == n.div_ceil(4), "n={n}: {sizes:?}");
            }
            assert!(sizes.windows(2).all(|w| w[0] >= w[1]), "n={n}: {sizes:?}");
            assert!(buckets.windows(2).all(|w| w[0] <= w[1]));
        }
    }

    #[test]
    fn quartiles_rank_descending() {
        let items = [("a", 1.0), ("b", 8.0), ("c", 4.0), ("d", 2.0), ("e", 9.0)];
        // Ranked: e, b, c, d, a -> sizes 2, 1, 1, 1
        assert_eq!(quartiles(&items), vec![4, 1, 2, 3, 1]);
    }

    #[test]
    fn quartile_ties_break_by_name() {
        let items = [("b", 5.0), ("a", 5.0), ("c", 5.0), ("d", 5.0)];
        assert_eq!(quartiles(&items), vec![2, 1, 3, 4]);
    }

    #[test]
    fn category_mapping() {
        assert_eq!(Segment::from_quartiles(1, 2), Segment::HighCasesHighDeaths);
        assert_eq!(Segment::from_quartiles(2, 4), Segment::HighCasesLowDeaths);
        assert_eq!(Segment::from_quartiles(3, 1), Segment::LowCasesHighDeaths);
        assert_eq!(Segment::from_quartiles(4, 3), Segment::LowCasesLowDeaths);
        assert_eq!(Segment::from_quartiles(0, 5), Segment::MidCluster);
    }

    #[test]
    fn segment_names_round_trip() {
        for segment in Segment::iter() {
            assert_eq!(Segment::from_str(&segment.to_string()).unwrap(), segment);
        }
        assert_eq!(
            Segment::HighCasesLowDeaths.to_string(),
            "High Cases / Low Deaths"
        );
    }

    #[test]
    fn segments_latest_snapshot_of_countries() {
        let mut stale = latest("A", "1", "1");
        stale.date = NaiveDate::from_ymd_opt(2020, 1, 1).unwrap();
        let records = vec![
            stale,
            latest("A", "900", "90"),
            latest("B", "800", "1"),
            latest("C", "10", "80"),
            latest("D", "5", "2"),
            latest("E", "", "3"),
        ];
        let segments = segment_countries(&records, 100_000.0).unwrap();
        let summary = segments
            .iter()
            .map(|s| (s.location.as_str(), s.cases_quartile, s.deaths_quartile, s.segment))
            .collect_vec();
        assert_eq!(
            summary,
            vec![
                ("A", 1, 1, Segment::HighCasesHighDeaths),
                ("B", 2, 4, Segment::HighCasesLowDeaths),
                ("C", 3, 2, Segment::LowCasesHighDeaths),
                ("D", 4, 3, Segment::LowCasesLowDeaths),
            ]
        );
        assert!((segments[0].cases_per_capita - 900.0).abs() < 1e-9);
        assert!((segments[1].deaths_per_capita - 1.0).abs() < 1e-9);
    }
}
