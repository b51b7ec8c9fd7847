use comfy_table::{presets::NOTHING, *};
use covidlens::quality::{QualityReport, TableReport};
use covidlens::views::ViewName;
use covidlens::COL;
use itertools::Itertools;
use polars::prelude::{AnyValue, DataFrame};
use strum::IntoEnumIterator;

fn styled_table() -> Table {
    let mut table = Table::new();
    table
        .load_preset(NOTHING)
        .set_content_arrangement(ContentArrangement::Dynamic)
        .set_style(comfy_table::TableComponent::BottomBorder, '─')
        .set_style(comfy_table::TableComponent::MiddleHeaderIntersections, '─')
        .set_style(comfy_table::TableComponent::HeaderLines, '─')
        .set_style(comfy_table::TableComponent::BottomBorderIntersections, '─')
        .set_style(comfy_table::TableComponent::TopBorder, '─')
        .set_style(comfy_table::TableComponent::TopBorderIntersections, '─');
    table
}

fn bold_header<S: ToString>(names: impl IntoIterator<Item = S>) -> Vec<Cell> {
    names
        .into_iter()
        .map(|name| Cell::new(name).add_attribute(Attribute::Bold))
        .collect()
}

fn cell_text(value: &AnyValue) -> String {
    match value {
        AnyValue::Null => String::new(),
        AnyValue::String(s) => s.to_string(),
        AnyValue::StringOwned(s) => s.to_string(),
        AnyValue::Float64(n) => format!("{n:.2}"),
        other => other.to_string(),
    }
}

pub fn describe_view(view: ViewName) -> &'static str {
    match view {
        ViewName::RollingVaccinations => {
            "Joined deaths and vaccinations with a running total of doses per country"
        }
        ViewName::MovingAverage => "Trailing averages of new cases and new deaths per country",
        ViewName::PerCapita => "Cases and deaths per 100k people",
        ViewName::Segmentation => "Countries grouped by cases and deaths per capita quartiles",
        ViewName::DeathPercentage => "Deaths as a percentage of cases, and cases of population",
        ViewName::GlobalDaily => "New cases and deaths summed across countries for each date",
        ViewName::InfectionRanking => "Countries ranked by highest infection count",
        ViewName::ContinentDeaths => "Total death count per continent",
    }
}

pub fn display_views() -> anyhow::Result<()> {
    let mut table = styled_table();
    table.set_header(bold_header(["View", "Description"]));
    for view in ViewName::iter() {
        table.add_row(vec![view.to_string(), describe_view(view).to_string()]);
    }
    println!("\n{}", table);
    Ok(())
}

/// Prints every column of `df`, limited to the first `max_rows` rows.
pub fn display_frame(df: &DataFrame, max_rows: Option<usize>) -> anyhow::Result<()> {
    let height = max_rows.map_or(df.height(), |max| max.min(df.height()));
    let mut table = styled_table();
    table.set_header(bold_header(df.get_column_names()));
    for idx in 0..height {
        let row = df
            .get_columns()
            .iter()
            .map(|col| col.get(idx).map(|value| cell_text(&value)))
            .collect::<Result<Vec<_>, _>>()?;
        table.add_row(row);
    }
    println!("\n{}", table);
    if height < df.height() {
        println!("({} of {} rows shown)", height, df.height());
    }
    Ok(())
}

fn table_report_rows(table: &mut Table, report: &TableReport) {
    let name = report.table.to_string();
    let date_range = report
        .date_range
        .as_ref()
        .map(|range| format!("{} to {}", range.min, range.max))
        .unwrap_or_default();
    table.add_row(vec![name.clone(), "rows".into(), report.row_counts.total.to_string()]);
    table.add_row(vec![
        name.clone(),
        "country rows".into(),
        report.row_counts.countries.to_string(),
    ]);
    table.add_row(vec![
        name.clone(),
        "aggregate rows".into(),
        report.row_counts.aggregates.to_string(),
    ]);
    table.add_row(vec![name.clone(), "dates".into(), date_range]);
    table.add_row(vec![
        name.clone(),
        "duplicated keys".into(),
        report.duplicate_keys.len().to_string(),
    ]);
    for (column, count) in &report.null_counts {
        table.add_row(vec![name.clone(), format!("nulls in {column}"), count.to_string()]);
    }
}

pub fn display_quality_report(report: &QualityReport) -> anyhow::Result<()> {
    let mut table = styled_table();
    table.set_header(bold_header(["Table", "Check", "Value"]));
    table_report_rows(&mut table, &report.deaths);
    table_report_rows(&mut table, &report.vaccinations);
    println!("\n{}", table);

    let duplicates = [&report.deaths, &report.vaccinations]
        .into_iter()
        .flat_map(|r| {
            r.duplicate_keys
                .iter()
                .map(move |key| (r.table, key, r.join_blocking_keys.contains(key)))
        })
        .collect_vec();
    if !duplicates.is_empty() {
        let mut table = styled_table();
        table.set_header(bold_header(["Table", "Location", "Date", "Rows", "Blocks join"]));
        for (source, key, blocking) in duplicates {
            table.add_row(vec![
                source.to_string(),
                key.location.clone(),
                key.date.to_string(),
                key.count.to_string(),
                if blocking { "yes" } else { "no" }.to_string(),
            ]);
        }
        println!("\nDuplicated (location, date) keys:");
        println!("{}", table);
    }
    println!("{}", join_verdict(report));
    Ok(())
}

fn join_verdict(report: &QualityReport) -> &'static str {
    if report.is_join_safe() {
        "Country rows are safe to join on (location, date)."
    } else {
        "Country rows have duplicated (location, date) keys, joins will be refused."
    }
}

/// Prints how many countries fall into each segment, then the segmentation rows.
pub fn display_segments(segments: &DataFrame, max_rows: Option<usize>) -> anyhow::Result<()> {
    let counts = segments
        .column(COL::SEGMENT)?
        .str()?
        .into_iter()
        .map(|segment| segment.unwrap_or_default().to_string())
        .counts();
    let mut table = styled_table();
    table.set_header(bold_header(["Segment", "Countries"]));
    for (segment, count) in counts.into_iter().sorted() {
        table.add_row(vec![segment, count.to_string()]);
    }
    println!("\n{}", table);
    display_frame(segments, max_rows)
}
