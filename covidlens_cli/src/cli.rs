use std::fs::File;
use std::path::Path;

use anyhow::{anyhow, Context};
use clap::{command, Args, Parser, Subcommand};
use covidlens::{
    classify::Scope,
    config::Config,
    formatters::{CsvFormatter, JsonFormatter, OutputFormatter, OutputGenerator},
    numeric::CoercionMode,
    views::ViewName,
    CovidLens,
};
use enum_dispatch::enum_dispatch;
use log::{debug, info};
use polars::frame::DataFrame;
use serde::{Deserialize, Serialize};
use spinners::{Spinner, Spinners, Stream};
use strum_macros::EnumString;

use crate::display::{display_frame, display_quality_report, display_segments, display_views};
use crate::error::CovidLensCliResult;

const DEFAULT_PROGRESS_SPINNER: Spinners = Spinners::Dots;
const COMPLETE_PROGRESS_STRING: &str = "✔";
const RUNNING_TAIL_STRING: &str = "...";
const LOADING_STRING: &str = "Loading deaths and vaccinations tables";

/// Defines the output formats we are able to produce views in.
#[derive(Clone, Debug, Deserialize, Serialize, EnumString, PartialEq, Eq)]
#[strum(ascii_case_insensitive)]
pub enum OutputFormat {
    Csv,
    Json,
    Table,
}

impl OutputFormat {
    /// Formatter writing this format, `None` for the terminal table.
    fn formatter(&self) -> Option<OutputFormatter> {
        match self {
            OutputFormat::Csv => Some(CsvFormatter.into()),
            OutputFormat::Json => Some(JsonFormatter.into()),
            OutputFormat::Table => None,
        }
    }
}

fn write_output<T, U>(
    output_generator: T,
    mut data: DataFrame,
    output_file: Option<U>,
) -> CovidLensCliResult<()>
where
    T: OutputGenerator,
    U: AsRef<Path>,
{
    if let Some(output_file) = output_file {
        let mut f = File::create(output_file).context("Failed to write output")?;
        output_generator.save(&mut f, &mut data)?;
    } else {
        let mut stdout_lock = std::io::stdout().lock();
        output_generator.save(&mut stdout_lock, &mut data)?;
    };
    Ok(())
}

/// Loads both tables, showing a spinner on stderr unless `quiet`.
fn load(config: Config, quiet: bool) -> CovidLensCliResult<CovidLens> {
    let sp = (!quiet).then(|| {
        Spinner::with_timer_and_stream(
            DEFAULT_PROGRESS_SPINNER,
            LOADING_STRING.to_string() + RUNNING_TAIL_STRING,
            Stream::Stderr,
        )
    });
    let covidlens = CovidLens::new_with_config(config);
    if let Some(mut s) = sp {
        s.stop_with_symbol(COMPLETE_PROGRESS_STRING)
    }
    covidlens.map_err(Into::into)
}

fn head(df: DataFrame, rows: Option<usize>) -> DataFrame {
    match rows {
        Some(rows) => df.head(Some(rows)),
        None => df,
    }
}

/// Trait that defines what to run when a given subcommand is invoked.
#[enum_dispatch]
pub trait RunCommand {
    fn run(&self, config: Config) -> CovidLensCliResult<()>;
}

/// Arguments overriding values read from the config file.
#[derive(Args, Debug, Clone, Default)]
pub struct ConfigOverrides {
    #[arg(long, global = true, help = "Path to the deaths CSV")]
    deaths: Option<String>,
    #[arg(long, global = true, help = "Path to the vaccinations CSV")]
    vaccinations: Option<String>,
    #[arg(
        long,
        global = true,
        help = "Number of rows in the trailing moving-average window"
    )]
    window: Option<usize>,
    #[arg(
        long,
        global = true,
        value_name = "lenient|strict",
        help = "How unparseable numeric cells are treated in per-row views"
    )]
    coercion: Option<CoercionMode>,
    #[arg(
        long,
        global = true,
        value_name = "countries|aggregates|all",
        help = "Rows the per-row and aggregate views run over"
    )]
    scope: Option<Scope>,
}

impl ConfigOverrides {
    pub fn apply(&self, mut config: Config) -> Config {
        if let Some(deaths) = &self.deaths {
            config.deaths_path.clone_from(deaths);
        }
        if let Some(vaccinations) = &self.vaccinations {
            config.vaccinations_path.clone_from(vaccinations);
        }
        if let Some(window) = self.window {
            config.moving_average_window = window;
        }
        if let Some(coercion) = self.coercion {
            config.coercion = coercion;
        }
        if let Some(scope) = self.scope {
            config.scope = scope;
        }
        config
    }
}

/// The `quality` command reports row counts, duplicated keys, null counts and date ranges.
#[derive(Args, Debug)]
pub struct QualityCommand {
    #[arg(long, help = "Print the report as JSON")]
    json: bool,
    #[arg(from_global)]
    quiet: bool,
}

impl RunCommand for QualityCommand {
    fn run(&self, config: Config) -> CovidLensCliResult<()> {
        info!("Running `quality` subcommand");
        let covidlens = load(config, self.quiet)?;
        let report = covidlens.quality_report()?;
        if self.json {
            println!("{}", serde_json::to_string_pretty(&report)?);
        } else {
            display_quality_report(&report)?;
        }
        Ok(())
    }
}

/// The `views` command lists the available views.
#[derive(Args, Debug)]
pub struct ViewsCommand {}

impl RunCommand for ViewsCommand {
    fn run(&self, _config: Config) -> CovidLensCliResult<()> {
        info!("Running `views` subcommand");
        display_views()?;
        Ok(())
    }
}

/// The `view` command materializes one view and outputs it in a given format.
#[derive(Args, Debug)]
pub struct ViewCommand {
    #[arg(help = "Name of the view, see `covidlens views`")]
    name: ViewName,
    #[arg(
        short = 'f',
        long,
        value_name = "csv|json|table",
        default_value = "table",
        help = "Output format for the results"
    )]
    output_format: OutputFormat,
    #[arg(short = 'o', long, help = "Output file to place the results")]
    output_file: Option<String>,
    #[arg(long, help = "Only output the first N rows")]
    head: Option<usize>,
    #[arg(from_global)]
    quiet: bool,
}

impl RunCommand for ViewCommand {
    fn run(&self, config: Config) -> CovidLensCliResult<()> {
        info!("Running `view` subcommand for {}", self.name);
        let covidlens = load(config, self.quiet)?;
        let data = head(covidlens.view(self.name)?, self.head);
        debug!("{data:#?}");
        match self.output_format.formatter() {
            Some(formatter) => write_output(formatter, data, self.output_file.as_deref())?,
            None if self.output_file.is_some() => {
                return Err(anyhow!(
                    "Table output can only be printed, choose csv or json to write a file"
                )
                .into())
            }
            None => display_frame(&data, None)?,
        }
        Ok(())
    }
}

/// The `segments` command summarizes the country segmentation.
#[derive(Args, Debug)]
pub struct SegmentsCommand {
    #[arg(long, help = "Only show the first N countries")]
    head: Option<usize>,
    #[arg(from_global)]
    quiet: bool,
}

impl RunCommand for SegmentsCommand {
    fn run(&self, config: Config) -> CovidLensCliResult<()> {
        info!("Running `segments` subcommand");
        let covidlens = load(config, self.quiet)?;
        let segments = covidlens.view(ViewName::Segmentation)?;
        display_segments(&segments, self.head)?;
        Ok(())
    }
}

/// The entrypoint for the CLI.
#[derive(Parser, Debug)]
#[command(version, about="Covidlens computes COVID-19 indicators from case, death and vaccination tables", long_about = None, name="covidlens")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Option<Commands>,
    #[command(flatten)]
    pub overrides: ConfigOverrides,
    #[arg(
        short = 'q',
        long = "quiet",
        help = "\
            Do not print progress spinner. Results and logs (when `RUST_LOG`\n\
            is set) will still be printed.",
        global = true
    )]
    quiet: bool,
}

/// Subcommands of the CLI, each dispatched through `RunCommand`.
#[derive(Subcommand, Debug)]
#[enum_dispatch(RunCommand)]
pub enum Commands {
    /// Data quality checks over both tables
    Quality(QualityCommand),
    /// List available views
    Views(ViewsCommand),
    /// Output a view in a given format
    View(ViewCommand),
    /// Country segmentation by cases and deaths per capita
    Segments(SegmentsCommand),
}

#[cfg(test)]
mod tests {
    use std::io::Write;
    use std::str::FromStr;

    use tempfile::{NamedTempFile, TempDir};

    use super::*;

    fn write_csv(dir: &TempDir, name: &str, lines: &[&str]) -> String {
        let path = dir.path().join(name);
        let mut f = File::create(&path).unwrap();
        writeln!(f, "{}", lines.join("\n")).unwrap();
        path.to_string_lossy().to_string()
    }

    fn test_config(dir: &TempDir) -> Config {
        Config {
            deaths_path: write_csv(
                dir,
                "deaths.csv",
                &[
                    "iso_code,continent,location,date,population,total_cases,new_cases,total_deaths,new_deaths",
                    "TST,Europe,Testland,2021-01-01,1000,100,100,10,10",
                    "TST,Europe,Testland,2021-01-02,1000,150,50,20,10",
                    "OWID_WRL,,World,2021-01-01,8000000000,90000000,,2000000,",
                ],
            ),
            vaccinations_path: write_csv(
                dir,
                "vaccinations.csv",
                &[
                    "iso_code,continent,location,date,new_vaccinations,total_vaccinations",
                    "TST,Europe,Testland,2021-01-01,,",
                    "TST,Europe,Testland,2021-01-02,50,50",
                ],
            ),
            ..Config::default()
        }
    }

    #[test]
    fn view_command_writes_csv() {
        let dir = TempDir::new().unwrap();
        let output_file = NamedTempFile::new().unwrap();
        let view_command = ViewCommand {
            name: ViewName::RollingVaccinations,
            output_format: OutputFormat::Csv,
            output_file: Some(output_file.path().to_string_lossy().to_string()),
            head: None,
            quiet: true,
        };
        let result = view_command.run(test_config(&dir));
        assert!(result.is_ok(), "{result:?}");
        let written = std::fs::read_to_string(output_file.path()).unwrap();
        assert_eq!(written.lines().count(), 3);
        assert!(written.lines().nth(2).unwrap().starts_with("Testland,Europe,2021-01-02"));
    }

    #[test]
    fn table_output_cannot_go_to_a_file() {
        let dir = TempDir::new().unwrap();
        let view_command = ViewCommand {
            name: ViewName::DeathPercentage,
            output_format: OutputFormat::Table,
            output_file: Some(dir.path().join("out.txt").to_string_lossy().to_string()),
            head: None,
            quiet: true,
        };
        assert!(view_command.run(test_config(&dir)).is_err());
    }

    #[test]
    fn quality_and_segments_commands_run() {
        let dir = TempDir::new().unwrap();
        let quality = QualityCommand {
            json: true,
            quiet: true,
        };
        assert!(quality.run(test_config(&dir)).is_ok());
        let segments = SegmentsCommand {
            head: Some(5),
            quiet: true,
        };
        assert!(segments.run(test_config(&dir)).is_ok());
    }

    #[test]
    fn missing_input_is_an_error() {
        let quality = QualityCommand {
            json: false,
            quiet: true,
        };
        let config = Config {
            deaths_path: "/nonexistent/deaths.csv".into(),
            ..Config::default()
        };
        assert!(quality.run(config).is_err());
    }

    #[test]
    fn overrides_replace_config_values() {
        let overrides = ConfigOverrides {
            deaths: Some("d.csv".into()),
            vaccinations: None,
            window: Some(3),
            coercion: Some(CoercionMode::Strict),
            scope: Some(Scope::All),
        };
        let config = overrides.apply(Config::default());
        assert_eq!(config.deaths_path, "d.csv");
        assert_eq!(config.vaccinations_path, Config::default().vaccinations_path);
        assert_eq!(config.moving_average_window, 3);
        assert_eq!(config.coercion, CoercionMode::Strict);
        assert_eq!(config.scope, Scope::All);
    }

    #[test]
    fn output_type_should_deserialize_properly() {
        let output_format = OutputFormat::from_str("csv");
        assert_eq!(
            output_format.unwrap(),
            OutputFormat::Csv,
            "csv format should be parsed correctly"
        );
        let output_format = OutputFormat::from_str("JSON");
        assert_eq!(
            output_format.unwrap(),
            OutputFormat::Json,
            "parsing should be case insensitive"
        );
        let output_format = OutputFormat::from_str("geoparquet");
        assert!(output_format.is_err(), "non listed formats should fail");
    }

    #[test]
    fn scope_flag_parses() {
        let cli = Cli::try_parse_from(["covidlens", "--scope", "aggregates", "views"]).unwrap();
        assert_eq!(cli.overrides.apply(Config::default()).scope, Scope::Aggregates);
        assert!(Cli::try_parse_from(["covidlens", "--scope", "planets", "views"]).is_err());
    }

    #[test]
    fn cli() {
        use clap::CommandFactory;
        Cli::command().debug_assert();
    }
}
