mod cli;
mod display;
mod error;

use std::path::PathBuf;

use anyhow::Result;
use clap::Parser;
use cli::{Cli, RunCommand};
use covidlens::config::Config;
use error::CovidLensCliResult;
use log::debug;

const DEFAULT_LOGGING_LEVEL: &str = "warn";

fn main() -> Result<()> {
    // Set RUST_LOG to `DEFAULT_LOGGING_LEVEL` if not set
    let _ =
        std::env::var("RUST_LOG").map_err(|_| std::env::set_var("RUST_LOG", DEFAULT_LOGGING_LEVEL));
    pretty_env_logger::init_timed();
    let args = Cli::parse();
    debug!("args: {args:?}");
    let config = args.overrides.apply(read_config_from_toml()?);
    debug!("config: {config:?}");

    if let Some(command) = args.command {
        command.run(config)?;
    }
    Ok(())
}

fn config_file_path() -> Option<PathBuf> {
    // Linux: ~/.config/covidlens/config.toml
    // macOS: ~/Library/Application Support/covidlens/config.toml
    dirs::config_dir().map(|dir| dir.join("covidlens").join("config.toml"))
}

fn read_config_from_toml() -> CovidLensCliResult<Config> {
    let Some(file_path) = config_file_path() else {
        return Ok(Config::default());
    };
    match std::fs::read_to_string(&file_path) {
        Ok(contents) => Ok(toml::from_str(&contents)?),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(Config::default()),
        Err(e) => Err(e.into()),
    }
}
