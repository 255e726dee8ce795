// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 Keylime Authors

//! svcconfig-check loads a service configuration file through the full
//! pipeline and prints the resolved settings of every service as JSON.

use clap::Parser;
use log::{error, warn};
use serde_json::{json, Map, Value};
use std::{path::PathBuf, process};
use svcconfig::{Config, ConfigError, ConfigLoader};
use thiserror::Error;

#[derive(Parser)]
#[command(
    name = "svcconfig-check",
    version,
    about = "Load a service configuration file and print the resolved settings"
)]
struct Cli {
    /// Path to the configuration file
    #[arg(value_name = "FILE")]
    config: PathBuf,

    /// Enable verbose logging
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Do not fetch the auth keys of the services
    #[arg(long)]
    skip_auth_keys: bool,

    /// Report auth key failures as warnings instead of failing
    #[arg(long, conflicts_with = "skip_auth_keys")]
    lenient: bool,
}

#[derive(Error, Debug)]
enum CheckError {
    #[error("{}", join_errors(.0))]
    Load(Vec<ConfigError>),

    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("Failed to serialize the resolved configuration")]
    Json(#[from] serde_json::Error),
}

fn join_errors(errors: &[ConfigError]) -> String {
    errors
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("; ")
}

fn init_logging(verbose: u8) {
    let log_level = match verbose {
        0 => log::LevelFilter::Warn,
        1 => log::LevelFilter::Info,
        2 => log::LevelFilter::Debug,
        _ => log::LevelFilter::Trace,
    };

    pretty_env_logger::formatted_builder()
        .filter_level(log_level)
        .target(pretty_env_logger::env_logger::Target::Stderr)
        .init();
}

fn load(cli: &Cli) -> Result<Config, CheckError> {
    let mut loader = ConfigLoader::new();
    if cli.skip_auth_keys {
        loader = loader.without_auth_keys();
    }

    if !cli.lenient {
        return loader.load(&cli.config).map_err(CheckError::Load);
    }

    let (config, errors) = loader.load_lenient(&cli.config)?;
    for e in errors {
        warn!("{e}");
    }
    Ok(config)
}

fn summary(config: &Config) -> Result<Value, CheckError> {
    let mut services = Map::new();
    for (name, service) in &config.service_configs {
        let _ = services.insert(
            name.clone(),
            json!({
                "url": service.url,
                "auth_required": service.auth_required,
                "auth_key_loaded": !service.auth_key().is_empty(),
                "endpoints": service.end_points.keys().collect::<Vec<_>>(),
                "merged_component_configs":
                    serde_json::to_value(service.merged_component_configs())?,
            }),
        );
    }

    Ok(json!({
        "env": config.env,
        "port": config.port,
        "hash": config.hash(),
        "default_component_configs":
            serde_json::to_value(&config.default_component_configs)?,
        "services": services,
        "databases": config.database_configs.keys().collect::<Vec<_>>(),
    }))
}

fn run(cli: &Cli) -> Result<(), CheckError> {
    let config = load(cli)?;
    let output = serde_json::to_string_pretty(&summary(&config)?)?;
    println!("{output}");
    Ok(())
}

fn main() {
    let cli = Cli::parse();

    init_logging(cli.verbose);

    if let Err(e) = run(&cli) {
        error!("Failed to load {}: {e}", cli.config.display());
        process::exit(1);
    }
}
