mod config;
mod logging;
mod statsd;

use clap::{Args, Parser, Subcommand};
use config::{Config, ConfigError};
use recipe_upsert::errors::UpsertError;
use std::path::PathBuf;
use std::process::ExitCode;

#[derive(Parser)]
#[command(name = "recipe-publisher", about = "Publishes recipe updates to a content repository")]
struct Cli {
    #[command(subcommand)]
    command: CliCommand,
}

#[derive(Subcommand)]
enum CliCommand {
    /// Serve upsert requests
    Run(ConfigArgs),
    /// Load and validate the configuration, then exit
    CheckConfig(ConfigArgs),
}

#[derive(Args)]
struct ConfigArgs {
    /// YAML config file. Without it, defaults and environment overrides apply.
    #[arg(long)]
    config_path: Option<PathBuf>,
}

#[derive(thiserror::Error, Debug)]
enum CliError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error(transparent)]
    Metrics(#[from] statsd::MetricsError),
    #[error(transparent)]
    Upsert(#[from] UpsertError),
    #[error("could not start runtime: {0}")]
    Runtime(#[from] std::io::Error),
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    let result = match &cli.command {
        CliCommand::Run(args) => run(args),
        CliCommand::CheckConfig(args) => check_config(args),
    };

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("recipe-publisher: {e}");
            ExitCode::FAILURE
        }
    }
}

fn run(args: &ConfigArgs) -> Result<(), CliError> {
    let config = Config::load(args.config_path.as_deref())?;

    let _sentry = logging::init(config.logging.as_ref());
    if let Some(metrics_config) = &config.metrics {
        statsd::init(metrics_config)?;
    }

    let runtime = tokio::runtime::Runtime::new()?;
    runtime.block_on(recipe_upsert::run(config.upsert)).map_err(|e| {
        tracing::error!(error = %e, "Recipe upsert service stopped");
        e
    })?;

    Ok(())
}

fn check_config(args: &ConfigArgs) -> Result<(), CliError> {
    let config = Config::load(args.config_path.as_deref())?;
    println!("{:#?}", config);
    Ok(())
}
