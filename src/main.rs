//! vision-stream - Main Entry Point
//!
//! Selects one pipeline mode and runs it until the source is exhausted or
//! Ctrl+C is pressed.

use anyhow::Context;
use clap::Parser;
use std::process::ExitCode;
use vision_stream::{app, logging, AppConfig, AppError, Cli, ModeRegistry};

fn main() -> ExitCode {
    // clap prints its own message and exits with 2 on usage errors
    let cli = Cli::parse();

    match run(cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            tracing::error!("{:#}", e);
            eprintln!("Error: {:#}", e);
            ExitCode::FAILURE
        }
    }
}

fn run(cli: Cli) -> anyhow::Result<()> {
    let config = AppConfig::locate(cli.config.as_deref()).context("Failed to load configuration")?;
    let config = cli.apply(config);

    let _guard = logging::init_logging(&config).context("Failed to initialise logging")?;
    tracing::info!("Starting vision-stream {}", env!("CARGO_PKG_VERSION"));

    let registry = ModeRegistry::builtin();
    if cli.list_modes {
        print!("{}", app::list_modes(&registry));
        return Ok(());
    }

    let launch = app::prepare(&cli, &config, &registry)?;
    if cli.describe {
        print!("{}", launch.describe()?);
        return Ok(());
    }

    let pipeline = launch
        .assemble()
        .with_context(|| format!("Failed to assemble mode '{}'", launch.mode.name))?;

    let report = app::execute(pipeline, |canceller| {
        ctrlc::set_handler(move || {
            tracing::info!("Interrupt received, stopping pipeline");
            canceller.cancel();
        })
        .map_err(|e| AppError::Signal(e.to_string()))
    })?;

    tracing::info!(
        "Finished mode '{}' ({:?}) after {:?}",
        launch.mode.name,
        report.outcome,
        report.elapsed
    );
    Ok(())
}
