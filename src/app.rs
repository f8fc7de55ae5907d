//! Application wiring.
//!
//! Turns the parsed command line and the file config into one assembled
//! pipeline: the registry is validated, a mode is selected (command line or
//! environment, then config file, then the registry default), overrides are
//! layered and the spec is assembled. `main` only adds logging, signals and
//! exit codes on top of this.

use crate::cli::Cli;
use crate::config::AppConfig;
use crate::error::{AppError, Result};
use crate::modes::{ModeRegistry, SelectedMode};
use crate::pipeline::{Canceller, Pipeline, PipelineAssembler, RunOutcome, RunReport};
use std::fmt::Write as _;

/// Everything needed to assemble the selected pipeline.
#[derive(Debug)]
pub struct Launch {
    pub mode: SelectedMode,
    pub assembler: PipelineAssembler,
}

impl Launch {
    /// Assemble the selected spec. Nothing is started.
    pub fn assemble(&self) -> Result<Pipeline> {
        Ok(self.assembler.assemble(&self.mode.spec)?)
    }

    /// Human-readable plan: the stage chain followed by every resolved
    /// option. Assembles the pipeline to resolve options but never runs it.
    pub fn describe(&self) -> Result<String> {
        let pipeline = self.assemble()?;
        let mut out = String::new();
        let origin = if self.mode.defaulted { " (default)" } else { "" };
        // Writing to a String cannot fail.
        let _ = writeln!(out, "mode: {}{}", self.mode.name, origin);
        let _ = writeln!(out);
        let _ = write!(out, "{}", self.mode.spec);
        let _ = writeln!(out);
        let _ = writeln!(out, "resolved options:");
        for (key, value) in pipeline.config().entries() {
            let _ = writeln!(out, "  {} = {}", key, value);
        }
        let settings = pipeline.settings();
        let _ = writeln!(out);
        let _ = writeln!(
            out,
            "channel capacity: {}, grace period: {} ms",
            settings.channel_capacity,
            settings.grace_period.as_millis()
        );
        Ok(out)
    }
}

/// Validate the registry, select the mode and prepare the assembler.
///
/// `config` should already carry the command-line settings
/// (see [`Cli::apply`]).
pub fn prepare(cli: &Cli, config: &AppConfig, registry: &ModeRegistry) -> Result<Launch> {
    registry.validate()?;

    let mode = registry.select(cli.requested_mode(config))?;
    if mode.defaulted {
        tracing::info!("No mode given, using default '{}'", mode.name);
    } else {
        tracing::info!("Selected mode '{}'", mode.name);
    }

    let overrides = cli.overrides()?.layered_over(config.overrides()?);
    if !overrides.is_empty() {
        tracing::debug!("{} option override(s) in effect", overrides.len());
    }

    let assembler = PipelineAssembler::new(config.assembly_settings()).with_overrides(overrides);
    Ok(Launch { mode, assembler })
}

/// Run an assembled pipeline to completion.
///
/// `on_ready` receives a cancellation handle before any stage starts, so the
/// caller can wire it to a signal handler.
pub fn execute<F>(pipeline: Pipeline, on_ready: F) -> Result<RunReport>
where
    F: FnOnce(Canceller) -> Result<()>,
{
    on_ready(pipeline.canceller())?;

    let stats = pipeline.stats().clone();
    tracing::info!(
        "Running {} stages ({} processors, {} channels)",
        stats.stages,
        stats.processors,
        stats.channels
    );

    let report = pipeline.run().map_err(AppError::from)?;
    match report.outcome {
        RunOutcome::Drained => tracing::info!("Pipeline drained in {:?}", report.elapsed),
        RunOutcome::Cancelled => tracing::info!("Pipeline cancelled after {:?}", report.elapsed),
    }
    for stage in &report.stages {
        tracing::debug!(
            "[{}] {}: received {}, emitted {}",
            stage.namespace,
            stage.role,
            stage.received,
            stage.emitted
        );
    }
    Ok(report)
}

/// One line per registered mode, the default marked.
pub fn list_modes(registry: &ModeRegistry) -> String {
    let width = registry
        .names()
        .iter()
        .map(String::len)
        .max()
        .unwrap_or(0);
    let mut out = String::new();
    for (name, description) in registry.descriptions() {
        let marker = if name == registry.default_mode() { '*' } else { ' ' };
        let _ = writeln!(out, "{} {:<width$}  {}", marker, name, description, width = width);
    }
    out
}
