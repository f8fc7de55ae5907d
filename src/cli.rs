//! Command-line surface.
//!
//! Every flag has an environment fallback so the binary can be driven from
//! a container without arguments. Command-line values beat the config file.

use crate::config::AppConfig;
use crate::pipeline::{Overrides, PipelineResult};
use clap::Parser;
use std::path::PathBuf;

#[derive(Parser, Debug, Clone, Default)]
#[command(name = "vision-stream")]
#[command(version, about = "Runs one real-time computer vision pipeline", long_about = None)]
pub struct Cli {
    /// Pipeline mode to run (see --list-modes)
    #[arg(
        short = 'm',
        long = "mode",
        visible_alias = "demo-type",
        env = "VISION_STREAM_MODE",
        value_name = "MODE"
    )]
    pub mode: Option<String>,

    /// Override a stage option, e.g. `source.width=640` (repeatable)
    #[arg(
        short = 's',
        long = "set",
        env = "VISION_STREAM_SET",
        value_name = "NS.KEY=VALUE",
        value_delimiter = ';'
    )]
    pub set: Vec<String>,

    /// Config file (defaults to the platform config directory)
    #[arg(short = 'c', long = "config", env = "VISION_STREAM_CONFIG", value_name = "PATH")]
    pub config: Option<PathBuf>,

    /// Capacity of each inter-stage channel
    #[arg(long, value_name = "N", value_parser = clap::value_parser!(u64).range(1..))]
    pub channel_capacity: Option<u64>,

    /// Milliseconds stages get to stop after cancellation
    #[arg(long, value_name = "MS", value_parser = clap::value_parser!(u64).range(1..))]
    pub grace_period_ms: Option<u64>,

    /// Also write a daily rolling log file into this directory
    #[arg(long, value_name = "DIR")]
    pub log_dir: Option<PathBuf>,

    /// List registered modes and exit
    #[arg(long)]
    pub list_modes: bool,

    /// Print the selected pipeline and its resolved options, then exit
    #[arg(long)]
    pub describe: bool,
}

impl Cli {
    /// Command-line overrides, validated.
    pub fn overrides(&self) -> PipelineResult<Overrides> {
        Overrides::parse(&self.set)
    }

    /// Fold command-line settings into the file config. The mode is kept
    /// separate so the two sources stay distinguishable.
    pub fn apply(&self, mut config: AppConfig) -> AppConfig {
        if let Some(capacity) = self.channel_capacity {
            config.channel_capacity = capacity as usize;
        }
        if let Some(grace) = self.grace_period_ms {
            config.grace_period_ms = grace;
        }
        if let Some(dir) = &self.log_dir {
            config.log_dir = Some(dir.clone());
        }
        config
    }

    /// Mode requested by the command line, else by the config file.
    pub fn requested_mode<'a>(&'a self, config: &'a AppConfig) -> Option<&'a str> {
        self.mode.as_deref().or(config.mode.as_deref())
    }
}
