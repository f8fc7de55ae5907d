//! # vision-stream: single-process real-time vision pipelines
//!
//! A pipeline is a linear chain of independently written stages (one
//! source, any number of processors, one sink), each bound to its own
//! configuration namespace. The chain is assembled into one process and
//! executed with one worker thread per stage, connected by small bounded
//! channels.
//!
//! ## Architecture
//!
//! - **Pipeline**: spec builder, assembler and threaded runtime
//! - **Modes**: named pipeline recipes with a single default
//! - **Stages**: built-in frame grabber, file source, inference
//!   processors, viewer and file sink
//! - **Config / CLI**: TOML config file, command line with env fallbacks
//!
//! ## Configuration
//!
//! The config file is read from the platform configuration directory under
//! `vision-stream/config.toml` unless `--config` names one.
//!
//! ## Example
//!
//! ```ignore
//! use vision_stream::{
//!     modes::ModeRegistry,
//!     pipeline::{AssemblySettings, PipelineAssembler},
//! };
//!
//! let registry = ModeRegistry::builtin();
//! let mode = registry.select(Some("object_detection"))?;
//! let pipeline = PipelineAssembler::new(AssemblySettings::default()).assemble(&mode.spec)?;
//!
//! let canceller = pipeline.canceller();
//! ctrlc::set_handler(move || canceller.cancel())?;
//! let report = pipeline.run()?;
//! ```

pub mod app;
pub mod cli;
pub mod config;
pub mod error;
pub mod logging;
pub mod modes;
pub mod pipeline;
pub mod stages;

// Re-export commonly used types
pub use cli::Cli;
pub use config::AppConfig;
pub use error::{AppError, Result};
pub use modes::{ModeRegistry, SelectedMode, DEFAULT_MODE};
pub use pipeline::{
    Pipeline, PipelineAssembler, PipelineError, PipelineSpec, RunOutcome, RunReport,
};
