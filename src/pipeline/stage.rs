//! Stage abstraction for the pipeline.
//!
//! Three role traits cover the collaborators a pipeline composes:
//! - **`Source`** pulls messages from the outside world until exhausted.
//! - **`Processor`** maps one input message to zero or one output.
//! - **`Sink`** performs a side effect for every message.
//!
//! A `StageFactory` pairs a static `StageDescriptor` with a constructor.
//! `AnyStage` wraps whichever role a factory produced so the runtime can
//! drive all of them uniformly.

use crate::pipeline::cancel::CancellationToken;
use crate::pipeline::error::{PipelineResult, StageError, StageResult, TopologyViolation};
use crate::pipeline::message::Message;
use crate::pipeline::options::{OptionSpec, StageConfig};
use crate::pipeline::port::{PayloadKind, StageRole};
use crossbeam_channel::select;
use std::sync::Arc;
use std::time::Duration;

/// Static description of a stage implementation.
#[derive(Debug, Clone)]
pub struct StageDescriptor {
    /// Implementation name, e.g. `frame-grabber`.
    pub name: &'static str,
    pub role: StageRole,
    pub input: Option<PayloadKind>,
    pub output: Option<PayloadKind>,
    pub options: &'static [OptionSpec],
    pub description: &'static str,
}

impl StageDescriptor {
    pub fn option(&self, name: &str) -> Option<&OptionSpec> {
        self.options.iter().find(|o| o.name == name)
    }

    /// Check that the declared ports agree with the declared role.
    pub fn check_ports(&self, namespace: &str) -> Result<(), TopologyViolation> {
        let inconsistent = |reason: &str| TopologyViolation::InconsistentDescriptor {
            namespace: namespace.to_string(),
            reason: format!("{} '{}' {}", self.role, self.name, reason),
        };
        match (self.role.has_input(), self.input.is_some()) {
            (true, false) => return Err(inconsistent("declares no input")),
            (false, true) => return Err(inconsistent("must not declare an input")),
            _ => {}
        }
        match (self.role.has_output(), self.output.is_some()) {
            (true, false) => Err(inconsistent("declares no output")),
            (false, true) => Err(inconsistent("must not declare an output")),
            _ => Ok(()),
        }
    }
}

/// Creates stage instances from their resolved configuration.
pub trait StageFactory: Send + Sync {
    fn descriptor(&self) -> &StageDescriptor;

    /// Construct a stage. Must not acquire external resources; that belongs
    /// in the stage's `on_start`.
    fn build(&self, config: Arc<StageConfig>) -> PipelineResult<AnyStage>;
}

/// Per-stage view of the running pipeline.
#[derive(Debug, Clone)]
pub struct StageContext {
    config: Arc<StageConfig>,
    cancel: CancellationToken,
}

impl StageContext {
    pub fn new(config: Arc<StageConfig>, cancel: CancellationToken) -> Self {
        Self { config, cancel }
    }

    pub fn namespace(&self) -> &str {
        self.config.namespace()
    }

    pub fn config(&self) -> &StageConfig {
        &self.config
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// Fail with `Cancelled` if cancellation has been triggered.
    pub fn check_cancelled(&self) -> StageResult<()> {
        if self.is_cancelled() {
            Err(StageError::Cancelled)
        } else {
            Ok(())
        }
    }

    /// Sleep for `duration`, returning early with `Cancelled` on cancellation.
    pub fn sleep(&self, duration: Duration) -> StageResult<()> {
        self.check_cancelled()?;
        if duration.is_zero() {
            return Ok(());
        }
        select! {
            recv(self.cancel.signal()) -> _ => Err(StageError::Cancelled),
            default(duration) => Ok(()),
        }
    }
}

/// Produces messages until its upstream is exhausted.
pub trait Source: Send {
    /// Acquire the input device or resource.
    fn on_start(&mut self, _ctx: &StageContext) -> StageResult<()> {
        Ok(())
    }

    /// Next message, or `None` once exhausted. May block; long waits should
    /// go through `StageContext::sleep` so cancellation is observed.
    fn next(&mut self, ctx: &StageContext) -> StageResult<Option<Message>>;

    fn on_stop(&mut self, _ctx: &StageContext) {}
}

/// Transforms one message into zero or one messages.
pub trait Processor: Send {
    fn on_start(&mut self, _ctx: &StageContext) -> StageResult<()> {
        Ok(())
    }

    fn process(&mut self, message: Message, ctx: &StageContext) -> StageResult<Option<Message>>;

    fn on_stop(&mut self, _ctx: &StageContext) {}
}

/// Consumes messages with a side effect.
pub trait Sink: Send {
    fn on_start(&mut self, _ctx: &StageContext) -> StageResult<()> {
        Ok(())
    }

    fn consume(&mut self, message: Message, ctx: &StageContext) -> StageResult<()>;

    fn on_stop(&mut self, _ctx: &StageContext) {}
}

/// A constructed stage of any role.
pub enum AnyStage {
    Source(Box<dyn Source>),
    Processor(Box<dyn Processor>),
    Sink(Box<dyn Sink>),
}

impl AnyStage {
    pub fn role(&self) -> StageRole {
        match self {
            AnyStage::Source(_) => StageRole::Source,
            AnyStage::Processor(_) => StageRole::Processor,
            AnyStage::Sink(_) => StageRole::Sink,
        }
    }

    pub fn on_start(&mut self, ctx: &StageContext) -> StageResult<()> {
        match self {
            AnyStage::Source(s) => s.on_start(ctx),
            AnyStage::Processor(p) => p.on_start(ctx),
            AnyStage::Sink(s) => s.on_start(ctx),
        }
    }

    pub fn on_stop(&mut self, ctx: &StageContext) {
        match self {
            AnyStage::Source(s) => s.on_stop(ctx),
            AnyStage::Processor(p) => p.on_stop(ctx),
            AnyStage::Sink(s) => s.on_stop(ctx),
        }
    }
}

impl std::fmt::Debug for AnyStage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "AnyStage::{:?}", self.role())
    }
}
