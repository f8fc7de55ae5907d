//! Linear stage pipeline: composition and execution.
//!
//! A pipeline is one source, zero or more processors and one sink, each
//! bound to its own configuration namespace. Stages run on dedicated
//! threads and talk only through bounded crossbeam channels.
//!
//! # Architecture
//!
//! ```text
//! PipelineSpec ──► PipelineAssembler ──► Pipeline::run()
//!
//! [Source] ──(bounded)──► [Processor]* ──(bounded)──► [Sink]
//!     └──────────── shared CancellationToken ───────────┘
//! ```
//!
//! # Design
//!
//! - **Assembly is all-or-nothing**: topology, port types and every option
//!   are checked before any stage is constructed or started.
//! - **Namespaced options**: `ns.key` addressing; defaults, then binding
//!   arguments, then runtime overrides.
//! - **Close cascade**: a stage that finishes drops its output, which ends
//!   the downstream stage's input once drained.
//! - **Cooperative cancellation**: every blocking send, receive and sleep
//!   also waits on the cancellation signal.

pub mod assembler;
pub mod cancel;
pub mod channel;
pub mod error;
pub mod id;
pub mod message;
pub mod options;
pub mod port;
pub mod runtime;
pub mod spec;
pub mod stage;

pub use assembler::{AssemblySettings, AssemblyStats, PipelineAssembler};
pub use cancel::{CancellationToken, Canceller};
pub use error::{PipelineError, PipelineResult, StageError, StageResult, TopologyViolation};
pub use id::StageId;
pub use message::{ConfigValue, Message};
pub use options::{ConfigBundle, OptionKind, OptionSpec, Overrides, StageConfig};
pub use port::{PayloadKind, StageRole};
pub use runtime::{Pipeline, RunOutcome, RunReport, StageState, StageStats, StateWatcher};
pub use spec::{PipelineSpec, StageBinding};
pub use stage::{AnyStage, Processor, Sink, Source, StageContext, StageDescriptor, StageFactory};
