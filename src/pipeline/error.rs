//! Pipeline-specific error types.
//!
//! Assembly-time errors (`UnknownMode`, `InvalidTopology`, the option errors)
//! are raised before any stage starts. `StageFatal` is raised by the runtime
//! once a running stage cannot continue.

use crate::pipeline::port::PayloadKind;
use thiserror::Error;

/// Which shape invariant a pipeline spec broke.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TopologyViolation {
    #[error("pipeline has no stages")]
    Empty,

    #[error("no source stage")]
    NoSource,

    #[error("no sink stage")]
    NoSink,

    #[error("multiple source stages: {}", .0.join(", "))]
    MultipleSources(Vec<String>),

    #[error("multiple sink stages: {}", .0.join(", "))]
    MultipleSinks(Vec<String>),

    #[error("source stage '{0}' is not first")]
    SourceNotFirst(String),

    #[error("sink stage '{0}' is not last")]
    SinkNotLast(String),

    #[error(
        "type mismatch between stage '{upstream}' output ({produced}) and stage '{downstream}' input ({expected})"
    )]
    TypeMismatch {
        upstream: String,
        produced: PayloadKind,
        downstream: String,
        expected: PayloadKind,
    },

    #[error("stage '{namespace}' has an inconsistent descriptor: {reason}")]
    InconsistentDescriptor { namespace: String, reason: String },

    #[error("namespace '{0}' is bound more than once")]
    DuplicateNamespace(String),

    #[error("invalid namespace '{0}': must be non-empty without '.' or whitespace")]
    InvalidNamespace(String),
}

/// Errors raised by a stage while it runs.
#[derive(Error, Debug)]
pub enum StageError {
    /// Cooperative shutdown; not a failure.
    #[error("cancellation requested")]
    Cancelled,

    #[error("{0} unavailable")]
    Unavailable(String),

    #[error("resource error: {0}")]
    Resource(String),

    #[error("invalid input: {0}")]
    Invalid(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl StageError {
    pub fn is_cancelled(&self) -> bool {
        matches!(self, StageError::Cancelled)
    }
}

/// Errors that can occur while selecting, assembling or running a pipeline.
#[derive(Error, Debug)]
pub enum PipelineError {
    #[error("unknown mode '{mode}'; valid modes: {}", .valid.join(", "))]
    UnknownMode { mode: String, valid: Vec<String> },

    #[error("mode '{0}' is registered more than once")]
    DuplicateMode(String),

    #[error("invalid topology: {0}")]
    InvalidTopology(#[from] TopologyViolation),

    #[error("duplicate option '{key}' in namespace '{namespace}'")]
    DuplicateOption { namespace: String, key: String },

    #[error("unknown option '{key}' for namespace '{namespace}'")]
    UnknownOption { namespace: String, key: String },

    #[error("override '{key}' does not address a bound namespace")]
    UnknownNamespace { key: String },

    #[error("malformed argument '{arg}' for namespace '{namespace}': expected --key=value")]
    MalformedArgument { namespace: String, arg: String },

    #[error("invalid value '{value}' for option '{namespace}.{key}': {reason}")]
    InvalidOptionValue {
        namespace: String,
        key: String,
        value: String,
        reason: String,
    },

    #[error("missing required option '{namespace}.{key}'")]
    MissingOption { namespace: String, key: String },

    #[error("stage '{namespace}' failed: {source}")]
    StageFatal {
        namespace: String,
        #[source]
        source: StageError,
    },

    #[error("failed to spawn worker for stage '{namespace}': {source}")]
    Spawn {
        namespace: String,
        #[source]
        source: std::io::Error,
    },

    #[error("stages did not stop within the grace period: {}", .namespaces.join(", "))]
    GracePeriodExceeded { namespaces: Vec<String> },
}

impl PipelineError {
    /// Whether this error is raised before any stage has started.
    pub fn is_assembly_error(&self) -> bool {
        !matches!(
            self,
            PipelineError::StageFatal { .. }
                | PipelineError::Spawn { .. }
                | PipelineError::GracePeriodExceeded { .. }
        )
    }
}

pub type PipelineResult<T> = std::result::Result<T, PipelineError>;
pub type StageResult<T> = std::result::Result<T, StageError>;
