//! Error handling for the vision-stream application
//!
//! Engine errors live in [`crate::pipeline::error`]; this module wraps them
//! together with the configuration and IO failures of the application shell.

use crate::pipeline::PipelineError;
use thiserror::Error;

/// Main error type for vision-stream operations
#[derive(Error, Debug)]
pub enum AppError {
    /// Errors from mode selection, assembly or a running pipeline
    #[error(transparent)]
    Pipeline(#[from] PipelineError),

    /// Errors related to configuration loading/saving
    #[error("Configuration error: {0}")]
    Config(String),

    /// Errors related to logging setup
    #[error("Logging error: {0}")]
    Logging(String),

    /// Errors installing the interrupt handler
    #[error("Signal handler error: {0}")]
    Signal(String),

    /// IO errors
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization errors
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Generic errors with context
    #[error("{context}: {source}")]
    WithContext {
        context: String,
        #[source]
        source: Box<AppError>,
    },
}

impl AppError {
    /// Add context to an error
    pub fn with_context(self, context: impl Into<String>) -> Self {
        AppError::WithContext {
            context: context.into(),
            source: Box::new(self),
        }
    }

    /// The pipeline error at the root of this error, if any.
    pub fn pipeline(&self) -> Option<&PipelineError> {
        match self {
            AppError::Pipeline(e) => Some(e),
            AppError::WithContext { source, .. } => source.pipeline(),
            _ => None,
        }
    }
}

impl From<toml::de::Error> for AppError {
    fn from(err: toml::de::Error) -> Self {
        AppError::Config(err.to_string())
    }
}

impl From<toml::ser::Error> for AppError {
    fn from(err: toml::ser::Error) -> Self {
        AppError::Serialization(err.to_string())
    }
}

/// Result type alias for vision-stream operations
pub type Result<T> = std::result::Result<T, AppError>;

/// Extension trait for adding context to Results
pub trait ResultExt<T> {
    /// Add context to an error result
    fn context(self, context: impl Into<String>) -> Result<T>;

    /// Add context lazily to an error result
    fn with_context<F>(self, f: F) -> Result<T>
    where
        F: FnOnce() -> String;
}

impl<T, E> ResultExt<T> for std::result::Result<T, E>
where
    E: Into<AppError>,
{
    fn context(self, context: impl Into<String>) -> Result<T> {
        self.map_err(|e| e.into().with_context(context))
    }

    fn with_context<F>(self, f: F) -> Result<T>
    where
        F: FnOnce() -> String,
    {
        self.map_err(|e| e.into().with_context(f()))
    }
}
