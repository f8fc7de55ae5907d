//! Port-level typing for the stage system.
//!
//! Every stage declares the role it plays in the chain and the payload kind
//! of its input and output. The assembler uses these to validate adjacent
//! stages before any channel is created.

use std::fmt;

/// The position a stage may occupy in a linear chain.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StageRole {
    /// Produces messages; has no input.
    Source,
    /// Consumes one message and emits zero or one.
    Processor,
    /// Consumes messages; has no output.
    Sink,
}

impl StageRole {
    pub fn as_str(&self) -> &'static str {
        match self {
            StageRole::Source => "source",
            StageRole::Processor => "processor",
            StageRole::Sink => "sink",
        }
    }

    /// Whether a stage in this role reads from an upstream channel.
    pub fn has_input(&self) -> bool {
        !matches!(self, StageRole::Source)
    }

    /// Whether a stage in this role writes to a downstream channel.
    pub fn has_output(&self) -> bool {
        !matches!(self, StageRole::Sink)
    }
}

impl fmt::Display for StageRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The kind of payload flowing through a port.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PayloadKind {
    /// Opaque byte content (file contents, encoded images, anything).
    Bytes,
    /// A decoded image frame described by width/height/format headers.
    Image,
    /// A UTF-8 JSON document.
    Json,
}

impl PayloadKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            PayloadKind::Bytes => "bytes",
            PayloadKind::Image => "image",
            PayloadKind::Json => "json",
        }
    }

    /// Whether an input port of kind `self` can consume messages of kind `produced`.
    ///
    /// `Bytes` inputs accept every kind; otherwise kinds must match exactly.
    pub fn accepts(self, produced: PayloadKind) -> bool {
        self == produced || self == PayloadKind::Bytes
    }
}

impl fmt::Display for PayloadKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
