//! Declarative description of a linear pipeline.
//!
//! A spec is an ordered list of stage bindings. Building one does not check
//! anything; the assembler validates shape, types and options.
//!
//! ```ignore
//! let spec = PipelineSpec::source(frame_grabber(), "source")
//!     .args(["--width=320", "--height=240"])
//!     .via(pose_estimation(), "pose-estimation")
//!     .args(["--model=/models/pose.pb"])
//!     .to(image_viewer(), "sink")
//!     .args(["--title=Pose Estimation"]);
//! ```

use crate::pipeline::stage::{StageDescriptor, StageFactory};
use std::fmt;
use std::sync::Arc;

/// One stage implementation bound to a namespace and its own arguments.
#[derive(Clone)]
pub struct StageBinding {
    factory: Arc<dyn StageFactory>,
    namespace: String,
    args: Vec<String>,
}

impl StageBinding {
    pub fn new(factory: Arc<dyn StageFactory>, namespace: impl Into<String>) -> Self {
        Self {
            factory,
            namespace: namespace.into(),
            args: Vec::new(),
        }
    }

    /// Append `--key=value` style arguments.
    pub fn with_args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    pub fn args(&self) -> &[String] {
        &self.args
    }

    pub fn descriptor(&self) -> &StageDescriptor {
        self.factory.descriptor()
    }

    pub fn factory(&self) -> &Arc<dyn StageFactory> {
        &self.factory
    }
}

impl fmt::Debug for StageBinding {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StageBinding")
            .field("stage", &self.descriptor().name)
            .field("namespace", &self.namespace)
            .field("args", &self.args)
            .finish()
    }
}

/// Ordered `[source, processor*, sink]` bindings.
#[derive(Debug, Clone, Default)]
pub struct PipelineSpec {
    bindings: Vec<StageBinding>,
}

impl PipelineSpec {
    /// Wrap an arbitrary list of bindings, valid or not.
    pub fn new(bindings: Vec<StageBinding>) -> Self {
        Self { bindings }
    }

    /// Start a spec with its source stage.
    pub fn source(factory: Arc<dyn StageFactory>, namespace: impl Into<String>) -> Self {
        Self::new(vec![StageBinding::new(factory, namespace)])
    }

    /// Append a processor stage.
    pub fn via(mut self, factory: Arc<dyn StageFactory>, namespace: impl Into<String>) -> Self {
        self.bindings.push(StageBinding::new(factory, namespace));
        self
    }

    /// Append the sink stage.
    pub fn to(self, factory: Arc<dyn StageFactory>, namespace: impl Into<String>) -> Self {
        self.via(factory, namespace)
    }

    /// Arguments for the most recently added stage.
    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        if let Some(last) = self.bindings.pop() {
            self.bindings.push(last.with_args(args));
        }
        self
    }

    pub fn bindings(&self) -> &[StageBinding] {
        &self.bindings
    }

    pub fn len(&self) -> usize {
        self.bindings.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bindings.is_empty()
    }

    pub fn namespaces(&self) -> Vec<&str> {
        self.bindings.iter().map(StageBinding::namespace).collect()
    }
}

impl fmt::Display for PipelineSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, binding) in self.bindings.iter().enumerate() {
            if i > 0 {
                writeln!(f, "  |")?;
            }
            let d = binding.descriptor();
            writeln!(f, "[{}] {} ({})", binding.namespace, d.name, d.role)?;
            for arg in &binding.args {
                writeln!(f, "      {}", arg)?;
            }
        }
        Ok(())
    }
}
