//! Built-in stages.
//!
//! These are stand-ins for the external collaborators a vision pipeline
//! composes: a frame grabber and a directory reader as sources, model
//! inference as processors, a viewer and a directory writer as sinks.
//! Each module exposes a static `DESCRIPTOR` and a factory function.

pub mod file_sink;
pub mod file_source;
pub mod frame_grabber;
pub mod image_viewer;
pub mod inference;

use crate::pipeline::{AnyStage, PipelineResult, StageConfig, StageDescriptor, StageFactory};
use std::sync::Arc;

pub use file_sink::file_sink;
pub use file_source::file_source;
pub use frame_grabber::frame_grabber;
pub use image_viewer::image_viewer;
pub use inference::{image_recognition, object_detection, pose_estimation};

type BuildFn = fn(Arc<StageConfig>) -> PipelineResult<AnyStage>;

/// Factory for a stage whose constructor needs nothing beyond its config.
pub struct BuiltinFactory {
    descriptor: &'static StageDescriptor,
    build: BuildFn,
}

impl BuiltinFactory {
    pub fn new(descriptor: &'static StageDescriptor, build: BuildFn) -> Self {
        Self { descriptor, build }
    }

    pub fn shared(descriptor: &'static StageDescriptor, build: BuildFn) -> Arc<dyn StageFactory> {
        Arc::new(Self::new(descriptor, build))
    }
}

impl StageFactory for BuiltinFactory {
    fn descriptor(&self) -> &StageDescriptor {
        self.descriptor
    }

    fn build(&self, config: Arc<StageConfig>) -> PipelineResult<AnyStage> {
        (self.build)(config)
    }
}

/// Every built-in stage, for listings.
pub fn catalog() -> Vec<&'static StageDescriptor> {
    vec![
        &frame_grabber::DESCRIPTOR,
        &file_source::DESCRIPTOR,
        &inference::POSE_ESTIMATION,
        &inference::OBJECT_DETECTION,
        &inference::IMAGE_RECOGNITION,
        &image_viewer::DESCRIPTOR,
        &file_sink::DESCRIPTOR,
    ]
}
