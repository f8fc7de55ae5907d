//! Mode selection.
//!
//! A mode is a named recipe for one [`PipelineSpec`]. The registry maps
//! identifiers to those recipes and owns the single default mode. Lookups
//! normalise case and treat `-` and `_` alike, so `Object-Detection` and
//! `object_detection` select the same mode. An identifier that matches
//! nothing is an error; the default is only used when no mode is given.

use crate::pipeline::{PipelineAssembler, PipelineError, PipelineResult, PipelineSpec};
use crate::stages::{
    file_sink, file_source, frame_grabber, image_recognition, image_viewer, object_detection,
    pose_estimation,
};
use std::collections::HashSet;
use std::fmt;
use std::sync::Arc;

/// Mode used when neither the command line, the environment nor the config
/// file names one.
pub const DEFAULT_MODE: &str = "pose_estimation";

const FRAME_GRABBER_ARGUMENTS: [&str; 3] = [
    "--width=320",
    "--height=240",
    "--capture_interval_ms=100",
];

const POSE_MODEL: &str = "https://dl.bintray.com/big-data/generic/2018-30-05-mobilenet_thin_graph_opt.pb";
const SSD_MODEL: &str = "https://dl.bintray.com/big-data/generic/ssd_mobilenet_v1_ppn_shared_box_predictor_300x300_coco14_sync_2018_07_03_frozen_inference_graph.pb";
const MASK_RCNN_MODEL: &str = "http://dl.bintray.com/big-data/generic/mask_rcnn_inception_v2_coco_2018_01_28_frozen_inference_graph.pb";
const INCEPTION_MODEL: &str = "https://dl.bintray.com/big-data/generic/tensorflow_inception_graph.pb";
const MSCOCO_LABELS: &str = "http://dl.bintray.com/big-data/generic/mscoco_label_map.pbtxt";
const IMAGENET_LABELS: &str = "https://dl.bintray.com/big-data/generic/imagenet_comp_graph_label_strings.txt";

/// Builds the spec of one mode.
pub type SpecFactory = Arc<dyn Fn() -> PipelineSpec + Send + Sync>;

/// Canonical form of a mode identifier.
pub fn normalize(identifier: &str) -> String {
    identifier.trim().to_ascii_lowercase().replace('-', "_")
}

#[derive(Clone)]
struct ModeEntry {
    name: String,
    description: &'static str,
    factory: SpecFactory,
}

/// A mode chosen for this run.
#[derive(Debug, Clone)]
pub struct SelectedMode {
    pub name: String,
    /// Whether the name came from the default rather than the caller.
    pub defaulted: bool,
    pub spec: PipelineSpec,
}

/// Identifier → pipeline spec table with one default.
#[derive(Clone)]
pub struct ModeRegistry {
    modes: Vec<ModeEntry>,
    default: String,
}

impl ModeRegistry {
    /// An empty registry whose default is `default`.
    pub fn new(default: &str) -> Self {
        Self {
            modes: Vec::new(),
            default: normalize(default),
        }
    }

    /// The four inference demos plus the file-to-file batch variant.
    pub fn builtin() -> Self {
        Self::new(DEFAULT_MODE)
            .with_mode(
                "pose_estimation",
                "Camera frames through body pose estimation to the viewer",
                pose_estimation_spec,
            )
            .with_mode(
                "object_detection",
                "Camera frames through SSD object detection to the viewer",
                object_detection_spec,
            )
            .with_mode(
                "instance_segmentation",
                "Camera frames through Mask R-CNN instance segmentation to the viewer",
                instance_segmentation_spec,
            )
            .with_mode(
                "image_recognition",
                "Images from /tmp/input through Inception recognition to the viewer",
                image_recognition_spec,
            )
            .with_mode(
                "pose_estimation_files",
                "Images from /tmp/input through pose estimation into /tmp/output",
                pose_estimation_files_spec,
            )
    }

    /// Register a mode. Duplicates are reported by [`ModeRegistry::validate`].
    pub fn with_mode<F>(mut self, name: &str, description: &'static str, factory: F) -> Self
    where
        F: Fn() -> PipelineSpec + Send + Sync + 'static,
    {
        self.modes.push(ModeEntry {
            name: normalize(name),
            description,
            factory: Arc::new(factory),
        });
        self
    }

    pub fn default_mode(&self) -> &str {
        &self.default
    }

    /// Registered identifiers, in registration order.
    pub fn names(&self) -> Vec<String> {
        self.modes.iter().map(|m| m.name.clone()).collect()
    }

    /// `(identifier, description)` pairs for listings.
    pub fn descriptions(&self) -> Vec<(&str, &'static str)> {
        self.modes
            .iter()
            .map(|m| (m.name.as_str(), m.description))
            .collect()
    }

    pub fn contains(&self, identifier: &str) -> bool {
        self.find(identifier).is_some()
    }

    fn find(&self, identifier: &str) -> Option<&ModeEntry> {
        let wanted = normalize(identifier);
        self.modes.iter().find(|m| m.name == wanted)
    }

    fn unknown(&self, identifier: &str) -> PipelineError {
        let mut valid = self.names();
        valid.sort();
        PipelineError::UnknownMode {
            mode: identifier.to_string(),
            valid,
        }
    }

    /// Spec for a registered identifier.
    pub fn spec(&self, identifier: &str) -> PipelineResult<PipelineSpec> {
        self.find(identifier)
            .map(|m| (m.factory)())
            .ok_or_else(|| self.unknown(identifier))
    }

    /// Pick the mode for this run: `requested` if given, the default
    /// otherwise. An unregistered identifier never falls back.
    pub fn select(&self, requested: Option<&str>) -> PipelineResult<SelectedMode> {
        let (identifier, defaulted) = match requested {
            Some(mode) => (mode, false),
            None => (self.default.as_str(), true),
        };
        let entry = self.find(identifier).ok_or_else(|| self.unknown(identifier))?;
        Ok(SelectedMode {
            name: entry.name.clone(),
            defaulted,
            spec: (entry.factory)(),
        })
    }

    /// Startup check: identifiers are unique, the default is registered,
    /// and every spec has a valid topology.
    pub fn validate(&self) -> PipelineResult<()> {
        let mut seen = HashSet::new();
        for mode in &self.modes {
            if !seen.insert(mode.name.as_str()) {
                return Err(PipelineError::DuplicateMode(mode.name.clone()));
            }
        }
        if !self.contains(&self.default) {
            return Err(self.unknown(&self.default));
        }
        for mode in &self.modes {
            PipelineAssembler::validate(&(mode.factory)())?;
        }
        Ok(())
    }
}

impl Default for ModeRegistry {
    fn default() -> Self {
        Self::builtin()
    }
}

impl fmt::Debug for ModeRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ModeRegistry")
            .field("modes", &self.names())
            .field("default", &self.default)
            .finish()
    }
}

// ==================== Built-in Specs ====================

pub fn pose_estimation_spec() -> PipelineSpec {
    PipelineSpec::source(frame_grabber(), "source")
        .args(FRAME_GRABBER_ARGUMENTS)
        .via(pose_estimation(), "pose-estimation")
        .args([
            "--mode=header".to_string(),
            "--model_fetch=Openpose/concat_stage7".to_string(),
            format!("--model={}", POSE_MODEL),
            "--body_drawing_color_schema=monochrome".to_string(),
        ])
        .to(image_viewer(), "sink")
        .args(["--title=Pose Estimation"])
}

pub fn object_detection_spec() -> PipelineSpec {
    PipelineSpec::source(frame_grabber(), "source")
        .args(FRAME_GRABBER_ARGUMENTS)
        .via(object_detection(), "object-detection")
        .args([
            "--mode=header".to_string(),
            format!("--model={}", SSD_MODEL),
            "--model_fetch=detection_scores,detection_classes,detection_boxes,num_detections"
                .to_string(),
            format!("--labels={}", MSCOCO_LABELS),
        ])
        .to(image_viewer(), "sink")
        .args(["--title=Object Detection"])
}

pub fn instance_segmentation_spec() -> PipelineSpec {
    PipelineSpec::source(frame_grabber(), "source")
        .args(FRAME_GRABBER_ARGUMENTS)
        .via(object_detection(), "instance-segmentation")
        .args([
            "--mode=header".to_string(),
            format!("--model={}", MASK_RCNN_MODEL),
            "--model_fetch=detection_scores,detection_classes,detection_boxes,detection_masks,num_detections"
                .to_string(),
            format!("--labels={}", MSCOCO_LABELS),
        ])
        .to(image_viewer(), "sink")
        .args(["--title=Instance Segmentation"])
}

pub fn image_recognition_spec() -> PipelineSpec {
    PipelineSpec::source(file_source(), "source")
        .args(["--directory=/tmp/input", "--mode=contents"])
        .via(image_recognition(), "image-recognition")
        .args([
            "--mode=header".to_string(),
            "--model_fetch=output".to_string(),
            format!("--model={}", INCEPTION_MODEL),
            format!("--labels={}", IMAGENET_LABELS),
        ])
        .to(image_viewer(), "sink")
        .args(["--title=Image Recognition"])
}

pub fn pose_estimation_files_spec() -> PipelineSpec {
    PipelineSpec::source(file_source(), "source")
        .args(["--directory=/tmp/input", "--mode=contents"])
        .via(pose_estimation(), "pose")
        .args(["--mode=header".to_string(), format!("--model={}", POSE_MODEL)])
        .to(file_sink(), "sink")
        .args(["--directory=/tmp/output", "--name_header=file_name"])
}
