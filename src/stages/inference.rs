//! Model inference processors.
//!
//! Three tasks share one processor: pose estimation, object detection and
//! image recognition. Loading and running a model belongs to an
//! [`InferenceBackend`]; the processor resolves where the model lives,
//! selects the named outputs to fetch, post-processes the result and
//! attaches it to the message.
//!
//! In `header` mode the original payload passes through and the JSON
//! result is stored under the `result` header. In `payload` mode the
//! payload is replaced by the JSON result.

use crate::pipeline::message::{HEADER_CONTENT_TYPE, HEADER_RESULT};
use crate::pipeline::{
    AnyStage, Message, OptionKind, OptionSpec, PayloadKind, PipelineResult, Processor, StageConfig,
    StageContext, StageDescriptor, StageError, StageFactory, StageResult, StageRole,
};
use serde_json::{json, Map, Value};
use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};

// ==================== Descriptors ====================

const RESULT_MODES: &[&str] = &["header", "payload"];

static POSE_OPTIONS: &[OptionSpec] = &[
    OptionSpec::new("mode", OptionKind::Choice(RESULT_MODES), "header", "Where the result goes"),
    OptionSpec::required("model", OptionKind::String, "Model location (path or http(s) URL)"),
    OptionSpec::new("model_fetch", OptionKind::List, "", "Model outputs to extract"),
    OptionSpec::new(
        "body_drawing_color_schema",
        OptionKind::Choice(&["monochrome", "bodyparts", "limbs"]),
        "bodyparts",
        "Colouring used when drawing bodies",
    ),
    OptionSpec::new("draw_part_labels", OptionKind::Bool, "false", "Label body parts"),
];

static DETECTION_OPTIONS: &[OptionSpec] = &[
    OptionSpec::new("mode", OptionKind::Choice(RESULT_MODES), "header", "Where the result goes"),
    OptionSpec::required("model", OptionKind::String, "Model location (path or http(s) URL)"),
    OptionSpec::new("model_fetch", OptionKind::List, "", "Model outputs to extract"),
    OptionSpec::new("labels", OptionKind::String, "", "Label map location"),
    OptionSpec::new("confidence", OptionKind::Float, "0.4", "Minimum detection score"),
];

static RECOGNITION_OPTIONS: &[OptionSpec] = &[
    OptionSpec::new("mode", OptionKind::Choice(RESULT_MODES), "header", "Where the result goes"),
    OptionSpec::required("model", OptionKind::String, "Model location (path or http(s) URL)"),
    OptionSpec::new("model_fetch", OptionKind::List, "", "Model outputs to extract"),
    OptionSpec::new("labels", OptionKind::String, "", "Label list location"),
    OptionSpec::new("response_size", OptionKind::Int, "5", "Number of top labels kept"),
];

pub static POSE_ESTIMATION: StageDescriptor = StageDescriptor {
    name: "pose-estimation",
    role: StageRole::Processor,
    input: Some(PayloadKind::Bytes),
    output: Some(PayloadKind::Bytes),
    options: POSE_OPTIONS,
    description: "Estimates body poses in each frame",
};

pub static OBJECT_DETECTION: StageDescriptor = StageDescriptor {
    name: "object-detection",
    role: StageRole::Processor,
    input: Some(PayloadKind::Bytes),
    output: Some(PayloadKind::Bytes),
    options: DETECTION_OPTIONS,
    description: "Detects and classifies objects in each frame",
};

pub static IMAGE_RECOGNITION: StageDescriptor = StageDescriptor {
    name: "image-recognition",
    role: StageRole::Processor,
    input: Some(PayloadKind::Bytes),
    output: Some(PayloadKind::Bytes),
    options: RECOGNITION_OPTIONS,
    description: "Labels the content of each image",
};

/// Which model family a processor runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InferenceTask {
    PoseEstimation,
    ObjectDetection,
    ImageRecognition,
}

impl InferenceTask {
    pub fn as_str(self) -> &'static str {
        self.descriptor().name
    }

    pub fn descriptor(self) -> &'static StageDescriptor {
        match self {
            InferenceTask::PoseEstimation => &POSE_ESTIMATION,
            InferenceTask::ObjectDetection => &OBJECT_DETECTION,
            InferenceTask::ImageRecognition => &IMAGE_RECOGNITION,
        }
    }
}

impl fmt::Display for InferenceTask {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ==================== Model Location ====================

/// Where a model or label resource lives.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ModelSource {
    Local(PathBuf),
    Remote(String),
}

impl ModelSource {
    /// Resolve a configured location. Local files must exist; only http(s)
    /// is accepted as a remote scheme.
    pub fn resolve(raw: &str, what: &str) -> StageResult<Self> {
        let raw = raw.trim();
        if raw.is_empty() {
            return Err(StageError::Invalid(format!("empty {} location", what)));
        }
        if raw.starts_with("http://") || raw.starts_with("https://") {
            return Ok(ModelSource::Remote(raw.to_string()));
        }

        let local = raw
            .strip_prefix("file://")
            .or_else(|| raw.strip_prefix("file:"))
            .unwrap_or(raw);
        if local.contains("://") {
            return Err(StageError::Invalid(format!(
                "unsupported {} location '{}'",
                what, raw
            )));
        }

        let path = PathBuf::from(local);
        if !path.is_file() {
            return Err(StageError::Unavailable(format!("{} {}", what, path.display())));
        }
        Ok(ModelSource::Local(path))
    }

    pub fn is_remote(&self) -> bool {
        matches!(self, ModelSource::Remote(_))
    }
}

impl fmt::Display for ModelSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ModelSource::Local(path) => write!(f, "{}", path.display()),
            ModelSource::Remote(url) => f.write_str(url),
        }
    }
}

// ==================== Backend ====================

/// Loads a model and evaluates it on one input.
#[cfg_attr(test, mockall::automock)]
pub trait InferenceBackend: Send {
    /// Prepare the model. Failure is fatal for the stage.
    fn load(&mut self, model: &ModelSource) -> StageResult<()>;

    /// Run the model on `input`, returning the requested named outputs as
    /// a JSON object.
    fn infer(&mut self, input: &[u8], outputs: &[String]) -> StageResult<Value>;
}

/// Backend that reports every requested output with no detections.
#[derive(Debug, Default)]
pub struct NullBackend {
    model: Option<ModelSource>,
}

impl InferenceBackend for NullBackend {
    fn load(&mut self, model: &ModelSource) -> StageResult<()> {
        self.model = Some(model.clone());
        Ok(())
    }

    fn infer(&mut self, _input: &[u8], outputs: &[String]) -> StageResult<Value> {
        if self.model.is_none() {
            return Err(StageError::Invalid("no model loaded".into()));
        }
        let map: Map<String, Value> = outputs
            .iter()
            .map(|name| (name.clone(), Value::Array(Vec::new())))
            .collect();
        Ok(Value::Object(map))
    }
}

/// Creates one backend per stage instance.
pub type BackendProvider = Arc<dyn Fn() -> Box<dyn InferenceBackend> + Send + Sync>;

fn null_provider() -> BackendProvider {
    Arc::new(|| Box::new(NullBackend::default()) as Box<dyn InferenceBackend>)
}

// ==================== Factory ====================

pub struct InferenceFactory {
    task: InferenceTask,
    provider: BackendProvider,
}

impl InferenceFactory {
    pub fn new(task: InferenceTask, provider: BackendProvider) -> Self {
        Self { task, provider }
    }
}

impl StageFactory for InferenceFactory {
    fn descriptor(&self) -> &StageDescriptor {
        self.task.descriptor()
    }

    fn build(&self, config: Arc<StageConfig>) -> PipelineResult<AnyStage> {
        let processor = InferenceProcessor::new(self.task, &config, (self.provider)())?;
        Ok(AnyStage::Processor(Box::new(processor)))
    }
}

pub fn pose_estimation() -> Arc<dyn StageFactory> {
    with_backend(InferenceTask::PoseEstimation, null_provider())
}

pub fn object_detection() -> Arc<dyn StageFactory> {
    with_backend(InferenceTask::ObjectDetection, null_provider())
}

pub fn image_recognition() -> Arc<dyn StageFactory> {
    with_backend(InferenceTask::ImageRecognition, null_provider())
}

/// Factory for `task` backed by a custom inference backend.
pub fn with_backend(task: InferenceTask, provider: BackendProvider) -> Arc<dyn StageFactory> {
    Arc::new(InferenceFactory::new(task, provider))
}

// ==================== Processor ====================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ResultMode {
    Header,
    Payload,
}

/// Task-specific settings.
#[derive(Debug, Clone)]
enum TaskSettings {
    Pose { color_schema: String, part_labels: bool },
    Detection { labels: String, confidence: f64 },
    Recognition { labels: String, response_size: usize },
}

struct InferenceProcessor {
    task: InferenceTask,
    backend: Box<dyn InferenceBackend>,
    mode: ResultMode,
    model_location: String,
    outputs: Vec<String>,
    settings: TaskSettings,
    labels: Option<ModelSource>,
    processed: u64,
    busy: Duration,
}

impl InferenceProcessor {
    fn new(
        task: InferenceTask,
        config: &StageConfig,
        backend: Box<dyn InferenceBackend>,
    ) -> PipelineResult<Self> {
        let settings = match task {
            InferenceTask::PoseEstimation => TaskSettings::Pose {
                color_schema: config.str("body_drawing_color_schema")?.to_string(),
                part_labels: config.bool("draw_part_labels")?,
            },
            InferenceTask::ObjectDetection => TaskSettings::Detection {
                labels: config.str("labels")?.to_string(),
                confidence: config.float("confidence")?,
            },
            InferenceTask::ImageRecognition => TaskSettings::Recognition {
                labels: config.str("labels")?.to_string(),
                response_size: config.uint("response_size")? as usize,
            },
        };
        let mode = match config.str("mode")? {
            "payload" => ResultMode::Payload,
            _ => ResultMode::Header,
        };
        Ok(Self {
            task,
            backend,
            mode,
            model_location: config.str("model")?.to_string(),
            outputs: config.list("model_fetch")?.to_vec(),
            settings,
            labels: None,
            processed: 0,
            busy: Duration::ZERO,
        })
    }

    fn average_latency(&self) -> Option<Duration> {
        (self.processed > 0).then(|| self.busy.div_f64(self.processed as f64))
    }

    fn label_location(&self) -> Option<&str> {
        match &self.settings {
            TaskSettings::Detection { labels, .. } | TaskSettings::Recognition { labels, .. } => {
                Some(labels.as_str()).filter(|l| !l.trim().is_empty())
            }
            TaskSettings::Pose { .. } => None,
        }
    }

    /// Task-specific filtering of the raw backend output.
    fn post_process(&self, mut outputs: Value) -> Value {
        match &self.settings {
            TaskSettings::Detection { confidence, .. } => {
                if let Some(detections) = outputs.get_mut("detections").and_then(Value::as_array_mut) {
                    detections.retain(|d| score(d) >= *confidence);
                }
            }
            TaskSettings::Recognition { response_size, .. } => {
                if let Some(labels) = outputs.get_mut("labels").and_then(Value::as_array_mut) {
                    labels.sort_by(|a, b| score(b).total_cmp(&score(a)));
                    labels.truncate(*response_size);
                }
            }
            TaskSettings::Pose { .. } => {}
        }
        outputs
    }

    fn envelope(&self, seq: u64, outputs: Value) -> Value {
        let mut result = json!({
            "task": self.task.as_str(),
            "seq": seq,
            "model": self.model_location,
            "outputs": outputs,
        });
        if let Some(labels) = &self.labels {
            result["labels"] = Value::String(labels.to_string());
        }
        if let TaskSettings::Pose { color_schema, part_labels } = &self.settings {
            result["body_drawing_color_schema"] = Value::String(color_schema.clone());
            result["draw_part_labels"] = Value::Bool(*part_labels);
        }
        result
    }
}

fn score(value: &Value) -> f64 {
    value.get("score").and_then(Value::as_f64).unwrap_or(0.0)
}

impl Processor for InferenceProcessor {
    fn on_start(&mut self, ctx: &StageContext) -> StageResult<()> {
        let model = ModelSource::resolve(&self.model_location, "model")?;
        if let Some(location) = self.label_location() {
            self.labels = Some(ModelSource::resolve(location, "labels")?);
        }
        tracing::info!(
            "[{}] loading {} model from {}{}",
            ctx.namespace(),
            self.task,
            model,
            if model.is_remote() { " (remote)" } else { "" }
        );
        self.backend.load(&model)?;
        Ok(())
    }

    fn process(&mut self, mut message: Message, ctx: &StageContext) -> StageResult<Option<Message>> {
        let start = Instant::now();
        let raw = self.backend.infer(&message.payload, &self.outputs)?;
        let result = self.envelope(message.seq, self.post_process(raw));
        self.busy += start.elapsed();
        self.processed += 1;

        tracing::debug!(
            "[{}] frame {} inferred in {:?}",
            ctx.namespace(),
            message.seq,
            start.elapsed()
        );

        match self.mode {
            ResultMode::Header => message.set_header(HEADER_RESULT, result.to_string()),
            ResultMode::Payload => {
                message.payload = serde_json::to_vec(&result)
                    .map_err(|e| StageError::Invalid(format!("result encoding: {}", e)))?;
                message.kind = PayloadKind::Json;
                message.set_header(HEADER_CONTENT_TYPE, "application/json");
            }
        }
        Ok(Some(message))
    }

    fn on_stop(&mut self, ctx: &StageContext) {
        if let Some(average) = self.average_latency() {
            tracing::info!(
                "[{}] {} frames, {:?} average inference time",
                ctx.namespace(),
                self.processed,
                average
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stages::testing;

    fn model_file() -> (tempfile::TempDir, String) {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("graph.pb");
        std::fs::write(&path, b"model").unwrap();
        let location = path.display().to_string();
        (dir, location)
    }

    fn processor(
        task: InferenceTask,
        args: &[(&str, &str)],
        backend: Box<dyn InferenceBackend>,
    ) -> (InferenceProcessor, StageContext) {
        let config = testing::config(task.as_str(), task.descriptor().options, args).unwrap();
        let ctx = testing::context(&config);
        (InferenceProcessor::new(task, &config, backend).unwrap(), ctx)
    }

    fn frame() -> Message {
        Message::new(7, PayloadKind::Image, vec![1, 2, 3])
    }

    #[test]
    fn test_resolve_model_locations() {
        let (_dir, local) = model_file();
        assert!(matches!(ModelSource::resolve(&local, "model"), Ok(ModelSource::Local(_))));
        assert!(matches!(
            ModelSource::resolve(&format!("file:{}", local), "model"),
            Ok(ModelSource::Local(_))
        ));
        assert_eq!(
            ModelSource::resolve("https://dl.bintray.com/big-data/generic/graph.pb", "model").unwrap(),
            ModelSource::Remote("https://dl.bintray.com/big-data/generic/graph.pb".into())
        );
        assert!(matches!(
            ModelSource::resolve("/definitely/not/here.pb", "model"),
            Err(StageError::Unavailable(_))
        ));
        assert!(matches!(
            ModelSource::resolve("ftp://host/graph.pb", "model"),
            Err(StageError::Invalid(_))
        ));
        assert!(matches!(ModelSource::resolve("  ", "model"), Err(StageError::Invalid(_))));
    }

    #[test]
    fn test_header_mode_keeps_payload() {
        let (_dir, model) = model_file();
        let (mut p, ctx) = processor(
            InferenceTask::PoseEstimation,
            &[("model", model.as_str()), ("model_fetch", "Openpose/concat_stage7")],
            Box::new(NullBackend::default()),
        );
        p.on_start(&ctx).unwrap();

        let out = p.process(frame(), &ctx).unwrap().unwrap();
        assert_eq!(out.payload, vec![1, 2, 3]);
        assert_eq!(out.kind, PayloadKind::Image);

        let result: Value = serde_json::from_str(out.header(HEADER_RESULT).unwrap()).unwrap();
        assert_eq!(result["task"], "pose-estimation");
        assert_eq!(result["seq"], 7);
        assert_eq!(result["body_drawing_color_schema"], "bodyparts");
        assert!(result["outputs"]["Openpose/concat_stage7"].is_array());
    }

    #[test]
    fn test_payload_mode_replaces_payload() {
        let (mut p, ctx) = processor(
            InferenceTask::ObjectDetection,
            &[
                ("model", "http://models.example/ssd.pb"),
                ("mode", "payload"),
                ("model_fetch", "detection_scores,num_detections"),
            ],
            Box::new(NullBackend::default()),
        );
        p.on_start(&ctx).unwrap();

        let out = p.process(frame(), &ctx).unwrap().unwrap();
        assert_eq!(out.kind, PayloadKind::Json);
        assert_eq!(out.header(HEADER_CONTENT_TYPE), Some("application/json"));
        let result: Value = serde_json::from_slice(&out.payload).unwrap();
        assert_eq!(result["task"], "object-detection");
        assert_eq!(result["outputs"]["num_detections"], json!([]));
    }

    #[test]
    fn test_average_latency_over_many_frames() {
        let (mut p, _ctx) = processor(
            InferenceTask::PoseEstimation,
            &[("model", "http://models.example/pose.pb")],
            Box::new(NullBackend::default()),
        );
        assert_eq!(p.average_latency(), None);

        p.processed = 1 << 32;
        p.busy = Duration::from_secs(1 << 32);
        assert_eq!(p.average_latency(), Some(Duration::from_secs(1)));

        p.processed = 4;
        p.busy = Duration::from_millis(100);
        assert_eq!(p.average_latency(), Some(Duration::from_millis(25)));
    }

    #[test]
    fn test_missing_model_is_fatal_on_start() {
        let mut backend = MockInferenceBackend::new();
        backend.expect_load().never();
        let (mut p, ctx) = processor(
            InferenceTask::ImageRecognition,
            &[("model", "/no/such/inception.pb")],
            Box::new(backend),
        );
        assert!(matches!(p.on_start(&ctx), Err(StageError::Unavailable(_))));
    }

    #[test]
    fn test_backend_load_failure_propagates() {
        let mut backend = MockInferenceBackend::new();
        backend
            .expect_load()
            .times(1)
            .returning(|_| Err(StageError::Resource("graph is corrupt".into())));
        let (mut p, ctx) = processor(
            InferenceTask::ObjectDetection,
            &[("model", "https://models.example/ssd.pb")],
            Box::new(backend),
        );
        assert!(matches!(p.on_start(&ctx), Err(StageError::Resource(_))));
    }

    #[test]
    fn test_detections_below_confidence_are_dropped() {
        let mut backend = MockInferenceBackend::new();
        backend.expect_load().returning(|_| Ok(()));
        backend
            .expect_infer()
            .times(1)
            .returning(|_, _| {
                Ok(json!({
                    "detections": [
                        {"class": "person", "score": 0.9},
                        {"class": "kite", "score": 0.1},
                        {"class": "dog", "score": 0.5},
                    ]
                }))
            });
        let (mut p, ctx) = processor(
            InferenceTask::ObjectDetection,
            &[("model", "https://models.example/ssd.pb"), ("confidence", "0.5")],
            Box::new(backend),
        );
        p.on_start(&ctx).unwrap();

        let out = p.process(frame(), &ctx).unwrap().unwrap();
        let result: Value = serde_json::from_str(out.header(HEADER_RESULT).unwrap()).unwrap();
        let classes: Vec<_> = result["outputs"]["detections"]
            .as_array()
            .unwrap()
            .iter()
            .map(|d| d["class"].as_str().unwrap())
            .collect();
        assert_eq!(classes, vec!["person", "dog"]);
    }

    #[test]
    fn test_recognition_keeps_top_labels() {
        let mut backend = MockInferenceBackend::new();
        backend.expect_load().returning(|_| Ok(()));
        backend.expect_infer().returning(|_, outputs| {
            assert_eq!(outputs, ["output".to_string()]);
            Ok(json!({
                "labels": [
                    {"label": "tabby", "score": 0.2},
                    {"label": "tiger cat", "score": 0.7},
                    {"label": "lynx", "score": 0.05},
                ]
            }))
        });
        let (mut p, ctx) = processor(
            InferenceTask::ImageRecognition,
            &[
                ("model", "https://models.example/inception.pb"),
                ("labels", "https://models.example/labels.txt"),
                ("model_fetch", "output"),
                ("response_size", "2"),
            ],
            Box::new(backend),
        );
        p.on_start(&ctx).unwrap();

        let out = p.process(frame(), &ctx).unwrap().unwrap();
        let result: Value = serde_json::from_str(out.header(HEADER_RESULT).unwrap()).unwrap();
        assert_eq!(result["labels"], "https://models.example/labels.txt");
        let labels = result["outputs"]["labels"].as_array().unwrap();
        assert_eq!(labels.len(), 2);
        assert_eq!(labels[0]["label"], "tiger cat");
    }

    #[test]
    fn test_inference_error_fails_stage() {
        let mut backend = MockInferenceBackend::new();
        backend.expect_load().returning(|_| Ok(()));
        backend
            .expect_infer()
            .returning(|_, _| Err(StageError::Resource("device lost".into())));
        let (mut p, ctx) = processor(
            InferenceTask::PoseEstimation,
            &[("model", "https://models.example/pose.pb")],
            Box::new(backend),
        );
        p.on_start(&ctx).unwrap();
        assert!(p.process(frame(), &ctx).is_err());
    }

    #[test]
    fn test_null_backend_requires_load() {
        let mut backend = NullBackend::default();
        assert!(backend.infer(&[], &["output".to_string()]).is_err());
    }

    #[test]
    fn test_unknown_color_schema_rejected() {
        let err = testing::config(
            "pose-estimation",
            POSE_OPTIONS,
            &[("model", "x"), ("body_drawing_color_schema", "rainbow")],
        )
        .unwrap_err();
        assert!(err.to_string().contains("body_drawing_color_schema"));
    }
}
