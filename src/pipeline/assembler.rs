use super::cancel::CancellationToken;
use super::channel::{stage_channel, StageInput, StageOutput};
use super::error::{PipelineError, PipelineResult, TopologyViolation};
use super::id::StageId;
use super::options::{parse_args, resolve_options, split_qualified, ConfigBundle, Overrides, StageConfig};
use super::port::StageRole;
use super::runtime::{Pipeline, StageWorker};
use super::spec::{PipelineSpec, StageBinding};
use super::stage::StageContext;
use std::collections::HashSet;
use std::time::{Duration, Instant};

/// Default number of messages buffered between two adjacent stages.
pub const DEFAULT_CHANNEL_CAPACITY: usize = 2;

/// Default time stages get to stop after cancellation.
pub const DEFAULT_GRACE_PERIOD: Duration = Duration::from_secs(2);

/// Knobs applied to every pipeline the assembler builds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AssemblySettings {
    /// Capacity of each inter-stage channel (minimum 1).
    pub channel_capacity: usize,
    /// How long `run()` waits for stages to stop once cancelled.
    pub grace_period: Duration,
}

impl Default for AssemblySettings {
    fn default() -> Self {
        Self {
            channel_capacity: DEFAULT_CHANNEL_CAPACITY,
            grace_period: DEFAULT_GRACE_PERIOD,
        }
    }
}

/// Statistics about an assembled pipeline
#[derive(Debug, Clone, Default)]
pub struct AssemblyStats {
    /// Number of stages, source and sink included
    pub stages: usize,

    /// Number of processor stages
    pub processors: usize,

    /// Number of inter-stage channels
    pub channels: usize,

    /// Number of resolved options across all namespaces
    pub options: usize,

    /// Assembly time in microseconds
    pub assemble_time_us: u64,
}

/// Builds runnable pipelines from specs
#[derive(Debug, Clone, Default)]
pub struct PipelineAssembler {
    settings: AssemblySettings,
    overrides: Overrides,
}

impl PipelineAssembler {
    pub fn new(settings: AssemblySettings) -> Self {
        Self {
            settings,
            overrides: Overrides::new(),
        }
    }

    /// Runtime overrides applied on top of every binding's own arguments.
    pub fn with_overrides(mut self, overrides: Overrides) -> Self {
        self.overrides = overrides;
        self
    }

    pub fn settings(&self) -> &AssemblySettings {
        &self.settings
    }

    /// Check the shape and port types of a spec without building anything.
    pub fn validate(spec: &PipelineSpec) -> PipelineResult<()> {
        Self::validate_topology(spec.bindings())?;
        Ok(())
    }

    /// Assemble a runnable pipeline from a spec.
    ///
    /// Either every step succeeds and a fully wired pipeline is returned, or
    /// nothing is returned. No stage is started and no external resource is
    /// acquired here.
    pub fn assemble(&self, spec: &PipelineSpec) -> PipelineResult<Pipeline> {
        let start_time = Instant::now();
        let bindings = spec.bindings();

        // 1. Shape and type validation
        Self::validate_topology(bindings)?;

        // 2. Namespace resolution into the configuration bundle
        let bundle = self.resolve_bundle(bindings)?;

        // 3. One bounded channel per adjacent pair
        let cancel = CancellationToken::new();
        let (mut inputs, mut outputs) = self.build_channels(bindings.len(), &cancel);

        // 4. Stage instantiation
        let mut workers = Vec::with_capacity(bindings.len());
        for (idx, binding) in bindings.iter().enumerate() {
            let config = bundle.slice(binding.namespace()).cloned().ok_or_else(|| {
                PipelineError::UnknownNamespace {
                    key: binding.namespace().to_string(),
                }
            })?;
            let stage = binding.factory().build(config.clone())?;
            let declared = binding.descriptor().role;
            if stage.role() != declared {
                return Err(TopologyViolation::InconsistentDescriptor {
                    namespace: binding.namespace().to_string(),
                    reason: format!(
                        "'{}' declares role {} but built a {}",
                        binding.descriptor().name,
                        declared,
                        stage.role()
                    ),
                }
                .into());
            }
            workers.push(StageWorker::new(
                StageId::from(idx),
                stage,
                StageContext::new(config, cancel.clone()),
                inputs[idx].take(),
                outputs[idx].take(),
            ));
        }

        let stats = AssemblyStats {
            stages: bindings.len(),
            processors: bindings.len().saturating_sub(2),
            channels: bindings.len().saturating_sub(1),
            options: bundle.len(),
            assemble_time_us: start_time.elapsed().as_micros() as u64,
        };

        tracing::info!(
            "Pipeline assembled: {} ({} stages, {} options, {}us)",
            spec.namespaces().join(" -> "),
            stats.stages,
            stats.options,
            stats.assemble_time_us,
        );
        for (key, value) in bundle.entries() {
            tracing::debug!("  {} = {}", key, value);
        }

        Ok(Pipeline::from_parts(
            workers,
            bundle,
            cancel,
            self.settings,
            stats,
        ))
    }

    /// Enforce `[source, processor*, sink]` with compatible adjacent ports.
    fn validate_topology(bindings: &[StageBinding]) -> Result<(), TopologyViolation> {
        if bindings.is_empty() {
            return Err(TopologyViolation::Empty);
        }

        Self::validate_namespaces(bindings)?;

        for binding in bindings {
            binding.descriptor().check_ports(binding.namespace())?;
        }

        let with_role = |role: StageRole| -> Vec<String> {
            bindings
                .iter()
                .filter(|b| b.descriptor().role == role)
                .map(|b| b.namespace().to_string())
                .collect()
        };

        let sources = with_role(StageRole::Source);
        match sources.len() {
            0 => return Err(TopologyViolation::NoSource),
            1 => {}
            _ => return Err(TopologyViolation::MultipleSources(sources)),
        }

        let sinks = with_role(StageRole::Sink);
        match sinks.len() {
            0 => return Err(TopologyViolation::NoSink),
            1 => {}
            _ => return Err(TopologyViolation::MultipleSinks(sinks)),
        }

        // With exactly one source and one sink, pinning them to the ends
        // leaves only processors in between.
        if bindings[0].descriptor().role != StageRole::Source {
            return Err(TopologyViolation::SourceNotFirst(sources[0].clone()));
        }
        if bindings[bindings.len() - 1].descriptor().role != StageRole::Sink {
            return Err(TopologyViolation::SinkNotLast(sinks[0].clone()));
        }

        for pair in bindings.windows(2) {
            let (up, down) = (&pair[0], &pair[1]);
            if let (Some(produced), Some(expected)) = (up.descriptor().output, down.descriptor().input) {
                if !expected.accepts(produced) {
                    return Err(TopologyViolation::TypeMismatch {
                        upstream: up.namespace().to_string(),
                        produced,
                        downstream: down.namespace().to_string(),
                        expected,
                    });
                }
            }
        }

        Ok(())
    }

    /// Namespaces must be well-formed and unique within one spec
    fn validate_namespaces(bindings: &[StageBinding]) -> Result<(), TopologyViolation> {
        let mut seen = HashSet::new();
        for binding in bindings {
            let ns = binding.namespace();
            if ns.is_empty() || ns.contains('.') || ns.chars().any(char::is_whitespace) {
                return Err(TopologyViolation::InvalidNamespace(ns.to_string()));
            }
            if !seen.insert(ns) {
                return Err(TopologyViolation::DuplicateNamespace(ns.to_string()));
            }
        }
        Ok(())
    }

    /// Flatten every binding's options into one bundle
    fn resolve_bundle(&self, bindings: &[StageBinding]) -> PipelineResult<ConfigBundle> {
        for (qualified, _) in self.overrides.iter() {
            let bound = split_qualified(qualified)
                .map(|(ns, _)| bindings.iter().any(|b| b.namespace() == ns))
                .unwrap_or(false);
            if !bound {
                return Err(PipelineError::UnknownNamespace {
                    key: qualified.to_string(),
                });
            }
        }

        let mut bundle = ConfigBundle::default();
        for binding in bindings {
            let ns = binding.namespace();
            let args = parse_args(ns, binding.args())?;
            let values = resolve_options(ns, binding.descriptor().options, &args, &self.overrides)?;
            bundle.push(StageConfig::new(ns, values));
        }
        Ok(bundle)
    }

    /// Channel `i` connects stage `i` to stage `i + 1`
    fn build_channels(
        &self,
        stages: usize,
        cancel: &CancellationToken,
    ) -> (Vec<Option<StageInput>>, Vec<Option<StageOutput>>) {
        let mut inputs: Vec<Option<StageInput>> = (0..stages).map(|_| None).collect();
        let mut outputs: Vec<Option<StageOutput>> = (0..stages).map(|_| None).collect();
        for idx in 0..stages.saturating_sub(1) {
            let (tx, rx) = stage_channel(self.settings.channel_capacity, cancel);
            outputs[idx] = Some(tx);
            inputs[idx + 1] = Some(rx);
        }
        (inputs, outputs)
    }
}
