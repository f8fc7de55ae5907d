//! Pipeline runtime: one worker thread per stage.
//!
//! Each worker runs its stage through `Created → Running → Draining →
//! Stopped`:
//! 1. `on_start` acquires the stage's resources.
//! 2. The loop pulls from the input channel (or the source) and pushes to
//!    the output channel until the upstream closes.
//! 3. `on_stop` releases resources, then the output handle is dropped so
//!    the downstream stage sees end-of-stream.
//!
//! The first stage-fatal error, a panic included, cancels every other stage.
//! Once cancelled, `run()` waits at most the grace period for the workers to
//! report back.

use super::assembler::{AssemblySettings, AssemblyStats};
use super::cancel::{CancellationToken, Canceller};
use super::channel::{StageInput, StageOutput};
use super::error::{PipelineError, PipelineResult, StageError, StageResult};
use super::id::StageId;
use super::options::ConfigBundle;
use super::port::StageRole;
use super::stage::{AnyStage, StageContext};
use crossbeam_channel::{select, unbounded, Receiver, RecvTimeoutError, Sender};
use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

/// Lifecycle state of one stage worker.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum StageState {
    Created = 0,
    Running = 1,
    Draining = 2,
    Stopped = 3,
}

impl StageState {
    fn from_u8(value: u8) -> Self {
        match value {
            0 => StageState::Created,
            1 => StageState::Running,
            2 => StageState::Draining,
            _ => StageState::Stopped,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            StageState::Created => "created",
            StageState::Running => "running",
            StageState::Draining => "draining",
            StageState::Stopped => "stopped",
        }
    }
}

impl fmt::Display for StageState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Per-stage states shared between the workers and any observer.
#[derive(Debug)]
struct StateTable {
    namespaces: Vec<String>,
    states: Vec<AtomicU8>,
}

impl StateTable {
    fn set(&self, id: StageId, state: StageState) {
        if let Some(slot) = self.states.get(id.index()) {
            slot.store(state as u8, Ordering::Release);
        }
    }

    fn snapshot(&self) -> Vec<(String, StageState)> {
        self.namespaces
            .iter()
            .zip(&self.states)
            .map(|(ns, s)| (ns.clone(), StageState::from_u8(s.load(Ordering::Acquire))))
            .collect()
    }
}

/// Read-only view of stage states that outlives `Pipeline::run`.
#[derive(Debug, Clone)]
pub struct StateWatcher {
    table: Arc<StateTable>,
}

impl StateWatcher {
    /// `(namespace, state)` for every stage, in chain order.
    pub fn states(&self) -> Vec<(String, StageState)> {
        self.table.snapshot()
    }

    pub fn state_of(&self, namespace: &str) -> Option<StageState> {
        self.states()
            .into_iter()
            .find(|(ns, _)| ns == namespace)
            .map(|(_, state)| state)
    }

    pub fn all_stopped(&self) -> bool {
        self.states().iter().all(|(_, s)| *s == StageState::Stopped)
    }
}

/// How a run ended without error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunOutcome {
    /// The source was exhausted and every stage drained.
    Drained,
    /// Cancellation was requested from outside the pipeline.
    Cancelled,
}

/// Message counts for one stage after a run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StageStats {
    pub namespace: String,
    pub role: StageRole,
    /// Messages taken from the input channel.
    pub received: u64,
    /// Messages pushed downstream, or consumed for a sink.
    pub emitted: u64,
}

/// Result of a run that did not fail.
#[derive(Debug, Clone)]
pub struct RunReport {
    pub outcome: RunOutcome,
    pub stages: Vec<StageStats>,
    pub elapsed: Duration,
}

impl RunReport {
    pub fn stage(&self, namespace: &str) -> Option<&StageStats> {
        self.stages.iter().find(|s| s.namespace == namespace)
    }
}

/// A constructed stage together with its channel handles.
pub struct StageWorker {
    id: StageId,
    stage: AnyStage,
    ctx: StageContext,
    input: Option<StageInput>,
    output: Option<StageOutput>,
}

impl StageWorker {
    pub(crate) fn new(
        id: StageId,
        stage: AnyStage,
        ctx: StageContext,
        input: Option<StageInput>,
        output: Option<StageOutput>,
    ) -> Self {
        Self {
            id,
            stage,
            ctx,
            input,
            output,
        }
    }

    pub fn namespace(&self) -> &str {
        self.ctx.namespace()
    }

    /// Drive the stage to completion and report what happened.
    fn run(mut self, table: &StateTable) -> WorkerExit {
        table.set(self.id, StageState::Running);
        tracing::debug!("[{}] started", self.namespace());

        let mut consumed = 0u64;
        let result = match self.stage.on_start(&self.ctx) {
            Ok(()) => {
                let result = self.pump(&mut consumed);
                // Cancelled and failed stages go straight to Stopped.
                if result.is_ok() {
                    table.set(self.id, StageState::Draining);
                }
                self.stage.on_stop(&self.ctx);
                result
            }
            Err(e) => Err(e),
        };

        let received = self.input.as_ref().map_or(0, StageInput::received);
        let emitted = match &self.output {
            Some(out) => out.sent(),
            None => consumed,
        };

        // Closing the output is what lets the downstream stage finish.
        drop(self.output.take());
        drop(self.input.take());
        table.set(self.id, StageState::Stopped);

        match &result {
            Ok(()) => tracing::debug!("[{}] stopped ({} in, {} out)", self.ctx.namespace(), received, emitted),
            Err(StageError::Cancelled) => tracing::debug!("[{}] cancelled", self.ctx.namespace()),
            Err(e) => tracing::error!("[{}] failed: {}", self.ctx.namespace(), e),
        }

        WorkerExit {
            id: self.id,
            namespace: self.ctx.namespace().to_string(),
            role: self.stage.role(),
            received,
            emitted,
            result,
        }
    }

    /// The message loop for whichever role this worker holds.
    fn pump(&mut self, consumed: &mut u64) -> StageResult<()> {
        let ctx = &self.ctx;
        match &mut self.stage {
            AnyStage::Source(source) => {
                let output = required(&mut self.output, "output")?;
                loop {
                    ctx.check_cancelled()?;
                    match source.next(ctx)? {
                        Some(message) => output.send(message)?,
                        None => return Ok(()),
                    }
                }
            }
            AnyStage::Processor(processor) => {
                let input = required(&mut self.input, "input")?;
                let output = required(&mut self.output, "output")?;
                while let Some(message) = input.recv()? {
                    if let Some(out) = processor.process(message, ctx)? {
                        output.send(out)?;
                    }
                }
                Ok(())
            }
            AnyStage::Sink(sink) => {
                let input = required(&mut self.input, "input")?;
                while let Some(message) = input.recv()? {
                    sink.consume(message, ctx)?;
                    *consumed += 1;
                }
                Ok(())
            }
        }
    }
}

fn required<'a, T>(slot: &'a mut Option<T>, what: &str) -> StageResult<&'a mut T> {
    slot.as_mut()
        .ok_or_else(|| StageError::Invalid(format!("stage has no {} channel", what)))
}

/// What a worker thread reports when it finishes.
#[derive(Debug)]
struct WorkerExit {
    id: StageId,
    namespace: String,
    role: StageRole,
    received: u64,
    emitted: u64,
    result: StageResult<()>,
}

/// An assembled, runnable pipeline.
pub struct Pipeline {
    workers: Vec<StageWorker>,
    config: ConfigBundle,
    cancel: CancellationToken,
    settings: AssemblySettings,
    stats: AssemblyStats,
    table: Arc<StateTable>,
}

impl Pipeline {
    pub(crate) fn from_parts(
        workers: Vec<StageWorker>,
        config: ConfigBundle,
        cancel: CancellationToken,
        settings: AssemblySettings,
        stats: AssemblyStats,
    ) -> Self {
        let table = Arc::new(StateTable {
            namespaces: workers.iter().map(|w| w.namespace().to_string()).collect(),
            states: workers
                .iter()
                .map(|_| AtomicU8::new(StageState::Created as u8))
                .collect(),
        });
        Self {
            workers,
            config,
            cancel,
            settings,
            stats,
            table,
        }
    }

    /// The merged configuration handed to the stages.
    pub fn config(&self) -> &ConfigBundle {
        &self.config
    }

    pub fn stats(&self) -> &AssemblyStats {
        &self.stats
    }

    pub fn settings(&self) -> &AssemblySettings {
        &self.settings
    }

    pub fn namespaces(&self) -> Vec<&str> {
        self.workers.iter().map(StageWorker::namespace).collect()
    }

    /// Current `(namespace, state)` of every stage.
    pub fn states(&self) -> Vec<(String, StageState)> {
        self.table.snapshot()
    }

    /// A state observer that stays valid while and after `run()` executes.
    pub fn watcher(&self) -> StateWatcher {
        StateWatcher {
            table: self.table.clone(),
        }
    }

    /// A handle that stops the pipeline from another thread.
    pub fn canceller(&self) -> Canceller {
        self.cancel.canceller()
    }

    /// Request cancellation. A later `run()` returns promptly.
    pub fn stop(&self) {
        self.cancel.cancel();
    }

    /// Run every stage to completion on its own thread.
    ///
    /// Returns `Ok` with the outcome once all stages stopped, the first
    /// stage-fatal error otherwise. If stages are still running one grace
    /// period after cancellation, they are detached and
    /// `GracePeriodExceeded` is returned.
    pub fn run(self) -> PipelineResult<RunReport> {
        let Pipeline {
            workers,
            cancel,
            settings,
            table,
            ..
        } = self;

        let start = Instant::now();
        let total = workers.len();
        let (done_tx, done_rx) = unbounded::<WorkerExit>();

        tracing::info!("Pipeline starting ({} stages)", total);

        let mut handles: Vec<Option<JoinHandle<()>>> = Vec::with_capacity(total);
        let mut spawn_error = None;
        for worker in workers {
            let namespace = worker.namespace().to_string();
            if spawn_error.is_some() {
                // Stages never spawned still count as stopped.
                table.set(worker.id, StageState::Stopped);
                handles.push(None);
                continue;
            }
            match Self::spawn_worker(worker, table.clone(), done_tx.clone()) {
                Ok(handle) => handles.push(Some(handle)),
                Err(source) => {
                    tracing::error!("Failed to spawn worker for '{}': {}", namespace, source);
                    cancel.cancel();
                    handles.push(None);
                    spawn_error = Some(PipelineError::Spawn { namespace, source });
                }
            }
        }
        drop(done_tx);

        let spawned = handles.iter().flatten().count();
        let collected = Self::supervise(&done_rx, &cancel, settings.grace_period, &table, spawned)?;

        // Every thread that reported is finishing up.
        for handle in handles.into_iter().flatten() {
            let _ = handle.join();
        }

        if let Some(err) = spawn_error {
            return Err(err);
        }
        if let Some((namespace, source)) = collected.fatal {
            return Err(PipelineError::StageFatal { namespace, source });
        }

        let outcome = if collected.cancelled {
            RunOutcome::Cancelled
        } else {
            RunOutcome::Drained
        };
        let mut stages = collected.stages;
        stages.sort_by_key(|(id, _)| *id);
        let report = RunReport {
            outcome,
            stages: stages.into_iter().map(|(_, s)| s).collect(),
            elapsed: start.elapsed(),
        };
        tracing::info!(
            "Pipeline finished: {:?} after {:.2}s",
            report.outcome,
            report.elapsed.as_secs_f64()
        );
        Ok(report)
    }

    fn spawn_worker(
        worker: StageWorker,
        table: Arc<StateTable>,
        done: Sender<WorkerExit>,
    ) -> std::io::Result<JoinHandle<()>> {
        thread::Builder::new()
            .name(format!("stage-{}", worker.namespace()))
            .spawn(move || {
                let id = worker.id;
                let namespace = worker.namespace().to_string();
                let role = worker.stage.role();
                let exit = panic::catch_unwind(AssertUnwindSafe(|| worker.run(&table)))
                    .unwrap_or_else(|_| {
                        tracing::error!("[{}] worker thread panicked", namespace);
                        table.set(id, StageState::Stopped);
                        WorkerExit {
                            id,
                            namespace,
                            role,
                            received: 0,
                            emitted: 0,
                            result: Err(StageError::Resource("worker thread panicked".into())),
                        }
                    });
                let _ = done.send(exit);
            })
    }

    /// Gather worker exits, cancelling everyone on the first failure.
    fn supervise(
        done: &Receiver<WorkerExit>,
        cancel: &CancellationToken,
        grace_period: Duration,
        table: &StateTable,
        spawned: usize,
    ) -> PipelineResult<Collected> {
        let mut collected = Collected::default();
        let mut deadline = cancel.is_cancelled().then(|| Instant::now() + grace_period);

        while collected.stages.len() < spawned {
            let exit = match deadline {
                None => select! {
                    recv(done) -> exit => match exit {
                        Ok(exit) => exit,
                        Err(_) => break,
                    },
                    recv(cancel.signal()) -> _ => {
                        tracing::info!("Cancellation requested, stopping stages");
                        deadline = Some(Instant::now() + grace_period);
                        continue;
                    }
                },
                Some(at) => match done.recv_deadline(at) {
                    Ok(exit) => exit,
                    Err(RecvTimeoutError::Timeout) => {
                        let namespaces: Vec<String> = table
                            .snapshot()
                            .into_iter()
                            .filter(|(_, s)| *s != StageState::Stopped)
                            .map(|(ns, _)| ns)
                            .collect();
                        tracing::error!(
                            "Stages still running after {:?}: {}",
                            grace_period,
                            namespaces.join(", ")
                        );
                        // Report the failure that started the shutdown, not the stragglers.
                        return Err(match collected.fatal {
                            Some((namespace, source)) => PipelineError::StageFatal { namespace, source },
                            None => PipelineError::GracePeriodExceeded { namespaces },
                        });
                    }
                    Err(RecvTimeoutError::Disconnected) => break,
                },
            };

            match exit.result {
                Ok(()) => {}
                Err(StageError::Cancelled) => collected.cancelled = true,
                Err(e) => {
                    if collected.fatal.is_none() {
                        cancel.cancel();
                        deadline.get_or_insert_with(|| Instant::now() + grace_period);
                        collected.fatal = Some((exit.namespace.clone(), e));
                    }
                }
            }
            collected.stages.push((
                exit.id,
                StageStats {
                    namespace: exit.namespace,
                    role: exit.role,
                    received: exit.received,
                    emitted: exit.emitted,
                },
            ));
        }

        Ok(collected)
    }
}

impl fmt::Debug for Pipeline {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Pipeline")
            .field("stages", &self.namespaces())
            .field("settings", &self.settings)
            .finish()
    }
}

#[derive(Default)]
struct Collected {
    stages: Vec<(StageId, StageStats)>,
    fatal: Option<(String, StageError)>,
    cancelled: bool,
}
