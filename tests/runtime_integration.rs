//! Runtime tests: ordering, drain, cancellation and failure propagation

mod common;

use common::builders::*;
use proptest::prelude::*;
use std::thread;
use std::time::{Duration, Instant};
use vision_stream::pipeline::{
    AssemblySettings, PipelineAssembler, PipelineError, PipelineSpec, RunOutcome, StageError,
    StageState,
};

#[test]
fn test_messages_arrive_in_order() {
    let recorder = Recorder::new();
    let pipeline = common::test_assembler()
        .assemble(&linear_spec(5, &recorder))
        .unwrap();
    let watcher = pipeline.watcher();

    let report = pipeline.run().unwrap();

    assert_eq!(report.outcome, RunOutcome::Drained);
    assert_eq!(recorder.seqs(), vec![1, 2, 3, 4, 5]);
    assert!(recorder
        .messages()
        .iter()
        .all(|m| m.header("proc") == Some("identity")));
    assert!(watcher.all_stopped());
    assert_eq!(report.stage("proc").map(|s| (s.received, s.emitted)), Some((5, 5)));
}

#[test]
fn test_unbounded_source_stops_on_cancel() {
    let recorder = Recorder::new();
    let spec = PipelineSpec::source(TestStage::shared(&NUMBERED), "source")
        .args(["--count=0", "--interval_ms=0"])
        .to(TestStage::recording(&recorder), "sink");
    let pipeline = common::test_assembler().assemble(&spec).unwrap();
    let canceller = pipeline.canceller();
    let handle = thread::spawn(move || pipeline.run());
    thread::sleep(Duration::from_millis(50));
    canceller.cancel();

    let report = handle.join().unwrap().unwrap();
    assert_eq!(report.outcome, RunOutcome::Cancelled);
    let seqs = recorder.seqs();
    assert!(!seqs.is_empty());
    assert!(seqs.windows(2).all(|w| w[1] == w[0] + 1));
}

#[test]
fn test_cancellation_stops_within_grace_period() {
    let recorder = Recorder::new();
    let spec = PipelineSpec::source(TestStage::shared(&NUMBERED), "source")
        .args(["--count=0", "--interval_ms=20"])
        .via(TestStage::shared(&IDENTITY), "proc")
        .to(TestStage::recording(&recorder), "sink");
    let pipeline = common::test_assembler().assemble(&spec).unwrap();
    let canceller = pipeline.canceller();
    let watcher = pipeline.watcher();

    let handle = thread::spawn(move || pipeline.run());
    thread::sleep(Duration::from_millis(100));
    let cancelled_at = Instant::now();
    canceller.cancel();

    let report = handle.join().unwrap().unwrap();
    common::assert_within(cancelled_at.elapsed(), common::test_grace_period());
    assert_eq!(report.outcome, RunOutcome::Cancelled);
    assert!(watcher
        .states()
        .iter()
        .all(|(_, state)| *state == StageState::Stopped));
}

#[test]
fn test_stage_failure_cancels_the_rest() {
    let recorder = Recorder::new();
    let spec = PipelineSpec::source(TestStage::shared(&NUMBERED), "source")
        .args(["--count=0"])
        .via(TestStage::shared(&FAILING), "fragile")
        .args(["--fail_at=4"])
        .to(TestStage::recording(&recorder), "sink");
    let pipeline = common::test_assembler().assemble(&spec).unwrap();
    let watcher = pipeline.watcher();

    match pipeline.run() {
        Err(PipelineError::StageFatal { namespace, source }) => {
            assert_eq!(namespace, "fragile");
            assert!(matches!(source, StageError::Resource(_)));
        }
        other => panic!("expected stage failure, got {:?}", other.map(|r| r.outcome)),
    }
    assert!(watcher.all_stopped());
    // Buffered messages may be dropped once cancellation starts
    let seqs = recorder.seqs();
    assert!(seqs.len() <= 3);
    assert_eq!(seqs, (1..=seqs.len() as u64).collect::<Vec<_>>());
}

#[test]
fn test_stalled_stage_exceeds_grace_period() {
    let recorder = Recorder::new();
    let spec = PipelineSpec::source(TestStage::shared(&NUMBERED), "source")
        .args(["--count=0"])
        .via(TestStage::shared(&STALLING), "stuck")
        .args(["--stall_ms=3000"])
        .to(TestStage::recording(&recorder), "sink");
    let pipeline = PipelineAssembler::new(AssemblySettings {
        grace_period: Duration::from_millis(100),
        ..AssemblySettings::default()
    })
    .assemble(&spec)
    .unwrap();
    let canceller = pipeline.canceller();
    let watcher = pipeline.watcher();

    let handle = thread::spawn(move || pipeline.run());
    thread::sleep(Duration::from_millis(50));
    let cancelled_at = Instant::now();
    canceller.cancel();

    match handle.join().unwrap() {
        Err(PipelineError::GracePeriodExceeded { namespaces }) => {
            assert_eq!(namespaces, vec!["stuck".to_string()]);
        }
        other => panic!("expected grace period error, got {:?}", other.map(|r| r.outcome)),
    }
    common::assert_within(cancelled_at.elapsed(), Duration::from_millis(1500));
    assert_eq!(watcher.state_of("stuck"), Some(StageState::Running));
    assert_eq!(watcher.state_of("source"), Some(StageState::Stopped));
}

#[test]
fn test_failure_is_reported_when_another_stage_outlasts_grace() {
    let recorder = Recorder::new();
    let spec = PipelineSpec::source(TestStage::shared(&NUMBERED), "source")
        .args(["--count=0", "--fail_after=1"])
        .via(TestStage::shared(&STALLING), "slow-model")
        .args(["--stall_ms=1500"])
        .to(TestStage::recording(&recorder), "sink");
    let pipeline = PipelineAssembler::new(AssemblySettings {
        grace_period: Duration::from_millis(200),
        ..AssemblySettings::default()
    })
    .assemble(&spec)
    .unwrap();
    let watcher = pipeline.watcher();
    let started = Instant::now();

    match pipeline.run() {
        Err(PipelineError::StageFatal { namespace, source }) => {
            assert_eq!(namespace, "source");
            assert!(matches!(source, StageError::Unavailable(ref what) if what == "camera"));
        }
        other => panic!("expected source failure, got {:?}", other.map(|r| r.outcome)),
    }
    common::assert_within(started.elapsed(), Duration::from_millis(1200));
    assert_eq!(watcher.state_of("source"), Some(StageState::Stopped));
    assert_eq!(watcher.state_of("slow-model"), Some(StageState::Running));
}

#[test]
fn test_panicking_stage_cancels_the_rest() {
    let recorder = Recorder::new();
    let spec = PipelineSpec::source(TestStage::shared(&NUMBERED), "source")
        .args(["--count=0", "--interval_ms=30000"])
        .via(TestStage::shared(&PANICKING), "proc")
        .args(["--panic_at=1"])
        .to(TestStage::recording(&recorder), "sink");
    let pipeline = common::test_assembler().assemble(&spec).unwrap();
    let watcher = pipeline.watcher();
    let started = Instant::now();

    match pipeline.run() {
        Err(PipelineError::StageFatal { namespace, source }) => {
            assert_eq!(namespace, "proc");
            assert!(matches!(source, StageError::Resource(_)));
        }
        other => panic!("expected stage failure, got {:?}", other.map(|r| r.outcome)),
    }
    common::assert_within(started.elapsed(), Duration::from_secs(5));
    assert!(watcher.all_stopped());
    assert!(recorder.seqs().is_empty());
}

#[test]
fn test_source_failure_mid_stream() {
    let recorder = Recorder::new();
    let spec = PipelineSpec::source(TestStage::shared(&NUMBERED), "source")
        .args(["--count=0", "--fail_after=3"])
        .via(TestStage::shared(&IDENTITY), "proc")
        .to(TestStage::recording(&recorder), "sink");
    let pipeline = common::test_assembler().assemble(&spec).unwrap();
    let watcher = pipeline.watcher();

    match pipeline.run() {
        Err(PipelineError::StageFatal { namespace, source }) => {
            assert_eq!(namespace, "source");
            assert!(matches!(source, StageError::Unavailable(_)));
        }
        other => panic!("expected source failure, got {:?}", other.map(|r| r.outcome)),
    }
    assert!(watcher.all_stopped());
    let seqs = recorder.seqs();
    assert!(seqs.len() <= 3);
    assert_eq!(seqs, (1..=seqs.len() as u64).collect::<Vec<_>>());
}

#[test]
fn test_missing_input_directory_fails_the_source() {
    let dir = tempfile::tempdir().unwrap();
    let missing = format!("--directory={}", dir.path().join("absent").display());
    let recorder = Recorder::new();
    let spec = PipelineSpec::source(vision_stream::stages::file_source(), "source")
        .args([missing])
        .to(TestStage::recording(&recorder), "sink");
    let pipeline = common::test_assembler().assemble(&spec).unwrap();
    let watcher = pipeline.watcher();

    match pipeline.run() {
        Err(PipelineError::StageFatal { namespace, source }) => {
            assert_eq!(namespace, "source");
            assert!(matches!(source, StageError::Unavailable(_)));
        }
        other => panic!("expected source failure, got {:?}", other.map(|r| r.outcome)),
    }
    assert!(watcher.all_stopped());
    assert_eq!(recorder.len(), 0);
}

#[test]
fn test_sink_failure_cancels_the_rest() {
    let spec = PipelineSpec::source(TestStage::shared(&NUMBERED), "source")
        .args(["--count=0"])
        .via(TestStage::shared(&IDENTITY), "proc")
        .to(TestStage::shared(&FAILING_SINK), "sink")
        .args(["--fail_at=2"]);
    let pipeline = common::test_assembler().assemble(&spec).unwrap();
    let watcher = pipeline.watcher();

    match pipeline.run() {
        Err(PipelineError::StageFatal { namespace, source }) => {
            assert_eq!(namespace, "sink");
            assert!(matches!(source, StageError::Resource(_)));
        }
        other => panic!("expected sink failure, got {:?}", other.map(|r| r.outcome)),
    }
    assert!(watcher.all_stopped());
}

#[test]
fn test_spec_can_be_assembled_again() {
    let recorder = Recorder::new();
    let spec = linear_spec(2, &recorder);
    let assembler = common::test_assembler();
    assembler.assemble(&spec).unwrap().run().unwrap();
    assembler.assemble(&spec).unwrap().run().unwrap();
    assert_eq!(recorder.seqs(), vec![1, 2, 1, 2]);
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(16))]

    #[test]
    fn prop_order_preserved_for_any_chain(
        count in 1u64..40,
        processors in 0usize..4,
        capacity in 1usize..4,
    ) {
        let recorder = Recorder::new();
        let assembler = PipelineAssembler::new(AssemblySettings {
            channel_capacity: capacity,
            ..AssemblySettings::default()
        });
        let report = assembler
            .assemble(&chain_spec(count, processors, &recorder))
            .unwrap()
            .run()
            .unwrap();

        prop_assert_eq!(report.outcome, RunOutcome::Drained);
        prop_assert_eq!(recorder.seqs(), (1..=count).collect::<Vec<_>>());
    }
}
