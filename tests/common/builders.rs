//! Test stages and spec builders
//!
//! - `numbered` source: emits `count` messages with seq 1..=count, forever
//!   when `count` is 0, pausing `interval_ms` between them; with `fail_after`
//!   set it reports the camera unavailable once that many were emitted
//! - `identity` processor: forwards messages, stamping its own `tag`
//! - `failing` processor: fails with a resource error at seq `fail_at`
//! - `stalling` processor: blocks `stall_ms` per message, ignoring cancellation
//! - `panicking` processor: panics at seq `panic_at`
//! - `recording` sink: records every message it consumes
//! - `failing-sink` sink: fails with a resource error at seq `fail_at`

use std::sync::{Arc, Mutex};
use std::time::Duration;
use vision_stream::pipeline::{
    AnyStage, Message, OptionKind, OptionSpec, PayloadKind, PipelineResult, PipelineSpec,
    Processor, Sink, Source, StageConfig, StageContext, StageDescriptor, StageError, StageFactory,
    StageResult, StageRole,
};

static NUMBERED_OPTIONS: &[OptionSpec] = &[
    OptionSpec::new("count", OptionKind::Int, "5", "messages to emit, 0 for unbounded"),
    OptionSpec::new("interval_ms", OptionKind::Int, "0", "pause between messages"),
    OptionSpec::new("fail_after", OptionKind::Int, "0", "messages before failing, 0 for never"),
];

static IDENTITY_OPTIONS: &[OptionSpec] = &[OptionSpec::new(
    "tag",
    OptionKind::String,
    "identity",
    "value stamped into the header named after the namespace",
)];

static FAILING_OPTIONS: &[OptionSpec] = &[OptionSpec::new(
    "fail_at",
    OptionKind::Int,
    "1",
    "sequence number that fails",
)];

static PANICKING_OPTIONS: &[OptionSpec] = &[OptionSpec::new(
    "panic_at",
    OptionKind::Int,
    "1",
    "sequence number that panics",
)];

static STALLING_OPTIONS: &[OptionSpec] = &[OptionSpec::new(
    "stall_ms",
    OptionKind::Int,
    "5000",
    "blocking time per message",
)];

pub static NUMBERED: StageDescriptor = StageDescriptor {
    name: "numbered",
    role: StageRole::Source,
    input: None,
    output: Some(PayloadKind::Bytes),
    options: NUMBERED_OPTIONS,
    description: "Emits numbered messages",
};

pub static IDENTITY: StageDescriptor = StageDescriptor {
    name: "identity",
    role: StageRole::Processor,
    input: Some(PayloadKind::Bytes),
    output: Some(PayloadKind::Bytes),
    options: IDENTITY_OPTIONS,
    description: "Forwards messages",
};

pub static FAILING: StageDescriptor = StageDescriptor {
    name: "failing",
    role: StageRole::Processor,
    input: Some(PayloadKind::Bytes),
    output: Some(PayloadKind::Bytes),
    options: FAILING_OPTIONS,
    description: "Fails at a given message",
};

pub static STALLING: StageDescriptor = StageDescriptor {
    name: "stalling",
    role: StageRole::Processor,
    input: Some(PayloadKind::Bytes),
    output: Some(PayloadKind::Bytes),
    options: STALLING_OPTIONS,
    description: "Blocks without observing cancellation",
};

pub static PANICKING: StageDescriptor = StageDescriptor {
    name: "panicking",
    role: StageRole::Processor,
    input: Some(PayloadKind::Bytes),
    output: Some(PayloadKind::Bytes),
    options: PANICKING_OPTIONS,
    description: "Panics at a given message",
};

pub static FAILING_SINK: StageDescriptor = StageDescriptor {
    name: "failing-sink",
    role: StageRole::Sink,
    input: Some(PayloadKind::Bytes),
    output: None,
    options: FAILING_OPTIONS,
    description: "Fails to consume a given message",
};

pub static RECORDING: StageDescriptor = StageDescriptor {
    name: "recording",
    role: StageRole::Sink,
    input: Some(PayloadKind::Bytes),
    output: None,
    options: &[],
    description: "Records messages",
};

pub static IMAGE_SINK: StageDescriptor = StageDescriptor {
    name: "image-sink",
    role: StageRole::Sink,
    input: Some(PayloadKind::Image),
    output: None,
    options: &[],
    description: "Accepts only images",
};

/// Messages seen by a recording sink
#[derive(Clone, Default)]
pub struct Recorder {
    messages: Arc<Mutex<Vec<Message>>>,
}

impl Recorder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn seqs(&self) -> Vec<u64> {
        self.messages.lock().unwrap().iter().map(|m| m.seq).collect()
    }

    pub fn messages(&self) -> Vec<Message> {
        self.messages.lock().unwrap().clone()
    }

    pub fn len(&self) -> usize {
        self.messages.lock().unwrap().len()
    }
}

/// Factory for every test stage above
pub struct TestStage {
    descriptor: &'static StageDescriptor,
    recorder: Recorder,
}

impl TestStage {
    pub fn shared(descriptor: &'static StageDescriptor) -> Arc<dyn StageFactory> {
        Arc::new(Self {
            descriptor,
            recorder: Recorder::new(),
        })
    }

    pub fn recording(recorder: &Recorder) -> Arc<dyn StageFactory> {
        Arc::new(Self {
            descriptor: &RECORDING,
            recorder: recorder.clone(),
        })
    }
}

impl StageFactory for TestStage {
    fn descriptor(&self) -> &StageDescriptor {
        self.descriptor
    }

    fn build(&self, config: Arc<StageConfig>) -> PipelineResult<AnyStage> {
        Ok(match self.descriptor.name {
            "numbered" => AnyStage::Source(Box::new(Numbered {
                next: 1,
                count: config.uint("count")?,
                interval: Duration::from_millis(config.uint("interval_ms")?),
                fail_after: config.uint("fail_after")?,
            })),
            "identity" => AnyStage::Processor(Box::new(Identity {
                tag: config.str("tag")?.to_string(),
            })),
            "failing" => AnyStage::Processor(Box::new(Failing {
                fail_at: config.uint("fail_at")?,
            })),
            "stalling" => AnyStage::Processor(Box::new(Stalling {
                stall: Duration::from_millis(config.uint("stall_ms")?),
            })),
            "panicking" => AnyStage::Processor(Box::new(Panicking {
                panic_at: config.uint("panic_at")?,
            })),
            "failing-sink" => AnyStage::Sink(Box::new(FailingSink {
                fail_at: config.uint("fail_at")?,
            })),
            _ => AnyStage::Sink(Box::new(Recording {
                recorder: self.recorder.clone(),
            })),
        })
    }
}

struct Numbered {
    next: u64,
    count: u64,
    interval: Duration,
    fail_after: u64,
}

impl Source for Numbered {
    fn next(&mut self, ctx: &StageContext) -> StageResult<Option<Message>> {
        if self.fail_after != 0 && self.next > self.fail_after {
            return Err(StageError::Unavailable("camera".into()));
        }
        if self.count != 0 && self.next > self.count {
            return Ok(None);
        }
        if self.next > 1 {
            ctx.sleep(self.interval)?;
        }
        let msg = Message::new(self.next, PayloadKind::Bytes, self.next.to_le_bytes().to_vec());
        self.next += 1;
        Ok(Some(msg))
    }
}

struct Identity {
    tag: String,
}

impl Processor for Identity {
    fn process(&mut self, message: Message, ctx: &StageContext) -> StageResult<Option<Message>> {
        Ok(Some(message.with_header(ctx.namespace(), self.tag.clone())))
    }
}

struct Failing {
    fail_at: u64,
}

impl Processor for Failing {
    fn process(&mut self, message: Message, _ctx: &StageContext) -> StageResult<Option<Message>> {
        if message.seq == self.fail_at {
            return Err(StageError::Resource(format!("failed at {}", message.seq)));
        }
        Ok(Some(message))
    }
}

struct Stalling {
    stall: Duration,
}

impl Processor for Stalling {
    fn process(&mut self, message: Message, _ctx: &StageContext) -> StageResult<Option<Message>> {
        std::thread::sleep(self.stall);
        Ok(Some(message))
    }
}

struct Panicking {
    panic_at: u64,
}

impl Processor for Panicking {
    fn process(&mut self, message: Message, _ctx: &StageContext) -> StageResult<Option<Message>> {
        if message.seq == self.panic_at {
            panic!("stage blew up at {}", message.seq);
        }
        Ok(Some(message))
    }
}

struct FailingSink {
    fail_at: u64,
}

impl Sink for FailingSink {
    fn consume(&mut self, message: Message, _ctx: &StageContext) -> StageResult<()> {
        if message.seq == self.fail_at {
            return Err(StageError::Resource(format!("could not store {}", message.seq)));
        }
        Ok(())
    }
}

struct Recording {
    recorder: Recorder,
}

impl Sink for Recording {
    fn consume(&mut self, message: Message, _ctx: &StageContext) -> StageResult<()> {
        self.recorder.messages.lock().unwrap().push(message);
        Ok(())
    }
}

/// `numbered → identity → recording` with `count` messages
pub fn linear_spec(count: u64, recorder: &Recorder) -> PipelineSpec {
    PipelineSpec::source(TestStage::shared(&NUMBERED), "source")
        .args([format!("--count={}", count)])
        .via(TestStage::shared(&IDENTITY), "proc")
        .to(TestStage::recording(recorder), "sink")
}

/// `numbered → identity × n → recording`, processors in namespaces `p0..pn`
pub fn chain_spec(count: u64, processors: usize, recorder: &Recorder) -> PipelineSpec {
    let mut spec = PipelineSpec::source(TestStage::shared(&NUMBERED), "source")
        .args([format!("--count={}", count)]);
    for i in 0..processors {
        spec = spec
            .via(TestStage::shared(&IDENTITY), format!("p{}", i))
            .args([format!("--tag=t{}", i)]);
    }
    spec.to(TestStage::recording(recorder), "sink")
}
