//! Directory reader source.
//!
//! Emits every regular file of a directory once, in file-name order. In
//! `contents` mode the payload is the file's bytes, in `ref` mode it is the
//! file's path, and in `lines` mode each line becomes its own message. With
//! `watch` enabled the directory is polled for new files until cancelled.

use crate::pipeline::message::{HEADER_CONTENT_TYPE, HEADER_FILE_NAME};
use crate::pipeline::{
    AnyStage, Message, OptionKind, OptionSpec, PayloadKind, PipelineResult, Source, StageConfig,
    StageContext, StageDescriptor, StageError, StageFactory, StageResult, StageRole,
};
use std::borrow::Cow;
use std::collections::{HashSet, VecDeque};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use super::BuiltinFactory;

/// Header carrying the full path of the file a message came from.
pub const HEADER_FILE_PATH: &str = "file_path";
/// Header carrying the 1-based line number in `lines` mode.
pub const HEADER_LINE_NUMBER: &str = "line_number";

static OPTIONS: &[OptionSpec] = &[
    OptionSpec::required("directory", OptionKind::String, "Directory to read files from"),
    OptionSpec::new(
        "mode",
        OptionKind::Choice(&["contents", "ref", "lines"]),
        "contents",
        "What each message carries",
    ),
    OptionSpec::new("watch", OptionKind::Bool, "false", "Keep polling for new files"),
    OptionSpec::new(
        "poll_interval_ms",
        OptionKind::Int,
        "500",
        "Delay between two directory scans when watching",
    ),
];

pub static DESCRIPTOR: StageDescriptor = StageDescriptor {
    name: "file-source",
    role: StageRole::Source,
    input: None,
    output: Some(PayloadKind::Bytes),
    options: OPTIONS,
    description: "Reads files from a directory",
};

pub fn file_source() -> Arc<dyn StageFactory> {
    BuiltinFactory::shared(&DESCRIPTOR, build)
}

/// What each emitted message carries.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConsumerMode {
    Contents,
    Ref,
    Lines,
}

impl ConsumerMode {
    fn parse(value: &str) -> Self {
        match value {
            "ref" => ConsumerMode::Ref,
            "lines" => ConsumerMode::Lines,
            _ => ConsumerMode::Contents,
        }
    }
}

fn build(config: Arc<StageConfig>) -> PipelineResult<AnyStage> {
    Ok(AnyStage::Source(Box::new(FileSource {
        directory: PathBuf::from(config.str("directory")?),
        mode: ConsumerMode::parse(config.str("mode")?),
        watch: config.bool("watch")?,
        poll_interval: Duration::from_millis(config.uint("poll_interval_ms")?),
        seen: HashSet::new(),
        queue: VecDeque::new(),
        seq: 0,
    })))
}

struct FileSource {
    directory: PathBuf,
    mode: ConsumerMode,
    watch: bool,
    poll_interval: Duration,
    seen: HashSet<PathBuf>,
    queue: VecDeque<Message>,
    seq: u64,
}

impl FileSource {
    /// Regular files not emitted yet, sorted by name.
    fn scan(&mut self) -> StageResult<Vec<PathBuf>> {
        let mut fresh = Vec::new();
        for entry in std::fs::read_dir(&self.directory)? {
            let path = entry?.path();
            if path.is_file() && !self.seen.contains(&path) {
                fresh.push(path);
            }
        }
        fresh.sort();
        Ok(fresh)
    }

    fn next_seq(&mut self) -> u64 {
        self.seq += 1;
        self.seq
    }

    fn message(&mut self, path: &Path, payload: Vec<u8>) -> Message {
        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        Message::new(self.next_seq(), PayloadKind::Bytes, payload)
            .with_header(HEADER_FILE_NAME, name)
            .with_header(HEADER_FILE_PATH, path.display().to_string())
    }

    /// Turn one file into queued messages according to the mode.
    fn enqueue(&mut self, path: PathBuf) -> StageResult<()> {
        match self.mode {
            ConsumerMode::Contents => {
                let data = std::fs::read(&path)?;
                let message = self.message(&path, data);
                self.queue.push_back(message);
            }
            ConsumerMode::Ref => {
                let data = path.display().to_string().into_bytes();
                let message = self
                    .message(&path, data)
                    .with_header(HEADER_CONTENT_TYPE, "text/plain");
                self.queue.push_back(message);
            }
            ConsumerMode::Lines => {
                let data = std::fs::read(&path)?;
                let text = String::from_utf8_lossy(&data);
                if let Cow::Owned(_) = text {
                    tracing::warn!("{} is not valid UTF-8, replacing bad bytes", path.display());
                }
                for (idx, line) in text.lines().enumerate() {
                    let message = self
                        .message(&path, line.as_bytes().to_vec())
                        .with_header(HEADER_LINE_NUMBER, (idx + 1).to_string())
                        .with_header(HEADER_CONTENT_TYPE, "text/plain");
                    self.queue.push_back(message);
                }
            }
        }
        self.seen.insert(path);
        Ok(())
    }
}

impl Source for FileSource {
    fn on_start(&mut self, ctx: &StageContext) -> StageResult<()> {
        if !self.directory.is_dir() {
            return Err(StageError::Unavailable(format!(
                "input directory {}",
                self.directory.display()
            )));
        }
        tracing::info!(
            "[{}] reading {} ({:?}, watch={})",
            ctx.namespace(),
            self.directory.display(),
            self.mode,
            self.watch
        );
        Ok(())
    }

    fn next(&mut self, ctx: &StageContext) -> StageResult<Option<Message>> {
        loop {
            if let Some(message) = self.queue.pop_front() {
                return Ok(Some(message));
            }

            let fresh = self.scan()?;
            if fresh.is_empty() {
                if !self.watch {
                    return Ok(None);
                }
                ctx.sleep(self.poll_interval)?;
                continue;
            }
            for path in fresh {
                tracing::debug!("[{}] picked up {}", ctx.namespace(), path.display());
                self.enqueue(path)?;
            }
        }
    }

    fn on_stop(&mut self, ctx: &StageContext) {
        tracing::debug!("[{}] emitted {} messages", ctx.namespace(), self.seq);
    }
}
