//! Directory writer sink.
//!
//! Writes each payload to its own file. The file name comes from a
//! configurable header, reduced to its final path component; messages
//! without that header are written as `<seq>.bin`.

use crate::pipeline::message::HEADER_FILE_NAME;
use crate::pipeline::{
    AnyStage, Message, OptionKind, OptionSpec, PayloadKind, PipelineResult, Sink, StageConfig,
    StageContext, StageDescriptor, StageFactory, StageResult, StageRole,
};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use super::BuiltinFactory;

static OPTIONS: &[OptionSpec] = &[
    OptionSpec::required("directory", OptionKind::String, "Directory to write files to"),
    OptionSpec::new(
        "name_header",
        OptionKind::String,
        HEADER_FILE_NAME,
        "Header holding the output file name",
    ),
];

pub static DESCRIPTOR: StageDescriptor = StageDescriptor {
    name: "file-sink",
    role: StageRole::Sink,
    input: Some(PayloadKind::Bytes),
    output: None,
    options: OPTIONS,
    description: "Writes payloads to files in a directory",
};

pub fn file_sink() -> Arc<dyn StageFactory> {
    BuiltinFactory::shared(&DESCRIPTOR, build)
}

fn build(config: Arc<StageConfig>) -> PipelineResult<AnyStage> {
    Ok(AnyStage::Sink(Box::new(FileSink {
        directory: PathBuf::from(config.str("directory")?),
        name_header: config.str("name_header")?.to_string(),
        written: 0,
    })))
}

struct FileSink {
    directory: PathBuf,
    name_header: String,
    written: u64,
}

impl FileSink {
    fn target(&self, message: &Message) -> PathBuf {
        let name = message
            .header(&self.name_header)
            .and_then(|name| Path::new(name).file_name())
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_else(|| format!("{}.bin", message.seq));
        self.directory.join(name)
    }
}

impl Sink for FileSink {
    fn on_start(&mut self, ctx: &StageContext) -> StageResult<()> {
        std::fs::create_dir_all(&self.directory)?;
        tracing::info!("[{}] writing to {}", ctx.namespace(), self.directory.display());
        Ok(())
    }

    fn consume(&mut self, message: Message, ctx: &StageContext) -> StageResult<()> {
        let path = self.target(&message);
        std::fs::write(&path, &message.payload)?;
        self.written += 1;
        tracing::debug!("[{}] wrote {}", ctx.namespace(), path.display());
        Ok(())
    }

    fn on_stop(&mut self, ctx: &StageContext) {
        tracing::debug!("[{}] wrote {} files", ctx.namespace(), self.written);
    }
}
