//! Viewer sink.
//!
//! Stands in for a display window: every frame is reported through
//! `tracing` with the window title, the inference result if one is
//! attached, and a running frames-per-second figure.

use crate::pipeline::message::HEADER_RESULT;
use crate::pipeline::{
    AnyStage, Message, OptionKind, OptionSpec, PayloadKind, PipelineResult, Sink, StageConfig,
    StageContext, StageDescriptor, StageFactory, StageResult, StageRole,
};
use std::sync::Arc;
use std::time::Instant;

use super::BuiltinFactory;

static OPTIONS: &[OptionSpec] = &[
    OptionSpec::new("title", OptionKind::String, "Vision Stream", "Window title"),
    OptionSpec::new(
        "report_every",
        OptionKind::Int,
        "1",
        "Log one line per this many frames",
    ),
];

pub static DESCRIPTOR: StageDescriptor = StageDescriptor {
    name: "image-viewer",
    role: StageRole::Sink,
    input: Some(PayloadKind::Bytes),
    output: None,
    options: OPTIONS,
    description: "Displays frames and their annotations",
};

pub fn image_viewer() -> Arc<dyn StageFactory> {
    BuiltinFactory::shared(&DESCRIPTOR, build)
}

fn build(config: Arc<StageConfig>) -> PipelineResult<AnyStage> {
    Ok(AnyStage::Sink(Box::new(ImageViewer {
        title: config.str("title")?.to_string(),
        report_every: config.uint("report_every")?.max(1),
        shown: 0,
        started: None,
    })))
}

struct ImageViewer {
    title: String,
    report_every: u64,
    shown: u64,
    started: Option<Instant>,
}

impl ImageViewer {
    fn fps(&self) -> f64 {
        match self.started {
            Some(start) => {
                let secs = start.elapsed().as_secs_f64();
                if secs > 0.0 {
                    self.shown as f64 / secs
                } else {
                    0.0
                }
            }
            None => 0.0,
        }
    }
}

impl Sink for ImageViewer {
    fn on_start(&mut self, ctx: &StageContext) -> StageResult<()> {
        tracing::info!("[{}] opened viewer '{}'", ctx.namespace(), self.title);
        Ok(())
    }

    fn consume(&mut self, message: Message, ctx: &StageContext) -> StageResult<()> {
        self.started.get_or_insert_with(Instant::now);
        self.shown += 1;

        if self.shown % self.report_every == 0 {
            tracing::info!(
                "[{}] {} #{} ({} bytes, {:.1} fps){}",
                ctx.namespace(),
                self.title,
                message.seq,
                message.payload.len(),
                self.fps(),
                message
                    .header(HEADER_RESULT)
                    .map(|r| format!(" {}", r))
                    .unwrap_or_default()
            );
        }
        Ok(())
    }

    fn on_stop(&mut self, ctx: &StageContext) {
        tracing::info!(
            "[{}] closed viewer '{}' after {} frames",
            ctx.namespace(),
            self.title,
            self.shown
        );
    }
}
