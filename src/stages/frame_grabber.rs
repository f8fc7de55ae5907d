//! Frame grabber source.
//!
//! Stands in for a camera: emits synthetic rgb8 frames of the configured
//! size, one every `capture_interval_ms`. The pattern shifts with every
//! frame so consecutive frames differ.

use crate::pipeline::message::HEADER_CONTENT_TYPE;
use crate::pipeline::{
    AnyStage, Message, OptionKind, OptionSpec, PayloadKind, PipelineError, PipelineResult, Source,
    StageConfig, StageContext, StageDescriptor, StageFactory, StageResult, StageRole,
};
use std::sync::Arc;
use std::time::Duration;

use super::BuiltinFactory;

/// Header carrying the frame width in pixels.
pub const HEADER_WIDTH: &str = "width";
/// Header carrying the frame height in pixels.
pub const HEADER_HEIGHT: &str = "height";
/// Header carrying the pixel format.
pub const HEADER_FORMAT: &str = "format";

const PIXEL_FORMAT: &str = "rgb8";
const BYTES_PER_PIXEL: usize = 3;
const MAX_DIMENSION: u64 = 8192;

static OPTIONS: &[OptionSpec] = &[
    OptionSpec::new("width", OptionKind::Int, "320", "Frame width in pixels"),
    OptionSpec::new("height", OptionKind::Int, "240", "Frame height in pixels"),
    OptionSpec::new(
        "capture_interval_ms",
        OptionKind::Int,
        "100",
        "Delay between two captured frames",
    ),
    OptionSpec::new(
        "max_frames",
        OptionKind::Int,
        "0",
        "Stop after this many frames (0 = unbounded)",
    ),
];

pub static DESCRIPTOR: StageDescriptor = StageDescriptor {
    name: "frame-grabber",
    role: StageRole::Source,
    input: None,
    output: Some(PayloadKind::Image),
    options: OPTIONS,
    description: "Captures rgb8 frames at a fixed interval",
};

pub fn frame_grabber() -> Arc<dyn StageFactory> {
    BuiltinFactory::shared(&DESCRIPTOR, build)
}

fn build(config: Arc<StageConfig>) -> PipelineResult<AnyStage> {
    let width = dimension(&config, "width")?;
    let height = dimension(&config, "height")?;
    let max_frames = config.uint("max_frames")?;
    Ok(AnyStage::Source(Box::new(FrameGrabber {
        width,
        height,
        interval: Duration::from_millis(config.uint("capture_interval_ms")?),
        max_frames: (max_frames > 0).then_some(max_frames),
        captured: 0,
    })))
}

fn dimension(config: &StageConfig, key: &str) -> PipelineResult<usize> {
    let value = config.uint(key)?;
    if value == 0 || value > MAX_DIMENSION {
        return Err(PipelineError::InvalidOptionValue {
            namespace: config.namespace().to_string(),
            key: key.to_string(),
            value: value.to_string(),
            reason: format!("must be between 1 and {}", MAX_DIMENSION),
        });
    }
    Ok(value as usize)
}

struct FrameGrabber {
    width: usize,
    height: usize,
    interval: Duration,
    max_frames: Option<u64>,
    captured: u64,
}

impl FrameGrabber {
    /// Diagonal gradient that moves one pixel per frame.
    fn render(&self, frame: u64) -> Vec<u8> {
        let mut data = Vec::with_capacity(self.width * self.height * BYTES_PER_PIXEL);
        let shift = frame as usize;
        for y in 0..self.height {
            for x in 0..self.width {
                data.push(((x + shift) % 256) as u8);
                data.push(((y + shift) % 256) as u8);
                data.push(((x + y) % 256) as u8);
            }
        }
        data
    }
}

impl Source for FrameGrabber {
    fn on_start(&mut self, ctx: &StageContext) -> StageResult<()> {
        tracing::info!(
            "[{}] capturing {}x{} every {:?}",
            ctx.namespace(),
            self.width,
            self.height,
            self.interval
        );
        Ok(())
    }

    fn next(&mut self, ctx: &StageContext) -> StageResult<Option<Message>> {
        if self.max_frames.is_some_and(|max| self.captured >= max) {
            return Ok(None);
        }
        if self.captured > 0 {
            ctx.sleep(self.interval)?;
        }

        self.captured += 1;
        let message = Message::new(self.captured, PayloadKind::Image, self.render(self.captured))
            .with_header(HEADER_WIDTH, self.width.to_string())
            .with_header(HEADER_HEIGHT, self.height.to_string())
            .with_header(HEADER_FORMAT, PIXEL_FORMAT)
            .with_header(HEADER_CONTENT_TYPE, "image/x-raw-rgb");
        Ok(Some(message))
    }

    fn on_stop(&mut self, ctx: &StageContext) {
        tracing::debug!("[{}] captured {} frames", ctx.namespace(), self.captured);
    }
}
