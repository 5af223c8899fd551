//! Internal WebP conversions: decode, flatten, encode.
//!
//! Both paths check the control handle at every frame boundary, so a pause
//! takes effect mid-file and a stop abandons the file without leaving output
//! behind.

use std::fs;
use std::path::Path;
use std::time::Duration;

use image::{Rgb, RgbImage};

use crate::alpha::{composite, has_transparency};
use crate::config::{AppConfig, FfmpegConfig};
use crate::control::ControlHandle;
use crate::encode::{PaletteAnimationSink, RasterVideoSink, VideoSpec};
use crate::error::Result;
use crate::frames::{display_name, FrameSource};
use crate::rate::{average_frame_rate, estimate_frame_rate, RateLimits};

/// Knobs for the internal conversions.
#[derive(Debug, Clone)]
pub struct PipelineSettings {
    pub rate_limits: RateLimits,
    pub background: Rgb<u8>,
    pub video_codec: String,
    pub quantize_speed: i32,
    pub pause_poll: Duration,
    pub ffmpeg: FfmpegConfig,
}

impl Default for PipelineSettings {
    fn default() -> Self {
        Self::from(&AppConfig::default())
    }
}

impl From<&AppConfig> for PipelineSettings {
    fn from(cfg: &AppConfig) -> Self {
        Self {
            rate_limits: cfg.rate_limits(),
            background: cfg.background(),
            video_codec: cfg.video_codec.clone(),
            quantize_speed: cfg.gif_quantize_speed,
            pause_poll: cfg.pause_poll(),
            ffmpeg: cfg.ffmpeg.clone(),
        }
    }
}

/// Summary of one internal conversion.
#[derive(Debug, Clone, PartialEq)]
pub struct PipelineStats {
    pub frames: usize,
    pub transparent: bool,
    /// Effective rate for video output; `None` for GIF, which keeps
    /// per-frame delays.
    pub fps: Option<f64>,
}

/// Animated WebP to GIF.
#[tracing::instrument(level = "debug", skip(settings, control))]
pub fn webp_to_gif(
    input: &Path,
    output: &Path,
    settings: &PipelineSettings,
    control: &ControlHandle,
) -> Result<PipelineStats> {
    let source = FrameSource::open(input)?;
    let mut transparent = None;
    let mut frames: Vec<RgbImage> = Vec::with_capacity(source.frame_count());
    let mut durations: Vec<u32> = Vec::with_capacity(source.frame_count());

    for frame in source.frames()? {
        control.checkpoint(settings.pause_poll)?;
        let frame = frame?;
        let flag = *transparent.get_or_insert_with(|| has_transparency(&frame.image));
        frames.push(composite(&frame.image, flag, settings.background));
        durations.push(frame.duration_ms);
    }
    control.checkpoint(settings.pause_poll)?;

    let transparent = transparent.unwrap_or(false);
    let sink = PaletteAnimationSink::new(settings.quantize_speed);
    if let Err(e) = sink.encode(output, &frames, &durations) {
        remove_partial(output);
        return Err(e);
    }

    tracing::info!(
        "converted {} frames of {} to GIF (transparency: {transparent})",
        frames.len(),
        display_name(input)
    );
    Ok(PipelineStats {
        frames: frames.len(),
        transparent,
        fps: None,
    })
}

/// Animated WebP to a raster video through ffmpeg.
#[tracing::instrument(level = "debug", skip(settings, control))]
pub fn webp_to_video(
    input: &Path,
    output: &Path,
    settings: &PipelineSettings,
    control: &ControlHandle,
) -> Result<PipelineStats> {
    let source = FrameSource::open(input)?;
    let fps = estimate_frame_rate(source.durations(), settings.rate_limits);
    let average = average_frame_rate(source.durations()).unwrap_or(fps);
    tracing::info!("calculated FPS: {average:.2}, using: {fps:.2}");

    let (width, height) = source.dimensions();
    let spec = VideoSpec {
        width,
        height,
        fps,
        codec: settings.video_codec.clone(),
    };

    // nothing to clean up if ffmpeg never started
    let sink = RasterVideoSink::open(output, spec, &settings.ffmpeg)?;
    match write_video(&source, sink, settings, control) {
        Ok((frames, transparent)) => {
            tracing::info!("successfully wrote {frames} frames at {fps:.2} FPS");
            Ok(PipelineStats {
                frames,
                transparent,
                fps: Some(fps),
            })
        }
        Err(e) => {
            remove_partial(output);
            Err(e)
        }
    }
}

fn write_video(
    source: &FrameSource,
    mut sink: RasterVideoSink,
    settings: &PipelineSettings,
    control: &ControlHandle,
) -> Result<(usize, bool)> {
    let mut transparent = None;

    // the sink is closed on every early return by its Drop impl
    for frame in source.frames()? {
        control.checkpoint(settings.pause_poll)?;
        let frame = frame?;
        let flag = *transparent.get_or_insert_with(|| has_transparency(&frame.image));
        sink.append(&composite(&frame.image, flag, settings.background))?;
    }

    let frames = sink.frames_written();
    sink.finish()?;
    Ok((frames, transparent.unwrap_or(false)))
}

pub(crate) fn remove_partial(output: &Path) {
    match fs::remove_file(output) {
        Ok(()) => tracing::debug!("removed partial output {}", output.display()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
        Err(e) => tracing::warn!("could not remove partial output {}: {e}", output.display()),
    }
}
