//! Frame sinks: an ffmpeg-backed raster video writer and a GIF writer.

use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use std::process::{Child, ChildStdin, Command, Stdio};

use gif::{DisposalMethod, Encoder, Repeat};
use image::RgbImage;
use rayon::prelude::*;

use crate::config::FfmpegConfig;
use crate::error::{ConvertError, Result};

/// Fixed parameters of a raster video stream.
#[derive(Debug, Clone, PartialEq)]
pub struct VideoSpec {
    pub width: u32,
    pub height: u32,
    pub fps: f64,
    /// ffmpeg encoder name, e.g. `mpeg4` or `libx264`.
    pub codec: String,
}

impl VideoSpec {
    pub fn validate(&self) -> Result<()> {
        if self.width == 0 || self.height == 0 {
            return Err(ConvertError::encode("video width/height must be non-zero"));
        }
        if !(self.fps.is_finite() && self.fps > 0.0) {
            return Err(ConvertError::encode("video fps must be positive"));
        }
        if self.codec.trim().is_empty() {
            return Err(ConvertError::encode("video codec cannot be empty"));
        }
        Ok(())
    }

    fn frame_len(&self) -> usize {
        self.width as usize * self.height as usize * 3
    }
}

/// Streams RGB frames into an ffmpeg child process over stdin.
///
/// Frames must match the declared size exactly. Dropping the sink without
/// calling [`RasterVideoSink::finish`] still closes the pipe and reaps the
/// child, so ffmpeg is never left running behind an aborted conversion.
pub struct RasterVideoSink {
    spec: VideoSpec,
    out_path: PathBuf,
    child: Option<Child>,
    stdin: Option<ChildStdin>,
    frames_written: usize,
}

impl RasterVideoSink {
    pub fn open(out_path: &Path, spec: VideoSpec, ffmpeg: &FfmpegConfig) -> Result<Self> {
        spec.validate()?;

        let mut cmd = Command::new(ffmpeg.ffmpeg_cmd());
        cmd.stdin(Stdio::piped())
            .stdout(Stdio::null())
            .stderr(Stdio::piped());

        cmd.args([
            "-y",
            "-loglevel",
            "error",
            "-f",
            "rawvideo",
            "-pix_fmt",
            "rgb24",
            "-s",
            &format!("{}x{}", spec.width, spec.height),
            "-r",
            &format!("{:.4}", spec.fps),
            "-i",
            "pipe:0",
            "-an",
            // yuv420p needs even dimensions; pad instead of resizing the source
            "-vf",
            "pad=ceil(iw/2)*2:ceil(ih/2)*2",
            "-c:v",
            &spec.codec,
            "-pix_fmt",
            "yuv420p",
        ])
        .arg(out_path);

        tracing::debug!(?cmd, "spawning ffmpeg video sink");
        let mut child = cmd.spawn().map_err(|e| {
            ConvertError::external(format!(
                "failed to spawn {} (is it installed?): {e}",
                ffmpeg.ffmpeg_cmd().display()
            ))
        })?;

        let Some(stdin) = child.stdin.take() else {
            let _ = child.kill();
            let _ = child.wait();
            return Err(ConvertError::external("failed to open ffmpeg stdin"));
        };

        Ok(Self {
            spec,
            out_path: out_path.to_path_buf(),
            child: Some(child),
            stdin: Some(stdin),
            frames_written: 0,
        })
    }

    pub fn spec(&self) -> &VideoSpec {
        &self.spec
    }

    pub fn frames_written(&self) -> usize {
        self.frames_written
    }

    /// Append the next frame.
    pub fn append(&mut self, frame: &RgbImage) -> Result<()> {
        let (w, h) = frame.dimensions();
        if w != self.spec.width || h != self.spec.height {
            return Err(ConvertError::DimensionMismatch {
                width: self.spec.width,
                height: self.spec.height,
                got_width: w,
                got_height: h,
            });
        }
        debug_assert_eq!(frame.as_raw().len(), self.spec.frame_len());

        let Some(stdin) = self.stdin.as_mut() else {
            return Err(ConvertError::encode("video sink is already closed"));
        };
        if let Err(e) = stdin.write_all(frame.as_raw()) {
            return Err(self.abort_with_diagnostic(e));
        }
        self.frames_written += 1;
        Ok(())
    }

    /// ffmpeg stopped reading: close the pipe, reap the child and report
    /// what it printed.
    fn abort_with_diagnostic(&mut self, write_error: std::io::Error) -> ConvertError {
        drop(self.stdin.take());
        let Some(child) = self.child.take() else {
            return ConvertError::encode(format!(
                "writing frame {}: {write_error}",
                self.frames_written
            ));
        };
        match child.wait_with_output() {
            Ok(output) => {
                let stderr = String::from_utf8_lossy(&output.stderr);
                let detail = stderr.trim();
                ConvertError::external(format!(
                    "ffmpeg exited with {} after {} frames of {}: {}",
                    output.status,
                    self.frames_written,
                    self.out_path.display(),
                    if detail.is_empty() {
                        write_error.to_string()
                    } else {
                        detail.to_string()
                    }
                ))
            }
            Err(e) => ConvertError::external(format!(
                "writing frame {} to ffmpeg: {write_error}; waiting for ffmpeg: {e}",
                self.frames_written
            )),
        }
    }

    /// Close the pipe and wait for ffmpeg to write the container trailer.
    pub fn finish(mut self) -> Result<()> {
        drop(self.stdin.take());
        let Some(child) = self.child.take() else {
            return Err(ConvertError::encode("video sink is already closed"));
        };

        let output = child
            .wait_with_output()
            .map_err(|e| ConvertError::external(format!("waiting for ffmpeg: {e}")))?;
        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(ConvertError::external(format!(
                "ffmpeg exited with {} while writing {}: {}",
                output.status,
                self.out_path.display(),
                stderr.trim()
            )));
        }
        Ok(())
    }
}

impl Drop for RasterVideoSink {
    fn drop(&mut self) {
        drop(self.stdin.take());
        if let Some(mut child) = self.child.take() {
            // EOF on stdin lets ffmpeg flush what it has
            if let Err(e) = child.wait() {
                tracing::warn!(error = %e, "failed to reap ffmpeg video sink");
            }
        }
    }
}

/// Writes an animated GIF in a single call.
///
/// Every frame gets its own adaptive 256-colour palette (NeuQuant, no
/// dithering), so colours may shift slightly from frame to frame.
#[derive(Debug, Clone, Copy)]
pub struct PaletteAnimationSink {
    /// NeuQuant sampling factor, 1 (best) to 30 (fastest).
    pub quantize_speed: i32,
}

impl Default for PaletteAnimationSink {
    fn default() -> Self {
        Self { quantize_speed: 10 }
    }
}

impl PaletteAnimationSink {
    pub fn new(quantize_speed: i32) -> Self {
        Self { quantize_speed }
    }

    /// Quantize and write `frames` to `out_path`, frame `i` shown for
    /// `durations_ms[i]` milliseconds.
    #[tracing::instrument(level = "debug", skip(self, frames, durations_ms), fields(frames = frames.len()))]
    pub fn encode(&self, out_path: &Path, frames: &[RgbImage], durations_ms: &[u32]) -> Result<()> {
        let file = File::create(out_path).map_err(|e| ConvertError::io(out_path, e))?;
        self.encode_to(BufWriter::new(file), frames, durations_ms)?;
        Ok(())
    }

    /// Same as [`PaletteAnimationSink::encode`] for any writer; returns the writer.
    pub fn encode_to<W: Write>(&self, writer: W, frames: &[RgbImage], durations_ms: &[u32]) -> Result<W> {
        if frames.is_empty() {
            return Err(ConvertError::encode("no frames to encode"));
        }
        if frames.len() != durations_ms.len() {
            return Err(ConvertError::encode(format!(
                "{} frames but {} durations",
                frames.len(),
                durations_ms.len()
            )));
        }
        if !(1..=30).contains(&self.quantize_speed) {
            return Err(ConvertError::encode("quantize speed must be between 1 and 30"));
        }

        let (width, height) = frames[0].dimensions();
        if let Some((i, f)) = frames.iter().enumerate().find(|(_, f)| f.dimensions() != (width, height)) {
            return Err(ConvertError::encode(format!(
                "frame {i} is {}x{}, expected {width}x{height}",
                f.width(),
                f.height()
            )));
        }
        let (w16, h16) = match (u16::try_from(width), u16::try_from(height)) {
            (Ok(w), Ok(h)) => (w, h),
            _ => {
                return Err(ConvertError::encode(format!(
                    "{width}x{height} exceeds the GIF size limit of 65535x65535"
                )))
            }
        };

        // independent per frame, order kept by collect
        let speed = self.quantize_speed;
        let quantized: Vec<gif::Frame<'static>> = frames
            .par_iter()
            .zip(durations_ms.par_iter())
            .map(|(frame, &ms)| {
                let mut gif_frame = gif::Frame::from_rgb_speed(w16, h16, frame.as_raw(), speed);
                gif_frame.delay = centiseconds(ms);
                gif_frame.dispose = DisposalMethod::Background;
                gif_frame
            })
            .collect();

        let mut encoder = Encoder::new(writer, w16, h16, &[])
            .map_err(|e| ConvertError::encode(format!("creating GIF encoder: {e}")))?;
        encoder
            .set_repeat(Repeat::Infinite)
            .map_err(|e| ConvertError::encode(format!("setting GIF loop: {e}")))?;
        for (i, gif_frame) in quantized.iter().enumerate() {
            encoder
                .write_frame(gif_frame)
                .map_err(|e| ConvertError::encode(format!("writing GIF frame {i}: {e}")))?;
        }
        let mut writer = encoder
            .into_inner()
            .map_err(|e| ConvertError::encode(format!("finishing GIF: {e}")))?;
        writer
            .flush()
            .map_err(|e| ConvertError::encode(format!("flushing GIF: {e}")))?;
        Ok(writer)
    }
}

/// GIF delays are in 1/100 s; round to nearest and never emit 0.
fn centiseconds(ms: u32) -> u16 {
    ((ms + 5) / 10).clamp(1, u32::from(u16::MAX)) as u16
}
