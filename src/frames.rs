//! Animated WebP decoding.
//!
//! [`FrameSource::open`] reads the container header and runs a timing pass
//! so the caller knows the frame count and every frame delay before any
//! encoder is opened. [`FrameSource::frames`] re-opens the file and yields
//! frames lazily; the decode handle lives inside the returned iterator and is
//! released when it is dropped, whether after the last frame or on abort.

use std::fs::File;
use std::io::BufReader;
use std::path::{Path, PathBuf};

use image::codecs::webp::WebPDecoder;
use image::{AnimationDecoder, ImageDecoder, RgbaImage};

use crate::error::{ConvertError, Result};
use crate::rate::effective_duration;

/// One decoded animation frame, composed onto the full canvas.
#[derive(Debug, Clone)]
pub struct Frame {
    pub image: RgbaImage,
    /// Display time in milliseconds, always >= 1.
    pub duration_ms: u32,
}

impl Frame {
    pub fn width(&self) -> u32 {
        self.image.width()
    }

    pub fn height(&self) -> u32 {
        self.image.height()
    }
}

/// An animated WebP whose header and timing have been read.
#[derive(Debug, Clone)]
pub struct FrameSource {
    path: PathBuf,
    width: u32,
    height: u32,
    animated: bool,
    durations: Vec<u32>,
}

impl FrameSource {
    /// Open `path` as an animated WebP.
    ///
    /// Fails with [`ConvertError::Decode`] when the file is not a parseable
    /// WebP or holds a single static image.
    #[tracing::instrument(level = "debug")]
    pub fn open(path: &Path) -> Result<Self> {
        let decoder = open_decoder(path)?;
        let (width, height) = decoder.dimensions();
        let animated = decoder.has_animation();
        if !animated {
            return Err(ConvertError::decode(format!(
                "{} is not animated",
                display_name(path)
            )));
        }

        let mut durations = Vec::new();
        for frame in decoder.into_frames() {
            let frame = frame.map_err(|e| {
                ConvertError::decode(format!("reading frame of {}: {e}", display_name(path)))
            })?;
            durations.push(frame_duration(&frame));
        }

        if durations.is_empty() {
            return Err(ConvertError::decode(format!(
                "{} contains no frames",
                display_name(path)
            )));
        }

        Ok(Self {
            path: path.to_path_buf(),
            width,
            height,
            animated,
            durations,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn is_animated(&self) -> bool {
        self.animated
    }

    pub fn frame_count(&self) -> usize {
        self.durations.len()
    }

    pub fn dimensions(&self) -> (u32, u32) {
        (self.width, self.height)
    }

    /// Per-frame display times in storage order, zero delays already
    /// replaced by the 100ms fallback.
    pub fn durations(&self) -> &[u32] {
        &self.durations
    }

    /// Re-open the file and decode frames in storage order.
    pub fn frames(&self) -> Result<FrameIter> {
        let decoder = open_decoder(&self.path)?;
        Ok(FrameIter {
            name: display_name(&self.path),
            inner: decoder.into_frames(),
            index: 0,
        })
    }
}

/// Lazy frame sequence holding the open decode handle.
pub struct FrameIter {
    name: String,
    inner: image::Frames<'static>,
    index: usize,
}

impl Iterator for FrameIter {
    type Item = Result<Frame>;

    fn next(&mut self) -> Option<Self::Item> {
        let frame = self.inner.next()?;
        let index = self.index;
        self.index += 1;
        Some(
            frame
                .map(|f| {
                    let duration_ms = frame_duration(&f);
                    Frame {
                        image: f.into_buffer(),
                        duration_ms,
                    }
                })
                .map_err(|e| ConvertError::decode(format!("frame {index} of {}: {e}", self.name))),
        )
    }
}

fn open_decoder(path: &Path) -> Result<WebPDecoder<BufReader<File>>> {
    let file = File::open(path).map_err(|e| ConvertError::io(path, e))?;
    WebPDecoder::new(BufReader::new(file))
        .map_err(|e| ConvertError::decode(format!("{} is not a valid WebP: {e}", display_name(path))))
}

fn frame_duration(frame: &image::Frame) -> u32 {
    let (numer, denom) = frame.delay().numer_denom_ms();
    let ms = if denom == 0 { 0 } else { numer / denom };
    effective_duration(ms)
}

pub(crate) fn display_name(path: &Path) -> String {
    path.file_name()
        .map(|s| s.to_string_lossy().to_string())
        .unwrap_or_else(|| path.display().to_string())
}
