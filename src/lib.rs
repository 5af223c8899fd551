//! # alchemist - Batch Media Converter Library
//!
//! `alchemist` converts batches of media files between formats. Animated WebP
//! goes through an internal frame pipeline; every other conversion is handed
//! to ffmpeg.
//!
//! ## Features
//!
//! - Animated WebP to GIF with a per-frame adaptive palette
//! - Animated WebP to MP4 with a clamped effective frame rate
//! - MP4/GIF/MKV/audio conversions through ffmpeg, with a PS3 compatibility
//!   probe for MKV remuxing
//! - Sequential batch runs with pause, stop and overwrite confirmation
//! - Serializable progress events for UI integration
//!
//! ## Example
//!
//! ```no_run
//! use alchemist::{AlwaysOverwrite, AppConfig, BatchDriver, InputList, Operation};
//! use std::path::Path;
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let mut inputs = InputList::new();
//! inputs.add(Path::new("stickers"))?;
//!
//! let driver = BatchDriver::new(Operation::WebpToGif, "out", &AppConfig::default());
//! let report = driver.run(inputs.into_paths(), &mut AlwaysOverwrite, |event| {
//!     println!("{:.0}% {}", event.percent, event.status);
//! })?;
//! println!("{} files converted", report.summary());
//! # Ok(())
//! # }
//! ```
//!
//! ## Pause and stop
//!
//! [`BatchDriver::control`] hands out a [`ControlHandle`] that can be moved to
//! another thread. Pausing takes effect between files and, for the internal
//! pipeline, between frames. Stopping abandons the current file and removes
//! its partial output.

pub mod alpha;
pub mod batch;
pub mod config;
pub mod control;
pub mod encode;
pub mod error;
pub mod frames;
pub mod inputs;
pub mod ops;
pub mod pipeline;
pub mod rate;
pub mod transcode;

pub use alpha::{composite, has_transparency, WHITE};
pub use batch::{
    AlwaysOverwrite, BatchDriver, BatchReport, ConversionJob, JobOutcome, NeverOverwrite,
    OverwritePrompt, ProgressEvent,
};
pub use config::{load_config, AppConfig, FfmpegConfig};
pub use control::{ControlHandle, DriverState};
pub use encode::{PaletteAnimationSink, RasterVideoSink, VideoSpec};
pub use error::{ConvertError, Result};
pub use frames::{Frame, FrameSource};
pub use inputs::InputList;
pub use ops::{Engine, Operation};
pub use pipeline::{webp_to_gif, webp_to_video, PipelineSettings, PipelineStats};
pub use rate::{estimate_frame_rate, RateLimits};
pub use transcode::{ProcessTranscoder, Tool, ToolCommand, ToolOutput, Transcoder};
