//! Application configuration.
//!
//! Looked up like this, first hit wins:
//! 1. `<data dir>/alchemist/alchemist.json`
//! 2. `./alchemist.json`
//! 3. built-in defaults

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use image::Rgb;
use serde::{Deserialize, Serialize};

use crate::error::{ConvertError, Result};
use crate::rate::RateLimits;

pub const CONFIG_FILE_NAME: &str = "alchemist.json";

fn default_ffmpeg_path() -> PathBuf {
    PathBuf::from("ffmpeg")
}

fn default_ffprobe_path() -> PathBuf {
    PathBuf::from("ffprobe")
}

fn default_probe_timeout_secs() -> u64 {
    30
}

/// Where to find the external media tools.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FfmpegConfig {
    #[serde(default = "default_ffmpeg_path")]
    pub ffmpeg_path: PathBuf,
    #[serde(default = "default_ffprobe_path")]
    pub ffprobe_path: PathBuf,
    /// Upper bound for each codec probe.
    #[serde(default = "default_probe_timeout_secs")]
    pub probe_timeout_secs: u64,
}

impl Default for FfmpegConfig {
    fn default() -> Self {
        Self {
            ffmpeg_path: default_ffmpeg_path(),
            ffprobe_path: default_ffprobe_path(),
            probe_timeout_secs: default_probe_timeout_secs(),
        }
    }
}

impl FfmpegConfig {
    pub fn ffmpeg_cmd(&self) -> &Path {
        &self.ffmpeg_path
    }

    pub fn ffprobe_cmd(&self) -> &Path {
        &self.ffprobe_path
    }

    pub fn probe_timeout(&self) -> Duration {
        Duration::from_secs(self.probe_timeout_secs)
    }
}

/// Top-level settings for the converter.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub ffmpeg: FfmpegConfig,
    pub min_fps: f64,
    pub max_fps: f64,
    /// Backdrop for transparent WebP pixels, as RGB.
    pub background: [u8; 3],
    /// ffmpeg encoder used by the internal WebP to MP4 path.
    pub video_codec: String,
    /// NeuQuant sampling factor, 1 (best) to 30 (fastest).
    pub gif_quantize_speed: i32,
    pub pause_poll_ms: u64,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            ffmpeg: FfmpegConfig::default(),
            min_fps: 5.0,
            max_fps: 60.0,
            background: [255, 255, 255],
            video_codec: "mpeg4".to_string(),
            gif_quantize_speed: 10,
            pause_poll_ms: 100,
        }
    }
}

impl AppConfig {
    pub fn from_file(path: &Path) -> Result<Self> {
        let text = fs::read_to_string(path).map_err(|e| ConvertError::io(path, e))?;
        let cfg: AppConfig = serde_json::from_str(&text)
            .map_err(|e| ConvertError::config(format!("parsing {}: {e}", path.display())))?;
        cfg.validate()?;
        Ok(cfg)
    }

    pub fn validate(&self) -> Result<()> {
        if !(self.min_fps.is_finite() && self.min_fps > 0.0) {
            return Err(ConvertError::config("min_fps must be a positive number"));
        }
        if !(self.max_fps.is_finite() && self.max_fps >= self.min_fps) {
            return Err(ConvertError::config("max_fps must be >= min_fps"));
        }
        if !(1..=30).contains(&self.gif_quantize_speed) {
            return Err(ConvertError::config("gif_quantize_speed must be between 1 and 30"));
        }
        if self.video_codec.trim().is_empty() {
            return Err(ConvertError::config("video_codec cannot be empty"));
        }
        Ok(())
    }

    pub fn rate_limits(&self) -> RateLimits {
        RateLimits {
            min: self.min_fps,
            max: self.max_fps,
        }
    }

    pub fn background(&self) -> Rgb<u8> {
        Rgb(self.background)
    }

    pub fn pause_poll(&self) -> Duration {
        Duration::from_millis(self.pause_poll_ms.max(1))
    }
}

/// Candidate config locations, in lookup order.
pub fn config_search_paths() -> Vec<PathBuf> {
    let mut tried = Vec::new();
    if let Some(mut d) = dirs::data_dir() {
        d.push("alchemist");
        d.push(CONFIG_FILE_NAME);
        tried.push(d);
    }
    tried.push(PathBuf::from(CONFIG_FILE_NAME));
    tried
}

/// Load the first config file found, or the built-in defaults.
pub fn load_config() -> Result<AppConfig> {
    for p in config_search_paths() {
        if p.exists() {
            tracing::debug!(path = %p.display(), "loading config");
            return AppConfig::from_file(&p);
        }
    }
    Ok(AppConfig::default())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_valid() {
        let cfg = AppConfig::default();
        cfg.validate().unwrap();
        assert_eq!(cfg.rate_limits(), RateLimits::default());
        assert_eq!(cfg.background(), crate::alpha::WHITE);
    }

    #[test]
    fn partial_file_fills_in_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(CONFIG_FILE_NAME);
        fs::write(
            &path,
            r#"{ "max_fps": 30, "ffmpeg": { "ffmpeg_path": "/opt/ff/bin/ffmpeg" } }"#,
        )
        .unwrap();

        let cfg = AppConfig::from_file(&path).unwrap();
        assert_eq!(cfg.max_fps, 30.0);
        assert_eq!(cfg.min_fps, 5.0);
        assert_eq!(cfg.ffmpeg.ffmpeg_cmd(), Path::new("/opt/ff/bin/ffmpeg"));
        assert_eq!(cfg.ffmpeg.ffprobe_cmd(), Path::new("ffprobe"));
        assert_eq!(cfg.ffmpeg.probe_timeout(), Duration::from_secs(30));
    }

    #[test]
    fn inverted_rate_limits_are_rejected() {
        let cfg = AppConfig {
            min_fps: 40.0,
            max_fps: 20.0,
            ..AppConfig::default()
        };
        assert!(matches!(cfg.validate(), Err(ConvertError::Config(_))));
    }

    #[test]
    fn quantize_speed_out_of_range_is_rejected() {
        let cfg = AppConfig {
            gif_quantize_speed: 0,
            ..AppConfig::default()
        };
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn malformed_json_is_a_config_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(CONFIG_FILE_NAME);
        fs::write(&path, "{ not json").unwrap();
        assert!(matches!(AppConfig::from_file(&path), Err(ConvertError::Config(_))));
    }
}
