//! Catalogue of supported conversions.

use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::frames::display_name;
use crate::transcode::{CommandTemplate, Tool, ToolCommand, Transcoder};

/// Audio containers accepted by [`Operation::AudioToMp3`].
pub const AUDIO_EXTENSIONS: &[&str] = &[
    "mp3", "wav", "flac", "aac", "m4a", "ogg", "wma", "aiff", "alac",
];

/// A batch-wide conversion, selected once per run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Operation {
    WebpToGif,
    WebpToMp4,
    Mp4ToGif,
    GifToMp4,
    MkvToMp4,
    ExtractAudio,
    AudioToMp3,
}

/// How a matching file is converted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Engine {
    /// Frame pipeline writing a palette GIF.
    InternalGif,
    /// Frame pipeline piping raw frames into ffmpeg.
    InternalVideo,
    /// One external command.
    External(CommandTemplate),
    /// Probe codecs, then stream-copy or re-encode.
    Ps3Remux,
}

impl Operation {
    pub const ALL: [Operation; 7] = [
        Operation::WebpToGif,
        Operation::WebpToMp4,
        Operation::Mp4ToGif,
        Operation::GifToMp4,
        Operation::MkvToMp4,
        Operation::ExtractAudio,
        Operation::AudioToMp3,
    ];

    pub fn name(self) -> &'static str {
        match self {
            Operation::WebpToGif => "webp-to-gif",
            Operation::WebpToMp4 => "webp-to-mp4",
            Operation::Mp4ToGif => "mp4-to-gif",
            Operation::GifToMp4 => "gif-to-mp4",
            Operation::MkvToMp4 => "mkv-to-mp4",
            Operation::ExtractAudio => "extract-audio",
            Operation::AudioToMp3 => "audio-to-mp3",
        }
    }

    pub fn description(self) -> &'static str {
        match self {
            Operation::WebpToGif => "Animated WebP to GIF (per-frame palette, transparency flattened)",
            Operation::WebpToMp4 => "Animated WebP to MP4 (frame rate from frame timing)",
            Operation::Mp4ToGif => "MP4 to GIF at 30fps, 480px wide",
            Operation::GifToMp4 => "GIF to H.264 MP4",
            Operation::MkvToMp4 => "MKV to PS3-compatible MP4 (copies streams when possible)",
            Operation::ExtractAudio => "Copy the audio track of any video into .m4a",
            Operation::AudioToMp3 => "Audio files to 320k MP3, metadata kept",
        }
    }

    /// Extensions (lowercase, no dot) this operation accepts; `None` means any.
    pub fn input_extensions(self) -> Option<&'static [&'static str]> {
        match self {
            Operation::WebpToGif | Operation::WebpToMp4 => Some(&["webp"]),
            Operation::Mp4ToGif => Some(&["mp4"]),
            Operation::GifToMp4 => Some(&["gif"]),
            Operation::MkvToMp4 => Some(&["mkv"]),
            Operation::ExtractAudio => None,
            Operation::AudioToMp3 => Some(AUDIO_EXTENSIONS),
        }
    }

    pub fn output_extension(self) -> &'static str {
        match self {
            Operation::WebpToGif | Operation::Mp4ToGif => "gif",
            Operation::WebpToMp4 | Operation::GifToMp4 | Operation::MkvToMp4 => "mp4",
            Operation::ExtractAudio => "m4a",
            Operation::AudioToMp3 => "mp3",
        }
    }

    pub fn matches(self, input: &Path) -> bool {
        match self.input_extensions() {
            None => true,
            Some(exts) => extension_of(input).is_some_and(|e| exts.contains(&e.as_str())),
        }
    }

    /// Reason to leave an otherwise matching input alone.
    pub fn skip_reason(self, input: &Path) -> Option<String> {
        match self {
            Operation::AudioToMp3 if extension_of(input).as_deref() == Some("mp3") => {
                Some(format!("{} is already MP3", display_name(input)))
            }
            _ => None,
        }
    }

    /// `{output_dir}/{input_stem}.{output_extension}`
    pub fn output_path(self, input: &Path, output_dir: &Path) -> PathBuf {
        let stem = input
            .file_stem()
            .map(|s| s.to_os_string())
            .unwrap_or_else(|| "output".into());
        let mut name = stem;
        name.push(".");
        name.push(self.output_extension());
        output_dir.join(name)
    }

    pub fn engine(self) -> Engine {
        match self {
            Operation::WebpToGif => Engine::InternalGif,
            Operation::WebpToMp4 => Engine::InternalVideo,
            Operation::MkvToMp4 => Engine::Ps3Remux,
            Operation::Mp4ToGif => Engine::External(CommandTemplate::new(
                Tool::Ffmpeg,
                &[
                    "-y",
                    "-i",
                    "{input}",
                    "-vf",
                    "fps=30,scale=480:-1:flags=lanczos",
                    "{output}",
                ],
            )),
            Operation::GifToMp4 => Engine::External(CommandTemplate::new(
                Tool::Ffmpeg,
                &[
                    "-y",
                    "-i",
                    "{input}",
                    "-vf",
                    "scale=trunc(iw/2)*2:trunc(ih/2)*2",
                    "-pix_fmt",
                    "yuv420p",
                    "-c:v",
                    "libx264",
                    "-movflags",
                    "faststart",
                    "{output}",
                ],
            )),
            Operation::ExtractAudio => Engine::External(CommandTemplate::new(
                Tool::Ffmpeg,
                &["-y", "-i", "{input}", "-vn", "-acodec", "copy", "{output}"],
            )),
            Operation::AudioToMp3 => Engine::External(CommandTemplate::new(
                Tool::Ffmpeg,
                &[
                    "-y",
                    "-i",
                    "{input}",
                    "-c:a",
                    "libmp3lame",
                    "-b:a",
                    "320k",
                    "-map_metadata",
                    "0",
                    "-id3v2_version",
                    "3",
                    "{output}",
                ],
            )),
        }
    }

    /// Whether the run needs a working ffmpeg before it can start.
    pub fn requires_ffmpeg(self) -> bool {
        !matches!(self, Operation::WebpToGif)
    }
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for Operation {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let wanted = s.trim().to_ascii_lowercase().replace('_', "-");
        Operation::ALL
            .into_iter()
            .find(|op| op.name() == wanted)
            .ok_or_else(|| {
                let available = Operation::ALL.map(Operation::name).join(", ");
                format!("unknown operation '{s}'. Available operations: {available}")
            })
    }
}

pub(crate) fn extension_of(path: &Path) -> Option<String> {
    path.extension()
        .and_then(|e| e.to_str())
        .map(|e| e.to_ascii_lowercase())
}

pub fn ps3_reencode_template() -> CommandTemplate {
    CommandTemplate::new(
        Tool::Ffmpeg,
        &[
            "-i",
            "{input}",
            "-c:v",
            "libx264",
            "-preset",
            "medium",
            "-crf",
            "23",
            "-pix_fmt",
            "yuv420p",
            "-movflags",
            "+faststart",
            "-c:a",
            "aac",
            "-b:a",
            "192k",
            "-y",
            "{output}",
        ],
    )
}

pub fn ps3_copy_template() -> CommandTemplate {
    CommandTemplate::new(
        Tool::Ffmpeg,
        &["-i", "{input}", "-c", "copy", "-movflags", "+faststart", "-y", "{output}"],
    )
}

fn probe_command(input: &Path, stream: &str, entries: &str) -> ToolCommand {
    ToolCommand::new(
        Tool::Ffprobe,
        [
            "-v".into(),
            "error".into(),
            "-select_streams".into(),
            stream.into(),
            "-show_entries".into(),
            entries.into(),
            "-of".into(),
            "default=noprint_wrappers=1:nokey=1".into(),
            input.as_os_str().to_os_string(),
        ],
    )
}

/// Why the first video stream is not PS3-ready, from ffprobe's
/// `codec_name` / `pix_fmt` lines.
pub fn video_reencode_reason(probe_stdout: &str) -> Option<String> {
    let mut lines = probe_stdout.trim().lines().map(str::trim);
    let codec = lines.next().unwrap_or("");
    let pix_fmt = lines.next().unwrap_or("");
    if codec != "h264" || pix_fmt != "yuv420p" {
        Some(format!("codec={codec}, pixel_format={pix_fmt}"))
    } else {
        None
    }
}

/// Why the first audio stream is not PS3-ready. A missing audio stream
/// counts as not ready.
pub fn audio_reencode_reason(probe_stdout: &str) -> Option<String> {
    let codec = probe_stdout.trim().lines().next().unwrap_or("").trim();
    if matches!(codec, "aac" | "mp3") {
        None
    } else {
        Some(format!("audio codec={codec}"))
    }
}

/// Decide whether `input` must be re-encoded for PS3 playback.
///
/// Each probe is bounded by `timeout`. A probe that fails, times out or
/// cannot be read means re-encode; only a clean h264/yuv420p + aac/mp3
/// result allows a stream copy.
pub fn needs_ps3_reencode(transcoder: &dyn Transcoder, input: &Path, timeout: Duration) -> bool {
    let name = display_name(input);

    let video = transcoder.run(
        &probe_command(input, "v:0", "stream=codec_name,pix_fmt"),
        Some(timeout),
    );
    if !video.success {
        tracing::warn!(
            "error analyzing {name} (timed out: {}): {}; assuming re-encode",
            video.timed_out,
            video.diagnostic.trim()
        );
        return true;
    }
    if let Some(reason) = video_reencode_reason(&video.stdout) {
        tracing::info!("{name} needs re-encoding: {reason}");
        return true;
    }

    let audio = transcoder.run(&probe_command(input, "a:0", "stream=codec_name"), Some(timeout));
    if !audio.success {
        tracing::warn!(
            "error analyzing audio of {name} (timed out: {}): {}; assuming re-encode",
            audio.timed_out,
            audio.diagnostic.trim()
        );
        return true;
    }
    if let Some(reason) = audio_reencode_reason(&audio.stdout) {
        tracing::info!("{name} needs re-encoding: {reason}");
        return true;
    }

    false
}
