//! External media tool boundary.
//!
//! The driver never spawns ffmpeg for container-level conversions itself; it
//! renders a [`CommandTemplate`] into a [`ToolCommand`] and hands it to a
//! [`Transcoder`]. [`ProcessTranscoder`] is the real implementation; tests
//! substitute their own.

use std::ffi::OsString;
use std::io::Read;
use std::path::Path;
use std::process::{Child, Command, Stdio};
use std::thread;
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};

use crate::config::FfmpegConfig;

pub const INPUT_PLACEHOLDER: &str = "{input}";
pub const OUTPUT_PLACEHOLDER: &str = "{output}";

/// Which external binary a command runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Tool {
    Ffmpeg,
    Ffprobe,
}

/// An argument list with `{input}` / `{output}` placeholders.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandTemplate {
    pub tool: Tool,
    pub args: Vec<String>,
}

impl CommandTemplate {
    pub fn new(tool: Tool, args: &[&str]) -> Self {
        Self {
            tool,
            args: args.iter().map(|s| s.to_string()).collect(),
        }
    }

    /// Substitute the placeholders. An argument that is exactly a
    /// placeholder receives the path unchanged, so non-UTF-8 paths survive.
    pub fn render(&self, input: &Path, output: &Path) -> ToolCommand {
        let args = self
            .args
            .iter()
            .map(|arg| match arg.as_str() {
                INPUT_PLACEHOLDER => input.as_os_str().to_os_string(),
                OUTPUT_PLACEHOLDER => output.as_os_str().to_os_string(),
                other => OsString::from(
                    other
                        .replace(INPUT_PLACEHOLDER, &input.to_string_lossy())
                        .replace(OUTPUT_PLACEHOLDER, &output.to_string_lossy()),
                ),
            })
            .collect();
        ToolCommand {
            tool: self.tool,
            args,
        }
    }
}

/// A fully substituted invocation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ToolCommand {
    pub tool: Tool,
    pub args: Vec<OsString>,
}

impl ToolCommand {
    pub fn new<I, S>(tool: Tool, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<OsString>,
    {
        Self {
            tool,
            args: args.into_iter().map(Into::into).collect(),
        }
    }

    /// Space-joined arguments, for logs.
    pub fn display_args(&self) -> String {
        self.args
            .iter()
            .map(|a| a.to_string_lossy())
            .collect::<Vec<_>>()
            .join(" ")
    }
}

/// What came back from one invocation.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ToolOutput {
    pub success: bool,
    pub timed_out: bool,
    pub stdout: String,
    /// stderr, or a description of why the process could not run.
    pub diagnostic: String,
}

impl ToolOutput {
    pub fn ok(stdout: impl Into<String>) -> Self {
        Self {
            success: true,
            stdout: stdout.into(),
            ..Self::default()
        }
    }

    pub fn failed(diagnostic: impl Into<String>) -> Self {
        Self {
            diagnostic: diagnostic.into(),
            ..Self::default()
        }
    }
}

/// Runs external tool commands synchronously.
pub trait Transcoder: Send + Sync {
    /// Run `command` to completion. With a `timeout`, the process is killed
    /// once it elapses and the output is marked `timed_out`.
    fn run(&self, command: &ToolCommand, timeout: Option<Duration>) -> ToolOutput;

    fn is_available(&self, _tool: Tool) -> bool {
        true
    }
}

/// [`Transcoder`] backed by child processes.
#[derive(Debug, Clone, Default)]
pub struct ProcessTranscoder {
    config: FfmpegConfig,
}

impl ProcessTranscoder {
    pub fn new(config: FfmpegConfig) -> Self {
        Self { config }
    }

    pub fn program(&self, tool: Tool) -> &Path {
        match tool {
            Tool::Ffmpeg => self.config.ffmpeg_cmd(),
            Tool::Ffprobe => self.config.ffprobe_cmd(),
        }
    }
}

impl Transcoder for ProcessTranscoder {
    fn run(&self, command: &ToolCommand, timeout: Option<Duration>) -> ToolOutput {
        let program = self.program(command.tool);
        tracing::debug!("executing: {} {}", program.display(), command.display_args());

        let child = Command::new(program)
            .args(&command.args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn();
        let child = match child {
            Ok(c) => c,
            Err(e) => return ToolOutput::failed(format!("failed to run {}: {e}", program.display())),
        };

        match timeout {
            None => match child.wait_with_output() {
                Ok(out) => ToolOutput {
                    success: out.status.success(),
                    timed_out: false,
                    stdout: String::from_utf8_lossy(&out.stdout).into_owned(),
                    diagnostic: String::from_utf8_lossy(&out.stderr).into_owned(),
                },
                Err(e) => ToolOutput::failed(format!("waiting for {}: {e}", program.display())),
            },
            Some(limit) => wait_with_timeout(child, limit),
        }
    }

    fn is_available(&self, tool: Tool) -> bool {
        tool_available(self.program(tool))
    }
}

/// True when `program -version` runs and exits cleanly.
pub fn tool_available(program: &Path) -> bool {
    Command::new(program)
        .arg("-version")
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .status()
        .map(|s| s.success())
        .unwrap_or(false)
}

const TIMEOUT_POLL: Duration = Duration::from_millis(20);

fn wait_with_timeout(mut child: Child, limit: Duration) -> ToolOutput {
    // drain pipes on helper threads so a chatty child cannot block on a full pipe
    let stdout = child.stdout.take().map(spawn_reader);
    let stderr = child.stderr.take().map(spawn_reader);
    let deadline = Instant::now() + limit;

    let (success, timed_out, wait_error) = loop {
        match child.try_wait() {
            Ok(Some(status)) => break (status.success(), false, None),
            Ok(None) if Instant::now() >= deadline => {
                let _ = child.kill();
                let _ = child.wait();
                break (false, true, None);
            }
            Ok(None) => thread::sleep(TIMEOUT_POLL),
            Err(e) => {
                let _ = child.kill();
                let _ = child.wait();
                break (false, false, Some(e));
            }
        }
    };

    let stdout = stdout.map(join_reader).unwrap_or_default();
    let mut diagnostic = stderr.map(join_reader).unwrap_or_default();
    if timed_out {
        diagnostic.push_str(&format!("\ntimed out after {:.1}s", limit.as_secs_f64()));
    }
    if let Some(e) = wait_error {
        diagnostic.push_str(&format!("\nwait failed: {e}"));
    }

    ToolOutput {
        success,
        timed_out,
        stdout,
        diagnostic,
    }
}

fn spawn_reader<R: Read + Send + 'static>(mut pipe: R) -> thread::JoinHandle<String> {
    thread::spawn(move || {
        let mut buf = Vec::new();
        let _ = pipe.read_to_end(&mut buf);
        String::from_utf8_lossy(&buf).into_owned()
    })
}

fn join_reader(handle: thread::JoinHandle<String>) -> String {
    handle.join().unwrap_or_default()
}
