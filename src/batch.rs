//! Sequential batch driver.
//!
//! A [`BatchDriver`] owns one run: it turns the input list into
//! [`ConversionJob`]s, checks prerequisites, then visits every job in order,
//! honouring pause and stop requests made through its [`ControlHandle`].
//! Per-file failures are recorded on the job and never abort the run.

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;

use crate::config::AppConfig;
use crate::control::{ControlHandle, DriverState};
use crate::error::{ConvertError, Result};
use crate::frames::display_name;
use crate::ops::{self, Engine, Operation};
use crate::pipeline::{self, PipelineSettings};
use crate::transcode::{ProcessTranscoder, Tool, ToolCommand, Transcoder};

/// Final state of one file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum JobOutcome {
    Pending,
    Succeeded,
    Failed,
    Skipped,
}

/// One input file and where its output goes.
#[derive(Debug, Clone, Serialize)]
pub struct ConversionJob {
    pub input: PathBuf,
    pub output: PathBuf,
    pub outcome: JobOutcome,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

impl ConversionJob {
    fn new(input: PathBuf, output: PathBuf) -> Self {
        Self {
            input,
            output,
            outcome: JobOutcome::Pending,
            message: None,
        }
    }

    fn settle(&mut self, outcome: JobOutcome, message: impl Into<String>) {
        self.outcome = outcome;
        self.message = Some(message.into());
    }
}

/// Mutable state of a run. Built fresh by [`BatchDriver::run`] and returned
/// inside the [`BatchReport`].
#[derive(Debug, Clone)]
struct BatchState {
    jobs: Vec<ConversionJob>,
    successes: usize,
}

impl BatchState {
    fn new(operation: Operation, inputs: Vec<PathBuf>, output_dir: &Path) -> Self {
        let jobs = inputs
            .into_iter()
            .map(|input| {
                let output = operation.output_path(&input, output_dir);
                ConversionJob::new(input, output)
            })
            .collect();
        Self { jobs, successes: 0 }
    }
}

/// Asked before an existing output file is replaced.
pub trait OverwritePrompt: Send {
    fn confirm_overwrite(&mut self, output: &Path) -> bool;
}

/// Replaces existing outputs without asking.
#[derive(Debug, Clone, Copy, Default)]
pub struct AlwaysOverwrite;

impl OverwritePrompt for AlwaysOverwrite {
    fn confirm_overwrite(&mut self, _output: &Path) -> bool {
        true
    }
}

/// Keeps existing outputs; their jobs are skipped.
#[derive(Debug, Clone, Copy, Default)]
pub struct NeverOverwrite;

impl OverwritePrompt for NeverOverwrite {
    fn confirm_overwrite(&mut self, _output: &Path) -> bool {
        false
    }
}

/// Progress notification, emitted when a file starts, when it finishes, and
/// once more when the run ends.
///
/// `percent` is `index / total * 100` on the start event of the file at
/// `index`, `(index + 1) / total * 100` on its finish event and 100 on the
/// final event.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ProgressEvent {
    pub percent: f64,
    pub file_name: String,
    pub status: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub outcome: Option<JobOutcome>,
    pub state: DriverState,
}

/// Outcome of a whole run.
#[derive(Debug, Clone, Serialize)]
pub struct BatchReport {
    pub operation: Operation,
    pub state: DriverState,
    pub succeeded: usize,
    pub jobs: Vec<ConversionJob>,
}

impl BatchReport {
    pub fn total(&self) -> usize {
        self.jobs.len()
    }

    pub fn count(&self, outcome: JobOutcome) -> usize {
        self.jobs.iter().filter(|j| j.outcome == outcome).count()
    }

    pub fn has_failures(&self) -> bool {
        self.count(JobOutcome::Failed) > 0
    }

    /// `"succeeded/total"`.
    pub fn summary(&self) -> String {
        format!("{}/{}", self.succeeded, self.total())
    }
}

/// Runs one operation over a list of inputs.
pub struct BatchDriver {
    operation: Operation,
    output_dir: PathBuf,
    settings: PipelineSettings,
    probe_timeout: Duration,
    transcoder: Arc<dyn Transcoder>,
    control: ControlHandle,
}

impl BatchDriver {
    pub fn new(operation: Operation, output_dir: impl Into<PathBuf>, config: &AppConfig) -> Self {
        Self {
            operation,
            output_dir: output_dir.into(),
            settings: PipelineSettings::from(config),
            probe_timeout: config.ffmpeg.probe_timeout(),
            transcoder: Arc::new(ProcessTranscoder::new(config.ffmpeg.clone())),
            control: ControlHandle::new(),
        }
    }

    /// Replace the process-backed transcoder.
    pub fn with_transcoder(mut self, transcoder: impl Transcoder + 'static) -> Self {
        self.transcoder = Arc::new(transcoder);
        self
    }

    pub fn with_settings(mut self, settings: PipelineSettings) -> Self {
        self.settings = settings;
        self
    }

    /// Handle for pausing or stopping this run from another thread.
    pub fn control(&self) -> ControlHandle {
        self.control.clone()
    }

    pub fn operation(&self) -> Operation {
        self.operation
    }

    /// Visit every input in order.
    ///
    /// Only prerequisite failures are returned as errors; the driver then
    /// stays [`DriverState::Idle`]. Everything else ends up on a job.
    pub fn run<F>(
        self,
        inputs: Vec<PathBuf>,
        prompt: &mut dyn OverwritePrompt,
        mut on_progress: F,
    ) -> Result<BatchReport>
    where
        F: FnMut(&ProgressEvent),
    {
        let mut state = BatchState::new(self.operation, inputs, &self.output_dir);
        self.check_prerequisites(&state)?;

        self.control.set_state(DriverState::Running);
        tracing::info!(
            "starting {} on {} files into {}",
            self.operation,
            state.jobs.len(),
            self.output_dir.display()
        );

        let total = state.jobs.len();
        let mut stopped = false;
        for index in 0..total {
            if self.control.checkpoint(self.settings.pause_poll).is_err() {
                stopped = true;
                break;
            }

            let percent = index as f64 / total as f64 * 100.0;
            let job = &mut state.jobs[index];
            let file_name = display_name(&job.input);
            on_progress(&ProgressEvent {
                percent,
                file_name: file_name.clone(),
                status: format!("Converting {file_name}"),
                outcome: None,
                state: self.control.state(),
            });

            match self.process(job, prompt) {
                Ok(()) => {}
                Err(ConvertError::Stopped) => {
                    job.message = Some("stopped".to_string());
                    tracing::info!("conversion of {file_name} stopped");
                    stopped = true;
                    break;
                }
                Err(e) => {
                    tracing::warn!("error processing {file_name}: {e}");
                    job.settle(JobOutcome::Failed, e.to_string());
                }
            }
            if job.outcome == JobOutcome::Succeeded {
                state.successes += 1;
            }

            let done = (index + 1) as f64 / total as f64 * 100.0;
            on_progress(&ProgressEvent {
                percent: done,
                file_name: file_name.clone(),
                status: job.message.clone().unwrap_or_default(),
                outcome: Some(job.outcome),
                state: self.control.state(),
            });
        }

        let final_state = if stopped {
            DriverState::Stopped
        } else {
            DriverState::Completed
        };
        self.control.set_state(final_state);

        let report = BatchReport {
            operation: self.operation,
            state: final_state,
            succeeded: state.successes,
            jobs: state.jobs,
        };
        let status = match final_state {
            DriverState::Stopped => format!("Stopped! {} files converted", report.summary()),
            _ => format!("Complete! {} files converted", report.summary()),
        };
        tracing::info!("{status}");
        on_progress(&ProgressEvent {
            percent: 100.0,
            file_name: String::new(),
            status,
            outcome: None,
            state: final_state,
        });
        Ok(report)
    }

    fn check_prerequisites(&self, state: &BatchState) -> Result<()> {
        if state.jobs.is_empty() {
            return Err(ConvertError::prerequisite("no input files selected"));
        }

        if self.output_dir.exists() && !self.output_dir.is_dir() {
            return Err(ConvertError::prerequisite(format!(
                "output path {} is not a directory",
                self.output_dir.display()
            )));
        }
        fs::create_dir_all(&self.output_dir).map_err(|e| {
            ConvertError::prerequisite(format!(
                "cannot create output directory {}: {e}",
                self.output_dir.display()
            ))
        })?;

        if self.operation.requires_ffmpeg() && !self.transcoder.is_available(Tool::Ffmpeg) {
            return Err(ConvertError::prerequisite(
                "ffmpeg is not installed or not on PATH",
            ));
        }
        if self.operation == Operation::MkvToMp4 && !self.transcoder.is_available(Tool::Ffprobe) {
            tracing::warn!("ffprobe not found; every MKV will be re-encoded");
        }
        Ok(())
    }

    fn process(&self, job: &mut ConversionJob, prompt: &mut dyn OverwritePrompt) -> Result<()> {
        let op = self.operation;
        let name = display_name(&job.input);

        if !op.matches(&job.input) {
            let wanted = op
                .input_extensions()
                .map(|exts| exts.join(", "))
                .unwrap_or_default();
            tracing::info!("skipping {name}: not a {wanted} file");
            job.settle(JobOutcome::Skipped, format!("not a {wanted} file"));
            return Ok(());
        }
        if let Some(reason) = op.skip_reason(&job.input) {
            tracing::info!("skipping {name}: {reason}");
            job.settle(JobOutcome::Skipped, reason);
            return Ok(());
        }
        if same_file(&job.input, &job.output) {
            tracing::warn!("skipping {name}: output path is the input file");
            job.settle(JobOutcome::Skipped, "output would overwrite the input file");
            return Ok(());
        }
        let existed = job.output.exists();
        if existed && !prompt.confirm_overwrite(&job.output) {
            tracing::info!("skipping {name}: kept existing {}", job.output.display());
            job.settle(JobOutcome::Skipped, "output exists, not overwritten");
            return Ok(());
        }

        self.control.checkpoint(self.settings.pause_poll)?;
        let message = self.convert(&job.input, &job.output, existed)?;
        tracing::info!("converted {name} -> {}", display_name(&job.output));
        job.settle(JobOutcome::Succeeded, message);
        Ok(())
    }

    fn convert(&self, input: &Path, output: &Path, existed: bool) -> Result<String> {
        match self.operation.engine() {
            Engine::InternalGif => {
                let stats = pipeline::webp_to_gif(input, output, &self.settings, &self.control)?;
                Ok(format!("{} frames", stats.frames))
            }
            Engine::InternalVideo => {
                let stats =
                    pipeline::webp_to_video(input, output, &self.settings, &self.control)?;
                Ok(format!(
                    "{} frames at {:.2} FPS",
                    stats.frames,
                    stats.fps.unwrap_or_default()
                ))
            }
            Engine::External(template) => {
                self.run_external(&template.render(input, output), output, existed)?;
                Ok("converted".to_string())
            }
            Engine::Ps3Remux => {
                let reencode =
                    ops::needs_ps3_reencode(self.transcoder.as_ref(), input, self.probe_timeout);
                let template = if reencode {
                    ops::ps3_reencode_template()
                } else {
                    ops::ps3_copy_template()
                };
                self.run_external(&template.render(input, output), output, existed)?;
                Ok(if reencode { "re-encoded" } else { "remuxed" }.to_string())
            }
        }
    }

    /// Run one external command. A failed run removes the output only when
    /// this job created it.
    fn run_external(&self, command: &ToolCommand, output: &Path, existed: bool) -> Result<()> {
        let result = self.transcoder.run(command, None);
        if result.success {
            return Ok(());
        }
        if !existed {
            pipeline::remove_partial(output);
        }
        let detail = result.diagnostic.trim();
        Err(ConvertError::external(if detail.is_empty() {
            format!("{:?} exited with an error", command.tool)
        } else {
            detail.to_string()
        }))
    }
}

fn same_file(a: &Path, b: &Path) -> bool {
    match (fs::canonicalize(a), fs::canonicalize(b)) {
        (Ok(a), Ok(b)) => a == b,
        _ => false,
    }
}
