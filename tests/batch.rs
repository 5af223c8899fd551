mod common;

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::{Duration, Instant};

use alchemist::{
    AlwaysOverwrite, AppConfig, BatchDriver, ConvertError, DriverState, JobOutcome,
    NeverOverwrite, Operation, OverwritePrompt, Tool, ToolCommand, ToolOutput, Transcoder,
};
use common::{solid, write_animated_webp, write_static_webp};
use tempfile::tempdir;

fn animated(dir: &Path, name: &str) -> PathBuf {
    let path = dir.join(name);
    write_animated_webp(
        &path,
        &[
            (solid(6, 6, [200, 40, 40, 255]), 80),
            (solid(6, 6, [40, 200, 40, 255]), 80),
        ],
    );
    path
}

fn driver(op: Operation, out: &Path) -> BatchDriver {
    BatchDriver::new(op, out, &AppConfig::default())
}

/// Records every command; writes a stub output for ffmpeg and answers probes
/// from a fixed script.
#[derive(Clone, Default)]
struct FakeTranscoder {
    calls: Arc<Mutex<Vec<ToolCommand>>>,
    probe_video: Option<&'static str>,
    probe_audio: Option<&'static str>,
}

impl Transcoder for FakeTranscoder {
    fn run(&self, command: &ToolCommand, _timeout: Option<Duration>) -> ToolOutput {
        self.calls.lock().unwrap().push(command.clone());
        match command.tool {
            Tool::Ffmpeg => {
                fs::write(command.args.last().unwrap(), b"stub").unwrap();
                ToolOutput::ok("")
            }
            Tool::Ffprobe => {
                let video = command.args.iter().any(|a| a == "v:0");
                let answer = if video { self.probe_video } else { self.probe_audio };
                answer.map_or_else(|| ToolOutput::failed("probe failed"), ToolOutput::ok)
            }
        }
    }
}

#[test]
fn static_webp_fails_while_animated_ones_convert() {
    let dir = tempdir().unwrap();
    let out = dir.path().join("out");
    let still = dir.path().join("still.webp");
    write_static_webp(&still, &solid(4, 4, [9, 9, 9, 255]));
    let inputs = vec![
        animated(dir.path(), "one.webp"),
        still,
        animated(dir.path(), "two.webp"),
    ];

    let report = driver(Operation::WebpToGif, &out)
        .run(inputs, &mut AlwaysOverwrite, |_| {})
        .unwrap();

    assert_eq!(report.state, DriverState::Completed);
    assert_eq!(report.count(JobOutcome::Succeeded), 2);
    assert_eq!(report.count(JobOutcome::Failed), 1);
    assert_eq!(report.summary(), "2/3");
    assert_eq!(report.jobs[1].outcome, JobOutcome::Failed);
    assert!(report.jobs[1].message.as_deref().unwrap().contains("not animated"));
    assert!(out.join("one.gif").exists());
    assert!(out.join("two.gif").exists());
    assert!(!out.join("still.gif").exists());
}

#[test]
fn declining_every_overwrite_leaves_outputs_untouched() {
    let dir = tempdir().unwrap();
    let out = dir.path().join("out");
    let inputs = vec![animated(dir.path(), "a.webp"), animated(dir.path(), "b.webp")];

    let first = driver(Operation::WebpToGif, &out)
        .run(inputs.clone(), &mut AlwaysOverwrite, |_| {})
        .unwrap();
    assert_eq!(first.summary(), "2/2");

    let before: Vec<_> = ["a.gif", "b.gif"]
        .iter()
        .map(|n| fs::read(out.join(n)).unwrap())
        .collect();
    fs::write(out.join("a.gif"), b"marker").unwrap();

    let second = driver(Operation::WebpToGif, &out)
        .run(inputs, &mut NeverOverwrite, |_| {})
        .unwrap();

    assert_eq!(second.summary(), "0/2");
    assert!(second.jobs.iter().all(|j| j.outcome == JobOutcome::Skipped));
    assert_eq!(fs::read(out.join("a.gif")).unwrap(), b"marker");
    assert_eq!(fs::read(out.join("b.gif")).unwrap(), before[1]);
    assert_eq!(fs::read_dir(&out).unwrap().count(), 2);
}

#[test]
fn prompt_sees_each_existing_output() {
    struct Counting(Vec<PathBuf>);
    impl OverwritePrompt for Counting {
        fn confirm_overwrite(&mut self, output: &Path) -> bool {
            self.0.push(output.to_path_buf());
            self.0.len() == 1
        }
    }

    let dir = tempdir().unwrap();
    let out = dir.path().join("out");
    fs::create_dir(&out).unwrap();
    fs::write(out.join("a.gif"), b"old").unwrap();
    fs::write(out.join("b.gif"), b"old").unwrap();
    let inputs = vec![animated(dir.path(), "a.webp"), animated(dir.path(), "b.webp")];

    let mut prompt = Counting(Vec::new());
    let report = driver(Operation::WebpToGif, &out)
        .run(inputs, &mut prompt, |_| {})
        .unwrap();

    assert_eq!(prompt.0, [out.join("a.gif"), out.join("b.gif")]);
    assert_eq!(report.jobs[0].outcome, JobOutcome::Succeeded);
    assert_eq!(report.jobs[1].outcome, JobOutcome::Skipped);
    assert_eq!(fs::read(out.join("b.gif")).unwrap(), b"old");
}

#[test]
fn stop_after_first_file_leaves_the_rest_pending() {
    let dir = tempdir().unwrap();
    let out = dir.path().join("out");
    let inputs: Vec<_> = (0..5)
        .map(|i| animated(dir.path(), &format!("f{i}.webp")))
        .collect();

    let driver = driver(Operation::WebpToGif, &out);
    let control = driver.control();
    let mut events = Vec::new();
    let report = driver
        .run(inputs, &mut AlwaysOverwrite, |event| {
            if event.outcome.is_some() {
                control.stop();
            }
            events.push(event.clone());
        })
        .unwrap();

    assert_eq!(report.state, DriverState::Stopped);
    assert_eq!(control.state(), DriverState::Stopped);
    assert_eq!(report.count(JobOutcome::Succeeded), 1);
    assert_eq!(report.count(JobOutcome::Pending), 4);
    assert_eq!(report.summary(), "1/5");
    assert_eq!(events.last().unwrap().state, DriverState::Stopped);
    assert_eq!(fs::read_dir(&out).unwrap().count(), 1);
}

#[test]
fn paused_run_waits_for_resume() {
    let dir = tempdir().unwrap();
    let out = dir.path().join("out");
    let inputs = vec![animated(dir.path(), "a.webp")];

    let driver = driver(Operation::WebpToGif, &out);
    let control = driver.control();
    control.pause();

    let remote = control.clone();
    let resumer = thread::spawn(move || {
        while remote.state() != DriverState::Paused {
            thread::sleep(Duration::from_millis(5));
        }
        thread::sleep(Duration::from_millis(150));
        remote.resume();
    });

    let started = Instant::now();
    let report = driver
        .run(inputs, &mut AlwaysOverwrite, |_| {})
        .unwrap();
    resumer.join().unwrap();

    assert!(started.elapsed() >= Duration::from_millis(150));
    assert_eq!(report.state, DriverState::Completed);
    assert_eq!(report.summary(), "1/1");
}

#[test]
fn prerequisite_failure_keeps_driver_idle() {
    let dir = tempdir().unwrap();
    let driver = driver(Operation::WebpToGif, &dir.path().join("out"));
    let control = driver.control();

    let err = driver.run(Vec::new(), &mut AlwaysOverwrite, |_| {}).unwrap_err();
    assert!(matches!(err, ConvertError::Prerequisite(_)));
    assert_eq!(control.state(), DriverState::Idle);
}

#[test]
fn ready_mkv_is_stream_copied() {
    let dir = tempdir().unwrap();
    let input = dir.path().join("show.mkv");
    fs::write(&input, b"mkv").unwrap();
    let fake = FakeTranscoder {
        probe_video: Some("h264\nyuv420p\n"),
        probe_audio: Some("aac\n"),
        ..FakeTranscoder::default()
    };

    let report = driver(Operation::MkvToMp4, &dir.path().join("out"))
        .with_transcoder(fake.clone())
        .run(vec![input], &mut AlwaysOverwrite, |_| {})
        .unwrap();

    assert_eq!(report.summary(), "1/1");
    assert_eq!(report.jobs[0].message.as_deref(), Some("remuxed"));
    let calls = fake.calls.lock().unwrap();
    let convert = calls.iter().find(|c| c.tool == Tool::Ffmpeg).unwrap();
    assert!(convert.args.iter().any(|a| a == "copy"));
}

#[test]
fn failed_probe_falls_back_to_reencode() {
    let dir = tempdir().unwrap();
    let input = dir.path().join("show.mkv");
    fs::write(&input, b"mkv").unwrap();
    let fake = FakeTranscoder::default();

    let report = driver(Operation::MkvToMp4, &dir.path().join("out"))
        .with_transcoder(fake.clone())
        .run(vec![input], &mut AlwaysOverwrite, |_| {})
        .unwrap();

    assert_eq!(report.jobs[0].message.as_deref(), Some("re-encoded"));
    let calls = fake.calls.lock().unwrap();
    let convert = calls.iter().find(|c| c.tool == Tool::Ffmpeg).unwrap();
    assert!(convert.args.iter().any(|a| a == "libx264"));
    assert!(dir.path().join("out").join("show.mp4").exists());
}

/// Fails every command the way ffmpeg does when it refuses a job.
#[derive(Clone, Default)]
struct RefusingTranscoder {
    calls: Arc<Mutex<Vec<ToolCommand>>>,
}

impl Transcoder for RefusingTranscoder {
    fn run(&self, command: &ToolCommand, _timeout: Option<Duration>) -> ToolOutput {
        self.calls.lock().unwrap().push(command.clone());
        ToolOutput::failed("Output same as Input #0 - exiting")
    }
}

#[test]
fn extract_audio_never_targets_its_own_input() {
    let dir = tempdir().unwrap();
    let input = dir.path().join("song.m4a");
    fs::write(&input, b"original audio").unwrap();
    let fake = RefusingTranscoder::default();

    let report = driver(Operation::ExtractAudio, dir.path())
        .with_transcoder(fake.clone())
        .run(vec![input.clone()], &mut AlwaysOverwrite, |_| {})
        .unwrap();

    assert_eq!(report.jobs[0].outcome, JobOutcome::Skipped);
    assert!(report.jobs[0].message.as_deref().unwrap().contains("input"));
    assert_eq!(fs::read(&input).unwrap(), b"original audio");
    assert!(fake.calls.lock().unwrap().is_empty());
}

#[test]
fn failed_tool_run_keeps_the_previous_output() {
    let dir = tempdir().unwrap();
    let out = dir.path().join("out");
    fs::create_dir(&out).unwrap();
    fs::write(out.join("clip.mp4"), b"old").unwrap();
    let input = dir.path().join("clip.gif");
    fs::write(&input, b"gif").unwrap();
    let fresh = dir.path().join("fresh.gif");
    fs::write(&fresh, b"gif").unwrap();

    let report = driver(Operation::GifToMp4, &out)
        .with_transcoder(RefusingTranscoder::default())
        .run(vec![input, fresh], &mut AlwaysOverwrite, |_| {})
        .unwrap();

    assert_eq!(report.count(JobOutcome::Failed), 2);
    assert_eq!(fs::read(out.join("clip.mp4")).unwrap(), b"old");
    assert!(!out.join("fresh.mp4").exists());
}

#[test]
fn webp_to_mp4_with_real_ffmpeg() {
    if !common::ffmpeg_available() {
        eprintln!("skipping: ffmpeg not on PATH");
        return;
    }

    let dir = tempdir().unwrap();
    let out = dir.path().join("out");
    let inputs = vec![animated(dir.path(), "clip.webp")];

    let report = driver(Operation::WebpToMp4, &out)
        .run(inputs, &mut AlwaysOverwrite, |_| {})
        .unwrap();

    assert_eq!(report.summary(), "1/1", "{:?}", report.jobs);
    assert!(report.jobs[0].message.as_deref().unwrap().contains("FPS"));
    assert!(fs::metadata(out.join("clip.mp4")).unwrap().len() > 0);
}
