use alchemist::{
    load_config, AlwaysOverwrite, AppConfig, BatchDriver, BatchReport, ControlHandle, InputList,
    JobOutcome, NeverOverwrite, Operation, OverwritePrompt, ProgressEvent,
};
use anyhow::{anyhow, bail, Context, Result};
use clap::{ArgAction, Parser, Subcommand};
use dialoguer::theme::ColorfulTheme;
use dialoguer::{Input, MultiSelect, Select};
use indicatif::{ProgressBar, ProgressStyle};
use std::io::{self, BufRead, IsTerminal};
use std::path::{Path, PathBuf};
use std::sync::mpsc;
use std::thread;
use walkdir::WalkDir;

#[derive(Subcommand, Debug)]
enum Command {
    /// List the supported conversions
    Operations,
}

#[derive(Parser, Debug)]
#[command(
    version,
    about = "Batch media converter for animated WebP, GIF, MP4, MKV and audio files.",
    args_conflicts_with_subcommands = true
)]
struct Args {
    #[command(subcommand)]
    cmd: Option<Command>,

    /// Conversion to run, e.g. webp-to-gif (see `alchemist operations`)
    operation: Option<Operation>,

    /// Input files or directories (directories are expanded one level)
    inputs: Vec<PathBuf>,

    /// Output directory for converted files
    #[arg(long, short)]
    out: Option<PathBuf>,

    /// Overwrite existing outputs without asking
    #[arg(long, short, default_value_t = false, conflicts_with = "no_clobber")]
    yes: bool,

    /// Never overwrite existing outputs
    #[arg(long, default_value_t = false)]
    no_clobber: bool,

    /// Print progress events and the final report as JSON lines
    #[arg(long, default_value_t = false)]
    json: bool,

    /// Use this config file instead of the default lookup
    #[arg(long)]
    config: Option<PathBuf>,

    /// Increase log verbosity (-v info, -vv debug)
    #[arg(long, short, action = ArgAction::Count)]
    verbose: u8,
}

fn main() -> Result<()> {
    let args = Args::parse();
    init_tracing(args.verbose);

    if let Some(Command::Operations) = &args.cmd {
        print_operations();
        return Ok(());
    }

    let cfg = match &args.config {
        Some(path) => AppConfig::from_file(path)
            .with_context(|| format!("loading config {}", path.display()))?,
        None => load_config().context("loading config")?,
    };

    let is_interactive = io::stdin().is_terminal() && !args.json;

    // --- Interactive Prompts ---
    let operation = match args.operation {
        Some(op) => op,
        None if is_interactive => select_operation()?,
        None => bail!("An operation must be provided. Run `alchemist operations` to list them."),
    };

    let mut inputs = InputList::new();
    for path in &args.inputs {
        inputs
            .add(path)
            .with_context(|| format!("adding input {}", path.display()))?;
    }
    if inputs.is_empty() {
        if !is_interactive {
            bail!("No input files given.");
        }
        for path in select_inputs(operation)? {
            inputs
                .add(&path)
                .with_context(|| format!("adding input {}", path.display()))?;
        }
    }

    let out_dir = match args.out {
        Some(dir) => dir,
        None if is_interactive => PathBuf::from(
            Input::<String>::with_theme(&ColorfulTheme::default())
                .with_prompt("Output directory")
                .default("converted".to_string())
                .interact_text()?,
        ),
        None => bail!("--out must be provided when not running interactively."),
    };

    // --- Execution ---
    let bar = if args.json {
        ProgressBar::hidden()
    } else {
        let pb = ProgressBar::new(100);
        pb.set_style(
            ProgressStyle::default_bar()
                .template("{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}% {msg}")
                .context("building progress bar style")?
                .progress_chars("#>-"),
        );
        pb
    };

    let mut prompt: Box<dyn OverwritePrompt> = if args.yes {
        Box::new(AlwaysOverwrite)
    } else if args.no_clobber || !is_interactive {
        Box::new(NeverOverwrite)
    } else {
        Box::new(DialoguerPrompt::new(bar.clone()))
    };
    let keyboard_controls = args.yes || args.no_clobber || !is_interactive;

    let driver = BatchDriver::new(operation, out_dir, &cfg);
    let control = driver.control();
    if keyboard_controls && !args.json {
        bar.println("Type p + Enter to pause/resume, s + Enter to stop.");
    }
    if keyboard_controls {
        spawn_keyboard_controls(control.clone(), bar.clone());
    }

    let (tx, rx) = mpsc::channel::<ProgressEvent>();
    let paths = inputs.into_paths();
    let worker = thread::spawn(move || {
        driver.run(paths, prompt.as_mut(), |event| {
            let _ = tx.send(event.clone());
        })
    });

    for event in rx {
        if args.json {
            println!("{}", serde_json::to_string(&event)?);
        } else {
            bar.set_position(event.percent.round() as u64);
            bar.set_message(event.status.clone());
        }
    }

    let report = worker
        .join()
        .map_err(|_| anyhow!("conversion worker panicked"))??;
    bar.finish_and_clear();

    if args.json {
        println!("{}", serde_json::to_string(&report)?);
    } else {
        print_report(&report);
    }

    if report.has_failures() {
        std::process::exit(1);
    }
    Ok(())
}

fn init_tracing(verbose: u8) {
    let level = match verbose {
        0 => tracing::Level::WARN,
        1 => tracing::Level::INFO,
        _ => tracing::Level::DEBUG,
    };
    tracing_subscriber::fmt()
        .with_max_level(level)
        .with_target(false)
        .with_writer(io::stderr)
        .init();
}

fn print_operations() {
    for op in Operation::ALL {
        let inputs = op
            .input_extensions()
            .map(|exts| exts.join(" "))
            .unwrap_or_else(|| "any".to_string());
        println!(
            "{:<14} {} [{} -> {}]",
            op.name(),
            op.description(),
            inputs,
            op.output_extension()
        );
    }
}

fn select_operation() -> Result<Operation> {
    let items: Vec<String> = Operation::ALL
        .iter()
        .map(|op| format!("{:<14} {}", op.name(), op.description()))
        .collect();
    let selection = Select::with_theme(&ColorfulTheme::default())
        .with_prompt("Choose a conversion")
        .default(0)
        .items(&items)
        .interact()?;
    Ok(Operation::ALL[selection])
}

fn select_inputs(operation: Operation) -> Result<Vec<PathBuf>> {
    let files = find_media_files(operation);
    if files.is_empty() {
        let path: String = Input::with_theme(&ColorfulTheme::default())
            .with_prompt("No matching files here. Input file or directory")
            .interact_text()?;
        return Ok(vec![PathBuf::from(path)]);
    }

    let labels: Vec<String> = files.iter().map(|p| p.display().to_string()).collect();
    let defaults = vec![true; files.len()];
    let chosen = MultiSelect::with_theme(&ColorfulTheme::default())
        .with_prompt("Choose input files (space to toggle)")
        .items(&labels)
        .defaults(&defaults)
        .interact()?;
    if chosen.is_empty() {
        bail!("No input files selected.");
    }
    Ok(chosen.into_iter().map(|i| files[i].clone()).collect())
}

fn find_media_files(operation: Operation) -> Vec<PathBuf> {
    let mut files: Vec<PathBuf> = WalkDir::new(".")
        .min_depth(1)
        .max_depth(1)
        .into_iter()
        .filter_map(|e| e.ok())
        .filter(|e| e.path().is_file() && operation.matches(e.path()))
        .map(|e| e.into_path())
        .collect();
    files.sort();
    files
}

fn spawn_keyboard_controls(control: ControlHandle, bar: ProgressBar) {
    thread::spawn(move || {
        for line in io::stdin().lock().lines() {
            let Ok(line) = line else { break };
            match line.trim() {
                "p" | "P" => {
                    if control.toggle_pause() {
                        bar.println("Paused. Type p + Enter to resume.");
                    } else {
                        bar.println("Resumed.");
                    }
                }
                "s" | "S" => {
                    control.stop();
                    bar.println("Stopping after the current frame...");
                    break;
                }
                _ => {}
            }
            if control.state().is_terminal() {
                break;
            }
        }
    });
}

fn print_report(report: &BatchReport) {
    for job in &report.jobs {
        let name = job
            .input
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        match job.outcome {
            JobOutcome::Failed => println!(
                "failed:  {name}: {}",
                job.message.as_deref().unwrap_or("unknown error")
            ),
            JobOutcome::Skipped => println!(
                "skipped: {name}: {}",
                job.message.as_deref().unwrap_or("")
            ),
            JobOutcome::Pending => println!("pending: {name}"),
            JobOutcome::Succeeded => {}
        }
    }
    match report.state {
        alchemist::DriverState::Stopped => {
            println!("Conversion stopped! {} files converted", report.summary())
        }
        _ => println!("Conversion complete! {} files converted", report.summary()),
    }
}

/// Overwrite confirmation on the terminal, with sticky "to all" answers.
struct DialoguerPrompt {
    sticky: Option<bool>,
    bar: ProgressBar,
}

impl DialoguerPrompt {
    fn new(bar: ProgressBar) -> Self {
        Self { sticky: None, bar }
    }
}

impl OverwritePrompt for DialoguerPrompt {
    fn confirm_overwrite(&mut self, output: &Path) -> bool {
        if let Some(answer) = self.sticky {
            return answer;
        }
        let choice = self.bar.suspend(|| {
            Select::with_theme(&ColorfulTheme::default())
                .with_prompt(format!("{} already exists. Overwrite?", output.display()))
                .items(&["Yes", "No", "Yes to all", "No to all"])
                .default(1)
                .interact()
        });
        match choice {
            Ok(0) => true,
            Ok(2) => {
                self.sticky = Some(true);
                true
            }
            Ok(3) => {
                self.sticky = Some(false);
                false
            }
            Ok(_) => false,
            Err(e) => {
                tracing::warn!("overwrite prompt failed, keeping {}: {e}", output.display());
                false
            }
        }
    }
}
