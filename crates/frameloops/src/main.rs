mod config;
mod frames;

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Parser, ValueEnum};
use colored::Colorize;
use serde::Serialize;

use frameloops_core::{
    BatchMetrics, FrameStatus, FrameSummary, ModePreference, RefinementConfig, RefinementRunner,
    RunOutcome, StopReason,
};
use frameloops_evaluator::CommandEvaluator;
use frameloops_generator::{CommandConfig, CommandGenerator, Generator};
use frameloops_logging::{init_tracing, LogFormat, Logger, RunWriter};

use crate::config::{ProjectConfig, RefinementOverrides};

#[derive(Parser, Debug)]
#[command(
    name = "frameloops",
    about = "Iterative continuity refinement for generated storyboard frames",
    version,
    author
)]
struct Cli {
    /// Path to the frames file (default: ./frames.json)
    #[arg(short, long, default_value = "frames.json")]
    frames: PathBuf,

    /// Working directory (default: current directory)
    #[arg(short = 'd', long)]
    working_dir: Option<PathBuf>,

    /// Generator executable (overrides [generator].command)
    #[arg(long)]
    generator: Option<String>,

    /// Extra argument passed to the generator (repeatable)
    #[arg(long = "generator-arg", allow_hyphen_values = true)]
    generator_args: Vec<String>,

    /// Evaluator executable (overrides [evaluator].command)
    #[arg(long)]
    evaluator: Option<String>,

    /// Extra argument passed to the evaluator (repeatable)
    #[arg(long = "evaluator-arg", allow_hyphen_values = true)]
    evaluator_args: Vec<String>,

    /// Model for both generator and evaluator (if they support it)
    #[arg(short, long)]
    model: Option<String>,

    /// Directory for generated frames (default: ./frames_out)
    #[arg(short, long)]
    output_dir: Option<PathBuf>,

    /// Quality target on the 0-10 scale
    #[arg(short, long)]
    target: Option<f64>,

    /// Maximum refinement iterations
    #[arg(short = 'n', long)]
    max_iterations: Option<usize>,

    /// Maximum generation attempts per frame
    #[arg(long)]
    max_attempts: Option<usize>,

    /// Concurrent generator/evaluator calls
    #[arg(short, long)]
    workers: Option<usize>,

    /// Per generator call limit in seconds; a timeout fails the frame
    #[arg(long)]
    call_timeout_secs: Option<u64>,

    /// How refinement passes call the generator
    #[arg(long, value_enum)]
    mode: Option<ModeChoice>,

    /// Log output format
    #[arg(long, value_enum, default_value = "pretty")]
    log_format: LogFormatChoice,

    /// Tracing filter when RUST_LOG is not set
    #[arg(long, default_value = "warn")]
    log_level: String,

    /// Also write every event as JSON to this file
    #[arg(long)]
    log_file: Option<PathBuf>,

    /// Do not write a run record
    #[arg(long)]
    no_record: bool,

    /// Output final result as JSON
    #[arg(long)]
    json_output: bool,

    /// Dry run: show what would happen without executing
    #[arg(long)]
    dry_run: bool,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum ModeChoice {
    Adaptive,
    Create,
    Edit,
}

impl From<ModeChoice> for ModePreference {
    fn from(choice: ModeChoice) -> Self {
        match choice {
            ModeChoice::Adaptive => ModePreference::Adaptive,
            ModeChoice::Create => ModePreference::Create,
            ModeChoice::Edit => ModePreference::Edit,
        }
    }
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum LogFormatChoice {
    Pretty,
    Json,
    Compact,
    Quiet,
}

impl From<LogFormatChoice> for LogFormat {
    fn from(choice: LogFormatChoice) -> Self {
        match choice {
            LogFormatChoice::Pretty => LogFormat::Pretty,
            LogFormatChoice::Json => LogFormat::Json,
            LogFormatChoice::Compact => LogFormat::Compact,
            LogFormatChoice::Quiet => LogFormat::Quiet,
        }
    }
}

/// Final result printed with `--json-output`
#[derive(Serialize)]
struct Report<'a> {
    stop_reason: StopReason,
    iterations: usize,
    total_duration_secs: f64,
    metrics: &'a BatchMetrics,
    frames: Vec<FrameSummary>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let log_format: LogFormat = cli.log_format.into();
    init_tracing(&cli.log_level, log_format);

    // Determine working directory
    let working_dir = match cli.working_dir.clone() {
        Some(dir) => dir,
        None => std::env::current_dir().context("Failed to get current directory")?,
    };

    let project = ProjectConfig::load(&working_dir)?.unwrap_or_default();

    let overrides = RefinementOverrides {
        target_score: cli.target,
        max_iterations: cli.max_iterations,
        max_attempts: cli.max_attempts,
        workers: cli.workers,
        call_timeout: cli.call_timeout_secs.map(Duration::from_secs),
        mode_preference: cli.mode.map(Into::into),
    };
    let config = overrides.apply(project.refinement.clone());
    config.validate()?;

    let specs = frames::load_frames(&resolve(&working_dir, &cli.frames))?;

    let generator_command = cli
        .generator
        .clone()
        .or_else(|| project.generator.command.clone())
        .context("No generator configured. Use --generator or set [generator].command in frameloops.toml")?;
    let evaluator_command = cli
        .evaluator
        .clone()
        .or_else(|| project.evaluator.command.clone())
        .context("No evaluator configured. Use --evaluator or set [evaluator].command in frameloops.toml")?;

    let output_dir = resolve(
        &working_dir,
        cli.output_dir
            .as_deref()
            .or(project.generator.output_dir.as_deref())
            .unwrap_or_else(|| Path::new("frames_out")),
    );

    if cli.dry_run {
        println!("=== Dry Run ===");
        println!("Frames: {}", specs.len());
        for spec in &specs {
            let preview: String = spec.prompt.chars().take(80).collect();
            println!("  {} [{}] {}", spec.id, spec.grouping_key, preview);
        }
        println!("Working dir: {}", working_dir.display());
        println!("Output dir: {}", output_dir.display());
        println!("Generator: {}", generator_command);
        println!("Evaluator: {}", evaluator_command);
        println!("Target score: {}", config.target_score);
        println!("Max iterations: {}", config.max_iterations);
        println!("Max attempts per frame: {}", config.max_attempts_per_unit);
        println!("Workers: {}", config.workers);
        println!("Mode: {:?}", config.mode_preference);
        return Ok(());
    }

    std::fs::create_dir_all(&output_dir)
        .with_context(|| format!("Failed to create {}", output_dir.display()))?;

    let generator_args = if cli.generator_args.is_empty() {
        project.generator.args.clone()
    } else {
        cli.generator_args.clone()
    };
    let evaluator_args = if cli.evaluator_args.is_empty() {
        project.evaluator.args.clone()
    } else {
        cli.evaluator_args.clone()
    };

    let generator = CommandGenerator::new(
        PathBuf::from(&generator_command),
        output_dir,
        command_config(
            &working_dir,
            cli.model.clone().or_else(|| project.generator.model.clone()),
            project.generator.timeout,
            &project.generator.env,
        ),
    )
    .with_args(generator_args);
    let evaluator = CommandEvaluator::new(
        PathBuf::from(&evaluator_command),
        command_config(
            &working_dir,
            cli.model.clone().or_else(|| project.evaluator.model.clone()),
            project.evaluator.timeout,
            &project.evaluator.env,
        ),
    )
    .with_args(evaluator_args);

    // Verify both commands are available
    if !generator.is_available().await {
        anyhow::bail!(
            "Generator '{}' is not available. Make sure it's installed and in PATH.",
            generator_command
        );
    }
    if !evaluator.is_available().await {
        anyhow::bail!(
            "Evaluator '{}' is not available. Make sure it's installed and in PATH.",
            evaluator_command
        );
    }

    let logger = match cli.log_file {
        Some(ref path) => Logger::with_file(log_format, &resolve(&working_dir, path))
            .context("Failed to open log file")?,
        None => Logger::new(log_format),
    };

    let frame_ids: Vec<String> = specs.iter().map(|spec| spec.id.clone()).collect();
    let run_writer = if cli.no_record {
        None
    } else {
        match RunWriter::new(&frame_ids) {
            Ok(writer) => Some(Arc::new(writer)),
            Err(e) => {
                eprintln!("{} could not create run record: {}", "warning:".yellow(), e);
                None
            }
        }
    };

    let mut runner = RefinementRunner::new(&generator, &evaluator, Arc::new(logger));
    if let Some(ref writer) = run_writer {
        writer.write_start(
            &frame_ids,
            config.target_score,
            config.max_iterations,
            config.max_attempts_per_unit,
            &generator_command,
            &evaluator_command,
        );
        runner = runner.with_run_writer(writer.clone());
    }

    // Handle Ctrl+C gracefully
    let interrupt_handle = runner.interrupt_handle();
    ctrlc::set_handler(move || {
        eprintln!("\nInterrupted. Finishing in-flight calls...");
        interrupt_handle.store(true, Ordering::SeqCst);
    })
    .context("Failed to set Ctrl+C handler")?;

    let outcome = runner.run(specs, &config).await?;

    if let Some(ref writer) = run_writer {
        writer.write_end(
            &outcome.stop_reason.to_string(),
            outcome.iterations,
            outcome.total_duration_secs,
            &outcome.summaries(),
        );
    }

    // Output result
    if cli.json_output {
        let report = Report {
            stop_reason: outcome.stop_reason,
            iterations: outcome.iterations,
            total_duration_secs: outcome.total_duration_secs,
            metrics: &outcome.metrics,
            frames: outcome.summaries(),
        };
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        print_outcome(&outcome, &config);
        if let Some(ref writer) = run_writer {
            eprintln!("Run record: {}", writer.path().display());
        }
    }

    // Exit with appropriate code
    std::process::exit(outcome.exit_code(config.target_score));
}

fn resolve(working_dir: &Path, path: &Path) -> PathBuf {
    if path.is_absolute() {
        path.to_path_buf()
    } else {
        working_dir.join(path)
    }
}

fn command_config(
    working_dir: &Path,
    model: Option<String>,
    timeout: Option<Duration>,
    env: &BTreeMap<String, String>,
) -> CommandConfig {
    let mut config = CommandConfig::new(working_dir.to_path_buf());
    for (key, value) in env {
        config = config.with_env(key.clone(), value.clone());
    }
    if let Some(model) = model {
        config = config.with_model(model);
    }
    if let Some(timeout) = timeout {
        config = config.with_timeout(timeout);
    }
    config
}

fn print_outcome(outcome: &RunOutcome, config: &RefinementConfig) {
    let target_score = config.target_score;
    let header = match outcome.stop_reason {
        StopReason::Cancelled => "=== INTERRUPTED ===".yellow().bold(),
        _ if outcome.failed_frames() > 0 => "=== FINISHED WITH FAILURES ===".red().bold(),
        _ if outcome.is_success(target_score) => "=== SUCCESS ===".green().bold(),
        _ => "=== INCOMPLETE ===".yellow().bold(),
    };

    eprintln!();
    eprintln!("{}", header);
    eprintln!("Stop reason: {}", outcome.stop_reason);
    eprintln!("Iterations: {}", outcome.iterations);
    eprintln!("Duration: {:.1}s", outcome.total_duration_secs);
    eprintln!(
        "Average score: {:.1} (continuity {:.1}, min {:.1})",
        outcome.metrics.avg_score, outcome.metrics.avg_continuity, outcome.metrics.min_score
    );
    eprintln!(
        "At target: {}/{}",
        outcome.metrics.units_above_threshold,
        outcome.states.len()
    );

    eprintln!();
    for state in &outcome.states {
        let status = match state.status {
            FrameStatus::Complete
                if state.budget_exhausted(target_score, config.max_attempts_per_unit) =>
            {
                "budget exhausted".yellow().to_string()
            }
            FrameStatus::Complete => "complete".green().to_string(),
            FrameStatus::Failed => "failed".red().to_string(),
            other => other.to_string().dimmed().to_string(),
        };
        let artifact = state
            .current_artifact
            .as_ref()
            .map(|a| a.to_string())
            .unwrap_or_else(|| "-".to_string());
        eprintln!(
            "  {:<16} {:>4.1} {:>4.1}  {:<18} {}",
            state.id(),
            state.current_score,
            state.continuity_score,
            status,
            artifact
        );
        if let Some(ref error) = state.error {
            eprintln!("    {}", error.red());
        }
    }

    if !outcome.metrics.continuity_breaks.is_empty() {
        eprintln!();
        eprintln!("{}", "Continuity breaks:".bold());
        for issue in &outcome.metrics.continuity_breaks {
            eprintln!(
                "  {} vs {}: {}",
                issue.frame_id,
                issue.neighbor_id.as_deref().unwrap_or("?"),
                issue.issue
            );
        }
    }
}
