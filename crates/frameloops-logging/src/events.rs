use colored::Colorize;
use serde::{Deserialize, Serialize};
use std::fs::File;
use std::io::Write;
use std::path::Path;
use std::sync::Mutex;

/// Structured log events for a refinement run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum LogEvent {
    RunStarted {
        frames: usize,
        target_score: f64,
        max_iterations: usize,
        max_attempts_per_unit: usize,
    },
    IterationStarted {
        iteration: usize,
        /// Frames with no artifact yet
        pending: usize,
        /// Refinement targets, worst first
        targets: Vec<String>,
    },
    FrameGenerationStarted {
        iteration: usize,
        frame_id: String,
        mode: String,
        attempt: usize,
        prompt_preview: String,
    },
    FrameGenerated {
        iteration: usize,
        frame_id: String,
        artifact: String,
        duration_secs: f64,
    },
    FrameGenerationFailed {
        iteration: usize,
        frame_id: String,
        error: String,
    },
    FrameEvaluated {
        iteration: usize,
        frame_id: String,
        score: f64,
        continuity_score: f64,
        summary: String,
        degraded: bool,
    },
    FrameCompleted {
        iteration: usize,
        frame_id: String,
        score: f64,
        budget_exhausted: bool,
    },
    MetricsComputed {
        iteration: usize,
        avg_score: f64,
        avg_continuity: f64,
        min_score: f64,
        units_above_threshold: usize,
        units_evaluated: usize,
        continuity_breaks: usize,
    },
    RunCompleted {
        iterations: usize,
        stop_reason: String,
        avg_score: f64,
        avg_continuity: f64,
        duration_secs: f64,
    },
    RunCancelled {
        iterations: usize,
    },
}

impl LogEvent {
    /// Add a timestamp to serialize with the event
    fn with_timestamp(&self) -> serde_json::Value {
        let mut value = serde_json::to_value(self).unwrap_or_default();
        if let Some(obj) = value.as_object_mut() {
            obj.insert(
                "timestamp".to_string(),
                serde_json::Value::String(chrono::Utc::now().to_rfc3339()),
            );
        }
        value
    }
}

/// Log output format
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum LogFormat {
    /// Human-readable format with colors and visual structure
    #[default]
    Pretty,
    /// JSON lines format for machine consumption
    Json,
    /// Compact single-line format
    Compact,
    /// No console output
    Quiet,
}

impl std::str::FromStr for LogFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "pretty" => Ok(LogFormat::Pretty),
            "json" => Ok(LogFormat::Json),
            "compact" => Ok(LogFormat::Compact),
            "quiet" | "none" => Ok(LogFormat::Quiet),
            _ => Err(format!("Unknown log format: {}", s)),
        }
    }
}

/// Logger for frameloops events - handles both console output and file logging
pub struct Logger {
    format: LogFormat,
    file_writer: Option<Mutex<File>>,
}

impl Logger {
    pub fn new(format: LogFormat) -> Self {
        Self {
            format,
            file_writer: None,
        }
    }

    /// Create a logger with file output in addition to console
    pub fn with_file(format: LogFormat, log_path: &Path) -> std::io::Result<Self> {
        if let Some(parent) = log_path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let file = std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(log_path)?;

        Ok(Self {
            format,
            file_writer: Some(Mutex::new(file)),
        })
    }

    pub fn log(&self, event: &LogEvent) {
        // File output is always JSON
        if let Some(ref writer) = self.file_writer {
            if let Ok(mut file) = writer.lock() {
                let json = event.with_timestamp();
                let _ = writeln!(file, "{}", json);
            }
        }

        let line = match self.format {
            LogFormat::Json => serde_json::to_string(event).ok(),
            LogFormat::Pretty => Self::render_pretty(event),
            LogFormat::Compact => Self::render_compact(event),
            LogFormat::Quiet => None,
        };
        if let Some(line) = line {
            let _ = writeln!(std::io::stderr(), "{}", line);
        }
    }

    fn render_pretty(event: &LogEvent) -> Option<String> {
        let text = match event {
            LogEvent::RunStarted {
                frames,
                target_score,
                max_iterations,
                max_attempts_per_unit,
            } => {
                let rule = "─".repeat(69);
                format!(
                    "\n{}\n{}  {}\n{}  {} {}   {} {:.1}   {} {}   {} {}\n{}\n",
                    format!("╭{}╮", rule).bright_blue(),
                    "│".bright_blue(),
                    "frameloops".bold().bright_white(),
                    "│".bright_blue(),
                    "Frames:".dimmed(),
                    frames,
                    "Target:".dimmed(),
                    target_score,
                    "Iterations:".dimmed(),
                    max_iterations,
                    "Attempts/frame:".dimmed(),
                    max_attempts_per_unit,
                    format!("╰{}╯", rule).bright_blue(),
                )
            }
            LogEvent::IterationStarted {
                iteration,
                pending,
                targets,
            } => {
                let iter_text = format!("─ Iteration {} ", iteration + 1);
                let padding = "─".repeat(67usize.saturating_sub(iter_text.chars().count()));
                let mut text = format!(
                    "{}{}{}",
                    "┌".bright_blue(),
                    iter_text.bright_blue().bold(),
                    padding.bright_blue()
                );
                if *pending > 0 {
                    text.push_str(&format!("\n  {} {} new frame(s)", "▶".bright_cyan(), pending));
                }
                if !targets.is_empty() {
                    text.push_str(&format!(
                        "\n  {} refining (worst first): {}",
                        "▶".bright_cyan(),
                        targets.join(", ")
                    ));
                }
                text
            }
            LogEvent::FrameGenerationStarted { .. } => return None,
            LogEvent::FrameGenerated {
                frame_id,
                duration_secs,
                ..
            } => format!(
                "    {} {} generated ({:.1}s)",
                "✓".bright_green(),
                frame_id,
                duration_secs
            ),
            LogEvent::FrameGenerationFailed {
                frame_id, error, ..
            } => format!(
                "    {} {} failed: {}",
                "✗".bright_red(),
                frame_id,
                error.bright_red()
            ),
            LogEvent::FrameEvaluated {
                frame_id,
                score,
                continuity_score,
                degraded,
                ..
            } => {
                let marker = if *degraded {
                    "?".bright_yellow()
                } else {
                    "◆".bright_magenta()
                };
                format!(
                    "    {} {} score {:.1} continuity {:.1}",
                    marker, frame_id, score, continuity_score
                )
            }
            LogEvent::FrameCompleted {
                frame_id,
                score,
                budget_exhausted,
                ..
            } => {
                if *budget_exhausted {
                    format!(
                        "    {} {} out of attempts at {:.1}",
                        "⚠".bright_yellow(),
                        frame_id,
                        score
                    )
                } else {
                    format!("    {} {} complete at {:.1}", "✓".bright_green(), frame_id, score)
                }
            }
            LogEvent::MetricsComputed {
                avg_score,
                avg_continuity,
                min_score,
                units_above_threshold,
                units_evaluated,
                continuity_breaks,
                ..
            } => format!(
                "\n  {} avg {:.2}  continuity {:.2}  min {:.1}  on target {}/{}  breaks {}\n{}\n",
                "Σ".bright_blue(),
                avg_score,
                avg_continuity,
                min_score,
                units_above_threshold,
                units_evaluated,
                continuity_breaks,
                format!("└{}┘", "─".repeat(69)).bright_blue()
            ),
            // The final summary is printed by the binary
            LogEvent::RunCompleted { .. } => return None,
            LogEvent::RunCancelled { iterations } => format!(
                "\n{} Cancelled after {} iteration(s)",
                "✗".bright_red(),
                iterations
            ),
        };
        Some(text)
    }

    fn render_compact(event: &LogEvent) -> Option<String> {
        let timestamp = chrono::Utc::now().format("%H:%M:%S");
        let msg = match event {
            LogEvent::RunStarted { frames, .. } => format!("run:start frames={}", frames),
            LogEvent::IterationStarted {
                iteration, targets, ..
            } => format!("iter:start:{} targets={}", iteration + 1, targets.len()),
            LogEvent::FrameGenerationStarted {
                iteration,
                frame_id,
                mode,
                attempt,
                ..
            } => format!(
                "gen:start:{} {} {} attempt={}",
                iteration + 1,
                frame_id,
                mode,
                attempt
            ),
            LogEvent::FrameGenerated {
                iteration,
                frame_id,
                duration_secs,
                ..
            } => format!("gen:done:{} {} {:.1}s", iteration + 1, frame_id, duration_secs),
            LogEvent::FrameGenerationFailed {
                iteration,
                frame_id,
                error,
            } => format!("gen:fail:{} {} {}", iteration + 1, frame_id, error),
            LogEvent::FrameEvaluated {
                iteration,
                frame_id,
                score,
                continuity_score,
                ..
            } => format!(
                "eval:{} {} {:.1}/{:.1}",
                iteration + 1,
                frame_id,
                score,
                continuity_score
            ),
            LogEvent::FrameCompleted {
                iteration,
                frame_id,
                budget_exhausted,
                ..
            } => format!(
                "frame:{}:{} {}",
                if *budget_exhausted { "exhausted" } else { "done" },
                iteration + 1,
                frame_id
            ),
            LogEvent::MetricsComputed {
                iteration,
                avg_score,
                avg_continuity,
                ..
            } => format!(
                "metrics:{} avg={:.2} cont={:.2}",
                iteration + 1,
                avg_score,
                avg_continuity
            ),
            LogEvent::RunCompleted {
                iterations,
                stop_reason,
                duration_secs,
                ..
            } => format!(
                "run:done:{} {} {:.1}s",
                iterations, stop_reason, duration_secs
            ),
            LogEvent::RunCancelled { iterations } => format!("run:cancel:{}", iterations),
        };
        Some(format!("[{}] {}", timestamp, msg))
    }
}
