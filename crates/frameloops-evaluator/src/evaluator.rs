use async_trait::async_trait;
use frameloops_generator::{ArtifactHandle, CommandConfig, ProcessSpawner};
use std::path::PathBuf;
use tracing::{debug, info, warn};

use crate::{Evaluation, EvaluationParseError, EvaluatorPrompts};

/// An adjacent frame supplied for continuity checks
#[derive(Debug, Clone, Copy)]
pub struct Neighbor<'a> {
    pub frame_id: &'a str,
    pub artifact: &'a ArtifactHandle,
    pub context: &'a str,
}

/// Inputs for evaluating one frame in its continuity window.
#[derive(Debug, Clone, Copy)]
pub struct EvaluationRequest<'a> {
    pub frame_id: &'a str,
    pub artifact: &'a ArtifactHandle,
    pub context: &'a str,
    pub previous: Option<Neighbor<'a>>,
    pub next: Option<Neighbor<'a>>,
    pub iteration: usize,
}

/// Scores frames. Implementations must be total: internal failures are
/// reported through [`Evaluation::degraded`], never as errors.
#[async_trait]
pub trait Evaluator: Send + Sync {
    fn name(&self) -> &str;

    async fn evaluate(&self, request: EvaluationRequest<'_>) -> Evaluation;
}

#[derive(Debug, thiserror::Error)]
pub enum EvaluationError {
    #[error("Evaluator execution error: {0}")]
    AdapterError(String),

    #[error("Failed to parse evaluation: {0}")]
    ParseError(#[from] EvaluationParseError),
}

/// Evaluator backed by an external vision-model command.
///
/// Invoked as `<binary> [args..] --artifact <a> [--previous <a>] [--next <a>]
/// [--model <m>] -- <prompt>`; stdout must contain an evaluation block.
pub struct CommandEvaluator {
    binary_path: PathBuf,
    extra_args: Vec<String>,
    config: CommandConfig,
}

impl CommandEvaluator {
    pub fn new(binary_path: PathBuf, config: CommandConfig) -> Self {
        Self {
            binary_path,
            extra_args: Vec::new(),
            config,
        }
    }

    pub fn with_args(mut self, args: Vec<String>) -> Self {
        self.extra_args = args;
        self
    }

    fn build_args(&self, request: &EvaluationRequest<'_>, prompt: String) -> Vec<String> {
        let mut args = self.extra_args.clone();
        args.push("--artifact".to_string());
        args.push(request.artifact.to_string());
        if let Some(previous) = request.previous {
            args.push("--previous".to_string());
            args.push(previous.artifact.to_string());
        }
        if let Some(next) = request.next {
            args.push("--next".to_string());
            args.push(next.artifact.to_string());
        }
        if let Some(ref model) = self.config.model {
            args.push("--model".to_string());
            args.push(model.clone());
        }
        args.push("--".to_string());
        args.push(prompt);
        args
    }

    pub async fn is_available(&self) -> bool {
        let args = vec!["--version".to_string()];
        ProcessSpawner::spawn(&self.binary_path, &args, &self.config)
            .await
            .map(|output| output.success())
            .unwrap_or(false)
    }

    /// Run the evaluator command, surfacing failures
    pub async fn try_evaluate(
        &self,
        request: EvaluationRequest<'_>,
    ) -> Result<Evaluation, EvaluationError> {
        let prompt = EvaluatorPrompts::build_evaluation_prompt(&request);

        debug!(
            frame = request.frame_id,
            prompt_len = prompt.len(),
            iteration = request.iteration,
            "Running frame evaluation"
        );

        let args = self.build_args(&request, prompt);
        let output = ProcessSpawner::spawn(&self.binary_path, &args, &self.config)
            .await
            .map_err(|e| EvaluationError::AdapterError(e.to_string()))?;

        info!(
            frame = request.frame_id,
            exit_code = output.exit_code,
            duration_secs = output.duration.as_secs_f64(),
            "Evaluator completed"
        );

        if !output.success() {
            return Err(EvaluationError::AdapterError(format!(
                "Evaluator exited with code {}",
                output.exit_code
            )));
        }

        Ok(Evaluation::parse(&output.stdout)?)
    }
}

#[async_trait]
impl Evaluator for CommandEvaluator {
    fn name(&self) -> &str {
        "command"
    }

    async fn evaluate(&self, request: EvaluationRequest<'_>) -> Evaluation {
        match self.try_evaluate(request).await {
            Ok(evaluation) => evaluation,
            Err(e) => {
                warn!(frame = request.frame_id, error = %e, "Evaluation degraded");
                Evaluation::degraded(e.to_string())
            }
        }
    }
}
