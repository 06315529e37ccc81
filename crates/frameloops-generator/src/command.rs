use async_trait::async_trait;
use std::path::PathBuf;
use tracing::debug;

use crate::{
    ArtifactHandle, CommandConfig, GenerationRequest, Generator, GeneratorError, ProcessSpawner,
};

/// Generator backed by an external executable.
///
/// The command is invoked as
/// `<binary> [args..] --mode <create|edit> --frame <id> --output <dir>/<stem>
/// [--model <m>] [--reference <handle>].. -- <prompt>` and must print the
/// artifact handle as the last non-empty line of stdout.
pub struct CommandGenerator {
    binary_path: PathBuf,
    extra_args: Vec<String>,
    output_dir: PathBuf,
    config: CommandConfig,
}

impl CommandGenerator {
    pub fn new(binary_path: PathBuf, output_dir: PathBuf, config: CommandConfig) -> Self {
        Self {
            binary_path,
            extra_args: Vec::new(),
            output_dir,
            config,
        }
    }

    pub fn with_args(mut self, args: Vec<String>) -> Self {
        self.extra_args = args;
        self
    }

    fn build_args(&self, request: &GenerationRequest) -> Vec<String> {
        let mut args = self.extra_args.clone();
        args.push("--mode".to_string());
        args.push(request.mode.to_string());
        args.push("--frame".to_string());
        args.push(request.frame_id.clone());
        args.push("--output".to_string());
        args.push(
            self.output_dir
                .join(request.output_stem())
                .display()
                .to_string(),
        );

        if let Some(ref model) = self.config.model {
            args.push("--model".to_string());
            args.push(model.clone());
        }

        for reference in &request.references {
            args.push("--reference".to_string());
            args.push(reference.to_string());
        }

        // Prompts may start with '-'
        args.push("--".to_string());
        args.push(request.prompt.clone());
        args
    }
}

#[async_trait]
impl Generator for CommandGenerator {
    fn name(&self) -> &str {
        "command"
    }

    async fn is_available(&self) -> bool {
        let args = vec!["--version".to_string()];
        ProcessSpawner::spawn(&self.binary_path, &args, &self.config)
            .await
            .map(|output| output.success())
            .unwrap_or(false)
    }

    async fn generate(&self, request: &GenerationRequest) -> Result<ArtifactHandle, GeneratorError> {
        debug!(
            generator = self.name(),
            frame = %request.frame_id,
            mode = %request.mode,
            references = request.references.len(),
            prompt_len = request.prompt.len(),
            "Executing generator"
        );

        let args = self.build_args(request);
        let output = ProcessSpawner::spawn(&self.binary_path, &args, &self.config).await?;

        if !output.success() {
            return Err(GeneratorError::NonZeroExit {
                code: output.exit_code,
                stderr: output.stderr_excerpt(5),
            });
        }

        output
            .last_line()
            .map(ArtifactHandle::new)
            .ok_or(GeneratorError::EmptyOutput)
    }
}
