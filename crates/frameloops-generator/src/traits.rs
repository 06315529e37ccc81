use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

use crate::ArtifactHandle;

/// Errors that can occur while generating a frame
#[derive(Error, Debug)]
pub enum GeneratorError {
    #[error("Failed to spawn generator process: {0}")]
    SpawnFailed(#[from] std::io::Error),

    #[error("Generator timed out after {0:?}")]
    Timeout(Duration),

    #[error("Generator exited with code {code}: {stderr}")]
    NonZeroExit { code: i32, stderr: String },

    #[error("Generator produced no artifact")]
    EmptyOutput,

    #[error("Generation failed: {0}")]
    ExecutionFailed(String),
}

/// Configuration for running an external adapter command
#[derive(Debug, Clone)]
pub struct CommandConfig {
    /// Working directory for the process
    pub working_dir: PathBuf,
    /// Optional timeout (None = no limit)
    pub timeout: Option<Duration>,
    /// Additional environment variables
    pub env_vars: HashMap<String, String>,
    /// Model to use (if the adapter supports it)
    pub model: Option<String>,
}

impl Default for CommandConfig {
    fn default() -> Self {
        Self {
            working_dir: std::env::current_dir().unwrap_or_else(|_| PathBuf::from(".")),
            timeout: None,
            env_vars: HashMap::new(),
            model: None,
        }
    }
}

impl CommandConfig {
    pub fn new(working_dir: PathBuf) -> Self {
        Self {
            working_dir,
            ..Default::default()
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn with_model(mut self, model: String) -> Self {
        self.model = Some(model);
        self
    }

    pub fn with_env(mut self, key: String, value: String) -> Self {
        self.env_vars.insert(key, value);
        self
    }
}

/// Whether a generation call starts from scratch or edits a prior artifact
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GenerationMode {
    Create,
    Edit,
}

impl std::fmt::Display for GenerationMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            GenerationMode::Create => write!(f, "create"),
            GenerationMode::Edit => write!(f, "edit"),
        }
    }
}

impl std::str::FromStr for GenerationMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "create" | "generate" | "regenerate" => Ok(GenerationMode::Create),
            "edit" | "refine" => Ok(GenerationMode::Edit),
            _ => Err(format!("Unknown generation mode: {}", s)),
        }
    }
}

/// A single generation call
#[derive(Debug, Clone)]
pub struct GenerationRequest {
    /// Run-scoped sequence number, unique per call
    pub sequence: u64,
    pub frame_id: String,
    pub prompt: String,
    /// Ordered references, passed through untouched
    pub references: Vec<ArtifactHandle>,
    pub mode: GenerationMode,
}

impl GenerationRequest {
    /// Stable output stem for adapters that write files, e.g. `shot_03_0007`
    pub fn output_stem(&self) -> String {
        format!("{}_{:04}", self.frame_id, self.sequence)
    }
}

/// The content generator that turns prompts and references into artifacts
#[async_trait]
pub trait Generator: Send + Sync {
    /// Human-readable name of the generator
    fn name(&self) -> &str;

    /// Produce an artifact for the request
    async fn generate(&self, request: &GenerationRequest) -> Result<ArtifactHandle, GeneratorError>;

    /// Check if the generator backend is reachable
    async fn is_available(&self) -> bool;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_output_stem_pads_sequence() {
        let request = GenerationRequest {
            sequence: 7,
            frame_id: "shot_03".to_string(),
            prompt: String::new(),
            references: vec![],
            mode: GenerationMode::Create,
        };
        assert_eq!(request.output_stem(), "shot_03_0007");
    }

    #[test]
    fn test_generation_mode_from_str() {
        assert_eq!("Edit".parse::<GenerationMode>(), Ok(GenerationMode::Edit));
        assert_eq!(
            "regenerate".parse::<GenerationMode>(),
            Ok(GenerationMode::Create)
        );
        assert!("paint".parse::<GenerationMode>().is_err());
    }
}
