//! Project configuration file support for frameloops.
//!
//! Loads configuration from `frameloops.toml` in the working directory.

use anyhow::{Context, Result};
use serde::Deserialize;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use frameloops_core::{ModePreference, RefinementConfig};

/// Project-level configuration loaded from `frameloops.toml`
#[derive(Debug, Deserialize, Default)]
#[serde(deny_unknown_fields)]
pub struct ProjectConfig {
    /// Refinement tunables; missing keys keep their defaults
    #[serde(default)]
    pub refinement: RefinementConfig,
    #[serde(default)]
    pub generator: GeneratorSection,
    #[serde(default)]
    pub evaluator: EvaluatorSection,
}

/// `[generator]` table
#[derive(Debug, Deserialize, Default)]
#[serde(deny_unknown_fields)]
pub struct GeneratorSection {
    /// Executable to run for each generation call
    pub command: Option<String>,
    /// Arguments placed before the generated ones
    #[serde(default)]
    pub args: Vec<String>,
    pub model: Option<String>,
    /// Hard limit on the generator process
    #[serde(default, with = "humantime_serde")]
    pub timeout: Option<Duration>,
    /// Extra environment for the generator process
    #[serde(default)]
    pub env: BTreeMap<String, String>,
    /// Where generated frames are written
    pub output_dir: Option<PathBuf>,
}

/// `[evaluator]` table
#[derive(Debug, Deserialize, Default)]
#[serde(deny_unknown_fields)]
pub struct EvaluatorSection {
    pub command: Option<String>,
    #[serde(default)]
    pub args: Vec<String>,
    pub model: Option<String>,
    #[serde(default, with = "humantime_serde")]
    pub timeout: Option<Duration>,
    #[serde(default)]
    pub env: BTreeMap<String, String>,
}

/// The config file name
pub const CONFIG_FILE_NAME: &str = "frameloops.toml";

impl ProjectConfig {
    /// Load configuration from the working directory.
    ///
    /// Returns:
    /// - `Ok(Some(config))` if file exists and parses successfully
    /// - `Ok(None)` if file does not exist
    /// - `Err(...)` if file exists but fails to parse (hard error)
    pub fn load(working_dir: &Path) -> Result<Option<Self>> {
        let config_path = working_dir.join(CONFIG_FILE_NAME);

        if !config_path.exists() {
            return Ok(None);
        }

        let content = std::fs::read_to_string(&config_path)
            .with_context(|| format!("Failed to read {}", config_path.display()))?;

        let config: ProjectConfig = toml::from_str(&content)
            .with_context(|| format!("Failed to parse {}", config_path.display()))?;

        Ok(Some(config))
    }
}

/// Refinement values given on the command line. Each one that is set
/// replaces the file (or default) value.
#[derive(Debug, Default, Clone)]
pub struct RefinementOverrides {
    pub target_score: Option<f64>,
    pub max_iterations: Option<usize>,
    pub max_attempts: Option<usize>,
    pub workers: Option<usize>,
    pub call_timeout: Option<Duration>,
    pub mode_preference: Option<ModePreference>,
}

impl RefinementOverrides {
    pub fn apply(&self, mut config: RefinementConfig) -> RefinementConfig {
        if let Some(target) = self.target_score {
            config.target_score = target;
        }
        if let Some(max) = self.max_iterations {
            config.max_iterations = max;
        }
        if let Some(max) = self.max_attempts {
            config.max_attempts_per_unit = max;
        }
        if let Some(workers) = self.workers {
            config.workers = workers;
        }
        if let Some(timeout) = self.call_timeout {
            config.call_timeout = Some(timeout);
        }
        if let Some(preference) = self.mode_preference {
            config.mode_preference = preference;
        }
        config
    }
}
