use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::RefinementError;
use frameloops_evaluator::MAX_SCORE;

/// Which generator mode refinement passes should use
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ModePreference {
    /// Regenerate when the frame is far off, otherwise edit
    #[default]
    Adaptive,
    /// Always regenerate from the base prompt
    Create,
    /// Always edit the latest artifact
    Edit,
}

/// Tunables for one refinement run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct RefinementConfig {
    /// Quality target on the 0-10 scale
    pub target_score: f64,
    pub max_iterations: usize,
    pub max_attempts_per_unit: usize,
    /// Below this score a frame is regenerated rather than edited
    pub regeneration_threshold: f64,
    pub max_positive_fixes: usize,
    pub max_negative_items: usize,
    /// Concurrent generator/evaluator calls per phase
    pub workers: usize,
    /// Per generator call; a timeout counts as a failure
    #[serde(with = "humantime_serde")]
    pub call_timeout: Option<Duration>,
    pub mode_preference: ModePreference,
}

impl Default for RefinementConfig {
    fn default() -> Self {
        Self {
            target_score: 8.0,
            max_iterations: 4,
            max_attempts_per_unit: 3,
            regeneration_threshold: 4.0,
            max_positive_fixes: 3,
            max_negative_items: 5,
            workers: 4,
            call_timeout: None,
            mode_preference: ModePreference::Adaptive,
        }
    }
}

impl RefinementConfig {
    pub fn with_target_score(mut self, target_score: f64) -> Self {
        self.target_score = target_score;
        self
    }

    pub fn with_max_iterations(mut self, max: usize) -> Self {
        self.max_iterations = max;
        self
    }

    pub fn with_max_attempts(mut self, max: usize) -> Self {
        self.max_attempts_per_unit = max;
        self
    }

    pub fn with_workers(mut self, workers: usize) -> Self {
        self.workers = workers;
        self
    }

    pub fn with_call_timeout(mut self, timeout: Duration) -> Self {
        self.call_timeout = Some(timeout);
        self
    }

    pub fn with_mode_preference(mut self, preference: ModePreference) -> Self {
        self.mode_preference = preference;
        self
    }

    pub fn validate(&self) -> Result<(), RefinementError> {
        let in_scale = |value: f64| value.is_finite() && (0.0..=MAX_SCORE).contains(&value);

        if !in_scale(self.target_score) || self.target_score == 0.0 {
            return Err(RefinementError::InvalidConfig(format!(
                "target_score must be in (0, {}], got {}",
                MAX_SCORE, self.target_score
            )));
        }
        if !in_scale(self.regeneration_threshold) {
            return Err(RefinementError::InvalidConfig(format!(
                "regeneration_threshold must be in [0, {}], got {}",
                MAX_SCORE, self.regeneration_threshold
            )));
        }
        if self.max_iterations == 0 {
            return Err(RefinementError::InvalidConfig(
                "max_iterations must be at least 1".to_string(),
            ));
        }
        if self.max_attempts_per_unit == 0 {
            return Err(RefinementError::InvalidConfig(
                "max_attempts_per_unit must be at least 1".to_string(),
            ));
        }
        if self.workers == 0 {
            return Err(RefinementError::InvalidConfig(
                "workers must be at least 1".to_string(),
            ));
        }
        Ok(())
    }
}
