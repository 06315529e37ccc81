use serde::{Deserialize, Serialize};

use crate::{BatchMetrics, FrameState, FrameStatus, FrameSummary};

/// Why a refinement run stopped
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StopReason {
    /// Average continuity score reached the target
    TargetReached,
    /// Every frame is complete, failed or out of attempts
    NoEligibleUnits,
    MaxIterationsReached,
    /// External interrupt between phases
    Cancelled,
}

impl std::fmt::Display for StopReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let text = match self {
            StopReason::TargetReached => "target_reached",
            StopReason::NoEligibleUnits => "no_eligible_units",
            StopReason::MaxIterationsReached => "max_iterations_reached",
            StopReason::Cancelled => "cancelled",
        };
        f.write_str(text)
    }
}

/// The final result of a refinement run: one state per input frame, in
/// input order, plus the last batch metrics.
#[derive(Debug, Clone)]
pub struct RunOutcome {
    pub states: Vec<FrameState>,
    pub metrics: BatchMetrics,
    pub iterations: usize,
    pub stop_reason: StopReason,
    pub total_duration_secs: f64,
}

impl RunOutcome {
    pub fn summaries(&self) -> Vec<FrameSummary> {
        self.states.iter().map(FrameState::summary).collect()
    }

    pub fn failed_frames(&self) -> usize {
        self.states
            .iter()
            .filter(|state| state.status == FrameStatus::Failed)
            .count()
    }

    pub fn is_cancelled(&self) -> bool {
        self.stop_reason == StopReason::Cancelled
    }

    /// Every frame reached the target
    pub fn is_success(&self, target_score: f64) -> bool {
        !self.is_cancelled()
            && self
                .states
                .iter()
                .all(|state| state.meets_target(target_score))
    }

    pub fn exit_code(&self, target_score: f64) -> i32 {
        if self.is_cancelled() {
            130
        } else if self.failed_frames() > 0 {
            2
        } else if self.stop_reason == StopReason::TargetReached || self.is_success(target_score)
        {
            0
        } else {
            1
        }
    }
}
