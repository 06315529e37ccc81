use frameloops_evaluator::{ContinuityTarget, Evaluation};
use frameloops_generator::ArtifactHandle;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// Immutable description of one frame, in sequence order
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FrameSpec {
    pub id: String,
    /// Base generation instruction
    pub prompt: String,
    /// Intended visual outcome, used when evaluating
    pub context_description: String,
    /// e.g. scene id
    #[serde(default, alias = "scene")]
    pub grouping_key: String,
    /// Passed through to the generator untouched
    #[serde(default)]
    pub reference_assets: Vec<ArtifactHandle>,
}

impl FrameSpec {
    pub fn new(
        id: impl Into<String>,
        prompt: impl Into<String>,
        context_description: impl Into<String>,
    ) -> Self {
        Self {
            id: id.into(),
            prompt: prompt.into(),
            context_description: context_description.into(),
            grouping_key: String::new(),
            reference_assets: Vec::new(),
        }
    }

    pub fn with_group(mut self, grouping_key: impl Into<String>) -> Self {
        self.grouping_key = grouping_key.into();
        self
    }

    pub fn with_reference(mut self, reference: impl Into<ArtifactHandle>) -> Self {
        self.reference_assets.push(reference.into());
        self
    }
}

/// Lifecycle of a frame within one refinement run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FrameStatus {
    Pending,
    Generating,
    Evaluating,
    Refining,
    Complete,
    Failed,
}

impl FrameStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, FrameStatus::Complete | FrameStatus::Failed)
    }
}

impl std::fmt::Display for FrameStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let text = match self {
            FrameStatus::Pending => "pending",
            FrameStatus::Generating => "generating",
            FrameStatus::Evaluating => "evaluating",
            FrameStatus::Refining => "refining",
            FrameStatus::Complete => "complete",
            FrameStatus::Failed => "failed",
        };
        f.write_str(text)
    }
}

/// A continuity problem found between a frame and one of its neighbours
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContinuityIssue {
    /// None when the frame had no neighbour to compare against
    pub neighbor_id: Option<String>,
    pub issue: String,
}

/// Mutable run-time record for one frame
#[derive(Debug, Clone)]
pub struct FrameState {
    spec: Arc<FrameSpec>,
    pub status: FrameStatus,
    pub current_artifact: Option<ArtifactHandle>,
    pub current_score: f64,
    /// `current_score` minus one point per continuity issue, floored at 0
    pub continuity_score: f64,
    /// Generation and refine calls made so far
    pub attempt_count: usize,
    pub evaluation_history: Vec<Evaluation>,
    pub artifact_history: Vec<ArtifactHandle>,
    /// From the most recent evaluation only
    pub continuity_issues: Vec<ContinuityIssue>,
    /// Last generator error, set when the frame failed
    pub error: Option<String>,
}

impl FrameState {
    pub fn new(spec: Arc<FrameSpec>) -> Self {
        Self {
            spec,
            status: FrameStatus::Pending,
            current_artifact: None,
            current_score: 0.0,
            continuity_score: 0.0,
            attempt_count: 0,
            evaluation_history: Vec::new(),
            artifact_history: Vec::new(),
            continuity_issues: Vec::new(),
            error: None,
        }
    }

    pub fn spec(&self) -> &FrameSpec {
        &self.spec
    }

    pub fn id(&self) -> &str {
        &self.spec.id
    }

    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }

    pub fn last_evaluation(&self) -> Option<&Evaluation> {
        self.evaluation_history.last()
    }

    pub fn score_progression(&self) -> Vec<f64> {
        self.evaluation_history
            .iter()
            .map(|evaluation| evaluation.overall_score)
            .collect()
    }

    /// Both the frame itself and its continuity meet the target
    pub fn meets_target(&self, target_score: f64) -> bool {
        self.current_score >= target_score && self.continuity_score >= target_score
    }

    /// Still owed a generate-or-refine call in the next process phase
    pub fn needs_processing(&self, max_attempts: usize) -> bool {
        !self.is_terminal() && self.attempt_count < max_attempts
    }

    /// Candidate for refinement ordering in the next iteration
    pub fn is_refinement_eligible(&self, target_score: f64, max_attempts: usize) -> bool {
        self.current_artifact.is_some()
            && self.needs_processing(max_attempts)
            && !self.meets_target(target_score)
    }

    /// Forced complete at the attempt ceiling without reaching the target
    pub fn budget_exhausted(&self, target_score: f64, max_attempts: usize) -> bool {
        self.status == FrameStatus::Complete
            && self.attempt_count >= max_attempts
            && !self.meets_target(target_score)
    }

    pub(crate) fn record_artifact(&mut self, artifact: ArtifactHandle) {
        self.artifact_history.push(artifact.clone());
        self.current_artifact = Some(artifact);
        self.status = FrameStatus::Evaluating;
        self.error = None;
    }

    pub(crate) fn record_failure(&mut self, error: String) {
        self.status = FrameStatus::Failed;
        self.error = Some(error);
    }

    /// Store an evaluation and derive the continuity fields from it.
    ///
    /// Neighbour ids are those of the frames supplied in the continuity
    /// window, used to attribute continuity issues.
    ///
    /// A complete frame keeps the scores and issues it settled with; later
    /// evaluations are only appended to its history.
    pub(crate) fn record_evaluation(
        &mut self,
        evaluation: Evaluation,
        previous_id: Option<&str>,
        next_id: Option<&str>,
    ) {
        if self.status == FrameStatus::Complete {
            self.evaluation_history.push(evaluation);
            return;
        }
        self.current_score = evaluation.overall_score;
        self.continuity_issues = evaluation
            .continuity_items()
            .map(|item| {
                let neighbor = match item.against {
                    Some(ContinuityTarget::Previous) => previous_id,
                    Some(ContinuityTarget::Next) => next_id,
                    None => previous_id.or(next_id),
                };
                ContinuityIssue {
                    neighbor_id: neighbor.map(str::to_string),
                    issue: item.issue.clone(),
                }
            })
            .collect();
        let penalty = self.continuity_issues.len() as f64;
        self.continuity_score = (self.current_score - penalty).max(0.0);
        self.evaluation_history.push(evaluation);
    }

    /// Move a freshly evaluated frame to its next state
    pub(crate) fn settle_evaluation(&mut self, target_score: f64, max_attempts: usize) {
        if self.status != FrameStatus::Evaluating {
            return;
        }
        if self.meets_target(target_score) {
            self.status = FrameStatus::Complete;
        } else if self.attempt_count < max_attempts {
            self.status = FrameStatus::Refining;
        }
    }

    /// Force a non-terminal frame at its attempt ceiling to `Complete`.
    /// Returns true when the transition happened.
    pub(crate) fn settle_budget(&mut self, max_attempts: usize) -> bool {
        if !self.is_terminal() && self.attempt_count >= max_attempts {
            self.status = FrameStatus::Complete;
            return true;
        }
        false
    }

    pub fn summary(&self) -> FrameSummary {
        FrameSummary {
            id: self.spec.id.clone(),
            grouping_key: self.spec.grouping_key.clone(),
            status: self.status,
            final_artifact: self.current_artifact.clone(),
            final_score: self.current_score,
            continuity_score: self.continuity_score,
            attempt_count: self.attempt_count,
            score_progression: self.score_progression(),
            continuity_issues: self.continuity_issues.clone(),
            error: self.error.clone(),
        }
    }
}

/// Read-only view of a frame's final state, for reports
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FrameSummary {
    pub id: String,
    pub grouping_key: String,
    pub status: FrameStatus,
    pub final_artifact: Option<ArtifactHandle>,
    pub final_score: f64,
    pub continuity_score: f64,
    pub attempt_count: usize,
    pub score_progression: Vec<f64>,
    pub continuity_issues: Vec<ContinuityIssue>,
    pub error: Option<String>,
}
