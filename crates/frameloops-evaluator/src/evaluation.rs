use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use thiserror::Error;
use tracing::debug;

/// Upper bound of the quality scale
pub const MAX_SCORE: f64 = 10.0;

/// Score assigned to degraded evaluations
pub const NEUTRAL_SCORE: f64 = 5.0;

/// What aspect of a frame a fix addresses
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", from = "String")]
pub enum FixCategory {
    Scene,
    Composition,
    Pose,
    SubjectConsistency,
    Quality,
    Continuity,
}

impl FixCategory {
    pub fn as_str(&self) -> &'static str {
        match self {
            FixCategory::Scene => "scene",
            FixCategory::Composition => "composition",
            FixCategory::Pose => "pose",
            FixCategory::SubjectConsistency => "subject_consistency",
            FixCategory::Quality => "quality",
            FixCategory::Continuity => "continuity",
        }
    }
}

impl From<String> for FixCategory {
    /// Evaluator models are loose with labels; unknown labels land in `Quality`.
    fn from(value: String) -> Self {
        let normalized = value.trim().to_lowercase().replace(['-', ' '], "_");
        match normalized.as_str() {
            "scene" | "setting" | "environment" | "background" => FixCategory::Scene,
            "composition" | "framing" | "camera" | "layout" => FixCategory::Composition,
            "pose" | "action" | "gesture" | "body" => FixCategory::Pose,
            "subject_consistency" | "subject" | "character" | "character_consistency"
            | "identity" => FixCategory::SubjectConsistency,
            "continuity" | "sequence" | "sequence_continuity" => FixCategory::Continuity,
            "quality" | "technical" | "artifact" | "artifacts" => FixCategory::Quality,
            other => {
                debug!(category = other, "Unknown fix category, treating as quality");
                FixCategory::Quality
            }
        }
    }
}

/// How urgent a fix is. Ordering is most urgent first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", from = "String")]
pub enum FixPriority {
    Critical,
    Major,
    Minor,
    Cosmetic,
}

impl From<String> for FixPriority {
    fn from(value: String) -> Self {
        match value.trim().to_lowercase().as_str() {
            "critical" | "blocker" | "severe" => FixPriority::Critical,
            "major" | "high" | "important" => FixPriority::Major,
            "minor" | "medium" | "moderate" => FixPriority::Minor,
            "cosmetic" | "low" | "trivial" | "nit" => FixPriority::Cosmetic,
            other => {
                debug!(priority = other, "Unknown fix priority, treating as minor");
                FixPriority::Minor
            }
        }
    }
}

/// Which neighbour a continuity issue was found against
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ContinuityTarget {
    #[serde(alias = "prev", alias = "before")]
    Previous,
    #[serde(alias = "after")]
    Next,
}

/// A single prioritized fix instruction
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FixItem {
    pub category: FixCategory,
    pub priority: FixPriority,
    pub issue: String,
    #[serde(alias = "fix")]
    pub fix_instruction: String,
    /// Elements the fix must leave untouched
    #[serde(default)]
    pub preserve: BTreeSet<String>,
    /// Only meaningful for continuity items
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub against: Option<ContinuityTarget>,
}

impl FixItem {
    pub fn new(
        category: FixCategory,
        priority: FixPriority,
        issue: impl Into<String>,
        fix_instruction: impl Into<String>,
    ) -> Self {
        Self {
            category,
            priority,
            issue: issue.into(),
            fix_instruction: fix_instruction.into(),
            preserve: BTreeSet::new(),
            against: None,
        }
    }

    pub fn preserving<I, S>(mut self, items: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.preserve.extend(items.into_iter().map(Into::into));
        self
    }

    pub fn against(mut self, target: ContinuityTarget) -> Self {
        self.against = Some(target);
        self
    }

    pub fn is_continuity(&self) -> bool {
        self.category == FixCategory::Continuity
    }
}

/// Structured result of evaluating one frame in its continuity window
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Evaluation {
    pub overall_score: f64,
    #[serde(default)]
    pub needs_full_regeneration: bool,
    #[serde(default)]
    pub fix_items: Vec<FixItem>,
    /// Informational only
    #[serde(default)]
    pub strengths: BTreeSet<String>,
    /// Set when the evaluator could not score the frame
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub degraded_reason: Option<String>,
}

#[derive(Error, Debug)]
pub enum EvaluationParseError {
    #[error("No evaluation found in evaluator output")]
    NoEvaluationFound,

    #[error("Failed to parse evaluation JSON: {0}")]
    JsonParseError(#[from] serde_json::Error),

    #[error("Invalid evaluation format: {0}")]
    InvalidFormat(String),
}

impl Evaluation {
    pub fn new(overall_score: f64) -> Self {
        Self {
            overall_score: clamp_score(overall_score),
            needs_full_regeneration: false,
            fix_items: Vec::new(),
            strengths: BTreeSet::new(),
            degraded_reason: None,
        }
    }

    /// Best-effort result used when the evaluator itself failed
    pub fn degraded(reason: impl Into<String>) -> Self {
        Self {
            degraded_reason: Some(reason.into()),
            ..Self::new(NEUTRAL_SCORE)
        }
    }

    pub fn with_fix(mut self, item: FixItem) -> Self {
        self.fix_items.push(item);
        self
    }

    pub fn requiring_regeneration(mut self) -> Self {
        self.needs_full_regeneration = true;
        self
    }

    pub fn is_degraded(&self) -> bool {
        self.degraded_reason.is_some()
    }

    /// Fix items, most urgent first; equal priorities keep evaluator order
    pub fn fixes_by_priority(&self) -> Vec<&FixItem> {
        let mut items: Vec<&FixItem> = self.fix_items.iter().collect();
        items.sort_by_key(|item| item.priority);
        items
    }

    pub fn continuity_items(&self) -> impl Iterator<Item = &FixItem> {
        self.fix_items.iter().filter(|item| item.is_continuity())
    }

    /// Parse an evaluation from evaluator output text
    ///
    /// Accepts an `<evaluation>...</evaluation>` block, falling back to the
    /// outermost JSON object in the output.
    pub fn parse(output: &str) -> Result<Self, EvaluationParseError> {
        debug!(output_len = output.len(), "Parsing evaluation");

        let json_str = match Self::find_evaluation_block(output)? {
            Some(block) => block,
            None => Self::find_bare_object(output).ok_or(EvaluationParseError::NoEvaluationFound)?,
        };

        let mut evaluation: Evaluation = serde_json::from_str(json_str)?;
        if !evaluation.overall_score.is_finite() {
            return Err(EvaluationParseError::InvalidFormat(
                "overall_score is not a finite number".to_string(),
            ));
        }
        evaluation.overall_score = clamp_score(evaluation.overall_score);
        Ok(evaluation)
    }

    fn find_evaluation_block(output: &str) -> Result<Option<&str>, EvaluationParseError> {
        const OPEN: &str = "<evaluation>";
        const CLOSE: &str = "</evaluation>";

        match (output.find(OPEN), output.rfind(CLOSE)) {
            (Some(start), Some(end)) if start + OPEN.len() <= end => {
                Ok(Some(output[start + OPEN.len()..end].trim()))
            }
            (Some(_), Some(_)) => Err(EvaluationParseError::InvalidFormat(
                "Malformed evaluation block".to_string(),
            )),
            _ => Ok(None),
        }
    }

    fn find_bare_object(output: &str) -> Option<&str> {
        let start = output.find('{')?;
        let end = output.rfind('}')?;
        (start < end).then(|| &output[start..=end])
    }

    /// Short description for logging
    pub fn short_description(&self) -> String {
        if let Some(ref reason) = self.degraded_reason {
            return format!("{:.1} (degraded: {})", self.overall_score, reason);
        }
        let mut text = format!("{:.1}", self.overall_score);
        if !self.fix_items.is_empty() {
            text.push_str(&format!(" ({} fixes", self.fix_items.len()));
            let continuity = self.continuity_items().count();
            if continuity > 0 {
                text.push_str(&format!(", {} continuity", continuity));
            }
            text.push(')');
        }
        if self.needs_full_regeneration {
            text.push_str(" [regenerate]");
        }
        text
    }
}

fn clamp_score(score: f64) -> f64 {
    if score.is_nan() {
        return 0.0;
    }
    score.clamp(0.0, MAX_SCORE)
}
