//! Batch-level roll-up of frame scores.

use serde::{Deserialize, Serialize};

use crate::{FrameState, FrameStatus};

/// A continuity problem between a frame and a neighbour
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContinuityBreak {
    pub frame_id: String,
    pub neighbor_id: Option<String>,
    pub issue: String,
}

/// Scores across every frame that currently has an artifact
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BatchMetrics {
    pub avg_score: f64,
    pub avg_continuity: f64,
    pub min_score: f64,
    pub units_above_threshold: usize,
    /// Frames with an artifact, the denominator of the averages
    pub units_evaluated: usize,
    pub units_failed: usize,
    pub continuity_breaks: Vec<ContinuityBreak>,
}

/// Recompute metrics from scratch. Zeroed when no frame has an artifact.
pub fn compute(units: &[FrameState], target_score: f64) -> BatchMetrics {
    let units_failed = units
        .iter()
        .filter(|unit| unit.status == FrameStatus::Failed)
        .count();

    let scored: Vec<&FrameState> = units
        .iter()
        .filter(|unit| unit.current_artifact.is_some())
        .collect();

    if scored.is_empty() {
        return BatchMetrics {
            units_failed,
            ..BatchMetrics::default()
        };
    }

    let count = scored.len() as f64;
    let avg_score = scored.iter().map(|u| u.current_score).sum::<f64>() / count;
    let avg_continuity = scored.iter().map(|u| u.continuity_score).sum::<f64>() / count;
    let min_score = scored
        .iter()
        .map(|u| u.current_score)
        .fold(f64::INFINITY, f64::min);
    let units_above_threshold = scored
        .iter()
        .filter(|u| u.current_score >= target_score)
        .count();

    let continuity_breaks = units
        .iter()
        .flat_map(|unit| {
            unit.continuity_issues.iter().map(move |issue| ContinuityBreak {
                frame_id: unit.id().to_string(),
                neighbor_id: issue.neighbor_id.clone(),
                issue: issue.issue.clone(),
            })
        })
        .collect();

    BatchMetrics {
        avg_score,
        avg_continuity,
        min_score,
        units_above_threshold,
        units_evaluated: scored.len(),
        units_failed,
        continuity_breaks,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{ContinuityIssue, FrameSpec};
    use frameloops_generator::ArtifactHandle;
    use std::sync::Arc;

    fn unit(id: &str, score: Option<f64>, issues: &[&str]) -> FrameState {
        let mut state = FrameState::new(Arc::new(FrameSpec::new(id, "p", "c")));
        if let Some(score) = score {
            state.current_artifact = Some(ArtifactHandle::new(format!("{id}_0001")));
            state.current_score = score;
            state.continuity_score = (score - issues.len() as f64).max(0.0);
            state.continuity_issues = issues
                .iter()
                .map(|issue| ContinuityIssue {
                    neighbor_id: Some("a".to_string()),
                    issue: issue.to_string(),
                })
                .collect();
        }
        state
    }

    #[test]
    fn test_empty_batch_is_zeroed() {
        let metrics = compute(&[], 8.0);
        assert_eq!(metrics, BatchMetrics::default());

        let mut failed = unit("x", None, &[]);
        failed.status = FrameStatus::Failed;
        let metrics = compute(&[failed], 8.0);
        assert_eq!(metrics.avg_score, 0.0);
        assert_eq!(metrics.units_evaluated, 0);
        assert_eq!(metrics.units_failed, 1);
    }

    #[test]
    fn test_averages_over_frames_with_artifacts() {
        let units = vec![
            unit("a", Some(9.0), &[]),
            unit("b", Some(7.0), &["lighting shift"]),
            unit("c", None, &[]),
        ];
        let metrics = compute(&units, 8.0);

        assert_eq!(metrics.units_evaluated, 2);
        assert!((metrics.avg_score - 8.0).abs() < 1e-9);
        assert!((metrics.avg_continuity - 7.5).abs() < 1e-9);
        assert_eq!(metrics.min_score, 7.0);
        assert_eq!(metrics.units_above_threshold, 1);
        assert_eq!(
            metrics.continuity_breaks,
            vec![ContinuityBreak {
                frame_id: "b".to_string(),
                neighbor_id: Some("a".to_string()),
                issue: "lighting shift".to_string(),
            }]
        );
    }

    #[test]
    fn test_compute_is_idempotent() {
        let units = vec![unit("a", Some(6.0), &["x", "y"]), unit("b", Some(8.5), &[])];
        assert_eq!(compute(&units, 8.0), compute(&units, 8.0));
    }
}
