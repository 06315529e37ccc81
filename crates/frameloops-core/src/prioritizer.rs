//! Worst-first ordering of frames for refinement.

use crate::FrameState;

/// Frames ordered by ascending continuity score; ties keep sequence order.
pub fn rank(units: &[FrameState]) -> Vec<&FrameState> {
    let mut ranked: Vec<&FrameState> = units.iter().collect();
    ranked.sort_by(|a, b| a.continuity_score.total_cmp(&b.continuity_score));
    ranked
}

/// Frames eligible for refinement next iteration, worst first
pub fn select_targets(
    units: &[FrameState],
    target_score: f64,
    max_attempts: usize,
) -> Vec<&FrameState> {
    rank(units)
        .into_iter()
        .filter(|unit| unit.is_refinement_eligible(target_score, max_attempts))
        .collect()
}
