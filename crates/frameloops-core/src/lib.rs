//! # frameloops-core
//!
//! Generates an ordered sequence of frames and refines them until a quality
//! target is met or the iteration budget runs out.
//!
//! Each iteration runs three strictly sequential phases:
//!
//! 1. **Process** - generate or refine every frame still in play
//! 2. **Evaluate** - score every frame that has an artifact, in its
//!    continuity window (previous, current, next)
//! 3. **Metrics** - roll the scores up into [`BatchMetrics`]
//!
//! Frames within a phase are dispatched concurrently, bounded by
//! [`RefinementConfig::workers`].

mod config;
mod error;
mod frame;
pub mod metrics;
pub mod mutation;
mod outcome;
pub mod prioritizer;
mod runner;
mod sequence;

pub use config::{ModePreference, RefinementConfig};
pub use error::RefinementError;
pub use frame::{ContinuityIssue, FrameSpec, FrameState, FrameStatus, FrameSummary};
pub use metrics::{BatchMetrics, ContinuityBreak};
pub use mutation::{build_refinement_prompt, build_regeneration_prompt, RefinementPlan};
pub use outcome::{RunOutcome, StopReason};
pub use runner::RefinementRunner;
pub use sequence::SequenceGenerator;
