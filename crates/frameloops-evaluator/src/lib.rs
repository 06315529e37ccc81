//! # frameloops-evaluator
//!
//! Scores generated frames against their intended outcome and against their
//! neighbours in the sequence.
//!
//! ## Key Types
//!
//! - [`Evaluation`] - Structured result: score, fix items, strengths
//! - [`FixItem`] - One categorized, prioritized fix instruction
//! - [`Evaluator`] - Total evaluation capability (never fails, degrades instead)
//! - [`CommandEvaluator`] - Evaluator backed by an external vision-model command
//!
//! ## Output Format
//!
//! Evaluator commands end their output with an evaluation block:
//!
//! ```text
//! <evaluation>
//! {"overall_score": 6.5, "needs_full_regeneration": false, "fix_items": [...]}
//! </evaluation>
//! ```

mod evaluation;
pub mod evaluator;
mod prompts;

pub use evaluation::{
    ContinuityTarget, Evaluation, EvaluationParseError, FixCategory, FixItem, FixPriority,
    MAX_SCORE, NEUTRAL_SCORE,
};
pub use evaluator::{CommandEvaluator, EvaluationError, EvaluationRequest, Evaluator, Neighbor};
pub use prompts::EvaluatorPrompts;
