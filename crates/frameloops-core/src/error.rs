use thiserror::Error;

/// Errors raised before a run starts. Generator and evaluator failures are
/// recorded on the affected frames instead.
#[derive(Error, Debug)]
pub enum RefinementError {
    #[error("Invalid refinement configuration: {0}")]
    InvalidConfig(String),

    #[error("Duplicate frame id: {0}")]
    DuplicateFrameId(String),
}
