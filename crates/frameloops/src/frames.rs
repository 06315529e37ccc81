//! Loading the frame sequence from disk.

use anyhow::{Context, Result};
use std::path::Path;

use frameloops_core::FrameSpec;

/// Read a JSON array of frames, in sequence order
pub fn load_frames(path: &Path) -> Result<Vec<FrameSpec>> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read frames file {}", path.display()))?;

    let frames: Vec<FrameSpec> = serde_json::from_str(&content)
        .with_context(|| format!("Failed to parse frames file {}", path.display()))?;

    for (position, frame) in frames.iter().enumerate() {
        if frame.id.trim().is_empty() {
            anyhow::bail!("Frame at position {} has an empty id", position);
        }
        if frame.prompt.trim().is_empty() {
            anyhow::bail!("Frame '{}' has an empty prompt", frame.id);
        }
    }

    Ok(frames)
}
