use serde::{Deserialize, Serialize};
use std::fmt;

/// Opaque handle to a generated artifact or a reference asset.
///
/// The engine never looks inside a handle; it only stores it and hands it
/// back to adapters as an edit reference or a neighbouring frame.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ArtifactHandle(String);

impl ArtifactHandle {
    pub fn new(handle: impl Into<String>) -> Self {
        Self(handle.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ArtifactHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for ArtifactHandle {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

impl From<String> for ArtifactHandle {
    fn from(value: String) -> Self {
        Self(value)
    }
}
