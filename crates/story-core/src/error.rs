use std::path::PathBuf;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum StoryError {
    #[error("failed to start agent: {0}")]
    SpawnFailure(String),

    #[error("agent exited without writing {}", .0.display())]
    ArtifactMissing(PathBuf),

    #[error("artifact is not valid JSON: {0}")]
    ArtifactMalformed(String),

    #[error("artifact field '{field}' {problem}")]
    ArtifactInvalid { field: String, problem: String },

    #[error(
        "invalid story id '{0}': expected a UUID of the form xxxxxxxx-xxxx-xxxx-xxxx-xxxxxxxxxxxx"
    )]
    InvalidIdentifier(String),

    #[error("external resource failed: {0}")]
    ExternalResourceFailure(String),

    #[error("git clone of '{repo}' timed out after {secs}s; the repository may be too large or the network slow")]
    CloneTimeout { repo: String, secs: u64 },

    #[error("manifest was modified concurrently while recording {0}")]
    ManifestRaceLoss(String),

    #[error("story not found: {0}")]
    StoryNotFound(String),

    #[error("generation cancelled")]
    Cancelled,

    #[error("fetch failed: {0}")]
    Fetch(String),

    #[error("agent output rejected: {0}")]
    AgentOutput(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Yaml(#[from] serde_yaml::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),
}

impl StoryError {
    /// Shorthand for a field-level contract violation.
    pub fn invalid(field: impl Into<String>, problem: impl Into<String>) -> Self {
        StoryError::ArtifactInvalid {
            field: field.into(),
            problem: problem.into(),
        }
    }
}

pub type Result<T> = std::result::Result<T, StoryError>;
