use thiserror::Error;

#[derive(Debug, Error)]
pub enum ClaudeAgentError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("agent executable '{0}' not found on PATH")]
    ExecutableNotFound(String),

    #[error("failed to spawn '{exe}': {source}")]
    Spawn {
        exe: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Process error: {0}")]
    Process(String),

    #[error("invalid permission mode '{0}'")]
    InvalidPermissionMode(String),
}
