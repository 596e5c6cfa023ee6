//! `claude-agent`: a supervisor for the `claude` CLI run as a one-shot,
//! capability-scoped subprocess.
//!
//! The caller decides which tools the agent may use and which directories it
//! may write to; the prompt travels on stdin; stdout and stderr are captured.
//! There is no streaming protocol here. Callers that need progress observe
//! the files the agent writes.
//!
//! ```text
//! AgentOptions ──► AgentProcess::spawn ──► wait_status / kill ──► AgentExit
//!                         │
//!                         └── run()  (wait for text output, for one-shot questions)
//! ```

pub mod error;
pub mod process;
pub mod runner;
pub mod types;


pub use error::ClaudeAgentError;
pub use process::{resolve_executable, AgentProcess};
pub use runner::{run, RunResult};
pub use types::{AgentExit, AgentOptions, PermissionMode, DEFAULT_EXECUTABLE};

/// Convenience `Result` alias for this crate.
pub type Result<T> = std::result::Result<T, ClaudeAgentError>;
