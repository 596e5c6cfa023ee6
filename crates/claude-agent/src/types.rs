use std::collections::HashMap;
use std::path::PathBuf;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::ClaudeAgentError;

// ─── AgentOptions ─────────────────────────────────────────────────────────

/// How to launch the agent CLI for one run.
///
/// The agent may only use `allowed_tools`, and the only directories it is
/// granted beyond its cwd are `add_dirs`.
#[derive(Debug, Clone, Default)]
pub struct AgentOptions {
    /// Custom path to the agent binary (default: `"claude"`)
    pub executable: Option<String>,
    pub model: Option<String>,
    /// Comma-joined into `--allowedTools`
    pub allowed_tools: Vec<String>,
    pub permission_mode: PermissionMode,
    /// Granted with `--add-dir`
    pub add_dirs: Vec<PathBuf>,
    /// Working directory for the subprocess (default: current dir)
    pub cwd: Option<PathBuf>,
    /// Appended verbatim after the generated flags
    pub extra_args: Vec<String>,
    /// Additional environment variables for the subprocess
    pub env: HashMap<String, String>,
}

impl AgentOptions {
    pub fn executable(&self) -> &str {
        self.executable.as_deref().unwrap_or(DEFAULT_EXECUTABLE)
    }
}

pub const DEFAULT_EXECUTABLE: &str = "claude";

// ─── PermissionMode ───────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum PermissionMode {
    /// Flag omitted; the CLI's own default applies
    #[default]
    Default,
    AcceptEdits,
    BypassPermissions,
    Plan,
    DontAsk,
}

impl PermissionMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            PermissionMode::Default => "default",
            PermissionMode::AcceptEdits => "acceptEdits",
            PermissionMode::BypassPermissions => "bypassPermissions",
            PermissionMode::Plan => "plan",
            PermissionMode::DontAsk => "dontAsk",
        }
    }
}

impl FromStr for PermissionMode {
    type Err = ClaudeAgentError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "default" => Ok(PermissionMode::Default),
            "acceptEdits" => Ok(PermissionMode::AcceptEdits),
            "bypassPermissions" => Ok(PermissionMode::BypassPermissions),
            "plan" => Ok(PermissionMode::Plan),
            "dontAsk" => Ok(PermissionMode::DontAsk),
            other => Err(ClaudeAgentError::InvalidPermissionMode(other.to_string())),
        }
    }
}

// ─── AgentExit ────────────────────────────────────────────────────────────

/// How the agent process ended, with everything it printed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AgentExit {
    /// `None` when terminated by a signal.
    pub code: Option<i32>,
    pub stdout: String,
    pub stderr: String,
}

impl AgentExit {
    pub fn success(&self) -> bool {
        self.code == Some(0)
    }

    /// Human-readable exit description including captured stderr.
    pub fn describe(&self) -> String {
        let head = match self.code {
            Some(code) => format!("agent process exited with code {code}"),
            None => "agent process terminated by signal".to_string(),
        };
        if self.stderr.is_empty() {
            head
        } else {
            format!("{head}\nstderr: {}", self.stderr)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn permission_mode_round_trips_through_str() {
        for mode in [
            PermissionMode::Default,
            PermissionMode::AcceptEdits,
            PermissionMode::BypassPermissions,
            PermissionMode::Plan,
            PermissionMode::DontAsk,
        ] {
            assert_eq!(mode.as_str().parse::<PermissionMode>().unwrap(), mode);
        }
        assert!("yolo".parse::<PermissionMode>().is_err());
    }

    #[test]
    fn describe_includes_stderr() {
        let exit = AgentExit {
            code: Some(2),
            stdout: String::new(),
            stderr: "rate limited".into(),
        };
        assert!(!exit.success());
        assert_eq!(
            exit.describe(),
            "agent process exited with code 2\nstderr: rate limited"
        );
        let killed = AgentExit {
            code: None,
            stdout: String::new(),
            stderr: String::new(),
        };
        assert_eq!(killed.describe(), "agent process terminated by signal");
    }

    #[test]
    fn default_executable_is_claude() {
        assert_eq!(AgentOptions::default().executable(), "claude");
    }
}
