use crate::process::AgentProcess;
use crate::types::AgentOptions;
use crate::{ClaudeAgentError, Result};

// ─── RunResult ────────────────────────────────────────────────────────────

/// Output of a run-to-completion agent call.
#[derive(Debug)]
pub struct RunResult {
    /// Everything the agent printed on stdout, trimmed.
    pub text: String,
    /// Stderr, kept for diagnostics even on success.
    pub stderr: String,
}

// ─── Public API ───────────────────────────────────────────────────────────

/// Send `prompt` to the agent and wait for its text answer.
///
/// Used for one-shot questions where no files are written and no progress
/// is tracked. A non-zero exit is an error carrying the captured stderr.
///
/// ```rust,ignore
/// let answer = claude_agent::run("Summarise this diff", &AgentOptions::default()).await?;
/// println!("{}", answer.text);
/// ```
pub async fn run(prompt: &str, opts: &AgentOptions) -> Result<RunResult> {
    let mut process = AgentProcess::spawn(prompt, opts).await?;
    collect(&mut process).await
}

pub(crate) async fn collect(process: &mut AgentProcess) -> Result<RunResult> {
    let exit = process.wait().await?;
    if !exit.success() {
        return Err(ClaudeAgentError::Process(exit.describe()));
    }
    Ok(RunResult {
        text: exit.stdout.trim().to_string(),
        stderr: exit.stderr,
    })
}
