use std::path::PathBuf;
use std::process::{ExitStatus, Stdio};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::io::{AsyncBufReadExt, AsyncReadExt, AsyncWriteExt, BufReader};
use tokio::process::{Child, Command};
use tokio::task::JoinHandle;
use tracing::debug;

use crate::types::{AgentExit, AgentOptions, PermissionMode};
use crate::{ClaudeAgentError, Result};

/// Upper bound on waiting for output pipes to drain after the child exits.
/// A grandchild that inherited the pipes could otherwise hold them open.
const DRAIN_TIMEOUT: Duration = Duration::from_secs(2);

// ─── AgentProcess ─────────────────────────────────────────────────────────

/// A running agent subprocess.
///
/// The prompt is written to stdin, which is then closed. Stdout and stderr are
/// drained by background tasks so the child never blocks on a full pipe; both
/// are returned in the [`AgentExit`]. The child is killed if this value is
/// dropped while it is still running.
pub struct AgentProcess {
    child: Child,
    stdout_buf: Arc<Mutex<String>>,
    stderr_buf: Arc<Mutex<String>>,
    drains: Vec<JoinHandle<()>>,
}

impl AgentProcess {
    /// Spawn the agent with `prompt` on its stdin.
    pub async fn spawn(prompt: &str, opts: &AgentOptions) -> Result<Self> {
        let exe = resolve_executable(opts.executable())?;
        let cmd = build_command(&exe, opts);
        let mut process = Self::from_command(cmd).map_err(|e| match e {
            ClaudeAgentError::Io(source) => ClaudeAgentError::Spawn {
                exe: opts.executable().to_string(),
                source,
            },
            other => other,
        })?;
        debug!(exe = %exe.display(), pid = ?process.id(), "agent spawned");
        process.send_prompt(prompt)?;
        Ok(process)
    }

    pub(crate) fn from_command(mut cmd: Command) -> Result<Self> {
        cmd.stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        let mut child = cmd.spawn()?;

        let stdout_buf = Arc::new(Mutex::new(String::new()));
        let stderr_buf = Arc::new(Mutex::new(String::new()));
        let mut drains = Vec::new();

        if let Some(mut stdout) = child.stdout.take() {
            let buf = Arc::clone(&stdout_buf);
            drains.push(tokio::spawn(async move {
                let mut bytes = Vec::new();
                let _ = stdout.read_to_end(&mut bytes).await;
                if let Ok(mut b) = buf.lock() {
                    b.push_str(&String::from_utf8_lossy(&bytes));
                }
            }));
        }

        if let Some(stderr) = child.stderr.take() {
            let buf = Arc::clone(&stderr_buf);
            drains.push(tokio::spawn(async move {
                let mut reader = BufReader::new(stderr).lines();
                while let Ok(Some(line)) = reader.next_line().await {
                    if let Ok(mut b) = buf.lock() {
                        if !b.is_empty() {
                            b.push('\n');
                        }
                        b.push_str(&line);
                    }
                }
            }));
        }

        Ok(Self {
            child,
            stdout_buf,
            stderr_buf,
            drains,
        })
    }

    /// Hand the prompt to a writer task that closes stdin when done, so a
    /// child that is slow to read never holds up the caller. A child that
    /// exits without reading its input is not an error here; its exit
    /// status tells the story.
    pub(crate) fn send_prompt(&mut self, prompt: &str) -> Result<()> {
        let Some(mut stdin) = self.child.stdin.take() else {
            return Err(ClaudeAgentError::Process("stdin already closed".into()));
        };
        let prompt = prompt.to_owned();
        tokio::spawn(async move {
            let written = match stdin.write_all(prompt.as_bytes()).await {
                Ok(()) => stdin.shutdown().await,
                Err(e) => Err(e),
            };
            match written {
                Ok(()) => {}
                Err(e) if e.kind() == std::io::ErrorKind::BrokenPipe => {}
                Err(e) => debug!(error = %e, "failed to write prompt to agent stdin"),
            }
        });
        Ok(())
    }

    pub fn id(&self) -> Option<u32> {
        self.child.id()
    }

    /// Wait for the child to exit. Cancel-safe, so it can sit in a `select!`.
    pub async fn wait_status(&mut self) -> Result<ExitStatus> {
        Ok(self.child.wait().await?)
    }

    /// Collect the output of an exited child.
    pub async fn finish(&mut self, status: ExitStatus) -> AgentExit {
        for handle in self.drains.drain(..) {
            let _ = tokio::time::timeout(DRAIN_TIMEOUT, handle).await;
        }
        AgentExit {
            code: status.code(),
            stdout: read_buf(&self.stdout_buf),
            stderr: read_buf(&self.stderr_buf),
        }
    }

    /// Wait for exit and collect the output.
    pub async fn wait(&mut self) -> Result<AgentExit> {
        let status = self.wait_status().await?;
        Ok(self.finish(status).await)
    }

    /// Stderr captured so far.
    pub fn stderr(&self) -> String {
        read_buf(&self.stderr_buf)
    }

    /// Kill the subprocess (best-effort; errors are silently ignored).
    pub async fn kill(&mut self) {
        let _ = self.child.kill().await;
    }
}

fn read_buf(buf: &Arc<Mutex<String>>) -> String {
    buf.lock().map(|b| b.clone()).unwrap_or_default()
}

/// Locate the agent binary on PATH (or accept an explicit path).
pub fn resolve_executable(exe: &str) -> Result<PathBuf> {
    which::which(exe).map_err(|_| ClaudeAgentError::ExecutableNotFound(exe.to_string()))
}

// ─── Command builder ──────────────────────────────────────────────────────

/// `<exe> -p --allowedTools <tools> --add-dir <dir>... [--model M] [--permission-mode P] [extra...]`
pub(crate) fn build_command(exe: &std::path::Path, opts: &AgentOptions) -> Command {
    let mut cmd = Command::new(exe);
    cmd.args(build_args(opts));

    // Allow running from inside another agent session.
    cmd.env_remove("CLAUDECODE");
    for (k, v) in &opts.env {
        cmd.env(k, v);
    }
    if let Some(cwd) = &opts.cwd {
        cmd.current_dir(cwd);
    }

    // The prompt goes to stdin, never argv.
    cmd
}

pub(crate) fn build_args(opts: &AgentOptions) -> Vec<String> {
    let mut args = vec!["-p".to_string()];

    if !opts.allowed_tools.is_empty() {
        args.push("--allowedTools".into());
        args.push(opts.allowed_tools.join(","));
    }

    for dir in &opts.add_dirs {
        args.push("--add-dir".into());
        args.push(dir.display().to_string());
    }

    if let Some(model) = &opts.model {
        args.push("--model".into());
        args.push(model.clone());
    }

    if opts.permission_mode != PermissionMode::Default {
        args.push("--permission-mode".into());
        args.push(opts.permission_mode.as_str().into());
    }

    args.extend(opts.extra_args.iter().cloned());
    args
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn minimal_args() {
        assert_eq!(build_args(&AgentOptions::default()), vec!["-p"]);
    }

    #[test]
    fn full_args_in_order() {
        let opts = AgentOptions {
            model: Some("opus".into()),
            allowed_tools: vec!["Read".into(), "Grep".into(), "Write".into()],
            permission_mode: PermissionMode::AcceptEdits,
            add_dirs: vec![PathBuf::from("/stories/.tmp/g1")],
            extra_args: vec!["--verbose".into()],
            ..Default::default()
        };
        assert_eq!(
            build_args(&opts),
            vec![
                "-p",
                "--allowedTools",
                "Read,Grep,Write",
                "--add-dir",
                "/stories/.tmp/g1",
                "--model",
                "opus",
                "--permission-mode",
                "acceptEdits",
                "--verbose",
            ]
        );
    }

    #[test]
    fn unknown_executable_is_reported() {
        let err = resolve_executable("definitely-not-a-real-agent-binary").unwrap_err();
        assert!(matches!(err, ClaudeAgentError::ExecutableNotFound(_)));
    }
}
