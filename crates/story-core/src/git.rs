use crate::error::{Result, StoryError};
use crate::io;
use regex::Regex;
use std::path::{Path, PathBuf};
use std::sync::OnceLock;
use tracing::{debug, warn};

/// Placeholder commit when the tree is not a git checkout.
pub const UNKNOWN_COMMIT: &str = "unknown";

/// HEAD commit of the repository containing `dir`, or `"unknown"` on any error.
pub fn commit_hash(dir: &Path) -> String {
    let output = match std::process::Command::new("git")
        .args(["rev-parse", "HEAD"])
        .current_dir(dir)
        .output()
    {
        Ok(output) => output,
        Err(e) => {
            debug!(error = %e, "git not runnable");
            return UNKNOWN_COMMIT.to_string();
        }
    };
    if !output.status.success() {
        return UNKNOWN_COMMIT.to_string();
    }
    let hash = String::from_utf8_lossy(&output.stdout).trim().to_string();
    if hash.is_empty() {
        UNKNOWN_COMMIT.to_string()
    } else {
        hash
    }
}

// ---------------------------------------------------------------------------
// Repository references
// ---------------------------------------------------------------------------

static SHORT_REF_RE: OnceLock<Regex> = OnceLock::new();
static GITHUB_URL_RE: OnceLock<Regex> = OnceLock::new();

fn short_ref_re() -> &'static Regex {
    SHORT_REF_RE.get_or_init(|| Regex::new(r"^([A-Za-z0-9_.-]+)/([A-Za-z0-9_.-]+)$").unwrap())
}

fn github_url_re() -> &'static Regex {
    GITHUB_URL_RE.get_or_init(|| {
        Regex::new(r"github\.com[/:]([A-Za-z0-9_.-]+)/([A-Za-z0-9_.-]+?)(?:\.git)?/?$").unwrap()
    })
}

/// Normalise `user/repo` or a GitHub URL to `user/repo`.
pub fn parse_repo_ref(input: &str) -> Result<String> {
    let input = input.trim();
    let caps = short_ref_re()
        .captures(input)
        .filter(|_| !input.contains("github.com"))
        .or_else(|| github_url_re().captures(input))
        .ok_or_else(|| {
            StoryError::ExternalResourceFailure(format!(
                "invalid repository '{input}': use user/repo or a GitHub URL"
            ))
        })?;
    let user = &caps[1];
    let repo = caps[2].trim_end_matches(".git");
    if user.starts_with('.') || repo.is_empty() || repo.starts_with('.') {
        return Err(StoryError::ExternalResourceFailure(format!(
            "invalid repository '{input}'"
        )));
    }
    Ok(format!("{user}/{repo}"))
}

/// Clone URL for `user/repo` under `base_url`.
pub fn clone_url(base_url: &str, repo_ref: &str) -> String {
    format!("{}/{repo_ref}.git", base_url.trim_end_matches('/'))
}

// ---------------------------------------------------------------------------
// TempClone
// ---------------------------------------------------------------------------

/// A scratch directory holding a shallow clone. Removed when dropped, so the
/// clone never outlives the generation regardless of how it ends.
#[derive(Debug)]
pub struct TempClone {
    path: PathBuf,
    repo_ref: String,
}

impl TempClone {
    /// Reserve a fresh `code-stories-<uuid>` path in the system temp dir.
    /// The directory itself is created by `git clone`.
    pub fn reserve(repo_ref: impl Into<String>) -> Self {
        let path =
            std::env::temp_dir().join(format!("code-stories-{}", uuid::Uuid::new_v4()));
        Self {
            path,
            repo_ref: repo_ref.into(),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn repo_ref(&self) -> &str {
        &self.repo_ref
    }
}

impl Drop for TempClone {
    fn drop(&mut self) {
        match io::remove_dir_all_if_exists(&self.path) {
            Ok(()) => debug!(path = %self.path.display(), "removed clone"),
            Err(e) => warn!(path = %self.path.display(), error = %e, "failed to remove clone"),
        }
    }
}
