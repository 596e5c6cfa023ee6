use std::process::Stdio;

use story_core::config::CloneConfig;
use story_core::git::{self, TempClone};
use story_core::{io, StoryError};
use tokio::process::Command;
use tracing::info;

/// Shallow-clone `repo_ref` (`user/repo`) into a fresh temp directory.
///
/// The returned guard deletes the clone when dropped. On timeout or failure
/// the partial clone is removed before the error is returned.
pub async fn clone_repo(config: &CloneConfig, repo_ref: &str) -> Result<TempClone, StoryError> {
    clone_into(config, TempClone::reserve(repo_ref)).await
}

/// Clone `clone.repo_ref()` into the reserved path. The guard is dropped,
/// and the path removed, on every error.
async fn clone_into(config: &CloneConfig, clone: TempClone) -> Result<TempClone, StoryError> {
    let repo_ref = clone.repo_ref().to_string();
    let url = git::clone_url(&config.base_url, &repo_ref);
    info!(repo = %repo_ref, url = %url, "cloning repository");

    let child = Command::new("git")
        .args(["clone", "--depth", "1", "--quiet", &url])
        .arg(clone.path())
        .env("GIT_TERMINAL_PROMPT", "0")
        .stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(Stdio::piped())
        .kill_on_drop(true)
        .spawn()
        .map_err(|e| StoryError::ExternalResourceFailure(format!("failed to run git: {e}")))?;

    let timeout = std::time::Duration::from_secs(config.timeout_secs);
    let output = match tokio::time::timeout(timeout, child.wait_with_output()).await {
        Ok(result) => result.map_err(|e| {
            StoryError::ExternalResourceFailure(format!("git clone of '{repo_ref}' failed: {e}"))
        })?,
        Err(_) => {
            return Err(StoryError::CloneTimeout {
                repo: repo_ref,
                secs: config.timeout_secs,
            })
        }
    };

    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        return Err(StoryError::ExternalResourceFailure(format!(
            "git clone of '{repo_ref}' failed: {}",
            io::excerpt(stderr.trim(), 500)
        )));
    }
    Ok(clone)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::Path;

    fn git(dir: &Path, args: &[&str]) {
        let status = std::process::Command::new("git")
            .args(["-c", "user.name=t", "-c", "user.email=t@t"])
            .args(args)
            .current_dir(dir)
            .output()
            .unwrap()
            .status;
        assert!(status.success(), "git {args:?} failed");
    }

    /// `<base>/user/sample.git` with one commit.
    fn local_remote(base: &Path) {
        let repo = base.join("user/sample.git");
        std::fs::create_dir_all(&repo).unwrap();
        git(&repo, &["init", "--quiet"]);
        std::fs::write(repo.join("main.rs"), "fn main() {}\n").unwrap();
        git(&repo, &["add", "."]);
        git(&repo, &["commit", "--quiet", "-m", "init"]);
    }

    #[tokio::test]
    async fn clones_and_cleans_up_on_drop() {
        let base = tempfile::TempDir::new().unwrap();
        local_remote(base.path());
        let config = CloneConfig {
            base_url: format!("file://{}", base.path().display()),
            timeout_secs: 30,
        };
        let clone = clone_repo(&config, "user/sample").await.unwrap();
        let path = clone.path().to_path_buf();
        assert!(path.join("main.rs").is_file());
        assert_ne!(git::commit_hash(&path), git::UNKNOWN_COMMIT);
        drop(clone);
        assert!(!path.exists());
    }

    #[tokio::test]
    async fn missing_repository_is_external_failure() {
        let base = tempfile::TempDir::new().unwrap();
        let config = CloneConfig {
            base_url: format!("file://{}", base.path().display()),
            timeout_secs: 30,
        };
        let err = clone_repo(&config, "user/absent").await.unwrap_err();
        assert!(matches!(err, StoryError::ExternalResourceFailure(_)));
    }

    #[tokio::test]
    async fn timeout_removes_partial_clone() {
        // Accepts connections into the backlog but never answers.
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let port = listener.local_addr().unwrap().port();
        let config = CloneConfig {
            base_url: format!("http://127.0.0.1:{port}"),
            timeout_secs: 1,
        };
        let reserved = TempClone::reserve("user/slow");
        let path = reserved.path().to_path_buf();

        let err = tokio::time::timeout(
            std::time::Duration::from_secs(20),
            clone_into(&config, reserved),
        )
        .await
        .unwrap()
        .unwrap_err();
        assert!(
            matches!(&err, StoryError::CloneTimeout { repo, secs: 1 } if repo == "user/slow"),
            "{err:?}"
        );
        assert!(!path.exists());
        drop(listener);
    }
}
