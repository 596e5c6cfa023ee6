use std::path::{Path, PathBuf};
use story_core::paths;

/// Resolve the project root.
///
/// Priority:
/// 1. `--root` flag / `CODE_STORIES_ROOT` env var (passed in as `explicit`)
/// 2. Walk upward from `cwd` looking for `.code-stories.yaml`
/// 3. Walk upward from `cwd` looking for `.git/`
/// 4. Fall back to `cwd`
pub fn resolve_root(explicit: Option<&Path>) -> PathBuf {
    if let Some(p) = explicit {
        return p.to_path_buf();
    }
    let cwd = std::env::current_dir().unwrap_or_else(|_| PathBuf::from("."));
    resolve_from(&cwd)
}

fn resolve_from(start: &Path) -> PathBuf {
    if let Some(dir) = find_upward(start, |d| d.join(paths::CONFIG_FILE).is_file()) {
        return dir;
    }
    if let Some(dir) = find_upward(start, |d| d.join(".git").exists()) {
        return dir;
    }
    start.to_path_buf()
}

fn find_upward(start: &Path, hit: impl Fn(&Path) -> bool) -> Option<PathBuf> {
    start.ancestors().find(|d| hit(d)).map(Path::to_path_buf)
}
