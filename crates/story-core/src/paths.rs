use crate::error::{Result, StoryError};
use regex::Regex;
use std::path::{Path, PathBuf};
use std::sync::OnceLock;

// ---------------------------------------------------------------------------
// Directory constants
// ---------------------------------------------------------------------------

pub const CONFIG_FILE: &str = ".code-stories.yaml";
pub const DEFAULT_STORIES_DIR: &str = "stories";

/// Transient per-generation working directories, relative to the stories dir.
pub const TMP_DIR: &str = ".tmp";
/// Empty marker proving the stories dir was created by this tool.
pub const MARKER_FILE: &str = ".code-stories";
pub const MANIFEST_FILE: &str = "manifest.json";
/// Advisory lock file guarding manifest writes across processes.
pub const MANIFEST_LOCK_FILE: &str = "manifest.lock";

// ---------------------------------------------------------------------------
// Path helpers
// ---------------------------------------------------------------------------

pub fn config_path(root: &Path) -> PathBuf {
    root.join(CONFIG_FILE)
}

pub fn tmp_dir(stories_dir: &Path) -> PathBuf {
    stories_dir.join(TMP_DIR)
}

pub fn working_dir(stories_dir: &Path, generation_id: &str) -> PathBuf {
    tmp_dir(stories_dir).join(generation_id)
}

pub fn manifest_path(stories_dir: &Path) -> PathBuf {
    stories_dir.join(MANIFEST_FILE)
}

pub fn manifest_lock_path(stories_dir: &Path) -> PathBuf {
    stories_dir.join(MANIFEST_LOCK_FILE)
}

pub fn marker_path(stories_dir: &Path) -> PathBuf {
    stories_dir.join(MARKER_FILE)
}

/// Story document path. Callers must validate `id` first; it becomes a file name.
pub fn story_path(stories_dir: &Path, id: &str) -> PathBuf {
    stories_dir.join(format!("{id}.json"))
}

// ---------------------------------------------------------------------------
// Identifier validation
// ---------------------------------------------------------------------------

static UUID_RE: OnceLock<Regex> = OnceLock::new();

fn uuid_re() -> &'static Regex {
    UUID_RE.get_or_init(|| {
        Regex::new(r"(?i)^[0-9a-f]{8}-[0-9a-f]{4}-[0-9a-f]{4}-[0-9a-f]{4}-[0-9a-f]{12}$").unwrap()
    })
}

pub fn is_uuid(id: &str) -> bool {
    uuid_re().is_match(id)
}

/// Validate a story or generation id and return its canonical (lowercase) form.
pub fn canonical_id(id: &str) -> Result<String> {
    if !is_uuid(id) {
        return Err(StoryError::InvalidIdentifier(id.to_string()));
    }
    Ok(id.to_ascii_lowercase())
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
