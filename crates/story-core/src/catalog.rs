//! Durable store of generated stories.
//!
//! One `<id>.json` per story plus `manifest.json`, a newest-first listing.
//! The manifest read-modify-write is the only state shared between
//! concurrent generations. It runs under a per-catalog mutex for threads and
//! an advisory lock on `manifest.lock` for other processes (a second CLI, or
//! a CLI next to `serve`).

use crate::error::{Result, StoryError};
use crate::io;
use crate::paths;
use crate::story::{Story, StorySummary};
use fs2::FileExt;
use serde::{Deserialize, Serialize};
use std::fs::{File, OpenOptions};
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};
use tracing::{debug, warn};

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Manifest {
    #[serde(default)]
    pub stories: Vec<StorySummary>,
}

/// A retained working directory: an in-flight or failed generation.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkingDir {
    pub generation_id: String,
    pub path: PathBuf,
}

#[derive(Debug)]
pub struct Catalog {
    stories_dir: PathBuf,
    manifest_lock: Mutex<()>,
}

impl Catalog {
    /// Open (creating if needed) the catalog at `stories_dir`.
    pub fn open(stories_dir: impl Into<PathBuf>) -> Result<Self> {
        let stories_dir = stories_dir.into();
        let marker = paths::marker_path(&stories_dir);
        if stories_dir.is_dir() && !marker.exists() && has_entries(&stories_dir) {
            warn!(
                dir = %stories_dir.display(),
                "stories directory was not created by code-stories; adopting it"
            );
        }
        io::ensure_dir(&paths::tmp_dir(&stories_dir))?;
        io::write_if_missing(&marker, b"")?;
        Ok(Self {
            stories_dir,
            manifest_lock: Mutex::new(()),
        })
    }

    pub fn stories_dir(&self) -> &Path {
        &self.stories_dir
    }

    /// The manifest, or an empty one when none has been written yet.
    pub fn manifest(&self) -> Result<Manifest> {
        read_manifest(&self.stories_dir)
    }

    pub fn list(&self) -> Result<Vec<StorySummary>> {
        Ok(self.manifest()?.stories)
    }

    /// Load a story by id. The id is validated before it is used as a path.
    pub fn get(&self, id: &str) -> Result<Story> {
        let id = paths::canonical_id(id)?;
        let path = paths::story_path(&self.stories_dir, &id);
        let text = match std::fs::read_to_string(&path) {
            Ok(text) => text,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(StoryError::StoryNotFound(id));
            }
            Err(e) => return Err(e.into()),
        };
        Story::parse(&text)
    }

    pub fn contains(&self, id: &str) -> bool {
        paths::canonical_id(id)
            .map(|id| paths::story_path(&self.stories_dir, &id).is_file())
            .unwrap_or(false)
    }

    /// Persist a validated story and prepend its summary to the manifest.
    pub fn record(&self, story: &Story) -> Result<PathBuf> {
        let id = paths::canonical_id(&story.id)?;
        let path = paths::story_path(&self.stories_dir, &id);
        io::atomic_write(&path, story.to_pretty_json()?.as_bytes())?;
        self.prepend(story.summary())?;
        debug!(story_id = %id, "recorded story");
        Ok(path)
    }

    /// Hold both the in-process mutex and the cross-process file lock.
    fn lock_manifest(&self, what: &str) -> Result<ManifestGuard<'_>> {
        let thread = self
            .manifest_lock
            .lock()
            .map_err(|_| StoryError::ManifestRaceLoss(what.to_string()))?;
        let file = OpenOptions::new()
            .create(true)
            .truncate(false)
            .write(true)
            .open(paths::manifest_lock_path(&self.stories_dir))?;
        file.lock_exclusive()?;
        Ok(ManifestGuard {
            file,
            _thread: thread,
        })
    }

    fn prepend(&self, summary: StorySummary) -> Result<()> {
        let _guard = self.lock_manifest(&summary.id)?;
        let mut manifest = read_manifest(&self.stories_dir)?;
        manifest.stories.retain(|s| s.id != summary.id);
        manifest.stories.insert(0, summary);
        write_manifest(&self.stories_dir, &manifest)
    }

    /// Rebuild the manifest from the story files on disk, newest first.
    /// Returns the number of stories indexed.
    pub fn reindex(&self) -> Result<usize> {
        let _guard = self.lock_manifest("reindex")?;

        let mut stories = Vec::new();
        for entry in std::fs::read_dir(&self.stories_dir)? {
            let path = entry?.path();
            let Some(stem) = story_stem(&path) else {
                continue;
            };
            let parsed = std::fs::read_to_string(&path)
                .map_err(StoryError::from)
                .and_then(|text| Story::parse(&text));
            match parsed {
                Ok(story) if story.id == stem.to_ascii_lowercase() => {
                    stories.push(story.summary())
                }
                Ok(story) => warn!(
                    file = %path.display(),
                    id = %story.id,
                    "story id does not match its file name; skipping"
                ),
                Err(e) => warn!(file = %path.display(), error = %e, "skipping unreadable story"),
            }
        }
        stories.sort_by(|a, b| b.created_at.cmp(&a.created_at).then(a.id.cmp(&b.id)));
        let count = stories.len();
        write_manifest(&self.stories_dir, &Manifest { stories })?;
        Ok(count)
    }

    /// Working directories still on disk under `.tmp/`.
    pub fn list_working_dirs(&self) -> Result<Vec<WorkingDir>> {
        let tmp = paths::tmp_dir(&self.stories_dir);
        if !tmp.is_dir() {
            return Ok(Vec::new());
        }
        let mut dirs = Vec::new();
        for entry in std::fs::read_dir(&tmp)? {
            let entry = entry?;
            if !entry.file_type()?.is_dir() {
                continue;
            }
            dirs.push(WorkingDir {
                generation_id: entry.file_name().to_string_lossy().into_owned(),
                path: entry.path(),
            });
        }
        dirs.sort_by(|a, b| a.generation_id.cmp(&b.generation_id));
        Ok(dirs)
    }
}

struct ManifestGuard<'a> {
    file: File,
    _thread: MutexGuard<'a, ()>,
}

impl Drop for ManifestGuard<'_> {
    fn drop(&mut self) {
        let _ = FileExt::unlock(&self.file);
    }
}

fn read_manifest(stories_dir: &Path) -> Result<Manifest> {
    let path = paths::manifest_path(stories_dir);
    match std::fs::read_to_string(&path) {
        Ok(text) => Ok(serde_json::from_str(&text)?),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(Manifest::default()),
        Err(e) => Err(e.into()),
    }
}

fn write_manifest(stories_dir: &Path, manifest: &Manifest) -> Result<()> {
    let data = serde_json::to_string_pretty(manifest)?;
    io::atomic_write(&paths::manifest_path(stories_dir), data.as_bytes())
}

/// File stem of `<uuid>.json`, or `None` for anything else.
fn story_stem(path: &Path) -> Option<&str> {
    if path.extension().and_then(|e| e.to_str()) != Some("json") || !path.is_file() {
        return None;
    }
    path.file_stem()
        .and_then(|s| s.to_str())
        .filter(|s| paths::is_uuid(s))
}

fn has_entries(dir: &Path) -> bool {
    std::fs::read_dir(dir)
        .map(|mut it| it.next().is_some())
        .unwrap_or(false)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::story::tests::{sample_value, ID};
    use std::sync::Arc;
    use tempfile::TempDir;

    fn story(id: &str, title: &str, created_at: &str) -> Story {
        let mut v = sample_value(id);
        v["title"] = title.into();
        v["createdAt"] = created_at.into();
        Story::from_value(v).unwrap()
    }

    fn uuid(n: u32) -> String {
        format!("{n:08x}-0000-4000-8000-000000000000")
    }

    #[test]
    fn open_creates_layout() {
        let dir = TempDir::new().unwrap();
        let root = dir.path().join("stories");
        Catalog::open(&root).unwrap();
        assert!(root.join(".tmp").is_dir());
        assert!(root.join(".code-stories").is_file());
    }

    #[test]
    fn missing_manifest_is_empty() {
        let dir = TempDir::new().unwrap();
        let catalog = Catalog::open(dir.path()).unwrap();
        assert!(catalog.list().unwrap().is_empty());
    }

    #[test]
    fn record_then_get() {
        let dir = TempDir::new().unwrap();
        let catalog = Catalog::open(dir.path()).unwrap();
        let s = story(ID, "Routing", "2026-10-19T12:00:00Z");
        let path = catalog.record(&s).unwrap();
        assert_eq!(path, dir.path().join(format!("{ID}.json")));
        assert_eq!(catalog.get(ID).unwrap(), s);
        assert_eq!(catalog.get(&ID.to_uppercase()).unwrap(), s);
        assert!(catalog.contains(ID));
    }

    #[test]
    fn manifest_is_most_recent_first() {
        let dir = TempDir::new().unwrap();
        let catalog = Catalog::open(dir.path()).unwrap();
        let a = story(&uuid(1), "A", "2026-10-19T12:00:00Z");
        let b = story(&uuid(2), "B", "2026-10-19T12:05:00Z");
        catalog.record(&a).unwrap();
        catalog.record(&b).unwrap();
        let list = catalog.list().unwrap();
        assert_eq!(list, vec![b.summary(), a.summary()]);
    }

    #[test]
    fn get_unknown_is_not_found() {
        let dir = TempDir::new().unwrap();
        let catalog = Catalog::open(dir.path()).unwrap();
        assert!(matches!(
            catalog.get(ID).unwrap_err(),
            StoryError::StoryNotFound(_)
        ));
    }

    #[test]
    fn get_rejects_path_like_ids() {
        let dir = TempDir::new().unwrap();
        let catalog = Catalog::open(dir.path()).unwrap();
        assert!(matches!(
            catalog.get("../manifest").unwrap_err(),
            StoryError::InvalidIdentifier(_)
        ));
        assert!(!catalog.contains("../manifest"));
    }

    #[test]
    fn concurrent_records_keep_every_entry() {
        let dir = TempDir::new().unwrap();
        let catalog = Arc::new(Catalog::open(dir.path()).unwrap());
        let handles: Vec<_> = (0..16)
            .map(|n| {
                let catalog = Arc::clone(&catalog);
                std::thread::spawn(move || {
                    let s = story(&uuid(n), &format!("S{n}"), "2026-10-19T12:00:00Z");
                    catalog.record(&s).unwrap();
                })
            })
            .collect();
        for h in handles {
            h.join().unwrap();
        }
        let mut ids: Vec<_> = catalog.list().unwrap().into_iter().map(|s| s.id).collect();
        ids.sort();
        let mut expected: Vec<_> = (0..16).map(uuid).collect();
        expected.sort();
        assert_eq!(ids, expected);
    }

    #[test]
    fn separate_catalogs_on_one_dir_keep_every_entry() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().to_path_buf();
        let handles: Vec<_> = (0..2u32)
            .map(|w| {
                let path = path.clone();
                std::thread::spawn(move || {
                    // Each writer opens its own catalog, as two processes would.
                    let catalog = Catalog::open(&path).unwrap();
                    for i in 0..25 {
                        let n = w * 100 + i;
                        let s = story(&uuid(n), &format!("S{n}"), "2026-10-19T12:00:00Z");
                        catalog.record(&s).unwrap();
                    }
                })
            })
            .collect();
        for h in handles {
            h.join().unwrap();
        }
        let catalog = Catalog::open(&path).unwrap();
        assert_eq!(catalog.list().unwrap().len(), 50);
        assert!(path.join("manifest.lock").is_file());
    }

    #[test]
    fn reindex_recovers_orphaned_story() {
        let dir = TempDir::new().unwrap();
        let catalog = Catalog::open(dir.path()).unwrap();
        let a = story(&uuid(1), "A", "2026-10-19T12:00:00Z");
        let b = story(&uuid(2), "B", "2026-10-19T13:00:00Z");
        catalog.record(&a).unwrap();
        // b written without a manifest entry, as after a crash mid-ingest
        std::fs::write(
            dir.path().join(format!("{}.json", b.id)),
            b.to_pretty_json().unwrap(),
        )
        .unwrap();
        std::fs::write(dir.path().join("notes.json"), "{}").unwrap();
        std::fs::write(dir.path().join(format!("{}.json", uuid(3))), "not json").unwrap();

        assert_eq!(catalog.reindex().unwrap(), 2);
        let list = catalog.list().unwrap();
        assert_eq!(list[0].id, b.id);
        assert_eq!(list[1].id, a.id);
    }

    #[test]
    fn working_dirs_are_listed() {
        let dir = TempDir::new().unwrap();
        let catalog = Catalog::open(dir.path()).unwrap();
        std::fs::create_dir(dir.path().join(".tmp/gen-b")).unwrap();
        std::fs::create_dir(dir.path().join(".tmp/gen-a")).unwrap();
        std::fs::write(dir.path().join(".tmp/stray.txt"), "").unwrap();
        let dirs = catalog.list_working_dirs().unwrap();
        let ids: Vec<_> = dirs.iter().map(|d| d.generation_id.as_str()).collect();
        assert_eq!(ids, vec!["gen-a", "gen-b"]);
    }
}
