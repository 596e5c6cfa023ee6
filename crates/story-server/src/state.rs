use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Serialize;
use story_core::catalog::Catalog;
use story_core::config::Config;
use tokio::sync::{watch, Mutex};

use crate::generation::Generator;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum GenerationStatus {
    Running,
    Succeeded,
    Failed,
    Cancelled,
}

impl GenerationStatus {
    pub fn is_terminal(self) -> bool {
        !matches!(self, GenerationStatus::Running)
    }
}

/// In-memory bookkeeping for one server-side generation. Progress is not
/// stored here; it is probed from `working_dir` on demand.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GenerationRecord {
    pub generation_id: String,
    pub query: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub repo: Option<String>,
    pub status: GenerationStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub story_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stderr: Option<String>,
    pub working_dir: PathBuf,
    pub started_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub finished_at: Option<DateTime<Utc>>,
    #[serde(skip)]
    pub cancel: Option<Arc<watch::Sender<bool>>>,
}

pub type GenerationMap = Arc<Mutex<HashMap<String, GenerationRecord>>>;

/// Finished records kept for status queries. Running ones are never evicted.
pub const MAX_FINISHED_RECORDS: usize = 100;

/// Drop the oldest finished records until at most `keep` remain.
pub fn prune_finished(map: &mut HashMap<String, GenerationRecord>, keep: usize) {
    let mut finished: Vec<(DateTime<Utc>, String)> = map
        .values()
        .filter(|r| r.status.is_terminal())
        .map(|r| (r.finished_at.unwrap_or(r.started_at), r.generation_id.clone()))
        .collect();
    if finished.len() <= keep {
        return;
    }
    finished.sort();
    let excess = finished.len() - keep;
    for (_, id) in finished.into_iter().take(excess) {
        map.remove(&id);
    }
}

/// Shared application state passed to all route handlers.
#[derive(Clone)]
pub struct AppState {
    pub root: PathBuf,
    pub config: Arc<Config>,
    pub generator: Arc<Generator>,
    pub generations: GenerationMap,
}

impl AppState {
    /// Load configuration from `root`, open the catalog and build the generator.
    pub fn new(root: PathBuf) -> anyhow::Result<Self> {
        let config = Config::load(&root)?;
        Self::with_config(root, config)
    }

    pub fn with_config(root: PathBuf, config: Config) -> anyhow::Result<Self> {
        let catalog = Arc::new(Catalog::open(config.stories_dir(&root))?);
        let generator = Generator::from_config(&root, &config, catalog)?;
        Ok(Self {
            root,
            config: Arc::new(config),
            generator: Arc::new(generator),
            generations: Arc::new(Mutex::new(HashMap::new())),
        })
    }

    pub fn catalog(&self) -> &Arc<Catalog> {
        self.generator.catalog()
    }

    pub fn stories_dir(&self) -> &Path {
        self.catalog().stories_dir()
    }

    /// Signal every running generation to stop. Returns how many were told.
    pub async fn cancel_running(&self) -> usize {
        let map = self.generations.lock().await;
        let mut told = 0;
        for rec in map.values().filter(|r| !r.status.is_terminal()) {
            if let Some(cancel) = &rec.cancel {
                let _ = cancel.send(true);
                told += 1;
            }
        }
        told
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_state_opens_catalog_under_root() {
        let dir = tempfile::TempDir::new().unwrap();
        let state = AppState::new(dir.path().to_path_buf()).unwrap();
        assert_eq!(state.root, dir.path());
        assert_eq!(state.stories_dir(), dir.path().join("stories"));
        assert!(dir.path().join("stories/.tmp").is_dir());
    }

    fn record(id: &str, status: GenerationStatus, finished_secs: i64) -> GenerationRecord {
        let started_at = DateTime::from_timestamp(1_700_000_000, 0).unwrap();
        GenerationRecord {
            generation_id: id.to_string(),
            query: "q".into(),
            repo: None,
            status,
            story_id: None,
            error: None,
            stderr: None,
            working_dir: PathBuf::from("/stories/.tmp").join(id),
            started_at,
            finished_at: status
                .is_terminal()
                .then(|| started_at + chrono::Duration::seconds(finished_secs)),
            cancel: None,
        }
    }

    #[test]
    fn pruning_keeps_newest_finished_and_all_running() {
        let mut map = HashMap::new();
        for (id, status, secs) in [
            ("old", GenerationStatus::Succeeded, 1),
            ("mid", GenerationStatus::Failed, 2),
            ("new", GenerationStatus::Cancelled, 3),
            ("live", GenerationStatus::Running, 0),
        ] {
            map.insert(id.to_string(), record(id, status, secs));
        }
        prune_finished(&mut map, 2);
        let mut left: Vec<_> = map.keys().map(String::as_str).collect();
        left.sort();
        assert_eq!(left, vec!["live", "mid", "new"]);

        prune_finished(&mut map, 0);
        assert_eq!(map.keys().collect::<Vec<_>>(), vec!["live"]);
    }

    #[tokio::test]
    async fn cancel_running_signals_only_live_generations() {
        let dir = tempfile::TempDir::new().unwrap();
        let state = AppState::new(dir.path().to_path_buf()).unwrap();
        let (tx, mut rx) = watch::channel(false);
        let mut live = record("live", GenerationStatus::Running, 0);
        live.cancel = Some(Arc::new(tx));
        {
            let mut map = state.generations.lock().await;
            map.insert("live".into(), live);
            map.insert("done".into(), record("done", GenerationStatus::Succeeded, 1));
        }
        assert_eq!(state.cancel_running().await, 1);
        assert!(*rx.borrow_and_update());
    }

    #[test]
    fn terminal_statuses() {
        assert!(!GenerationStatus::Running.is_terminal());
        assert!(GenerationStatus::Succeeded.is_terminal());
        assert!(GenerationStatus::Failed.is_terminal());
        assert!(GenerationStatus::Cancelled.is_terminal());
    }
}
