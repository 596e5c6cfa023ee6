use crate::error::Result;
use crate::paths;
use crate::stage::{self, Stage};
use chrono::{DateTime, SecondsFormat, Utc};
use std::path::{Path, PathBuf};

/// Identity, isolated working directory, and inputs for one generation.
#[derive(Debug, Clone)]
pub struct GenerationContext {
    pub generation_id: String,
    pub working_dir: PathBuf,
    pub query: String,
    pub source_commit: String,
    pub external_repo_ref: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl GenerationContext {
    /// Allocate a fresh generation id and create its working directory under
    /// `<stories_dir>/.tmp/`.
    pub fn create(
        stories_dir: &Path,
        query: impl Into<String>,
        source_commit: impl Into<String>,
        external_repo_ref: Option<String>,
    ) -> Result<Self> {
        let generation_id = uuid::Uuid::new_v4().to_string();
        let working_dir = paths::working_dir(stories_dir, &generation_id);
        crate::io::ensure_dir(&working_dir)?;
        Ok(Self {
            generation_id,
            working_dir,
            query: query.into(),
            source_commit: source_commit.into(),
            external_repo_ref,
            created_at: Utc::now(),
        })
    }

    /// RFC 3339 creation timestamp, as embedded in the prompt and the story.
    pub fn created_at_rfc3339(&self) -> String {
        self.created_at.to_rfc3339_opts(SecondsFormat::Millis, true)
    }

    /// Where the agent must leave the final artifact.
    pub fn artifact_path(&self, stages: &[Stage]) -> PathBuf {
        let file = stage::final_stage(stages)
            .map(|s| s.expected_file)
            .unwrap_or(stage::STORY_FILE);
        self.working_dir.join(file)
    }

    pub fn short_commit(&self) -> &str {
        let end = self
            .source_commit
            .char_indices()
            .nth(7)
            .map(|(i, _)| i)
            .unwrap_or(self.source_commit.len());
        &self.source_commit[..end]
    }
}
