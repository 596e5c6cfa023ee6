pub mod config;
pub mod generate;
pub mod list;
pub mod optimize;
pub mod progress;
pub mod reindex;
pub mod serve;
pub mod show;

use anyhow::Context;
use std::path::{Path, PathBuf};
use story_core::catalog::Catalog;
use story_core::config::Config;

/// Global flags that take precedence over `.code-stories.yaml`.
#[derive(Debug, Default, Clone)]
pub struct Overrides {
    pub stories_dir: Option<PathBuf>,
    pub agent: Option<String>,
}

impl Overrides {
    /// Load the config at `root` with the overrides applied. A relative
    /// `--stories-dir` is taken relative to the current directory.
    pub fn load_config(&self, root: &Path) -> anyhow::Result<Config> {
        let mut config = Config::load(root).context("failed to load .code-stories.yaml")?;
        if let Some(dir) = &self.stories_dir {
            config.stories_dir = if dir.is_absolute() {
                dir.clone()
            } else {
                std::env::current_dir()?.join(dir)
            };
        }
        if let Some(agent) = &self.agent {
            config.agent.executable = agent.clone();
        }
        Ok(config)
    }
}

pub fn open_catalog(root: &Path, config: &Config) -> anyhow::Result<Catalog> {
    let dir = config.stories_dir(root);
    Catalog::open(&dir).with_context(|| format!("failed to open stories directory {}", dir.display()))
}
