use crate::error::Result;
use crate::paths;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

// ---------------------------------------------------------------------------
// ConfigWarning / WarnLevel
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConfigWarning {
    pub level: WarnLevel,
    pub message: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WarnLevel {
    Warning,
    Error,
}

// ---------------------------------------------------------------------------
// AgentConfig
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgentConfig {
    #[serde(default = "default_executable")]
    pub executable: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
    #[serde(default = "default_allowed_tools")]
    pub allowed_tools: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub permission_mode: Option<String>,
    /// Passed to the agent verbatim after the generated flags.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub extra_args: Vec<String>,
}

fn default_executable() -> String {
    "claude".to_string()
}

fn default_allowed_tools() -> Vec<String> {
    ["Read", "Grep", "Glob", "Write"]
        .iter()
        .map(|s| s.to_string())
        .collect()
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            executable: default_executable(),
            model: None,
            allowed_tools: default_allowed_tools(),
            permission_mode: None,
            extra_args: Vec::new(),
        }
    }
}

// ---------------------------------------------------------------------------
// ProgressConfig
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProgressConfig {
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,
}

fn default_poll_interval_ms() -> u64 {
    1000
}

impl Default for ProgressConfig {
    fn default() -> Self {
        Self {
            poll_interval_ms: default_poll_interval_ms(),
        }
    }
}

// ---------------------------------------------------------------------------
// CloneConfig
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CloneConfig {
    /// Prefix for `<base_url>/<user>/<repo>.git`.
    #[serde(default = "default_clone_base_url")]
    pub base_url: String,
    #[serde(default = "default_clone_timeout_secs")]
    pub timeout_secs: u64,
}

fn default_clone_base_url() -> String {
    "https://github.com".to_string()
}

fn default_clone_timeout_secs() -> u64 {
    60
}

impl Default for CloneConfig {
    fn default() -> Self {
        Self {
            base_url: default_clone_base_url(),
            timeout_secs: default_clone_timeout_secs(),
        }
    }
}

// ---------------------------------------------------------------------------
// Config
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Config {
    #[serde(default = "default_stories_dir")]
    pub stories_dir: PathBuf,
    #[serde(default)]
    pub agent: AgentConfig,
    #[serde(default)]
    pub progress: ProgressConfig,
    #[serde(default)]
    pub clone: CloneConfig,
    /// Authoring guidance file replacing the built-in text.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub guidance_file: Option<PathBuf>,
}

fn default_stories_dir() -> PathBuf {
    PathBuf::from(paths::DEFAULT_STORIES_DIR)
}

impl Default for Config {
    fn default() -> Self {
        Self {
            stories_dir: default_stories_dir(),
            agent: AgentConfig::default(),
            progress: ProgressConfig::default(),
            clone: CloneConfig::default(),
            guidance_file: None,
        }
    }
}

impl Config {
    /// Load `.code-stories.yaml` from `root`, or defaults when absent.
    pub fn load(root: &Path) -> Result<Self> {
        let path = paths::config_path(root);
        if !path.exists() {
            return Ok(Self::default());
        }
        let data = std::fs::read_to_string(&path)?;
        let config: Config = serde_yaml::from_str(&data)?;
        Ok(config)
    }

    pub fn save(&self, root: &Path) -> Result<()> {
        let path = paths::config_path(root);
        let data = serde_yaml::to_string(self)?;
        crate::io::atomic_write(&path, data.as_bytes())
    }

    /// Stories directory resolved against `root` when relative.
    pub fn stories_dir(&self, root: &Path) -> PathBuf {
        resolve(root, &self.stories_dir)
    }

    pub fn guidance_path(&self, root: &Path) -> Option<PathBuf> {
        self.guidance_file.as_deref().map(|p| resolve(root, p))
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.progress.poll_interval_ms.max(1))
    }

    pub fn clone_timeout(&self) -> Duration {
        Duration::from_secs(self.clone.timeout_secs)
    }

    pub fn validate(&self, root: &Path) -> Vec<ConfigWarning> {
        let mut warnings = Vec::new();

        if self.agent.executable.trim().is_empty() {
            warnings.push(ConfigWarning {
                level: WarnLevel::Error,
                message: "agent.executable is empty".to_string(),
            });
        }
        if self.agent.allowed_tools.is_empty() {
            warnings.push(ConfigWarning {
                level: WarnLevel::Error,
                message: "agent.allowed_tools is empty; the agent could not write its stage files"
                    .to_string(),
            });
        } else if !self.agent.allowed_tools.iter().any(|t| t == "Write") {
            warnings.push(ConfigWarning {
                level: WarnLevel::Warning,
                message: "agent.allowed_tools does not include Write".to_string(),
            });
        }
        if self.progress.poll_interval_ms == 0 {
            warnings.push(ConfigWarning {
                level: WarnLevel::Warning,
                message: "progress.poll_interval_ms is 0; 1ms will be used".to_string(),
            });
        }
        if self.clone.timeout_secs == 0 {
            warnings.push(ConfigWarning {
                level: WarnLevel::Error,
                message: "clone.timeout_secs is 0; every clone would time out".to_string(),
            });
        }
        if let Some(path) = self.guidance_path(root) {
            if !path.is_file() {
                warnings.push(ConfigWarning {
                    level: WarnLevel::Error,
                    message: format!("guidance_file '{}' does not exist", path.display()),
                });
            }
        }

        warnings
    }
}

fn resolve(root: &Path, p: &Path) -> PathBuf {
    if p.is_absolute() {
        p.to_path_buf()
    } else {
        root.join(p)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn missing_file_yields_defaults() {
        let dir = TempDir::new().unwrap();
        let config = Config::load(dir.path()).unwrap();
        assert_eq!(config, Config::default());
        assert_eq!(config.agent.executable, "claude");
        assert_eq!(config.agent.allowed_tools, vec!["Read", "Grep", "Glob", "Write"]);
        assert_eq!(config.poll_interval(), Duration::from_secs(1));
        assert_eq!(config.clone_timeout(), Duration::from_secs(60));
    }

    #[test]
    fn partial_yaml_fills_defaults() {
        let dir = TempDir::new().unwrap();
        std::fs::write(
            dir.path().join(paths::CONFIG_FILE),
            "stories_dir: docs/stories\nagent:\n  model: opus\n",
        )
        .unwrap();
        let config = Config::load(dir.path()).unwrap();
        assert_eq!(config.stories_dir(dir.path()), dir.path().join("docs/stories"));
        assert_eq!(config.agent.model.as_deref(), Some("opus"));
        assert_eq!(config.agent.executable, "claude");
        assert_eq!(config.progress.poll_interval_ms, 1000);
    }

    #[test]
    fn save_round_trips() {
        let dir = TempDir::new().unwrap();
        let mut config = Config::default();
        config.clone.timeout_secs = 5;
        config.guidance_file = Some(PathBuf::from("guidance.md"));
        config.save(dir.path()).unwrap();
        assert_eq!(Config::load(dir.path()).unwrap(), config);
    }

    #[test]
    fn absolute_stories_dir_is_kept() {
        let config = Config {
            stories_dir: PathBuf::from("/var/stories"),
            ..Config::default()
        };
        assert_eq!(
            config.stories_dir(Path::new("/project")),
            PathBuf::from("/var/stories")
        );
    }

    #[test]
    fn validate_default_is_clean() {
        let dir = TempDir::new().unwrap();
        assert!(Config::default().validate(dir.path()).is_empty());
    }

    #[test]
    fn validate_flags_problems() {
        let dir = TempDir::new().unwrap();
        let mut config = Config::default();
        config.agent.allowed_tools.clear();
        config.clone.timeout_secs = 0;
        config.guidance_file = Some(PathBuf::from("missing.md"));
        let warnings = config.validate(dir.path());
        assert_eq!(
            warnings
                .iter()
                .filter(|w| w.level == WarnLevel::Error)
                .count(),
            3
        );
    }

    #[test]
    fn invalid_yaml_is_an_error() {
        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join(paths::CONFIG_FILE), "agent: [unclosed").unwrap();
        assert!(Config::load(dir.path()).is_err());
    }
}
