use crate::cmd::Overrides;
use crate::output::print_json;
use anyhow::Context;
use clap::Subcommand;
use std::path::Path;
use story_core::config::{Config, WarnLevel};
use story_core::paths;

#[derive(Subcommand)]
pub enum ConfigSubcommand {
    /// Print the effective configuration, with overrides applied
    Show,

    /// Validate the config for common mistakes
    Validate,

    /// Write a default .code-stories.yaml at the project root
    Init,
}

// ---------------------------------------------------------------------------
// Entry point
// ---------------------------------------------------------------------------

pub fn run(
    root: &Path,
    overrides: &Overrides,
    subcmd: ConfigSubcommand,
    json: bool,
) -> anyhow::Result<()> {
    match subcmd {
        ConfigSubcommand::Show => show(root, overrides, json),
        ConfigSubcommand::Validate => validate(root, overrides, json),
        ConfigSubcommand::Init => init(root),
    }
}

// ---------------------------------------------------------------------------
// show
// ---------------------------------------------------------------------------

fn show(root: &Path, overrides: &Overrides, json: bool) -> anyhow::Result<()> {
    let config = overrides.load_config(root)?;
    if json {
        return print_json(&serde_json::json!({
            "root": root,
            "storiesDir": config.stories_dir(root),
            "config": config,
        }));
    }
    println!("# root: {}", root.display());
    println!("# stories: {}", config.stories_dir(root).display());
    print!("{}", serde_yaml::to_string(&config)?);
    Ok(())
}

// ---------------------------------------------------------------------------
// validate
// ---------------------------------------------------------------------------

fn validate(root: &Path, overrides: &Overrides, json: bool) -> anyhow::Result<()> {
    let config = overrides.load_config(root)?;
    let warnings = config.validate(root);

    if json {
        print_json(&serde_json::json!({ "warnings": warnings }))?;
    } else if warnings.is_empty() {
        println!("Config is valid. No warnings.");
    } else {
        for w in &warnings {
            let prefix = match w.level {
                WarnLevel::Warning => "warning",
                WarnLevel::Error => "error",
            };
            println!("[{prefix}] {}", w.message);
        }
    }

    if warnings.iter().any(|w| w.level == WarnLevel::Error) {
        anyhow::bail!("config validation found errors");
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// init
// ---------------------------------------------------------------------------

fn init(root: &Path) -> anyhow::Result<()> {
    let path = paths::config_path(root);
    if path.exists() {
        anyhow::bail!("{} already exists", path.display());
    }
    Config::default()
        .save(root)
        .with_context(|| format!("failed to write {}", path.display()))?;
    println!("Wrote {}", path.display());
    Ok(())
}
