use crate::cmd::{open_catalog, Overrides};
use crate::output::print_json;
use crate::signal::SignalWatch;
use anyhow::Context;
use std::path::Path;
use std::sync::Arc;
use story_core::config::Config;
use story_core::probe::Progress;
use story_core::{git, paths};
use story_server::clone::clone_repo;
use story_server::generation::{GenerationRequest, Generator};

pub fn run(
    root: &Path,
    overrides: &Overrides,
    query: &str,
    repo: Option<&str>,
    json: bool,
) -> anyhow::Result<()> {
    let query = query.trim();
    if query.is_empty() {
        anyhow::bail!("query must not be empty");
    }
    let repo_ref = repo.map(git::parse_repo_ref).transpose()?;

    let config = overrides.load_config(root)?;
    let catalog = Arc::new(open_catalog(root, &config)?);
    let generator = Generator::from_config(root, &config, catalog)?;

    let rt = tokio::runtime::Runtime::new()?;
    rt.block_on(generate(root, &config, &generator, query, repo_ref, json))
}

async fn generate(
    root: &Path,
    config: &Config,
    generator: &Generator,
    query: &str,
    repo_ref: Option<String>,
    json: bool,
) -> anyhow::Result<()> {
    let signals = SignalWatch::spawn();

    let clone = match &repo_ref {
        Some(repo_ref) => {
            eprintln!("Cloning {repo_ref}...");
            let mut interrupted = signals.cancel();
            let clone = tokio::select! {
                res = clone_repo(&config.clone, repo_ref) => res?,
                Ok(_) = interrupted.wait_for(|cancelled| *cancelled) => {
                    return Err(signals.interrupted().into());
                }
            };
            Some(clone)
        }
        None => None,
    };
    let source_dir = clone
        .as_ref()
        .map(|c| c.path().to_path_buf())
        .unwrap_or_else(|| root.to_path_buf());
    let source_commit = {
        let dir = source_dir.clone();
        tokio::task::spawn_blocking(move || git::commit_hash(&dir))
            .await
            .context("task join error")?
    };

    let req = GenerationRequest {
        query: query.to_string(),
        source_dir,
        source_commit,
        repo: repo_ref,
    };
    let prepared = generator.prepare(&req)?;
    if !json {
        eprintln!("Generation {}", prepared.generation_id());
        eprintln!("Working in {}", prepared.working_dir().display());
    }

    let on_progress = |p: &Progress| {
        if !json && p.stage < p.total {
            eprintln!("[{}/{}] {}...", p.stage, p.total, p.label);
        }
    };
    let result = generator.run(prepared, on_progress, signals.cancel()).await;
    drop(clone);

    match result {
        Ok(story) => {
            let path = paths::story_path(generator.catalog().stories_dir(), &story.id);
            if json {
                print_json(&serde_json::json!({
                    "id": story.id,
                    "title": story.title,
                    "path": path,
                }))?;
            } else {
                println!("Story saved: {}", path.display());
                println!("  {}", story.title);
                println!("  {} chapter(s)", story.chapters.len());
                println!("View it with: code-stories show {}", story.id);
            }
            Ok(())
        }
        Err(failure) if failure.is_cancelled() => Err(signals.interrupted().into()),
        Err(failure) => {
            eprintln!("Generation failed.");
            if !failure.stderr_excerpt.is_empty() {
                eprintln!("stderr: {}", failure.stderr_excerpt);
            }
            if let Some(dir) = &failure.working_dir {
                eprintln!("Intermediate files kept in {}", dir.display());
            }
            Err(failure.reason.into())
        }
    }
}
