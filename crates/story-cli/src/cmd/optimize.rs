use crate::cmd::{open_catalog, Overrides};
use crate::signal::SignalWatch;
use anyhow::Context;
use claude_agent::AgentOptions;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use story_core::catalog::Catalog;
use story_core::config::{CloneConfig, Config};
use story_core::optimize::{self, EvalQuery, EvalResult, Outcome};
use story_core::{git, io, prompt};
use story_server::clone::clone_repo;
use story_server::generation::{self, GenerationRequest, Generator};
use tracing::{info, warn};

/// Used when neither `--guidance` nor `guidance_file` names one.
const DEFAULT_GUIDANCE_FILE: &str = "story-guidance.md";

#[derive(clap::Args)]
pub struct OptimizeArgs {
    /// Evaluation queries (markdown, queries listed under a `## Query` heading)
    #[arg(long, default_value = "optimization/queries.md")]
    queries: PathBuf,

    /// What good stories look like
    #[arg(long, default_value = "optimization/goals.md")]
    goals: PathBuf,

    #[arg(long, default_value_t = 5)]
    iterations: usize,

    #[arg(long, default_value_t = 3)]
    queries_per_iteration: usize,

    #[arg(long, default_value = "optimization/results")]
    results_dir: PathBuf,

    /// Guidance file to tune (default: `guidance_file` from the config)
    #[arg(long)]
    guidance: Option<PathBuf>,
}

struct Optimizer {
    root: PathBuf,
    goals: String,
    queries: Vec<EvalQuery>,
    per_iteration: usize,
    results_dir: PathBuf,
    guidance_path: PathBuf,
    catalog: Arc<Catalog>,
    agent: AgentOptions,
    clone: CloneConfig,
    poll_interval: std::time::Duration,
}

pub fn run(root: &Path, overrides: &Overrides, args: OptimizeArgs) -> anyhow::Result<()> {
    let config = overrides.load_config(root)?;
    let resolve = |p: &Path| if p.is_absolute() { p.to_path_buf() } else { root.join(p) };

    let goals_path = resolve(&args.goals);
    let goals = std::fs::read_to_string(&goals_path)
        .with_context(|| format!("failed to read goals from {}", goals_path.display()))?;
    let queries_path = resolve(&args.queries);
    let queries = optimize::parse_queries(
        &std::fs::read_to_string(&queries_path)
            .with_context(|| format!("failed to read queries from {}", queries_path.display()))?,
    );
    if queries.is_empty() {
        anyhow::bail!(
            "no queries parsed from {}; list them under a `## Query` heading",
            queries_path.display()
        );
    }
    if queries.len() < args.queries_per_iteration {
        anyhow::bail!(
            "only {} queries parsed but --queries-per-iteration is {}",
            queries.len(),
            args.queries_per_iteration
        );
    }

    let guidance_path = guidance_path(root, args.guidance.as_deref(), &config);
    if io::write_if_missing(&guidance_path, prompt::DEFAULT_GUIDANCE.as_bytes())? {
        println!("Seeded {} with the built-in guidance", guidance_path.display());
    }
    if config.guidance_path(root).as_deref() != Some(guidance_path.as_path()) {
        warn!(
            path = %guidance_path.display(),
            "guidance file is not the configured guidance_file; `generate` will not use it until it is"
        );
    }

    let optimizer = Optimizer {
        root: root.to_path_buf(),
        goals,
        queries,
        per_iteration: args.queries_per_iteration,
        results_dir: resolve(&args.results_dir),
        guidance_path,
        catalog: Arc::new(open_catalog(root, &config)?),
        agent: generation::agent_options(&config)?,
        clone: config.clone.clone(),
        poll_interval: config.poll_interval(),
    };

    println!("Queries found: {}", optimizer.queries.len());
    println!("Iterations: {}", args.iterations);
    println!("Queries per iteration: {}", optimizer.per_iteration);

    let rt = tokio::runtime::Runtime::new()?;
    rt.block_on(async {
        let signals = SignalWatch::spawn();
        for i in 1..=args.iterations {
            optimizer.iteration(i, args.iterations, &signals).await?;
        }
        Ok::<(), anyhow::Error>(())
    })?;

    println!("\nOptimization complete. Results in {}", optimizer.results_dir.display());
    println!("Each iteration directory holds:");
    println!("  {}  (guidance used)", optimize::GUIDANCE_SNAPSHOT);
    println!("  story_*.json  (generated stories)");
    println!("  {}  (what worked, what to improve)", optimize::REFLECTIONS_FILE);
    println!("  {}  (the rewritten guidance)", optimize::IMPROVED_GUIDANCE_FILE);
    Ok(())
}

/// `--guidance`, else the configured `guidance_file`, else the default name.
fn guidance_path(root: &Path, flag: Option<&Path>, config: &Config) -> PathBuf {
    match flag {
        Some(p) if p.is_absolute() => p.to_path_buf(),
        Some(p) => root.join(p),
        None => config
            .guidance_path(root)
            .unwrap_or_else(|| root.join(DEFAULT_GUIDANCE_FILE)),
    }
}

impl Optimizer {
    async fn iteration(
        &self,
        i: usize,
        of: usize,
        signals: &SignalWatch,
    ) -> anyhow::Result<()> {
        println!("\n=== Iteration {i} / {of} ===");
        let iter_dir = optimize::iteration_dir(&self.results_dir, i);
        io::ensure_dir(&iter_dir)?;

        let guidance = std::fs::read_to_string(&self.guidance_path)
            .with_context(|| format!("failed to read {}", self.guidance_path.display()))?;
        io::atomic_write(&iter_dir.join(optimize::GUIDANCE_SNAPSHOT), guidance.as_bytes())?;

        // Phase 1: generate with the current guidance.
        let generator = Generator::new(
            Arc::clone(&self.catalog),
            self.agent.clone(),
            guidance.clone(),
            self.poll_interval,
        );
        let mut results = Vec::new();
        for q in self.queries.iter().take(self.per_iteration) {
            println!("  Generating: {}", crate::output::truncate(&q.query, 60));
            let outcome = self.evaluate(&generator, q, signals).await?;
            let result = EvalResult {
                query: q.clone(),
                outcome,
            };
            if let Outcome::Failed { error, .. } = &result.outcome {
                warn!(iteration = i, query = %q.query, error = %error, "generation failed");
            }
            optimize::save_result(&iter_dir, &result)?;
            results.push(result);
        }
        if !results.iter().any(EvalResult::succeeded) {
            anyhow::bail!(
                "iteration {i}: all {} generations failed; nothing to evaluate",
                results.len()
            );
        }

        // Phase 2: reflect.
        println!("  Reflecting...");
        let previous =
            optimize::previous_reflections(&self.results_dir, i, optimize::MAX_PREVIOUS_REFLECTIONS);
        let summaries = optimize::summarize_results(&results);
        let reply = self
            .ask(
                &optimize::reflection_prompt(&self.goals, &guidance, &previous, &summaries),
                signals,
            )
            .await?;
        let reflections = optimize::check_agent_output(&format!("iteration {i} reflections"), &reply)?;
        io::atomic_write(&iter_dir.join(optimize::REFLECTIONS_FILE), reflections.as_bytes())?;

        // Phase 3: rewrite the guidance.
        println!("  Improving guidance...");
        let reply = self
            .ask(&optimize::improvement_prompt(&self.goals, &guidance, &reflections), signals)
            .await?;
        let improved = optimize::check_agent_output(
            &format!("iteration {i} improved guidance"),
            optimize::unfence(&reply),
        )?;
        let improved = format!("{improved}\n");
        io::atomic_write(&iter_dir.join(optimize::IMPROVED_GUIDANCE_FILE), improved.as_bytes())?;
        io::atomic_write(&self.guidance_path, improved.as_bytes())?;

        info!(iteration = i, "iteration complete");
        Ok(())
    }

    /// Run one evaluation query. Only an interrupt is an error here; every
    /// other failure is an outcome to reflect on.
    async fn evaluate(
        &self,
        generator: &Generator,
        q: &EvalQuery,
        signals: &SignalWatch,
    ) -> anyhow::Result<Outcome> {
        let failed = |error: String, stderr: String| -> anyhow::Result<Outcome> {
            Ok(Outcome::Failed { error, stderr })
        };

        let clone = match &q.repo {
            Some(repo) => {
                let cloned = match git::parse_repo_ref(repo) {
                    Ok(repo_ref) => {
                        let mut interrupted = signals.cancel();
                        tokio::select! {
                            res = clone_repo(&self.clone, &repo_ref) => res,
                            Ok(_) = interrupted.wait_for(|cancelled| *cancelled) => {
                                return Err(signals.interrupted().into());
                            }
                        }
                    }
                    Err(e) => Err(e),
                };
                match cloned {
                    Ok(clone) => Some(clone),
                    Err(e) => return failed(e.to_string(), String::new()),
                }
            }
            None => None,
        };
        let source_dir = clone
            .as_ref()
            .map(|c| c.path().to_path_buf())
            .unwrap_or_else(|| self.root.clone());
        let req = GenerationRequest {
            query: q.query.clone(),
            source_commit: git::commit_hash(&source_dir),
            source_dir,
            repo: clone.as_ref().map(|c| c.repo_ref().to_string()),
        };

        match generator.generate(&req, |_| {}, signals.cancel()).await {
            Ok(story) => Ok(Outcome::Generated(story)),
            Err(f) if f.is_cancelled() => Err(signals.interrupted().into()),
            Err(f) => failed(f.reason.to_string(), f.stderr_excerpt),
        }
    }

    /// One text-only agent call: no tools, no extra directories. A signal
    /// drops the call, which kills the agent.
    async fn ask(&self, prompt: &str, signals: &SignalWatch) -> anyhow::Result<String> {
        let opts = AgentOptions {
            allowed_tools: Vec::new(),
            cwd: Some(self.root.clone()),
            ..self.agent.clone()
        };
        let mut interrupted = signals.cancel();
        let result = tokio::select! {
            res = claude_agent::run(prompt, &opts) => res.context("agent call failed")?,
            Ok(_) = interrupted.wait_for(|cancelled| *cancelled) => {
                return Err(signals.interrupted().into());
            }
        };
        Ok(result.text)
    }
}
