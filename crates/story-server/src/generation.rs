//! The generation orchestrator: one agent run from prompt to catalog entry.
//!
//! ```text
//! CREATED ──spawn──► RUNNING ──exit + ingest ok──► SUCCEEDED
//!                       │
//!                       └── spawn error / no artifact / invalid artifact / cancel ──► FAILED
//! ```
//!
//! Progress is never stored; it is recomputed by probing the working
//! directory on a timer, and reported only when the stage index changes.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use claude_agent::{AgentOptions, AgentProcess, PermissionMode};
use story_core::catalog::Catalog;
use story_core::config::Config;
use story_core::context::GenerationContext;
use story_core::probe::{self, Progress};
use story_core::stage::{self, Stage, STAGES};
use story_core::story::Story;
use story_core::{ingest, io, prompt, StoryError};
use thiserror::Error;
use tokio::sync::watch;
use tracing::{debug, info, warn};

/// Characters of agent stderr surfaced with a failure.
pub const STDERR_EXCERPT_CHARS: usize = 500;

#[derive(Debug, Clone)]
pub struct GenerationRequest {
    pub query: String,
    /// Source tree the agent narrates; its cwd.
    pub source_dir: PathBuf,
    pub source_commit: String,
    /// `user/repo` when narrating a cloned external repository.
    pub repo: Option<String>,
}

/// A generation in the CREATED state: context allocated, directory made,
/// prompt built, nothing spawned yet.
#[derive(Debug)]
pub struct PreparedGeneration {
    pub ctx: GenerationContext,
    pub source_dir: PathBuf,
    pub prompt: String,
}

impl PreparedGeneration {
    pub fn generation_id(&self) -> &str {
        &self.ctx.generation_id
    }

    pub fn working_dir(&self) -> &Path {
        &self.ctx.working_dir
    }
}

/// Terminal failure of one generation.
#[derive(Debug, Error)]
#[error("{reason}")]
pub struct GenerationFailure {
    /// `None` when the failure came before an identifier was allocated.
    pub generation_id: Option<String>,
    #[source]
    pub reason: StoryError,
    /// Present when the working directory was kept for inspection.
    pub working_dir: Option<PathBuf>,
    pub stderr_excerpt: String,
}

impl GenerationFailure {
    pub fn is_cancelled(&self) -> bool {
        matches!(self.reason, StoryError::Cancelled)
    }
}

// ---------------------------------------------------------------------------
// Generator
// ---------------------------------------------------------------------------

/// Runs generations against one catalog. Cheap to share behind an `Arc`;
/// concurrent runs are isolated by their working directories and only meet
/// at the catalog's manifest lock.
pub struct Generator {
    catalog: Arc<Catalog>,
    agent: AgentOptions,
    stages: &'static [Stage],
    guidance: String,
    poll_interval: Duration,
}

impl Generator {
    pub fn new(
        catalog: Arc<Catalog>,
        agent: AgentOptions,
        guidance: String,
        poll_interval: Duration,
    ) -> Self {
        Self {
            catalog,
            agent,
            stages: STAGES,
            guidance,
            poll_interval,
        }
    }

    /// Build a generator from project configuration.
    pub fn from_config(root: &Path, config: &Config, catalog: Arc<Catalog>) -> anyhow::Result<Self> {
        let guidance = load_guidance(root, config)?;
        let agent = agent_options(config)?;
        Ok(Self::new(catalog, agent, guidance, config.poll_interval()))
    }

    pub fn catalog(&self) -> &Arc<Catalog> {
        &self.catalog
    }

    pub fn stages(&self) -> &'static [Stage] {
        self.stages
    }

    pub fn guidance(&self) -> &str {
        &self.guidance
    }

    pub fn agent_options(&self) -> &AgentOptions {
        &self.agent
    }

    /// Allocate the context and build the prompt (CREATED).
    pub fn prepare(&self, req: &GenerationRequest) -> Result<PreparedGeneration, StoryError> {
        let ctx = GenerationContext::create(
            self.catalog.stories_dir(),
            req.query.clone(),
            req.source_commit.clone(),
            req.repo.clone(),
        )?;
        let prompt = prompt::build(&ctx, &self.guidance);
        debug!(
            generation_id = %ctx.generation_id,
            commit = ctx.short_commit(),
            dir = %ctx.working_dir.display(),
            "generation created"
        );
        Ok(PreparedGeneration {
            ctx,
            source_dir: req.source_dir.clone(),
            prompt,
        })
    }

    /// Prepare and run in one step.
    pub async fn generate<F>(
        &self,
        req: &GenerationRequest,
        on_progress: F,
        cancel: watch::Receiver<bool>,
    ) -> Result<Story, GenerationFailure>
    where
        F: FnMut(&Progress) + Send,
    {
        let prepared = self.prepare(req).map_err(|reason| GenerationFailure {
            generation_id: None,
            reason,
            working_dir: None,
            stderr_excerpt: String::new(),
        })?;
        self.run(prepared, on_progress, cancel).await
    }

    /// Drive a prepared generation to a terminal state.
    ///
    /// `on_progress` is called whenever the probed stage index changes.
    /// Setting `cancel` to `true` kills the agent, deletes the working
    /// directory, and fails with [`StoryError::Cancelled`].
    pub async fn run<F>(
        &self,
        prepared: PreparedGeneration,
        mut on_progress: F,
        mut cancel: watch::Receiver<bool>,
    ) -> Result<Story, GenerationFailure>
    where
        F: FnMut(&Progress) + Send,
    {
        let PreparedGeneration {
            ctx,
            source_dir,
            prompt,
        } = prepared;
        let generation_id = ctx.generation_id.clone();
        let working_dir = ctx.working_dir.clone();
        let fail = |reason: StoryError, keep_dir: bool, stderr: &str| GenerationFailure {
            generation_id: Some(generation_id.clone()),
            reason,
            working_dir: keep_dir.then(|| working_dir.clone()),
            stderr_excerpt: io::excerpt(stderr, STDERR_EXCERPT_CHARS),
        };

        if *cancel.borrow() {
            discard(&working_dir);
            return Err(fail(StoryError::Cancelled, false, ""));
        }

        let opts = AgentOptions {
            cwd: Some(source_dir),
            add_dirs: vec![working_dir.clone()],
            ..self.agent.clone()
        };
        let mut process = match AgentProcess::spawn(&prompt, &opts).await {
            Ok(p) => p,
            Err(e) => {
                warn!(generation_id = %generation_id, error = %e, "agent failed to start");
                return Err(fail(StoryError::SpawnFailure(e.to_string()), true, ""));
            }
        };
        info!(generation_id = %generation_id, pid = ?process.id(), "generation running");

        let mut ticker = tokio::time::interval(self.poll_interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        let mut last_stage: Option<usize> = None;
        let mut cancel_open = true;

        let status = loop {
            tokio::select! {
                status = process.wait_status() => break status,
                _ = ticker.tick() => {
                    let progress = probe_async(self.stages, &working_dir).await;
                    report(&mut last_stage, &progress, &mut on_progress);
                }
                changed = cancel.changed(), if cancel_open => {
                    if changed.is_err() {
                        cancel_open = false;
                        continue;
                    }
                    if *cancel.borrow() {
                        process.kill().await;
                        let stderr = process.stderr();
                        discard(&working_dir);
                        info!(generation_id = %generation_id, "generation cancelled");
                        return Err(fail(StoryError::Cancelled, false, &stderr));
                    }
                }
            }
        };

        let status = match status {
            Ok(status) => status,
            Err(e) => {
                let stderr = process.stderr();
                return Err(fail(StoryError::SpawnFailure(e.to_string()), true, &stderr));
            }
        };
        let exit = process.finish(status).await;
        let progress = probe_async(self.stages, &working_dir).await;
        report(&mut last_stage, &progress, &mut on_progress);

        let final_file = stage::final_stage(self.stages)
            .map(|s| s.expected_file)
            .unwrap_or(stage::STORY_FILE);
        if !exit.success() {
            if working_dir.join(final_file).is_file() {
                warn!(generation_id = %generation_id, exit_code = ?exit.code, "agent exited non-zero but wrote the artifact");
            } else {
                warn!(generation_id = %generation_id, exit_code = ?exit.code, "agent exited non-zero");
            }
        }

        let catalog = Arc::clone(&self.catalog);
        let dir = working_dir.clone();
        let gen_id = generation_id.clone();
        let ingested = tokio::task::spawn_blocking(move || {
            ingest::ingest(&catalog, &dir, final_file, Some(&gen_id))
        })
        .await;

        match ingested {
            Ok(Ok(story)) => {
                info!(generation_id = %generation_id, story_id = %story.id, "generation succeeded");
                Ok(story)
            }
            Ok(Err(reason)) => {
                warn!(generation_id = %generation_id, error = %reason, "generation failed");
                Err(fail(reason, true, &exit.stderr))
            }
            Err(e) => Err(fail(
                StoryError::Io(std::io::Error::other(format!("task join error: {e}"))),
                true,
                &exit.stderr,
            )),
        }
    }
}

fn report<F: FnMut(&Progress)>(last: &mut Option<usize>, progress: &Progress, on_progress: &mut F) {
    if *last != Some(progress.stage) {
        *last = Some(progress.stage);
        on_progress(progress);
    }
}

/// Probe off the async runtime. A failed probe counts as no progress.
pub async fn probe_async(stages: &'static [Stage], working_dir: &Path) -> Progress {
    let dir = working_dir.to_path_buf();
    match tokio::task::spawn_blocking(move || probe::probe(stages, &dir)).await {
        Ok(progress) => progress,
        Err(_) => probe::probe(stages, Path::new("")),
    }
}

fn discard(working_dir: &Path) {
    if let Err(e) = io::remove_dir_all_if_exists(working_dir) {
        warn!(dir = %working_dir.display(), error = %e, "could not remove working directory");
    }
}

// ---------------------------------------------------------------------------
// Config plumbing
// ---------------------------------------------------------------------------

/// Authoring guidance: the configured file if any, else the built-in text.
pub fn load_guidance(root: &Path, config: &Config) -> anyhow::Result<String> {
    use anyhow::Context as _;
    match config.guidance_path(root) {
        Some(path) => std::fs::read_to_string(&path)
            .with_context(|| format!("failed to read guidance file {}", path.display())),
        None => Ok(prompt::DEFAULT_GUIDANCE.to_string()),
    }
}

pub fn agent_options(config: &Config) -> anyhow::Result<AgentOptions> {
    let permission_mode = match config.agent.permission_mode.as_deref() {
        Some(mode) => mode.parse::<PermissionMode>()?,
        None => PermissionMode::Default,
    };
    Ok(AgentOptions {
        executable: Some(config.agent.executable.clone()),
        model: config.agent.model.clone(),
        allowed_tools: config.agent.allowed_tools.clone(),
        permission_mode,
        extra_args: config.agent.extra_args.clone(),
        ..Default::default()
    })
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use std::os::unix::fs::PermissionsExt;
    use std::sync::Mutex;
    use tempfile::TempDir;

    const ID_FROM_PROMPT: &str = r#"ID=$(printf '%s\n' "$PROMPT" | sed -n 's/^- id: //p' | head -n 1)"#;

    struct Harness {
        dir: TempDir,
        generator: Generator,
    }

    /// A generator whose agent is `body`, a shell script with `$WD` set to
    /// the granted working directory and `$PROMPT` holding stdin.
    fn harness(body: &str) -> Harness {
        let dir = TempDir::new().unwrap();
        let script = dir.path().join("fake-claude");
        std::fs::write(
            &script,
            format!(
                "#!/bin/sh\n\
                 while [ $# -gt 0 ]; do\n  \
                   if [ \"$1\" = \"--add-dir\" ]; then WD=\"$2\"; shift; fi\n  \
                   shift\n\
                 done\n\
                 PROMPT=$(cat)\n\
                 {ID_FROM_PROMPT}\n\
                 {body}\n"
            ),
        )
        .unwrap();
        std::fs::set_permissions(&script, std::fs::Permissions::from_mode(0o755)).unwrap();

        let catalog = Arc::new(Catalog::open(dir.path().join("stories")).unwrap());
        let agent = AgentOptions {
            executable: Some(script.display().to_string()),
            ..Default::default()
        };
        let generator = Generator::new(
            catalog,
            agent,
            prompt::DEFAULT_GUIDANCE.to_string(),
            Duration::from_millis(10),
        );
        Harness { dir, generator }
    }

    fn request(h: &Harness) -> GenerationRequest {
        GenerationRequest {
            query: "How does request routing work?".into(),
            source_dir: h.dir.path().to_path_buf(),
            source_commit: "abc1234".into(),
            repo: None,
        }
    }

    const WRITE_ALL_STAGES: &str = r#"
printf 'notes\n<!-- CHECKPOINT: STAGE_1_COMPLETE -->\n' > "$WD/exploration_notes.md"
sleep 0.05
printf 'outline\n<!-- CHECKPOINT: STAGE_2_COMPLETE -->\n' > "$WD/narrative_outline.md"
sleep 0.05
printf '<!-- CHECKPOINT: STAGE_3_COMPLETE -->\n' >> "$WD/narrative_outline.md"
sleep 0.05
printf 'map\n<!-- CHECKPOINT: STAGE_4_COMPLETE -->\n' > "$WD/snippets_mapping.md"
cat > "$WD/story.json" <<EOF
{"id": $ID, "title": "Routing", "query": "q", "repo": null, "commitHash": "abc1234",
 "createdAt": "2026-10-19T00:00:00Z",
 "chapters": [{"id": "chapter-0", "label": "Overview", "snippets": [], "explanation": "Paths map to handlers."}]}
EOF
"#;

    #[tokio::test]
    async fn successful_run_ingests_and_cleans_up() {
        let h = harness(WRITE_ALL_STAGES);
        let prepared = h.generator.prepare(&request(&h)).unwrap();
        let gen_id = prepared.generation_id().to_string();
        let working_dir = prepared.working_dir().to_path_buf();

        let seen = Mutex::new(Vec::new());
        let (_tx, rx) = watch::channel(false);
        let story = h
            .generator
            .run(prepared, |p| seen.lock().unwrap().push(p.stage), rx)
            .await
            .unwrap();

        assert_eq!(story.id, gen_id);
        assert!(!working_dir.exists());
        assert_eq!(h.generator.catalog().list().unwrap()[0].id, gen_id);

        let seen = seen.into_inner().unwrap();
        assert_eq!(seen.last(), Some(&STAGES.len()));
        assert!(seen.windows(2).all(|w| w[0] != w[1]), "duplicate reports: {seen:?}");
    }

    #[tokio::test]
    async fn exit_without_artifact_keeps_working_dir() {
        let h = harness(r#"printf 'STAGE_1_COMPLETE' > "$WD/exploration_notes.md"; echo 'gave up' >&2"#);
        let (_tx, rx) = watch::channel(false);
        let err = h
            .generator
            .generate(&request(&h), |_| {}, rx)
            .await
            .unwrap_err();
        assert!(matches!(err.reason, StoryError::ArtifactMissing(_)));
        let kept = err.working_dir.unwrap();
        assert!(kept.join("exploration_notes.md").exists());
        assert_eq!(err.stderr_excerpt, "gave up");
        assert!(h.generator.catalog().list().unwrap().is_empty());
    }

    #[tokio::test]
    async fn invalid_id_is_rejected_without_catalog_writes() {
        let h = harness(
            r#"cat > "$WD/story.json" <<EOF
{"id": "not-a-uuid", "title": "t", "query": "q", "repo": null, "commitHash": "c",
 "createdAt": "2026-10-19T00:00:00Z",
 "chapters": [{"id": "chapter-0", "label": "Overview", "snippets": [], "explanation": "x"}]}
EOF"#,
        );
        let (_tx, rx) = watch::channel(false);
        let err = h
            .generator
            .generate(&request(&h), |_| {}, rx)
            .await
            .unwrap_err();
        assert!(matches!(err.reason, StoryError::InvalidIdentifier(_)));
        let stories_dir = h.generator.catalog().stories_dir().to_path_buf();
        let json_files = std::fs::read_dir(&stories_dir)
            .unwrap()
            .filter(|e| {
                e.as_ref()
                    .unwrap()
                    .path()
                    .extension()
                    .is_some_and(|x| x == "json")
            })
            .count();
        assert_eq!(json_files, 0);
    }

    #[tokio::test]
    async fn non_zero_exit_with_artifact_still_succeeds() {
        let h = harness(&format!("{WRITE_ALL_STAGES}\nexit 1"));
        let (_tx, rx) = watch::channel(false);
        let story = h.generator.generate(&request(&h), |_| {}, rx).await.unwrap();
        assert_eq!(story.title, "Routing");
    }

    #[tokio::test]
    async fn cancel_kills_agent_and_removes_working_dir() {
        let h = harness(r#"printf 'STAGE_1_COMPLETE' > "$WD/exploration_notes.md"; sleep 30"#);
        let prepared = h.generator.prepare(&request(&h)).unwrap();
        let working_dir = prepared.working_dir().to_path_buf();
        let (tx, rx) = watch::channel(false);

        let canceller = tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(200)).await;
            let _ = tx.send(true);
            tx
        });
        let err = tokio::time::timeout(
            Duration::from_secs(10),
            h.generator.run(prepared, |_| {}, rx),
        )
        .await
        .unwrap()
        .unwrap_err();
        let _tx = canceller.await.unwrap();

        assert!(err.is_cancelled());
        assert!(err.working_dir.is_none());
        assert!(!working_dir.exists());
    }

    #[tokio::test]
    async fn prepare_failure_has_no_generation_id() {
        let h = harness(WRITE_ALL_STAGES);
        let tmp = h.generator.catalog().stories_dir().join(".tmp");
        std::fs::remove_dir_all(&tmp).unwrap();
        std::fs::write(&tmp, "not a directory").unwrap();
        let (_tx, rx) = watch::channel(false);
        let err = h
            .generator
            .generate(&request(&h), |_| {}, rx)
            .await
            .unwrap_err();
        assert_eq!(err.generation_id, None);
        assert!(err.working_dir.is_none());
    }

    #[tokio::test]
    async fn run_failure_names_its_generation() {
        let h = harness(r#"echo 'no story' >&2"#);
        let prepared = h.generator.prepare(&request(&h)).unwrap();
        let gen_id = prepared.generation_id().to_string();
        let (_tx, rx) = watch::channel(false);
        let err = h.generator.run(prepared, |_| {}, rx).await.unwrap_err();
        assert_eq!(err.generation_id.as_deref(), Some(gen_id.as_str()));
    }

    #[tokio::test]
    async fn missing_executable_is_spawn_failure() {
        let mut h = harness("true");
        h.generator.agent.executable = Some("/nonexistent/claude".into());
        let (_tx, rx) = watch::channel(false);
        let err = h
            .generator
            .generate(&request(&h), |_| {}, rx)
            .await
            .unwrap_err();
        assert!(matches!(err.reason, StoryError::SpawnFailure(_)));
    }

    #[tokio::test]
    async fn prompt_reaches_agent_with_scoped_flags() {
        let h = harness(
            r#"printf '%s' "$PROMPT" > "$WD/../prompt.txt"; printf '%s' "$PWD" > "$WD/../cwd.txt""#,
        );
        let (_tx, rx) = watch::channel(false);
        let _ = h.generator.generate(&request(&h), |_| {}, rx).await;
        let tmp = h.generator.catalog().stories_dir().join(".tmp");
        let prompt = std::fs::read_to_string(tmp.join("prompt.txt")).unwrap();
        assert!(prompt.contains("STAGE_4_COMPLETE"));
        assert!(prompt.contains(r#"- query: "How does request routing work?""#));
        assert!(prompt.contains("- repo: null"));
    }

    #[test]
    fn agent_options_follow_config() {
        let mut config = Config::default();
        config.agent.model = Some("opus".into());
        config.agent.permission_mode = Some("acceptEdits".into());
        let opts = agent_options(&config).unwrap();
        assert_eq!(opts.executable(), "claude");
        assert_eq!(opts.permission_mode, PermissionMode::AcceptEdits);
        assert_eq!(opts.allowed_tools, vec!["Read", "Grep", "Glob", "Write"]);

        config.agent.permission_mode = Some("yolo".into());
        assert!(agent_options(&config).is_err());
    }
}
