use std::convert::Infallible;
use std::sync::Arc;

use axum::extract::{Path, State};
use axum::response::sse::{Event, KeepAlive, Sse};
use axum::response::IntoResponse;
use axum::Json;
use chrono::Utc;
use serde::Deserialize;
use story_core::probe::Progress;
use story_core::{git, paths, stage};
use tokio::sync::watch;
use tracing::{info, warn};

use crate::clone::clone_repo;
use crate::error::AppError;
use crate::generation::{probe_async, GenerationRequest};
use crate::state::{self, AppState, GenerationRecord, GenerationStatus};

#[derive(Debug, Deserialize)]
pub struct GenerateBody {
    #[serde(default)]
    pub query: String,
    #[serde(default)]
    pub repo: Option<String>,
}

// ---------------------------------------------------------------------------
// POST /api/generate
// ---------------------------------------------------------------------------

/// POST /api/generate: start a generation and return its id immediately.
///
/// When `repo` is given the repository is cloned first; a clone failure is
/// reported on this request rather than as a failed generation.
pub async fn start_generation(
    State(app): State<AppState>,
    Json(body): Json<GenerateBody>,
) -> Result<Json<serde_json::Value>, AppError> {
    let query = body.query.trim().to_string();
    if query.is_empty() {
        return Err(AppError::bad_request("query is required"));
    }

    let repo_input = body
        .repo
        .as_deref()
        .map(str::trim)
        .filter(|s| !s.is_empty());
    let (clone, repo) = match repo_input {
        Some(input) => {
            let repo_ref =
                git::parse_repo_ref(input).map_err(|e| AppError::bad_request(e.to_string()))?;
            let clone = clone_repo(&app.config.clone, &repo_ref).await?;
            (Some(clone), Some(repo_ref))
        }
        None => (None, None),
    };
    let source_dir = clone
        .as_ref()
        .map(|c| c.path().to_path_buf())
        .unwrap_or_else(|| app.root.clone());

    let generator = app.generator.clone();
    let (req_query, req_repo) = (query.clone(), repo.clone());
    let prepared = tokio::task::spawn_blocking(move || {
        let source_commit = git::commit_hash(&source_dir);
        generator.prepare(&GenerationRequest {
            query: req_query,
            source_dir,
            source_commit,
            repo: req_repo,
        })
    })
    .await
    .map_err(|e| AppError(anyhow::anyhow!("task join error: {e}")))??;

    let generation_id = prepared.generation_id().to_string();
    let (cancel_tx, cancel_rx) = watch::channel(false);
    let record = GenerationRecord {
        generation_id: generation_id.clone(),
        query,
        repo,
        status: GenerationStatus::Running,
        story_id: None,
        error: None,
        stderr: None,
        working_dir: prepared.working_dir().to_path_buf(),
        started_at: Utc::now(),
        finished_at: None,
        cancel: Some(Arc::new(cancel_tx)),
    };
    {
        let mut map = app.generations.lock().await;
        state::prune_finished(&mut map, state::MAX_FINISHED_RECORDS);
        map.insert(generation_id.clone(), record);
    }

    let generator = app.generator.clone();
    let generations = app.generations.clone();
    let task_id = generation_id.clone();
    tokio::spawn(async move {
        let id = task_id;
        let result = generator
            .run(
                prepared,
                |p: &Progress| info!(generation_id = %id, stage = p.stage, label = p.label, "stage reached"),
                cancel_rx,
            )
            .await;
        // The clone lives exactly as long as the agent run.
        drop(clone);

        let mut map = generations.lock().await;
        let Some(rec) = map.get_mut(&id) else {
            warn!(generation_id = %id, "generation record vanished");
            return;
        };
        rec.finished_at = Some(Utc::now());
        rec.cancel = None;
        match result {
            Ok(story) => {
                rec.status = GenerationStatus::Succeeded;
                rec.story_id = Some(story.id);
            }
            Err(failure) => {
                rec.status = if failure.is_cancelled() {
                    GenerationStatus::Cancelled
                } else {
                    GenerationStatus::Failed
                };
                rec.error = Some(failure.reason.to_string());
                if !failure.stderr_excerpt.is_empty() {
                    rec.stderr = Some(failure.stderr_excerpt);
                }
            }
        }
    });

    info!(generation_id = %generation_id, "generation started");
    Ok(Json(serde_json::json!({
        "generationId": generation_id,
        "status": "started",
    })))
}

// ---------------------------------------------------------------------------
// Progress
// ---------------------------------------------------------------------------

/// Probe the working directory and merge in what the record knows.
async fn snapshot(app: &AppState, id: &str) -> (serde_json::Value, Option<GenerationStatus>) {
    let record = app.generations.lock().await.get(id).cloned();
    let stages = app.generator.stages();
    let working_dir = paths::working_dir(app.stories_dir(), id);
    let mut progress = probe_async(stages, &working_dir).await;

    let status = record.as_ref().map(|r| r.status);
    if status == Some(GenerationStatus::Succeeded) {
        // The working directory is gone once the story is ingested.
        progress.stage = progress.total;
        progress.percent = 100;
        progress.label = stage::label_for(stages, progress.total);
    }

    let mut value = serde_json::to_value(&progress).unwrap_or_else(|_| serde_json::json!({}));
    if let Some(obj) = value.as_object_mut() {
        let status_str = match status {
            Some(GenerationStatus::Running) => "running",
            Some(GenerationStatus::Succeeded) => "succeeded",
            Some(GenerationStatus::Failed) => "failed",
            Some(GenerationStatus::Cancelled) => "cancelled",
            None => "unknown",
        };
        obj.insert("generationId".into(), serde_json::json!(id));
        obj.insert("status".into(), serde_json::json!(status_str));
        if let Some(rec) = &record {
            if let Some(story_id) = &rec.story_id {
                obj.insert("storyId".into(), serde_json::json!(story_id));
            }
            if let Some(error) = &rec.error {
                obj.insert("error".into(), serde_json::json!(error));
            }
            if let Some(stderr) = &rec.stderr {
                obj.insert("stderr".into(), serde_json::json!(stderr));
            }
        }
    }
    (value, status)
}

/// GET /api/generate/{id}/progress
pub async fn get_progress(
    Path(id): Path<String>,
    State(app): State<AppState>,
) -> Result<Json<serde_json::Value>, AppError> {
    let id = paths::canonical_id(&id)?;
    let (value, _) = snapshot(&app, &id).await;
    Ok(Json(value))
}

/// GET /api/generate/{id}/events: SSE `progress` events whenever the
/// snapshot changes. The stream ends after a terminal status, or at once for
/// an id the server does not know.
pub async fn progress_events(
    Path(id): Path<String>,
    State(app): State<AppState>,
) -> Result<impl IntoResponse, AppError> {
    let id = paths::canonical_id(&id)?;
    let interval = app.config.poll_interval();

    struct Cursor {
        app: AppState,
        id: String,
        last: Option<serde_json::Value>,
        done: bool,
    }

    let cursor = Cursor {
        app,
        id,
        last: None,
        done: false,
    };
    let stream = futures::stream::unfold(cursor, move |mut cur| async move {
        if cur.done {
            return None;
        }
        loop {
            if cur.last.is_some() {
                tokio::time::sleep(interval).await;
            }
            let (value, status) = snapshot(&cur.app, &cur.id).await;
            let finished = status.map_or(true, GenerationStatus::is_terminal);
            if cur.last.as_ref() == Some(&value) && !finished {
                continue;
            }
            cur.done = finished;
            let event = Event::default()
                .event("progress")
                .json_data(&value)
                .unwrap_or_else(|_| Event::default().event("progress").data("{}"));
            cur.last = Some(value);
            return Some((Ok::<Event, Infallible>(event), cur));
        }
    });

    Ok(Sse::new(stream).keep_alive(KeepAlive::default()))
}

// ---------------------------------------------------------------------------
// Cancel / list
// ---------------------------------------------------------------------------

/// DELETE /api/generate/{id}: request cancellation of a running generation.
pub async fn cancel_generation(
    Path(id): Path<String>,
    State(app): State<AppState>,
) -> Result<Json<serde_json::Value>, AppError> {
    let id = paths::canonical_id(&id)?;
    let cancel = {
        let map = app.generations.lock().await;
        map.get(&id)
            .filter(|r| r.status == GenerationStatus::Running)
            .and_then(|r| r.cancel.clone())
    };
    let Some(cancel) = cancel else {
        return Err(AppError::not_found(format!(
            "no running generation '{id}'"
        )));
    };
    let _ = cancel.send(true);
    info!(generation_id = %id, "cancellation requested");
    Ok(Json(serde_json::json!({
        "generationId": id,
        "status": "cancelling",
    })))
}

/// GET /api/generations: every generation this server has started, newest first.
pub async fn list_generations(State(app): State<AppState>) -> Json<serde_json::Value> {
    let mut records: Vec<GenerationRecord> =
        app.generations.lock().await.values().cloned().collect();
    records.sort_by(|a, b| b.started_at.cmp(&a.started_at));
    Json(serde_json::json!(records))
}
