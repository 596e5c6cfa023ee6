use axum::extract::State;
use axum::Json;

use crate::error::AppError;
use crate::state::AppState;

/// GET /api/git/commit-hash: HEAD of the served tree, or `"unknown"`.
pub async fn get_commit_hash(
    State(app): State<AppState>,
) -> Result<Json<serde_json::Value>, AppError> {
    let root = app.root.clone();
    let hash = tokio::task::spawn_blocking(move || story_core::git::commit_hash(&root))
        .await
        .map_err(|e| AppError(anyhow::anyhow!("task join error: {e}")))?;
    Ok(Json(serde_json::json!({ "commitHash": hash })))
}
