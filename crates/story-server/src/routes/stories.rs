use axum::extract::{Path, State};
use axum::Json;

use crate::error::AppError;
use crate::state::AppState;

/// GET /api/stories: the manifest, newest first.
pub async fn list_stories(
    State(app): State<AppState>,
) -> Result<Json<serde_json::Value>, AppError> {
    let catalog = app.catalog().clone();
    let manifest = tokio::task::spawn_blocking(move || catalog.manifest())
        .await
        .map_err(|e| AppError(anyhow::anyhow!("task join error: {e}")))??;
    Ok(Json(serde_json::to_value(manifest)?))
}

/// GET /api/stories/{id}: one full story document.
pub async fn get_story(
    Path(id): Path<String>,
    State(app): State<AppState>,
) -> Result<Json<serde_json::Value>, AppError> {
    let catalog = app.catalog().clone();
    let story = tokio::task::spawn_blocking(move || catalog.get(&id))
        .await
        .map_err(|e| AppError(anyhow::anyhow!("task join error: {e}")))??;
    Ok(Json(serde_json::to_value(story)?))
}
