use axum::extract::State;
use axum::Json;

use crate::error::AppError;
use crate::state::AppState;

/// GET /api/config: the configuration the server was started with, plus
/// any validation warnings against the current tree.
pub async fn get_config(State(app): State<AppState>) -> Result<Json<serde_json::Value>, AppError> {
    let config = app.config.clone();
    let root = app.root.clone();
    let result = tokio::task::spawn_blocking(move || {
        let warnings = config.validate(&root);
        Ok::<_, serde_json::Error>(serde_json::json!({
            "config": serde_json::to_value(config.as_ref())?,
            "warnings": warnings,
        }))
    })
    .await
    .map_err(|e| AppError(anyhow::anyhow!("task join error: {e}")))??;
    Ok(Json(result))
}
