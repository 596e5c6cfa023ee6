use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use story_core::StoryError;

// ---------------------------------------------------------------------------
// Internal sentinels for explicit status codes
// ---------------------------------------------------------------------------

/// Carries an explicit HTTP 404 through the `anyhow::Error` chain.
#[derive(Debug)]
struct NotFoundError(String);

impl std::fmt::Display for NotFoundError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl std::error::Error for NotFoundError {}

#[derive(Debug)]
struct BadRequestError(String);

impl std::fmt::Display for BadRequestError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl std::error::Error for BadRequestError {}

// ---------------------------------------------------------------------------
// AppError
// ---------------------------------------------------------------------------

/// Unified error type for HTTP responses. The body is always
/// `{ "error": "<message>" }`.
#[derive(Debug)]
pub struct AppError(pub anyhow::Error);

impl AppError {
    pub fn bad_request(msg: impl Into<String>) -> Self {
        Self(BadRequestError(msg.into()).into())
    }

    pub fn not_found(msg: impl Into<String>) -> Self {
        Self(NotFoundError(msg.into()).into())
    }

    pub fn status(&self) -> StatusCode {
        if self.0.downcast_ref::<NotFoundError>().is_some() {
            return StatusCode::NOT_FOUND;
        }
        if self.0.downcast_ref::<BadRequestError>().is_some() {
            return StatusCode::BAD_REQUEST;
        }
        match self.0.downcast_ref::<StoryError>() {
            Some(e) => status_for(e),
            None => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

fn status_for(e: &StoryError) -> StatusCode {
    match e {
        StoryError::StoryNotFound(_) => StatusCode::NOT_FOUND,
        StoryError::InvalidIdentifier(_) => StatusCode::BAD_REQUEST,
        StoryError::ArtifactMissing(_)
        | StoryError::ArtifactMalformed(_)
        | StoryError::ArtifactInvalid { .. }
        | StoryError::AgentOutput(_) => StatusCode::UNPROCESSABLE_ENTITY,
        StoryError::ExternalResourceFailure(_) | StoryError::Fetch(_) => StatusCode::BAD_GATEWAY,
        StoryError::CloneTimeout { .. } => StatusCode::GATEWAY_TIMEOUT,
        StoryError::SpawnFailure(_)
        | StoryError::ManifestRaceLoss(_)
        | StoryError::Cancelled
        | StoryError::Io(_)
        | StoryError::Yaml(_)
        | StoryError::Json(_) => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            tracing::error!(error = %format!("{:#}", self.0), "request failed");
        }
        let body = serde_json::json!({ "error": self.0.to_string() });
        (status, axum::Json(body)).into_response()
    }
}

impl<E> From<E> for AppError
where
    E: Into<anyhow::Error>,
{
    fn from(err: E) -> Self {
        Self(err.into())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    #[test]
    fn story_not_found_maps_to_404() {
        let err = AppError(StoryError::StoryNotFound("abc".into()).into());
        assert_eq!(err.into_response().status(), StatusCode::NOT_FOUND);
    }

    #[test]
    fn invalid_identifier_maps_to_400() {
        let err = AppError(StoryError::InvalidIdentifier("../etc".into()).into());
        assert_eq!(err.into_response().status(), StatusCode::BAD_REQUEST);
    }

    #[test]
    fn artifact_failures_map_to_422() {
        for e in [
            StoryError::ArtifactMissing(PathBuf::from("story.json")),
            StoryError::ArtifactMalformed("eof".into()),
            StoryError::invalid("chapters", "must not be empty"),
        ] {
            assert_eq!(
                AppError(e.into()).into_response().status(),
                StatusCode::UNPROCESSABLE_ENTITY
            );
        }
    }

    #[test]
    fn clone_timeout_maps_to_504() {
        let err = AppError(
            StoryError::CloneTimeout {
                repo: "user/repo".into(),
                secs: 60,
            }
            .into(),
        );
        assert_eq!(err.into_response().status(), StatusCode::GATEWAY_TIMEOUT);
    }

    #[test]
    fn sentinels_map_to_their_codes() {
        assert_eq!(
            AppError::bad_request("query is required").into_response().status(),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            AppError::not_found("no such generation").into_response().status(),
            StatusCode::NOT_FOUND
        );
    }

    #[test]
    fn anyhow_error_maps_to_500() {
        let err = AppError(anyhow::anyhow!("something broke"));
        assert_eq!(
            err.into_response().status(),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }

    #[tokio::test]
    async fn body_carries_the_message() {
        use http_body_util::BodyExt;
        let response = AppError::bad_request("query is required").into_response();
        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        let json: serde_json::Value = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(json["error"], "query is required");
    }
}
