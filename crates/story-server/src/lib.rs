pub mod clone;
pub mod error;
pub mod generation;
pub mod routes;
pub mod state;

use axum::routing::get;
use axum::Router;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

pub use state::AppState;

/// Build the axum Router with all API routes and middleware.
/// Used by `serve()` and available for integration testing.
pub fn build_router(app_state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        // Git
        .route(
            "/api/git/commit-hash",
            get(routes::git::get_commit_hash),
        )
        // Config
        .route("/api/config", get(routes::config::get_config))
        // Stories
        .route("/api/stories", get(routes::stories::list_stories))
        .route("/api/stories/{id}", get(routes::stories::get_story))
        // Generation
        .route(
            "/api/generate",
            axum::routing::post(routes::generate::start_generation),
        )
        .route(
            "/api/generate/{id}",
            axum::routing::delete(routes::generate::cancel_generation),
        )
        .route(
            "/api/generate/{id}/progress",
            get(routes::generate::get_progress),
        )
        .route(
            "/api/generate/{id}/events",
            get(routes::generate::progress_events),
        )
        .route(
            "/api/generations",
            get(routes::generate::list_generations),
        )
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(app_state)
}

/// Start the API server on `port`.
pub async fn serve(app_state: AppState, port: u16, open_browser: bool) -> anyhow::Result<()> {
    let addr = format!("0.0.0.0:{port}");
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    serve_on(app_state, listener, open_browser).await
}

/// Start the API server on a pre-bound listener.
///
/// Unlike `serve`, this accepts a `TcpListener` that was already bound so the
/// caller can read the actual port before starting (useful when `port = 0` and
/// the OS picks a free port).
pub async fn serve_on(
    app_state: AppState,
    listener: tokio::net::TcpListener,
    open_browser: bool,
) -> anyhow::Result<()> {
    let actual_port = listener.local_addr()?.port();
    tracing::info!(
        stories_dir = %app_state.stories_dir().display(),
        "code-stories server listening on http://localhost:{actual_port}"
    );
    let app = build_router(app_state);

    if open_browser {
        let url = format!("http://localhost:{actual_port}/api/stories");
        let _ = open::that(&url);
    }

    axum::serve(listener, app).await?;
    Ok(())
}
