use crate::cmd::Overrides;
use crate::signal::{self, Interrupted};
use std::path::Path;
use std::time::Duration;
use story_server::AppState;
use tracing::info;

/// How long running generations get to clean up after a shutdown signal.
const SHUTDOWN_GRACE: Duration = Duration::from_secs(5);

pub fn run(root: &Path, overrides: &Overrides, port: u16, open: bool) -> anyhow::Result<()> {
    let config = overrides.load_config(root)?;
    let state = AppState::with_config(root.to_path_buf(), config)?;
    let rt = tokio::runtime::Runtime::new()?;
    rt.block_on(serve(state, port, open))
}

async fn serve(state: AppState, port: u16, open: bool) -> anyhow::Result<()> {
    let listener = tokio::net::TcpListener::bind(format!("0.0.0.0:{port}")).await?;
    let actual_port = listener.local_addr()?.port();
    println!(
        "code-stories API on http://localhost:{actual_port}/api/stories  (PID {})",
        std::process::id()
    );

    let shutdown = tokio::select! {
        res = story_server::serve_on(state.clone(), listener, open) => return res,
        signal = signal::shutdown_signal() => signal,
    };

    let cancelled = state.cancel_running().await;
    info!(?shutdown, cancelled, "shutting down");
    if cancelled > 0 {
        wait_for_generations(&state).await;
    }
    Err(Interrupted(shutdown).into())
}

/// Wait, up to the grace period, for cancelled generations to reach a
/// terminal state so their agents are gone and working dirs removed.
async fn wait_for_generations(state: &AppState) {
    let deadline = tokio::time::Instant::now() + SHUTDOWN_GRACE;
    while tokio::time::Instant::now() < deadline {
        let running = state
            .generations
            .lock()
            .await
            .values()
            .filter(|r| !r.status.is_terminal())
            .count();
        if running == 0 {
            return;
        }
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
    tracing::warn!("generations still running after the shutdown grace period");
}
