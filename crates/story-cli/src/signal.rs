//! Interrupt handling shared by the long-running commands.

use std::sync::{Arc, OnceLock};
use tokio::sync::watch;

/// The signal that stopped a command.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Shutdown {
    Interrupt,
    Terminate,
}

impl Shutdown {
    /// Conventional `128 + signal number` exit status.
    pub fn exit_code(self) -> i32 {
        match self {
            Shutdown::Interrupt => 130,
            Shutdown::Terminate => 143,
        }
    }
}

/// Returned by a command that stopped because of a signal.
#[derive(Debug, thiserror::Error)]
#[error("interrupted")]
pub struct Interrupted(pub Shutdown);

/// Resolves on the first SIGINT, or SIGTERM on unix.
pub async fn shutdown_signal() -> Shutdown {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};
        match signal(SignalKind::terminate()) {
            Ok(mut term) => tokio::select! {
                _ = tokio::signal::ctrl_c() => Shutdown::Interrupt,
                _ = term.recv() => Shutdown::Terminate,
            },
            Err(e) => {
                tracing::warn!(error = %e, "cannot listen for SIGTERM");
                let _ = tokio::signal::ctrl_c().await;
                Shutdown::Interrupt
            }
        }
    }
    #[cfg(not(unix))]
    {
        let _ = tokio::signal::ctrl_c().await;
        Shutdown::Interrupt
    }
}

/// Flips a cancel flag when a signal arrives and remembers which one it was.
/// Must be called inside a runtime.
pub struct SignalWatch {
    cancel: watch::Receiver<bool>,
    received: Arc<OnceLock<Shutdown>>,
}

impl SignalWatch {
    pub fn spawn() -> Self {
        let (tx, cancel) = watch::channel(false);
        let received = Arc::new(OnceLock::new());
        let slot = Arc::clone(&received);
        tokio::spawn(async move {
            let signal = shutdown_signal().await;
            tracing::info!(?signal, "signal received, cancelling");
            let _ = slot.set(signal);
            let _ = tx.send(true);
        });
        Self { cancel, received }
    }

    pub fn cancel(&self) -> watch::Receiver<bool> {
        self.cancel.clone()
    }

    /// The error to return once cancellation has been observed.
    pub fn interrupted(&self) -> Interrupted {
        Interrupted(self.received.get().copied().unwrap_or(Shutdown::Interrupt))
    }
}
