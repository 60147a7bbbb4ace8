//! Graceful shutdown on SIGTERM and SIGINT.

use tokio::signal::unix::SignalKind;
use tokio::signal::unix::signal;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;

/// Listens for shutdown signals and fans a cancellation token out to
/// subsystems that need to stop accepting work.
pub struct ShutdownSignal {
    tracker: TaskTracker,
    token: CancellationToken,
}

impl ShutdownSignal {
    /// Installs the signal handlers.
    ///
    /// Returns an error if signal registration fails.
    pub fn install() -> Result<Self, std::io::Error> {
        let mut sigterm = signal(SignalKind::terminate())?;
        let mut sigint = signal(SignalKind::interrupt())?;
        let inner = CancellationToken::new();
        let outer = inner.clone();
        let tracker = TaskTracker::new();
        tracker.spawn(async move {
            tokio::select! {
                _ = sigterm.recv() => {
                    tracing::info!("SIGTERM received");
                    inner.cancel();
                },
                _ = sigint.recv() => {
                    tracing::info!("SIGINT received");
                    inner.cancel();
                }
            }
        });
        tracker.close();
        Ok(Self {
            tracker,
            token: outer,
        })
    }

    /// Token to hand to subsystems; cancelled once a signal arrives.
    pub fn token(&self) -> CancellationToken {
        self.token.clone()
    }

    /// Waits for a shutdown signal and for the handler task to finish.
    pub async fn wait(&self) {
        self.token.cancelled().await;
        self.tracker.wait().await;
    }
}
