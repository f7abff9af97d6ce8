//! Host shutdown coordination.
//!
//! [`HostShutdown`] owns the tail end of the host's lifecycle: it listens
//! for SIGTERM/SIGINT (Ctrl+C on Windows), fans the stop signal out to the
//! transports and the confirmation monitor through a shared cancellation
//! token, drains them within a bounded grace window, and locks the
//! keystore so no decrypted seed outlives the process. The pending table
//! is volatile and needs no draining of its own.

use std::future::Future;
use std::io;
use std::sync::Arc;
use std::time::Duration;

#[cfg(unix)]
use tokio::signal::unix::{SignalKind, signal};
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;

use arca::error::HostError;
use arca::keystore::Keystore;

/// Coordinates subsystem draining and keystore locking on shutdown.
pub struct HostShutdown {
    token: CancellationToken,
    subsystems: TaskTracker,
    keystore: Arc<dyn Keystore>,
    grace: Duration,
}

impl std::fmt::Debug for HostShutdown {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HostShutdown")
            .field("grace", &self.grace)
            .finish_non_exhaustive()
    }
}

impl HostShutdown {
    /// Installs the signal handlers and prepares the subsystem tracker.
    ///
    /// # Errors
    ///
    /// Returns an [`io::Error`] if signal registration fails.
    pub fn install(keystore: Arc<dyn Keystore>, grace: Duration) -> Result<Self, io::Error> {
        let token = CancellationToken::new();

        #[cfg(unix)]
        {
            let mut sigterm = signal(SignalKind::terminate())?;
            let mut sigint = signal(SignalKind::interrupt())?;
            let trigger = token.clone();
            tokio::spawn(async move {
                tokio::select! {
                    _ = sigterm.recv() => tracing::info!("received SIGTERM"),
                    _ = sigint.recv() => tracing::info!("received SIGINT"),
                }
                trigger.cancel();
            });
        }

        #[cfg(windows)]
        {
            let trigger = token.clone();
            tokio::spawn(async move {
                let _ = tokio::signal::ctrl_c().await;
                tracing::info!("received Ctrl+C");
                trigger.cancel();
            });
        }

        Ok(Self {
            token,
            subsystems: TaskTracker::new(),
            keystore,
            grace,
        })
    }

    /// The token subsystems watch to stop accepting new requests.
    #[must_use]
    pub fn token(&self) -> CancellationToken {
        self.token.clone()
    }

    /// Registers a subsystem task. Its failure is logged under `name`, not
    /// propagated; one transport dying does not take the host down.
    pub fn spawn<F>(&self, name: &'static str, task: F)
    where
        F: Future<Output = Result<(), HostError>> + Send + 'static,
    {
        self.subsystems.spawn(async move {
            match task.await {
                Ok(()) => tracing::debug!(subsystem = name, "subsystem stopped"),
                Err(err) => tracing::error!(subsystem = name, error = %err, "subsystem failed"),
            }
        });
    }

    /// Waits for the stop signal, then runs the shutdown sequence: drain
    /// subsystems within the grace window, lock the keystore, flush a
    /// final log line.
    pub async fn run_to_completion(self) {
        self.token.cancelled().await;
        tracing::info!("shutdown requested, draining subsystems");

        self.subsystems.close();
        if tokio::time::timeout(self.grace, self.subsystems.wait())
            .await
            .is_err()
        {
            tracing::warn!(grace = ?self.grace, "subsystems still running after grace window");
        }

        // Zero decrypted seeds before the process exits.
        self.keystore.lock().await;
        tracing::info!("keystore locked, shutdown complete");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use arca::keystore::mock::MockKeystore;

    #[tokio::test]
    async fn test_drain_then_lock() {
        let keystore: Arc<dyn Keystore> = Arc::new(MockKeystore::unlocked());
        let shutdown =
            HostShutdown::install(Arc::clone(&keystore), Duration::from_millis(500)).unwrap();

        let stop = shutdown.token();
        shutdown.spawn("worker", async move {
            stop.cancelled().await;
            Ok(())
        });

        assert!(keystore.is_unlocked());
        shutdown.token().cancel();
        shutdown.run_to_completion().await;
        assert!(!keystore.is_unlocked());
    }

    #[tokio::test]
    async fn test_grace_window_bounds_stuck_subsystems() {
        let keystore: Arc<dyn Keystore> = Arc::new(MockKeystore::unlocked());
        let shutdown =
            HostShutdown::install(Arc::clone(&keystore), Duration::from_millis(50)).unwrap();

        shutdown.spawn("stuck", async {
            std::future::pending::<()>().await;
            Ok(())
        });

        shutdown.token().cancel();
        // The stuck subsystem must not hold the shutdown hostage, and the
        // keystore still ends up locked.
        tokio::time::timeout(Duration::from_secs(2), shutdown.run_to_completion())
            .await
            .unwrap();
        assert!(!keystore.is_unlocked());
    }

    #[tokio::test]
    async fn test_failing_subsystem_does_not_block_others() {
        let keystore: Arc<dyn Keystore> = Arc::new(MockKeystore::unlocked());
        let shutdown =
            HostShutdown::install(Arc::clone(&keystore), Duration::from_millis(500)).unwrap();

        shutdown.spawn("broken", async {
            Err(HostError::internal("listener fell over"))
        });
        let stop = shutdown.token();
        shutdown.spawn("healthy", async move {
            stop.cancelled().await;
            Ok(())
        });

        shutdown.token().cancel();
        shutdown.run_to_completion().await;
        assert!(!keystore.is_unlocked());
    }
}
