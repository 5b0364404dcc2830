//! SIGTERM / SIGINT handling.
//!
//! Ensures that:
//! - The running pipeline is told to stop at its next checkpoint
//! - The active external tool is terminated
//! - Temporaries are removed by the pipeline's own cleanup guard

use tokio::signal;
use tracing::info;

use super::CancelHandle;

/// Shutdown coordinator
pub struct ShutdownCoordinator {
    handle: CancelHandle,
}

impl ShutdownCoordinator {
    pub fn new(handle: CancelHandle) -> Self {
        Self { handle }
    }

    /// Wait for SIGTERM or SIGINT, then cancel the run.
    pub async fn wait_for_signal(&self) -> std::io::Result<()> {
        #[cfg(unix)]
        let mut terminate = signal::unix::signal(signal::unix::SignalKind::terminate())?;

        #[cfg(unix)]
        let terminate = terminate.recv();

        #[cfg(not(unix))]
        let terminate = std::future::pending::<Option<()>>();

        tokio::select! {
            res = signal::ctrl_c() => {
                res?;
                info!("Received SIGINT (Ctrl+C), cancelling");
            }
            _ = terminate => {
                info!("Received SIGTERM, cancelling");
            }
        }

        self.trigger();
        Ok(())
    }

    /// Cancel the run without waiting for a signal.
    pub fn trigger(&self) {
        self.handle.cancel();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_shutdown_coordinator() {
        let handle = CancelHandle::new();
        let coordinator = ShutdownCoordinator::new(handle.clone());
        assert!(handle.check().is_ok());

        let trigger = tokio::spawn(async move {
            coordinator.trigger();
        });
        trigger.await.unwrap();

        assert!(handle.is_cancelled());
        assert!(matches!(handle.check(), Err(crate::utils::errors::BackupError::Interrupted)));
    }
}
