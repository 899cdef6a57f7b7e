//! Stopping the relay: one stop signal, then a bounded wait for the listener
//! and every connection task.

use std::time::Duration;

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{info, warn};

/// Stop signal shared by the listener and every connection, plus the set of
/// connection tasks a drain waits for.
///
/// Connection tasks are registered through [`ShutdownCoordinator::tracker`]
/// when their socket is upgraded.
pub struct ShutdownCoordinator {
    token: CancellationToken,
    tracker: TaskTracker,
}

impl ShutdownCoordinator {
    /// A coordinator with the stop signal lowered and no connections.
    pub fn new() -> Self {
        Self {
            token: CancellationToken::new(),
            tracker: TaskTracker::new(),
        }
    }

    /// Token the listener's graceful-shutdown future waits on.
    pub fn token(&self) -> CancellationToken {
        self.token.clone()
    }

    /// Connection tasks still running.
    pub fn tracker(&self) -> &TaskTracker {
        &self.tracker
    }

    /// Raise the stop signal. Safe to call more than once.
    pub fn shutdown(&self) {
        self.token.cancel();
    }

    /// Whether the stop signal has been raised. New handshakes are refused
    /// from this point on.
    pub fn is_shutting_down(&self) -> bool {
        self.token.is_cancelled()
    }

    /// Raise the stop signal, then wait for the listener task and every
    /// tracked connection task, giving up after `timeout`.
    ///
    /// Returns `false` if something was still running at the deadline. Those
    /// tasks are left to the runtime.
    pub async fn drain(&self, listener: JoinHandle<()>, timeout: Duration) -> bool {
        self.shutdown();
        let _ = self.tracker.close();
        info!(
            connections = self.tracker.len(),
            timeout_ms = u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX),
            "draining relay"
        );

        let drain = async {
            if let Err(e) = listener.await {
                warn!(error = %e, "listener task failed");
            }
            self.tracker.wait().await;
        };

        if tokio::time::timeout(timeout, drain).await.is_err() {
            warn!(
                still_running = self.tracker.len(),
                "drain timed out after {timeout:?}"
            );
            return false;
        }
        true
    }
}

impl Default for ShutdownCoordinator {
    fn default() -> Self {
        Self::new()
    }
}
