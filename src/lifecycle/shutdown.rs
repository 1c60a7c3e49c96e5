//! Shutdown coordination for the gateway.

use tokio::sync::broadcast;
use tokio::task::JoinHandle;

/// Coordinator for graceful shutdown.
///
/// Provides a broadcast channel that all long-running tasks can subscribe to.
#[derive(Clone)]
pub struct Shutdown {
    /// Broadcast channel sender.
    tx: broadcast::Sender<()>,
}

impl Shutdown {
    /// Create a new shutdown coordinator.
    pub fn new() -> Self {
        let (tx, _) = broadcast::channel(1);
        Self { tx }
    }

    /// Subscribe to the shutdown signal.
    pub fn subscribe(&self) -> broadcast::Receiver<()> {
        self.tx.subscribe()
    }

    /// Trigger the shutdown signal.
    pub fn trigger(&self) {
        let _ = self.tx.send(());
    }

    /// Get the number of active subscribers (tasks still running).
    pub fn receiver_count(&self) -> usize {
        self.tx.receiver_count()
    }
}

impl Default for Shutdown {
    fn default() -> Self {
        Self::new()
    }
}

/// Handles of the periodic loops (prober, stale sweep, idle reaper).
pub struct BackgroundTasks {
    shutdown: Shutdown,
    handles: Vec<(&'static str, JoinHandle<()>)>,
}

impl BackgroundTasks {
    pub fn new(shutdown: Shutdown) -> Self {
        Self {
            shutdown,
            handles: Vec::new(),
        }
    }

    pub fn push(&mut self, name: &'static str, handle: JoinHandle<()>) {
        self.handles.push((name, handle));
    }

    pub fn len(&self) -> usize {
        self.handles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handles.is_empty()
    }

    /// Signal every loop and wait for each to exit.
    pub async fn stop(self) {
        self.shutdown.trigger();
        for (name, handle) in self.handles {
            if let Err(e) = handle.await {
                tracing::warn!(task = name, error = %e, "Background task ended abnormally");
            } else {
                tracing::debug!(task = name, "Background task stopped");
            }
        }
    }
}
