//! Process Lifecycle
//!
//! One `Lifecycle` value is shared by the binary's loops. Shutdown is a
//! level, not an event: once requested it stays requested, and late
//! subscribers observe it just like early ones. Each fleet reconciliation
//! pass registers itself as an in-flight cycle, so shutdown can drain the
//! pass that is currently rewriting the active set instead of cutting it
//! off halfway.

use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;

/// Shutdown level plus the in-flight cycle count, both on watch channels.
#[derive(Clone)]
pub struct Lifecycle {
    shutdown: Arc<watch::Sender<bool>>,
    cycles: Arc<watch::Sender<usize>>,
}

impl Lifecycle {
    pub fn new() -> Self {
        Self {
            shutdown: Arc::new(watch::channel(false).0),
            cycles: Arc::new(watch::channel(0).0),
        }
    }

    /// Request shutdown. Safe to call more than once; only the first call
    /// is logged.
    pub fn shutdown(&self) {
        if !self.shutdown.send_replace(true) {
            tracing::info!("shutdown requested");
        }
    }

    /// Whether shutdown has been requested.
    pub fn is_shutdown(&self) -> bool {
        *self.shutdown.borrow()
    }

    /// A receiver whose `changed()` resolves when shutdown is requested.
    pub fn on_shutdown(&self) -> watch::Receiver<bool> {
        self.shutdown.subscribe()
    }

    /// Number of cycles currently in flight.
    pub fn cycles_in_flight(&self) -> usize {
        *self.cycles.borrow()
    }

    /// Register one unit of work that shutdown should wait for. The cycle
    /// ends when the returned guard drops.
    pub fn begin_cycle(&self) -> CycleGuard {
        self.cycles.send_modify(|n| *n += 1);
        CycleGuard {
            cycles: self.cycles.clone(),
        }
    }

    /// Wait until no cycles are in flight, up to `timeout`. Returns false
    /// when the timeout fired first.
    ///
    /// Watching the count level rather than a wake-up event means a cycle
    /// finishing between two checks can never be missed.
    pub async fn drain(&self, timeout: Duration) -> bool {
        let mut cycles = self.cycles.subscribe();
        let drained = tokio::time::timeout(timeout, async move {
            while *cycles.borrow_and_update() != 0 {
                if cycles.changed().await.is_err() {
                    break;
                }
            }
        })
        .await;
        if drained.is_err() {
            tracing::warn!(
                "drain timed out with {} cycles in flight",
                self.cycles_in_flight()
            );
        }
        drained.is_ok()
    }
}

impl Default for Lifecycle {
    fn default() -> Self {
        Self::new()
    }
}

/// Marks one in-flight cycle for as long as it lives.
pub struct CycleGuard {
    cycles: Arc<watch::Sender<usize>>,
}

impl Drop for CycleGuard {
    fn drop(&mut self) {
        self.cycles.send_modify(|n| *n -= 1);
    }
}

/// Resolve when the process receives SIGINT or SIGTERM, then request
/// shutdown on `lifecycle`.
#[cfg(unix)]
pub async fn listen_for_signals(lifecycle: Lifecycle) {
    use tokio::signal::unix::{signal, SignalKind};

    match signal(SignalKind::terminate()) {
        Ok(mut terminate) => {
            tokio::select! {
                _ = tokio::signal::ctrl_c() => tracing::info!("interrupt received"),
                _ = terminate.recv() => tracing::info!("SIGTERM received"),
            }
        }
        Err(e) => {
            tracing::error!("cannot listen for SIGTERM: {e}");
            let _ = tokio::signal::ctrl_c().await;
        }
    }
    lifecycle.shutdown();
}

/// Resolve when the process receives an interrupt, then request shutdown
/// on `lifecycle`.
#[cfg(not(unix))]
pub async fn listen_for_signals(lifecycle: Lifecycle) {
    let _ = tokio::signal::ctrl_c().await;
    lifecycle.shutdown();
}
