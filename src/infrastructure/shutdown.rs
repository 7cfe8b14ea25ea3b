//! Graceful Shutdown Handler
//!
//! Provides coordinated shutdown for all server components.

use crate::domain::services::CallContext;
use std::future::Future;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;
use tokio::sync::Notify;
use tokio_util::sync::CancellationToken;

/// Shutdown coordinator for graceful termination.
///
/// Tracks in-flight calls, signals shutdown to all components and can
/// cancel calls that outlive the drain window.
#[derive(Clone)]
pub struct ShutdownController {
    /// Whether shutdown has been initiated
    shutdown_initiated: Arc<AtomicBool>,
    /// Number of in-flight calls
    active_calls: Arc<AtomicUsize>,
    /// Broadcast channel for shutdown signal
    shutdown_tx: broadcast::Sender<()>,
    /// Notify when all calls are drained
    drain_complete: Arc<Notify>,
    /// Parent of every call's cancellation token
    calls_token: CancellationToken,
    /// Cancelled once the gRPC server has stopped
    drained: CancellationToken,
}

impl ShutdownController {
    /// Create a new shutdown controller.
    pub fn new() -> Self {
        let (shutdown_tx, _) = broadcast::channel(1);
        Self {
            shutdown_initiated: Arc::new(AtomicBool::new(false)),
            active_calls: Arc::new(AtomicUsize::new(0)),
            shutdown_tx,
            drain_complete: Arc::new(Notify::new()),
            calls_token: CancellationToken::new(),
            drained: CancellationToken::new(),
        }
    }

    /// Subscribe to shutdown notifications.
    pub fn subscribe(&self) -> broadcast::Receiver<()> {
        self.shutdown_tx.subscribe()
    }

    /// Initiate graceful shutdown.
    pub fn shutdown(&self) {
        if !self.shutdown_initiated.swap(true, Ordering::SeqCst) {
            tracing::info!("initiating graceful shutdown");
            let _ = self.shutdown_tx.send(());
        }
        if self.active_calls() == 0 {
            self.drain_complete.notify_waiters();
        }
    }

    /// Resolves once shutdown has been initiated.
    pub async fn wait_for_shutdown(&self) {
        let mut rx = self.subscribe();
        if self.is_shutdown() {
            return;
        }
        let _ = rx.recv().await;
    }

    /// Check if shutdown has been initiated.
    pub fn is_shutdown(&self) -> bool {
        self.shutdown_initiated.load(Ordering::SeqCst)
    }

    /// Get the number of in-flight calls.
    pub fn active_calls(&self) -> usize {
        self.active_calls.load(Ordering::SeqCst)
    }

    /// Increment in-flight call count.
    pub fn call_started(&self) {
        self.active_calls.fetch_add(1, Ordering::SeqCst);
    }

    /// Decrement in-flight call count and notify if drained.
    pub fn call_ended(&self) {
        let prev = self.active_calls.fetch_sub(1, Ordering::SeqCst);
        if prev == 1 && self.is_shutdown() {
            self.drain_complete.notify_waiters();
        }
    }

    /// Wait for all in-flight calls to finish (with timeout).
    pub async fn wait_for_drain(&self, timeout: Duration) -> bool {
        let notified = self.drain_complete.notified();
        tokio::pin!(notified);
        // Register before checking so a concurrent last call_ended is not missed
        notified.as_mut().enable();

        if self.active_calls() == 0 {
            return true;
        }

        tokio::select! {
            _ = notified => true,
            _ = tokio::time::sleep(timeout) => {
                tracing::warn!(
                    "drain timeout: {} calls still active",
                    self.active_calls()
                );
                false
            }
        }
    }

    /// Create a call guard that auto-decrements on drop.
    pub fn call_guard(&self) -> CallGuard {
        self.call_started();
        CallGuard {
            controller: self.clone(),
        }
    }

    /// Cancellation scope for a new call, cancelled by [`cancel_calls`].
    ///
    /// [`cancel_calls`]: ShutdownController::cancel_calls
    pub fn call_context(&self) -> CallContext {
        CallContext::new(self.calls_token.child_token())
    }

    /// Cancel every call still in flight.
    pub fn cancel_calls(&self) {
        if !self.calls_token.is_cancelled() {
            tracing::warn!("cancelling {} in-flight calls", self.active_calls());
            self.calls_token.cancel();
        }
    }
}

impl ShutdownController {
    /// Mark the gRPC server as stopped, releasing [`wait_for_drained`].
    ///
    /// [`wait_for_drained`]: ShutdownController::wait_for_drained
    pub fn mark_drained(&self) {
        if !self.drained.is_cancelled() {
            tracing::info!("in-flight calls drained");
            self.drained.cancel();
        }
    }

    pub fn is_drained(&self) -> bool {
        self.drained.is_cancelled()
    }

    /// Resolves once the gRPC server has stopped. Components that must
    /// outlive the drain (metrics endpoint, sampler) stop on this.
    pub fn wait_for_drained(&self) -> impl Future<Output = ()> + Send + 'static {
        let drained = self.drained.clone();
        async move { drained.cancelled().await }
    }
}

impl Default for ShutdownController {
    fn default() -> Self {
        Self::new()
    }
}

/// RAII guard for tracking in-flight calls.
///
/// Automatically decrements the call count when dropped.
pub struct CallGuard {
    controller: ShutdownController,
}

impl Drop for CallGuard {
    fn drop(&mut self) {
        self.controller.call_ended();
    }
}

/// Install signal handlers for graceful shutdown.
///
/// Returns a future that completes when a shutdown signal is received.
#[cfg_attr(coverage_nightly, coverage(off))]
pub async fn shutdown_signal(controller: ShutdownController) {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!("failed to install Ctrl+C handler: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                tracing::error!("failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            tracing::info!("received Ctrl+C, initiating shutdown");
        }
        _ = terminate => {
            tracing::info!("received SIGTERM, initiating shutdown");
        }
    }

    controller.shutdown();
}
