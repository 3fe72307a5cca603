//! Graceful shutdown for the proxy.
//!
//! Shutdown proceeds in two phases: stop accepting connections and drain
//! in-flight proxy requests within a grace window (default 30 seconds), then
//! cancel background work (health probe timers, the schema refresher) and
//! close the listener. The coordinator also feeds the `/ready` endpoint,
//! which flips to 503 as soon as draining begins.

use std::future::Future;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, watch};
use tracing::{debug, info, warn};

/// Configuration for graceful shutdown behavior.
#[derive(Debug, Clone)]
pub struct ShutdownConfig {
    /// Grace window for in-flight requests (default: 30 seconds)
    pub grace_period: Duration,
    /// Whether to install SIGTERM/SIGINT handlers (default: true)
    pub handle_signals: bool,
}

impl Default for ShutdownConfig {
    fn default() -> Self {
        Self {
            grace_period: Duration::from_secs(30),
            handle_signals: true,
        }
    }
}

/// Lifecycle phase of the proxy process.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LifecyclePhase {
    /// Serving traffic
    Running,
    /// Shutdown initiated, draining in-flight requests
    Draining,
    /// Drained (or grace window elapsed); listener is closing
    Stopped,
}

/// Coordinates the drain-then-stop sequence and tracks in-flight requests.
#[derive(Clone)]
pub struct ShutdownCoordinator {
    shutdown_tx: broadcast::Sender<()>,
    phase_tx: Arc<watch::Sender<LifecyclePhase>>,
    phase_rx: watch::Receiver<LifecyclePhase>,
    in_flight: Arc<AtomicUsize>,
    draining: Arc<AtomicBool>,
    config: ShutdownConfig,
}

impl ShutdownCoordinator {
    pub fn new(config: ShutdownConfig) -> Self {
        let (shutdown_tx, _) = broadcast::channel(1);
        let (phase_tx, phase_rx) = watch::channel(LifecyclePhase::Running);
        Self {
            shutdown_tx,
            phase_tx: Arc::new(phase_tx),
            phase_rx,
            in_flight: Arc::new(AtomicUsize::new(0)),
            draining: Arc::new(AtomicBool::new(false)),
            config,
        }
    }

    pub fn with_defaults() -> Self {
        Self::new(ShutdownConfig::default())
    }

    /// True once shutdown has been initiated. Drives the `/ready` probe.
    pub fn is_shutting_down(&self) -> bool {
        self.draining.load(Ordering::SeqCst)
    }

    /// Number of requests currently in flight.
    pub fn in_flight(&self) -> usize {
        self.in_flight.load(Ordering::SeqCst)
    }

    /// Subscribe to the shutdown broadcast.
    pub fn subscribe(&self) -> broadcast::Receiver<()> {
        self.shutdown_tx.subscribe()
    }

    /// Watch lifecycle phase changes.
    pub fn watch_phase(&self) -> watch::Receiver<LifecyclePhase> {
        self.phase_rx.clone()
    }

    /// RAII guard counting one in-flight request.
    pub fn request_guard(&self) -> RequestGuard {
        self.in_flight.fetch_add(1, Ordering::SeqCst);
        RequestGuard {
            in_flight: self.in_flight.clone(),
        }
    }

    /// Initiate shutdown: flip readiness, signal the listener, and wait for
    /// in-flight requests to finish within the grace window.
    pub async fn shutdown(&self) {
        if self.draining.swap(true, Ordering::SeqCst) {
            debug!("shutdown already in progress");
            return;
        }

        info!(grace_secs = self.config.grace_period.as_secs(), "draining proxy");
        let _ = self.phase_tx.send(LifecyclePhase::Draining);
        let _ = self.shutdown_tx.send(());

        let started = std::time::Instant::now();
        loop {
            let active = self.in_flight();
            if active == 0 {
                info!("all in-flight requests completed");
                break;
            }
            if started.elapsed() >= self.config.grace_period {
                warn!(active, "grace window elapsed, closing with requests in flight");
                break;
            }
            debug!(active, "waiting for in-flight requests");
            tokio::time::sleep(Duration::from_millis(100)).await;
        }

        let _ = self.phase_tx.send(LifecyclePhase::Stopped);
        info!("proxy drained");
    }

    /// Future that resolves when shutdown is signaled, for
    /// `axum::serve(...).with_graceful_shutdown`.
    pub fn shutdown_signal(&self) -> impl Future<Output = ()> + Send + 'static {
        let mut rx = self.subscribe();
        async move {
            let _ = rx.recv().await;
        }
    }
}

/// RAII guard decrementing the in-flight count on drop.
pub struct RequestGuard {
    in_flight: Arc<AtomicUsize>,
}

impl Drop for RequestGuard {
    fn drop(&mut self) {
        self.in_flight.fetch_sub(1, Ordering::SeqCst);
    }
}

/// Resolve on SIGTERM or SIGINT.
#[cfg(unix)]
pub async fn signal_shutdown() {
    use tokio::signal::unix::{signal, SignalKind};

    let mut sigterm = signal(SignalKind::terminate()).expect("failed to install SIGTERM handler");
    let mut sigint = signal(SignalKind::interrupt()).expect("failed to install SIGINT handler");

    tokio::select! {
        _ = sigterm.recv() => info!("received SIGTERM"),
        _ = sigint.recv() => info!("received SIGINT"),
    }
}

/// Resolve on Ctrl+C.
#[cfg(not(unix))]
pub async fn signal_shutdown() {
    tokio::signal::ctrl_c()
        .await
        .expect("failed to install Ctrl+C handler");
    info!("received Ctrl+C");
}
