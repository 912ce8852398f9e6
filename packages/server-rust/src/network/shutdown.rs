//! Graceful shutdown controller with in-flight request tracking.
//!
//! Uses `ArcSwap` for lock-free health state transitions, an atomic counter
//! with RAII guards for in-flight tracking, and a root cancellation token
//! from which every request's token is derived.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use arc_swap::ArcSwap;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;

use crate::engine::AdmissionGate;

/// Server health state, transitioned by the shutdown controller.
///
/// State machine: Starting -> Ready -> Draining -> Stopped
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HealthState {
    /// Route table built, listener not yet accepting.
    Starting,
    /// Accepting and dispatching requests.
    Ready,
    /// No new requests accepted; in-flight requests finishing.
    Draining,
    /// All in-flight requests completed or were cancelled.
    Stopped,
}

impl HealthState {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Starting => "starting",
            Self::Ready => "ready",
            Self::Draining => "draining",
            Self::Stopped => "stopped",
        }
    }
}

/// Controls graceful shutdown with health state management and in-flight tracking.
///
/// 1. Health endpoints read `health_state()` to report readiness
/// 2. The dispatch handler rejects requests unless the state is `Ready`
/// 3. `trigger_shutdown()` moves to `Draining`, closes the admission gate
///    and signals all listeners
/// 4. `wait_for_drain()` waits until in-flight requests complete
/// 5. `cancel_in_flight()` fires every outstanding request token
#[derive(Debug)]
pub struct ShutdownController {
    shutdown_signal: watch::Sender<bool>,
    in_flight: Arc<AtomicU64>,
    health_state: Arc<ArcSwap<HealthState>>,
    root_token: CancellationToken,
    gate: Option<AdmissionGate>,
}

impl ShutdownController {
    /// Creates a new shutdown controller in the `Starting` state.
    #[must_use]
    pub fn new() -> Self {
        let (tx, _rx) = watch::channel(false);
        Self {
            shutdown_signal: tx,
            in_flight: Arc::new(AtomicU64::new(0)),
            health_state: Arc::new(ArcSwap::from_pointee(HealthState::Starting)),
            root_token: CancellationToken::new(),
            gate: None,
        }
    }

    /// Controller that also closes `gate` when shutdown is triggered, so
    /// requests that passed the accepting check but were not yet admitted
    /// are refused as well.
    #[must_use]
    pub fn with_gate(gate: AdmissionGate) -> Self {
        Self {
            gate: Some(gate),
            ..Self::new()
        }
    }

    /// The dispatch admission gate, if one is attached.
    #[must_use]
    pub fn gate(&self) -> Option<&AdmissionGate> {
        self.gate.as_ref()
    }

    pub fn set_ready(&self) {
        self.health_state.store(Arc::new(HealthState::Ready));
    }

    /// Returns a receiver notified when shutdown is triggered.
    #[must_use]
    pub fn shutdown_receiver(&self) -> watch::Receiver<bool> {
        self.shutdown_signal.subscribe()
    }

    /// Transitions to `Draining` and signals all shutdown receivers.
    pub fn trigger_shutdown(&self) {
        self.health_state.store(Arc::new(HealthState::Draining));
        if let Some(gate) = &self.gate {
            gate.close();
        }
        // Receivers may have been dropped.
        let _ = self.shutdown_signal.send(true);
    }

    #[must_use]
    pub fn health_state(&self) -> HealthState {
        **self.health_state.load()
    }

    #[must_use]
    pub fn is_accepting(&self) -> bool {
        self.health_state() == HealthState::Ready
    }

    /// Token for a new request. Cancelled by [`cancel_in_flight`](Self::cancel_in_flight).
    #[must_use]
    pub fn request_token(&self) -> CancellationToken {
        self.root_token.child_token()
    }

    /// Cancels every request token handed out so far.
    pub fn cancel_in_flight(&self) {
        self.root_token.cancel();
    }

    /// Creates an RAII guard that tracks an in-flight request.
    ///
    /// The counter is decremented when the guard drops, including during
    /// unwinding.
    #[must_use]
    pub fn in_flight_guard(&self) -> InFlightGuard {
        self.in_flight.fetch_add(1, Ordering::Relaxed);
        InFlightGuard {
            in_flight: Arc::clone(&self.in_flight),
        }
    }

    #[must_use]
    pub fn in_flight_count(&self) -> u64 {
        self.in_flight.load(Ordering::Relaxed)
    }

    /// Waits for all in-flight requests to complete, up to `timeout`.
    ///
    /// Returns `true` and transitions to `Stopped` if everything drained.
    /// Returns `false` if the timeout expired (state remains `Draining`).
    pub async fn wait_for_drain(&self, timeout: Duration) -> bool {
        let deadline = tokio::time::Instant::now() + timeout;

        loop {
            if self.in_flight.load(Ordering::Relaxed) == 0 {
                self.health_state.store(Arc::new(HealthState::Stopped));
                return true;
            }

            if tokio::time::Instant::now() >= deadline {
                return false;
            }

            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    }

    /// Marks the server stopped regardless of outstanding requests.
    pub fn set_stopped(&self) {
        self.health_state.store(Arc::new(HealthState::Stopped));
    }
}

impl Default for ShutdownController {
    fn default() -> Self {
        Self::new()
    }
}

/// RAII guard that decrements the in-flight counter when dropped.
#[derive(Debug)]
pub struct InFlightGuard {
    in_flight: Arc<AtomicU64>,
}

impl Drop for InFlightGuard {
    fn drop(&mut self) {
        self.in_flight.fetch_sub(1, Ordering::Relaxed);
    }
}
