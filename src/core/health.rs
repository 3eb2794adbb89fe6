// src/core/health.rs

//! Health & Shutdown (C10): liveness, readiness, and startup signals, plus
//! the shared `shutting_down` flag consulted by every suspension point.

use std::sync::atomic::{AtomicBool, Ordering};

/// Tracks the three health signals and the shutdown flag. Cheap to clone
/// (wraps only atomics); shared across the HTTP health handlers and every
/// background task.
#[derive(Debug, Default)]
pub struct HealthState {
    startup_complete: AtomicBool,
    shutting_down: AtomicBool,
    has_quorum: AtomicBool,
}

impl HealthState {
    pub fn new() -> Self {
        Self::default()
    }

    /// Always positive while the process is alive; a handler calling this
    /// at all is itself the signal.
    pub fn liveness(&self) -> bool {
        true
    }

    /// Positive once the initial deploy-set has reached STARTED (or startup
    /// has been explicitly declared complete).
    pub fn startup(&self) -> bool {
        self.startup_complete.load(Ordering::SeqCst)
    }

    /// Positive only when `startup_complete ∧ ¬shutting_down ∧ hasQuorum`.
    pub fn readiness(&self) -> bool {
        self.startup_complete.load(Ordering::SeqCst)
            && !self.shutting_down.load(Ordering::SeqCst)
            && self.has_quorum.load(Ordering::SeqCst)
    }

    pub fn mark_startup_complete(&self) {
        self.startup_complete.store(true, Ordering::SeqCst);
    }

    pub fn set_has_quorum(&self, quorum: bool) {
        self.has_quorum.store(quorum, Ordering::SeqCst);
    }

    /// Flips readiness off first so the load balancer drains new traffic
    /// before anything else about shutdown happens.
    pub fn begin_shutdown(&self) {
        self.shutting_down.store(true, Ordering::SeqCst);
    }

    pub fn is_shutting_down(&self) -> bool {
        self.shutting_down.load(Ordering::SeqCst)
    }
}
