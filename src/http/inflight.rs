//! In-flight request tracking and admission control.
//!
//! # Responsibilities
//! - Count requests currently being processed
//! - Refuse new requests once shutdown has begun
//! - Let shutdown wait until the count reaches zero
//!
//! # Design Decisions
//! - A guard decrements on drop, so panicking handlers still release
//! - Increment before checking the gate: shutdown never misses a request

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use axum::{
    body::Body,
    extract::State,
    http::{Request, StatusCode},
    middleware::Next,
    response::{IntoResponse, Response},
};
use tokio::sync::Notify;

/// Tracks requests admitted by the server.
#[derive(Debug, Clone)]
pub struct InFlightTracker {
    active: Arc<AtomicU64>,
    admitting: Arc<AtomicBool>,
    idle: Arc<Notify>,
}

impl InFlightTracker {
    pub fn new() -> Self {
        Self {
            active: Arc::new(AtomicU64::new(0)),
            admitting: Arc::new(AtomicBool::new(true)),
            idle: Arc::new(Notify::new()),
        }
    }

    /// Admit one request. Returns `None` once admission is closed.
    pub fn track(&self) -> Option<RequestGuard> {
        self.active.fetch_add(1, Ordering::SeqCst);
        let guard = RequestGuard {
            active: Arc::clone(&self.active),
            idle: Arc::clone(&self.idle),
        };
        if self.admitting.load(Ordering::SeqCst) {
            Some(guard)
        } else {
            None
        }
    }

    pub fn active_count(&self) -> u64 {
        self.active.load(Ordering::SeqCst)
    }

    pub fn stop_admitting(&self) {
        self.admitting.store(false, Ordering::SeqCst);
    }

    pub fn is_admitting(&self) -> bool {
        self.admitting.load(Ordering::SeqCst)
    }

    /// Wait until no admitted request is left.
    pub async fn wait_idle(&self) {
        loop {
            let notified = self.idle.notified();
            if self.active_count() == 0 {
                return;
            }
            notified.await;
        }
    }
}

impl Default for InFlightTracker {
    fn default() -> Self {
        Self::new()
    }
}

/// Held for the duration of one request.
#[derive(Debug)]
pub struct RequestGuard {
    active: Arc<AtomicU64>,
    idle: Arc<Notify>,
}

impl Drop for RequestGuard {
    fn drop(&mut self) {
        if self.active.fetch_sub(1, Ordering::SeqCst) == 1 {
            self.idle.notify_waiters();
        }
    }
}

/// Middleware that admits requests through the tracker.
pub async fn admission(
    State(tracker): State<InFlightTracker>,
    request: Request<Body>,
    next: Next,
) -> Response {
    let Some(_guard) = tracker.track() else {
        tracing::debug!(path = %request.uri().path(), "Rejecting request during shutdown");
        return (StatusCode::SERVICE_UNAVAILABLE, "server is shutting down").into_response();
    };
    next.run(request).await
}
