//! HTTP server setup and shutdown.
//!
//! # Responsibilities
//! - Create Axum Router with all handlers
//! - Wire up middleware (tracing, timeout, request ID, concurrency limit, admission)
//! - Bind server to listener and serve in the background
//! - Shut down within a deadline, forcing the close when it elapses

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use axum::{
    middleware,
    routing::{get, post},
    Router,
};
use thiserror::Error;
use tokio::net::TcpListener;
use tokio::task::JoinHandle;
use tokio::time::{self, Instant};
use tokio_util::sync::CancellationToken;
use tower::limit::GlobalConcurrencyLimitLayer;
use tower_http::{
    request_id::{MakeRequestUuid, PropagateRequestIdLayer, SetRequestIdLayer},
    timeout::TimeoutLayer,
    trace::TraceLayer,
};

use crate::config::{ListenerConfig, ServiceConfig};
use crate::http::handlers::{self, OrderSimulation};
use crate::http::inflight::{admission, InFlightTracker};
use crate::http::jobs::JobPool;
use crate::observability::MetricsRegistry;
use crate::shipping::LogSink;

/// Application state injected into handlers.
#[derive(Clone, Debug)]
pub struct AppState {
    pub metrics: MetricsRegistry,
    pub sink: Arc<LogSink>,
    pub jobs: JobPool,
    pub job_step_latency: Duration,
    pub orders: OrderSimulation,
}

impl AppState {
    pub fn new(config: &ServiceConfig, metrics: MetricsRegistry, sink: Arc<LogSink>) -> Self {
        Self {
            metrics,
            sink,
            jobs: JobPool::new(config.jobs.max_concurrent),
            job_step_latency: config.jobs.step_latency,
            orders: OrderSimulation::from_config(&config.orders),
        }
    }
}

#[derive(Debug, Error)]
pub enum ServerError {
    #[error("failed to bind {address}: {source}")]
    Bind {
        address: String,
        #[source]
        source: std::io::Error,
    },
}

/// How the server went down.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShutdownOutcome {
    /// Every in-flight request and background job finished in time.
    Clean,
    /// The deadline elapsed; listeners were closed with work still running.
    Forced { in_flight: u64, jobs: usize },
}

impl ShutdownOutcome {
    pub fn is_forced(&self) -> bool {
        matches!(self, ShutdownOutcome::Forced { .. })
    }
}

/// A running HTTP listener.
#[derive(Debug)]
pub struct RequestServer {
    local_addr: SocketAddr,
    stop: CancellationToken,
    serve: JoinHandle<std::io::Result<()>>,
    in_flight: InFlightTracker,
    jobs: JobPool,
}

impl RequestServer {
    /// Bind the configured address and start serving in the background.
    pub async fn listen(config: &ListenerConfig, state: AppState) -> Result<Self, ServerError> {
        let bind_error = |source| ServerError::Bind {
            address: config.bind_address.clone(),
            source,
        };
        let listener = TcpListener::bind(&config.bind_address)
            .await
            .map_err(bind_error)?;
        let local_addr = listener.local_addr().map_err(bind_error)?;

        tracing::info!(
            address = %local_addr,
            max_concurrent_requests = config.max_concurrent_requests,
            "HTTP server starting"
        );

        let in_flight = InFlightTracker::new();
        let jobs = state.jobs.clone();
        let app = Self::build_router(config, state, in_flight.clone());

        let stop = CancellationToken::new();
        let signal = stop.clone().cancelled_owned();
        let serve = tokio::spawn(async move {
            axum::serve(listener, app.into_make_service())
                .with_graceful_shutdown(signal)
                .await
        });

        Ok(Self {
            local_addr,
            stop,
            serve,
            in_flight,
            jobs,
        })
    }

    /// Build the Axum router with all middleware layers.
    #[allow(deprecated)]
    fn build_router(
        config: &ListenerConfig,
        state: AppState,
        in_flight: InFlightTracker,
    ) -> Router {
        Router::new()
            .route("/ping", get(handlers::ping))
            .route("/orders", post(handlers::create_order))
            .route("/internal/orders", get(handlers::internal_orders))
            .route("/metrics", get(handlers::metrics_export))
            .with_state(state)
            .layer(middleware::from_fn_with_state(in_flight, admission))
            .layer(GlobalConcurrencyLimitLayer::new(config.max_concurrent_requests))
            .layer(TimeoutLayer::new(config.request_timeout))
            .layer(PropagateRequestIdLayer::x_request_id())
            .layer(SetRequestIdLayer::x_request_id(MakeRequestUuid))
            .layer(TraceLayer::new_for_http())
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    pub fn in_flight(&self) -> u64 {
        self.in_flight.active_count()
    }

    /// Stop accepting, then wait up to `deadline` for in-flight requests and
    /// background jobs. Past the deadline the listener task is aborted.
    pub async fn shutdown(self, deadline: Duration) -> ShutdownOutcome {
        let until = Instant::now() + deadline;

        self.in_flight.stop_admitting();
        self.stop.cancel();
        tracing::info!(
            in_flight = self.in_flight.active_count(),
            deadline = ?deadline,
            "HTTP server draining"
        );

        let mut serve = self.serve;
        let requests_done = match time::timeout_at(until, &mut serve).await {
            Ok(Ok(Ok(()))) => true,
            Ok(Ok(Err(e))) => {
                tracing::warn!(error = %e, "HTTP server exited with error");
                true
            }
            Ok(Err(e)) => {
                tracing::warn!(error = %e, "HTTP server task failed");
                true
            }
            Err(_) => {
                serve.abort();
                false
            }
        };

        let requests_done =
            requests_done && time::timeout_at(until, self.in_flight.wait_idle()).await.is_ok();
        let jobs_done = time::timeout_at(until, self.jobs.drain()).await.is_ok();

        if requests_done && jobs_done {
            tracing::info!("HTTP server stopped gracefully");
            ShutdownOutcome::Clean
        } else {
            let outcome = ShutdownOutcome::Forced {
                in_flight: self.in_flight.active_count(),
                jobs: self.jobs.running(),
            };
            tracing::warn!(?outcome, deadline = ?deadline, "HTTP server shutdown forced");
            outcome
        }
    }
}
