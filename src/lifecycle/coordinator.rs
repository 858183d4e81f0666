//! Process lifecycle coordination.
//!
//! `LifecycleCoordinator::start` performs `Starting` and hands back a
//! `RunningService`; consuming that value is the only way to run the
//! `Stopping` sequence, so it can run at most once.

use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};

use thiserror::Error;

use crate::config::ServiceConfig;
use crate::emitter::{ActiveUsersSource, EmitterHandle, TelemetryEmitter};
use crate::http::{AppState, OrderIdSource, RequestServer, ServerError, ShutdownOutcome};
use crate::lifecycle::shutdown::Shutdown;
use crate::lifecycle::signals::Signal;
use crate::observability::MetricsRegistry;
use crate::shipping::{ship_or_fallback, ConnectError, LogRecord, LogSink};

/// Upper bound on flushing the log sink during `Stopping`.
const SINK_CLOSE_TIMEOUT: Duration = Duration::from_secs(1);

/// Coordinator state machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LifecycleState {
    Starting,
    Running,
    Stopping,
    Stopped,
}

/// Fatal failure while `Starting`.
#[derive(Debug, Error)]
pub enum StartupError {
    #[error("log sink unavailable: {0}")]
    LogSink(#[from] ConnectError),

    #[error(transparent)]
    Server(#[from] ServerError),
}

/// What happened during `Stopping`.
#[derive(Debug, Clone)]
pub struct ShutdownReport {
    pub signal: Signal,
    pub server: ShutdownOutcome,
    pub samples_emitted: u64,
    pub records_shipped: u64,
    pub elapsed: Duration,
}

/// Owns startup of the log sink, telemetry emitter and request server.
pub struct LifecycleCoordinator {
    config: ServiceConfig,
    metrics: MetricsRegistry,
    order_ids: Option<OrderIdSource>,
}

impl LifecycleCoordinator {
    pub fn new(config: ServiceConfig, metrics: MetricsRegistry) -> Self {
        Self {
            config,
            metrics,
            order_ids: None,
        }
    }

    /// Replace the random order id source of `POST /orders`.
    pub fn with_order_ids(mut self, order_ids: OrderIdSource) -> Self {
        self.order_ids = Some(order_ids);
        self
    }

    /// Open the log sink, then start the emitter, then the server.
    ///
    /// An unreachable log sink is fatal and nothing else is started.
    pub async fn start(self) -> Result<RunningService, StartupError> {
        let config = self.config;
        let metrics = self.metrics;
        tracing::info!(state = ?LifecycleState::Starting, "Lifecycle transition");

        let sink = match LogSink::open(&config.log_sink).await {
            Ok(sink) => Arc::new(sink),
            Err(e) => {
                tracing::error!(error = %e, "Could not connect to log aggregator");
                return Err(e.into());
            }
        };

        let shutdown = Shutdown::new();
        let emitter = TelemetryEmitter::new(
            config.emitter.interval,
            ActiveUsersSource::from_config(&config.emitter),
            Arc::new(metrics.clone()),
        )
        .start(shutdown.token());

        let mut state = AppState::new(&config, metrics.clone(), Arc::clone(&sink));
        if let Some(order_ids) = self.order_ids {
            state.orders = state.orders.with_order_ids(order_ids);
        }

        let server = match RequestServer::listen(&config.listener, state).await {
            Ok(server) => server,
            Err(e) => {
                tracing::error!(error = %e, "Could not start HTTP server");
                shutdown.trigger();
                emitter.join().await;
                if let Err(close_err) = sink.close().await {
                    tracing::warn!(error = %close_err, "Failed to close log sink");
                }
                return Err(e.into());
            }
        };

        let running = RunningService {
            deadline: config.shutdown.deadline,
            metrics,
            sink,
            shutdown,
            emitter,
            server,
            state: LifecycleState::Running,
        };
        tracing::info!(
            state = ?LifecycleState::Running,
            address = %running.local_addr(),
            "Lifecycle transition"
        );
        let address = running.local_addr().to_string();
        running
            .ship(LogRecord::info("starting http server ...").with("address", address))
            .await;

        Ok(running)
    }
}

/// Handle to a fully started service.
pub struct RunningService {
    deadline: Duration,
    metrics: MetricsRegistry,
    sink: Arc<LogSink>,
    shutdown: Shutdown,
    emitter: EmitterHandle,
    server: RequestServer,
    state: LifecycleState,
}

impl RunningService {
    pub fn local_addr(&self) -> SocketAddr {
        self.server.local_addr()
    }

    pub fn state(&self) -> LifecycleState {
        self.state
    }

    /// Shared log sink, for call sites outside the HTTP handlers.
    pub fn sink(&self) -> Arc<LogSink> {
        Arc::clone(&self.sink)
    }

    pub fn metrics(&self) -> &MetricsRegistry {
        &self.metrics
    }

    /// Block until `signal` resolves, then run the shutdown sequence.
    pub async fn run_until<F>(self, signal: F) -> ShutdownReport
    where
        F: Future<Output = Signal>,
    {
        let signal = signal.await;
        self.stop(signal).await
    }

    /// Run `Stopping` in strict order: cancel the emitter, shut the server
    /// down within the deadline, close the log sink.
    pub async fn stop(mut self, signal: Signal) -> ShutdownReport {
        let started = Instant::now();
        self.transition(LifecycleState::Stopping);
        self.ship(
            LogRecord::info("termination signal received, shutting down...")
                .with("signal", signal.to_string()),
        )
        .await;

        self.shutdown.trigger();
        let samples_emitted = self.emitter.join().await;

        let server = self.server.shutdown(self.deadline).await;
        let record = match server {
            ShutdownOutcome::Clean => LogRecord::info("http server stopped gracefully"),
            ShutdownOutcome::Forced { in_flight, jobs } => {
                LogRecord::warn("http server shutdown forced")
                    .with("in_flight", in_flight)
                    .with("jobs", jobs as u64)
            }
        };
        ship_or_fallback(&self.sink, &self.metrics, &record).await;

        match tokio::time::timeout(SINK_CLOSE_TIMEOUT, self.sink.close()).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => tracing::warn!(error = %e, "Failed to flush log sink"),
            Err(_) => tracing::warn!("Timed out closing log sink"),
        }

        self.state = LifecycleState::Stopped;
        let report = ShutdownReport {
            signal,
            server,
            samples_emitted,
            records_shipped: self.sink.stats().records_written,
            elapsed: started.elapsed(),
        };
        tracing::info!(state = ?self.state, ?report, "Lifecycle transition");
        report
    }

    fn transition(&mut self, next: LifecycleState) {
        tracing::info!(from = ?self.state, to = ?next, "Lifecycle transition");
        self.state = next;
    }

    async fn ship(&self, record: LogRecord) {
        ship_or_fallback(&self.sink, &self.metrics, &record).await;
    }
}
